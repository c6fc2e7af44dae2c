//! Process interruption as a polled flag.
//!
//! SIGINT/SIGTERM only set the flag; the pipeline notices it between rows and
//! while sleeping, so a partial pass is never promoted. A second SIGINT exits
//! immediately.
use anyhow::{Context, Result};
use signal_hook::consts::{SIGINT, SIGTERM};
use signal_hook::flag;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

const SLEEP_SLICE: Duration = Duration::from_millis(100);

/// Exit status used when a second SIGINT arrives.
const FORCED_EXIT_STATUS: i32 = 130;

/// Shared stop request flag.
#[derive(Debug, Clone, Default)]
pub struct StopFlag {
    flag: Arc<AtomicBool>,
}

impl StopFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_set(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    #[cfg(test)]
    pub fn set(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    /// Sleep for `duration` in slices; returns `false` if stopped early.
    ///
    /// A duration too long to represent as a deadline sleeps until stopped.
    pub fn sleep(&self, duration: Duration) -> bool {
        let deadline = Instant::now().checked_add(duration);
        loop {
            if self.is_set() {
                return false;
            }
            let slice = match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return true;
                    }
                    (deadline - now).min(SLEEP_SLICE)
                }
                None => SLEEP_SLICE,
            };
            std::thread::sleep(slice);
        }
    }
}

/// Route SIGINT and SIGTERM to `stop`.
pub fn install_handlers(stop: &StopFlag) -> Result<()> {
    // Registered first so it sees the flag before this signal sets it.
    flag::register_conditional_shutdown(SIGINT, FORCED_EXIT_STATUS, Arc::clone(&stop.flag))
        .context("install second-SIGINT handler")?;
    for signal in [SIGINT, SIGTERM] {
        flag::register(signal, Arc::clone(&stop.flag))
            .with_context(|| format!("install handler for signal {signal}"))?;
    }
    Ok(())
}

//! Per-record enrichment with bounded retry.
//!
//! The client always produces a row: after the last retry it returns the
//! schema's fallback values instead of an error, so one bad record cannot
//! stop a pass.
use crate::interrupt::StopFlag;
use crate::lm::{build_system_prompt, build_user_prompt, CompletionBackend, CompletionRequest};
use crate::normalize::{normalize, validate};
use crate::schema::FieldSchema;
use crate::source::Record;
use anyhow::{Context, Result};
use std::time::Duration;

/// Longest single backoff sleep.
pub const MAX_BACKOFF: Duration = Duration::from_secs(60 * 60);

/// Exponential backoff schedule: `base_delay * 2^attempt`, capped at
/// [`MAX_BACKOFF`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first call.
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(2),
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt + 1` (attempt counts from 0).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let multiplier = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.base_delay
            .checked_mul(multiplier)
            .unwrap_or(MAX_BACKOFF)
            .min(MAX_BACKOFF)
    }

    /// Every delay the policy can produce, in order.
    pub fn schedule(&self) -> Vec<Duration> {
        (0..self.max_retries).map(|attempt| self.delay_for(attempt)).collect()
    }
}

/// Decoding parameters sent with every request.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelSettings {
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
}

/// Whether the text came from the service or is the fallback row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Answered,
    Fallback,
}

/// Result of enriching one record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Enrichment {
    pub text: String,
    pub outcome: Outcome,
    /// Calls made to the backend.
    pub attempts: u32,
}

pub struct EnrichmentClient {
    backend: Box<dyn CompletionBackend>,
    schema: FieldSchema,
    system_prompt: String,
    settings: ModelSettings,
    retry: RetryPolicy,
    strict: bool,
    stop: StopFlag,
}

impl EnrichmentClient {
    pub fn new(
        backend: Box<dyn CompletionBackend>,
        schema: FieldSchema,
        settings: ModelSettings,
        retry: RetryPolicy,
        strict: bool,
        stop: StopFlag,
    ) -> Self {
        let system_prompt = build_system_prompt(&schema);
        Self {
            backend,
            schema,
            system_prompt,
            settings,
            retry,
            strict,
            stop,
        }
    }

    pub fn schema(&self) -> &FieldSchema {
        &self.schema
    }

    /// Enrich one record; never fails.
    pub fn enrich(&self, record: &Record) -> Enrichment {
        let request = CompletionRequest {
            model: self.settings.model.clone(),
            system: self.system_prompt.clone(),
            user: build_user_prompt(&record.title, &record.author),
            temperature: self.settings.temperature,
            max_tokens: self.settings.max_tokens,
        };
        let mut attempt = 0u32;
        loop {
            match self.attempt(&request) {
                Ok(text) => {
                    tracing::info!(
                        title = %record.title,
                        author = %record.author,
                        attempt = attempt + 1,
                        answer = %text,
                        "enrichment answered"
                    );
                    return Enrichment {
                        text,
                        outcome: Outcome::Answered,
                        attempts: attempt + 1,
                    };
                }
                Err(err) => {
                    tracing::warn!(
                        title = %record.title,
                        author = %record.author,
                        backend = self.backend.name(),
                        attempt = attempt + 1,
                        error = %format!("{err:#}"),
                        "enrichment attempt failed"
                    );
                    if attempt >= self.retry.max_retries {
                        tracing::error!(
                            title = %record.title,
                            retries = self.retry.max_retries,
                            "retries exhausted; writing fallback row"
                        );
                        return self.fallback(attempt + 1);
                    }
                    let delay = self.retry.delay_for(attempt);
                    tracing::info!(
                        delay_secs = delay.as_secs_f64(),
                        retry = attempt + 1,
                        max_retries = self.retry.max_retries,
                        "retrying enrichment"
                    );
                    if !self.stop.sleep(delay) {
                        tracing::warn!(title = %record.title, "interrupted during backoff");
                        return self.fallback(attempt + 1);
                    }
                    attempt += 1;
                }
            }
        }
    }

    fn attempt(&self, request: &CompletionRequest) -> Result<String> {
        let raw = self.backend.complete(request)?;
        if !self.strict {
            return Ok(raw);
        }
        let normalized = normalize(&raw);
        validate(&normalized, &self.schema).with_context(|| format!("malformed answer {raw:?}"))
    }

    fn fallback(&self, attempts: u32) -> Enrichment {
        Enrichment {
            text: self.schema.fallback_row(),
            outcome: Outcome::Fallback,
            attempts,
        }
    }
}

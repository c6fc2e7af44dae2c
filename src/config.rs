//! Startup configuration for one enrichment pass.
//!
//! Everything that can fail before the first row is resolved here: the schema,
//! the input encoding, numeric flags and the backend. `main` builds the pass
//! from a [`PipelineConfig`] and never consults the environment again.
use crate::cli::EnrichArgs;
use crate::client::{EnrichmentClient, ModelSettings, RetryPolicy};
use crate::interrupt::StopFlag;
use crate::lm::{CommandBackend, CompletionBackend, HttpBackend, DEFAULT_API_BASE};
use crate::pipeline::PassOptions;
use crate::schema::{default_schema, load_schema, FieldSchema};
use crate::source::encoding::{resolve_encoding, ResolvedEncoding};
use crate::source::RecordSource;
use anyhow::{anyhow, Context, Result};
use std::path::PathBuf;
use std::time::Duration;

/// Environment variable holding the HTTP API key.
pub const API_KEY_ENV: &str = "OPENAI_API_KEY";

/// Transport chosen for the text-generation service.
pub enum BackendConfig {
    Http {
        api_base: String,
        api_key: String,
        timeout: Duration,
    },
    Command(CommandBackend),
}

impl std::fmt::Debug for BackendConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Http {
                api_base, timeout, ..
            } => f
                .debug_struct("Http")
                .field("api_base", api_base)
                .field("timeout", timeout)
                .finish_non_exhaustive(),
            Self::Command(command) => f.debug_tuple("Command").field(command).finish(),
        }
    }
}

#[derive(Debug)]
pub struct PipelineConfig {
    pub input: PathBuf,
    pub encoding: ResolvedEncoding,
    pub schema: FieldSchema,
    pub backend: BackendConfig,
    pub settings: ModelSettings,
    pub retry: RetryPolicy,
    pub strict: bool,
    pub pass: PassOptions,
}

impl PipelineConfig {
    /// Resolve CLI flags; `api_key` is the value of [`API_KEY_ENV`], if set.
    pub fn from_args(args: &EnrichArgs, api_key: Option<String>) -> Result<Self> {
        if args.start == 0 {
            return Err(anyhow!("--start is 1-based; use 1 to enrich every row"));
        }
        let delay = seconds("--delay", args.delay)?;
        let base_delay = seconds("--retry-delay", args.retry_delay)?;
        if !args.temperature.is_finite() || args.temperature < 0.0 {
            return Err(anyhow!(
                "--temperature must be a non-negative number, got {}",
                args.temperature
            ));
        }
        if args.max_tokens == 0 {
            return Err(anyhow!("--max-tokens must be at least 1"));
        }

        let schema = match &args.schema {
            Some(path) => load_schema(path)?,
            None => default_schema(),
        };
        let backend = resolve_backend(args, api_key)?;
        let encoding = resolve_encoding(&args.input, args.encoding.as_deref())?;

        Ok(Self {
            input: args.input.clone(),
            encoding,
            schema,
            backend,
            settings: ModelSettings {
                model: args.model.clone(),
                temperature: args.temperature,
                max_tokens: args.max_tokens,
            },
            retry: RetryPolicy {
                max_retries: args.max_retries,
                base_delay,
            },
            strict: args.strict,
            pass: PassOptions {
                start_row: args.start,
                delay,
                backup: args.backup,
                skip_delay_for_copied: args.skip_delay_for_copied,
            },
        })
    }

    pub fn source(&self) -> RecordSource {
        RecordSource::new(&self.input, self.encoding)
    }

    /// Split into the pieces `run_pass` takes.
    pub fn into_parts(self, stop: StopFlag) -> (EnrichmentClient, PassOptions, RecordSource) {
        let source = self.source();
        let backend: Box<dyn CompletionBackend> = match self.backend {
            BackendConfig::Http {
                api_base,
                api_key,
                timeout,
            } => Box::new(HttpBackend::new(&api_base, api_key, timeout)),
            BackendConfig::Command(command) => Box::new(command),
        };
        tracing::info!(backend = backend.name(), model = %self.settings.model, "using backend");
        let client = EnrichmentClient::new(
            backend,
            self.schema,
            self.settings,
            self.retry,
            self.strict,
            stop,
        );
        (client, self.pass, source)
    }
}

/// Upper bound for `--delay` and `--retry-delay`.
const MAX_FLAG_SECONDS: f64 = 3600.0;

fn seconds(flag: &str, value: f64) -> Result<Duration> {
    if value > MAX_FLAG_SECONDS {
        return Err(anyhow!(
            "{flag} must be at most {MAX_FLAG_SECONDS} seconds, got {value}"
        ));
    }
    Duration::try_from_secs_f64(value)
        .with_context(|| format!("{flag} must be a non-negative number of seconds, got {value}"))
}

/// A command backend wins over HTTP; HTTP requires an API key.
fn resolve_backend(args: &EnrichArgs, api_key: Option<String>) -> Result<BackendConfig> {
    if let Some(command) = args.lm_command.as_deref().filter(|cmd| !cmd.trim().is_empty()) {
        return Ok(BackendConfig::Command(CommandBackend::new(command)?));
    }
    let api_key = api_key
        .filter(|key| !key.trim().is_empty())
        .ok_or_else(|| {
            anyhow!("{API_KEY_ENV} is not set; export it or pass --lm-command to use a local command")
        })?;
    if args.timeout == 0 {
        return Err(anyhow!("--timeout must be at least 1 second"));
    }
    Ok(BackendConfig::Http {
        api_base: args
            .api_base
            .clone()
            .unwrap_or_else(|| DEFAULT_API_BASE.to_string()),
        api_key,
        timeout: Duration::from_secs(args.timeout),
    })
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;

//! CLI argument parsing for the enrichment pass.
//!
//! Flags map one-to-one onto [`crate::config::PipelineConfig`]; validation that
//! needs the filesystem or the environment happens there, not here.
use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Catalog processed when `--input` is not given.
pub const DEFAULT_INPUT: &str = "Arumiyomis_1001_Books_v7.csv";

pub const DEFAULT_MODEL: &str = "gpt-4o";

pub const DEFAULT_LOG_FILE: &str = "logs/book_updater.log";

/// Root CLI entrypoint.
#[derive(Parser, Debug)]
#[command(
    name = "bookmeta",
    version,
    about = "Enrich a book catalog CSV with LM-derived metadata",
    after_help = "Commands:\n  enrich --input <csv>   Enrich every row from --start onward, in place\n  schema                 Print the built-in field schema as JSON\n\nThe input file is rewritten through temp_<name> and only replaced when the\npass completes. Do not run two passes against the same file at once.\n\nExamples:\n  bookmeta enrich --input books.csv --backup\n  bookmeta enrich --input books.csv --start 120 --verbose\n  bookmeta schema > schema.json\n  bookmeta enrich --input books.csv --schema schema.json --strict",
    subcommand_required = true,
    arg_required_else_help = true
)]
pub struct RootArgs {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Enrich catalog rows in place through a staging file
    Enrich(EnrichArgs),
    /// Print the built-in field schema as JSON
    Schema(SchemaArgs),
}

/// Enrichment pass inputs.
#[derive(Parser, Debug, Clone)]
#[command(about = "Enrich catalog rows in place")]
pub struct EnrichArgs {
    /// Catalog CSV (title,author,...) rewritten in place
    #[arg(short, long, value_name = "PATH", default_value = DEFAULT_INPUT)]
    pub input: PathBuf,

    /// Model identifier sent with each request
    #[arg(short, long, default_value = DEFAULT_MODEL)]
    pub model: String,

    /// First row (1-based) to enrich; earlier rows are copied unchanged
    #[arg(short, long, value_name = "ROW", default_value_t = 1)]
    pub start: usize,

    /// Seconds to pause after each row
    #[arg(short, long, value_name = "SECS", default_value_t = 0.5)]
    pub delay: f64,

    /// Copy the input to <input>.bak before the pass
    #[arg(short, long)]
    pub backup: bool,

    /// Input encoding label (skips detection)
    #[arg(short, long, value_name = "LABEL")]
    pub encoding: Option<String>,

    /// Log progress to the console
    #[arg(short, long)]
    pub verbose: bool,

    /// Field schema JSON (see `bookmeta schema`)
    #[arg(long, value_name = "PATH")]
    pub schema: Option<PathBuf>,

    /// Retry answers that do not match the schema's fields and vocabularies
    #[arg(long)]
    pub strict: bool,

    /// Retries after the first failed call
    #[arg(long, value_name = "N", default_value_t = 3)]
    pub max_retries: u32,

    /// Base backoff in seconds, doubled on each retry
    #[arg(long, value_name = "SECS", default_value_t = 2.0)]
    pub retry_delay: f64,

    /// Sampling temperature sent with each request
    #[arg(long, default_value_t = 0.3)]
    pub temperature: f32,

    /// Response length cap in tokens
    #[arg(long, value_name = "N", default_value_t = 150)]
    pub max_tokens: u32,

    /// HTTP request timeout in seconds
    #[arg(long, value_name = "SECS", default_value_t = 60)]
    pub timeout: u64,

    /// Chat-completions API base URL
    #[arg(long, value_name = "URL", env = "OPENAI_BASE_URL")]
    pub api_base: Option<String>,

    /// Local command answering prompts on stdin instead of the HTTP API
    #[arg(long, value_name = "CMD", env = "BOOKMETA_LM_COMMAND")]
    pub lm_command: Option<String>,

    /// Append logs to this file
    #[arg(long, value_name = "PATH", default_value = DEFAULT_LOG_FILE)]
    pub log_file: PathBuf,

    /// Do not pause after rows that were copied without a request
    #[arg(long)]
    pub skip_delay_for_copied: bool,
}

#[derive(Parser, Debug, Clone)]
#[command(about = "Print the built-in field schema as JSON")]
pub struct SchemaArgs {}

#[cfg(test)]
mod tests {
    use super::*;

    fn enrich_args(extra: &[&str]) -> EnrichArgs {
        let argv = ["bookmeta", "enrich"].iter().chain(extra);
        match RootArgs::try_parse_from(argv).expect("parse").command {
            Command::Enrich(args) => args,
            Command::Schema(_) => panic!("expected enrich"),
        }
    }

    #[test]
    fn defaults_match_documented_values() {
        let args = enrich_args(&["--lm-command", "cat"]);
        assert_eq!(args.input, PathBuf::from(DEFAULT_INPUT));
        assert_eq!(args.model, "gpt-4o");
        assert_eq!(args.start, 1);
        assert_eq!(args.delay, 0.5);
        assert_eq!(args.max_retries, 3);
        assert_eq!(args.retry_delay, 2.0);
        assert_eq!(args.max_tokens, 150);
        assert!(!args.backup);
        assert!(!args.strict);
    }

    #[test]
    fn short_flags_parse() {
        let args = enrich_args(&[
            "-i", "books.csv", "-m", "other", "-s", "7", "-d", "0", "-b", "-e", "latin1", "-v",
        ]);
        assert_eq!(args.input, PathBuf::from("books.csv"));
        assert_eq!(args.model, "other");
        assert_eq!(args.start, 7);
        assert_eq!(args.delay, 0.0);
        assert!(args.backup);
        assert_eq!(args.encoding.as_deref(), Some("latin1"));
        assert!(args.verbose);
    }

    #[test]
    fn every_flag_has_help_text() {
        use clap::CommandFactory;
        let root = RootArgs::command();
        for sub in root.get_subcommands() {
            assert!(sub.get_about().is_some(), "{} has no about", sub.get_name());
            for arg in sub.get_arguments() {
                let id = arg.get_id().as_str();
                if id == "help" {
                    continue;
                }
                assert!(arg.get_help().is_some(), "--{id} has no help");
            }
        }
    }

    #[test]
    fn a_subcommand_is_required() {
        assert!(RootArgs::try_parse_from(["bookmeta"]).is_err());
    }
}

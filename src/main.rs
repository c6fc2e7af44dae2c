use anyhow::Result;
use clap::Parser;

mod cli;
mod client;
mod config;
mod interrupt;
mod lm;
mod logging;
mod normalize;
mod pipeline;
mod schema;
mod source;
mod staging;

use cli::{Command, EnrichArgs, RootArgs};
use config::{PipelineConfig, API_KEY_ENV};
use interrupt::StopFlag;
use pipeline::{run_pass, PassOutcome};

fn main() -> Result<()> {
    let args = RootArgs::parse();
    match args.command {
        Command::Enrich(args) => cmd_enrich(&args),
        Command::Schema(_) => cmd_schema(),
    }
}

fn cmd_schema() -> Result<()> {
    println!("{}", schema::schema_stub()?);
    Ok(())
}

fn cmd_enrich(args: &EnrichArgs) -> Result<()> {
    logging::init(args.verbose, Some(&args.log_file));
    let config = PipelineConfig::from_args(args, std::env::var(API_KEY_ENV).ok())?;
    let stop = StopFlag::new();
    interrupt::install_handlers(&stop)?;

    let (client, options, source) = config.into_parts(stop.clone());
    match run_pass(&source, &client, &options, &stop)? {
        PassOutcome::Completed { summary, output } => {
            println!(
                "Updated {}: {} rows written ({} enriched, {} fallback, {} copied, {} malformed).",
                output.display(),
                summary.rows_written,
                summary.enriched,
                summary.fallbacks,
                summary.skipped,
                summary.passed_through
            );
        }
        PassOutcome::Interrupted { summary, staging } => {
            eprintln!(
                "Interrupted after {} rows; {} was not modified. Partial output left in {}.",
                summary.rows_written,
                source.path().display(),
                staging.display()
            );
            eprintln!("Resume with --start {}.", summary.rows_written + 1);
        }
    }
    Ok(())
}

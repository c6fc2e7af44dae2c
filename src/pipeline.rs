//! The row-by-row enrichment pass.
//!
//! Each row is classified once: rows before the resume offset and rows
//! without a title/author pair are copied unchanged; every other row goes
//! through the client and the normalizer. The pass ends when the source is
//! exhausted (promote), when the stop flag is raised (keep staging), or on an
//! I/O error (keep staging, propagate).
use crate::client::{EnrichmentClient, Outcome};
use crate::interrupt::StopFlag;
use crate::normalize::{normalize, segments};
use crate::source::{RawRow, RecordSource};
use crate::staging::{snapshot_backup, CommitSink, StagingPaths};
use anyhow::Result;
use std::path::PathBuf;
use std::time::Duration;

/// How a row is handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowClass {
    /// Before the resume offset; copied unchanged.
    Skipping,
    /// Enriched through the client.
    Processing,
    /// Fewer than two fields; copied unchanged.
    PassThrough,
}

/// Classify a row against a 1-based inclusive resume offset.
pub fn classify(row: &RawRow, start_row: usize) -> RowClass {
    if row.number < start_row {
        RowClass::Skipping
    } else if row.fields.len() >= 2 {
        RowClass::Processing
    } else {
        RowClass::PassThrough
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PassOptions {
    /// First row (1-based) sent for enrichment.
    pub start_row: usize,
    /// Pause after each row.
    pub delay: Duration,
    pub backup: bool,
    /// Skip the pause after rows that did not call the service.
    pub skip_delay_for_copied: bool,
}

impl Default for PassOptions {
    fn default() -> Self {
        Self {
            start_row: 1,
            delay: Duration::from_millis(500),
            backup: false,
            skip_delay_for_copied: false,
        }
    }
}

/// Row counts for one pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PassSummary {
    /// Pre-scan estimate used for progress logging.
    pub total_rows: usize,
    pub skipped: usize,
    pub enriched: usize,
    pub fallbacks: usize,
    pub passed_through: usize,
    pub rows_written: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PassOutcome {
    /// The canonical file now holds the pass output.
    Completed { summary: PassSummary, output: PathBuf },
    /// Stopped early; the canonical file is untouched.
    Interrupted {
        summary: PassSummary,
        staging: PathBuf,
    },
}

/// Run one pass over `source`, writing through a staging file.
pub fn run_pass(
    source: &RecordSource,
    client: &EnrichmentClient,
    options: &PassOptions,
    stop: &StopFlag,
) -> Result<PassOutcome> {
    let paths = StagingPaths::for_canonical(source.path())?;
    let resolved = source.encoding();
    tracing::info!(
        encoding = resolved.encoding.name(),
        source = %resolved.source,
        confidence = resolved.confidence.map(f64::from),
        "using input encoding"
    );

    let mut summary = PassSummary {
        total_rows: source.row_total(),
        ..PassSummary::default()
    };
    tracing::info!(
        total = summary.total_rows,
        start_row = options.start_row,
        fields = client.schema().arity(),
        "found books to process"
    );
    if options.start_row > summary.total_rows + 1 {
        tracing::warn!(
            start_row = options.start_row,
            total = summary.total_rows,
            "start row is past the end of the file; every row will be copied"
        );
    }

    if options.backup {
        let backup = snapshot_backup(&paths)?;
        tracing::info!(backup = %backup.display(), "created backup");
    }

    let rows = source.rows()?;
    let mut sink = CommitSink::create(paths)?;
    let staging = sink.staging_path().to_path_buf();

    match drive(rows, &mut sink, client, options, stop, &mut summary) {
        Ok(Flow::Done) => {
            summary.rows_written = sink.rows_written();
            let output = sink.promote()?;
            tracing::info!(
                output = %output.display(),
                enriched = summary.enriched,
                fallbacks = summary.fallbacks,
                skipped = summary.skipped,
                passed_through = summary.passed_through,
                "successfully updated all books"
            );
            Ok(PassOutcome::Completed { summary, output })
        }
        Ok(Flow::Stopped) => {
            summary.rows_written = sink.rows_written();
            let staging = sink.abandon()?;
            tracing::warn!(
                staging = %staging.display(),
                rows_written = summary.rows_written,
                "pass interrupted; staging file kept and not promoted"
            );
            Ok(PassOutcome::Interrupted { summary, staging })
        }
        Err(err) => {
            drop(sink);
            tracing::error!(
                staging = %staging.display(),
                error = %format!("{err:#}"),
                "pass failed; staging file was not deleted"
            );
            Err(err)
        }
    }
}

enum Flow {
    Done,
    Stopped,
}

fn drive(
    rows: impl Iterator<Item = Result<RawRow>>,
    sink: &mut CommitSink,
    client: &EnrichmentClient,
    options: &PassOptions,
    stop: &StopFlag,
    summary: &mut PassSummary,
) -> Result<Flow> {
    for row in rows {
        if stop.is_set() {
            return Ok(Flow::Stopped);
        }
        let row = row?;
        let class = classify(&row, options.start_row);
        match (class, row.record()) {
            (RowClass::Skipping, _) => {
                sink.write_row(&row.fields)?;
                summary.skipped += 1;
            }
            (RowClass::Processing, Some(record)) => {
                tracing::info!(
                    row = row.number,
                    total = summary.total_rows,
                    title = %record.title,
                    author = %record.author,
                    "processing book"
                );
                let enrichment = client.enrich(&record);
                if stop.is_set() {
                    return Ok(Flow::Stopped);
                }
                let mut fields = vec![record.title, record.author];
                fields.extend(segments(&normalize(&enrichment.text)));
                tracing::info!(
                    row = row.number,
                    attempts = enrichment.attempts,
                    output = %fields.join(","),
                    "updated"
                );
                sink.write_row(&fields)?;
                match enrichment.outcome {
                    Outcome::Answered => summary.enriched += 1,
                    Outcome::Fallback => summary.fallbacks += 1,
                }
            }
            (RowClass::PassThrough, _) | (RowClass::Processing, None) => {
                tracing::warn!(
                    row = row.number,
                    fields = ?row.fields,
                    "row has insufficient data; copying unchanged"
                );
                sink.write_row(&row.fields)?;
                summary.passed_through += 1;
            }
        }

        let pace = class == RowClass::Processing || !options.skip_delay_for_copied;
        if pace && !options.delay.is_zero() && !stop.sleep(options.delay) {
            return Ok(Flow::Stopped);
        }
    }
    Ok(Flow::Done)
}

#[cfg(test)]
#[path = "pipeline_tests.rs"]
mod tests;

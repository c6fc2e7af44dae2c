//! Streaming access to the input catalog.
//!
//! One row per decoded line, split on commas only. Quote characters are
//! ordinary content and blank lines are rows with a single empty field, so a
//! row copied through unchanged is written back exactly as it was decoded.
pub mod encoding;

use anyhow::{Context, Result};
use encoding::{DecodingReader, ResolvedEncoding};
use std::fs::File;
use std::io::{BufRead, BufReader, Lines};
use std::path::{Path, PathBuf};

/// Row total reported when the pre-scan cannot read the file.
pub const FALLBACK_ROW_TOTAL: usize = 1318;

/// One input row with its 1-based position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawRow {
    pub number: usize,
    pub fields: Vec<String>,
}

/// The title/author pair sent for enrichment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub title: String,
    pub author: String,
}

impl RawRow {
    /// Extract the record, or `None` when the row has fewer than two fields.
    pub fn record(&self) -> Option<Record> {
        match self.fields.as_slice() {
            [title, author, ..] => Some(Record {
                title: title.trim().to_string(),
                author: author.trim().to_string(),
            }),
            _ => None,
        }
    }
}

/// A restartable view of the input file in a fixed encoding.
#[derive(Debug, Clone)]
pub struct RecordSource {
    path: PathBuf,
    encoding: ResolvedEncoding,
}

type DecodedLines = Lines<BufReader<DecodingReader<BufReader<File>>>>;

/// Iterator over decoded rows in file order.
pub struct Rows {
    path: PathBuf,
    lines: DecodedLines,
    next_number: usize,
}

impl RecordSource {
    pub fn new(path: &Path, encoding: ResolvedEncoding) -> Self {
        Self {
            path: path.to_path_buf(),
            encoding,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn encoding(&self) -> ResolvedEncoding {
        self.encoding
    }

    /// Open the file and iterate its rows from the start.
    pub fn rows(&self) -> Result<Rows> {
        let file =
            File::open(&self.path).with_context(|| format!("open {}", self.path.display()))?;
        let decoded = DecodingReader::for_resolved(BufReader::new(file), &self.encoding);
        Ok(Rows {
            path: self.path.clone(),
            lines: BufReader::new(decoded).lines(),
            next_number: 1,
        })
    }

    /// Count rows by scanning line terminators.
    pub fn count_rows(&self) -> Result<usize> {
        let file =
            File::open(&self.path).with_context(|| format!("open {}", self.path.display()))?;
        count_lines(BufReader::new(file)).with_context(|| format!("scan {}", self.path.display()))
    }

    /// Row total for progress logging; never fails.
    pub fn row_total(&self) -> usize {
        match self.count_rows() {
            Ok(total) => total,
            Err(err) => {
                tracing::warn!(
                    error = %format!("{err:#}"),
                    fallback = FALLBACK_ROW_TOTAL,
                    "row count failed; using fallback total"
                );
                FALLBACK_ROW_TOTAL
            }
        }
    }
}

fn count_lines<R: BufRead>(mut reader: R) -> std::io::Result<usize> {
    let mut count = 0usize;
    let mut last = None;
    loop {
        let buf = reader.fill_buf()?;
        if buf.is_empty() {
            break;
        }
        count += buf.iter().filter(|byte| **byte == b'\n').count();
        last = buf.last().copied();
        let consumed = buf.len();
        reader.consume(consumed);
    }
    if matches!(last, Some(byte) if byte != b'\n') {
        count += 1;
    }
    Ok(count)
}

impl Iterator for Rows {
    type Item = Result<RawRow>;

    fn next(&mut self) -> Option<Self::Item> {
        let number = self.next_number;
        let line = self.lines.next()?;
        self.next_number += 1;
        Some(
            line.with_context(|| format!("read row {number} of {}", self.path.display()))
                .map(|line| RawRow {
                    number,
                    fields: line.split(',').map(str::to_string).collect(),
                }),
        )
    }
}

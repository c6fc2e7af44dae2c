//! Staged output with atomic promotion.
//!
//! Rows are streamed into `temp_<name>` beside the canonical file. Only a
//! completed pass renames it over the canonical path; failed or interrupted
//! passes leave the staging file on disk for inspection.
use anyhow::{anyhow, Context, Result};
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

/// Locations derived from the canonical catalog path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagingPaths {
    canonical: PathBuf,
    staging: PathBuf,
    backup: PathBuf,
}

impl StagingPaths {
    pub fn for_canonical(canonical: &Path) -> Result<Self> {
        let file_name = canonical
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| anyhow!("input path {} has no file name", canonical.display()))?;
        let parent = canonical.parent().unwrap_or_else(|| Path::new(""));
        Ok(Self {
            canonical: canonical.to_path_buf(),
            staging: parent.join(format!("temp_{file_name}")),
            backup: parent.join(format!("{file_name}.bak")),
        })
    }

    pub fn canonical(&self) -> &Path {
        &self.canonical
    }

    pub fn staging(&self) -> &Path {
        &self.staging
    }

    pub fn backup(&self) -> &Path {
        &self.backup
    }
}

/// Copy the canonical file to its `.bak` sibling, replacing an older backup.
pub fn snapshot_backup(paths: &StagingPaths) -> Result<PathBuf> {
    fs::copy(paths.canonical(), paths.backup()).with_context(|| {
        format!(
            "backup {} -> {}",
            paths.canonical().display(),
            paths.backup().display()
        )
    })?;
    Ok(paths.backup.clone())
}

/// Writer for one pass's staging file.
pub struct CommitSink {
    paths: StagingPaths,
    writer: csv::Writer<BufWriter<File>>,
    rows_written: usize,
}

impl CommitSink {
    /// Create (or truncate) the staging file.
    pub fn create(paths: StagingPaths) -> Result<Self> {
        let file = File::create(paths.staging())
            .with_context(|| format!("create {}", paths.staging().display()))?;
        let writer = csv::WriterBuilder::new()
            .has_headers(false)
            .flexible(true)
            .quote_style(csv::QuoteStyle::Never)
            .terminator(csv::Terminator::Any(b'\n'))
            .from_writer(BufWriter::new(file));
        Ok(Self {
            paths,
            writer,
            rows_written: 0,
        })
    }

    pub fn write_row<I, T>(&mut self, fields: I) -> Result<()>
    where
        I: IntoIterator<Item = T>,
        T: AsRef<[u8]>,
    {
        self.writer
            .write_record(fields)
            .with_context(|| format!("write {}", self.paths.staging().display()))?;
        self.rows_written += 1;
        Ok(())
    }

    pub fn rows_written(&self) -> usize {
        self.rows_written
    }

    pub fn staging_path(&self) -> &Path {
        self.paths.staging()
    }

    fn flush(&mut self) -> Result<()> {
        let staging = self.paths.staging().display().to_string();
        self.writer
            .flush()
            .with_context(|| format!("flush {staging}"))?;
        self.writer
            .get_ref()
            .get_ref()
            .sync_all()
            .with_context(|| format!("sync {staging}"))?;
        Ok(())
    }

    /// Flush and keep the staging file without touching the canonical file.
    pub fn abandon(mut self) -> Result<PathBuf> {
        self.flush()?;
        Ok(self.paths.staging.clone())
    }

    /// Replace the canonical file with the staging file.
    pub fn promote(mut self) -> Result<PathBuf> {
        self.flush()?;
        let CommitSink { paths, writer, .. } = self;
        drop(writer);
        fs::rename(paths.staging(), paths.canonical()).with_context(|| {
            format!(
                "rename {} -> {}",
                paths.staging().display(),
                paths.canonical().display()
            )
        })?;
        Ok(paths.canonical)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup(contents: &str) -> (tempfile::TempDir, StagingPaths) {
        let dir = tempfile::tempdir().expect("create temp dir");
        let canonical = dir.path().join("books.csv");
        fs::write(&canonical, contents).expect("write canonical");
        let paths = StagingPaths::for_canonical(&canonical).expect("paths");
        (dir, paths)
    }

    #[test]
    fn derives_sibling_paths() {
        let paths = StagingPaths::for_canonical(Path::new("data/books.csv")).expect("paths");
        assert_eq!(paths.staging(), Path::new("data/temp_books.csv"));
        assert_eq!(paths.backup(), Path::new("data/books.csv.bak"));
        let bare = StagingPaths::for_canonical(Path::new("books.csv")).expect("paths");
        assert_eq!(bare.staging(), Path::new("temp_books.csv"));
    }

    #[test]
    fn rejects_paths_without_file_name() {
        assert!(StagingPaths::for_canonical(Path::new("/")).is_err());
    }

    #[test]
    fn promote_replaces_canonical_atomically() {
        let (_dir, paths) = setup("old\n");
        let mut sink = CommitSink::create(paths.clone()).expect("create sink");
        sink.write_row(["1984", "George Orwell", "1949"]).expect("write");
        sink.write_row(["OnlyOneField"]).expect("write");
        assert_eq!(fs::read_to_string(paths.canonical()).expect("read"), "old\n");
        sink.promote().expect("promote");
        assert_eq!(
            fs::read_to_string(paths.canonical()).expect("read"),
            "1984,George Orwell,1949\nOnlyOneField\n"
        );
        assert!(!paths.staging().exists());
    }

    #[test]
    fn fields_are_written_without_quoting() {
        let (_dir, paths) = setup("");
        let mut sink = CommitSink::create(paths.clone()).expect("create sink");
        sink.write_row(["\"Orwell", " George\"", "1984"]).expect("write");
        sink.promote().expect("promote");
        assert_eq!(
            fs::read_to_string(paths.canonical()).expect("read"),
            "\"Orwell, George\",1984\n"
        );
    }

    #[test]
    fn single_empty_field_is_a_blank_line() {
        let (_dir, paths) = setup("");
        let mut sink = CommitSink::create(paths.clone()).expect("create sink");
        sink.write_row(["a", "b"]).expect("write");
        sink.write_row([""]).expect("write");
        sink.write_row(["c"]).expect("write");
        sink.promote().expect("promote");
        assert_eq!(
            fs::read_to_string(paths.canonical()).expect("read"),
            "a,b\n\nc\n"
        );
    }

    #[test]
    fn abandon_keeps_staging_and_canonical() {
        let (_dir, paths) = setup("old\n");
        let mut sink = CommitSink::create(paths.clone()).expect("create sink");
        sink.write_row(["partial", "row"]).expect("write");
        assert_eq!(sink.rows_written(), 1);
        let staging = sink.abandon().expect("abandon");
        assert_eq!(fs::read_to_string(&staging).expect("read"), "partial,row\n");
        assert_eq!(fs::read_to_string(paths.canonical()).expect("read"), "old\n");
    }

    #[test]
    fn staging_is_truncated_on_create() {
        let (_dir, paths) = setup("old\n");
        fs::write(paths.staging(), "stale,row\nstale,row\n").expect("write stale");
        let mut sink = CommitSink::create(paths.clone()).expect("create sink");
        sink.write_row(["fresh", "row"]).expect("write");
        sink.abandon().expect("abandon");
        assert_eq!(fs::read_to_string(paths.staging()).expect("read"), "fresh,row\n");
    }

    #[test]
    fn backup_snapshots_canonical() {
        let (_dir, paths) = setup("original,content\n");
        fs::write(paths.backup(), "older backup\n").expect("write old backup");
        snapshot_backup(&paths).expect("backup");
        assert_eq!(
            fs::read_to_string(paths.backup()).expect("read"),
            "original,content\n"
        );
    }
}

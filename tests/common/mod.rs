//! Shared test infrastructure for integration tests.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use tempfile::TempDir;

/// A catalog file in a scratch directory plus canned LM answers.
pub struct Catalog {
    pub dir: TempDir,
    pub input: PathBuf,
    responses: PathBuf,
    queries: PathBuf,
}

fn manifest_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
}

impl Catalog {
    pub fn new(contents: &[u8]) -> Self {
        let dir = TempDir::new().expect("create temp dir");
        let input = dir.path().join("books.csv");
        fs::write(&input, contents).expect("write catalog");
        let responses = dir.path().join("responses.tsv");
        fs::write(&responses, "").expect("write responses");
        let queries = dir.path().join("queries.log");
        Self {
            dir,
            input,
            responses,
            queries,
        }
    }

    /// Answer `query` (the `title,author` line) with `answer`.
    pub fn respond(&self, query: &str, answer: &str) -> &Self {
        let mut table = fs::read_to_string(&self.responses).expect("read responses");
        table.push_str(&format!("{query}\t{answer}\n"));
        fs::write(&self.responses, table).expect("write responses");
        self
    }

    pub fn lm_command(&self) -> String {
        let script = manifest_dir().join("tests/mock-lm.sh");
        shell_words::join([
            "sh".to_string(),
            script.display().to_string(),
            self.responses.display().to_string(),
        ])
    }

    /// Bare `bookmeta` invocation with a scrubbed environment.
    pub fn command(&self) -> Command {
        let mut command = Command::new(env!("CARGO_BIN_EXE_bookmeta"));
        command
            .current_dir(self.dir.path())
            .env_remove("OPENAI_API_KEY")
            .env_remove("OPENAI_BASE_URL")
            .env_remove("BOOKMETA_LM_COMMAND")
            .env_remove("RUST_LOG")
            .env("MOCK_LM_LOG", &self.queries);
        command
    }

    /// Run `bookmeta enrich` against the mock LM with no pacing or backoff.
    pub fn enrich(&self, extra: &[&str]) -> Output {
        self.command()
            .arg("enrich")
            .arg("--input")
            .arg(&self.input)
            .args(["--delay", "0", "--retry-delay", "0"])
            .arg("--log-file")
            .arg(self.path("run.log"))
            .arg("--lm-command")
            .arg(self.lm_command())
            .args(extra)
            .output()
            .expect("run bookmeta")
    }

    pub fn path(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    pub fn contents(&self) -> String {
        read(&self.input)
    }

    /// Queries the mock LM received, in order.
    pub fn queries(&self) -> Vec<String> {
        if !self.queries.exists() {
            return Vec::new();
        }
        read(&self.queries).lines().map(str::to_string).collect()
    }
}

pub fn read(path: &Path) -> String {
    fs::read_to_string(path).unwrap_or_else(|err| panic!("read {}: {err}", path.display()))
}

/// Panic with both streams when `output` did not succeed.
pub fn assert_success(output: &Output) {
    assert!(
        output.status.success(),
        "bookmeta failed ({}):\nstdout:\n{}\nstderr:\n{}",
        output.status,
        String::from_utf8_lossy(&output.stdout),
        String::from_utf8_lossy(&output.stderr)
    );
}

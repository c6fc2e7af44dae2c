use super::*;
use crate::cli::{Command, RootArgs};
use crate::schema::schema_stub;
use clap::Parser;
use std::fs;

fn args(extra: &[&str]) -> EnrichArgs {
    let argv = ["bookmeta", "enrich", "--api-base", DEFAULT_API_BASE]
        .iter()
        .chain(extra);
    match RootArgs::try_parse_from(argv).expect("parse").command {
        Command::Enrich(args) => args,
        Command::Schema(_) => panic!("expected enrich"),
    }
}

fn error_text(result: Result<PipelineConfig>) -> String {
    format!("{:#}", result.expect_err("config should fail"))
}

#[test]
fn http_backend_requires_api_key() {
    let mut parsed = args(&[]);
    parsed.lm_command = None;
    let text = error_text(PipelineConfig::from_args(&parsed, None));
    assert!(text.contains("OPENAI_API_KEY"), "{text}");

    let text = error_text(PipelineConfig::from_args(&parsed, Some("  ".to_string())));
    assert!(text.contains("OPENAI_API_KEY"), "{text}");
}

#[test]
fn http_backend_uses_key_and_timeout() {
    let mut parsed = args(&["--timeout", "5"]);
    parsed.lm_command = None;
    let config = PipelineConfig::from_args(&parsed, Some("sk-test".to_string())).expect("config");
    match &config.backend {
        BackendConfig::Http {
            api_base,
            api_key,
            timeout,
        } => {
            assert_eq!(api_base, DEFAULT_API_BASE);
            assert_eq!(api_key, "sk-test");
            assert_eq!(*timeout, Duration::from_secs(5));
        }
        BackendConfig::Command(_) => panic!("expected http backend"),
    }
    assert!(!format!("{config:?}").contains("sk-test"));
}

#[cfg(unix)]
#[test]
fn command_backend_needs_no_api_key() {
    let parsed = args(&["--lm-command", "sh -c 'echo 1949'"]);
    let config = PipelineConfig::from_args(&parsed, None).expect("config");
    assert!(matches!(config.backend, BackendConfig::Command(_)));
}

#[test]
fn unknown_command_is_fatal() {
    let parsed = args(&["--lm-command", "bookmeta-no-such-program-xyz"]);
    let text = error_text(PipelineConfig::from_args(&parsed, Some("key".to_string())));
    assert!(text.contains("bookmeta-no-such-program-xyz"), "{text}");
}

#[test]
fn rejects_invalid_numbers() {
    let cases: [&[&str]; 7] = [
        &["--delay=-1"],
        &["--delay", "NaN"],
        &["--delay", "1e19"],
        &["--retry-delay=-0.5"],
        &["--retry-delay", "1e10"],
        &["--start", "0"],
        &["--max-tokens", "0"],
    ];
    for extra in cases {
        let mut parsed = args(extra);
        parsed.lm_command = None;
        assert!(
            PipelineConfig::from_args(&parsed, Some("key".to_string())).is_err(),
            "{extra:?} should be rejected"
        );
    }
}

#[test]
fn unknown_encoding_label_is_fatal() {
    let mut parsed = args(&["--encoding", "not-a-charset"]);
    parsed.lm_command = None;
    let text = error_text(PipelineConfig::from_args(&parsed, Some("key".to_string())));
    assert!(text.contains("not-a-charset"), "{text}");
}

#[test]
fn maps_flags_onto_pass_and_retry_settings() {
    let mut parsed = args(&[
        "--start",
        "12",
        "--delay",
        "0.25",
        "--backup",
        "--retry-delay",
        "1.5",
        "--max-retries",
        "5",
        "--strict",
        "--skip-delay-for-copied",
        "--encoding",
        "latin1",
    ]);
    parsed.lm_command = None;
    let config = PipelineConfig::from_args(&parsed, Some("key".to_string())).expect("config");
    assert_eq!(config.pass.start_row, 12);
    assert_eq!(config.pass.delay, Duration::from_millis(250));
    assert!(config.pass.backup);
    assert!(config.pass.skip_delay_for_copied);
    assert_eq!(config.retry.max_retries, 5);
    assert_eq!(config.retry.base_delay, Duration::from_millis(1500));
    assert!(config.strict);
    assert_eq!(config.encoding.encoding, encoding_rs::WINDOWS_1252);
    assert_eq!(config.schema, default_schema());
}

#[test]
fn loads_schema_file() {
    let dir = tempfile::tempdir().expect("create temp dir");
    let mut schema: FieldSchema =
        serde_json::from_str(&schema_stub().expect("stub")).expect("parse stub");
    schema.fields.truncate(2);
    let path = dir.path().join("schema.json");
    fs::write(&path, serde_json::to_string(&schema).expect("serialize")).expect("write schema");

    let mut parsed = args(&["--schema", path.to_str().expect("utf-8 path")]);
    parsed.lm_command = None;
    let config = PipelineConfig::from_args(&parsed, Some("key".to_string())).expect("config");
    assert_eq!(config.schema.arity(), 2);
}

#[test]
fn invalid_schema_file_is_fatal() {
    let dir = tempfile::tempdir().expect("create temp dir");
    let path = dir.path().join("schema.json");
    fs::write(&path, r#"{"schema_version": 1, "fields": []}"#).expect("write schema");

    let mut parsed = args(&["--schema", path.to_str().expect("utf-8 path")]);
    parsed.lm_command = None;
    assert!(PipelineConfig::from_args(&parsed, Some("key".to_string())).is_err());
}

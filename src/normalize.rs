//! Normalization of free-text enrichment answers.
//!
//! The lenient path is a character filter, not a parser: a comma inside a
//! value becomes a field separator and punctuation is dropped. Shape checks
//! against the schema are opt-in through [`validate`].
use crate::schema::FieldSchema;
use regex::Regex;
use std::fmt;
use std::sync::OnceLock;

fn disallowed_chars() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"[^A-Za-z0-9 ]").expect("valid field filter regex"))
}

/// Reduce a raw answer to comma-separated `[A-Za-z0-9 ]` segments.
///
/// Only the first non-empty line is kept. The segment count of that line is
/// preserved; no arity check happens here.
pub fn normalize(raw: &str) -> String {
    let line = raw
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .unwrap_or("");
    let unbracketed = line.replace(|ch: char| ch == '[' || ch == ']', "");
    unbracketed
        .split(',')
        .map(|segment| disallowed_chars().replace_all(segment, "").into_owned())
        .collect::<Vec<_>>()
        .join(",")
}

/// Split a normalized answer into its segments.
pub fn segments(normalized: &str) -> Vec<String> {
    normalized.split(',').map(str::to_string).collect()
}

/// A normalized answer that does not fit the schema.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShapeError {
    ArityMismatch { expected: usize, found: usize },
    NotInVocabulary { field: String, value: String },
}

impl fmt::Display for ShapeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ArityMismatch { expected, found } => {
                write!(f, "expected {expected} fields, found {found}")
            }
            Self::NotInVocabulary { field, value } => {
                write!(f, "{value:?} is not an allowed {field}")
            }
        }
    }
}

impl std::error::Error for ShapeError {}

/// Check a normalized answer against the schema and canonicalize it.
///
/// Categorical values are rewritten to their vocabulary spelling and free
/// values are trimmed, so the result is stable under repeated validation.
pub fn validate(normalized: &str, schema: &FieldSchema) -> Result<String, ShapeError> {
    let parts: Vec<&str> = normalized.split(',').collect();
    if parts.len() != schema.arity() {
        return Err(ShapeError::ArityMismatch {
            expected: schema.arity(),
            found: parts.len(),
        });
    }
    let mut canonical = Vec::with_capacity(parts.len());
    for (field, value) in schema.fields.iter().zip(parts) {
        match field.canonical(value) {
            Some(resolved) => canonical.push(resolved.to_string()),
            None => {
                return Err(ShapeError::NotInVocabulary {
                    field: field.name.clone(),
                    value: value.trim().to_string(),
                })
            }
        }
    }
    Ok(canonical.join(","))
}

#[cfg(test)]
#[path = "normalize_tests.rs"]
mod tests;

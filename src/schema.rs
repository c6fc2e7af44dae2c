//! Field schema for enrichment answers.
//!
//! The schema fixes the arity of every enriched row, the order of the fields,
//! the controlled vocabularies for categorical fields, and the fallback values
//! written when no usable answer can be obtained.
use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Current schema version for `--schema` files.
pub const SCHEMA_VERSION: u32 = 1;

/// Fallback used by fields that do not declare one.
pub const UNKNOWN: &str = "Unknown";

const LITERARY_FORMS: &[&str] = &[
    "Allegory",
    "Autobiography",
    "Biography",
    "Epic",
    "Essay",
    "Fable",
    "Fairy tale",
    "Frame story",
    "Graphic novel",
    "Memoir",
    "Novel",
    "Novella",
    "Philosophical dialogue",
    "Play",
    "Poem",
    "Prose Poetry",
    "Satire",
    "Short Story",
    "Treatise",
];

const READING_LEVELS: &[&str] = &[
    "Early Elementary",
    "Upper Elementary",
    "Middle School",
    "High School",
    "College or Adult General",
    "College or Adult Advanced",
    "Academic or Scholarly",
];

/// Ordered description of the metadata appended to each enriched row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FieldSchema {
    pub schema_version: u32,
    pub fields: Vec<FieldSpec>,
}

/// A single enriched column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FieldSpec {
    /// Column label shown to the model in the response format line.
    pub name: String,
    /// Allowed values; empty means free text.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub vocabulary: Vec<String>,
    /// Value written when enrichment fails.
    #[serde(default = "default_fallback")]
    pub fallback: String,
    /// Sample value used in the prompt's example line.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub example: Option<String>,
}

fn default_fallback() -> String {
    UNKNOWN.to_string()
}

impl FieldSpec {
    fn free(name: &str, example: &str) -> Self {
        Self {
            name: name.to_string(),
            vocabulary: Vec::new(),
            fallback: UNKNOWN.to_string(),
            example: Some(example.to_string()),
        }
    }

    fn categorical(name: &str, vocabulary: &[&str], fallback: &str, example: &str) -> Self {
        Self {
            name: name.to_string(),
            vocabulary: vocabulary.iter().map(|value| value.to_string()).collect(),
            fallback: fallback.to_string(),
            example: Some(example.to_string()),
        }
    }

    /// Whether this field is restricted to a controlled vocabulary.
    pub fn is_categorical(&self) -> bool {
        !self.vocabulary.is_empty()
    }

    /// Resolve a value to its canonical vocabulary spelling.
    ///
    /// Matching ignores ASCII case and surrounding whitespace. The fallback
    /// value is always accepted. Free-text fields accept anything.
    pub fn canonical<'a>(&'a self, value: &'a str) -> Option<&'a str> {
        let trimmed = value.trim();
        if !self.is_categorical() {
            return Some(trimmed);
        }
        if trimmed.eq_ignore_ascii_case(&self.fallback) {
            return Some(self.fallback.as_str());
        }
        self.vocabulary
            .iter()
            .find(|entry| entry.eq_ignore_ascii_case(trimmed))
            .map(String::as_str)
    }
}

impl FieldSchema {
    /// Number of fields appended to an enriched row.
    pub fn arity(&self) -> usize {
        self.fields.len()
    }

    /// The sentinel row written when every attempt failed.
    pub fn fallback_row(&self) -> String {
        self.fields
            .iter()
            .map(|field| field.fallback.as_str())
            .collect::<Vec<_>>()
            .join(",")
    }

    /// Comma-joined field names, e.g. `Publication Date,Genre,...`.
    pub fn format_line(&self) -> String {
        self.fields
            .iter()
            .map(|field| field.name.as_str())
            .collect::<Vec<_>>()
            .join(",")
    }

    /// Comma-joined example values, falling back to each field's fallback.
    pub fn example_line(&self) -> String {
        self.fields
            .iter()
            .map(|field| field.example.as_deref().unwrap_or(&field.fallback))
            .collect::<Vec<_>>()
            .join(",")
    }
}

/// Build the schema used when no `--schema` file is given.
pub fn default_schema() -> FieldSchema {
    FieldSchema {
        schema_version: SCHEMA_VERSION,
        fields: vec![
            FieldSpec::free("Publication Date", "1925"),
            FieldSpec::free("Genre", "Fiction"),
            FieldSpec::categorical("Literary Form", LITERARY_FORMS, "Novel", "Novel"),
            FieldSpec::categorical(
                "Reading Level",
                READING_LEVELS,
                "College or Adult General",
                "College or Adult General",
            ),
            FieldSpec::free("Word Count", "95000"),
        ],
    }
}

/// Render the default schema as pretty JSON for editing.
pub fn schema_stub() -> Result<String> {
    serde_json::to_string_pretty(&default_schema()).context("serialize default schema")
}

/// Load a schema from a JSON file and validate it.
pub fn load_schema(path: &Path) -> Result<FieldSchema> {
    let bytes = fs::read(path).with_context(|| format!("read schema {}", path.display()))?;
    let schema: FieldSchema = serde_json::from_slice(&bytes)
        .with_context(|| format!("parse schema JSON {}", path.display()))?;
    validate_schema(&schema)?;
    Ok(schema)
}

/// Check that every value the pipeline may emit survives normalization.
pub fn validate_schema(schema: &FieldSchema) -> Result<()> {
    if schema.schema_version != SCHEMA_VERSION {
        return Err(anyhow!(
            "unsupported schema_version {}",
            schema.schema_version
        ));
    }
    if schema.fields.is_empty() {
        return Err(anyhow!("schema must declare at least one field"));
    }
    for field in &schema.fields {
        if field.name.trim().is_empty() {
            return Err(anyhow!("schema field names must be non-empty"));
        }
        if field.name.contains(',') {
            return Err(anyhow!("schema field name {:?} contains a comma", field.name));
        }
        check_permitted(&field.fallback, &field.name, "fallback")?;
        for value in &field.vocabulary {
            check_permitted(value, &field.name, "vocabulary entry")?;
        }
        if let Some(example) = &field.example {
            check_permitted(example, &field.name, "example")?;
        }
        if field.is_categorical()
            && !field.fallback.eq_ignore_ascii_case(UNKNOWN)
            && !field
                .vocabulary
                .iter()
                .any(|entry| entry.eq_ignore_ascii_case(&field.fallback))
        {
            return Err(anyhow!(
                "fallback {:?} for field {:?} is neither {UNKNOWN:?} nor a vocabulary entry",
                field.fallback,
                field.name
            ));
        }
    }
    Ok(())
}

/// Whether a character may appear in a normalized field.
pub fn is_permitted_char(ch: char) -> bool {
    ch.is_ascii_alphanumeric() || ch == ' '
}

fn check_permitted(value: &str, field: &str, label: &str) -> Result<()> {
    if value.is_empty() || !value.chars().all(is_permitted_char) {
        return Err(anyhow!(
            "{label} {value:?} for field {field:?} must be non-empty and use only letters, digits, and spaces"
        ));
    }
    Ok(())
}

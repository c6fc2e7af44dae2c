//! LM prompt assembly and completion backends.
//!
//! A backend turns one instruction plus one query into free text. The HTTP
//! backend speaks the OpenAI-compatible chat-completions protocol; the command
//! backend pipes a prompt document into a user-configured program, which lets
//! local models and test stubs stand in for the hosted service.
use crate::schema::FieldSchema;
use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::io::{ErrorKind, Write};
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

const SYSTEM_TEMPLATE: &str = include_str!(concat!(
    env!("CARGO_MANIFEST_DIR"),
    "/prompts/system.md"
));

/// Default OpenAI-compatible endpoint root.
pub const DEFAULT_API_BASE: &str = "https://api.openai.com/v1";

/// One enrichment call: a fixed instruction and a per-record query.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    pub model: String,
    pub system: String,
    pub user: String,
    pub temperature: f32,
    pub max_tokens: u32,
}

/// Transport to the text-generation service.
pub trait CompletionBackend {
    /// Short label used in log events.
    fn name(&self) -> &'static str;

    /// Send one request and return the trimmed answer text.
    fn complete(&self, request: &CompletionRequest) -> Result<String>;
}

/// Render the system instruction for a schema.
pub fn build_system_prompt(schema: &FieldSchema) -> String {
    let mut vocabularies = String::new();
    for field in schema.fields.iter().filter(|field| field.is_categorical()) {
        vocabularies.push_str(&format!(
            "\nFor {}, choose ONLY ONE of the following:\n{}\n",
            field.name,
            field.vocabulary.join(", ")
        ));
    }
    SYSTEM_TEMPLATE
        .replace("{format_line}", &schema.format_line())
        .replace("{example_line}", &schema.example_line())
        .replace("{vocabularies}", &vocabularies)
}

/// Render the per-record query.
pub fn build_user_prompt(title: &str, author: &str) -> String {
    format!("{title},{author}")
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 2],
    temperature: f32,
    max_tokens: u32,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: AssistantMessage,
}

#[derive(Deserialize)]
struct AssistantMessage {
    #[serde(default)]
    content: Option<String>,
}

/// Chat-completions client over `ureq`.
pub struct HttpBackend {
    agent: ureq::Agent,
    endpoint: String,
    api_key: String,
}

impl HttpBackend {
    pub fn new(api_base: &str, api_key: String, timeout: Duration) -> Self {
        let config = ureq::Agent::config_builder()
            .timeout_global(Some(timeout))
            .build();
        Self {
            agent: ureq::Agent::new_with_config(config),
            endpoint: format!("{}/chat/completions", api_base.trim_end_matches('/')),
            api_key,
        }
    }
}

impl CompletionBackend for HttpBackend {
    fn name(&self) -> &'static str {
        "http"
    }

    fn complete(&self, request: &CompletionRequest) -> Result<String> {
        let body = ChatRequest {
            model: &request.model,
            messages: [
                ChatMessage {
                    role: "system",
                    content: &request.system,
                },
                ChatMessage {
                    role: "user",
                    content: &request.user,
                },
            ],
            temperature: request.temperature,
            max_tokens: request.max_tokens,
        };
        let start = Instant::now();
        let mut response = self
            .agent
            .post(&self.endpoint)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .send_json(&body)
            .with_context(|| format!("POST {}", self.endpoint))?;
        let parsed: ChatResponse = response
            .body_mut()
            .read_json()
            .context("parse chat completion JSON")?;
        tracing::debug!(
            elapsed_ms = start.elapsed().as_millis() as u64,
            model = %request.model,
            "chat completion returned"
        );
        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .map(|content| content.trim().to_string())
            .unwrap_or_default();
        if content.is_empty() {
            return Err(anyhow!("chat completion returned no content"));
        }
        Ok(content)
    }
}

/// Local command that reads a prompt on stdin and answers on stdout.
#[derive(Debug, Clone)]
pub struct CommandBackend {
    program: PathBuf,
    args: Vec<String>,
}

impl CommandBackend {
    /// Parse a shell-style command line and resolve its program on `PATH`.
    pub fn new(command: &str) -> Result<Self> {
        let mut argv =
            shell_words::split(command).with_context(|| format!("parse LM command: {command}"))?;
        if argv.is_empty() {
            return Err(anyhow!("LM command is empty"));
        }
        let program_name = argv.remove(0);
        let program = which::which(&program_name)
            .with_context(|| format!("resolve LM command program {program_name:?}"))?;
        Ok(Self {
            program,
            args: argv,
        })
    }
}

/// Prompt document written to the command backend's stdin.
fn command_prompt(request: &CompletionRequest) -> String {
    format!(
        "# Instructions\n{}\n\n# Query\n{}\n",
        request.system.trim(),
        request.user
    )
}

impl CompletionBackend for CommandBackend {
    fn name(&self) -> &'static str {
        "command"
    }

    fn complete(&self, request: &CompletionRequest) -> Result<String> {
        let prompt = command_prompt(request);
        let start = Instant::now();
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .env("BOOKMETA_MODEL", &request.model)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .with_context(|| format!("spawn LM command: {}", self.program.display()))?;

        if let Some(mut stdin) = child.stdin.take() {
            // A command that answers without reading its input closes the pipe early.
            if let Err(err) = stdin.write_all(prompt.as_bytes()) {
                if err.kind() != ErrorKind::BrokenPipe {
                    return Err(err).context("write prompt to LM stdin");
                }
            }
        }

        let output = child.wait_with_output().context("wait for LM command")?;
        tracing::debug!(
            elapsed_ms = start.elapsed().as_millis() as u64,
            prompt_bytes = prompt.len(),
            response_bytes = output.stdout.len(),
            "lm command complete"
        );
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(anyhow!(
                "LM command failed with status {}: {}",
                output.status,
                stderr.trim()
            ));
        }
        let text = String::from_utf8(output.stdout).context("decode LM stdout as UTF-8")?;
        let text = text.trim().to_string();
        if text.is_empty() {
            return Err(anyhow!("LM command produced no output"));
        }
        Ok(text)
    }
}

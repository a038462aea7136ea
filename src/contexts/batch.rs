//! Chat-completion batch files: requests out, responses back in.

use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use super::prompt::ProjectPrompts;
use super::workspace::Workspace;
use crate::error::Result;

pub const SYSTEM_MESSAGE: &str = "You are a helpful assistant.";
pub const CHAT_COMPLETIONS_URL: &str = "/v1/chat/completions";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchRequest {
    pub custom_id: String,
    pub method: String,
    pub url: String,
    pub body: ChatRequestBody,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatRequestBody {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub max_tokens: u32,
    pub temperature: f64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BatchSettings {
    pub model: String,
    pub temperature: f64,
    pub max_completion_tokens: u32,
    /// Prompts estimated above this many tokens are left out of the batch.
    pub max_prompt_tokens: usize,
}

impl Default for BatchSettings {
    fn default() -> Self {
        Self {
            model: "gpt-4.1".to_string(),
            temperature: 0.2,
            max_completion_tokens: 30_000,
            max_prompt_tokens: 30_000,
        }
    }
}

pub fn custom_id(project: &str, task_index: usize) -> String {
    format!("{project}${task_index}")
}

/// Splits a custom id on its last `$` into project and task index.
pub fn split_custom_id(id: &str) -> Option<(&str, usize)> {
    let (project, index) = id.rsplit_once('$')?;
    Some((project, index.parse().ok()?))
}

/// Whitespace-separated word count, used as the token estimate.
pub fn estimate_tokens(prompt: &str) -> usize {
    prompt.split_whitespace().count()
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PreparedBatch {
    pub requests: Vec<BatchRequest>,
    /// Task indices left out for exceeding the token ceiling.
    pub skipped: Vec<usize>,
}

/// One request per active prompt; placeholders produce nothing.
pub fn prepare_batch(project: &str, prompts: &ProjectPrompts, settings: &BatchSettings) -> PreparedBatch {
    let mut batch = PreparedBatch::default();
    for (index, prompt) in prompts.iter_active() {
        let text = prompt.render();
        let tokens = estimate_tokens(&text);
        if tokens > settings.max_prompt_tokens {
            warn!(
                "Skipping {}: about {} tokens exceeds the ceiling of {}",
                custom_id(project, index),
                tokens,
                settings.max_prompt_tokens
            );
            batch.skipped.push(index);
            continue;
        }
        batch.requests.push(BatchRequest {
            custom_id: custom_id(project, index),
            method: "POST".to_string(),
            url: CHAT_COMPLETIONS_URL.to_string(),
            body: ChatRequestBody {
                model: settings.model.clone(),
                messages: vec![
                    ChatMessage { role: "system".to_string(), content: SYSTEM_MESSAGE.to_string() },
                    ChatMessage { role: "user".to_string(), content: text },
                ],
                max_tokens: settings.max_completion_tokens,
                temperature: settings.temperature,
            },
        });
    }
    batch
}

pub fn write_jsonl<T: Serialize>(path: &Path, records: &[T]) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut out = BufWriter::new(fs::File::create(path)?);
    for record in records {
        serde_json::to_writer(&mut out, record)?;
        out.write_all(b"\n")?;
    }
    out.flush()?;
    Ok(())
}

pub fn read_requests(path: &Path) -> Result<Vec<BatchRequest>> {
    let content = fs::read_to_string(path)?;
    let mut requests = Vec::new();
    for line in content.lines().filter(|l| !l.trim().is_empty()) {
        requests.push(serde_json::from_str(line)?);
    }
    Ok(requests)
}

/// Concatenates per-project request files and splits the result into
/// `splits` roughly equal `merged_batch_<n>.jsonl` parts.
pub fn merge_batch_files(workspace: &Workspace, inputs: &[PathBuf], splits: usize) -> Result<Vec<PathBuf>> {
    let mut requests = Vec::new();
    for input in inputs {
        requests.extend(read_requests(input)?);
    }

    let splits = splits.max(1);
    let part_size = requests.len().div_ceil(splits).max(1);
    let mut outputs = Vec::with_capacity(splits);
    for part in 0..splits {
        let start = (part * part_size).min(requests.len());
        let end = (start + part_size).min(requests.len());
        let path = workspace.merged_batch_file(part + 1);
        write_jsonl(&path, &requests[start..end])?;
        info!("Saved split batch {} to {}", part + 1, path.display());
        outputs.push(path);
    }
    Ok(outputs)
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct BatchResponse {
    pub custom_id: String,
    #[serde(default)]
    pub response: Option<ResponseEnvelope>,
    #[serde(default)]
    pub error: Option<BatchError>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ResponseEnvelope {
    #[serde(default)]
    pub status_code: Option<u16>,
    pub body: ChatResponseBody,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ChatResponseBody {
    #[serde(default)]
    pub choices: Vec<Choice>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Choice {
    pub message: ChoiceMessage,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ChoiceMessage {
    #[serde(default)]
    pub content: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct BatchError {
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub message: String,
}

impl BatchResponse {
    /// Content of the first choice, if the request succeeded.
    pub fn content(&self) -> Option<&str> {
        self.response
            .as_ref()?
            .body
            .choices
            .first()?
            .message
            .content
            .as_deref()
    }
}

/// Reads a response file, skipping lines that are not response records.
pub fn read_responses(path: &Path) -> Result<Vec<BatchResponse>> {
    let content = fs::read_to_string(path)?;
    let mut responses = Vec::new();
    for (n, line) in content.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<BatchResponse>(line) {
            Ok(response) => responses.push(response),
            Err(e) => warn!("Skipping malformed response on line {} of {}: {}", n + 1, path.display(), e),
        }
    }
    debug!("Read {} responses from {}", responses.len(), path.display());
    Ok(responses)
}

/// Strips a surrounding Markdown code fence and guarantees a final newline.
pub fn clean_model_output(content: &str) -> String {
    let mut code = if content.trim_start().starts_with("```") {
        let lines: Vec<&str> = content.trim().lines().collect();
        let end = match lines.last() {
            Some(last) if lines.len() > 1 && last.trim_start().starts_with("```") => lines.len() - 1,
            _ => lines.len(),
        };
        lines[1..end].join("\n")
    } else {
        content.to_string()
    };
    if !code.ends_with('\n') {
        code.push('\n');
    }
    code
}

//! Title and summary generation from a finished transcript.
//!
//! Two independent chat completions at temperature 0. Each step degrades to
//! a fixed fallback string rather than failing the whole request; only a
//! missing or too-short transcript is a hard error.

use std::time::Duration;

use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::backend::remote::map_status;
use crate::error::WorkerError;

pub const DEFAULT_ENDPOINT: &str = "https://api.openai.com/v1/chat/completions";
const REQUEST_TIMEOUT_SECS: u64 = 60;

/// Character caps on the transcript slice each prompt sees.
pub const TITLE_INPUT_CAP: usize = 2000;
pub const SUMMARY_INPUT_CAP: usize = 4000;
/// Anything shorter is not worth generating notes for.
pub const MIN_TRANSCRIPT_CHARS: usize = 10;

pub const TITLE_FALLBACK: &str = "Untitled Recording";
pub const SUMMARY_FALLBACK: &str = "Summary generation failed.";

const TITLE_SYSTEM_PROMPT: &str = "You are a helpful assistant that creates concise, descriptive titles for voice recordings. Generate a short title (3-8 words) that captures the main topic or purpose of the transcript. Return only the title, no quotes or extra text.";
const SUMMARY_SYSTEM_PROMPT: &str = "You are a helpful assistant that summarizes voice recordings. Create a concise summary (2-4 sentences) of the key points in the transcript. Return only the summary text.";

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: &'static str,
    content: String,
}

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ChatResponseMessage {
    content: String,
}

pub struct NotesGenerator {
    client: Client,
    endpoint: String,
    model: String,
    api_key: String,
}

impl NotesGenerator {
    pub fn new(model: String, api_key: String) -> Result<Self, WorkerError> {
        if api_key.trim().is_empty() {
            return Err(WorkerError::BackendAuth(
                "API key not provided. Set OPENAI_API_KEY or pass --api-key".to_string(),
            ));
        }
        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .map_err(|e| WorkerError::request(format!("Failed to build HTTP client: {}", e)))?;
        Ok(NotesGenerator {
            client,
            endpoint: DEFAULT_ENDPOINT.to_string(),
            model,
            api_key,
        })
    }

    async fn generate(&self, system: &str, transcript: &str) -> Result<String, WorkerError> {
        let request = ChatRequest {
            model: self.model.clone(),
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: system.to_string(),
                },
                ChatMessage {
                    role: "user",
                    content: transcript.to_string(),
                },
            ],
            temperature: 0.0,
        };

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| WorkerError::request(format!("Request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(map_status(status, body));
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| WorkerError::request(format!("Unexpected response shape: {}", e)))?;
        parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content.trim().to_string())
            .ok_or_else(|| WorkerError::request("Response contained no choices"))
    }

    /// Title from the leading transcript slice; fallback on any failure.
    pub async fn title(&self, transcript: &str) -> String {
        let input = truncate_chars(transcript, TITLE_INPUT_CAP);
        match self.generate(TITLE_SYSTEM_PROMPT, input).await {
            Ok(title) if !title.is_empty() => title.trim_matches('"').trim().to_string(),
            Ok(_) => TITLE_FALLBACK.to_string(),
            Err(e) => {
                log::error!("Title generation failed: {}", e);
                TITLE_FALLBACK.to_string()
            }
        }
    }

    /// Summary from the leading transcript slice; fallback on any failure.
    pub async fn summary(&self, transcript: &str) -> String {
        let input = truncate_chars(transcript, SUMMARY_INPUT_CAP);
        match self.generate(SUMMARY_SYSTEM_PROMPT, input).await {
            Ok(summary) if !summary.is_empty() => summary,
            Ok(_) => SUMMARY_FALLBACK.to_string(),
            Err(e) => {
                log::error!("Summary generation failed: {}", e);
                SUMMARY_FALLBACK.to_string()
            }
        }
    }
}

/// First `max` characters of `s`, cut on a char boundary.
pub fn truncate_chars(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((index, _)) => &s[..index],
        None => s,
    }
}

/// Pull the transcript text out of a saved worker output file. Accepts the
/// bare `{"text": ...}` shape and the wrapped `{"result": {"text": ...}}`.
pub fn extract_transcript_text(value: &Value) -> Option<String> {
    let text = value
        .get("text")
        .or_else(|| value.get("result").and_then(|r| r.get("text")))?
        .as_str()?;
    Some(text.to_string())
}

pub fn validate_transcript(text: &str) -> Result<(), WorkerError> {
    if text.trim().chars().count() < MIN_TRANSCRIPT_CHARS {
        return Err(WorkerError::Input(
            "Transcript text is too short or empty".to_string(),
        ));
    }
    Ok(())
}

//! Remote transcription API backend.
//!
//! Uploads the audio as multipart form data and asks for `verbose_json`
//! so segment timestamps and log probabilities come back with the text.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::{Client, StatusCode};
use serde::Deserialize;

use crate::backend::{TranscribeOptions, TranscriptionBackend};
use crate::error::WorkerError;
use crate::types::{aggregate_confidence, normalize_segments, RawSegment, TranscriptionResult};

pub const DEFAULT_ENDPOINT: &str = "https://api.openai.com/v1/audio/transcriptions";
const REQUEST_TIMEOUT_SECS: u64 = 600;

#[derive(Debug, Clone)]
pub struct RemoteConfig {
    pub endpoint: String,
    pub model: String,
    pub api_key: String,
}

impl RemoteConfig {
    pub fn new(model: String, api_key: String) -> Self {
        RemoteConfig {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            model,
            api_key,
        }
    }
}

#[derive(Debug)]
pub struct RemoteBackend {
    client: Client,
    config: RemoteConfig,
}

impl RemoteBackend {
    pub fn new(config: RemoteConfig) -> Result<Self, WorkerError> {
        if config.api_key.trim().is_empty() {
            return Err(WorkerError::BackendAuth(
                "API key not provided. Set OPENAI_API_KEY or pass --api-key".to_string(),
            ));
        }
        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .map_err(|e| WorkerError::request(format!("Failed to build HTTP client: {}", e)))?;
        Ok(RemoteBackend { client, config })
    }
}

/// Map an unsuccessful HTTP status onto the worker error taxonomy.
pub fn map_status(status: StatusCode, body: String) -> WorkerError {
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            WorkerError::BackendAuth("Invalid API key".to_string())
        }
        StatusCode::TOO_MANY_REQUESTS => {
            WorkerError::BackendRateLimit("API rate limit exceeded, try again later".to_string())
        }
        status => WorkerError::BackendRequest {
            message: format!("API error {}", status.as_u16()),
            details: if body.trim().is_empty() {
                None
            } else {
                Some(body)
            },
        },
    }
}

#[derive(Debug, Deserialize)]
struct VerboseTranscription {
    text: String,
    #[serde(default)]
    language: Option<String>,
    #[serde(default)]
    segments: Vec<RawSegment>,
}

#[async_trait]
impl TranscriptionBackend for RemoteBackend {
    fn identifier(&self) -> &str {
        &self.config.model
    }

    fn speed_factor(&self) -> f64 {
        crate::progress::speed_factor(&self.config.model)
    }

    fn has_upload_limit(&self) -> bool {
        true
    }

    async fn transcribe(
        &mut self,
        path: &Path,
        options: &TranscribeOptions,
    ) -> Result<TranscriptionResult, WorkerError> {
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| WorkerError::Input(format!("Cannot read file {:?}: {}", path, e)))?;
        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("audio.mp3")
            .to_string();

        log::info!(
            "Uploading {} ({:.1} MB) to {}",
            file_name,
            bytes.len() as f64 / (1024.0 * 1024.0),
            self.config.endpoint
        );

        let mut form = Form::new()
            .part("file", Part::bytes(bytes).file_name(file_name))
            .text("model", self.config.model.clone())
            .text("response_format", "verbose_json")
            .text("temperature", "0");
        if let Some(language) = &options.language {
            form = form.text("language", language.clone());
        }

        let response = self
            .client
            .post(&self.config.endpoint)
            .bearer_auth(&self.config.api_key)
            .multipart(form)
            .send()
            .await
            .map_err(|e| WorkerError::request(format!("Request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(map_status(status, body));
        }

        let verbose: VerboseTranscription = response
            .json()
            .await
            .map_err(|e| WorkerError::request(format!("Unexpected response shape: {}", e)))?;

        Ok(TranscriptionResult {
            text: verbose.text.trim().to_string(),
            language: verbose
                .language
                .or_else(|| options.language.clone())
                .unwrap_or_else(|| "unknown".to_string()),
            confidence: Some(aggregate_confidence(&verbose.segments)),
            segments: normalize_segments(&verbose.segments),
        })
    }
}

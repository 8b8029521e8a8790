//! Worker error taxonomy.
//!
//! Every component surfaces failures to its caller; the only
//! catch-and-continue boundary is batch mode's per-chunk isolation.

use thiserror::Error;

use crate::events::Event;

#[derive(Debug, Error)]
pub enum WorkerError {
    /// Missing or invalid input file, unsupported format, transcript too short.
    #[error("Invalid input: {0}")]
    Input(String),

    /// Decode or re-encode failure while fitting the provider size ceiling.
    #[error("Audio preprocessing failed: {message}")]
    Preprocessing {
        message: String,
        details: Option<String>,
    },

    #[error("Authentication failed: {0}")]
    BackendAuth(String),

    #[error("Rate limit exceeded: {0}")]
    BackendRateLimit(String),

    /// Malformed request, decode failure, or unexpected response shape.
    #[error("Transcription request failed: {message}")]
    BackendRequest {
        message: String,
        details: Option<String>,
    },

    /// Model failed to load. Not retried; a retry is unlikely to succeed
    /// without operator intervention.
    #[error("Failed to load model: {0}")]
    ResourceLoad(String),

    /// External cancellation (signal).
    #[error("Interrupted: {0}")]
    Interrupted(String),
}

impl WorkerError {
    pub fn preprocessing(message: impl Into<String>) -> Self {
        WorkerError::Preprocessing {
            message: message.into(),
            details: None,
        }
    }

    pub fn request(message: impl Into<String>) -> Self {
        WorkerError::BackendRequest {
            message: message.into(),
            details: None,
        }
    }

    /// Secondary diagnostic payload, where one was captured.
    pub fn details(&self) -> Option<&str> {
        match self {
            WorkerError::Preprocessing { details, .. }
            | WorkerError::BackendRequest { details, .. } => details.as_deref(),
            _ => None,
        }
    }

    /// The terminal event for this failure.
    pub fn to_event(&self) -> Event {
        match self {
            WorkerError::Interrupted(reason) => Event::Cancelled {
                reason: reason.clone(),
            },
            _ => Event::Error {
                error: self.to_string(),
                details: self.details().map(str::to_string),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interrupted_maps_to_cancelled_event() {
        let err = WorkerError::Interrupted("Cancelled by user".to_string());
        let json = serde_json::to_string(&err.to_event()).unwrap();
        assert!(json.contains("\"type\":\"cancelled\""));
        assert!(json.contains("Cancelled by user"));
    }

    #[test]
    fn request_error_carries_details() {
        let err = WorkerError::BackendRequest {
            message: "API error 400".to_string(),
            details: Some("bad field".to_string()),
        };
        assert_eq!(err.details(), Some("bad field"));
        let json = serde_json::to_string(&err.to_event()).unwrap();
        assert!(json.contains("\"details\":\"bad field\""));
    }

    #[test]
    fn input_error_has_no_details() {
        let err = WorkerError::Input("File not found".to_string());
        assert_eq!(err.details(), None);
        let json = serde_json::to_string(&err.to_event()).unwrap();
        assert!(!json.contains("details"));
    }
}

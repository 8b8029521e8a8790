//! Transcription backend abstraction.
//!
//! The mode dispatcher is written against this trait; backend selection
//! happens once at startup from configuration.

pub mod local;
pub mod remote;

use std::path::Path;

use async_trait::async_trait;

use crate::error::WorkerError;
use crate::types::TranscriptionResult;

#[derive(Debug, Clone, Default)]
pub struct TranscribeOptions {
    /// ISO language hint; autodetect when absent.
    pub language: Option<String>,
}

#[async_trait]
pub trait TranscriptionBackend: Send {
    /// Model identifier, used for progress estimation and lifecycle events.
    fn identifier(&self) -> &str;

    /// Realtime speed multiple for progress estimation.
    fn speed_factor(&self) -> f64;

    /// Whether uploads to this backend are size-limited.
    fn has_upload_limit(&self) -> bool {
        false
    }

    /// Load or otherwise ready the backend before the first request.
    async fn prepare(&mut self) -> Result<(), WorkerError> {
        Ok(())
    }

    async fn transcribe(
        &mut self,
        path: &Path,
        options: &TranscribeOptions,
    ) -> Result<TranscriptionResult, WorkerError>;
}

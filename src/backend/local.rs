//! Local Whisper backend.
//!
//! Inference is CPU or GPU bound and blocking, so it runs on the blocking
//! thread pool. The cache is shared with the blocking task; the process
//! model has one request in flight at a time, so the lock is uncontended.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use whisper_rs::{FullParams, SamplingStrategy, WhisperContext};

use crate::backend::{TranscribeOptions, TranscriptionBackend};
use crate::error::WorkerError;
use crate::ffmpeg;
use crate::model_cache::ModelCache;
use crate::progress;
use crate::types::{aggregate_confidence, normalize_segments, RawSegment, TranscriptionResult};

pub struct LocalBackend {
    cache: Arc<Mutex<ModelCache>>,
    model: String,
}

impl LocalBackend {
    pub fn new(models_dir: PathBuf, model: String) -> Self {
        LocalBackend {
            cache: Arc::new(Mutex::new(ModelCache::new(models_dir))),
            model,
        }
    }
}

#[async_trait]
impl TranscriptionBackend for LocalBackend {
    fn identifier(&self) -> &str {
        &self.model
    }

    fn speed_factor(&self) -> f64 {
        progress::speed_factor(&self.model)
    }

    async fn prepare(&mut self) -> Result<(), WorkerError> {
        let cache = self.cache.clone();
        let model = self.model.clone();
        tokio::task::spawn_blocking(move || {
            let mut cache = cache.lock().unwrap_or_else(PoisonError::into_inner);
            cache.acquire(&model).map(|_| ())
        })
        .await
        .map_err(|e| WorkerError::request(format!("Model load task failed: {}", e)))?
    }

    async fn transcribe(
        &mut self,
        path: &Path,
        options: &TranscribeOptions,
    ) -> Result<TranscriptionResult, WorkerError> {
        if !path.exists() {
            return Err(WorkerError::Input(format!("File not found: {:?}", path)));
        }
        let cache = self.cache.clone();
        let model = self.model.clone();
        let language = options.language.clone();
        let path = path.to_path_buf();
        tokio::task::spawn_blocking(move || {
            let samples = ffmpeg::decode_audio_file(&path)?;
            let mut cache = cache.lock().unwrap_or_else(PoisonError::into_inner);
            let cached = cache.acquire(&model)?;
            run_whisper(cached.context(), &samples, language.as_deref())
        })
        .await
        .map_err(|e| WorkerError::request(format!("Transcription task failed: {}", e)))?
    }
}

/// Run one deterministic inference pass over the decoded samples.
fn run_whisper(
    context: &WhisperContext,
    samples: &[f32],
    language: Option<&str>,
) -> Result<TranscriptionResult, WorkerError> {
    let mut params = FullParams::new(SamplingStrategy::Greedy { best_of: 1 });
    // None means autodetect; the whisper default is a fixed "en"
    params.set_language(language);
    params.set_translate(false);
    params.set_no_timestamps(false);
    params.set_token_timestamps(false);
    params.set_print_special(false);
    params.set_print_progress(false);
    params.set_print_realtime(false);
    params.set_print_timestamps(false);
    params.set_suppress_blank(true);
    params.set_temperature(0.0);
    params.set_entropy_thold(2.4);
    params.set_logprob_thold(-1.0);
    params.set_no_speech_thold(0.6);
    params.set_no_context(true);

    let mut state = context
        .create_state()
        .map_err(|e| WorkerError::request(format!("Failed to create whisper state: {}", e)))?;
    state
        .full(params, samples)
        .map_err(|e| WorkerError::request(format!("Whisper inference failed: {}", e)))?;

    let n_segments = state
        .full_n_segments()
        .map_err(|e| WorkerError::request(format!("Failed to read segments: {}", e)))?;

    let mut raw = Vec::with_capacity(n_segments as usize);
    let mut text = String::new();
    for i in 0..n_segments {
        let segment_text = state
            .full_get_segment_text_lossy(i)
            .map_err(|e| WorkerError::request(format!("Failed to read segment {}: {}", i, e)))?;
        let t0 = state
            .full_get_segment_t0(i)
            .map_err(|e| WorkerError::request(format!("Failed to read segment {}: {}", i, e)))?;
        let t1 = state
            .full_get_segment_t1(i)
            .map_err(|e| WorkerError::request(format!("Failed to read segment {}: {}", i, e)))?;

        if !text.is_empty() {
            text.push(' ');
        }
        text.push_str(segment_text.trim());

        raw.push(RawSegment {
            start: t0 as f64 / 100.0,
            end: t1 as f64 / 100.0,
            text: segment_text,
            avg_logprob: segment_avg_logprob(&state, i),
        });
    }

    let detected = state
        .full_lang_id_from_state()
        .ok()
        .and_then(whisper_rs::get_lang_str)
        .map(str::to_string)
        .or_else(|| language.map(str::to_string))
        .unwrap_or_else(|| "unknown".to_string());

    Ok(TranscriptionResult {
        text,
        language: detected,
        confidence: Some(aggregate_confidence(&raw)),
        segments: normalize_segments(&raw),
    })
}

/// Mean natural-log token probability for one segment, the local analogue
/// of the remote API's `avg_logprob`.
fn segment_avg_logprob(state: &whisper_rs::WhisperState, segment: i32) -> Option<f32> {
    let n_tokens = state.full_n_tokens(segment).ok()?;
    if n_tokens == 0 {
        return None;
    }
    let mut total = 0.0f32;
    for token in 0..n_tokens {
        let prob = state.full_get_token_prob(segment, token).ok()?;
        total += prob.max(f32::MIN_POSITIVE).ln();
    }
    Some(total / n_tokens as f32)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(flavor = "multi_thread")]
    async fn missing_audio_file_is_an_input_error() {
        let mut backend = LocalBackend::new(PathBuf::from("/tmp/models"), "tiny".to_string());
        let err = backend
            .transcribe(
                Path::new("/nonexistent/audio.wav"),
                &TranscribeOptions::default(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, WorkerError::Input(_)));
    }

    #[test]
    fn local_backend_has_no_upload_limit() {
        let backend = LocalBackend::new(PathBuf::from("/tmp/models"), "base".to_string());
        assert!(!backend.has_upload_limit());
        assert_eq!(backend.identifier(), "base");
        assert_eq!(backend.speed_factor(), 7.0);
    }
}

//! Request sequencing for the worker's operating modes.
//!
//! Single: one file, full progress arc, one terminal event. Batch: many
//! chunks with per-chunk result/error isolation. Warm: load a model and
//! idle until interrupted. Notes: title/summary from a saved transcript.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::backend::{TranscribeOptions, TranscriptionBackend};
use crate::error::WorkerError;
use crate::events::{Event, EventEmitter, ResultPayload};
use crate::ffmpeg;
use crate::notes::{self, NotesGenerator};
use crate::progress::ProgressEstimator;
use crate::size_guard::{self, SizeGuardOutcome};
use crate::types::{TranscriptionResult, WorkItem};

pub const SUPPORTED_EXTENSIONS: &[&str] = &["mp3", "mp4", "mpeg", "mpga", "m4a", "wav", "webm"];

/// One batch entry, parsed from the chunk list argument.
#[derive(Debug, Clone, Deserialize)]
pub struct ChunkSpec {
    pub file: PathBuf,
    #[serde(default)]
    pub id: Option<String>,
}

/// Parse a chunk list: inline JSON array, or `@path` to read it from a file.
pub fn parse_chunks(argument: &str) -> Result<Vec<ChunkSpec>, WorkerError> {
    let json = if let Some(path) = argument.strip_prefix('@') {
        std::fs::read_to_string(path)
            .map_err(|e| WorkerError::Input(format!("Cannot read chunk list {}: {}", path, e)))?
    } else {
        argument.to_string()
    };
    let chunks: Vec<ChunkSpec> = serde_json::from_str(&json)
        .map_err(|e| WorkerError::Input(format!("Invalid chunk list: {}", e)))?;
    if chunks.is_empty() {
        return Err(WorkerError::Input("Chunk list is empty".to_string()));
    }
    Ok(chunks)
}

/// Reject missing files and, when asked, unsupported extensions.
pub fn validate_input(path: &Path, check_extension: bool) -> Result<(), WorkerError> {
    if !path.is_file() {
        return Err(WorkerError::Input(format!("File not found: {:?}", path)));
    }
    if check_extension {
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_lowercase)
            .unwrap_or_default();
        if !SUPPORTED_EXTENSIONS.contains(&extension.as_str()) {
            return Err(WorkerError::Input(format!(
                "Unsupported file format .{}. Supported: {}",
                extension,
                SUPPORTED_EXTENSIONS.join(", ")
            )));
        }
    }
    Ok(())
}

/// Progress after `completed` of `total` batch chunks, in the backend range.
pub fn batch_progress(completed: usize, total: usize) -> u8 {
    if total == 0 {
        return 100;
    }
    (30 + completed * 60 / total) as u8
}

fn save_output(output: &Path, result: &TranscriptionResult) {
    let json = match serde_json::to_string_pretty(result) {
        Ok(json) => json,
        Err(e) => {
            log::error!("Failed to serialize result for {:?}: {}", output, e);
            return;
        }
    };
    // A save failure is logged, not fatal; the result already went to stdout.
    if let Err(e) = std::fs::write(output, json) {
        log::error!("Failed to save output to {:?}: {}", output, e);
    } else {
        log::info!("Saved result to {:?}", output);
    }
}

/// Transcribe one file end to end.
pub async fn run_single(
    emitter: &EventEmitter,
    backend: &mut dyn TranscriptionBackend,
    item: &WorkItem,
    output: Option<&Path>,
) -> Result<(), WorkerError> {
    match &item.chunk_id {
        Some(id) => emitter.emit_progress(0, format!("Starting transcription of chunk {}", id)),
        None => emitter.emit_progress(0, "Starting transcription"),
    }
    validate_input(&item.path, backend.has_upload_limit())?;
    emitter.emit_progress(5, "Validating input file");

    backend.prepare().await?;
    emitter.emit_progress(10, "Preparing audio");

    let guarded = if backend.has_upload_limit() {
        size_guard::ensure_within_limit(
            emitter,
            &item.path,
            size_guard::HARD_LIMIT_BYTES,
            size_guard::TARGET_BYTES,
        )?
    } else {
        SizeGuardOutcome::Original(item.path.clone())
    };

    let duration = match ffmpeg::probe_duration(guarded.path()) {
        Ok(duration) => duration,
        Err(e) => {
            log::warn!("Duration probe failed, assuming 60s: {}", e);
            60.0
        }
    };
    emitter.emit_progress(28, "Starting transcription engine");

    let options = TranscribeOptions {
        language: item.language.clone(),
    };
    let estimator = ProgressEstimator::start(emitter.clone(), duration, backend.speed_factor());
    let outcome = backend.transcribe(guarded.path(), &options).await;
    // Estimator must be down before any completion milestone or error.
    estimator.stop().await;
    let result = outcome?;

    emitter.emit_progress(95, "Finalizing results");
    if let Some(output) = output {
        save_output(output, &result);
    }
    emitter.emit_progress(100, "Transcription complete");
    emitter.emit(&Event::Result(ResultPayload::Transcription {
        text: result.text,
        language: result.language,
        segments: result.segments,
        confidence: result.confidence,
    }));
    Ok(())
}

/// Transcribe a list of chunks, isolating failures per chunk.
pub async fn run_batch(
    emitter: &EventEmitter,
    backend: &mut dyn TranscriptionBackend,
    chunks: &[ChunkSpec],
    language: Option<&str>,
) -> Result<(), WorkerError> {
    emitter.emit_progress(0, format!("Starting batch of {} chunks", chunks.len()));
    backend.prepare().await?;

    let options = TranscribeOptions {
        language: language.map(str::to_string),
    };
    let total = chunks.len();
    for (i, chunk) in chunks.iter().enumerate() {
        let chunk_id = chunk
            .id
            .clone()
            .unwrap_or_else(|| format!("chunk_{}", i));
        emitter.emit_progress(
            batch_progress(i, total),
            format!("Processing chunk {}/{}", i + 1, total),
        );

        match backend.transcribe(&chunk.file, &options).await {
            Ok(result) => {
                emitter.emit(&Event::ChunkResult {
                    chunk_id,
                    text: result.text,
                    language: result.language,
                    segments: result.segments,
                    confidence: result.confidence,
                });
            }
            Err(e) => {
                log::error!("Chunk {} failed: {}", chunk_id, e);
                emitter.emit(&Event::ChunkError {
                    chunk_id,
                    error: e.to_string(),
                });
            }
        }
    }

    emitter.emit_progress(100, "Batch processing complete");
    Ok(())
}

/// Load the model and idle until interrupted.
pub async fn run_warm(
    emitter: &EventEmitter,
    backend: &mut dyn TranscriptionBackend,
) -> Result<(), WorkerError> {
    run_warm_until(emitter, backend, shutdown_signal()).await
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        log::error!("Signal handler failed: {}", e);
    }
}

/// Warm sequencing against an explicit shutdown future. The future is
/// polled alongside the model load, so an interrupt that arrives while
/// loading still produces the `model_shutdown` terminal event.
pub async fn run_warm_until(
    emitter: &EventEmitter,
    backend: &mut dyn TranscriptionBackend,
    shutdown: impl std::future::Future<Output = ()>,
) -> Result<(), WorkerError> {
    tokio::pin!(shutdown);
    let model_name = backend.identifier().to_string();

    emitter.emit_progress(10, format!("Loading model {}", model_name));
    tokio::select! {
        result = backend.prepare() => result?,
        _ = &mut shutdown => {
            log::info!("Interrupted while loading model {}", model_name);
            emitter.emit(&Event::ModelShutdown { model_name });
            return Ok(());
        }
    }
    emitter.emit_progress(20, "Model loaded, keeping warm");
    emitter.emit(&Event::ModelReady {
        model_name: model_name.clone(),
    });
    log::info!("Model {} resident, waiting for shutdown", model_name);

    shutdown.await;
    emitter.emit(&Event::ModelShutdown { model_name });
    Ok(())
}

/// Generate title and summary notes from a saved transcript file.
pub async fn run_notes(
    emitter: &EventEmitter,
    generator: &NotesGenerator,
    transcript_file: &Path,
    output: Option<&Path>,
) -> Result<(), WorkerError> {
    emitter.emit_progress(0, "Starting notes generation");
    let raw = std::fs::read_to_string(transcript_file).map_err(|e| {
        WorkerError::Input(format!("Cannot read file {:?}: {}", transcript_file, e))
    })?;
    emitter.emit_progress(5, "Reading transcript");

    let value: serde_json::Value = serde_json::from_str(&raw)
        .map_err(|e| WorkerError::Input(format!("Transcript file is not valid JSON: {}", e)))?;
    let transcript = notes::extract_transcript_text(&value)
        .ok_or_else(|| WorkerError::Input("No transcript text found in file".to_string()))?;
    notes::validate_transcript(&transcript)?;
    emitter.emit_progress(10, "Transcript loaded");

    emitter.emit_progress(25, "Generating title");
    let title = generator.title(&transcript).await;
    emitter.emit_progress(50, "Title generated");

    emitter.emit_progress(75, "Generating summary");
    let summary = generator.summary(&transcript).await;
    emitter.emit_progress(95, "Summary generated");

    if let Some(output) = output {
        let notes_json = serde_json::json!({ "title": title, "summary": summary });
        if let Err(e) = std::fs::write(output, notes_json.to_string()) {
            log::error!("Failed to save notes to {:?}: {}", output, e);
        }
    }
    emitter.emit_progress(100, "Notes generation complete");
    emitter.emit(&Event::Result(ResultPayload::Notes { title, summary }));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::captured_lines;
    use crate::types::Segment;
    use async_trait::async_trait;

    struct StubBackend {
        calls: usize,
        fail_on: Option<usize>,
    }

    impl StubBackend {
        fn new() -> Self {
            StubBackend {
                calls: 0,
                fail_on: None,
            }
        }

        fn failing_on(call: usize) -> Self {
            StubBackend {
                calls: 0,
                fail_on: Some(call),
            }
        }
    }

    #[async_trait]
    impl TranscriptionBackend for StubBackend {
        fn identifier(&self) -> &str {
            "stub"
        }

        fn speed_factor(&self) -> f64 {
            10.0
        }

        async fn transcribe(
            &mut self,
            path: &Path,
            _options: &TranscribeOptions,
        ) -> Result<TranscriptionResult, WorkerError> {
            let call = self.calls;
            self.calls += 1;
            if self.fail_on == Some(call) {
                return Err(WorkerError::request("stub failure"));
            }
            Ok(TranscriptionResult {
                text: format!("transcript of {:?}", path.file_name().unwrap()),
                language: "en".to_string(),
                segments: vec![Segment {
                    start: 0.0,
                    end: 1.0,
                    text: "hi".to_string(),
                }],
                confidence: Some(0.8),
            })
        }
    }

    struct StalledBackend;

    #[async_trait]
    impl TranscriptionBackend for StalledBackend {
        fn identifier(&self) -> &str {
            "stalled"
        }

        fn speed_factor(&self) -> f64 {
            1.0
        }

        async fn prepare(&mut self) -> Result<(), WorkerError> {
            std::future::pending().await
        }

        async fn transcribe(
            &mut self,
            _path: &Path,
            _options: &TranscribeOptions,
        ) -> Result<TranscriptionResult, WorkerError> {
            Err(WorkerError::request("not reachable"))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn warm_emits_ready_then_shutdown() {
        let (emitter, buffer) = crate::events::EventEmitter::capture();
        let mut backend = StubBackend::new();
        let shutdown = tokio::time::sleep(std::time::Duration::from_secs(5));
        run_warm_until(&emitter, &mut backend, async { shutdown.await })
            .await
            .unwrap();

        let lines = captured_lines(&buffer);
        let kinds: Vec<_> = lines.iter().map(|l| l["type"].as_str().unwrap()).collect();
        assert_eq!(kinds, ["progress", "progress", "model_ready", "model_shutdown"]);
        assert_eq!(lines[2]["model_name"], "stub");
        assert_eq!(lines[3]["model_name"], "stub");
    }

    #[tokio::test]
    async fn warm_interrupt_during_load_still_emits_shutdown() {
        let (emitter, buffer) = crate::events::EventEmitter::capture();
        let mut backend = StalledBackend;
        run_warm_until(&emitter, &mut backend, async {})
            .await
            .unwrap();

        let lines = captured_lines(&buffer);
        assert!(lines.iter().all(|l| l["type"] != "model_ready"));
        let last = lines.last().unwrap();
        assert_eq!(last["type"], "model_shutdown");
        assert_eq!(last["model_name"], "stalled");
    }

    #[test]
    fn validates_extension_case_insensitively() {
        let dir = tempfile::tempdir().unwrap();
        let good = dir.path().join("audio.MP3");
        std::fs::write(&good, b"x").unwrap();
        assert!(validate_input(&good, true).is_ok());

        let bad = dir.path().join("notes.txt");
        std::fs::write(&bad, b"x").unwrap();
        assert!(validate_input(&bad, true).is_err());
        assert!(validate_input(&bad, false).is_ok());

        assert!(validate_input(Path::new("/nonexistent.mp3"), true).is_err());
    }

    #[test]
    fn batch_progress_spans_backend_range() {
        assert_eq!(batch_progress(0, 4), 30);
        assert_eq!(batch_progress(2, 4), 60);
        assert_eq!(batch_progress(4, 4), 90);
        assert_eq!(batch_progress(0, 0), 100);
    }

    #[test]
    fn parses_inline_and_file_chunk_lists() {
        let chunks = parse_chunks(r#"[{"file": "/a.wav", "id": "x"}, {"file": "/b.wav"}]"#).unwrap();
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].id.as_deref(), Some("x"));
        assert!(chunks[1].id.is_none());

        let dir = tempfile::tempdir().unwrap();
        let list = dir.path().join("chunks.json");
        std::fs::write(&list, r#"[{"file": "/c.wav"}]"#).unwrap();
        let chunks = parse_chunks(&format!("@{}", list.display())).unwrap();
        assert_eq!(chunks[0].file, Path::new("/c.wav"));

        assert!(parse_chunks("[]").is_err());
        assert!(parse_chunks("not json").is_err());
        assert!(parse_chunks("@/nonexistent/list.json").is_err());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn single_emits_progress_then_one_result() {
        let dir = tempfile::tempdir().unwrap();
        let audio = dir.path().join("talk.wav");
        std::fs::write(&audio, b"pcm").unwrap();

        let (emitter, buffer) = crate::events::EventEmitter::capture();
        let mut backend = StubBackend::new();
        let item = WorkItem {
            path: audio,
            chunk_id: None,
            language: None,
            model: None,
        };
        run_single(&emitter, &mut backend, &item, None)
            .await
            .unwrap();

        let lines = captured_lines(&buffer);
        let results: Vec<_> = lines.iter().filter(|l| l["type"] == "result").collect();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0]["language"], "en");
        // the result is the terminal event
        assert_eq!(lines.last().unwrap()["type"], "result");
        // everything before it is progress, ending at 100
        let progress: Vec<u64> = lines[..lines.len() - 1]
            .iter()
            .map(|l| {
                assert_eq!(l["type"], "progress");
                l["progress"].as_u64().unwrap()
            })
            .collect();
        assert_eq!(progress.first(), Some(&0));
        assert_eq!(progress.last(), Some(&100));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn single_progress_names_the_chunk() {
        let dir = tempfile::tempdir().unwrap();
        let audio = dir.path().join("talk.wav");
        std::fs::write(&audio, b"pcm").unwrap();

        let (emitter, buffer) = crate::events::EventEmitter::capture();
        let mut backend = StubBackend::new();
        let item = WorkItem {
            path: audio,
            chunk_id: Some("seg_07".to_string()),
            language: None,
            model: None,
        };
        run_single(&emitter, &mut backend, &item, None)
            .await
            .unwrap();

        let lines = captured_lines(&buffer);
        let first = lines.first().unwrap();
        assert_eq!(first["type"], "progress");
        assert!(first["message"].as_str().unwrap().contains("seg_07"));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn single_surfaces_backend_failure() {
        let dir = tempfile::tempdir().unwrap();
        let audio = dir.path().join("talk.wav");
        std::fs::write(&audio, b"pcm").unwrap();

        let (emitter, buffer) = crate::events::EventEmitter::capture();
        let mut backend = StubBackend::failing_on(0);
        let item = WorkItem {
            path: audio,
            chunk_id: None,
            language: None,
            model: None,
        };
        let err = run_single(&emitter, &mut backend, &item, None)
            .await
            .unwrap_err();
        assert!(matches!(err, WorkerError::BackendRequest { .. }));

        // no result and no error event from the dispatcher itself
        let lines = captured_lines(&buffer);
        assert!(lines.iter().all(|l| l["type"] == "progress"));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn batch_isolates_chunk_failures() {
        let dir = tempfile::tempdir().unwrap();
        let mut chunks = Vec::new();
        for i in 0..3 {
            let file = dir.path().join(format!("part{}.wav", i));
            std::fs::write(&file, b"pcm").unwrap();
            chunks.push(ChunkSpec {
                file,
                id: if i == 1 {
                    Some("middle".to_string())
                } else {
                    None
                },
            });
        }

        let (emitter, buffer) = crate::events::EventEmitter::capture();
        let mut backend = StubBackend::failing_on(1);
        run_batch(&emitter, &mut backend, &chunks, None)
            .await
            .unwrap();

        let lines = captured_lines(&buffer);
        let results: Vec<_> = lines.iter().filter(|l| l["type"] == "chunk_result").collect();
        let errors: Vec<_> = lines.iter().filter(|l| l["type"] == "chunk_error").collect();
        assert_eq!(results.len(), 2);
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0]["chunk_id"], "middle");
        assert_eq!(results[0]["chunk_id"], "chunk_0");
        assert_eq!(results[1]["chunk_id"], "chunk_2");

        let last = lines.last().unwrap();
        assert_eq!(last["type"], "progress");
        assert_eq!(last["progress"], 100);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn single_writes_output_file_when_asked() {
        let dir = tempfile::tempdir().unwrap();
        let audio = dir.path().join("talk.wav");
        std::fs::write(&audio, b"pcm").unwrap();
        let output = dir.path().join("result.json");

        let (emitter, _buffer) = crate::events::EventEmitter::capture();
        let mut backend = StubBackend::new();
        let item = WorkItem {
            path: audio,
            chunk_id: None,
            language: Some("en".to_string()),
            model: None,
        };
        run_single(&emitter, &mut backend, &item, Some(&output))
            .await
            .unwrap();

        let saved: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&output).unwrap()).unwrap();
        assert_eq!(saved["language"], "en");
        assert!(saved["text"].as_str().unwrap().contains("talk.wav"));
    }
}

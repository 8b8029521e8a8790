//! Worker orchestration core for audio transcription.
//!
//! A short-lived (or resident) process that reports progress, results and
//! errors as line-delimited JSON on stdout, drives a local Whisper model or
//! a remote transcription API, fits oversized recordings under provider
//! upload limits, and can keep a model loaded in memory between requests.
//!
//! Module structure:
//! - events.rs: Event enum and the stdout emitter
//! - error.rs: WorkerError taxonomy
//! - types.rs: WorkItem, Segment, TranscriptionResult, normalization
//! - ffmpeg.rs: decode, duration probe, trim re-encode
//! - size_guard.rs: provider size ceiling enforcement
//! - progress.rs: cosmetic progress estimation
//! - model_cache.rs: single loaded Whisper model per process
//! - backend/: TranscriptionBackend trait, local and remote implementations
//! - notes.rs: title/summary generation from a transcript
//! - modes.rs: single/batch/warm/notes sequencing

pub mod backend;
pub mod error;
pub mod events;
pub mod ffmpeg;
pub mod model_cache;
pub mod modes;
pub mod notes;
pub mod progress;
pub mod size_guard;
pub mod types;

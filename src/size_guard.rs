//! Fits oversized recordings under a provider's upload ceiling.
//!
//! Files over the hard limit are trimmed to a leading slice re-encoded at
//! mp3 128 kbps so the result lands under a target a little below the limit.
//! The trailing audio is lost; the caller is told so via a progress message
//! before any work happens. The original file is never modified.

use std::path::{Path, PathBuf};

use uuid::Uuid;

use crate::error::WorkerError;
use crate::events::EventEmitter;
use crate::ffmpeg;

/// Largest upload the remote provider accepts.
pub const HARD_LIMIT_BYTES: u64 = 25 * 1024 * 1024;
/// Trim target, kept below the limit so encoder overshoot stays safe.
pub const TARGET_BYTES: u64 = 24 * 1024 * 1024;

/// A trimmed substitute file, deleted when dropped.
#[derive(Debug)]
pub struct TempAudio {
    path: PathBuf,
}

impl TempAudio {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for TempAudio {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            if self.path.exists() {
                log::warn!("Failed to remove temp audio {:?}: {}", self.path, e);
            }
        }
    }
}

/// What the guard decided: pass the original through, or substitute a
/// trimmed temp file whose lifetime bounds the upload.
#[derive(Debug)]
pub enum SizeGuardOutcome {
    Original(PathBuf),
    Substitute(TempAudio),
}

impl SizeGuardOutcome {
    pub fn path(&self) -> &Path {
        match self {
            SizeGuardOutcome::Original(path) => path,
            SizeGuardOutcome::Substitute(temp) => temp.path(),
        }
    }
}

/// Seconds of leading audio to keep so the mp3 re-encode of that slice
/// lands near `target_bytes`.
pub fn keep_duration(duration_seconds: f64, original_bytes: u64, target_bytes: u64) -> u64 {
    if original_bytes == 0 {
        return 0;
    }
    let ratio = target_bytes as f64 / original_bytes as f64;
    (duration_seconds * ratio).floor() as u64
}

/// Check `path` against the provider limit and trim when necessary.
pub fn ensure_within_limit(
    emitter: &EventEmitter,
    path: &Path,
    hard_limit: u64,
    target: u64,
) -> Result<SizeGuardOutcome, WorkerError> {
    let metadata = std::fs::metadata(path)
        .map_err(|e| WorkerError::Input(format!("Cannot read file {:?}: {}", path, e)))?;
    let size = metadata.len();

    if size <= hard_limit {
        return Ok(SizeGuardOutcome::Original(path.to_path_buf()));
    }

    log::warn!(
        "File is {:.1} MB, over the {:.0} MB upload limit; trimming",
        size as f64 / (1024.0 * 1024.0),
        hard_limit as f64 / (1024.0 * 1024.0)
    );
    emitter.emit_progress(
        12,
        format!(
            "File is {:.1} MB, over the {:.0} MB limit. Trimming to the first portion; trailing audio will be lost",
            size as f64 / (1024.0 * 1024.0),
            hard_limit as f64 / (1024.0 * 1024.0)
        ),
    );

    let duration = ffmpeg::probe_duration(path)?;
    let keep = keep_duration(duration, size, target);
    if keep == 0 {
        return Err(WorkerError::preprocessing(
            "File is too large to trim to a usable length",
        ));
    }
    emitter.emit_progress(18, format!("Keeping first {}s of {:.0}s", keep, duration));

    let temp_path = std::env::temp_dir().join(format!("transcribe-worker-{}.mp3", Uuid::new_v4()));
    // Guard owns the path before ffmpeg runs so a partial file is cleaned up.
    let temp = TempAudio {
        path: temp_path.clone(),
    };
    ffmpeg::trim_encode(path, &temp_path, keep)?;

    let trimmed_size = std::fs::metadata(&temp_path).map(|m| m.len()).unwrap_or(0);
    emitter.emit_progress(
        25,
        format!(
            "Trimmed file ready ({:.1} MB)",
            trimmed_size as f64 / (1024.0 * 1024.0)
        ),
    );
    Ok(SizeGuardOutcome::Substitute(temp))
}

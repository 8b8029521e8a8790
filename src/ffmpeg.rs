//! Media probing, decoding and re-encoding through the system ffmpeg binary.

use std::path::{Path, PathBuf};
use std::process::Command;

use crate::error::WorkerError;

/// Locate ffmpeg on PATH.
pub fn find_ffmpeg() -> Result<PathBuf, WorkerError> {
    which::which("ffmpeg").map_err(|_| {
        WorkerError::preprocessing("ffmpeg not found on PATH. Install ffmpeg to process audio")
    })
}

/// Decode any audio file to 16 kHz mono f32 samples, the input format the
/// Whisper model expects.
pub fn decode_audio_file(path: &Path) -> Result<Vec<f32>, WorkerError> {
    let ffmpeg = find_ffmpeg()?;
    log::info!("Decoding audio file: {:?}", path);

    let output = Command::new(&ffmpeg)
        .arg("-i")
        .arg(path)
        .args(["-f", "f32le", "-acodec", "pcm_f32le", "-ar", "16000", "-ac", "1", "-"])
        .output()
        .map_err(|e| WorkerError::preprocessing(format!("Failed to run ffmpeg: {}", e)))?;

    if !output.status.success() {
        return Err(WorkerError::Preprocessing {
            message: "ffmpeg failed to decode audio".to_string(),
            details: Some(String::from_utf8_lossy(&output.stderr).trim().to_string()),
        });
    }

    let samples: Vec<f32> = output
        .stdout
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect();

    log::info!(
        "Decoded {} samples ({:.1}s of audio)",
        samples.len(),
        samples.len() as f64 / 16000.0
    );
    Ok(samples)
}

/// Duration of a media file in seconds, read from ffmpeg's stderr banner.
pub fn probe_duration(path: &Path) -> Result<f64, WorkerError> {
    let ffmpeg = find_ffmpeg()?;

    let output = Command::new(&ffmpeg)
        .arg("-i")
        .arg(path)
        .args(["-f", "null", "-"])
        .output()
        .map_err(|e| WorkerError::preprocessing(format!("Failed to run ffmpeg: {}", e)))?;

    let stderr = String::from_utf8_lossy(&output.stderr);
    parse_duration(&stderr).ok_or_else(|| {
        WorkerError::preprocessing(format!("Could not determine duration of {:?}", path))
    })
}

/// Parse `Duration: HH:MM:SS.cc` out of ffmpeg stderr output.
fn parse_duration(stderr: &str) -> Option<f64> {
    let after = stderr.split("Duration: ").nth(1)?;
    let stamp = after.split(',').next()?.trim();
    let parts: Vec<&str> = stamp.split(':').collect();
    if parts.len() != 3 {
        return None;
    }
    let hours: f64 = parts[0].parse().unwrap_or(0.0);
    let minutes: f64 = parts[1].parse().unwrap_or(0.0);
    let seconds: f64 = parts[2].parse().unwrap_or(0.0);
    Some(hours * 3600.0 + minutes * 60.0 + seconds)
}

/// Re-encode the first `keep_seconds` of `input` as 128 kbps mp3 at `output`.
pub fn trim_encode(input: &Path, output: &Path, keep_seconds: u64) -> Result<(), WorkerError> {
    let ffmpeg = find_ffmpeg()?;
    log::info!(
        "Trimming {:?} to first {}s, re-encoding as mp3/128k",
        input,
        keep_seconds
    );

    let result = Command::new(&ffmpeg)
        .arg("-y")
        .arg("-i")
        .arg(input)
        .args(["-t", &keep_seconds.to_string()])
        .args(["-vn", "-codec:a", "libmp3lame", "-b:a", "128k"])
        .arg(output)
        .output()
        .map_err(|e| WorkerError::preprocessing(format!("Failed to run ffmpeg: {}", e)))?;

    if !result.status.success() {
        return Err(WorkerError::Preprocessing {
            message: "ffmpeg failed to re-encode audio".to_string(),
            details: Some(String::from_utf8_lossy(&result.stderr).trim().to_string()),
        });
    }
    Ok(())
}

//! Transcript data types shared across backends and modes.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// One unit of audio to process. Immutable once created; owned by the mode
/// dispatcher for the duration of a single request.
#[derive(Debug, Clone)]
pub struct WorkItem {
    pub path: PathBuf,
    pub chunk_id: Option<String>,
    pub language: Option<String>,
    pub model: Option<String>,
}

/// A timestamped span of transcript text, offsets in seconds from the start
/// of the recording. `0 <= start <= end` always holds; consumers must not
/// assume segments never overlap.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    pub start: f64,
    pub end: f64,
    pub text: String,
}

/// The normalized result shape both backends produce.
#[derive(Debug, Clone, Serialize)]
pub struct TranscriptionResult {
    pub text: String,
    pub language: String,
    pub segments: Vec<Segment>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f32>,
}

/// A backend segment before normalization. Providers may omit fields;
/// missing numerics default to zero and missing text to the empty string.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawSegment {
    #[serde(default)]
    pub start: f64,
    #[serde(default)]
    pub end: f64,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub avg_logprob: Option<f32>,
}

/// Normalize backend segments into the canonical shape: non-negative start,
/// `end >= start`, trimmed text, non-decreasing start order.
pub fn normalize_segments(raw: &[RawSegment]) -> Vec<Segment> {
    let mut segments: Vec<Segment> = raw
        .iter()
        .map(|s| {
            let start = s.start.max(0.0);
            Segment {
                start,
                end: s.end.max(start),
                text: s.text.trim().to_string(),
            }
        })
        .collect();
    segments.sort_by(|a, b| {
        a.start
            .partial_cmp(&b.start)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    segments
}

/// Mean confidence over segments that report `avg_logprob`, each mapped
/// through `clamp(avg_logprob + 1.0, 0.0, 1.0)`. Segments without the value
/// are excluded; 0.0 when none report it.
pub fn aggregate_confidence(raw: &[RawSegment]) -> f32 {
    let mut total = 0.0f32;
    let mut count = 0u32;
    for segment in raw {
        if let Some(avg_logprob) = segment.avg_logprob {
            total += (avg_logprob + 1.0).clamp(0.0, 1.0);
            count += 1;
        }
    }
    if count > 0 {
        total / count as f32
    } else {
        0.0
    }
}

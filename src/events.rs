//! The stdout event protocol.
//!
//! Every event is one JSON object on its own line, flushed immediately so a
//! supervising process can react without waiting for the worker to exit.
//! stdout carries events only; all logging goes to stderr.

use std::io::Write;
use std::sync::{Arc, Mutex};

use serde::Serialize;

use crate::types::Segment;

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    Progress {
        progress: u8,
        message: String,
    },
    Result(ResultPayload),
    ChunkResult {
        chunk_id: String,
        text: String,
        language: String,
        segments: Vec<Segment>,
        #[serde(skip_serializing_if = "Option::is_none")]
        confidence: Option<f32>,
    },
    ChunkError {
        chunk_id: String,
        error: String,
    },
    Error {
        error: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        details: Option<String>,
    },
    ModelReady {
        model_name: String,
    },
    ModelShutdown {
        model_name: String,
    },
    Cancelled {
        reason: String,
    },
}

/// The two shapes carried under the `result` tag: a transcription or a
/// notes (title/summary) payload.
#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum ResultPayload {
    Transcription {
        text: String,
        language: String,
        segments: Vec<Segment>,
        #[serde(skip_serializing_if = "Option::is_none")]
        confidence: Option<f32>,
    },
    Notes {
        title: String,
        summary: String,
    },
}

impl Event {
    pub fn progress(progress: u8, message: impl Into<String>) -> Self {
        Event::Progress {
            progress,
            message: message.into(),
        }
    }
}

/// Writes events to stdout, one line per event. Cloneable so the progress
/// task and the mode dispatcher can share one sink.
#[derive(Clone)]
pub struct EventEmitter {
    sink: Option<Arc<Mutex<Vec<u8>>>>,
}

impl EventEmitter {
    pub fn new() -> Self {
        EventEmitter { sink: None }
    }

    /// An emitter that appends to an in-memory buffer instead of stdout.
    #[cfg(test)]
    pub fn capture() -> (Self, Arc<Mutex<Vec<u8>>>) {
        let buffer = Arc::new(Mutex::new(Vec::new()));
        (
            EventEmitter {
                sink: Some(buffer.clone()),
            },
            buffer,
        )
    }

    pub fn emit(&self, event: &Event) {
        let line = match serde_json::to_string(event) {
            Ok(line) => line,
            Err(e) => {
                log::error!("Failed to serialize event: {}", e);
                return;
            }
        };
        log::debug!("event: {}", line);
        match &self.sink {
            Some(buffer) => {
                if let Ok(mut buffer) = buffer.lock() {
                    let _ = writeln!(buffer, "{}", line);
                }
            }
            None => {
                let stdout = std::io::stdout();
                let mut handle = stdout.lock();
                let _ = writeln!(handle, "{}", line);
                let _ = handle.flush();
            }
        }
    }

    pub fn emit_progress(&self, progress: u8, message: impl Into<String>) {
        self.emit(&Event::progress(progress, message));
    }
}

impl Default for EventEmitter {
    fn default() -> Self {
        Self::new()
    }
}

/// Parse a capture buffer back into JSON values, one per emitted line.
#[cfg(test)]
pub fn captured_lines(buffer: &Arc<Mutex<Vec<u8>>>) -> Vec<serde_json::Value> {
    let buffer = buffer.lock().unwrap();
    String::from_utf8(buffer.clone())
        .unwrap()
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn progress_event_wire_shape() {
        let json = serde_json::to_value(Event::progress(42, "Transcribing...")).unwrap();
        assert_eq!(json["type"], "progress");
        assert_eq!(json["progress"], 42);
        assert_eq!(json["message"], "Transcribing...");
    }

    #[test]
    fn transcription_result_wire_shape() {
        let event = Event::Result(ResultPayload::Transcription {
            text: "hello".to_string(),
            language: "en".to_string(),
            segments: vec![Segment {
                start: 0.0,
                end: 1.5,
                text: "hello".to_string(),
            }],
            confidence: Some(0.9),
        });
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "result");
        assert_eq!(json["text"], "hello");
        assert_eq!(json["language"], "en");
        assert_eq!(json["segments"][0]["end"], 1.5);
        assert!((json["confidence"].as_f64().unwrap() - 0.9).abs() < 1e-6);
    }

    #[test]
    fn notes_result_wire_shape() {
        let event = Event::Result(ResultPayload::Notes {
            title: "Standup".to_string(),
            summary: "Short.".to_string(),
        });
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "result");
        assert_eq!(json["title"], "Standup");
        assert_eq!(json["summary"], "Short.");
    }

    #[test]
    fn confidence_omitted_when_none() {
        let event = Event::Result(ResultPayload::Transcription {
            text: String::new(),
            language: "en".to_string(),
            segments: vec![],
            confidence: None,
        });
        let json = serde_json::to_string(&event).unwrap();
        assert!(!json.contains("confidence"));
    }

    #[test]
    fn lifecycle_event_tags() {
        let ready = serde_json::to_value(Event::ModelReady {
            model_name: "tiny".to_string(),
        })
        .unwrap();
        assert_eq!(ready["type"], "model_ready");

        let shutdown = serde_json::to_value(Event::ModelShutdown {
            model_name: "tiny".to_string(),
        })
        .unwrap();
        assert_eq!(shutdown["type"], "model_shutdown");

        let chunk_err = serde_json::to_value(Event::ChunkError {
            chunk_id: "chunk_3".to_string(),
            error: "boom".to_string(),
        })
        .unwrap();
        assert_eq!(chunk_err["type"], "chunk_error");
        assert_eq!(chunk_err["chunk_id"], "chunk_3");
    }

    #[test]
    fn capture_emitter_records_lines_in_order() {
        let (emitter, buffer) = EventEmitter::capture();
        emitter.emit_progress(0, "Starting");
        emitter.emit_progress(10, "Working");
        let lines = captured_lines(&buffer);
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["progress"], 0);
        assert_eq!(lines[1]["progress"], 10);
    }
}

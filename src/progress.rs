//! Time-based progress estimation for the backend phase.
//!
//! Whisper gives no usable mid-inference progress callback, so the worker
//! estimates: expected runtime is audio duration divided by a per-model
//! speed factor, and a background task maps elapsed time into the backend's
//! progress sub-range once per second. Values are cosmetic and never
//! represent completed work; the range never reaches the ceiling so the
//! real completion milestones stay distinguishable.

use tokio::task::JoinHandle;
use tokio::time::{Duration, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::events::EventEmitter;

/// Backend phase owns [30, 90) of the progress scale.
pub const BACKEND_FLOOR: u8 = 30;
pub const BACKEND_CEILING: u8 = 90;
/// Reported once the estimate is exhausted but the backend is still running.
pub const FINALIZING: u8 = 89;

const TICK: Duration = Duration::from_secs(1);

/// Rough realtime multiples per model family, used only for estimation.
pub fn speed_factor(identifier: &str) -> f64 {
    let base = identifier
        .trim_end_matches("-q5_0")
        .trim_end_matches("-q5_1")
        .trim_end_matches("-q8_0");
    let base = base.strip_suffix(".en").unwrap_or(base);
    match base {
        "tiny" => 10.0,
        "base" => 7.0,
        "small" => 4.0,
        "medium" => 2.0,
        "large-v3-turbo" => 3.0,
        "large" | "large-v2" | "large-v3" => 1.0,
        "whisper-1" => 8.0,
        _ => 2.0,
    }
}

/// Progress value for `elapsed` seconds of an `expected`-second run,
/// clamped into [BACKEND_FLOOR, FINALIZING].
pub fn value_at(elapsed: f64, expected: f64) -> u8 {
    let fraction = (elapsed / expected.max(0.001)).clamp(0.0, 1.0);
    let span = (BACKEND_CEILING - BACKEND_FLOOR) as f64;
    let value = BACKEND_FLOOR + (span * fraction) as u8;
    value.min(FINALIZING)
}

/// A running estimator task. Stop it before emitting any completion
/// milestone so no estimate line can follow the real result.
pub struct ProgressEstimator {
    cancel: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

impl ProgressEstimator {
    /// Spawn the ticking task. `speed` is the backend's realtime multiple.
    pub fn start(emitter: EventEmitter, audio_seconds: f64, speed: f64) -> Self {
        let expected = (audio_seconds / speed.max(0.1)).max(1.0);
        let cancel = CancellationToken::new();
        let task_cancel = cancel.clone();

        let handle = tokio::spawn(async move {
            let started = Instant::now();
            let mut ticker = tokio::time::interval(TICK);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            // The first tick completes immediately; skip it so the first
            // estimate lands a full interval after the backend call starts.
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = task_cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        let elapsed = started.elapsed().as_secs_f64();
                        if elapsed < expected {
                            let remaining = (expected - elapsed).ceil() as u64;
                            emitter.emit_progress(
                                value_at(elapsed, expected),
                                format!("Transcribing... about {}s remaining", remaining),
                            );
                        } else {
                            emitter.emit_progress(FINALIZING, "Finalizing transcription...");
                        }
                    }
                }
            }
        });

        ProgressEstimator {
            cancel,
            handle: Some(handle),
        }
    }

    /// Cancel the task and wait for it to finish, guaranteeing no further
    /// progress lines are written after this returns.
    pub async fn stop(mut self) {
        self.cancel.cancel();
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }
}

impl Drop for ProgressEstimator {
    fn drop(&mut self) {
        self.cancel.cancel();
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

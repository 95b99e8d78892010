//! Step-based progress tracking.
//!
//! A [`ProgressTracker`] turns `(step, within-step percent)` pairs into
//! [`ProgressSnapshot`]s whose total percent follows
//! `((step - 1) + within / 100) / total_steps * 100`.
//!
//! While running the total never decreases. Cancelling is the one transition
//! allowed to report a lower value.

use serde::Serialize;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Immutable view of progress at one moment.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressSnapshot {
    /// Number of steps in the pipeline.
    pub total_steps: usize,
    /// 1-based index of the current step; 0 before the first update.
    pub current_step: usize,
    /// Percent complete within the current step, `[0, 100]`.
    pub step_percent: f64,
    /// Percent complete overall, `[0, 100]`.
    pub total_percent: f64,
    /// Human-readable message.
    pub message: String,
    /// Time since the tracker was created.
    pub elapsed: Duration,
    /// The pipeline finished.
    pub completed: bool,
    /// The pipeline was cancelled.
    pub cancelled: bool,
}

/// Compose a total percent from a step position.
///
/// Inputs outside their ranges are clamped.
pub fn compose(total_steps: usize, current_step: usize, step_percent: f64) -> f64 {
    if total_steps == 0 {
        return 0.0;
    }
    let step_percent = clamp_percent(step_percent);
    let step = current_step.clamp(1, total_steps) as f64;
    let total = ((step - 1.0) + step_percent / 100.0) / total_steps as f64 * 100.0;
    clamp_percent(total)
}

fn clamp_percent(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 100.0)
    }
}

#[derive(Debug)]
struct TrackerState {
    current_step: usize,
    step_percent: f64,
    total_percent: f64,
    message: String,
    completed: bool,
    cancelled: bool,
}

/// Thread-safe progress tracker for a fixed number of steps.
#[derive(Debug)]
pub struct ProgressTracker {
    total_steps: usize,
    started: Instant,
    state: Mutex<TrackerState>,
}

impl ProgressTracker {
    /// Create a tracker for `total_steps` steps.
    pub fn new(total_steps: usize) -> Self {
        Self {
            total_steps,
            started: Instant::now(),
            state: Mutex::new(TrackerState {
                current_step: 0,
                step_percent: 0.0,
                total_percent: 0.0,
                message: String::new(),
                completed: false,
                cancelled: false,
            }),
        }
    }

    /// Record a position and return the resulting snapshot.
    ///
    /// Ignored after completion or cancellation.
    pub fn update(&self, step: usize, step_percent: f64, message: impl Into<String>) -> ProgressSnapshot {
        let mut state = self.lock();
        if !state.completed && !state.cancelled {
            let total = compose(self.total_steps, step, step_percent);
            if total >= state.total_percent {
                state.current_step = step.clamp(1, self.total_steps.max(1));
                state.step_percent = clamp_percent(step_percent);
                state.total_percent = total;
            }
            state.message = message.into();
        }
        self.snapshot_of(&state)
    }

    /// Mark the pipeline complete at 100%.
    pub fn complete(&self, message: impl Into<String>) -> ProgressSnapshot {
        let mut state = self.lock();
        if !state.cancelled {
            state.current_step = self.total_steps;
            state.step_percent = 100.0;
            state.total_percent = 100.0;
            state.completed = true;
            state.message = message.into();
        }
        self.snapshot_of(&state)
    }

    /// Mark the pipeline cancelled.
    ///
    /// The total drops back to the start of the current step, the only
    /// decrease a tracker ever reports.
    pub fn cancel(&self, message: impl Into<String>) -> ProgressSnapshot {
        let mut state = self.lock();
        if !state.completed {
            state.cancelled = true;
            state.step_percent = 0.0;
            state.total_percent = compose(self.total_steps, state.current_step.max(1), 0.0);
            state.message = message.into();
        }
        self.snapshot_of(&state)
    }

    /// Current snapshot.
    pub fn snapshot(&self) -> ProgressSnapshot {
        let state = self.lock();
        self.snapshot_of(&state)
    }

    fn snapshot_of(&self, state: &TrackerState) -> ProgressSnapshot {
        ProgressSnapshot {
            total_steps: self.total_steps,
            current_step: state.current_step,
            step_percent: state.step_percent,
            total_percent: state.total_percent,
            message: state.message.clone(),
            elapsed: self.started.elapsed(),
            completed: state.completed,
            cancelled: state.cancelled,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, TrackerState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

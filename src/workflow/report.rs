//! Progress fan-in for one running job.

use serde::Serialize;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::trace;

use super::Stage;
use crate::job::{JobId, JobStore};
use crate::notify::NotificationBus;
use crate::progress::ProgressTracker;
use crate::strategy::{ProgressFn, Strategy};

/// Summary of a completed merge.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MergeReport {
    /// Job that produced the output.
    pub job_id: JobId,
    /// Strategy used for the Merging stage.
    pub strategy: Strategy,
    /// Number of inputs.
    pub input_count: usize,
    /// Pages across all inputs.
    pub total_pages: usize,
    /// Bytes across all inputs.
    pub input_bytes: u64,
    /// Size of the output.
    pub output_bytes: u64,
    /// Output path.
    pub output: PathBuf,
    /// Wall time from start to finalization.
    pub elapsed: Duration,
}

/// Routes stage progress to the job store, the tracker and the bus.
///
/// The overall fraction never decreases: a retried stage that restarts its
/// band is reported at the previous high-water mark.
///
/// The store and the bus carry the weighted stage bands of [`Stage::band`].
/// The tracker counts the five stages as equal steps, so its total is a
/// step position rather than the published job percent.
pub(crate) struct ProgressReporter {
    job_id: JobId,
    store: Arc<JobStore>,
    bus: Arc<NotificationBus>,
    tracker: Arc<ProgressTracker>,
    high: Mutex<f64>,
}

impl ProgressReporter {
    pub(crate) fn new(
        job_id: JobId,
        store: Arc<JobStore>,
        bus: Arc<NotificationBus>,
        tracker: Arc<ProgressTracker>,
    ) -> Self {
        Self {
            job_id,
            store,
            bus,
            tracker,
            high: Mutex::new(0.0),
        }
    }

    /// Report `within` (fraction of `stage`) with a detail line.
    pub(crate) fn stage(&self, stage: Stage, within: f64, detail: &str) {
        let fraction = {
            let mut high = self.high.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            *high = high.max(stage.fraction(within));
            *high
        };

        if let Err(e) = self.store.update_progress(self.job_id, fraction * 100.0) {
            trace!(job_id = %self.job_id, error = %e, "Progress not recorded");
        }
        self.tracker
            .update(stage.step(), within.clamp(0.0, 1.0) * 100.0, detail);
        self.bus.progress(fraction, stage.name(), detail);
    }

    /// A sink for strategy progress within `stage`.
    pub(crate) fn sink(self: &Arc<Self>, stage: Stage) -> ProgressFn {
        let reporter = Arc::clone(self);
        Arc::new(move |within: f64, detail: &str| reporter.stage(stage, within, detail))
    }
}

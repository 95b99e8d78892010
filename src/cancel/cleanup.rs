//! Cleanup tasks run by the cancellation registry.
//!
//! Every task must be idempotent: the registry runs the list when a job is
//! cancelled and again when the job reaches a terminal state.

use std::fmt;
use std::sync::{Arc, Mutex};
use tracing::debug;

use crate::error::{MergeError, Result};
use crate::job::{JobError, JobId, JobStore};
use crate::memory::MemoryMonitor;
use crate::ops::FileOps;

/// A named, idempotent release effect.
pub trait CleanupTask: Send + Sync {
    /// What the task releases, for logs.
    fn description(&self) -> String;

    /// Perform the release.
    fn run(&self) -> Result<()>;
}

impl fmt::Debug for dyn CleanupTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.description())
    }
}

/// Deletes every scratch file the file ops handed out.
pub struct TempFileSweep {
    file_ops: Arc<dyn FileOps>,
}

impl TempFileSweep {
    /// Sweep scratch files owned by `file_ops`.
    pub fn new(file_ops: Arc<dyn FileOps>) -> Self {
        Self { file_ops }
    }
}

impl CleanupTask for TempFileSweep {
    fn description(&self) -> String {
        "temp-file sweep".into()
    }

    fn run(&self) -> Result<()> {
        let removed = self.file_ops.cleanup_temp_files()?;
        debug!(removed, "Swept temp files");
        Ok(())
    }
}

/// Issues a memory reclamation hint.
pub struct ReclaimHint {
    monitor: Arc<MemoryMonitor>,
}

impl ReclaimHint {
    /// Reclaim through `monitor`.
    pub fn new(monitor: Arc<MemoryMonitor>) -> Self {
        Self { monitor }
    }
}

impl CleanupTask for ReclaimHint {
    fn description(&self) -> String {
        "memory reclamation hint".into()
    }

    fn run(&self) -> Result<()> {
        self.monitor.reclaim();
        Ok(())
    }
}

/// Marks the job Failed with "cancelled by user" unless it is terminal.
pub struct FinalizeJobState {
    store: Arc<JobStore>,
    job_id: JobId,
}

impl FinalizeJobState {
    /// Finalize `job_id` in `store`.
    pub fn new(store: Arc<JobStore>, job_id: JobId) -> Self {
        Self { store, job_id }
    }
}

impl CleanupTask for FinalizeJobState {
    fn description(&self) -> String {
        format!("finalize state of {}", self.job_id)
    }

    fn run(&self) -> Result<()> {
        if self.store.fail_if_active(self.job_id, JobError::cancelled()) {
            debug!(job_id = %self.job_id, "Job marked failed on cleanup");
        }
        Ok(())
    }
}

type Release = Box<dyn FnOnce() -> Result<()> + Send>;

/// A named list of one-shot release effects.
///
/// Each effect runs once; later runs find the list empty.
pub struct ResourceDisposal {
    name: String,
    releases: Mutex<Vec<Release>>,
}

impl ResourceDisposal {
    /// Create an empty disposal list.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            releases: Mutex::new(Vec::new()),
        }
    }

    /// Queue a release effect.
    pub fn push(&self, release: impl FnOnce() -> Result<()> + Send + 'static) {
        self.lock().push(Box::new(release));
    }

    /// Effects not yet run.
    pub fn pending(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<Release>> {
        self.releases.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl CleanupTask for ResourceDisposal {
    fn description(&self) -> String {
        format!("dispose {}", self.name)
    }

    fn run(&self) -> Result<()> {
        let releases = std::mem::take(&mut *self.lock());
        let mut failures = Vec::new();
        for release in releases {
            if let Err(e) = release() {
                failures.push(e.to_string());
            }
        }
        if failures.is_empty() {
            Ok(())
        } else {
            Err(MergeError::other(format!(
                "{}: {}",
                self.name,
                failures.join("; ")
            )))
        }
    }
}

/// A cleanup task built from a closure.
pub struct FnCleanup<F> {
    description: String,
    effect: F,
}

impl<F> FnCleanup<F>
where
    F: Fn() -> Result<()> + Send + Sync,
{
    /// Wrap `effect` under `description`.
    pub fn new(description: impl Into<String>, effect: F) -> Self {
        Self {
            description: description.into(),
            effect,
        }
    }
}

impl<F> CleanupTask for FnCleanup<F>
where
    F: Fn() -> Result<()> + Send + Sync,
{
    fn description(&self) -> String {
        self.description.clone()
    }

    fn run(&self) -> Result<()> {
        (self.effect)()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::{JobRequest, JobStatus};
    use crate::memory::StaticMemoryProbe;
    use crate::ops::LocalFileOps;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tempfile::TempDir;

    #[test]
    fn test_temp_file_sweep_is_idempotent() {
        let root = TempDir::new().unwrap();
        let ops = Arc::new(LocalFileOps::new(root.path()));
        let (path, _) = ops.create_temp_file("preprocessed_", ".pdf").unwrap();

        let task = TempFileSweep::new(ops.clone());
        task.run().unwrap();
        task.run().unwrap();
        assert!(!path.exists());
        assert_eq!(ops.temp_file_count(), 0);
    }

    #[test]
    fn test_finalize_marks_active_job_failed() {
        let store = Arc::new(JobStore::new());
        let id = store
            .submit(JobRequest::new("a.pdf", vec![PathBuf::from("b.pdf")], "o.pdf"))
            .unwrap();
        store.mark_running(id).unwrap();

        let task = FinalizeJobState::new(Arc::clone(&store), id);
        task.run().unwrap();
        task.run().unwrap();

        let snap = store.current().unwrap();
        assert_eq!(snap.status, JobStatus::Failed);
        let err = snap.error.unwrap();
        assert!(err.is_cancelled());
        assert!(err.message.contains("cancelled by user"));
    }

    #[test]
    fn test_finalize_leaves_completed_job_alone() {
        let store = Arc::new(JobStore::new());
        let id = store
            .submit(JobRequest::new("a.pdf", vec![PathBuf::from("b.pdf")], "o.pdf"))
            .unwrap();
        store.mark_running(id).unwrap();
        store.mark_completed(id).unwrap();

        FinalizeJobState::new(Arc::clone(&store), id).run().unwrap();
        assert_eq!(store.current().unwrap().status, JobStatus::Completed);
    }

    #[test]
    fn test_reclaim_hint_counts() {
        let monitor = Arc::new(MemoryMonitor::new(
            Arc::new(StaticMemoryProbe::new(0)),
            100,
            Duration::from_secs(1),
        ));
        ReclaimHint::new(Arc::clone(&monitor)).run().unwrap();
        assert_eq!(monitor.reclaim_count(), 1);
    }

    #[test]
    fn test_resource_disposal_runs_each_release_once() {
        let hits = Arc::new(AtomicUsize::new(0));
        let disposal = ResourceDisposal::new("buffers");
        for _ in 0..3 {
            let hits = Arc::clone(&hits);
            disposal.push(move || {
                hits.fetch_add(1, Ordering::SeqCst);
                Ok(())
            });
        }
        disposal.push(|| Err(MergeError::io("handle already closed")));

        let err = disposal.run().unwrap_err();
        assert!(err.to_string().contains("handle already closed"));
        assert_eq!(hits.load(Ordering::SeqCst), 3);

        disposal.run().unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 3);
        assert_eq!(disposal.pending(), 0);
    }
}

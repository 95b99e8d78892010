//! The staged merge workflow.
//!
//! [`WorkflowDriver::run`] takes one submitted job through the five
//! [`Stage`]s in order. Each stage runs under the job's cancellation token
//! and is retried per [`RetryPolicy`]. The driver is the only writer of the
//! job's status; it reports upward through the [`NotificationBus`] and never
//! holds a reference back from the components it drives.
//!
//! On every exit path the driver:
//!
//! 1. records the terminal status in the [`JobStore`]
//! 2. releases the job's cleanup list in the [`CancellationRegistry`]
//! 3. emits exactly one terminal event (completion or error)
//! 4. re-enables the UI

pub mod retry;
mod report;
mod stage;

pub use report::MergeReport;
pub use retry::RetryPolicy;
pub use stage::Stage;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::cancel::CancellationRegistry;
use crate::config::Config;
use crate::error::{ErrorKind, MergeError, Result};
use crate::job::{JobError, JobId, JobStore, MergeMode};
use crate::memory::MemoryMonitor;
use crate::notify::NotificationBus;
use crate::ops::{FileOps, PdfOps};
use crate::progress::ProgressTracker;
use crate::strategy::{MergeContext, MergeSettings, ScratchFiles, Strategy, StrategySelector};
use crate::utils::{format_file_size, run_blocking};
use crate::validation::{FileEntry, Validator};
use report::ProgressReporter;

/// Prefix of the write probe created in the output directory.
const WRITE_PROBE_PREFIX: &str = ".pdfmerge-probe-";

/// Mutable state threaded through the stages of one run.
struct Run {
    job_id: JobId,
    token: CancellationToken,
    reporter: Arc<ProgressReporter>,
    scratch: Arc<ScratchFiles>,
    mode: MergeMode,
    inputs: Vec<PathBuf>,
    output: PathBuf,
    entries: Vec<FileEntry>,
    merge_inputs: Vec<PathBuf>,
    input_bytes: u64,
    strategy: Option<Strategy>,
    output_bytes: u64,
}

impl Run {
    fn check_cancelled(&self) -> Result<()> {
        if self.token.is_cancelled() {
            Err(MergeError::Cancelled)
        } else {
            Ok(())
        }
    }

    fn report(&self, stage: Stage, within: f64, detail: &str) {
        self.reporter.stage(stage, within, detail);
    }
}

/// Runs the staged pipeline for one job.
pub struct WorkflowDriver {
    store: Arc<JobStore>,
    registry: Arc<CancellationRegistry>,
    bus: Arc<NotificationBus>,
    monitor: Arc<MemoryMonitor>,
    pdf_ops: Arc<dyn PdfOps>,
    file_ops: Arc<dyn FileOps>,
    selector: StrategySelector,
    retry: RetryPolicy,
    config: Config,
    tracker: Arc<ProgressTracker>,
}

impl std::fmt::Debug for WorkflowDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkflowDriver")
            .field("selector", &self.selector)
            .field("retry", &self.retry)
            .finish()
    }
}

impl WorkflowDriver {
    /// Create a driver wired to the engine's components.
    pub fn new(
        store: Arc<JobStore>,
        registry: Arc<CancellationRegistry>,
        bus: Arc<NotificationBus>,
        monitor: Arc<MemoryMonitor>,
        pdf_ops: Arc<dyn PdfOps>,
        file_ops: Arc<dyn FileOps>,
        config: Config,
    ) -> Self {
        let selector = StrategySelector::new(
            Arc::clone(&pdf_ops),
            Arc::clone(&file_ops),
            Arc::clone(&monitor),
            Arc::clone(&registry),
            MergeSettings::from(&config.engine),
        );
        Self {
            store,
            registry,
            bus,
            monitor,
            pdf_ops,
            file_ops,
            selector,
            retry: RetryPolicy::from_settings(&config.engine),
            config,
            tracker: Arc::new(ProgressTracker::new(Stage::ALL.len())),
        }
    }

    /// Progress tracker fed by this driver.
    pub fn tracker(&self) -> Arc<ProgressTracker> {
        Arc::clone(&self.tracker)
    }

    /// Run the job to a terminal state.
    ///
    /// # Errors
    ///
    /// Returns the error the job failed with: the failing stage's error
    /// annotated with the stage, or `Cancelled`.
    pub async fn run(&self, job_id: JobId, token: CancellationToken) -> Result<MergeReport> {
        let started = Instant::now();
        self.bus.begin_job();
        self.bus.ui_state(false);

        let outcome = self.execute(job_id, token, started).await;
        let outcome = self.finish(job_id, outcome);

        self.monitor.stop();
        self.bus.ui_state(true);
        outcome
    }

    async fn execute(&self, job_id: JobId, token: CancellationToken, started: Instant) -> Result<MergeReport> {
        let snapshot = self
            .store
            .current()
            .filter(|job| job.id == job_id)
            .ok_or(MergeError::UnknownJob { job_id })?;

        if token.is_cancelled() {
            return Err(MergeError::Cancelled);
        }
        self.store.mark_running(job_id)?;
        self.monitor.start();
        info!(job_id = %job_id, inputs = snapshot.inputs().len(), output = %snapshot.output.display(), "Job started");

        let scratch = Arc::new(ScratchFiles::new(Arc::clone(&self.file_ops), "decryption"));
        self.registry.add_cleanup(scratch.clone());

        let mut run = Run {
            job_id,
            token,
            reporter: Arc::new(ProgressReporter::new(
                job_id,
                Arc::clone(&self.store),
                Arc::clone(&self.bus),
                Arc::clone(&self.tracker),
            )),
            scratch: Arc::clone(&scratch),
            mode: snapshot.mode,
            inputs: snapshot.inputs(),
            output: snapshot.output.clone(),
            entries: Vec::new(),
            merge_inputs: Vec::new(),
            input_bytes: 0,
            strategy: None,
            output_bytes: 0,
        };

        let result = self.run_stages(&mut run).await;
        scratch.purge();
        result?;

        Ok(MergeReport {
            job_id,
            strategy: run.strategy.unwrap_or(Strategy::Direct),
            input_count: run.entries.len(),
            total_pages: run.entries.iter().map(FileEntry::page_count).sum(),
            input_bytes: run.input_bytes,
            output_bytes: run.output_bytes,
            output: run.output,
            elapsed: started.elapsed(),
        })
    }

    async fn run_stages(&self, run: &mut Run) -> Result<()> {
        for stage in Stage::ALL {
            run.check_cancelled()?;
            self.run_stage(stage, run).await?;
        }
        Ok(())
    }

    /// Run one stage with retries.
    async fn run_stage(&self, stage: Stage, run: &mut Run) -> Result<()> {
        let mut attempt = 1;
        loop {
            run.check_cancelled()?;
            debug!(job_id = %run.job_id, stage = %stage, attempt, "Stage started");
            run.report(stage, 0.0, &format!("{stage} started"));

            let err = match self.attempt_stage(stage, run).await {
                Ok(()) => {
                    run.report(stage, 1.0, &format!("{stage} complete"));
                    return Ok(());
                }
                Err(e) if e.is_cancelled() => return Err(e),
                Err(e) => e,
            };

            if !self.retry.should_retry(&err, attempt) {
                warn!(job_id = %run.job_id, stage = %stage, attempt, error = %err, "Stage failed");
                return Err(err.in_stage(stage));
            }

            warn!(
                job_id = %run.job_id,
                stage = %stage,
                attempt,
                delay_ms = self.retry.delay_for(attempt).as_millis() as u64,
                error = %err,
                "Stage failed, retrying"
            );
            if err.kind() == ErrorKind::OutOfMemory {
                self.monitor.reclaim();
            }
            self.retry.backoff(attempt, &run.token).await?;
            attempt += 1;
        }
    }

    async fn attempt_stage(&self, stage: Stage, run: &mut Run) -> Result<()> {
        match stage {
            Stage::Validation => self.validate(run).await,
            Stage::Preparation => self.prepare(run).await,
            Stage::Decryption => self.decrypt(run).await,
            Stage::Merging => self.merge(run).await,
            Stage::Finalization => self.finalize(run).await,
        }
    }

    async fn validate(&self, run: &mut Run) -> Result<()> {
        if let Some(clash) = run.inputs.iter().find(|input| same_file(input, &run.output)) {
            return Err(MergeError::invalid_input(format!(
                "output path must differ from every input: {}",
                clash.display()
            )));
        }

        let validator = Validator::new(Arc::clone(&self.pdf_ops));
        let total = run.inputs.len();
        let mut entries = Vec::with_capacity(total);
        for (order, path) in run.inputs.iter().enumerate() {
            run.check_cancelled()?;
            let (validator, path) = (validator.clone(), path.clone());
            let entry = run_blocking(move || validator.validate_file(&path, order)).await?;
            run.report(
                Stage::Validation,
                (order + 1) as f64 / total as f64,
                &format!("validated {}", entry.name()),
            );
            entries.push(entry);
        }
        run.entries = entries;
        Ok(())
    }

    async fn prepare(&self, run: &mut Run) -> Result<()> {
        let parent = run
            .output
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or(Path::new("."))
            .to_path_buf();

        let file_ops = Arc::clone(&self.file_ops);
        run_blocking(move || {
            file_ops.ensure_dir_exists(&parent)?;
            // create-then-delete; the probe is removed on drop
            tempfile::Builder::new()
                .prefix(WRITE_PROBE_PREFIX)
                .tempfile_in(&parent)
                .map(drop)
                .map_err(|e| MergeError::from_io_at(&parent, e))
        })
        .await?;

        run.input_bytes = run.entries.iter().map(FileEntry::size).sum();
        run.report(
            Stage::Preparation,
            1.0,
            &format!("{} to merge", format_file_size(run.input_bytes)),
        );
        Ok(())
    }

    async fn decrypt(&self, run: &mut Run) -> Result<()> {
        let total = run.entries.len();
        let mut merge_inputs = Vec::with_capacity(total);
        let mut unresolved = Vec::new();

        for (i, entry) in run.entries.iter().enumerate() {
            run.check_cancelled()?;
            if !entry.is_encrypted() {
                merge_inputs.push(entry.path().to_path_buf());
                continue;
            }

            let unlocked = if self.config.auto_decrypt {
                self.try_passwords(entry.path(), &run.scratch).await?
            } else {
                None
            };
            match unlocked {
                Some(copy) => {
                    info!(job_id = %run.job_id, file = %entry.name(), "Decrypted with a common password");
                    merge_inputs.push(copy);
                }
                None => unresolved.push(entry.path().to_path_buf()),
            }
            run.report(
                Stage::Decryption,
                (i + 1) as f64 / total.max(1) as f64,
                &format!("checked {}", entry.name()),
            );
        }

        if !unresolved.is_empty() {
            return Err(MergeError::encrypted(unresolved));
        }
        run.merge_inputs = merge_inputs;
        Ok(())
    }

    /// Try each configured password; returns the decrypted copy on success.
    async fn try_passwords(&self, path: &Path, scratch: &ScratchFiles) -> Result<Option<PathBuf>> {
        if self.config.common_passwords.is_empty() {
            return Ok(None);
        }
        let target = scratch.create("decrypted_")?;
        for password in &self.config.common_passwords {
            let pdf_ops = Arc::clone(&self.pdf_ops);
            let (src, dst, password) = (path.to_path_buf(), target.clone(), password.clone());
            if run_blocking(move || pdf_ops.decrypt(&src, &password, &dst)).await? {
                return Ok(Some(target));
            }
        }
        Ok(None)
    }

    async fn merge(&self, run: &mut Run) -> Result<()> {
        let ctx = MergeContext::new(run.job_id, run.token.clone())
            .with_progress(run.reporter.sink(Stage::Merging));

        let strategy = match run.mode {
            MergeMode::Batched => {
                self.selector
                    .merge_batched(&ctx, &run.merge_inputs, &run.output)
                    .await?
            }
            MergeMode::Auto => {
                let (main, additional) = run
                    .merge_inputs
                    .split_first()
                    .ok_or_else(|| MergeError::invalid_input("nothing to merge"))?;
                self.selector.merge(&ctx, main, additional, &run.output).await?
            }
        };

        info!(job_id = %run.job_id, %strategy, "Merge finished");
        run.strategy = Some(strategy);
        Ok(())
    }

    async fn finalize(&self, run: &mut Run) -> Result<()> {
        let (pdf_ops, output) = (Arc::clone(&self.pdf_ops), run.output.clone());
        run_blocking(move || pdf_ops.validate(&output)).await?;
        run.output_bytes = self.file_ops.info(&run.output)?.size;

        match self.file_ops.cleanup_temp_files() {
            Ok(removed) => debug!(job_id = %run.job_id, removed, "Temp files cleaned up"),
            Err(e) => warn!(job_id = %run.job_id, error = %e, "Temp file cleanup failed"),
        }

        run.report(
            Stage::Finalization,
            1.0,
            &format!("wrote {}", format_file_size(run.output_bytes)),
        );
        Ok(())
    }

    /// Record the terminal state, release cleanup, and emit the terminal event.
    fn finish(&self, job_id: JobId, outcome: Result<MergeReport>) -> Result<MergeReport> {
        let outcome = match outcome {
            Ok(report) => match self.store.mark_completed(job_id) {
                Ok(()) => Ok(report),
                // finalized by a cancel that raced the last stage
                Err(_) => Err(MergeError::Cancelled),
            },
            Err(e) => Err(e),
        };

        match outcome {
            Ok(report) => {
                self.tracker.complete("merge complete");
                self.registry.release(job_id);
                info!(
                    job_id = %job_id,
                    strategy = %report.strategy,
                    inputs = report.input_count,
                    pages = report.total_pages,
                    output_bytes = report.output_bytes,
                    elapsed_ms = report.elapsed.as_millis() as u64,
                    "Job completed"
                );
                self.bus.completion(&report.output);
                Ok(report)
            }
            Err(err) => {
                let job_error = JobError::from(&err);
                if err.is_cancelled() {
                    self.tracker.cancel("cancelled by user");
                }
                match self.store.mark_failed(job_id, job_error.clone()) {
                    Ok(()) => {}
                    Err(e) if e.kind() == ErrorKind::InvalidState => {
                        debug!(job_id = %job_id, "Job already finalized");
                    }
                    Err(e) => warn!(job_id = %job_id, error = %e, "Failed to record job failure"),
                }
                self.registry.release(job_id);

                if err.is_cancelled() {
                    info!(job_id = %job_id, "Job cancelled");
                } else {
                    error!(job_id = %job_id, kind = %err.kind(), error = %err, "Job failed");
                }
                self.bus.error(&job_error);
                Err(err)
            }
        }
    }
}

/// Whether two paths name the same file.
fn same_file(a: &Path, b: &Path) -> bool {
    match (std::fs::canonicalize(a), std::fs::canonicalize(b)) {
        (Ok(a), Ok(b)) => a == b,
        _ => a == b,
    }
}

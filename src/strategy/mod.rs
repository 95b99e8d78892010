//! Strategy selection for the Merging stage.
//!
//! The selector picks one of three execution paths:
//!
//! - **Direct**: memory use is under 70% of budget; hand the inputs straight
//!   to [`PdfOps::merge`]
//! - **Streaming**: otherwise; stage large inputs into scratch copies, merge
//!   structurally into a scratch document, then copy it to the output in
//!   chunks while watching memory
//! - **Batched**: the batch interface got more inputs than one batch holds;
//!   merge contiguous batches into scratch files under bounded concurrency,
//!   then merge those with the same selector
//!
//! Every scratch file is registered for cleanup when it is created and is
//! removed on success, failure and cancellation alike.

mod batch;
mod streaming;

pub use streaming::ScratchFiles;

use serde::Serialize;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::cancel::CancellationRegistry;
use crate::config::EngineSettings;
use crate::error::{MergeError, Result};
use crate::job::JobId;
use crate::memory::MemoryMonitor;
use crate::ops::{FileOps, MergeObserver, PdfOps};
use crate::utils::run_blocking;

/// Execution path used for the Merging stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Strategy {
    /// Single library merge.
    Direct,
    /// Chunked, memory-aware merge.
    Streaming,
    /// Batches merged separately, then combined.
    Batched,
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Direct => "direct",
            Self::Streaming => "streaming",
            Self::Batched => "batched",
        };
        f.write_str(name)
    }
}

/// Strategy tuning derived from [`EngineSettings`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MergeSettings {
    /// Bytes per streaming copy step.
    pub chunk_size: usize,
    /// Inputs per batch.
    pub batch_size: usize,
    /// Batches merged at once.
    pub max_concurrency: usize,
}

impl From<&EngineSettings> for MergeSettings {
    fn from(settings: &EngineSettings) -> Self {
        Self {
            chunk_size: settings.chunk_size.max(1),
            batch_size: settings.batch_size.max(2),
            max_concurrency: settings.max_concurrency.max(1),
        }
    }
}

impl Default for MergeSettings {
    fn default() -> Self {
        Self::from(&EngineSettings::default())
    }
}

/// Progress sink receiving `(fraction of the Merging stage, detail)`.
pub type ProgressFn = Arc<dyn Fn(f64, &str) + Send + Sync>;

/// Per-merge context: job identity, cancellation and progress.
#[derive(Clone)]
pub struct MergeContext {
    job_id: JobId,
    token: CancellationToken,
    progress: Option<ProgressFn>,
}

impl fmt::Debug for MergeContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MergeContext")
            .field("job_id", &self.job_id)
            .field("cancelled", &self.token.is_cancelled())
            .finish()
    }
}

impl MergeContext {
    /// Create a context without a progress sink.
    pub fn new(job_id: JobId, token: CancellationToken) -> Self {
        Self {
            job_id,
            token,
            progress: None,
        }
    }

    /// Attach a progress sink.
    pub fn with_progress(mut self, progress: ProgressFn) -> Self {
        self.progress = Some(progress);
        self
    }

    /// Same job and token, no progress sink.
    pub fn without_progress(&self) -> Self {
        Self::new(self.job_id, self.token.clone())
    }

    /// Same job and token; progress mapped into `[start, end]`.
    pub fn scaled(&self, start: f64, end: f64) -> Self {
        let Some(parent) = self.progress.clone() else {
            return self.without_progress();
        };
        let progress: ProgressFn = Arc::new(move |fraction: f64, detail: &str| {
            parent(start + (end - start) * fraction.clamp(0.0, 1.0), detail)
        });
        self.without_progress().with_progress(progress)
    }

    /// Job the merge belongs to.
    pub fn job_id(&self) -> JobId {
        self.job_id
    }

    /// Cancellation token.
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Report progress within the Merging stage.
    pub fn report(&self, fraction: f64, detail: &str) {
        if let Some(progress) = &self.progress {
            progress(fraction.clamp(0.0, 1.0), detail);
        }
    }

    /// Fail with `Cancelled` if the token fired.
    pub fn check_cancelled(&self) -> Result<()> {
        if self.token.is_cancelled() {
            Err(MergeError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Sleep unless cancelled first.
    pub async fn pause(&self, duration: std::time::Duration) -> Result<()> {
        tokio::select! {
            _ = self.token.cancelled() => Err(MergeError::Cancelled),
            _ = tokio::time::sleep(duration) => Ok(()),
        }
    }

    fn observer(&self, start: f64, end: f64) -> ContextObserver {
        ContextObserver {
            ctx: self.scaled(start, end),
        }
    }
}

/// Bridges [`MergeObserver`] callbacks from the PDF library to a context.
struct ContextObserver {
    ctx: MergeContext,
}

impl MergeObserver for ContextObserver {
    fn on_document(&self, done: usize, total: usize) {
        let fraction = done as f64 / total.max(1) as f64;
        self.ctx
            .report(fraction, &format!("merged {done} of {total} documents"));
    }

    fn is_cancelled(&self) -> bool {
        self.ctx.token.is_cancelled()
    }
}

/// Chooses and runs a merge strategy.
#[derive(Clone)]
pub struct StrategySelector {
    pdf_ops: Arc<dyn PdfOps>,
    file_ops: Arc<dyn FileOps>,
    monitor: Arc<MemoryMonitor>,
    registry: Arc<CancellationRegistry>,
    settings: MergeSettings,
}

impl fmt::Debug for StrategySelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StrategySelector")
            .field("monitor", &self.monitor)
            .field("settings", &self.settings)
            .finish()
    }
}

impl StrategySelector {
    /// Create a selector.
    pub fn new(
        pdf_ops: Arc<dyn PdfOps>,
        file_ops: Arc<dyn FileOps>,
        monitor: Arc<MemoryMonitor>,
        registry: Arc<CancellationRegistry>,
        settings: MergeSettings,
    ) -> Self {
        Self {
            pdf_ops,
            file_ops,
            monitor,
            registry,
            settings,
        }
    }

    /// Tuning in effect.
    pub fn settings(&self) -> MergeSettings {
        self.settings
    }

    /// Direct when memory use is under 70% of budget, otherwise Streaming.
    pub fn select(&self) -> Strategy {
        let sample = self.monitor.sample();
        let strategy = if self.monitor.allows_direct() {
            Strategy::Direct
        } else {
            Strategy::Streaming
        };
        debug!(used = sample.used, budget = sample.budget, %strategy, "Strategy selected");
        strategy
    }

    /// Merge `main` and `additional` into `output` with Direct or Streaming.
    ///
    /// Returns the strategy that ran.
    ///
    /// # Errors
    ///
    /// Propagates input, I/O and cancellation errors from the chosen path.
    pub async fn merge(
        &self,
        ctx: &MergeContext,
        main: &Path,
        additional: &[PathBuf],
        output: &Path,
    ) -> Result<Strategy> {
        ctx.check_cancelled()?;
        let strategy = self.select();
        match strategy {
            Strategy::Direct => self.merge_direct(ctx, main, additional, output).await?,
            _ => self.merge_streaming(ctx, main, additional, output).await?,
        }
        Ok(strategy)
    }

    /// Merge a flat input list, batching when it exceeds the batch size.
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` for fewer than two inputs, otherwise propagates
    /// the errors of the underlying merges.
    pub async fn merge_batched(
        &self,
        ctx: &MergeContext,
        inputs: &[PathBuf],
        output: &Path,
    ) -> Result<Strategy> {
        let Some((main, additional)) = inputs.split_first().filter(|(_, rest)| !rest.is_empty())
        else {
            return Err(MergeError::invalid_input(
                "batch merge needs at least two input files",
            ));
        };

        if inputs.len() > self.settings.batch_size {
            info!(
                job_id = %ctx.job_id(),
                inputs = inputs.len(),
                batch_size = self.settings.batch_size,
                "Merging in batches"
            );
            self.run_batches(ctx, inputs, output).await?;
            Ok(Strategy::Batched)
        } else {
            self.merge(ctx, main, additional, output).await
        }
    }

    async fn merge_direct(
        &self,
        ctx: &MergeContext,
        main: &Path,
        additional: &[PathBuf],
        output: &Path,
    ) -> Result<()> {
        let pdf_ops = Arc::clone(&self.pdf_ops);
        let observer = ctx.observer(0.0, 1.0);
        let (main, additional, output) = (main.to_path_buf(), additional.to_vec(), output.to_path_buf());

        run_blocking(move || pdf_ops.merge(&main, &additional, &output, Some(&observer))).await?;
        ctx.check_cancelled()
    }
}

//! Batched merge: contiguous batches under bounded concurrency.

use futures::future::{BoxFuture, try_join_all};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::Semaphore;
use tracing::debug;

use super::streaming::ScratchFiles;
use super::{MergeContext, StrategySelector};
use crate::error::{MergeError, Result};
use crate::utils::run_blocking;

/// Share of the Merging stage spent on the batch round; the rest goes to
/// combining the batch outputs.
const BATCH_SHARE: f64 = 0.8;

impl StrategySelector {
    /// Merge `inputs` batch by batch, then merge the batch outputs.
    ///
    /// Batch `n` (1-based) writes to a `batch_{n}_` scratch file. Batch order
    /// follows input order, so the combined document keeps it too.
    pub(super) fn run_batches<'a>(
        &'a self,
        ctx: &'a MergeContext,
        inputs: &'a [PathBuf],
        output: &'a Path,
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let scratch = Arc::new(ScratchFiles::new(Arc::clone(&self.file_ops), "batch"));
            self.registry.add_cleanup(scratch.clone());

            let result = self.batch_round(ctx, &scratch, inputs, output).await;
            scratch.purge();
            result
        })
    }

    async fn batch_round(
        &self,
        ctx: &MergeContext,
        scratch: &ScratchFiles,
        inputs: &[PathBuf],
        output: &Path,
    ) -> Result<()> {
        let batches: Vec<&[PathBuf]> = inputs.chunks(self.settings.batch_size).collect();
        let count = batches.len();
        let permits = Semaphore::new(self.settings.max_concurrency);
        let finished = AtomicUsize::new(0);

        let outputs = batches
            .iter()
            .enumerate()
            .map(|(i, batch)| -> Result<PathBuf> { scratch.create(&format!("batch_{}_", i + 1)) })
            .collect::<Result<Vec<_>>>()?;

        let jobs = batches.iter().zip(&outputs).enumerate().map(|(i, (batch, target))| {
            let (permits, finished) = (&permits, &finished);
            async move {
                let _permit = tokio::select! {
                    _ = ctx.token().cancelled() => return Err(MergeError::Cancelled),
                    permit = permits.acquire() => permit
                        .map_err(|e| MergeError::other(format!("batch semaphore closed: {e}")))?,
                };
                ctx.check_cancelled()?;
                debug!(job_id = %ctx.job_id(), batch = i + 1, files = batch.len(), "Merging batch");

                self.merge_one_batch(&ctx.without_progress(), batch, target).await?;

                let done = finished.fetch_add(1, Ordering::SeqCst) + 1;
                ctx.report(
                    BATCH_SHARE * done as f64 / count as f64,
                    &format!("merged batch {done} of {count}"),
                );
                Ok::<_, MergeError>(())
            }
        });
        try_join_all(jobs).await?;

        ctx.check_cancelled()?;
        let combine = ctx.scaled(BATCH_SHARE, 1.0);
        self.merge_batched(&combine, &outputs, output).await?;
        Ok(())
    }

    async fn merge_one_batch(&self, ctx: &MergeContext, batch: &[PathBuf], target: &Path) -> Result<()> {
        match batch {
            [] => Err(MergeError::invalid_input("empty batch")),
            [single] => {
                let file_ops = Arc::clone(&self.file_ops);
                let (src, dst) = (single.clone(), target.to_path_buf());
                run_blocking(move || file_ops.copy_file(&src, &dst)).await?;
                Ok(())
            }
            [main, additional @ ..] => {
                self.merge(ctx, main, additional, target).await?;
                Ok(())
            }
        }
    }
}

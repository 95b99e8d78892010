//! Streaming merge: scratch copies, structural merge, chunked output copy.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::{debug, warn};

use super::{MergeContext, StrategySelector};
use crate::cancel::CleanupTask;
use crate::error::{MergeError, Result};
use crate::memory::MemoryMonitor;
use crate::ops::FileOps;
use crate::utils::{commit_staging, create_staging, discard_staging, run_blocking};

/// Inputs larger than this many chunks are staged into scratch copies.
const PREPROCESS_CHUNKS: u64 = 2;

/// A reclamation hint is issued after every this many staged inputs.
const RECLAIM_EVERY: usize = 5;

/// Pause taken at a chunk boundary while memory is critical.
const PRESSURE_PAUSE: Duration = Duration::from_millis(10);

/// Scratch files created by one strategy run.
///
/// Registered with the cancellation registry as soon as it is created, so
/// that a cancel removes whatever exists at that moment. [`ScratchFiles::purge`]
/// removes the rest once the run ends.
pub struct ScratchFiles {
    file_ops: Arc<dyn FileOps>,
    label: String,
    paths: Mutex<Vec<PathBuf>>,
}

impl ScratchFiles {
    /// Create an empty set backed by `file_ops`.
    pub fn new(file_ops: Arc<dyn FileOps>, label: impl Into<String>) -> Self {
        Self {
            file_ops,
            label: label.into(),
            paths: Mutex::new(Vec::new()),
        }
    }

    /// Create a new scratch file and track it.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the file cannot be created.
    pub fn create(&self, prefix: &str) -> Result<PathBuf> {
        let (path, file) = self.file_ops.create_temp_file(prefix, ".pdf")?;
        drop(file);
        self.lock().push(path.clone());
        Ok(path)
    }

    /// Files currently tracked.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Whether no file is tracked.
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Remove every tracked file. Returns how many were removed.
    pub fn purge(&self) -> usize {
        let paths = std::mem::take(&mut *self.lock());
        let mut removed = 0;
        for path in &paths {
            match self.file_ops.remove_temp_file(path) {
                Ok(()) => removed += 1,
                Err(e) => warn!(path = %path.display(), error = %e, "Failed to remove scratch file"),
            }
        }
        if removed > 0 {
            debug!(label = %self.label, removed, "Scratch files purged");
        }
        removed
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<PathBuf>> {
        self.paths.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl CleanupTask for ScratchFiles {
    fn description(&self) -> String {
        format!("{} scratch files", self.label)
    }

    fn run(&self) -> Result<()> {
        self.purge();
        Ok(())
    }
}

impl StrategySelector {
    pub(super) async fn merge_streaming(
        &self,
        ctx: &MergeContext,
        main: &Path,
        additional: &[PathBuf],
        output: &Path,
    ) -> Result<()> {
        let scratch = Arc::new(ScratchFiles::new(Arc::clone(&self.file_ops), "streaming"));
        self.registry.add_cleanup(scratch.clone());

        let result = self.stream(ctx, &scratch, main, additional, output).await;
        scratch.purge();
        result
    }

    async fn stream(
        &self,
        ctx: &MergeContext,
        scratch: &ScratchFiles,
        main: &Path,
        additional: &[PathBuf],
        output: &Path,
    ) -> Result<()> {
        let inputs: Vec<&Path> = std::iter::once(main)
            .chain(additional.iter().map(PathBuf::as_path))
            .collect();
        let chunk_size = self.settings.chunk_size;
        let threshold = chunk_size as u64 * PREPROCESS_CHUNKS;

        // Stage large inputs.
        let mut staged = Vec::with_capacity(inputs.len());
        for (i, input) in inputs.iter().enumerate() {
            ctx.check_cancelled()?;
            let size = tokio::fs::metadata(input)
                .await
                .map_err(|e| MergeError::from_io_at(input, e))?
                .len();

            if size > threshold {
                let copy = scratch.create("preprocessed_")?;
                copy_in_chunks(&ctx.without_progress(), &self.monitor, input, &copy, chunk_size)
                    .await?;
                staged.push(copy);
            } else {
                staged.push(input.to_path_buf());
            }

            if (i + 1) % RECLAIM_EVERY == 0 {
                self.monitor.reclaim();
            }
            ctx.report(
                0.3 * (i + 1) as f64 / inputs.len() as f64,
                &format!("staged {} of {} files", i + 1, inputs.len()),
            );
        }

        // Structural merge into scratch.
        ctx.check_cancelled()?;
        let merged = scratch.create("merged_")?;
        {
            let pdf_ops = Arc::clone(&self.pdf_ops);
            let observer = ctx.observer(0.3, 0.7);
            let target = merged.clone();
            let (first, rest) = staged
                .split_first()
                .map(|(first, rest)| (first.clone(), rest.to_vec()))
                .ok_or_else(|| MergeError::invalid_input("nothing to merge"))?;
            run_blocking(move || pdf_ops.merge(&first, &rest, &target, Some(&observer))).await?;
        }
        ctx.check_cancelled()?;

        // Chunked copy to the output through a staging file.
        let staging = create_staging(output)?;
        let written = {
            let ctx = ctx.scaled(0.7, 1.0);
            copy_in_chunks(&ctx, &self.monitor, &merged, staging.path(), chunk_size).await
        };
        if let Err(e) = written {
            discard_staging(staging);
            return Err(e);
        }
        let target = output.to_path_buf();
        run_blocking(move || commit_staging(staging, &target)).await?;
        ctx.report(1.0, "output written");
        Ok(())
    }
}

/// Copy `src` to `dst` one pooled buffer at a time.
///
/// Cancellation is checked at every chunk boundary. While memory is
/// critical, each boundary issues a reclamation hint, yields and pauses.
pub(crate) async fn copy_in_chunks(
    ctx: &MergeContext,
    monitor: &MemoryMonitor,
    src: &Path,
    dst: &Path,
    chunk_size: usize,
) -> Result<u64> {
    let mut reader = tokio::fs::File::open(src)
        .await
        .map_err(|e| MergeError::from_io_at(src, e))?;
    let total = reader
        .metadata()
        .await
        .map_err(|e| MergeError::from_io_at(src, e))?
        .len();
    let mut writer = tokio::fs::File::create(dst)
        .await
        .map_err(|e| MergeError::from_io_at(dst, e))?;

    let mut buf = monitor.pool().acquire(chunk_size.max(1));
    let result = async {
        let mut copied = 0u64;
        loop {
            ctx.check_cancelled()?;
            let n = reader
                .read(&mut buf)
                .await
                .map_err(|e| MergeError::from_io_at(src, e))?;
            if n == 0 {
                break;
            }
            writer
                .write_all(&buf[..n])
                .await
                .map_err(|e| MergeError::from_io_at(dst, e))?;
            copied += n as u64;
            ctx.report(copied as f64 / total.max(1) as f64, "copying");

            if monitor.is_critical() {
                monitor.reclaim();
                tokio::task::yield_now().await;
                ctx.pause(PRESSURE_PAUSE).await?;
            }
        }
        writer
            .flush()
            .await
            .map_err(|e| MergeError::from_io_at(dst, e))?;
        Ok::<_, MergeError>(copied)
    }
    .await;

    monitor.pool().release(buf);
    result
}

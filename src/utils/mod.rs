//! Small helpers shared across the engine.

use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{debug, warn};

use crate::error::{MergeError, Result};

/// Run blocking work (PDF library calls, sync file I/O) off the async task.
///
/// # Errors
///
/// Returns the closure's error, or `Other` if the blocking task panicked.
pub async fn run_blocking<T, F>(f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| MergeError::other(format!("Blocking task failed: {e}")))?
}

/// Suffix of the hidden file a document is written to before it replaces
/// its target.
pub const STAGING_SUFFIX: &str = ".part";

/// Create a uniquely named staging file in the directory of `output`.
///
/// The name never collides with an existing file, so nothing next to the
/// output is overwritten before the final rename.
///
/// # Errors
///
/// Returns an I/O error if the directory is missing or not writable.
pub fn create_staging(output: &Path) -> Result<NamedTempFile> {
    let dir = match output.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    tempfile::Builder::new()
        .prefix(&format!(".{}.", display_name(output)))
        .suffix(STAGING_SUFFIX)
        .tempfile_in(dir)
        .map_err(|e| MergeError::from_io_at(dir, e))
}

/// Rename a fully written staging file over `output`.
///
/// # Errors
///
/// Returns an I/O error if the rename fails; the staging file is removed.
pub fn commit_staging(staging: NamedTempFile, output: &Path) -> Result<()> {
    match staging.persist(output) {
        Ok(_) => Ok(()),
        Err(tempfile::PersistError { error, file }) => {
            discard_staging(file);
            Err(MergeError::from_io_at(output, error))
        }
    }
}

/// Remove an abandoned staging file.
pub fn discard_staging(staging: NamedTempFile) {
    let path = staging.path().to_path_buf();
    match staging.close() {
        Ok(()) => debug!(path = %path.display(), "Removed staging file"),
        Err(e) => warn!(path = %path.display(), error = %e, "Failed to remove staging file"),
    }
}

/// Basename of a path for display.
pub fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

/// Format file size as human-readable string.
pub fn format_file_size(size: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if size >= GB {
        format!("{:.2} GB", size as f64 / GB as f64)
    } else if size >= MB {
        format!("{:.2} MB", size as f64 / MB as f64)
    } else if size >= KB {
        format!("{:.2} KB", size as f64 / KB as f64)
    } else {
        format!("{} bytes", size)
    }
}

/// Expand wildcard entries; plain entries pass through untouched.
///
/// A plain path that does not exist is kept so validation can report it.
/// A pattern that matches nothing is an error.
pub fn expand_patterns<T>(patterns: T) -> Result<Vec<PathBuf>>
where
    T: IntoIterator,
    T::Item: AsRef<str>,
{
    let mut resolved = Vec::new();
    for pattern in patterns {
        let pattern = pattern.as_ref().trim();
        if pattern.is_empty() {
            continue;
        }
        if !pattern.contains(['*', '?', '[']) {
            resolved.push(PathBuf::from(pattern));
            continue;
        }

        let mut matches = glob::glob(pattern)
            .map_err(|e| MergeError::invalid_input(format!("bad pattern {pattern}: {e}")))?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| {
                let path = e.path().to_path_buf();
                MergeError::from_io_at(&path, e.into_error())
            })?;
        if matches.is_empty() {
            return Err(MergeError::invalid_input(format!(
                "pattern matched no files: {pattern}"
            )));
        }
        matches.sort();
        resolved.extend(matches);
    }
    Ok(resolved)
}

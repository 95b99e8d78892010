//! [`FileOps`] on the local filesystem.

use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tempfile::TempDir;
use tracing::{debug, warn};

use super::{FileInfo, FileOps};
use crate::error::{MergeError, Result};

/// Prefix of the per-engine scratch directory.
pub const SCRATCH_PREFIX: &str = "pdf-merger-";

#[derive(Debug, Default)]
struct Scratch {
    dir: Option<TempDir>,
    files: Vec<PathBuf>,
}

/// Local filesystem operations with tracked scratch files.
///
/// Scratch files live in a `pdf-merger-*` directory under the configured
/// root. The directory is created on first use and removed by
/// [`FileOps::cleanup_temp_files`], so a clean engine leaves nothing behind.
#[derive(Debug)]
pub struct LocalFileOps {
    root: PathBuf,
    scratch: Mutex<Scratch>,
}

impl LocalFileOps {
    /// Create ops whose scratch directory lives under `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            scratch: Mutex::new(Scratch::default()),
        }
    }

    /// Root under which the scratch directory is created.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Current scratch directory, if one exists.
    pub fn scratch_dir(&self) -> Option<PathBuf> {
        self.lock().dir.as_ref().map(|d| d.path().to_path_buf())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Scratch> {
        self.scratch.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Default for LocalFileOps {
    fn default() -> Self {
        Self::new(std::env::temp_dir())
    }
}

impl FileOps for LocalFileOps {
    fn validate(&self, path: &Path) -> Result<()> {
        let metadata = std::fs::metadata(path).map_err(|e| MergeError::from_io_at(path, e))?;
        if !metadata.is_file() {
            return Err(MergeError::invalid_input(format!(
                "Not a file: {}",
                path.display()
            )));
        }
        File::open(path).map_err(|e| MergeError::from_io_at(path, e))?;
        Ok(())
    }

    fn info(&self, path: &Path) -> Result<FileInfo> {
        let metadata = std::fs::metadata(path).map_err(|e| MergeError::from_io_at(path, e))?;
        Ok(FileInfo {
            size: metadata.len(),
            modified: metadata.modified().ok(),
        })
    }

    fn ensure_dir_exists(&self, dir: &Path) -> Result<()> {
        if dir.as_os_str().is_empty() || dir.is_dir() {
            return Ok(());
        }
        std::fs::create_dir_all(dir).map_err(|e| MergeError::from_io_at(dir, e))
    }

    fn create_temp_file(&self, prefix: &str, suffix: &str) -> Result<(PathBuf, File)> {
        let mut scratch = self.lock();
        if scratch.dir.is_none() {
            self.ensure_dir_exists(&self.root)?;
            let dir = tempfile::Builder::new()
                .prefix(SCRATCH_PREFIX)
                .tempdir_in(&self.root)
                .map_err(|e| MergeError::io(format!("cannot create temp file directory: {e}")))?;
            debug!(dir = %dir.path().display(), "Created scratch directory");
            scratch.dir = Some(dir);
        }

        let dir = scratch
            .dir
            .as_ref()
            .map(|d| d.path().to_path_buf())
            .ok_or_else(|| MergeError::io("temp file directory unavailable"))?;

        let named = tempfile::Builder::new()
            .prefix(prefix)
            .suffix(suffix)
            .tempfile_in(&dir)
            .map_err(|e| MergeError::io(format!("cannot create temp file in {}: {e}", dir.display())))?;
        let (file, path) = named
            .keep()
            .map_err(|e| MergeError::io(format!("cannot keep temp file: {e}")))?;

        scratch.files.push(path.clone());
        Ok((path, file))
    }

    fn copy_file(&self, src: &Path, dst: &Path) -> Result<u64> {
        std::fs::copy(src, dst).map_err(|e| MergeError::from_io_at(src, e))
    }

    fn remove_temp_file(&self, path: &Path) -> Result<()> {
        self.lock().files.retain(|p| p != path);
        match std::fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(MergeError::from_io_at(path, e)),
        }
    }

    fn cleanup_temp_files(&self) -> Result<usize> {
        let (files, dir) = {
            let mut scratch = self.lock();
            (std::mem::take(&mut scratch.files), scratch.dir.take())
        };

        let mut removed = 0;
        let mut failures = Vec::new();
        for path in &files {
            match std::fs::remove_file(path) {
                Ok(()) => removed += 1,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Failed to remove temp file");
                    failures.push(path.display().to_string());
                }
            }
        }

        if let Some(dir) = dir {
            let shown = dir.path().display().to_string();
            if let Err(e) = dir.close() {
                warn!(dir = %shown, error = %e, "Failed to remove scratch directory");
                failures.push(shown);
            }
        }

        if failures.is_empty() {
            if removed > 0 {
                debug!(removed, "Temp files cleaned up");
            }
            Ok(removed)
        } else {
            Err(MergeError::io(format!(
                "failed to remove temp files: {}",
                failures.join(", ")
            )))
        }
    }

    fn temp_file_count(&self) -> usize {
        self.lock().files.len()
    }
}

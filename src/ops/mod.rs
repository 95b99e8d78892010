//! Capabilities the engine consumes.
//!
//! [`PdfOps`] wraps the PDF library and [`FileOps`] wraps the filesystem.
//! The engine only talks to these traits; [`LopdfOps`] and [`LocalFileOps`]
//! are the default implementations and tests substitute their own.
//!
//! All methods are synchronous. The workflow calls them through
//! [`crate::utils::run_blocking`] so they never run on the driver task.

mod fs;
mod pdf;

pub use fs::LocalFileOps;
pub use pdf::LopdfOps;

use serde::Serialize;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use crate::error::Result;

/// Facts about a PDF file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PdfInfo {
    /// Number of pages; zero when the file is encrypted and locked.
    pub page_count: usize,
    /// File size in bytes.
    pub size: u64,
    /// The document carries an encryption dictionary.
    pub is_encrypted: bool,
    /// `/Title` from the info dictionary.
    pub title: Option<String>,
    /// `/Author` from the info dictionary.
    pub author: Option<String>,
    /// PDF header version, e.g. `1.7`.
    pub version: String,
}

/// Receives per-document progress from a merge and may stop it early.
pub trait MergeObserver: Send + Sync {
    /// Called after each input document has been appended.
    fn on_document(&self, done: usize, total: usize);

    /// Polled between documents; returning `true` aborts with `Cancelled`.
    fn is_cancelled(&self) -> bool {
        false
    }
}

/// PDF library capability.
pub trait PdfOps: Send + Sync {
    /// Check that `path` is a readable, structurally valid PDF.
    ///
    /// # Errors
    ///
    /// `NotFound`, `PermissionDenied` or `InvalidPdf`.
    fn validate(&self, path: &Path) -> Result<()>;

    /// Read page count, size, encryption flag and metadata.
    fn info(&self, path: &Path) -> Result<PdfInfo>;

    /// Whether the file is encrypted.
    fn is_encrypted(&self, path: &Path) -> Result<bool>;

    /// Try to unlock `path` with `password`, writing a decrypted copy to
    /// `output`. Returns `false` when the password is wrong.
    fn decrypt(&self, path: &Path, password: &str, output: &Path) -> Result<bool>;

    /// Concatenate `main` and `additional` page trees into `output`.
    fn merge(
        &self,
        main: &Path,
        additional: &[PathBuf],
        output: &Path,
        observer: Option<&dyn MergeObserver>,
    ) -> Result<()>;
}

/// Size and modification time of a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileInfo {
    /// Size in bytes.
    pub size: u64,
    /// Last modification time, when the platform reports one.
    pub modified: Option<SystemTime>,
}

/// Filesystem capability.
pub trait FileOps: Send + Sync {
    /// Check that `path` is an existing, readable regular file.
    fn validate(&self, path: &Path) -> Result<()>;

    /// Size and modification time.
    fn info(&self, path: &Path) -> Result<FileInfo>;

    /// Create `dir` and its parents if missing.
    fn ensure_dir_exists(&self, dir: &Path) -> Result<()>;

    /// Create a tracked scratch file named `{prefix}*{suffix}`.
    fn create_temp_file(&self, prefix: &str, suffix: &str) -> Result<(PathBuf, File)>;

    /// Copy `src` to `dst`, returning bytes copied.
    fn copy_file(&self, src: &Path, dst: &Path) -> Result<u64>;

    /// Delete one scratch file. Missing files are not an error.
    fn remove_temp_file(&self, path: &Path) -> Result<()>;

    /// Delete every tracked scratch file. Returns how many were removed.
    fn cleanup_temp_files(&self) -> Result<usize>;

    /// Number of scratch files currently tracked.
    fn temp_file_count(&self) -> usize;
}

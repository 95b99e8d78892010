//! Input validation.
//!
//! Turns input paths into ordered [`FileEntry`] values. The workflow's
//! Validation stage uses [`Validator::validate_file`], which fails fast;
//! [`Validator::inspect`] never fails and records the problem on the entry
//! instead, for listing inputs to a user.
//!
//! # Examples
//!
//! ```no_run
//! use pdfmerge::ops::LopdfOps;
//! use pdfmerge::validation::Validator;
//! use std::path::PathBuf;
//! use std::sync::Arc;
//!
//! let validator = Validator::new(Arc::new(LopdfOps::new()));
//! let summary = validator
//!     .validate_files(&[PathBuf::from("a.pdf"), PathBuf::from("b.pdf")])
//!     .unwrap();
//! println!("{} pages in {}", summary.total_pages, summary.format_total_size());
//! ```

use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::error::{MergeError, Result};
use crate::ops::PdfOps;
use crate::utils::{display_name, format_file_size};

/// A validated reference to one input.
///
/// `valid` is `false` exactly when `error` is set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileEntry {
    path: PathBuf,
    name: String,
    size: u64,
    page_count: usize,
    encrypted: bool,
    valid: bool,
    order: usize,
    error: Option<String>,
}

impl FileEntry {
    /// An entry for a file that passed validation.
    pub fn valid(path: impl Into<PathBuf>, order: usize, size: u64, page_count: usize, encrypted: bool) -> Self {
        let path = path.into();
        Self {
            name: display_name(&path),
            path,
            size,
            page_count,
            encrypted,
            valid: true,
            order,
            error: None,
        }
    }

    /// An entry for a file that failed validation.
    pub fn invalid(path: impl Into<PathBuf>, order: usize, error: impl Into<String>) -> Self {
        let path = path.into();
        Self {
            name: display_name(&path),
            path,
            size: 0,
            page_count: 0,
            encrypted: false,
            valid: false,
            order,
            error: Some(error.into()),
        }
    }

    /// Full path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Basename for display.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Size in bytes.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Page count; zero for locked or invalid files.
    pub fn page_count(&self) -> usize {
        self.page_count
    }

    /// Whether the file is encrypted.
    pub fn is_encrypted(&self) -> bool {
        self.encrypted
    }

    /// Whether the file passed validation.
    pub fn is_valid(&self) -> bool {
        self.valid
    }

    /// Position in the merge order.
    pub fn order(&self) -> usize {
        self.order
    }

    /// Why validation failed.
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Move the entry to a new merge position.
    pub fn set_order(&mut self, order: usize) {
        self.order = order;
    }
}

/// Summary of validated inputs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationSummary {
    /// Entries in merge order.
    pub entries: Vec<FileEntry>,
    /// Total pages across valid entries.
    pub total_pages: usize,
    /// Total bytes across valid entries.
    pub total_size: u64,
    /// Entries that are encrypted.
    pub encrypted_count: usize,
}

impl ValidationSummary {
    /// Build a summary from entries.
    pub fn from_entries(entries: Vec<FileEntry>) -> Self {
        let valid = entries.iter().filter(|e| e.is_valid());
        let (total_pages, total_size, encrypted_count) =
            valid.fold((0, 0, 0), |(pages, size, enc), e| {
                (pages + e.page_count, size + e.size, enc + usize::from(e.encrypted))
            });
        Self {
            entries,
            total_pages,
            total_size,
            encrypted_count,
        }
    }

    /// Entries that failed validation.
    pub fn invalid(&self) -> impl Iterator<Item = &FileEntry> {
        self.entries.iter().filter(|e| !e.is_valid())
    }

    /// Encrypted entries.
    pub fn encrypted(&self) -> impl Iterator<Item = &FileEntry> {
        self.entries.iter().filter(|e| e.is_encrypted())
    }

    /// Format the total file size as a human-readable string.
    pub fn format_total_size(&self) -> String {
        format_file_size(self.total_size)
    }
}

/// Validates inputs through [`PdfOps`].
#[derive(Clone)]
pub struct Validator {
    pdf_ops: Arc<dyn PdfOps>,
}

impl Validator {
    /// Create a validator.
    pub fn new(pdf_ops: Arc<dyn PdfOps>) -> Self {
        Self { pdf_ops }
    }

    /// Validate one file.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The file does not exist or cannot be read
    /// - The file is empty
    /// - The file is not a structurally valid PDF
    pub fn validate_file(&self, path: &Path, order: usize) -> Result<FileEntry> {
        self.pdf_ops.validate(path)?;
        let info = self.pdf_ops.info(path)?;
        if info.size == 0 {
            return Err(MergeError::invalid_pdf(path, "File is empty"));
        }
        Ok(FileEntry::valid(path, order, info.size, info.page_count, info.is_encrypted))
    }

    /// Validate one file, recording any failure on the entry.
    pub fn inspect(&self, path: &Path, order: usize) -> FileEntry {
        self.validate_file(path, order)
            .unwrap_or_else(|e| FileEntry::invalid(path, order, e.to_string()))
    }

    /// Validate every file in order, stopping at the first failure.
    ///
    /// # Errors
    ///
    /// Returns the first validation error.
    pub fn validate_files(&self, paths: &[PathBuf]) -> Result<ValidationSummary> {
        let entries = paths
            .iter()
            .enumerate()
            .map(|(order, path)| self.validate_file(path, order))
            .collect::<Result<Vec<_>>>()?;
        Ok(ValidationSummary::from_entries(entries))
    }

    /// Inspect every file without stopping.
    pub fn inspect_files(&self, paths: &[PathBuf]) -> ValidationSummary {
        let entries = paths
            .iter()
            .enumerate()
            .map(|(order, path)| self.inspect(path, order))
            .collect();
        ValidationSummary::from_entries(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ops::{MergeObserver, PdfInfo};
    use std::collections::HashMap;

    /// Answers from a fixed table keyed by file name.
    struct TablePdfOps {
        files: HashMap<&'static str, PdfInfo>,
    }

    impl TablePdfOps {
        fn new() -> Self {
            let mut files = HashMap::new();
            files.insert(
                "a.pdf",
                PdfInfo {
                    page_count: 3,
                    size: 300,
                    ..PdfInfo::default()
                },
            );
            files.insert(
                "locked.pdf",
                PdfInfo {
                    size: 100,
                    is_encrypted: true,
                    ..PdfInfo::default()
                },
            );
            files.insert(
                "zero.pdf",
                PdfInfo {
                    page_count: 1,
                    size: 0,
                    ..PdfInfo::default()
                },
            );
            Self { files }
        }

        fn lookup(&self, path: &Path) -> Result<&PdfInfo> {
            let name = path.file_name().and_then(|n| n.to_str()).unwrap_or_default();
            self.files.get(name).ok_or_else(|| MergeError::not_found(path))
        }
    }

    impl PdfOps for TablePdfOps {
        fn validate(&self, path: &Path) -> Result<()> {
            self.lookup(path).map(|_| ())
        }

        fn info(&self, path: &Path) -> Result<PdfInfo> {
            self.lookup(path).cloned()
        }

        fn is_encrypted(&self, path: &Path) -> Result<bool> {
            self.lookup(path).map(|i| i.is_encrypted)
        }

        fn decrypt(&self, _: &Path, _: &str, _: &Path) -> Result<bool> {
            Ok(false)
        }

        fn merge(&self, _: &Path, _: &[PathBuf], _: &Path, _: Option<&dyn MergeObserver>) -> Result<()> {
            Ok(())
        }
    }

    fn validator() -> Validator {
        Validator::new(Arc::new(TablePdfOps::new()))
    }

    #[test]
    fn test_valid_entry_fields() {
        let entry = validator().validate_file(Path::new("/in/a.pdf"), 2).unwrap();
        assert_eq!(entry.name(), "a.pdf");
        assert_eq!(entry.page_count(), 3);
        assert_eq!(entry.size(), 300);
        assert_eq!(entry.order(), 2);
        assert!(entry.is_valid());
        assert!(entry.error().is_none());
    }

    #[test]
    fn test_zero_byte_is_rejected() {
        let err = validator().validate_file(Path::new("zero.pdf"), 0).unwrap_err();
        assert!(matches!(err, MergeError::InvalidPdf { .. }));
    }

    #[test]
    fn test_inspect_records_error() {
        let entry = validator().inspect(Path::new("missing.pdf"), 1);
        assert!(!entry.is_valid());
        assert!(entry.error().unwrap().contains("missing.pdf"));
    }

    #[test]
    fn test_summary_totals_and_encrypted() {
        let summary = validator().inspect_files(&[
            PathBuf::from("a.pdf"),
            PathBuf::from("locked.pdf"),
            PathBuf::from("missing.pdf"),
        ]);
        assert_eq!(summary.total_pages, 3);
        assert_eq!(summary.total_size, 400);
        assert_eq!(summary.encrypted_count, 1);
        assert_eq!(summary.invalid().count(), 1);
        assert_eq!(summary.encrypted().next().unwrap().name(), "locked.pdf");
    }

    #[test]
    fn test_validate_files_stops_at_first_failure() {
        let err = validator()
            .validate_files(&[PathBuf::from("missing.pdf"), PathBuf::from("a.pdf")])
            .unwrap_err();
        assert!(matches!(err, MergeError::NotFound { .. }));
    }
}

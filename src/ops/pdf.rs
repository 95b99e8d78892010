//! [`PdfOps`] on top of `lopdf`.
//!
//! Merging concatenates page trees structurally:
//! - every appended document is renumbered past the merged document's ids
//! - each page is re-parented onto the merged root `Pages` node, copying
//!   inheritable attributes it used to get from its old ancestors
//! - unreachable objects (old catalogs, old page-tree nodes) are pruned
//! - the result is compressed and written atomically

use lopdf::{Dictionary, Document, Object, ObjectId};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, trace};

use super::{MergeObserver, PdfInfo, PdfOps};
use crate::error::{MergeError, Result};
use crate::utils::{commit_staging, create_staging, discard_staging};

/// Page attributes a page may inherit from its ancestors.
const INHERITABLE: [&[u8]; 4] = [b"MediaBox", b"CropBox", b"Resources", b"Rotate"];

/// Deepest page tree we are willing to walk.
const MAX_TREE_DEPTH: usize = 64;

/// Write buffer for saving documents.
const WRITE_BUFFER: usize = 64 * 1024;

/// `lopdf`-backed PDF operations.
#[derive(Debug, Clone, Copy, Default)]
pub struct LopdfOps {
    compress: bool,
}

impl LopdfOps {
    /// Create ops that compress merged output.
    pub fn new() -> Self {
        Self { compress: true }
    }

    /// Create ops that leave streams as they are.
    pub fn without_compression() -> Self {
        Self { compress: false }
    }
}

impl PdfOps for LopdfOps {
    fn validate(&self, path: &Path) -> Result<()> {
        check_file(path)?;
        match Document::load(path) {
            Ok(doc) => {
                if doc.get_pages().is_empty() && !doc.is_encrypted() {
                    return Err(MergeError::invalid_pdf(path, "PDF has no pages"));
                }
                Ok(())
            }
            // Locked documents are structurally fine; Decryption deals with them.
            Err(e) if looks_encrypted(&e.to_string()) => Ok(()),
            Err(e) => Err(MergeError::invalid_pdf(path, e.to_string())),
        }
    }

    fn info(&self, path: &Path) -> Result<PdfInfo> {
        let size = check_file(path)?;
        match Document::load(path) {
            Ok(doc) => Ok(PdfInfo {
                page_count: doc.get_pages().len(),
                size,
                is_encrypted: doc.is_encrypted(),
                title: info_string(&doc, b"Title"),
                author: info_string(&doc, b"Author"),
                version: doc.version.clone(),
            }),
            Err(e) if looks_encrypted(&e.to_string()) => Ok(PdfInfo {
                size,
                is_encrypted: true,
                ..PdfInfo::default()
            }),
            Err(e) => Err(MergeError::invalid_pdf(path, e.to_string())),
        }
    }

    fn is_encrypted(&self, path: &Path) -> Result<bool> {
        self.info(path).map(|info| info.is_encrypted)
    }

    fn decrypt(&self, path: &Path, password: &str, output: &Path) -> Result<bool> {
        check_file(path)?;
        let mut doc = match Document::load(path) {
            Ok(doc) => doc,
            Err(e) if looks_encrypted(&e.to_string()) => return Ok(false),
            Err(e) => return Err(MergeError::invalid_pdf(path, e.to_string())),
        };

        if doc.is_encrypted() {
            if let Err(e) = doc.decrypt(password) {
                trace!(path = %path.display(), error = %e, "Password rejected");
                return Ok(false);
            }
            doc.trailer.remove(b"Encrypt");
        }

        save_document(&mut doc, output)?;
        debug!(path = %path.display(), output = %output.display(), "Wrote decrypted copy");
        Ok(true)
    }

    fn merge(
        &self,
        main: &Path,
        additional: &[PathBuf],
        output: &Path,
        observer: Option<&dyn MergeObserver>,
    ) -> Result<()> {
        let total = additional.len() + 1;
        let cancelled = || observer.is_some_and(|o| o.is_cancelled());

        let mut merged = load_unlocked(main)?;
        let root_pages = root_pages_id(&merged, main)?;
        let main_pages: Vec<ObjectId> = merged.get_pages().into_values().collect();
        if main_pages.is_empty() {
            return Err(MergeError::invalid_pdf(main, "PDF has no pages"));
        }

        // Flatten the main tree too so every page hangs off the root.
        set_kids(&mut merged, root_pages, Vec::new(), main)?;
        adopt_pages(&mut merged, &main_pages, root_pages, main)?;
        if let Some(observer) = observer {
            observer.on_document(1, total);
        }

        let mut max_id = merged.max_id;
        for (index, path) in additional.iter().enumerate() {
            if cancelled() {
                return Err(MergeError::Cancelled);
            }

            let mut doc = load_unlocked(path)?;
            doc.renumber_objects_with(max_id + 1);
            max_id = doc.max_id;

            let pages: Vec<ObjectId> = doc.get_pages().into_values().collect();
            if pages.is_empty() {
                return Err(MergeError::invalid_pdf(path, "PDF has no pages"));
            }

            merged.objects.extend(doc.objects);
            adopt_pages(&mut merged, &pages, root_pages, path)?;
            trace!(path = %path.display(), pages = pages.len(), "Appended document");

            if let Some(observer) = observer {
                observer.on_document(index + 2, total);
            }
        }
        merged.max_id = max_id;

        if cancelled() {
            return Err(MergeError::Cancelled);
        }

        merged.prune_objects();
        merged.renumber_objects();
        if self.compress {
            merged.compress();
        }

        save_document(&mut merged, output)?;
        debug!(
            output = %output.display(),
            documents = total,
            pages = merged.get_pages().len(),
            "Merged documents"
        );
        Ok(())
    }
}

/// Check existence, file type and size. Returns the size.
fn check_file(path: &Path) -> Result<u64> {
    let metadata = std::fs::metadata(path).map_err(|e| MergeError::from_io_at(path, e))?;
    if !metadata.is_file() {
        return Err(MergeError::invalid_pdf(path, "Not a regular file"));
    }
    if metadata.len() == 0 {
        return Err(MergeError::invalid_pdf(path, "File is empty"));
    }
    Ok(metadata.len())
}

fn looks_encrypted(message: &str) -> bool {
    let lower = message.to_lowercase();
    lower.contains("encrypt") || lower.contains("decrypt") || lower.contains("password")
}

/// Load a document that must not be locked.
fn load_unlocked(path: &Path) -> Result<Document> {
    check_file(path)?;
    let doc = Document::load(path).map_err(|e| {
        let message = e.to_string();
        if looks_encrypted(&message) {
            MergeError::encrypted(vec![path.to_path_buf()])
        } else {
            MergeError::invalid_pdf(path, message)
        }
    })?;
    if doc.is_encrypted() {
        return Err(MergeError::encrypted(vec![path.to_path_buf()]));
    }
    Ok(doc)
}

fn root_pages_id(doc: &Document, path: &Path) -> Result<ObjectId> {
    doc.catalog()
        .and_then(|catalog| catalog.get(b"Pages"))
        .and_then(Object::as_reference)
        .map_err(|e| MergeError::invalid_pdf(path, format!("Missing page tree root: {e}")))
}

fn pages_dict_mut<'a>(doc: &'a mut Document, id: ObjectId, path: &Path) -> Result<&'a mut Dictionary> {
    doc.get_object_mut(id)
        .and_then(Object::as_dict_mut)
        .map_err(|e| MergeError::invalid_pdf(path, format!("Broken page tree: {e}")))
}

fn set_kids(doc: &mut Document, root: ObjectId, kids: Vec<Object>, path: &Path) -> Result<()> {
    let dict = pages_dict_mut(doc, root, path)?;
    dict.set("Count", Object::Integer(kids.len() as i64));
    dict.set("Kids", Object::Array(kids));
    Ok(())
}

/// Re-parent `pages` onto `root`, copying inherited attributes first, and
/// append them to the root's `Kids`.
fn adopt_pages(doc: &mut Document, pages: &[ObjectId], root: ObjectId, path: &Path) -> Result<()> {
    for &page_id in pages {
        let inherited = inherited_attributes(doc, page_id);
        let page = pages_dict_mut(doc, page_id, path)?;
        for (key, value) in inherited {
            page.set(key, value);
        }
        page.set("Parent", Object::Reference(root));
    }

    let dict = pages_dict_mut(doc, root, path)?;
    let kids = dict
        .get_mut(b"Kids")
        .and_then(Object::as_array_mut)
        .map_err(|_| MergeError::invalid_pdf(path, "Pages dictionary missing Kids array"))?;
    kids.extend(pages.iter().map(|&id| Object::Reference(id)));
    let count = kids.len() as i64;
    dict.set("Count", Object::Integer(count));
    Ok(())
}

/// Attributes the page lacks but one of its ancestors defines.
fn inherited_attributes(doc: &Document, page_id: ObjectId) -> Vec<(Vec<u8>, Object)> {
    let Ok(page) = doc.get_dictionary(page_id) else {
        return Vec::new();
    };

    let mut missing: Vec<&[u8]> = INHERITABLE.iter().copied().filter(|k| !page.has(k)).collect();
    let mut found = Vec::new();
    let mut parent = page.get(b"Parent").and_then(Object::as_reference).ok();

    for _ in 0..MAX_TREE_DEPTH {
        let Some(node_id) = parent else { break };
        if missing.is_empty() {
            break;
        }
        let Ok(node) = doc.get_dictionary(node_id) else { break };

        missing.retain(|key| match node.get(key) {
            Ok(value) => {
                found.push((key.to_vec(), value.clone()));
                false
            }
            Err(_) => true,
        });
        parent = node.get(b"Parent").and_then(Object::as_reference).ok();
    }
    found
}

/// Read a text entry from the document info dictionary.
fn info_string(doc: &Document, key: &[u8]) -> Option<String> {
    let info = match doc.trailer.get(b"Info").ok()? {
        Object::Reference(id) => doc.get_dictionary(*id).ok()?,
        Object::Dictionary(dict) => dict,
        _ => return None,
    };
    match info.get(key).ok()? {
        Object::String(bytes, _) => Some(decode_text(bytes)).filter(|s| !s.is_empty()),
        _ => None,
    }
}

/// Decode a PDF text string: UTF-16BE with BOM, otherwise byte-per-char.
fn decode_text(bytes: &[u8]) -> String {
    if let Some(rest) = bytes.strip_prefix(&[0xFE, 0xFF]) {
        let units: Vec<u16> = rest
            .chunks_exact(2)
            .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
            .collect();
        String::from_utf16_lossy(&units)
    } else {
        bytes.iter().map(|&b| b as char).collect()
    }
}

/// Save through a staging file and rename over `output`.
fn save_document(doc: &mut Document, output: &Path) -> Result<()> {
    let mut staging = create_staging(output)?;
    let staging_path = staging.path().to_path_buf();
    let written = (|| {
        let mut writer = BufWriter::with_capacity(WRITE_BUFFER, staging.as_file_mut());
        doc.save_to(&mut writer)
            .map_err(|e| MergeError::io(format!("{}: {e}", staging_path.display())))?;
        writer
            .flush()
            .map_err(|e| MergeError::from_io_at(&staging_path, e))
    })();

    match written {
        Ok(()) => commit_staging(staging, output),
        Err(e) => {
            discard_staging(staging);
            Err(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lopdf::dictionary;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use tempfile::TempDir;

    fn create_test_pdf(path: &Path, pages: usize) {
        let mut doc = Document::with_version("1.5");
        let pages_id = doc.new_object_id();

        let kids: Vec<Object> = (0..pages)
            .map(|_| {
                let page = dictionary! {
                    "Type" => "Page",
                    "Parent" => pages_id,
                };
                doc.add_object(page).into()
            })
            .collect();

        // MediaBox lives on the tree node so adoption must copy it down.
        let tree = dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => pages as i64,
            "MediaBox" => vec![0.into(), 0.into(), 612.into(), 792.into()],
        };
        doc.objects.insert(pages_id, Object::Dictionary(tree));

        let catalog_id = doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        });
        let info_id = doc.add_object(dictionary! {
            "Title" => Object::string_literal("Quarterly report"),
        });
        doc.trailer.set("Root", catalog_id);
        doc.trailer.set("Info", info_id);
        doc.save(path).unwrap();
    }

    #[derive(Default)]
    struct CountingObserver {
        calls: AtomicUsize,
        cancel_after: Option<usize>,
        cancelled: AtomicBool,
    }

    impl MergeObserver for CountingObserver {
        fn on_document(&self, done: usize, _total: usize) {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.cancel_after.is_some_and(|n| done >= n) {
                self.cancelled.store(true, Ordering::SeqCst);
            }
        }

        fn is_cancelled(&self) -> bool {
            self.cancelled.load(Ordering::SeqCst)
        }
    }

    #[test]
    fn test_validate_accepts_valid_pdf() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.pdf");
        create_test_pdf(&path, 2);
        LopdfOps::new().validate(&path).unwrap();
    }

    #[test]
    fn test_validate_rejects_missing_empty_and_garbage() {
        let dir = TempDir::new().unwrap();
        let ops = LopdfOps::new();

        let err = ops.validate(&dir.path().join("missing.pdf")).unwrap_err();
        assert!(matches!(err, MergeError::NotFound { .. }));

        let empty = dir.path().join("empty.pdf");
        std::fs::write(&empty, b"").unwrap();
        let err = ops.validate(&empty).unwrap_err();
        assert!(matches!(err, MergeError::InvalidPdf { .. }));

        let garbage = dir.path().join("garbage.pdf");
        std::fs::write(&garbage, b"definitely not a pdf").unwrap();
        let err = ops.validate(&garbage).unwrap_err();
        assert!(err.to_string().contains("Invalid PDF format"));
    }

    #[test]
    fn test_info_reads_pages_and_title() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.pdf");
        create_test_pdf(&path, 3);

        let info = LopdfOps::new().info(&path).unwrap();
        assert_eq!(info.page_count, 3);
        assert!(!info.is_encrypted);
        assert!(info.size > 0);
        assert_eq!(info.title.as_deref(), Some("Quarterly report"));
        assert_eq!(info.version, "1.5");
    }

    fn staging_leftovers(dir: &Path) -> usize {
        std::fs::read_dir(dir)
            .unwrap()
            .filter(|entry| {
                entry
                    .as_ref()
                    .unwrap()
                    .file_name()
                    .to_string_lossy()
                    .ends_with(crate::utils::STAGING_SUFFIX)
            })
            .count()
    }

    #[test]
    fn test_merge_keeps_input_sharing_output_stem() {
        let dir = TempDir::new().unwrap();
        let a = dir.path().join("a.pdf");
        let sibling = dir.path().join("report.tmp");
        let out = dir.path().join("report.pdf");
        create_test_pdf(&a, 1);
        create_test_pdf(&sibling, 2);
        let before = std::fs::read(&sibling).unwrap();

        LopdfOps::new()
            .merge(&a, std::slice::from_ref(&sibling), &out, None)
            .unwrap();

        assert_eq!(std::fs::read(&sibling).unwrap(), before);
        assert_eq!(Document::load(&out).unwrap().get_pages().len(), 3);
        assert_eq!(staging_leftovers(dir.path()), 0);
    }

    #[test]
    fn test_merge_concatenates_page_trees() {
        let dir = TempDir::new().unwrap();
        let a = dir.path().join("a.pdf");
        let b = dir.path().join("b.pdf");
        let c = dir.path().join("c.pdf");
        let out = dir.path().join("out.pdf");
        create_test_pdf(&a, 3);
        create_test_pdf(&b, 2);
        create_test_pdf(&c, 1);

        let observer = CountingObserver::default();
        LopdfOps::new()
            .merge(&a, &[b, c], &out, Some(&observer))
            .unwrap();
        assert_eq!(observer.calls.load(Ordering::SeqCst), 3);
        assert_eq!(staging_leftovers(dir.path()), 0);

        let merged = Document::load(&out).unwrap();
        let pages = merged.get_pages();
        assert_eq!(pages.len(), 6);

        let root = root_pages_id(&merged, &out).unwrap();
        for page_id in pages.values() {
            let page = merged.get_dictionary(*page_id).unwrap();
            assert_eq!(page.get(b"Parent").unwrap().as_reference().unwrap(), root);
            assert!(page.has(b"MediaBox"));
        }
    }

    #[test]
    fn test_merge_stops_when_observer_cancels() {
        let dir = TempDir::new().unwrap();
        let a = dir.path().join("a.pdf");
        let b = dir.path().join("b.pdf");
        let out = dir.path().join("out.pdf");
        create_test_pdf(&a, 1);
        create_test_pdf(&b, 1);

        let observer = CountingObserver {
            cancel_after: Some(1),
            ..CountingObserver::default()
        };
        let err = LopdfOps::new()
            .merge(&a, &[b], &out, Some(&observer))
            .unwrap_err();
        assert!(err.is_cancelled());
        assert!(!out.exists());
    }

    #[test]
    fn test_merge_reports_offending_input() {
        let dir = TempDir::new().unwrap();
        let a = dir.path().join("a.pdf");
        let bad = dir.path().join("bad.pdf");
        create_test_pdf(&a, 1);
        std::fs::write(&bad, b"%PDF-1.4 truncated").unwrap();

        let err = LopdfOps::new()
            .merge(&a, &[bad.clone()], &dir.path().join("out.pdf"), None)
            .unwrap_err();
        match err {
            MergeError::InvalidPdf { path, .. } => assert_eq!(path, bad),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_decrypt_of_plain_file_writes_copy() {
        let dir = TempDir::new().unwrap();
        let a = dir.path().join("a.pdf");
        let copy = dir.path().join("copy.pdf");
        create_test_pdf(&a, 2);

        assert!(LopdfOps::new().decrypt(&a, "", &copy).unwrap());
        assert_eq!(Document::load(&copy).unwrap().get_pages().len(), 2);
    }

    #[test]
    fn test_decode_text() {
        assert_eq!(decode_text(b"plain"), "plain");
        assert_eq!(decode_text(&[0xFE, 0xFF, 0x00, 0x41, 0x00, 0x42]), "AB");
    }
}

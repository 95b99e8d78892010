//! Shared helpers for the end-to-end tests.
//!
//! Test documents are generated with `lopdf` instead of checked-in fixtures.

#![allow(dead_code)]

use lopdf::{Dictionary, Document, Object, Stream, dictionary};
use pdfmerge::{Config, Event, Subscriber};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

/// Write a valid PDF with `pages` empty pages.
pub fn create_pdf(path: &Path, pages: usize) {
    create_padded_pdf(path, pages, 0);
}

/// Write a valid PDF whose first page carries `padding` bytes of content.
///
/// The padding is pseudo-random so compression cannot shrink it.
pub fn create_padded_pdf(path: &Path, pages: usize, padding: usize) {
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();

    let kids: Vec<Object> = (0..pages)
        .map(|index| {
            let mut page = dictionary! {
                "Type" => "Page",
                "Parent" => pages_id,
                "MediaBox" => vec![0.into(), 0.into(), 612.into(), 792.into()],
            };
            if index == 0 && padding > 0 {
                let content = doc.add_object(Stream::new(Dictionary::new(), noise(padding)));
                page.set("Contents", content);
            }
            doc.add_object(page).into()
        })
        .collect();

    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => pages as i64,
        }),
    );

    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);
    doc.save(path).expect("Failed to write test PDF");
}

fn noise(len: usize) -> Vec<u8> {
    let mut state: u32 = 0x9e37_79b9;
    (0..len)
        .map(|_| {
            state ^= state << 13;
            state ^= state >> 17;
            state ^= state << 5;
            (state & 0xff) as u8
        })
        .collect()
}

/// Create `count` numbered PDFs in `dir`, each with `pages` pages.
pub fn create_inputs(dir: &Path, count: usize, pages: usize) -> Vec<PathBuf> {
    (0..count)
        .map(|i| {
            let path = dir.join(format!("input_{i:02}.pdf"));
            create_pdf(&path, pages);
            path
        })
        .collect()
}

/// Page count of a PDF on disk.
pub fn page_count(path: &Path) -> usize {
    Document::load(path)
        .expect("Failed to load merged PDF")
        .get_pages()
        .len()
}

/// Number of regular files anywhere under `root`.
pub fn scratch_file_count(root: &Path) -> usize {
    let Ok(entries) = std::fs::read_dir(root) else {
        return 0;
    };
    entries
        .flatten()
        .map(|entry| {
            let path = entry.path();
            if path.is_dir() {
                scratch_file_count(&path)
            } else {
                1
            }
        })
        .sum()
}

/// Engine config with scratch space under `scratch` and fast retries.
pub fn test_config(scratch: &Path) -> Config {
    let mut config = Config::default();
    config.temp_directory = Some(scratch.to_path_buf());
    config.engine.retry_delay_ms = 10;
    config.engine.memory_check_interval_ms = 20;
    config.engine.cancel_poll_interval_ms = 10;
    config
}

/// Records every bus event in order.
#[derive(Clone, Default)]
pub struct EventLog {
    events: Arc<Mutex<Vec<Event>>>,
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// A subscriber appending to this log.
    pub fn subscriber(&self) -> Subscriber {
        let events = Arc::clone(&self.events);
        Subscriber::from_fn(move |event| events.lock().unwrap().push(event.clone()))
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }

    /// `(fraction, status, detail)` of every progress event.
    pub fn progress(&self) -> Vec<(f64, String, String)> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                Event::Progress {
                    fraction,
                    status,
                    detail,
                } => Some((fraction, status, detail)),
                _ => None,
            })
            .collect()
    }

    pub fn completions(&self) -> Vec<PathBuf> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                Event::Completion(path) => Some(path),
                _ => None,
            })
            .collect()
    }

    pub fn errors(&self) -> Vec<pdfmerge::JobError> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                Event::Error(err) => Some(err),
                _ => None,
            })
            .collect()
    }
}

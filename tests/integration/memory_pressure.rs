//! Integration tests for strategy selection under memory pressure.

use pdfmerge::memory::StaticMemoryProbe;
use pdfmerge::{MergeEngine, Strategy};
use std::sync::Arc;
use tempfile::TempDir;

use crate::common::{
    EventLog, create_padded_pdf, create_pdf, page_count, scratch_file_count, test_config,
};

const MEGABYTE: usize = 1024 * 1024;

#[tokio::test]
async fn test_tiny_budget_selects_streaming() {
    let dir = TempDir::new().unwrap();
    let scratch = TempDir::new().unwrap();
    let inputs: Vec<_> = (0..15)
        .map(|i| {
            let path = dir.path().join(format!("large_{i:02}.pdf"));
            create_padded_pdf(&path, 1, MEGABYTE);
            path
        })
        .collect();
    let output = dir.path().join("streamed.pdf");

    let mut config = test_config(scratch.path());
    config.max_memory = 1024;
    let engine = MergeEngine::new(config).unwrap();
    let log = EventLog::new();
    engine.subscribe(log.subscriber());

    let mut rest = inputs;
    let main = rest.remove(0);
    engine.submit(main, rest, &output).unwrap();
    let report = engine.wait().await.unwrap();

    assert_eq!(report.strategy, Strategy::Streaming);
    assert_eq!(report.input_count, 15);
    assert_eq!(page_count(&output), 15);
    assert!(report.output_bytes >= 15 * MEGABYTE as u64);

    // Chunks copied above the critical threshold issue hints on top of the
    // one issued when the job's cleanup list is released.
    assert!(engine.memory_monitor().reclaim_count() > 1);
    assert_eq!(engine.memory_monitor().pool().idle_count(), 0);

    assert!(
        log.progress()
            .iter()
            .any(|(_, status, detail)| status == "Merging" && detail == "output written")
    );
    assert_eq!(scratch_file_count(scratch.path()), 0);
}

#[tokio::test]
async fn test_low_usage_selects_direct() {
    let dir = TempDir::new().unwrap();
    let scratch = TempDir::new().unwrap();
    let main = dir.path().join("a.pdf");
    let extra = dir.path().join("b.pdf");
    create_pdf(&main, 2);
    create_pdf(&extra, 2);

    let mut config = test_config(scratch.path());
    config.max_memory = 1000;
    let engine = MergeEngine::builder(config)
        .memory_probe(Arc::new(StaticMemoryProbe::new(500)))
        .build()
        .unwrap();

    engine
        .submit(&main, vec![extra], dir.path().join("o.pdf"))
        .unwrap();
    let report = engine.wait().await.unwrap();

    assert_eq!(report.strategy, Strategy::Direct);
    assert_eq!(report.total_pages, 4);
}

#[tokio::test]
async fn test_usage_between_thresholds_streams() {
    let dir = TempDir::new().unwrap();
    let scratch = TempDir::new().unwrap();
    let main = dir.path().join("a.pdf");
    let extra = dir.path().join("b.pdf");
    create_pdf(&main, 1);
    create_pdf(&extra, 3);

    let mut config = test_config(scratch.path());
    config.max_memory = 1000;
    let engine = MergeEngine::builder(config)
        .memory_probe(Arc::new(StaticMemoryProbe::new(750)))
        .build()
        .unwrap();

    let output = dir.path().join("o.pdf");
    engine.submit(&main, vec![extra], &output).unwrap();
    let report = engine.wait().await.unwrap();

    assert_eq!(report.strategy, Strategy::Streaming);
    assert_eq!(page_count(&output), 4);
    assert_eq!(scratch_file_count(scratch.path()), 0);
}

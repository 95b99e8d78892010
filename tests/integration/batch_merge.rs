//! Integration tests for the batch interface.

use pdfmerge::{ErrorKind, MergeEngine, Strategy};
use tempfile::TempDir;

use crate::common::{EventLog, create_inputs, page_count, scratch_file_count, test_config};

#[tokio::test]
async fn test_twenty_five_inputs_merge_in_three_batches() {
    let dir = TempDir::new().unwrap();
    let scratch = TempDir::new().unwrap();
    let inputs = create_inputs(dir.path(), 25, 2);
    let output = dir.path().join("book.pdf");

    let mut config = test_config(scratch.path());
    config.engine.batch_size = 10;
    let engine = MergeEngine::new(config).unwrap();
    let log = EventLog::new();
    engine.subscribe(log.subscriber());

    engine.submit_batch(inputs, &output).unwrap();
    let report = engine.wait().await.unwrap();

    assert_eq!(report.strategy, Strategy::Batched);
    assert_eq!(report.input_count, 25);
    assert_eq!(page_count(&output), 50);

    let progress = log.progress();
    for batch in 1..=3 {
        let detail = format!("merged batch {batch} of 3");
        assert!(
            progress.iter().any(|(_, _, d)| *d == detail),
            "missing progress for batch {batch}"
        );
    }
    assert!(progress.windows(2).all(|pair| pair[0].0 <= pair[1].0));

    assert_eq!(scratch_file_count(scratch.path()), 0);
}

#[tokio::test]
async fn test_short_batch_list_merges_in_one_pass() {
    let dir = TempDir::new().unwrap();
    let scratch = TempDir::new().unwrap();
    let inputs = create_inputs(dir.path(), 4, 1);
    let output = dir.path().join("short.pdf");

    let mut config = test_config(scratch.path());
    config.engine.batch_size = 10;
    let engine = MergeEngine::new(config).unwrap();

    engine.submit_batch(inputs, &output).unwrap();
    let report = engine.wait().await.unwrap();

    assert_ne!(report.strategy, Strategy::Batched);
    assert_eq!(page_count(&output), 4);
    assert_eq!(scratch_file_count(scratch.path()), 0);
}

#[tokio::test]
async fn test_batch_of_one_is_rejected() {
    let dir = TempDir::new().unwrap();
    let inputs = create_inputs(dir.path(), 1, 1);

    let engine = MergeEngine::new(test_config(dir.path())).unwrap();
    let err = engine
        .submit_batch(inputs, dir.path().join("o.pdf"))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidInput);
}

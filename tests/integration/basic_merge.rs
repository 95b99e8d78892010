//! Integration tests for end-to-end merges through the engine.

use pdfmerge::{ErrorKind, JobStatus, MergeEngine, Stage, Strategy};
use tempfile::TempDir;

use crate::common::{EventLog, create_pdf, page_count, scratch_file_count, test_config};

#[tokio::test]
async fn test_merge_two_documents() {
    let dir = TempDir::new().unwrap();
    let scratch = TempDir::new().unwrap();
    let main = dir.path().join("a.pdf");
    let extra = dir.path().join("b.pdf");
    let output = dir.path().join("o.pdf");
    create_pdf(&main, 3);
    create_pdf(&extra, 2);

    let engine = MergeEngine::new(test_config(scratch.path())).unwrap();
    let log = EventLog::new();
    engine.subscribe(log.subscriber());

    engine.submit(&main, vec![extra.clone()], &output).unwrap();
    let report = engine.wait().await.unwrap();

    assert!(output.exists(), "Output file was not created");
    assert_eq!(page_count(&output), 5);
    assert_eq!(report.input_count, 2);
    assert_eq!(report.total_pages, 5);
    assert_eq!(report.strategy, Strategy::Direct);
    assert!(report.output_bytes > 0);

    let job = engine.current_job().unwrap();
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.progress, 100.0);
    assert!(job.completed_at.is_some());
    assert!(!engine.is_running());

    let progress = log.progress();
    assert!(progress.len() >= 5, "only {} progress events", progress.len());
    for stage in [Stage::Validation, Stage::Preparation, Stage::Merging, Stage::Finalization] {
        assert!(
            progress.iter().any(|(_, status, _)| status == stage.name()),
            "no progress event for {stage}"
        );
    }
    assert!(
        progress.windows(2).all(|pair| pair[0].0 <= pair[1].0),
        "progress went backwards: {progress:?}"
    );
    assert_eq!(log.completions(), vec![output.clone()]);
    assert!(log.errors().is_empty());
    assert_eq!(scratch_file_count(scratch.path()), 0);
    assert_eq!(engine.last_report(), Some(report));
}

#[tokio::test]
async fn test_missing_main_input_fails_validation() {
    let dir = TempDir::new().unwrap();
    let scratch = TempDir::new().unwrap();
    let extra = dir.path().join("b.pdf");
    let output = dir.path().join("o.pdf");
    create_pdf(&extra, 1);

    let engine = MergeEngine::new(test_config(scratch.path())).unwrap();
    let log = EventLog::new();
    engine.subscribe(log.subscriber());

    engine
        .submit(dir.path().join("missing.pdf"), vec![extra], &output)
        .unwrap();
    let err = engine.wait().await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::NotFound);
    assert_eq!(err.stage(), Some(Stage::Validation));
    assert!(!output.exists());
    assert_eq!(scratch_file_count(scratch.path()), 0);

    let job = engine.current_job().unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    let recorded = job.error.unwrap();
    assert_eq!(recorded.kind, ErrorKind::NotFound);
    assert!(recorded.message.contains("missing.pdf"), "{}", recorded.message);
    assert_eq!(log.errors().len(), 1);
    assert!(log.completions().is_empty());
}

#[tokio::test]
async fn test_second_submit_is_rejected_while_running() {
    let dir = TempDir::new().unwrap();
    let scratch = TempDir::new().unwrap();
    let main = dir.path().join("a.pdf");
    let extra = dir.path().join("b.pdf");
    create_pdf(&main, 3);
    create_pdf(&extra, 2);

    let engine = MergeEngine::new(test_config(scratch.path())).unwrap();
    engine
        .submit(&main, vec![extra.clone()], dir.path().join("first.pdf"))
        .unwrap();
    let err = engine
        .submit(&main, vec![extra.clone()], dir.path().join("second.pdf"))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::AlreadyRunning);

    engine.wait().await.unwrap();
    assert!(dir.path().join("first.pdf").exists());
    assert!(!dir.path().join("second.pdf").exists());

    // The slot frees up once the first job is terminal.
    engine
        .submit(&main, vec![extra], dir.path().join("second.pdf"))
        .unwrap();
    engine.wait().await.unwrap();
    assert_eq!(page_count(&dir.path().join("second.pdf")), 5);
}

#[tokio::test]
async fn test_single_file_submission_is_rejected() {
    let dir = TempDir::new().unwrap();
    let main = dir.path().join("a.pdf");
    create_pdf(&main, 1);

    let engine = MergeEngine::new(test_config(dir.path())).unwrap();
    let err = engine
        .submit(&main, Vec::new(), dir.path().join("o.pdf"))
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::InvalidInput);
    assert!(err.to_string().contains("additional files"));
    assert!(engine.current_job().is_none());
}

#[tokio::test]
async fn test_zero_byte_input_is_rejected_in_validation() {
    let dir = TempDir::new().unwrap();
    let scratch = TempDir::new().unwrap();
    let main = dir.path().join("a.pdf");
    let empty = dir.path().join("empty.pdf");
    create_pdf(&main, 1);
    std::fs::write(&empty, b"").unwrap();

    let engine = MergeEngine::new(test_config(scratch.path())).unwrap();
    engine
        .submit(&main, vec![empty], dir.path().join("o.pdf"))
        .unwrap();
    let err = engine.wait().await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::InvalidPdf);
    assert_eq!(err.stage(), Some(Stage::Validation));
    assert!(!dir.path().join("o.pdf").exists());
}

#[tokio::test]
async fn test_relative_output_uses_output_directory() {
    let dir = TempDir::new().unwrap();
    let out_dir = TempDir::new().unwrap();
    let main = dir.path().join("a.pdf");
    let extra = dir.path().join("b.pdf");
    create_pdf(&main, 1);
    create_pdf(&extra, 1);

    let mut config = test_config(dir.path());
    config.output_directory = Some(out_dir.path().to_path_buf());
    let engine = MergeEngine::new(config).unwrap();

    engine.submit(&main, vec![extra], "joined.pdf").unwrap();
    let report = engine.wait().await.unwrap();

    assert_eq!(report.output, out_dir.path().join("joined.pdf"));
    assert_eq!(page_count(&report.output), 2);
}

#[tokio::test]
async fn test_input_next_to_output_survives_merge() {
    let dir = TempDir::new().unwrap();
    let scratch = TempDir::new().unwrap();
    let main = dir.path().join("a.pdf");
    let sibling = dir.path().join("report.tmp");
    let output = dir.path().join("report.pdf");
    create_pdf(&main, 1);
    create_pdf(&sibling, 2);

    let engine = MergeEngine::new(test_config(scratch.path())).unwrap();
    engine.submit(&main, vec![sibling.clone()], &output).unwrap();
    engine.wait().await.unwrap();

    assert_eq!(page_count(&output), 3);
    assert_eq!(page_count(&sibling), 2);
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 3);
}

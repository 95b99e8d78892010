//! Integration tests for cancelling a job in flight.

use pdfmerge::error::Result;
use pdfmerge::ops::{LopdfOps, MergeObserver, PdfInfo, PdfOps};
use pdfmerge::{ErrorKind, Event, JobStatus, MergeEngine, MergeError};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tempfile::TempDir;

use crate::common::{EventLog, create_pdf, scratch_file_count, test_config};

/// Real PDF operations with a merge that dawdles for about two seconds.
struct SlowPdfOps {
    inner: LopdfOps,
}

impl SlowPdfOps {
    fn new() -> Self {
        Self {
            inner: LopdfOps::new(),
        }
    }
}

impl PdfOps for SlowPdfOps {
    fn validate(&self, path: &Path) -> Result<()> {
        self.inner.validate(path)
    }

    fn info(&self, path: &Path) -> Result<PdfInfo> {
        self.inner.info(path)
    }

    fn is_encrypted(&self, path: &Path) -> Result<bool> {
        self.inner.is_encrypted(path)
    }

    fn decrypt(&self, path: &Path, password: &str, output: &Path) -> Result<bool> {
        self.inner.decrypt(path, password, output)
    }

    fn merge(
        &self,
        main: &Path,
        additional: &[PathBuf],
        output: &Path,
        observer: Option<&dyn MergeObserver>,
    ) -> Result<()> {
        for _ in 0..200 {
            if observer.is_some_and(|o| o.is_cancelled()) {
                return Err(MergeError::Cancelled);
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        self.inner.merge(main, additional, output, observer)
    }
}

struct Fixture {
    _dir: TempDir,
    scratch: TempDir,
    main: PathBuf,
    extra: PathBuf,
    output: PathBuf,
}

impl Fixture {
    fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let scratch = TempDir::new().unwrap();
        let main = dir.path().join("a.pdf");
        let extra = dir.path().join("b.pdf");
        let output = dir.path().join("o.pdf");
        create_pdf(&main, 3);
        create_pdf(&extra, 2);
        Self {
            _dir: dir,
            scratch,
            main,
            extra,
            output,
        }
    }

    fn engine(&self) -> MergeEngine {
        MergeEngine::builder(test_config(self.scratch.path()))
            .pdf_ops(Arc::new(SlowPdfOps::new()))
            .build()
            .unwrap()
    }
}

#[tokio::test]
async fn test_cancel_running_job() {
    let fixture = Fixture::new();
    let engine = fixture.engine();
    let log = EventLog::new();
    engine.subscribe(log.subscriber());

    engine
        .submit(&fixture.main, vec![fixture.extra.clone()], &fixture.output)
        .unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    let started = Instant::now();
    let report = engine.cancel_current_job().unwrap();
    assert!(report.is_clean(), "{:?}", report.failures);

    let err = tokio::time::timeout(Duration::from_secs(5), engine.wait())
        .await
        .expect("job did not stop within 5s")
        .unwrap_err();
    assert!(err.is_cancelled(), "{err}");
    assert!(started.elapsed() < Duration::from_secs(5));

    assert!(!engine.is_running());
    let job = engine.current_job().unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.error.map(|e| e.kind), Some(ErrorKind::Cancelled));
    assert!(!fixture.output.exists());
    assert_eq!(scratch_file_count(fixture.scratch.path()), 0);

    let errors = log.errors();
    assert!(errors.iter().all(|e| e.is_cancelled()));
    assert!(log.completions().is_empty());
    assert_eq!(log.events().last(), Some(&Event::UiState(true)));
}

#[tokio::test]
async fn test_graceful_cancel_returns_with_terminal_job() {
    let fixture = Fixture::new();
    let engine = fixture.engine();

    engine
        .submit(&fixture.main, vec![fixture.extra.clone()], &fixture.output)
        .unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    let started = Instant::now();
    engine
        .graceful_cancel(Duration::from_secs(2))
        .await
        .unwrap();
    assert!(started.elapsed() < Duration::from_secs(3));
    assert!(engine.current_job().unwrap().is_terminal());

    let err = engine.wait().await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Cancelled);
}

#[tokio::test]
async fn test_cancel_without_job_reports_no_running_job() {
    let fixture = Fixture::new();
    let engine = fixture.engine();
    let log = EventLog::new();
    engine.subscribe(log.subscriber());

    let err = engine.cancel_current_job().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NoRunningJob);
    assert!(log.events().is_empty());
}

#[tokio::test]
async fn test_second_cancel_after_success_reports_no_running_job() {
    let fixture = Fixture::new();
    let engine = fixture.engine();

    engine
        .submit(&fixture.main, vec![fixture.extra.clone()], &fixture.output)
        .unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    engine.cancel_current_job().unwrap();
    let err = engine.cancel_current_job().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NoRunningJob);
    engine.wait().await.unwrap_err();
}

#[tokio::test]
async fn test_engine_accepts_new_job_after_cancel() {
    let fixture = Fixture::new();
    let engine = fixture.engine();

    engine
        .submit(&fixture.main, vec![fixture.extra.clone()], &fixture.output)
        .unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    engine.cancel_current_job().unwrap();
    engine.wait().await.unwrap_err();

    engine
        .submit(&fixture.main, vec![fixture.extra.clone()], &fixture.output)
        .unwrap();
    let report = engine.wait().await.unwrap();
    assert_eq!(report.total_pages, 5);
    assert!(fixture.output.exists());
}

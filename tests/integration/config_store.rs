//! Integration tests for configuration persistence and reload.

use pdfmerge::Config;
use pdfmerge::config::{ConfigStore, ConfigWatcher, default_config_path};
use serial_test::serial;
use std::ffi::OsString;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

/// Points HOME at a temp dir for the lifetime of the guard.
struct HomeGuard {
    previous: Option<OsString>,
    _home: TempDir,
}

impl HomeGuard {
    fn new() -> Self {
        let home = TempDir::new().unwrap();
        let previous = std::env::var_os("HOME");
        // SAFETY: tests touching HOME are serialized.
        unsafe { std::env::set_var("HOME", home.path()) };
        Self {
            previous,
            _home: home,
        }
    }
}

impl Drop for HomeGuard {
    fn drop(&mut self) {
        // SAFETY: tests touching HOME are serialized.
        unsafe {
            match &self.previous {
                Some(value) => std::env::set_var("HOME", value),
                None => std::env::remove_var("HOME"),
            }
        }
    }
}

#[test]
#[serial]
fn test_default_location_round_trip() {
    let _home = HomeGuard::new();
    let store = ConfigStore::at_default_location().unwrap();
    assert!(store.path().ends_with(".pdf-merger/config.json"));
    assert_eq!(default_config_path().as_deref(), Some(store.path()));

    let mut config = Config::default();
    config.max_memory = 64 * 1024 * 1024;
    config.auto_decrypt = false;
    config.common_passwords = vec!["".into(), "letmein".into(), "letmein".into()];
    config.engine.batch_size = 4;
    store.save(&config).unwrap();

    let reloaded = ConfigStore::at_default_location().unwrap().load().unwrap();
    assert_eq!(reloaded.max_memory, 64 * 1024 * 1024);
    assert!(!reloaded.auto_decrypt);
    assert_eq!(reloaded.common_passwords, vec!["".to_string(), "letmein".into()]);
    assert_eq!(reloaded.engine.batch_size, 4);
}

#[test]
#[serial]
fn test_missing_auto_decrypt_keeps_prior_value() {
    let _home = HomeGuard::new();
    let store = ConfigStore::at_default_location().unwrap();

    let mut config = Config::default();
    config.auto_decrypt = false;
    store.save(&config).unwrap();
    assert!(!store.load().unwrap().auto_decrypt);

    std::fs::write(store.path(), r#"{"maxMemory": 4096}"#).unwrap();
    let reloaded = store.load().unwrap();
    assert_eq!(reloaded.max_memory, 4096);
    assert!(!reloaded.auto_decrypt);
}

#[test]
#[serial]
fn test_invalid_document_is_rejected() {
    let _home = HomeGuard::new();
    let store = ConfigStore::at_default_location().unwrap();
    std::fs::create_dir_all(store.path().parent().unwrap()).unwrap();

    std::fs::write(store.path(), r#"{"maxMemory": 0}"#).unwrap();
    assert!(store.load().is_err());

    std::fs::write(store.path(), "not json").unwrap();
    assert!(store.load().is_err());
}

#[tokio::test]
async fn test_watcher_reports_changes() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(ConfigStore::new(dir.path().join("config.json")));
    store.save(&Config::default()).unwrap();

    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let watcher = ConfigWatcher::with_interval(
        Arc::clone(&store),
        Duration::from_millis(20),
        move |config| sink.lock().unwrap().push(config.max_memory),
    );

    // Let the watcher record the initial modification time first.
    tokio::time::sleep(Duration::from_millis(50)).await;
    // Some filesystems only keep second-resolution mtimes.
    tokio::time::sleep(Duration::from_millis(1100)).await;
    std::fs::write(store.path(), r#"{"maxMemory": 2048}"#).unwrap();

    let deadline = tokio::time::Instant::now() + Duration::from_secs(3);
    while seen.lock().unwrap().is_empty() && tokio::time::Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    watcher.stop().await;

    assert_eq!(seen.lock().unwrap().first(), Some(&2048));
}

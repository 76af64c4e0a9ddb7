//! Integration tests for daemon graceful shutdown
//!
//! Runs the full daemon (scheduler plus webhook server) in-process and
//! checks that a shutdown signal drains it, closes the store and removes
//! the PID file.

use chrono::{Duration as ChronoDuration, Utc};
use sdk::types::CheckInRecord;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use vigil_engine::app::App;
use vigil_engine::config::Config;
use vigil_engine::daemon::DaemonManager;
use vigil_engine::db::{CheckInStore, Database};
use vigil_engine::message_bus::{CheckInRecorded, Event, SOURCE_API};

fn create_test_config(temp_dir: &TempDir, server_enabled: bool) -> Config {
    let config_content = format!(
        r#"
[core]
log_level = "info"
data_dir = "{}"

[monitor]
interval_secs = 1

[server]
enabled = {}
bind_addr = "127.0.0.1:0"
"#,
        temp_dir.path().display(),
        server_enabled
    );

    let config_path = temp_dir.path().join("config.toml");
    std::fs::write(&config_path, config_content).unwrap();
    Config::load_from_path(&config_path).unwrap()
}

#[tokio::test]
async fn test_graceful_shutdown_sequence() {
    let temp_dir = TempDir::new().unwrap();
    let config = create_test_config(&temp_dir, true);

    let manager = Arc::new(DaemonManager::new(&config).unwrap());
    manager.start().unwrap();
    assert!(manager.pid_file_path().exists());

    let app = App::build(config.clone()).await.unwrap();
    let runner = {
        let manager = Arc::clone(&manager);
        tokio::spawn(async move { manager.run(app).await })
    };

    // Let the first tick run, then ask for shutdown
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(!runner.is_finished());
    manager.signal_shutdown();

    let result = tokio::time::timeout(Duration::from_secs(10), runner)
        .await
        .expect("daemon did not shut down in time")
        .unwrap();
    assert!(result.is_ok());
    assert!(manager.is_shutdown_signaled());
    assert!(!manager.pid_file_path().exists());
}

#[tokio::test]
async fn test_shutdown_without_server() {
    let temp_dir = TempDir::new().unwrap();
    let config = create_test_config(&temp_dir, false);

    let manager = Arc::new(DaemonManager::new(&config).unwrap());
    manager.start().unwrap();

    let app = App::build(config).await.unwrap();
    manager.signal_shutdown();

    let result = tokio::time::timeout(Duration::from_secs(5), manager.run(app))
        .await
        .expect("daemon did not shut down in time");
    assert!(result.is_ok());
    assert!(!manager.pid_file_path().exists());
}

#[tokio::test]
async fn test_store_is_intact_after_shutdown() {
    let temp_dir = TempDir::new().unwrap();
    let config = create_test_config(&temp_dir, false);
    let db_path = config.db_path();

    let manager = DaemonManager::new(&config).unwrap();
    manager.start().unwrap();

    let app = App::build(config).await.unwrap();
    let now = Utc::now();
    app.store
        .put(&CheckInRecord::new("u-keep", now - ChronoDuration::minutes(5)))
        .await
        .unwrap();
    app.store
        .put(
            &CheckInRecord::new("u-expired", now - ChronoDuration::hours(3))
                .with_ttl(now - ChronoDuration::hours(1)),
        )
        .await
        .unwrap();

    let shutdown = async {
        tokio::time::sleep(Duration::from_millis(200)).await;
        manager.signal_shutdown();
    };
    let (result, _) = tokio::join!(manager.run(app), shutdown);
    assert!(result.is_ok());

    // The first tick purged the expired record; the other survives reopen
    let db = Database::new(&db_path).await.unwrap();
    let store = db.check_ins();
    assert!(store.get("u-keep").await.unwrap().is_some());
    assert!(store.get("u-expired").await.unwrap().is_none());
    db.close().await.unwrap();
}

#[tokio::test]
async fn test_check_ins_published_before_shutdown_are_stored() {
    let temp_dir = TempDir::new().unwrap();
    let config = create_test_config(&temp_dir, false);
    let db_path = config.db_path();

    let manager = DaemonManager::new(&config).unwrap();
    manager.start().unwrap();

    let app = App::build(config).await.unwrap();
    let subjects: Vec<String> = (0..25).map(|i| format!("u-late-{}", i)).collect();
    for subject in &subjects {
        app.bus
            .publish(
                SOURCE_API,
                Event::CheckInRecorded(CheckInRecorded {
                    subject_id: Some(subject.clone()),
                    timestamp: None,
                    message: Some("made it".to_string()),
                    ttl_hours: None,
                }),
            )
            .await
            .unwrap();
    }

    // Shut down straight away; accepted events must still reach the store
    manager.signal_shutdown();
    let result = tokio::time::timeout(Duration::from_secs(10), manager.run(app))
        .await
        .expect("daemon did not shut down in time");
    assert!(result.is_ok());

    let db = Database::new(&db_path).await.unwrap();
    let store = db.check_ins();
    for subject in &subjects {
        let record = store.get(subject).await.unwrap();
        assert!(record.is_some(), "{} was lost at shutdown", subject);
    }
    db.close().await.unwrap();
}

#[tokio::test]
async fn test_status_follows_pid_file() {
    let temp_dir = TempDir::new().unwrap();
    let config = create_test_config(&temp_dir, false);

    let before = DaemonManager::status(&config).unwrap();
    assert!(!before.is_running);

    let manager = DaemonManager::new(&config).unwrap();
    manager.start().unwrap();

    let during = DaemonManager::status(&config).unwrap();
    assert!(during.is_running);
    assert_eq!(during.pid, Some(std::process::id()));

    drop(manager);
    let after = DaemonManager::status(&config).unwrap();
    assert!(!after.is_running);
}

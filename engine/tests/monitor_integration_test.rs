//! Integration tests for the staleness monitor
//!
//! Runs ticks against a real SQLite store, routing stale subjects either
//! through the event bus or straight to a recording dispatcher.

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};
use sdk::errors::EngineError;
use sdk::types::{Channel, CheckInRecord, DispatchSummary, NotificationOutcome, StalenessEvent};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::Mutex;
use vigil_engine::config::{DispatchMode, MonitorConfig, RetryConfig};
use vigil_engine::db::{CheckInStore, Database};
use vigil_engine::dispatcher::NotificationDispatcher;
use vigil_engine::message_bus::{BusEvent, DetailType, Event, EventBus, EventHandler, EventPattern};
use vigil_engine::monitor::{DispatchRoute, StalenessMonitor, SubjectOutcome};

#[derive(Default)]
struct RecordingDispatcher {
    events: Mutex<Vec<StalenessEvent>>,
}

#[async_trait]
impl NotificationDispatcher for RecordingDispatcher {
    async fn dispatch(&self, event: &StalenessEvent) -> DispatchSummary {
        self.events.lock().await.push(event.clone());
        DispatchSummary {
            subject_id: event.subject_id.clone(),
            outcomes: vec![NotificationOutcome::sent(Channel::Sms)],
        }
    }
}

#[derive(Default)]
struct RecordingHandler {
    seen: Mutex<Vec<StalenessEvent>>,
}

#[async_trait]
impl EventHandler for RecordingHandler {
    fn name(&self) -> &str {
        "recording-handler"
    }

    async fn handle(&self, event: &BusEvent) -> Result<(), EngineError> {
        if let Event::TimeForCheckin(staleness) = &event.event {
            self.seen.lock().await.push(staleness.clone());
        }
        Ok(())
    }
}

fn now() -> DateTime<Utc> {
    Utc.timestamp_opt(1_714_561_300, 0).unwrap()
}

fn monitor_config(mode: DispatchMode) -> MonitorConfig {
    MonitorConfig {
        threshold_secs: 3600,
        dispatch_mode: mode,
        retry: RetryConfig {
            max_attempts: 2,
            initial_backoff_ms: 1,
            max_backoff_ms: 5,
        },
        ..MonitorConfig::default()
    }
}

async fn setup() -> (TempDir, Database) {
    let temp_dir = TempDir::new().unwrap();
    let db = Database::new(&temp_dir.path().join("vigil.db")).await.unwrap();
    (temp_dir, db)
}

async fn seed(db: &Database, subject_id: &str, seconds_ago: i64) {
    db.check_ins()
        .put(&CheckInRecord::new(subject_id, now() - ChronoDuration::seconds(seconds_ago)))
        .await
        .unwrap();
}

async fn wait_for_events(handler: &RecordingHandler, expected: usize) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while handler.seen.lock().await.len() < expected {
        assert!(tokio::time::Instant::now() < deadline, "handler saw too few events");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

#[tokio::test]
async fn test_recent_check_in_is_ok_and_not_dispatched() {
    let (_dir, db) = setup().await;
    seed(&db, "u-recent", 1000).await;

    let dispatcher = Arc::new(RecordingDispatcher::default());
    let monitor = StalenessMonitor::new(Arc::new(db.check_ins()), monitor_config(DispatchMode::Direct))
        .with_dispatcher(dispatcher.clone());

    let report = monitor
        .check_subjects_at(vec!["u-recent".to_string()], now())
        .await;

    assert_eq!(report.reports.len(), 1);
    match &report.reports[0].outcome {
        SubjectOutcome::Ok { elapsed } => assert_eq!(elapsed.elapsed_seconds, 1000),
        other => panic!("expected Ok, got {:?}", other),
    }
    assert!(dispatcher.events.lock().await.is_empty());
}

#[tokio::test]
async fn test_stale_subject_is_dispatched_directly() {
    let (_dir, db) = setup().await;
    seed(&db, "u-stale", 3700).await;

    let dispatcher = Arc::new(RecordingDispatcher::default());
    let monitor = StalenessMonitor::new(Arc::new(db.check_ins()), monitor_config(DispatchMode::Direct))
        .with_dispatcher(dispatcher.clone());

    let report = monitor.check_subjects_at(vec!["u-stale".to_string()], now()).await;

    assert_eq!(report.dispatched_count(), 1);
    match &report.reports[0].outcome {
        SubjectOutcome::Dispatched {
            elapsed,
            route: DispatchRoute::Direct { summary },
        } => {
            assert_eq!(elapsed.elapsed_seconds, 3700);
            assert_eq!(summary.sent_count(), 1);
        }
        other => panic!("expected direct dispatch, got {:?}", other),
    }

    let events = dispatcher.events.lock().await;
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].subject_id, "u-stale");
    assert_eq!(events[0].elapsed_seconds, 3700);
    assert_eq!(events[0].threshold_seconds, 3600);
}

#[tokio::test]
async fn test_unknown_subject_is_not_notified() {
    let (_dir, db) = setup().await;

    let dispatcher = Arc::new(RecordingDispatcher::default());
    let monitor = StalenessMonitor::new(Arc::new(db.check_ins()), monitor_config(DispatchMode::Direct))
        .with_dispatcher(dispatcher.clone());

    let report = monitor.check_subjects_at(vec!["nobody".to_string()], now()).await;

    assert_eq!(report.reports[0].outcome, SubjectOutcome::NoRecord);
    assert!(dispatcher.events.lock().await.is_empty());
}

#[tokio::test]
async fn test_malformed_row_is_skipped_without_blocking_others() {
    let (_dir, db) = setup().await;
    seed(&db, "u-stale", 7200).await;
    sqlx::query("INSERT INTO check_ins (subject_id, last_checkin_at) VALUES ('u-bad', 'last tuesday')")
        .execute(db.pool())
        .await
        .unwrap();

    let dispatcher = Arc::new(RecordingDispatcher::default());
    let monitor = StalenessMonitor::new(Arc::new(db.check_ins()), monitor_config(DispatchMode::Direct))
        .with_dispatcher(dispatcher.clone());

    let report = monitor
        .check_subjects_at(vec!["u-bad".to_string(), "u-stale".to_string()], now())
        .await;

    assert_eq!(report.reports.len(), 2);
    let bad = report.reports.iter().find(|r| r.subject_id == "u-bad").unwrap();
    assert!(matches!(bad.outcome, SubjectOutcome::Skipped { .. }));
    assert_eq!(report.dispatched_count(), 1);
    assert_eq!(dispatcher.events.lock().await.len(), 1);
}

#[tokio::test]
async fn test_tick_scans_store_for_overdue_subjects() {
    let (_dir, db) = setup().await;
    seed(&db, "u-old", 5000).await;
    seed(&db, "u-fresh", 60).await;

    let dispatcher = Arc::new(RecordingDispatcher::default());
    let config = MonitorConfig {
        subjects: vec!["u-configured".to_string()],
        ..monitor_config(DispatchMode::Direct)
    };
    let monitor =
        StalenessMonitor::new(Arc::new(db.check_ins()), config).with_dispatcher(dispatcher.clone());

    let report = monitor.run_tick_at(now()).await;

    let checked: Vec<&str> = report.reports.iter().map(|r| r.subject_id.as_str()).collect();
    assert_eq!(checked.len(), 2);
    assert!(checked.contains(&"u-configured"));
    assert!(checked.contains(&"u-old"));
    assert!(!checked.contains(&"u-fresh"));

    let events = dispatcher.events.lock().await;
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].subject_id, "u-old");
}

#[tokio::test]
async fn test_stale_subject_is_published_on_bus() {
    let (_dir, db) = setup().await;
    seed(&db, "u-stale", 3700).await;

    let handler = Arc::new(RecordingHandler::default());
    let mut builder = EventBus::builder();
    builder.subscribe_handler(
        EventPattern::detail_type(DetailType::TimeForCheckin),
        handler.clone(),
    );
    let bus = Arc::new(builder.build());

    let dispatcher = Arc::new(RecordingDispatcher::default());
    let monitor = StalenessMonitor::new(Arc::new(db.check_ins()), monitor_config(DispatchMode::Bus))
        .with_bus(bus)
        .with_dispatcher(dispatcher.clone());

    let report = monitor.check_subjects_at(vec!["u-stale".to_string()], now()).await;

    match &report.reports[0].outcome {
        SubjectOutcome::Dispatched {
            route: DispatchRoute::Bus { matched, .. },
            ..
        } => assert_eq!(*matched, 1),
        other => panic!("expected bus dispatch, got {:?}", other),
    }

    wait_for_events(&handler, 1).await;
    assert_eq!(handler.seen.lock().await[0].subject_id, "u-stale");
    assert!(dispatcher.events.lock().await.is_empty());
}

#[tokio::test]
async fn test_closed_bus_falls_back_to_direct_dispatch() {
    let (_dir, db) = setup().await;
    seed(&db, "u-stale", 3700).await;

    let mut builder = EventBus::builder();
    builder.subscribe_handler(
        EventPattern::detail_type(DetailType::TimeForCheckin),
        Arc::new(RecordingHandler::default()),
    );
    let bus = Arc::new(builder.build());
    bus.close();

    let dispatcher = Arc::new(RecordingDispatcher::default());
    let monitor = StalenessMonitor::new(Arc::new(db.check_ins()), monitor_config(DispatchMode::Bus))
        .with_bus(bus)
        .with_dispatcher(dispatcher.clone());

    let report = monitor.check_subjects_at(vec!["u-stale".to_string()], now()).await;

    assert!(matches!(
        report.reports[0].outcome,
        SubjectOutcome::Dispatched {
            route: DispatchRoute::Direct { .. },
            ..
        }
    ));
    assert_eq!(dispatcher.events.lock().await.len(), 1);
}

#[tokio::test]
async fn test_closed_bus_without_fallback_fails_subject() {
    let (_dir, db) = setup().await;
    seed(&db, "u-stale", 3700).await;

    let bus = Arc::new(EventBus::builder().build());
    bus.close();

    let dispatcher = Arc::new(RecordingDispatcher::default());
    let config = MonitorConfig {
        fallback_to_direct: false,
        ..monitor_config(DispatchMode::Bus)
    };
    let monitor = StalenessMonitor::new(Arc::new(db.check_ins()), config)
        .with_bus(bus)
        .with_dispatcher(dispatcher.clone());

    let report = monitor.check_subjects_at(vec!["u-stale".to_string()], now()).await;

    match &report.reports[0].outcome {
        SubjectOutcome::Failed { error } => assert!(error.contains("Event bus unavailable")),
        other => panic!("expected failure, got {:?}", other),
    }
    assert_eq!(report.failed_count(), 1);
    assert!(dispatcher.events.lock().await.is_empty());
}

/// A store whose reads never finish
struct HangingStore;

#[async_trait]
impl CheckInStore for HangingStore {
    async fn get(&self, _subject_id: &str) -> Result<Option<CheckInRecord>, EngineError> {
        std::future::pending().await
    }

    async fn put(&self, _record: &CheckInRecord) -> Result<(), EngineError> {
        Ok(())
    }

    async fn query_by_time_range(
        &self,
        _from: DateTime<Utc>,
        _to: DateTime<Utc>,
    ) -> Result<Vec<CheckInRecord>, EngineError> {
        Ok(Vec::new())
    }

    async fn purge_expired(&self, _now: DateTime<Utc>) -> Result<u64, EngineError> {
        Ok(0)
    }
}

#[tokio::test]
async fn test_tick_deadline_defers_unfinished_subjects() {
    let config = MonitorConfig {
        tick_timeout_secs: 1,
        ..monitor_config(DispatchMode::Direct)
    };
    let monitor = StalenessMonitor::new(Arc::new(HangingStore), config);

    let report = monitor
        .check_subjects_at(vec!["u-1".to_string(), "u-2".to_string()], now())
        .await;

    assert!(report.reports.is_empty());
    assert_eq!(report.deferred, vec!["u-1", "u-2"]);
}

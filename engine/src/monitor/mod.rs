//! Staleness monitor
//!
//! One tick checks every known subject once and then returns. Per subject
//! the monitor walks `FETCH_RECORD -> DECIDE -> {DISPATCH | DONE}`:
//!
//! - **FETCH_RECORD** reads the subject's record, retrying transient store
//!   failures. A subject with no record is *unknown*, not stale, and
//!   finishes as `NoRecord` without any notification.
//! - **DECIDE** runs the elapsed-time calculator against the configured
//!   threshold. A malformed stored timestamp skips the subject for this tick
//!   (it is logged, never retried).
//! - **DISPATCH** publishes a `TimeForCheckin` event, or calls the fan-out
//!   dispatcher directly. If the bus is unavailable the monitor falls back
//!   to direct dispatch when configured to.
//!
//! Subjects within a tick run concurrently, bounded by `max_concurrency`.
//! The whole tick runs under `tick_timeout`; subjects not finished by then
//! are reported as deferred and picked up again next tick. Nothing carries
//! over between ticks except what is in the store.

use crate::config::{DispatchMode, MonitorConfig};
use crate::db::CheckInStore;
use crate::dispatcher::NotificationDispatcher;
use crate::elapsed::{calculate_between, Elapsed};
use crate::message_bus::{Event, EventBus, SOURCE_MONITOR};
use crate::retry::{retry_with_backoff, RetryPolicy};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use futures::stream::{self, StreamExt};
use sdk::errors::EngineError;
use sdk::types::{CheckInRecord, DispatchSummary, StalenessEvent};
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Where a subject currently is in its check
#[derive(Debug)]
enum Step {
    FetchRecord,
    Decide(CheckInRecord),
    Dispatch(Elapsed),
    Done(SubjectOutcome),
}

/// How a stale subject's notification left the monitor
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "route", rename_all = "camelCase")]
pub enum DispatchRoute {
    /// Published as a `TimeForCheckin` event
    #[serde(rename_all = "camelCase")]
    Bus { event_id: Uuid, matched: usize },
    /// Sent straight to the fan-out dispatcher
    Direct { summary: DispatchSummary },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "camelCase")]
pub enum SubjectOutcome {
    /// No record on file; treated as OK
    NoRecord,
    /// Checked in within the threshold
    Ok { elapsed: Elapsed },
    /// Stale and handed off for notification
    Dispatched {
        elapsed: Elapsed,
        route: DispatchRoute,
    },
    /// Stored data could not be evaluated; skipped this tick
    Skipped { reason: String },
    /// Stale or unknown because a collaborator failed
    Failed { error: String },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubjectReport {
    pub subject_id: String,
    #[serde(flatten)]
    pub outcome: SubjectOutcome,
}

/// Summary of one tick
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TickReport {
    pub checked_at: DateTime<Utc>,
    pub reports: Vec<SubjectReport>,
    /// Subjects not reached before the tick deadline
    pub deferred: Vec<String>,
}

impl TickReport {
    pub fn dispatched_count(&self) -> usize {
        self.reports
            .iter()
            .filter(|r| matches!(r.outcome, SubjectOutcome::Dispatched { .. }))
            .count()
    }

    pub fn failed_count(&self) -> usize {
        self.reports
            .iter()
            .filter(|r| {
                matches!(
                    r.outcome,
                    SubjectOutcome::Failed { .. } | SubjectOutcome::Skipped { .. }
                )
            })
            .count()
    }
}

pub struct StalenessMonitor {
    store: Arc<dyn CheckInStore>,
    bus: Option<Arc<EventBus>>,
    dispatcher: Option<Arc<dyn NotificationDispatcher>>,
    config: MonitorConfig,
    retry: RetryPolicy,
}

impl StalenessMonitor {
    pub fn new(store: Arc<dyn CheckInStore>, config: MonitorConfig) -> Self {
        let retry = RetryPolicy::from(&config.retry);
        Self {
            store,
            bus: None,
            dispatcher: None,
            config,
            retry,
        }
    }

    pub fn with_bus(mut self, bus: Arc<EventBus>) -> Self {
        self.bus = Some(bus);
        self
    }

    pub fn with_dispatcher(mut self, dispatcher: Arc<dyn NotificationDispatcher>) -> Self {
        self.dispatcher = Some(dispatcher);
        self
    }

    pub fn threshold_secs(&self) -> i64 {
        self.config.threshold_secs
    }

    /// Run one tick at the current time
    pub async fn tick(&self) -> TickReport {
        self.run_tick_at(Utc::now()).await
    }

    /// Run one tick over the known subjects as of `now`
    pub async fn run_tick_at(&self, now: DateTime<Utc>) -> TickReport {
        let subjects = self.collect_subjects(now).await;
        self.check_subjects_at(subjects, now).await
    }

    /// Run one tick over an explicit subject list
    pub async fn check_subjects_at(&self, subjects: Vec<String>, now: DateTime<Utc>) -> TickReport {
        let deadline = tokio::time::Instant::now() + self.config.tick_timeout();
        let mut pending: HashSet<String> = subjects.iter().cloned().collect();
        let mut reports = Vec::with_capacity(subjects.len());

        info!(subjects = subjects.len(), at = %now, "Staleness tick started");

        {
            let mut checks = stream::iter(subjects.clone())
                .map(|subject_id| self.check_subject_at(subject_id, now))
                .buffer_unordered(self.config.max_concurrency.max(1));

            loop {
                match tokio::time::timeout_at(deadline, checks.next()).await {
                    Ok(Some(report)) => {
                        pending.remove(&report.subject_id);
                        reports.push(report);
                    }
                    Ok(None) => break,
                    Err(_) => {
                        warn!(
                            remaining = pending.len(),
                            timeout_secs = self.config.tick_timeout_secs,
                            "Tick deadline reached; deferring remaining subjects"
                        );
                        break;
                    }
                }
            }
        }

        let deferred: Vec<String> = subjects
            .into_iter()
            .filter(|s| pending.contains(s))
            .collect();

        let report = TickReport {
            checked_at: now,
            reports,
            deferred,
        };
        info!(
            checked = report.reports.len(),
            dispatched = report.dispatched_count(),
            failed = report.failed_count(),
            deferred = report.deferred.len(),
            "Staleness tick finished"
        );
        report
    }

    /// Configured subjects followed by any the store knows to be overdue
    async fn collect_subjects(&self, now: DateTime<Utc>) -> Vec<String> {
        let mut seen = HashSet::new();
        let mut subjects: Vec<String> = self
            .config
            .subjects
            .iter()
            .filter(|s| seen.insert((*s).clone()))
            .cloned()
            .collect();

        if !self.config.scan_store {
            return subjects;
        }

        let from = now - ChronoDuration::seconds(self.config.scan_lookback_secs);
        let to = now - ChronoDuration::seconds(self.config.threshold_secs);
        if from > to {
            return subjects;
        }

        match retry_with_backoff(&self.retry, "scan store", || {
            self.store.query_by_time_range(from, to)
        })
        .await
        {
            Ok(records) => {
                for record in records {
                    if seen.insert(record.subject_id.clone()) {
                        subjects.push(record.subject_id);
                    }
                }
            }
            Err(e) => warn!("Store scan failed; checking configured subjects only: {}", e),
        }

        subjects
    }

    /// Check one subject as of `now`
    pub async fn check_subject_at(&self, subject_id: String, now: DateTime<Utc>) -> SubjectReport {
        let mut step = Step::FetchRecord;

        let outcome = loop {
            debug!(subject_id = %subject_id, step = step_name(&step), "Monitor step");
            step = match step {
                Step::FetchRecord => self.fetch_record(&subject_id).await,
                Step::Decide(record) => self.decide(record, now),
                Step::Dispatch(elapsed) => self.dispatch(&subject_id, elapsed).await,
                Step::Done(outcome) => break outcome,
            };
        };

        SubjectReport {
            subject_id,
            outcome,
        }
    }

    async fn fetch_record(&self, subject_id: &str) -> Step {
        let result = retry_with_backoff(&self.retry, "fetch check-in", || {
            self.store.get(subject_id)
        })
        .await;

        match result {
            Ok(Some(record)) => Step::Decide(record),
            Ok(None) => {
                info!(subject_id, "No check-in on record; treating as OK");
                Step::Done(SubjectOutcome::NoRecord)
            }
            Err(EngineError::InvalidTimestamp(detail)) => {
                error!(subject_id, "Skipping subject with malformed check-in time: {}", detail);
                Step::Done(SubjectOutcome::Skipped {
                    reason: EngineError::InvalidTimestamp(detail).to_string(),
                })
            }
            Err(e) => {
                error!(subject_id, "Could not read check-in: {}", e);
                Step::Done(SubjectOutcome::Failed {
                    error: e.to_string(),
                })
            }
        }
    }

    fn decide(&self, record: CheckInRecord, now: DateTime<Utc>) -> Step {
        let elapsed = calculate_between(record.last_check_in_at, now, self.config.threshold_secs);

        if elapsed.is_stale() {
            Step::Dispatch(elapsed)
        } else {
            debug!(
                subject_id = %record.subject_id,
                elapsed_seconds = elapsed.elapsed_seconds,
                "Within threshold"
            );
            Step::Done(SubjectOutcome::Ok { elapsed })
        }
    }

    async fn dispatch(&self, subject_id: &str, elapsed: Elapsed) -> Step {
        let event = StalenessEvent {
            subject_id: subject_id.to_string(),
            elapsed_seconds: elapsed.elapsed_seconds,
            last_check_in_at: elapsed.metadata.last_check_in_at,
            current_time: elapsed.metadata.current_time,
            threshold_seconds: elapsed.metadata.threshold_seconds,
            human_message: elapsed.metadata.human_message.clone(),
        };
        info!(
            subject_id,
            elapsed_seconds = event.elapsed_seconds,
            "Subject is stale"
        );

        let via_bus = match (&self.config.dispatch_mode, &self.bus) {
            (DispatchMode::Bus, Some(bus)) => Some(self.publish(bus, &event).await),
            _ => None,
        };

        let outcome = match via_bus {
            Some(Ok(route)) => SubjectOutcome::Dispatched { elapsed, route },
            Some(Err(e)) if self.config.fallback_to_direct => {
                warn!(subject_id, "Event bus unavailable, dispatching directly: {}", e);
                self.dispatch_direct(&event, elapsed).await
            }
            Some(Err(e)) => {
                error!(subject_id, "Event bus unavailable and fallback disabled: {}", e);
                SubjectOutcome::Failed {
                    error: e.to_string(),
                }
            }
            None => self.dispatch_direct(&event, elapsed).await,
        };

        Step::Done(outcome)
    }

    async fn publish(
        &self,
        bus: &EventBus,
        event: &StalenessEvent,
    ) -> Result<DispatchRoute, EngineError> {
        let receipt = retry_with_backoff(&self.retry, "publish TimeForCheckin", || {
            bus.publish(SOURCE_MONITOR, Event::TimeForCheckin(event.clone()))
        })
        .await?;

        if receipt.matched == 0 {
            warn!(
                subject_id = %event.subject_id,
                "TimeForCheckin published but nothing subscribes to it"
            );
        }

        Ok(DispatchRoute::Bus {
            event_id: receipt.event_id,
            matched: receipt.matched,
        })
    }

    async fn dispatch_direct(&self, event: &StalenessEvent, elapsed: Elapsed) -> SubjectOutcome {
        let Some(dispatcher) = &self.dispatcher else {
            return SubjectOutcome::Failed {
                error: "no dispatcher configured".to_string(),
            };
        };

        let summary = dispatcher.dispatch(event).await;
        SubjectOutcome::Dispatched {
            elapsed,
            route: DispatchRoute::Direct { summary },
        }
    }
}

fn step_name(step: &Step) -> &'static str {
    match step {
        Step::FetchRecord => "FETCH_RECORD",
        Step::Decide(_) => "DECIDE",
        Step::Dispatch(_) => "DISPATCH",
        Step::Done(_) => "DONE",
    }
}

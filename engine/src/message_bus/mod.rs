//! Event bus
//!
//! Decouples producers (the staleness monitor, the webhook server, voice
//! sessions) from consumers (the fan-out dispatcher, the check-in recorder).
//! Events are a tagged union keyed by detail type; each tag has one schema.
//!
//! Subscriptions are fixed when the bus is built, so publishing never takes
//! a lock. Each subscriber owns a bounded queue. Delivery to subscribers is
//! parallel and independent, and handlers driven by the bus are retried
//! with capped exponential backoff (at-least-once).
//!
//! A publish succeeds only once every matching queue has accepted the event.
//! Subscribers whose queue stays full are retried a few times within the
//! publish; any still unreached are named in an `EventBusUnavailable`
//! returned to the publisher, which may republish (subscribers that already
//! accepted then see the event twice) or fall back.
//!
//! `shutdown` stops new publishes, lets every handler drain its queue and
//! waits for in-flight deliveries before returning.

use crate::elapsed::parse_timestamp;
use crate::retry::{retry_with_backoff, RetryPolicy};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use futures::FutureExt;
use sdk::errors::EngineError;
use sdk::types::StalenessEvent;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc::error::SendTimeoutError;
use tokio::sync::{mpsc, watch};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, warn};
use uuid::Uuid;

pub mod pattern;

pub use pattern::EventPattern;

/// Source used by the staleness monitor
pub const SOURCE_MONITOR: &str = "vigil.monitor";
/// Source used by voice check-in sessions
pub const SOURCE_VOICE: &str = "vigil.voice";
/// Source used by the webhook server and CLI
pub const SOURCE_API: &str = "vigil.api";

const DEFAULT_BUFFER_SIZE: usize = 100;
const DEFAULT_SEND_TIMEOUT: Duration = Duration::from_secs(1);
const DEFAULT_SEND_ATTEMPTS: u32 = 3;

/// Event detail types
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub enum DetailType {
    /// A subject has gone stale and should be notified
    TimeForCheckin,
    /// Someone asked for a subject to be prompted
    CheckInRequired,
    /// A check-in happened and should be persisted
    CheckInRecorded,
}

impl DetailType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DetailType::TimeForCheckin => "TimeForCheckin",
            DetailType::CheckInRequired => "CheckInRequired",
            DetailType::CheckInRecorded => "CheckInRecorded",
        }
    }
}

impl fmt::Display for DetailType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DetailType {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "TimeForCheckin" => Ok(DetailType::TimeForCheckin),
            "CheckInRequired" => Ok(DetailType::CheckInRequired),
            "CheckInRecorded" => Ok(DetailType::CheckInRecorded),
            other => Err(EngineError::InvalidEvent(format!(
                "unknown detail type '{}'",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckInRequired {
    pub subject_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Timestamp as either Unix seconds or ISO-8601 text
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TimestampInput {
    Seconds(i64),
    Text(String),
}

impl TimestampInput {
    pub fn resolve(&self) -> Result<DateTime<Utc>, EngineError> {
        match self {
            TimestampInput::Seconds(secs) => crate::elapsed::from_unix_seconds(*secs),
            TimestampInput::Text(text) => parse_timestamp(text),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckInRecorded {
    /// Generated by the recorder when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject_id: Option<String>,
    /// "Now" at the recorder when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<TimestampInput>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Expiry in hours from the check-in
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl_hours: Option<i64>,
}

/// Expiry `hours` after `at`
///
/// # Errors
///
/// `InvalidEvent` when `hours` is not positive or the expiry would fall
/// outside the representable time range.
pub fn ttl_expiry(at: DateTime<Utc>, hours: i64) -> Result<DateTime<Utc>, EngineError> {
    if hours <= 0 {
        return Err(EngineError::InvalidEvent(
            "ttlHours must be positive".to_string(),
        ));
    }
    chrono::TimeDelta::try_hours(hours)
        .and_then(|ttl| at.checked_add_signed(ttl))
        .ok_or_else(|| EngineError::InvalidEvent(format!("ttlHours {} is out of range", hours)))
}

/// Events carried by the bus, one schema per detail type
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    TimeForCheckin(StalenessEvent),
    CheckInRequired(CheckInRequired),
    CheckInRecorded(CheckInRecorded),
}

impl Event {
    pub fn detail_type(&self) -> DetailType {
        match self {
            Event::TimeForCheckin(_) => DetailType::TimeForCheckin,
            Event::CheckInRequired(_) => DetailType::CheckInRequired,
            Event::CheckInRecorded(_) => DetailType::CheckInRecorded,
        }
    }

    /// Subject the event concerns, if it names one
    pub fn subject_id(&self) -> Option<&str> {
        match self {
            Event::TimeForCheckin(e) => Some(&e.subject_id),
            Event::CheckInRequired(e) => Some(&e.subject_id),
            Event::CheckInRecorded(e) => e.subject_id.as_deref(),
        }
    }

    fn detail_json(&self) -> Result<Value, serde_json::Error> {
        match self {
            Event::TimeForCheckin(e) => serde_json::to_value(e),
            Event::CheckInRequired(e) => serde_json::to_value(e),
            Event::CheckInRecorded(e) => serde_json::to_value(e),
        }
    }

    /// Check field contents beyond what the schema enforces
    pub fn validate(&self) -> Result<(), EngineError> {
        let blank_subject = match self {
            Event::TimeForCheckin(e) => e.subject_id.trim().is_empty(),
            Event::CheckInRequired(e) => e.subject_id.trim().is_empty(),
            Event::CheckInRecorded(e) => e
                .subject_id
                .as_deref()
                .is_some_and(|id| id.trim().is_empty()),
        };
        if blank_subject {
            return Err(EngineError::InvalidEvent(format!(
                "{} has an empty subjectId",
                self.detail_type()
            )));
        }

        if let Event::CheckInRecorded(e) = self {
            let at = match &e.timestamp {
                Some(ts) => ts
                    .resolve()
                    .map_err(|err| EngineError::InvalidEvent(err.to_string()))?,
                None => Utc::now(),
            };
            if let Some(hours) = e.ttl_hours {
                ttl_expiry(at, hours)?;
            }
        }

        Ok(())
    }
}

/// Wire form of an event: `{source, detailType, detail}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    pub source: String,
    pub detail_type: String,
    pub detail: Value,
}

impl Envelope {
    /// Validate an untrusted envelope into a typed event
    pub fn into_event(self) -> Result<(String, Event), EngineError> {
        let detail_type: DetailType = self.detail_type.parse()?;
        let invalid = |e: serde_json::Error| {
            EngineError::InvalidEvent(format!("{} detail: {}", detail_type, e))
        };

        let event = match detail_type {
            DetailType::TimeForCheckin => {
                Event::TimeForCheckin(serde_json::from_value(self.detail).map_err(invalid)?)
            }
            DetailType::CheckInRequired => {
                Event::CheckInRequired(serde_json::from_value(self.detail).map_err(invalid)?)
            }
            DetailType::CheckInRecorded => {
                Event::CheckInRecorded(serde_json::from_value(self.detail).map_err(invalid)?)
            }
        };
        event.validate()?;

        Ok((self.source, event))
    }
}

/// An event as delivered to subscribers
#[derive(Debug, Clone)]
pub struct BusEvent {
    pub id: Uuid,
    pub source: String,
    pub published_at: DateTime<Utc>,
    pub event: Event,
    detail: Value,
}

impl BusEvent {
    pub fn new(source: impl Into<String>, event: Event) -> Result<Self, EngineError> {
        let detail = event
            .detail_json()
            .map_err(|e| EngineError::InvalidEvent(e.to_string()))?;

        Ok(Self {
            id: Uuid::new_v4(),
            source: source.into(),
            published_at: Utc::now(),
            event,
            detail,
        })
    }

    pub fn detail_type(&self) -> DetailType {
        self.event.detail_type()
    }

    /// Detail as JSON, used for structural matching
    pub fn detail(&self) -> &Value {
        &self.detail
    }

    pub fn to_envelope(&self) -> Envelope {
        Envelope {
            source: self.source.clone(),
            detail_type: self.detail_type().to_string(),
            detail: self.detail.clone(),
        }
    }
}

/// Outcome of one publish
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishReceipt {
    pub event_id: Uuid,
    /// Subscribers whose pattern matched
    pub matched: usize,
    /// Subscribers whose queue accepted the event
    pub delivered: usize,
}

/// A subscriber driven by the bus
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Name used in logs
    fn name(&self) -> &str;

    async fn handle(&self, event: &BusEvent) -> Result<(), EngineError>;
}

struct Subscriber {
    name: String,
    pattern: EventPattern,
    tx: mpsc::Sender<BusEvent>,
}

/// Collects subscriptions before the bus is shared
pub struct EventBusBuilder {
    buffer_size: usize,
    send_timeout: Duration,
    send_attempts: u32,
    delivery_policy: RetryPolicy,
    subscribers: Vec<Subscriber>,
    handlers: Vec<(mpsc::Receiver<BusEvent>, Arc<dyn EventHandler>)>,
}

impl EventBusBuilder {
    pub fn new() -> Self {
        Self {
            buffer_size: DEFAULT_BUFFER_SIZE,
            send_timeout: DEFAULT_SEND_TIMEOUT,
            send_attempts: DEFAULT_SEND_ATTEMPTS,
            delivery_policy: RetryPolicy::default(),
            subscribers: Vec::new(),
            handlers: Vec::new(),
        }
    }

    pub fn buffer_size(mut self, size: usize) -> Self {
        self.buffer_size = size.max(1);
        self
    }

    /// How long a publish waits on a full queue
    pub fn send_timeout(mut self, timeout: Duration) -> Self {
        self.send_timeout = timeout;
        self
    }

    /// Attempts made per publish to reach a subscriber whose queue is full
    pub fn send_attempts(mut self, attempts: u32) -> Self {
        self.send_attempts = attempts.max(1);
        self
    }

    /// Redelivery policy for handlers
    pub fn delivery_policy(mut self, policy: RetryPolicy) -> Self {
        self.delivery_policy = policy;
        self
    }

    /// Subscribe a raw receiver
    pub fn subscribe(&mut self, pattern: EventPattern) -> mpsc::Receiver<BusEvent> {
        let name = format!("subscriber-{}", self.subscribers.len());
        self.subscribe_named(name, pattern)
    }

    /// Subscribe a raw receiver under a name used in logs and errors
    pub fn subscribe_named(
        &mut self,
        name: impl Into<String>,
        pattern: EventPattern,
    ) -> mpsc::Receiver<BusEvent> {
        let (tx, rx) = mpsc::channel(self.buffer_size);
        self.subscribers.push(Subscriber {
            name: name.into(),
            pattern,
            tx,
        });
        rx
    }

    /// Subscribe a handler; it is driven once the bus is built
    pub fn subscribe_handler(&mut self, pattern: EventPattern, handler: Arc<dyn EventHandler>) {
        let rx = self.subscribe_named(handler.name().to_string(), pattern);
        self.handlers.push((rx, handler));
    }

    /// Freeze subscriptions and start handler delivery loops
    ///
    /// Must be called from within a tokio runtime.
    pub fn build(self) -> EventBus {
        let (stop_tx, stop_rx) = watch::channel(false);
        let handler_loops = self
            .handlers
            .into_iter()
            .map(|(rx, handler)| {
                tokio::spawn(run_handler(
                    rx,
                    handler,
                    self.delivery_policy,
                    stop_rx.clone(),
                ))
            })
            .collect();

        EventBus {
            subscribers: self.subscribers,
            send_timeout: self.send_timeout,
            send_attempts: self.send_attempts,
            closed: AtomicBool::new(false),
            stop: stop_tx,
            handler_loops: Mutex::new(handler_loops),
        }
    }
}

impl Default for EventBusBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Immutable, shareable event bus
pub struct EventBus {
    subscribers: Vec<Subscriber>,
    send_timeout: Duration,
    send_attempts: u32,
    closed: AtomicBool,
    stop: watch::Sender<bool>,
    handler_loops: Mutex<Vec<JoinHandle<()>>>,
}

impl EventBus {
    pub fn builder() -> EventBusBuilder {
        EventBusBuilder::new()
    }

    /// Publish an event to every matching subscriber
    ///
    /// An event no pattern matches is dropped and still counts as published.
    ///
    /// # Errors
    ///
    /// `EventBusUnavailable` when the bus is closed or some matching queue
    /// did not accept the event; `InvalidEvent` when the detail cannot be
    /// encoded.
    pub async fn publish(
        &self,
        source: &str,
        event: Event,
    ) -> Result<PublishReceipt, EngineError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(EngineError::EventBusUnavailable(
                "event bus is closed".to_string(),
            ));
        }

        let bus_event = BusEvent::new(source, event)?;
        let matching: Vec<&Subscriber> = self
            .subscribers
            .iter()
            .filter(|s| s.pattern.matches(&bus_event))
            .collect();

        let mut pending = matching.clone();
        let mut gone: Vec<&Subscriber> = Vec::new();
        for attempt in 1..=self.send_attempts {
            if pending.is_empty() {
                break;
            }
            let sends = pending
                .iter()
                .map(|s| s.tx.send_timeout(bus_event.clone(), self.send_timeout));
            let results = join_all(sends).await;

            let mut still_full = Vec::new();
            for (subscriber, result) in pending.into_iter().zip(results) {
                match result {
                    Ok(()) => {}
                    Err(SendTimeoutError::Timeout(_)) => still_full.push(subscriber),
                    Err(SendTimeoutError::Closed(_)) => gone.push(subscriber),
                }
            }
            if !still_full.is_empty() {
                debug!(
                    event_id = %bus_event.id,
                    attempt,
                    full = still_full.len(),
                    "Subscriber queues full, retrying"
                );
            }
            pending = still_full;
        }
        pending.extend(gone);

        let receipt = PublishReceipt {
            event_id: bus_event.id,
            matched: matching.len(),
            delivered: matching.len() - pending.len(),
        };

        if !pending.is_empty() {
            let names: Vec<&str> = pending.iter().map(|s| s.name.as_str()).collect();
            warn!(
                event_id = %bus_event.id,
                detail_type = %bus_event.detail_type(),
                matched = receipt.matched,
                delivered = receipt.delivered,
                unreached = ?names,
                "Event did not reach every subscriber"
            );
            return Err(EngineError::EventBusUnavailable(format!(
                "{} event {} not accepted by {} ({} of {} subscribers reached)",
                bus_event.detail_type(),
                bus_event.id,
                names.join(", "),
                receipt.delivered,
                receipt.matched
            )));
        }

        debug!(
            event_id = %bus_event.id,
            detail_type = %bus_event.detail_type(),
            source,
            matched = receipt.matched,
            "Published event"
        );
        Ok(receipt)
    }

    /// Reject further publishes
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }

    /// Close the bus and wait for handlers to finish queued and in-flight
    /// deliveries
    ///
    /// Returns `false` if `grace` ran out first; deliveries still running
    /// are then abandoned.
    pub async fn shutdown(&self, grace: Duration) -> bool {
        self.close();
        self.stop.send_replace(true);

        let loops = {
            let mut guard = self
                .handler_loops
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            std::mem::take(&mut *guard)
        };
        if loops.is_empty() {
            return true;
        }

        match tokio::time::timeout(grace, join_all(loops)).await {
            Ok(_) => {
                debug!("Event handlers drained");
                true
            }
            Err(_) => {
                warn!(
                    grace_ms = grace.as_millis() as u64,
                    "Event handlers still busy at shutdown, abandoning deliveries"
                );
                false
            }
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }
}

async fn run_handler(
    mut rx: mpsc::Receiver<BusEvent>,
    handler: Arc<dyn EventHandler>,
    policy: RetryPolicy,
    mut stop: watch::Receiver<bool>,
) {
    let mut in_flight = JoinSet::new();

    loop {
        tokio::select! {
            event = rx.recv() => match event {
                Some(event) => {
                    in_flight.spawn(deliver(Arc::clone(&handler), policy, event));
                }
                None => break,
            },
            Some(_) = in_flight.join_next(), if !in_flight.is_empty() => {}
            bus_dropped = stop.wait_for(|stopped| *stopped).map(|r| r.is_err()) => {
                // Refuse new sends but keep what is already queued
                rx.close();
                if bus_dropped {
                    debug!(handler = handler.name(), "Event bus dropped");
                }
                while let Some(event) = rx.recv().await {
                    in_flight.spawn(deliver(Arc::clone(&handler), policy, event));
                }
                break;
            }
        }
    }

    while in_flight.join_next().await.is_some() {}
    debug!(handler = handler.name(), "Event handler stopped");
}

async fn deliver(handler: Arc<dyn EventHandler>, policy: RetryPolicy, event: BusEvent) {
    let result = retry_with_backoff(&policy, handler.name(), || handler.handle(&event)).await;

    if let Err(e) = result {
        error!(
            handler = handler.name(),
            event_id = %event.id,
            detail_type = %event.detail_type(),
            "Event handler gave up: {}",
            e
        );
    }
}

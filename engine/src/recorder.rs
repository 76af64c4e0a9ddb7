//! Check-in recorder
//!
//! Bus handler that turns `CheckInRecorded` events into store writes. Writes
//! are whole-record upserts, so a redelivered event only rewrites the same
//! record.

use crate::db::CheckInStore;
use crate::message_bus::{ttl_expiry, BusEvent, CheckInRecorded, Event, EventHandler};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sdk::errors::EngineError;
use sdk::types::CheckInRecord;
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

/// Build the record a `CheckInRecorded` detail describes
///
/// A missing subject id is generated and a missing timestamp means `now`.
pub fn record_from_detail(
    detail: &CheckInRecorded,
    now: DateTime<Utc>,
) -> Result<CheckInRecord, EngineError> {
    let subject_id = detail
        .subject_id
        .clone()
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    let at = match &detail.timestamp {
        Some(ts) => ts.resolve()?,
        None => now,
    };

    let mut record = CheckInRecord::new(subject_id, at);
    if let Some(message) = detail.message.as_deref().filter(|m| !m.is_empty()) {
        record = record.with_message(message);
    }
    if let Some(hours) = detail.ttl_hours {
        record = record.with_ttl(ttl_expiry(at, hours)?);
    }
    Ok(record)
}

pub struct CheckInRecorder {
    store: Arc<dyn CheckInStore>,
}

impl CheckInRecorder {
    pub fn new(store: Arc<dyn CheckInStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl EventHandler for CheckInRecorder {
    fn name(&self) -> &str {
        "check-in-recorder"
    }

    async fn handle(&self, event: &BusEvent) -> Result<(), EngineError> {
        let Event::CheckInRecorded(detail) = &event.event else {
            debug!(event_id = %event.id, "Recorder ignoring {}", event.detail_type());
            return Ok(());
        };

        let record = record_from_detail(detail, event.published_at)?;
        self.store.put(&record).await?;

        info!(
            event_id = %event.id,
            source = %event.source,
            subject_id = %record.subject_id,
            "Check-in recorded"
        );
        Ok(())
    }
}

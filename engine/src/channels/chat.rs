//! Team-chat delivery (`chat.postMessage`-style API)
//!
//! Besides serving as a fan-out channel, `ChatAnnouncer` subscribes to
//! check-in events on the bus and posts a short line for each.

use super::{ChannelAdapter, HttpSender, NotificationPayload};
use crate::message_bus::{BusEvent, Event, EventHandler};
use async_trait::async_trait;
use sdk::errors::EngineError;
use sdk::types::Channel;
use serde_json::json;
use std::sync::Arc;

pub struct ChatAdapter {
    http: HttpSender,
}

impl ChatAdapter {
    pub fn new(http: HttpSender) -> Self {
        Self { http }
    }
}

#[async_trait]
impl ChannelAdapter for ChatAdapter {
    fn channel(&self) -> Channel {
        Channel::Chat
    }

    async fn send(
        &self,
        destination: &str,
        payload: &NotificationPayload,
    ) -> Result<(), EngineError> {
        let response = self
            .http
            .post_json(
                Channel::Chat,
                &json!({
                    "channel": destination,
                    "text": payload.body,
                }),
            )
            .await?;

        // chat.postMessage-style APIs answer 200 with {"ok": false} on failure
        if response.get("ok").and_then(|v| v.as_bool()) == Some(false) {
            let reason = response
                .get("error")
                .and_then(|v| v.as_str())
                .unwrap_or("unknown error");
            return Err(EngineError::delivery(Channel::Chat, reason));
        }

        Ok(())
    }
}

/// Default chat line for a subject that needs to check in
pub fn required_message(subject_id: &str) -> String {
    format!("User {} needs to check in", subject_id)
}

/// Default chat line for a subject that has checked in
pub fn recorded_message(subject_id: &str) -> String {
    format!("User {} has checked in", subject_id)
}

/// Posts check-in requests and confirmations to the team channel
pub struct ChatAnnouncer {
    adapter: Arc<dyn ChannelAdapter>,
    destination: String,
}

impl ChatAnnouncer {
    pub fn new(adapter: Arc<dyn ChannelAdapter>, destination: impl Into<String>) -> Self {
        Self {
            adapter,
            destination: destination.into(),
        }
    }
}

#[async_trait]
impl EventHandler for ChatAnnouncer {
    fn name(&self) -> &str {
        "chat-announcer"
    }

    async fn handle(&self, event: &BusEvent) -> Result<(), EngineError> {
        let payload = match &event.event {
            Event::CheckInRequired(detail) => NotificationPayload::new(
                &detail.subject_id,
                detail
                    .message
                    .clone()
                    .unwrap_or_else(|| required_message(&detail.subject_id)),
            ),
            Event::CheckInRecorded(detail) => {
                let subject = detail.subject_id.as_deref().unwrap_or("unknown");
                NotificationPayload::new(
                    subject,
                    detail
                        .message
                        .clone()
                        .unwrap_or_else(|| recorded_message(subject)),
                )
            }
            Event::TimeForCheckin(_) => return Ok(()),
        };

        self.adapter.send(&self.destination, &payload).await
    }
}

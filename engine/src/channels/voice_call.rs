//! Outbound reminder calls through the telephony provider
//!
//! The provider dials `destination` and reads the script aloud. This is a
//! one-way notification; interactive check-in calls are handled by
//! `crate::voice`.

use super::{ChannelAdapter, HttpSender, NotificationPayload};
use async_trait::async_trait;
use sdk::errors::EngineError;
use sdk::types::Channel;
use serde_json::json;
use tracing::debug;

pub struct VoiceCallAdapter {
    http: HttpSender,
    from_number: String,
}

impl VoiceCallAdapter {
    pub fn new(http: HttpSender, from_number: impl Into<String>) -> Self {
        Self {
            http,
            from_number: from_number.into(),
        }
    }
}

#[async_trait]
impl ChannelAdapter for VoiceCallAdapter {
    fn channel(&self) -> Channel {
        Channel::Voice
    }

    async fn send(
        &self,
        destination: &str,
        payload: &NotificationPayload,
    ) -> Result<(), EngineError> {
        let response = self
            .http
            .post_json(
                Channel::Voice,
                &json!({
                    "fromPhoneNumber": self.from_number,
                    "toPhoneNumber": destination,
                    "script": payload.body,
                }),
            )
            .await?;

        debug!(
            subject_id = %payload.subject_id,
            call_id = response.get("callId").and_then(|v| v.as_str()).unwrap_or("unknown"),
            "Reminder call placed"
        );
        Ok(())
    }
}

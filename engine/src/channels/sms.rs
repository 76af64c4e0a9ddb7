//! Text message delivery through an SMS gateway

use super::{ChannelAdapter, HttpSender, NotificationPayload};
use async_trait::async_trait;
use sdk::errors::EngineError;
use sdk::types::{Channel, SMS_MAX_CHARS};
use serde_json::json;
use tracing::debug;

pub struct SmsAdapter {
    http: HttpSender,
}

impl SmsAdapter {
    pub fn new(http: HttpSender) -> Self {
        Self { http }
    }
}

#[async_trait]
impl ChannelAdapter for SmsAdapter {
    fn channel(&self) -> Channel {
        Channel::Sms
    }

    async fn send(
        &self,
        destination: &str,
        payload: &NotificationPayload,
    ) -> Result<(), EngineError> {
        let message: String = payload.body.chars().take(SMS_MAX_CHARS).collect();

        self.http
            .post_json(
                Channel::Sms,
                &json!({
                    "phoneNumber": destination,
                    "message": message,
                }),
            )
            .await?;

        debug!(subject_id = %payload.subject_id, "SMS accepted by gateway");
        Ok(())
    }
}

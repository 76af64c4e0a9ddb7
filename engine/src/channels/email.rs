//! Email delivery through an HTTP mail API

use super::{ChannelAdapter, HttpSender, NotificationPayload};
use async_trait::async_trait;
use sdk::errors::EngineError;
use sdk::types::Channel;
use serde_json::json;

const DEFAULT_SUBJECT: &str = "Check-in reminder";

pub struct EmailAdapter {
    http: HttpSender,
    from: String,
}

impl EmailAdapter {
    pub fn new(http: HttpSender, from: impl Into<String>) -> Self {
        Self {
            http,
            from: from.into(),
        }
    }
}

#[async_trait]
impl ChannelAdapter for EmailAdapter {
    fn channel(&self) -> Channel {
        Channel::Email
    }

    async fn send(
        &self,
        destination: &str,
        payload: &NotificationPayload,
    ) -> Result<(), EngineError> {
        // Several recipients may be given comma-separated
        let to: Vec<&str> = destination
            .split(',')
            .map(str::trim)
            .filter(|addr| !addr.is_empty())
            .collect();
        if to.is_empty() {
            return Err(EngineError::delivery(Channel::Email, "no recipient address"));
        }

        self.http
            .post_json(
                Channel::Email,
                &json!({
                    "from": self.from,
                    "to": to,
                    "subject": payload.title.as_deref().unwrap_or(DEFAULT_SUBJECT),
                    "text": payload.body,
                }),
            )
            .await?;

        Ok(())
    }
}

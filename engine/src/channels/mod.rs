//! Notification channel adapters
//!
//! Each adapter performs exactly one delivery attempt per `send`. Retries,
//! timeouts and parallelism belong to the caller (the fan-out dispatcher).

use async_trait::async_trait;
use reqwest::StatusCode;
use sdk::errors::EngineError;
use sdk::types::Channel;
use serde::Serialize;
use std::sync::Arc;

pub mod chat;
pub mod email;
pub mod sms;
pub mod voice_call;

pub use chat::{ChatAdapter, ChatAnnouncer};
pub use email::EmailAdapter;
pub use sms::SmsAdapter;
pub use voice_call::VoiceCallAdapter;

/// Longest provider response body kept in an error message
const ERROR_BODY_LIMIT: usize = 300;

/// Channel-specific message content
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NotificationPayload {
    pub subject_id: String,
    /// Email subject line; ignored by other channels
    pub title: Option<String>,
    pub body: String,
}

impl NotificationPayload {
    pub fn new(subject_id: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            subject_id: subject_id.into(),
            title: None,
            body: body.into(),
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }
}

#[async_trait]
pub trait ChannelAdapter: Send + Sync {
    fn channel(&self) -> Channel;

    /// Deliver once; any failure is `EngineError::ChannelDelivery`
    async fn send(&self, destination: &str, payload: &NotificationPayload)
        -> Result<(), EngineError>;
}

/// Shared HTTP plumbing for JSON-over-POST providers
#[derive(Clone)]
pub struct HttpSender {
    client: reqwest::Client,
    endpoint: String,
    token: Option<String>,
}

impl HttpSender {
    pub fn new(client: reqwest::Client, endpoint: impl Into<String>, token: Option<String>) -> Self {
        Self {
            client,
            endpoint: endpoint.into(),
            token,
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// POST `body` as JSON and return the response JSON (or `Null`)
    pub async fn post_json<B: Serialize + ?Sized>(
        &self,
        channel: Channel,
        body: &B,
    ) -> Result<serde_json::Value, EngineError> {
        let mut request = self.client.post(&self.endpoint).json(body);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| EngineError::delivery(channel, format!("request failed: {}", e)))?;

        let status = response.status();
        let text = response.text().await.unwrap_or_default();

        if !status.is_success() {
            return Err(EngineError::delivery(channel, describe_failure(status, &text)));
        }

        if text.trim().is_empty() {
            return Ok(serde_json::Value::Null);
        }
        Ok(serde_json::from_str(&text).unwrap_or(serde_json::Value::Null))
    }
}

/// Render a non-2xx response for logs without echoing huge bodies
pub fn describe_failure(status: StatusCode, body: &str) -> String {
    let body = body.trim();
    if body.is_empty() {
        return format!("HTTP {}", status.as_u16());
    }

    let excerpt: String = body.chars().take(ERROR_BODY_LIMIT).collect();
    format!("HTTP {}: {}", status.as_u16(), excerpt)
}

/// Shared handle to an adapter
pub type SharedAdapter = Arc<dyn ChannelAdapter>;

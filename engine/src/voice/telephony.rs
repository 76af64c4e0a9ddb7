//! Telephony provider seam
//!
//! Setting up a check-in call takes two provider calls: create the call leg,
//! then update it with the `START_CHECK_IN` action so the provider's media
//! application hands the audio to us. Any failure is `CallSetup`.

use crate::channels::describe_failure;
use crate::config::VoiceConfig;
use async_trait::async_trait;
use sdk::errors::EngineError;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tracing::debug;

/// Action passed to the media application when the call is live
pub const START_CHECK_IN: &str = "START_CHECK_IN";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

#[async_trait]
pub trait Telephony: Send + Sync {
    /// Create an outbound call leg; returns the provider transaction id
    async fn create_call(&self, from_number: &str, to_number: &str) -> Result<String, EngineError>;

    /// Send an action to a live call leg
    async fn update_call(
        &self,
        transaction_id: &str,
        action: &str,
        call_id: &str,
    ) -> Result<(), EngineError>;
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateCallResponse {
    transaction_id: Option<String>,
}

pub struct HttpTelephony {
    client: reqwest::Client,
    endpoint: String,
    sip_media_app_id: String,
    token: Option<String>,
}

impl HttpTelephony {
    pub fn new(client: reqwest::Client, config: &VoiceConfig) -> Self {
        Self {
            client,
            endpoint: config.telephony_endpoint.trim_end_matches('/').to_string(),
            sip_media_app_id: config.sip_media_app_id.clone(),
            token: crate::config::read_token(config.token_env.as_deref()),
        }
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }
}

fn setup_error(step: &str, detail: impl std::fmt::Display) -> EngineError {
    EngineError::CallSetup(format!("{}: {}", step, detail))
}

#[async_trait]
impl Telephony for HttpTelephony {
    async fn create_call(&self, from_number: &str, to_number: &str) -> Result<String, EngineError> {
        let request = self
            .client
            .post(&self.endpoint)
            .timeout(REQUEST_TIMEOUT)
            .json(&json!({
                "fromPhoneNumber": from_number,
                "toPhoneNumber": to_number,
                "sipMediaApplicationId": self.sip_media_app_id,
            }));

        let response = self
            .authorize(request)
            .send()
            .await
            .map_err(|e| setup_error("create call", e))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(setup_error("create call", describe_failure(status, &text)));
        }

        let created: CreateCallResponse = response
            .json()
            .await
            .map_err(|e| setup_error("create call", e))?;

        let transaction_id = created
            .transaction_id
            .filter(|id| !id.is_empty())
            .ok_or_else(|| setup_error("create call", "provider returned no transaction id"))?;

        debug!(transaction_id = %transaction_id, "Call leg created");
        Ok(transaction_id)
    }

    async fn update_call(
        &self,
        transaction_id: &str,
        action: &str,
        call_id: &str,
    ) -> Result<(), EngineError> {
        let url = format!("{}/{}", self.endpoint, transaction_id);
        let request = self.client.put(&url).timeout(REQUEST_TIMEOUT).json(&json!({
            "sipMediaApplicationId": self.sip_media_app_id,
            "arguments": {"Action": action, "CallId": call_id},
        }));

        let response = self
            .authorize(request)
            .send()
            .await
            .map_err(|e| setup_error("update call", e))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(setup_error("update call", describe_failure(status, &text)));
        }

        Ok(())
    }
}

//! HTTP conversational agent client
//!
//! Request: `{agentId, agentAliasId, sessionId, inputText}`.
//! Response: `{completion}`.

use super::ConversationalAgent;
use crate::channels::describe_failure;
use crate::config::AgentConfig;
use async_trait::async_trait;
use sdk::errors::EngineError;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ConverseRequest<'a> {
    agent_id: &'a str,
    agent_alias_id: &'a str,
    session_id: &'a str,
    input_text: &'a str,
}

#[derive(Debug, Deserialize)]
struct ConverseResponse {
    #[serde(default)]
    completion: String,
}

pub struct HttpAgent {
    client: reqwest::Client,
    config: AgentConfig,
    token: Option<String>,
}

impl HttpAgent {
    pub fn new(client: reqwest::Client, config: AgentConfig) -> Self {
        let token = crate::config::read_token(config.token_env.as_deref());
        Self {
            client,
            config,
            token,
        }
    }
}

#[async_trait]
impl ConversationalAgent for HttpAgent {
    async fn converse(&self, session_id: &str, input_text: &str) -> Result<String, EngineError> {
        let body = ConverseRequest {
            agent_id: &self.config.agent_id,
            agent_alias_id: &self.config.alias_id,
            session_id,
            input_text,
        };

        let mut request = self
            .client
            .post(&self.config.endpoint)
            .timeout(Duration::from_secs(self.config.timeout_secs))
            .json(&body);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                EngineError::Agent(format!(
                    "no reply within {}s",
                    self.config.timeout_secs
                ))
            } else {
                EngineError::Agent(format!("request failed: {}", e))
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(EngineError::Agent(describe_failure(status, &text)));
        }

        let parsed: ConverseResponse = response
            .json()
            .await
            .map_err(|e| EngineError::Agent(format!("invalid response: {}", e)))?;

        debug!(session_id, reply_len = parsed.completion.len(), "Agent replied");
        Ok(parsed.completion)
    }
}

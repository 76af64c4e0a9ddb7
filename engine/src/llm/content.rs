//! Personalized content generation over an OpenAI-compatible API
//!
//! The model is asked for a JSON object with the four channel variants.
//! Replies wrapped in prose or code fences are tolerated; anything that
//! does not contain the object is a `Personalization` error, and callers
//! fall back to their built-in templates.

use super::{ContentPersonalizer, ContentRequest};
use crate::channels::describe_failure;
use crate::config::ContentConfig;
use async_trait::async_trait;
use sdk::errors::EngineError;
use sdk::types::{GeneratedContent, SMS_MAX_CHARS};
use serde_json::json;
use std::time::Duration;

pub struct LlmContentGenerator {
    client: reqwest::Client,
    config: ContentConfig,
    token: Option<String>,
}

impl LlmContentGenerator {
    pub fn new(client: reqwest::Client, config: ContentConfig) -> Self {
        let token = crate::config::read_token(config.token_env.as_deref());
        Self {
            client,
            config,
            token,
        }
    }
}

/// Build the instruction sent to the model
pub fn build_prompt(request: &ContentRequest) -> String {
    [
        "Generate content for a check-in reminder with the following context:".to_string(),
        format!("Base prompt: {}", request.prompt),
        format!("Tone: {}", request.preferences.tone),
        format!("Urgency: {}", request.preferences.urgency),
        String::new(),
        "Please provide:".to_string(),
        format!("1. A concise SMS message ({} characters max)", SMS_MAX_CHARS),
        "2. A natural phone call script".to_string(),
        "3. An email subject line".to_string(),
        "4. A professional email body".to_string(),
        String::new(),
        "Format the response as JSON with these exact keys:".to_string(),
        r#"{"smsMessage": "...", "phoneScript": "...", "emailSubject": "...", "emailBody": "..."}"#
            .to_string(),
    ]
    .join("\n")
}

/// Extract the content object from a model reply
pub fn parse_content(reply: &str) -> Result<GeneratedContent, EngineError> {
    let start = reply.find('{');
    let end = reply.rfind('}');
    let object = match (start, end) {
        (Some(start), Some(end)) if start < end => &reply[start..=end],
        _ => {
            return Err(EngineError::Personalization(
                "reply contains no JSON object".to_string(),
            ))
        }
    };

    let content: GeneratedContent = serde_json::from_str(object)
        .map_err(|e| EngineError::Personalization(format!("malformed content: {}", e)))?;

    Ok(content.normalized())
}

#[async_trait]
impl ContentPersonalizer for LlmContentGenerator {
    async fn generate(&self, request: &ContentRequest) -> Result<GeneratedContent, EngineError> {
        let url = format!(
            "{}/chat/completions",
            self.config.base_url.trim_end_matches('/')
        );
        let payload = json!({
            "model": self.config.model,
            "temperature": 0.7,
            "messages": [{"role": "user", "content": build_prompt(request)}],
        });

        let mut http = self
            .client
            .post(&url)
            .timeout(Duration::from_secs(self.config.timeout_secs))
            .json(&payload);
        if let Some(token) = &self.token {
            http = http.bearer_auth(token);
        }

        let response = http
            .send()
            .await
            .map_err(|e| EngineError::Personalization(format!("request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(EngineError::Personalization(describe_failure(status, &text)));
        }

        let data: serde_json::Value = response
            .json()
            .await
            .map_err(|e| EngineError::Personalization(format!("invalid response: {}", e)))?;

        let reply = data
            .get("choices")
            .and_then(|c| c.as_array())
            .and_then(|c| c.first())
            .and_then(|choice| choice.get("message"))
            .and_then(|message| message.get("content"))
            .and_then(|content| content.as_str())
            .ok_or_else(|| EngineError::Personalization("empty completion".to_string()))?;

        parse_content(reply)
    }
}

//! Language-model collaborators
//!
//! Two seams live here:
//! - `ConversationalAgent`: session-scoped dialogue used by voice check-ins
//! - `ContentPersonalizer`: one-shot generation of channel-specific wording
//!
//! Both are plain HTTP clients in production and small structs in tests.

use async_trait::async_trait;
use sdk::errors::EngineError;
use sdk::types::{GeneratedContent, Preferences};

pub mod agent;
pub mod content;

pub use agent::HttpAgent;
pub use content::LlmContentGenerator;

/// Given a session id and input text, returns a reply
#[async_trait]
pub trait ConversationalAgent: Send + Sync {
    /// Continue the conversation identified by `session_id`
    ///
    /// An empty string means the agent had nothing to say.
    async fn converse(&self, session_id: &str, input_text: &str) -> Result<String, EngineError>;
}

/// What to personalize and how
#[derive(Debug, Clone, PartialEq)]
pub struct ContentRequest {
    pub subject_id: String,
    /// Base text the variants are derived from
    pub prompt: String,
    pub preferences: Preferences,
}

/// Produces channel-specific message variants
#[async_trait]
pub trait ContentPersonalizer: Send + Sync {
    async fn generate(&self, request: &ContentRequest) -> Result<GeneratedContent, EngineError>;
}

//! Error types and handling
//!
//! This module provides the error taxonomy used throughout the Vigil engine.
//! All errors implement the `VigilErrorExt` trait which provides user-friendly
//! hints and indicates whether an operation that produced them may be retried.
//!
//! # Scope of failures
//!
//! Failures are contained at the smallest possible scope:
//! - **Subject**: `InvalidTimestamp` skips one subject for one tick
//! - **Channel**: `ChannelDelivery` fails one branch of a fan-out
//! - **Turn**: `Transcription` / `Agent` abandon one voice turn
//! - **Session**: `CallSetup` fails one call before it starts
//! - **Publisher**: `EventBusUnavailable` lets the monitor fall back
//!
//! Error messages never include API tokens; adapters only embed provider
//! response bodies and status codes.

use thiserror::Error;

/// Trait for Vigil error extensions
///
/// This trait provides additional context for errors, including user-friendly
/// hints and retry classification. All engine errors implement this trait.
pub trait VigilErrorExt {
    /// Returns a user-friendly hint for the error
    fn user_hint(&self) -> &str;

    /// Returns whether retrying the failed operation could succeed
    ///
    /// Transient infrastructure failures (database, network, timeouts) are
    /// retryable. Failures caused by the data itself (a malformed stored
    /// timestamp) or by a provider's deliberate rejection are not.
    fn is_retryable(&self) -> bool;
}

/// Main engine error type
///
/// # Examples
///
/// ```
/// use sdk::errors::{EngineError, VigilErrorExt};
///
/// let error = EngineError::Database("connection reset".to_string());
/// assert!(error.is_retryable());
///
/// let malformed = EngineError::InvalidTimestamp("yesterday-ish".to_string());
/// assert!(!malformed.is_retryable());
/// ```
#[derive(Debug, Error)]
pub enum EngineError {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    // State store errors
    #[error("Database error: {0}")]
    Database(String),

    #[error("Invalid timestamp: {0}")]
    InvalidTimestamp(String),

    // Telephony errors
    #[error("Call setup failed: {0}")]
    CallSetup(String),

    #[error("Session state error: {0}")]
    SessionState(String),

    // Notification errors
    #[error("Delivery via {channel} failed: {detail}")]
    ChannelDelivery { channel: String, detail: String },

    // Speech and agent errors
    #[error("Transcription failed: {0}")]
    Transcription(String),

    #[error("Agent failed: {0}")]
    Agent(String),

    #[error("Speech synthesis failed: {0}")]
    Synthesis(String),

    #[error("Content personalization failed: {0}")]
    Personalization(String),

    // Event bus errors
    #[error("Event bus unavailable: {0}")]
    EventBusUnavailable(String),

    #[error("Invalid event: {0}")]
    InvalidEvent(String),

    // Daemon errors
    #[error("Daemon is already running")]
    DaemonAlreadyRunning,

    // Network errors
    #[error("Network error: {0}")]
    Network(String),

    #[error("Operation timed out after {0} ms")]
    Timeout(u64),

    // Generic IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl EngineError {
    /// Shorthand for a per-channel delivery failure
    pub fn delivery(channel: impl std::fmt::Display, detail: impl Into<String>) -> Self {
        Self::ChannelDelivery {
            channel: channel.to_string(),
            detail: detail.into(),
        }
    }
}

impl VigilErrorExt for EngineError {
    fn user_hint(&self) -> &str {
        match self {
            Self::Config(_) => "Check your config.toml file for errors",

            Self::Database(_) => "Check-in store unavailable. It will be retried next tick",
            Self::InvalidTimestamp(_) => "Stored check-in time is malformed. Re-record the check-in",

            Self::CallSetup(_) => "The telephony provider rejected the call. Check the numbers",
            Self::SessionState(_) => "The call is not in a state that accepts this action",

            Self::ChannelDelivery { .. } => "A notification channel failed. Other channels still ran",

            Self::Transcription(_) => "We could not hear that. Please repeat",
            Self::Agent(_) => "The assistant is unavailable right now. Please repeat",
            Self::Synthesis(_) => "The reply could not be spoken, but the check-in was kept",
            Self::Personalization(_) => "Personalized content unavailable. Default wording used",

            Self::EventBusUnavailable(_) => "Event bus unreachable. Falling back to direct delivery",
            Self::InvalidEvent(_) => "Event payload does not match its detail type",

            Self::DaemonAlreadyRunning => "Stop the running daemon with 'vigil stop' first",

            Self::Network(_) => "Network operation failed. Check your connection",
            Self::Timeout(_) => "A collaborator took too long to respond",

            Self::Io(_) => "File system operation failed",
        }
    }

    fn is_retryable(&self) -> bool {
        match self {
            Self::Database(_)
            | Self::Network(_)
            | Self::Timeout(_)
            | Self::EventBusUnavailable(_)
            | Self::Io(_) => true,

            Self::Config(_)
            | Self::InvalidTimestamp(_)
            | Self::CallSetup(_)
            | Self::SessionState(_)
            | Self::ChannelDelivery { .. }
            | Self::Transcription(_)
            | Self::Agent(_)
            | Self::Synthesis(_)
            | Self::Personalization(_)
            | Self::InvalidEvent(_)
            | Self::DaemonAlreadyRunning => false,
        }
    }
}

//! Vigil Engine Library
//!
//! This library provides the core functionality of the Vigil check-in
//! monitor. It is used by both the main binary and integration tests.

/// Configuration management module
pub mod config;

/// Telemetry and Observability
pub mod telemetry;

/// Retry with capped exponential backoff
pub mod retry;

/// Elapsed-time calculator
pub mod elapsed;

/// Check-in store
pub mod db;

/// Message bus for inter-component communication
pub mod message_bus;

/// Notification channel adapters
pub mod channels;

/// Notification fan-out
pub mod dispatcher;

/// Conversational agent and content personalization
pub mod llm;

/// Speech-to-text and text-to-speech
pub mod speech;

/// Voice check-in sessions
pub mod voice;

/// Staleness monitor
pub mod monitor;

/// Bus subscriber that persists check-ins
pub mod recorder;

/// Process-wide component wiring
pub mod app;

/// Webhook server
pub mod server;

/// Daemon lifecycle management module
pub mod daemon;

/// CLI interface module
pub mod cli;

/// Command handlers module
pub mod handlers;

//! Vigil SDK
//!
//! Shared data model and error taxonomy for the Vigil check-in engine.
//! Anything that crosses a component seam (store records, bus payloads,
//! notification outcomes) lives here so adapters can depend on it without
//! pulling in the engine.

/// Error types and handling
pub mod errors;

/// Check-in, staleness and notification types
pub mod types;

// Re-export commonly used types
pub use errors::{EngineError, VigilErrorExt};
pub use types::{
    Channel, CheckInRecord, DispatchSummary, GeneratedContent, NotificationOutcome,
    OutcomeStatus, Preferences, StalenessEvent, StalenessStatus, Tone, Urgency,
};

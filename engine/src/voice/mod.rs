//! Voice check-ins
//!
//! - `session`: the per-call state machine
//! - `driver`: runs one session from a signal channel under a call-duration limit
//! - `gateway`: routes raw telephony events to per-call drivers by call id
//! - `telephony`: the provider seam used to set calls up
//!
//! Calls are independent: each session is owned by exactly one driver task
//! and shares only the read-only handles in `VoiceServices`.

use crate::db::CheckInStore;
use crate::llm::{ContentPersonalizer, ConversationalAgent};
use crate::speech::{SpeechToText, TextToSpeech};
use std::sync::Arc;

pub mod driver;
pub mod gateway;
pub mod session;
pub mod telephony;

pub use driver::{run_call, CallEnd, CallSignal};
pub use gateway::{CallAction, GatewayReply, VoiceCallEvent, VoiceGateway};
pub use session::{CallRequest, SessionState, TurnOutcome, VoiceSession, DEFAULT_REPLY};
pub use telephony::{HttpTelephony, Telephony};

/// Collaborators shared by every call, built once per process
pub struct VoiceServices {
    pub telephony: Arc<dyn Telephony>,
    pub stt: Arc<dyn SpeechToText>,
    pub tts: Arc<dyn TextToSpeech>,
    pub agent: Arc<dyn ConversationalAgent>,
    pub personalizer: Option<Arc<dyn ContentPersonalizer>>,
    pub store: Arc<dyn CheckInStore>,
    /// Voice used for synthesized replies
    pub voice_profile: String,
    /// Bytes per frame handed to speech-to-text
    pub frame_bytes: usize,
}

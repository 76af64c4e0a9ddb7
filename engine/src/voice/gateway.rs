//! Telephony event gateway
//!
//! Raw `{callId, fromNumber, toNumber, action, audioData?, preferences?}`
//! events arrive from the provider's webhook. `start` sets up a session and
//! spawns its driver; `stream` and `end` are forwarded to that driver by
//! call id. The routing table holds only channel senders: session state
//! stays inside each driver task.
//!
//! A call id is reserved in the table before the provider round-trip, so a
//! redelivered `start` is rejected instead of opening a second call leg.
//! Each entry carries a generation; a driver only removes the entry it
//! created.

use super::driver::{run_call, CallSignal};
use super::session::{CallRequest, VoiceSession};
use super::VoiceServices;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use sdk::errors::EngineError;
use sdk::types::{GeneratedContent, Preferences};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, Mutex};
use tracing::{info, warn};

/// Pending signals per call
const CALL_SIGNAL_BUFFER: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallAction {
    Start,
    Stream,
    End,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoiceCallEvent {
    pub call_id: String,
    #[serde(default)]
    pub from_number: String,
    #[serde(default)]
    pub to_number: String,
    pub action: CallAction,
    /// Base64 audio, required for `stream`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio_data: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preferences: Option<Preferences>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayReply {
    pub message: String,
    pub call_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transaction_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transcription: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response: Option<String>,
    /// Base64 synthesized reply
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio_response: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<GeneratedContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subject_id: Option<String>,
}

enum CallSlot {
    /// Setup with the provider is in progress
    Pending { generation: u64 },
    Active {
        generation: u64,
        tx: mpsc::Sender<CallSignal>,
    },
}

impl CallSlot {
    fn generation(&self) -> u64 {
        match self {
            CallSlot::Pending { generation } | CallSlot::Active { generation, .. } => *generation,
        }
    }
}

type CallTable = Arc<Mutex<HashMap<String, CallSlot>>>;

/// Remove `call_id` from the table if it still holds `generation`
async fn release(calls: &CallTable, call_id: &str, generation: u64) {
    let mut calls = calls.lock().await;
    if calls.get(call_id).map(CallSlot::generation) == Some(generation) {
        calls.remove(call_id);
    }
}

/// Releases a pending reservation if setup fails or is cancelled
struct Reservation {
    calls: CallTable,
    call_id: String,
    generation: u64,
    armed: bool,
}

impl Drop for Reservation {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let calls = Arc::clone(&self.calls);
        let call_id = std::mem::take(&mut self.call_id);
        let generation = self.generation;
        tokio::spawn(async move { release(&calls, &call_id, generation).await });
    }
}

pub struct VoiceGateway {
    services: Arc<VoiceServices>,
    directory: HashMap<String, String>,
    max_call_duration: Duration,
    calls: CallTable,
    next_generation: AtomicU64,
}

impl VoiceGateway {
    pub fn new(
        services: Arc<VoiceServices>,
        directory: HashMap<String, String>,
        max_call_duration: Duration,
    ) -> Self {
        Self {
            services,
            directory,
            max_call_duration,
            calls: Arc::new(Mutex::new(HashMap::new())),
            next_generation: AtomicU64::new(0),
        }
    }

    /// Map a caller's number to the subject it checks in for
    ///
    /// Numbers missing from the directory are used as the subject id
    /// directly, which ties identity to a contact channel; this is logged.
    pub fn resolve_subject(&self, from_number: &str) -> String {
        match self.directory.get(from_number) {
            Some(subject_id) => subject_id.clone(),
            None => {
                warn!(
                    from_number,
                    "Caller not in subject directory; using phone number as subject id"
                );
                from_number.to_string()
            }
        }
    }

    pub async fn active_calls(&self) -> usize {
        self.calls.lock().await.len()
    }

    pub async fn handle(&self, event: VoiceCallEvent) -> Result<GatewayReply, EngineError> {
        if event.call_id.trim().is_empty() {
            return Err(EngineError::InvalidEvent("callId is required".to_string()));
        }

        match event.action {
            CallAction::Start => self.start(event).await,
            CallAction::Stream => self.stream(event).await,
            CallAction::End => self.end(event).await,
        }
    }

    async fn start(&self, event: VoiceCallEvent) -> Result<GatewayReply, EngineError> {
        if event.from_number.is_empty() || event.to_number.is_empty() {
            return Err(EngineError::InvalidEvent(
                "fromNumber and toNumber are required to start a call".to_string(),
            ));
        }
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        {
            let mut calls = self.calls.lock().await;
            if calls.contains_key(&event.call_id) {
                return Err(EngineError::SessionState(format!(
                    "call {} is already active",
                    event.call_id
                )));
            }
            calls.insert(event.call_id.clone(), CallSlot::Pending { generation });
        }
        let mut reservation = Reservation {
            calls: Arc::clone(&self.calls),
            call_id: event.call_id.clone(),
            generation,
            armed: true,
        };

        let subject_id = self.resolve_subject(&event.from_number);
        let request = CallRequest {
            call_id: event.call_id.clone(),
            from_number: event.from_number,
            to_number: event.to_number,
            subject_id: subject_id.clone(),
            preferences: event.preferences,
        };

        let session = match VoiceSession::start(Arc::clone(&self.services), request).await {
            Ok(session) => session,
            Err(e) => {
                reservation.armed = false;
                release(&self.calls, &event.call_id, generation).await;
                return Err(e);
            }
        };
        let transaction_id = session.transaction_id().to_string();

        let (tx, rx) = mpsc::channel(CALL_SIGNAL_BUFFER);
        self.calls
            .lock()
            .await
            .insert(event.call_id.clone(), CallSlot::Active { generation, tx });
        reservation.armed = false;

        let calls = Arc::clone(&self.calls);
        let call_id = event.call_id.clone();
        let max_duration = self.max_call_duration;
        tokio::spawn(async move {
            let end = run_call(session, rx, max_duration).await;
            release(&calls, &call_id, generation).await;
            info!(call_id = %call_id, recorded = end.is_recorded(), "Call finished");
        });

        Ok(GatewayReply {
            message: "Voice call initiated".to_string(),
            call_id: event.call_id,
            transaction_id: Some(transaction_id),
            subject_id: Some(subject_id),
            ..GatewayReply::default()
        })
    }

    async fn sender_for(&self, call_id: &str) -> Result<mpsc::Sender<CallSignal>, EngineError> {
        match self.calls.lock().await.get(call_id) {
            Some(CallSlot::Active { tx, .. }) => Ok(tx.clone()),
            Some(CallSlot::Pending { .. }) => Err(EngineError::SessionState(format!(
                "call {} is still being set up",
                call_id
            ))),
            None => Err(EngineError::SessionState(format!(
                "no active call {}",
                call_id
            ))),
        }
    }

    async fn stream(&self, event: VoiceCallEvent) -> Result<GatewayReply, EngineError> {
        let encoded = event
            .audio_data
            .as_deref()
            .filter(|data| !data.is_empty())
            .ok_or_else(|| {
                EngineError::InvalidEvent("audioData is required for stream".to_string())
            })?;
        let audio = BASE64
            .decode(encoded)
            .map_err(|e| EngineError::InvalidEvent(format!("audioData is not base64: {}", e)))?;

        let sender = self.sender_for(&event.call_id).await?;
        let (reply_tx, reply_rx) = oneshot::channel();
        sender
            .send(CallSignal::Audio {
                audio,
                reply: reply_tx,
            })
            .await
            .map_err(|_| call_gone(&event.call_id))?;

        let outcome = reply_rx.await.map_err(|_| call_gone(&event.call_id))??;

        Ok(GatewayReply {
            message: "Audio processed".to_string(),
            call_id: event.call_id,
            transcription: Some(outcome.heard),
            response: outcome.reply,
            audio_response: outcome.audio.map(|audio| BASE64.encode(audio)),
            content: outcome.content,
            ..GatewayReply::default()
        })
    }

    async fn end(&self, event: VoiceCallEvent) -> Result<GatewayReply, EngineError> {
        let sender = self.sender_for(&event.call_id).await?;
        let (reply_tx, reply_rx) = oneshot::channel();
        sender
            .send(CallSignal::End { reply: reply_tx })
            .await
            .map_err(|_| call_gone(&event.call_id))?;

        let record = reply_rx.await.map_err(|_| call_gone(&event.call_id))??;

        Ok(GatewayReply {
            message: "Call ended".to_string(),
            call_id: event.call_id,
            subject_id: Some(record.subject_id),
            ..GatewayReply::default()
        })
    }
}

fn call_gone(call_id: &str) -> EngineError {
    EngineError::SessionState(format!("call {} has already finished", call_id))
}

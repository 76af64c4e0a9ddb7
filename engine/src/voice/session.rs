//! Voice check-in session state machine
//!
//! `STARTING -> STREAMING (-> STREAMING)* -> ENDED`
//!
//! A session value only exists once the call leg is up, so a failed start
//! leaves nothing behind. Each audio chunk is one turn: transcribe, ask the
//! agent, optionally personalize, synthesize. A turn's text joins
//! `transcript_so_far` only after the agent has answered, so a transcription
//! or agent failure abandons the turn without touching the transcript.
//! Synthesis failures cost the caller the spoken reply but nothing else.
//!
//! `end` consumes the session and performs its single durable effect: one
//! check-in record for the caller.

use super::telephony::START_CHECK_IN;
use super::VoiceServices;
use crate::llm::ContentRequest;
use crate::speech::{frames, AudioStream};
use chrono::Utc;
use futures::stream::{self, StreamExt};
use sdk::errors::EngineError;
use sdk::types::{CheckInRecord, GeneratedContent, Preferences};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use tracing::{info, warn};

/// Spoken when neither personalization nor the agent produced a reply
pub const DEFAULT_REPLY: &str = "Thank you for your check-in.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SessionState {
    Starting,
    Streaming,
    Ended,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::Starting => write!(f, "STARTING"),
            SessionState::Streaming => write!(f, "STREAMING"),
            SessionState::Ended => write!(f, "ENDED"),
        }
    }
}

/// Who is calling whom
#[derive(Debug, Clone, PartialEq)]
pub struct CallRequest {
    pub call_id: String,
    pub from_number: String,
    pub to_number: String,
    /// Identity the resulting check-in is recorded under
    pub subject_id: String,
    pub preferences: Option<Preferences>,
}

/// What one turn produced
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TurnOutcome {
    /// Finalized text heard in this turn (empty when nothing was said)
    pub heard: String,
    /// Text spoken back; `None` when nothing was heard
    pub reply: Option<String>,
    /// Synthesized reply; `None` when synthesis failed or was skipped
    pub audio: Option<Vec<u8>>,
    /// Channel variants from personalization, when preferences are set
    pub content: Option<GeneratedContent>,
}

pub struct VoiceSession {
    request: CallRequest,
    state: SessionState,
    transcript_so_far: String,
    transaction_id: String,
    services: Arc<VoiceServices>,
}

impl fmt::Debug for VoiceSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VoiceSession")
            .field("call_id", &self.request.call_id)
            .field("state", &self.state)
            .field("transcript_so_far", &self.transcript_so_far)
            .finish()
    }
}

impl VoiceSession {
    /// STARTING: bring up the call leg and begin the check-in flow
    ///
    /// # Errors
    ///
    /// `CallSetup` if the provider rejects either step. Not retried.
    pub async fn start(
        services: Arc<VoiceServices>,
        request: CallRequest,
    ) -> Result<Self, EngineError> {
        info!(
            call_id = %request.call_id,
            subject_id = %request.subject_id,
            state = %SessionState::Starting,
            "Starting voice check-in"
        );

        let transaction_id = services
            .telephony
            .create_call(&request.from_number, &request.to_number)
            .await
            .map_err(into_call_setup)?;

        services
            .telephony
            .update_call(&transaction_id, START_CHECK_IN, &request.call_id)
            .await
            .map_err(into_call_setup)?;

        info!(call_id = %request.call_id, transaction_id = %transaction_id, "Call connected");

        Ok(Self {
            request,
            state: SessionState::Streaming,
            transcript_so_far: String::new(),
            transaction_id,
            services,
        })
    }

    pub fn call_id(&self) -> &str {
        &self.request.call_id
    }

    pub fn subject_id(&self) -> &str {
        &self.request.subject_id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn transaction_id(&self) -> &str {
        &self.transaction_id
    }

    /// Finalized text of every completed turn, space-joined
    pub fn transcript_so_far(&self) -> &str {
        &self.transcript_so_far
    }

    /// STREAMING: process one chunk of caller audio as a turn
    ///
    /// # Errors
    ///
    /// `Transcription` or `Agent` when the turn is abandoned; the transcript
    /// is unchanged and the caller may repeat.
    pub async fn stream(&mut self, audio: Vec<u8>) -> Result<TurnOutcome, EngineError> {
        if self.state != SessionState::Streaming {
            return Err(EngineError::SessionState(format!(
                "call {} is {}",
                self.request.call_id, self.state
            )));
        }

        let heard = self.transcribe(audio).await.inspect_err(|e| {
            warn!(call_id = %self.request.call_id, "Abandoning turn: {}", e);
        })?;

        if heard.is_empty() {
            return Ok(TurnOutcome::default());
        }

        let agent_reply = self
            .services
            .agent
            .converse(&self.request.call_id, &heard)
            .await
            .inspect_err(|e| {
                warn!(call_id = %self.request.call_id, "Abandoning turn: {}", e);
            })?;

        if !self.transcript_so_far.is_empty() {
            self.transcript_so_far.push(' ');
        }
        self.transcript_so_far.push_str(&heard);

        let content = self.personalize(&heard).await;
        let reply = content
            .as_ref()
            .map(|c| c.phone_script.trim())
            .filter(|script| !script.is_empty())
            .or_else(|| Some(agent_reply.trim()).filter(|r| !r.is_empty()))
            .unwrap_or(DEFAULT_REPLY)
            .to_string();

        let audio = match self
            .services
            .tts
            .synthesize(&reply, &self.services.voice_profile)
            .await
        {
            Ok(audio) => Some(audio),
            Err(e) => {
                warn!(call_id = %self.request.call_id, "Reply will not be spoken: {}", e);
                None
            }
        };

        Ok(TurnOutcome {
            heard,
            reply: Some(reply),
            audio,
            content,
        })
    }

    /// Fold the turn's results into its finalized text
    async fn transcribe(&self, audio: Vec<u8>) -> Result<String, EngineError> {
        let chunks: AudioStream = stream::iter(frames(&audio, self.services.frame_bytes)).boxed();
        let mut results = self.services.stt.stream_transcribe(chunks).await?;

        let mut segments: Vec<String> = Vec::new();
        while let Some(result) = results.next().await {
            let result = result?;
            let text = result.text.trim();
            if result.is_final && !text.is_empty() {
                segments.push(text.to_string());
            }
        }

        Ok(segments.join(" "))
    }

    async fn personalize(&self, heard: &str) -> Option<GeneratedContent> {
        let preferences = self.request.preferences?;
        let personalizer = self.services.personalizer.as_ref()?;

        let request = ContentRequest {
            subject_id: self.request.subject_id.clone(),
            prompt: heard.to_string(),
            preferences,
        };
        match personalizer.generate(&request).await {
            Ok(content) => Some(content.normalized()),
            Err(e) => {
                warn!(call_id = %self.request.call_id, "Personalization skipped: {}", e);
                None
            }
        }
    }

    /// ENDED: record the check-in and discard the session
    ///
    /// # Errors
    ///
    /// Propagates the store's error; the transcript is lost with the session.
    pub async fn end(mut self) -> Result<CheckInRecord, EngineError> {
        self.state = SessionState::Ended;

        let mut record = CheckInRecord::new(self.request.subject_id.clone(), Utc::now());
        if !self.transcript_so_far.is_empty() {
            record = record.with_message(std::mem::take(&mut self.transcript_so_far));
        }

        self.services.store.put(&record).await?;

        info!(
            call_id = %self.request.call_id,
            subject_id = %record.subject_id,
            state = %self.state,
            "Voice check-in recorded"
        );
        Ok(record)
    }
}

fn into_call_setup(e: EngineError) -> EngineError {
    match e {
        EngineError::CallSetup(_) => e,
        other => EngineError::CallSetup(other.to_string()),
    }
}

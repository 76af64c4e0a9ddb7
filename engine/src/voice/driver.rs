//! Per-call driver
//!
//! Consumes signals for one call until `End`, the caller hanging up (the
//! signal channel closing) or the call-duration limit. Only `End` records a
//! check-in; the other two discard the session.

use super::session::{TurnOutcome, VoiceSession};
use sdk::errors::EngineError;
use sdk::types::CheckInRecord;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tracing::{info, warn};

/// Input to a running call
#[derive(Debug)]
pub enum CallSignal {
    /// One chunk of caller audio; the turn outcome is sent back
    Audio {
        audio: Vec<u8>,
        reply: oneshot::Sender<Result<TurnOutcome, EngineError>>,
    },
    /// Normal end of call; the recorded check-in is sent back
    End {
        reply: oneshot::Sender<Result<CheckInRecord, EngineError>>,
    },
}

/// How a call finished
#[derive(Debug)]
pub enum CallEnd {
    /// Ended normally and the check-in was written
    Recorded(CheckInRecord),
    /// Ended normally but the write failed
    RecordFailed(String),
    /// Signals stopped before `End`
    HungUp,
    /// The call-duration limit passed before `End`
    TimedOut,
}

impl CallEnd {
    pub fn is_recorded(&self) -> bool {
        matches!(self, CallEnd::Recorded(_))
    }
}

/// Drive `session` until the call finishes
pub async fn run_call(
    mut session: VoiceSession,
    mut signals: mpsc::Receiver<CallSignal>,
    max_duration: Duration,
) -> CallEnd {
    let call_id = session.call_id().to_string();
    let deadline = tokio::time::sleep(max_duration);
    tokio::pin!(deadline);

    loop {
        let signal = tokio::select! {
            _ = &mut deadline => {
                warn!(call_id = %call_id, "Call duration limit reached; nothing recorded");
                return CallEnd::TimedOut;
            }
            signal = signals.recv() => signal,
        };

        match signal {
            None => {
                info!(call_id = %call_id, "Caller hung up before the end; nothing recorded");
                return CallEnd::HungUp;
            }
            Some(CallSignal::Audio { audio, reply }) => {
                let outcome = tokio::select! {
                    _ = &mut deadline => {
                        let _ = reply.send(Err(EngineError::Timeout(max_duration.as_millis() as u64)));
                        warn!(call_id = %call_id, "Call duration limit reached mid-turn; nothing recorded");
                        return CallEnd::TimedOut;
                    }
                    outcome = session.stream(audio) => outcome,
                };
                let _ = reply.send(outcome);
            }
            Some(CallSignal::End { reply }) => {
                let result = session.end().await;
                let end = match &result {
                    Ok(record) => CallEnd::Recorded(record.clone()),
                    Err(e) => CallEnd::RecordFailed(e.to_string()),
                };
                let _ = reply.send(result);
                return end;
            }
        }
    }
}

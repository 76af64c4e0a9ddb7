//! Speech services
//!
//! Speech-to-text consumes a lazy stream of audio frames and yields a lazy
//! stream of partial and final transcript results. Text-to-speech is a
//! single request returning audio bytes.

use crate::channels::describe_failure;
use crate::config::SpeechConfig;
use async_trait::async_trait;
use futures::stream::{BoxStream, Stream, StreamExt};
use sdk::errors::EngineError;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::fmt::Display;
use std::time::Duration;

/// One chunk of raw audio (16-bit PCM)
pub type AudioFrame = Vec<u8>;

/// Frames for one transcription pass, in order
pub type AudioStream = BoxStream<'static, AudioFrame>;

/// Results in arrival order
pub type TranscriptStream = BoxStream<'static, Result<TranscriptResult, EngineError>>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TranscriptResult {
    pub text: String,
    /// Final results are never revised; partial ones may be
    #[serde(default)]
    pub is_final: bool,
}

impl TranscriptResult {
    pub fn partial(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            is_final: false,
        }
    }

    pub fn final_text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            is_final: true,
        }
    }
}

#[async_trait]
pub trait SpeechToText: Send + Sync {
    async fn stream_transcribe(&self, audio: AudioStream) -> Result<TranscriptStream, EngineError>;
}

#[async_trait]
pub trait TextToSpeech: Send + Sync {
    async fn synthesize(&self, text: &str, voice_profile: &str) -> Result<Vec<u8>, EngineError>;
}

/// Split audio into frames of at most `frame_bytes`
pub fn frames(audio: &[u8], frame_bytes: usize) -> Vec<AudioFrame> {
    audio
        .chunks(frame_bytes.max(1))
        .map(|chunk| chunk.to_vec())
        .collect()
}

/// Streaming transcription over HTTP
///
/// Frames are sent in order as a chunked request body. The service answers
/// with newline-delimited JSON `TranscriptResult`s as it recognizes speech,
/// and results are yielded as they arrive.
pub struct HttpSpeechToText {
    client: reqwest::Client,
    config: SpeechConfig,
    token: Option<String>,
}

impl HttpSpeechToText {
    pub fn new(client: reqwest::Client, config: SpeechConfig) -> Self {
        let token = crate::config::read_token(config.token_env.as_deref());
        Self {
            client,
            config,
            token,
        }
    }
}

#[async_trait]
impl SpeechToText for HttpSpeechToText {
    async fn stream_transcribe(&self, audio: AudioStream) -> Result<TranscriptStream, EngineError> {
        // The request body must be Sync, so the turn's frames are gathered
        // first and then sent as one chunk each.
        let collected: Vec<AudioFrame> = audio.collect().await;
        let body = reqwest::Body::wrap_stream(futures::stream::iter(
            collected.into_iter().map(Ok::<_, std::io::Error>),
        ));

        let mut request = self
            .client
            .post(&self.config.stt_endpoint)
            .query(&[
                ("languageCode", self.config.language_code.clone()),
                ("sampleRate", self.config.sample_rate_hz.to_string()),
                ("encoding", "pcm".to_string()),
            ])
            .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
            .timeout(Duration::from_secs(self.config.timeout_secs))
            .body(body);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| EngineError::Transcription(format!("request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(EngineError::Transcription(describe_failure(status, &text)));
        }

        Ok(ndjson_results(Box::pin(response.bytes_stream())).boxed())
    }
}

/// Decode newline-delimited JSON results from a byte stream
///
/// A transport error or an undecodable line is yielded as an error item;
/// the stream ends after a transport error.
pub fn ndjson_results<S, B, E>(bytes: S) -> impl Stream<Item = Result<TranscriptResult, EngineError>>
where
    S: Stream<Item = Result<B, E>> + Unpin + Send + 'static,
    B: AsRef<[u8]>,
    E: Display,
{
    futures::stream::unfold(
        (bytes, Vec::<u8>::new(), false),
        |(mut bytes, mut buf, mut done)| async move {
            loop {
                if let Some(pos) = buf.iter().position(|b| *b == b'\n') {
                    let line: Vec<u8> = buf.drain(..=pos).collect();
                    if let Some(item) = decode_line(&line) {
                        return Some((item, (bytes, buf, done)));
                    }
                    continue;
                }

                if done {
                    let rest = std::mem::take(&mut buf);
                    return decode_line(&rest).map(|item| (item, (bytes, buf, done)));
                }

                match bytes.next().await {
                    Some(Ok(chunk)) => buf.extend_from_slice(chunk.as_ref()),
                    Some(Err(e)) => {
                        buf.clear();
                        let item = Err(EngineError::Transcription(format!("stream broke: {}", e)));
                        return Some((item, (bytes, buf, true)));
                    }
                    None => done = true,
                }
            }
        },
    )
}

fn decode_line(line: &[u8]) -> Option<Result<TranscriptResult, EngineError>> {
    let text = String::from_utf8_lossy(line);
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return None;
    }

    Some(
        serde_json::from_str(trimmed)
            .map_err(|e| EngineError::Transcription(format!("undecodable result: {}", e))),
    )
}

/// Speech synthesis over HTTP; returns raw PCM
pub struct HttpTextToSpeech {
    client: reqwest::Client,
    config: SpeechConfig,
    token: Option<String>,
}

impl HttpTextToSpeech {
    pub fn new(client: reqwest::Client, config: SpeechConfig) -> Self {
        let token = crate::config::read_token(config.token_env.as_deref());
        Self {
            client,
            config,
            token,
        }
    }
}

#[async_trait]
impl TextToSpeech for HttpTextToSpeech {
    async fn synthesize(&self, text: &str, voice_profile: &str) -> Result<Vec<u8>, EngineError> {
        let mut request = self
            .client
            .post(&self.config.tts_endpoint)
            .timeout(Duration::from_secs(self.config.timeout_secs))
            .json(&json!({
                "text": text,
                "voiceId": voice_profile,
                "engine": "neural",
                "outputFormat": "pcm",
                "sampleRate": self.config.sample_rate_hz.to_string(),
            }));
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| EngineError::Synthesis(format!("request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(EngineError::Synthesis(describe_failure(status, &body)));
        }

        let audio = response
            .bytes()
            .await
            .map_err(|e| EngineError::Synthesis(format!("truncated audio: {}", e)))?;
        Ok(audio.to_vec())
    }
}

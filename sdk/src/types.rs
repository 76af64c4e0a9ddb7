//! Check-in, staleness and notification types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Most recent confirmed check-in for one subject
///
/// At most one record exists per `subject_id`; writes overwrite.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckInRecord {
    pub subject_id: String,
    pub last_check_in_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// After this instant the record may be purged
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl: Option<DateTime<Utc>>,
}

impl CheckInRecord {
    /// Create a record without message or expiry
    pub fn new(subject_id: impl Into<String>, last_check_in_at: DateTime<Utc>) -> Self {
        Self {
            subject_id: subject_id.into(),
            last_check_in_at,
            message: None,
            ttl: None,
        }
    }

    /// Attach a free-text note
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    /// Attach an expiry
    pub fn with_ttl(mut self, ttl: DateTime<Utc>) -> Self {
        self.ttl = Some(ttl);
        self
    }

    /// Whether the record has passed its expiry at `now`
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.ttl.is_some_and(|ttl| ttl <= now)
    }
}

/// Result of comparing elapsed time against the threshold
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum StalenessStatus {
    Ok,
    Stale,
}

impl fmt::Display for StalenessStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StalenessStatus::Ok => write!(f, "OK"),
            StalenessStatus::Stale => write!(f, "STALE"),
        }
    }
}

/// Produced when a subject's elapsed time exceeds the threshold
///
/// Ephemeral: published or dispatched once, never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StalenessEvent {
    pub subject_id: String,
    pub elapsed_seconds: i64,
    pub last_check_in_at: DateTime<Utc>,
    pub current_time: DateTime<Utc>,
    pub threshold_seconds: i64,
    pub human_message: String,
}

/// Notification delivery mechanism
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    Sms,
    Voice,
    Email,
    Chat,
}

impl Channel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::Sms => "sms",
            Channel::Voice => "voice",
            Channel::Email => "email",
            Channel::Chat => "chat",
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutcomeStatus {
    Sent,
    Failed,
}

/// Per-channel result of one dispatch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationOutcome {
    pub channel: Channel,
    pub status: OutcomeStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_detail: Option<String>,
}

impl NotificationOutcome {
    pub fn sent(channel: Channel) -> Self {
        Self {
            channel,
            status: OutcomeStatus::Sent,
            error_detail: None,
        }
    }

    pub fn failed(channel: Channel, detail: impl Into<String>) -> Self {
        Self {
            channel,
            status: OutcomeStatus::Failed,
            error_detail: Some(detail.into()),
        }
    }

    pub fn is_sent(&self) -> bool {
        self.status == OutcomeStatus::Sent
    }
}

/// Aggregated outcomes of one fan-out, logged and then discarded
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatchSummary {
    pub subject_id: String,
    pub outcomes: Vec<NotificationOutcome>,
}

impl DispatchSummary {
    pub fn sent_count(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_sent()).count()
    }

    pub fn failed_count(&self) -> usize {
        self.outcomes.len() - self.sent_count()
    }
}

/// Tone used when personalizing replies and notifications
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tone {
    Serious,
    Funny,
    Stern,
}

impl fmt::Display for Tone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Tone::Serious => write!(f, "serious"),
            Tone::Funny => write!(f, "funny"),
            Tone::Stern => write!(f, "stern"),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Urgency {
    Low,
    #[default]
    Medium,
    High,
}

impl fmt::Display for Urgency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Urgency::Low => write!(f, "low"),
            Urgency::Medium => write!(f, "medium"),
            Urgency::High => write!(f, "high"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Preferences {
    pub tone: Tone,
    #[serde(default)]
    pub urgency: Urgency,
}

impl Preferences {
    pub fn new(tone: Tone) -> Self {
        Self {
            tone,
            urgency: Urgency::default(),
        }
    }
}

/// Maximum length of a single SMS segment
pub const SMS_MAX_CHARS: usize = 160;

/// Channel-specific message variants produced by personalization
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeneratedContent {
    pub sms_message: String,
    pub phone_script: String,
    pub email_subject: String,
    pub email_body: String,
}

impl GeneratedContent {
    /// Enforce channel limits on provider output
    pub fn normalized(mut self) -> Self {
        if self.sms_message.chars().count() > SMS_MAX_CHARS {
            self.sms_message = self.sms_message.chars().take(SMS_MAX_CHARS).collect();
        }
        self
    }
}

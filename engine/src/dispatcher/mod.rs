//! Notification fan-out
//!
//! One staleness event becomes one delivery attempt per configured channel.
//! Branches run concurrently, each in its own task under its own timeout,
//! and every branch resolves to exactly one `NotificationOutcome`: a
//! failure, a timeout or even a panicking adapter is recorded, never
//! propagated. The dispatcher does not retry and does not deduplicate, so
//! processing the same event twice sends every notification twice.

use crate::channels::chat::required_message;
use crate::channels::{
    ChannelAdapter, ChatAdapter, EmailAdapter, HttpSender, NotificationPayload, SmsAdapter,
    VoiceCallAdapter,
};
use crate::config::ChannelsConfig;
use crate::elapsed::format_duration;
use crate::llm::{ContentPersonalizer, ContentRequest};
use crate::message_bus::{BusEvent, Event, EventHandler};
use async_trait::async_trait;
use futures::future::join_all;
use sdk::errors::EngineError;
use sdk::types::{
    Channel, DispatchSummary, GeneratedContent, NotificationOutcome, Preferences, StalenessEvent,
    SMS_MAX_CHARS,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Anything that can turn a staleness event into notifications
#[async_trait]
pub trait NotificationDispatcher: Send + Sync {
    async fn dispatch(&self, event: &StalenessEvent) -> DispatchSummary;
}

/// One channel branch of the fan-out
#[derive(Clone)]
pub struct ChannelRoute {
    pub adapter: Arc<dyn ChannelAdapter>,
    pub destination: String,
    pub timeout: Duration,
}

impl ChannelRoute {
    pub fn new(
        adapter: Arc<dyn ChannelAdapter>,
        destination: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            adapter,
            destination: destination.into(),
            timeout,
        }
    }
}

/// Build one route per enabled channel
pub fn routes_from_config(channels: &ChannelsConfig, client: &reqwest::Client) -> Vec<ChannelRoute> {
    channels
        .enabled()
        .into_iter()
        .map(|(channel, cfg)| {
            let http = HttpSender::new(client.clone(), cfg.endpoint.clone(), cfg.token());
            let adapter: Arc<dyn ChannelAdapter> = match channel {
                Channel::Sms => Arc::new(SmsAdapter::new(http)),
                Channel::Voice => Arc::new(VoiceCallAdapter::new(http, cfg.from.clone())),
                Channel::Email => Arc::new(EmailAdapter::new(http, cfg.from.clone())),
                Channel::Chat => Arc::new(ChatAdapter::new(http)),
            };
            ChannelRoute::new(adapter, cfg.destination.clone(), cfg.timeout())
        })
        .collect()
}

pub struct FanOutDispatcher {
    routes: Vec<ChannelRoute>,
    personalizer: Option<Arc<dyn ContentPersonalizer>>,
    preferences: Preferences,
}

impl FanOutDispatcher {
    pub fn new(routes: Vec<ChannelRoute>) -> Self {
        Self {
            routes,
            personalizer: None,
            preferences: Preferences::new(sdk::types::Tone::Serious),
        }
    }

    /// Personalize wording before sending; templates are used when it fails
    pub fn with_personalizer(
        mut self,
        personalizer: Arc<dyn ContentPersonalizer>,
        preferences: Preferences,
    ) -> Self {
        self.personalizer = Some(personalizer);
        self.preferences = preferences;
        self
    }

    pub fn channel_count(&self) -> usize {
        self.routes.len()
    }

    async fn compose(&self, event: &StalenessEvent) -> GeneratedContent {
        let Some(personalizer) = &self.personalizer else {
            return template_content(event);
        };

        let request = ContentRequest {
            subject_id: event.subject_id.clone(),
            prompt: event.human_message.clone(),
            preferences: self.preferences,
        };

        match personalizer.generate(&request).await {
            Ok(content) => content.normalized(),
            Err(e) => {
                warn!(subject_id = %event.subject_id, "Using template wording: {}", e);
                template_content(event)
            }
        }
    }
}

/// Built-in wording used without (or after a failed) personalization
pub fn template_content(event: &StalenessEvent) -> GeneratedContent {
    let silence = format_duration(event.elapsed_seconds.max(0).unsigned_abs());

    GeneratedContent {
        sms_message: truncate(
            &format!(
                "Check-in reminder: no check-in from {} for {}. Please check in.",
                event.subject_id, silence
            ),
            SMS_MAX_CHARS,
        ),
        phone_script: format!(
            "Hello. This is your check-in reminder. We have not heard from you in {}. \
             Please check in as soon as you can.",
            silence
        ),
        email_subject: format!("Check-in needed: {}", event.subject_id),
        email_body: format!(
            "{}.\n\nLast check-in: {}\nThis reminder was sent at {}.",
            event.human_message,
            event.last_check_in_at.to_rfc3339(),
            event.current_time.to_rfc3339()
        ),
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}

fn payload_for(channel: Channel, subject_id: &str, content: &GeneratedContent) -> NotificationPayload {
    match channel {
        Channel::Sms => NotificationPayload::new(subject_id, &content.sms_message),
        Channel::Voice => NotificationPayload::new(subject_id, &content.phone_script),
        Channel::Email => NotificationPayload::new(subject_id, &content.email_body)
            .with_title(&content.email_subject),
        Channel::Chat => NotificationPayload::new(subject_id, required_message(subject_id)),
    }
}

#[async_trait]
impl NotificationDispatcher for FanOutDispatcher {
    async fn dispatch(&self, event: &StalenessEvent) -> DispatchSummary {
        let content = self.compose(event).await;

        let branches = self.routes.iter().map(|route| {
            let channel = route.adapter.channel();
            let adapter = Arc::clone(&route.adapter);
            let destination = route.destination.clone();
            let limit = route.timeout;
            let payload = payload_for(channel, &event.subject_id, &content);

            let handle = tokio::spawn(async move {
                tokio::time::timeout(limit, adapter.send(&destination, &payload)).await
            });

            async move {
                match handle.await {
                    Ok(Ok(Ok(()))) => NotificationOutcome::sent(channel),
                    Ok(Ok(Err(e))) => NotificationOutcome::failed(channel, e.to_string()),
                    Ok(Err(_)) => NotificationOutcome::failed(
                        channel,
                        EngineError::Timeout(limit.as_millis() as u64).to_string(),
                    ),
                    Err(e) => NotificationOutcome::failed(channel, format!("adapter aborted: {}", e)),
                }
            }
        });

        let outcomes = join_all(branches).await;

        for outcome in &outcomes {
            match &outcome.error_detail {
                None => info!(
                    subject_id = %event.subject_id,
                    channel = %outcome.channel,
                    "Notification sent"
                ),
                Some(detail) => warn!(
                    subject_id = %event.subject_id,
                    channel = %outcome.channel,
                    "Notification failed: {}",
                    detail
                ),
            }
        }

        let summary = DispatchSummary {
            subject_id: event.subject_id.clone(),
            outcomes,
        };
        info!(
            subject_id = %summary.subject_id,
            sent = summary.sent_count(),
            failed = summary.failed_count(),
            "Dispatch complete"
        );
        summary
    }
}

#[async_trait]
impl EventHandler for FanOutDispatcher {
    fn name(&self) -> &str {
        "fan-out-dispatcher"
    }

    /// Always succeeds so the bus never redelivers into a second fan-out
    async fn handle(&self, event: &BusEvent) -> Result<(), EngineError> {
        if let Event::TimeForCheckin(staleness) = &event.event {
            self.dispatch(staleness).await;
        }
        Ok(())
    }
}

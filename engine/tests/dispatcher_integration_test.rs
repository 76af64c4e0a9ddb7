//! Integration tests for notification fan-out
//!
//! Drives the real channel adapters against mock HTTP providers and checks
//! that every configured channel yields exactly one outcome, whatever the
//! provider does.

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, TimeZone, Utc};
use sdk::errors::EngineError;
use sdk::types::{
    Channel, GeneratedContent, NotificationOutcome, OutcomeStatus, Preferences, StalenessEvent,
    Tone,
};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use vigil_engine::channels::{
    ChannelAdapter, ChatAdapter, EmailAdapter, HttpSender, NotificationPayload, SmsAdapter,
};
use vigil_engine::dispatcher::{ChannelRoute, FanOutDispatcher, NotificationDispatcher};
use vigil_engine::llm::{ContentPersonalizer, ContentRequest};
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const TIMEOUT: Duration = Duration::from_secs(5);

fn stale_event() -> StalenessEvent {
    let last = Utc.timestamp_opt(1_714_557_600, 0).unwrap();
    StalenessEvent {
        subject_id: "u-1".to_string(),
        elapsed_seconds: 3700,
        last_check_in_at: last,
        current_time: last + ChronoDuration::seconds(3700),
        threshold_seconds: 3600,
        human_message: "No check-in for 1h 1m 40s, which is past the 1h limit".to_string(),
    }
}

fn sender(server: &MockServer, route: &str) -> HttpSender {
    HttpSender::new(
        reqwest::Client::new(),
        format!("{}{}", server.uri(), route),
        None,
    )
}

fn outcome_for(outcomes: &[NotificationOutcome], channel: Channel) -> &NotificationOutcome {
    outcomes
        .iter()
        .find(|o| o.channel == channel)
        .unwrap_or_else(|| panic!("no outcome for {}", channel))
}

#[tokio::test]
async fn test_one_failing_channel_does_not_affect_others() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/sms"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"messageId": "m-1"})))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/email"))
        .respond_with(ResponseTemplate::new(500).set_body_string("mailbox unavailable"))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/chat"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ok": true})))
        .expect(1)
        .mount(&server)
        .await;

    let dispatcher = FanOutDispatcher::new(vec![
        ChannelRoute::new(Arc::new(SmsAdapter::new(sender(&server, "/sms"))), "+15550100", TIMEOUT),
        ChannelRoute::new(
            Arc::new(EmailAdapter::new(sender(&server, "/email"), "vigil@example.com")),
            "family@example.com",
            TIMEOUT,
        ),
        ChannelRoute::new(Arc::new(ChatAdapter::new(sender(&server, "/chat"))), "C123", TIMEOUT),
    ]);

    let summary = dispatcher.dispatch(&stale_event()).await;

    assert_eq!(summary.subject_id, "u-1");
    assert_eq!(summary.outcomes.len(), 3);
    assert_eq!(summary.sent_count(), 2);
    assert_eq!(summary.failed_count(), 1);

    let email = outcome_for(&summary.outcomes, Channel::Email);
    assert_eq!(email.status, OutcomeStatus::Failed);
    let detail = email.error_detail.as_deref().unwrap();
    assert!(detail.contains("HTTP 500"), "unexpected detail: {}", detail);
    assert!(detail.contains("mailbox unavailable"));

    assert!(outcome_for(&summary.outcomes, Channel::Sms).is_sent());
    assert!(outcome_for(&summary.outcomes, Channel::Chat).is_sent());
}

#[tokio::test]
async fn test_slow_channel_times_out_alone() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/sms"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(3)))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/chat"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let dispatcher = FanOutDispatcher::new(vec![
        ChannelRoute::new(
            Arc::new(SmsAdapter::new(sender(&server, "/sms"))),
            "+15550100",
            Duration::from_millis(100),
        ),
        ChannelRoute::new(Arc::new(ChatAdapter::new(sender(&server, "/chat"))), "C123", TIMEOUT),
    ]);

    let started = std::time::Instant::now();
    let summary = dispatcher.dispatch(&stale_event()).await;

    assert!(started.elapsed() < Duration::from_secs(3));
    assert_eq!(summary.outcomes.len(), 2);

    let sms = outcome_for(&summary.outcomes, Channel::Sms);
    assert_eq!(sms.status, OutcomeStatus::Failed);
    assert!(sms.error_detail.as_deref().unwrap().contains("timed out"));
    assert!(outcome_for(&summary.outcomes, Channel::Chat).is_sent());
}

#[tokio::test]
async fn test_chat_ok_false_is_a_failure() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"ok": false, "error": "channel_not_found"})),
        )
        .mount(&server)
        .await;

    let dispatcher = FanOutDispatcher::new(vec![ChannelRoute::new(
        Arc::new(ChatAdapter::new(sender(&server, "/chat"))),
        "C404",
        TIMEOUT,
    )]);

    let summary = dispatcher.dispatch(&stale_event()).await;
    let chat = outcome_for(&summary.outcomes, Channel::Chat);
    assert_eq!(chat.status, OutcomeStatus::Failed);
    assert!(chat.error_detail.as_deref().unwrap().contains("channel_not_found"));
}

#[tokio::test]
async fn test_unreachable_provider_is_recorded() {
    // Port 9 (discard) is closed on test hosts; the connect is refused
    let dispatcher = FanOutDispatcher::new(vec![ChannelRoute::new(
        Arc::new(SmsAdapter::new(HttpSender::new(
            reqwest::Client::new(),
            "http://127.0.0.1:9/sms",
            None,
        ))),
        "+15550100",
        TIMEOUT,
    )]);

    let summary = dispatcher.dispatch(&stale_event()).await;
    assert_eq!(summary.outcomes.len(), 1);
    assert_eq!(summary.outcomes[0].status, OutcomeStatus::Failed);
}

struct PanickingAdapter;

#[async_trait]
impl ChannelAdapter for PanickingAdapter {
    fn channel(&self) -> Channel {
        Channel::Voice
    }

    async fn send(&self, _destination: &str, _payload: &NotificationPayload) -> Result<(), EngineError> {
        panic!("provider SDK bug");
    }
}

#[tokio::test]
async fn test_panicking_adapter_becomes_failed_outcome() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/sms"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let dispatcher = FanOutDispatcher::new(vec![
        ChannelRoute::new(Arc::new(PanickingAdapter), "+15550199", TIMEOUT),
        ChannelRoute::new(Arc::new(SmsAdapter::new(sender(&server, "/sms"))), "+15550100", TIMEOUT),
    ]);

    let summary = dispatcher.dispatch(&stale_event()).await;

    assert_eq!(summary.outcomes.len(), 2);
    let voice = outcome_for(&summary.outcomes, Channel::Voice);
    assert_eq!(voice.status, OutcomeStatus::Failed);
    assert!(voice.error_detail.as_deref().unwrap().contains("adapter aborted"));
    assert!(outcome_for(&summary.outcomes, Channel::Sms).is_sent());
}

struct FixedPersonalizer {
    fail: bool,
}

#[async_trait]
impl ContentPersonalizer for FixedPersonalizer {
    async fn generate(&self, request: &ContentRequest) -> Result<GeneratedContent, EngineError> {
        if self.fail {
            return Err(EngineError::Personalization("model overloaded".to_string()));
        }
        Ok(GeneratedContent {
            sms_message: format!("Hey {}, time to check in!", request.subject_id),
            phone_script: "Please check in.".to_string(),
            email_subject: "Check in".to_string(),
            email_body: "Please check in.".to_string(),
        })
    }
}

#[tokio::test]
async fn test_personalized_wording_is_sent() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/sms"))
        .and(body_partial_json(json!({
            "phoneNumber": "+15550100",
            "message": "Hey u-1, time to check in!",
        })))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let dispatcher = FanOutDispatcher::new(vec![ChannelRoute::new(
        Arc::new(SmsAdapter::new(sender(&server, "/sms"))),
        "+15550100",
        TIMEOUT,
    )])
    .with_personalizer(
        Arc::new(FixedPersonalizer { fail: false }),
        Preferences::new(Tone::Funny),
    );

    let summary = dispatcher.dispatch(&stale_event()).await;
    assert_eq!(summary.sent_count(), 1);
}

#[tokio::test]
async fn test_failed_personalization_falls_back_to_template() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/email"))
        .and(body_partial_json(json!({
            "to": ["family@example.com"],
            "subject": "Check-in needed: u-1",
        })))
        .respond_with(ResponseTemplate::new(202))
        .expect(1)
        .mount(&server)
        .await;

    let dispatcher = FanOutDispatcher::new(vec![ChannelRoute::new(
        Arc::new(EmailAdapter::new(sender(&server, "/email"), "vigil@example.com")),
        "family@example.com",
        TIMEOUT,
    )])
    .with_personalizer(
        Arc::new(FixedPersonalizer { fail: true }),
        Preferences::new(Tone::Stern),
    );

    let summary = dispatcher.dispatch(&stale_event()).await;
    assert_eq!(summary.sent_count(), 1);
}

#[tokio::test]
async fn test_same_event_twice_sends_twice() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/sms"))
        .respond_with(ResponseTemplate::new(200))
        .expect(2)
        .mount(&server)
        .await;

    let dispatcher = FanOutDispatcher::new(vec![ChannelRoute::new(
        Arc::new(SmsAdapter::new(sender(&server, "/sms"))),
        "+15550100",
        TIMEOUT,
    )]);

    let event = stale_event();
    dispatcher.dispatch(&event).await;
    dispatcher.dispatch(&event).await;
}

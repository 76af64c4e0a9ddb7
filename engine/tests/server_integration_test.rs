//! Integration tests for the webhook server
//!
//! Requests go through the real router and a fully built `App`; the
//! telephony, speech and agent providers are mock HTTP servers.

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use std::time::Duration;
use tempfile::TempDir;
use tower::ServiceExt;
use vigil_engine::app::App;
use vigil_engine::config::Config;
use vigil_engine::db::CheckInStore;
use vigil_engine::server::{router, ServerState};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

async fn build_app(temp_dir: &TempDir, providers: &MockServer) -> App {
    let config = Config::from_toml_str(&format!(
        r#"
[core]
data_dir = "{data_dir}"

[server]
enabled = false

[agent]
endpoint = "{uri}/agent"

[speech]
stt_endpoint = "{uri}/transcribe"
tts_endpoint = "{uri}/synthesize"

[voice]
telephony_endpoint = "{uri}/calls"

[voice.subject_directory]
"+15550100" = "u-voice"
"#,
        data_dir = temp_dir.path().display(),
        uri = providers.uri()
    ))
    .unwrap();

    App::build(config).await.unwrap()
}

fn app_router(app: &App) -> Router {
    router(ServerState {
        bus: app.bus.clone(),
        gateway: app.gateway.clone(),
    })
}

async fn send(router: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let request = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(body) => request
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => request.body(Body::empty()).unwrap(),
    };

    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, json)
}

async fn wait_for_record(app: &App, subject_id: &str) -> sdk::types::CheckInRecord {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        if let Some(record) = app.store.get(subject_id).await.unwrap() {
            return record;
        }
        assert!(tokio::time::Instant::now() < deadline, "check-in never stored");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

#[tokio::test]
async fn test_health_reports_running() {
    let temp_dir = TempDir::new().unwrap();
    let providers = MockServer::start().await;
    let app = build_app(&temp_dir, &providers).await;
    let router = app_router(&app);

    let (status, body) = send(&router, "GET", "/health", None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "running");
    assert_eq!(body["activeCalls"], 0);

    app.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_check_in_is_published_and_stored() {
    let temp_dir = TempDir::new().unwrap();
    let providers = MockServer::start().await;
    let app = build_app(&temp_dir, &providers).await;
    let router = app_router(&app);

    let (status, body) = send(
        &router,
        "POST",
        "/check-ins",
        Some(json!({"subjectId": "u-1", "timestamp": 1714557600, "message": "all good"})),
    )
    .await;

    assert_eq!(status, StatusCode::ACCEPTED);
    assert!(body["eventId"].is_string());
    assert_eq!(body["matched"], 1);

    let record = wait_for_record(&app, "u-1").await;
    assert_eq!(record.last_check_in_at.timestamp(), 1_714_557_600);
    assert_eq!(record.message.as_deref(), Some("all good"));

    app.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_invalid_check_ins_are_rejected() {
    let temp_dir = TempDir::new().unwrap();
    let providers = MockServer::start().await;
    let app = build_app(&temp_dir, &providers).await;
    let router = app_router(&app);

    let (status, body) = send(&router, "POST", "/check-ins", Some(json!({"subjectId": " "}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("subjectId"));

    let (status, _) = send(
        &router,
        "POST",
        "/check-ins",
        Some(json!({"subjectId": "u-1", "timestamp": "not a time"})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(
        &router,
        "POST",
        "/check-ins",
        Some(json!({"subjectId": "u-1", "ttlHours": 0})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = send(
        &router,
        "POST",
        "/check-ins",
        Some(json!({"subjectId": "u-1", "ttlHours": 10_000_000_000i64})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("ttlHours"));

    app.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_raw_envelopes() {
    let temp_dir = TempDir::new().unwrap();
    let providers = MockServer::start().await;
    let app = build_app(&temp_dir, &providers).await;
    let router = app_router(&app);

    let (status, _) = send(
        &router,
        "POST",
        "/events",
        Some(json!({
            "source": "external.app",
            "detailType": "CheckInRecorded",
            "detail": {"subjectId": "u-2", "timestamp": "2024-05-01T10:00:00Z"},
        })),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    let record = wait_for_record(&app, "u-2").await;
    assert_eq!(record.last_check_in_at.timestamp(), 1_714_557_600);

    let (status, body) = send(
        &router,
        "POST",
        "/events",
        Some(json!({"source": "external.app", "detailType": "Bogus", "detail": {}})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("Bogus"));

    app.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_closed_bus_is_service_unavailable() {
    let temp_dir = TempDir::new().unwrap();
    let providers = MockServer::start().await;
    let app = build_app(&temp_dir, &providers).await;
    let router = app_router(&app);

    app.bus.close();

    let (status, body) = send(&router, "POST", "/check-ins", Some(json!({"subjectId": "u-1"}))).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert!(body["hint"].is_string());

    let (_, health) = send(&router, "GET", "/health", None).await;
    assert_eq!(health["status"], "draining");

    app.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_voice_call_over_webhooks() {
    let temp_dir = TempDir::new().unwrap();
    let providers = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/calls"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"transactionId": "tx-9"})))
        .expect(1)
        .mount(&providers)
        .await;
    Mock::given(method("PUT"))
        .and(path("/calls/tx-9"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&providers)
        .await;
    Mock::given(method("POST"))
        .and(path("/transcribe"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(
            "{\"text\":\"hel\",\"isFinal\":false}\n{\"text\":\"hello world\",\"isFinal\":true}\n",
            "application/x-ndjson",
        ))
        .mount(&providers)
        .await;
    Mock::given(method("POST"))
        .and(path("/agent"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"completion": "Thanks for checking in"})))
        .mount(&providers)
        .await;
    Mock::given(method("POST"))
        .and(path("/synthesize"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![1u8, 2, 3, 4]))
        .mount(&providers)
        .await;

    let app = build_app(&temp_dir, &providers).await;
    let router = app_router(&app);

    let (status, started) = send(
        &router,
        "POST",
        "/voice/events",
        Some(json!({
            "callId": "call-1",
            "fromNumber": "+15550100",
            "toNumber": "+15550199",
            "action": "start",
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(started["transactionId"], "tx-9");
    assert_eq!(started["subjectId"], "u-voice");

    let (status, streamed) = send(
        &router,
        "POST",
        "/voice/events",
        Some(json!({"callId": "call-1", "action": "stream", "audioData": "AAECAw=="})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(streamed["transcription"], "hello world");
    assert_eq!(streamed["response"], "Thanks for checking in");
    assert_eq!(streamed["audioResponse"], "AQIDBA==");

    let (status, ended) = send(
        &router,
        "POST",
        "/voice/events",
        Some(json!({"callId": "call-1", "action": "end"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(ended["message"], "Call ended");

    let record = app.store.get("u-voice").await.unwrap().unwrap();
    assert_eq!(record.message.as_deref(), Some("hello world"));

    app.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_rejected_call_setup_is_bad_gateway() {
    let temp_dir = TempDir::new().unwrap();
    let providers = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/calls"))
        .respond_with(ResponseTemplate::new(500).set_body_string("no capacity"))
        .mount(&providers)
        .await;

    let app = build_app(&temp_dir, &providers).await;
    let router = app_router(&app);

    let (status, body) = send(
        &router,
        "POST",
        "/voice/events",
        Some(json!({
            "callId": "call-2",
            "fromNumber": "+15550100",
            "toNumber": "+15550199",
            "action": "start",
        })),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert!(body["error"].as_str().unwrap().contains("Call setup failed"));
    assert_eq!(app.gateway.active_calls().await, 0);

    let (status, _) = send(
        &router,
        "POST",
        "/voice/events",
        Some(json!({"callId": "call-2", "action": "end"})),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);

    app.shutdown().await.unwrap();
}

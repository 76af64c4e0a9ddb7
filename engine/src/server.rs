//! Webhook server
//!
//! # Endpoints
//!
//! - POST /voice/events - telephony webhook (`start`, `stream`, `end`)
//! - POST /check-ins - record a check-in (published as `CheckInRecorded`)
//! - POST /events - publish a raw `{source, detailType, detail}` envelope
//! - GET /health - liveness

use crate::message_bus::{CheckInRecorded, Envelope, Event, EventBus, PublishReceipt, SOURCE_API};
use crate::voice::{GatewayReply, VoiceCallEvent, VoiceGateway};
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use sdk::errors::{EngineError, VigilErrorExt};
use serde::Serialize;
use serde_json::json;
use std::future::Future;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{info, warn};
use uuid::Uuid;

/// Handles shared by every request
#[derive(Clone)]
pub struct ServerState {
    pub bus: Arc<EventBus>,
    pub gateway: Arc<VoiceGateway>,
}

/// JSON error body with a status picked from the error kind
pub struct ApiError(EngineError);

impl From<EngineError> for ApiError {
    fn from(e: EngineError) -> Self {
        Self(e)
    }
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match &self.0 {
            EngineError::InvalidEvent(_) | EngineError::InvalidTimestamp(_) => {
                StatusCode::BAD_REQUEST
            }
            EngineError::SessionState(_) => StatusCode::CONFLICT,
            EngineError::CallSetup(_)
            | EngineError::Transcription(_)
            | EngineError::Agent(_)
            | EngineError::Network(_) => StatusCode::BAD_GATEWAY,
            EngineError::EventBusUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            EngineError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            warn!(status = status.as_u16(), "Request failed: {}", self.0);
        }
        (
            status,
            Json(json!({
                "error": self.0.to_string(),
                "hint": self.0.user_hint(),
            })),
        )
            .into_response()
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Accepted {
    event_id: Uuid,
    matched: usize,
}

impl From<PublishReceipt> for Accepted {
    fn from(receipt: PublishReceipt) -> Self {
        Self {
            event_id: receipt.event_id,
            matched: receipt.matched,
        }
    }
}

pub fn router(state: ServerState) -> Router {
    Router::new()
        .route("/voice/events", post(voice_event_handler))
        .route("/check-ins", post(check_in_handler))
        .route("/events", post(event_handler))
        .route("/health", get(health_handler))
        .with_state(state)
}

/// Serve until `shutdown` resolves
pub async fn serve<F>(listener: TcpListener, state: ServerState, shutdown: F) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    if let Ok(addr) = listener.local_addr() {
        info!("Webhook server listening on http://{}", addr);
    }

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await
}

async fn voice_event_handler(
    State(state): State<ServerState>,
    Json(event): Json<VoiceCallEvent>,
) -> Result<Json<GatewayReply>, ApiError> {
    let reply = state.gateway.handle(event).await?;
    Ok(Json(reply))
}

async fn check_in_handler(
    State(state): State<ServerState>,
    Json(detail): Json<CheckInRecorded>,
) -> Result<(StatusCode, Json<Accepted>), ApiError> {
    let event = Event::CheckInRecorded(detail);
    event.validate()?;

    let receipt = state.bus.publish(SOURCE_API, event).await?;
    Ok((StatusCode::ACCEPTED, Json(receipt.into())))
}

async fn event_handler(
    State(state): State<ServerState>,
    Json(envelope): Json<Envelope>,
) -> Result<(StatusCode, Json<Accepted>), ApiError> {
    let (source, event) = envelope.into_event()?;

    let receipt = state.bus.publish(&source, event).await?;
    Ok((StatusCode::ACCEPTED, Json(receipt.into())))
}

async fn health_handler(State(state): State<ServerState>) -> Json<serde_json::Value> {
    Json(json!({
        "status": if state.bus.is_closed() { "draining" } else { "running" },
        "version": env!("CARGO_PKG_VERSION"),
        "activeCalls": state.gateway.active_calls().await,
    }))
}

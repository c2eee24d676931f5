//! HTTP surface: REST endpoints, provider webhooks, and the WebSocket
//! event feed.
//!
//! Webhooks always answer 200 so the provider never retries on identifiers
//! we have dropped or never knew.

use std::sync::Arc;

use axum::{
    Form, Json, Router,
    extract::{
        Path, Query, State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::{delete, get, post},
};
use serde::Deserialize;
use tokio::sync::broadcast::error::RecvError;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::OrchestratorError;
use crate::events::OutreachEvent;
use crate::orchestrator::{Orchestrator, StartCallJob, StartWarmTransfer, StatusEvent, WebhookOutcome};
use crate::safety::{BlockedNumberUpdate, DEFAULT_ESCALATION_LIMIT, MAX_ESCALATIONS};
use crate::telephony::twiml;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
}

/// Build the Axum router with every REST, webhook, and WebSocket route.
pub fn routes(orchestrator: Arc<Orchestrator>) -> Router {
    let state = AppState { orchestrator };

    Router::new()
        .route("/ws", get(ws_handler))
        .route("/health", get(health))
        .route("/api/call-jobs", post(create_call_job).get(list_call_jobs))
        .route("/api/call-jobs/{id}", get(get_call_job))
        .route("/api/warm-transfers", post(create_warm_transfer).get(list_warm_transfers))
        .route("/api/warm-transfers/{id}", get(get_warm_transfer))
        .route("/webhooks/twilio/status", post(status_webhook))
        .route("/webhooks/twilio/recording", post(recording_webhook))
        .route("/webhooks/twilio/transcript", post(transcript_webhook))
        .route("/webhooks/twilio/gather", post(gather_webhook))
        .route(
            "/api/safety/blocked-numbers",
            get(list_blocked_numbers).post(add_blocked_number),
        )
        .route("/api/safety/blocked-numbers/{phone}", delete(remove_blocked_number))
        .route("/api/safety/escalations", get(list_escalations))
        .route("/api/safety/config", get(safety_config))
        .route("/api/admin/reset", post(reset))
        .layer(ServiceBuilder::new().layer(CorsLayer::permissive()))
        .with_state(state)
}

// ── Errors ──────────────────────────────────────────────────────────────

fn error_response(err: OrchestratorError) -> Response {
    match err {
        OrchestratorError::InvalidRequest(message) => (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({"error": message})),
        )
            .into_response(),
        OrchestratorError::JobNotFound { .. } | OrchestratorError::AttemptNotFound { .. } => (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({"error": err.to_string()})),
        )
            .into_response(),
        OrchestratorError::PolicyDenied(denied) => (
            StatusCode::FORBIDDEN,
            Json(serde_json::json!({
                "error": "policy_denied",
                "reason": denied.to_string(),
                "escalation_id": denied.escalation_id(),
            })),
        )
            .into_response(),
        OrchestratorError::Config(e) => (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({"error": e.to_string()})),
        )
            .into_response(),
    }
}

fn parse_id(id: &str, what: &str) -> Result<Uuid, Response> {
    Uuid::parse_str(id).map_err(|_| {
        (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({"error": format!("Invalid {what} ID")})),
        )
            .into_response()
    })
}

fn not_found(what: &str) -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(serde_json::json!({"error": format!("{what} not found")})),
    )
        .into_response()
}

fn webhook_ack(outcome: WebhookOutcome) -> Response {
    (StatusCode::OK, Json(serde_json::json!({"status": outcome.as_str()}))).into_response()
}

// ── Health ──────────────────────────────────────────────────────────────

async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let orch = &state.orchestrator;
    Json(serde_json::json!({
        "status": "ok",
        "service": "shelter-outreach",
        "live_telephony": orch.live_available(),
        "llm": orch.llm_enabled(),
        "persistence": orch.persistence_enabled(),
    }))
}

// ── WebSocket ───────────────────────────────────────────────────────────

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    info!("WebSocket client connecting");
    ws.on_upgrade(|socket| handle_socket(socket, state.orchestrator))
}

async fn send_event(socket: &mut WebSocket, event: &OutreachEvent) -> bool {
    match serde_json::to_string(event) {
        Ok(json) => socket.send(Message::Text(json.into())).await.is_ok(),
        Err(e) => {
            warn!(error = %e, "Failed to serialize event");
            true
        }
    }
}

async fn handle_socket(mut socket: WebSocket, orchestrator: Arc<Orchestrator>) {
    info!("WebSocket client connected");

    // Subscribe before the snapshot so nothing falls between the two.
    let mut rx = orchestrator.events().subscribe();

    if !send_event(&mut socket, &orchestrator.snapshot()).await {
        warn!("Failed to send initial snapshot, client disconnected");
        return;
    }

    loop {
        tokio::select! {
            result = rx.recv() => {
                match result {
                    Ok(event) => {
                        if !send_event(&mut socket, &event).await {
                            debug!("Client disconnected during send");
                            break;
                        }
                    }
                    Err(RecvError::Lagged(n)) => {
                        warn!(missed = n, "WS client lagged behind broadcast");
                        if !send_event(&mut socket, &orchestrator.snapshot()).await {
                            break;
                        }
                    }
                    Err(RecvError::Closed) => {
                        debug!("Broadcast channel closed");
                        break;
                    }
                }
            }

            result = socket.recv() => {
                match result {
                    Some(Ok(Message::Ping(data))) => {
                        if socket.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        info!("WebSocket client disconnected");
                        break;
                    }
                    Some(Err(e)) => {
                        warn!(error = %e, "WebSocket error");
                        break;
                    }
                    Some(Ok(_)) => {}
                }
            }
        }
    }

    info!("WebSocket connection closed");
}

// ── Call jobs ───────────────────────────────────────────────────────────

async fn create_call_job(State(state): State<AppState>, Json(body): Json<StartCallJob>) -> Response {
    match state.orchestrator.start_call_job(body).await {
        Ok(job) => (StatusCode::CREATED, Json(job)).into_response(),
        Err(e) => error_response(e),
    }
}

async fn list_call_jobs(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.orchestrator.jobs().list_jobs())
}

async fn get_call_job(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    let job_id = match parse_id(&id, "job") {
        Ok(id) => id,
        Err(response) => return response,
    };
    match state.orchestrator.jobs().get_job(job_id) {
        Some(job) => Json(job).into_response(),
        None => not_found("Call job"),
    }
}

// ── Warm transfers ──────────────────────────────────────────────────────

async fn create_warm_transfer(
    State(state): State<AppState>,
    Json(body): Json<StartWarmTransfer>,
) -> Response {
    match state.orchestrator.start_warm_transfer(body).await {
        Ok(session) => (StatusCode::CREATED, Json(session)).into_response(),
        Err(e) => error_response(e),
    }
}

async fn list_warm_transfers(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.orchestrator.transfers().list())
}

async fn get_warm_transfer(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    let transfer_id = match parse_id(&id, "transfer") {
        Ok(id) => id,
        Err(response) => return response,
    };
    match state.orchestrator.transfers().get(transfer_id) {
        Some(session) => Json(session).into_response(),
        None => not_found("Warm transfer"),
    }
}

// ── Provider webhooks ───────────────────────────────────────────────────

/// Provider status callback. Field names follow the provider's form encoding.
#[derive(Deserialize)]
struct StatusForm {
    #[serde(rename = "CallSid", default)]
    call_sid: String,
    #[serde(rename = "CallStatus", default)]
    call_status: String,
    #[serde(rename = "RecordingUrl", default)]
    recording_url: Option<String>,
}

async fn status_webhook(State(state): State<AppState>, Form(form): Form<StatusForm>) -> Response {
    if form.call_sid.is_empty() {
        debug!("Status callback without CallSid");
        return webhook_ack(WebhookOutcome::Ignored);
    }
    webhook_ack(state.orchestrator.handle_call_status(StatusEvent {
        call_sid: form.call_sid,
        call_status: form.call_status,
        recording_url: form.recording_url,
    }))
}

#[derive(Deserialize)]
struct RecordingForm {
    #[serde(rename = "CallSid", default)]
    call_sid: String,
    #[serde(rename = "RecordingUrl", default)]
    recording_url: String,
}

async fn recording_webhook(State(state): State<AppState>, Form(form): Form<RecordingForm>) -> Response {
    webhook_ack(
        state
            .orchestrator
            .handle_recording(&form.call_sid, &form.recording_url),
    )
}

#[derive(Deserialize)]
struct TranscriptPayload {
    call_sid: String,
    transcript: String,
}

async fn transcript_webhook(
    State(state): State<AppState>,
    Json(body): Json<TranscriptPayload>,
) -> Response {
    webhook_ack(
        state
            .orchestrator
            .handle_transcript(&body.call_sid, &body.transcript)
            .await,
    )
}

#[derive(Deserialize)]
struct GatherQuery {
    job_id: Option<String>,
    attempt_id: Option<String>,
}

#[derive(Deserialize)]
struct GatherForm {
    #[serde(rename = "SpeechResult", default)]
    speech_result: Option<String>,
}

async fn gather_webhook(
    State(state): State<AppState>,
    Query(query): Query<GatherQuery>,
    Form(form): Form<GatherForm>,
) -> Response {
    let ids = query
        .job_id
        .as_deref()
        .and_then(|id| Uuid::parse_str(id).ok())
        .zip(query.attempt_id.as_deref().and_then(|id| Uuid::parse_str(id).ok()));

    let markup = match ids {
        Some((job_id, attempt_id)) => {
            state
                .orchestrator
                .gather_reply(job_id, attempt_id, form.speech_result.as_deref())
                .await
        }
        None => {
            debug!("Gather callback without valid job or attempt id");
            twiml::follow_up("Thank you for your time. Goodbye.", None, true)
        }
    };
    (StatusCode::OK, [(header::CONTENT_TYPE, "text/xml")], markup).into_response()
}

// ── Safety policy ───────────────────────────────────────────────────────

async fn list_blocked_numbers(State(state): State<AppState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "blocked_numbers": state.orchestrator.safety().list_blocked_numbers()
    }))
}

#[derive(Deserialize)]
struct BlockRequest {
    phone: String,
}

fn blocked_update_response(update: BlockedNumberUpdate) -> Response {
    if update.normalized.is_none() {
        return (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({"error": "Phone number has no digits"})),
        )
            .into_response();
    }
    (StatusCode::OK, Json(update)).into_response()
}

async fn add_blocked_number(State(state): State<AppState>, Json(body): Json<BlockRequest>) -> Response {
    blocked_update_response(state.orchestrator.block_number(&body.phone))
}

async fn remove_blocked_number(State(state): State<AppState>, Path(phone): Path<String>) -> Response {
    blocked_update_response(state.orchestrator.unblock_number(&phone))
}

#[derive(Deserialize)]
struct EscalationQuery {
    limit: Option<usize>,
}

async fn list_escalations(
    State(state): State<AppState>,
    Query(query): Query<EscalationQuery>,
) -> impl IntoResponse {
    let limit = query
        .limit
        .unwrap_or(DEFAULT_ESCALATION_LIMIT)
        .clamp(1, MAX_ESCALATIONS);
    Json(state.orchestrator.safety().list_escalations(limit))
}

async fn safety_config(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.orchestrator.safety().config())
}

// ── Admin ───────────────────────────────────────────────────────────────

async fn reset(State(state): State<AppState>) -> impl IntoResponse {
    state.orchestrator.reset();
    Json(serde_json::json!({"status": "reset"}))
}

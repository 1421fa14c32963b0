// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Inbound webhook HTTP server (§4.N): `POST /webhook/events` plus
//! `GET /health`, on one listener. The auth middleware is lifted from the
//! teacher's `transport::auth::auth_layer` shape: a static bearer token,
//! optional when unconfigured.

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use axum::extract::State;
use axum::http::{HeaderMap, Request, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tower_http::cors::CorsLayer;

use crate::error::{BridgeError, ErrorResponse};
use crate::event::{generate_event_id, EventType, RawData, RawEvent};
use crate::monitoring::SecurityEventTracker;

/// Shared state for the webhook listener.
#[derive(Clone)]
pub struct WebhookState {
    pub webhook_token: Option<String>,
    pub inbound_tx: mpsc::Sender<RawEvent>,
    pub security: Arc<SecurityEventTracker>,
}

/// Inbound event payload, the wire shape a caller posts to `/webhook/events`.
#[derive(Debug, Clone, Deserialize)]
pub struct WebhookEventPayload {
    pub external_user_id: String,
    /// Seconds since epoch.
    pub timestamp: i64,
    pub event_type: String,
    #[serde(default)]
    pub raw_data: Option<RawData>,
}

#[derive(Debug, Clone, Serialize)]
struct HealthResponse {
    status: &'static str,
}

/// Response body for a successfully queued webhook event (spec §4.N).
#[derive(Debug, Clone, Serialize)]
struct WebhookEventResponse {
    success: bool,
    timestamp: i64,
    #[serde(rename = "eventId")]
    event_id: String,
}

/// Build the axum router for the webhook listener plus `/health`.
pub fn build_router(state: WebhookState) -> Router {
    Router::new()
        .route("/webhook/events", post(handle_event))
        .route("/health", get(handle_health))
        .layer(middleware::from_fn_with_state(state.clone(), auth_layer))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn handle_health() -> impl IntoResponse {
    Json(HealthResponse { status: "ok" })
}

async fn handle_event(
    State(state): State<WebhookState>,
    Json(payload): Json<WebhookEventPayload>,
) -> Response {
    let Some(event_type) = EventType::parse(&payload.event_type) else {
        return error_response(BridgeError::Validation(format!("unknown event_type {:?}", payload.event_type)));
    };
    let timestamp = UNIX_EPOCH + Duration::from_secs(payload.timestamp.max(0) as u64);
    let event = RawEvent {
        external_user_id: payload.external_user_id,
        timestamp,
        event_type,
        raw_data: payload.raw_data,
    };
    if state.inbound_tx.send(event).await.is_err() {
        return error_response(BridgeError::Internal("webhook adapter is not running".into()));
    }
    let now = SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs() as i64).unwrap_or(0);
    let body = WebhookEventResponse { success: true, timestamp: now, event_id: generate_event_id() };
    (StatusCode::OK, Json(body)).into_response()
}

fn error_response(err: BridgeError) -> Response {
    let status = StatusCode::from_u16(err.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let body = ErrorResponse { error: err.to_error_body(err.to_string()) };
    (status, Json(body)).into_response()
}

/// Validates `Authorization: Bearer <token>` against the configured webhook
/// token. No token configured means the listener is open. Exempt: `/health`.
async fn auth_layer(
    State(state): State<WebhookState>,
    req: Request<axum::body::Body>,
    next: Next,
) -> Response {
    if req.uri().path() == "/health" {
        return next.run(req).await;
    }

    let Some(expected) = state.webhook_token.as_deref() else {
        return next.run(req).await;
    };

    if !bearer_token_matches(req.headers(), expected) {
        state.security.record_failure();
        return error_response(BridgeError::Unauthenticated("missing or invalid bearer token".into()));
    }

    next.run(req).await
}

fn bearer_token_matches(headers: &HeaderMap, expected: &str) -> bool {
    headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .is_some_and(|token| token == expected)
}

#[cfg(test)]
#[path = "webhook_server_tests.rs"]
mod tests;

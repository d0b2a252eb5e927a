use crate::api::AppState;
use crate::directory::{ServiceSnapshot, TickReport};
use crate::error::{AppError, Result};
use crate::metrics::gather_metrics;
use crate::relay::RelayMessage;
use crate::service::PendingCounts;
use axum::{
    extract::{Path, State},
    http::{header, StatusCode},
    response::IntoResponse,
    Json,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use validator::Validate;

/// Health check endpoint
pub async fn health_check(State(state): State<AppState>) -> Result<Json<HealthResponse>> {
    Ok(Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: state.started_at.elapsed().as_secs(),
        services: state.directory.len(),
    }))
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_seconds: u64,
    pub services: usize,
}

/// Prometheus exposition endpoint
pub async fn metrics() -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        gather_metrics(),
    )
}

/// List hosted services with their status and backlog
pub async fn list_services(State(state): State<AppState>) -> Json<Vec<ServiceSnapshot>> {
    Json(state.directory.snapshots().await)
}

/// Run every pipeline of every service now
pub async fn run_services(State(state): State<AppState>) -> Json<Vec<TickReport>> {
    Json(state.directory.tick_all().await)
}

/// Queue a message for a relay's senders
pub async fn enqueue_outbound(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(request): Json<EnqueueRequest>,
) -> Result<(StatusCode, Json<EnqueueResponse>)> {
    let relay = state.relay(&name)?;
    let message = request.into_message();
    message.validate()?;

    if !relay.enqueue_outbound(&message).await {
        return Err(AppError::Store(format!("Relay '{}' rejected the message", name)));
    }

    Ok((
        StatusCode::ACCEPTED,
        Json(EnqueueResponse {
            relay: name,
            direction: "outbound".to_string(),
            accepted: true,
        }),
    ))
}

/// Queue a message for a relay's handlers
pub async fn enqueue_inbound(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(request): Json<EnqueueRequest>,
) -> Result<(StatusCode, Json<EnqueueResponse>)> {
    let relay = state.relay(&name)?;
    let message = request.into_message();
    message.validate()?;

    if !relay.enqueue_inbound(&message).await {
        return Err(AppError::Store(format!("Relay '{}' rejected the message", name)));
    }

    Ok((
        StatusCode::ACCEPTED,
        Json(EnqueueResponse {
            relay: name,
            direction: "inbound".to_string(),
            accepted: true,
        }),
    ))
}

/// Backlog of one relay
pub async fn relay_pending(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<PendingCounts>> {
    let relay = state.relay(&name)?;
    Ok(Json(relay.pending_counts().await?))
}

#[derive(Debug, Deserialize)]
pub struct EnqueueRequest {
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    pub body: serde_json::Value,
}

impl EnqueueRequest {
    fn into_message(self) -> RelayMessage {
        RelayMessage {
            headers: self.headers,
            body: self.body,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct EnqueueResponse {
    pub relay: String,
    pub direction: String,
    pub accepted: bool,
}

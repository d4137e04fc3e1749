//! Health check and status endpoints.

use axum::{extract::State, Json};

use crate::progress::ScoringPolicy;
use crate::rest::dto::{HealthResponse, StatusResponse};
use crate::rest::state::ApiState;

/// Health check endpoint
#[utoipa::path(
    get,
    path = "/api/v1/health",
    tag = "Health",
    responses(
        (status = 200, description = "Service is healthy", body = HealthResponse)
    )
)]
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// Get service status with catalog and session info
#[utoipa::path(
    get,
    path = "/api/v1/status",
    tag = "Health",
    responses(
        (status = 200, description = "Service status with catalog info", body = StatusResponse)
    )
)]
pub async fn status(State(state): State<ApiState>) -> Json<StatusResponse> {
    let engine = state.engine.lock().await;

    let scoring = match engine.scoring() {
        ScoringPolicy::Independent => "independent",
        ScoringPolicy::Gated => "gated",
    };

    Json(StatusResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        catalog_classes: engine.catalog().class_count(),
        scoring: scoring.to_string(),
        current_incident: engine.current_incident(),
    })
}

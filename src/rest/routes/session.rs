//! Current-session endpoints.

use axum::{extract::State, Json};

use crate::error::EngineError;
use crate::rest::dto::SessionResponse;
use crate::rest::error::{ApiError, ErrorResponse};
use crate::rest::state::ApiState;

/// Cached view of the current incident
#[utoipa::path(
    get,
    path = "/api/v1/session",
    tag = "Session",
    responses(
        (status = 200, description = "Current session", body = SessionResponse),
        (status = 404, description = "No incident is current", body = ErrorResponse)
    )
)]
pub async fn current(State(state): State<ApiState>) -> Result<Json<SessionResponse>, ApiError> {
    let engine = state.engine.lock().await;
    let mirror = engine
        .current_session()
        .ok_or_else(|| EngineError::RecordNotFound {
            entity: "session",
            id: "current".to_string(),
        })?;
    Ok(Json(SessionResponse::from(mirror)))
}

/// Drop the current session
#[utoipa::path(
    delete,
    path = "/api/v1/session",
    tag = "Session",
    responses(
        (status = 200, description = "Session closed")
    )
)]
pub async fn close(State(state): State<ApiState>) -> Json<serde_json::Value> {
    let mut engine = state.engine.lock().await;
    let closed = engine.current_incident();
    engine.close_session();
    Json(serde_json::json!({ "closed": closed }))
}

//! Incident lifecycle endpoints.

use axum::{
    extract::{Path, State},
    http::header,
    response::{IntoResponse, Response},
    Json,
};
use tracing::info;

use crate::error::EngineError;
use crate::rest::dto::{
    CreateIncidentRequest, DashboardResponse, IncidentResponse, LessonsRequest, ProgressResponse,
    ReclassifyRequest, ReportResponse, ResumeResponse,
};
use crate::rest::error::{ApiError, ErrorResponse};
use crate::rest::state::ApiState;

/// List incidents split into in-progress and completed
#[utoipa::path(
    get,
    path = "/api/v1/incidents",
    tag = "Incidents",
    responses(
        (status = 200, description = "Incident dashboard", body = DashboardResponse)
    )
)]
pub async fn list(State(state): State<ApiState>) -> Result<Json<DashboardResponse>, ApiError> {
    let engine = state.engine.lock().await;
    Ok(Json(engine.dashboard()?.into()))
}

/// Start an incident from a catalog (class, type)
#[utoipa::path(
    post,
    path = "/api/v1/incidents",
    tag = "Incidents",
    request_body = CreateIncidentRequest,
    responses(
        (status = 200, description = "Incident created", body = IncidentResponse),
        (status = 400, description = "Missing class or type", body = ErrorResponse)
    )
)]
pub async fn create(
    State(state): State<ApiState>,
    Json(request): Json<CreateIncidentRequest>,
) -> Result<Json<IncidentResponse>, ApiError> {
    let mut engine = state.engine.lock().await;
    let incident = engine.start_incident(&request.class, &request.incident_type)?;
    let progress = engine.progress(incident.id)?;

    info!(incident_id = incident.id, "Incident created via REST API");
    Ok(Json(IncidentResponse::new(&incident, &[], progress)))
}

/// Get an incident with its step records and progress
#[utoipa::path(
    get,
    path = "/api/v1/incidents/{id}",
    tag = "Incidents",
    params(
        ("id" = u64, Path, description = "Incident id")
    ),
    responses(
        (status = 200, description = "Incident details", body = IncidentResponse),
        (status = 404, description = "Incident not found", body = ErrorResponse)
    )
)]
pub async fn get_one(
    State(state): State<ApiState>,
    Path(id): Path<u64>,
) -> Result<Json<IncidentResponse>, ApiError> {
    let engine = state.engine.lock().await;
    let (incident, steps) = engine.load(id)?;
    let progress = engine.progress(id)?;
    Ok(Json(IncidentResponse::new(&incident, &steps, progress)))
}

/// Correct the class/type of an open incident
#[utoipa::path(
    put,
    path = "/api/v1/incidents/{id}",
    tag = "Incidents",
    params(
        ("id" = u64, Path, description = "Incident id")
    ),
    request_body = ReclassifyRequest,
    responses(
        (status = 200, description = "Incident reclassified", body = IncidentResponse),
        (status = 400, description = "Missing class or type", body = ErrorResponse),
        (status = 404, description = "Incident not found", body = ErrorResponse),
        (status = 409, description = "Incident already completed", body = ErrorResponse)
    )
)]
pub async fn reclassify(
    State(state): State<ApiState>,
    Path(id): Path<u64>,
    Json(request): Json<ReclassifyRequest>,
) -> Result<Json<IncidentResponse>, ApiError> {
    let mut engine = state.engine.lock().await;
    let incident = engine.reclassify(id, &request.class, &request.incident_type)?;
    let steps = engine.steps(id)?;
    let progress = engine.progress(id)?;
    Ok(Json(IncidentResponse::new(&incident, &steps, progress)))
}

/// Delete an incident with its steps, attachments and report
#[utoipa::path(
    delete,
    path = "/api/v1/incidents/{id}",
    tag = "Incidents",
    params(
        ("id" = u64, Path, description = "Incident id")
    ),
    responses(
        (status = 200, description = "Incident deleted"),
        (status = 404, description = "Incident not found", body = ErrorResponse)
    )
)]
pub async fn delete(
    State(state): State<ApiState>,
    Path(id): Path<u64>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let mut engine = state.engine.lock().await;
    engine.delete_incident(id)?;

    info!(incident_id = id, "Incident deleted via REST API");
    Ok(Json(serde_json::json!({ "deleted": id })))
}

/// Current progress of an incident
#[utoipa::path(
    get,
    path = "/api/v1/incidents/{id}/progress",
    tag = "Incidents",
    params(
        ("id" = u64, Path, description = "Incident id")
    ),
    responses(
        (status = 200, description = "Progress report", body = ProgressResponse),
        (status = 404, description = "Incident not found", body = ErrorResponse)
    )
)]
pub async fn progress(
    State(state): State<ApiState>,
    Path(id): Path<u64>,
) -> Result<Json<ProgressResponse>, ApiError> {
    let engine = state.engine.lock().await;
    Ok(Json(engine.progress(id)?.into()))
}

/// Record lessons-learned; a blank field keeps the stored value
#[utoipa::path(
    post,
    path = "/api/v1/incidents/{id}/lessons",
    tag = "Incidents",
    params(
        ("id" = u64, Path, description = "Incident id")
    ),
    request_body = LessonsRequest,
    responses(
        (status = 200, description = "Lessons recorded", body = ProgressResponse),
        (status = 400, description = "Both fields blank", body = ErrorResponse),
        (status = 404, description = "Incident not found", body = ErrorResponse),
        (status = 409, description = "Incident already completed", body = ErrorResponse)
    )
)]
pub async fn lessons(
    State(state): State<ApiState>,
    Path(id): Path<u64>,
    Json(request): Json<LessonsRequest>,
) -> Result<Json<ProgressResponse>, ApiError> {
    let mut engine = state.engine.lock().await;
    let report = engine.submit_lessons(
        id,
        request.improvements.as_deref(),
        request.observations.as_deref(),
    )?;
    Ok(Json(report.into()))
}

/// Make the incident current and report where to continue
#[utoipa::path(
    post,
    path = "/api/v1/incidents/{id}/resume",
    tag = "Incidents",
    params(
        ("id" = u64, Path, description = "Incident id")
    ),
    responses(
        (status = 200, description = "Resume point", body = ResumeResponse),
        (status = 404, description = "Incident not found", body = ErrorResponse)
    )
)]
pub async fn resume(
    State(state): State<ApiState>,
    Path(id): Path<u64>,
) -> Result<Json<ResumeResponse>, ApiError> {
    let mut engine = state.engine.lock().await;
    Ok(Json(engine.resume(id)?.into()))
}

/// Render and publish the incident report
#[utoipa::path(
    post,
    path = "/api/v1/incidents/{id}/report",
    tag = "Reports",
    params(
        ("id" = u64, Path, description = "Incident id")
    ),
    responses(
        (status = 200, description = "Report written", body = ReportResponse),
        (status = 404, description = "Incident not found", body = ErrorResponse),
        (status = 502, description = "Template or converter failed", body = ErrorResponse)
    )
)]
pub async fn generate_report(
    State(state): State<ApiState>,
    Path(id): Path<u64>,
) -> Result<Json<ReportResponse>, ApiError> {
    // converters can run for seconds; keep them off the async workers
    let engine = state.engine.clone().lock_owned().await;
    let path = tokio::task::spawn_blocking(move || engine.generate_report(id)).await??;

    Ok(Json(ReportResponse {
        incident_id: id,
        path: path.to_string_lossy().into_owned(),
    }))
}

fn content_type_for(extension: &str) -> &'static str {
    match extension {
        "pdf" => "application/pdf",
        "html" | "htm" => "text/html; charset=utf-8",
        "txt" | "md" => "text/plain; charset=utf-8",
        "odt" => "application/vnd.oasis.opendocument.text",
        "docx" => "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        _ => "application/octet-stream",
    }
}

/// Download the last published report
#[utoipa::path(
    get,
    path = "/api/v1/incidents/{id}/report",
    tag = "Reports",
    params(
        ("id" = u64, Path, description = "Incident id")
    ),
    responses(
        (status = 200, description = "Report document bytes"),
        (status = 404, description = "Incident or report not found", body = ErrorResponse)
    )
)]
pub async fn download_report(
    State(state): State<ApiState>,
    Path(id): Path<u64>,
) -> Result<Response, ApiError> {
    let path = {
        let engine = state.engine.lock().await;
        engine.report_path(id)?
    };

    let bytes = tokio::fs::read(&path).await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            ApiError::from(EngineError::RecordNotFound {
                entity: "report",
                id: id.to_string(),
            })
        } else {
            ApiError::from(e)
        }
    })?;

    let extension = path
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_default();
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| format!("incident_{id}"));

    Ok((
        [
            (header::CONTENT_TYPE, content_type_for(&extension).to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{file_name}\""),
            ),
        ],
        bytes,
    )
        .into_response())
}

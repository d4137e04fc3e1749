//! Step evidence and attachment endpoints.

use axum::{
    extract::{Multipart, Path, State},
    Json,
};

use crate::engine::{parse_step_index, StepSubmission};
use crate::error::EngineError;
use crate::rest::dto::{
    ProgressResponse, StepRecordResponse, SubmitStepRequest, UploadAttachmentForm,
};
use crate::rest::error::{ApiError, ErrorResponse};
use crate::rest::state::ApiState;

/// List the step records of an incident
#[utoipa::path(
    get,
    path = "/api/v1/incidents/{id}/steps",
    tag = "Steps",
    params(
        ("id" = u64, Path, description = "Incident id")
    ),
    responses(
        (status = 200, description = "Step records in plan order", body = Vec<StepRecordResponse>),
        (status = 404, description = "Incident not found", body = ErrorResponse)
    )
)]
pub async fn list(
    State(state): State<ApiState>,
    Path(id): Path<u64>,
) -> Result<Json<Vec<StepRecordResponse>>, ApiError> {
    let engine = state.engine.lock().await;
    let steps = engine.steps(id)?;
    Ok(Json(steps.iter().map(StepRecordResponse::from).collect()))
}

/// Get one step record
#[utoipa::path(
    get,
    path = "/api/v1/incidents/{id}/steps/{index}",
    tag = "Steps",
    params(
        ("id" = u64, Path, description = "Incident id"),
        ("index" = usize, Path, description = "1-based step index")
    ),
    responses(
        (status = 200, description = "Step record", body = StepRecordResponse),
        (status = 400, description = "Step index is not an integer", body = ErrorResponse),
        (status = 404, description = "Incident or step not found", body = ErrorResponse)
    )
)]
pub async fn get_one(
    State(state): State<ApiState>,
    Path((id, index)): Path<(u64, String)>,
) -> Result<Json<StepRecordResponse>, ApiError> {
    let index = parse_step_index(&index)?;
    let engine = state.engine.lock().await;
    let step = engine.get_step(id, index)?;
    Ok(Json(StepRecordResponse::from(&step)))
}

/// Record evidence and checked sub-steps for one step
#[utoipa::path(
    post,
    path = "/api/v1/incidents/{id}/steps/{index}",
    tag = "Steps",
    params(
        ("id" = u64, Path, description = "Incident id"),
        ("index" = usize, Path, description = "1-based step index")
    ),
    request_body = SubmitStepRequest,
    responses(
        (status = 200, description = "Step recorded", body = ProgressResponse),
        (status = 400, description = "Empty evidence or malformed input", body = ErrorResponse),
        (status = 404, description = "Incident not found", body = ErrorResponse),
        (status = 409, description = "Incident already completed", body = ErrorResponse)
    )
)]
pub async fn submit(
    State(state): State<ApiState>,
    Path((id, index)): Path<(u64, String)>,
    Json(request): Json<SubmitStepRequest>,
) -> Result<Json<ProgressResponse>, ApiError> {
    let submission = StepSubmission::parse(
        &index,
        &request.evidence,
        &request.sub_steps,
        request.attachment_ref.as_deref(),
    )?;

    let mut engine = state.engine.lock().await;
    let report = engine.apply_step_submission(id, submission)?;
    Ok(Json(report.into()))
}

/// Upload the attachment of one step as multipart field `file`
#[utoipa::path(
    post,
    path = "/api/v1/incidents/{id}/steps/{index}/attachment",
    tag = "Steps",
    params(
        ("id" = u64, Path, description = "Incident id"),
        ("index" = usize, Path, description = "1-based step index")
    ),
    request_body(content = UploadAttachmentForm, content_type = "multipart/form-data"),
    responses(
        (status = 200, description = "Attachment stored", body = ProgressResponse),
        (status = 400, description = "Missing file or unusable file name", body = ErrorResponse),
        (status = 404, description = "Incident not found", body = ErrorResponse),
        (status = 409, description = "Incident already completed", body = ErrorResponse)
    )
)]
pub async fn attach(
    State(state): State<ApiState>,
    Path((id, index)): Path<(u64, String)>,
    mut multipart: Multipart,
) -> Result<Json<ProgressResponse>, ApiError> {
    let index = parse_step_index(&index)?;

    let mut upload = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::BadRequest(e.to_string()))?
    {
        if field.name() != Some("file") {
            continue;
        }
        let file_name = field.file_name().unwrap_or_default().to_string();
        let bytes = field
            .bytes()
            .await
            .map_err(|e| ApiError::BadRequest(e.to_string()))?;
        upload = Some((file_name, bytes));
        break;
    }

    let Some((file_name, bytes)) = upload else {
        return Err(EngineError::MissingParameter("file".to_string()).into());
    };
    if file_name.trim().is_empty() {
        return Err(EngineError::MissingParameter("file name".to_string()).into());
    }

    let mut engine = state.engine.lock().await;
    let report = engine.attach_file(id, index, &file_name, &bytes)?;
    Ok(Json(report.into()))
}

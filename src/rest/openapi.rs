//! OpenAPI specification builder using utoipa.

use utoipa::OpenApi;

use crate::rest::dto::{
    CatalogClassResponse, CatalogTypeResponse, CreateIncidentRequest, DashboardResponse,
    HealthResponse, IncidentResponse, IncidentSummaryResponse, LessonsRequest, NextStepResponse,
    ProgressResponse, ReclassifyRequest, ReportResponse, ResumeResponse, SearchHitResponse,
    SessionResponse, SessionStepResponse, StatusResponse, StepPlanEntry, StepRecordResponse,
    SubmitStepRequest, UploadAttachmentForm,
};
use crate::rest::error::ErrorResponse;

/// OpenAPI documentation for the Playbook REST API
#[derive(OpenApi)]
#[openapi(
    info(
        title = "Playbook API",
        version = "0.1.0",
        description = "REST API for running incident-response playbooks: step evidence, progress, lessons learned and reports.",
        license(name = "MIT")
    ),
    paths(
        // Health endpoints
        crate::rest::routes::health::health,
        crate::rest::routes::health::status,
        // Catalog endpoints
        crate::rest::routes::catalog::list,
        crate::rest::routes::catalog::search,
        // Incident endpoints
        crate::rest::routes::incidents::list,
        crate::rest::routes::incidents::create,
        crate::rest::routes::incidents::get_one,
        crate::rest::routes::incidents::reclassify,
        crate::rest::routes::incidents::delete,
        crate::rest::routes::incidents::progress,
        crate::rest::routes::incidents::lessons,
        crate::rest::routes::incidents::resume,
        // Step endpoints
        crate::rest::routes::steps::list,
        crate::rest::routes::steps::get_one,
        crate::rest::routes::steps::submit,
        crate::rest::routes::steps::attach,
        // Report endpoints
        crate::rest::routes::incidents::generate_report,
        crate::rest::routes::incidents::download_report,
        // Session endpoints
        crate::rest::routes::session::current,
        crate::rest::routes::session::close,
    ),
    components(
        schemas(
            // Response types
            HealthResponse,
            StatusResponse,
            CatalogClassResponse,
            CatalogTypeResponse,
            SearchHitResponse,
            StepPlanEntry,
            IncidentResponse,
            IncidentSummaryResponse,
            DashboardResponse,
            StepRecordResponse,
            NextStepResponse,
            ProgressResponse,
            ResumeResponse,
            ReportResponse,
            SessionResponse,
            SessionStepResponse,
            ErrorResponse,
            // Request types
            CreateIncidentRequest,
            ReclassifyRequest,
            SubmitStepRequest,
            UploadAttachmentForm,
            LessonsRequest,
        )
    ),
    tags(
        (name = "Health", description = "Health check and status endpoints"),
        (name = "Catalog", description = "Step plan catalog lookup and search"),
        (name = "Incidents", description = "Incident lifecycle and lessons learned"),
        (name = "Steps", description = "Step evidence, sub-steps and attachments"),
        (name = "Reports", description = "Incident report generation"),
        (name = "Session", description = "Current incident session"),
    )
)]
pub struct ApiDoc;

impl ApiDoc {
    /// Generate the OpenAPI specification as a JSON string
    pub fn json() -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(&Self::openapi())
    }
}

//! Error taxonomy for the incident progress engine.
//!
//! Every core failure is an [`EngineError`]. Callers that need a structured
//! result (the REST layer, the CLI's `--json` output) convert it into an
//! [`ErrorReport`] carrying a stable kind string plus the display message.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::blob::BlobError;
use crate::store::StoreError;

/// Errors raised by engine operations
#[derive(Debug, Error)]
pub enum EngineError {
    /// A required parameter (class, type, lessons text) was absent or blank
    #[error("missing parameter: {0}")]
    MissingParameter(String),

    /// A step submission arrived without evidence
    #[error("evidence for step {step_index} is empty")]
    EmptyEvidence { step_index: usize },

    /// Input had the wrong shape (sub-steps not a list, bad step index, bad file name)
    #[error("invalid format: {0}")]
    InvalidFormat(String),

    /// The referenced incident or step does not exist
    #[error("{entity} {id} not found")]
    RecordNotFound { entity: &'static str, id: String },

    /// A mutation targeted an incident that already reached Completed
    #[error("incident {0} is already completed")]
    IncidentCompleted(u64),

    /// The document pipeline failed; nothing was written to the reports directory
    #[error("report generation failed: {0}")]
    ReportGenerationFailed(String),

    #[error("storage error: {0}")]
    Storage(#[from] StoreError),

    #[error("attachment storage error: {0}")]
    Blob(#[from] BlobError),
}

impl EngineError {
    pub fn incident_not_found(id: u64) -> Self {
        EngineError::RecordNotFound {
            entity: "incident",
            id: id.to_string(),
        }
    }

    pub fn step_not_found(incident_id: u64, step_index: usize) -> Self {
        EngineError::RecordNotFound {
            entity: "step",
            id: format!("{incident_id}/{step_index}"),
        }
    }

    /// Stable classification of this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::MissingParameter(_) => ErrorKind::MissingParameter,
            EngineError::EmptyEvidence { .. } => ErrorKind::EmptyEvidence,
            EngineError::InvalidFormat(_) => ErrorKind::InvalidFormat,
            EngineError::RecordNotFound { .. } => ErrorKind::RecordNotFound,
            EngineError::IncidentCompleted(_) => ErrorKind::IncidentCompleted,
            EngineError::ReportGenerationFailed(_) => ErrorKind::ReportGenerationFailed,
            EngineError::Storage(_) | EngineError::Blob(_) => ErrorKind::Storage,
        }
    }

    /// Validation failures are detected before any durable write
    pub fn is_validation(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::MissingParameter | ErrorKind::EmptyEvidence | ErrorKind::InvalidFormat
        )
    }
}

/// Classification of an [`EngineError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    MissingParameter,
    EmptyEvidence,
    InvalidFormat,
    RecordNotFound,
    IncidentCompleted,
    ReportGenerationFailed,
    Storage,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::MissingParameter => "missing_parameter",
            ErrorKind::EmptyEvidence => "empty_evidence",
            ErrorKind::InvalidFormat => "invalid_format",
            ErrorKind::RecordNotFound => "record_not_found",
            ErrorKind::IncidentCompleted => "incident_completed",
            ErrorKind::ReportGenerationFailed => "report_generation_failed",
            ErrorKind::Storage => "storage",
        }
    }
}

pub type EngineResult<T> = Result<T, EngineError>;

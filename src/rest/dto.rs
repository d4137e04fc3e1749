//! Data Transfer Objects for the REST API.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::catalog::{CatalogClass, SearchHit, StepDefinition};
use crate::engine::{Dashboard, IncidentSummary, ResumePoint};
use crate::progress::{NextStep, ProgressReport};
use crate::records::{IncidentRecord, StepRecord};
use crate::session::SessionMirror;

// =============================================================================
// Health DTOs
// =============================================================================

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

/// Service status with catalog and session info
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct StatusResponse {
    pub status: String,
    pub version: String,
    pub catalog_classes: usize,
    /// Lessons-learned scoring policy in effect
    pub scoring: String,
    pub current_incident: Option<u64>,
}

// =============================================================================
// Catalog DTOs
// =============================================================================

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct CatalogClassResponse {
    pub class: String,
    pub types: Vec<CatalogTypeResponse>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct CatalogTypeResponse {
    #[serde(rename = "type")]
    pub name: String,
    pub steps: Vec<StepPlanEntry>,
}

impl From<&CatalogClass> for CatalogClassResponse {
    fn from(class: &CatalogClass) -> Self {
        Self {
            class: class.class.clone(),
            types: class
                .types
                .iter()
                .map(|t| CatalogTypeResponse {
                    name: t.name.clone(),
                    steps: plan_entries(&t.steps),
                })
                .collect(),
        }
    }
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct SearchQuery {
    pub q: String,
}

/// Catalog search match. Fields below the matched level are absent.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct SearchHitResponse {
    /// class, type, step or sub_step
    pub kind: String,
    pub class: String,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub incident_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub step: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sub_step: Option<String>,
}

impl From<SearchHit> for SearchHitResponse {
    fn from(hit: SearchHit) -> Self {
        match hit {
            SearchHit::Class { class } => Self {
                kind: "class".to_string(),
                class,
                incident_type: None,
                step: None,
                sub_step: None,
            },
            SearchHit::Type {
                class,
                incident_type,
            } => Self {
                kind: "type".to_string(),
                class,
                incident_type: Some(incident_type),
                step: None,
                sub_step: None,
            },
            SearchHit::Step {
                class,
                incident_type,
                step,
            } => Self {
                kind: "step".to_string(),
                class,
                incident_type: Some(incident_type),
                step: Some(step),
                sub_step: None,
            },
            SearchHit::SubStep {
                class,
                incident_type,
                step,
                sub_step,
            } => Self {
                kind: "sub_step".to_string(),
                class,
                incident_type: Some(incident_type),
                step: Some(step),
                sub_step: Some(sub_step),
            },
        }
    }
}

// =============================================================================
// Incident DTOs
// =============================================================================

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct CreateIncidentRequest {
    pub class: String,
    #[serde(rename = "type")]
    pub incident_type: String,
}

/// Correct the class/type of an open incident
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ReclassifyRequest {
    pub class: String,
    #[serde(rename = "type")]
    pub incident_type: String,
}

/// One step of an incident's plan snapshot
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct StepPlanEntry {
    pub index: usize,
    pub title: String,
    pub sub_steps: Vec<String>,
}

fn plan_entries(plan: &[StepDefinition]) -> Vec<StepPlanEntry> {
    plan.iter()
        .enumerate()
        .map(|(i, s)| StepPlanEntry {
            index: i + 1,
            title: s.title.clone(),
            sub_steps: s.sub_steps.clone(),
        })
        .collect()
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct StepRecordResponse {
    pub step_index: usize,
    pub evidence: String,
    pub sub_steps: Vec<String>,
    pub attachment_ref: Option<String>,
    pub completed_at: Option<DateTime<Utc>>,
    pub percent_complete: u8,
    pub done: bool,
}

impl From<&StepRecord> for StepRecordResponse {
    fn from(record: &StepRecord) -> Self {
        Self {
            step_index: record.step_index,
            evidence: record.evidence.clone(),
            sub_steps: record.sub_steps.set_or_empty().to_vec(),
            attachment_ref: record.attachment_ref.clone(),
            completed_at: record.completed_at,
            percent_complete: record.percent_complete,
            done: record.is_done(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct NextStepResponse {
    /// step, lessons_learned or done
    pub kind: String,
    pub step_index: Option<usize>,
}

impl From<NextStep> for NextStepResponse {
    fn from(next: NextStep) -> Self {
        match next {
            NextStep::Step(index) => Self {
                kind: "step".to_string(),
                step_index: Some(index),
            },
            NextStep::LessonsLearned => Self {
                kind: "lessons_learned".to_string(),
                step_index: None,
            },
            NextStep::Done => Self {
                kind: "done".to_string(),
                step_index: None,
            },
        }
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ProgressResponse {
    pub incident_id: u64,
    pub score: f64,
    pub percentage: u8,
    pub done_steps: usize,
    pub total_steps: usize,
    pub next_step: NextStepResponse,
    pub status: String,
}

impl From<ProgressReport> for ProgressResponse {
    fn from(report: ProgressReport) -> Self {
        Self {
            incident_id: report.incident_id,
            score: report.score,
            percentage: report.percentage,
            done_steps: report.done_steps,
            total_steps: report.total_steps,
            next_step: report.next_step.into(),
            status: report.status.as_str().to_string(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct IncidentResponse {
    pub id: u64,
    pub class: String,
    #[serde(rename = "type")]
    pub incident_type: String,
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub improvements: Option<String>,
    pub observations: Option<String>,
    pub plan: Vec<StepPlanEntry>,
    pub steps: Vec<StepRecordResponse>,
    pub progress: ProgressResponse,
}

impl IncidentResponse {
    pub fn new(incident: &IncidentRecord, steps: &[StepRecord], progress: ProgressReport) -> Self {
        Self {
            id: incident.id,
            class: incident.class.clone(),
            incident_type: incident.incident_type.clone(),
            status: incident.status.as_str().to_string(),
            created_at: incident.created_at,
            started_at: incident.started_at,
            ended_at: incident.ended_at,
            improvements: incident.improvements.clone(),
            observations: incident.observations.clone(),
            plan: plan_entries(&incident.step_plan),
            steps: steps.iter().map(StepRecordResponse::from).collect(),
            progress: progress.into(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct IncidentSummaryResponse {
    pub id: u64,
    pub class: String,
    #[serde(rename = "type")]
    pub incident_type: String,
    pub status: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub percentage: u8,
    pub next_step: NextStepResponse,
}

impl From<IncidentSummary> for IncidentSummaryResponse {
    fn from(summary: IncidentSummary) -> Self {
        Self {
            id: summary.id,
            class: summary.class,
            incident_type: summary.incident_type,
            status: summary.status.as_str().to_string(),
            started_at: summary.started_at,
            ended_at: summary.ended_at,
            percentage: summary.percentage,
            next_step: summary.next_step.into(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct DashboardResponse {
    pub in_progress: Vec<IncidentSummaryResponse>,
    pub completed: Vec<IncidentSummaryResponse>,
}

impl From<Dashboard> for DashboardResponse {
    fn from(dashboard: Dashboard) -> Self {
        Self {
            in_progress: dashboard.in_progress.into_iter().map(Into::into).collect(),
            completed: dashboard.completed.into_iter().map(Into::into).collect(),
        }
    }
}

// =============================================================================
// Step / lessons DTOs
// =============================================================================

fn empty_list() -> serde_json::Value {
    serde_json::Value::Array(Vec::new())
}

/// Evidence for one step. `sub_steps` must be a list of labels.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct SubmitStepRequest {
    pub evidence: String,
    #[serde(default = "empty_list")]
    #[schema(value_type = Vec<String>)]
    pub sub_steps: serde_json::Value,
    #[serde(default)]
    pub attachment_ref: Option<String>,
}

/// Multipart upload form for a step attachment
#[derive(Debug, ToSchema)]
#[allow(dead_code)]
pub struct UploadAttachmentForm {
    #[schema(value_type = String, format = Binary)]
    pub file: Vec<u8>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct LessonsRequest {
    #[serde(default)]
    pub improvements: Option<String>,
    #[serde(default)]
    pub observations: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ResumeResponse {
    pub incident_id: u64,
    pub next_step: NextStepResponse,
    pub percentage: u8,
    pub status: String,
}

impl From<ResumePoint> for ResumeResponse {
    fn from(point: ResumePoint) -> Self {
        Self {
            incident_id: point.incident_id,
            next_step: point.next_step.into(),
            percentage: point.percentage,
            status: point.status.as_str().to_string(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ReportResponse {
    pub incident_id: u64,
    pub path: String,
}

// =============================================================================
// Session DTOs
// =============================================================================

/// Cached state of the current incident
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct SessionResponse {
    pub incident_id: u64,
    pub class: String,
    #[serde(rename = "type")]
    pub incident_type: String,
    pub steps: Vec<SessionStepResponse>,
    pub improvements: Option<String>,
    pub observations: Option<String>,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub rebuilt_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct SessionStepResponse {
    pub index: usize,
    pub title: String,
    pub evidence: Option<String>,
    pub sub_steps: Vec<String>,
    pub attachment_refs: Vec<String>,
}

impl From<&SessionMirror> for SessionResponse {
    fn from(mirror: &SessionMirror) -> Self {
        Self {
            incident_id: mirror.incident_id,
            class: mirror.class.clone(),
            incident_type: mirror.incident_type.clone(),
            steps: mirror
                .step_titles
                .iter()
                .enumerate()
                .map(|(i, title)| {
                    let index = i + 1;
                    SessionStepResponse {
                        index,
                        title: title.clone(),
                        evidence: mirror.evidence_for(index).map(ToString::to_string),
                        sub_steps: mirror.sub_steps_for(index).to_vec(),
                        attachment_refs: mirror.attachments_for(index).to_vec(),
                    }
                })
                .collect(),
            improvements: mirror.improvements.clone(),
            observations: mirror.observations.clone(),
            started_at: mirror.started_at,
            ended_at: mirror.ended_at,
            rebuilt_at: mirror.rebuilt_at,
        }
    }
}

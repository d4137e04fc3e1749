//! Incident report assembly.
//!
//! [`ReportAssembler`] turns durable records into a [`ReportModel`];
//! a [`DocumentPipeline`] renders the model and [`ReportWriter`] moves the
//! result into the reports directory once rendering succeeded.

pub mod pipeline;
mod writer;

pub use pipeline::{
    CommandConverter, DocumentPipeline, HandlebarsPipeline, PipelineError, RenderedDocument,
};
pub use writer::ReportWriter;

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::blob::BlobStore;
use crate::records::{IncidentRecord, StepRecord};

/// Display format used when none is configured
pub const DEFAULT_DATE_FORMAT: &str = "%d/%m/%Y %H:%M:%S";

/// Placeholder shown for an unset end date
const NOT_AVAILABLE: &str = "N/A";

/// Everything a template needs to render an incident report
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportModel {
    pub incident_id: u64,
    pub class: String,
    #[serde(rename = "type")]
    pub incident_type: String,
    pub status: String,
    pub start_date: String,
    pub end_date: String,
    pub generated_at: String,
    pub percentage: u8,
    pub observations: String,
    pub improvements: String,
    pub steps: Vec<ReportStep>,
}

/// One plan step as it appears in the report
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportStep {
    pub index: usize,
    pub title: String,
    pub evidence: String,
    pub sub_steps_checked: Vec<String>,
    pub attachment_paths: Vec<PathBuf>,
}

/// Builds [`ReportModel`]s
#[derive(Debug, Clone)]
pub struct ReportAssembler {
    date_format: String,
}

impl Default for ReportAssembler {
    fn default() -> Self {
        Self::new(DEFAULT_DATE_FORMAT)
    }
}

impl ReportAssembler {
    pub fn new(date_format: impl Into<String>) -> Self {
        Self {
            date_format: date_format.into(),
        }
    }

    fn format_date(&self, date: DateTime<Utc>) -> String {
        date.format(&self.date_format).to_string()
    }

    /// Merge an incident, its step records and resolved attachments.
    ///
    /// Steps follow plan order. Attachments whose file no longer exists are
    /// dropped from the step entry.
    pub fn assemble(
        &self,
        incident: &IncidentRecord,
        steps: &[StepRecord],
        blobs: &dyn BlobStore,
        percentage: u8,
    ) -> ReportModel {
        let report_steps = incident
            .step_plan
            .iter()
            .enumerate()
            .map(|(i, definition)| {
                let index = i + 1;
                let record = steps
                    .iter()
                    .find(|s| s.incident_id == incident.id && s.step_index == index);

                let attachment_paths = record
                    .and_then(|r| r.attachment_ref.as_deref())
                    .filter(|r| !r.trim().is_empty())
                    .and_then(|reference| {
                        let resolved = blobs.resolve(reference);
                        if resolved.is_none() {
                            warn!(
                                incident_id = incident.id,
                                step_index = index,
                                "Attachment {} is missing, rendering step without it",
                                reference
                            );
                        }
                        resolved
                    })
                    .into_iter()
                    .collect();

                ReportStep {
                    index,
                    title: definition.title.clone(),
                    evidence: record.map(|r| r.evidence.clone()).unwrap_or_default(),
                    sub_steps_checked: record
                        .map(|r| r.sub_steps.set_or_empty().ordered_by(&definition.sub_steps))
                        .unwrap_or_default(),
                    attachment_paths,
                }
            })
            .collect();

        ReportModel {
            incident_id: incident.id,
            class: incident.class.clone(),
            incident_type: incident.incident_type.clone(),
            status: incident.status.to_string(),
            start_date: self.format_date(incident.started_at),
            end_date: incident
                .ended_at
                .map_or_else(|| NOT_AVAILABLE.to_string(), |d| self.format_date(d)),
            generated_at: self.format_date(Utc::now()),
            percentage,
            observations: incident.observations.clone().unwrap_or_default(),
            improvements: incident.improvements.clone().unwrap_or_default(),
            steps: report_steps,
        }
    }
}

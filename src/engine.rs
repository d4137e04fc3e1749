//! Incident workflow engine.
//!
//! Every mutation follows the same path: validate, load the durable records,
//! apply the change in memory, recompute progress, apply the completion gate,
//! persist everything in one store transaction and finally update the session
//! mirror.

use std::path::PathBuf;

use anyhow::Context;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::blob::{secure_filename, BlobStore, FsBlobStore};
use crate::catalog::{SearchHit, StepPlanCatalog};
use crate::config::Config;
use crate::error::{EngineError, EngineResult};
use crate::progress::{NextStep, ProgressEngine, ProgressReport, ScoringPolicy};
use crate::records::{IncidentRecord, IncidentStatus, NewIncident, StepRecord, SubStepSet};
use crate::report::{
    CommandConverter, DocumentPipeline, HandlebarsPipeline, ReportAssembler, ReportWriter,
};
use crate::session::{SessionCache, SessionMirror};
use crate::store::{IncidentStore, IncidentWrite, SqliteStore};

/// Values captured for one step
#[derive(Debug, Clone, PartialEq)]
pub struct StepSubmission {
    pub step_index: usize,
    pub evidence: String,
    pub sub_steps: SubStepSet,
    /// Only replaces the stored reference when present
    pub attachment_ref: Option<String>,
}

impl StepSubmission {
    pub fn new(step_index: usize, evidence: impl Into<String>, sub_steps: SubStepSet) -> Self {
        Self {
            step_index,
            evidence: evidence.into(),
            sub_steps,
            attachment_ref: None,
        }
    }

    pub fn with_attachment(mut self, reference: impl Into<String>) -> Self {
        self.attachment_ref = Some(reference.into());
        self
    }

    /// Build a submission from raw request values
    pub fn parse(
        step_index: &str,
        evidence: &str,
        sub_steps: &serde_json::Value,
        attachment_ref: Option<&str>,
    ) -> EngineResult<Self> {
        let step_index = parse_step_index(step_index)?;
        let sub_steps = SubStepSet::from_json_value(sub_steps)?;
        Ok(Self {
            step_index,
            evidence: evidence.to_string(),
            sub_steps,
            attachment_ref: attachment_ref
                .filter(|r| !r.trim().is_empty())
                .map(ToString::to_string),
        })
    }
}

/// Parse a 1-based step index
pub fn parse_step_index(raw: &str) -> EngineResult<usize> {
    raw.trim()
        .parse::<usize>()
        .map_err(|_| EngineError::InvalidFormat(format!("step index {raw:?} is not an integer")))
}

/// Where to re-enter an incident's workflow
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResumePoint {
    pub incident_id: u64,
    pub next_step: NextStep,
    pub percentage: u8,
    pub status: IncidentStatus,
}

/// Dashboard row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IncidentSummary {
    pub id: u64,
    pub class: String,
    #[serde(rename = "type")]
    pub incident_type: String,
    pub status: IncidentStatus,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub percentage: u8,
    pub next_step: NextStep,
}

/// Incidents split by completion, each list most recent first
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Dashboard {
    pub in_progress: Vec<IncidentSummary>,
    pub completed: Vec<IncidentSummary>,
}

pub struct IncidentEngine {
    catalog: StepPlanCatalog,
    store: Box<dyn IncidentStore>,
    blobs: Box<dyn BlobStore>,
    progress: ProgressEngine,
    session: SessionCache,
    assembler: ReportAssembler,
    reports: ReportWriter,
}

impl IncidentEngine {
    pub fn new(
        catalog: StepPlanCatalog,
        store: Box<dyn IncidentStore>,
        blobs: Box<dyn BlobStore>,
        reports: ReportWriter,
    ) -> Self {
        Self {
            catalog,
            store,
            blobs,
            progress: ProgressEngine::default(),
            session: SessionCache::new(),
            assembler: ReportAssembler::default(),
            reports,
        }
    }

    pub fn with_scoring(mut self, policy: ScoringPolicy) -> Self {
        self.progress = ProgressEngine::new(policy);
        self
    }

    pub fn with_date_format(mut self, date_format: &str) -> Self {
        self.assembler = ReportAssembler::new(date_format);
        self
    }

    /// Wire up the catalog, SQLite store, upload directory and report pipeline
    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        let catalog = StepPlanCatalog::load(config.catalog_path().as_deref())?;

        let db_path = config.database_path();
        let store = SqliteStore::open(&db_path)
            .with_context(|| format!("Failed to open database {}", db_path.display()))?;
        let blobs = FsBlobStore::new(config.uploads_path());
        let pipeline = build_pipeline(config)?;
        let reports = ReportWriter::new(config.reports_path(), pipeline);

        debug!(
            classes = catalog.class_count(),
            scoring = ?config.progress.scoring,
            "Incident engine configured"
        );

        Ok(Self::new(catalog, Box::new(store), Box::new(blobs), reports)
            .with_scoring(config.progress.scoring)
            .with_date_format(&config.report.date_format))
    }

    pub fn catalog(&self) -> &StepPlanCatalog {
        &self.catalog
    }

    pub fn scoring(&self) -> ScoringPolicy {
        self.progress.policy()
    }

    pub fn search(&self, query: &str) -> Vec<SearchHit> {
        self.catalog.search(query)
    }

    /// Create an incident for (class, type) and make it the current session
    pub fn start_incident(&mut self, class: &str, incident_type: &str) -> EngineResult<IncidentRecord> {
        let step_plan = self.catalog.lookup(class, incident_type)?;
        if step_plan.is_empty() {
            warn!(
                class = %class,
                incident_type = %incident_type,
                "No step plan found, incident only tracks lessons learned"
            );
        }

        let incident = self.store.create_incident(NewIncident {
            class: class.trim().to_string(),
            incident_type: incident_type.trim().to_string(),
            step_plan,
            started_at: Utc::now(),
        })?;

        info!(
            incident_id = incident.id,
            steps = incident.total_steps(),
            "Started incident {} / {}",
            incident.class,
            incident.incident_type
        );
        self.session.switch_to(&incident, &[]);
        Ok(incident)
    }

    pub fn get_incident(&self, incident_id: u64) -> EngineResult<IncidentRecord> {
        self.store
            .get_incident(incident_id)?
            .ok_or_else(|| EngineError::incident_not_found(incident_id))
    }

    pub fn steps(&self, incident_id: u64) -> EngineResult<Vec<StepRecord>> {
        self.get_incident(incident_id)?;
        Ok(self.store.list_steps(incident_id)?)
    }

    pub fn get_step(&self, incident_id: u64, step_index: usize) -> EngineResult<StepRecord> {
        self.get_incident(incident_id)?;
        self.store
            .get_step(incident_id, step_index)?
            .ok_or_else(|| EngineError::step_not_found(incident_id, step_index))
    }

    /// Incident plus its step records
    pub fn load(&self, incident_id: u64) -> EngineResult<(IncidentRecord, Vec<StepRecord>)> {
        let incident = self.get_incident(incident_id)?;
        let steps = self.store.list_steps(incident_id)?;
        Ok((incident, steps))
    }

    /// Like [`load`](Self::load) but rejects completed incidents
    fn load_open(&self, incident_id: u64) -> EngineResult<(IncidentRecord, Vec<StepRecord>)> {
        let (incident, steps) = self.load(incident_id)?;
        if incident.is_completed() {
            return Err(EngineError::IncidentCompleted(incident_id));
        }
        Ok((incident, steps))
    }

    fn check_step_in_plan(incident: &IncidentRecord, step_index: usize) -> EngineResult<()> {
        if incident.contains_step(step_index) {
            Ok(())
        } else {
            Err(EngineError::InvalidFormat(format!(
                "step index {step_index} is outside the plan of incident {} (1..={})",
                incident.id,
                incident.total_steps()
            )))
        }
    }

    /// Correct class and type while the incident is open. The step plan snapshot is kept.
    pub fn reclassify(
        &mut self,
        incident_id: u64,
        class: &str,
        incident_type: &str,
    ) -> EngineResult<IncidentRecord> {
        if class.trim().is_empty() {
            return Err(EngineError::MissingParameter("class".to_string()));
        }
        if incident_type.trim().is_empty() {
            return Err(EngineError::MissingParameter("type".to_string()));
        }

        let (mut incident, _) = self.load_open(incident_id)?;
        incident.class = class.trim().to_string();
        incident.incident_type = incident_type.trim().to_string();
        self.store.update_incident(&incident)?;

        if let Some(mirror) = self.session.mirror_for_mut(incident_id) {
            mirror.record_incident(&incident);
        }
        info!(incident_id, "Reclassified incident as {} / {}", incident.class, incident.incident_type);
        Ok(incident)
    }

    /// Record evidence and sub-steps (and optionally an attachment) for one step
    pub fn apply_step_submission(
        &mut self,
        incident_id: u64,
        submission: StepSubmission,
    ) -> EngineResult<ProgressReport> {
        if submission.evidence.trim().is_empty() {
            return Err(EngineError::EmptyEvidence {
                step_index: submission.step_index,
            });
        }

        let (incident, steps) = self.load_open(incident_id)?;
        Self::check_step_in_plan(&incident, submission.step_index)?;

        let now = Utc::now();
        let mut record = steps
            .iter()
            .find(|s| s.step_index == submission.step_index)
            .cloned()
            .unwrap_or_else(|| StepRecord::new(incident_id, submission.step_index));
        record.evidence = submission.evidence;
        record.sub_steps = submission.sub_steps.into();
        if let Some(reference) = submission.attachment_ref {
            record.attachment_ref = Some(reference);
        }
        record.updated_at = now;
        record.stamp_completion(now);

        debug!(
            incident_id,
            step_index = record.step_index,
            done = record.is_done(),
            "Step submission accepted"
        );
        self.commit(incident, steps, Some(record), false)
    }

    /// Store an uploaded file as the attachment of one step
    pub fn attach_file(
        &mut self,
        incident_id: u64,
        step_index: usize,
        file_name: &str,
        bytes: &[u8],
    ) -> EngineResult<ProgressReport> {
        if secure_filename(file_name).is_none() {
            return Err(EngineError::InvalidFormat(format!(
                "attachment name {file_name:?} has no usable characters"
            )));
        }

        let (incident, steps) = self.load_open(incident_id)?;
        Self::check_step_in_plan(&incident, step_index)?;

        // the upload stays staged until the record is durable
        let staged = self.blobs.stage(incident_id, step_index, file_name, bytes)?;
        let reference = staged.reference().to_string();

        let now = Utc::now();
        let mut record = steps
            .iter()
            .find(|s| s.step_index == step_index)
            .cloned()
            .unwrap_or_else(|| StepRecord::new(incident_id, step_index));
        let previous = record.attachment_ref.replace(reference.clone());
        record.updated_at = now;
        record.stamp_completion(now);

        let report = self.commit(incident, steps, Some(record), false)?;
        self.blobs.publish(staged).map_err(|e| {
            warn!(incident_id, step_index, "Failed to publish attachment {}: {}", reference, e);
            e
        })?;

        let step_prefix = format!("{incident_id}/step_{step_index}/");
        if let Some(old) = previous.filter(|old| *old != reference && old.starts_with(&step_prefix)) {
            if let Err(e) = self.blobs.remove(&old) {
                warn!(incident_id, step_index, "Failed to remove replaced attachment {}: {}", old, e);
            }
        }

        Ok(report)
    }

    /// Record lessons-learned. Blank fields leave the stored value untouched.
    pub fn submit_lessons(
        &mut self,
        incident_id: u64,
        improvements: Option<&str>,
        observations: Option<&str>,
    ) -> EngineResult<ProgressReport> {
        let improvements = improvements.map(str::trim).filter(|s| !s.is_empty());
        let observations = observations.map(str::trim).filter(|s| !s.is_empty());
        if improvements.is_none() && observations.is_none() {
            return Err(EngineError::MissingParameter(
                "improvements or observations".to_string(),
            ));
        }

        let (mut incident, steps) = self.load_open(incident_id)?;
        if let Some(text) = improvements {
            incident.improvements = Some(text.to_string());
        }
        if let Some(text) = observations {
            incident.observations = Some(text.to_string());
        }

        self.commit(incident, steps, None, true)
    }

    /// Recompute progress and persist the result with the changed records
    fn commit(
        &mut self,
        mut incident: IncidentRecord,
        mut steps: Vec<StepRecord>,
        changed: Option<StepRecord>,
        mut incident_dirty: bool,
    ) -> EngineResult<ProgressReport> {
        let changed_index = changed.map(|record| {
            let index = record.step_index;
            match steps.iter_mut().find(|s| s.step_index == index) {
                Some(existing) => *existing = record,
                None => steps.push(record),
            }
            index
        });
        steps.sort_by_key(|s| s.step_index);

        let percentage = self.progress.compute_percentage(&incident, &steps);
        if self.progress.is_complete(&incident, &steps) && !incident.is_completed() {
            incident.status = IncidentStatus::Completed;
            incident.ended_at = Some(Utc::now());
            incident_dirty = true;
            info!(incident_id = incident.id, "Incident completed");
        }
        for step in &mut steps {
            step.percent_complete = percentage;
        }

        let changed_step = changed_index.and_then(|i| steps.iter().find(|s| s.step_index == i));
        let mut write = IncidentWrite::default().percent(incident.id, percentage);
        if let Some(step) = changed_step {
            write = write.step(step);
        }
        if incident_dirty {
            write = write.incident(&incident);
        }
        self.store.apply(write)?;

        match self.session.mirror_for_mut(incident.id) {
            Some(mirror) => {
                if let Some(step) = changed_step {
                    mirror.record_step(&incident, step);
                }
                mirror.record_incident(&incident);
            }
            None => {
                self.session.switch_to(&incident, &steps);
            }
        }

        Ok(self.progress.report(&incident, &steps))
    }

    pub fn progress(&self, incident_id: u64) -> EngineResult<ProgressReport> {
        let (incident, steps) = self.load(incident_id)?;
        Ok(self.progress.report(&incident, &steps))
    }

    /// Rebuild the session for an incident and report where to continue
    pub fn resume(&mut self, incident_id: u64) -> EngineResult<ResumePoint> {
        let (incident, steps) = self.load(incident_id)?;
        self.session.switch_to(&incident, &steps);
        let report = self.progress.report(&incident, &steps);

        info!(incident_id, next = ?report.next_step, "Resumed incident");
        Ok(ResumePoint {
            incident_id,
            next_step: report.next_step,
            percentage: report.percentage,
            status: incident.status,
        })
    }

    /// Point the session at another incident, rebuilding the mirror from storage
    pub fn switch_to(&mut self, incident_id: u64) -> EngineResult<&SessionMirror> {
        let (incident, steps) = self.load(incident_id)?;
        Ok(self.session.switch_to(&incident, &steps))
    }

    pub fn current_incident(&self) -> Option<u64> {
        self.session.current_incident()
    }

    pub fn current_session(&self) -> Option<&SessionMirror> {
        self.session.mirror()
    }

    pub fn close_session(&mut self) {
        self.session.invalidate();
    }

    /// All incidents split into in-progress and completed
    pub fn dashboard(&self) -> EngineResult<Dashboard> {
        let mut dashboard = Dashboard::default();

        for incident in self.store.list_incidents()? {
            let steps = self.store.list_steps(incident.id)?;
            let report = self.progress.report(&incident, &steps);
            let complete = self.progress.is_complete(&incident, &steps);
            let summary = IncidentSummary {
                id: incident.id,
                class: incident.class,
                incident_type: incident.incident_type,
                status: incident.status,
                started_at: incident.started_at,
                ended_at: incident.ended_at,
                percentage: report.percentage,
                next_step: report.next_step,
            };
            if complete {
                dashboard.completed.push(summary);
            } else {
                dashboard.in_progress.push(summary);
            }
        }

        Ok(dashboard)
    }

    /// Delete an incident with its steps, attachments and report
    pub fn delete_incident(&mut self, incident_id: u64) -> EngineResult<()> {
        if !self.store.delete_incident(incident_id)? {
            return Err(EngineError::incident_not_found(incident_id));
        }

        // records are gone; leftover files are only logged
        if let Err(e) = self.blobs.remove_incident(incident_id) {
            warn!(incident_id, "Failed to remove attachments: {}", e);
        }
        if let Err(e) = self.reports.remove(incident_id) {
            warn!(incident_id, "Failed to remove report: {}", e);
        }
        self.session.invalidate_incident(incident_id);

        info!(incident_id, "Deleted incident");
        Ok(())
    }

    /// Render and publish the report of an incident
    pub fn generate_report(&self, incident_id: u64) -> EngineResult<PathBuf> {
        let (incident, steps) = self.load(incident_id)?;
        let percentage = self.progress.compute_percentage(&incident, &steps);
        let model = self
            .assembler
            .assemble(&incident, &steps, self.blobs.as_ref(), percentage);

        self.reports.write(&model).map_err(|e| {
            warn!(incident_id, "Report generation failed: {}", e);
            EngineError::ReportGenerationFailed(e.to_string())
        })
    }

    /// Published report of an incident
    pub fn report_path(&self, incident_id: u64) -> EngineResult<PathBuf> {
        self.get_incident(incident_id)?;
        self.reports
            .existing(incident_id)
            .ok_or_else(|| EngineError::RecordNotFound {
                entity: "report",
                id: incident_id.to_string(),
            })
    }
}

fn build_pipeline(config: &Config) -> anyhow::Result<Box<dyn DocumentPipeline>> {
    let report = &config.report;
    let mut pipeline = match config.template_path() {
        Some(path) => HandlebarsPipeline::from_template_file(&path, report.extension.as_str())?,
        None => HandlebarsPipeline::default(),
    };

    if let Some(converter) = &report.converter {
        pipeline = pipeline.with_converter(CommandConverter::new(
            converter.program.as_str(),
            converter.args.clone(),
            converter.extension.as_str(),
        ));
    }

    Ok(Box::new(pipeline))
}

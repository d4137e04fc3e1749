//! Writes rendered reports into the reports directory

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use tempfile::{Builder, NamedTempFile};
use tracing::info;

use super::{DocumentPipeline, PipelineError, ReportModel};

/// Renders in a scratch directory and publishes `incident_<id>.<ext>` only on success
pub struct ReportWriter {
    reports_dir: PathBuf,
    pipeline: Box<dyn DocumentPipeline>,
}

impl ReportWriter {
    pub fn new(reports_dir: impl Into<PathBuf>, pipeline: Box<dyn DocumentPipeline>) -> Self {
        Self {
            reports_dir: reports_dir.into(),
            pipeline,
        }
    }

    pub fn reports_dir(&self) -> &Path {
        &self.reports_dir
    }

    fn target_path(&self, incident_id: u64, extension: &str) -> PathBuf {
        self.reports_dir
            .join(format!("incident_{incident_id}.{extension}"))
    }

    /// Render `model` and publish it. Returns the published path.
    pub fn write(&self, model: &ReportModel) -> Result<PathBuf, PipelineError> {
        // removed on drop, including every error path below
        let workdir = Builder::new().prefix("playbook-report-").tempdir()?;
        let document = self.pipeline.render(model, workdir.path())?;

        fs::create_dir_all(&self.reports_dir)?;
        let target = self.target_path(model.incident_id, &document.extension);
        let mut staged = NamedTempFile::new_in(&self.reports_dir)?;
        staged.write_all(&document.bytes)?;
        staged.persist(&target).map_err(|e| PipelineError::Io(e.error))?;

        info!(
            incident_id = model.incident_id,
            "Report written to {}",
            target.display()
        );
        Ok(target)
    }

    /// Previously published report for an incident
    pub fn existing(&self, incident_id: u64) -> Option<PathBuf> {
        Some(self.target_path(incident_id, self.pipeline.extension())).filter(|p| p.is_file())
    }

    /// Delete a published report, if any
    pub fn remove(&self, incident_id: u64) -> std::io::Result<()> {
        match self.existing(incident_id) {
            Some(path) => fs::remove_file(path),
            None => Ok(()),
        }
    }
}

//! Integration tests for the incident workflow
//!
//! These tests drive the public engine API end to end against a SQLite file
//! and a scratch upload/report directory:
//! - progress scoring across step submissions and lessons learned
//! - the completion gate and the terminal Completed state
//! - session rebuild after reopening the database
//! - attachments, deletion and report publishing
//!
//! ## Running Tests
//!
//! ```bash
//! cargo test --test incident_workflow -- --nocapture
//! ```

use std::path::PathBuf;

use tempfile::TempDir;

use playbook::blob::FsBlobStore;
use playbook::catalog::StepPlanCatalog;
use playbook::engine::{IncidentEngine, StepSubmission};
use playbook::error::ErrorKind;
use playbook::progress::{NextStep, ScoringPolicy};
use playbook::records::{IncidentStatus, StepRecord, StoredSubSteps, SubStepSet};
use playbook::report::{CommandConverter, HandlebarsPipeline, ReportWriter};
use playbook::session::SessionMirror;
use playbook::store::SqliteStore;

// ─── Test Context ─────────────────────────────────────────────────────────────

const CATALOG: &str = r#"[
  {
    "class": "Malicious Code",
    "types": [
      {
        "type": "Ransomware",
        "steps": [
          {"title": "Identify affected systems", "sub_steps": ["Collect ransom note", "List encrypted hosts"]},
          {"title": "Contain the outbreak", "sub_steps": ["Isolate hosts"]},
          {"title": "Eradicate", "sub_steps": ["Reimage hosts"]},
          {"title": "Recover", "sub_steps": ["Restore backups"]}
        ]
      }
    ]
  }
]"#;

/// Isolated database, uploads and reports for one test
struct WorkflowContext {
    temp_dir: TempDir,
}

impl WorkflowContext {
    fn new() -> Self {
        Self {
            temp_dir: TempDir::new().expect("Failed to create temp dir"),
        }
    }

    fn uploads(&self) -> PathBuf {
        self.temp_dir.path().join("uploads")
    }

    fn reports(&self) -> PathBuf {
        self.temp_dir.path().join("reports")
    }

    /// Open an engine on the context's database; reopening sees earlier writes
    fn engine(&self) -> IncidentEngine {
        self.engine_with(HandlebarsPipeline::default())
    }

    fn engine_with(&self, pipeline: HandlebarsPipeline) -> IncidentEngine {
        let catalog = StepPlanCatalog::from_json(CATALOG).expect("catalog parses");
        let store = SqliteStore::open(&self.temp_dir.path().join("playbook.db"))
            .expect("database opens");
        IncidentEngine::new(
            catalog,
            Box::new(store),
            Box::new(FsBlobStore::new(self.uploads())),
            ReportWriter::new(self.reports(), Box::new(pipeline)),
        )
    }
}

/// A submission that marks the step done once an attachment is present
fn full_submission(index: usize, attachment: &str) -> StepSubmission {
    StepSubmission::new(
        index,
        format!("Evidence for step {index}"),
        SubStepSet::new(["checked"]),
    )
    .with_attachment(attachment)
}

// ─── Scoring ──────────────────────────────────────────────────────────────────

#[test]
fn test_two_of_four_steps_done_scores_25() {
    let ctx = WorkflowContext::new();
    let mut engine = ctx.engine();
    let incident = engine.start_incident("Malicious Code", "Ransomware").unwrap();

    engine
        .apply_step_submission(incident.id, full_submission(1, "1/step_1/note.txt"))
        .unwrap();
    let report = engine
        .apply_step_submission(incident.id, full_submission(2, "1/step_2/hosts.csv"))
        .unwrap();

    assert_eq!(report.percentage, 25);
    assert_eq!(report.done_steps, 2);
    assert_eq!(report.next_step, NextStep::Step(3));
    assert_eq!(report.status, IncidentStatus::InProgress);
}

#[test]
fn test_all_steps_and_observations_score_75_then_complete() {
    let ctx = WorkflowContext::new();
    let mut engine = ctx.engine();
    let id = engine
        .start_incident("Malicious Code", "Ransomware")
        .unwrap()
        .id;

    for index in 1..=4 {
        engine
            .apply_step_submission(id, full_submission(index, "ref"))
            .unwrap();
    }
    let report = engine
        .submit_lessons(id, None, Some("Backups were stale"))
        .unwrap();
    assert_eq!(report.percentage, 75);
    assert_eq!(report.status, IncidentStatus::InProgress);
    assert_eq!(report.next_step, NextStep::LessonsLearned);

    let report = engine
        .submit_lessons(id, Some("Test restores monthly"), None)
        .unwrap();
    assert_eq!(report.percentage, 100);
    assert_eq!(report.status, IncidentStatus::Completed);
    assert_eq!(report.next_step, NextStep::Done);

    let incident = engine.get_incident(id).unwrap();
    assert!(incident.ended_at.is_some());
    assert_eq!(incident.observations.as_deref(), Some("Backups were stale"));

    let err = engine
        .apply_step_submission(id, full_submission(1, "ref"))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::IncidentCompleted);
}

#[test]
fn test_gated_policy_needs_both_lessons() {
    let ctx = WorkflowContext::new();
    let mut engine = ctx.engine().with_scoring(ScoringPolicy::Gated);
    let id = engine
        .start_incident("Malicious Code", "Ransomware")
        .unwrap()
        .id;

    let report = engine.submit_lessons(id, None, Some("observed")).unwrap();
    assert_eq!(report.percentage, 0);

    let report = engine.submit_lessons(id, Some("improve"), None).unwrap();
    assert_eq!(report.percentage, 50);
}

#[test]
fn test_unknown_pair_tracks_lessons_only() {
    let ctx = WorkflowContext::new();
    let mut engine = ctx.engine();
    let incident = engine.start_incident("Network Outage", "DNS Failure").unwrap();
    assert!(incident.step_plan.is_empty());

    assert_eq!(engine.progress(incident.id).unwrap().percentage, 0);

    let report = engine
        .submit_lessons(incident.id, Some("Add a secondary resolver"), None)
        .unwrap();
    assert_eq!(report.percentage, 25);

    let report = engine
        .submit_lessons(incident.id, None, Some("TTLs were too long"))
        .unwrap();
    assert_eq!(report.percentage, 50);
    assert_eq!(report.next_step, NextStep::Done);
    assert_eq!(report.status, IncidentStatus::InProgress);

    let err = engine
        .apply_step_submission(incident.id, full_submission(1, "ref"))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidFormat);
}

#[test]
fn test_percentage_is_monotonic_and_upsert_idempotent() {
    let ctx = WorkflowContext::new();
    let mut engine = ctx.engine();
    let id = engine
        .start_incident("Malicious Code", "Ransomware")
        .unwrap()
        .id;

    let mut last = 0;
    for submission in [
        StepSubmission::new(1, "partial", SubStepSet::default()),
        full_submission(1, "ref"),
        full_submission(1, "ref"),
        full_submission(3, "ref"),
    ] {
        let pct = engine.apply_step_submission(id, submission).unwrap().percentage;
        assert!(pct >= last, "percentage dropped from {last} to {pct}");
        last = pct;
    }

    assert_eq!(last, 25);
    assert_eq!(engine.steps(id).unwrap().len(), 2);
    assert!(engine
        .steps(id)
        .unwrap()
        .iter()
        .all(|s| s.percent_complete == 25));
}

#[test]
fn test_empty_evidence_is_rejected_without_writing() {
    let ctx = WorkflowContext::new();
    let mut engine = ctx.engine();
    let id = engine
        .start_incident("Malicious Code", "Ransomware")
        .unwrap()
        .id;

    let submission = StepSubmission::new(1, "  \n", SubStepSet::new(["checked"]))
        .with_attachment("ref");
    let err = engine.apply_step_submission(id, submission).unwrap_err();

    assert_eq!(err.kind(), ErrorKind::EmptyEvidence);
    assert!(engine.steps(id).unwrap().is_empty());
    assert_eq!(engine.progress(id).unwrap().percentage, 0);
}

// ─── Session ──────────────────────────────────────────────────────────────────

#[test]
fn test_resume_after_reopen_rebuilds_session() {
    let ctx = WorkflowContext::new();
    let id = {
        let mut engine = ctx.engine();
        let id = engine
            .start_incident("Malicious Code", "Ransomware")
            .unwrap()
            .id;
        for index in 1..=4 {
            engine
                .apply_step_submission(id, full_submission(index, "ref"))
                .unwrap();
        }
        engine
            .submit_lessons(id, Some("improve"), Some("observe"))
            .unwrap();
        id
    };

    let mut engine = ctx.engine();
    assert!(engine.current_incident().is_none());

    let point = engine.resume(id).unwrap();
    assert_eq!(point.percentage, 100);
    assert_eq!(point.next_step, NextStep::Done);
    assert_eq!(point.status, IncidentStatus::Completed);

    let mirror = engine.current_session().unwrap();
    assert_eq!(mirror.incident_id, id);
    assert_eq!(mirror.evidence_for(3), Some("Evidence for step 3"));
    assert_eq!(mirror.sub_steps_for(4), ["checked".to_string()]);
}

#[test]
fn test_switching_incidents_rebuilds_mirror() {
    let ctx = WorkflowContext::new();
    let mut engine = ctx.engine();
    let first = engine
        .start_incident("Malicious Code", "Ransomware")
        .unwrap()
        .id;
    engine
        .apply_step_submission(first, full_submission(1, "ref"))
        .unwrap();
    let second = engine
        .start_incident("Malicious Code", "Ransomware")
        .unwrap()
        .id;
    assert_eq!(engine.current_incident(), Some(second));

    let mirror = engine.switch_to(first).unwrap();
    assert_eq!(mirror.evidence_for(1), Some("Evidence for step 1"));

    engine.close_session();
    assert!(engine.current_incident().is_none());
}

#[test]
fn test_malformed_sub_steps_only_affect_their_step() {
    let ctx = WorkflowContext::new();
    let mut engine = ctx.engine();
    let id = engine
        .start_incident("Malicious Code", "Ransomware")
        .unwrap()
        .id;
    for index in 1..=3 {
        engine
            .apply_step_submission(id, full_submission(index, "ref"))
            .unwrap();
    }

    let incident = engine.get_incident(id).unwrap();
    let mut steps: Vec<StepRecord> = engine.steps(id).unwrap();
    steps[2].sub_steps = StoredSubSteps::decode(Some("{not json"));

    let mirror = SessionMirror::rebuild(&incident, &steps);
    assert!(mirror.sub_steps_for(3).is_empty());
    assert_eq!(mirror.sub_steps_for(1), ["checked".to_string()]);
    assert_eq!(mirror.evidence_for(3), Some("Evidence for step 3"));
}

// ─── Attachments, deletion, reports ───────────────────────────────────────────

#[test]
fn test_attach_file_stores_blob_and_completes_step() {
    let ctx = WorkflowContext::new();
    let mut engine = ctx.engine();
    let id = engine
        .start_incident("Malicious Code", "Ransomware")
        .unwrap()
        .id;

    engine
        .apply_step_submission(
            id,
            StepSubmission::new(2, "Isolated VLAN 12", SubStepSet::new(["Isolate hosts"])),
        )
        .unwrap();
    let report = engine
        .attach_file(id, 2, "../../fw rules.txt", b"deny any any")
        .unwrap();
    assert_eq!(report.done_steps, 1);

    let step = engine.get_step(id, 2).unwrap();
    let reference = step.attachment_ref.unwrap();
    assert_eq!(reference, format!("{id}/step_2/fw_rules.txt"));
    let stored = ctx.uploads().join(&reference);
    assert_eq!(std::fs::read(stored).unwrap(), b"deny any any");

    engine.delete_incident(id).unwrap();
    assert!(!ctx.uploads().join(id.to_string()).exists());
    assert_eq!(
        engine.get_incident(id).unwrap_err().kind(),
        ErrorKind::RecordNotFound
    );
}

#[test]
fn test_report_is_published_with_plan_steps() {
    let ctx = WorkflowContext::new();
    let mut engine = ctx.engine();
    let id = engine
        .start_incident("Malicious Code", "Ransomware")
        .unwrap()
        .id;
    engine
        .apply_step_submission(id, full_submission(1, "ref"))
        .unwrap();

    let path = engine.generate_report(id).unwrap();
    assert_eq!(path, ctx.reports().join(format!("incident_{id}.html")));
    assert_eq!(engine.report_path(id).unwrap(), path);

    let html = std::fs::read_to_string(&path).unwrap();
    assert!(html.contains("Identify affected systems"));
    assert!(html.contains("Recover"));
    assert!(html.contains("Evidence for step 1"));
}

#[test]
fn test_failed_conversion_leaves_no_report() {
    let ctx = WorkflowContext::new();
    let pipeline = HandlebarsPipeline::default().with_converter(CommandConverter::new(
        "definitely-not-a-converter-7f3a",
        vec![],
        "pdf",
    ));
    let mut engine = ctx.engine_with(pipeline);
    let id = engine
        .start_incident("Malicious Code", "Ransomware")
        .unwrap()
        .id;

    let err = engine.generate_report(id).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ReportGenerationFailed);
    assert!(!ctx.reports().join(format!("incident_{id}.pdf")).exists());
    assert_eq!(
        engine.report_path(id).unwrap_err().kind(),
        ErrorKind::RecordNotFound
    );
}

#[test]
fn test_dashboard_splits_by_completion() {
    let ctx = WorkflowContext::new();
    let mut engine = ctx.engine();
    let open = engine
        .start_incident("Malicious Code", "Ransomware")
        .unwrap()
        .id;
    let done = engine
        .start_incident("Malicious Code", "Ransomware")
        .unwrap()
        .id;
    for index in 1..=4 {
        engine
            .apply_step_submission(done, full_submission(index, "ref"))
            .unwrap();
    }
    engine.submit_lessons(done, Some("i"), Some("o")).unwrap();

    let dashboard = engine.dashboard().unwrap();
    assert_eq!(
        dashboard.in_progress.iter().map(|s| s.id).collect::<Vec<_>>(),
        vec![open]
    );
    assert_eq!(
        dashboard.completed.iter().map(|s| s.id).collect::<Vec<_>>(),
        vec![done]
    );
    assert_eq!(dashboard.completed[0].percentage, 100);
}

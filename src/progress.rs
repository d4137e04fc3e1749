//! Completion scoring for incidents.
//!
//! Half of the score comes from steps (done steps over the snapshot length),
//! the other half from lessons-learned. How the lessons half is awarded is a
//! [`ScoringPolicy`].

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::records::{IncidentRecord, IncidentStatus, StepRecord};

/// Weight of the step component
pub const STEP_WEIGHT: f64 = 50.0;
/// Weight of each lessons-learned field under [`ScoringPolicy::Independent`]
pub const LESSON_FIELD_WEIGHT: f64 = 25.0;

/// How lessons-learned contributes to the score
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScoringPolicy {
    /// Observations and improvements are worth 25 each
    #[default]
    Independent,
    /// 50 only when both fields are filled in
    Gated,
}

/// Where an operator should pick up an incident
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "step_index", rename_all = "snake_case")]
pub enum NextStep {
    /// First step (1-based) that is missing or not done
    Step(usize),
    /// All steps are done but lessons-learned is incomplete
    LessonsLearned,
    /// Nothing left to do
    Done,
}

impl NextStep {
    pub fn is_done(&self) -> bool {
        matches!(self, NextStep::Done)
    }
}

/// Point-in-time progress of one incident
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressReport {
    pub incident_id: u64,
    /// Score rounded to one decimal place
    pub score: f64,
    /// Integer percentage used for gating
    pub percentage: u8,
    pub done_steps: usize,
    pub total_steps: usize,
    pub next_step: NextStep,
    pub status: IncidentStatus,
}

/// Computes completion percentage and the next incomplete step
#[derive(Debug, Clone, Copy, Default)]
pub struct ProgressEngine {
    policy: ScoringPolicy,
}

impl ProgressEngine {
    pub fn new(policy: ScoringPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> ScoringPolicy {
        self.policy
    }

    /// Indices in `1..=total` whose record is done
    fn done_indices(incident: &IncidentRecord, steps: &[StepRecord]) -> BTreeSet<usize> {
        steps
            .iter()
            .filter(|s| s.incident_id == incident.id)
            .filter(|s| incident.contains_step(s.step_index))
            .filter(|s| s.is_done())
            .map(|s| s.step_index)
            .collect()
    }

    pub fn done_steps(&self, incident: &IncidentRecord, steps: &[StepRecord]) -> usize {
        Self::done_indices(incident, steps).len()
    }

    /// `done / total * 50`, or 0 for an empty plan
    pub fn step_score(&self, incident: &IncidentRecord, steps: &[StepRecord]) -> f64 {
        let total = incident.total_steps();
        if total == 0 {
            return 0.0;
        }
        (self.done_steps(incident, steps) as f64 / total as f64) * STEP_WEIGHT
    }

    pub fn lessons_score(&self, incident: &IncidentRecord) -> f64 {
        match self.policy {
            ScoringPolicy::Independent => {
                let mut score = 0.0;
                if incident.has_observations() {
                    score += LESSON_FIELD_WEIGHT;
                }
                if incident.has_improvements() {
                    score += LESSON_FIELD_WEIGHT;
                }
                score
            }
            ScoringPolicy::Gated => {
                if incident.lessons_complete() {
                    2.0 * LESSON_FIELD_WEIGHT
                } else {
                    0.0
                }
            }
        }
    }

    /// Score in `[0, 100]` rounded to one decimal place
    pub fn compute_score(&self, incident: &IncidentRecord, steps: &[StepRecord]) -> f64 {
        let raw = self.step_score(incident, steps) + self.lessons_score(incident);
        ((raw * 10.0).round() / 10.0).clamp(0.0, 100.0)
    }

    /// Integer percentage in `[0, 100]`
    pub fn compute_percentage(&self, incident: &IncidentRecord, steps: &[StepRecord]) -> u8 {
        self.compute_score(incident, steps).round() as u8
    }

    /// Whether the completion gate is met.
    ///
    /// Every planned step must be done as well: with large plans a single open
    /// step rounds away and the percentage alone reads 100.
    pub fn is_complete(&self, incident: &IncidentRecord, steps: &[StepRecord]) -> bool {
        self.compute_percentage(incident, steps) == 100
            && self.next_incomplete_step(incident, steps) == NextStep::Done
    }

    /// First incomplete step in plan order, then lessons-learned, then done
    pub fn next_incomplete_step(&self, incident: &IncidentRecord, steps: &[StepRecord]) -> NextStep {
        let done = Self::done_indices(incident, steps);

        if let Some(index) = (1..=incident.total_steps()).find(|i| !done.contains(i)) {
            return NextStep::Step(index);
        }

        if incident.lessons_complete() {
            NextStep::Done
        } else {
            NextStep::LessonsLearned
        }
    }

    /// Everything a caller needs to render progress
    pub fn report(&self, incident: &IncidentRecord, steps: &[StepRecord]) -> ProgressReport {
        let score = self.compute_score(incident, steps);
        ProgressReport {
            incident_id: incident.id,
            score,
            percentage: score.round() as u8,
            done_steps: self.done_steps(incident, steps),
            total_steps: incident.total_steps(),
            next_step: self.next_incomplete_step(incident, steps),
            status: incident.status,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::StepDefinition;
    use crate::records::SubStepSet;
    use chrono::Utc;

    fn make_incident(total_steps: usize) -> IncidentRecord {
        IncidentRecord {
            id: 1,
            class: "Malicious Code".to_string(),
            incident_type: "Ransomware".to_string(),
            status: IncidentStatus::InProgress,
            created_at: Utc::now(),
            started_at: Utc::now(),
            ended_at: None,
            improvements: None,
            observations: None,
            step_plan: (1..=total_steps)
                .map(|i| StepDefinition::new(format!("Step {i}"), &["check"]))
                .collect(),
        }
    }

    fn done_step(index: usize) -> StepRecord {
        let mut record = StepRecord::new(1, index);
        record.evidence = format!("evidence {index}");
        record.sub_steps = SubStepSet::new(["check"]).into();
        record.attachment_ref = Some(format!("1/step_{index}/shot.png"));
        record
    }

    fn partial_step(index: usize) -> StepRecord {
        let mut record = done_step(index);
        record.attachment_ref = None;
        record
    }

    #[test]
    fn test_two_of_four_steps_is_25() {
        let engine = ProgressEngine::default();
        let incident = make_incident(4);
        let steps = vec![done_step(1), done_step(2)];
        assert_eq!(engine.compute_percentage(&incident, &steps), 25);
        assert_eq!(engine.next_incomplete_step(&incident, &steps), NextStep::Step(3));
    }

    #[test]
    fn test_all_steps_and_observations_is_75() {
        let engine = ProgressEngine::default();
        let mut incident = make_incident(4);
        incident.observations = Some("Backups were stale".to_string());
        incident.improvements = Some(String::new());
        let steps: Vec<_> = (1..=4).map(done_step).collect();

        assert_eq!(engine.compute_percentage(&incident, &steps), 75);
        assert!(!engine.is_complete(&incident, &steps));
        assert_eq!(
            engine.next_incomplete_step(&incident, &steps),
            NextStep::LessonsLearned
        );
    }

    #[test]
    fn test_everything_done_is_100() {
        let engine = ProgressEngine::default();
        let mut incident = make_incident(3);
        incident.observations = Some("obs".to_string());
        incident.improvements = Some("imp".to_string());
        let steps: Vec<_> = (1..=3).map(done_step).collect();

        assert_eq!(engine.compute_percentage(&incident, &steps), 100);
        assert_eq!(engine.next_incomplete_step(&incident, &steps), NextStep::Done);
    }

    #[test]
    fn test_open_step_in_large_plan_is_not_complete() {
        let engine = ProgressEngine::default();
        let mut incident = make_incident(100);
        incident.observations = Some("obs".to_string());
        incident.improvements = Some("imp".to_string());
        let mut steps: Vec<_> = (1..=99).map(done_step).collect();

        assert_eq!(engine.compute_percentage(&incident, &steps), 100);
        assert!(!engine.is_complete(&incident, &steps));
        assert_eq!(engine.next_incomplete_step(&incident, &steps), NextStep::Step(100));

        steps.push(done_step(100));
        assert!(engine.is_complete(&incident, &steps));
    }

    #[test]
    fn test_empty_plan_scores_lessons_only() {
        let engine = ProgressEngine::default();
        let mut incident = make_incident(0);
        assert_eq!(engine.compute_percentage(&incident, &[]), 0);

        incident.observations = Some("obs".to_string());
        assert_eq!(engine.compute_percentage(&incident, &[]), 25);

        incident.improvements = Some("imp".to_string());
        assert_eq!(engine.compute_percentage(&incident, &[]), 50);
    }

    #[test]
    fn test_gated_policy_requires_both_fields() {
        let engine = ProgressEngine::new(ScoringPolicy::Gated);
        let mut incident = make_incident(2);
        let steps = vec![done_step(1), done_step(2)];

        incident.observations = Some("obs".to_string());
        assert_eq!(engine.compute_percentage(&incident, &steps), 50);

        incident.improvements = Some("imp".to_string());
        assert_eq!(engine.compute_percentage(&incident, &steps), 100);
    }

    #[test]
    fn test_partial_steps_do_not_count() {
        let engine = ProgressEngine::default();
        let incident = make_incident(2);
        let steps = vec![partial_step(1), done_step(2)];
        assert_eq!(engine.done_steps(&incident, &steps), 1);
        assert_eq!(engine.next_incomplete_step(&incident, &steps), NextStep::Step(1));
    }

    #[test]
    fn test_out_of_plan_records_are_ignored() {
        let engine = ProgressEngine::default();
        let incident = make_incident(2);
        let steps = vec![done_step(1), done_step(2), done_step(3), done_step(0)];
        assert_eq!(engine.compute_percentage(&incident, &steps), 50);
    }

    #[test]
    fn test_score_rounds_to_one_decimal() {
        let engine = ProgressEngine::default();
        let incident = make_incident(3);
        let steps = vec![done_step(1)];
        // 50 / 3 = 16.666...
        assert!((engine.compute_score(&incident, &steps) - 16.7).abs() < f64::EPSILON);
        assert_eq!(engine.compute_percentage(&incident, &steps), 17);
    }

    #[test]
    fn test_percentage_bounded_and_monotonic() {
        let engine = ProgressEngine::default();
        for total in 0..6 {
            let mut incident = make_incident(total);
            let mut steps = Vec::new();
            let mut last = engine.compute_percentage(&incident, &steps);
            for index in 1..=total {
                steps.push(done_step(index));
                let pct = engine.compute_percentage(&incident, &steps);
                assert!(pct >= last);
                assert!(pct <= 100);
                last = pct;
            }
            incident.observations = Some("o".to_string());
            incident.improvements = Some("i".to_string());
            let pct = engine.compute_percentage(&incident, &steps);
            assert!(pct >= last && pct <= 100);
        }
    }

    #[test]
    fn test_next_step_serializes_as_tagged_variant() {
        let json = serde_json::to_value(NextStep::Step(2)).unwrap();
        assert_eq!(json, serde_json::json!({"kind": "step", "step_index": 2}));
        let json = serde_json::to_value(NextStep::LessonsLearned).unwrap();
        assert_eq!(json, serde_json::json!({"kind": "lessons_learned"}));
    }
}

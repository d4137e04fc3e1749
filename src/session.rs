//! Session mirror: a rebuildable cache of one incident's in-progress state.
//!
//! The mirror is never the source of truth. [`SessionMirror::rebuild`] is a
//! pure function of the durable records, and [`SessionCache::switch_to`] is
//! the only way to point the cache at a different incident.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::records::{IncidentRecord, StepRecord};

/// Cached view of one incident, keyed by 1-based step index
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionMirror {
    pub incident_id: u64,
    pub class: String,
    #[serde(rename = "type")]
    pub incident_type: String,
    pub step_titles: Vec<String>,
    pub evidence: BTreeMap<usize, String>,
    pub sub_steps: BTreeMap<usize, Vec<String>>,
    /// One element per step in this model; a list for multi-attachment callers
    pub attachment_refs: BTreeMap<usize, Vec<String>>,
    pub improvements: Option<String>,
    pub observations: Option<String>,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub rebuilt_at: DateTime<Utc>,
}

impl SessionMirror {
    /// Build a mirror from durable records.
    ///
    /// Records belonging to another incident are skipped. Sub-steps that
    /// failed to decode become an empty list for that step only.
    pub fn rebuild(incident: &IncidentRecord, steps: &[StepRecord]) -> Self {
        let mut mirror = Self {
            incident_id: incident.id,
            class: incident.class.clone(),
            incident_type: incident.incident_type.clone(),
            step_titles: incident.step_plan.iter().map(|s| s.title.clone()).collect(),
            evidence: BTreeMap::new(),
            sub_steps: BTreeMap::new(),
            attachment_refs: BTreeMap::new(),
            improvements: incident.improvements.clone(),
            observations: incident.observations.clone(),
            started_at: incident.started_at,
            ended_at: incident.ended_at,
            rebuilt_at: Utc::now(),
        };

        for step in steps.iter().filter(|s| s.incident_id == incident.id) {
            if step.sub_steps.is_malformed() {
                warn!(
                    incident_id = incident.id,
                    step_index = step.step_index,
                    "Unreadable sub-steps in stored step, using empty list"
                );
            }
            mirror.record_step(incident, step);
        }

        debug!(
            incident_id = incident.id,
            steps = mirror.evidence.len(),
            "Rebuilt session mirror"
        );
        mirror
    }

    /// Mirror one step record's values
    pub fn record_step(&mut self, incident: &IncidentRecord, step: &StepRecord) {
        let plan_labels = step
            .step_index
            .checked_sub(1)
            .and_then(|i| incident.step_plan.get(i))
            .map(|s| s.sub_steps.as_slice())
            .unwrap_or_default();

        self.evidence.insert(step.step_index, step.evidence.clone());
        self.sub_steps.insert(
            step.step_index,
            step.sub_steps.set_or_empty().ordered_by(plan_labels),
        );
        match step.attachment_ref.as_deref().filter(|r| !r.trim().is_empty()) {
            Some(reference) => {
                self.attachment_refs
                    .insert(step.step_index, vec![reference.to_string()]);
            }
            None => {
                self.attachment_refs.remove(&step.step_index);
            }
        }
    }

    /// Mirror lessons-learned and completion timestamps from the incident
    pub fn record_incident(&mut self, incident: &IncidentRecord) {
        self.class.clone_from(&incident.class);
        self.incident_type.clone_from(&incident.incident_type);
        self.improvements.clone_from(&incident.improvements);
        self.observations.clone_from(&incident.observations);
        self.started_at = incident.started_at;
        self.ended_at = incident.ended_at;
    }

    pub fn evidence_for(&self, step_index: usize) -> Option<&str> {
        self.evidence.get(&step_index).map(String::as_str)
    }

    pub fn sub_steps_for(&self, step_index: usize) -> &[String] {
        self.sub_steps
            .get(&step_index)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub fn attachments_for(&self, step_index: usize) -> &[String] {
        self.attachment_refs
            .get(&step_index)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }
}

/// Holds the mirror for the caller's current incident, if any
#[derive(Debug, Default)]
pub struct SessionCache {
    mirror: Option<SessionMirror>,
}

impl SessionCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current_incident(&self) -> Option<u64> {
        self.mirror.as_ref().map(|m| m.incident_id)
    }

    pub fn mirror(&self) -> Option<&SessionMirror> {
        self.mirror.as_ref()
    }

    /// Replace the cache with a full rebuild for `incident`
    pub fn switch_to(&mut self, incident: &IncidentRecord, steps: &[StepRecord]) -> &SessionMirror {
        if let Some(previous) = self.current_incident().filter(|id| *id != incident.id) {
            debug!(from = previous, to = incident.id, "Switching current incident");
        }
        self.mirror.insert(SessionMirror::rebuild(incident, steps))
    }

    /// Drop the mirror
    pub fn invalidate(&mut self) {
        self.mirror = None;
    }

    /// Drop the mirror only if it belongs to `incident_id`
    pub fn invalidate_incident(&mut self, incident_id: u64) {
        if self.current_incident() == Some(incident_id) {
            self.invalidate();
        }
    }

    /// Mutable mirror, only when it already belongs to `incident_id`
    pub fn mirror_for_mut(&mut self, incident_id: u64) -> Option<&mut SessionMirror> {
        self.mirror
            .as_mut()
            .filter(|m| m.incident_id == incident_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::StepDefinition;
    use crate::records::{IncidentStatus, StoredSubSteps, SubStepSet};

    fn make_incident(id: u64) -> IncidentRecord {
        IncidentRecord {
            id,
            class: "Fraud".to_string(),
            incident_type: "Phishing".to_string(),
            status: IncidentStatus::InProgress,
            created_at: Utc::now(),
            started_at: Utc::now(),
            ended_at: None,
            improvements: None,
            observations: Some("Users reported quickly".to_string()),
            step_plan: vec![
                StepDefinition::new("Analyse", &["Headers", "URLs"]),
                StepDefinition::new("Scope", &["Search gateway"]),
                StepDefinition::new("Remediate", &["Purge"]),
            ],
        }
    }

    fn make_step(incident_id: u64, index: usize, evidence: &str) -> StepRecord {
        let mut record = StepRecord::new(incident_id, index);
        record.evidence = evidence.to_string();
        record.sub_steps = SubStepSet::new(["URLs", "Headers"]).into();
        record.attachment_ref = Some(format!("{incident_id}/step_{index}/mail.eml"));
        record
    }

    #[test]
    fn test_rebuild_populates_all_maps() {
        let incident = make_incident(1);
        let steps = vec![make_step(1, 1, "headers saved"), make_step(1, 2, "42 recipients")];
        let mirror = SessionMirror::rebuild(&incident, &steps);

        assert_eq!(mirror.evidence_for(2), Some("42 recipients"));
        assert_eq!(mirror.sub_steps_for(1), ["Headers", "URLs"]);
        assert_eq!(mirror.attachments_for(1), ["1/step_1/mail.eml"]);
        assert_eq!(mirror.observations.as_deref(), Some("Users reported quickly"));
        assert_eq!(mirror.step_titles.len(), 3);
    }

    #[test]
    fn test_malformed_sub_steps_do_not_abort_rebuild() {
        let incident = make_incident(1);
        let mut broken = make_step(1, 3, "purged");
        broken.sub_steps = StoredSubSteps::decode(Some("not json"));
        let steps = vec![make_step(1, 1, "a"), make_step(1, 2, "b"), broken];

        let mirror = SessionMirror::rebuild(&incident, &steps);
        assert!(mirror.sub_steps_for(3).is_empty());
        assert_eq!(mirror.evidence_for(3), Some("purged"));
        assert_eq!(mirror.sub_steps_for(1).len(), 2);
        assert_eq!(mirror.sub_steps_for(2).len(), 2);
    }

    #[test]
    fn test_rebuild_ignores_other_incidents() {
        let incident = make_incident(1);
        let steps = vec![make_step(2, 1, "stale evidence")];
        let mirror = SessionMirror::rebuild(&incident, &steps);
        assert!(mirror.evidence.is_empty());
    }

    #[test]
    fn test_switch_never_merges_previous_state() {
        let mut cache = SessionCache::new();
        cache.switch_to(&make_incident(1), &[make_step(1, 1, "from incident one")]);
        assert_eq!(cache.current_incident(), Some(1));

        let mirror = cache.switch_to(&make_incident(2), &[]);
        assert_eq!(mirror.incident_id, 2);
        assert!(mirror.evidence_for(1).is_none());
    }

    #[test]
    fn test_mirror_for_mut_requires_matching_incident() {
        let mut cache = SessionCache::new();
        cache.switch_to(&make_incident(1), &[]);
        assert!(cache.mirror_for_mut(2).is_none());
        assert!(cache.mirror_for_mut(1).is_some());

        cache.invalidate_incident(2);
        assert_eq!(cache.current_incident(), Some(1));
        cache.invalidate_incident(1);
        assert!(cache.mirror().is_none());
    }

    #[test]
    fn test_record_step_updates_single_entry() {
        let incident = make_incident(1);
        let mut mirror = SessionMirror::rebuild(&incident, &[make_step(1, 1, "old")]);
        mirror.record_step(&incident, &make_step(1, 1, "new"));
        assert_eq!(mirror.evidence_for(1), Some("new"));
        assert_eq!(mirror.evidence.len(), 1);
    }
}

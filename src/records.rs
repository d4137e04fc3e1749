//! Durable incident and step records.
//!
//! Sub-step selections cross the storage boundary as versioned JSON text. The
//! typed side is [`SubStepSet`]; [`StoredSubSteps`] is what a row decodes to,
//! keeping malformed legacy values around instead of failing the read.

use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::catalog::StepDefinition;
use crate::error::{EngineError, EngineResult};

/// Current version tag written into stored sub-step JSON
pub const SUB_STEPS_VERSION: u32 = 1;

/// Incident lifecycle status
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IncidentStatus {
    #[default]
    InProgress,
    Completed,
}

impl IncidentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            IncidentStatus::InProgress => "in_progress",
            IncidentStatus::Completed => "completed",
        }
    }

    /// Parse a stored status string. Older rows used "In Progress"/"Complete".
    pub fn from_stored(s: &str) -> Self {
        match s.trim().to_lowercase().replace(' ', "_").as_str() {
            "completed" | "complete" => IncidentStatus::Completed,
            _ => IncidentStatus::InProgress,
        }
    }
}

impl fmt::Display for IncidentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IncidentStatus::InProgress => write!(f, "In Progress"),
            IncidentStatus::Completed => write!(f, "Completed"),
        }
    }
}

/// One incident's lifecycle metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IncidentRecord {
    pub id: u64,
    pub class: String,
    #[serde(rename = "type")]
    pub incident_type: String,
    pub status: IncidentStatus,
    pub created_at: DateTime<Utc>,
    pub started_at: DateTime<Utc>,
    #[serde(default)]
    pub ended_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub improvements: Option<String>,
    #[serde(default)]
    pub observations: Option<String>,
    /// Step plan captured when the incident was created
    pub step_plan: Vec<StepDefinition>,
}

impl IncidentRecord {
    /// Number of steps in the snapshot (not the live catalog)
    pub fn total_steps(&self) -> usize {
        self.step_plan.len()
    }

    /// Title of a 1-based step, falling back to "Step N"
    pub fn step_title(&self, step_index: usize) -> String {
        step_index
            .checked_sub(1)
            .and_then(|i| self.step_plan.get(i))
            .map(|s| s.title.clone())
            .unwrap_or_else(|| format!("Step {step_index}"))
    }

    pub fn contains_step(&self, step_index: usize) -> bool {
        step_index >= 1 && step_index <= self.total_steps()
    }

    pub fn has_observations(&self) -> bool {
        non_blank(self.observations.as_deref())
    }

    pub fn has_improvements(&self) -> bool {
        non_blank(self.improvements.as_deref())
    }

    /// Both lessons-learned fields are filled in
    pub fn lessons_complete(&self) -> bool {
        self.has_observations() && self.has_improvements()
    }

    pub fn is_completed(&self) -> bool {
        self.status == IncidentStatus::Completed
    }
}

/// Values needed to create an [`IncidentRecord`]; the store assigns the id
#[derive(Debug, Clone)]
pub struct NewIncident {
    pub class: String,
    pub incident_type: String,
    pub step_plan: Vec<StepDefinition>,
    pub started_at: DateTime<Utc>,
}

/// Captured evidence, sub-steps and attachment for one step of one incident
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepRecord {
    pub incident_id: u64,
    /// 1-based position in the incident's step plan
    pub step_index: usize,
    pub evidence: String,
    pub sub_steps: StoredSubSteps,
    #[serde(default)]
    pub attachment_ref: Option<String>,
    /// Set the first time the step becomes done
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    /// Aggregate incident percentage at the last recompute
    #[serde(default)]
    pub percent_complete: u8,
    pub updated_at: DateTime<Utc>,
}

impl StepRecord {
    pub fn new(incident_id: u64, step_index: usize) -> Self {
        Self {
            incident_id,
            step_index,
            evidence: String::new(),
            sub_steps: StoredSubSteps::Parsed(SubStepSet::default()),
            attachment_ref: None,
            completed_at: None,
            percent_complete: 0,
            updated_at: Utc::now(),
        }
    }

    pub fn has_evidence(&self) -> bool {
        !self.evidence.trim().is_empty()
    }

    pub fn has_attachment(&self) -> bool {
        non_blank(self.attachment_ref.as_deref())
    }

    /// Done iff evidence, sub-steps and attachment are all present
    pub fn is_done(&self) -> bool {
        self.has_evidence() && !self.sub_steps.is_empty() && self.has_attachment()
    }

    /// Stamp `completed_at` the first time the record is done
    pub fn stamp_completion(&mut self, now: DateTime<Utc>) {
        if self.completed_at.is_none() && self.is_done() {
            self.completed_at = Some(now);
        }
    }
}

/// Set of sub-step labels marked complete. Order-insensitive, no blanks.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubStepSet(BTreeSet<String>);

impl SubStepSet {
    pub fn new<I, S>(items: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self(
            items
                .into_iter()
                .map(|s| s.as_ref().trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
        )
    }

    /// Accept a raw JSON payload; anything but a list of strings is `InvalidFormat`
    pub fn from_json_value(value: &serde_json::Value) -> EngineResult<Self> {
        let items = value.as_array().ok_or_else(|| {
            EngineError::InvalidFormat("sub-steps must be a list of strings".to_string())
        })?;

        let labels = items
            .iter()
            .map(|item| {
                item.as_str().ok_or_else(|| {
                    EngineError::InvalidFormat(format!("sub-step entry {item} is not a string"))
                })
            })
            .collect::<EngineResult<Vec<_>>>()?;

        Ok(Self::new(labels))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn contains(&self, label: &str) -> bool {
        self.0.contains(label)
    }

    pub fn iter(&self) -> impl Iterator<Item = &String> {
        self.0.iter()
    }

    pub fn to_vec(&self) -> Vec<String> {
        self.0.iter().cloned().collect()
    }

    /// Labels ordered by the plan's sub-step order, unknown labels last
    pub fn ordered_by(&self, plan: &[String]) -> Vec<String> {
        let mut ordered: Vec<String> = plan
            .iter()
            .filter(|label| self.contains(label))
            .cloned()
            .collect();
        ordered.extend(self.0.iter().filter(|l| !plan.contains(l)).cloned());
        ordered
    }
}

/// Wire form of stored sub-steps
#[derive(Deserialize)]
#[serde(untagged)]
enum SubStepsWire {
    Versioned { v: u32, items: Vec<String> },
    Legacy(Vec<String>),
}

#[derive(Serialize)]
struct SubStepsOut<'a> {
    v: u32,
    items: Vec<&'a String>,
}

/// Sub-step column as decoded from storage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", content = "value", rename_all = "snake_case")]
pub enum StoredSubSteps {
    Parsed(SubStepSet),
    /// The stored text could not be decoded; kept verbatim for diagnostics
    Malformed(String),
}

impl StoredSubSteps {
    /// Decode a stored column value. NULL and empty text decode to an empty set.
    pub fn decode(raw: Option<&str>) -> Self {
        let raw = match raw.map(str::trim) {
            None | Some("") => return StoredSubSteps::Parsed(SubStepSet::default()),
            Some(raw) => raw,
        };

        match serde_json::from_str::<SubStepsWire>(raw) {
            Ok(SubStepsWire::Versioned { v, items }) if v == SUB_STEPS_VERSION => {
                StoredSubSteps::Parsed(SubStepSet::new(items))
            }
            Ok(SubStepsWire::Legacy(items)) => StoredSubSteps::Parsed(SubStepSet::new(items)),
            _ => StoredSubSteps::Malformed(raw.to_string()),
        }
    }

    /// Encode a set into the current versioned form
    pub fn encode(set: &SubStepSet) -> String {
        let out = SubStepsOut {
            v: SUB_STEPS_VERSION,
            items: set.iter().collect(),
        };
        serde_json::to_string(&out).unwrap_or_else(|_| "[]".to_string())
    }

    /// Text to write back to storage. Malformed values are preserved as-is.
    pub fn to_stored(&self) -> String {
        match self {
            StoredSubSteps::Parsed(set) => Self::encode(set),
            StoredSubSteps::Malformed(raw) => raw.clone(),
        }
    }

    pub fn as_set(&self) -> Option<&SubStepSet> {
        match self {
            StoredSubSteps::Parsed(set) => Some(set),
            StoredSubSteps::Malformed(_) => None,
        }
    }

    /// Parsed set, or empty for malformed values
    pub fn set_or_empty(&self) -> SubStepSet {
        self.as_set().cloned().unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.as_set().map_or(true, SubStepSet::is_empty)
    }

    pub fn is_malformed(&self) -> bool {
        matches!(self, StoredSubSteps::Malformed(_))
    }
}

impl From<SubStepSet> for StoredSubSteps {
    fn from(set: SubStepSet) -> Self {
        StoredSubSteps::Parsed(set)
    }
}

fn non_blank(value: Option<&str>) -> bool {
    value.is_some_and(|v| !v.trim().is_empty())
}

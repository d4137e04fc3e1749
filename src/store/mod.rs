//! Durable storage for incident and step records.
//!
//! The engine talks to storage through [`IncidentStore`] so the SQLite
//! implementation can be swapped out in tests or for another backend.

mod sqlite;

pub use sqlite::SqliteStore;

use thiserror::Error;

use crate::records::{IncidentRecord, NewIncident, StepRecord};

/// Errors raised by a store implementation
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("failed to encode stored value: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("failed to prepare database location: {0}")]
    Io(#[from] std::io::Error),

    #[error("database connection lock poisoned")]
    Poisoned,

    #[error("incident {0} does not exist")]
    MissingIncident(u64),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// A set of writes applied atomically.
///
/// Every field is optional; whatever is present is written inside one
/// transaction so a step update and the incident status it triggers are never
/// observed separately.
#[derive(Debug, Default, Clone, Copy)]
pub struct IncidentWrite<'a> {
    pub incident: Option<&'a IncidentRecord>,
    pub step: Option<&'a StepRecord>,
    /// Aggregate percentage copied onto every step row of the incident
    pub percent: Option<(u64, u8)>,
}

impl<'a> IncidentWrite<'a> {
    pub fn incident(mut self, incident: &'a IncidentRecord) -> Self {
        self.incident = Some(incident);
        self
    }

    pub fn step(mut self, step: &'a StepRecord) -> Self {
        self.step = Some(step);
        self
    }

    pub fn percent(mut self, incident_id: u64, percent: u8) -> Self {
        self.percent = Some((incident_id, percent));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.incident.is_none() && self.step.is_none() && self.percent.is_none()
    }
}

/// Storage operations the engine relies on
pub trait IncidentStore: Send + Sync {
    /// Insert a new incident and return it with its assigned id
    fn create_incident(&self, new: NewIncident) -> StoreResult<IncidentRecord>;

    fn get_incident(&self, id: u64) -> StoreResult<Option<IncidentRecord>>;

    /// All incidents, most recently started first
    fn list_incidents(&self) -> StoreResult<Vec<IncidentRecord>>;

    /// Remove an incident and its steps. Returns false when nothing was deleted.
    fn delete_incident(&self, id: u64) -> StoreResult<bool>;

    fn get_step(&self, incident_id: u64, step_index: usize) -> StoreResult<Option<StepRecord>>;

    /// Steps of one incident ordered by index
    fn list_steps(&self, incident_id: u64) -> StoreResult<Vec<StepRecord>>;

    /// Apply a batch of writes in one transaction
    fn apply(&self, write: IncidentWrite<'_>) -> StoreResult<()>;

    fn update_incident(&self, incident: &IncidentRecord) -> StoreResult<()> {
        self.apply(IncidentWrite::default().incident(incident))
    }

    /// Insert or replace the record for `(incident_id, step_index)`
    fn upsert_step(&self, step: &StepRecord) -> StoreResult<()> {
        self.apply(IncidentWrite::default().step(step))
    }
}

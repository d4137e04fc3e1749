//! SQLite-backed incident store

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, Row};
use tracing::{debug, info, warn};

use super::{IncidentStore, IncidentWrite, StoreError, StoreResult};
use crate::catalog::StepDefinition;
use crate::records::{IncidentRecord, IncidentStatus, NewIncident, StepRecord, StoredSubSteps};

const SCHEMA: &str = "
PRAGMA foreign_keys = ON;

CREATE TABLE IF NOT EXISTS incident (
    id              INTEGER PRIMARY KEY AUTOINCREMENT,
    incident_class  TEXT NOT NULL,
    incident_type   TEXT NOT NULL,
    status          TEXT NOT NULL DEFAULT 'in_progress',
    step_plan       TEXT NOT NULL DEFAULT '[]',
    improvements    TEXT,
    observations    TEXT,
    created_at      TEXT NOT NULL,
    started_at      TEXT NOT NULL,
    ended_at        TEXT
);

CREATE INDEX IF NOT EXISTS idx_incident_started ON incident(started_at);

CREATE TABLE IF NOT EXISTS incident_step (
    id                INTEGER PRIMARY KEY AUTOINCREMENT,
    incident_id       INTEGER NOT NULL REFERENCES incident(id) ON DELETE CASCADE,
    step_index        INTEGER NOT NULL,
    evidence          TEXT NOT NULL DEFAULT '',
    sub_steps         TEXT,
    attachment_ref    TEXT,
    percent_complete  INTEGER NOT NULL DEFAULT 0,
    completed_at      TEXT,
    updated_at        TEXT NOT NULL,
    UNIQUE(incident_id, step_index)
);
";

const INCIDENT_COLUMNS: &str = "id, incident_class, incident_type, status, step_plan, \
     improvements, observations, created_at, started_at, ended_at";

const STEP_COLUMNS: &str = "incident_id, step_index, evidence, sub_steps, attachment_ref, \
     percent_complete, completed_at, updated_at";

const UPSERT_STEP: &str = "
INSERT INTO incident_step (
    incident_id, step_index, evidence, sub_steps, attachment_ref,
    percent_complete, completed_at, updated_at
) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
ON CONFLICT(incident_id, step_index) DO UPDATE SET
    evidence = excluded.evidence,
    sub_steps = excluded.sub_steps,
    attachment_ref = excluded.attachment_ref,
    percent_complete = excluded.percent_complete,
    completed_at = excluded.completed_at,
    updated_at = excluded.updated_at
";

/// Incident store over a single SQLite connection
pub struct SqliteStore {
    conn: Mutex<Connection>,
    path: Option<PathBuf>,
}

impl SqliteStore {
    /// Open (or create) the database file, creating parent directories as needed
    pub fn open(path: &Path) -> StoreResult<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        let store = Self::init(conn, Some(path.to_path_buf()))?;
        info!("Opened incident database at {}", path.display());
        Ok(store)
    }

    /// Private in-memory database, mostly for tests
    pub fn open_in_memory() -> StoreResult<Self> {
        Self::init(Connection::open_in_memory()?, None)
    }

    fn init(conn: Connection, path: Option<PathBuf>) -> StoreResult<Self> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
            path,
        })
    }

    /// Database file, `None` for in-memory stores
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn conn(&self) -> StoreResult<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| StoreError::Poisoned)
    }
}

fn incident_from_row(row: &Row<'_>) -> rusqlite::Result<IncidentRecord> {
    let id: i64 = row.get(0)?;
    let status: String = row.get(3)?;
    let plan: String = row.get(4)?;

    Ok(IncidentRecord {
        id: id as u64,
        class: row.get(1)?,
        incident_type: row.get(2)?,
        status: IncidentStatus::from_stored(&status),
        step_plan: decode_plan(id, &plan),
        improvements: row.get(5)?,
        observations: row.get(6)?,
        created_at: row.get(7)?,
        started_at: row.get(8)?,
        ended_at: row.get(9)?,
    })
}

fn step_from_row(row: &Row<'_>) -> rusqlite::Result<StepRecord> {
    let incident_id: i64 = row.get(0)?;
    let step_index: i64 = row.get(1)?;
    let sub_steps: Option<String> = row.get(3)?;
    let percent: i64 = row.get(5)?;

    let decoded = StoredSubSteps::decode(sub_steps.as_deref());
    if decoded.is_malformed() {
        warn!(
            incident_id,
            step_index, "Stored sub-steps could not be decoded, treating as empty"
        );
    }

    Ok(StepRecord {
        incident_id: incident_id as u64,
        step_index: step_index as usize,
        evidence: row.get::<_, Option<String>>(2)?.unwrap_or_default(),
        sub_steps: decoded,
        attachment_ref: row.get(4)?,
        percent_complete: percent.clamp(0, 100) as u8,
        completed_at: row.get(6)?,
        updated_at: row.get(7)?,
    })
}

fn decode_plan(incident_id: i64, raw: &str) -> Vec<StepDefinition> {
    match serde_json::from_str(raw) {
        Ok(plan) => plan,
        Err(e) => {
            warn!(incident_id, "Stored step plan is malformed: {}", e);
            Vec::new()
        }
    }
}

impl IncidentStore for SqliteStore {
    fn create_incident(&self, new: NewIncident) -> StoreResult<IncidentRecord> {
        let plan = serde_json::to_string(&new.step_plan)?;
        let created_at = Utc::now();
        let status = IncidentStatus::InProgress;

        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO incident (incident_class, incident_type, status, step_plan, created_at, started_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                new.class,
                new.incident_type,
                status.as_str(),
                plan,
                created_at,
                new.started_at
            ],
        )?;
        let id = conn.last_insert_rowid() as u64;
        debug!(incident_id = id, class = %new.class, "Created incident");

        Ok(IncidentRecord {
            id,
            class: new.class,
            incident_type: new.incident_type,
            status,
            created_at,
            started_at: new.started_at,
            ended_at: None,
            improvements: None,
            observations: None,
            step_plan: new.step_plan,
        })
    }

    fn get_incident(&self, id: u64) -> StoreResult<Option<IncidentRecord>> {
        let conn = self.conn()?;
        let incident = conn
            .query_row(
                &format!("SELECT {INCIDENT_COLUMNS} FROM incident WHERE id = ?1"),
                params![id as i64],
                incident_from_row,
            )
            .optional()?;
        Ok(incident)
    }

    fn list_incidents(&self) -> StoreResult<Vec<IncidentRecord>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {INCIDENT_COLUMNS} FROM incident ORDER BY started_at DESC, id DESC"
        ))?;
        let rows = stmt.query_map([], incident_from_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    fn delete_incident(&self, id: u64) -> StoreResult<bool> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        tx.execute(
            "DELETE FROM incident_step WHERE incident_id = ?1",
            params![id as i64],
        )?;
        let deleted = tx.execute("DELETE FROM incident WHERE id = ?1", params![id as i64])?;
        tx.commit()?;
        Ok(deleted > 0)
    }

    fn get_step(&self, incident_id: u64, step_index: usize) -> StoreResult<Option<StepRecord>> {
        let conn = self.conn()?;
        let step = conn
            .query_row(
                &format!(
                    "SELECT {STEP_COLUMNS} FROM incident_step WHERE incident_id = ?1 AND step_index = ?2"
                ),
                params![incident_id as i64, step_index as i64],
                step_from_row,
            )
            .optional()?;
        Ok(step)
    }

    fn list_steps(&self, incident_id: u64) -> StoreResult<Vec<StepRecord>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {STEP_COLUMNS} FROM incident_step WHERE incident_id = ?1 ORDER BY step_index"
        ))?;
        let rows = stmt.query_map(params![incident_id as i64], step_from_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    fn apply(&self, write: IncidentWrite<'_>) -> StoreResult<()> {
        if write.is_empty() {
            return Ok(());
        }

        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        if let Some(step) = write.step {
            tx.execute(
                UPSERT_STEP,
                params![
                    step.incident_id as i64,
                    step.step_index as i64,
                    step.evidence,
                    step.sub_steps.to_stored(),
                    step.attachment_ref,
                    i64::from(step.percent_complete),
                    step.completed_at,
                    step.updated_at
                ],
            )?;
        }

        if let Some((incident_id, percent)) = write.percent {
            tx.execute(
                "UPDATE incident_step SET percent_complete = ?2 WHERE incident_id = ?1",
                params![incident_id as i64, i64::from(percent)],
            )?;
        }

        if let Some(incident) = write.incident {
            let plan = serde_json::to_string(&incident.step_plan)?;
            let updated = tx.execute(
                "UPDATE incident SET
                    incident_class = ?2, incident_type = ?3, status = ?4, step_plan = ?5,
                    improvements = ?6, observations = ?7, started_at = ?8, ended_at = ?9
                 WHERE id = ?1",
                params![
                    incident.id as i64,
                    incident.class,
                    incident.incident_type,
                    incident.status.as_str(),
                    plan,
                    incident.improvements,
                    incident.observations,
                    incident.started_at,
                    incident.ended_at
                ],
            )?;
            if updated == 0 {
                // dropping the transaction rolls back the step write above
                return Err(StoreError::MissingIncident(incident.id));
            }
        }

        tx.commit()?;
        Ok(())
    }
}

use crate::core::db;
use crate::core::error;
use crate::core::schemas;
use crate::core::time;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// The DB Broker is the single access path for state.
/// It serializes connections in-process and appends one audit event per operation.
pub struct DbBroker {
    audit_log_path: PathBuf,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct BrokerEvent {
    pub ts: String,
    pub event_id: String,
    pub actor: String,
    pub op: String,
    pub db_id: String,
    pub status: String,
}

impl DbBroker {
    pub fn new(root: &Path) -> Self {
        Self {
            audit_log_path: audit_log_path(root),
        }
    }

    /// Execute a closure with a serialized connection to the specified DB.
    pub fn with_conn<F, R>(
        &self,
        db_path: &Path,
        actor: &str,
        op_name: &str,
        f: F,
    ) -> Result<R, error::ProspectusError>
    where
        F: FnOnce(&Connection) -> Result<R, error::ProspectusError>,
    {
        static DB_LOCK: Mutex<()> = Mutex::new(());
        let _lock = DB_LOCK.lock().unwrap_or_else(|poisoned| poisoned.into_inner());

        let db_id = db_path
            .file_name()
            .unwrap_or_default()
            .to_string_lossy()
            .to_string();
        if let Some(parent) = db_path.parent() {
            fs::create_dir_all(parent).map_err(error::ProspectusError::IoError)?;
        }
        let conn = db::db_connect(&db_path.to_string_lossy())?;

        let result = f(&conn);

        let status = if result.is_ok() { "success" } else { "error" };
        self.log_event(actor, op_name, &db_id, status)?;

        result
    }

    fn log_event(
        &self,
        actor: &str,
        op: &str,
        db_id: &str,
        status: &str,
    ) -> Result<(), error::ProspectusError> {
        let ev = BrokerEvent {
            ts: time::now_epoch_z(),
            event_id: time::new_event_id(),
            actor: actor.to_string(),
            op: op.to_string(),
            db_id: db_id.to_string(),
            status: status.to_string(),
        };

        if let Some(parent) = self.audit_log_path.parent() {
            fs::create_dir_all(parent).map_err(error::ProspectusError::IoError)?;
        }
        let mut f = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.audit_log_path)
            .map_err(error::ProspectusError::IoError)?;

        writeln!(f, "{}", serde_json::to_string(&ev)?).map_err(error::ProspectusError::IoError)?;
        Ok(())
    }
}

pub fn audit_log_path(root: &Path) -> PathBuf {
    root.join(schemas::BROKER_EVENTS_NAME)
}

/// Read the audit log, newest last. `op_prefix` filters by operation (e.g. `versions.`).
pub fn read_audit_log(
    root: &Path,
    op_prefix: Option<&str>,
    limit: Option<usize>,
) -> Result<Vec<BrokerEvent>, error::ProspectusError> {
    let path = audit_log_path(root);
    if !path.exists() {
        return Ok(Vec::new());
    }
    let f = fs::File::open(&path).map_err(error::ProspectusError::IoError)?;
    let mut events = Vec::new();
    for line in BufReader::new(f).lines() {
        let line = line.map_err(error::ProspectusError::IoError)?;
        if line.trim().is_empty() {
            continue;
        }
        let ev: BrokerEvent = serde_json::from_str(&line)?;
        if op_prefix.is_none_or(|p| ev.op.starts_with(p)) {
            events.push(ev);
        }
    }
    if let Some(n) = limit {
        let skip = events.len().saturating_sub(n);
        events.drain(..skip);
    }
    Ok(events)
}

pub fn schema() -> serde_json::Value {
    serde_json::json!({
        "name": "broker",
        "version": "0.1.0",
        "description": "Serialized state access with an append-only audit log",
        "commands": [
            { "name": "audit", "description": "Show the state access audit log" }
        ],
        "storage": [schemas::BROKER_EVENTS_NAME]
    })
}

use crate::core::db;
use crate::core::error;
use crate::core::time;
use rusqlite::{Connection, TransactionBehavior};
use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

pub const AUDIT_LOG_NAME: &str = "broker.events.jsonl";

/// The DB Broker is the single gateway to the forms database.
///
/// Reads get a fresh connection. Writes run inside one IMMEDIATE transaction so a
/// read-current, patch, write sequence sees no interleaved writer, and each write
/// appends a `BrokerEvent` to the audit log. Row-level consistency is left to
/// SQLite; the broker holds no in-process lock.
pub struct DbBroker {
    db_path: PathBuf,
    audit_log_path: PathBuf,
    busy_timeout_secs: u64,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct BrokerEvent {
    pub ts: String,
    pub event_id: String,
    pub actor: String,
    pub op: String,
    pub db_id: String,
    pub status: String,
}

impl DbBroker {
    pub fn new(root: &Path, db_path: &Path, busy_timeout_secs: u64) -> Self {
        Self {
            db_path: db_path.to_path_buf(),
            audit_log_path: root.join(AUDIT_LOG_NAME),
            busy_timeout_secs,
        }
    }

    pub fn audit_log_path(&self) -> &Path {
        &self.audit_log_path
    }

    /// Execute a closure with a plain read connection.
    pub fn with_read<F, R>(&self, op_name: &str, f: F) -> Result<R, error::FormkitError>
    where
        F: FnOnce(&Connection) -> Result<R, error::FormkitError>,
    {
        let conn = db::db_connect(&self.db_path.to_string_lossy(), self.busy_timeout_secs)?;
        tracing::trace!(op = op_name, "broker read");
        f(&conn)
    }

    /// Execute a closure inside a write transaction. Commits on `Ok`, rolls back on `Err`.
    pub fn with_write<F, R>(&self, actor: &str, op_name: &str, f: F) -> Result<R, error::FormkitError>
    where
        F: FnOnce(&Connection) -> Result<R, error::FormkitError>,
    {
        let mut conn = db::db_connect(&self.db_path.to_string_lossy(), self.busy_timeout_secs)?;

        let result = (|| -> Result<R, error::FormkitError> {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let value = f(&tx)?;
            tx.commit()?;
            Ok(value)
        })();

        let status = if result.is_ok() { "success" } else { "error" };
        self.log_event(actor, op_name, status);

        result
    }

    fn log_event(&self, actor: &str, op: &str, status: &str) {
        let db_id = self
            .db_path
            .file_name()
            .unwrap_or_default()
            .to_string_lossy()
            .to_string();

        let ev = BrokerEvent {
            ts: time::now_rfc3339(),
            event_id: time::new_id(),
            actor: actor.to_string(),
            op: op.to_string(),
            db_id,
            status: status.to_string(),
        };

        // The mutation already committed or rolled back; a lost audit line must not
        // turn into a store error for the caller.
        if let Err(e) = self.append_event(&ev) {
            tracing::warn!(op, error = %e, "failed to append broker audit event");
        }
        tracing::debug!(op, actor, status, "broker write");
    }

    fn append_event(&self, ev: &BrokerEvent) -> Result<(), error::FormkitError> {
        let mut f = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.audit_log_path)?;
        writeln!(f, "{}", serde_json::to_string(ev)?)?;
        Ok(())
    }
}

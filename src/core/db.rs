use crate::core::error;
use crate::core::schemas;
use rusqlite::Connection;
use std::fs;
use std::path::Path;
use std::time::Duration;

pub fn db_connect(db_path: &str, busy_timeout_secs: u64) -> Result<Connection, error::FormkitError> {
    let conn = Connection::open(db_path)?;
    conn.busy_timeout(Duration::from_secs(busy_timeout_secs))?;
    conn.query_row("PRAGMA journal_mode=WAL;", [], |_| Ok(()))?;
    conn.execute("PRAGMA foreign_keys=ON;", [])?;
    Ok(conn)
}

/// Create the database file and every table. Safe to call repeatedly.
pub fn initialize_forms_db(db_path: &Path, busy_timeout_secs: u64) -> Result<(), error::FormkitError> {
    if let Some(parent_dir) = db_path.parent() {
        fs::create_dir_all(parent_dir)?;
    }

    let conn = db_connect(&db_path.to_string_lossy(), busy_timeout_secs)?;
    for statement in schemas::FORMS_DB_SCHEMA {
        conn.execute_batch(statement)?;
    }

    tracing::debug!(db = %db_path.display(), "forms database initialized");
    Ok(())
}

use rusqlite;
use std::io;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum FormkitError {
    #[error("SQLite error: {0}")]
    RusqliteError(#[from] rusqlite::Error),
    #[error("I/O error: {0}")]
    IoError(#[from] io::Error),
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
    #[error("Configuration error: {0}")]
    ConfigError(String),
    #[error("Validation error: {}", .0.join("; "))]
    ValidationError(Vec<String>),
    #[error("Not found: {0}")]
    NotFound(String),
}

impl FormkitError {
    /// Single-failure validation error.
    pub fn validation(msg: impl Into<String>) -> Self {
        FormkitError::ValidationError(vec![msg.into()])
    }

    /// Collected validation failures, if this is a validation error.
    pub fn failures(&self) -> &[String] {
        match self {
            FormkitError::ValidationError(failures) => failures,
            _ => &[],
        }
    }
}

/// Turns a list of collected failures into `Ok(())` or one error carrying all of them.
pub fn check_failures(failures: Vec<String>) -> Result<(), FormkitError> {
    if failures.is_empty() {
        Ok(())
    } else {
        Err(FormkitError::ValidationError(failures))
    }
}

//! Store configuration loaded from `<root>/formkit.toml`.
//!
//! Every field has a default, so a missing file or a partial file is fine:
//!
//! ```toml
//! [database]
//! file_name = "forms.db"
//!
//! [cache.stats]
//! max_size = 20
//! ttl_secs = 600
//! ```

use crate::core::error::FormkitError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const CONFIG_FILE_NAME: &str = "formkit.toml";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FormkitConfig {
    pub database: DatabaseConfig,
    pub cache: CacheConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub file_name: String,
    pub busy_timeout_secs: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            file_name: "forms.db".to_string(),
            busy_timeout_secs: 5,
        }
    }
}

/// Size and freshness bounds for one sub-cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachePolicy {
    pub max_size: usize,
    pub ttl_secs: u64,
}

impl CachePolicy {
    pub const fn new(max_size: usize, ttl_secs: u64) -> Self {
        Self { max_size, ttl_secs }
    }

    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

/// Stats tolerate minutes of staleness, definitions only seconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub forms: CachePolicy,
    pub questions: CachePolicy,
    pub stats: CachePolicy,
    pub submissions: CachePolicy,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            forms: CachePolicy::new(100, 60),
            questions: CachePolicy::new(500, 60),
            stats: CachePolicy::new(50, 300),
            submissions: CachePolicy::new(1000, 120),
        }
    }
}

pub fn config_path(root: &Path) -> PathBuf {
    root.join(CONFIG_FILE_NAME)
}

/// Load `formkit.toml` from the store root. No file means defaults.
pub fn load_config(root: &Path) -> Result<FormkitConfig, FormkitError> {
    let path = config_path(root);
    if !path.exists() {
        return Ok(FormkitConfig::default());
    }
    let content = fs::read_to_string(&path)?;
    parse_config(&content)
}

pub fn parse_config(content: &str) -> Result<FormkitConfig, FormkitError> {
    let config: FormkitConfig =
        toml::from_str(content).map_err(|e| FormkitError::ConfigError(e.to_string()))?;
    if config.database.file_name.trim().is_empty() {
        return Err(FormkitError::ConfigError(
            "database.file_name must not be empty".to_string(),
        ));
    }
    Ok(config)
}

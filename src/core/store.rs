//! Store handle for a forms workspace.
//!
//! A `Store` bundles the workspace root, its configuration, and the one cache
//! instance shared by every consumer. The cache is passed in explicitly so a host
//! can share it between handles or tear it down with [`FormCache::clear`].

use crate::core::broker::DbBroker;
use crate::core::cache::FormCache;
use crate::core::config::{self, FormkitConfig};
use crate::core::db;
use crate::core::error::FormkitError;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Actor recorded in the audit log when the caller does not name one.
pub const DEFAULT_ACTOR: &str = "formkit";

#[derive(Clone)]
pub struct Store {
    /// Absolute path to the workspace directory
    pub root: PathBuf,
    pub config: FormkitConfig,
    pub cache: Arc<FormCache>,
}

impl Store {
    /// Load `formkit.toml` from `root`, create the database, and build a fresh cache.
    pub fn open(root: &Path) -> Result<Self, FormkitError> {
        let config = config::load_config(root)?;
        let cache = Arc::new(FormCache::from_config(&config.cache));
        Self::with_cache(root, config, cache)
    }

    /// Open with an existing cache instance.
    pub fn with_cache(
        root: &Path,
        config: FormkitConfig,
        cache: Arc<FormCache>,
    ) -> Result<Self, FormkitError> {
        let store = Self {
            root: root.to_path_buf(),
            config,
            cache,
        };
        db::initialize_forms_db(&store.db_path(), store.config.database.busy_timeout_secs)?;
        Ok(store)
    }

    pub fn db_path(&self) -> PathBuf {
        self.root.join(&self.config.database.file_name)
    }

    pub fn broker(&self) -> DbBroker {
        DbBroker::new(
            &self.root,
            &self.db_path(),
            self.config.database.busy_timeout_secs,
        )
    }
}

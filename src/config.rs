//! Engine configuration.
//!
//! Filled by the surrounding system (or the `file-history` binary from its
//! command line). Every field has a default so a partial document
//! deserializes.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::git::cache::DEFAULT_MAX_ENTRIES_PER_FILE;
use crate::git::graph::LoadOptions;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct EngineConfig {
    /// Directory holding the persisted commit-history cache. `None` keeps the
    /// cache in memory only.
    pub cache_dir: Option<PathBuf>,
    /// Consult and fill the commit-history cache at all.
    pub use_cache: bool,
    /// Entries kept per file when the cache is saved.
    pub max_entries_per_file: usize,
    /// Revision used when a query does not name one.
    pub default_revision: String,
    /// Load graphs with missing parents instead of failing.
    pub allow_incomplete_history: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            cache_dir: None,
            use_cache: true,
            max_entries_per_file: DEFAULT_MAX_ENTRIES_PER_FILE,
            default_revision: "HEAD".to_string(),
            allow_incomplete_history: false,
        }
    }
}

impl EngineConfig {
    pub fn with_cache_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cache_dir = Some(dir.into());
        self
    }

    pub fn without_cache(mut self) -> Self {
        self.use_cache = false;
        self
    }

    pub fn load_options(&self) -> LoadOptions {
        LoadOptions {
            allow_incomplete_history: self.allow_incomplete_history,
        }
    }
}

//! Response bodies for the history endpoints.
//!
//! - `HistoryResponse`: resolved history of one file (GET /api/v1/history)
//! - `RepositoryInfo`: repository identity plus engine statistics
//! - `EngineStats`: what the engine currently holds in memory
//! - `SaveResponse`: whether a cache save wrote anything

use serde::{Deserialize, Serialize};

use super::CommitInfo;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryResponse {
    pub path: String,
    pub revision: String,
    pub commits: Vec<CommitInfo>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct EngineStats {
    pub graphs_loaded: usize,
    pub commits: usize,
    pub trees: usize,
    pub tree_key_collisions: usize,
    pub path_segments: usize,
    pub cached_files: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepositoryInfo {
    pub path: String,
    pub identity: String,
    pub head: Option<String>,
    pub cache_file: Option<String>,
    pub stats: EngineStats,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SaveResponse {
    pub written: bool,
}

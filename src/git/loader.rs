//! Commit loader: the engine's entry point.
//!
//! Owns one repository's accessor, interner, tree cache, loaded commit graphs
//! and commit-history cache, and exposes history queries over them.
//! - Graphs are memoized per resolved start commit and loaded at most once;
//!   concurrent queries for a graph still loading block until it is ready
//! - `warm_up` starts a load on a background thread before the first query
//! - `save` writes the history cache only when it changed
//!
//! Used by: the `file-history` binary (log, serve) and any embedding build
//! system.

use parking_lot::Mutex;
use rayon::prelude::*;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};

use crate::config::EngineConfig;
use crate::error::{HistoryError, Result};
use crate::git::cache::{self, CommitHistoryCache};
use crate::git::graph::{CommitGraph, CommitIndex, CommitRecord};
use crate::git::history::{normalize_path, HistoryResolver};
use crate::git::interner::PathInterner;
use crate::git::repository::{GitRepository, ObjectId};
use crate::git::tree::TreeCache;
use crate::models::{CommitInfo, EngineStats, RepositoryInfo};

type GraphSlot = Arc<OnceLock<Result<Arc<CommitGraph>>>>;

pub struct CommitLoader {
    repo: Arc<GitRepository>,
    config: EngineConfig,
    trees: TreeCache,
    graphs: Mutex<HashMap<ObjectId, GraphSlot>>,
    cache: Option<CommitHistoryCache>,
    cache_path: Option<PathBuf>,
}

impl CommitLoader {
    /// Open the repository at `path` and load its persisted history cache.
    ///
    /// A corrupt cache file is logged and replaced on the next save.
    pub fn open<P: AsRef<Path>>(path: P, config: EngineConfig) -> Result<Self> {
        let repo = Arc::new(GitRepository::open(path)?);
        let interner = Arc::new(PathInterner::new());
        let trees = TreeCache::new(Arc::clone(&repo), interner);

        let cache_path = match (&config.cache_dir, config.use_cache) {
            (Some(dir), true) => Some(cache::cache_path(dir, &repo.identity())),
            _ => None,
        };

        let cache = if config.use_cache {
            let cap = config.max_entries_per_file;
            let loaded = match &cache_path {
                Some(path) => match CommitHistoryCache::load(path, cap) {
                    Ok(cache) => cache,
                    Err(e @ HistoryError::CacheCorrupt { .. }) => {
                        tracing::warn!("{}; starting with an empty cache", e);
                        let cache = CommitHistoryCache::new(cap);
                        cache.mark_dirty();
                        cache
                    }
                    Err(e) => return Err(e),
                },
                None => CommitHistoryCache::new(cap),
            };
            Some(loaded)
        } else {
            None
        };

        Ok(Self {
            repo,
            config,
            trees,
            graphs: Mutex::new(HashMap::new()),
            cache,
            cache_path,
        })
    }

    pub fn repository(&self) -> &GitRepository {
        &self.repo
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn cache_path(&self) -> Option<&Path> {
        self.cache_path.as_deref()
    }

    /// Start loading the graph for `revision` in the background. Returns as
    /// soon as the load is scheduled; queries for the same revision wait for
    /// it instead of loading again.
    pub fn warm_up(&self, revision: Option<&str>) -> Result<()> {
        let revision = self.revision(revision).to_string();
        let start = self.repo.resolve_revision(&revision)?;
        let slot = self.slot(start);
        if slot.get().is_some() {
            return Ok(());
        }

        let repo = Arc::clone(&self.repo);
        let options = self.config.load_options();
        std::thread::Builder::new()
            .name("commit-graph-warmup".to_string())
            .spawn(move || {
                let loaded = slot.get_or_init(|| {
                    CommitGraph::load_from(&repo, start, &revision, options).map(Arc::new)
                });
                if let Err(e) = loaded {
                    tracing::warn!("Background commit graph load failed: {}", e);
                }
            })
            .map_err(|e| HistoryError::Internal(format!("failed to spawn warm-up thread: {}", e)))?;

        tracing::debug!("Scheduled commit graph warm-up for {}", start);
        Ok(())
    }

    /// The commit graph for `revision`, loading it if no load has started.
    pub fn graph(&self, revision: Option<&str>) -> Result<Arc<CommitGraph>> {
        let revision = self.revision(revision);
        let start = self.repo.resolve_revision(revision)?;
        let slot = self.slot(start);
        slot.get_or_init(|| {
            CommitGraph::load_from(&self.repo, start, revision, self.config.load_options())
                .map(Arc::new)
        })
        .clone()
    }

    /// Commits that changed `path` at `revision`, most recent first.
    pub fn get_history(&self, path: &str, revision: Option<&str>) -> Result<Vec<CommitInfo>> {
        let path = normalize_path(path)?;
        let graph = self.graph(revision)?;
        let history = self.resolve(&graph, &path)?;
        Ok(history.iter().map(|&i| commit_to_info(&graph, i)).collect())
    }

    /// Resolve many files against one graph in parallel. Results are in input
    /// order; a failure for one file does not affect the others.
    pub fn get_histories(
        &self,
        paths: &[String],
        revision: Option<&str>,
    ) -> Result<Vec<Result<Vec<CommitInfo>>>> {
        let graph = self.graph(revision)?;
        Ok(paths
            .par_iter()
            .map(|path| -> Result<Vec<CommitInfo>> {
                let path = normalize_path(path)?;
                let history = self.resolve(&graph, &path)?;
                Ok(history.iter().map(|&i| commit_to_info(&graph, i)).collect())
            })
            .collect())
    }

    /// Persist the history cache if it changed. Returns whether a file was
    /// written.
    pub fn save(&self) -> Result<bool> {
        match (&self.cache, &self.cache_path) {
            (Some(cache), Some(path)) => cache.save(path),
            _ => Ok(false),
        }
    }

    pub fn stats(&self) -> EngineStats {
        let graphs: Vec<Arc<CommitGraph>> = self
            .graphs
            .lock()
            .values()
            .filter_map(|slot| slot.get().and_then(|r| r.as_ref().ok()).cloned())
            .collect();

        EngineStats {
            graphs_loaded: graphs.len(),
            commits: graphs.iter().map(|g| g.len()).sum(),
            trees: self.trees.len(),
            tree_key_collisions: self.trees.collisions(),
            path_segments: self.trees.interner().len(),
            cached_files: self.cache.as_ref().map(|c| c.file_count()).unwrap_or(0),
        }
    }

    pub fn info(&self) -> RepositoryInfo {
        RepositoryInfo {
            path: self.repo.path().to_string(),
            identity: self.repo.identity(),
            head: self
                .repo
                .resolve_revision(&self.config.default_revision)
                .ok()
                .map(|id| id.to_string()),
            cache_file: self
                .cache_path
                .as_ref()
                .map(|p| p.to_string_lossy().to_string()),
            stats: self.stats(),
        }
    }

    /// Release the repository's idle native handles. Queries still running
    /// finish with the handles they hold; later queries fail with `Closed`.
    pub fn close(&self) {
        self.repo.close();
    }

    fn revision<'a>(&'a self, revision: Option<&'a str>) -> &'a str {
        revision.unwrap_or(&self.config.default_revision)
    }

    fn slot(&self, start: ObjectId) -> GraphSlot {
        Arc::clone(self.graphs.lock().entry(start).or_default())
    }

    fn resolve(&self, graph: &CommitGraph, path: &str) -> Result<Vec<CommitIndex>> {
        let resolver = HistoryResolver::new(graph, &self.trees);
        match &self.cache {
            Some(cache) => resolver.with_cache(cache).resolve(path),
            None => resolver.resolve(path),
        }
    }
}

pub fn commit_to_info(graph: &CommitGraph, idx: CommitIndex) -> CommitInfo {
    let commit: &CommitRecord = &graph.commits()[idx as usize];
    CommitInfo {
        sha: commit.id.to_string(),
        author_name: graph.author_name(commit).to_string(),
        author_email: graph.author_email(commit).to_string(),
        timestamp: graph.timestamp(commit),
    }
}

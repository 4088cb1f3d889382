//! In-memory commit graph.
//!
//! Loaded once per start commit and read-only afterwards. Commits live in one
//! array in libgit2's topological+time order (children before parents, newest
//! first among unrelated commits); parent links are indices into that array.
//! The order is never re-sorted: it decides tie-breaking for commits with
//! identical timestamps.
//!
//! Loading is three passes:
//! 1. one revision walk collecting ids (when incomplete history is allowed, a
//!    walk that hits a missing commit is redone stepping over missing commits),
//! 2. parallel metadata reads, one pooled native handle per worker,
//! 3. parallel parent resolution through the id → index table.

use chrono::{DateTime, FixedOffset, Offset, Utc};
use lasso::{RodeoReader, Spur, ThreadedRodeo};
use rayon::prelude::*;
use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::time::Instant;

use crate::error::{HistoryError, Result};
use crate::git::repository::{GitRepository, ObjectId, RawCommit};

/// Index of a commit inside its [`CommitGraph`].
pub type CommitIndex = u32;

#[derive(Debug, Clone, Copy, Default)]
pub struct LoadOptions {
    /// Drop parent links that cannot be resolved instead of failing with
    /// `IncompleteHistory`. Commits at the gap then behave as roots.
    pub allow_incomplete_history: bool,
}

#[derive(Debug, Clone)]
pub struct CommitRecord {
    pub id: ObjectId,
    pub tree: ObjectId,
    pub parents: Vec<CommitIndex>,
    author_name: Spur,
    author_email: Spur,
    pub time: i64,
    pub offset_minutes: i32,
}

pub struct CommitGraph {
    start: ObjectId,
    revision: String,
    commits: Vec<CommitRecord>,
    index: HashMap<u64, CommitIndex>,
    /// Commits whose 64-bit key is already taken by another commit.
    spill: HashMap<ObjectId, CommitIndex>,
    people: RodeoReader,
    dropped_parents: usize,
}

impl CommitGraph {
    /// Resolve `revision` and load everything reachable from it.
    pub fn load(repo: &GitRepository, revision: &str, options: LoadOptions) -> Result<Self> {
        let start = repo.resolve_revision(revision)?;
        Self::load_from(repo, start, revision, options)
    }

    /// Load everything reachable from an already-resolved commit.
    pub fn load_from(
        repo: &GitRepository,
        start: ObjectId,
        revision: &str,
        options: LoadOptions,
    ) -> Result<Self> {
        let started = Instant::now();
        let relabel = |e: HistoryError| match e {
            HistoryError::IncompleteHistory {
                repository, detail, ..
            } => HistoryError::IncompleteHistory {
                repository,
                revision: revision.to_string(),
                detail,
            },
            other => other,
        };

        let ids = repo
            .with_handle(|h| {
                if h.is_shallow() && !options.allow_incomplete_history {
                    return Err(HistoryError::IncompleteHistory {
                        repository: repo.path().to_string(),
                        revision: revision.to_string(),
                        detail: "repository is a shallow clone".to_string(),
                    });
                }

                match h.walk_from(start) {
                    Err(HistoryError::IncompleteHistory { detail, .. })
                        if options.allow_incomplete_history =>
                    {
                        let (ids, skipped) = h.walk_lenient(start)?;
                        tracing::warn!(
                            "Revision walk for {} in {} failed ({}); continued past {} missing commit(s)",
                            revision,
                            repo.path(),
                            detail,
                            skipped
                        );
                        Ok(ids)
                    }
                    walked => walked,
                }
            })
            .map_err(relabel)?;

        let raw: Vec<RawCommit> = ids
            .par_iter()
            .map_init(
                || repo.checkout(),
                |handle, id| {
                    let handle = handle.as_ref().map_err(Clone::clone)?;
                    handle.read_commit(*id)
                },
            )
            .collect::<Result<Vec<_>>>()
            .map_err(relabel)?;

        let (index, spill) = build_index(&ids);

        let people: ThreadedRodeo<Spur> = ThreadedRodeo::default();
        let resolved: Vec<(CommitRecord, usize)> = raw
            .into_par_iter()
            .map(|commit| {
                let mut parents = Vec::with_capacity(commit.parents.len());
                let mut missing = 0;
                for parent in &commit.parents {
                    match lookup(&ids, &index, &spill, parent) {
                        Some(idx) => parents.push(idx),
                        None => missing += 1,
                    }
                }
                let record = CommitRecord {
                    id: commit.id,
                    tree: commit.tree,
                    parents,
                    author_name: people.get_or_intern(&commit.author_name),
                    author_email: people.get_or_intern(&commit.author_email),
                    time: commit.time,
                    offset_minutes: commit.offset_minutes,
                };
                (record, missing)
            })
            .collect();

        let dropped_parents: usize = resolved.iter().map(|(_, missing)| missing).sum();
        if dropped_parents > 0 {
            if !options.allow_incomplete_history {
                return Err(HistoryError::IncompleteHistory {
                    repository: repo.path().to_string(),
                    revision: revision.to_string(),
                    detail: format!("{} parent commit(s) missing", dropped_parents),
                });
            }
            tracing::warn!(
                "Loaded incomplete history for {} in {}: dropped {} parent link(s)",
                revision,
                repo.path(),
                dropped_parents
            );
        }

        let commits: Vec<CommitRecord> = resolved.into_iter().map(|(record, _)| record).collect();

        tracing::info!(
            "Commit graph for {} loaded: {} commits in {:?}",
            revision,
            commits.len(),
            started.elapsed()
        );

        Ok(Self {
            start,
            revision: revision.to_string(),
            commits,
            index,
            spill,
            people: people.into_reader(),
            dropped_parents,
        })
    }

    pub fn start(&self) -> ObjectId {
        self.start
    }

    pub fn revision(&self) -> &str {
        &self.revision
    }

    pub fn len(&self) -> usize {
        self.commits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commits.is_empty()
    }

    /// The start commit.
    pub fn head(&self) -> Option<&CommitRecord> {
        self.commits.first()
    }

    pub fn get(&self, idx: CommitIndex) -> Option<&CommitRecord> {
        self.commits.get(idx as usize)
    }

    pub fn commits(&self) -> &[CommitRecord] {
        &self.commits
    }

    /// Index of the commit with this exact id.
    pub fn index_of(&self, id: &ObjectId) -> Option<CommitIndex> {
        match self.index.get(&id.key()) {
            Some(&idx) if self.commits[idx as usize].id == *id => Some(idx),
            _ => self.spill.get(id).copied(),
        }
    }

    /// Index of the commit owning a 64-bit key. Unverifiable: used only where
    /// the full id is unknown, such as persisted cache entries.
    pub fn index_of_key(&self, key: u64) -> Option<CommitIndex> {
        self.index.get(&key).copied()
    }

    pub fn author_name(&self, commit: &CommitRecord) -> &str {
        self.people.resolve(&commit.author_name)
    }

    pub fn author_email(&self, commit: &CommitRecord) -> &str {
        self.people.resolve(&commit.author_email)
    }

    /// Authored time in the author's own UTC offset.
    pub fn timestamp(&self, commit: &CommitRecord) -> DateTime<FixedOffset> {
        let offset = FixedOffset::east_opt(commit.offset_minutes * 60).unwrap_or_else(|| Utc.fix());
        DateTime::<Utc>::from_timestamp(commit.time, 0)
            .unwrap_or_default()
            .with_timezone(&offset)
    }

    /// Parent links dropped because `allow_incomplete_history` was set.
    pub fn dropped_parents(&self) -> usize {
        self.dropped_parents
    }
}

fn build_index(ids: &[ObjectId]) -> (HashMap<u64, CommitIndex>, HashMap<ObjectId, CommitIndex>) {
    let mut index = HashMap::with_capacity(ids.len());
    let mut spill = HashMap::new();

    for (i, id) in ids.iter().enumerate() {
        match index.entry(id.key()) {
            Entry::Vacant(slot) => {
                slot.insert(i as CommitIndex);
            }
            Entry::Occupied(slot) => {
                let other = ids[*slot.get() as usize];
                if other != *id {
                    tracing::warn!("Commit key collision: {} vs {}", id, other);
                    spill.insert(*id, i as CommitIndex);
                }
            }
        }
    }

    (index, spill)
}

fn lookup(
    ids: &[ObjectId],
    index: &HashMap<u64, CommitIndex>,
    spill: &HashMap<ObjectId, CommitIndex>,
    id: &ObjectId,
) -> Option<CommitIndex> {
    match index.get(&id.key()) {
        Some(&idx) if ids[idx as usize] == *id => Some(idx),
        _ => spill.get(id).copied(),
    }
}

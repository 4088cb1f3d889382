//! Object database accessor.
//!
//! The only module that touches `git2`. Every libgit2 handle lives inside a
//! [`GitRepository`] pool or a [`RepoHandle`] checked out of it; nothing else
//! in the crate sees a `git2` type. Errors are translated into
//! [`HistoryError`] here so native error codes never leave this file.
//!
//! libgit2 repository handles are not safe to share between threads, so the
//! pool hands each caller its own handle. A handle goes back to the pool when
//! its guard drops, on every exit path including `?` and unwinding.

use git2::{ErrorCode, ObjectType, Oid, Repository, Sort};
use parking_lot::Mutex;
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, HashSet, VecDeque};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use crate::error::{HistoryError, Result};

/// A 20-byte git object id.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectId([u8; 20]);

impl ObjectId {
    pub const fn from_bytes(bytes: [u8; 20]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }

    /// Compact lookup key: the first 8 bytes of the id, big-endian.
    ///
    /// Two distinct objects may share a key. Callers that hold the full id
    /// compare it on hit.
    #[inline]
    pub fn key(&self) -> u64 {
        let mut prefix = [0u8; 8];
        prefix.copy_from_slice(&self.0[..8]);
        u64::from_be_bytes(prefix)
    }

    fn from_oid(oid: Oid) -> Self {
        let mut bytes = [0u8; 20];
        let raw = oid.as_bytes();
        let len = raw.len().min(bytes.len());
        bytes[..len].copy_from_slice(&raw[..len]);
        Self(bytes)
    }

    fn to_oid(self) -> Oid {
        // 20 bytes is always a valid SHA-1 oid length
        Oid::from_bytes(&self.0).unwrap_or_else(|_| Oid::zero())
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{:02x}", byte)?;
        }
        Ok(())
    }
}

impl fmt::Debug for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjectId({})", self)
    }
}

/// Commit metadata as read from the object database.
#[derive(Debug, Clone)]
pub struct RawCommit {
    pub id: ObjectId,
    pub tree: ObjectId,
    pub parents: Vec<ObjectId>,
    pub author_name: String,
    pub author_email: String,
    /// Seconds since the epoch.
    pub time: i64,
    /// Offset from UTC in minutes.
    pub offset_minutes: i32,
}

/// One immediate entry of a tree object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeEntryRecord {
    pub name: String,
    pub id: ObjectId,
    pub is_tree: bool,
}

/// An opened repository and its pool of native handles.
pub struct GitRepository {
    path: String,
    git_dir: PathBuf,
    workdir: Option<PathBuf>,
    idle: Mutex<Vec<Repository>>,
    closed: AtomicBool,
}

impl GitRepository {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path_str = path.as_ref().to_string_lossy().to_string();
        let repo = Repository::discover(&path).map_err(|e| HistoryError::NotAGitRepository {
            path: path_str.clone(),
            message: e.message().to_string(),
        })?;

        let git_dir = repo.path().to_path_buf();
        let workdir = repo.workdir().map(Path::to_path_buf);
        tracing::debug!("Opened git repository at {:?}", git_dir);

        Ok(Self {
            path: path_str,
            git_dir,
            workdir,
            idle: Mutex::new(vec![repo]),
            closed: AtomicBool::new(false),
        })
    }

    /// The path the repository was opened with.
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn git_dir(&self) -> &Path {
        &self.git_dir
    }

    pub fn workdir(&self) -> Option<&Path> {
        self.workdir.as_deref()
    }

    /// Check out a native handle for exclusive use by the caller.
    ///
    /// Reuses an idle handle when one is available, otherwise opens a new one.
    pub fn checkout(&self) -> Result<RepoHandle<'_>> {
        if self.closed.load(Ordering::Acquire) {
            return Err(HistoryError::Closed(self.path.clone()));
        }

        let repo = match self.idle.lock().pop() {
            Some(repo) => repo,
            None => Repository::open(&self.git_dir).map_err(|e| HistoryError::NotAGitRepository {
                path: self.path.clone(),
                message: e.message().to_string(),
            })?,
        };

        Ok(RepoHandle {
            owner: self,
            repo: Some(repo),
        })
    }

    pub fn with_handle<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&RepoHandle<'_>) -> Result<T>,
    {
        let handle = self.checkout()?;
        f(&handle)
    }

    pub fn resolve_revision(&self, spec: &str) -> Result<ObjectId> {
        self.with_handle(|h| h.resolve_revision(spec))
    }

    /// Stable identity for per-repository state: the `origin` URL when the
    /// repository has one, the canonical git directory otherwise.
    pub fn identity(&self) -> String {
        let remote = self
            .with_handle(|h| Ok(h.remote_url("origin")))
            .ok()
            .flatten();

        remote.unwrap_or_else(|| {
            std::fs::canonicalize(&self.git_dir)
                .unwrap_or_else(|_| self.git_dir.clone())
                .to_string_lossy()
                .to_string()
        })
    }

    /// Release every idle handle and refuse further checkouts. Handles held by
    /// in-flight callers are released when their guards drop.
    pub fn close(&self) {
        let released = {
            let mut idle = self.idle.lock();
            self.closed.store(true, Ordering::Release);
            std::mem::take(&mut *idle)
        };
        tracing::debug!("Closed {} idle handle(s) for {}", released.len(), self.path);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub fn idle_handles(&self) -> usize {
        self.idle.lock().len()
    }

    fn native(&self, operation: &'static str, e: git2::Error) -> HistoryError {
        HistoryError::Native {
            repository: self.path.clone(),
            operation,
            message: e.message().to_string(),
        }
    }

    fn missing(&self, id: ObjectId, detail: String) -> HistoryError {
        HistoryError::IncompleteHistory {
            repository: self.path.clone(),
            revision: id.to_string(),
            detail,
        }
    }
}

/// A native handle checked out of a [`GitRepository`].
pub struct RepoHandle<'db> {
    owner: &'db GitRepository,
    repo: Option<Repository>,
}

impl RepoHandle<'_> {
    fn repo(&self) -> Result<&Repository> {
        self.repo
            .as_ref()
            .ok_or_else(|| HistoryError::Closed(self.owner.path.clone()))
    }

    pub fn resolve_revision(&self, spec: &str) -> Result<ObjectId> {
        let repo = self.repo()?;
        let not_found = || HistoryError::RevisionNotFound {
            repository: self.owner.path.clone(),
            revision: spec.to_string(),
        };

        let object = repo.revparse_single(spec).map_err(|_| not_found())?;
        let commit = object.peel_to_commit().map_err(|_| not_found())?;
        Ok(ObjectId::from_oid(commit.id()))
    }

    pub fn read_commit(&self, id: ObjectId) -> Result<RawCommit> {
        let repo = self.repo()?;
        let commit = repo.find_commit(id.to_oid()).map_err(|e| match e.code() {
            ErrorCode::NotFound => self.owner.missing(id, format!("commit {} is missing", id)),
            _ => self.owner.native("read commit", e),
        })?;

        let author = commit.author();
        let when = author.when();

        Ok(RawCommit {
            id,
            tree: ObjectId::from_oid(commit.tree_id()),
            parents: commit.parent_ids().map(ObjectId::from_oid).collect(),
            author_name: String::from_utf8_lossy(author.name_bytes()).into_owned(),
            author_email: String::from_utf8_lossy(author.email_bytes()).into_owned(),
            time: when.seconds(),
            offset_minutes: when.offset_minutes(),
        })
    }

    /// Immediate entries of a tree. Entries whose names are not valid UTF-8
    /// are skipped: no UTF-8 query path can reach them.
    pub fn read_tree_entries(&self, id: ObjectId) -> Result<Vec<TreeEntryRecord>> {
        let repo = self.repo()?;
        let tree = repo.find_tree(id.to_oid()).map_err(|e| match e.code() {
            ErrorCode::NotFound => self.owner.missing(id, format!("tree {} is missing", id)),
            _ => self.owner.native("read tree", e),
        })?;

        let entries = tree
            .iter()
            .filter_map(|entry| {
                let name = entry.name()?.to_string();
                Some(TreeEntryRecord {
                    name,
                    id: ObjectId::from_oid(entry.id()),
                    is_tree: entry.kind() == Some(ObjectType::Tree),
                })
            })
            .collect();

        Ok(entries)
    }

    /// Ids reachable from `start`, children before parents, newest first
    /// among unordered commits. The order is libgit2's and is kept verbatim.
    pub fn walk_from(&self, start: ObjectId) -> Result<Vec<ObjectId>> {
        let repo = self.repo()?;
        let mut revwalk = repo.revwalk().map_err(|e| self.owner.native("revwalk", e))?;
        revwalk
            .set_sorting(Sort::TOPOLOGICAL | Sort::TIME)
            .map_err(|e| self.owner.native("revwalk", e))?;
        revwalk
            .push(start.to_oid())
            .map_err(|e| match e.code() {
                ErrorCode::NotFound => self.owner.missing(start, format!("commit {} is missing", start)),
                _ => self.owner.native("revwalk", e),
            })?;

        // Any failure past this point is a gap in the reachable history
        let mut ids = Vec::new();
        for oid_result in revwalk {
            let oid = oid_result
                .map_err(|e| self.owner.missing(start, format!("walk stopped: {}", e.message())))?;
            ids.push(ObjectId::from_oid(oid));
        }

        Ok(ids)
    }

    /// Ids reachable from `start`, stepping over commits missing from the
    /// object database instead of failing. Returns the ids and the number of
    /// missing commits skipped.
    ///
    /// Children come before parents; among commits whose children have all
    /// been emitted the newest goes first, ties in discovery order.
    pub fn walk_lenient(&self, start: ObjectId) -> Result<(Vec<ObjectId>, usize)> {
        let repo = self.repo()?;
        let start_oid = start.to_oid();

        // Discover every reachable commit that exists
        let mut found: HashMap<Oid, (i64, Vec<Oid>, usize)> = HashMap::new();
        let mut missing: HashSet<Oid> = HashSet::new();
        let mut queue = VecDeque::from([start_oid]);
        while let Some(oid) = queue.pop_front() {
            if found.contains_key(&oid) || missing.contains(&oid) {
                continue;
            }
            match repo.find_commit(oid) {
                Ok(commit) => {
                    let parents: Vec<Oid> = commit.parent_ids().collect();
                    queue.extend(parents.iter().copied());
                    let seen = found.len();
                    found.insert(oid, (commit.time().seconds(), parents, seen));
                }
                Err(e) if e.code() == ErrorCode::NotFound => {
                    if oid == start_oid {
                        return Err(self.owner.missing(start, format!("commit {} is missing", start)));
                    }
                    missing.insert(oid);
                }
                Err(e) => return Err(self.owner.native("revwalk", e)),
            }
        }

        let mut pending_children: HashMap<Oid, usize> = HashMap::with_capacity(found.len());
        for (_, parents, _) in found.values() {
            for parent in parents.iter().filter(|p| found.contains_key(*p)) {
                *pending_children.entry(*parent).or_default() += 1;
            }
        }

        let mut ready = BinaryHeap::new();
        let (time, _, seen) = &found[&start_oid];
        ready.push((*time, Reverse(*seen), start_oid));

        let mut ids = Vec::with_capacity(found.len());
        while let Some((_, _, oid)) = ready.pop() {
            ids.push(ObjectId::from_oid(oid));
            for parent in &found[&oid].1 {
                let Some((time, _, seen)) = found.get(parent) else {
                    continue;
                };
                if let Some(count) = pending_children.get_mut(parent) {
                    *count -= 1;
                    if *count == 0 {
                        ready.push((*time, Reverse(*seen), *parent));
                    }
                }
            }
        }

        Ok((ids, missing.len()))
    }

    pub fn remote_url(&self, name: &str) -> Option<String> {
        let repo = self.repo().ok()?;
        let remote = repo.find_remote(name).ok()?;
        remote.url().map(str::to_string)
    }

    pub fn is_shallow(&self) -> bool {
        self.repo().map(|r| r.is_shallow()).unwrap_or(false)
    }
}

impl Drop for RepoHandle<'_> {
    fn drop(&mut self) {
        if let Some(repo) = self.repo.take() {
            // Checked under the pool lock so a concurrent close() cannot miss it
            let mut idle = self.owner.idle.lock();
            if !self.owner.closed.load(Ordering::Acquire) {
                idle.push(repo);
            }
        }
    }
}

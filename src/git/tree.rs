//! Content-addressed tree cache.
//!
//! Tree objects never change once written, so a tree expanded for one query
//! serves every later query through the same tree, across all commits that
//! share it. A miss expands the whole tree once and stores all of its
//! children keyed by interned segment id.
//!
//! Nodes are keyed by the 64-bit prefix of the tree id and carry the full id,
//! which is compared on every hit. A prefix collision is served uncached.

use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::error::Result;
use crate::git::interner::{PathInterner, SegmentId};
use crate::git::repository::{GitRepository, ObjectId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TreeChild {
    pub id: ObjectId,
    pub is_tree: bool,
}

/// An expanded tree: its id and immediate children.
#[derive(Debug)]
pub struct TreeNode {
    pub id: ObjectId,
    children: HashMap<SegmentId, TreeChild>,
}

impl TreeNode {
    pub fn child(&self, segment: SegmentId) -> Option<TreeChild> {
        self.children.get(&segment).copied()
    }

    pub fn len(&self) -> usize {
        self.children.len()
    }

    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }
}

pub struct TreeCache {
    repo: Arc<GitRepository>,
    interner: Arc<PathInterner>,
    nodes: DashMap<u64, Arc<TreeNode>>,
    expansions: AtomicUsize,
    collisions: AtomicUsize,
}

impl TreeCache {
    pub fn new(repo: Arc<GitRepository>, interner: Arc<PathInterner>) -> Self {
        Self {
            repo,
            interner,
            nodes: DashMap::new(),
            expansions: AtomicUsize::new(0),
            collisions: AtomicUsize::new(0),
        }
    }

    pub fn interner(&self) -> &PathInterner {
        &self.interner
    }

    /// Get the expanded node for `tree`, expanding it on first use.
    pub fn node(&self, tree: ObjectId) -> Result<Arc<TreeNode>> {
        let key = tree.key();
        let cached = self.nodes.get(&key).map(|n| Arc::clone(n.value()));

        if let Some(node) = cached {
            if node.id == tree {
                return Ok(node);
            }
            self.collisions.fetch_add(1, Ordering::Relaxed);
            tracing::warn!("Tree key collision: {} vs cached {}", tree, node.id);
            return self.expand(tree).map(Arc::new);
        }

        let expanded = Arc::new(self.expand(tree)?);

        // First writer wins. A concurrent expansion of the same tree is dropped.
        let winner = Arc::clone(
            self.nodes
                .entry(key)
                .or_insert_with(|| Arc::clone(&expanded))
                .value(),
        );

        Ok(if winner.id == tree { winner } else { expanded })
    }

    /// Child `segment` of `tree`, or `None` if the tree has no such entry.
    pub fn child_of(&self, tree: ObjectId, segment: SegmentId) -> Result<Option<TreeChild>> {
        Ok(self.node(tree)?.child(segment))
    }

    /// Object id at `segments` below `tree`.
    ///
    /// `None` when a segment is missing, an intermediate segment is not a
    /// directory, or the path names a directory.
    pub fn blob_at(&self, tree: ObjectId, segments: &[SegmentId]) -> Result<Option<ObjectId>> {
        let Some((last, dirs)) = segments.split_last() else {
            return Ok(None);
        };

        let mut current = tree;
        for &segment in dirs {
            match self.child_of(current, segment)? {
                Some(child) if child.is_tree => current = child.id,
                _ => return Ok(None),
            }
        }

        Ok(match self.child_of(current, *last)? {
            Some(child) if !child.is_tree => Some(child.id),
            _ => None,
        })
    }

    fn expand(&self, tree: ObjectId) -> Result<TreeNode> {
        let entries = self.repo.with_handle(|h| h.read_tree_entries(tree))?;
        self.expansions.fetch_add(1, Ordering::Relaxed);

        let children = entries
            .into_iter()
            .map(|entry| {
                (
                    self.interner.intern(&entry.name),
                    TreeChild {
                        id: entry.id,
                        is_tree: entry.is_tree,
                    },
                )
            })
            .collect();

        Ok(TreeNode { id: tree, children })
    }

    /// Number of distinct trees held.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Native tree reads performed so far.
    pub fn expansions(&self) -> usize {
        self.expansions.load(Ordering::Relaxed)
    }

    pub fn collisions(&self) -> usize {
        self.collisions.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::git::fixtures::RepoFixture;

    fn setup(files: &[(&str, &str)]) -> (RepoFixture, Arc<GitRepository>, TreeCache, ObjectId) {
        let mut fx = RepoFixture::new();
        let a = fx.commit(&[], files);
        fx.set_head(a);

        let repo = Arc::new(GitRepository::open(fx.path()).unwrap());
        let cache = TreeCache::new(Arc::clone(&repo), Arc::new(PathInterner::new()));
        let head = repo.resolve_revision("HEAD").unwrap();
        let tree = repo.with_handle(|h| h.read_commit(head)).unwrap().tree;
        (fx, repo, cache, tree)
    }

    #[test]
    fn test_blob_at_nested_path() {
        let (_fx, _repo, cache, tree) = setup(&[("a/b/c.txt", "deep"), ("a/d.txt", "shallow")]);

        let deep = cache.interner().intern_path("a/b/c.txt");
        let shallow = cache.interner().intern_path("a/d.txt");
        let c = cache.blob_at(tree, &deep).unwrap();
        let d = cache.blob_at(tree, &shallow).unwrap();
        assert!(c.is_some());
        assert!(d.is_some());
        assert_ne!(c, d);
    }

    #[test]
    fn test_blob_at_missing_and_directory() {
        let (_fx, _repo, cache, tree) = setup(&[("a/b/c.txt", "deep")]);

        let interner = cache.interner();
        assert_eq!(cache.blob_at(tree, &interner.intern_path("a/b")).unwrap(), None);
        assert_eq!(cache.blob_at(tree, &interner.intern_path("a/x.txt")).unwrap(), None);
        assert_eq!(cache.blob_at(tree, &interner.intern_path("a/b/c.txt/z")).unwrap(), None);
        assert_eq!(cache.blob_at(tree, &[]).unwrap(), None);
    }

    #[test]
    fn test_tree_expanded_once() {
        let (_fx, _repo, cache, tree) = setup(&[("x.txt", "1"), ("y.txt", "2")]);

        let x = cache.interner().intern_path("x.txt");
        let y = cache.interner().intern_path("y.txt");
        cache.blob_at(tree, &x).unwrap();
        cache.blob_at(tree, &y).unwrap();
        cache.blob_at(tree, &x).unwrap();

        assert_eq!(cache.expansions(), 1);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.node(tree).unwrap().len(), 2);
    }

    #[test]
    fn test_concurrent_lookups_share_one_node() {
        let (_fx, _repo, cache, tree) = setup(&[("dir/file.txt", "content")]);
        let cache = Arc::new(cache);
        let segments = cache.interner().intern_path("dir/file.txt");

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let cache = Arc::clone(&cache);
                let segments = segments.clone();
                std::thread::spawn(move || cache.blob_at(tree, &segments).unwrap())
            })
            .collect();

        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert!(results.iter().all(|r| r.is_some() && *r == results[0]));
        assert_eq!(cache.len(), 2);
    }
}

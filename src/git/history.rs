//! Per-file history resolution.
//!
//! Reproduces the history simplification `git log <path>` applies, without
//! diffing: a commit whose blob for the path equals the blob in any one of its
//! parents is TREESAME to that parent, is left out, and only that parent is
//! followed. Every other commit on a followed line is kept, and all of its
//! parents are followed.
//!
//! Blob identity per commit comes from the shared [`TreeCache`], so each tree
//! is read from the object database at most once per engine.
//!
//! When the walk narrows to a single commit that an earlier build resolved as
//! its head, the rest of the history is spliced in from the
//! [`CommitHistoryCache`].

use std::collections::BTreeMap;

use crate::error::{HistoryError, Result};
use crate::git::cache::{ABSENT_BLOB, BlobKey, CommitHistoryCache};
use crate::git::graph::{CommitGraph, CommitIndex, CommitRecord};
use crate::git::interner::SegmentId;
use crate::git::repository::ObjectId;
use crate::git::tree::TreeCache;

/// Normalize a caller-supplied relative file path to `a/b/c` form.
pub fn normalize_path(path: &str) -> Result<String> {
    let unified = path.replace('\\', "/");
    let mut segments = Vec::new();
    for segment in unified.split('/') {
        match segment {
            "" | "." => continue,
            ".." => return Err(HistoryError::InvalidPath(path.to_string())),
            other => segments.push(other),
        }
    }

    if segments.is_empty() {
        return Err(HistoryError::InvalidPath(path.to_string()));
    }
    Ok(segments.join("/"))
}

fn blob_key(blob: Option<ObjectId>) -> BlobKey {
    blob.map(|id| id.key()).unwrap_or(ABSENT_BLOB)
}

pub struct HistoryResolver<'a> {
    graph: &'a CommitGraph,
    trees: &'a TreeCache,
    cache: Option<&'a CommitHistoryCache>,
}

impl<'a> HistoryResolver<'a> {
    pub fn new(graph: &'a CommitGraph, trees: &'a TreeCache) -> Self {
        Self {
            graph,
            trees,
            cache: None,
        }
    }

    pub fn with_cache(mut self, cache: &'a CommitHistoryCache) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Commits that changed `path`, most recent first.
    ///
    /// `path` must already be normalized. A path that never existed yields an
    /// empty list.
    pub fn resolve(&self, path: &str) -> Result<Vec<CommitIndex>> {
        let Some(head) = self.graph.head() else {
            return Ok(Vec::new());
        };
        let segments = self.trees.interner().intern_path(path);
        let head_blob = self.trees.blob_at(head.tree, &segments)?;

        // Keyed by graph index: parents always sort after their children, so
        // the smallest key is the next commit in walk order.
        let mut worklist: BTreeMap<CommitIndex, Option<ObjectId>> = BTreeMap::new();
        worklist.insert(0, head_blob);

        let mut result = Vec::new();
        let mut spliced = false;

        while let Some((idx, blob)) = worklist.pop_first() {
            let commit = self.commit(idx)?;

            if worklist.is_empty() {
                if let Some(tail) = self.cached_tail(path, idx, commit, blob) {
                    result.extend(tail);
                    spliced = true;
                    break;
                }
            }

            let mut differing = Vec::with_capacity(commit.parents.len());
            let mut treesame = None;
            for &parent in &commit.parents {
                let parent_blob = self.blob_in(parent, &segments)?;
                if parent_blob == blob {
                    treesame = Some(parent);
                    break;
                }
                differing.push((parent, parent_blob));
            }

            match treesame {
                Some(parent) => {
                    worklist.insert(parent, blob);
                }
                None => {
                    if blob.is_some() || !commit.parents.is_empty() {
                        result.push(idx);
                    }
                    worklist.extend(differing);
                }
            }
        }

        tracing::debug!(
            "Resolved {}: {} commit(s){}",
            path,
            result.len(),
            if spliced { " (cache splice)" } else { "" }
        );

        if let Some(cache) = self.cache {
            let keys: Vec<u64> = result.iter().map(|&i| self.graph.commits()[i as usize].id.key()).collect();
            cache.put(path, head.id.key(), blob_key(head_blob), &keys);
        }

        Ok(result)
    }

    fn commit(&self, idx: CommitIndex) -> Result<&'a CommitRecord> {
        self.graph
            .get(idx)
            .ok_or_else(|| HistoryError::Internal(format!("commit index {} out of range", idx)))
    }

    fn blob_in(&self, idx: CommitIndex, segments: &[SegmentId]) -> Result<Option<ObjectId>> {
        let commit = self.commit(idx)?;
        self.trees.blob_at(commit.tree, segments)
    }

    /// Cached history below `commit`, mapped back into this graph. Entries
    /// that do not fit the graph are ignored.
    fn cached_tail(
        &self,
        path: &str,
        idx: CommitIndex,
        commit: &CommitRecord,
        blob: Option<ObjectId>,
    ) -> Option<Vec<CommitIndex>> {
        let cache = self.cache?;
        let keys = cache.get(path, commit.id.key(), blob_key(blob))?;

        let tail: Option<Vec<CommitIndex>> = keys
            .iter()
            .map(|&key| self.graph.index_of_key(key).filter(|&i| i >= idx))
            .collect();

        if tail.is_none() {
            tracing::debug!("Ignoring cached history for {} at {}: not in graph", path, commit.id);
        }
        tail
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::git::fixtures::RepoFixture;
    use crate::git::graph::LoadOptions;
    use crate::git::interner::PathInterner;
    use crate::git::repository::GitRepository;
    use git2::Oid;
    use std::sync::Arc;

    struct Loaded {
        _fx: RepoFixture,
        graph: CommitGraph,
        trees: TreeCache,
    }

    fn load(fx: RepoFixture) -> Loaded {
        let repo = Arc::new(GitRepository::open(fx.path()).unwrap());
        let graph = CommitGraph::load(&repo, "HEAD", LoadOptions::default()).unwrap();
        let trees = TreeCache::new(repo, Arc::new(PathInterner::new()));
        Loaded {
            _fx: fx,
            graph,
            trees,
        }
    }

    fn shas(loaded: &Loaded, history: &[CommitIndex]) -> Vec<String> {
        history
            .iter()
            .map(|&i| loaded.graph.get(i).unwrap().id.to_string())
            .collect()
    }

    fn expected(ids: &[Oid]) -> Vec<String> {
        ids.iter().map(|id| id.to_string()).collect()
    }

    #[test]
    fn test_normalize_path() {
        assert_eq!(normalize_path("./docs//a.md").unwrap(), "docs/a.md");
        assert_eq!(normalize_path("/docs\\a.md").unwrap(), "docs/a.md");
        assert!(normalize_path("../a.md").is_err());
        assert!(normalize_path("/").is_err());
    }

    #[test]
    fn test_skips_commits_not_touching_file() {
        let mut fx = RepoFixture::new();
        let a = fx.commit(&[], &[("file.txt", "v1"), ("other.txt", "o1")]);
        let b = fx.commit(&[a], &[("file.txt", "v1"), ("other.txt", "o2")]);
        let c = fx.commit(&[b], &[("file.txt", "v2"), ("other.txt", "o2")]);
        fx.set_head(c);

        let loaded = load(fx);
        let history = HistoryResolver::new(&loaded.graph, &loaded.trees)
            .resolve("file.txt")
            .unwrap();
        assert_eq!(shas(&loaded, &history), expected(&[c, a]));
    }

    #[test]
    fn test_merge_follows_treesame_parent() {
        let mut fx = RepoFixture::new();
        let base = fx.commit(&[], &[("file.txt", "v0")]);
        let p1 = fx.commit(&[base], &[("file.txt", "v1")]);
        let p2 = fx.commit(&[base], &[("file.txt", "v2")]);
        let m = fx.commit(&[p1, p2], &[("file.txt", "v1")]);
        fx.set_head(m);

        let loaded = load(fx);
        let history = HistoryResolver::new(&loaded.graph, &loaded.trees)
            .resolve("file.txt")
            .unwrap();
        assert_eq!(shas(&loaded, &history), expected(&[p1, base]));
    }

    #[test]
    fn test_merge_treesame_to_second_parent() {
        let mut fx = RepoFixture::new();
        let base = fx.commit(&[], &[("file.txt", "v0")]);
        let p1 = fx.commit(&[base], &[("file.txt", "v1")]);
        let p2 = fx.commit(&[base], &[("file.txt", "v2")]);
        let m = fx.commit(&[p2, p1], &[("file.txt", "v1")]);
        fx.set_head(m);

        let loaded = load(fx);
        let history = HistoryResolver::new(&loaded.graph, &loaded.trees)
            .resolve("file.txt")
            .unwrap();
        assert_eq!(shas(&loaded, &history), expected(&[p1, base]));
    }

    #[test]
    fn test_merge_differing_from_all_parents_is_kept() {
        let mut fx = RepoFixture::new();
        let base = fx.commit(&[], &[("file.txt", "v0")]);
        let p1 = fx.commit(&[base], &[("file.txt", "v1")]);
        let p2 = fx.commit(&[base], &[("file.txt", "v2")]);
        let m = fx.commit(&[p1, p2], &[("file.txt", "merged")]);
        fx.set_head(m);

        let loaded = load(fx);
        let history = HistoryResolver::new(&loaded.graph, &loaded.trees)
            .resolve("file.txt")
            .unwrap();
        // p2 is newer than p1, so it is visited first
        assert_eq!(shas(&loaded, &history), expected(&[m, p2, p1, base]));
    }

    #[test]
    fn test_root_commit_only() {
        let mut fx = RepoFixture::new();
        let a = fx.commit(&[], &[("file.txt", "v1")]);
        let b = fx.commit(&[a], &[("file.txt", "v1"), ("x.txt", "1")]);
        let c = fx.commit(&[b], &[("file.txt", "v1"), ("x.txt", "2")]);
        fx.set_head(c);

        let loaded = load(fx);
        let history = HistoryResolver::new(&loaded.graph, &loaded.trees)
            .resolve("file.txt")
            .unwrap();
        assert_eq!(shas(&loaded, &history), expected(&[a]));
    }

    #[test]
    fn test_never_existing_file_is_empty() {
        let mut fx = RepoFixture::new();
        let a = fx.commit(&[], &[("file.txt", "v1")]);
        let b = fx.commit(&[a], &[("file.txt", "v2")]);
        fx.set_head(b);

        let loaded = load(fx);
        let resolver = HistoryResolver::new(&loaded.graph, &loaded.trees);
        assert!(resolver.resolve("missing.txt").unwrap().is_empty());
        assert!(resolver.resolve("file.txt/nested").unwrap().is_empty());
    }

    #[test]
    fn test_deleted_and_readded_file() {
        let mut fx = RepoFixture::new();
        let a = fx.commit(&[], &[("file.txt", "v1"), ("keep.txt", "k")]);
        let b = fx.commit(&[a], &[("keep.txt", "k")]);
        let c = fx.commit(&[b], &[("keep.txt", "k2")]);
        let d = fx.commit(&[c], &[("file.txt", "v1"), ("keep.txt", "k2")]);
        fx.set_head(d);

        let loaded = load(fx);
        let history = HistoryResolver::new(&loaded.graph, &loaded.trees)
            .resolve("file.txt")
            .unwrap();
        assert_eq!(shas(&loaded, &history), expected(&[d, b, a]));
    }

    #[test]
    fn test_nested_path_history() {
        let mut fx = RepoFixture::new();
        let a = fx.commit(&[], &[("docs/guide/intro.md", "one"), ("docs/other.md", "x")]);
        let b = fx.commit(&[a], &[("docs/guide/intro.md", "one"), ("docs/other.md", "y")]);
        let c = fx.commit(&[b], &[("docs/guide/intro.md", "two"), ("docs/other.md", "y")]);
        fx.set_head(c);

        let loaded = load(fx);
        let resolver = HistoryResolver::new(&loaded.graph, &loaded.trees);
        let intro = resolver.resolve("docs/guide/intro.md").unwrap();
        let other = resolver.resolve("docs/other.md").unwrap();
        assert_eq!(shas(&loaded, &intro), expected(&[c, a]));
        assert_eq!(shas(&loaded, &other), expected(&[b, a]));
    }

    #[test]
    fn test_result_is_cached_under_head() {
        let mut fx = RepoFixture::new();
        let a = fx.commit(&[], &[("file.txt", "v1")]);
        let b = fx.commit(&[a], &[("file.txt", "v2")]);
        fx.set_head(b);

        let loaded = load(fx);
        let cache = CommitHistoryCache::new(4);
        let history = HistoryResolver::new(&loaded.graph, &loaded.trees)
            .with_cache(&cache)
            .resolve("file.txt")
            .unwrap();

        let head = loaded.graph.head().unwrap();
        let segments = loaded.trees.interner().intern_path("file.txt");
        let blob = loaded.trees.blob_at(head.tree, &segments).unwrap();
        let cached = cache.get("file.txt", head.id.key(), blob_key(blob)).unwrap();
        let keys: Vec<u64> = history.iter().map(|&i| loaded.graph.get(i).unwrap().id.key()).collect();
        assert_eq!(&*cached, keys.as_slice());
    }

    #[test]
    fn test_splices_cached_tail() {
        let mut fx = RepoFixture::new();
        let a = fx.commit(&[], &[("file.txt", "v1")]);
        let b = fx.commit(&[a], &[("file.txt", "v1"), ("x.txt", "1")]);
        let c = fx.commit(&[b], &[("file.txt", "v2"), ("x.txt", "1")]);
        fx.set_head(c);

        let loaded = load(fx);
        let cache = CommitHistoryCache::new(4);

        // Plant an entry for b that claims b itself changed the file. Only a
        // splice can put b into the result.
        let b_record = loaded.graph.get(1).unwrap();
        assert_eq!(b_record.id.to_string(), b.to_string());
        let segments = loaded.trees.interner().intern_path("file.txt");
        let b_blob = loaded.trees.blob_at(b_record.tree, &segments).unwrap();
        cache.put("file.txt", b_record.id.key(), blob_key(b_blob), &[b_record.id.key()]);

        let history = HistoryResolver::new(&loaded.graph, &loaded.trees)
            .with_cache(&cache)
            .resolve("file.txt")
            .unwrap();
        assert_eq!(shas(&loaded, &history), expected(&[c, b]));
    }

    #[test]
    fn test_cache_entry_outside_graph_is_ignored() {
        let mut fx = RepoFixture::new();
        let a = fx.commit(&[], &[("file.txt", "v1")]);
        let b = fx.commit(&[a], &[("file.txt", "v2")]);
        fx.set_head(b);

        let loaded = load(fx);
        let cache = CommitHistoryCache::new(4);
        let head = loaded.graph.head().unwrap();
        let segments = loaded.trees.interner().intern_path("file.txt");
        let blob = loaded.trees.blob_at(head.tree, &segments).unwrap();
        cache.put("file.txt", head.id.key(), blob_key(blob), &[0xdead_beef]);

        let history = HistoryResolver::new(&loaded.graph, &loaded.trees)
            .with_cache(&cache)
            .resolve("file.txt")
            .unwrap();
        assert_eq!(shas(&loaded, &history), expected(&[b, a]));
    }
}

//! Scratch repositories driven through a real working directory and index.

#![allow(dead_code)]

use git2::{Oid, Repository, Signature, Time};
use std::fs;
use std::path::Path;
use tempfile::TempDir;

pub struct TestRepo {
    dir: TempDir,
    repo: Repository,
    clock: i64,
}

impl TestRepo {
    pub fn init() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let repo = Repository::init(dir.path()).unwrap();
        Self {
            dir,
            repo,
            clock: 1_650_000_000,
        }
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Commit exactly `files` (a full snapshot) on top of `parents` and move
    /// HEAD to the new commit.
    pub fn commit(&mut self, message: &str, parents: &[Oid], files: &[(&str, &str)]) -> Oid {
        self.clock += 3600;

        let mut index = self.repo.index().unwrap();
        index.clear().unwrap();
        for (path, content) in files {
            let full = self.dir.path().join(path);
            if let Some(parent) = full.parent() {
                fs::create_dir_all(parent).unwrap();
            }
            fs::write(&full, content).unwrap();
            index.add_path(Path::new(path)).unwrap();
        }
        index.write().unwrap();
        let tree_id = index.write_tree().unwrap();
        let tree = self.repo.find_tree(tree_id).unwrap();

        let sig = Signature::new("Ada Example", "ada@example.com", &Time::new(self.clock, 0)).unwrap();
        let parents: Vec<git2::Commit<'_>> =
            parents.iter().map(|p| self.repo.find_commit(*p).unwrap()).collect();
        let parent_refs: Vec<&git2::Commit<'_>> = parents.iter().collect();

        let id = self
            .repo
            .commit(None, &sig, &sig, message, &tree, &parent_refs)
            .unwrap();
        self.repo.set_head_detached(id).unwrap();
        id
    }
}

pub fn shas(commits: &[file_history::CommitInfo]) -> Vec<String> {
    commits.iter().map(|c| c.sha.clone()).collect()
}

pub fn ids(oids: &[Oid]) -> Vec<String> {
    oids.iter().map(|o| o.to_string()).collect()
}

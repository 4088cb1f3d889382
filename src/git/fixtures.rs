//! Synthetic repositories for tests, built with git plumbing so every
//! commit's parents, tree and timestamp are exact.

use git2::{ObjectType, Oid, Repository, Signature, Time};
use std::collections::BTreeMap;
use std::path::Path;
use tempfile::TempDir;

pub struct RepoFixture {
    dir: TempDir,
    repo: Repository,
    clock: i64,
}

impl RepoFixture {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let repo = Repository::init(dir.path()).expect("git init");
        Self {
            dir,
            repo,
            clock: 1_700_000_000,
        }
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Commit a full snapshot of `files` with the given parents. Each commit
    /// is one minute newer than the previous one.
    pub fn commit(&mut self, parents: &[Oid], files: &[(&str, &str)]) -> Oid {
        self.clock += 60;
        let sig = Signature::new("Test User", "test@example.com", &Time::new(self.clock, 120))
            .expect("signature");

        let tree_id = self.write_snapshot(files);
        let tree = self.repo.find_tree(tree_id).expect("find tree");

        let parent_commits: Vec<git2::Commit<'_>> = parents
            .iter()
            .map(|p| self.repo.find_commit(*p).expect("find parent"))
            .collect();
        let parent_refs: Vec<&git2::Commit<'_>> = parent_commits.iter().collect();

        self.repo
            .commit(None, &sig, &sig, "commit", &tree, &parent_refs)
            .expect("commit")
    }

    /// Write a commit whose only parent does not exist, as at the boundary of
    /// a shallow or damaged clone.
    pub fn commit_with_missing_parent(&mut self, files: &[(&str, &str)]) -> Oid {
        self.clock += 60;
        let tree_id = self.write_snapshot(files);
        let body = format!(
            "tree {tree}\nparent {parent}\nauthor Test User <test@example.com> {t} +0200\ncommitter Test User <test@example.com> {t} +0200\n\ncommit\n",
            tree = tree_id,
            parent = "1111111111111111111111111111111111111111",
            t = self.clock,
        );
        let odb = self.repo.odb().expect("odb");
        odb.write(ObjectType::Commit, body.as_bytes()).expect("write commit")
    }

    fn write_snapshot(&self, files: &[(&str, &str)]) -> Oid {
        let snapshot: Vec<(String, Oid)> = files
            .iter()
            .map(|(path, content)| {
                let blob = self.repo.blob(content.as_bytes()).expect("write blob");
                (path.to_string(), blob)
            })
            .collect();
        build_tree(&self.repo, &snapshot)
    }

    pub fn set_head(&self, id: Oid) {
        self.repo.set_head_detached(id).expect("set head");
    }

    pub fn branch(&self, name: &str, id: Oid) {
        let commit = self.repo.find_commit(id).expect("find commit");
        self.repo.branch(name, &commit, true).expect("create branch");
    }
}

fn build_tree(repo: &Repository, files: &[(String, Oid)]) -> Oid {
    let mut direct: Vec<(&str, Oid)> = Vec::new();
    let mut nested: BTreeMap<&str, Vec<(String, Oid)>> = BTreeMap::new();

    for (path, oid) in files {
        match path.split_once('/') {
            Some((dir, rest)) => nested.entry(dir).or_default().push((rest.to_string(), *oid)),
            None => direct.push((path.as_str(), *oid)),
        }
    }

    let mut builder = repo.treebuilder(None).expect("treebuilder");
    for (name, oid) in direct {
        builder.insert(name, oid, 0o100_644).expect("insert blob");
    }
    for (dir, entries) in nested {
        let sub = build_tree(repo, &entries);
        builder.insert(dir, sub, 0o040_000).expect("insert tree");
    }
    builder.write().expect("write tree")
}

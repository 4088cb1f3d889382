//! Git access and file-history resolution.
//!
//! - `repository`: pooled native handles, object ids, raw object reads
//! - `interner`: path segment interning
//! - `tree`: shared cache of expanded tree objects
//! - `graph`: in-memory commit graph for one start commit
//! - `history`: per-file history simplification
//! - `cache`: persisted per-file commit-history cache
//! - `loader`: the facade tying the above together

pub mod cache;
pub mod graph;
pub mod history;
pub mod interner;
pub mod loader;
pub mod repository;
pub mod tree;

#[cfg(test)]
pub(crate) mod fixtures;

use std::sync::Arc;

pub use graph::{CommitGraph, CommitIndex, LoadOptions};
pub use loader::CommitLoader;
pub use repository::{GitRepository, ObjectId};

pub type SharedLoader = Arc<CommitLoader>;

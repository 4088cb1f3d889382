//! File history for git repositories.
//!
//! Answers "which commits changed this file?" the way `git log <path>` does
//! with its default history simplification, reading objects through libgit2
//! and caching results between processes.
//!
//! ```no_run
//! use file_history::{CommitLoader, EngineConfig};
//!
//! # fn main() -> file_history::error::Result<()> {
//! let loader = CommitLoader::open(".", EngineConfig::default().with_cache_dir("/tmp/history"))?;
//! loader.warm_up(None)?;
//! for commit in loader.get_history("src/lib.rs", None)? {
//!     println!("{} {}", commit.sha, commit.author_name);
//! }
//! loader.save()?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod git;
pub mod models;
pub mod routes;

pub use config::EngineConfig;
pub use error::{HistoryError, Result};
pub use git::{CommitLoader, SharedLoader};
pub use models::CommitInfo;

//! Data transfer objects returned by the engine and the inspection server.
//!
//! - `commit`: CommitInfo, one entry of a file history
//! - `history`: HistoryResponse, RepositoryInfo, EngineStats, SaveResponse

pub mod commit;
pub mod history;

pub use commit::*;
pub use history::*;

//! API route handlers - maps HTTP endpoints to loader operations.
//!
//! - `repository`: repository identity and engine statistics
//! - `history`: file history queries and graph warm-up
//! - `cache`: explicit commit-history cache save
//!
//! Loader calls block on libgit2, so handlers run them through
//! `tokio::task::spawn_blocking`.

pub mod cache;
pub mod history;
pub mod repository;

use axum::Router;

use crate::error::{HistoryError, Result};
use crate::git::SharedLoader;

pub fn create_router(loader: SharedLoader) -> Router {
    Router::new()
        .merge(repository::routes(loader.clone()))
        .merge(history::routes(loader.clone()))
        .merge(cache::routes(loader))
}

async fn blocking<F, T>(f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| HistoryError::Internal(format!("worker task failed: {}", e)))?
}

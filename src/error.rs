//! Engine error types and HTTP response mapping.
//!
//! Defines `HistoryError` for every failure the history engine reports and
//! implements Axum's `IntoResponse` so the inspection server can return them
//! as JSON error bodies.
//!
//! Error mappings:
//! - `NotAGitRepository`, `RevisionNotFound` → 404
//! - `InvalidPath` → 400
//! - `IncompleteHistory` → 409
//! - `CacheCorrupt`, `Native`, `Io`, `Closed`, `Internal` → 500
//!
//! Raw `git2` errors never appear here: the object accessor translates them
//! before they leave `git::repository`.

use std::path::PathBuf;
use std::sync::Arc;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

#[derive(Error, Debug, Clone)]
pub enum HistoryError {
    #[error("Not a git repository: {path} ({message})")]
    NotAGitRepository { path: String, message: String },

    #[error("Revision not found: {revision} in {repository}")]
    RevisionNotFound { repository: String, revision: String },

    #[error("Incomplete history for {revision} in {repository}: {detail}")]
    IncompleteHistory {
        repository: String,
        revision: String,
        detail: String,
    },

    #[error("Commit-history cache is corrupt: {}: {reason}", path.display())]
    CacheCorrupt { path: PathBuf, reason: String },

    #[error("Invalid path: {0}")]
    InvalidPath(String),

    #[error("Git object database error during {operation} in {repository}: {message}")]
    Native {
        repository: String,
        operation: &'static str,
        message: String,
    },

    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: Arc<std::io::Error>,
    },

    #[error("Repository handle closed: {0}")]
    Closed(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl HistoryError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        HistoryError::Io {
            path: path.into(),
            source: Arc::new(source),
        }
    }
}

impl IntoResponse for HistoryError {
    fn into_response(self) -> Response {
        let status = match &self {
            HistoryError::NotAGitRepository { .. } | HistoryError::RevisionNotFound { .. } => {
                StatusCode::NOT_FOUND
            }
            HistoryError::InvalidPath(_) => StatusCode::BAD_REQUEST,
            HistoryError::IncompleteHistory { .. } => StatusCode::CONFLICT,
            HistoryError::CacheCorrupt { .. }
            | HistoryError::Native { .. }
            | HistoryError::Io { .. }
            | HistoryError::Closed(_)
            | HistoryError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let body = Json(json!({
            "error": self.to_string(),
        }));

        (status, body).into_response()
    }
}

pub type Result<T> = std::result::Result<T, HistoryError>;

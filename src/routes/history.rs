use axum::{
    extract::{Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;

use super::blocking;
use crate::error::Result;
use crate::git::SharedLoader;
use crate::models::HistoryResponse;

pub fn routes(loader: SharedLoader) -> Router {
    Router::new()
        .route("/api/v1/history", get(get_history))
        .route("/api/v1/warmup", post(warm_up))
        .with_state(loader)
}

#[derive(Debug, Deserialize)]
struct HistoryQuery {
    path: String,
    revision: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct WarmUpQuery {
    revision: Option<String>,
}

async fn get_history(
    State(loader): State<SharedLoader>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<HistoryResponse>> {
    let response = blocking(move || {
        let revision = query
            .revision
            .clone()
            .unwrap_or_else(|| loader.config().default_revision.clone());
        let commits = loader.get_history(&query.path, Some(&revision))?;
        Ok(HistoryResponse {
            path: query.path,
            revision,
            commits,
        })
    })
    .await?;
    Ok(Json(response))
}

async fn warm_up(
    State(loader): State<SharedLoader>,
    Query(query): Query<WarmUpQuery>,
) -> Result<StatusCode> {
    blocking(move || loader.warm_up(query.revision.as_deref())).await?;
    Ok(StatusCode::ACCEPTED)
}

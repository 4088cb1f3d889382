use axum::{extract::State, routing::get, Json, Router};

use super::blocking;
use crate::error::Result;
use crate::git::SharedLoader;
use crate::models::RepositoryInfo;

pub fn routes(loader: SharedLoader) -> Router {
    Router::new()
        .route("/api/v1/repository", get(get_repository_info))
        .with_state(loader)
}

async fn get_repository_info(State(loader): State<SharedLoader>) -> Result<Json<RepositoryInfo>> {
    let info = blocking(move || Ok(loader.info())).await?;
    Ok(Json(info))
}

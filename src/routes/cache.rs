use axum::{extract::State, routing::post, Json, Router};

use super::blocking;
use crate::error::Result;
use crate::git::SharedLoader;
use crate::models::SaveResponse;

pub fn routes(loader: SharedLoader) -> Router {
    Router::new()
        .route("/api/v1/cache/save", post(save_cache))
        .with_state(loader)
}

async fn save_cache(State(loader): State<SharedLoader>) -> Result<Json<SaveResponse>> {
    let written = blocking(move || loader.save()).await?;
    Ok(Json(SaveResponse { written }))
}

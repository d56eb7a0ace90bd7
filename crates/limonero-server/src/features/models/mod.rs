//! `GET /models/:id/download` - stream a model artifact

use crate::api::AppState;
use crate::error::AppResult;
use crate::middleware::Caller;
use axum::{
    extract::{Path, State},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};

pub fn models_routes() -> Router<AppState> {
    Router::new().route("/:id/download", get(download_model))
}

#[tracing::instrument(skip(state, caller), fields(user_id = caller.id))]
async fn download_model(
    State(state): State<AppState>,
    Caller(caller): Caller,
    Path(id): Path<i32>,
) -> AppResult<Response> {
    let download = state.gateway.download_model(&caller, id).await?;
    Ok(download.into_response())
}

//! `GET /storages` - enabled storages, for any authenticated caller

use crate::api::response::ApiResponse;
use crate::api::AppState;
use crate::error::AppResult;
use crate::middleware::Caller;
use axum::{
    extract::State,
    response::{IntoResponse, Response},
    routing::get,
    Router,
};

pub fn storages_routes() -> Router<AppState> {
    Router::new().route("/", get(list_storages))
}

#[tracing::instrument(skip(state, caller), fields(user_id = caller.id))]
async fn list_storages(State(state): State<AppState>, Caller(caller): Caller) -> AppResult<Response> {
    let storages = state.gateway.storages().await?;
    Ok(ApiResponse::success(storages).into_response())
}

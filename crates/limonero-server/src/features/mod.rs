//! Feature slices of the Limonero API
//!
//! Each slice keeps its `commands/` (writes), `queries/` (reads) and
//! `routes.rs` together. The handlers are thin: they validate the request
//! and call into [`crate::gateway::Gateway`].
//!
//! - **datasources**: listing, uploads, downloads, sampling and inference
//! - **storages**: enabled storages
//! - **models**: model artifact downloads

pub mod datasources;
pub mod models;
pub mod shared;
pub mod storages;

use crate::api::AppState;
use axum::Router;

/// All feature routes, each under its own prefix
pub fn router() -> Router<AppState> {
    Router::new()
        .nest("/datasources", datasources::datasources_routes())
        .nest("/storages", storages::storages_routes())
        .nest("/models", models::models_routes())
}

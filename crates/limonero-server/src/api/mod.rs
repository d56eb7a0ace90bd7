//! HTTP surface: shared state, router assembly and the health probe

pub mod response;

use crate::config::CorsConfig;
use crate::features;
use crate::gateway::Gateway;
use crate::middleware::{self, Authenticator};
use axum::{response::IntoResponse, routing::get, Router};
use tower_http::compression::CompressionLayer;

use self::response::ApiResponse;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub gateway: Gateway,
    pub auth: Authenticator,
    /// Put `IoFailure` details into error bodies
    pub debug: bool,
}

/// Build the application router with all routes and middleware
pub fn create_router(state: AppState, cors: &CorsConfig) -> Router {
    let debug = state.debug;
    Router::new()
        .route("/health", get(health_check))
        .merge(features::router())
        .with_state(state)
        // Apply layers from innermost to outermost
        .layer(axum::middleware::map_response_with_state(
            debug,
            middleware::reveal_io_failure_details,
        ))
        .layer(CompressionLayer::new())
        .layer(middleware::tracing_layer())
        .layer(middleware::cors_layer(cors))
}

async fn health_check() -> impl IntoResponse {
    ApiResponse::ok()
}

//! HTTP plumbing around the gateway routes
//!
//! Browsers talk to the gateway directly, so CORS has to let the Limonero
//! auth headers through and expose `Content-Disposition` for downloads.
//! Caller authentication lives in [`auth`].

use axum::{
    extract::State,
    http::{header, HeaderName, Method},
    response::{IntoResponse, Response},
    Json,
};
use std::time::Duration;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer},
};
use tracing::Level;

use crate::config::CorsConfig;
use crate::error::{AppError, IoFailureDetail};

pub mod auth;

pub use auth::{Authenticator, Caller};

/// Headers a browser client may send: the two credential schemes plus the
/// usual content negotiation
const ALLOWED_HEADERS: [HeaderName; 6] = [
    header::ACCEPT,
    header::CONTENT_TYPE,
    HeaderName::from_static(auth::AUTH_TOKEN_HEADER),
    HeaderName::from_static(auth::ACCESS_TOKEN_HEADER),
    HeaderName::from_static(auth::USER_ID_HEADER),
    HeaderName::from_static(auth::CLIENT_HEADER),
];

pub fn cors_layer(config: &CorsConfig) -> CorsLayer {
    let mut cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers(ALLOWED_HEADERS)
        .expose_headers([header::CONTENT_DISPOSITION])
        .max_age(Duration::from_secs(3600));

    let wildcard = config.allowed_origins.is_empty() || config.allowed_origins.iter().any(|o| o == "*");
    if wildcard {
        cors = cors.allow_origin(Any);
    } else {
        let origins: Vec<_> = config
            .allowed_origins
            .iter()
            .filter_map(|origin| origin.parse().ok())
            .collect();
        cors = cors.allow_origin(origins);
    }

    // Wildcard origins cannot be combined with credentials
    if config.allow_credentials && !wildcard {
        cors = cors.allow_credentials(true);
    }

    cors
}

pub fn tracing_layer(
) -> TraceLayer<tower_http::classify::SharedClassifier<tower_http::classify::ServerErrorsAsFailures>> {
    TraceLayer::new_for_http()
        .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
        .on_response(
            DefaultOnResponse::new()
                .level(Level::INFO)
                .latency_unit(tower_http::LatencyUnit::Micros),
        )
}

/// Response mapper for `axum::middleware::map_response_with_state`.
///
/// With `debug` on, an `IO_FAILURE` body carries the underlying error
/// instead of the generic message.
pub async fn reveal_io_failure_details(State(debug): State<bool>, mut response: Response) -> Response {
    if !debug {
        return response;
    }
    match response.extensions_mut().remove::<IoFailureDetail>() {
        Some(IoFailureDetail(detail)) => {
            let status = response.status();
            (status, Json(AppError::IoFailure(detail).body(true))).into_response()
        }
        None => response,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{body::Body, http::Request, routing::get, Router};
    use tower::ServiceExt;

    fn app(config: &CorsConfig) -> Router {
        Router::new()
            .route(
                "/datasources/:id/download",
                get(|| async { ([(header::CONTENT_DISPOSITION, "attachment; filename=people.csv")], "1,2\n") }),
            )
            .layer(cors_layer(config))
    }

    fn header_list(response: &Response, name: HeaderName) -> String {
        response
            .headers()
            .get(name)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_ascii_lowercase()
    }

    #[tokio::test]
    async fn test_preflight_admits_credential_headers() {
        let request = Request::builder()
            .method(Method::OPTIONS)
            .uri("/datasources/7/download")
            .header(header::ORIGIN, "http://lemonade.local")
            .header(header::ACCESS_CONTROL_REQUEST_METHOD, "GET")
            .header(header::ACCESS_CONTROL_REQUEST_HEADERS, "x-auth-token,access-token,x-user-id")
            .body(Body::empty())
            .unwrap();
        let response = app(&CorsConfig::default()).oneshot(request).await.unwrap();

        let allowed = header_list(&response, header::ACCESS_CONTROL_ALLOW_HEADERS);
        for name in ["x-auth-token", "access-token", "x-user-id", "client"] {
            assert!(allowed.contains(name), "{} missing from {}", name, allowed);
        }
        assert_eq!(header_list(&response, header::ACCESS_CONTROL_ALLOW_ORIGIN), "*");
    }

    #[tokio::test]
    async fn test_download_exposes_content_disposition() {
        let config = CorsConfig {
            allowed_origins: vec!["http://lemonade.local".to_string()],
            allow_credentials: true,
        };
        let request = Request::builder()
            .uri("/datasources/7/download")
            .header(header::ORIGIN, "http://lemonade.local")
            .body(Body::empty())
            .unwrap();
        let response = app(&config).oneshot(request).await.unwrap();

        assert!(header_list(&response, header::ACCESS_CONTROL_EXPOSE_HEADERS).contains("content-disposition"));
        assert_eq!(
            header_list(&response, header::ACCESS_CONTROL_ALLOW_ORIGIN),
            "http://lemonade.local"
        );
        assert_eq!(header_list(&response, header::ACCESS_CONTROL_ALLOW_CREDENTIALS), "true");
    }

    #[tokio::test]
    async fn test_wildcard_origin_drops_credentials() {
        let config = CorsConfig {
            allowed_origins: vec!["*".to_string()],
            allow_credentials: true,
        };
        let request = Request::builder()
            .uri("/datasources/7/download")
            .header(header::ORIGIN, "http://elsewhere.local")
            .body(Body::empty())
            .unwrap();
        let response = app(&config).oneshot(request).await.unwrap();

        assert_eq!(header_list(&response, header::ACCESS_CONTROL_ALLOW_ORIGIN), "*");
        assert!(response
            .headers()
            .get(header::ACCESS_CONTROL_ALLOW_CREDENTIALS)
            .is_none());
    }

    #[tokio::test]
    async fn test_io_failure_details_follow_debug_state() {
        let failing = Router::new().route(
            "/boom",
            get(|| async { AppError::IoFailure("disk on fire".to_string()) }),
        );
        for (debug, expected) in [(true, "disk on fire"), (false, crate::error::IO_FAILURE_MESSAGE)] {
            let router = failing
                .clone()
                .layer(axum::middleware::map_response_with_state(debug, reveal_io_failure_details));
            let response = router
                .oneshot(Request::builder().uri("/boom").body(Body::empty()).unwrap())
                .await
                .unwrap();
            assert_eq!(response.status(), axum::http::StatusCode::INTERNAL_SERVER_ERROR);
            let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
            let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
            assert_eq!(body["message"], expected);
        }
    }
}

//! API response types
//!
//! Successful answers share one envelope: `{"status": "OK", "data": ...}`,
//! plus `pagination` on listings. Errors are rendered by
//! [`crate::error::AppError`] as `{"status": "ERROR", "kind": ..., "message": ...}`.

use crate::features::shared::PaginationMetadata;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

pub const STATUS_OK: &str = "OK";

/// Standard success response wrapper
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pagination: Option<PaginationMetadata>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            status: STATUS_OK,
            data: Some(data),
            pagination: None,
            message: None,
        }
    }

    pub fn paginated(data: T, pagination: PaginationMetadata) -> Self {
        Self {
            status: STATUS_OK,
            data: Some(data),
            pagination: Some(pagination),
            message: None,
        }
    }
}

impl ApiResponse<()> {
    /// `{"status": "OK"}`
    pub fn ok() -> Self {
        Self {
            status: STATUS_OK,
            data: None,
            pagination: None,
            message: None,
        }
    }

    pub fn message(message: impl Into<String>) -> Self {
        Self {
            message: Some(message.into()),
            ..Self::ok()
        }
    }
}

impl<T: Serialize> IntoResponse for ApiResponse<T> {
    fn into_response(self) -> Response {
        (StatusCode::OK, Json(self)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_envelopes() {
        assert_eq!(serde_json::to_value(ApiResponse::ok()).unwrap(), json!({"status": "OK"}));
        assert_eq!(
            serde_json::to_value(ApiResponse::success(vec![1, 2])).unwrap(),
            json!({"status": "OK", "data": [1, 2]})
        );
        assert_eq!(
            serde_json::to_value(ApiResponse::paginated(Vec::<i32>::new(), PaginationMetadata::new(1, 20, 0)))
                .unwrap(),
            json!({"status": "OK", "data": [], "pagination": {"page": 1, "size": 20, "total": 0, "pages": 0}})
        );
    }
}

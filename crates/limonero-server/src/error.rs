//! Wire-visible error taxonomy
//!
//! Every layer raises its own typed error; the conversions below implement
//! the gateway failure policy and decide which kind a client sees.

use crate::backend::{BackendError, BLOCK_ACCESS_FAILURE};
use crate::catalog::CatalogError;
use crate::codec::CodecError;
use crate::staging::StagingError;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::{json, Value};
use thiserror::Error;

/// Stable message of [`AppError::MisconfiguredBackend`]
pub const MISCONFIGURED_HDFS_MESSAGE: &str =
    "HDFS block access failed: set dfs.client.use.datanode.hostname=true in the storage configuration";

pub const IO_FAILURE_MESSAGE: &str = "An internal I/O error occurred";

/// Detail of an `IoFailure`, attached to the response extensions so a
/// router running with `debug` can put it back into the body
#[derive(Debug, Clone)]
pub struct IoFailureDetail(pub String);

pub type AppResult<T> = std::result::Result<T, AppError>;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Unauthenticated: {0}")]
    Unauthenticated(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Bad input ({cause}): {message}")]
    BadInput { cause: &'static str, message: String },

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Unsupported backend: {0}")]
    UnsupportedBackend(String),

    #[error("Unsupported operation: {0}")]
    UnsupportedOperation(String),

    #[error("HDFS block access failed: set dfs.client.use.datanode.hostname=true in the storage configuration")]
    MisconfiguredBackend,

    #[error("I/O failure: {0}")]
    IoFailure(String),
}

impl AppError {
    pub fn kind(&self) -> &'static str {
        match self {
            AppError::Unauthenticated(_) => "UNAUTHENTICATED",
            AppError::Forbidden(_) => "FORBIDDEN",
            AppError::NotFound(_) => "NOT_FOUND",
            AppError::InvalidArgument(_) => "INVALID_ARGUMENT",
            AppError::BadInput { .. } => "BAD_INPUT",
            AppError::Conflict(_) => "CONFLICT",
            AppError::UnsupportedBackend(_) => "UNSUPPORTED_BACKEND",
            AppError::UnsupportedOperation(_) => "UNSUPPORTED_OPERATION",
            AppError::MisconfiguredBackend => "MISCONFIGURED_BACKEND",
            AppError::IoFailure(_) => "IO_FAILURE",
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::Unauthenticated(_) => StatusCode::UNAUTHORIZED,
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::InvalidArgument(_)
            | AppError::BadInput { .. }
            | AppError::UnsupportedBackend(_)
            | AppError::UnsupportedOperation(_)
            | AppError::MisconfiguredBackend => StatusCode::BAD_REQUEST,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::IoFailure(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Message shown to the client; `IoFailure` details only with `debug`
    fn public_message(&self, debug: bool) -> String {
        match self {
            AppError::Unauthenticated(m)
            | AppError::Forbidden(m)
            | AppError::NotFound(m)
            | AppError::InvalidArgument(m)
            | AppError::Conflict(m)
            | AppError::UnsupportedBackend(m)
            | AppError::UnsupportedOperation(m) => m.clone(),
            AppError::BadInput { cause, message } => format!("{}: {}", cause, message),
            AppError::MisconfiguredBackend => MISCONFIGURED_HDFS_MESSAGE.to_string(),
            AppError::IoFailure(detail) if debug => detail.clone(),
            AppError::IoFailure(_) => IO_FAILURE_MESSAGE.to_string(),
        }
    }

    /// `{status:"ERROR",kind,message[,cause]}` envelope
    pub fn body(&self, debug: bool) -> Value {
        let mut body = json!({
            "status": "ERROR",
            "kind": self.kind(),
            "message": self.public_message(debug),
        });
        if let AppError::BadInput { cause, .. } = self {
            body["cause"] = json!(cause);
        }
        body
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        match &self {
            AppError::IoFailure(detail) => tracing::error!("I/O failure: {}", detail),
            AppError::MisconfiguredBackend => tracing::warn!("HDFS block access failed"),
            _ => tracing::debug!(kind = self.kind(), "{}", self),
        }

        let mut response = (status, Json(self.body(false))).into_response();
        if let AppError::IoFailure(detail) = self {
            response.extensions_mut().insert(IoFailureDetail(detail));
        }
        response
    }
}

impl From<BackendError> for AppError {
    fn from(e: BackendError) -> Self {
        if e.is_block_access_failure() {
            return AppError::MisconfiguredBackend;
        }
        match e {
            BackendError::NotFound(path) => AppError::NotFound(format!("Path not found: {}", path)),
            BackendError::AlreadyExists(path) => AppError::Conflict(format!("Target already exists: {}", path)),
            e @ BackendError::UnsupportedOperation { .. } => AppError::UnsupportedOperation(e.to_string()),
            BackendError::UnsupportedBackend(kind) => AppError::UnsupportedBackend(kind),
            e @ (BackendError::InvalidUrl { .. } | BackendError::Disabled(_)) => {
                AppError::InvalidArgument(e.to_string())
            }
            other => AppError::IoFailure(other.to_string()),
        }
    }
}

impl From<CodecError> for AppError {
    fn from(e: CodecError) -> Self {
        if let Some(cause) = e.cause() {
            return AppError::BadInput {
                cause,
                message: e.to_string(),
            };
        }
        match e {
            CodecError::Backend(backend) => backend.into(),
            e @ (CodecError::UnsupportedFormat { .. } | CodecError::InvalidArgument(_)) => {
                AppError::InvalidArgument(e.to_string())
            }
            other => {
                let message = other.to_string();
                if message.contains(BLOCK_ACCESS_FAILURE) {
                    AppError::MisconfiguredBackend
                } else {
                    AppError::IoFailure(message)
                }
            }
        }
    }
}

impl From<StagingError> for AppError {
    fn from(e: StagingError) -> Self {
        match e {
            StagingError::Backend(backend) => backend.into(),
            StagingError::AlreadyExists(path) => AppError::Conflict(format!("Target already exists: {}", path)),
            e @ (StagingError::IncompleteUpload { .. }
            | StagingError::InvalidFilename(_)
            | StagingError::InvalidChunk(_)) => AppError::InvalidArgument(e.to_string()),
        }
    }
}

impl From<CatalogError> for AppError {
    fn from(e: CatalogError) -> Self {
        match e {
            e @ CatalogError::NotFound { .. } => AppError::NotFound(e.to_string()),
            CatalogError::Conflict(message) => AppError::Conflict(message),
            other => AppError::IoFailure(other.to_string()),
        }
    }
}

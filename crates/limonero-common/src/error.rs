//! Error types shared by Limonero crates

use thiserror::Error;

/// Result type alias for common operations
pub type Result<T> = std::result::Result<T, CommonError>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CommonError {
    #[error("Unknown {kind} value: '{value}'")]
    UnknownVariant { kind: &'static str, value: String },

    #[error("Invalid identifier: {0}")]
    InvalidIdentifier(String),
}

//! Limonero Common Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Shared catalog types, error handling and logging for the Limonero workspace.
//!
//! # Overview
//!
//! - **Types**: catalog records (storages, data sources, attributes, models,
//!   permissions) and the caller identity handed over by the HTTP layer
//! - **Error Handling**: parse errors for wire enumerations
//! - **Logging**: tracing subscriber bootstrap shared by every binary
//!
//! # Example
//!
//! ```no_run
//! use limonero_common::types::{AttributeType, StorageType};
//!
//! let kind: StorageType = "HDFS".parse().unwrap();
//! assert_eq!(kind, StorageType::Hdfs);
//! assert_eq!(AttributeType::Decimal.as_str(), "DECIMAL");
//! ```

pub mod error;
pub mod logging;
pub mod types;

pub use error::{CommonError, Result};

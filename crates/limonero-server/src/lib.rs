//! Limonero Server Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Data-source gateway: a single HTTP surface over heterogeneous storages
//! (HDFS, the local filesystem, S3, JDBC databases and Hive).
//!
//! # Overview
//!
//! - **Uploads**: resumable chunked uploads, assembled and registered in the
//!   catalog exactly once
//! - **Downloads**: streamed artifacts, optionally authorized by a signed link
//! - **Sampling**: the first rows of a dataset as typed cells
//! - **Inference**: column names and types derived from the data itself
//!
//! # Architecture
//!
//! - [`backend`]: storage adapters behind one byte-level trait
//! - [`staging`]: chunk store and the assembler for resumable uploads
//! - [`codec`]: format readers (CSV, Parquet, DBF, JSON, SQL tables)
//! - [`catalog`]: storages, data sources and models, in Postgres or in memory
//! - [`gateway`]: the operations, wiring the above together
//! - [`features`]: HTTP slices calling into the gateway
//!
//! # Example
//!
//! ```no_run
//! use limonero_server::{api, config::Config};
//!
//! # async fn run(state: api::AppState) -> anyhow::Result<()> {
//! let config = Config::load()?;
//! let app = api::create_router(state, &config.cors);
//! let listener = tokio::net::TcpListener::bind(("0.0.0.0", config.gateway_port)).await?;
//! axum::serve(listener, app).await?;
//! # Ok(())
//! # }
//! ```

pub mod api;
pub mod backend;
pub mod catalog;
pub mod codec;
pub mod config;
pub mod error;
pub mod features;
pub mod gateway;
pub mod middleware;
pub mod staging;

pub use error::{AppError, AppResult};
pub use gateway::Gateway;

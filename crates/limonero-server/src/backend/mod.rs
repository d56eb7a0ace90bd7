//! Backend adapters
//!
//! One adapter per backend kind. Every adapter exposes the same small
//! capability set through [`Backend`]; capabilities a backend cannot provide
//! fail with [`BackendError::UnsupportedOperation`].
//!
//! Paths handed to an adapter are absolute paths inside the backend
//! namespace (`/tmp/t/limonero/data/...`), never URLs. [`StorageLocation`]
//! converts between the two.

use async_trait::async_trait;
use bytes::Bytes;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWriteExt};
use url::Url;

pub mod hdfs;
pub mod hive;
pub mod local;
pub mod mysql;
pub mod registry;
pub mod s3;
pub mod sql;

pub use registry::{BackendOptions, BackendRegistry};

/// Owned byte stream handed across adapter boundaries
pub type ByteReader = Pin<Box<dyn AsyncRead + Send + 'static>>;

/// One result row as an ordered list of `(column, raw value)` pairs
pub type SqlRow = Vec<(String, serde_json::Value)>;

/// Message fragment HDFS returns when datanodes are unreachable by address
pub const BLOCK_ACCESS_FAILURE: &str = "Could not obtain block";

pub type BackendResult<T> = std::result::Result<T, BackendError>;

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("Path not found: {0}")]
    NotFound(String),

    #[error("Path already exists: {0}")]
    AlreadyExists(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{backend} request failed with status {status}: {message}")]
    Remote {
        backend: &'static str,
        status: u16,
        message: String,
    },

    #[error("HTTP transport error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("SQL error: {0}")]
    Sql(#[from] sqlx::Error),

    #[error("Object store error: {0}")]
    ObjectStore(String),

    #[error("Operation '{operation}' is not supported by the {backend} backend")]
    UnsupportedOperation {
        backend: &'static str,
        operation: &'static str,
    },

    #[error("Unsupported backend: {0}")]
    UnsupportedBackend(String),

    #[error("Invalid storage URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("Storage {0} is disabled")]
    Disabled(i32),
}

impl BackendError {
    pub fn invalid_url(url: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidUrl {
            url: url.into(),
            reason: reason.into(),
        }
    }

    /// HDFS reports unreachable datanodes with a well-known message
    pub fn is_block_access_failure(&self) -> bool {
        self.to_string().contains(BLOCK_ACCESS_FAILURE)
    }
}

/// Description of one result column as reported by a SQL backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnDescription {
    pub name: String,
    pub raw_type: String,
    pub size: Option<i32>,
    pub precision: Option<i32>,
    pub scale: Option<i32>,
    pub nullable: bool,
}

/// A spooled copy of a byte stream, removed when the value is dropped
#[derive(Debug)]
pub struct LocalFile {
    path: PathBuf,
    _temp: tempfile::TempPath,
}

impl LocalFile {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Spool a byte stream into a fresh temporary file
pub async fn spool_to_temp(mut reader: ByteReader) -> BackendResult<(LocalFile, u64)> {
    let (file, temp) = tempfile::NamedTempFile::new()?.into_parts();
    let mut out = tokio::fs::File::from_std(file);
    let written = tokio::io::copy(&mut reader, &mut out).await?;
    out.flush().await?;

    Ok((
        LocalFile {
            path: temp.to_path_buf(),
            _temp: temp,
        },
        written,
    ))
}

/// Uniform capability set of a storage backend
#[async_trait]
pub trait Backend: Send + Sync {
    /// Short backend name used in logs and error messages
    fn kind(&self) -> &'static str;

    fn unsupported(&self, operation: &'static str) -> BackendError {
        BackendError::UnsupportedOperation {
            backend: self.kind(),
            operation,
        }
    }

    /// Open `path` for reading from offset 0
    async fn open_read(&self, _path: &str) -> BackendResult<ByteReader> {
        Err(self.unsupported("open_read"))
    }

    /// Length of the file at `path` in bytes
    async fn size(&self, _path: &str) -> BackendResult<u64> {
        Err(self.unsupported("size"))
    }

    /// `length` bytes of `path` starting at `offset`. Fewer bytes come back
    /// only when the range runs past the end of the file.
    async fn read_range(&self, _path: &str, _offset: u64, _length: u64) -> BackendResult<Bytes> {
        Err(self.unsupported("read_range"))
    }

    /// Drain `reader` into `path`, replacing any previous content.
    /// Returns the number of bytes written.
    async fn write(&self, _path: &str, _reader: ByteReader) -> BackendResult<u64> {
        Err(self.unsupported("write"))
    }

    async fn exists(&self, _path: &str) -> BackendResult<bool> {
        Err(self.unsupported("exists"))
    }

    async fn mkdirs(&self, _path: &str) -> BackendResult<()> {
        Err(self.unsupported("mkdirs"))
    }

    /// Names (not paths) of the files directly under `path`, in no particular order
    async fn list_files(&self, _path: &str) -> BackendResult<Vec<String>> {
        Err(self.unsupported("list_files"))
    }

    /// Remove a file or a directory tree. Missing paths are not an error.
    async fn delete(&self, _path: &str) -> BackendResult<()> {
        Err(self.unsupported("delete"))
    }

    async fn rename(&self, _from: &str, _to: &str) -> BackendResult<()> {
        Err(self.unsupported("rename"))
    }

    /// Create an empty file only if nothing exists at `path`.
    /// Returns `false` when the path was already taken.
    async fn create_exclusive(&self, _path: &str) -> BackendResult<bool> {
        Err(self.unsupported("create_exclusive"))
    }

    /// Append `parts` in the given order into `target`. The parts stay in
    /// place; removing them is up to the caller once the merge is recorded.
    async fn concat_merge(&self, _parts: &[String], _target: &str) -> BackendResult<()> {
        Err(self.unsupported("concat_merge"))
    }

    /// Column metadata of a SQL statement, without fetching rows
    async fn query_columns(&self, _sql: &str) -> BackendResult<Vec<ColumnDescription>> {
        Err(self.unsupported("query_columns"))
    }

    /// At most `limit` rows of a SQL statement
    async fn query_rows(&self, _sql: &str, _limit: usize) -> BackendResult<Vec<SqlRow>> {
        Err(self.unsupported("query_rows"))
    }
}

/// Maps between catalog URLs and backend paths for one storage
#[derive(Debug, Clone)]
pub struct StorageLocation {
    base: Url,
}

impl StorageLocation {
    pub fn parse(storage_url: &str) -> BackendResult<Self> {
        let base = Url::parse(storage_url.trim_start_matches("jdbc:"))
            .map_err(|e| BackendError::invalid_url(storage_url, e.to_string()))?;
        Ok(Self { base })
    }

    pub fn scheme(&self) -> &str {
        self.base.scheme()
    }

    pub fn url(&self) -> &Url {
        &self.base
    }

    /// Root directory of the storage inside the backend, without trailing slash
    pub fn root(&self) -> String {
        normalize_path(self.base.path())
    }

    /// Backend path of a data URL living on this storage
    pub fn path_of(&self, data_url: &str) -> BackendResult<String> {
        let url = Url::parse(data_url).map_err(|e| BackendError::invalid_url(data_url, e.to_string()))?;
        if url.scheme() != self.base.scheme() {
            return Err(BackendError::invalid_url(
                data_url,
                format!("expected scheme '{}'", self.base.scheme()),
            ));
        }
        let path = percent_decode(url.path());
        Ok(normalize_path(&path))
    }

    /// Catalog URL of a backend path on this storage
    pub fn url_for(&self, path: &str) -> String {
        let mut url = self.base.clone();
        url.set_path(path);
        url.set_query(None);
        url.to_string()
    }
}

fn percent_decode(path: &str) -> String {
    let bytes = path.as_bytes();
    let mut decoded = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            let hex = std::str::from_utf8(&bytes[i + 1..i + 3]).unwrap_or("");
            if let Ok(byte) = u8::from_str_radix(hex, 16) {
                decoded.push(byte);
                i += 3;
                continue;
            }
        }
        decoded.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&decoded).into_owned()
}

/// Collapse repeated slashes and drop the trailing one (root stays "/")
pub fn normalize_path(path: &str) -> String {
    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    format!("/{}", segments.join("/"))
}

/// Join path segments under `base`
pub fn join_path(base: &str, segments: &[&str]) -> String {
    let mut joined = base.trim_end_matches('/').to_string();
    for segment in segments {
        joined.push('/');
        joined.push_str(segment.trim_matches('/'));
    }
    normalize_path(&joined)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_and_join() {
        assert_eq!(normalize_path("/tmp/t/"), "/tmp/t");
        assert_eq!(normalize_path("//a//b"), "/a/b");
        assert_eq!(normalize_path(""), "/");
        assert_eq!(join_path("/tmp/t", &["tmp", "upload", "x.csv"]), "/tmp/t/tmp/upload/x.csv");
        assert_eq!(join_path("/", &["limonero"]), "/limonero");
    }

    #[test]
    fn test_location_of_local_storage() {
        let location = StorageLocation::parse("file:///tmp/t/").unwrap();
        assert_eq!(location.scheme(), "file");
        assert_eq!(location.root(), "/tmp/t");
        assert_eq!(
            location.url_for("/tmp/t/limonero/data/x.csv"),
            "file:///tmp/t/limonero/data/x.csv"
        );
        assert_eq!(
            location.path_of("file:///tmp/t/limonero/data/x.csv").unwrap(),
            "/tmp/t/limonero/data/x.csv"
        );
    }

    #[test]
    fn test_location_of_hdfs_storage() {
        let location = StorageLocation::parse("hdfs://namenode:9000/").unwrap();
        assert_eq!(location.root(), "/");
        assert_eq!(
            location.url_for("/limonero/data/a.csv"),
            "hdfs://namenode:9000/limonero/data/a.csv"
        );
        assert!(location.path_of("file:///limonero/data/a.csv").is_err());
    }

    #[test]
    fn test_path_of_decodes_escapes() {
        let location = StorageLocation::parse("file:///data/").unwrap();
        assert_eq!(
            location.path_of("file:///data/my%20file.csv").unwrap(),
            "/data/my file.csv"
        );
    }

    #[test]
    fn test_block_access_failure_detection() {
        let err = BackendError::Remote {
            backend: "hdfs",
            status: 500,
            message: "java.io.IOException: Could not obtain block: BP-1 file=/x".to_string(),
        };
        assert!(err.is_block_access_failure());
        assert!(!BackendError::NotFound("/x".to_string()).is_block_access_failure());
    }
}

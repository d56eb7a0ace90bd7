//! Codec layer
//!
//! Format-specific readers used for sampling and schema inference. Every
//! codec produces the same representation: rows of `(attribute, Cell)` pairs
//! and lists of [`Attribute`]s.
//!
//! File codecs parse synchronously on the blocking pool; the backend stream
//! is bridged with [`tokio_util::io::SyncIoBridge`] so no object is ever
//! buffered whole in memory.

use crate::backend::{Backend, BackendError};
use async_trait::async_trait;
use bigdecimal::BigDecimal;
use limonero_common::types::{Attribute, DataSource, DataSourceFormat, StorageType};
use serde::ser::{SerializeMap, SerializeSeq};
use serde::{Deserialize, Serialize, Serializer};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

pub mod convert;
pub mod csv;
pub mod dbf;
pub mod infer;
pub mod input;
pub mod jsonl;
pub mod parquet;
pub mod sql;

pub use self::csv::CsvCodec;
pub use self::dbf::DbfCodec;
pub use self::jsonl::JsonLinesCodec;
pub use self::parquet::ParquetCodec;
pub use self::sql::SqlCodec;

pub type CodecResult<T> = std::result::Result<T, CodecError>;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("Encoding error: {0}")]
    Encoding(String),

    #[error("Malformed CSV: {0}")]
    MalformedCsv(String),

    #[error("Unsupported column type: {0}")]
    UnsupportedColumnType(String),

    #[error("Malformed JSON: {0}")]
    MalformedJson(String),

    #[error("Malformed DBF: {0}")]
    MalformedDbf(String),

    #[error("Parquet error: {0}")]
    Parquet(String),

    #[error("Format {format} is not supported on {storage} storages")]
    UnsupportedFormat {
        format: DataSourceFormat,
        storage: StorageType,
    },

    #[error("{0}")]
    InvalidArgument(String),

    #[error(transparent)]
    Backend(#[from] BackendError),

    #[error("IO error: {0}")]
    Io(std::io::Error),

    #[error("Codec task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl CodecError {
    /// Cause class reported with `BadInput`, `None` for errors of other kinds
    pub fn cause(&self) -> Option<&'static str> {
        match self {
            CodecError::Encoding(_) => Some("encoding"),
            CodecError::MalformedCsv(_) => Some("malformed_csv"),
            CodecError::UnsupportedColumnType(_) => Some("unsupported_column_type"),
            CodecError::MalformedJson(_) => Some("malformed_json"),
            CodecError::MalformedDbf(_) => Some("malformed_dbf"),
            CodecError::Parquet(_) => Some("parquet"),
            _ => None,
        }
    }
}

impl From<std::io::Error> for CodecError {
    fn from(e: std::io::Error) -> Self {
        match input::malformed_text(&e) {
            Some(malformed) => CodecError::Encoding(malformed.to_string()),
            None => CodecError::Io(e),
        }
    }
}

impl From<::parquet::errors::ParquetError> for CodecError {
    fn from(e: ::parquet::errors::ParquetError) -> Self {
        match e {
            ::parquet::errors::ParquetError::External(inner) => match inner.downcast::<BackendError>() {
                Ok(backend) => CodecError::Backend(*backend),
                Err(inner) => match inner.downcast::<std::io::Error>() {
                    Ok(io) => CodecError::Io(*io),
                    Err(other) => CodecError::Parquet(other.to_string()),
                },
            },
            other => CodecError::Parquet(other.to_string()),
        }
    }
}

impl From<arrow::error::ArrowError> for CodecError {
    fn from(e: arrow::error::ArrowError) -> Self {
        match e {
            arrow::error::ArrowError::IoError(_, io) => CodecError::Io(io),
            other => CodecError::Parquet(other.to_string()),
        }
    }
}

// ============================================================================
// Row representation
// ============================================================================

/// One typed value of a sampled row
#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Null,
    Bool(bool),
    Integer(i64),
    Float(f64),
    /// Serialized as a JSON string to keep every digit
    Decimal(BigDecimal),
    Text(String),
    List(Vec<Cell>),
}

impl Serialize for Cell {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Cell::Null => serializer.serialize_none(),
            Cell::Bool(b) => serializer.serialize_bool(*b),
            Cell::Integer(i) => serializer.serialize_i64(*i),
            Cell::Float(f) => serializer.serialize_f64(*f),
            Cell::Decimal(d) => serializer.serialize_str(&d.to_string()),
            Cell::Text(s) => serializer.serialize_str(s),
            Cell::List(items) => {
                let mut seq = serializer.serialize_seq(Some(items.len()))?;
                for item in items {
                    seq.serialize_element(item)?;
                }
                seq.end()
            }
        }
    }
}

/// Ordered mapping from attribute name to value
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Row(pub Vec<(String, Cell)>);

impl Row {
    pub fn get(&self, name: &str) -> Option<&Cell> {
        self.0.iter().find(|(n, _)| n == name).map(|(_, c)| c)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Serialize for Row {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (name, cell) in &self.0 {
            map.serialize_entry(name, cell)?;
        }
        map.end()
    }
}

// ============================================================================
// Parse options
// ============================================================================

/// Overrides accepted by schema inference; persisted with the schema
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct InferOptions {
    pub delimiter: Option<String>,
    pub quote_char: Option<String>,
    pub encoding: Option<String>,
    pub use_header: Option<bool>,
    pub treat_as_missing: Option<String>,
    pub record_delimiter: Option<String>,
}

impl InferOptions {
    /// Write the overrides into the data source's parse options
    pub fn apply(&self, data_source: &mut DataSource) {
        if let Some(delimiter) = &self.delimiter {
            data_source.attribute_delimiter = Some(delimiter.clone());
        }
        if let Some(quote) = &self.quote_char {
            data_source.text_delimiter = Some(quote.clone());
        }
        if let Some(encoding) = &self.encoding {
            data_source.encoding = Some(encoding.clone());
        }
        if let Some(use_header) = self.use_header {
            data_source.is_first_line_header = use_header;
        }
        if let Some(missing) = &self.treat_as_missing {
            data_source.treat_as_missing = Some(missing.clone());
        }
        if let Some(record_delimiter) = &self.record_delimiter {
            data_source.record_delimiter = Some(record_delimiter.clone());
        }
    }
}

/// Replace the `{tab}`/`{new_line}` placeholders and backslash escapes
pub fn unescape_delimiter(raw: &str) -> String {
    raw.replace("{tab}", "\t")
        .replace("{new_line}", "\n")
        .replace("\\t", "\t")
        .replace("\\n", "\n")
        .replace("\\r", "\r")
}

fn single_byte(option: &str, raw: &str) -> CodecResult<u8> {
    let value = unescape_delimiter(raw);
    match value.as_bytes() {
        [byte] => Ok(*byte),
        _ => Err(CodecError::InvalidArgument(format!(
            "{} must be a single ASCII character, got '{}'",
            option, raw
        ))),
    }
}

/// Record terminator of a delimited file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordTerminator {
    /// `\n`, `\r` or `\r\n`
    Newline,
    Byte(u8),
}

/// Parse settings derived from a data source
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseOptions {
    pub delimiter: u8,
    pub quote: u8,
    pub terminator: RecordTerminator,
    pub has_header: bool,
    pub multiline: bool,
    pub missing: Vec<String>,
    pub encoding: Option<String>,
}

impl Default for ParseOptions {
    fn default() -> Self {
        Self {
            delimiter: b',',
            quote: b'"',
            terminator: RecordTerminator::Newline,
            has_header: false,
            multiline: false,
            missing: Vec::new(),
            encoding: None,
        }
    }
}

impl ParseOptions {
    pub fn from_data_source(data_source: &DataSource) -> CodecResult<Self> {
        let delimiter = match data_source.attribute_delimiter.as_deref().filter(|d| !d.is_empty()) {
            Some(raw) => single_byte("attribute delimiter", raw)?,
            None => b',',
        };
        let quote = match data_source.text_delimiter.as_deref().filter(|q| !q.is_empty()) {
            Some(raw) => single_byte("text delimiter", raw)?,
            None => b'"',
        };
        let terminator = match data_source.record_delimiter.as_deref().map(unescape_delimiter) {
            None => RecordTerminator::Newline,
            Some(value) if value.is_empty() || value == "\n" || value == "\r\n" || value == "\r" => {
                RecordTerminator::Newline
            }
            Some(value) => match value.as_bytes() {
                [byte] => RecordTerminator::Byte(*byte),
                _ => {
                    return Err(CodecError::InvalidArgument(format!(
                        "record delimiter must be a single character, got '{}'",
                        value
                    )))
                }
            },
        };
        let missing = data_source
            .treat_as_missing
            .as_deref()
            .map(|m| m.split(',').map(|t| t.trim().to_string()).filter(|t| !t.is_empty()).collect())
            .unwrap_or_default();

        Ok(Self {
            delimiter,
            quote,
            terminator,
            has_header: data_source.is_first_line_header,
            multiline: data_source.is_multiline,
            missing,
            encoding: data_source.encoding.clone().filter(|e| !e.trim().is_empty()),
        })
    }

    pub fn is_missing(&self, value: &str) -> bool {
        let trimmed = value.trim();
        trimmed.is_empty() || self.missing.iter().any(|m| m == trimmed)
    }
}

// ============================================================================
// Codecs
// ============================================================================

/// Everything a codec needs to read one data source
#[derive(Clone)]
pub struct SourceInput {
    pub backend: Arc<dyn Backend>,
    /// Backend path of file-based sources
    pub path: Option<String>,
    /// SQL text of query-based sources
    pub command: Option<String>,
    /// Declared attributes, empty when the schema is unknown
    pub attributes: Vec<Attribute>,
    pub options: ParseOptions,
}

impl SourceInput {
    pub fn require_path(&self) -> CodecResult<&str> {
        self.path
            .as_deref()
            .ok_or_else(|| CodecError::InvalidArgument("data source has no file path".to_string()))
    }

    pub fn require_command(&self) -> CodecResult<&str> {
        self.command
            .as_deref()
            .filter(|c| !c.trim().is_empty())
            .ok_or_else(|| CodecError::InvalidArgument("data source has no SQL command".to_string()))
    }
}

impl std::fmt::Debug for SourceInput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SourceInput")
            .field("backend", &self.backend.kind())
            .field("path", &self.path)
            .field("command", &self.command)
            .field("attributes", &self.attributes.len())
            .field("options", &self.options)
            .finish()
    }
}

#[async_trait]
pub trait Codec: Send + Sync {
    fn name(&self) -> &'static str;

    /// First `limit` records of the source
    async fn sample(&self, input: &SourceInput, limit: usize) -> CodecResult<Vec<Row>>;

    /// Attribute list of the source
    async fn infer(&self, input: &SourceInput) -> CodecResult<Vec<Attribute>>;
}

/// Codec selection keyed by `(format, storage type)`
#[derive(Clone)]
pub struct CodecRegistry {
    codecs: HashMap<(DataSourceFormat, StorageType), Arc<dyn Codec>>,
}

impl CodecRegistry {
    pub fn new() -> Self {
        let mut registry = Self {
            codecs: HashMap::new(),
        };

        let csv: Arc<dyn Codec> = Arc::new(CsvCodec);
        let json: Arc<dyn Codec> = Arc::new(JsonLinesCodec);
        let parquet: Arc<dyn Codec> = Arc::new(ParquetCodec);
        let dbf: Arc<dyn Codec> = Arc::new(DbfCodec);
        for storage in [StorageType::Local, StorageType::Hdfs, StorageType::S3] {
            registry.register(DataSourceFormat::Csv, storage, csv.clone());
            registry.register(DataSourceFormat::Json, storage, json.clone());
            registry.register(DataSourceFormat::Parquet, storage, parquet.clone());
            registry.register(DataSourceFormat::Shapefile, storage, dbf.clone());
        }

        let sql: Arc<dyn Codec> = Arc::new(SqlCodec);
        registry.register(DataSourceFormat::Jdbc, StorageType::Jdbc, sql.clone());
        for storage in [StorageType::Hive, StorageType::HiveWarehouse] {
            registry.register(DataSourceFormat::Hive, storage, sql.clone());
            registry.register(DataSourceFormat::Jdbc, storage, sql.clone());
        }

        registry
    }

    pub fn register(&mut self, format: DataSourceFormat, storage: StorageType, codec: Arc<dyn Codec>) {
        self.codecs.insert((format, storage), codec);
    }

    pub fn get(&self, format: DataSourceFormat, storage: StorageType) -> CodecResult<Arc<dyn Codec>> {
        self.codecs
            .get(&(format, storage))
            .cloned()
            .ok_or(CodecError::UnsupportedFormat { format, storage })
    }
}

impl Default for CodecRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for CodecRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CodecRegistry")
            .field("codecs", &self.codecs.len())
            .finish()
    }
}

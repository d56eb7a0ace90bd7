//! Catalog types shared across Limonero
//!
//! These mirror the rows of the relational catalog. Enumerations carry their
//! wire names (`"HDFS"`, `"DECIMAL"`, ...) which are also the values stored in
//! the catalog tables.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::CommonError;

macro_rules! wire_enum {
    (
        $(#[$meta:meta])*
        $name:ident {
            $( $(#[$vmeta:meta])* $variant:ident => $wire:literal ),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub enum $name {
            $( $(#[$vmeta])* #[serde(rename = $wire)] $variant ),+
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $wire),+
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl std::str::FromStr for $name {
            type Err = CommonError;

            fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
                match s.trim().to_ascii_uppercase().as_str() {
                    $($wire => Ok($name::$variant),)+
                    _ => Err(CommonError::UnknownVariant {
                        kind: stringify!($name),
                        value: s.to_string(),
                    }),
                }
            }
        }
    };
}

wire_enum! {
    /// Kind of backend a storage points at
    StorageType {
        Local => "LOCAL",
        Hdfs => "HDFS",
        Jdbc => "JDBC",
        Hive => "HIVE",
        HiveWarehouse => "HIVE_WAREHOUSE",
        MongoDb => "MONGODB",
        ElasticSearch => "ELASTIC_SEARCH",
        Kafka => "KAFKA",
        Cassandra => "CASSANDRA",
        /// S3-compatible object store
        S3 => "S3",
    }
}

impl StorageType {
    /// Whether the storage holds files (as opposed to answering SQL)
    pub fn is_file_based(&self) -> bool {
        matches!(self, StorageType::Local | StorageType::Hdfs | StorageType::S3)
    }
}

wire_enum! {
    /// Container format of a data source
    DataSourceFormat {
        Csv => "CSV",
        Custom => "CUSTOM",
        GeoJson => "GEO_JSON",
        Hdf5 => "HDF5",
        Jdbc => "JDBC",
        Hive => "HIVE",
        Json => "JSON",
        Npy => "NPY",
        Parquet => "PARQUET",
        Pickle => "PICKLE",
        Shapefile => "SHAPEFILE",
        Text => "TEXT",
        XmlFile => "XML_FILE",
        Unknown => "UNKNOWN",
    }
}

impl DataSourceFormat {
    /// Guess the format of an uploaded file from its extension.
    ///
    /// Only the extensions the upload flow recognises are mapped; anything
    /// else is plain text.
    pub fn from_filename(filename: &str) -> Self {
        let extension = filename
            .rsplit_once('.')
            .map(|(_, ext)| ext.to_ascii_lowercase())
            .unwrap_or_default();
        match extension.as_str() {
            "csv" => DataSourceFormat::Csv,
            "json" => DataSourceFormat::Json,
            "xml" => DataSourceFormat::XmlFile,
            _ => DataSourceFormat::Text,
        }
    }
}

wire_enum! {
    /// Catalog type of an attribute (column)
    AttributeType {
        Integer => "INTEGER",
        Long => "LONG",
        Float => "FLOAT",
        Double => "DOUBLE",
        Decimal => "DECIMAL",
        Character => "CHARACTER",
        Text => "TEXT",
        Date => "DATE",
        DateTime => "DATETIME",
        Time => "TIME",
        Timestamp => "TIMESTAMP",
        Binary => "BINARY",
        Vector => "VECTOR",
        LatLong => "LAT_LONG",
        Enum => "ENUM",
    }
}

wire_enum! {
    /// Permission a user holds over a shared entity
    PermissionType {
        Read => "READ",
        Write => "WRITE",
        Manage => "MANAGE",
    }
}

wire_enum! {
    /// Whether the schema of a data source has been inferred
    InitializationStatus {
        NoInitialized => "NO_INITIALIZED",
        Initializing => "INITIALIZING",
        Initialized => "INITIALIZED",
    }
}

// ============================================================================
// Catalog Records
// ============================================================================

/// A backend (filesystem or database) and how to reach it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Storage {
    pub id: i32,
    pub name: String,
    #[serde(rename = "type")]
    pub storage_type: StorageType,
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extra_params: Option<serde_json::Value>,
    pub enabled: bool,
}

/// A typed column of a dataset
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attribute {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<i32>,
    pub name: String,
    #[serde(rename = "type")]
    pub attribute_type: AttributeType,
    pub size: Option<i32>,
    pub precision: Option<i32>,
    pub scale: Option<i32>,
    pub nullable: bool,
    pub feature: bool,
    pub label: bool,
    pub key: bool,
}

impl Attribute {
    /// Creates a non-nullable feature attribute with no size information
    pub fn new(name: impl Into<String>, attribute_type: AttributeType) -> Self {
        Self {
            id: None,
            name: name.into(),
            attribute_type,
            size: None,
            precision: None,
            scale: None,
            nullable: false,
            feature: true,
            label: false,
            key: false,
        }
    }

    pub fn with_size(mut self, size: Option<i32>) -> Self {
        self.size = size;
        self
    }

    pub fn with_precision(mut self, precision: Option<i32>, scale: Option<i32>) -> Self {
        self.precision = precision;
        self.scale = scale;
        self
    }

    pub fn with_nullable(mut self, nullable: bool) -> Self {
        self.nullable = nullable;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataSourcePermission {
    pub data_source_id: i32,
    pub user_id: i32,
    pub permission: PermissionType,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelPermission {
    pub model_id: i32,
    pub user_id: i32,
    pub permission: PermissionType,
}

/// A catalog entry identifying one dataset
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataSource {
    pub id: i32,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub storage_id: i32,
    pub url: String,
    pub format: DataSourceFormat,
    pub attribute_delimiter: Option<String>,
    pub text_delimiter: Option<String>,
    pub record_delimiter: Option<String>,
    pub encoding: Option<String>,
    pub is_first_line_header: bool,
    pub is_multiline: bool,
    pub treat_as_missing: Option<String>,
    pub command: Option<String>,
    pub is_public: bool,
    pub user_id: i32,
    pub user_login: String,
    pub user_name: String,
    pub initialization: InitializationStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub estimated_size_in_mb: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub upload_identifier: Option<String>,
    pub created: DateTime<Utc>,
    pub updated: DateTime<Utc>,
    pub attributes: Vec<Attribute>,
    pub permissions: Vec<DataSourcePermission>,
}

/// A binary artifact produced by a workflow
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Model {
    pub id: i32,
    pub name: String,
    pub storage_id: i32,
    /// Path relative to the storage URL
    pub path: String,
    #[serde(rename = "type")]
    pub model_type: String,
    pub deployment_status: String,
    pub user_id: i32,
    pub user_login: String,
    pub user_name: String,
    pub created: DateTime<Utc>,
    pub permissions: Vec<ModelPermission>,
}

// ============================================================================
// Caller Identity
// ============================================================================

/// Identity of the caller, established by the HTTP layer.
///
/// Users with id 0 or 1 are system users and bypass permission filtering.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub id: i32,
    pub login: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub locale: Option<String>,
}

impl Identity {
    pub const SYSTEM_USER_IDS: [i32; 2] = [0, 1];

    /// The identity used for inter-service calls authenticated by the shared secret
    pub fn system() -> Self {
        Self {
            id: 0,
            login: "system".to_string(),
            name: "System".to_string(),
            locale: None,
        }
    }

    pub fn user(id: i32, login: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id,
            login: login.into(),
            name: name.into(),
            locale: None,
        }
    }

    pub fn is_system(&self) -> bool {
        Self::SYSTEM_USER_IDS.contains(&self.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_type_round_trips_wire_names() {
        for kind in StorageType::ALL {
            assert_eq!(kind.as_str().parse::<StorageType>().unwrap(), *kind);
        }
        assert_eq!("hive_warehouse".parse::<StorageType>().unwrap(), StorageType::HiveWarehouse);
    }

    #[test]
    fn test_unknown_variant_is_rejected() {
        let err = "FTP".parse::<StorageType>().unwrap_err();
        assert_eq!(
            err,
            CommonError::UnknownVariant {
                kind: "StorageType",
                value: "FTP".to_string()
            }
        );
    }

    #[test]
    fn test_format_from_filename() {
        assert_eq!(DataSourceFormat::from_filename("people.csv"), DataSourceFormat::Csv);
        assert_eq!(DataSourceFormat::from_filename("PEOPLE.CSV"), DataSourceFormat::Csv);
        assert_eq!(DataSourceFormat::from_filename("events.json"), DataSourceFormat::Json);
        assert_eq!(DataSourceFormat::from_filename("doc.xml"), DataSourceFormat::XmlFile);
        assert_eq!(DataSourceFormat::from_filename("data.parquet"), DataSourceFormat::Text);
        assert_eq!(DataSourceFormat::from_filename("README"), DataSourceFormat::Text);
    }

    #[test]
    fn test_attribute_serializes_type_field() {
        let attr = Attribute::new("salary", AttributeType::Decimal).with_precision(Some(14), Some(2));
        let json = serde_json::to_value(&attr).unwrap();
        assert_eq!(json["type"], "DECIMAL");
        assert_eq!(json["precision"], 14);
        assert_eq!(json["scale"], 2);
        assert_eq!(json["nullable"], false);
    }

    #[test]
    fn test_system_identity() {
        assert!(Identity::system().is_system());
        assert!(Identity::user(1, "admin", "Admin").is_system());
        assert!(!Identity::user(42, "bob", "Bob").is_system());
    }

    #[test]
    fn test_file_based_storage_types() {
        assert!(StorageType::Local.is_file_based());
        assert!(StorageType::Hdfs.is_file_based());
        assert!(StorageType::S3.is_file_based());
        assert!(!StorageType::Jdbc.is_file_based());
        assert!(!StorageType::Hive.is_file_based());
    }
}

//! Shared fixtures for the gateway and API tests
#![allow(dead_code)]

use chrono::{Duration, Utc};
use limonero_common::types::{DataSource, DataSourceFormat, InitializationStatus, Storage, StorageType};
use limonero_server::{
    backend::{BackendOptions, BackendRegistry},
    catalog::MemoryCatalog,
    codec::CodecRegistry,
    Gateway,
};
use std::sync::Arc;
use tempfile::TempDir;

pub const INSTANCE: &str = "lemon";

pub const PEOPLE_CSV: &[u8] = b"id,name,salary\n1,Bob,12.30\n2,Alice,999999999999\n";

/// A gateway over a memory catalog holding one local storage rooted in a
/// temporary directory
pub struct TestGateway {
    pub dir: TempDir,
    pub catalog: Arc<MemoryCatalog>,
    pub storage: Storage,
    pub gateway: Gateway,
}

impl TestGateway {
    pub fn new() -> Self {
        Self::with_backends(BackendRegistry::new(BackendOptions::default()))
    }

    pub fn with_backends(backends: BackendRegistry) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let catalog = Arc::new(MemoryCatalog::new());
        let storage = catalog.add_storage(local_storage(&dir));
        let gateway = Gateway::new(INSTANCE, catalog.clone(), backends, CodecRegistry::new());
        Self {
            dir,
            catalog,
            storage,
            gateway,
        }
    }

    /// Write `bytes` under the storage root and register a data source for it
    pub fn add_file(&self, name: &str, bytes: &[u8], format: DataSourceFormat, owner: i32) -> DataSource {
        let path = self.dir.path().join(name);
        std::fs::write(&path, bytes).unwrap();
        let mut data_source = data_source(self.storage.id, &format!("file://{}", path.display()), format);
        data_source.name = name.to_string();
        data_source.user_id = owner;
        self.catalog.add_data_source(data_source)
    }

    /// Staging directory of `filename`
    pub fn staging_dir(&self, filename: &str) -> std::path::PathBuf {
        self.dir.path().join("tmp").join("upload").join(filename)
    }
}

pub fn local_storage(dir: &TempDir) -> Storage {
    Storage {
        id: 0,
        name: "local".to_string(),
        storage_type: StorageType::Local,
        url: format!("file://{}/", dir.path().display()),
        client_url: None,
        extra_params: None,
        enabled: true,
    }
}

pub fn data_source(storage_id: i32, url: &str, format: DataSourceFormat) -> DataSource {
    let created = Utc::now() - Duration::minutes(5);
    DataSource {
        id: 0,
        name: "source".to_string(),
        description: None,
        storage_id,
        url: url.to_string(),
        format,
        attribute_delimiter: None,
        text_delimiter: None,
        record_delimiter: None,
        encoding: None,
        is_first_line_header: false,
        is_multiline: false,
        treat_as_missing: None,
        command: None,
        is_public: false,
        user_id: 1,
        user_login: "admin".to_string(),
        user_name: "Admin".to_string(),
        initialization: InitializationStatus::NoInitialized,
        estimated_size_in_mb: None,
        upload_identifier: None,
        created,
        updated: created,
        attributes: Vec::new(),
        permissions: Vec::new(),
    }
}

pub fn body(bytes: &'static [u8]) -> limonero_server::backend::ByteReader {
    Box::pin(bytes)
}

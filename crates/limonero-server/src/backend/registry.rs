//! Backend resolution
//!
//! Maps a storage's type to the adapter able to serve it. A fresh adapter is
//! built for every request; only immutable resources such as the HTTP
//! connection pool are shared.

use super::{hdfs::HdfsBackend, hive::HiveBackend, local::LocalBackend, mysql::MySqlBackend, s3::S3Backend};
use super::{Backend, BackendError, BackendResult};
use limonero_common::types::{Storage, StorageType};
use std::collections::HashMap;
use std::sync::Arc;

/// Builds an adapter for one storage
pub type BackendFactory =
    Arc<dyn Fn(&Storage, &BackendOptions) -> BackendResult<Arc<dyn Backend>> + Send + Sync>;

/// Process-wide settings every adapter may consult
#[derive(Debug, Clone)]
pub struct BackendOptions {
    /// Talk to datanodes by the host name the namenode hands out
    pub use_datanode_hostname: bool,
    pub http: reqwest::Client,
}

impl Default for BackendOptions {
    fn default() -> Self {
        Self {
            use_datanode_hostname: true,
            http: reqwest::Client::new(),
        }
    }
}

#[derive(Clone)]
pub struct BackendRegistry {
    factories: HashMap<StorageType, BackendFactory>,
    options: BackendOptions,
}

impl BackendRegistry {
    /// Registry with every built-in adapter
    pub fn new(options: BackendOptions) -> Self {
        Self::empty(options)
            .with_factory(StorageType::Local, |storage, _| {
                Ok(Arc::new(LocalBackend::from_storage(storage)?))
            })
            .with_factory(StorageType::Hdfs, |storage, options| {
                Ok(Arc::new(HdfsBackend::from_storage(storage, options)?))
            })
            .with_factory(StorageType::S3, |storage, _| {
                Ok(Arc::new(S3Backend::from_storage(storage)?))
            })
            .with_factory(StorageType::Jdbc, |storage, _| {
                Ok(Arc::new(MySqlBackend::from_storage(storage)?))
            })
            .with_factory(StorageType::Hive, |storage, options| {
                Ok(Arc::new(HiveBackend::from_storage(storage, options)?))
            })
            .with_factory(StorageType::HiveWarehouse, |storage, options| {
                Ok(Arc::new(HiveBackend::from_storage(storage, options)?))
            })
    }

    /// Registry without any adapter
    pub fn empty(options: BackendOptions) -> Self {
        Self {
            factories: HashMap::new(),
            options,
        }
    }

    /// Register or replace the adapter for a storage type
    pub fn with_factory<F>(mut self, storage_type: StorageType, factory: F) -> Self
    where
        F: Fn(&Storage, &BackendOptions) -> BackendResult<Arc<dyn Backend>> + Send + Sync + 'static,
    {
        self.factories.insert(storage_type, Arc::new(factory));
        self
    }

    pub fn options(&self) -> &BackendOptions {
        &self.options
    }

    /// Build the adapter serving `storage`
    pub fn resolve(&self, storage: &Storage) -> BackendResult<Arc<dyn Backend>> {
        if !storage.enabled {
            return Err(BackendError::Disabled(storage.id));
        }

        let factory = self
            .factories
            .get(&storage.storage_type)
            .ok_or_else(|| BackendError::UnsupportedBackend(storage.storage_type.to_string()))?;

        let backend = factory(storage, &self.options)?;
        tracing::debug!(
            storage_id = storage.id,
            backend = backend.kind(),
            "Resolved storage backend"
        );

        Ok(backend)
    }
}

impl std::fmt::Debug for BackendRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut types: Vec<&str> = self.factories.keys().map(|t| t.as_str()).collect();
        types.sort_unstable();
        f.debug_struct("BackendRegistry")
            .field("types", &types)
            .field("options", &self.options)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn storage(storage_type: StorageType, url: &str) -> Storage {
        Storage {
            id: 1,
            name: "test".to_string(),
            storage_type,
            url: url.to_string(),
            client_url: None,
            extra_params: None,
            enabled: true,
        }
    }

    #[test]
    fn test_resolves_local_storage() {
        let registry = BackendRegistry::new(BackendOptions::default());
        let backend = registry.resolve(&storage(StorageType::Local, "file:///tmp/t/")).unwrap();
        assert_eq!(backend.kind(), "local");
    }

    #[test]
    fn test_unimplemented_kinds_are_unsupported() {
        let registry = BackendRegistry::new(BackendOptions::default());
        for storage_type in [
            StorageType::MongoDb,
            StorageType::ElasticSearch,
            StorageType::Kafka,
            StorageType::Cassandra,
        ] {
            let err = registry
                .resolve(&storage(storage_type, "mongodb://localhost/db"))
                .err()
                .unwrap();
            assert!(matches!(err, BackendError::UnsupportedBackend(_)));
        }
    }

    #[test]
    fn test_disabled_storage_is_rejected() {
        let registry = BackendRegistry::new(BackendOptions::default());
        let mut disabled = storage(StorageType::Local, "file:///tmp/t/");
        disabled.enabled = false;
        assert!(matches!(
            registry.resolve(&disabled).err().unwrap(),
            BackendError::Disabled(1)
        ));
    }

    #[test]
    fn test_scheme_mismatch_is_invalid_url() {
        let registry = BackendRegistry::new(BackendOptions::default());
        let err = registry
            .resolve(&storage(StorageType::Local, "hdfs://namenode:9000/"))
            .err()
            .unwrap();
        assert!(matches!(err, BackendError::InvalidUrl { .. }));
    }

    #[test]
    fn test_factory_override() {
        let registry = BackendRegistry::new(BackendOptions::default()).with_factory(
            StorageType::Local,
            |_, _| Err(BackendError::UnsupportedBackend("replaced".to_string())),
        );
        let err = registry
            .resolve(&storage(StorageType::Local, "file:///tmp/t/"))
            .err()
            .unwrap();
        assert!(err.to_string().contains("replaced"));
    }
}

//! Gateway service
//!
//! A single [`Gateway`] value carries the catalog handle, the backend and
//! codec registries and the instance tag. Every operation resolves its
//! storage and adapter per call; nothing mutable is shared between requests.
//!
//! Entities the caller may not read are reported as missing, so the
//! existence of a hidden data source never leaks.

use crate::backend::{Backend, BackendRegistry, StorageLocation};
use crate::catalog::{
    can_access_data_source, Catalog, DataSourceFilter, DataSourcePage, PageRequest, PermissionScope,
};
use crate::codec::CodecRegistry;
use crate::error::{AppError, AppResult};
use limonero_common::types::{DataSource, Identity, Storage};
use std::sync::Arc;
use tracing::instrument;

pub mod download;
pub mod infer;
pub mod sample;
pub mod upload;

pub use download::{sanitize_filename, Download};
pub use sample::{DEFAULT_SAMPLE_LIMIT, MAX_SAMPLE_LIMIT};
pub use upload::{ChunkUpload, UploadStatus};

struct Inner {
    instance: String,
    catalog: Arc<dyn Catalog>,
    backends: BackendRegistry,
    codecs: CodecRegistry,
}

/// A storage together with its adapter
pub(crate) struct ResolvedStorage {
    pub storage: Storage,
    pub location: StorageLocation,
    pub backend: Arc<dyn Backend>,
}

#[derive(Clone)]
pub struct Gateway {
    inner: Arc<Inner>,
}

impl Gateway {
    pub fn new(
        instance: impl Into<String>,
        catalog: Arc<dyn Catalog>,
        backends: BackendRegistry,
        codecs: CodecRegistry,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                instance: instance.into(),
                catalog,
                backends,
                codecs,
            }),
        }
    }

    pub fn instance(&self) -> &str {
        &self.inner.instance
    }

    pub fn catalog(&self) -> &Arc<dyn Catalog> {
        &self.inner.catalog
    }

    pub fn codecs(&self) -> &CodecRegistry {
        &self.inner.codecs
    }

    pub(crate) async fn resolve_storage(&self, storage_id: i32) -> AppResult<ResolvedStorage> {
        let storage = self.inner.catalog.storage(storage_id).await?;
        let location = StorageLocation::parse(&storage.url)?;
        let backend = self.inner.backends.resolve(&storage)?;
        Ok(ResolvedStorage {
            storage,
            location,
            backend,
        })
    }

    /// Load a data source the caller may access within `scope`.
    ///
    /// Fails `NotFound` when the caller cannot even read it and `Forbidden`
    /// when it is readable but `scope` is not granted.
    pub(crate) async fn data_source_for(
        &self,
        caller: &Identity,
        data_source_id: i32,
        scope: PermissionScope,
    ) -> AppResult<DataSource> {
        let data_source = self.inner.catalog.data_source(data_source_id).await?;
        if !can_access_data_source(caller, &data_source, PermissionScope::Read) {
            return Err(AppError::NotFound(format!("Data source {} not found", data_source_id)));
        }
        if scope != PermissionScope::Read && !can_access_data_source(caller, &data_source, scope) {
            return Err(AppError::Forbidden(format!(
                "Not allowed to modify data source {}",
                data_source_id
            )));
        }
        Ok(data_source)
    }

    #[instrument(skip(self, caller), fields(user_id = caller.id))]
    pub async fn data_source(&self, caller: &Identity, data_source_id: i32) -> AppResult<DataSource> {
        self.data_source_for(caller, data_source_id, PermissionScope::Read).await
    }

    #[instrument(skip(self, caller, filter), fields(user_id = caller.id))]
    pub async fn list_data_sources(
        &self,
        caller: &Identity,
        filter: &DataSourceFilter,
        page: PageRequest,
    ) -> AppResult<DataSourcePage> {
        Ok(self.inner.catalog.list_data_sources(caller, filter, page).await?)
    }

    pub async fn storages(&self) -> AppResult<Vec<Storage>> {
        Ok(self.inner.catalog.storages().await?)
    }
}

impl std::fmt::Debug for Gateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Gateway")
            .field("instance", &self.inner.instance)
            .field("backends", &self.inner.backends)
            .field("codecs", &self.inner.codecs)
            .finish()
    }
}

//! In-process catalog

use super::{
    can_access_data_source, Catalog, CatalogError, CatalogResult, DataSourceFilter, DataSourcePage, NewDataSource,
    PageRequest, PermissionScope, SchemaOptions,
};
use async_trait::async_trait;
use chrono::Utc;
use limonero_common::types::{
    Attribute, DataSource, DataSourcePermission, Identity, InitializationStatus, Model, ModelPermission,
    PermissionType, Storage,
};
use std::collections::BTreeMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

#[derive(Debug, Default)]
struct State {
    storages: BTreeMap<i32, Storage>,
    data_sources: BTreeMap<i32, DataSource>,
    models: BTreeMap<i32, Model>,
    next_id: i32,
}

impl State {
    fn next_id(&mut self) -> i32 {
        self.next_id += 1;
        self.next_id
    }
}

/// Catalog held in memory, selected with `database_url = "memory:"`
#[derive(Debug, Default)]
pub struct MemoryCatalog {
    state: RwLock<State>,
}

impl MemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, State> {
        self.state.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, State> {
        self.state.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Register a storage; an id of 0 is replaced by a fresh one
    pub fn add_storage(&self, mut storage: Storage) -> Storage {
        let mut state = self.write();
        if storage.id == 0 {
            storage.id = state.next_id();
        }
        state.next_id = state.next_id.max(storage.id);
        state.storages.insert(storage.id, storage.clone());
        storage
    }

    /// Register a data source as is; an id of 0 is replaced by a fresh one
    pub fn add_data_source(&self, mut data_source: DataSource) -> DataSource {
        let mut state = self.write();
        if data_source.id == 0 {
            data_source.id = state.next_id();
        }
        state.next_id = state.next_id.max(data_source.id);
        state.data_sources.insert(data_source.id, data_source.clone());
        data_source
    }

    pub fn add_model(&self, mut model: Model) -> Model {
        let mut state = self.write();
        if model.id == 0 {
            model.id = state.next_id();
        }
        state.next_id = state.next_id.max(model.id);
        state.models.insert(model.id, model.clone());
        model
    }

    /// Grant `permission` on a data source; unknown ids are ignored
    pub fn grant(&self, data_source_id: i32, user_id: i32, permission: PermissionType) {
        if let Some(ds) = self.write().data_sources.get_mut(&data_source_id) {
            ds.permissions.push(DataSourcePermission {
                data_source_id,
                user_id,
                permission,
            });
        }
    }

    pub fn grant_model(&self, model_id: i32, user_id: i32, permission: PermissionType) {
        if let Some(model) = self.write().models.get_mut(&model_id) {
            model.permissions.push(ModelPermission {
                model_id,
                user_id,
                permission,
            });
        }
    }

    pub fn data_source_count(&self) -> usize {
        self.read().data_sources.len()
    }
}

#[async_trait]
impl Catalog for MemoryCatalog {
    async fn storage(&self, id: i32) -> CatalogResult<Storage> {
        self.read()
            .storages
            .get(&id)
            .cloned()
            .ok_or_else(|| CatalogError::not_found("Storage", id))
    }

    async fn storages(&self) -> CatalogResult<Vec<Storage>> {
        let mut storages: Vec<Storage> = self.read().storages.values().filter(|s| s.enabled).cloned().collect();
        storages.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(storages)
    }

    async fn data_source(&self, id: i32) -> CatalogResult<DataSource> {
        self.read()
            .data_sources
            .get(&id)
            .cloned()
            .ok_or_else(|| CatalogError::not_found("Data source", id))
    }

    async fn list_data_sources(
        &self,
        caller: &Identity,
        filter: &DataSourceFilter,
        page: PageRequest,
    ) -> CatalogResult<DataSourcePage> {
        let name = filter
            .name
            .as_deref()
            .map(|n| n.trim().to_lowercase())
            .filter(|n| !n.is_empty());

        let mut visible: Vec<DataSource> = self
            .read()
            .data_sources
            .values()
            .filter(|ds| can_access_data_source(caller, ds, PermissionScope::Read))
            .filter(|ds| name.as_ref().map_or(true, |n| ds.name.to_lowercase().contains(n)))
            .cloned()
            .collect();
        visible.sort_by(|a, b| b.created.cmp(&a.created).then(b.id.cmp(&a.id)));

        let total = visible.len() as i64;
        let items = visible
            .into_iter()
            .skip(page.offset().max(0) as usize)
            .take(page.size.max(0) as usize)
            .collect();
        Ok(DataSourcePage { items, total })
    }

    async fn data_source_by_upload(&self, storage_id: i32, identifier: &str) -> CatalogResult<Option<DataSource>> {
        Ok(self
            .read()
            .data_sources
            .values()
            .find(|ds| ds.storage_id == storage_id && ds.upload_identifier.as_deref() == Some(identifier))
            .cloned())
    }

    async fn create_data_source(&self, data_source: NewDataSource) -> CatalogResult<DataSource> {
        let mut state = self.write();
        if !state.storages.contains_key(&data_source.storage_id) {
            return Err(CatalogError::not_found("Storage", data_source.storage_id));
        }
        if let Some(identifier) = data_source.upload_identifier.as_deref() {
            let taken = state.data_sources.values().any(|ds| {
                ds.storage_id == data_source.storage_id && ds.upload_identifier.as_deref() == Some(identifier)
            });
            if taken {
                return Err(CatalogError::Conflict(format!("upload {} is already recorded", identifier)));
            }
        }

        let now = Utc::now();
        let record = DataSource {
            id: state.next_id(),
            name: data_source.name,
            description: None,
            storage_id: data_source.storage_id,
            url: data_source.url,
            format: data_source.format,
            attribute_delimiter: None,
            text_delimiter: None,
            record_delimiter: None,
            encoding: None,
            is_first_line_header: false,
            is_multiline: false,
            treat_as_missing: None,
            command: None,
            is_public: false,
            user_id: data_source.user.id,
            user_login: data_source.user.login,
            user_name: data_source.user.name,
            initialization: InitializationStatus::NoInitialized,
            estimated_size_in_mb: data_source.estimated_size_in_mb,
            upload_identifier: data_source.upload_identifier,
            created: now,
            updated: now,
            attributes: Vec::new(),
            permissions: Vec::new(),
        };
        state.data_sources.insert(record.id, record.clone());
        Ok(record)
    }

    async fn save_schema(
        &self,
        data_source_id: i32,
        options: &SchemaOptions,
        attributes: &[Attribute],
    ) -> CatalogResult<DataSource> {
        let mut state = self.write();
        let next_attribute_id = state.next_id + 1;
        let ds = state
            .data_sources
            .get_mut(&data_source_id)
            .ok_or_else(|| CatalogError::not_found("Data source", data_source_id))?;

        ds.attribute_delimiter = options.attribute_delimiter.clone();
        ds.text_delimiter = options.text_delimiter.clone();
        ds.record_delimiter = options.record_delimiter.clone();
        ds.encoding = options.encoding.clone();
        ds.is_first_line_header = options.is_first_line_header;
        ds.treat_as_missing = options.treat_as_missing.clone();
        ds.initialization = InitializationStatus::Initialized;
        ds.updated = Utc::now();
        ds.attributes = attributes
            .iter()
            .enumerate()
            .map(|(i, attribute)| Attribute {
                id: Some(next_attribute_id + i as i32),
                ..attribute.clone()
            })
            .collect();

        let saved = ds.clone();
        state.next_id += attributes.len() as i32;
        Ok(saved)
    }

    async fn model(&self, id: i32) -> CatalogResult<Model> {
        self.read()
            .models
            .get(&id)
            .cloned()
            .ok_or_else(|| CatalogError::not_found("Model", id))
    }
}

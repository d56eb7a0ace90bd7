//! Catalog binding
//!
//! Typed access to storages, data sources, attributes, models and their
//! permissions. Writes that span several rows (`create_data_source`,
//! `save_schema`) run in one transaction.
//!
//! Two implementations exist: [`PgCatalog`] over PostgreSQL and
//! [`MemoryCatalog`], an in-process catalog used by tests and local runs
//! (`database_url = "memory:"`).

use async_trait::async_trait;
use limonero_common::types::{
    Attribute, DataSource, DataSourceFormat, Identity, Model, PermissionType, Storage,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod memory;
pub mod postgres;

pub use memory::MemoryCatalog;
pub use postgres::PgCatalog;

pub type CatalogResult<T> = std::result::Result<T, CatalogError>;

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: String },

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Catalog database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Catalog migration failed: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("Invalid catalog row: {0}")]
    Invalid(String),
}

impl CatalogError {
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        CatalogError::NotFound {
            entity,
            id: id.to_string(),
        }
    }
}

// ============================================================================
// Permissions
// ============================================================================

/// Kind of access being checked
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermissionScope {
    Read,
    Mutate,
    Share,
}

impl PermissionScope {
    /// Explicit grants that satisfy this scope
    pub fn accepted(&self) -> &'static [PermissionType] {
        match self {
            PermissionScope::Read => &[PermissionType::Read, PermissionType::Write, PermissionType::Manage],
            PermissionScope::Mutate => &[PermissionType::Write, PermissionType::Manage],
            PermissionScope::Share => &[PermissionType::Manage],
        }
    }
}

/// Whether `caller` may access an entity.
///
/// System users, owners and explicit grants within the scope pass. Public
/// entities are readable by everyone but not mutable.
pub fn can_access(
    caller: &Identity,
    owner_id: i32,
    is_public: bool,
    grants: impl IntoIterator<Item = (i32, PermissionType)>,
    scope: PermissionScope,
) -> bool {
    if caller.is_system() || owner_id == caller.id {
        return true;
    }
    if is_public && scope == PermissionScope::Read {
        return true;
    }
    let accepted = scope.accepted();
    grants
        .into_iter()
        .any(|(user_id, permission)| user_id == caller.id && accepted.contains(&permission))
}

pub fn can_access_data_source(caller: &Identity, data_source: &DataSource, scope: PermissionScope) -> bool {
    can_access(
        caller,
        data_source.user_id,
        data_source.is_public,
        data_source.permissions.iter().map(|p| (p.user_id, p.permission)),
        scope,
    )
}

pub fn can_access_model(caller: &Identity, model: &Model, scope: PermissionScope) -> bool {
    can_access(
        caller,
        model.user_id,
        false,
        model.permissions.iter().map(|p| (p.user_id, p.permission)),
        scope,
    )
}

// ============================================================================
// Commands
// ============================================================================

/// Page of a listing, 1-based
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    pub page: i64,
    pub size: i64,
}

impl PageRequest {
    pub fn offset(&self) -> i64 {
        (self.page.max(1) - 1) * self.size
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DataSourcePage {
    pub items: Vec<DataSource>,
    pub total: i64,
}

/// Filter of a data source listing
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DataSourceFilter {
    /// Case-insensitive substring of the name
    pub name: Option<String>,
}

/// A data source to be recorded
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewDataSource {
    pub name: String,
    pub storage_id: i32,
    pub url: String,
    pub format: DataSourceFormat,
    pub user: Identity,
    pub upload_identifier: Option<String>,
    pub estimated_size_in_mb: Option<f64>,
}

/// Parse options persisted together with an inferred schema
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchemaOptions {
    pub attribute_delimiter: Option<String>,
    pub text_delimiter: Option<String>,
    pub record_delimiter: Option<String>,
    pub encoding: Option<String>,
    pub is_first_line_header: bool,
    pub treat_as_missing: Option<String>,
}

impl SchemaOptions {
    pub fn of(data_source: &DataSource) -> Self {
        Self {
            attribute_delimiter: data_source.attribute_delimiter.clone(),
            text_delimiter: data_source.text_delimiter.clone(),
            record_delimiter: data_source.record_delimiter.clone(),
            encoding: data_source.encoding.clone(),
            is_first_line_header: data_source.is_first_line_header,
            treat_as_missing: data_source.treat_as_missing.clone(),
        }
    }
}

#[async_trait]
pub trait Catalog: Send + Sync {
    async fn storage(&self, id: i32) -> CatalogResult<Storage>;

    /// Enabled storages ordered by name
    async fn storages(&self) -> CatalogResult<Vec<Storage>>;

    /// Data source with its attributes and permissions, regardless of caller
    async fn data_source(&self, id: i32) -> CatalogResult<DataSource>;

    /// Data sources readable by `caller`, newest first
    async fn list_data_sources(
        &self,
        caller: &Identity,
        filter: &DataSourceFilter,
        page: PageRequest,
    ) -> CatalogResult<DataSourcePage>;

    /// Data source created by the upload `identifier` on `storage_id`
    async fn data_source_by_upload(&self, storage_id: i32, identifier: &str) -> CatalogResult<Option<DataSource>>;

    /// Fails `Conflict` when the upload identifier is already recorded
    async fn create_data_source(&self, data_source: NewDataSource) -> CatalogResult<DataSource>;

    /// Replace the attributes of a data source and persist its parse options
    async fn save_schema(
        &self,
        data_source_id: i32,
        options: &SchemaOptions,
        attributes: &[Attribute],
    ) -> CatalogResult<DataSource>;

    async fn model(&self, id: i32) -> CatalogResult<Model>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use limonero_common::types::DataSourcePermission;

    fn grant(user_id: i32, permission: PermissionType) -> Vec<(i32, PermissionType)> {
        vec![(user_id, permission)]
    }

    #[test]
    fn test_system_and_owner_always_pass() {
        for scope in [PermissionScope::Read, PermissionScope::Mutate, PermissionScope::Share] {
            assert!(can_access(&Identity::system(), 5, false, vec![], scope));
            assert!(can_access(&Identity::user(1, "admin", "Admin"), 5, false, vec![], scope));
            assert!(can_access(&Identity::user(5, "owner", "Owner"), 5, false, vec![], scope));
        }
    }

    #[test]
    fn test_stranger_is_denied() {
        let stranger = Identity::user(42, "u", "U");
        assert!(!can_access(&stranger, 1, false, vec![], PermissionScope::Read));
        assert!(!can_access(&stranger, 1, false, grant(43, PermissionType::Manage), PermissionScope::Read));
    }

    #[test]
    fn test_public_is_read_only() {
        let stranger = Identity::user(42, "u", "U");
        assert!(can_access(&stranger, 1, true, vec![], PermissionScope::Read));
        assert!(!can_access(&stranger, 1, true, vec![], PermissionScope::Mutate));
    }

    #[test]
    fn test_grant_sets() {
        let user = Identity::user(42, "u", "U");
        assert!(can_access(&user, 1, false, grant(42, PermissionType::Read), PermissionScope::Read));
        assert!(!can_access(&user, 1, false, grant(42, PermissionType::Read), PermissionScope::Mutate));
        assert!(can_access(&user, 1, false, grant(42, PermissionType::Write), PermissionScope::Mutate));
        assert!(!can_access(&user, 1, false, grant(42, PermissionType::Write), PermissionScope::Share));
        assert!(can_access(&user, 1, false, grant(42, PermissionType::Manage), PermissionScope::Share));
    }

    #[test]
    fn test_data_source_permissions() {
        let mut ds = crate::codec::tests::data_source(DataSourceFormat::Csv);
        ds.id = 7;
        ds.user_id = 1;
        let user = Identity::user(42, "u", "U");
        assert!(!can_access_data_source(&user, &ds, PermissionScope::Read));

        ds.permissions.push(DataSourcePermission {
            data_source_id: 7,
            user_id: 42,
            permission: PermissionType::Read,
        });
        assert!(can_access_data_source(&user, &ds, PermissionScope::Read));
    }

    #[test]
    fn test_page_offset() {
        assert_eq!(PageRequest { page: 1, size: 20 }.offset(), 0);
        assert_eq!(PageRequest { page: 3, size: 20 }.offset(), 40);
        assert_eq!(PageRequest { page: 0, size: 20 }.offset(), 0);
    }
}

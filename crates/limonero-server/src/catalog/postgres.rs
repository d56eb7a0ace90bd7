//! PostgreSQL catalog

use super::{
    Catalog, CatalogError, CatalogResult, DataSourceFilter, DataSourcePage, NewDataSource, PageRequest,
    PermissionScope, SchemaOptions,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use limonero_common::types::{
    Attribute, DataSource, DataSourcePermission, Identity, InitializationStatus, Model, ModelPermission,
    Storage,
};
use sqlx::postgres::PgPoolOptions;
use sqlx::{FromRow, PgPool};
use std::collections::HashMap;
use std::str::FromStr;
use tracing::{debug, info, instrument};

const DATA_SOURCE_COLUMNS: &str = r#"
    ds.id, ds.name, ds.description, ds.storage_id, ds.url, ds.format,
    ds.attribute_delimiter, ds.text_delimiter, ds.record_delimiter, ds.encoding,
    ds.is_first_line_header, ds.is_multiline, ds.treat_as_missing, ds.command,
    ds.is_public, ds.user_id, ds.user_login, ds.user_name, ds.initialization,
    ds.estimated_size_in_mb, ds.upload_identifier, ds.created, ds.updated
"#;

/// Visibility and name filter shared by the listing and its count.
///
/// `$1` system caller, `$2` caller id, `$3` accepted grants, `$4` name filter
const DATA_SOURCE_FILTER: &str = r#"
    WHERE ($1 OR ds.is_public OR ds.user_id = $2 OR EXISTS (
        SELECT 1 FROM data_source_permissions p
        WHERE p.data_source_id = ds.id AND p.user_id = $2 AND p.permission = ANY($3)
    ))
    AND ($4::TEXT IS NULL OR LOWER(ds.name) LIKE '%' || LOWER($4) || '%')
"#;

/// Check if the error is a unique constraint violation
fn is_unique_violation(error: &sqlx::Error) -> bool {
    if let sqlx::Error::Database(db_err) = error {
        return db_err.is_unique_violation();
    }
    false
}

fn parse<T>(value: &str) -> CatalogResult<T>
where
    T: FromStr<Err = limonero_common::CommonError>,
{
    value.parse().map_err(|e: limonero_common::CommonError| CatalogError::Invalid(e.to_string()))
}

#[derive(Debug, FromRow)]
struct StorageRow {
    id: i32,
    name: String,
    #[sqlx(rename = "type")]
    storage_type: String,
    url: String,
    client_url: Option<String>,
    extra_params: Option<serde_json::Value>,
    enabled: bool,
}

impl TryFrom<StorageRow> for Storage {
    type Error = CatalogError;

    fn try_from(row: StorageRow) -> CatalogResult<Self> {
        Ok(Storage {
            id: row.id,
            name: row.name,
            storage_type: parse(&row.storage_type)?,
            url: row.url,
            client_url: row.client_url,
            extra_params: row.extra_params,
            enabled: row.enabled,
        })
    }
}

#[derive(Debug, FromRow)]
struct DataSourceRow {
    id: i32,
    name: String,
    description: Option<String>,
    storage_id: i32,
    url: String,
    format: String,
    attribute_delimiter: Option<String>,
    text_delimiter: Option<String>,
    record_delimiter: Option<String>,
    encoding: Option<String>,
    is_first_line_header: bool,
    is_multiline: bool,
    treat_as_missing: Option<String>,
    command: Option<String>,
    is_public: bool,
    user_id: i32,
    user_login: String,
    user_name: String,
    initialization: String,
    estimated_size_in_mb: Option<f64>,
    upload_identifier: Option<String>,
    created: DateTime<Utc>,
    updated: DateTime<Utc>,
}

impl DataSourceRow {
    fn into_data_source(
        self,
        attributes: Vec<Attribute>,
        permissions: Vec<DataSourcePermission>,
    ) -> CatalogResult<DataSource> {
        Ok(DataSource {
            id: self.id,
            name: self.name,
            description: self.description,
            storage_id: self.storage_id,
            url: self.url,
            format: parse(&self.format)?,
            attribute_delimiter: self.attribute_delimiter,
            text_delimiter: self.text_delimiter,
            record_delimiter: self.record_delimiter,
            encoding: self.encoding,
            is_first_line_header: self.is_first_line_header,
            is_multiline: self.is_multiline,
            treat_as_missing: self.treat_as_missing,
            command: self.command,
            is_public: self.is_public,
            user_id: self.user_id,
            user_login: self.user_login,
            user_name: self.user_name,
            initialization: parse(&self.initialization)?,
            estimated_size_in_mb: self.estimated_size_in_mb,
            upload_identifier: self.upload_identifier,
            created: self.created,
            updated: self.updated,
            attributes,
            permissions,
        })
    }
}

#[derive(Debug, FromRow)]
struct AttributeRow {
    id: i32,
    data_source_id: i32,
    name: String,
    #[sqlx(rename = "type")]
    attribute_type: String,
    size: Option<i32>,
    precision: Option<i32>,
    scale: Option<i32>,
    nullable: bool,
    feature: bool,
    label: bool,
    key: bool,
}

impl TryFrom<AttributeRow> for Attribute {
    type Error = CatalogError;

    fn try_from(row: AttributeRow) -> CatalogResult<Self> {
        Ok(Attribute {
            id: Some(row.id),
            name: row.name,
            attribute_type: parse(&row.attribute_type)?,
            size: row.size,
            precision: row.precision,
            scale: row.scale,
            nullable: row.nullable,
            feature: row.feature,
            label: row.label,
            key: row.key,
        })
    }
}

#[derive(Debug, FromRow)]
struct PermissionRow {
    entity_id: i32,
    user_id: i32,
    permission: String,
}

#[derive(Debug, FromRow)]
struct ModelRow {
    id: i32,
    name: String,
    storage_id: i32,
    path: String,
    #[sqlx(rename = "type")]
    model_type: String,
    deployment_status: String,
    user_id: i32,
    user_login: String,
    user_name: String,
    created: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct PgCatalog {
    pool: PgPool,
}

impl PgCatalog {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str, max_connections: u32) -> CatalogResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;
        info!("Connected to catalog database");
        Ok(Self::new(pool))
    }

    pub async fn migrate(&self) -> CatalogResult<()> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        info!("Catalog migrations applied");
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Attributes and permissions of `ids`, keyed by data source
    async fn children(
        &self,
        ids: &[i32],
    ) -> CatalogResult<(HashMap<i32, Vec<Attribute>>, HashMap<i32, Vec<DataSourcePermission>>)> {
        let attribute_rows = sqlx::query_as::<_, AttributeRow>(
            r#"
            SELECT id, data_source_id, name, type, size, precision, scale, nullable, feature, label, key
            FROM attributes
            WHERE data_source_id = ANY($1)
            ORDER BY data_source_id, position
            "#,
        )
        .bind(ids)
        .fetch_all(&self.pool)
        .await?;

        let mut attributes: HashMap<i32, Vec<Attribute>> = HashMap::new();
        for row in attribute_rows {
            let data_source_id = row.data_source_id;
            attributes.entry(data_source_id).or_default().push(row.try_into()?);
        }

        let permission_rows = sqlx::query_as::<_, PermissionRow>(
            r#"
            SELECT data_source_id AS entity_id, user_id, permission
            FROM data_source_permissions
            WHERE data_source_id = ANY($1)
            "#,
        )
        .bind(ids)
        .fetch_all(&self.pool)
        .await?;

        let mut permissions: HashMap<i32, Vec<DataSourcePermission>> = HashMap::new();
        for row in permission_rows {
            permissions.entry(row.entity_id).or_default().push(DataSourcePermission {
                data_source_id: row.entity_id,
                user_id: row.user_id,
                permission: parse(&row.permission)?,
            });
        }

        Ok((attributes, permissions))
    }

    async fn assemble(&self, rows: Vec<DataSourceRow>) -> CatalogResult<Vec<DataSource>> {
        let ids: Vec<i32> = rows.iter().map(|r| r.id).collect();
        let (mut attributes, mut permissions) = self.children(&ids).await?;
        rows.into_iter()
            .map(|row| {
                let id = row.id;
                row.into_data_source(
                    attributes.remove(&id).unwrap_or_default(),
                    permissions.remove(&id).unwrap_or_default(),
                )
            })
            .collect()
    }

    async fn single(&self, row: Option<DataSourceRow>) -> CatalogResult<Option<DataSource>> {
        match row {
            Some(row) => Ok(self.assemble(vec![row]).await?.pop()),
            None => Ok(None),
        }
    }
}

#[async_trait]
impl Catalog for PgCatalog {
    #[instrument(skip(self))]
    async fn storage(&self, id: i32) -> CatalogResult<Storage> {
        sqlx::query_as::<_, StorageRow>(
            "SELECT id, name, type, url, client_url, extra_params, enabled FROM storages WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| CatalogError::not_found("Storage", id))?
        .try_into()
    }

    async fn storages(&self) -> CatalogResult<Vec<Storage>> {
        sqlx::query_as::<_, StorageRow>(
            "SELECT id, name, type, url, client_url, extra_params, enabled FROM storages WHERE enabled ORDER BY name",
        )
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(Storage::try_from)
        .collect()
    }

    #[instrument(skip(self))]
    async fn data_source(&self, id: i32) -> CatalogResult<DataSource> {
        let sql = format!("SELECT {} FROM data_sources ds WHERE ds.id = $1", DATA_SOURCE_COLUMNS);
        let row = sqlx::query_as::<_, DataSourceRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        self.single(row)
            .await?
            .ok_or_else(|| CatalogError::not_found("Data source", id))
    }

    #[instrument(skip(self, caller), fields(user_id = caller.id))]
    async fn list_data_sources(
        &self,
        caller: &Identity,
        filter: &DataSourceFilter,
        page: PageRequest,
    ) -> CatalogResult<DataSourcePage> {
        let accepted: Vec<String> = PermissionScope::Read
            .accepted()
            .iter()
            .map(|p| p.as_str().to_string())
            .collect();
        let name = filter.name.as_deref().map(str::trim).filter(|n| !n.is_empty());

        let count_sql = format!("SELECT COUNT(*) FROM data_sources ds {}", DATA_SOURCE_FILTER);
        let total: i64 = sqlx::query_scalar(&count_sql)
            .bind(caller.is_system())
            .bind(caller.id)
            .bind(&accepted)
            .bind(name)
            .fetch_one(&self.pool)
            .await?;

        let list_sql = format!(
            "SELECT {} FROM data_sources ds {} ORDER BY ds.created DESC, ds.id DESC LIMIT $5 OFFSET $6",
            DATA_SOURCE_COLUMNS, DATA_SOURCE_FILTER
        );
        let rows = sqlx::query_as::<_, DataSourceRow>(&list_sql)
            .bind(caller.is_system())
            .bind(caller.id)
            .bind(&accepted)
            .bind(name)
            .bind(page.size)
            .bind(page.offset())
            .fetch_all(&self.pool)
            .await?;

        debug!(total, returned = rows.len(), "Listed data sources");
        Ok(DataSourcePage {
            items: self.assemble(rows).await?,
            total,
        })
    }

    async fn data_source_by_upload(&self, storage_id: i32, identifier: &str) -> CatalogResult<Option<DataSource>> {
        let sql = format!(
            "SELECT {} FROM data_sources ds WHERE ds.storage_id = $1 AND ds.upload_identifier = $2",
            DATA_SOURCE_COLUMNS
        );
        let row = sqlx::query_as::<_, DataSourceRow>(&sql)
            .bind(storage_id)
            .bind(identifier)
            .fetch_optional(&self.pool)
            .await?;
        self.single(row).await
    }

    #[instrument(skip(self, data_source), fields(storage_id = data_source.storage_id, name = %data_source.name))]
    async fn create_data_source(&self, data_source: NewDataSource) -> CatalogResult<DataSource> {
        let mut tx = self.pool.begin().await?;

        let id: i32 = sqlx::query_scalar(
            r#"
            INSERT INTO data_sources (
                name, storage_id, url, format, is_public, user_id, user_login, user_name,
                initialization, estimated_size_in_mb, upload_identifier
            )
            VALUES ($1, $2, $3, $4, FALSE, $5, $6, $7, $8, $9, $10)
            RETURNING id
            "#,
        )
        .bind(&data_source.name)
        .bind(data_source.storage_id)
        .bind(&data_source.url)
        .bind(data_source.format.as_str())
        .bind(data_source.user.id)
        .bind(&data_source.user.login)
        .bind(&data_source.user.name)
        .bind(InitializationStatus::NoInitialized.as_str())
        .bind(data_source.estimated_size_in_mb)
        .bind(&data_source.upload_identifier)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                CatalogError::Conflict(format!(
                    "upload {} is already recorded",
                    data_source.upload_identifier.as_deref().unwrap_or_default()
                ))
            } else {
                CatalogError::Database(e)
            }
        })?;

        tx.commit().await?;
        info!(data_source_id = id, "Data source created");
        self.data_source(id).await
    }

    #[instrument(skip(self, options, attributes), fields(attributes = attributes.len()))]
    async fn save_schema(
        &self,
        data_source_id: i32,
        options: &SchemaOptions,
        attributes: &[Attribute],
    ) -> CatalogResult<DataSource> {
        let mut tx = self.pool.begin().await?;

        let updated = sqlx::query(
            r#"
            UPDATE data_sources
            SET attribute_delimiter = $2, text_delimiter = $3, record_delimiter = $4, encoding = $5,
                is_first_line_header = $6, treat_as_missing = $7, initialization = $8, updated = NOW()
            WHERE id = $1
            "#,
        )
        .bind(data_source_id)
        .bind(&options.attribute_delimiter)
        .bind(&options.text_delimiter)
        .bind(&options.record_delimiter)
        .bind(&options.encoding)
        .bind(options.is_first_line_header)
        .bind(&options.treat_as_missing)
        .bind(InitializationStatus::Initialized.as_str())
        .execute(&mut *tx)
        .await?;

        if updated.rows_affected() == 0 {
            return Err(CatalogError::not_found("Data source", data_source_id));
        }

        sqlx::query("DELETE FROM attributes WHERE data_source_id = $1")
            .bind(data_source_id)
            .execute(&mut *tx)
            .await?;

        for (position, attribute) in attributes.iter().enumerate() {
            sqlx::query(
                r#"
                INSERT INTO attributes (
                    data_source_id, position, name, type, size, precision, scale,
                    nullable, feature, label, key
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
                "#,
            )
            .bind(data_source_id)
            .bind(position as i32)
            .bind(&attribute.name)
            .bind(attribute.attribute_type.as_str())
            .bind(attribute.size)
            .bind(attribute.precision)
            .bind(attribute.scale)
            .bind(attribute.nullable)
            .bind(attribute.feature)
            .bind(attribute.label)
            .bind(attribute.key)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        self.data_source(data_source_id).await
    }

    #[instrument(skip(self))]
    async fn model(&self, id: i32) -> CatalogResult<Model> {
        let row = sqlx::query_as::<_, ModelRow>(
            r#"
            SELECT id, name, storage_id, path, type, deployment_status, user_id, user_login, user_name, created
            FROM models WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| CatalogError::not_found("Model", id))?;

        let permissions = sqlx::query_as::<_, PermissionRow>(
            "SELECT model_id AS entity_id, user_id, permission FROM model_permissions WHERE model_id = $1",
        )
        .bind(id)
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(|p| {
            Ok(ModelPermission {
                model_id: p.entity_id,
                user_id: p.user_id,
                permission: parse(&p.permission)?,
            })
        })
        .collect::<CatalogResult<Vec<_>>>()?;

        Ok(Model {
            id: row.id,
            name: row.name,
            storage_id: row.storage_id,
            path: row.path,
            model_type: row.model_type,
            deployment_status: row.deployment_status,
            user_id: row.user_id,
            user_login: row.user_login,
            user_name: row.user_name,
            created: row.created,
            permissions,
        })
    }
}

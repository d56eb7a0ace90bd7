//! Sampling of data sources

use super::Gateway;
use crate::catalog::PermissionScope;
use crate::codec::{Codec, ParseOptions, Row, SourceInput};
use crate::error::{AppError, AppResult};
use limonero_common::types::{DataSource, Identity};
use std::sync::Arc;
use tracing::{debug, instrument};

pub const DEFAULT_SAMPLE_LIMIT: usize = 50;

pub const MAX_SAMPLE_LIMIT: usize = 1000;

/// Check a requested sample size; `None` selects the default
pub fn sample_limit(requested: Option<i64>) -> AppResult<usize> {
    match requested {
        None => Ok(DEFAULT_SAMPLE_LIMIT),
        Some(n) if n < 0 => Err(AppError::InvalidArgument(format!("limit must not be negative, got {}", n))),
        Some(n) if n as u64 > MAX_SAMPLE_LIMIT as u64 => Err(AppError::InvalidArgument(format!(
            "limit must be at most {}, got {}",
            MAX_SAMPLE_LIMIT, n
        ))),
        Some(n) => Ok(n as usize),
    }
}

impl Gateway {
    /// Codec and input able to read `data_source`
    pub(crate) async fn source_input(&self, data_source: &DataSource) -> AppResult<(Arc<dyn Codec>, SourceInput)> {
        let resolved = self.resolve_storage(data_source.storage_id).await?;
        let codec = self
            .codecs()
            .get(data_source.format, resolved.storage.storage_type)?;

        let path = if resolved.storage.storage_type.is_file_based() {
            Some(resolved.location.path_of(&data_source.url)?)
        } else {
            None
        };

        let input = SourceInput {
            backend: resolved.backend,
            path,
            command: data_source.command.clone(),
            attributes: data_source.attributes.clone(),
            options: ParseOptions::from_data_source(data_source)?,
        };
        Ok((codec, input))
    }

    #[instrument(skip(self, caller), fields(user_id = caller.id))]
    pub async fn sample(&self, caller: &Identity, data_source_id: i32, limit: Option<i64>) -> AppResult<Vec<Row>> {
        let limit = sample_limit(limit)?;
        let data_source = self
            .data_source_for(caller, data_source_id, PermissionScope::Read)
            .await?;

        let (codec, input) = self.source_input(&data_source).await?;
        let rows = codec.sample(&input, limit).await?;
        debug!(codec = codec.name(), rows = rows.len(), "Sampled data source");
        Ok(rows)
    }
}

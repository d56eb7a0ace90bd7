//! Schema inference

use super::Gateway;
use crate::catalog::{PermissionScope, SchemaOptions};
use crate::codec::InferOptions;
use crate::error::AppResult;
use limonero_common::types::{DataSource, Identity};
use tracing::{info, instrument};

impl Gateway {
    /// Infer the attributes of a data source and store them with the parse
    /// options they were inferred under
    #[instrument(skip(self, caller, options), fields(user_id = caller.id))]
    pub async fn infer_schema(
        &self,
        caller: &Identity,
        data_source_id: i32,
        options: &InferOptions,
    ) -> AppResult<DataSource> {
        let mut data_source = self
            .data_source_for(caller, data_source_id, PermissionScope::Mutate)
            .await?;
        options.apply(&mut data_source);
        // Inference ignores any previously stored schema
        data_source.attributes.clear();

        let (codec, input) = self.source_input(&data_source).await?;
        let attributes = codec.infer(&input).await?;

        let saved = self
            .catalog()
            .save_schema(data_source_id, &SchemaOptions::of(&data_source), &attributes)
            .await?;
        info!(codec = codec.name(), attributes = attributes.len(), "Schema inferred");
        Ok(saved)
    }
}

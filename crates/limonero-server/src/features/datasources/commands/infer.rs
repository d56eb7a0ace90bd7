use crate::codec::InferOptions;
use crate::error::AppResult;
use crate::gateway::Gateway;
use limonero_common::types::{DataSource, Identity};

/// Body of `POST /datasources/:id/infer`
pub type InferSchemaCommand = InferOptions;

#[tracing::instrument(skip(gateway, caller, command), fields(user_id = caller.id))]
pub async fn handle(
    gateway: &Gateway,
    caller: &Identity,
    data_source_id: i32,
    command: InferSchemaCommand,
) -> AppResult<DataSource> {
    gateway.infer_schema(caller, data_source_id, &command).await
}

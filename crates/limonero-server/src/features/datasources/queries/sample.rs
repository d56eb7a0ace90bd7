use crate::codec::Row;
use crate::error::AppResult;
use crate::gateway::Gateway;
use limonero_common::types::Identity;
use serde::Deserialize;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SampleQuery {
    /// Defaults to 50, at most 1000
    pub limit: Option<i64>,
}

#[tracing::instrument(skip(gateway, caller), fields(user_id = caller.id))]
pub async fn handle(
    gateway: &Gateway,
    caller: &Identity,
    data_source_id: i32,
    query: SampleQuery,
) -> AppResult<Vec<Row>> {
    gateway.sample(caller, data_source_id, query.limit).await
}

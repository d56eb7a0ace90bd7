use crate::catalog::DataSourceFilter;
use crate::error::{AppError, AppResult};
use crate::features::shared::{PaginationMetadata, PaginationParams};
use crate::gateway::Gateway;
use limonero_common::types::{DataSource, Identity};
use serde::Deserialize;

// Numeric fields do not survive `#[serde(flatten)]` in query strings
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ListDataSourcesQuery {
    pub page: Option<i64>,
    pub size: Option<i64>,
    /// Case-insensitive substring of the name
    pub name: Option<String>,
}

impl ListDataSourcesQuery {
    pub fn pagination(&self) -> PaginationParams {
        PaginationParams::new(self.page, self.size)
    }

    pub fn validate(&self) -> AppResult<()> {
        self.pagination()
            .validate()
            .map_err(|e| AppError::InvalidArgument(e.to_string()))?;
        if self.name.as_ref().is_some_and(|n| n.len() > 500) {
            return Err(AppError::InvalidArgument("name filter is too long".to_string()));
        }
        Ok(())
    }
}

#[derive(Debug)]
pub struct ListDataSourcesResponse {
    pub items: Vec<DataSource>,
    pub pagination: PaginationMetadata,
}

#[tracing::instrument(skip(gateway, caller), fields(user_id = caller.id))]
pub async fn handle(
    gateway: &Gateway,
    caller: &Identity,
    query: ListDataSourcesQuery,
) -> AppResult<ListDataSourcesResponse> {
    query.validate()?;
    let pagination = query.pagination();
    let filter = DataSourceFilter { name: query.name };
    let page = gateway
        .list_data_sources(caller, &filter, pagination.page_request())
        .await?;

    Ok(ListDataSourcesResponse {
        pagination: PaginationMetadata::from_params(&pagination, page.total),
        items: page.items,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation() {
        assert!(ListDataSourcesQuery::default().validate().is_ok());

        let bad_page = ListDataSourcesQuery {
            page: Some(0),
            ..ListDataSourcesQuery::default()
        };
        assert!(matches!(bad_page.validate(), Err(AppError::InvalidArgument(_))));

        let long_name = ListDataSourcesQuery {
            name: Some("x".repeat(501)),
            ..ListDataSourcesQuery::default()
        };
        assert!(long_name.validate().is_err());
    }
}

use crate::error::{AppError, AppResult};
use crate::gateway::{Download, Gateway};
use crate::middleware::Authenticator;
use axum::http::HeaderMap;
use limonero_common::types::Identity;
use serde::Deserialize;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DownloadQuery {
    /// Signed link token, replaces the auth headers for this data source
    pub token: Option<String>,
}

/// Identity of a download request: a valid link token acts as the system
/// user, otherwise the regular auth headers apply
pub async fn download_caller(
    auth: &Authenticator,
    headers: &HeaderMap,
    data_source_id: i32,
    query: &DownloadQuery,
) -> AppResult<Identity> {
    match query.token.as_deref().filter(|t| !t.is_empty()) {
        Some(token) if auth.verify_download_token(data_source_id, token) => Ok(Identity::system()),
        Some(_) => Err(AppError::Unauthenticated("Invalid download token".to_string())),
        None => auth.authenticate(headers).await,
    }
}

#[tracing::instrument(skip(gateway, auth, headers, query))]
pub async fn handle(
    gateway: &Gateway,
    auth: &Authenticator,
    headers: &HeaderMap,
    data_source_id: i32,
    query: DownloadQuery,
) -> AppResult<Download> {
    let caller = download_caller(auth, headers, data_source_id, &query).await?;
    gateway.download(&caller, data_source_id).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_token_grants_only_its_data_source() {
        let auth = Authenticator::new("123456", None, reqwest::Client::new());
        let token = DownloadQuery {
            token: Some(auth.download_token(7)),
        };

        let caller = download_caller(&auth, &HeaderMap::new(), 7, &token).await.unwrap();
        assert!(caller.is_system());

        assert!(matches!(
            download_caller(&auth, &HeaderMap::new(), 8, &token).await,
            Err(AppError::Unauthenticated(_))
        ));
        assert!(matches!(
            download_caller(&auth, &HeaderMap::new(), 7, &DownloadQuery::default()).await,
            Err(AppError::Unauthenticated(_))
        ));
    }
}

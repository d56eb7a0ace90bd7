//! Caller authentication
//!
//! Two ways in:
//!
//! - `X-Auth-Token: <secret>` authenticates the system user (id 0), used by
//!   other services.
//! - `access-token`, `x-user-id` and `client` are forwarded to the identity
//!   service (`GET <thorn>/api/v1/users/<id>`), which answers with the user
//!   record.
//!
//! Download links may instead carry `?token=<hex sha256(secret ":" id)>`,
//! valid for that one data source only.

use crate::api::AppState;
use crate::error::{AppError, AppResult};
use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{request::Parts, HeaderMap},
};
use limonero_common::types::Identity;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

pub const AUTH_TOKEN_HEADER: &str = "x-auth-token";
pub const ACCESS_TOKEN_HEADER: &str = "access-token";
pub const USER_ID_HEADER: &str = "x-user-id";
pub const CLIENT_HEADER: &str = "client";

/// User record returned by the identity service
#[derive(Debug, Deserialize)]
struct ThornUser {
    id: Option<i32>,
    login: Option<String>,
    name: Option<String>,
    first_name: Option<String>,
    last_name: Option<String>,
    locale: Option<String>,
}

impl ThornUser {
    fn into_identity(self, user_id: i32) -> Identity {
        let name = self.name.filter(|n| !n.trim().is_empty()).unwrap_or_else(|| {
            [self.first_name.as_deref(), self.last_name.as_deref()]
                .iter()
                .flatten()
                .copied()
                .collect::<Vec<_>>()
                .join(" ")
        });
        let login = self.login.unwrap_or_else(|| user_id.to_string());
        Identity {
            id: self.id.unwrap_or(user_id),
            login,
            name,
            locale: self.locale,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Authenticator {
    secret: String,
    thorn_url: Option<String>,
    http: reqwest::Client,
}

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

impl Authenticator {
    pub fn new(secret: impl Into<String>, thorn_url: Option<String>, http: reqwest::Client) -> Self {
        Self {
            secret: secret.into(),
            thorn_url: thorn_url.map(|url| url.trim_end_matches('/').to_string()),
            http,
        }
    }

    /// Token granting download access to one data source
    pub fn download_token(&self, data_source_id: i32) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.secret.as_bytes());
        hasher.update(b":");
        hasher.update(data_source_id.to_string().as_bytes());
        hex::encode(hasher.finalize())
    }

    pub fn verify_download_token(&self, data_source_id: i32, token: &str) -> bool {
        token.trim().eq_ignore_ascii_case(&self.download_token(data_source_id))
    }

    pub async fn authenticate(&self, headers: &HeaderMap) -> AppResult<Identity> {
        if let Some(token) = header(headers, AUTH_TOKEN_HEADER) {
            if token == self.secret {
                return Ok(Identity::system());
            }
            warn!("Rejected invalid system token");
            return Err(AppError::Unauthenticated("Invalid authentication token".to_string()));
        }

        let (Some(access_token), Some(user_id), Some(client)) = (
            header(headers, ACCESS_TOKEN_HEADER),
            header(headers, USER_ID_HEADER),
            header(headers, CLIENT_HEADER),
        ) else {
            return Err(AppError::Unauthenticated("Authentication required".to_string()));
        };

        let user_id: i32 = user_id
            .parse()
            .map_err(|_| AppError::Unauthenticated(format!("Invalid user id '{}'", user_id)))?;

        let Some(thorn_url) = &self.thorn_url else {
            return Err(AppError::Unauthenticated(
                "User verification is not configured".to_string(),
            ));
        };

        let response = self
            .http
            .get(format!("{}/api/v1/users/{}", thorn_url, user_id))
            .header(ACCESS_TOKEN_HEADER, access_token)
            .header(USER_ID_HEADER, user_id.to_string())
            .header(CLIENT_HEADER, client)
            .send()
            .await
            .map_err(|e| AppError::IoFailure(format!("Identity service unreachable: {}", e)))?;

        if !response.status().is_success() {
            debug!(user_id, status = %response.status(), "Identity service rejected credentials");
            return Err(AppError::Unauthenticated("Invalid credentials".to_string()));
        }

        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| AppError::IoFailure(format!("Invalid identity service answer: {}", e)))?;
        let record = match body.get("data") {
            Some(data) if data.is_object() => data.clone(),
            _ => body,
        };
        let user: ThornUser = serde_json::from_value(record)
            .map_err(|e| AppError::IoFailure(format!("Invalid identity service answer: {}", e)))?;

        let identity = user.into_identity(user_id);
        debug!(user_id = identity.id, login = %identity.login, "Caller authenticated");
        Ok(identity)
    }
}

/// Authenticated caller of a request
#[derive(Debug, Clone)]
pub struct Caller(pub Identity);

#[async_trait]
impl FromRequestParts<AppState> for Caller {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        state.auth.authenticate(&parts.headers).await.map(Caller)
    }
}

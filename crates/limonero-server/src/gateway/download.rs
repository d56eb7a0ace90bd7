//! Streaming downloads of data sources and model artifacts

use super::Gateway;
use crate::backend::{join_path, ByteReader};
use crate::catalog::{can_access_model, PermissionScope};
use crate::error::{AppError, AppResult};
use axum::{
    body::Body,
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
};
use limonero_common::types::Identity;
use tokio_util::io::ReaderStream;
use tracing::{info, instrument};
use unicode_normalization::{char::is_combining_mark, UnicodeNormalization};

/// Size of each block emitted to the client
pub const DOWNLOAD_BLOCK_SIZE: usize = 4096;

const FALLBACK_FILENAME: &str = "download";

/// An open artifact ready to be streamed
pub struct Download {
    pub filename: String,
    pub reader: ByteReader,
}

impl std::fmt::Debug for Download {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Download").field("filename", &self.filename).finish()
    }
}

/// ASCII-only file name safe to put in a `Content-Disposition` header
pub fn sanitize_filename(name: &str) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or_default();
    let cleaned: String = base
        .nfd()
        .filter(|c| !is_combining_mark(*c))
        .map(|c| if c.is_whitespace() { '_' } else { c })
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_'))
        .collect();
    let cleaned = cleaned.trim_start_matches('.');
    if cleaned.is_empty() {
        FALLBACK_FILENAME.to_string()
    } else {
        cleaned.to_string()
    }
}

impl IntoResponse for Download {
    fn into_response(self) -> Response {
        let disposition = format!("attachment; filename={}", sanitize_filename(&self.filename));
        let stream = ReaderStream::with_capacity(self.reader, DOWNLOAD_BLOCK_SIZE);

        let mut response = Response::new(Body::from_stream(stream));
        *response.status_mut() = StatusCode::OK;
        let headers = response.headers_mut();
        headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("application/octet-stream"));
        headers.insert(
            header::CACHE_CONTROL,
            HeaderValue::from_static("no-cache, no-store, must-revalidate"),
        );
        if let Ok(value) = HeaderValue::from_str(&disposition) {
            headers.insert(header::CONTENT_DISPOSITION, value);
        }
        response
    }
}

impl Gateway {
    #[instrument(skip(self, caller), fields(user_id = caller.id))]
    pub async fn download(&self, caller: &Identity, data_source_id: i32) -> AppResult<Download> {
        let data_source = self
            .data_source_for(caller, data_source_id, PermissionScope::Read)
            .await?;
        let resolved = self.resolve_storage(data_source.storage_id).await?;
        if !resolved.storage.storage_type.is_file_based() {
            return Err(AppError::UnsupportedOperation(format!(
                "Data source {} is not stored as a file",
                data_source_id
            )));
        }

        let path = resolved.location.path_of(&data_source.url)?;
        let reader = resolved.backend.open_read(&path).await?;
        info!(path = %path, "Download started");
        Ok(Download {
            filename: data_source.name,
            reader,
        })
    }

    #[instrument(skip(self, caller), fields(user_id = caller.id))]
    pub async fn download_model(&self, caller: &Identity, model_id: i32) -> AppResult<Download> {
        let model = self.catalog().model(model_id).await?;
        if !can_access_model(caller, &model, PermissionScope::Read) {
            return Err(AppError::NotFound(format!("Model {} not found", model_id)));
        }

        let resolved = self.resolve_storage(model.storage_id).await?;
        let path = join_path(&resolved.location.root(), &[&model.path]);
        let reader = resolved.backend.open_read(&path).await?;
        info!(path = %path, "Model download started");

        let filename = model.path.rsplit('/').next().unwrap_or(&model.name).to_string();
        Ok(Download { filename, reader })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;

    #[test]
    fn test_sanitize_filename() {
        assert_eq!(sanitize_filename("people.csv"), "people.csv");
        assert_eq!(sanitize_filename("relatório final.csv"), "relatorio_final.csv");
        assert_eq!(sanitize_filename("../../etc/passwd"), "passwd");
        assert_eq!(sanitize_filename("a\"b;c.txt"), "abc.txt");
        assert_eq!(sanitize_filename("..."), FALLBACK_FILENAME);
        assert_eq!(sanitize_filename(""), FALLBACK_FILENAME);
    }

    #[tokio::test]
    async fn test_response_headers_and_body() {
        let download = Download {
            filename: "my file.csv".to_string(),
            reader: Box::pin(&b"a,b\n1,2\n"[..]),
        };
        let response = download.into_response();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[header::CONTENT_DISPOSITION],
            "attachment; filename=my_file.csv"
        );
        assert_eq!(
            response.headers()[header::CACHE_CONTROL],
            "no-cache, no-store, must-revalidate"
        );
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&body[..], b"a,b\n1,2\n");
    }
}

//! S3-compatible object store adapter for `s3://bucket/prefix` storages
//!
//! Connection settings come from the storage's `extra_params`:
//!
//! ```json
//! {"endpoint": "http://minio:9000", "region": "us-east-1",
//!  "access_key": "...", "secret_key": "...", "path_style": true}
//! ```
//!
//! Object stores have no directories: `mkdirs` is a no-op and listing a
//! "directory" lists the keys under `<path>/`.

use super::{spool_to_temp, Backend, BackendError, BackendResult, ByteReader, StorageLocation};
use async_trait::async_trait;
use aws_sdk_s3::{
    config::{Credentials, Region},
    error::SdkError,
    primitives::ByteStream,
    Client,
};
use bytes::Bytes;
use limonero_common::types::Storage;
use serde::Deserialize;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, instrument};

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct S3Settings {
    pub endpoint: Option<String>,
    pub region: String,
    pub access_key: String,
    pub secret_key: String,
    pub path_style: bool,
}

impl Default for S3Settings {
    fn default() -> Self {
        Self {
            endpoint: None,
            region: "us-east-1".to_string(),
            access_key: String::new(),
            secret_key: String::new(),
            path_style: false,
        }
    }
}

#[derive(Clone)]
pub struct S3Backend {
    client: Client,
    bucket: String,
}

fn sdk_error<E: std::fmt::Debug>(operation: &str, e: SdkError<E>) -> BackendError {
    BackendError::ObjectStore(format!("{} failed: {:?}", operation, e))
}

/// HTTP `Range` value of `length` bytes from `offset` (inclusive bounds)
fn byte_range(offset: u64, length: u64) -> String {
    format!("bytes={}-{}", offset, offset + length - 1)
}

fn status_of<E>(e: &SdkError<E>) -> Option<u16> {
    e.raw_response().map(|r| r.status().as_u16())
}

impl S3Backend {
    pub fn from_storage(storage: &Storage) -> BackendResult<Self> {
        let location = StorageLocation::parse(&storage.url)?;
        if location.scheme() != "s3" {
            return Err(BackendError::invalid_url(&storage.url, "expected an s3:// URL"));
        }
        let bucket = location
            .url()
            .host_str()
            .filter(|b| !b.is_empty())
            .ok_or_else(|| BackendError::invalid_url(&storage.url, "missing bucket"))?
            .to_string();

        let settings = match &storage.extra_params {
            Some(params) => S3Settings::deserialize(params)
                .map_err(|e| BackendError::invalid_url(&storage.url, format!("bad S3 settings: {}", e)))?,
            None => S3Settings::default(),
        };

        Ok(Self::new(bucket, &settings))
    }

    pub fn new(bucket: String, settings: &S3Settings) -> Self {
        let credentials = Credentials::new(
            &settings.access_key,
            &settings.secret_key,
            None,
            None,
            "limonero-storage",
        );

        let mut builder = aws_sdk_s3::Config::builder()
            .behavior_version_latest()
            .credentials_provider(credentials)
            .region(Region::new(settings.region.clone()))
            .force_path_style(settings.path_style);

        if let Some(endpoint) = &settings.endpoint {
            builder = builder.endpoint_url(endpoint);
        }

        Self {
            client: Client::from_conf(builder.build()),
            bucket,
        }
    }

    /// Object key of a backend path
    fn key(path: &str) -> String {
        path.trim_start_matches('/').to_string()
    }

    async fn list_keys(&self, prefix: &str) -> BackendResult<Vec<String>> {
        let mut keys = Vec::new();
        let mut token: Option<String> = None;

        loop {
            let response = self
                .client
                .list_objects_v2()
                .bucket(&self.bucket)
                .prefix(prefix)
                .set_continuation_token(token.take())
                .send()
                .await
                .map_err(|e| sdk_error("ListObjectsV2", e))?;

            keys.extend(
                response
                    .contents()
                    .iter()
                    .filter_map(|obj| obj.key().map(str::to_string)),
            );

            match response.next_continuation_token() {
                Some(next) if response.is_truncated().unwrap_or(false) => token = Some(next.to_string()),
                _ => break,
            }
        }

        Ok(keys)
    }

    async fn delete_key(&self, key: &str) -> BackendResult<()> {
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| sdk_error("DeleteObject", e))?;
        Ok(())
    }

    async fn upload_file(&self, key: &str, path: &std::path::Path) -> BackendResult<()> {
        let body = ByteStream::from_path(path)
            .await
            .map_err(|e| BackendError::ObjectStore(e.to_string()))?;
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(body)
            .send()
            .await
            .map_err(|e| sdk_error("PutObject", e))?;
        Ok(())
    }
}

#[async_trait]
impl Backend for S3Backend {
    fn kind(&self) -> &'static str {
        "s3"
    }

    #[instrument(skip(self))]
    async fn open_read(&self, path: &str) -> BackendResult<ByteReader> {
        let response = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(Self::key(path))
            .send()
            .await
            .map_err(|e| match status_of(&e) {
                Some(404) => BackendError::NotFound(path.to_string()),
                _ => sdk_error("GetObject", e),
            })?;

        Ok(Box::pin(response.body.into_async_read()))
    }

    async fn size(&self, path: &str) -> BackendResult<u64> {
        let head = self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(Self::key(path))
            .send()
            .await
            .map_err(|e| match status_of(&e) {
                Some(404) => BackendError::NotFound(path.to_string()),
                _ => sdk_error("HeadObject", e),
            })?;
        Ok(head.content_length().unwrap_or(0).max(0) as u64)
    }

    #[instrument(skip(self))]
    async fn read_range(&self, path: &str, offset: u64, length: u64) -> BackendResult<Bytes> {
        if length == 0 {
            return Ok(Bytes::new());
        }
        let response = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(Self::key(path))
            .range(byte_range(offset, length))
            .send()
            .await
            .map_err(|e| match status_of(&e) {
                Some(404) => BackendError::NotFound(path.to_string()),
                _ => sdk_error("GetObject", e),
            })?;

        let body = response
            .body
            .collect()
            .await
            .map_err(|e| BackendError::ObjectStore(e.to_string()))?;
        Ok(body.into_bytes())
    }

    #[instrument(skip(self, reader))]
    async fn write(&self, path: &str, reader: ByteReader) -> BackendResult<u64> {
        let (spooled, size) = spool_to_temp(reader).await?;
        self.upload_file(&Self::key(path), spooled.path()).await?;
        info!(bucket = %self.bucket, path, size, "Uploaded object");
        Ok(size)
    }

    async fn exists(&self, path: &str) -> BackendResult<bool> {
        let key = Self::key(path);
        match self.client.head_object().bucket(&self.bucket).key(&key).send().await {
            Ok(_) => Ok(true),
            Err(e) if status_of(&e) == Some(404) => {
                let children = self
                    .client
                    .list_objects_v2()
                    .bucket(&self.bucket)
                    .prefix(format!("{}/", key))
                    .max_keys(1)
                    .send()
                    .await
                    .map_err(|e| sdk_error("ListObjectsV2", e))?;
                Ok(!children.contents().is_empty())
            }
            Err(e) => Err(sdk_error("HeadObject", e)),
        }
    }

    async fn mkdirs(&self, _path: &str) -> BackendResult<()> {
        Ok(())
    }

    async fn list_files(&self, path: &str) -> BackendResult<Vec<String>> {
        let prefix = format!("{}/", Self::key(path));
        let keys = self.list_keys(&prefix).await?;
        Ok(keys
            .iter()
            .filter_map(|k| k.strip_prefix(&prefix))
            .filter(|name| !name.is_empty() && !name.contains('/'))
            .map(str::to_string)
            .collect())
    }

    async fn delete(&self, path: &str) -> BackendResult<()> {
        let key = Self::key(path);
        for child in self.list_keys(&format!("{}/", key)).await? {
            self.delete_key(&child).await?;
        }
        self.delete_key(&key).await
    }

    async fn rename(&self, from: &str, to: &str) -> BackendResult<()> {
        let (source, dest) = (Self::key(from), Self::key(to));
        debug!("Copying s3://{}/{} to s3://{}/{}", self.bucket, source, self.bucket, dest);

        self.client
            .copy_object()
            .bucket(&self.bucket)
            .copy_source(format!("{}/{}", self.bucket, source))
            .key(&dest)
            .send()
            .await
            .map_err(|e| sdk_error("CopyObject", e))?;

        self.delete_key(&source).await
    }

    async fn create_exclusive(&self, path: &str) -> BackendResult<bool> {
        let result = self
            .client
            .put_object()
            .bucket(&self.bucket)
            .key(Self::key(path))
            .if_none_match("*")
            .body(ByteStream::from_static(b""))
            .send()
            .await;

        match result {
            Ok(_) => Ok(true),
            Err(e) if matches!(status_of(&e), Some(409) | Some(412)) => Ok(false),
            Err(e) => Err(sdk_error("PutObject", e)),
        }
    }

    #[instrument(skip(self, parts), fields(parts = parts.len()))]
    async fn concat_merge(&self, parts: &[String], target: &str) -> BackendResult<()> {
        let (file, temp) = tempfile::NamedTempFile::new()?.into_parts();
        let mut out = tokio::fs::File::from_std(file);
        for part in parts {
            let mut input = self.open_read(part).await?;
            tokio::io::copy(&mut input, &mut out).await?;
        }
        out.flush().await?;
        drop(out);

        self.upload_file(&Self::key(target), &temp).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use limonero_common::types::StorageType;
    use serde_json::json;

    fn storage(url: &str, extra_params: Option<serde_json::Value>) -> Storage {
        Storage {
            id: 3,
            name: "minio".to_string(),
            storage_type: StorageType::S3,
            url: url.to_string(),
            client_url: None,
            extra_params,
            enabled: true,
        }
    }

    #[test]
    fn test_byte_range_is_inclusive() {
        assert_eq!(byte_range(0, 8), "bytes=0-7");
        assert_eq!(byte_range(4088, 8), "bytes=4088-4095");
    }

    #[test]
    fn test_key_strips_leading_slash() {
        assert_eq!(S3Backend::key("/prefix/limonero/data/a.csv"), "prefix/limonero/data/a.csv");
    }

    #[test]
    fn test_from_storage_reads_bucket_and_settings() {
        let backend = S3Backend::from_storage(&storage(
            "s3://lemons/prefix/",
            Some(json!({"endpoint": "http://localhost:9000", "path_style": true,
                        "access_key": "minioadmin", "secret_key": "minioadmin"})),
        ))
        .unwrap();
        assert_eq!(backend.bucket, "lemons");
    }

    #[test]
    fn test_rejects_bad_settings() {
        let err = S3Backend::from_storage(&storage("s3://lemons/", Some(json!({"path_style": "yes"}))))
            .err()
            .unwrap();
        assert!(matches!(err, BackendError::InvalidUrl { .. }));
    }

    #[test]
    fn test_requires_s3_scheme() {
        assert!(S3Backend::from_storage(&storage("file:///tmp/", None)).is_err());
    }
}

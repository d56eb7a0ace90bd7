//! HDFS adapter speaking the WebHDFS REST protocol
//!
//! The REST endpoint is taken from the storage's `client_url`, then from
//! `extra_params.webhdfs_url`, and defaults to port 9870 on the namenode
//! host. Data operations use the two-step redirect protocol with
//! `noredirect=true`; when `dfs.client.use.datanode.hostname` is off the
//! datanode host in the returned location is replaced by the namenode's.

use super::{Backend, BackendError, BackendOptions, BackendResult, ByteReader, StorageLocation};
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{self, BoxStream, StreamExt, TryStreamExt};
use limonero_common::types::Storage;
use reqwest::{Method, StatusCode};
use serde::Deserialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio_util::io::{ReaderStream, StreamReader};
use tracing::{debug, instrument};
use url::Url;

const DEFAULT_WEBHDFS_PORT: u16 = 9870;
const WEBHDFS_PREFIX: &str = "/webhdfs/v1";

#[derive(Debug, Clone)]
pub struct HdfsBackend {
    client: reqwest::Client,
    rest: Url,
    root: String,
    user: Option<String>,
    use_datanode_hostname: bool,
}

#[derive(Debug, Deserialize)]
struct Redirect {
    #[serde(rename = "Location")]
    location: String,
}

#[derive(Debug, Deserialize)]
struct BooleanResult {
    boolean: bool,
}

#[derive(Debug, Deserialize)]
struct FileStatusBody {
    #[serde(rename = "FileStatus")]
    status: FileLength,
}

#[derive(Debug, Deserialize)]
struct FileLength {
    length: u64,
}

#[derive(Debug, Deserialize)]
struct ListStatus {
    #[serde(rename = "FileStatuses")]
    statuses: FileStatuses,
}

#[derive(Debug, Deserialize)]
struct FileStatuses {
    #[serde(rename = "FileStatus", default)]
    entries: Vec<FileStatus>,
}

#[derive(Debug, Deserialize)]
struct FileStatus {
    #[serde(rename = "pathSuffix")]
    path_suffix: String,
    #[serde(rename = "type")]
    kind: String,
}

#[derive(Debug, Deserialize)]
struct RemoteExceptionBody {
    #[serde(rename = "RemoteException")]
    exception: RemoteException,
}

#[derive(Debug, Deserialize)]
struct RemoteException {
    #[serde(default)]
    exception: String,
    #[serde(default)]
    message: String,
}

impl HdfsBackend {
    pub fn from_storage(storage: &Storage, options: &BackendOptions) -> BackendResult<Self> {
        let location = StorageLocation::parse(&storage.url)?;
        if location.scheme() != "hdfs" {
            return Err(BackendError::invalid_url(&storage.url, "expected an hdfs:// URL"));
        }

        let rest = rest_endpoint(storage, location.url())?;
        let user = storage
            .extra_params
            .as_ref()
            .and_then(|p| p.get("user"))
            .and_then(|u| u.as_str())
            .map(str::to_string)
            .or_else(|| Some(location.url().username()).filter(|u| !u.is_empty()).map(str::to_string));

        Ok(Self {
            client: options.http.clone(),
            rest,
            root: location.root(),
            user,
            use_datanode_hostname: options.use_datanode_hostname,
        })
    }

    pub fn root(&self) -> &str {
        &self.root
    }

    fn op_url(&self, path: &str, op: &str, params: &[(&str, &str)]) -> BackendResult<Url> {
        let mut url = self.rest.clone();
        url.set_path(&format!("{}{}", WEBHDFS_PREFIX, path));
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("op", op);
            if let Some(user) = &self.user {
                query.append_pair("user.name", user);
            }
            for (key, value) in params {
                query.append_pair(key, value);
            }
        }
        Ok(url)
    }

    async fn call(&self, method: Method, url: Url, path: &str) -> BackendResult<reqwest::Response> {
        debug!(%method, %url, "WebHDFS request");
        let response = self.client.request(method, url).send().await?;
        check(response, path).await
    }

    /// First step of a data operation: ask the namenode where to go
    async fn redirect(&self, method: Method, path: &str, op: &str, params: &[(&str, &str)]) -> BackendResult<Url> {
        let mut all = params.to_vec();
        all.push(("noredirect", "true"));
        let url = self.op_url(path, op, &all)?;
        let redirect: Redirect = self.call(method, url, path).await?.json().await?;

        let mut location = Url::parse(&redirect.location)
            .map_err(|e| BackendError::invalid_url(&redirect.location, e.to_string()))?;
        if !self.use_datanode_hostname {
            if let Some(host) = self.rest.host_str() {
                location
                    .set_host(Some(host))
                    .map_err(|e| BackendError::invalid_url(&redirect.location, e.to_string()))?;
            }
        }
        Ok(location)
    }

    async fn open_stream(&self, path: &str) -> BackendResult<BoxStream<'static, std::io::Result<Bytes>>> {
        self.open_range(path, &[]).await
    }

    async fn open_range(
        &self,
        path: &str,
        range: &[(&str, &str)],
    ) -> BackendResult<BoxStream<'static, std::io::Result<Bytes>>> {
        let location = self.redirect(Method::GET, path, "OPEN", range).await?;
        let response = self.client.get(location).send().await?;
        let response = check(response, path).await?;
        Ok(response.bytes_stream().map_err(std::io::Error::other).boxed())
    }

    /// Upload `body` through a CREATE redirect
    async fn create(&self, path: &str, overwrite: bool, body: reqwest::Body) -> BackendResult<()> {
        let overwrite = if overwrite { "true" } else { "false" };
        let location = self
            .redirect(Method::PUT, path, "CREATE", &[("overwrite", overwrite)])
            .await?;
        let response = self.client.put(location).body(body).send().await?;
        check(response, path).await?;
        Ok(())
    }

    async fn boolean(&self, method: Method, path: &str, op: &str, params: &[(&str, &str)]) -> BackendResult<bool> {
        let url = self.op_url(path, op, params)?;
        let result: BooleanResult = self.call(method, url, path).await?.json().await?;
        Ok(result.boolean)
    }
}

fn rest_endpoint(storage: &Storage, hdfs_url: &Url) -> BackendResult<Url> {
    let explicit = storage
        .client_url
        .as_deref()
        .filter(|u| u.starts_with("http://") || u.starts_with("https://"))
        .or_else(|| {
            storage
                .extra_params
                .as_ref()
                .and_then(|p| p.get("webhdfs_url"))
                .and_then(|u| u.as_str())
        });

    match explicit {
        Some(endpoint) => Url::parse(endpoint).map_err(|e| BackendError::invalid_url(endpoint, e.to_string())),
        None => {
            let host = hdfs_url
                .host_str()
                .ok_or_else(|| BackendError::invalid_url(hdfs_url.as_str(), "missing namenode host"))?;
            let endpoint = format!("http://{}:{}", host, DEFAULT_WEBHDFS_PORT);
            Url::parse(&endpoint).map_err(|e| BackendError::invalid_url(endpoint, e.to_string()))
        }
    }
}

/// Turn non-2xx answers into errors, decoding WebHDFS remote exceptions
async fn check(response: reqwest::Response, path: &str) -> BackendResult<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    let (exception, message) = match serde_json::from_str::<RemoteExceptionBody>(&body) {
        Ok(parsed) => (parsed.exception.exception, parsed.exception.message),
        Err(_) => (String::new(), body),
    };

    if status == StatusCode::NOT_FOUND || exception == "FileNotFoundException" {
        return Err(BackendError::NotFound(path.to_string()));
    }
    if exception == "FileAlreadyExistsException" {
        return Err(BackendError::AlreadyExists(path.to_string()));
    }

    Err(BackendError::Remote {
        backend: "hdfs",
        status: status.as_u16(),
        message,
    })
}

#[async_trait]
impl Backend for HdfsBackend {
    fn kind(&self) -> &'static str {
        "hdfs"
    }

    async fn open_read(&self, path: &str) -> BackendResult<ByteReader> {
        let stream = self.open_stream(path).await?;
        Ok(Box::pin(StreamReader::new(stream)))
    }

    async fn size(&self, path: &str) -> BackendResult<u64> {
        let url = self.op_url(path, "GETFILESTATUS", &[])?;
        let status: FileStatusBody = self.call(Method::GET, url, path).await?.json().await?;
        Ok(status.status.length)
    }

    async fn read_range(&self, path: &str, offset: u64, length: u64) -> BackendResult<Bytes> {
        let (offset, length) = (offset.to_string(), length.to_string());
        let chunks: Vec<Bytes> = self
            .open_range(path, &[("offset", &offset), ("length", &length)])
            .await?
            .try_collect()
            .await?;
        Ok(Bytes::from(chunks.concat()))
    }

    #[instrument(skip(self, reader))]
    async fn write(&self, path: &str, reader: ByteReader) -> BackendResult<u64> {
        let written = Arc::new(AtomicU64::new(0));
        let counter = written.clone();
        let stream = ReaderStream::new(reader).inspect_ok(move |chunk| {
            counter.fetch_add(chunk.len() as u64, Ordering::Relaxed);
        });

        self.create(path, true, reqwest::Body::wrap_stream(stream)).await?;
        Ok(written.load(Ordering::Relaxed))
    }

    async fn exists(&self, path: &str) -> BackendResult<bool> {
        let url = self.op_url(path, "GETFILESTATUS", &[])?;
        match self.call(Method::GET, url, path).await {
            Ok(_) => Ok(true),
            Err(BackendError::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn mkdirs(&self, path: &str) -> BackendResult<()> {
        if self.boolean(Method::PUT, path, "MKDIRS", &[]).await? {
            Ok(())
        } else {
            Err(BackendError::Remote {
                backend: "hdfs",
                status: 200,
                message: format!("MKDIRS refused for {}", path),
            })
        }
    }

    async fn list_files(&self, path: &str) -> BackendResult<Vec<String>> {
        let url = self.op_url(path, "LISTSTATUS", &[])?;
        let listing: ListStatus = self.call(Method::GET, url, path).await?.json().await?;
        Ok(listing
            .statuses
            .entries
            .into_iter()
            .filter(|status| status.kind == "FILE")
            .map(|status| status.path_suffix)
            .collect())
    }

    async fn delete(&self, path: &str) -> BackendResult<()> {
        match self.boolean(Method::DELETE, path, "DELETE", &[("recursive", "true")]).await {
            Ok(_) | Err(BackendError::NotFound(_)) => Ok(()),
            Err(e) => Err(e),
        }
    }

    async fn rename(&self, from: &str, to: &str) -> BackendResult<()> {
        if self
            .boolean(Method::PUT, from, "RENAME", &[("destination", to)])
            .await?
        {
            Ok(())
        } else {
            Err(BackendError::Remote {
                backend: "hdfs",
                status: 200,
                message: format!("RENAME refused for {} -> {}", from, to),
            })
        }
    }

    async fn create_exclusive(&self, path: &str) -> BackendResult<bool> {
        match self.create(path, false, reqwest::Body::from(Vec::<u8>::new())).await {
            Ok(()) => Ok(true),
            Err(BackendError::AlreadyExists(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    #[instrument(skip(self, parts), fields(parts = parts.len()))]
    async fn concat_merge(&self, parts: &[String], target: &str) -> BackendResult<()> {
        let staging = format!("{}.tmp", target);

        let this = self.clone();
        let body = stream::iter(parts.to_vec())
            .then(move |part| {
                let this = this.clone();
                async move {
                    this.open_stream(&part)
                        .await
                        .map_err(|e| std::io::Error::other(e.to_string()))
                }
            })
            .try_flatten();

        if let Err(e) = self.create(&staging, true, reqwest::Body::wrap_stream(body)).await {
            let _ = self.delete(&staging).await;
            return Err(e);
        }
        self.rename(&staging, target).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use limonero_common::types::StorageType;
    use serde_json::json;
    use tokio::io::AsyncReadExt;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn storage(client_url: Option<String>) -> Storage {
        Storage {
            id: 2,
            name: "hdfs".to_string(),
            storage_type: StorageType::Hdfs,
            url: "hdfs://namenode:9000/".to_string(),
            client_url,
            extra_params: None,
            enabled: true,
        }
    }

    fn backend(server: &MockServer, use_datanode_hostname: bool) -> HdfsBackend {
        let options = BackendOptions {
            use_datanode_hostname,
            ..BackendOptions::default()
        };
        HdfsBackend::from_storage(&storage(Some(server.uri())), &options).unwrap()
    }

    #[test]
    fn test_default_rest_endpoint() {
        let backend = HdfsBackend::from_storage(&storage(None), &BackendOptions::default()).unwrap();
        assert_eq!(backend.rest.as_str(), "http://namenode:9870/");
        assert_eq!(backend.root(), "/");
    }

    #[test]
    fn test_endpoint_from_extra_params() {
        let mut with_params = storage(None);
        with_params.extra_params = Some(json!({"webhdfs_url": "http://gateway:14000", "user": "hdfs"}));
        let backend = HdfsBackend::from_storage(&with_params, &BackendOptions::default()).unwrap();
        assert_eq!(backend.rest.as_str(), "http://gateway:14000/");
        assert_eq!(backend.user.as_deref(), Some("hdfs"));
    }

    #[tokio::test]
    async fn test_exists_maps_not_found() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/webhdfs/v1/data/a.csv"))
            .and(query_param("op", "GETFILESTATUS"))
            .respond_with(ResponseTemplate::new(404).set_body_json(json!({
                "RemoteException": {
                    "exception": "FileNotFoundException",
                    "javaClassName": "java.io.FileNotFoundException",
                    "message": "File does not exist: /data/a.csv"
                }
            })))
            .mount(&server)
            .await;

        assert!(!backend(&server, true).exists("/data/a.csv").await.unwrap());
    }

    #[tokio::test]
    async fn test_list_files_skips_directories() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/webhdfs/v1/tmp/upload/a.csv"))
            .and(query_param("op", "LISTSTATUS"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "FileStatuses": {"FileStatus": [
                    {"pathSuffix": "a.csv.part000000001", "type": "FILE"},
                    {"pathSuffix": "nested", "type": "DIRECTORY"},
                    {"pathSuffix": "a.csv.part000000002", "type": "FILE"}
                ]}
            })))
            .mount(&server)
            .await;

        let names = backend(&server, true).list_files("/tmp/upload/a.csv").await.unwrap();
        assert_eq!(names, vec!["a.csv.part000000001", "a.csv.part000000002"]);
    }

    #[tokio::test]
    async fn test_open_follows_redirect_with_namenode_host() {
        let server = MockServer::start().await;
        let port = server.address().port();
        Mock::given(method("GET"))
            .and(path("/webhdfs/v1/data/a.csv"))
            .and(query_param("op", "OPEN"))
            .and(query_param("noredirect", "true"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "Location": format!("http://datanode-7.internal:{}/webhdfs/v1/data/a.csv?op=OPEN&offset=0", port)
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/webhdfs/v1/data/a.csv"))
            .and(query_param("offset", "0"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"hello".to_vec()))
            .mount(&server)
            .await;

        let backend = backend(&server, false);
        let mut reader = backend.open_read("/data/a.csv").await.unwrap();
        let mut body = Vec::new();
        reader.read_to_end(&mut body).await.unwrap();
        assert_eq!(body, b"hello");
    }

    #[tokio::test]
    async fn test_size_and_ranged_open() {
        let server = MockServer::start().await;
        let port = server.address().port();
        Mock::given(method("GET"))
            .and(path("/webhdfs/v1/data/p.parquet"))
            .and(query_param("op", "GETFILESTATUS"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "FileStatus": {"length": 4096, "type": "FILE", "pathSuffix": ""}
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/webhdfs/v1/data/p.parquet"))
            .and(query_param("op", "OPEN"))
            .and(query_param("offset", "4088"))
            .and(query_param("length", "8"))
            .and(query_param("noredirect", "true"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "Location": format!("http://127.0.0.1:{}/datanode/p.parquet?offset=4088&length=8", port)
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/datanode/p.parquet"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"\x10\0\0\0PAR1".to_vec()))
            .mount(&server)
            .await;

        let backend = backend(&server, true);
        assert_eq!(backend.size("/data/p.parquet").await.unwrap(), 4096);
        let tail = backend.read_range("/data/p.parquet", 4088, 8).await.unwrap();
        assert_eq!(&tail[4..], b"PAR1");
    }

    #[tokio::test]
    async fn test_block_failure_surfaces_message() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(query_param("op", "OPEN"))
            .respond_with(ResponseTemplate::new(500).set_body_json(json!({
                "RemoteException": {
                    "exception": "IOException",
                    "message": "Could not obtain block: BP-1:blk_1 file=/data/a.csv"
                }
            })))
            .mount(&server)
            .await;

        let err = backend(&server, true).open_read("/data/a.csv").await.err().unwrap();
        assert!(err.is_block_access_failure());
    }

    #[tokio::test]
    async fn test_create_exclusive_detects_existing_file() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(query_param("op", "CREATE"))
            .and(query_param("overwrite", "false"))
            .respond_with(ResponseTemplate::new(403).set_body_json(json!({
                "RemoteException": {
                    "exception": "FileAlreadyExistsException",
                    "message": "/tmp/upload/a.csv.assembling already exists"
                }
            })))
            .mount(&server)
            .await;

        assert!(!backend(&server, true)
            .create_exclusive("/tmp/upload/a.csv.assembling")
            .await
            .unwrap());
    }
}

//! Local filesystem adapter for `file://` storages

use super::{Backend, BackendError, BackendResult, ByteReader, StorageLocation};
use async_trait::async_trait;
use bytes::Bytes;
use limonero_common::types::Storage;
use std::io::ErrorKind;
use std::path::Path;
use tokio::fs;
use std::io::SeekFrom;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tracing::{debug, instrument, warn};

#[derive(Debug, Clone)]
pub struct LocalBackend {
    root: String,
}

impl LocalBackend {
    pub fn from_storage(storage: &Storage) -> BackendResult<Self> {
        let location = StorageLocation::parse(&storage.url)?;
        if location.scheme() != "file" {
            return Err(BackendError::invalid_url(&storage.url, "expected a file:// URL"));
        }
        Ok(Self {
            root: location.root(),
        })
    }

    pub fn root(&self) -> &str {
        &self.root
    }
}

fn not_found(path: &str) -> impl FnOnce(std::io::Error) -> BackendError + '_ {
    move |e| match e.kind() {
        ErrorKind::NotFound => BackendError::NotFound(path.to_string()),
        _ => BackendError::Io(e),
    }
}

async fn ensure_parent(path: &str) -> BackendResult<()> {
    if let Some(parent) = Path::new(path).parent() {
        fs::create_dir_all(parent).await?;
    }
    Ok(())
}

#[async_trait]
impl Backend for LocalBackend {
    fn kind(&self) -> &'static str {
        "local"
    }

    async fn open_read(&self, path: &str) -> BackendResult<ByteReader> {
        let file = fs::File::open(path).await.map_err(not_found(path))?;
        Ok(Box::pin(file))
    }

    async fn size(&self, path: &str) -> BackendResult<u64> {
        Ok(fs::metadata(path).await.map_err(not_found(path))?.len())
    }

    async fn read_range(&self, path: &str, offset: u64, length: u64) -> BackendResult<Bytes> {
        let mut file = fs::File::open(path).await.map_err(not_found(path))?;
        file.seek(SeekFrom::Start(offset)).await?;
        let mut buf = Vec::new();
        file.take(length).read_to_end(&mut buf).await?;
        Ok(Bytes::from(buf))
    }

    #[instrument(skip(self, reader))]
    async fn write(&self, path: &str, mut reader: ByteReader) -> BackendResult<u64> {
        ensure_parent(path).await?;
        let mut file = fs::File::create(path).await?;
        let written = tokio::io::copy(&mut reader, &mut file).await?;
        file.flush().await?;
        debug!(path, written, "Wrote local file");
        Ok(written)
    }

    async fn exists(&self, path: &str) -> BackendResult<bool> {
        Ok(fs::try_exists(path).await?)
    }

    async fn mkdirs(&self, path: &str) -> BackendResult<()> {
        fs::create_dir_all(path).await?;
        Ok(())
    }

    async fn list_files(&self, path: &str) -> BackendResult<Vec<String>> {
        let mut entries = fs::read_dir(path).await.map_err(not_found(path))?;
        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_file() {
                names.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        Ok(names)
    }

    async fn delete(&self, path: &str) -> BackendResult<()> {
        let metadata = match fs::metadata(path).await {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e.into()),
        };
        if metadata.is_dir() {
            fs::remove_dir_all(path).await?;
        } else {
            fs::remove_file(path).await?;
        }
        Ok(())
    }

    async fn rename(&self, from: &str, to: &str) -> BackendResult<()> {
        ensure_parent(to).await?;
        fs::rename(from, to).await.map_err(not_found(from))
    }

    async fn create_exclusive(&self, path: &str) -> BackendResult<bool> {
        ensure_parent(path).await?;
        match fs::OpenOptions::new().write(true).create_new(true).open(path).await {
            Ok(_) => Ok(true),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    #[instrument(skip(self, parts), fields(parts = parts.len()))]
    async fn concat_merge(&self, parts: &[String], target: &str) -> BackendResult<()> {
        let staging = format!("{}.tmp", target);
        ensure_parent(&staging).await?;

        let merged = async {
            let mut out = fs::File::create(&staging).await?;
            for part in parts {
                let mut input = fs::File::open(part).await.map_err(not_found(part))?;
                tokio::io::copy(&mut input, &mut out).await?;
            }
            out.flush().await?;
            out.sync_all().await?;
            fs::rename(&staging, target).await?;
            Ok::<_, BackendError>(())
        }
        .await;

        if let Err(e) = merged {
            if let Err(cleanup) = fs::remove_file(&staging).await {
                if cleanup.kind() != ErrorKind::NotFound {
                    warn!(path = %staging, error = %cleanup, "Failed to remove partial merge");
                }
            }
            return Err(e);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backend(dir: &tempfile::TempDir) -> (LocalBackend, String) {
        let root = dir.path().to_string_lossy().into_owned();
        (LocalBackend { root: root.clone() }, root)
    }

    async fn read_all(backend: &LocalBackend, path: &str) -> Vec<u8> {
        let mut reader = backend.open_read(path).await.unwrap();
        let mut buf = Vec::new();
        reader.read_to_end(&mut buf).await.unwrap();
        buf
    }

    #[test]
    fn test_from_storage_requires_file_scheme() {
        let storage = Storage {
            id: 1,
            name: "local".to_string(),
            storage_type: limonero_common::types::StorageType::Local,
            url: "file:///srv/data/".to_string(),
            client_url: None,
            extra_params: None,
            enabled: true,
        };
        assert_eq!(LocalBackend::from_storage(&storage).unwrap().root(), "/srv/data");

        let hdfs = Storage {
            url: "hdfs://nn:9000/".to_string(),
            ..storage
        };
        assert!(LocalBackend::from_storage(&hdfs).is_err());
    }

    #[tokio::test]
    async fn test_write_and_read_back() {
        let dir = tempfile::tempdir().unwrap();
        let (backend, root) = backend(&dir);
        let path = format!("{}/nested/a.bin", root);

        let written = backend
            .write(&path, Box::pin(&b"payload"[..]))
            .await
            .unwrap();
        assert_eq!(written, 7);
        assert!(backend.exists(&path).await.unwrap());
        assert_eq!(read_all(&backend, &path).await, b"payload");
    }

    #[tokio::test]
    async fn test_size_and_ranges() {
        let dir = tempfile::tempdir().unwrap();
        let (backend, root) = backend(&dir);
        let path = format!("{}/r.bin", root);
        backend.write(&path, Box::pin(&b"0123456789"[..])).await.unwrap();

        assert_eq!(backend.size(&path).await.unwrap(), 10);
        assert_eq!(&backend.read_range(&path, 2, 3).await.unwrap()[..], b"234");
        assert_eq!(&backend.read_range(&path, 8, 10).await.unwrap()[..], b"89");
        assert!(matches!(
            backend.size(&format!("{}/missing", root)).await,
            Err(BackendError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_open_missing_file_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let (backend, root) = backend(&dir);
        let err = backend.open_read(&format!("{}/missing", root)).await.err().unwrap();
        assert!(matches!(err, BackendError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_create_exclusive_only_once() {
        let dir = tempfile::tempdir().unwrap();
        let (backend, root) = backend(&dir);
        let lock = format!("{}/tmp/upload/x.assembling", root);
        assert!(backend.create_exclusive(&lock).await.unwrap());
        assert!(!backend.create_exclusive(&lock).await.unwrap());
    }

    #[tokio::test]
    async fn test_concat_merge_in_order_and_keeps_parts() {
        let dir = tempfile::tempdir().unwrap();
        let (backend, root) = backend(&dir);
        let mut parts = Vec::new();
        for (i, body) in ["ab", "cd", "e"].iter().enumerate() {
            let part = format!("{}/parts/p{}", root, i);
            backend.write(&part, Box::pin(body.as_bytes())).await.unwrap();
            parts.push(part);
        }

        let target = format!("{}/out/merged", root);
        backend.concat_merge(&parts, &target).await.unwrap();

        assert_eq!(read_all(&backend, &target).await, b"abcde");
        for part in &parts {
            assert!(backend.exists(part).await.unwrap());
        }
        assert!(!backend.exists(&format!("{}.tmp", target)).await.unwrap());
    }

    #[tokio::test]
    async fn test_failed_merge_keeps_parts() {
        let dir = tempfile::tempdir().unwrap();
        let (backend, root) = backend(&dir);
        let part = format!("{}/parts/p0", root);
        backend.write(&part, Box::pin(&b"x"[..])).await.unwrap();
        let parts = vec![part.clone(), format!("{}/parts/missing", root)];

        let target = format!("{}/out/merged", root);
        assert!(backend.concat_merge(&parts, &target).await.is_err());
        assert!(backend.exists(&part).await.unwrap());
        assert!(!backend.exists(&target).await.unwrap());
    }

    #[tokio::test]
    async fn test_list_delete_and_rename() {
        let dir = tempfile::tempdir().unwrap();
        let (backend, root) = backend(&dir);
        let base = format!("{}/listing", root);
        backend.mkdirs(&format!("{}/sub", base)).await.unwrap();
        backend.write(&format!("{}/a", base), Box::pin(&b"1"[..])).await.unwrap();
        backend.write(&format!("{}/b", base), Box::pin(&b"2"[..])).await.unwrap();

        let mut names = backend.list_files(&base).await.unwrap();
        names.sort();
        assert_eq!(names, vec!["a", "b"]);

        backend
            .rename(&format!("{}/a", base), &format!("{}/c", base))
            .await
            .unwrap();
        assert!(backend.exists(&format!("{}/c", base)).await.unwrap());

        backend.delete(&base).await.unwrap();
        assert!(!backend.exists(&base).await.unwrap());
        backend.delete(&base).await.unwrap();
        assert!(matches!(
            backend.list_files(&base).await.err().unwrap(),
            BackendError::NotFound(_)
        ));
    }
}

//! Resumable uploads: probe, put chunk, finalize

use super::{Gateway, ResolvedStorage};
use crate::backend::ByteReader;
use crate::catalog::{CatalogError, NewDataSource};
use crate::error::{AppError, AppResult};
use crate::staging::{validate_chunk, validate_filename, Assembler, AssemblyOutcome, ChunkState, ChunkStore};
use limonero_common::types::{DataSource, DataSourceFormat, Identity};
use serde::Serialize;
use tracing::{info, instrument, warn};

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

/// One chunk of a resumable upload as described by the client
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkUpload {
    pub storage_id: i32,
    /// Client-chosen id of the whole upload
    pub identifier: String,
    pub filename: String,
    pub chunk_number: u32,
    pub total_chunks: u32,
    pub total_size: Option<u64>,
}

impl ChunkUpload {
    pub fn validate(&self) -> AppResult<()> {
        if self.identifier.trim().is_empty() {
            return Err(AppError::InvalidArgument("upload identifier is required".to_string()));
        }
        validate_filename(&self.filename)?;
        validate_chunk(self.chunk_number, Some(self.total_chunks))?;
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum UploadStatus {
    InProgress { received: usize, total: u32 },
    Finalized { data_source: Box<DataSource> },
}

impl Gateway {
    fn chunk_store(&self, resolved: &ResolvedStorage) -> ChunkStore {
        ChunkStore::new(resolved.backend.clone(), resolved.location.root())
    }

    /// Whether chunk `chunk_number` of `filename` is staged. Staging is keyed
    /// by file name only; the client's upload identifier plays no part here.
    #[instrument(skip(self))]
    pub async fn upload_probe(&self, storage_id: i32, filename: &str, chunk_number: u32) -> AppResult<ChunkState> {
        let resolved = self.resolve_storage(storage_id).await?;
        Ok(self.chunk_store(&resolved).probe(filename, chunk_number).await?)
    }

    /// Store one chunk and finalize the upload when it was the last missing one
    #[instrument(skip(self, caller, upload, body), fields(
        user_id = caller.id,
        storage_id = upload.storage_id,
        filename = %upload.filename,
        chunk = upload.chunk_number,
    ))]
    pub async fn upload_chunk(
        &self,
        caller: &Identity,
        upload: &ChunkUpload,
        body: ByteReader,
    ) -> AppResult<UploadStatus> {
        upload.validate()?;
        let resolved = self.resolve_storage(upload.storage_id).await?;
        let store = self.chunk_store(&resolved);

        store.put(&upload.filename, upload.chunk_number, body).await?;

        let received = store.received(&upload.filename).await?;
        if received != upload.total_chunks as usize {
            return Ok(UploadStatus::InProgress {
                received,
                total: upload.total_chunks,
            });
        }

        let data_source = self.finalize(caller, upload, &resolved, store).await?;
        Ok(UploadStatus::Finalized {
            data_source: Box::new(data_source),
        })
    }

    async fn finalize(
        &self,
        caller: &Identity,
        upload: &ChunkUpload,
        resolved: &ResolvedStorage,
        store: ChunkStore,
    ) -> AppResult<DataSource> {
        let assembler = Assembler::new(store);
        let assembly = match assembler
            .assemble(&upload.filename, self.instance(), upload.total_chunks)
            .await?
        {
            AssemblyOutcome::Assembled(assembly) => assembly,
            AssemblyOutcome::Contended | AssemblyOutcome::StagingGone => {
                return self.recorded_upload(upload).await;
            }
        };

        let record = NewDataSource {
            name: upload.filename.clone(),
            storage_id: resolved.storage.id,
            url: resolved.location.url_for(&assembly.final_path),
            format: DataSourceFormat::from_filename(&upload.filename),
            user: caller.clone(),
            upload_identifier: Some(upload.identifier.clone()),
            estimated_size_in_mb: upload.total_size.map(|size| size as f64 / BYTES_PER_MB),
        };

        match self.catalog().create_data_source(record).await {
            Ok(data_source) => {
                if let Err(e) = assembler.commit(&assembly).await {
                    warn!(error = %e, "Upload recorded but staging cleanup failed");
                }
                info!(data_source_id = data_source.id, url = %data_source.url, "Upload finalized");
                Ok(data_source)
            }
            Err(CatalogError::Conflict(_)) => {
                assembler.abort(&assembly).await;
                if let Err(e) = assembler.store().discard(&upload.filename).await {
                    warn!(error = %e, "Failed to discard staging of a recorded upload");
                }
                self.recorded_upload(upload).await
            }
            Err(e) => {
                assembler.abort(&assembly).await;
                Err(e.into())
            }
        }
    }

    /// The data source an earlier finalize created for this upload
    async fn recorded_upload(&self, upload: &ChunkUpload) -> AppResult<DataSource> {
        self.catalog()
            .data_source_by_upload(upload.storage_id, &upload.identifier)
            .await?
            .ok_or_else(|| {
                AppError::Conflict(format!(
                    "Upload {} of '{}' is being finalized by another request",
                    upload.identifier, upload.filename
                ))
            })
    }

    /// Remove the staging directory of an upload (system users only)
    #[instrument(skip(self, caller), fields(user_id = caller.id))]
    pub async fn discard_upload(&self, caller: &Identity, storage_id: i32, filename: &str) -> AppResult<()> {
        if !caller.is_system() {
            return Err(AppError::Forbidden("Only system users may discard uploads".to_string()));
        }
        let resolved = self.resolve_storage(storage_id).await?;
        self.chunk_store(&resolved).discard(filename).await?;
        info!(storage_id, filename, "Staging discarded");
        Ok(())
    }
}

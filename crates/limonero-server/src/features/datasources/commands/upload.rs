use crate::backend::ByteReader;
use crate::error::{AppError, AppResult};
use crate::gateway::{ChunkUpload, Gateway, UploadStatus};
use limonero_common::types::Identity;
use serde::Deserialize;

/// Query string of `POST /datasources/upload`, the chunk bytes are the body
#[derive(Debug, Clone, Deserialize)]
pub struct UploadChunkCommand {
    pub storage_id: i32,
    #[serde(rename = "resumableIdentifier")]
    pub identifier: String,
    #[serde(rename = "resumableFilename")]
    pub filename: String,
    #[serde(rename = "resumableChunkNumber")]
    pub chunk_number: u32,
    #[serde(rename = "resumableTotalChunks")]
    pub total_chunks: u32,
    #[serde(rename = "resumableTotalSize")]
    pub total_size: Option<u64>,
}

impl From<UploadChunkCommand> for ChunkUpload {
    fn from(command: UploadChunkCommand) -> Self {
        ChunkUpload {
            storage_id: command.storage_id,
            identifier: command.identifier,
            filename: command.filename,
            chunk_number: command.chunk_number,
            total_chunks: command.total_chunks,
            total_size: command.total_size,
        }
    }
}

#[tracing::instrument(skip(gateway, caller, command, body), fields(user_id = caller.id))]
pub async fn handle(
    gateway: &Gateway,
    caller: &Identity,
    command: UploadChunkCommand,
    body: ByteReader,
) -> AppResult<UploadStatus> {
    let upload = ChunkUpload::from(command);
    upload.validate()?;
    gateway.upload_chunk(caller, &upload, body).await
}

/// Drop every staged chunk of an unfinished upload
#[derive(Debug, Clone, Deserialize)]
pub struct DiscardUploadCommand {
    pub storage_id: i32,
    #[serde(rename = "resumableFilename")]
    pub filename: String,
}

impl DiscardUploadCommand {
    pub fn validate(&self) -> AppResult<()> {
        if self.filename.trim().is_empty() {
            return Err(AppError::InvalidArgument("resumableFilename is required".to_string()));
        }
        Ok(())
    }
}

#[tracing::instrument(skip(gateway, caller), fields(user_id = caller.id))]
pub async fn discard(gateway: &Gateway, caller: &Identity, command: DiscardUploadCommand) -> AppResult<()> {
    command.validate()?;
    gateway
        .discard_upload(caller, command.storage_id, &command.filename)
        .await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_maps_to_chunk_upload() {
        let command: UploadChunkCommand = serde_json::from_value(serde_json::json!({
            "storage_id": 3,
            "resumableIdentifier": "1024-data.csv",
            "resumableFilename": "data.csv",
            "resumableChunkNumber": 1,
            "resumableTotalChunks": 2,
            "resumableTotalSize": 1024
        }))
        .unwrap();

        let upload = ChunkUpload::from(command);
        assert_eq!(upload.storage_id, 3);
        assert_eq!(upload.total_chunks, 2);
        assert_eq!(upload.total_size, Some(1024));
        assert!(upload.validate().is_ok());
    }

    #[test]
    fn test_total_size_is_optional() {
        let command: UploadChunkCommand = serde_json::from_value(serde_json::json!({
            "storage_id": 3,
            "resumableIdentifier": "x",
            "resumableFilename": "data.csv",
            "resumableChunkNumber": 1,
            "resumableTotalChunks": 1
        }))
        .unwrap();
        assert_eq!(command.total_size, None);
    }

    #[test]
    fn test_discard_requires_filename() {
        let command = DiscardUploadCommand {
            storage_id: 1,
            filename: " ".to_string(),
        };
        assert!(matches!(command.validate(), Err(AppError::InvalidArgument(_))));
    }
}

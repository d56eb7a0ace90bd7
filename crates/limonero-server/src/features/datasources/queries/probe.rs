use crate::error::{AppError, AppResult};
use crate::gateway::Gateway;
use crate::staging::ChunkState;
use serde::Deserialize;

/// Whether one chunk of a resumable upload is already stored
#[derive(Debug, Clone, Deserialize)]
pub struct ProbeUploadQuery {
    pub storage_id: i32,
    /// Part of the resumable protocol; only validated and logged
    #[serde(rename = "resumableIdentifier")]
    pub identifier: String,
    #[serde(rename = "resumableFilename")]
    pub filename: String,
    #[serde(rename = "resumableChunkNumber")]
    pub chunk_number: u32,
}

impl ProbeUploadQuery {
    pub fn validate(&self) -> AppResult<()> {
        if self.identifier.trim().is_empty() {
            return Err(AppError::InvalidArgument("resumableIdentifier is required".to_string()));
        }
        Ok(())
    }
}

#[tracing::instrument(skip(gateway))]
pub async fn handle(gateway: &Gateway, query: ProbeUploadQuery) -> AppResult<ChunkState> {
    query.validate()?;
    gateway
        .upload_probe(query.storage_id, &query.filename, query.chunk_number)
        .await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deserializes_resumable_names() {
        let query: ProbeUploadQuery = serde_json::from_value(serde_json::json!({
            "storage_id": 1,
            "resumableIdentifier": "57-people.csv",
            "resumableFilename": "people.csv",
            "resumableChunkNumber": 2
        }))
        .unwrap();
        assert_eq!(query.chunk_number, 2);
        assert!(query.validate().is_ok());
    }
}

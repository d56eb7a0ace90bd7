//! Chunk store for resumable uploads
//!
//! All state lives on the backend, so any gateway instance may accept any
//! chunk:
//!
//! ```text
//! <root>/tmp/upload/<filename>/<filename>.part000000001
//! <root>/tmp/upload/<filename>/<filename>.part000000002
//! <root>/tmp/upload/<filename>.assembling      (finalize lock)
//! ```
//!
//! Chunk numbers are zero-padded to nine digits so lexicographic order of the
//! part names equals numeric chunk order.

use crate::backend::{join_path, Backend, BackendError, ByteReader};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, instrument};

pub mod assembler;

pub use assembler::{Assembler, Assembly, AssemblyOutcome};

/// Width of the zero-padded chunk number in part names
pub const CHUNK_DIGITS: usize = 9;

pub const MAX_CHUNK_NUMBER: u32 = 999_999_999;

pub const MAX_FILENAME_LEN: usize = 255;

const UPLOAD_DIR: [&str; 2] = ["tmp", "upload"];

pub type StagingResult<T> = std::result::Result<T, StagingError>;

#[derive(Debug, Error)]
pub enum StagingError {
    #[error("Upload of '{filename}' is incomplete: {received} of {expected} chunks received")]
    IncompleteUpload {
        filename: String,
        received: usize,
        expected: u32,
    },

    #[error("Target already exists: {0}")]
    AlreadyExists(String),

    #[error("Invalid file name: {0}")]
    InvalidFilename(String),

    #[error("Invalid chunk: {0}")]
    InvalidChunk(String),

    #[error(transparent)]
    Backend(#[from] BackendError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkState {
    Present,
    Absent,
}

/// Name of the file holding chunk `chunk` of `filename`
pub fn chunk_file_name(filename: &str, chunk: u32) -> String {
    format!("{}.part{:0width$}", filename, chunk, width = CHUNK_DIGITS)
}

/// Reject names that would escape the staging directory
pub fn validate_filename(filename: &str) -> StagingResult<()> {
    if filename.trim().is_empty() {
        return Err(StagingError::InvalidFilename("file name is empty".to_string()));
    }
    if filename.len() > MAX_FILENAME_LEN {
        return Err(StagingError::InvalidFilename(format!(
            "file name longer than {} bytes",
            MAX_FILENAME_LEN
        )));
    }
    if filename == "." || filename == ".." || filename.contains(['/', '\\', '\0']) {
        return Err(StagingError::InvalidFilename(filename.to_string()));
    }
    Ok(())
}

pub fn validate_chunk(chunk: u32, total_chunks: Option<u32>) -> StagingResult<()> {
    if chunk == 0 || chunk > MAX_CHUNK_NUMBER {
        return Err(StagingError::InvalidChunk(format!(
            "chunk number must be between 1 and {}",
            MAX_CHUNK_NUMBER
        )));
    }
    if let Some(total) = total_chunks {
        if total == 0 || chunk > total {
            return Err(StagingError::InvalidChunk(format!(
                "chunk {} is outside 1..={}",
                chunk, total
            )));
        }
    }
    Ok(())
}

/// Staging area of one storage
#[derive(Clone)]
pub struct ChunkStore {
    backend: Arc<dyn Backend>,
    root: String,
}

impl ChunkStore {
    pub fn new(backend: Arc<dyn Backend>, root: impl Into<String>) -> Self {
        Self {
            backend,
            root: root.into(),
        }
    }

    pub fn backend(&self) -> &Arc<dyn Backend> {
        &self.backend
    }

    pub fn root(&self) -> &str {
        &self.root
    }

    pub fn upload_dir(&self, filename: &str) -> String {
        join_path(&self.root, &[UPLOAD_DIR[0], UPLOAD_DIR[1], filename])
    }

    pub fn chunk_path(&self, filename: &str, chunk: u32) -> String {
        join_path(&self.upload_dir(filename), &[&chunk_file_name(filename, chunk)])
    }

    pub fn lock_path(&self, filename: &str) -> String {
        join_path(
            &self.root,
            &[UPLOAD_DIR[0], UPLOAD_DIR[1], &format!("{}.assembling", filename)],
        )
    }

    #[instrument(skip(self))]
    pub async fn probe(&self, filename: &str, chunk: u32) -> StagingResult<ChunkState> {
        validate_filename(filename)?;
        validate_chunk(chunk, None)?;

        let present = self.backend.exists(&self.chunk_path(filename, chunk)).await?;
        Ok(if present {
            ChunkState::Present
        } else {
            ChunkState::Absent
        })
    }

    /// Store one chunk, replacing any earlier copy of the same position
    #[instrument(skip(self, body))]
    pub async fn put(&self, filename: &str, chunk: u32, body: ByteReader) -> StagingResult<u64> {
        validate_filename(filename)?;
        validate_chunk(chunk, None)?;

        self.backend.mkdirs(&self.upload_dir(filename)).await?;
        let written = self.backend.write(&self.chunk_path(filename, chunk), body).await?;
        debug!(filename, chunk, written, "Chunk stored");
        Ok(written)
    }

    /// Part file names currently staged for `filename`, in chunk order.
    /// `None` when the staging directory does not exist.
    pub async fn staged_parts(&self, filename: &str) -> StagingResult<Option<Vec<String>>> {
        let prefix = format!("{}.part", filename);
        let names = match self.backend.list_files(&self.upload_dir(filename)).await {
            Ok(names) => names,
            Err(BackendError::NotFound(_)) => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let mut parts: Vec<String> = names
            .into_iter()
            .filter(|name| {
                name.strip_prefix(&prefix)
                    .is_some_and(|digits| digits.len() == CHUNK_DIGITS && digits.bytes().all(|b| b.is_ascii_digit()))
            })
            .collect();
        parts.sort_unstable();
        Ok(Some(parts))
    }

    pub async fn received(&self, filename: &str) -> StagingResult<usize> {
        Ok(self.staged_parts(filename).await?.map_or(0, |parts| parts.len()))
    }

    pub async fn is_complete(&self, filename: &str, total_chunks: u32) -> StagingResult<bool> {
        Ok(self.received(filename).await? == total_chunks as usize)
    }

    /// Remove the staging directory of `filename`
    #[instrument(skip(self))]
    pub async fn discard(&self, filename: &str) -> StagingResult<()> {
        validate_filename(filename)?;
        self.backend.delete(&self.upload_dir(filename)).await?;
        Ok(())
    }
}

impl std::fmt::Debug for ChunkStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChunkStore")
            .field("backend", &self.backend.kind())
            .field("root", &self.root)
            .finish()
    }
}

//! Finalization of completed uploads
//!
//! Assembly runs in two phases so the catalog record can be written while
//! the finalize lock is held:
//!
//! 1. [`Assembler::assemble`] takes the lock, verifies completeness and merges
//!    the parts into `<root>/limonero/data/<instance>/<hex>_<filename>`.
//! 2. [`Assembler::commit`] drops the staging directory and the lock, or
//!    [`Assembler::abort`] removes the merged artifact and the lock.
//!
//! The parts survive the merge and are only removed by `commit`. A merge
//! failure or an abort releases the lock and leaves staging untouched so
//! the client can resume.

use super::{validate_filename, ChunkStore, StagingError, StagingResult};
use crate::backend::join_path;
use tracing::{info, instrument, warn};
use uuid::Uuid;

const DATA_DIR: [&str; 2] = ["limonero", "data"];

/// A merged upload whose lock is still held
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Assembly {
    pub filename: String,
    /// `<hex>_<filename>`
    pub final_name: String,
    /// Absolute backend path of the merged artifact
    pub final_path: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AssemblyOutcome {
    Assembled(Assembly),
    /// Another finalizer holds the lock
    Contended,
    /// The staging directory is gone, most likely consumed by another finalizer
    StagingGone,
}

#[derive(Debug, Clone)]
pub struct Assembler {
    store: ChunkStore,
}

/// `<random 128-bit hex>_<filename>`
pub fn final_name(filename: &str) -> String {
    format!("{}_{}", Uuid::new_v4().simple(), filename)
}

impl Assembler {
    pub fn new(store: ChunkStore) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &ChunkStore {
        &self.store
    }

    /// Directory receiving finalized uploads of `instance`
    pub fn data_dir(&self, instance: &str) -> String {
        join_path(self.store.root(), &[DATA_DIR[0], DATA_DIR[1], instance])
    }

    #[instrument(skip(self))]
    pub async fn assemble(
        &self,
        filename: &str,
        instance: &str,
        total_chunks: u32,
    ) -> StagingResult<AssemblyOutcome> {
        validate_filename(filename)?;
        let backend = self.store.backend();

        if self.store.staged_parts(filename).await?.is_none() {
            return Ok(AssemblyOutcome::StagingGone);
        }

        let lock = self.store.lock_path(filename);
        if !backend.create_exclusive(&lock).await? {
            info!(filename, "Finalize already in progress");
            return Ok(AssemblyOutcome::Contended);
        }

        match self.merge(filename, instance, total_chunks).await {
            Ok(AssemblyOutcome::Assembled(assembly)) => Ok(AssemblyOutcome::Assembled(assembly)),
            other => {
                self.release(filename).await;
                other
            }
        }
    }

    async fn merge(&self, filename: &str, instance: &str, total_chunks: u32) -> StagingResult<AssemblyOutcome> {
        let backend = self.store.backend();

        let parts = match self.store.staged_parts(filename).await? {
            Some(parts) => parts,
            None => return Ok(AssemblyOutcome::StagingGone),
        };
        if parts.len() != total_chunks as usize {
            return Err(StagingError::IncompleteUpload {
                filename: filename.to_string(),
                received: parts.len(),
                expected: total_chunks,
            });
        }

        let data_dir = self.data_dir(instance);
        let final_name = final_name(filename);
        let final_path = join_path(&data_dir, &[&final_name]);
        if backend.exists(&final_path).await? {
            return Err(StagingError::AlreadyExists(final_path));
        }

        let upload_dir = self.store.upload_dir(filename);
        let part_paths: Vec<String> = parts.iter().map(|p| join_path(&upload_dir, &[p])).collect();

        backend.mkdirs(&data_dir).await?;
        backend.concat_merge(&part_paths, &final_path).await?;

        info!(filename, final_path = %final_path, parts = part_paths.len(), "Upload assembled");
        Ok(AssemblyOutcome::Assembled(Assembly {
            filename: filename.to_string(),
            final_name,
            final_path,
        }))
    }

    /// Drop the staging directory and the lock of a recorded assembly
    #[instrument(skip(self, assembly), fields(filename = %assembly.filename))]
    pub async fn commit(&self, assembly: &Assembly) -> StagingResult<()> {
        let discarded = self.store.discard(&assembly.filename).await;
        self.release(&assembly.filename).await;
        discarded
    }

    /// Undo an assembly that could not be recorded
    #[instrument(skip(self, assembly), fields(filename = %assembly.filename))]
    pub async fn abort(&self, assembly: &Assembly) {
        if let Err(e) = self.store.backend().delete(&assembly.final_path).await {
            warn!(path = %assembly.final_path, error = %e, "Failed to remove unrecorded artifact");
        }
        self.release(&assembly.filename).await;
    }

    async fn release(&self, filename: &str) {
        let lock = self.store.lock_path(filename);
        if let Err(e) = self.store.backend().delete(&lock).await {
            warn!(path = %lock, error = %e, "Failed to release finalize lock");
        }
    }
}

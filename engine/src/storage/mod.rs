//! Persistence backends for records, blobs, the change log and engine state.
//!
//! A backend stores typed items and makes each write durable before
//! returning. Two implementations are provided:
//!
//! - [`FileBackend`] - one directory per recipe book, survives restarts
//! - [`MemoryBackend`] - in-process, for tests and ephemeral books

mod file;
mod memory;

pub use file::FileBackend;
pub use memory::MemoryBackend;

use crate::change_log::{ChangeEntry, StoredChanges};
use crate::reconcile::ConflictRecord;
use crate::state::EngineState;
use crate::{error::Result, MediaBlob, RecipeRecord, Sequence};

/// Durable storage used by the content store and the change log.
///
/// Every method either completes durably or returns an error without a
/// partial effect visible to later loads.
pub trait Backend: Send + Sync {
    fn load_records(&self) -> Result<Vec<RecipeRecord>>;

    /// Write one record, replacing any previous version atomically.
    fn write_record(&self, record: &RecipeRecord) -> Result<()>;

    fn remove_record(&self, id: &str) -> Result<()>;

    fn load_blobs(&self) -> Result<Vec<MediaBlob>>;

    /// Store blob bytes together with their metadata.
    fn write_blob(&self, blob: &MediaBlob, bytes: &[u8]) -> Result<()>;

    /// Update metadata of an existing blob.
    fn write_blob_meta(&self, blob: &MediaBlob) -> Result<()>;

    fn read_blob(&self, blob_ref: &str) -> Result<Vec<u8>>;

    fn remove_blob(&self, blob_ref: &str) -> Result<()>;

    fn load_changes(&self) -> Result<StoredChanges>;

    /// Append one entry to the end of the log.
    fn append_change(&self, entry: &ChangeEntry) -> Result<()>;

    /// Replace the whole log, keeping `high_water` as the highest sequence
    /// ever assigned.
    fn rewrite_changes(&self, high_water: Sequence, entries: &[ChangeEntry]) -> Result<()>;

    fn load_conflicts(&self) -> Result<Vec<ConflictRecord>>;

    fn save_conflicts(&self, conflicts: &[ConflictRecord]) -> Result<()>;

    fn load_state(&self) -> Result<Option<EngineState>>;

    fn save_state(&self, state: &EngineState) -> Result<()>;
}

//! In-memory backend.

use super::Backend;
use crate::change_log::{ChangeEntry, StoredChanges};
use crate::reconcile::ConflictRecord;
use crate::state::EngineState;
use crate::{error::Result, Error, MediaBlob, RecipeId, RecipeRecord, Sequence};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};

#[derive(Default)]
struct Contents {
    records: BTreeMap<RecipeId, RecipeRecord>,
    blobs: BTreeMap<String, (MediaBlob, Vec<u8>)>,
    changes: StoredChanges,
    conflicts: Vec<ConflictRecord>,
    state: Option<EngineState>,
}

/// A backend that keeps everything in process memory.
///
/// Writes can be made to fail on demand, which lets tests check that storage
/// errors leave no partial mutation behind.
#[derive(Default)]
pub struct MemoryBackend {
    contents: Mutex<Contents>,
    fail_writes: AtomicBool,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent write fail (or succeed again).
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    fn check_writable(&self) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(Error::Storage("simulated write failure".into()));
        }
        Ok(())
    }
}

impl std::fmt::Debug for MemoryBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let contents = self.contents.lock();
        f.debug_struct("MemoryBackend")
            .field("records", &contents.records.len())
            .field("blobs", &contents.blobs.len())
            .field("changes", &contents.changes.entries.len())
            .finish()
    }
}

impl Backend for MemoryBackend {
    fn load_records(&self) -> Result<Vec<RecipeRecord>> {
        Ok(self.contents.lock().records.values().cloned().collect())
    }

    fn write_record(&self, record: &RecipeRecord) -> Result<()> {
        self.check_writable()?;
        self.contents
            .lock()
            .records
            .insert(record.id.clone(), record.clone());
        Ok(())
    }

    fn remove_record(&self, id: &str) -> Result<()> {
        self.check_writable()?;
        self.contents.lock().records.remove(id);
        Ok(())
    }

    fn load_blobs(&self) -> Result<Vec<MediaBlob>> {
        Ok(self
            .contents
            .lock()
            .blobs
            .values()
            .map(|(meta, _)| meta.clone())
            .collect())
    }

    fn write_blob(&self, blob: &MediaBlob, bytes: &[u8]) -> Result<()> {
        self.check_writable()?;
        self.contents
            .lock()
            .blobs
            .insert(blob.blob_ref.clone(), (blob.clone(), bytes.to_vec()));
        Ok(())
    }

    fn write_blob_meta(&self, blob: &MediaBlob) -> Result<()> {
        self.check_writable()?;
        let mut contents = self.contents.lock();
        let entry = contents
            .blobs
            .get_mut(&blob.blob_ref)
            .ok_or_else(|| Error::BlobNotFound(blob.blob_ref.clone()))?;
        entry.0 = blob.clone();
        Ok(())
    }

    fn read_blob(&self, blob_ref: &str) -> Result<Vec<u8>> {
        self.contents
            .lock()
            .blobs
            .get(blob_ref)
            .map(|(_, bytes)| bytes.clone())
            .ok_or_else(|| Error::BlobNotFound(blob_ref.to_string()))
    }

    fn remove_blob(&self, blob_ref: &str) -> Result<()> {
        self.check_writable()?;
        self.contents.lock().blobs.remove(blob_ref);
        Ok(())
    }

    fn load_changes(&self) -> Result<StoredChanges> {
        Ok(self.contents.lock().changes.clone())
    }

    fn append_change(&self, entry: &ChangeEntry) -> Result<()> {
        self.check_writable()?;
        let mut contents = self.contents.lock();
        contents.changes.high_water = contents.changes.high_water.max(entry.seq);
        contents.changes.entries.push(entry.clone());
        Ok(())
    }

    fn rewrite_changes(&self, high_water: Sequence, entries: &[ChangeEntry]) -> Result<()> {
        self.check_writable()?;
        self.contents.lock().changes = StoredChanges {
            high_water,
            entries: entries.to_vec(),
        };
        Ok(())
    }

    fn load_conflicts(&self) -> Result<Vec<ConflictRecord>> {
        Ok(self.contents.lock().conflicts.clone())
    }

    fn save_conflicts(&self, conflicts: &[ConflictRecord]) -> Result<()> {
        self.check_writable()?;
        self.contents.lock().conflicts = conflicts.to_vec();
        Ok(())
    }

    fn load_state(&self) -> Result<Option<EngineState>> {
        Ok(self.contents.lock().state.clone())
    }

    fn save_state(&self, state: &EngineState) -> Result<()> {
        self.check_writable()?;
        self.contents.lock().state = Some(state.clone());
        Ok(())
    }
}

//! Content store - durable keyed storage for recipe records and media blobs.
//!
//! Records are held as `Arc<RecipeRecord>` and replaced whole, so a reader
//! always sees either the previous or the new version of a record. Blobs are
//! reference counted by the active records pointing at them; bytes are
//! released when the count drops to zero.
//!
//! Lock order is always records, then blobs.

use crate::media::content_ref;
use crate::storage::Backend;
use crate::{error::Result, BlobRef, Error, MediaBlob, RecipeId, RecipeRecord, Timestamp, UploadState};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Debug, Clone)]
struct BlobEntry {
    meta: MediaBlob,
    /// Number of active records whose photo_ref points here
    refs: usize,
}

/// Point-in-time listing of the store.
///
/// Iteration is lazy over the snapshot and can be restarted any number of
/// times; later writes to the store do not affect it.
#[derive(Debug, Clone)]
pub struct Listing {
    records: Vec<Arc<RecipeRecord>>,
}

impl Listing {
    /// Active records, oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &RecipeRecord> + '_ {
        self.records
            .iter()
            .map(|r| r.as_ref())
            .filter(|r| r.is_active())
    }

    /// Number of active records in the listing.
    pub fn len(&self) -> usize {
        self.iter().count()
    }

    pub fn is_empty(&self) -> bool {
        self.iter().next().is_none()
    }

    #[cfg(test)]
    pub(crate) fn from_records(records: impl IntoIterator<Item = RecipeRecord>) -> Self {
        Listing {
            records: records.into_iter().map(Arc::new).collect(),
        }
    }
}

impl<'a> IntoIterator for &'a Listing {
    type Item = &'a RecipeRecord;
    type IntoIter = Box<dyn Iterator<Item = &'a RecipeRecord> + 'a>;

    fn into_iter(self) -> Self::IntoIter {
        Box::new(self.iter())
    }
}

/// The store holding all recipe records and media blobs.
pub struct ContentStore {
    backend: Arc<dyn Backend>,
    records: RwLock<HashMap<RecipeId, Arc<RecipeRecord>>>,
    blobs: RwLock<HashMap<BlobRef, BlobEntry>>,
}

impl ContentStore {
    /// Load records and blobs from a backend.
    ///
    /// Blobs no active record references are released.
    pub fn open(backend: Arc<dyn Backend>) -> Result<Self> {
        let records: HashMap<RecipeId, Arc<RecipeRecord>> = backend
            .load_records()?
            .into_iter()
            .map(|r| (r.id.clone(), Arc::new(r)))
            .collect();

        let mut blobs: HashMap<BlobRef, BlobEntry> = backend
            .load_blobs()?
            .into_iter()
            .map(|meta| (meta.blob_ref.clone(), BlobEntry { meta, refs: 0 }))
            .collect();

        for record in records.values().filter(|r| r.is_active()) {
            if let Some(blob_ref) = &record.photo_ref {
                match blobs.get_mut(blob_ref) {
                    Some(entry) => entry.refs += 1,
                    None => tracing::warn!(
                        recipe_id = %record.id,
                        blob_ref = %blob_ref,
                        "record references a missing blob"
                    ),
                }
            }
        }

        let unreferenced: Vec<BlobRef> = blobs
            .iter()
            .filter(|(_, e)| e.refs == 0)
            .map(|(r, _)| r.clone())
            .collect();
        for blob_ref in unreferenced {
            backend.remove_blob(&blob_ref)?;
            blobs.remove(&blob_ref);
            tracing::debug!(blob_ref = %blob_ref, "released unreferenced blob");
        }

        tracing::debug!(
            records = records.len(),
            blobs = blobs.len(),
            "content store loaded"
        );

        Ok(Self {
            backend,
            records: RwLock::new(records),
            blobs: RwLock::new(blobs),
        })
    }

    /// Insert or replace a record.
    ///
    /// Active records are validated and their photo_ref must resolve to a
    /// stored blob. On error nothing is written.
    pub fn put(&self, record: RecipeRecord) -> Result<Arc<RecipeRecord>> {
        let mut records = self.records.write();
        self.put_in(&mut records, record)
    }

    /// Store photo bytes and put `record` pointing at them, as one step.
    pub fn put_with_photo(
        &self,
        mut record: RecipeRecord,
        bytes: &[u8],
        content_type: &str,
        captured_at: Timestamp,
    ) -> Result<(Arc<RecipeRecord>, MediaBlob)> {
        let mut records = self.records.write();
        let blob = self.put_blob(bytes, content_type, captured_at)?;
        record.photo_ref = Some(blob.blob_ref.clone());
        match self.put_in(&mut records, record) {
            Ok(stored) => Ok((stored, blob)),
            Err(e) => {
                let mut blobs = self.blobs.write();
                if let Err(cleanup) = self.remove_unreferenced(&mut blobs, &blob.blob_ref) {
                    tracing::warn!(blob_ref = %blob.blob_ref, error = %cleanup, "orphan blob kept");
                }
                Err(e)
            }
        }
    }

    fn put_in(
        &self,
        records: &mut HashMap<RecipeId, Arc<RecipeRecord>>,
        record: RecipeRecord,
    ) -> Result<Arc<RecipeRecord>> {
        if record.id.trim().is_empty() {
            return Err(Error::validation("id", "must not be empty"));
        }
        if record.is_active() {
            record.validate()?;
        }

        let new_ref = active_photo(&record);
        let old_ref = records.get(&record.id).and_then(|r| active_photo(r));

        let mut blobs = self.blobs.write();
        if let Some(blob_ref) = &new_ref {
            if !blobs.contains_key(blob_ref) {
                return Err(Error::BlobNotFound(blob_ref.clone()));
            }
        }

        self.backend.write_record(&record)?;
        let record = Arc::new(record);
        records.insert(record.id.clone(), record.clone());

        if new_ref != old_ref {
            if let Some(blob_ref) = &new_ref {
                if let Some(entry) = blobs.get_mut(blob_ref) {
                    entry.refs += 1;
                }
            }
            if let Some(blob_ref) = &old_ref {
                self.release_ref(&mut blobs, blob_ref);
            }
        }
        Ok(record)
    }

    /// Active record by id.
    pub fn get(&self, id: &str) -> Result<Arc<RecipeRecord>> {
        self.records
            .read()
            .get(id)
            .filter(|r| r.is_active())
            .cloned()
            .ok_or_else(|| Error::NotFound(id.to_string()))
    }

    /// Record by id, tombstones included.
    pub fn get_including_deleted(&self, id: &str) -> Option<Arc<RecipeRecord>> {
        self.records.read().get(id).cloned()
    }

    /// Turn an active record into a tombstone.
    ///
    /// The tombstone stays until [`purge`](Self::purge); its photo no longer
    /// counts as a reference.
    pub fn delete(&self, id: &str, timestamp: Timestamp) -> Result<Arc<RecipeRecord>> {
        let mut records = self.records.write();
        let mut record = records
            .get(id)
            .filter(|r| r.is_active())
            .map(|r| r.as_ref().clone())
            .ok_or_else(|| Error::NotFound(id.to_string()))?;
        record.mark_deleted(timestamp);
        self.put_in(&mut records, record)
    }

    /// Remove a record entirely. Returns whether it existed.
    pub fn purge(&self, id: &str) -> Result<bool> {
        let mut records = self.records.write();
        let Some(existing) = records.get(id).cloned() else {
            return Ok(false);
        };
        self.backend.remove_record(id)?;
        records.remove(id);
        if let Some(blob_ref) = active_photo(&existing) {
            self.release_ref(&mut self.blobs.write(), &blob_ref);
        }
        tracing::debug!(recipe_id = id, "record purged");
        Ok(true)
    }

    /// Snapshot of the active records, ordered by creation.
    pub fn list_all(&self) -> Listing {
        let mut records: Vec<Arc<RecipeRecord>> = self.records.read().values().cloned().collect();
        records.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Listing { records }
    }

    /// Every record including tombstones, in no particular order.
    pub fn all_records(&self) -> Vec<Arc<RecipeRecord>> {
        self.records.read().values().cloned().collect()
    }

    /// Number of active records.
    pub fn len(&self) -> usize {
        self.records.read().values().filter(|r| r.is_active()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Store blob bytes. Storing bytes already present returns the existing
    /// blob unchanged.
    pub fn put_blob(
        &self,
        bytes: &[u8],
        content_type: &str,
        captured_at: Timestamp,
    ) -> Result<MediaBlob> {
        if bytes.is_empty() {
            return Err(Error::validation("photo", "must not be empty"));
        }
        let blob_ref = content_ref(bytes);
        let mut blobs = self.blobs.write();
        if let Some(entry) = blobs.get(&blob_ref) {
            return Ok(entry.meta.clone());
        }
        let meta = MediaBlob::new(bytes, content_type, captured_at);
        self.backend.write_blob(&meta, bytes)?;
        blobs.insert(
            blob_ref,
            BlobEntry {
                meta: meta.clone(),
                refs: 0,
            },
        );
        Ok(meta)
    }

    pub fn blob(&self, blob_ref: &str) -> Result<MediaBlob> {
        self.blobs
            .read()
            .get(blob_ref)
            .map(|e| e.meta.clone())
            .ok_or_else(|| Error::BlobNotFound(blob_ref.to_string()))
    }

    pub fn blob_bytes(&self, blob_ref: &str) -> Result<Vec<u8>> {
        if !self.blobs.read().contains_key(blob_ref) {
            return Err(Error::BlobNotFound(blob_ref.to_string()));
        }
        self.backend.read_blob(blob_ref)
    }

    /// Uploaded URL of a blob, if it is stored and uploaded.
    pub fn uploaded_url(&self, blob_ref: &str) -> Option<String> {
        self.blobs
            .read()
            .get(blob_ref)
            .and_then(|e| e.meta.uploaded_url().map(str::to_string))
    }

    /// Record a finished upload. Returns `false` if the blob has been
    /// released in the meantime.
    pub fn mark_blob_uploaded(&self, blob_ref: &str, url: &str) -> Result<bool> {
        let mut blobs = self.blobs.write();
        let Some(entry) = blobs.get_mut(blob_ref) else {
            return Ok(false);
        };
        let mut meta = entry.meta.clone();
        meta.upload_state = UploadState::Uploaded {
            url: url.to_string(),
        };
        self.backend.write_blob_meta(&meta)?;
        entry.meta = meta;
        Ok(true)
    }

    /// Referenced blobs whose bytes have not been uploaded, oldest capture
    /// first.
    pub fn pending_blobs(&self) -> Vec<MediaBlob> {
        let mut pending: Vec<MediaBlob> = self
            .blobs
            .read()
            .values()
            .filter(|e| e.refs > 0 && !e.meta.is_uploaded())
            .map(|e| e.meta.clone())
            .collect();
        pending.sort_by(|a, b| {
            a.captured_at
                .cmp(&b.captured_at)
                .then_with(|| a.blob_ref.cmp(&b.blob_ref))
        });
        pending
    }

    pub fn ref_count(&self, blob_ref: &str) -> usize {
        self.blobs.read().get(blob_ref).map_or(0, |e| e.refs)
    }

    pub fn blob_count(&self) -> usize {
        self.blobs.read().len()
    }

    /// Release a blob that no record references, e.g. a capture that was
    /// never attached. Returns whether it was released.
    pub fn release_if_unreferenced(&self, blob_ref: &str) -> Result<bool> {
        let _records = self.records.read();
        let mut blobs = self.blobs.write();
        self.remove_unreferenced(&mut blobs, blob_ref)
    }

    fn remove_unreferenced(
        &self,
        blobs: &mut HashMap<BlobRef, BlobEntry>,
        blob_ref: &str,
    ) -> Result<bool> {
        match blobs.get(blob_ref) {
            Some(entry) if entry.refs == 0 => {
                self.backend.remove_blob(blob_ref)?;
                blobs.remove(blob_ref);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    fn release_ref(&self, blobs: &mut HashMap<BlobRef, BlobEntry>, blob_ref: &str) {
        let Some(entry) = blobs.get_mut(blob_ref) else {
            return;
        };
        entry.refs = entry.refs.saturating_sub(1);
        if entry.refs > 0 {
            return;
        }
        // A failed removal leaves an orphan that the next open releases.
        match self.backend.remove_blob(blob_ref) {
            Ok(()) => {
                blobs.remove(blob_ref);
                tracing::debug!(blob_ref, "blob released");
            }
            Err(e) => tracing::warn!(blob_ref, error = %e, "failed to release blob"),
        }
    }
}

impl std::fmt::Debug for ContentStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContentStore")
            .field("records", &self.records.read().len())
            .field("blobs", &self.blobs.read().len())
            .finish()
    }
}

fn active_photo(record: &RecipeRecord) -> Option<BlobRef> {
    if record.is_active() {
        record.photo_ref.clone()
    } else {
        None
    }
}

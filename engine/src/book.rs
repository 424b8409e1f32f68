//! RecipeBook - the facade the UI and the sync engine work through.
//!
//! Every mutation of a recipe runs under that recipe's lock and follows the
//! same steps: validate, append to the change log, write the content store,
//! update the query cache, notify subscribers. If the store write fails the
//! appended entry is discarded again, so the log never describes a change
//! the store does not hold.

use crate::change_log::{now_millis, ChangeEntry, ChangeLog, OpKind};
use crate::content_store::{ContentStore, Listing};
use crate::locks::{KeyedLocks, RecipeGuard};
use crate::query_cache::{QueryCache, RecipeQuery, RecipeSummary};
use crate::reconcile::{adopt_remote, ConflictReason, ConflictRecord, Resolution};
use crate::state::{EngineState, StateSummary};
use crate::storage::{Backend, FileBackend, MemoryBackend};
use crate::{
    error::Result, Error, Location, MediaBlob, RecipeDraft, RecipeId, RecipeRecord, Sequence,
    SyncState, Timestamp,
};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::broadcast;

const NOTIFICATION_CAPACITY: usize = 256;

/// What happened to a recipe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ChangeKind {
    Created,
    Updated,
    Deleted,
    /// Only sync bookkeeping changed (state, remote id, photo link)
    SyncStateChanged,
    /// Record removed entirely after the remote confirmed deletion
    Purged,
}

/// Who caused a change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Origin {
    /// A UI-originated edit or conflict resolution
    Local,
    /// The sync engine applying remote state
    Remote,
}

/// Sent to subscribers after every committed change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeNotification {
    pub recipe_id: RecipeId,
    pub kind: ChangeKind,
    pub origin: Origin,
}

/// The local recipe catalog.
pub struct RecipeBook {
    backend: Arc<dyn Backend>,
    store: ContentStore,
    log: ChangeLog,
    cache: RwLock<QueryCache>,
    locks: KeyedLocks,
    conflicts: RwLock<BTreeMap<RecipeId, ConflictRecord>>,
    state: Mutex<EngineState>,
    events: broadcast::Sender<ChangeNotification>,
}

impl RecipeBook {
    /// Open a book from a backend.
    ///
    /// `device_id` names this device the first time the book is opened; a
    /// persisted identity takes precedence afterwards.
    pub fn open(backend: Arc<dyn Backend>, device_id: &str) -> Result<Self> {
        let mut state = match backend.load_state()? {
            Some(state) => state,
            None => EngineState::new(device_id),
        };
        let store = ContentStore::open(backend.clone())?;
        let log = ChangeLog::open(backend.clone())?;

        for record in store.all_records() {
            state.clock.observe(record.updated_at.max(record.created_at));
        }

        let conflicts: BTreeMap<RecipeId, ConflictRecord> = backend
            .load_conflicts()?
            .into_iter()
            .map(|c| (c.recipe_id.clone(), c))
            .collect();

        let (events, _) = broadcast::channel(NOTIFICATION_CAPACITY);
        let book = Self {
            backend,
            store,
            log,
            cache: RwLock::new(QueryCache::new()),
            locks: KeyedLocks::new(),
            conflicts: RwLock::new(conflicts),
            state: Mutex::new(state),
            events,
        };
        book.recover()?;
        book.cache.write().rebuild(&book.store.list_all());
        book.persist_state()?;

        tracing::info!(
            device_id = %book.device_id(),
            records = book.store.len(),
            pending = book.log.len(),
            conflicts = book.conflicts.read().len(),
            "recipe book opened"
        );
        Ok(book)
    }

    /// Open (or create) a book stored in a directory.
    pub fn open_dir(dir: impl AsRef<Path>, device_id: &str) -> Result<Self> {
        let backend = FileBackend::open(dir.as_ref())?;
        Self::open(Arc::new(backend), device_id)
    }

    /// A book that lives only in memory.
    pub fn in_memory(device_id: &str) -> Result<Self> {
        Self::open(Arc::new(MemoryBackend::new()), device_id)
    }

    /// Bring records, log and conflicts back in line after a crash between
    /// the steps of a mutation.
    fn recover(&self) -> Result<()> {
        let mut conflicts_changed = false;
        for record in self.store.all_records() {
            let id = record.id.clone();
            let pending = self.log.pending_for(&id);

            if record.sync_state == SyncState::Conflict {
                let mut conflicts = self.conflicts.write();
                if !conflicts.contains_key(&id) {
                    tracing::warn!(recipe_id = %id, "conflict details lost, recording placeholder");
                    conflicts.insert(
                        id.clone(),
                        ConflictRecord {
                            recipe_id: id.clone(),
                            local: record.as_ref().clone(),
                            remote: None,
                            reason: ConflictReason::Rejected {
                                status: 0,
                                message: "conflict details were lost".into(),
                            },
                            rejected_seq: pending.last().map(|e| e.seq),
                            detected_at: now_millis(),
                        },
                    );
                    conflicts_changed = true;
                }
                continue;
            }

            if record.deleted && pending.is_empty() {
                // Deletion was acknowledged but the purge did not happen.
                self.store.purge(&id)?;
                continue;
            }

            if !pending.is_empty() && record.sync_state != SyncState::Pending {
                let mut fixed = record.as_ref().clone();
                fixed.sync_state = SyncState::Pending;
                self.store.put(fixed)?;
                continue;
            }

            if pending.is_empty()
                && matches!(record.sync_state, SyncState::Local | SyncState::Pending)
            {
                let op = if record.remote_id.is_some() {
                    OpKind::Update
                } else {
                    OpKind::Create
                };
                let entry = self.log.append(&id, op, Some(record.content()))?;
                let mut fixed = record.as_ref().clone();
                fixed.sync_state = SyncState::Pending;
                self.store.put(fixed)?;
                tracing::info!(recipe_id = %id, seq = entry.seq, "re-enqueued unsent recipe");
            }
        }

        {
            let mut conflicts = self.conflicts.write();
            let before = conflicts.len();
            conflicts.retain(|id, _| {
                self.store
                    .get_including_deleted(id)
                    .is_some_and(|r| r.sync_state == SyncState::Conflict)
            });
            conflicts_changed |= conflicts.len() != before;
        }
        if conflicts_changed {
            self.persist_conflicts()?;
        }
        Ok(())
    }

    // =========================================================================
    // UI mutations
    // =========================================================================

    /// Save a new recipe.
    ///
    /// The record is written as Local first and becomes Pending once its
    /// Create entry is queued.
    pub fn create_recipe(&self, draft: RecipeDraft) -> Result<Arc<RecipeRecord>> {
        draft.validate()?;
        let id = uuid::Uuid::new_v4().to_string();
        let _guard = self.locks.lock(&id);

        let record = RecipeRecord::new(id.clone(), draft, self.tick());
        let local = self.store.put(record)?;
        self.cache.write().upsert(&local);

        let entry = match self.log.append(&id, OpKind::Create, Some(local.content())) {
            Ok(entry) => entry,
            Err(e) => {
                self.store.purge(&id)?;
                self.cache.write().remove(&id);
                return Err(e);
            }
        };

        let mut queued = local.as_ref().clone();
        queued.sync_state = SyncState::Pending;
        // On failure the record stays Local with its entry queued; reopening
        // the book moves it to Pending.
        let stored = self.store.put(queued)?;

        self.cache.write().upsert(&stored);
        self.notify(&id, ChangeKind::Created, Origin::Local);
        tracing::debug!(recipe_id = %id, seq = entry.seq, "recipe created");
        Ok(stored)
    }

    /// Replace the text fields of a recipe.
    pub fn update_recipe(&self, id: &str, draft: RecipeDraft) -> Result<Arc<RecipeRecord>> {
        draft.validate()?;
        self.edit(id, OpKind::Update, ChangeKind::Updated, |record, ts| {
            record.apply_draft(draft, ts);
            Ok(())
        })
    }

    /// Set or clear the location of a recipe.
    pub fn tag_location(&self, id: &str, location: Option<Location>) -> Result<Arc<RecipeRecord>> {
        if let Some(location) = &location {
            location.validate()?;
        }
        self.edit(id, OpKind::Update, ChangeKind::Updated, |record, ts| {
            record.location = location;
            record.touch(ts);
            Ok(())
        })
    }

    /// Remove the photo of a recipe.
    pub fn detach_photo(&self, id: &str) -> Result<Arc<RecipeRecord>> {
        self.edit(id, OpKind::Update, ChangeKind::Updated, |record, ts| {
            if record.photo_ref.is_none() && record.photo_url.is_none() {
                return Err(Error::InvalidState(format!("recipe {} has no photo", record.id)));
            }
            record.photo_ref = None;
            record.photo_url = None;
            record.touch(ts);
            Ok(())
        })
    }

    /// Delete a recipe. It disappears from listings immediately and is purged
    /// once the remote confirms.
    pub fn delete_recipe(&self, id: &str) -> Result<()> {
        let _guard = self.locks.lock(id);
        let current = self.editable(id)?;

        let mut record = current.as_ref().clone();
        record.mark_deleted(self.tick());
        record.sync_state = SyncState::Pending;

        let entry = self.log.append(id, OpKind::Delete, None)?;
        let stored = self.put_or_discard(record, &entry)?;

        self.cache.write().upsert(&stored);
        self.notify(id, ChangeKind::Deleted, Origin::Local);
        tracing::debug!(recipe_id = id, seq = entry.seq, "recipe deleted");
        Ok(())
    }

    /// Attach captured image bytes as the recipe's photo.
    pub fn attach_photo(
        &self,
        id: &str,
        bytes: &[u8],
        content_type: &str,
        captured_at: Timestamp,
    ) -> Result<Arc<RecipeRecord>> {
        if bytes.is_empty() {
            return Err(Error::validation("photo", "must not be empty"));
        }
        let _guard = self.locks.lock(id);
        let current = self.editable(id)?;

        let mut record = current.as_ref().clone();
        record.photo_ref = Some(crate::media::content_ref(bytes));
        record.photo_url = None;
        record.touch(self.tick());
        record.sync_state = SyncState::Pending;
        record.validate()?;

        let entry = self.log.append(id, OpKind::AttachPhoto, Some(record.content()))?;
        let stored = match self
            .store
            .put_with_photo(record, bytes, content_type, captured_at)
        {
            Ok((stored, _)) => stored,
            Err(e) => {
                self.discard(&entry);
                return Err(e);
            }
        };

        self.cache.write().upsert(&stored);
        self.notify(id, ChangeKind::Updated, Origin::Local);
        Ok(stored)
    }

    /// Close a conflict with an explicit decision.
    ///
    /// Returns the resulting record, or `None` when the decision removed the
    /// recipe (both sides deleted it, or the remote deletion was accepted).
    pub fn resolve_conflict(
        &self,
        id: &str,
        resolution: Resolution,
    ) -> Result<Option<Arc<RecipeRecord>>> {
        let _guard = self.locks.lock(id);
        let conflict = self
            .conflicts
            .read()
            .get(id)
            .cloned()
            .ok_or_else(|| Error::InvalidState(format!("recipe {} has no open conflict", id)))?;
        let current = self
            .store
            .get_including_deleted(id)
            .ok_or_else(|| Error::NotFound(id.to_string()))?;

        let remote_gone = match (&conflict.remote, &conflict.reason) {
            (Some(remote), _) => remote.deleted,
            (None, ConflictReason::Rejected { status, .. }) => *status == 404,
            (None, ConflictReason::Diverged) => false,
        };

        let mut record = current.as_ref().clone();
        let outcome = match resolution {
            Resolution::UseRemote => match &conflict.remote {
                Some(remote) if !remote.deleted => {
                    adopt_remote(&mut record, remote);
                    record.touch(self.tick());
                    record.sync_state = SyncState::Synced;
                    let stored = self.store.put(record)?;
                    self.log.acknowledge(id, Sequence::MAX)?;
                    Some(stored)
                }
                _ if remote_gone => {
                    self.store.purge(id)?;
                    self.log.acknowledge(id, Sequence::MAX)?;
                    None
                }
                _ => {
                    return Err(Error::InvalidState(format!(
                        "no remote copy of {} to use",
                        id
                    )))
                }
            },
            Resolution::KeepLocal => {
                if record.deleted && remote_gone {
                    self.store.purge(id)?;
                    self.log.acknowledge(id, Sequence::MAX)?;
                    None
                } else {
                    record.touch(self.tick());
                    Some(self.requeue(record, &conflict, remote_gone, false)?)
                }
            }
            Resolution::Replace(draft) => {
                draft.validate()?;
                record.deleted = false;
                record.apply_draft(draft, self.tick());
                Some(self.requeue(record, &conflict, remote_gone, true)?)
            }
        };

        self.conflicts.write().remove(id);
        self.persist_conflicts()?;

        match &outcome {
            Some(stored) => {
                self.cache.write().upsert(stored);
                self.notify(id, ChangeKind::Updated, Origin::Local);
            }
            None => {
                self.cache.write().remove(id);
                self.notify(id, ChangeKind::Purged, Origin::Local);
            }
        }
        tracing::info!(recipe_id = id, "conflict resolved");
        Ok(outcome)
    }

    /// Queue the local side of a conflict for delivery again.
    ///
    /// `replace` means the local content is new and supersedes whatever was
    /// queued; otherwise the queued entries stay and are retried.
    fn requeue(
        &self,
        mut record: RecipeRecord,
        conflict: &ConflictRecord,
        remote_gone: bool,
        replace: bool,
    ) -> Result<Arc<RecipeRecord>> {
        record.sync_state = SyncState::Pending;
        let id = record.id.clone();

        if remote_gone {
            // The remote copy no longer exists; start over with a create.
            record.remote_id = None;
            record.remote_version = None;
            record.photo_url = None;
            let stored = self.store.put(record)?;
            self.log.acknowledge(&id, Sequence::MAX)?;
            if !stored.deleted {
                self.log.append(&id, OpKind::Create, Some(stored.content()))?;
            }
            return Ok(stored);
        }

        if let Some(remote) = &conflict.remote {
            // This remote version has been seen; the next write replaces it.
            record.remote_version = Some(remote.updated_at);
        }
        let stored = self.store.put(record)?;

        if replace {
            if let Some(seq) = conflict.rejected_seq {
                self.log.acknowledge(&id, seq)?;
            }
            let op = if stored.remote_id.is_some() {
                OpKind::Update
            } else {
                OpKind::Create
            };
            self.log.append(&id, op, Some(stored.content()))?;
        } else if !self.log.has_pending(&id) {
            let (op, payload) = if stored.deleted {
                (OpKind::Delete, None)
            } else if stored.remote_id.is_some() {
                (OpKind::Update, Some(stored.content()))
            } else {
                (OpKind::Create, Some(stored.content()))
            };
            self.log.append(&id, op, payload)?;
        }
        Ok(stored)
    }

    fn edit<F>(&self, id: &str, op: OpKind, kind: ChangeKind, change: F) -> Result<Arc<RecipeRecord>>
    where
        F: FnOnce(&mut RecipeRecord, Timestamp) -> Result<()>,
    {
        let _guard = self.locks.lock(id);
        let current = self.editable(id)?;

        let mut record = current.as_ref().clone();
        change(&mut record, self.tick())?;
        record.sync_state = SyncState::Pending;
        record.validate()?;

        let entry = self.log.append(id, op, Some(record.content()))?;
        let stored = self.put_or_discard(record, &entry)?;

        self.cache.write().upsert(&stored);
        self.notify(id, kind, Origin::Local);
        Ok(stored)
    }

    /// Current record, if it may be edited.
    fn editable(&self, id: &str) -> Result<Arc<RecipeRecord>> {
        let current = self.store.get(id)?;
        if current.sync_state == SyncState::Conflict {
            return Err(Error::ConflictPending(id.to_string()));
        }
        Ok(current)
    }

    fn put_or_discard(&self, record: RecipeRecord, entry: &ChangeEntry) -> Result<Arc<RecipeRecord>> {
        match self.store.put(record) {
            Ok(stored) => Ok(stored),
            Err(e) => {
                self.discard(entry);
                Err(e)
            }
        }
    }

    fn discard(&self, entry: &ChangeEntry) {
        if let Err(e) = self.log.discard(entry.seq) {
            tracing::error!(seq = entry.seq, error = %e, "failed to roll back change entry");
        }
    }

    // =========================================================================
    // Reads
    // =========================================================================

    pub fn get(&self, id: &str) -> Result<Arc<RecipeRecord>> {
        self.store.get(id)
    }

    /// Snapshot of all active recipes.
    pub fn list_all(&self) -> Listing {
        self.store.list_all()
    }

    pub fn query(&self, query: &RecipeQuery) -> Vec<RecipeSummary> {
        self.cache.read().query(query)
    }

    pub fn summary_of(&self, id: &str) -> Option<RecipeSummary> {
        self.cache.read().get(id).cloned()
    }

    pub fn blob(&self, blob_ref: &str) -> Result<MediaBlob> {
        self.store.blob(blob_ref)
    }

    pub fn blob_bytes(&self, blob_ref: &str) -> Result<Vec<u8>> {
        self.store.blob_bytes(blob_ref)
    }

    /// Open conflicts, ordered by recipe id.
    pub fn conflicts(&self) -> Vec<ConflictRecord> {
        self.conflicts.read().values().cloned().collect()
    }

    pub fn conflict(&self, id: &str) -> Option<ConflictRecord> {
        self.conflicts.read().get(id).cloned()
    }

    /// Pending change entries, all recipes or one.
    pub fn pending_changes(&self, id: Option<&str>) -> Vec<ChangeEntry> {
        match id {
            Some(id) => self.log.pending_for(id),
            None => self.log.peek_batch(usize::MAX),
        }
    }

    pub fn device_id(&self) -> String {
        self.state.lock().device_id.clone()
    }

    pub fn summary(&self) -> StateSummary {
        let state = self.state.lock();
        StateSummary {
            format_version: state.format_version,
            device_id: state.device_id.clone(),
            clock_counter: state.clock.counter,
            record_count: self.store.len(),
            pending_changes: self.log.len(),
            conflict_count: self.conflicts.read().len(),
            blob_count: self.store.blob_count(),
            cursor: state.cursor.clone(),
        }
    }

    /// Receive a notification after every committed change.
    pub fn subscribe(&self) -> broadcast::Receiver<ChangeNotification> {
        self.events.subscribe()
    }

    // =========================================================================
    // Selection
    // =========================================================================

    pub fn select(&self, id: &str) -> bool {
        self.cache.write().select(id)
    }

    pub fn deselect(&self, id: &str) -> bool {
        self.cache.write().deselect(id)
    }

    pub fn toggle_selection(&self, id: &str) -> bool {
        self.cache.write().toggle(id)
    }

    pub fn select_all(&self, query: &RecipeQuery) -> usize {
        self.cache.write().select_all(query)
    }

    pub fn clear_selection(&self) {
        self.cache.write().clear_selection();
    }

    pub fn selected(&self) -> Vec<RecipeId> {
        self.cache.read().selected()
    }

    /// Check the query cache against the store and rebuild it on mismatch.
    ///
    /// Returns whether a rebuild happened.
    pub fn verify_cache(&self) -> Result<bool> {
        let listing = self.store.list_all();
        let mut cache = self.cache.write();
        match cache.verify(&listing) {
            Ok(()) => Ok(false),
            Err(Error::Integrity(reason)) => {
                tracing::warn!(%reason, "query cache drifted from store");
                cache.rebuild(&listing);
                Ok(true)
            }
            Err(e) => Err(e),
        }
    }

    // =========================================================================
    // Sync engine access
    // =========================================================================

    pub(crate) fn lock(&self, id: &str) -> RecipeGuard {
        self.locks.lock(id)
    }

    /// Free per-recipe mutexes that are no longer in use.
    pub(crate) fn prune_locks(&self) {
        self.locks.prune();
    }

    pub(crate) fn store(&self) -> &ContentStore {
        &self.store
    }

    pub(crate) fn change_log(&self) -> &ChangeLog {
        &self.log
    }

    /// Write a record changed by the sync engine.
    pub(crate) fn commit(
        &self,
        _guard: &RecipeGuard,
        record: RecipeRecord,
        kind: ChangeKind,
    ) -> Result<Arc<RecipeRecord>> {
        let stored = self.store.put(record)?;
        self.cache.write().upsert(&stored);
        self.notify(&stored.id, kind, Origin::Remote);
        Ok(stored)
    }

    /// Remove a record the remote no longer has.
    pub(crate) fn purge(&self, guard: &RecipeGuard) -> Result<()> {
        let id = guard.id();
        if self.store.purge(id)? {
            self.cache.write().remove(id);
            self.notify(id, ChangeKind::Purged, Origin::Remote);
        }
        Ok(())
    }

    /// Record a conflict and move the record into the Conflict state.
    pub(crate) fn open_conflict(
        &self,
        guard: &RecipeGuard,
        mut record: RecipeRecord,
        conflict: ConflictRecord,
    ) -> Result<Arc<RecipeRecord>> {
        record.sync_state = SyncState::Conflict;
        {
            let mut conflicts = self.conflicts.write();
            conflicts.insert(conflict.recipe_id.clone(), conflict);
            let all: Vec<ConflictRecord> = conflicts.values().cloned().collect();
            self.backend.save_conflicts(&all)?;
        }
        tracing::warn!(recipe_id = guard.id(), "conflict opened");
        self.commit(guard, record, ChangeKind::SyncStateChanged)
    }

    /// Replace the stored remote copy of an open conflict.
    pub(crate) fn refresh_conflict(
        &self,
        guard: &RecipeGuard,
        remote: &crate::remote::RemoteRecipe,
    ) -> Result<()> {
        let mut conflicts = self.conflicts.write();
        if let Some(conflict) = conflicts.get_mut(guard.id()) {
            conflict.remote = Some(remote.clone());
            if conflict.rejected_seq.is_none() {
                conflict.reason = ConflictReason::Diverged;
            }
            let all: Vec<ConflictRecord> = conflicts.values().cloned().collect();
            self.backend.save_conflicts(&all)?;
        }
        Ok(())
    }

    /// Queue an update that links a freshly uploaded photo remotely.
    pub(crate) fn queue_photo_link(
        &self,
        guard: &RecipeGuard,
        record: &RecipeRecord,
    ) -> Result<Arc<RecipeRecord>> {
        let mut queued = record.clone();
        queued.sync_state = SyncState::Pending;
        let entry = self
            .log
            .append(guard.id(), OpKind::AttachPhoto, Some(queued.content()))?;
        let stored = self.put_or_discard(queued, &entry)?;
        self.cache.write().upsert(&stored);
        self.notify(guard.id(), ChangeKind::SyncStateChanged, Origin::Remote);
        Ok(stored)
    }

    /// Find the local record a remote recipe corresponds to: by remote id,
    /// or by client id for a create whose response was lost.
    pub(crate) fn find_for_remote(
        &self,
        remote: &crate::remote::RemoteRecipe,
    ) -> Option<Arc<RecipeRecord>> {
        let records = self.store.all_records();
        if let Some(found) = records
            .iter()
            .find(|r| r.remote_id.as_deref() == Some(remote.remote_id.as_str()))
        {
            return Some(found.clone());
        }
        let client_id = remote.client_id.as_deref()?;
        records
            .into_iter()
            .find(|r| r.id == client_id && r.remote_id.is_none())
    }

    pub(crate) fn cursor(&self) -> Option<String> {
        self.state.lock().cursor.clone()
    }

    pub(crate) fn save_cursor(&self, cursor: Option<String>) -> Result<()> {
        let mut state = self.state.lock();
        let mut next = state.clone();
        next.cursor = cursor;
        self.backend.save_state(&next)?;
        *state = next;
        Ok(())
    }

    /// Next logical timestamp.
    pub(crate) fn tick(&self) -> Timestamp {
        self.state.lock().clock.tick()
    }

    fn persist_state(&self) -> Result<()> {
        let state = self.state.lock();
        self.backend.save_state(&state)
    }

    fn persist_conflicts(&self) -> Result<()> {
        let all: Vec<ConflictRecord> = self.conflicts.read().values().cloned().collect();
        self.backend.save_conflicts(&all)
    }

    fn notify(&self, id: &str, kind: ChangeKind, origin: Origin) {
        // No receivers is fine.
        let _ = self.events.send(ChangeNotification {
            recipe_id: id.to_string(),
            kind,
            origin,
        });
    }
}

impl std::fmt::Debug for RecipeBook {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecipeBook")
            .field("store", &self.store)
            .field("log", &self.log)
            .field("conflicts", &self.conflicts.read().len())
            .finish()
    }
}

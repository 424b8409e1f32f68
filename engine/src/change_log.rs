//! Change log - the durable queue of local mutations awaiting delivery.
//!
//! Entries are appended in sequence order and only ever removed by an
//! acknowledgement. The log itself never reorders or merges entries.

use crate::storage::Backend;
use crate::{error::Result, RecipeContent, RecipeId, Sequence, Timestamp};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Kind of local mutation an entry records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum OpKind {
    Create,
    Update,
    Delete,
    AttachPhoto,
}

impl OpKind {
    /// Update-like entries that replace the full remote state.
    pub fn is_replacement(self) -> bool {
        matches!(self, OpKind::Update | OpKind::AttachPhoto)
    }
}

/// One durable record of a local mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeEntry {
    /// Assigned at append time, strictly increasing across the log
    pub seq: Sequence,
    pub recipe_id: RecipeId,
    pub op: OpKind,
    /// Recipe content at the time of the mutation (absent for deletes)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<RecipeContent>,
    /// Wall-clock time of the append, millis since epoch
    pub recorded_at: Timestamp,
}

/// Entries as loaded from a backend.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StoredChanges {
    /// Highest sequence ever assigned, including acknowledged entries
    pub high_water: Sequence,
    pub entries: Vec<ChangeEntry>,
}

struct LogInner {
    entries: BTreeMap<Sequence, ChangeEntry>,
    last_sequence: Sequence,
}

/// Append-only, sequence-ordered log of pending mutations.
pub struct ChangeLog {
    backend: Arc<dyn Backend>,
    inner: Mutex<LogInner>,
}

impl ChangeLog {
    /// Load the log from a backend.
    pub fn open(backend: Arc<dyn Backend>) -> Result<Self> {
        let stored = backend.load_changes()?;
        let mut entries = BTreeMap::new();
        let mut last_sequence = stored.high_water;
        for entry in stored.entries {
            last_sequence = last_sequence.max(entry.seq);
            entries.insert(entry.seq, entry);
        }
        tracing::debug!(
            pending = entries.len(),
            last_sequence,
            "change log loaded"
        );
        Ok(Self {
            backend,
            inner: Mutex::new(LogInner {
                entries,
                last_sequence,
            }),
        })
    }

    /// Append a mutation, assigning the next sequence number.
    ///
    /// Returns only after the backend has made the entry durable.
    pub fn append(
        &self,
        recipe_id: &str,
        op: OpKind,
        payload: Option<RecipeContent>,
    ) -> Result<ChangeEntry> {
        let mut inner = self.inner.lock();
        let entry = ChangeEntry {
            seq: inner.last_sequence + 1,
            recipe_id: recipe_id.to_string(),
            op,
            payload,
            recorded_at: now_millis(),
        };
        self.backend.append_change(&entry)?;
        inner.last_sequence = entry.seq;
        inner.entries.insert(entry.seq, entry.clone());
        tracing::trace!(seq = entry.seq, recipe_id, ?op, "change appended");
        Ok(entry)
    }

    /// Up to `max` oldest unacknowledged entries, in sequence order.
    pub fn peek_batch(&self, max: usize) -> Vec<ChangeEntry> {
        self.peek_batch_where(max, |_| true)
    }

    /// Like [`peek_batch`](Self::peek_batch), skipping entries `keep` rejects.
    pub fn peek_batch_where(&self, max: usize, keep: impl Fn(&ChangeEntry) -> bool) -> Vec<ChangeEntry> {
        self.inner
            .lock()
            .entries
            .values()
            .filter(|e| keep(e))
            .take(max)
            .cloned()
            .collect()
    }

    /// All pending entries for one recipe, oldest first.
    pub fn pending_for(&self, recipe_id: &str) -> Vec<ChangeEntry> {
        self.inner
            .lock()
            .entries
            .values()
            .filter(|e| e.recipe_id == recipe_id)
            .cloned()
            .collect()
    }

    pub fn has_pending(&self, recipe_id: &str) -> bool {
        self.inner
            .lock()
            .entries
            .values()
            .any(|e| e.recipe_id == recipe_id)
    }

    /// Distinct recipe ids with pending entries, ordered by their oldest entry.
    pub fn recipes_with_pending(&self) -> Vec<RecipeId> {
        let inner = self.inner.lock();
        let mut seen = Vec::new();
        for entry in inner.entries.values() {
            if !seen.contains(&entry.recipe_id) {
                seen.push(entry.recipe_id.clone());
            }
        }
        seen
    }

    /// Remove every entry of `recipe_id` with a sequence `<= seq`.
    ///
    /// Acknowledging the same sequence twice is a no-op. Returns the number
    /// of entries removed.
    pub fn acknowledge(&self, recipe_id: &str, seq: Sequence) -> Result<usize> {
        let mut inner = self.inner.lock();
        let acked: Vec<Sequence> = inner
            .entries
            .range(..=seq)
            .filter(|(_, e)| e.recipe_id == recipe_id)
            .map(|(s, _)| *s)
            .collect();
        if acked.is_empty() {
            return Ok(0);
        }

        let remaining: Vec<ChangeEntry> = inner
            .entries
            .values()
            .filter(|e| !(e.recipe_id == recipe_id && e.seq <= seq))
            .cloned()
            .collect();
        self.backend
            .rewrite_changes(inner.last_sequence, &remaining)?;

        for s in &acked {
            inner.entries.remove(s);
        }
        tracing::debug!(recipe_id, up_to = seq, removed = acked.len(), "changes acknowledged");
        Ok(acked.len())
    }

    /// Remove exactly one entry without remote delivery. Used to roll back an
    /// append whose store write failed.
    pub fn discard(&self, seq: Sequence) -> Result<bool> {
        let mut inner = self.inner.lock();
        if !inner.entries.contains_key(&seq) {
            return Ok(false);
        }
        let remaining: Vec<ChangeEntry> = inner
            .entries
            .values()
            .filter(|e| e.seq != seq)
            .cloned()
            .collect();
        self.backend
            .rewrite_changes(inner.last_sequence, &remaining)?;
        inner.entries.remove(&seq);
        Ok(true)
    }

    /// Number of pending entries.
    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().entries.is_empty()
    }

    /// Highest sequence number ever assigned.
    pub fn last_sequence(&self) -> Sequence {
        self.inner.lock().last_sequence
    }
}

impl std::fmt::Debug for ChangeLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("ChangeLog")
            .field("pending", &inner.entries.len())
            .field("last_sequence", &inner.last_sequence)
            .finish()
    }
}

pub(crate) fn now_millis() -> Timestamp {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as Timestamp)
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryBackend;
    use crate::RecipeDraft;

    fn content(title: &str) -> Option<RecipeContent> {
        Some(crate::RecipeRecord::new("x", RecipeDraft::new(title), 1).content())
    }

    fn log() -> (ChangeLog, Arc<MemoryBackend>) {
        let backend = Arc::new(MemoryBackend::new());
        (ChangeLog::open(backend.clone()).unwrap(), backend)
    }

    #[test]
    fn append_assigns_monotonic_sequences() {
        let (log, _) = log();
        let a = log.append("rec-1", OpKind::Create, content("Pasta")).unwrap();
        let b = log.append("rec-2", OpKind::Create, content("Soup")).unwrap();
        let c = log.append("rec-1", OpKind::Update, content("Pasta 2")).unwrap();
        assert_eq!((a.seq, b.seq, c.seq), (1, 2, 3));
        assert_eq!(log.len(), 3);
    }

    #[test]
    fn append_is_durable_before_returning() {
        let (log, backend) = log();
        log.append("rec-1", OpKind::Create, content("Pasta")).unwrap();
        assert_eq!(backend.load_changes().unwrap().entries.len(), 1);
    }

    #[test]
    fn failed_append_assigns_nothing() {
        let (log, backend) = log();
        backend.fail_writes(true);
        assert!(log.append("rec-1", OpKind::Create, content("Pasta")).is_err());
        backend.fail_writes(false);
        assert!(log.is_empty());
        let entry = log.append("rec-1", OpKind::Create, content("Pasta")).unwrap();
        assert_eq!(entry.seq, 1);
    }

    #[test]
    fn peek_returns_oldest_in_order() {
        let (log, _) = log();
        for i in 0..5 {
            log.append(&format!("rec-{}", i), OpKind::Create, content("x"))
                .unwrap();
        }
        let batch = log.peek_batch(3);
        let seqs: Vec<_> = batch.iter().map(|e| e.seq).collect();
        assert_eq!(seqs, vec![1, 2, 3]);
        // peeking does not consume
        assert_eq!(log.len(), 5);
    }

    #[test]
    fn acknowledge_is_scoped_to_recipe() {
        let (log, _) = log();
        log.append("rec-1", OpKind::Create, content("a")).unwrap();
        log.append("rec-2", OpKind::Create, content("b")).unwrap();
        log.append("rec-1", OpKind::Update, content("c")).unwrap();

        let removed = log.acknowledge("rec-1", 2).unwrap();
        assert_eq!(removed, 1);

        let left: Vec<_> = log.peek_batch(10).iter().map(|e| e.seq).collect();
        assert_eq!(left, vec![2, 3]);
    }

    #[test]
    fn acknowledge_twice_has_no_additional_effect() {
        let (log, backend) = log();
        log.append("rec-1", OpKind::Create, content("a")).unwrap();
        log.append("rec-1", OpKind::Update, content("b")).unwrap();

        assert_eq!(log.acknowledge("rec-1", 1).unwrap(), 1);
        let after_first = backend.load_changes().unwrap();
        assert_eq!(log.acknowledge("rec-1", 1).unwrap(), 0);
        assert_eq!(backend.load_changes().unwrap(), after_first);
        assert_eq!(log.len(), 1);
    }

    #[test]
    fn sequences_survive_full_acknowledgement_and_reopen() {
        let backend = Arc::new(MemoryBackend::new());
        {
            let log = ChangeLog::open(backend.clone()).unwrap();
            log.append("rec-1", OpKind::Create, content("a")).unwrap();
            log.append("rec-1", OpKind::Update, content("b")).unwrap();
            log.acknowledge("rec-1", 2).unwrap();
            assert!(log.is_empty());
        }
        let log = ChangeLog::open(backend).unwrap();
        assert_eq!(log.last_sequence(), 2);
        let next = log.append("rec-1", OpKind::Delete, None).unwrap();
        assert_eq!(next.seq, 3);
    }

    #[test]
    fn discard_removes_only_that_entry() {
        let (log, _) = log();
        log.append("rec-1", OpKind::Create, content("a")).unwrap();
        log.append("rec-1", OpKind::Update, content("b")).unwrap();
        assert!(log.discard(2).unwrap());
        assert!(!log.discard(2).unwrap());
        let left: Vec<_> = log.peek_batch(10).iter().map(|e| e.seq).collect();
        assert_eq!(left, vec![1]);
        // the sequence is not reused
        assert_eq!(log.append("rec-1", OpKind::Update, content("c")).unwrap().seq, 3);
    }

    #[test]
    fn recipes_with_pending_ordered_by_oldest_entry() {
        let (log, _) = log();
        log.append("b", OpKind::Create, content("b")).unwrap();
        log.append("a", OpKind::Create, content("a")).unwrap();
        log.append("b", OpKind::Update, content("b2")).unwrap();
        assert_eq!(log.recipes_with_pending(), vec!["b".to_string(), "a".to_string()]);
        assert!(log.has_pending("a"));
        assert!(!log.has_pending("c"));
        assert_eq!(log.pending_for("b").len(), 2);
    }
}

//! Per-recipe mutual exclusion.
//!
//! Each recipe id maps to its own mutex, created on first use. There is no
//! lock spanning several recipes.

use crate::RecipeId;
use dashmap::DashMap;
use parking_lot::{lock_api::ArcMutexGuard, Mutex, RawMutex};
use std::sync::Arc;

/// Proof that the caller holds the lock for `id`.
pub struct RecipeGuard {
    id: RecipeId,
    _guard: ArcMutexGuard<RawMutex, ()>,
}

impl RecipeGuard {
    pub fn id(&self) -> &str {
        &self.id
    }
}

impl std::fmt::Debug for RecipeGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecipeGuard").field("id", &self.id).finish()
    }
}

/// Map from recipe id to a lazily created mutex.
#[derive(Debug, Default)]
pub struct KeyedLocks {
    locks: DashMap<RecipeId, Arc<Mutex<()>>>,
}

impl KeyedLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Block until the lock for `id` is held.
    ///
    /// Never call this while holding another recipe's guard from the same
    /// thread, and never hold the guard across an `.await`.
    pub fn lock(&self, id: &str) -> RecipeGuard {
        let mutex = self
            .locks
            .entry(id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        RecipeGuard {
            id: id.to_string(),
            _guard: mutex.lock_arc(),
        }
    }

    /// Take the lock only if nobody holds it.
    pub fn try_lock(&self, id: &str) -> Option<RecipeGuard> {
        let mutex = self
            .locks
            .entry(id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        mutex.try_lock_arc().map(|guard| RecipeGuard {
            id: id.to_string(),
            _guard: guard,
        })
    }

    /// Drop mutexes nobody holds or waits on.
    pub fn prune(&self) {
        self.locks.retain(|_, m| Arc::strong_count(m) > 1);
    }

    /// Number of mutexes currently allocated.
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

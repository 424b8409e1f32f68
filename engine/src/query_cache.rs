//! Query cache - in-memory projection of the content store for list views.
//!
//! Summaries live in an arena (`Vec<Option<Slot>>`) addressed through an id
//! index; removed slots go on a free list and are reused. The cache is never
//! the source of truth: [`QueryCache::rebuild`] recreates it from the store,
//! and [`QueryCache::verify`] detects drift.

use crate::content_store::Listing;
use crate::{error::Result, Error, Location, PhotoState, RecipeId, RecipeRecord, SyncState, Timestamp};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// Denormalized row shown in recipe lists.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecipeSummary {
    pub id: RecipeId,
    pub title: String,
    pub ingredient_count: usize,
    pub location: Option<Location>,
    pub sync_state: SyncState,
    pub photo_state: PhotoState,
    pub updated_at: Timestamp,
    pub created_at: Timestamp,
}

impl RecipeSummary {
    pub fn from_record(record: &RecipeRecord) -> Self {
        Self {
            id: record.id.clone(),
            title: record.title.clone(),
            ingredient_count: record.ingredients.len(),
            location: record.location,
            sync_state: record.sync_state,
            photo_state: record.photo_state(),
            updated_at: record.updated_at,
            created_at: record.created_at,
        }
    }
}

#[derive(Debug, Clone)]
struct Slot {
    summary: RecipeSummary,
    title_lower: String,
}

/// Sort order for query results.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SortOrder {
    /// Case-insensitive title, then id
    #[default]
    Title,
    /// Most recently updated first
    Recent,
    /// Oldest first
    Created,
    /// Nearest to the `near` center first; recipes without location last
    Distance,
}

/// Proximity filter.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NearFilter {
    pub center: Location,
    pub radius_km: f64,
}

/// A list query. All filters are conjunctive; unset filters match everything.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RecipeQuery {
    pub title_contains: Option<String>,
    pub near: Option<NearFilter>,
    pub sync_state: Option<SyncState>,
    pub has_photo: Option<bool>,
    pub sort: SortOrder,
    pub limit: Option<usize>,
}

impl RecipeQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn title_contains(mut self, needle: impl Into<String>) -> Self {
        self.title_contains = Some(needle.into());
        self
    }

    pub fn near(mut self, center: Location, radius_km: f64) -> Self {
        self.near = Some(NearFilter { center, radius_km });
        self
    }

    pub fn sync_state(mut self, state: SyncState) -> Self {
        self.sync_state = Some(state);
        self
    }

    pub fn has_photo(mut self, has_photo: bool) -> Self {
        self.has_photo = Some(has_photo);
        self
    }

    pub fn sort(mut self, sort: SortOrder) -> Self {
        self.sort = sort;
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    fn matches(&self, slot: &Slot, needle: Option<&str>) -> bool {
        let s = &slot.summary;
        if let Some(needle) = needle {
            if !slot.title_lower.contains(needle) {
                return false;
            }
        }
        if let Some(state) = self.sync_state {
            if s.sync_state != state {
                return false;
            }
        }
        if let Some(has_photo) = self.has_photo {
            if (s.photo_state != PhotoState::None) != has_photo {
                return false;
            }
        }
        if let Some(near) = &self.near {
            match &s.location {
                Some(loc) if loc.distance_km(&near.center) <= near.radius_km => {}
                _ => return false,
            }
        }
        true
    }
}

/// Arena-backed projection of active recipes plus multi-select state.
#[derive(Debug, Default)]
pub struct QueryCache {
    slots: Vec<Option<Slot>>,
    index: HashMap<RecipeId, usize>,
    free: Vec<usize>,
    selection: HashSet<RecipeId>,
}

impl QueryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a cache from records; tombstones are skipped.
    pub fn from_records<'a>(records: impl IntoIterator<Item = &'a RecipeRecord>) -> Self {
        let mut cache = Self::new();
        for record in records {
            cache.upsert(record);
        }
        cache
    }

    /// Reflect a store mutation. A tombstone removes the row.
    pub fn upsert(&mut self, record: &RecipeRecord) {
        if !record.is_active() {
            self.remove(&record.id);
            return;
        }
        let slot = Slot {
            summary: RecipeSummary::from_record(record),
            title_lower: record.title.to_lowercase(),
        };
        match self.index.get(&record.id) {
            Some(&i) => self.slots[i] = Some(slot),
            None => {
                let i = match self.free.pop() {
                    Some(i) => {
                        self.slots[i] = Some(slot);
                        i
                    }
                    None => {
                        self.slots.push(Some(slot));
                        self.slots.len() - 1
                    }
                };
                self.index.insert(record.id.clone(), i);
            }
        }
    }

    /// Drop a row and its selection mark. Returns whether it was present.
    pub fn remove(&mut self, id: &str) -> bool {
        self.selection.remove(id);
        match self.index.remove(id) {
            Some(i) => {
                self.slots[i] = None;
                self.free.push(i);
                true
            }
            None => false,
        }
    }

    pub fn get(&self, id: &str) -> Option<&RecipeSummary> {
        self.index
            .get(id)
            .and_then(|&i| self.slots[i].as_ref())
            .map(|slot| &slot.summary)
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Run a query over the cached rows.
    pub fn query(&self, query: &RecipeQuery) -> Vec<RecipeSummary> {
        let needle = query
            .title_contains
            .as_deref()
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .map(str::to_lowercase);

        let mut hits: Vec<&Slot> = self
            .slots
            .iter()
            .flatten()
            .filter(|slot| query.matches(slot, needle.as_deref()))
            .collect();

        match query.sort {
            SortOrder::Title => hits.sort_by(|a, b| {
                a.title_lower
                    .cmp(&b.title_lower)
                    .then_with(|| a.summary.id.cmp(&b.summary.id))
            }),
            SortOrder::Recent => hits.sort_by(|a, b| {
                b.summary
                    .updated_at
                    .cmp(&a.summary.updated_at)
                    .then_with(|| a.summary.id.cmp(&b.summary.id))
            }),
            SortOrder::Created => hits.sort_by(|a, b| {
                a.summary
                    .created_at
                    .cmp(&b.summary.created_at)
                    .then_with(|| a.summary.id.cmp(&b.summary.id))
            }),
            SortOrder::Distance => {
                let center = query.near.map(|n| n.center);
                let distance = |slot: &Slot| match (center, slot.summary.location) {
                    (Some(c), Some(l)) => l.distance_km(&c),
                    _ => f64::INFINITY,
                };
                hits.sort_by(|a, b| {
                    distance(a)
                        .total_cmp(&distance(b))
                        .then_with(|| a.summary.id.cmp(&b.summary.id))
                });
            }
        }

        let limit = query.limit.unwrap_or(usize::MAX);
        hits.into_iter()
            .take(limit)
            .map(|slot| slot.summary.clone())
            .collect()
    }

    /// Mark a row selected. Unknown ids are ignored and return `false`.
    pub fn select(&mut self, id: &str) -> bool {
        if !self.index.contains_key(id) {
            return false;
        }
        self.selection.insert(id.to_string());
        true
    }

    pub fn deselect(&mut self, id: &str) -> bool {
        self.selection.remove(id)
    }

    /// Flip a row's selection. Returns the new state.
    pub fn toggle(&mut self, id: &str) -> bool {
        if self.selection.remove(id) {
            false
        } else {
            self.select(id)
        }
    }

    pub fn is_selected(&self, id: &str) -> bool {
        self.selection.contains(id)
    }

    /// Select every row matching `query` (its limit applies). Returns how many
    /// rows matched.
    pub fn select_all(&mut self, query: &RecipeQuery) -> usize {
        let ids: Vec<RecipeId> = self.query(query).into_iter().map(|s| s.id).collect();
        let count = ids.len();
        self.selection.extend(ids);
        count
    }

    pub fn clear_selection(&mut self) {
        self.selection.clear();
    }

    /// Selected ids, sorted.
    pub fn selected(&self) -> Vec<RecipeId> {
        let mut ids: Vec<RecipeId> = self.selection.iter().cloned().collect();
        ids.sort();
        ids
    }

    /// Replace the whole projection. Selection is cleared.
    pub fn rebuild<'a>(&mut self, records: impl IntoIterator<Item = &'a RecipeRecord>) {
        *self = Self::from_records(records);
        tracing::info!(rows = self.len(), "query cache rebuilt");
    }

    /// Compare the projection against a store listing.
    pub fn verify(&self, listing: &Listing) -> Result<()> {
        let mut seen = 0usize;
        for record in listing {
            seen += 1;
            match self.get(&record.id) {
                Some(summary) if *summary == RecipeSummary::from_record(record) => {}
                Some(_) => {
                    return Err(Error::Integrity(format!(
                        "cached summary of {} is stale",
                        record.id
                    )))
                }
                None => {
                    return Err(Error::Integrity(format!(
                        "{} missing from query cache",
                        record.id
                    )))
                }
            }
        }
        if seen != self.len() {
            return Err(Error::Integrity(format!(
                "query cache holds {} rows, store has {} records",
                self.len(),
                seen
            )));
        }
        Ok(())
    }
}

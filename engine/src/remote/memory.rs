//! In-process remote used by tests and demos.
//!
//! Behaves like the reference server: ids are `r1`, `r2`, ..., every write
//! takes the next value of a server-wide version counter, deletes leave
//! tombstones, and writes with a repeated idempotency key replay the first
//! response. Failures, lost responses and latency can be injected.

use super::{PullPage, RecipeBody, RemoteApi, RemoteError, RemoteRecipe, RemoteResult};
use crate::{MediaBlob, RemoteId};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::time::Duration;

/// A call received by [`MemoryRemote`], in arrival order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteCall {
    Create { key: String, client_id: String },
    Update { key: String, remote_id: RemoteId },
    Delete { key: String, remote_id: RemoteId },
    Pull { since: Option<String> },
    UploadMedia { key: String, blob_ref: String },
}

/// Which calls an injected failure applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailOn {
    Any,
    Pull,
    /// Creates, updates and deletes
    Write,
    Upload,
}

#[derive(Debug, Clone)]
enum Replay {
    Recipe(RemoteRecipe),
    Deleted,
    Media(String),
}

#[derive(Debug, Default)]
struct ServerState {
    next_id: u64,
    version: u64,
    recipes: BTreeMap<RemoteId, RemoteRecipe>,
    replays: HashMap<String, Replay>,
    media: HashMap<String, (String, Vec<u8>)>,
    failures: HashMap<FailOn, VecDeque<RemoteError>>,
    lost_responses: usize,
    max_title_len: Option<usize>,
    calls: Vec<RemoteCall>,
}

impl ServerState {
    fn next_version(&mut self) -> u64 {
        self.version += 1;
        self.version
    }

    fn insert(&mut self, body: &RecipeBody) -> RemoteRecipe {
        self.next_id += 1;
        let recipe = RemoteRecipe {
            remote_id: format!("r{}", self.next_id),
            client_id: Some(body.client_id.clone()),
            title: body.title.clone(),
            ingredients: body.ingredients.clone(),
            steps: body.steps.clone(),
            location: body.location,
            photo_url: body.photo_url.clone(),
            updated_at: self.next_version(),
            deleted: false,
        };
        self.recipes.insert(recipe.remote_id.clone(), recipe.clone());
        recipe
    }

    fn validate(&self, body: &RecipeBody) -> RemoteResult<()> {
        if body.title.trim().is_empty() {
            return Err(RemoteError::Rejected {
                status: 422,
                message: "title must not be empty".into(),
            });
        }
        if let Some(max) = self.max_title_len {
            if body.title.chars().count() > max {
                return Err(RemoteError::Rejected {
                    status: 422,
                    message: format!("title longer than {} characters", max),
                });
            }
        }
        Ok(())
    }

    /// Pop an injected failure for `target`, falling back to untargeted ones.
    fn injected(&mut self, target: FailOn) -> RemoteResult<()> {
        for key in [target, FailOn::Any] {
            if let Some(err) = self.failures.get_mut(&key).and_then(VecDeque::pop_front) {
                return Err(err);
            }
        }
        Ok(())
    }

    /// Deliver `value`, or swallow it if a lost response is armed.
    fn respond<T>(&mut self, value: T) -> RemoteResult<T> {
        if self.lost_responses > 0 {
            self.lost_responses -= 1;
            return Err(RemoteError::Transient("connection reset".into()));
        }
        Ok(value)
    }
}

/// A [`RemoteApi`] that keeps the whole service in memory.
#[derive(Debug, Default)]
pub struct MemoryRemote {
    state: Mutex<ServerState>,
    latency: Mutex<Option<Duration>>,
}

impl MemoryRemote {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next call with `err` before it has any effect.
    pub fn fail_next(&self, err: RemoteError) {
        self.fail_next_on(FailOn::Any, err);
    }

    /// Fail the next call of the given kind with `err`.
    pub fn fail_next_on(&self, target: FailOn, err: RemoteError) {
        self.state
            .lock()
            .failures
            .entry(target)
            .or_default()
            .push_back(err);
    }

    /// Fail the next `n` calls with a transient error.
    pub fn fail_next_transient(&self, n: usize) {
        self.fail_transient_on(FailOn::Any, n);
    }

    /// Fail the next `n` calls of the given kind with a transient error.
    pub fn fail_transient_on(&self, target: FailOn, n: usize) {
        for _ in 0..n {
            self.fail_next_on(target, RemoteError::Transient("service unavailable".into()));
        }
    }

    /// Apply the next write but report a transient failure to the caller.
    pub fn lose_next_response(&self) {
        self.state.lock().lost_responses += 1;
    }

    /// Reject creates and updates whose title exceeds `max` characters.
    pub fn set_max_title_len(&self, max: Option<usize>) {
        self.state.lock().max_title_len = max;
    }

    /// Delay every call by `latency`.
    pub fn set_latency(&self, latency: Option<Duration>) {
        *self.latency.lock() = latency;
    }

    /// Create a recipe as another device would.
    pub fn insert_remote(&self, body: RecipeBody) -> RemoteRecipe {
        self.state.lock().insert(&body)
    }

    /// Edit a recipe as another device would.
    pub fn edit_remote(
        &self,
        remote_id: &str,
        edit: impl FnOnce(&mut RemoteRecipe),
    ) -> Option<RemoteRecipe> {
        let mut state = self.state.lock();
        let version = state.next_version();
        let recipe = state.recipes.get_mut(remote_id)?;
        edit(recipe);
        recipe.updated_at = version;
        Some(recipe.clone())
    }

    /// Delete a recipe as another device would.
    pub fn delete_remote(&self, remote_id: &str) -> bool {
        let mut state = self.state.lock();
        let version = state.next_version();
        match state.recipes.get_mut(remote_id) {
            Some(recipe) => {
                recipe.deleted = true;
                recipe.updated_at = version;
                true
            }
            None => false,
        }
    }

    pub fn recipe(&self, remote_id: &str) -> Option<RemoteRecipe> {
        self.state.lock().recipes.get(remote_id).cloned()
    }

    /// All recipes including tombstones, ordered by id.
    pub fn recipes(&self) -> Vec<RemoteRecipe> {
        self.state.lock().recipes.values().cloned().collect()
    }

    /// Recipes that are not deleted.
    pub fn active_recipes(&self) -> Vec<RemoteRecipe> {
        self.state
            .lock()
            .recipes
            .values()
            .filter(|r| !r.deleted)
            .cloned()
            .collect()
    }

    pub fn media(&self, blob_ref: &str) -> Option<Vec<u8>> {
        self.state
            .lock()
            .media
            .get(blob_ref)
            .map(|(_, bytes)| bytes.clone())
    }

    pub fn calls(&self) -> Vec<RemoteCall> {
        self.state.lock().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.state.lock().calls.clear();
    }

    /// Calls are recorded as they arrive, before any latency.
    fn record(&self, call: RemoteCall) {
        self.state.lock().calls.push(call);
    }

    async fn delay(&self) {
        let latency = *self.latency.lock();
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
    }
}

#[async_trait]
impl RemoteApi for MemoryRemote {
    async fn create_recipe(&self, key: &str, body: &RecipeBody) -> RemoteResult<RemoteRecipe> {
        self.record(RemoteCall::Create {
            key: key.to_string(),
            client_id: body.client_id.clone(),
        });
        self.delay().await;
        let mut state = self.state.lock();
        state.injected(FailOn::Write)?;
        if let Some(Replay::Recipe(recipe)) = state.replays.get(key) {
            let recipe = recipe.clone();
            return state.respond(recipe);
        }
        state.validate(body)?;

        let recipe = state.insert(body);
        state
            .replays
            .insert(key.to_string(), Replay::Recipe(recipe.clone()));
        state.respond(recipe)
    }

    async fn update_recipe(
        &self,
        key: &str,
        remote_id: &str,
        body: &RecipeBody,
    ) -> RemoteResult<RemoteRecipe> {
        self.record(RemoteCall::Update {
            key: key.to_string(),
            remote_id: remote_id.to_string(),
        });
        self.delay().await;
        let mut state = self.state.lock();
        state.injected(FailOn::Write)?;
        if let Some(Replay::Recipe(recipe)) = state.replays.get(key) {
            let recipe = recipe.clone();
            return state.respond(recipe);
        }
        state.validate(body)?;

        let version = state.next_version();
        let recipe = match state.recipes.get_mut(remote_id) {
            Some(recipe) if !recipe.deleted => recipe,
            _ => return Err(RemoteError::NotFound),
        };
        recipe.title = body.title.clone();
        recipe.ingredients = body.ingredients.clone();
        recipe.steps = body.steps.clone();
        recipe.location = body.location;
        recipe.photo_url = body.photo_url.clone();
        recipe.updated_at = version;
        let recipe = recipe.clone();

        state
            .replays
            .insert(key.to_string(), Replay::Recipe(recipe.clone()));
        state.respond(recipe)
    }

    async fn delete_recipe(&self, key: &str, remote_id: &str) -> RemoteResult<()> {
        self.record(RemoteCall::Delete {
            key: key.to_string(),
            remote_id: remote_id.to_string(),
        });
        self.delay().await;
        let mut state = self.state.lock();
        state.injected(FailOn::Write)?;
        if let Some(Replay::Deleted) = state.replays.get(key) {
            return state.respond(());
        }

        let version = state.next_version();
        match state.recipes.get_mut(remote_id) {
            Some(recipe) => {
                if !recipe.deleted {
                    recipe.deleted = true;
                    recipe.updated_at = version;
                }
            }
            None => return Err(RemoteError::NotFound),
        }
        state.replays.insert(key.to_string(), Replay::Deleted);
        state.respond(())
    }

    async fn pull(&self, since: Option<&str>, limit: usize) -> RemoteResult<PullPage> {
        self.record(RemoteCall::Pull {
            since: since.map(str::to_string),
        });
        self.delay().await;
        let mut state = self.state.lock();
        state.injected(FailOn::Pull)?;

        let after = match since {
            Some(cursor) => cursor.parse::<u64>().map_err(|_| RemoteError::Rejected {
                status: 400,
                message: format!("invalid cursor {}", cursor),
            })?,
            None => 0,
        };
        let mut changed: Vec<RemoteRecipe> = state
            .recipes
            .values()
            .filter(|r| r.updated_at > after)
            .cloned()
            .collect();
        changed.sort_by_key(|r| r.updated_at);

        let has_more = changed.len() > limit;
        changed.truncate(limit);
        let cursor = changed
            .last()
            .map(|r| r.updated_at.to_string())
            .or_else(|| since.map(str::to_string));

        Ok(PullPage {
            recipes: changed,
            cursor,
            has_more,
        })
    }

    async fn upload_media(
        &self,
        key: &str,
        blob: &MediaBlob,
        bytes: &[u8],
    ) -> RemoteResult<String> {
        self.record(RemoteCall::UploadMedia {
            key: key.to_string(),
            blob_ref: blob.blob_ref.clone(),
        });
        self.delay().await;
        let mut state = self.state.lock();
        state.injected(FailOn::Upload)?;
        if let Some(Replay::Media(url)) = state.replays.get(key) {
            let url = url.clone();
            return state.respond(url);
        }

        let url = format!("memory://media/{}", blob.blob_ref);
        state.media.insert(
            blob.blob_ref.clone(),
            (blob.content_type.clone(), bytes.to_vec()),
        );
        state
            .replays
            .insert(key.to_string(), Replay::Media(url.clone()));
        state.respond(url)
    }
}

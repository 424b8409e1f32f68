//! Sync engine - moves the change log to the remote and remote state back.
//!
//! A cycle runs three phases in order:
//!
//! 1. **Pull**: page through remote changes since the saved cursor and
//!    reconcile each one. Divergence opens a conflict instead of picking a
//!    winner.
//! 2. **Media**: upload pending photo blobs and queue link updates for
//!    recipes whose photo just became available remotely.
//! 3. **Push**: deliver pending entries per recipe in sequence order,
//!    acknowledging them only after the remote confirms.
//!
//! Only one cycle runs at a time. Transient failures back off per recipe
//! (or per blob) without blocking the others.

mod config;
mod media;
mod pull;
mod push;
mod retry;

pub use config::SyncConfig;
pub use retry::{RetryPolicy, RetryState};

use crate::book::{Origin, RecipeBook};
use crate::remote::{RemoteApi, RemoteError, RemoteResult};
use crate::{error::Result, BlobRef, Error, RecipeId};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch, Notify};
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// What the engine is doing right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SyncPhase {
    #[default]
    Idle,
    Pulling,
    UploadingMedia,
    Pushing,
}

/// Outcome of one sync cycle.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncReport {
    /// Remote records received
    pub pulled: usize,
    /// Remote records that changed local state
    pub applied: usize,
    /// Remote ids of records skipped because they fail local validation.
    /// The cursor still moves past them; a later remote edit brings them
    /// back with a higher version.
    pub skipped: Vec<String>,
    /// Requests that delivered local changes
    pub pushed: usize,
    /// Change entries acknowledged
    pub acknowledged: usize,
    pub uploaded_media: usize,
    /// Conflicts opened during the cycle
    pub conflicts: usize,
    /// Recipes whose delivery ran out of attempts and waits for the next cycle
    pub deferred: usize,
    /// Blobs whose upload ran out of attempts
    pub deferred_media: usize,
    #[serde(with = "duration_millis")]
    pub duration: Duration,
}

/// Drives sync cycles between a [`RecipeBook`] and a [`RemoteApi`].
pub struct SyncEngine<R> {
    book: Arc<RecipeBook>,
    remote: Arc<R>,
    config: SyncConfig,
    cycle: tokio::sync::Mutex<()>,
    cancel: watch::Sender<bool>,
    phase: Mutex<SyncPhase>,
    retries: Mutex<HashMap<RecipeId, RetryState>>,
    media_retries: Mutex<HashMap<BlobRef, RetryState>>,
    last_report: Mutex<Option<SyncReport>>,
}

impl<R: RemoteApi> SyncEngine<R> {
    pub fn new(book: Arc<RecipeBook>, remote: Arc<R>, config: SyncConfig) -> Self {
        let (cancel, _) = watch::channel(false);
        Self {
            book,
            remote,
            config,
            cycle: tokio::sync::Mutex::new(()),
            cancel,
            phase: Mutex::new(SyncPhase::Idle),
            retries: Mutex::new(HashMap::new()),
            media_retries: Mutex::new(HashMap::new()),
            last_report: Mutex::new(None),
        }
    }

    pub fn book(&self) -> &Arc<RecipeBook> {
        &self.book
    }

    pub fn remote(&self) -> &Arc<R> {
        &self.remote
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn phase(&self) -> SyncPhase {
        *self.phase.lock()
    }

    /// Report of the last cycle that completed.
    pub fn last_report(&self) -> Option<SyncReport> {
        self.last_report.lock().clone()
    }

    /// Retry bookkeeping of a recipe from the current or last cycle.
    pub fn retry_state(&self, id: &str) -> Option<RetryState> {
        self.retries.lock().get(id).cloned()
    }

    pub fn media_retry_state(&self, blob_ref: &str) -> Option<RetryState> {
        self.media_retries.lock().get(blob_ref).cloned()
    }

    /// Abort the running cycle at its next remote call or backoff wait.
    ///
    /// In-flight requests are dropped; nothing is acknowledged for them, so
    /// their entries are sent again by a later cycle.
    pub fn cancel(&self) {
        self.cancel.send_replace(true);
    }

    /// Run one full cycle: pull, media, push.
    ///
    /// Waits for a running cycle to finish first. Fails with
    /// [`Error::Cancelled`] if [`cancel`](Self::cancel) is called meanwhile,
    /// or with [`Error::TransientNetwork`] if the pull cannot reach the
    /// remote; in that case nothing is pushed.
    pub async fn sync_once(&self) -> Result<SyncReport> {
        let _cycle = self.cycle.lock().await;
        self.cancel.send_replace(false);
        self.retries.lock().clear();
        self.media_retries.lock().clear();

        let started = Instant::now();
        let mut report = SyncReport::default();
        let outcome = self.run_phases(&mut report).await;
        self.set_phase(SyncPhase::Idle);
        self.book.prune_locks();
        report.duration = started.elapsed();

        match outcome {
            Ok(()) => {
                tracing::info!(
                    pulled = report.pulled,
                    applied = report.applied,
                    skipped = report.skipped.len(),
                    pushed = report.pushed,
                    acknowledged = report.acknowledged,
                    uploaded_media = report.uploaded_media,
                    conflicts = report.conflicts,
                    deferred = report.deferred,
                    duration_ms = report.duration.as_millis() as u64,
                    "sync cycle complete"
                );
                *self.last_report.lock() = Some(report.clone());
                Ok(report)
            }
            Err(e) => {
                tracing::warn!(error = %e, "sync cycle aborted");
                Err(e)
            }
        }
    }

    async fn run_phases(&self, report: &mut SyncReport) -> Result<()> {
        self.set_phase(SyncPhase::Pulling);
        pull::run(self, report).await?;
        self.set_phase(SyncPhase::UploadingMedia);
        media::run(self, report).await?;
        self.set_phase(SyncPhase::Pushing);
        push::run(self, report).await
    }

    fn set_phase(&self, phase: SyncPhase) {
        *self.phase.lock() = phase;
    }

    fn is_cancelled(&self) -> bool {
        *self.cancel.borrow()
    }

    /// Resolves once the running cycle is cancelled.
    fn cancelled(&self) -> impl Future<Output = ()> + Send + 'static {
        let mut rx = self.cancel.subscribe();
        async move {
            loop {
                let stop = *rx.borrow_and_update();
                if stop {
                    return;
                }
                if rx.changed().await.is_err() {
                    std::future::pending::<()>().await;
                }
            }
        }
    }

    /// Run a remote call, giving up early if the cycle is cancelled.
    async fn call<T>(&self, request: impl Future<Output = RemoteResult<T>>) -> RemoteResult<T> {
        if self.is_cancelled() {
            return Err(RemoteError::Cancelled);
        }
        tokio::select! {
            result = request => result,
            _ = self.cancelled() => Err(RemoteError::Cancelled),
        }
    }

    /// Sleep until `deadline` unless the cycle is cancelled first.
    async fn sleep_until(&self, deadline: Instant) -> Result<()> {
        if self.is_cancelled() {
            return Err(Error::Cancelled);
        }
        tokio::select! {
            _ = tokio::time::sleep_until(deadline) => Ok(()),
            _ = self.cancelled() => Err(Error::Cancelled),
        }
    }

    /// Run `request` with backoff until it succeeds, fails permanently or
    /// `policy` runs out of attempts. Failures are recorded in `state`.
    async fn with_retry<T, F, Fut>(
        &self,
        policy: &RetryPolicy,
        what: &str,
        state: &mut RetryState,
        mut request: F,
    ) -> RemoteResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = RemoteResult<T>>,
    {
        loop {
            match self.call(request()).await {
                Err(RemoteError::Transient(msg)) => {
                    if !state.record_failure(policy, Instant::now(), msg.clone()) {
                        return Err(RemoteError::Transient(msg));
                    }
                    tracing::debug!(what, attempt = state.attempts, error = %msg, "retrying");
                    if let Some(at) = state.next_eligible_at {
                        self.sleep_until(at)
                            .await
                            .map_err(|_| RemoteError::Cancelled)?;
                    }
                }
                other => return other,
            }
        }
    }
}

impl<R: RemoteApi + 'static> SyncEngine<R> {
    /// Run cycles in the background: on every interval tick, every
    /// [`SyncHandle::trigger`], and after every local edit.
    pub fn spawn(self: Arc<Self>) -> SyncHandle<R> {
        let trigger = Arc::new(Notify::new());
        let (shutdown, mut stopped) = watch::channel(false);
        let mut events = self.book.subscribe();
        let engine = self.clone();
        let wake = trigger.clone();

        let task = tokio::spawn(async move {
            loop {
                let interval = engine.config.sync_interval;
                let tick = async move {
                    match interval {
                        Some(period) => tokio::time::sleep(period).await,
                        None => std::future::pending::<()>().await,
                    }
                };
                tokio::select! {
                    _ = stopped.changed() => break,
                    _ = wake.notified() => {}
                    _ = tick => {}
                    event = events.recv() => match event {
                        Ok(change) if change.origin == Origin::Local => {}
                        Ok(_) => continue,
                        Err(broadcast::error::RecvError::Lagged(_)) => {}
                        Err(broadcast::error::RecvError::Closed) => break,
                    },
                }
                if *stopped.borrow() {
                    break;
                }
                if let Err(e) = engine.sync_once().await {
                    tracing::debug!(error = %e, "background sync cycle failed");
                }
            }
            tracing::debug!("background sync stopped");
        });

        SyncHandle {
            engine: self,
            trigger,
            shutdown,
            task: Some(task),
        }
    }
}

impl<R> std::fmt::Debug for SyncEngine<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncEngine")
            .field("phase", &*self.phase.lock())
            .field("config", &self.config)
            .finish()
    }
}

/// Handle to a background sync task.
pub struct SyncHandle<R: RemoteApi + 'static> {
    engine: Arc<SyncEngine<R>>,
    trigger: Arc<Notify>,
    shutdown: watch::Sender<bool>,
    task: Option<JoinHandle<()>>,
}

impl<R: RemoteApi + 'static> SyncHandle<R> {
    /// Start a cycle as soon as the current one (if any) finishes.
    pub fn trigger(&self) {
        self.trigger.notify_one();
    }

    pub fn engine(&self) -> &Arc<SyncEngine<R>> {
        &self.engine
    }

    /// Cancel the running cycle and wait for the task to exit.
    pub async fn shutdown(mut self) {
        self.shutdown.send_replace(true);
        self.engine.cancel();
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                tracing::warn!(error = %e, "background sync task failed");
            }
        }
    }
}

impl<R: RemoteApi + 'static> Drop for SyncHandle<R> {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            self.engine.cancel();
            task.abort();
        }
    }
}

mod duration_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}

mod optional_duration_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(
        value: &Option<Duration>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(duration) => serializer.serialize_some(&(duration.as_millis() as u64)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Duration>, D::Error> {
        Ok(Option::<u64>::deserialize(deserializer)?.map(Duration::from_millis))
    }
}

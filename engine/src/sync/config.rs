//! Sync engine configuration.

use super::retry::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for a [`SyncEngine`](super::SyncEngine).
///
/// Serialized in camelCase with durations in milliseconds; missing fields
/// take their defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SyncConfig {
    /// Records requested per pull page
    pub pull_page_size: usize,
    /// Most change entries sent for one recipe in one request round
    pub push_batch_size: usize,
    /// Backoff for pulls and recipe pushes
    pub retry: RetryPolicy,
    /// Backoff for media uploads, tracked per blob
    pub media_retry: RetryPolicy,
    /// Period of background cycles; `None` syncs only on trigger or local edits
    #[serde(rename = "intervalMs", with = "super::optional_duration_millis")]
    pub sync_interval: Option<Duration>,
    /// Fold runs of updates for one recipe into a single request
    pub coalesce_updates: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            pull_page_size: 100,
            push_batch_size: 50,
            retry: RetryPolicy::default(),
            media_retry: RetryPolicy::default(),
            sync_interval: Some(Duration::from_secs(60)),
            coalesce_updates: true,
        }
    }
}

impl SyncConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_pull_page_size(mut self, size: usize) -> Self {
        self.pull_page_size = size.max(1);
        self
    }

    pub fn with_push_batch_size(mut self, size: usize) -> Self {
        self.push_batch_size = size.max(1);
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_media_retry(mut self, retry: RetryPolicy) -> Self {
        self.media_retry = retry;
        self
    }

    pub fn with_sync_interval(mut self, interval: Option<Duration>) -> Self {
        self.sync_interval = interval;
        self
    }

    pub fn with_coalesce_updates(mut self, coalesce: bool) -> Self {
        self.coalesce_updates = coalesce;
        self
    }
}

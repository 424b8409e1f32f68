//! Reconciliation of pulled remote records against local state.
//!
//! This module is pure: given a local record, its pending changes and a remote
//! copy, it decides what a pull should do. It never picks a winner between
//! diverged edits; divergence always becomes a [`ConflictRecord`] that waits
//! for an explicit [`Resolution`].

use crate::change_log::{ChangeEntry, OpKind};
use crate::remote::RemoteRecipe;
use crate::{RecipeDraft, RecipeId, RecipeRecord, Sequence, SyncState, Timestamp};
use serde::{Deserialize, Serialize};

/// Why a recipe is in conflict.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum ConflictReason {
    /// The remote changed while local edits were still unsent
    Diverged,
    /// The remote refused a local edit
    Rejected { status: u16, message: String },
}

/// A divergence between local and remote copies awaiting a decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConflictRecord {
    pub recipe_id: RecipeId,
    /// Local record at detection time
    pub local: RecipeRecord,
    /// Remote copy; `None` means the remote rejected the local edit
    pub remote: Option<RemoteRecipe>,
    pub reason: ConflictReason,
    /// Last sequence of the batch the remote rejected
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rejected_seq: Option<Sequence>,
    /// Wall-clock detection time, millis since epoch
    pub detected_at: Timestamp,
}

impl ConflictRecord {
    pub fn is_rejection(&self) -> bool {
        matches!(self.reason, ConflictReason::Rejected { .. })
    }
}

/// An external decision closing a conflict.
///
/// `KeepLocal` and `Replace` are queued as new local edits. `UseRemote`
/// drops the unsent local edits and adopts the remote copy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "choice", content = "draft", rename_all = "camelCase")]
pub enum Resolution {
    /// Keep the local copy and push it over the remote
    KeepLocal,
    /// Take the remote copy as the new local state
    UseRemote,
    /// Replace both with a hand-merged draft
    Replace(RecipeDraft),
}

/// Overwrite `record` with the remote copy.
///
/// A photo the remote links differently replaces the local one; the local
/// blob reference is dropped since remote photos are not downloaded.
pub fn adopt_remote(record: &mut RecipeRecord, remote: &RemoteRecipe) {
    record.title = remote.title.clone();
    record.ingredients = remote.ingredients.clone();
    record.steps = remote.steps.clone();
    record.location = remote.location;
    if remote.photo_url != record.photo_url {
        record.photo_ref = None;
        record.photo_url = remote.photo_url.clone();
    }
    record.remote_id = Some(remote.remote_id.clone());
    record.remote_version = Some(remote.updated_at);
    record.deleted = false;
}

/// What a pull should do with one remote record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PullDecision {
    /// Unknown locally, create a synced copy
    Insert,
    /// Nothing to do (stale, already seen, or an unknown tombstone)
    Ignore,
    /// Overwrite local data, nothing local is pending
    Apply,
    /// Remote deleted it and nothing local is pending
    Purge,
    /// Remote shows one of our own pending edits; only record its version
    Adopt,
    /// Remote moved on while local edits are unsent
    Conflict,
    /// Already conflicted; refresh the stored remote copy
    RefreshConflict,
}

/// Decide how a pull treats `remote` given the matching local record (if any)
/// and that record's pending change entries.
pub fn decide(
    local: Option<&RecipeRecord>,
    pending: &[ChangeEntry],
    remote: &RemoteRecipe,
) -> PullDecision {
    let Some(local) = local else {
        return if remote.deleted {
            PullDecision::Ignore
        } else {
            PullDecision::Insert
        };
    };

    if local.sync_state == SyncState::Conflict {
        return PullDecision::RefreshConflict;
    }

    if pending.is_empty() {
        if local
            .remote_version
            .is_some_and(|seen| seen >= remote.updated_at)
        {
            return PullDecision::Ignore;
        }
        return if remote.deleted {
            PullDecision::Purge
        } else {
            PullDecision::Apply
        };
    }

    if local.remote_version == Some(remote.updated_at) {
        return PullDecision::Ignore;
    }
    if is_echo(pending, remote) {
        return PullDecision::Adopt;
    }
    PullDecision::Conflict
}

/// Whether `remote` is the result of one of our own pending changes, e.g. a
/// delivery whose acknowledgement was lost.
fn is_echo(pending: &[ChangeEntry], remote: &RemoteRecipe) -> bool {
    pending.iter().any(|entry| match (entry.op, &entry.payload) {
        (OpKind::Delete, _) => remote.deleted,
        (_, Some(content)) => !remote.deleted && remote.matches_content(content),
        (_, None) => false,
    })
}

//! Pull phase: fetch remote changes page by page and reconcile them.

use super::{RetryState, SyncEngine, SyncReport};
use crate::book::{ChangeKind, RecipeBook};
use crate::change_log::now_millis;
use crate::reconcile::{adopt_remote, decide, ConflictReason, ConflictRecord, PullDecision};
use crate::remote::{RemoteApi, RemoteRecipe};
use crate::{error::Result, Error, RecipeDraft, RecipeRecord, SyncState};

pub(super) async fn run<R: RemoteApi>(engine: &SyncEngine<R>, report: &mut SyncReport) -> Result<()> {
    let book = engine.book.as_ref();
    let limit = engine.config.pull_page_size;

    loop {
        let cursor = book.cursor();
        let since = cursor.as_deref();
        let api = engine.remote.as_ref();
        let mut retry = RetryState::default();
        let page = engine
            .with_retry(&engine.config.retry, "pull", &mut retry, move || {
                api.pull(since, limit)
            })
            .await?;

        for remote in &page.recipes {
            report.pulled += 1;
            apply(book, remote, report)?;
        }
        // Only after the whole page is applied, so a crash replays it.
        if page.cursor.is_some() && page.cursor != cursor {
            book.save_cursor(page.cursor.clone())?;
        }
        tracing::debug!(
            received = page.recipes.len(),
            cursor = ?page.cursor,
            has_more = page.has_more,
            "pulled page"
        );
        if !page.has_more || page.recipes.is_empty() {
            return Ok(());
        }
    }
}

/// Reconcile one remote record under its recipe lock.
fn apply(book: &RecipeBook, remote: &RemoteRecipe, report: &mut SyncReport) -> Result<()> {
    let id = match book.find_for_remote(remote) {
        Some(local) => local.id.clone(),
        None => uuid::Uuid::new_v4().to_string(),
    };
    let guard = book.lock(&id);
    let local = book.store().get_including_deleted(&id);
    let pending = book.change_log().pending_for(&id);

    let decision = decide(local.as_deref(), &pending, remote);
    tracing::trace!(recipe_id = %id, remote_id = %remote.remote_id, ?decision, "reconciling");

    let outcome = match decision {
        PullDecision::Ignore => return Ok(()),
        PullDecision::Insert => {
            let mut record = RecipeRecord::new(id.clone(), RecipeDraft::new(&remote.title), book.tick());
            adopt_remote(&mut record, remote);
            record.sync_state = SyncState::Synced;
            book.commit(&guard, record, ChangeKind::Created).map(|_| ())
        }
        PullDecision::Apply => {
            let Some(local) = local else { return Ok(()) };
            let mut record = local.as_ref().clone();
            adopt_remote(&mut record, remote);
            record.touch(book.tick());
            record.sync_state = SyncState::Synced;
            book.commit(&guard, record, ChangeKind::Updated).map(|_| ())
        }
        PullDecision::Purge => book.purge(&guard),
        PullDecision::Adopt => {
            let Some(local) = local else { return Ok(()) };
            let mut record = local.as_ref().clone();
            record.remote_id = Some(remote.remote_id.clone());
            record.remote_version = Some(remote.updated_at);
            book.commit(&guard, record, ChangeKind::SyncStateChanged)
                .map(|_| ())
        }
        PullDecision::Conflict => {
            let Some(local) = local else { return Ok(()) };
            let conflict = ConflictRecord {
                recipe_id: id.clone(),
                local: local.as_ref().clone(),
                remote: Some(remote.clone()),
                reason: ConflictReason::Diverged,
                rejected_seq: None,
                detected_at: now_millis(),
            };
            report.conflicts += 1;
            return book
                .open_conflict(&guard, local.as_ref().clone(), conflict)
                .map(|_| ());
        }
        PullDecision::RefreshConflict => return book.refresh_conflict(&guard, remote),
    };

    match outcome {
        Ok(()) => {
            report.applied += 1;
            Ok(())
        }
        Err(Error::Validation { field, message }) => {
            // Another client wrote something this device cannot hold.
            tracing::warn!(
                remote_id = %remote.remote_id,
                %field,
                %message,
                "skipping remote recipe that fails validation"
            );
            report.skipped.push(remote.remote_id.clone());
            Ok(())
        }
        Err(e) => Err(e),
    }
}

//! Push phase: deliver pending change entries.
//!
//! Recipes are independent streams. Within one recipe entries go out in
//! sequence order, one request at a time, and are acknowledged only after
//! the remote confirms. A recipe that keeps failing transiently backs off on
//! its own schedule while the others proceed.

use super::{SyncEngine, SyncReport};
use crate::book::RecipeBook;
use crate::change_log::{now_millis, ChangeEntry, OpKind};
use crate::content_store::ContentStore;
use crate::reconcile::{ConflictReason, ConflictRecord};
use crate::remote::{RecipeBody, RemoteApi, RemoteError, RemoteRecipe, RemoteResult};
use crate::{
    error::Result, BlobRef, Error, RecipeContent, RecipeId, RemoteId, Sequence, SyncState,
};
use std::collections::HashSet;
use tokio::time::Instant;

/// One request's worth of entries for a single recipe.
#[derive(Debug, Clone, PartialEq)]
struct Batch {
    /// Highest sequence covered; acknowledged on success
    last_seq: Sequence,
    /// Photo reference of the content being sent
    photo_ref: Option<BlobRef>,
    request: Request,
}

#[derive(Debug, Clone, PartialEq)]
enum Request {
    Create(RecipeBody),
    Update { remote_id: RemoteId, body: RecipeBody },
    Delete { remote_id: RemoteId },
    /// Deleting a recipe the remote never saw
    DropLocal,
}

pub(super) async fn run<R: RemoteApi>(engine: &SyncEngine<R>, report: &mut SyncReport) -> Result<()> {
    let book = engine.book.as_ref();
    let policy = &engine.config.retry;
    let mut deferred: HashSet<RecipeId> = HashSet::new();

    loop {
        let candidates: Vec<RecipeId> = book
            .change_log()
            .recipes_with_pending()
            .into_iter()
            .filter(|id| !deferred.contains(id) && !in_conflict(book, id))
            .collect();
        if candidates.is_empty() {
            return Ok(());
        }

        let now = Instant::now();
        let (ready, waiting): (Vec<RecipeId>, Vec<RecipeId>) = {
            let retries = engine.retries.lock();
            candidates
                .into_iter()
                .partition(|id| retries.get(id).map_or(true, |s| s.is_eligible(now)))
        };

        if ready.is_empty() {
            let wake = {
                let retries = engine.retries.lock();
                waiting
                    .iter()
                    .filter_map(|id| retries.get(id).and_then(|s| s.next_eligible_at))
                    .min()
            };
            match wake {
                Some(at) => engine.sleep_until(at).await?,
                None => return Ok(()),
            }
            continue;
        }

        for id in ready {
            match push_recipe(engine, &id, report).await {
                Ok(()) => {
                    engine.retries.lock().remove(&id);
                }
                Err(Error::TransientNetwork(msg)) => {
                    let mut retries = engine.retries.lock();
                    let state = retries.entry(id.clone()).or_default();
                    if state.record_failure(policy, Instant::now(), msg.clone()) {
                        tracing::debug!(recipe_id = %id, attempt = state.attempts, error = %msg, "push failed, backing off");
                    } else {
                        tracing::warn!(recipe_id = %id, attempts = state.attempts, error = %msg, "push deferred to next cycle");
                        deferred.insert(id);
                        report.deferred += 1;
                    }
                }
                Err(e) => return Err(e),
            }
        }
    }
}

fn in_conflict(book: &RecipeBook, id: &str) -> bool {
    book.store()
        .get_including_deleted(id)
        .is_some_and(|r| r.sync_state == SyncState::Conflict)
}

/// Send the next batch of one recipe and apply the outcome.
async fn push_recipe<R: RemoteApi>(
    engine: &SyncEngine<R>,
    id: &str,
    report: &mut SyncReport,
) -> Result<()> {
    let book = engine.book.as_ref();
    let Some(batch) = plan(engine, id)? else {
        return Ok(());
    };
    let key = format!("{}-{}", book.device_id(), batch.last_seq);
    let api = engine.remote.as_ref();

    match &batch.request {
        Request::Create(body) => {
            let result = engine.call(api.create_recipe(&key, body)).await;
            settle_write(book, id, &batch, result, report)
        }
        Request::Update { remote_id, body } => {
            let result = engine.call(api.update_recipe(&key, remote_id, body)).await;
            settle_write(book, id, &batch, result, report)
        }
        Request::Delete { remote_id } => {
            match engine.call(api.delete_recipe(&key, remote_id)).await {
                // Already gone remotely counts as delivered.
                Ok(()) | Err(RemoteError::NotFound) => {
                    report.pushed += 1;
                    finish_delete(book, id, &batch, report)
                }
                Err(e) => settle_failure(book, id, &batch, e, report),
            }
        }
        Request::DropLocal => finish_delete(book, id, &batch, report),
    }
}

/// Work out the next request for a recipe from its pending entries.
fn plan<R: RemoteApi>(engine: &SyncEngine<R>, id: &str) -> Result<Option<Batch>> {
    let book = engine.book.as_ref();
    let _guard = book.lock(id);
    let pending = book.change_log().pending_for(id);
    let Some(first) = pending.first() else {
        return Ok(None);
    };

    let Some(record) = book.store().get_including_deleted(id) else {
        let dropped = book.change_log().acknowledge(id, Sequence::MAX)?;
        tracing::warn!(recipe_id = id, dropped, "dropping changes of a purged recipe");
        return Ok(None);
    };
    if record.sync_state == SyncState::Conflict {
        return Ok(None);
    }

    if first.op == OpKind::Delete {
        let request = match &record.remote_id {
            Some(remote_id) => Request::Delete {
                remote_id: remote_id.clone(),
            },
            None => Request::DropLocal,
        };
        return Ok(Some(Batch {
            last_seq: first.seq,
            photo_ref: None,
            request,
        }));
    }

    let last = if first.op == OpKind::Create || !engine.config.coalesce_updates {
        first
    } else {
        coalesce(&pending, engine.config.push_batch_size)
    };
    let content = last.payload.clone().unwrap_or_else(|| record.content());
    let body = RecipeBody::from_content(id, &content, photo_url_for(book.store(), &content));
    // A create whose response was lost may already have a remote id.
    let request = match &record.remote_id {
        Some(remote_id) => Request::Update {
            remote_id: remote_id.clone(),
            body,
        },
        None => Request::Create(body),
    };
    Ok(Some(Batch {
        last_seq: last.seq,
        photo_ref: content.photo_ref,
        request,
    }))
}

/// Last entry of the leading run of replacement entries. Each carries the
/// full content, so only the newest needs sending.
fn coalesce(pending: &[ChangeEntry], max: usize) -> &ChangeEntry {
    let run = pending
        .iter()
        .take(max.max(1))
        .take_while(|e| e.op.is_replacement())
        .count()
        .max(1);
    &pending[run - 1]
}

/// URL to send for the photo of `content`: the uploaded blob if there is
/// one, otherwise whatever link the content already had.
fn photo_url_for(store: &ContentStore, content: &RecipeContent) -> Option<String> {
    content
        .photo_ref
        .as_deref()
        .and_then(|blob_ref| store.uploaded_url(blob_ref))
        .or_else(|| content.photo_url.clone())
}

fn settle_write(
    book: &RecipeBook,
    id: &str,
    batch: &Batch,
    result: RemoteResult<RemoteRecipe>,
    report: &mut SyncReport,
) -> Result<()> {
    let remote = match result {
        Ok(remote) => remote,
        Err(e) => return settle_failure(book, id, batch, e, report),
    };

    let guard = book.lock(id);
    let acknowledged = book.change_log().acknowledge(id, batch.last_seq)?;
    report.pushed += 1;
    report.acknowledged += acknowledged;

    let Some(current) = book.store().get_including_deleted(id) else {
        return Ok(());
    };
    let mut record = current.as_ref().clone();
    record.remote_id = Some(remote.remote_id.clone());
    record.remote_version = Some(
        record
            .remote_version
            .map_or(remote.updated_at, |seen| seen.max(remote.updated_at)),
    );
    if record.photo_ref == batch.photo_ref {
        record.photo_url = remote.photo_url.clone();
    }
    if record.sync_state != SyncState::Conflict {
        record.sync_state = if book.change_log().has_pending(id) {
            SyncState::Pending
        } else {
            SyncState::Synced
        };
    }
    book.commit(&guard, record, crate::book::ChangeKind::SyncStateChanged)?;
    tracing::debug!(recipe_id = id, remote_id = %remote.remote_id, acknowledged, "pushed");
    Ok(())
}

fn finish_delete(book: &RecipeBook, id: &str, batch: &Batch, report: &mut SyncReport) -> Result<()> {
    let guard = book.lock(id);
    report.acknowledged += book.change_log().acknowledge(id, batch.last_seq)?;
    if !book.change_log().has_pending(id) {
        book.purge(&guard)?;
    }
    Ok(())
}

fn settle_failure(
    book: &RecipeBook,
    id: &str,
    batch: &Batch,
    error: RemoteError,
    report: &mut SyncReport,
) -> Result<()> {
    let (status, message) = match error {
        RemoteError::Transient(msg) => return Err(Error::TransientNetwork(msg)),
        RemoteError::Cancelled => return Err(Error::Cancelled),
        RemoteError::NotFound => (404, "remote record not found".to_string()),
        RemoteError::Rejected { status, message } => (status, message),
    };

    let guard = book.lock(id);
    let Some(current) = book.store().get_including_deleted(id) else {
        return Ok(());
    };
    let conflict = ConflictRecord {
        recipe_id: id.to_string(),
        local: current.as_ref().clone(),
        remote: None,
        reason: ConflictReason::Rejected { status, message },
        rejected_seq: Some(batch.last_seq),
        detected_at: now_millis(),
    };
    book.open_conflict(&guard, current.as_ref().clone(), conflict)?;
    report.conflicts += 1;
    Ok(())
}

//! Media phase: upload pending photo blobs, then queue the updates that link
//! them to their recipes remotely.
//!
//! Uploads are tracked per blob and never block text changes: a recipe can
//! reach Synced while its photo is still waiting.

use super::{RetryState, SyncEngine, SyncReport};
use crate::book::RecipeBook;
use crate::remote::{RemoteApi, RemoteError};
use crate::{error::Result, Error, RecipeId, RecipeRecord, SyncState};

pub(super) async fn run<R: RemoteApi>(engine: &SyncEngine<R>, report: &mut SyncReport) -> Result<()> {
    let book = engine.book.as_ref();
    let store = book.store();

    for blob in store.pending_blobs() {
        let bytes = match store.blob_bytes(&blob.blob_ref) {
            Ok(bytes) => bytes,
            // Released since the listing was taken.
            Err(Error::BlobNotFound(_)) => continue,
            Err(e) => return Err(e),
        };

        let api = engine.remote.as_ref();
        let (blob_ref, meta, data) = (blob.blob_ref.as_str(), &blob, bytes.as_slice());
        let mut retry = RetryState::default();
        let result = engine
            .with_retry(&engine.config.media_retry, "upload media", &mut retry, move || {
                api.upload_media(blob_ref, meta, data)
            })
            .await;

        match result {
            Ok(url) => {
                if store.mark_blob_uploaded(blob_ref, &url)? {
                    report.uploaded_media += 1;
                    tracing::debug!(blob_ref, %url, "photo uploaded");
                }
            }
            Err(RemoteError::Cancelled) => return Err(Error::Cancelled),
            Err(RemoteError::Transient(msg)) => {
                tracing::warn!(blob_ref, attempts = retry.attempts, error = %msg, "photo upload deferred");
                report.deferred_media += 1;
            }
            Err(e) => {
                tracing::warn!(blob_ref, error = %e, "photo upload refused");
            }
        }
        if retry.attempts > 0 {
            engine.media_retries.lock().insert(blob.blob_ref.clone(), retry);
        }
    }

    let linked = link_uploaded_photos(book)?;
    if linked > 0 {
        tracing::debug!(linked, "queued photo links");
    }
    Ok(())
}

/// Queue an AttachPhoto entry for every settled recipe whose photo is now
/// uploaded but not yet linked remotely.
fn link_uploaded_photos(book: &RecipeBook) -> Result<usize> {
    let candidates: Vec<RecipeId> = book
        .list_all()
        .iter()
        .filter(|record| needs_link(book, record))
        .map(|record| record.id.clone())
        .collect();

    let mut linked = 0;
    for id in candidates {
        let guard = book.lock(&id);
        let Some(record) = book.store().get_including_deleted(&id) else {
            continue;
        };
        if needs_link(book, &record) {
            book.queue_photo_link(&guard, &record)?;
            linked += 1;
        }
    }
    Ok(linked)
}

/// Recipes with queued entries pick the URL up when those are pushed.
fn needs_link(book: &RecipeBook, record: &RecipeRecord) -> bool {
    if !record.is_active()
        || record.sync_state == SyncState::Conflict
        || book.change_log().has_pending(&record.id)
    {
        return false;
    }
    match record
        .photo_ref
        .as_deref()
        .and_then(|blob_ref| book.store().uploaded_url(blob_ref))
    {
        Some(url) => record.photo_url.as_deref() != Some(url.as_str()),
        None => false,
    }
}

//! Media handlers: content-addressed photo upload and download.

use crate::config::Config;
use crate::db::{self, StoredMedia};
use crate::error::{AppError, Result};
use axum::body::Bytes;
use recipebox_engine::media::content_ref;
use recipebox_engine::remote::MediaUploaded;
use sqlx::PgPool;
use std::io;

const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// Bytes and type of a stored blob.
#[derive(Debug)]
pub struct MediaFile {
    pub content_type: String,
    pub bytes: Vec<u8>,
}

/// Only content hashes address media.
pub fn is_blob_ref(candidate: &str) -> bool {
    candidate.len() == 64
        && candidate
            .chars()
            .all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c))
}

/// Store uploaded bytes under their content hash.
pub async fn handle_upload(
    pool: &PgPool,
    config: &Config,
    content_type: Option<&str>,
    bytes: Bytes,
) -> Result<MediaUploaded> {
    if bytes.is_empty() {
        return Err(AppError::BadRequest("empty upload".to_string()));
    }
    let blob_ref = content_ref(&bytes);
    let path = config.media_dir.join(&blob_ref);

    if !tokio::fs::try_exists(&path).await? {
        tokio::fs::create_dir_all(&config.media_dir).await?;
        let tmp = config.media_dir.join(format!("{}.{}.tmp", blob_ref, uuid::Uuid::new_v4()));
        tokio::fs::write(&tmp, &bytes).await?;
        tokio::fs::rename(&tmp, &path).await?;
    }

    let media = StoredMedia {
        blob_ref: blob_ref.clone(),
        content_type: content_type.unwrap_or(DEFAULT_CONTENT_TYPE).to_string(),
        len: bytes.len() as i64,
    };
    db::insert_media(pool, &media).await?;
    tracing::info!(blob_ref = %blob_ref, len = media.len, "media stored");

    Ok(MediaUploaded {
        url: config.media_url(&blob_ref),
        blob_ref,
    })
}

/// Load a stored blob.
pub async fn handle_download(pool: &PgPool, config: &Config, blob_ref: &str) -> Result<MediaFile> {
    let not_found = || AppError::NotFound(format!("media {}", blob_ref));
    if !is_blob_ref(blob_ref) {
        return Err(not_found());
    }
    let media = db::get_media(pool, blob_ref).await?.ok_or_else(not_found)?;

    let bytes = match tokio::fs::read(config.media_dir.join(blob_ref)).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            tracing::warn!(blob_ref, "media row without bytes");
            return Err(not_found());
        }
        Err(e) => return Err(e.into()),
    };
    Ok(MediaFile {
        content_type: media.content_type,
        bytes,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blob_refs_are_lowercase_sha256_hex() {
        assert!(is_blob_ref(&content_ref(b"photo")));
        assert!(!is_blob_ref("../etc/passwd"));
        assert!(!is_blob_ref(&content_ref(b"photo").to_uppercase()));
        assert!(!is_blob_ref("abc"));
    }
}

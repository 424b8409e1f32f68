//! Database operations for uploaded media.

use sqlx::{PgPool, Row};

/// Metadata of an uploaded blob. The bytes live under `MEDIA_DIR`.
#[derive(Debug, Clone)]
pub struct StoredMedia {
    pub blob_ref: String,
    pub content_type: String,
    pub len: i64,
}

impl<'r> sqlx::FromRow<'r, sqlx::postgres::PgRow> for StoredMedia {
    fn from_row(row: &'r sqlx::postgres::PgRow) -> Result<Self, sqlx::Error> {
        Ok(StoredMedia {
            blob_ref: row.try_get("ref")?,
            content_type: row.try_get("content_type")?,
            len: row.try_get("len")?,
        })
    }
}

/// Record an upload. Re-uploading the same content is a no-op.
pub async fn insert_media(pool: &PgPool, media: &StoredMedia) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO media (ref, content_type, len)
        VALUES ($1, $2, $3)
        ON CONFLICT (ref) DO NOTHING
        "#,
    )
    .bind(&media.blob_ref)
    .bind(&media.content_type)
    .bind(media.len)
    .execute(pool)
    .await?;
    Ok(())
}

/// Get blob metadata by content reference.
pub async fn get_media(pool: &PgPool, blob_ref: &str) -> Result<Option<StoredMedia>, sqlx::Error> {
    sqlx::query_as::<_, StoredMedia>("SELECT ref, content_type, len FROM media WHERE ref = $1")
        .bind(blob_ref)
        .fetch_optional(pool)
        .await
}

//! Stored responses of idempotent writes.

use sqlx::{PgConnection, Row};

/// The response first returned for an idempotency key.
#[derive(Debug, Clone)]
pub struct StoredReplay {
    pub status: u16,
    pub response: serde_json::Value,
}

/// Look up the replay stored for `key`, if any.
pub async fn find_replay(
    conn: &mut PgConnection,
    key: &str,
) -> Result<Option<StoredReplay>, sqlx::Error> {
    let row = sqlx::query("SELECT status, response FROM idempotency_keys WHERE key = $1")
        .bind(key)
        .fetch_optional(conn)
        .await?;

    row.map(|row| -> Result<StoredReplay, sqlx::Error> {
        let status: i16 = row.try_get("status")?;
        Ok(StoredReplay {
            status: status as u16,
            response: row.try_get("response")?,
        })
    })
    .transpose()
}

/// Remember the response for `key`. Must run in the same transaction as the
/// write it describes.
pub async fn save_replay(
    conn: &mut PgConnection,
    key: &str,
    replay: &StoredReplay,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO idempotency_keys (key, status, response)
        VALUES ($1, $2, $3)
        ON CONFLICT (key) DO NOTHING
        "#,
    )
    .bind(key)
    .bind(replay.status as i16)
    .bind(&replay.response)
    .execute(conn)
    .await?;
    Ok(())
}

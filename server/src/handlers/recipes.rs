//! Recipe handlers: writes with idempotent replay, and the pull feed.
//!
//! Every write runs in one transaction that takes the version lock, checks
//! for a stored replay, applies the change and stores its response under the
//! idempotency key.

use crate::db::{self, Deleted, StoredReplay};
use crate::error::{AppError, Result};
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use recipebox_engine::{PullPage, RecipeBody, RecipeDraft};
use serde::Deserialize;
use sqlx::{PgConnection, PgPool};

/// Query parameters for pull.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PullQuery {
    /// Cursor from the previous page (absent for an initial pull)
    pub since: Option<String>,
    /// Maximum number of recipes to return
    pub limit: Option<i64>,
}

/// Default page size for pull.
const DEFAULT_LIMIT: i64 = 100;

/// Maximum page size for pull.
const MAX_LIMIT: i64 = 1000;

/// Result of a write, in the form it is replayed.
#[derive(Debug, Clone)]
pub struct WriteOutcome {
    pub status: StatusCode,
    pub body: serde_json::Value,
}

impl WriteOutcome {
    fn json<T: serde::Serialize>(status: StatusCode, body: &T) -> Result<Self> {
        Ok(Self {
            status,
            body: serde_json::to_value(body)?,
        })
    }

    fn no_content() -> Self {
        Self {
            status: StatusCode::NO_CONTENT,
            body: serde_json::Value::Null,
        }
    }
}

impl IntoResponse for WriteOutcome {
    fn into_response(self) -> Response {
        if self.status == StatusCode::NO_CONTENT {
            return self.status.into_response();
        }
        (self.status, Json(self.body)).into_response()
    }
}

/// Reject bodies a client could never have produced from a valid draft.
pub fn validate_body(body: &RecipeBody) -> Result<()> {
    RecipeDraft::new(body.title.clone())
        .with_ingredients(body.ingredients.iter().cloned())
        .with_steps(body.steps.iter().cloned())
        .validate()?;
    if let Some(location) = &body.location {
        location.validate()?;
    }
    Ok(())
}

async fn replay(conn: &mut PgConnection, key: Option<&str>) -> Result<Option<WriteOutcome>> {
    let Some(key) = key else {
        return Ok(None);
    };
    let Some(stored) = db::find_replay(conn, key).await? else {
        return Ok(None);
    };
    tracing::debug!(key, status = stored.status, "replaying idempotent write");
    let status = StatusCode::from_u16(stored.status)
        .map_err(|_| AppError::BadRequest(format!("stored status {} is invalid", stored.status)))?;
    Ok(Some(WriteOutcome {
        status,
        body: stored.response,
    }))
}

async fn remember(conn: &mut PgConnection, key: Option<&str>, outcome: &WriteOutcome) -> Result<()> {
    if let Some(key) = key {
        let replay = StoredReplay {
            status: outcome.status.as_u16(),
            response: outcome.body.clone(),
        };
        db::save_replay(conn, key, &replay).await?;
    }
    Ok(())
}

/// Create a recipe.
pub async fn handle_create(
    pool: &PgPool,
    key: Option<&str>,
    body: RecipeBody,
) -> Result<WriteOutcome> {
    validate_body(&body)?;

    let mut tx = pool.begin().await?;
    db::lock_versions(&mut tx).await?;
    if let Some(outcome) = replay(&mut tx, key).await? {
        return Ok(outcome);
    }

    let id = uuid::Uuid::new_v4().to_string();
    let stored = db::insert_recipe(&mut tx, &id, &body).await?;
    let outcome = WriteOutcome::json(StatusCode::CREATED, &stored.to_remote()?)?;
    remember(&mut tx, key, &outcome).await?;
    tx.commit().await?;

    tracing::info!(remote_id = %id, client_id = %body.client_id, version = stored.version, "recipe created");
    Ok(outcome)
}

/// Replace the content of a recipe.
pub async fn handle_update(
    pool: &PgPool,
    key: Option<&str>,
    id: &str,
    body: RecipeBody,
) -> Result<WriteOutcome> {
    validate_body(&body)?;

    let mut tx = pool.begin().await?;
    db::lock_versions(&mut tx).await?;
    if let Some(outcome) = replay(&mut tx, key).await? {
        return Ok(outcome);
    }

    let stored = db::update_recipe(&mut tx, id, &body)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("recipe {}", id)))?;
    let outcome = WriteOutcome::json(StatusCode::OK, &stored.to_remote()?)?;
    remember(&mut tx, key, &outcome).await?;
    tx.commit().await?;

    tracing::info!(remote_id = id, version = stored.version, "recipe updated");
    Ok(outcome)
}

/// Delete a recipe, leaving a tombstone for pull.
pub async fn handle_delete(pool: &PgPool, key: Option<&str>, id: &str) -> Result<WriteOutcome> {
    let mut tx = pool.begin().await?;
    db::lock_versions(&mut tx).await?;
    if let Some(outcome) = replay(&mut tx, key).await? {
        return Ok(outcome);
    }

    match db::delete_recipe(&mut tx, id).await? {
        Deleted::Missing => return Err(AppError::NotFound(format!("recipe {}", id))),
        Deleted::Already => tracing::debug!(remote_id = id, "recipe already deleted"),
        Deleted::Now => tracing::info!(remote_id = id, "recipe deleted"),
    }
    let outcome = WriteOutcome::no_content();
    remember(&mut tx, key, &outcome).await?;
    tx.commit().await?;
    Ok(outcome)
}

/// Parse a pull cursor; absent or empty means "from the beginning".
pub fn parse_cursor(since: Option<&str>) -> Result<i64> {
    match since.map(str::trim).filter(|s| !s.is_empty()) {
        None => Ok(0),
        Some(raw) => raw
            .parse::<i64>()
            .ok()
            .filter(|v| *v >= 0)
            .ok_or_else(|| AppError::BadRequest(format!("invalid cursor '{}'", raw))),
    }
}

/// Serve one page of recipes changed after the cursor.
pub async fn handle_pull(pool: &PgPool, query: PullQuery) -> Result<PullPage> {
    let since = parse_cursor(query.since.as_deref())?;
    let limit = query
        .limit
        .map(|l| l.clamp(1, MAX_LIMIT))
        .unwrap_or(DEFAULT_LIMIT);

    // Fetch one more than requested to check if there are more
    let mut stored = db::recipes_since(pool, since, limit + 1).await?;
    let has_more = stored.len() as i64 > limit;
    stored.truncate(limit as usize);

    let recipes = stored
        .iter()
        .map(|row| row.to_remote())
        .collect::<std::result::Result<Vec<_>, _>>()?;
    let cursor = stored
        .last()
        .map(|row| row.version)
        .unwrap_or(since)
        .to_string();

    Ok(PullPage {
        recipes,
        cursor: Some(cursor),
        has_more,
    })
}

//! Recipe endpoint routes.

use axum::{
    extract::{Path, Query, State},
    http::HeaderMap,
    routing::{get, patch},
    Json, Router,
};
use recipebox_engine::{PullPage, RecipeBody};

use crate::auth::AuthUser;
use crate::error::Result;
use crate::handlers::{
    handle_create, handle_delete, handle_pull, handle_update, idempotency_key, PullQuery,
    WriteOutcome,
};
use crate::AppState;

/// Create recipe routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/recipes", get(pull_handler).post(create_handler))
        .route("/recipes/{id}", patch(update_handler).delete(delete_handler))
}

/// GET /recipes - Recipes changed since a cursor.
async fn pull_handler(
    State(state): State<AppState>,
    _auth: AuthUser,
    Query(query): Query<PullQuery>,
) -> Result<Json<PullPage>> {
    let page = handle_pull(&state.pool, query).await?;
    Ok(Json(page))
}

/// POST /recipes - Create a recipe.
async fn create_handler(
    State(state): State<AppState>,
    _auth: AuthUser,
    headers: HeaderMap,
    Json(body): Json<RecipeBody>,
) -> Result<WriteOutcome> {
    let key = idempotency_key(&headers)?;
    handle_create(&state.pool, key.as_deref(), body).await
}

/// PATCH /recipes/{id} - Replace a recipe's content.
async fn update_handler(
    State(state): State<AppState>,
    _auth: AuthUser,
    Path(id): Path<String>,
    headers: HeaderMap,
    Json(body): Json<RecipeBody>,
) -> Result<WriteOutcome> {
    let key = idempotency_key(&headers)?;
    handle_update(&state.pool, key.as_deref(), &id, body).await
}

/// DELETE /recipes/{id} - Delete a recipe.
async fn delete_handler(
    State(state): State<AppState>,
    _auth: AuthUser,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<WriteOutcome> {
    let key = idempotency_key(&headers)?;
    handle_delete(&state.pool, key.as_deref(), &id).await
}

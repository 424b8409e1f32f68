//! Media endpoint routes.

use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, Path, State},
    http::{header::CONTENT_TYPE, HeaderMap},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use recipebox_engine::remote::MediaUploaded;

use crate::auth::AuthUser;
use crate::error::Result;
use crate::handlers::{handle_download, handle_upload};
use crate::AppState;

/// Create media routes.
pub fn routes(max_bytes: usize) -> Router<AppState> {
    Router::new()
        .route("/media", post(upload_handler))
        .route("/media/{blob_ref}", get(download_handler))
        .layer(DefaultBodyLimit::max(max_bytes))
}

/// POST /media - Upload photo bytes.
async fn upload_handler(
    State(state): State<AppState>,
    _auth: AuthUser,
    headers: HeaderMap,
    bytes: Bytes,
) -> Result<Json<MediaUploaded>> {
    let content_type = headers.get(CONTENT_TYPE).and_then(|v| v.to_str().ok());
    let uploaded = handle_upload(&state.pool, &state.config, content_type, bytes).await?;
    Ok(Json(uploaded))
}

/// GET /media/{ref} - Serve stored photo bytes.
async fn download_handler(
    State(state): State<AppState>,
    Path(blob_ref): Path<String>,
) -> Result<impl IntoResponse> {
    let file = handle_download(&state.pool, &state.config, &blob_ref).await?;
    Ok(([(CONTENT_TYPE, file.content_type)], file.bytes))
}

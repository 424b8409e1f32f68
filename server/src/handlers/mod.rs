//! Request handlers for the recipe service.

mod media;
mod recipes;

pub use media::*;
pub use recipes::*;

use crate::error::{AppError, Result};
use axum::http::HeaderMap;
use recipebox_engine::remote::IDEMPOTENCY_HEADER;

/// Longest idempotency key accepted.
const MAX_KEY_LEN: usize = 255;

/// Read the optional idempotency key of a write.
pub fn idempotency_key(headers: &HeaderMap) -> Result<Option<String>> {
    let Some(value) = headers.get(IDEMPOTENCY_HEADER) else {
        return Ok(None);
    };
    let key = value
        .to_str()
        .map_err(|_| AppError::BadRequest("idempotency key must be ASCII".to_string()))?
        .trim();
    if key.is_empty() || key.len() > MAX_KEY_LEN {
        return Err(AppError::BadRequest(format!(
            "idempotency key must be 1 to {} characters",
            MAX_KEY_LEN
        )));
    }
    Ok(Some(key.to_string()))
}

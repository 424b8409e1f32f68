//! Unified error handling for the server.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

/// Application error type.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Engine error: {0}")]
    Engine(#[from] recipebox_engine::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error("Not found: {0}")]
    NotFound(String),
}

/// Error response body.
#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<String>,
}

impl AppError {
    fn status(&self) -> StatusCode {
        match self {
            AppError::Database(_)
            | AppError::Io(_)
            | AppError::Serialization(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Engine(recipebox_engine::Error::Validation { .. }) => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            AppError::Engine(_) | AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let (error_message, details) = match &self {
            AppError::Database(e) => {
                tracing::error!("Database error: {:?}", e);
                ("Database error".to_string(), None)
            }
            AppError::Io(e) => {
                tracing::error!("I/O error: {:?}", e);
                ("Storage error".to_string(), None)
            }
            AppError::Serialization(e) => {
                tracing::error!("Serialization error: {:?}", e);
                ("Corrupt stored data".to_string(), None)
            }
            AppError::Engine(e) => {
                tracing::warn!("Rejected recipe: {}", e);
                let field = match e {
                    recipebox_engine::Error::Validation { field, .. } => Some(field.clone()),
                    _ => None,
                };
                (e.to_string(), field)
            }
            AppError::BadRequest(msg) | AppError::NotFound(msg) => (msg.clone(), None),
        };

        let body = Json(ErrorResponse {
            error: error_message,
            details,
        });

        (status, body).into_response()
    }
}

/// Result type alias for handlers.
pub type Result<T> = std::result::Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_maps_to_unprocessable() {
        let err = AppError::from(recipebox_engine::Error::validation("title", "must not be empty"));
        assert_eq!(err.status(), StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[test]
    fn client_and_server_errors_are_told_apart() {
        assert_eq!(
            AppError::BadRequest("bad cursor".into()).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            AppError::NotFound("r1".into()).status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            AppError::Io(std::io::Error::other("disk full")).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}

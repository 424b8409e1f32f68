//! Error types for the Recipebox engine.

use crate::{BlobRef, RecipeId};
use thiserror::Error;

/// All possible errors from the Recipebox engine.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    // Input errors, raised before any mutation
    #[error("validation failed for '{field}': {message}")]
    Validation { field: String, message: String },

    #[error("recipe not found: {0}")]
    NotFound(RecipeId),

    #[error("media blob not found: {0}")]
    BlobNotFound(BlobRef),

    // Remote errors
    #[error("transient network error: {0}")]
    TransientNetwork(String),

    #[error("remote rejected request ({status}): {message}")]
    PermanentRemote { status: u16, message: String },

    #[error("operation cancelled")]
    Cancelled,

    // State errors
    #[error("integrity check failed: {0}")]
    Integrity(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("recipe {0} has an unresolved conflict")]
    ConflictPending(RecipeId),
}

impl Error {
    /// Create a validation error for a field.
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Whether the failed call may succeed if attempted again unchanged.
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::TransientNetwork(_))
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Storage(e.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = Error::NotFound("r-1".into());
        assert_eq!(err.to_string(), "recipe not found: r-1");

        let err = Error::validation("title", "must not be empty");
        assert_eq!(
            err.to_string(),
            "validation failed for 'title': must not be empty"
        );

        let err = Error::PermanentRemote {
            status: 422,
            message: "title too long".into(),
        };
        assert_eq!(
            err.to_string(),
            "remote rejected request (422): title too long"
        );
    }

    #[test]
    fn only_network_errors_are_transient() {
        assert!(Error::TransientNetwork("reset".into()).is_transient());
        assert!(!Error::Cancelled.is_transient());
        assert!(!Error::PermanentRemote {
            status: 400,
            message: String::new()
        }
        .is_transient());
    }

    #[test]
    fn io_errors_become_storage_errors() {
        let io = std::io::Error::new(std::io::ErrorKind::Other, "disk full");
        assert_eq!(Error::from(io), Error::Storage("disk full".into()));
    }
}

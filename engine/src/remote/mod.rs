//! The remote recipe service as seen by the sync engine.
//!
//! [`RemoteApi`] is the seam between the engine and the network. The wire
//! types here are shared with the reference server so both sides agree on
//! the JSON shape.

mod http;
mod memory;

pub use http::{HttpRemote, HttpRemoteConfig, IDEMPOTENCY_HEADER};
pub use memory::{FailOn, MemoryRemote, RemoteCall};

use crate::{Error, Location, MediaBlob, RecipeContent, RemoteId};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Body of a create or update request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecipeBody {
    /// Local id of the originating record
    pub client_id: String,
    pub title: String,
    #[serde(default)]
    pub ingredients: Vec<String>,
    #[serde(default)]
    pub steps: Vec<String>,
    #[serde(default)]
    pub location: Option<Location>,
    #[serde(default)]
    pub photo_url: Option<String>,
}

impl RecipeBody {
    /// Build a body from a change payload, with the photo already resolved to
    /// its uploaded URL.
    pub fn from_content(
        client_id: impl Into<String>,
        content: &RecipeContent,
        photo_url: Option<String>,
    ) -> Self {
        Self {
            client_id: client_id.into(),
            title: content.title.clone(),
            ingredients: content.ingredients.clone(),
            steps: content.steps.clone(),
            location: content.location,
            photo_url,
        }
    }
}

/// A recipe as stored by the remote.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteRecipe {
    pub remote_id: RemoteId,
    #[serde(default)]
    pub client_id: Option<String>,
    pub title: String,
    #[serde(default)]
    pub ingredients: Vec<String>,
    #[serde(default)]
    pub steps: Vec<String>,
    #[serde(default)]
    pub location: Option<Location>,
    #[serde(default)]
    pub photo_url: Option<String>,
    /// Server-assigned version, strictly increasing across all writes
    pub updated_at: u64,
    #[serde(default)]
    pub deleted: bool,
}

impl RemoteRecipe {
    /// Whether the remote text fields and location equal `content`.
    pub fn matches_content(&self, content: &RecipeContent) -> bool {
        self.title == content.title
            && self.ingredients == content.ingredients
            && self.steps == content.steps
            && self.location == content.location
    }
}

/// One page of a pull.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PullPage {
    pub recipes: Vec<RemoteRecipe>,
    /// Cursor to resume from; persisted after the page is applied
    #[serde(default)]
    pub cursor: Option<String>,
    #[serde(default)]
    pub has_more: bool,
}

/// Response to a media upload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaUploaded {
    #[serde(rename = "ref")]
    pub blob_ref: String,
    pub url: String,
}

/// Errors returned by a [`RemoteApi`].
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RemoteError {
    /// Timeout, connection failure, throttling or server error; retry later
    #[error("transient: {0}")]
    Transient(String),

    /// The remote refused the request; retrying unchanged will not help
    #[error("rejected ({status}): {message}")]
    Rejected { status: u16, message: String },

    /// The addressed remote record does not exist
    #[error("remote record not found")]
    NotFound,

    #[error("request cancelled")]
    Cancelled,
}

impl RemoteError {
    pub fn is_transient(&self) -> bool {
        matches!(self, RemoteError::Transient(_))
    }
}

impl From<RemoteError> for Error {
    fn from(e: RemoteError) -> Self {
        match e {
            RemoteError::Transient(msg) => Error::TransientNetwork(msg),
            RemoteError::Rejected { status, message } => Error::PermanentRemote { status, message },
            RemoteError::NotFound => Error::PermanentRemote {
                status: 404,
                message: "remote record not found".into(),
            },
            RemoteError::Cancelled => Error::Cancelled,
        }
    }
}

pub type RemoteResult<T> = std::result::Result<T, RemoteError>;

/// Operations the sync engine needs from the remote service.
///
/// Every write carries an idempotency key; repeating a write with the same
/// key must not apply it twice.
#[async_trait]
pub trait RemoteApi: Send + Sync {
    async fn create_recipe(&self, key: &str, body: &RecipeBody) -> RemoteResult<RemoteRecipe>;

    async fn update_recipe(
        &self,
        key: &str,
        remote_id: &str,
        body: &RecipeBody,
    ) -> RemoteResult<RemoteRecipe>;

    async fn delete_recipe(&self, key: &str, remote_id: &str) -> RemoteResult<()>;

    /// Records changed after `since`, oldest first.
    async fn pull(&self, since: Option<&str>, limit: usize) -> RemoteResult<PullPage>;

    /// Upload blob bytes, returning the URL the remote serves them at.
    async fn upload_media(&self, key: &str, blob: &MediaBlob, bytes: &[u8])
        -> RemoteResult<String>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remote_recipe_wire_format() {
        let json = r#"{
            "remoteId": "r1",
            "clientId": "rec-1",
            "title": "Pasta",
            "ingredients": ["spaghetti"],
            "updatedAt": 4
        }"#;
        let recipe: RemoteRecipe = serde_json::from_str(json).unwrap();
        assert_eq!(recipe.remote_id, "r1");
        assert!(recipe.steps.is_empty());
        assert!(!recipe.deleted);
        assert_eq!(recipe.updated_at, 4);
    }

    #[test]
    fn content_match_ignores_photo() {
        let content = RecipeContent {
            title: "Pasta".into(),
            ingredients: vec!["spaghetti".into()],
            steps: vec![],
            photo_ref: Some("abc".into()),
            location: None,
            photo_url: None,
        };
        let remote = RemoteRecipe {
            remote_id: "r1".into(),
            client_id: None,
            title: "Pasta".into(),
            ingredients: vec!["spaghetti".into()],
            steps: vec![],
            location: None,
            photo_url: None,
            updated_at: 1,
            deleted: false,
        };
        assert!(remote.matches_content(&content));
    }

    #[test]
    fn remote_errors_map_to_engine_errors() {
        assert!(Error::from(RemoteError::Transient("timeout".into())).is_transient());
        assert_eq!(
            Error::from(RemoteError::Rejected {
                status: 422,
                message: "bad".into()
            }),
            Error::PermanentRemote {
                status: 422,
                message: "bad".into()
            }
        );
        assert_eq!(Error::from(RemoteError::Cancelled), Error::Cancelled);
    }
}

//! Media blobs attached to recipes.
//!
//! Blobs are addressed by the SHA-256 of their bytes, so attaching the same
//! capture twice yields one blob with two references.

use crate::{BlobRef, Timestamp};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Upload progress of a blob, independent of the recipe text sync.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "lowercase")]
pub enum UploadState {
    /// Bytes only exist on this device
    Pending,
    /// Remote accepted the bytes and serves them at `url`
    Uploaded { url: String },
}

/// Metadata for a stored blob. The bytes live beside it in the backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaBlob {
    /// Content hash, lowercase hex
    #[serde(rename = "ref")]
    pub blob_ref: BlobRef,
    pub content_type: String,
    pub len: u64,
    /// Capture time reported by the camera subsystem (millis since epoch)
    pub captured_at: Timestamp,
    pub upload_state: UploadState,
}

impl MediaBlob {
    /// Describe a freshly captured blob.
    pub fn new(bytes: &[u8], content_type: impl Into<String>, captured_at: Timestamp) -> Self {
        Self {
            blob_ref: content_ref(bytes),
            content_type: content_type.into(),
            len: bytes.len() as u64,
            captured_at,
            upload_state: UploadState::Pending,
        }
    }

    pub fn uploaded_url(&self) -> Option<&str> {
        match &self.upload_state {
            UploadState::Uploaded { url } => Some(url),
            UploadState::Pending => None,
        }
    }

    pub fn is_uploaded(&self) -> bool {
        self.uploaded_url().is_some()
    }
}

/// Content hash used as a blob reference.
pub fn content_ref(bytes: &[u8]) -> BlobRef {
    format!("{:x}", Sha256::digest(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ref_is_stable_content_hash() {
        let a = content_ref(b"jpeg bytes");
        let b = content_ref(b"jpeg bytes");
        let c = content_ref(b"other bytes");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 64);
        assert!(a.chars().all(|ch| ch.is_ascii_hexdigit()));
    }

    #[test]
    fn new_blob_is_pending() {
        let blob = MediaBlob::new(b"\xff\xd8\xff", "image/jpeg", 1_700_000_000_000);
        assert_eq!(blob.len, 3);
        assert_eq!(blob.upload_state, UploadState::Pending);
        assert!(!blob.is_uploaded());
    }

    #[test]
    fn upload_state_serialization() {
        let state = UploadState::Uploaded {
            url: "https://media.example/abc".into(),
        };
        let json = serde_json::to_string(&state).unwrap();
        assert_eq!(json, r#"{"state":"uploaded","url":"https://media.example/abc"}"#);
    }
}

//! Integration tests for the recipe HTTP API.
//!
//! The protocol tests run everywhere. The live tests need a running server
//! backed by PostgreSQL; set RECIPEBOX_TEST_URL (and RECIPEBOX_TEST_TOKEN if
//! the server has AUTH_SECRET) before running, otherwise they return early.

use recipebox_engine::remote::MediaUploaded;
use recipebox_engine::{
    HttpRemote, HttpRemoteConfig, PullPage, RecipeBody, RemoteApi, RemoteError, RemoteRecipe,
};

/// Test helper to create a request body.
fn body(client_id: &str, title: &str) -> RecipeBody {
    RecipeBody {
        client_id: client_id.to_string(),
        title: title.to_string(),
        ingredients: vec!["200g spaghetti".to_string()],
        steps: vec!["Boil".to_string()],
        location: None,
        photo_url: None,
    }
}

#[cfg(test)]
mod protocol_tests {
    use super::*;

    #[test]
    fn test_create_body_serialization() {
        let json = serde_json::to_value(body("rec-1", "Pasta")).unwrap();

        assert_eq!(json["clientId"], "rec-1");
        assert_eq!(json["title"], "Pasta");
        assert!(json["photoUrl"].is_null());
    }

    #[test]
    fn test_pull_page_deserialization() {
        let json = r#"{
            "recipes": [
                {
                    "remoteId": "2b9c",
                    "clientId": "rec-1",
                    "title": "Pasta",
                    "ingredients": ["spaghetti"],
                    "steps": [],
                    "location": {"latitude": 41.9, "longitude": 12.5},
                    "photoUrl": null,
                    "updatedAt": 17,
                    "deleted": false
                },
                {
                    "remoteId": "7f01",
                    "clientId": null,
                    "title": "Soup",
                    "ingredients": [],
                    "steps": [],
                    "location": null,
                    "photoUrl": null,
                    "updatedAt": 18,
                    "deleted": true
                }
            ],
            "cursor": "18",
            "hasMore": false
        }"#;

        let page: PullPage = serde_json::from_str(json).unwrap();

        assert_eq!(page.recipes.len(), 2);
        assert_eq!(page.cursor.as_deref(), Some("18"));
        assert!(!page.has_more);
        assert!(page.recipes[1].deleted);
        assert!(page.recipes[1].client_id.is_none());
    }

    #[test]
    fn test_media_response_deserialization() {
        let json = r#"{"ref": "ab12", "url": "http://localhost:3000/media/ab12"}"#;

        let uploaded: MediaUploaded = serde_json::from_str(json).unwrap();

        assert_eq!(uploaded.blob_ref, "ab12");
        assert!(uploaded.url.ends_with("/media/ab12"));
    }

    #[test]
    fn test_pull_cursor_format() {
        // The cursor is the highest version served so far.
        let page = PullPage {
            recipes: vec![],
            cursor: Some("1042".to_string()),
            has_more: true,
        };

        let json = serde_json::to_string(&page).unwrap();

        assert!(json.contains("\"cursor\":\"1042\""));
        assert!(json.contains("\"hasMore\":true"));
        let version: u64 = page.cursor.unwrap().parse().unwrap();
        assert_eq!(version, 1042);
    }
}

#[cfg(test)]
mod live_tests {
    use super::*;
    use recipebox_engine::{MediaBlob, RecipeBook, RecipeDraft, SyncConfig, SyncEngine, SyncState};
    use std::sync::Arc;

    fn remote() -> Option<HttpRemote> {
        let url = std::env::var("RECIPEBOX_TEST_URL").ok()?;
        let mut config = HttpRemoteConfig::new(url);
        if let Ok(token) = std::env::var("RECIPEBOX_TEST_TOKEN") {
            config = config.with_token(token);
        }
        Some(HttpRemote::new(config).unwrap())
    }

    fn unique(prefix: &str) -> String {
        format!("{}-{}", prefix, uuid::Uuid::new_v4())
    }

    async fn pull_all(remote: &HttpRemote) -> Vec<RemoteRecipe> {
        let mut all = Vec::new();
        let mut cursor: Option<String> = None;
        loop {
            let page = remote.pull(cursor.as_deref(), 500).await.unwrap();
            all.extend(page.recipes);
            cursor = page.cursor;
            if !page.has_more {
                return all;
            }
        }
    }

    #[tokio::test]
    async fn test_write_lifecycle() {
        let Some(remote) = remote() else {
            return;
        };
        let client_id = unique("rec");

        let created = remote
            .create_recipe(&unique("key"), &body(&client_id, "Pasta"))
            .await
            .unwrap();
        assert_eq!(created.title, "Pasta");

        let updated = remote
            .update_recipe(&unique("key"), &created.remote_id, &body(&client_id, "Pasta al forno"))
            .await
            .unwrap();
        assert!(updated.updated_at > created.updated_at);

        remote
            .delete_recipe(&unique("key"), &created.remote_id)
            .await
            .unwrap();

        // Updating a tombstone is not found; deleting it again is fine.
        let err = remote
            .update_recipe(&unique("key"), &created.remote_id, &body(&client_id, "Again"))
            .await
            .unwrap_err();
        assert_eq!(err, RemoteError::NotFound);
        remote
            .delete_recipe(&unique("key"), &created.remote_id)
            .await
            .unwrap();

        let seen = pull_all(&remote).await;
        let tombstone = seen
            .iter()
            .find(|r| r.remote_id == created.remote_id)
            .unwrap();
        assert!(tombstone.deleted);
    }

    #[tokio::test]
    async fn test_idempotent_create() {
        let Some(remote) = remote() else {
            return;
        };
        let key = unique("key");
        let request = body(&unique("rec"), "Soup");

        let first = remote.create_recipe(&key, &request).await.unwrap();
        let second = remote.create_recipe(&key, &request).await.unwrap();

        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_invalid_title_is_rejected() {
        let Some(remote) = remote() else {
            return;
        };

        let err = remote
            .create_recipe(&unique("key"), &body(&unique("rec"), "   "))
            .await
            .unwrap_err();

        assert!(matches!(err, RemoteError::Rejected { status: 422, .. }));
    }

    #[tokio::test]
    async fn test_media_upload_is_content_addressed() {
        let Some(remote) = remote() else {
            return;
        };
        let bytes = unique("photo").into_bytes();
        let blob = MediaBlob::new(&bytes, "image/jpeg", 1);

        let first = remote
            .upload_media(&blob.blob_ref, &blob, &bytes)
            .await
            .unwrap();
        let second = remote
            .upload_media(&blob.blob_ref, &blob, &bytes)
            .await
            .unwrap();

        assert_eq!(first, second);
        let served = reqwest::get(&first).await.unwrap();
        assert!(served.status().is_success());
        assert_eq!(served.bytes().await.unwrap().as_ref(), bytes.as_slice());
    }

    #[tokio::test]
    async fn test_engine_round_trip() {
        let Some(remote) = remote() else {
            return;
        };
        let remote = Arc::new(remote);
        let config = SyncConfig::new().with_sync_interval(None);

        let phone = Arc::new(RecipeBook::in_memory(&unique("phone")).unwrap());
        let tablet = Arc::new(RecipeBook::in_memory(&unique("tablet")).unwrap());
        let phone_sync = SyncEngine::new(phone.clone(), remote.clone(), config.clone());
        let tablet_sync = SyncEngine::new(tablet.clone(), remote.clone(), config);

        let title = unique("Lasagne");
        let record = phone
            .create_recipe(RecipeDraft::new(title.clone()).with_ingredients(["pasta sheets"]))
            .unwrap();
        phone_sync.sync_once().await.unwrap();
        assert_eq!(phone.get(&record.id).unwrap().sync_state, SyncState::Synced);

        tablet_sync.sync_once().await.unwrap();
        let copy = tablet
            .list_all()
            .iter()
            .find(|r| r.title == title)
            .cloned()
            .unwrap();
        assert_eq!(copy.ingredients, vec!["pasta sheets"]);
        assert_eq!(copy.sync_state, SyncState::Synced);
    }
}

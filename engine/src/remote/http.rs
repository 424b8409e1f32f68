//! HTTP client for the recipe service.

use super::{MediaUploaded, PullPage, RecipeBody, RemoteApi, RemoteError, RemoteRecipe, RemoteResult};
use crate::{error::Result, Error, MediaBlob};
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Header carrying the idempotency key of a write.
pub const IDEMPOTENCY_HEADER: &str = "Idempotency-Key";

/// Connection settings for [`HttpRemote`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HttpRemoteConfig {
    /// Base URL, e.g. `https://recipes.example.com/api`
    pub api_url: String,
    /// Bearer token sent with every request
    #[serde(default)]
    pub token: Option<String>,
    /// Per-request timeout in milliseconds
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_timeout_ms() -> u64 {
    30_000
}

impl HttpRemoteConfig {
    pub fn new(api_url: impl Into<String>) -> Self {
        Self {
            api_url: api_url.into(),
            token: None,
            timeout_ms: default_timeout_ms(),
        }
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }
}

/// [`RemoteApi`] over HTTP/JSON.
#[derive(Debug, Clone)]
pub struct HttpRemote {
    client: Client,
    base: String,
    token: Option<String>,
}

impl HttpRemote {
    pub fn new(config: HttpRemoteConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| Error::InvalidState(format!("failed to build http client: {}", e)))?;

        Ok(Self {
            client,
            base: config.api_url.trim_end_matches('/').to_string(),
            token: config.token,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base, path)
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn send(&self, request: RequestBuilder) -> RemoteResult<Response> {
        let response = self
            .authorize(request)
            .send()
            .await
            .map_err(|e| RemoteError::Transient(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let message = response.text().await.unwrap_or_default();
        Err(classify(status, message))
    }

    async fn send_json<T: DeserializeOwned>(&self, request: RequestBuilder) -> RemoteResult<T> {
        self.send(request)
            .await?
            .json()
            .await
            .map_err(|e| RemoteError::Transient(format!("failed to decode response: {}", e)))
    }
}

/// Map a non-success status onto the retry taxonomy.
fn classify(status: StatusCode, message: String) -> RemoteError {
    match status.as_u16() {
        404 => RemoteError::NotFound,
        408 | 429 => RemoteError::Transient(format!("HTTP {}", status)),
        s if s >= 500 => RemoteError::Transient(format!("HTTP {}: {}", status, message)),
        s => RemoteError::Rejected { status: s, message },
    }
}

#[async_trait]
impl RemoteApi for HttpRemote {
    async fn create_recipe(&self, key: &str, body: &RecipeBody) -> RemoteResult<RemoteRecipe> {
        let request = self
            .client
            .post(self.url("/recipes"))
            .header(IDEMPOTENCY_HEADER, key)
            .json(body);
        self.send_json(request).await
    }

    async fn update_recipe(
        &self,
        key: &str,
        remote_id: &str,
        body: &RecipeBody,
    ) -> RemoteResult<RemoteRecipe> {
        let request = self
            .client
            .patch(self.url(&format!("/recipes/{}", remote_id)))
            .header(IDEMPOTENCY_HEADER, key)
            .json(body);
        self.send_json(request).await
    }

    async fn delete_recipe(&self, key: &str, remote_id: &str) -> RemoteResult<()> {
        let request = self
            .client
            .delete(self.url(&format!("/recipes/{}", remote_id)))
            .header(IDEMPOTENCY_HEADER, key);
        self.send(request).await.map(|_| ())
    }

    async fn pull(&self, since: Option<&str>, limit: usize) -> RemoteResult<PullPage> {
        let mut request = self
            .client
            .get(self.url("/recipes"))
            .query(&[("limit", limit.to_string())]);
        if let Some(since) = since {
            request = request.query(&[("since", since)]);
        }
        self.send_json(request).await
    }

    async fn upload_media(
        &self,
        key: &str,
        blob: &MediaBlob,
        bytes: &[u8],
    ) -> RemoteResult<String> {
        let request = self
            .client
            .post(self.url("/media"))
            .header(IDEMPOTENCY_HEADER, key)
            .header(reqwest::header::CONTENT_TYPE, blob.content_type.as_str())
            .body(bytes.to_vec());
        let uploaded: MediaUploaded = self.send_json(request).await?;
        if uploaded.blob_ref != blob.blob_ref {
            return Err(RemoteError::Rejected {
                status: 422,
                message: format!(
                    "remote stored {} but {} was uploaded",
                    uploaded.blob_ref, blob.blob_ref
                ),
            });
        }
        Ok(uploaded.url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_classification() {
        assert!(classify(StatusCode::SERVICE_UNAVAILABLE, String::new()).is_transient());
        assert!(classify(StatusCode::TOO_MANY_REQUESTS, String::new()).is_transient());
        assert!(classify(StatusCode::REQUEST_TIMEOUT, String::new()).is_transient());
        assert_eq!(classify(StatusCode::NOT_FOUND, String::new()), RemoteError::NotFound);
        assert_eq!(
            classify(StatusCode::UNPROCESSABLE_ENTITY, "title too long".into()),
            RemoteError::Rejected {
                status: 422,
                message: "title too long".into()
            }
        );
    }

    #[test]
    fn base_url_is_normalized() {
        let remote = HttpRemote::new(HttpRemoteConfig::new("http://localhost:3000/")).unwrap();
        assert_eq!(remote.url("/recipes"), "http://localhost:3000/recipes");
    }

    #[test]
    fn config_defaults() {
        let config: HttpRemoteConfig =
            serde_json::from_str(r#"{"apiUrl": "http://localhost"}"#).unwrap();
        assert_eq!(config.timeout_ms, 30_000);
        assert!(config.token.is_none());
    }
}

//! HTTP remote store client.
//!
//! Endpoints, relative to the base URL:
//! - `GET  hashes?page_size=N&continuation=T` returns `{"hashes": [...], "continuation": "..."|null}`
//! - `PUT  blobs/{hash}` with the raw blob body, optionally returns `{"url": "..."}`
//! - `PUT  records/{hash}` with a JSON body

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;

use super::{HashPage, RemoteError, RemoteStore};

const DEFAULT_TIMEOUT_SECS: u64 = 120;

#[derive(Debug, Deserialize)]
struct HashListResponse {
    #[serde(default)]
    hashes: Vec<String>,
    #[serde(default)]
    continuation: Option<String>,
}

#[derive(Debug, Deserialize)]
struct BlobResponse {
    url: Option<String>,
}

pub struct HttpRemoteStore {
    client: Client,
    base_url: String,
    token: Option<String>,
}

impl HttpRemoteStore {
    /// Creates a client for `base_url`.
    pub fn new(base_url: impl Into<String>, token: Option<String>) -> Result<Self, RemoteError> {
        Self::with_timeout(base_url, token, Duration::from_secs(DEFAULT_TIMEOUT_SECS))
    }

    pub fn with_timeout(
        base_url: impl Into<String>,
        token: Option<String>,
        timeout: Duration,
    ) -> Result<Self, RemoteError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| RemoteError::Unavailable(format!("failed to build HTTP client: {}", e)))?;
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Ok(Self {
            client,
            base_url,
            token,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn hashes_url(&self, page_size: usize, continuation: Option<&str>) -> String {
        let mut url = format!("{}/hashes?page_size={}", self.base_url, page_size);
        if let Some(token) = continuation {
            url.push_str("&continuation=");
            url.push_str(&urlencoding::encode(token));
        }
        url
    }

    fn item_url(&self, kind: &str, hash: &str) -> String {
        format!("{}/{}/{}", self.base_url, kind, urlencoding::encode(hash))
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    /// Maps a non-success status. Server-side errors count as unavailability.
    async fn status_error(key: &str, response: reqwest::Response) -> RemoteError {
        let status = response.status();
        let text = response.text().await.unwrap_or_default();
        if status.is_server_error()
            || status == StatusCode::TOO_MANY_REQUESTS
            || status == StatusCode::UNAUTHORIZED
            || status == StatusCode::FORBIDDEN
        {
            RemoteError::Unavailable(format!("{} ({})", status, text))
        } else {
            RemoteError::Rejected {
                key: key.to_string(),
                reason: format!("{} ({})", status, text),
            }
        }
    }
}

fn transport_error(e: reqwest::Error) -> RemoteError {
    RemoteError::Unavailable(e.to_string())
}

#[async_trait]
impl RemoteStore for HttpRemoteStore {
    fn describe(&self) -> String {
        self.base_url.clone()
    }

    async fn list_hashes_page(
        &self,
        page_size: usize,
        continuation: Option<String>,
    ) -> Result<HashPage, RemoteError> {
        let url = self.hashes_url(page_size, continuation.as_deref());
        let response = self
            .authorize(self.client.get(&url))
            .send()
            .await
            .map_err(transport_error)?;

        if !response.status().is_success() {
            return Err(Self::status_error("hashes", response).await);
        }

        let body: HashListResponse = response
            .json()
            .await
            .map_err(|e| RemoteError::InvalidResponse(e.to_string()))?;
        Ok(HashPage {
            hashes: body.hashes,
            continuation: body.continuation.filter(|t| !t.is_empty()),
        })
    }

    async fn upload_blob(&self, hash: &str, bytes: &[u8]) -> Result<String, RemoteError> {
        let url = self.item_url("blobs", hash);
        let response = self
            .authorize(self.client.put(&url))
            .header("Content-Type", "application/octet-stream")
            .body(bytes.to_vec())
            .send()
            .await
            .map_err(transport_error)?;

        if !response.status().is_success() {
            return Err(Self::status_error(hash, response).await);
        }

        // An empty or non-JSON body still means success.
        let text = response.text().await.unwrap_or_default();
        let location = serde_json::from_str::<BlobResponse>(&text)
            .ok()
            .and_then(|b| b.url)
            .unwrap_or(url);
        tracing::debug!(hash, location = %location, "Uploaded blob");
        Ok(location)
    }

    async fn upsert_record(&self, hash: &str, fields: &serde_json::Value) -> Result<(), RemoteError> {
        let url = self.item_url("records", hash);
        let response = self
            .authorize(self.client.put(&url))
            .json(fields)
            .send()
            .await
            .map_err(transport_error)?;

        if !response.status().is_success() {
            return Err(Self::status_error(hash, response).await);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_urls() {
        let store = HttpRemoteStore::new("https://store.example/api/", None).unwrap();
        assert_eq!(store.base_url(), "https://store.example/api");
        assert_eq!(
            store.hashes_url(500, None),
            "https://store.example/api/hashes?page_size=500"
        );
        assert_eq!(
            store.hashes_url(500, Some("a b&c")),
            "https://store.example/api/hashes?page_size=500&continuation=a%20b%26c"
        );
        assert_eq!(
            store.item_url("blobs", "abc123"),
            "https://store.example/api/blobs/abc123"
        );
    }

    #[tokio::test]
    async fn test_unreachable_store_is_unavailable() {
        // Port 9 on localhost is discard; nothing should be listening for HTTP.
        let store = HttpRemoteStore::with_timeout(
            "http://127.0.0.1:9",
            None,
            Duration::from_millis(500),
        )
        .unwrap();
        let err = store.list_hashes_page(10, None).await.unwrap_err();
        assert!(err.is_connection_level());
    }
}

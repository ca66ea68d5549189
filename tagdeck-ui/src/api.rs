//! REST client for the cataloging backend
//!
//! Only the endpoints this client depends on are modelled. Mutation
//! endpoints return no meaningful body; success is the HTTP status.

use std::future::Future;
use std::time::Duration;

use reqwest::Url;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tagdeck_common::{Error, Result};
use tracing::{debug, info};

use crate::cache::TagRecord;

const USER_AGENT: &str = "tagdeck/0.1.0";
const REQUEST_TIMEOUT_SECS: u64 = 30;

/// Which pipeline `POST /tag/add` runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TagKind {
    /// Look up candidates only
    Preview,
    /// Look up and import into the library
    Import,
}

impl std::fmt::Display for TagKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TagKind::Preview => f.write_str("preview"),
            TagKind::Import => f.write_str("import"),
        }
    }
}

/// Body of `POST /tag/add`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddTagsRequest {
    pub folders: Vec<String>,
    pub kind: TagKind,
}

/// Body of `DELETE /inbox/path`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteFoldersRequest {
    pub folders: Vec<String>,
    pub with_status: Vec<String>,
}

/// Backend operations this layer consumes
///
/// Futures are `Send` so refetches can run on spawned tasks.
pub trait LibraryApi: Send + Sync {
    fn add_tags(&self, request: &AddTagsRequest) -> impl Future<Output = Result<()>> + Send;

    fn delete_inbox_folders(
        &self,
        request: &DeleteFoldersRequest,
    ) -> impl Future<Output = Result<()>> + Send;

    fn fetch_tag_by_id(&self, id: &str) -> impl Future<Output = Result<TagRecord>> + Send;

    fn fetch_tag_by_path(&self, path: &str) -> impl Future<Output = Result<TagRecord>> + Send;

    /// Inbox folder tree, passed through opaquely
    fn fetch_inbox(&self) -> impl Future<Output = Result<Value>> + Send;

    /// Tag-group listing, passed through opaquely
    fn fetch_tag_groups(&self) -> impl Future<Output = Result<Value>> + Send;
}

/// reqwest-backed [`LibraryApi`]
#[derive(Clone)]
pub struct LibraryClient {
    http_client: reqwest::Client,
    base: Url,
}

impl LibraryClient {
    /// `backend_url` is the server root; `api_prefix` the REST mount point
    /// below it (e.g. `/api_v1`).
    pub fn new(backend_url: &str, api_prefix: &str) -> Result<Self> {
        let base = Url::parse(&format!(
            "{}/{}/",
            backend_url.trim_end_matches('/'),
            api_prefix.trim_matches('/')
        ))
        .map_err(|e| Error::Config(format!("Invalid backend URL {:?}: {}", backend_url, e)))?;

        let http_client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .map_err(|e| Error::Network(e.to_string()))?;

        info!(base = %base, "Library client initialized");
        Ok(Self { http_client, base })
    }

    pub fn base_url(&self) -> &Url {
        &self.base
    }

    /// Join path segments onto the API base, percent-encoding each one
    fn endpoint(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| Error::Config(format!("Backend URL {} cannot be a base", self.base)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn check(response: reqwest::Response) -> Result<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(Error::Api {
            status: status.as_u16(),
            body,
        })
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, url: Url) -> Result<T> {
        debug!(url = %url, "GET");
        let response = self
            .http_client
            .get(url)
            .send()
            .await
            .map_err(|e| Error::Network(e.to_string()))?;
        Self::check(response)
            .await?
            .json()
            .await
            .map_err(|e| Error::Protocol(e.to_string()))
    }
}

impl LibraryApi for LibraryClient {
    async fn add_tags(&self, request: &AddTagsRequest) -> Result<()> {
        let url = self.endpoint(&["tag", "add"])?;
        debug!(url = %url, folders = request.folders.len(), kind = %request.kind, "POST");
        let response = self
            .http_client
            .post(url)
            .json(request)
            .send()
            .await
            .map_err(|e| Error::Network(e.to_string()))?;
        Self::check(response).await?;
        Ok(())
    }

    async fn delete_inbox_folders(&self, request: &DeleteFoldersRequest) -> Result<()> {
        let url = self.endpoint(&["inbox", "path"])?;
        debug!(url = %url, folders = request.folders.len(), "DELETE");
        let response = self
            .http_client
            .delete(url)
            .json(request)
            .send()
            .await
            .map_err(|e| Error::Network(e.to_string()))?;
        Self::check(response).await?;
        Ok(())
    }

    async fn fetch_tag_by_id(&self, id: &str) -> Result<TagRecord> {
        let url = self.endpoint(&["tag", "id", id])?;
        self.get_json(url).await
    }

    async fn fetch_tag_by_path(&self, path: &str) -> Result<TagRecord> {
        let url = self.endpoint(&["tag", "path", path])?;
        self.get_json(url).await
    }

    async fn fetch_inbox(&self) -> Result<Value> {
        let url = self.endpoint(&["inbox", "tree"])?;
        self.get_json(url).await
    }

    async fn fetch_tag_groups(&self) -> Result<Value> {
        let url = self.endpoint(&["tagGroup", ""])?;
        self.get_json(url).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_joins_prefix_and_encodes() {
        let client = LibraryClient::new("http://localhost:5001/", "/api_v1").unwrap();
        assert_eq!(client.base_url().as_str(), "http://localhost:5001/api_v1/");

        let url = client.endpoint(&["tag", "add"]).unwrap();
        assert_eq!(url.as_str(), "http://localhost:5001/api_v1/tag/add");

        let url = client.endpoint(&["tag", "path", "/music/inbox/A B"]).unwrap();
        assert_eq!(
            url.as_str(),
            "http://localhost:5001/api_v1/tag/path/%2Fmusic%2Finbox%2FA%20B"
        );
    }

    #[test]
    fn test_invalid_backend_url_is_config_error() {
        assert!(matches!(
            LibraryClient::new("not a url", "/api_v1"),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn test_request_bodies_serialize_like_the_backend_expects() {
        let body = serde_json::to_value(AddTagsRequest {
            folders: vec!["/inbox/a".to_string()],
            kind: TagKind::Import,
        })
        .unwrap();
        assert_eq!(body, serde_json::json!({"folders": ["/inbox/a"], "kind": "import"}));

        let body = serde_json::to_value(DeleteFoldersRequest {
            folders: vec!["/inbox/a".to_string()],
            with_status: vec!["imported".to_string()],
        })
        .unwrap();
        assert_eq!(
            body,
            serde_json::json!({"folders": ["/inbox/a"], "with_status": ["imported"]})
        );
    }
}

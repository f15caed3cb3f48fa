//! HTTP client for the tracoor server's indexing API.

use crate::error::{AgentError, AgentResult};
use async_trait::async_trait;
use reqwest::{StatusCode, Url};
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracoor_core::api::{
    CODE_ALREADY_EXISTS, CreateArtifactResponse, ErrorResponse, ListArtifactsRequest,
    ListArtifactsResponse, StorageHandshakeRequest,
};
use tracoor_core::{Artifact, ArtifactKind, ArtifactRecord};

/// The subset of the server API the agent needs.
#[async_trait]
pub trait IndexClient: Send + Sync {
    /// Index a stored artifact and return its id.
    ///
    /// Returns [`AgentError::AlreadyExists`] when the server already has a
    /// row with the same natural key.
    async fn create(&self, kind: ArtifactKind, record: &ArtifactRecord) -> AgentResult<String>;

    async fn list(
        &self,
        kind: ArtifactKind,
        request: &ListArtifactsRequest,
    ) -> AgentResult<Vec<Artifact>>;

    /// Ask the server to confirm it reads the same object store.
    async fn storage_handshake(&self, node: &str, token: &str) -> AgentResult<()>;
}

#[derive(Clone)]
pub struct HttpIndexClient {
    http: reqwest::Client,
    base_url: Url,
}

impl HttpIndexClient {
    pub fn new(base_url: &str, timeout: Duration) -> AgentResult<Self> {
        let base_url = Url::parse(base_url)
            .map_err(|e| AgentError::Node(format!("invalid server URL {base_url}: {e}")))?;
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { http, base_url })
    }

    fn url(&self, path: &str) -> AgentResult<Url> {
        self.base_url
            .join(path)
            .map_err(|e| AgentError::Node(format!("failed to build API URL: {e}")))
    }

    async fn send_json<T: DeserializeOwned>(&self, req: reqwest::RequestBuilder) -> AgentResult<T> {
        let response = req.send().await?;
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(api_error(status, body));
        }
        Ok(serde_json::from_str(&body)?)
    }

    async fn send_empty(&self, req: reqwest::RequestBuilder) -> AgentResult<()> {
        let response = req.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(api_error(status, body));
        }
        Ok(())
    }
}

fn api_error(status: StatusCode, body: String) -> AgentError {
    let parsed = serde_json::from_str::<ErrorResponse>(&body).ok();
    if status == StatusCode::CONFLICT
        || parsed.as_ref().is_some_and(|e| e.code == CODE_ALREADY_EXISTS)
    {
        return AgentError::AlreadyExists(parsed.map(|e| e.message).unwrap_or(body));
    }
    AgentError::Api {
        status,
        message: parsed.map(|e| e.message).unwrap_or(body),
    }
}

#[async_trait]
impl IndexClient for HttpIndexClient {
    async fn create(&self, kind: ArtifactKind, record: &ArtifactRecord) -> AgentResult<String> {
        let url = self.url(&format!("/api/v1/{}", kind.slug()))?;
        let response: CreateArtifactResponse =
            self.send_json(self.http.post(url).json(record)).await?;
        Ok(response.id)
    }

    async fn list(
        &self,
        kind: ArtifactKind,
        request: &ListArtifactsRequest,
    ) -> AgentResult<Vec<Artifact>> {
        let url = self.url(&format!("/api/v1/{}/list", kind.slug()))?;
        let response: ListArtifactsResponse =
            self.send_json(self.http.post(url).json(request)).await?;
        Ok(response.items)
    }

    async fn storage_handshake(&self, node: &str, token: &str) -> AgentResult<()> {
        let url = self.url("/api/v1/storage/handshake")?;
        let body = StorageHandshakeRequest {
            node: node.to_string(),
            token: token.to_string(),
        };
        self.send_empty(self.http.post(url).json(&body)).await
    }
}

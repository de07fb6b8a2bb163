use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION, CONTENT_LENGTH, CONTENT_TYPE};
use reqwest::{Body, Client, Response, StatusCode};
use serde::Deserialize;
use tokio::sync::RwLock;

use super::{ByteStream, RemoteCatalog};
use crate::error::{SyncError, SyncResult};
use crate::types::{ArtifactIdentifier, ArtifactRecord};

#[derive(Debug, Clone)]
pub struct HttpCatalogConfig {
    pub base_url: String,
    pub token: Option<String>,
    pub timeout: Duration,
}

impl HttpCatalogConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            token: None,
            timeout: Duration::from_secs(60),
        }
    }

    pub fn with_token(mut self, token: Option<String>) -> Self {
        self.token = token;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[derive(Debug, Deserialize)]
struct ListResponse {
    artifacts: Vec<RemoteArtifact>,
}

#[derive(Debug, Deserialize)]
struct RemoteArtifact {
    id: u64,
    name: String,
    size_in_bytes: u64,
}

/// Artifact store reached over HTTP.
///
/// Content is addressed by the store's numeric id, so the id of every name
/// seen in the latest listing is remembered for later fetches.
pub struct HttpCatalog {
    client: Client,
    base_url: String,
    remote_ids: RwLock<HashMap<ArtifactIdentifier, u64>>,
}

impl HttpCatalog {
    pub fn new(config: HttpCatalogConfig) -> SyncResult<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        if let Some(token) = &config.token {
            let value = HeaderValue::from_str(&format!("Bearer {}", token)).map_err(|_| {
                SyncError::Internal {
                    message: "Artifact store token is not a valid header value".to_string(),
                }
            })?;
            headers.insert(AUTHORIZATION, value);
        }

        let client = Client::builder()
            .default_headers(headers)
            .timeout(config.timeout)
            .user_agent(concat!("artifact_sync/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| SyncError::Internal {
                message: format!("Failed to create HTTP client: {}", e),
            })?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            remote_ids: RwLock::new(HashMap::new()),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    /// Pass successful responses through, map everything else onto the error taxonomy
    async fn check(
        response: Response,
        identifier: Option<&ArtifactIdentifier>,
    ) -> SyncResult<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(classify_status(status, identifier, &body))
    }
}

fn classify_status(
    status: StatusCode,
    identifier: Option<&ArtifactIdentifier>,
    body: &str,
) -> SyncError {
    match (status, identifier) {
        (StatusCode::NOT_FOUND, Some(identifier)) => SyncError::NotFound {
            identifier: identifier.clone(),
        },
        (StatusCode::CONFLICT, Some(identifier)) => SyncError::Conflict {
            identifier: identifier.clone(),
        },
        _ => SyncError::remote_unavailable(format!("HTTP {}: {}", status, body.trim())),
    }
}

fn index_listing(artifacts: Vec<RemoteArtifact>) -> (Vec<ArtifactRecord>, HashMap<ArtifactIdentifier, u64>) {
    let mut ids = HashMap::new();
    let mut records = Vec::with_capacity(artifacts.len());
    for artifact in artifacts {
        let identifier = ArtifactIdentifier::new(artifact.name);
        ids.entry(identifier.clone()).or_insert(artifact.id);
        records.push(ArtifactRecord {
            identifier,
            size_bytes: artifact.size_in_bytes,
        });
    }
    (records, ids)
}

#[async_trait]
impl RemoteCatalog for HttpCatalog {
    async fn list_artifacts(&self) -> SyncResult<Vec<ArtifactRecord>> {
        let response = self.client.get(self.url("artifacts")).send().await?;
        let listing: ListResponse = Self::check(response, None)
            .await?
            .json()
            .await
            .map_err(|e| SyncError::remote_unavailable(format!("Invalid artifact listing: {}", e)))?;

        let (records, ids) = index_listing(listing.artifacts);
        *self.remote_ids.write().await = ids;

        tracing::debug!("Remote catalog lists {} artifacts", records.len());
        Ok(records)
    }

    async fn fetch(&self, identifier: &ArtifactIdentifier) -> SyncResult<ByteStream> {
        let id = self
            .remote_ids
            .read()
            .await
            .get(identifier)
            .copied()
            .ok_or_else(|| SyncError::NotFound {
                identifier: identifier.clone(),
            })?;

        let response = self
            .client
            .get(self.url(&format!("artifacts/{}/zip", id)))
            .send()
            .await?;
        let response = Self::check(response, Some(identifier)).await?;

        Ok(Box::pin(
            response
                .bytes_stream()
                .map(|chunk| chunk.map_err(SyncError::from)),
        ))
    }

    async fn publish(&self, identifier: &ArtifactIdentifier, path: &Path) -> SyncResult<()> {
        let file = tokio::fs::File::open(path).await?;
        let length = file.metadata().await?.len();

        // Streamed from disk; cached outputs can be large
        let response = self
            .client
            .post(self.url("artifacts"))
            .query(&[("name", identifier.as_str())])
            .header(CONTENT_TYPE, "application/octet-stream")
            .header(CONTENT_LENGTH, length)
            .body(Body::from(file))
            .send()
            .await?;
        Self::check(response, Some(identifier)).await?;

        Ok(())
    }
}

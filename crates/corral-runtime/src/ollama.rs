//! Ollama HTTP client.
//!
//! Speaks the native API: `GET /api/tags` to list, `POST /api/pull` with
//! NDJSON streaming for downloads, `DELETE /api/delete` for removal.
//! Pull progress arrives as one JSON object per line; partial lines are
//! buffered across chunks.

use async_trait::async_trait;
use futures::StreamExt;
use serde::Deserialize;
use serde_json::json;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use url::Url;

use crate::backend::{BackendApi, BackendConnector, BackendError, PullUpdate, RemoteModel};

#[derive(Debug, Clone)]
pub struct OllamaClient {
    base_url: Url,
    http: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct TagsResponse {
    #[serde(default)]
    models: Vec<RemoteModel>,
}

impl OllamaClient {
    pub fn new(base_url: Url, http: reqwest::Client) -> Self {
        Self { base_url, http }
    }

    fn endpoint(&self, path: &str) -> Result<Url, BackendError> {
        Ok(self.base_url.join(path)?)
    }

    /// Parse every complete NDJSON line in `buffer`, forwarding progress and
    /// surfacing in-band errors.
    async fn drain_lines(
        buffer: &mut String,
        progress: &mpsc::Sender<PullUpdate>,
    ) -> Result<(), BackendError> {
        while let Some(pos) = buffer.find('\n') {
            let line: String = buffer.drain(..=pos).collect();
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            match serde_json::from_str::<PullUpdate>(line) {
                Ok(update) => {
                    if let Some(message) = update.error {
                        return Err(BackendError::Protocol(message));
                    }
                    // The receiver going away just means nobody is watching
                    // progress anymore; the pull itself continues.
                    let _ = progress.send(update).await;
                }
                Err(e) => debug!(error = %e, line, "skipping unparseable pull status line"),
            }
        }
        Ok(())
    }
}

#[async_trait]
impl BackendApi for OllamaClient {
    async fn list(&self) -> Result<Vec<RemoteModel>, BackendError> {
        let resp = self
            .http
            .get(self.endpoint("api/tags")?)
            .send()
            .await?
            .error_for_status()?;
        let tags: TagsResponse = resp.json().await?;
        Ok(tags.models)
    }

    async fn pull(
        &self,
        token: &CancellationToken,
        model: &str,
        progress: mpsc::Sender<PullUpdate>,
    ) -> Result<(), BackendError> {
        let resp = self
            .http
            .post(self.endpoint("api/pull")?)
            .json(&json!({ "model": model, "stream": true }))
            .send()
            .await?
            .error_for_status()?;

        let mut stream = resp.bytes_stream();
        let mut buffer = String::new();
        loop {
            tokio::select! {
                _ = token.cancelled() => return Err(BackendError::Cancelled),
                chunk = stream.next() => {
                    let Some(chunk) = chunk else { break };
                    buffer.push_str(&String::from_utf8_lossy(&chunk?));
                    Self::drain_lines(&mut buffer, &progress).await?;
                }
            }
        }
        // Trailing data without a final newline.
        if !buffer.trim().is_empty() {
            buffer.push('\n');
            Self::drain_lines(&mut buffer, &progress).await?;
        }
        Ok(())
    }

    async fn delete(&self, model: &str) -> Result<(), BackendError> {
        self.http
            .delete(self.endpoint("api/delete")?)
            .json(&json!({ "model": model }))
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}

/// Production [`BackendConnector`]: one shared HTTP client, one
/// [`OllamaClient`] per backend base URL.
#[derive(Debug, Clone, Default)]
pub struct OllamaConnector {
    http: reqwest::Client,
}

impl OllamaConnector {
    pub fn new() -> Self {
        Self::default()
    }
}

impl BackendConnector for OllamaConnector {
    fn connect(&self, base_url: &Url) -> std::sync::Arc<dyn BackendApi> {
        std::sync::Arc::new(OllamaClient::new(base_url.clone(), self.http.clone()))
    }
}

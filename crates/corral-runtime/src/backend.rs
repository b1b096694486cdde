//! The seam between the reconciler and an inference backend's API.
//!
//! Backends are opaque to the engine: three operations are enough to
//! reconcile them.  Production uses [`crate::OllamaConnector`]; tests plug in
//! an in-memory implementation.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use url::Url;

/// A model as reported by a backend's list endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteModel {
    #[serde(default)]
    pub name: String,
    /// Canonical model identifier; matches the catalog's `Model.model`.
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub size: u64,
    #[serde(default)]
    pub digest: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modified_at: Option<DateTime<Utc>>,
}

/// One progress sample from an in-flight pull.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PullUpdate {
    #[serde(default)]
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub digest: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("invalid backend URL: {0}")]
    Url(#[from] url::ParseError),

    /// The backend answered with something other than the expected shape,
    /// or reported an in-band error (e.g. an unknown model on pull).
    #[error("backend error: {0}")]
    Protocol(String),

    #[error("pull cancelled")]
    Cancelled,
}

/// The minimal surface of one inference backend.
#[async_trait]
pub trait BackendApi: Send + Sync {
    /// Models currently present on the backend.
    async fn list(&self) -> Result<Vec<RemoteModel>, BackendError>;

    /// Pull `model` onto the backend, sending progress samples on
    /// `progress` until the pull completes, fails, or `token` is cancelled
    /// (in which case the result is [`BackendError::Cancelled`]).
    async fn pull(
        &self,
        token: &CancellationToken,
        model: &str,
        progress: mpsc::Sender<PullUpdate>,
    ) -> Result<(), BackendError>;

    /// Remove `model` from the backend.
    async fn delete(&self, model: &str) -> Result<(), BackendError>;
}

/// Builds a [`BackendApi`] client for a backend base URL.
pub trait BackendConnector: Send + Sync {
    fn connect(&self, base_url: &Url) -> std::sync::Arc<dyn BackendApi>;
}

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The only backend type supported today.
pub const BACKEND_TYPE_OLLAMA: &str = "Ollama";

/// An operator-declared inference backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Backend {
    pub id: String,
    pub name: String,
    pub base_url: String,
    /// Enumerated type string, e.g. [`BACKEND_TYPE_OLLAMA`].  Kept open so an
    /// unknown value can be stored and reported instead of rejected at the
    /// storage layer; services validate on create/update.
    #[serde(rename = "type")]
    pub backend_type: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A declared model, identified by its canonical name (e.g. `llama2:latest`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Model {
    pub id: String,
    pub model: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A named grouping that associates backends with a declared model set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pool {
    pub id: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A queued unit of work.
///
/// Within a `task_type` the `id` is unique; enqueuing an id that already
/// exists keeps the stored job untouched.  Cancel requests on the bus reuse
/// this shape carrying only an `id`, hence the lenient serde defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub id: String,
    #[serde(default)]
    pub task_type: String,
    #[serde(default)]
    pub payload: String,
    #[serde(default)]
    pub scheduled_for: i64,
    #[serde(default)]
    pub valid_until: i64,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

/// Payload of a `model_download` job: which model to pull onto which backend.
/// The `url` doubles as the job id, serializing downloads per backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueItem {
    pub url: String,
    pub model: String,
}

/// What an identity may do with a service resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Permission {
    View,
    Manage,
}

impl Permission {
    pub fn as_str(self) -> &'static str {
        match self {
            Permission::View => "view",
            Permission::Manage => "manage",
        }
    }
}

/// A stored authorization grant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessEntry {
    pub identity: String,
    pub resource: String,
    pub permission: Permission,
    pub created_at: DateTime<Utc>,
}

//! Runtime reconciliation of declared vs observed backend state.
//!
//! [`RuntimeState`] is the heart of the control plane.  Each call to
//! [`RuntimeState::run_backend_cycle`] diffs the catalog's declared model
//! placement against what every backend actually hosts, queues downloads for
//! missing models, deletes undeclared ones, and refreshes the in-memory
//! observed snapshot.  [`RuntimeState::run_download_cycle`] drains the
//! download queue one job at a time, streaming progress over the bus and
//! honoring out-of-band cancellation.
//!
//! Neither cycle schedules itself: both perform one unit of work and return,
//! leaving pacing, circuit breaking, and lifecycle to the caller (the
//! `corral-routine` pool in production).

mod backend;
mod download;
mod ollama;
mod queue;
mod state;

#[cfg(test)]
mod tests;

pub use backend::{BackendApi, BackendConnector, BackendError, PullUpdate, RemoteModel};
pub use download::DownloadStatus;
pub use ollama::{OllamaClient, OllamaConnector};
pub use queue::TASK_TYPE_MODEL_DOWNLOAD;
pub use state::{LlmState, RuntimeState};

use thiserror::Error;

/// Bus subject carrying JSON-encoded [`DownloadStatus`] progress records.
pub const SUBJECT_MODEL_DOWNLOAD: &str = "model_download";
/// Bus subject carrying JSON-encoded cancel requests (a `Job` whose id names
/// a backend URL or a model).
pub const SUBJECT_QUEUE_CANCEL: &str = "queue_cancel";

/// Errors escaping a reconciliation or download tick.
///
/// Per-backend trouble never surfaces here; it is recorded on the affected
/// backend's [`LlmState`] and the cycle moves on.  Only catalog/bus failures
/// and download failures reach the supervising loop.
#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error(transparent)]
    Store(#[from] corral_store::StoreError),

    #[error(transparent)]
    Bus(#[from] corral_bus::BusError),

    #[error("failed downloading model {model}: {source}")]
    Download {
        model: String,
        #[source]
        source: BackendError,
    },
}

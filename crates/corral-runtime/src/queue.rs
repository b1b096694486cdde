//! The persisted download queue.
//!
//! A thin layer over the catalog's job table.  The backend base URL is the
//! job id, so at most one download job exists per backend at any time: a
//! second enqueue while one is pending is a no-op.  That single slot is the
//! only per-backend locking the engine needs: the reconcile cycle re-detects
//! whatever is still missing on its next pass.

use std::sync::Arc;

use chrono::Utc;
use corral_store::{Catalog, Job, QueueItem, StoreError};
use url::Url;

/// Task type of download jobs.
pub const TASK_TYPE_MODEL_DOWNLOAD: &str = "model_download";

#[derive(Clone)]
pub(crate) struct DownloadQueue {
    catalog: Arc<Catalog>,
}

impl DownloadQueue {
    pub(crate) fn new(catalog: Arc<Catalog>) -> Self {
        Self { catalog }
    }

    /// Enqueue a download of `model` onto the backend at `backend_url`.
    /// Keeps any job already queued for that backend.
    pub(crate) async fn add(&self, backend_url: &Url, model: &str) -> Result<(), StoreError> {
        let item = QueueItem {
            url: backend_url.as_str().to_owned(),
            model: model.to_owned(),
        };
        let job = Job {
            id: item.url.clone(),
            task_type: TASK_TYPE_MODEL_DOWNLOAD.to_owned(),
            payload: serde_json::to_string(&item)?,
            scheduled_for: 0,
            valid_until: 0,
            created_at: Utc::now(),
        };
        self.catalog.append_job(&job).await
    }

    /// Remove and return the oldest pending download, or `None` when the
    /// queue is empty.
    pub(crate) async fn pop(&self) -> Result<Option<QueueItem>, StoreError> {
        match self.catalog.pop_job_for_type(TASK_TYPE_MODEL_DOWNLOAD).await {
            Ok(job) => Ok(Some(Catalog::decode_queue_item(&job)?)),
            Err(StoreError::NotFound) => Ok(None),
            Err(e) => Err(e),
        }
    }
}

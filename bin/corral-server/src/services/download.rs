//! Queue introspection, removal, cancellation, and live progress.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use corral_bus::Messenger;
use corral_runtime::{DownloadStatus, SUBJECT_MODEL_DOWNLOAD, SUBJECT_QUEUE_CANCEL, TASK_TYPE_MODEL_DOWNLOAD};
use corral_store::{Catalog, Job, Permission, QueueItem};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::warn;

use crate::auth::{Authorizer, Identity};
use crate::error::ServerError;

/// A queued download, with its payload decoded for display.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueJob {
    pub id: String,
    pub task_type: String,
    pub model_job: QueueItem,
    pub scheduled_for: i64,
    pub valid_until: i64,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone)]
pub struct DownloadService {
    catalog: Arc<Catalog>,
    bus: Arc<dyn Messenger>,
    auth: Authorizer,
}

impl DownloadService {
    pub const NAME: &'static str = "downloadservice";

    pub fn new(catalog: Arc<Catalog>, bus: Arc<dyn Messenger>, auth: Authorizer) -> Self {
        Self { catalog, bus, auth }
    }

    /// The pending download queue, oldest first.
    pub async fn current_queue_state(
        &self,
        identity: &Identity,
    ) -> Result<Vec<QueueJob>, ServerError> {
        self.auth
            .check(identity, Self::NAME, Permission::View)
            .await?;
        let jobs = self
            .catalog
            .get_jobs_for_type(TASK_TYPE_MODEL_DOWNLOAD)
            .await?;
        let mut queue = Vec::with_capacity(jobs.len());
        for job in jobs {
            queue.push(QueueJob {
                model_job: Catalog::decode_queue_item(&job)?,
                id: job.id,
                task_type: job.task_type,
                scheduled_for: job.scheduled_for,
                valid_until: job.valid_until,
                created_at: job.created_at,
            });
        }
        Ok(queue)
    }

    /// Broadcast a cancel request for whatever `target` names: a backend URL
    /// cancels that backend's in-flight download, a model name purges the
    /// model from every backend currently downloading it.
    pub async fn cancel_downloads(&self, target: &str) -> Result<(), ServerError> {
        let job = Job {
            id: target.to_owned(),
            task_type: String::new(),
            payload: String::new(),
            scheduled_for: 0,
            valid_until: 0,
            created_at: Utc::now(),
        };
        let payload = serde_json::to_vec(&job)
            .map_err(|e| ServerError::BadRequest(format!("encoding cancel request: {e}")))?;
        self.bus.publish(SUBJECT_QUEUE_CANCEL, &payload).await?;
        Ok(())
    }

    /// Remove every queued download of `model_name`.
    ///
    /// Runs in one transaction: drain the queue, keep everything else,
    /// commit only when a matching entry was actually removed.  On no match
    /// the transaction rolls back and the queue is untouched.
    pub async fn remove_from_queue(
        &self,
        identity: &Identity,
        model_name: &str,
    ) -> Result<(), ServerError> {
        self.auth
            .check(identity, Self::NAME, Permission::View)
            .await?;

        let mut tx = self.catalog.begin().await?;
        let jobs = Catalog::pop_jobs_for_type_tx(&mut tx, TASK_TYPE_MODEL_DOWNLOAD).await?;

        let mut found = false;
        let mut kept = Vec::with_capacity(jobs.len());
        for job in jobs {
            let item = Catalog::decode_queue_item(&job)?;
            if item.model == model_name {
                found = true;
            } else {
                kept.push(job);
            }
        }
        for job in &kept {
            Catalog::append_job_tx(&mut tx, job).await?;
        }

        if found {
            tx.commit().await.map_err(corral_store::StoreError::from)?;
        } else {
            tx.rollback().await.map_err(corral_store::StoreError::from)?;
        }
        Ok(())
    }

    /// Stream download progress into `out` until the subscription closes or
    /// the receiver goes away.
    ///
    /// Forwarding is non-blocking: when `out` is full the sample is dropped.
    /// Slow consumers lose intermediate samples but stay correct eventually;
    /// the authoritative observed state is always available from the runtime
    /// snapshot.
    pub async fn in_progress(
        &self,
        identity: &Identity,
        out: mpsc::Sender<DownloadStatus>,
    ) -> Result<(), ServerError> {
        self.auth
            .check(identity, Self::NAME, Permission::View)
            .await?;

        let mut sub = self.bus.subscribe(SUBJECT_MODEL_DOWNLOAD).await?;
        tokio::spawn(async move {
            loop {
                let Some(data) = sub.recv().await else { break };
                let status: DownloadStatus = match serde_json::from_slice(&data) {
                    Ok(status) => status,
                    Err(e) => {
                        warn!(error = %e, "unparseable download status");
                        continue;
                    }
                };
                if status.base_url.is_empty() {
                    warn!("BUG: download status with empty base_url");
                    continue;
                }
                match out.try_send(status) {
                    Ok(()) => {}
                    Err(mpsc::error::TrySendError::Full(_)) => {}
                    Err(mpsc::error::TrySendError::Closed(_)) => break,
                }
            }
            sub.unsubscribe();
        });
        Ok(())
    }
}

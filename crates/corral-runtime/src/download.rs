//! The download worker: one queued pull per tick.

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use url::Url;

use corral_store::Job;

use crate::state::RuntimeState;
use crate::RuntimeError;
use crate::{SUBJECT_MODEL_DOWNLOAD, SUBJECT_QUEUE_CANCEL};

/// A progress record as published on [`SUBJECT_MODEL_DOWNLOAD`].
///
/// `base_url` identifies the downloading backend and must be non-empty;
/// consumers treat records without it as malformed and drop them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadStatus {
    pub base_url: String,
    pub model: String,
    #[serde(default)]
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub digest: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed: Option<u64>,
}

impl RuntimeState {
    /// Process at most one pending download job.
    ///
    /// Pops the oldest queued job, subscribes a cancel watcher, and runs the
    /// pull with progress streamed to the bus.  A cancel message whose id
    /// matches the job's backend URL (cancel this backend's download) or its
    /// model name (purge this model everywhere) aborts the pull mid-flight.
    /// The watcher is started before the pull and joined after it, on every
    /// exit path.
    ///
    /// An empty queue is a successful no-op; the supervising loop simply
    /// calls again next interval.
    pub async fn run_download_cycle(&self, token: &CancellationToken) -> Result<(), RuntimeError> {
        let Some(item) = self.queue.pop().await? else {
            return Ok(());
        };

        let child = token.child_token();

        let mut sub = self.bus.subscribe(SUBJECT_QUEUE_CANCEL).await?;
        let watcher = tokio::spawn({
            let child = child.clone();
            let url = item.url.clone();
            let model = item.model.clone();
            async move {
                loop {
                    tokio::select! {
                        _ = child.cancelled() => break,
                        msg = sub.recv() => {
                            let Some(data) = msg else { break };
                            match serde_json::from_slice::<Job>(&data) {
                                // Matching on URL targets one backend; matching on
                                // model purges it from every backend downloading it.
                                Ok(job) if job.id == url || job.id == model => {
                                    info!(job = %job.id, "cancel request matches current download");
                                    child.cancel();
                                }
                                Ok(_) => {}
                                Err(e) => warn!(error = %e, "unparseable cancel message"),
                            }
                        }
                    }
                }
                sub.unsubscribe();
            }
        });

        let (progress_tx, mut progress_rx) = mpsc::channel::<crate::backend::PullUpdate>(16);
        let forwarder = tokio::spawn({
            let bus = std::sync::Arc::clone(&self.bus);
            let base_url = item.url.clone();
            let model = item.model.clone();
            async move {
                while let Some(update) = progress_rx.recv().await {
                    let status = DownloadStatus {
                        base_url: base_url.clone(),
                        model: model.clone(),
                        status: update.status,
                        digest: update.digest,
                        total: update.total,
                        completed: update.completed,
                    };
                    match serde_json::to_vec(&status) {
                        Ok(payload) => {
                            if let Err(e) = bus.publish(SUBJECT_MODEL_DOWNLOAD, &payload).await {
                                warn!(error = %e, "publishing download progress failed");
                            }
                        }
                        Err(e) => warn!(error = %e, "encoding download progress failed"),
                    }
                }
            }
        });

        info!(model = %item.model, url = %item.url, "processing download job");
        let result = match Url::parse(&item.url) {
            Ok(backend_url) => {
                let client = self.connector.connect(&backend_url);
                client.pull(&child, &item.model, progress_tx).await
            }
            Err(e) => {
                drop(progress_tx);
                Err(e.into())
            }
        };

        // Stop the watcher and drain the forwarder before returning,
        // whatever the pull outcome was.
        child.cancel();
        let _ = watcher.await;
        let _ = forwarder.await;

        result.map_err(|source| RuntimeError::Download {
            model: item.model,
            source,
        })
    }
}

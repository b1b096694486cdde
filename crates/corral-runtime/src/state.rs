//! The reconciliation engine and its observed-state snapshot.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use corral_bus::Messenger;
use corral_store::{Backend, Catalog, Model, BACKEND_TYPE_OLLAMA};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use url::Url;

use crate::backend::BackendConnector;
use crate::backend::RemoteModel;
use crate::queue::DownloadQueue;
use crate::RuntimeError;

/// Observed state of a single backend.
///
/// `models` is what operators declared; `pulled_models` is what the backend
/// last reported.  `error` carries the most recent reconciliation failure
/// for this backend, if any.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LlmState {
    pub id: String,
    pub name: String,
    pub models: Vec<String>,
    pub pulled_models: Vec<RemoteModel>,
    pub backend: Backend,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Reconciles declared placement against live backends.
///
/// The snapshot map is single-writer (this engine) and many-reader; entries
/// are immutable `Arc`s replaced whole, so readers never observe a torn
/// record, and [`RuntimeState::get`] hands out deep copies.
pub struct RuntimeState {
    pub(crate) catalog: Arc<Catalog>,
    pub(crate) bus: Arc<dyn Messenger>,
    pub(crate) connector: Arc<dyn BackendConnector>,
    pub(crate) queue: DownloadQueue,
    state: RwLock<HashMap<String, Arc<LlmState>>>,
    with_pools: bool,
}

impl RuntimeState {
    pub fn new(
        catalog: Arc<Catalog>,
        bus: Arc<dyn Messenger>,
        connector: Arc<dyn BackendConnector>,
    ) -> Self {
        Self {
            queue: DownloadQueue::new(Arc::clone(&catalog)),
            catalog,
            bus,
            connector,
            state: RwLock::new(HashMap::new()),
            with_pools: false,
        }
    }

    /// Switch reconciliation to pool-aware mode: each backend's declared
    /// model set becomes the union of the pools containing it, instead of
    /// the global model list.
    pub fn with_pools(mut self) -> Self {
        self.with_pools = true;
        self
    }

    /// Perform one reconciliation pass over all configured backends.
    ///
    /// One complete cycle, then return; scheduling, circuit breaking, and
    /// lifecycle belong to the caller.  Per-backend failures are recorded on
    /// the backend's [`LlmState`] and do not fail the cycle; only catalog
    /// listing errors do.
    pub async fn run_backend_cycle(&self) -> Result<(), RuntimeError> {
        if self.with_pools {
            self.sync_backends_with_pools().await
        } else {
            self.sync_backends().await
        }
    }

    /// A deep-copied snapshot of the observed state of every backend.
    /// Callers may keep and mutate the result freely.
    pub async fn get(&self) -> HashMap<String, LlmState> {
        self.state
            .read()
            .await
            .iter()
            .map(|(id, entry)| (id.clone(), (**entry).clone()))
            .collect()
    }

    async fn sync_backends(&self) -> Result<(), RuntimeError> {
        let backends = self.catalog.list_backends().await?;
        let models = self.catalog.list_models().await?;

        let mut current_ids = HashSet::new();
        self.process_backends(&backends, &models, &mut current_ids)
            .await;
        self.cleanup_stale_backends(&current_ids).await;
        Ok(())
    }

    /// Pool-aware reconciliation: process each pool's backends against that
    /// pool's model list, accumulating every backend id seen.  Cleanup runs
    /// once against the aggregated set, never per pool, which would delete
    /// backends that also belong to a later pool.
    async fn sync_backends_with_pools(&self) -> Result<(), RuntimeError> {
        let pools = self.catalog.list_pools().await?;

        let mut current_ids = HashSet::new();
        for pool in &pools {
            let backends = self.catalog.list_backends_for_pool(&pool.id).await?;
            let models = self.catalog.list_models_for_pool(&pool.id).await?;
            self.process_backends(&backends, &models, &mut current_ids)
                .await;
        }

        self.cleanup_stale_backends(&current_ids).await;
        Ok(())
    }

    async fn process_backends(
        &self,
        backends: &[Backend],
        models: &[Model],
        current_ids: &mut HashSet<String>,
    ) {
        for backend in backends {
            current_ids.insert(backend.id.clone());
            self.process_backend(backend, models).await;
        }
    }

    /// Drop state entries for backends that no longer exist in the catalog.
    async fn cleanup_stale_backends(&self, current_ids: &HashSet<String>) {
        let mut state = self.state.write().await;
        state.retain(|id, _| current_ids.contains(id));
    }

    async fn store_state(&self, entry: LlmState) {
        self.state
            .write()
            .await
            .insert(entry.id.clone(), Arc::new(entry));
    }

    /// Dispatch on backend type.  Unsupported types get an error state and no
    /// further processing.
    async fn process_backend(&self, backend: &Backend, declared: &[Model]) {
        match backend.backend_type.as_str() {
            BACKEND_TYPE_OLLAMA => self.process_ollama_backend(backend, declared).await,
            other => {
                warn!(backend = %backend.id, backend_type = other, "unsupported backend type");
                self.store_state(LlmState {
                    id: backend.id.clone(),
                    name: backend.name.clone(),
                    models: Vec::new(),
                    pulled_models: Vec::new(),
                    backend: backend.clone(),
                    error: Some(format!("Unsupported backend type: {other}")),
                })
                .await;
            }
        }
    }

    /// Reconcile a single Ollama backend.
    ///
    /// Ordering within the tick: queue missing models, then delete
    /// undeclared ones, then list again so `pulled_models` reflects the
    /// post-action observation.
    async fn process_ollama_backend(&self, backend: &Backend, declared: &[Model]) {
        let models: Vec<String> = declared.iter().map(|m| m.model.clone()).collect();
        debug!(backend = %backend.id, declared = ?models, "reconciling backend");

        let error_state = |error: String| LlmState {
            id: backend.id.clone(),
            name: backend.name.clone(),
            models: models.clone(),
            pulled_models: Vec::new(),
            backend: backend.clone(),
            error: Some(error),
        };

        let backend_url = match Url::parse(&backend.base_url) {
            Ok(url) => url,
            Err(e) => {
                warn!(backend = %backend.id, error = %e, "invalid backend URL");
                self.store_state(error_state(format!("Invalid URL: {e}"))).await;
                return;
            }
        };

        let client = self.connector.connect(&backend_url);
        let existing = match client.list().await {
            Ok(listed) => listed,
            Err(e) => {
                warn!(backend = %backend.id, error = %e, "listing models failed");
                self.store_state(error_state(e.to_string())).await;
                return;
            }
        };

        let declared_set: HashSet<&str> = models.iter().map(String::as_str).collect();
        let existing_set: HashSet<&str> = existing.iter().map(|m| m.model.as_str()).collect();

        // Declared but missing: queue one download.  The backend URL is the
        // job id, so while one job is pending further enqueues are no-ops;
        // the next cycle re-detects whatever is still missing.
        for missing in declared_set.difference(&existing_set) {
            info!(backend = %backend.id, model = %missing, "model missing; queueing download");
            if let Err(e) = self.queue.add(&backend_url, missing).await {
                warn!(backend = %backend.id, model = %missing, error = %e, "enqueue failed");
            }
        }

        // Present but undeclared: delete, or the node eventually runs out of
        // disk hosting models nobody asked for.
        for undeclared in existing_set.difference(&declared_set) {
            info!(backend = %backend.id, model = %undeclared, "model undeclared; deleting");
            if let Err(e) = client.delete(undeclared).await {
                warn!(backend = %backend.id, model = %undeclared, error = %e, "delete failed");
            }
        }

        let observed = match client.list().await {
            Ok(listed) => listed,
            Err(e) => {
                warn!(backend = %backend.id, error = %e, "post-action list failed");
                self.store_state(error_state(e.to_string())).await;
                return;
            }
        };

        self.store_state(LlmState {
            id: backend.id.clone(),
            name: backend.name.clone(),
            models,
            pulled_models: observed,
            backend: backend.clone(),
            error: None,
        })
        .await;
    }
}

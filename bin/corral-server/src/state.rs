//! Shared application state injected into every Axum handler.

use std::sync::Arc;

use corral_runtime::RuntimeState;

use crate::config::Config;
use crate::services::{BackendService, ChatService, DownloadService, ModelService, PoolService};

/// State shared across all HTTP handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub runtime: Arc<RuntimeState>,
    pub downloads: DownloadService,
    pub backends: BackendService,
    pub models: ModelService,
    pub pools: PoolService,
    pub chat: ChatService,
}

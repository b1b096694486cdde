//! Service facade: authorization-checked operations over the catalog, the
//! bus, and the runtime snapshot.  Route handlers stay thin; behavior and
//! permission rules live here.

mod backend;
mod chat;
mod download;
mod model;
mod pool;
pub mod provider;

pub use backend::{BackendService, BackendSpec};
pub use chat::ChatService;
pub use download::{DownloadService, QueueJob};
pub use model::ModelService;
pub use pool::PoolService;

/// Names of the registered services, surfaced by the system routes and used
/// as authorization resources.
pub const SERVICE_NAMES: &[&str] = &[
    BackendService::NAME,
    ChatService::NAME,
    DownloadService::NAME,
    ModelService::NAME,
    PoolService::NAME,
];

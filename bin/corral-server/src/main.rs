//! corral-server – entry point.
//!
//! Startup order:
//! 1. Parse configuration from environment variables.
//! 2. Initialise structured tracing.
//! 3. Open the catalog database (retry-wrapped) and run migrations.
//! 4. Wire the message bus and the reconciliation runtime.
//! 5. Start the supervised backend and download loops.
//! 6. Build the Axum router and serve with graceful shutdown.

mod auth;
mod config;
mod error;
mod routes;
mod services;
mod state;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use corral_bus::{Messenger, ProcessBus};
use corral_routine::{Pool, Routine};
use corral_runtime::{OllamaConnector, RuntimeState};
use corral_store::Catalog;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::auth::Authorizer;
use crate::config::Config;
use crate::services::{BackendService, ChatService, DownloadService, ModelService, PoolService};
use crate::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── 1. Configuration ───────────────────────────────────────────────────────
    let cfg = Config::from_env();

    // ── 2. Tracing ─────────────────────────────────────────────────────────────
    let env_filter = match tracing_subscriber::EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => match cfg.log_level.parse::<tracing_subscriber::EnvFilter>() {
            Ok(filter) => filter,
            Err(e) => {
                eprintln!(
                    "WARN: CORRAL_LOG='{}' is not a valid tracing filter ({}); \
                     falling back to 'info'",
                    cfg.log_level, e
                );
                tracing_subscriber::EnvFilter::new("info")
            }
        },
    };
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(true);
    if cfg.log_json {
        subscriber.json().init();
    } else {
        subscriber.init();
    }

    cfg.validate()?;
    info!(version = env!("CARGO_PKG_VERSION"), "corral-server starting");

    let shutdown = CancellationToken::new();

    // ── 3. Catalog ─────────────────────────────────────────────────────────────
    // Connection attempts retry briefly so the server survives the database
    // coming up a moment later than it does.
    let database_url = cfg.database_url.clone();
    let catalog = Routine::new(10, Duration::from_secs(60))
        .execute_with_retry(&shutdown, Duration::from_secs(1), 3, || {
            let url = database_url.clone();
            async move { Catalog::connect(&url).await.map_err(anyhow::Error::from) }
        })
        .await?;
    let catalog = Arc::new(catalog);
    info!(database_url = %cfg.database_url, "catalog ready");

    // ── 4. Bus + runtime ───────────────────────────────────────────────────────
    let bus: Arc<dyn Messenger> = Arc::new(ProcessBus::new());
    let mut runtime = RuntimeState::new(
        Arc::clone(&catalog),
        Arc::clone(&bus),
        Arc::new(OllamaConnector::new()),
    );
    if cfg.pool_sync {
        runtime = runtime.with_pools();
        info!("pool-aware reconciliation enabled");
    }
    let runtime = Arc::new(runtime);

    // ── 5. Supervised loops ────────────────────────────────────────────────────
    let pool = Pool::global();
    {
        let rt = Arc::clone(&runtime);
        pool.start_loop(
            shutdown.clone(),
            "backendCycle",
            cfg.failure_threshold,
            cfg.reset_timeout(),
            cfg.sync_interval(),
            move |_child| {
                let rt = Arc::clone(&rt);
                async move { rt.run_backend_cycle().await.map_err(anyhow::Error::from) }
            },
        );
    }
    {
        let rt = Arc::clone(&runtime);
        pool.start_loop(
            shutdown.clone(),
            "downloadCycle",
            cfg.failure_threshold,
            cfg.reset_timeout(),
            cfg.sync_interval(),
            move |child| {
                let rt = Arc::clone(&rt);
                async move { rt.run_download_cycle(&child).await.map_err(anyhow::Error::from) }
            },
        );
    }

    // ── 6. HTTP server ─────────────────────────────────────────────────────────
    let authorizer = Authorizer::new(cfg.jwt_enabled, Arc::clone(&catalog));
    let app_state = Arc::new(AppState {
        config: Arc::new(cfg.clone()),
        runtime: Arc::clone(&runtime),
        downloads: DownloadService::new(
            Arc::clone(&catalog),
            Arc::clone(&bus),
            authorizer.clone(),
        ),
        backends: BackendService::new(Arc::clone(&catalog), authorizer.clone()),
        models: ModelService::new(Arc::clone(&catalog), authorizer.clone()),
        pools: PoolService::new(Arc::clone(&catalog), authorizer.clone()),
        chat: ChatService::new(Arc::clone(&runtime), authorizer),
    });

    let app = routes::build(app_state);
    let addr: SocketAddr = cfg.bind_address().parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "HTTP server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Stop the supervised loops before exiting.
    shutdown.cancel();
    info!("corral-server stopped");
    Ok(())
}

/// Resolves when SIGINT (Ctrl-C) or SIGTERM is received.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to install CTRL+C signal handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => warn!(error = %e, "failed to install SIGTERM handler"),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received CTRL+C"),
        _ = terminate => info!("received SIGTERM"),
    }
}

//! Axum router construction.
//!
//! [`build`] assembles the application router: everything lives under
//! `/api`, with CORS built from configuration and the identity middleware
//! extracting bearer tokens for the service facade.

mod backends;
mod chat;
mod health;
mod models;
mod pools;
mod queue;
mod state;
mod system;

use std::sync::Arc;

use axum::http::{HeaderName, HeaderValue, Method};
use axum::middleware;
use axum::Router;
use tower_http::cors::{Any, CorsLayer};

use crate::auth;
use crate::config::Config;
use crate::state::AppState;

/// Build the complete [`Router`] for the application.
pub fn build(app_state: Arc<AppState>) -> Router {
    let api = Router::new()
        .merge(health::router())
        .merge(queue::router())
        .merge(backends::router())
        .merge(models::router())
        .merge(pools::router())
        .merge(chat::router())
        .merge(state::router())
        .merge(system::router());

    Router::new()
        .nest("/api", api)
        .layer(middleware::from_fn(auth::identity_middleware))
        .layer(cors_layer(&app_state.config))
        .with_state(app_state)
}

/// CORS policy from configuration.
///
/// A `*` entry in the origin list allows any origin.  When a proxy origin is
/// configured, the layer switches to an explicit origin list with
/// credentials, since credentialed requests cannot be combined with a
/// wildcard.
fn cors_layer(cfg: &Config) -> CorsLayer {
    let declared: Vec<&str> = cfg
        .allowed_origins
        .split(',')
        .map(str::trim)
        .filter(|o| !o.is_empty())
        .collect();
    let proxies: Vec<&str> = cfg
        .proxy_origin
        .split(',')
        .map(str::trim)
        .filter(|o| !o.is_empty())
        .collect();

    let mut layer = CorsLayer::new();
    if proxies.is_empty() && declared.iter().any(|o| *o == "*") {
        layer = layer.allow_origin(Any);
    } else {
        let origins: Vec<HeaderValue> = declared
            .iter()
            .chain(proxies.iter())
            .filter(|o| **o != "*")
            .filter_map(|o| o.parse().ok())
            .collect();
        layer = layer.allow_origin(origins);
        if !proxies.is_empty() {
            layer = layer.allow_credentials(true);
        }
    }

    let methods: Vec<Method> = cfg
        .allowed_methods
        .split(',')
        .filter_map(|m| m.trim().parse().ok())
        .collect();
    layer = if methods.is_empty() {
        layer.allow_methods(Any)
    } else {
        layer.allow_methods(methods)
    };

    let headers: Vec<HeaderName> = cfg
        .allowed_headers
        .split(',')
        .filter_map(|h| h.trim().parse().ok())
        .collect();
    if headers.is_empty() {
        layer.allow_headers(Any)
    } else {
        layer.allow_headers(headers)
    }
}

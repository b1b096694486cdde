//! System introspection routes.

use std::sync::Arc;

use axum::routing::get;
use axum::{Json, Router};
use corral_routine::Pool;
use serde_json::{json, Value};

use crate::services::SERVICE_NAMES;
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/system/services", get(services))
        .route("/system/loops", get(loops))
}

/// Registered services (`GET /api/system/services`).
async fn services() -> Json<Value> {
    Json(json!({ "services": SERVICE_NAMES }))
}

/// Supervised loops and their breaker states (`GET /api/system/loops`).
async fn loops() -> Json<Value> {
    let loops: Vec<Value> = Pool::global()
        .snapshot()
        .into_iter()
        .map(|(key, state)| json!({ "key": key, "breaker": format!("{state:?}") }))
        .collect();
    Json(json!({ "loops": loops }))
}

//! Observed-state route.

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use corral_runtime::LlmState;

use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/state", get(observed_state))
}

/// Snapshot of every backend's observed state (`GET /api/state`).
async fn observed_state(State(state): State<Arc<AppState>>) -> Json<HashMap<String, LlmState>> {
    Json(state.runtime.get().await)
}

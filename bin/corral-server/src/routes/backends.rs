//! Backend CRUD routes.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::routing::get;
use axum::{Extension, Json, Router};
use corral_store::Backend;
use serde_json::{json, Value};

use crate::auth::Identity;
use crate::error::ServerError;
use crate::services::BackendSpec;
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/backends", get(list).post(create))
        .route("/backends/{id}", get(fetch).put(update).delete(remove))
}

async fn list(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<Identity>,
) -> Result<Json<Vec<Backend>>, ServerError> {
    Ok(Json(state.backends.list(&identity).await?))
}

async fn create(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<Identity>,
    Json(spec): Json<BackendSpec>,
) -> Result<Json<Backend>, ServerError> {
    Ok(Json(state.backends.create(&identity, spec).await?))
}

async fn fetch(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<Identity>,
    Path(id): Path<String>,
) -> Result<Json<Backend>, ServerError> {
    Ok(Json(state.backends.get(&identity, &id).await?))
}

async fn update(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<Identity>,
    Path(id): Path<String>,
    Json(spec): Json<BackendSpec>,
) -> Result<Json<Backend>, ServerError> {
    Ok(Json(state.backends.update(&identity, &id, spec).await?))
}

async fn remove(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<Identity>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ServerError> {
    state.backends.delete(&identity, &id).await?;
    Ok(Json(json!({ "message": "Backend removed" })))
}

//! Pool routes.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::routing::{delete, get, post};
use axum::{Extension, Json, Router};
use corral_store::{Backend, Model, Pool};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::auth::Identity;
use crate::error::ServerError;
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/pools", get(list).post(create))
        .route("/pools/{id}", get(fetch).delete(remove))
        .route("/pools/{id}/backends", get(list_backends))
        .route("/pools/{id}/models", get(list_models))
        .route(
            "/pools/{id}/backends/{backend_id}",
            post(assign_backend).delete(remove_backend),
        )
        .route(
            "/pools/{id}/models/{model_id}",
            post(assign_model).delete(remove_model),
        )
}

#[derive(Debug, Deserialize)]
struct CreatePoolRequest {
    name: String,
}

async fn list(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<Identity>,
) -> Result<Json<Vec<Pool>>, ServerError> {
    Ok(Json(state.pools.list(&identity).await?))
}

async fn create(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<Identity>,
    Json(req): Json<CreatePoolRequest>,
) -> Result<Json<Pool>, ServerError> {
    Ok(Json(state.pools.create(&identity, &req.name).await?))
}

async fn fetch(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<Identity>,
    Path(id): Path<String>,
) -> Result<Json<Pool>, ServerError> {
    Ok(Json(state.pools.get(&identity, &id).await?))
}

async fn remove(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<Identity>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ServerError> {
    state.pools.delete(&identity, &id).await?;
    Ok(Json(json!({ "message": "Pool removed" })))
}

async fn list_backends(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<Identity>,
    Path(id): Path<String>,
) -> Result<Json<Vec<Backend>>, ServerError> {
    Ok(Json(state.pools.list_backends(&identity, &id).await?))
}

async fn list_models(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<Identity>,
    Path(id): Path<String>,
) -> Result<Json<Vec<Model>>, ServerError> {
    Ok(Json(state.pools.list_models(&identity, &id).await?))
}

async fn assign_backend(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<Identity>,
    Path((id, backend_id)): Path<(String, String)>,
) -> Result<Json<Value>, ServerError> {
    state.pools.assign_backend(&identity, &id, &backend_id).await?;
    Ok(Json(json!({ "message": "Backend assigned" })))
}

async fn remove_backend(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<Identity>,
    Path((id, backend_id)): Path<(String, String)>,
) -> Result<Json<Value>, ServerError> {
    state.pools.remove_backend(&identity, &id, &backend_id).await?;
    Ok(Json(json!({ "message": "Backend removed from pool" })))
}

async fn assign_model(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<Identity>,
    Path((id, model_id)): Path<(String, String)>,
) -> Result<Json<Value>, ServerError> {
    state.pools.assign_model(&identity, &id, &model_id).await?;
    Ok(Json(json!({ "message": "Model assigned" })))
}

async fn remove_model(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<Identity>,
    Path((id, model_id)): Path<(String, String)>,
) -> Result<Json<Value>, ServerError> {
    state.pools.remove_model(&identity, &id, &model_id).await?;
    Ok(Json(json!({ "message": "Model removed from pool" })))
}

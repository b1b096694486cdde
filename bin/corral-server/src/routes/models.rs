//! Declared-model routes.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::routing::get;
use axum::{Extension, Json, Router};
use corral_store::Model;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::auth::Identity;
use crate::error::ServerError;
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/models", get(list).post(append))
        .route("/models/{model}", axum::routing::delete(remove))
}

#[derive(Debug, Deserialize)]
struct AppendModelRequest {
    model: String,
}

async fn list(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<Identity>,
) -> Result<Json<Vec<Model>>, ServerError> {
    Ok(Json(state.models.list(&identity).await?))
}

async fn append(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<Identity>,
    Json(req): Json<AppendModelRequest>,
) -> Result<Json<Model>, ServerError> {
    Ok(Json(state.models.append(&identity, &req.model).await?))
}

async fn remove(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<Identity>,
    Path(model): Path<String>,
) -> Result<Json<Value>, ServerError> {
    state.models.remove(&identity, &model).await?;
    Ok(Json(json!({ "message": "Model removed" })))
}

//! Request-resolution routes.
//!
//! The actual chat/embedding proxying happens elsewhere; these endpoints
//! expose the resolver so callers (and operators debugging placement) can ask
//! "which backend would serve this?".

use std::sync::Arc;

use axum::extract::State;
use axum::routing::post;
use axum::{Extension, Json, Router};
use corral_resolver::{ResolveEmbedRequest, ResolveRequest, Selection};

use crate::auth::Identity;
use crate::error::ServerError;
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/chat/resolve", post(resolve_chat))
        .route("/chat/resolveEmbed", post(resolve_embed))
}

/// Resolve a chat request to a `(provider, backend)` pair
/// (`POST /api/chat/resolve`).
async fn resolve_chat(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<Identity>,
    Json(req): Json<ResolveRequest>,
) -> Result<Json<Selection>, ServerError> {
    Ok(Json(state.chat.resolve(&identity, &req).await?))
}

/// Resolve an embedding request (`POST /api/chat/resolveEmbed`).
async fn resolve_embed(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<Identity>,
    Json(req): Json<ResolveEmbedRequest>,
) -> Result<Json<Selection>, ServerError> {
    Ok(Json(state.chat.resolve_embed(&identity, &req).await?))
}

//! Download-queue routes.

use std::convert::Infallible;
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::response::sse::{Event, Sse};
use axum::routing::{delete, get, post};
use axum::{Extension, Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;

use crate::auth::Identity;
use crate::error::ServerError;
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/queue", get(get_queue))
        .route("/queue/cancel", post(cancel_downloads))
        .route("/queue/inProgress", get(in_progress))
        .route("/queue/{model}", delete(remove_from_queue))
}

/// Current pending downloads (`GET /api/queue`).
async fn get_queue(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<Identity>,
) -> Result<Json<Value>, ServerError> {
    let queue = state.downloads.current_queue_state(&identity).await?;
    Ok(Json(json!({ "downloadQueue": queue })))
}

/// Remove all queued downloads of a model (`DELETE /api/queue/{model}`).
async fn remove_from_queue(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<Identity>,
    Path(model): Path<String>,
) -> Result<Json<Value>, ServerError> {
    state.downloads.remove_from_queue(&identity, &model).await?;
    Ok(Json(json!({ "message": "Model removed from queue" })))
}

#[derive(Debug, Deserialize)]
struct CancelRequest {
    /// Backend URL or model name to cancel.
    id: String,
}

/// Request cancellation of an in-flight download (`POST /api/queue/cancel`).
async fn cancel_downloads(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CancelRequest>,
) -> Result<Json<Value>, ServerError> {
    if req.id.is_empty() {
        return Err(ServerError::BadRequest(
            "cancellation target is required".to_owned(),
        ));
    }
    state.downloads.cancel_downloads(&req.id).await?;
    Ok(Json(json!({ "message": "Cancellation requested" })))
}

/// Stream download progress as Server-Sent Events
/// (`GET /api/queue/inProgress`).
///
/// Each event is `data: <json status>`.  The stream ends when the client
/// disconnects; dropping the receiver detaches the underlying bus
/// subscription.
async fn in_progress(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<Identity>,
) -> Result<Sse<impl tokio_stream::Stream<Item = Result<Event, Infallible>>>, ServerError> {
    let (tx, rx) = tokio::sync::mpsc::channel(16);
    state.downloads.in_progress(&identity, tx).await?;

    let stream = ReceiverStream::new(rx).map(|status| {
        let data = serde_json::to_string(&status).unwrap_or_default();
        Ok::<Event, Infallible>(Event::default().data(data))
    });
    Ok(Sse::new(stream))
}

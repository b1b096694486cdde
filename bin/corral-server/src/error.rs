//! Unified server error type.
//!
//! Every handler returns `Result<T, ServerError>`, which implements
//! [`axum::response::IntoResponse`] so errors become a JSON-body HTTP
//! response with an appropriate status code.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use corral_store::StoreError;
use serde_json::json;
use thiserror::Error;

/// All errors that can occur in the request lifecycle.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Backend create/update validation failed.
    #[error("invalid backend data: {0}")]
    InvalidBackend(String),

    /// The caller referenced a resource that does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// The caller sent an invalid or malformed request.
    #[error("bad request: {0}")]
    BadRequest(String),

    /// No usable identity on a protected operation.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// The identity lacks the required permission.
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// Propagated from the catalog.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Propagated from the runtime engine.
    #[error("runtime error: {0}")]
    Runtime(#[from] corral_runtime::RuntimeError),

    /// Propagated from the message bus.
    #[error("bus error: {0}")]
    Bus(#[from] corral_bus::BusError),

    /// Propagated from the resolver.
    #[error("resolve error: {0}")]
    Resolve(#[from] corral_resolver::ResolveError),
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let status = match &self {
            ServerError::InvalidBackend(_) | ServerError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ServerError::NotFound(_) | ServerError::Store(StoreError::NotFound) => {
                StatusCode::NOT_FOUND
            }
            ServerError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ServerError::Forbidden(_) => StatusCode::FORBIDDEN,
            ServerError::Store(StoreError::Conflict(_)) => StatusCode::CONFLICT,
            ServerError::Resolve(e) => match e {
                corral_resolver::ResolveError::ModelNameRequired => StatusCode::BAD_REQUEST,
                corral_resolver::ResolveError::NoAvailableModels
                | corral_resolver::ResolveError::NoSatisfactoryModel => StatusCode::NOT_FOUND,
                corral_resolver::ResolveError::Providers(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
            ServerError::Store(_) | ServerError::Runtime(_) | ServerError::Bus(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

//! Identity extraction and service authorization.
//!
//! The transport layer only extracts the caller's bearer token into an
//! [`Identity`] request extension; interpreting it happens here.  When
//! authorization is disabled (the default), every check passes, which keeps
//! single-operator deployments friction-free.  When enabled, an identity
//! needs a stored access entry for `(identity, service, permission)`.

use std::sync::Arc;

use axum::extract::Request;
use axum::http::header::AUTHORIZATION;
use axum::middleware::Next;
use axum::response::Response;
use corral_store::{Catalog, Permission};

use crate::error::ServerError;

/// The caller's identity, as extracted from the request.
#[derive(Debug, Clone, Default)]
pub struct Identity {
    /// Bearer token subject; `None` for anonymous requests.
    pub subject: Option<String>,
}

/// Copies the bearer token (if any) into an [`Identity`] extension so
/// handlers and services never touch raw headers.
pub async fn identity_middleware(mut req: Request, next: Next) -> Response {
    let subject = req
        .headers()
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .filter(|t| !t.is_empty())
        .map(str::to_owned);
    req.extensions_mut().insert(Identity { subject });
    next.run(req).await
}

/// Checks service-level permissions against the catalog's access entries.
#[derive(Clone)]
pub struct Authorizer {
    enabled: bool,
    catalog: Arc<Catalog>,
}

impl Authorizer {
    pub fn new(enabled: bool, catalog: Arc<Catalog>) -> Self {
        Self { enabled, catalog }
    }

    /// Require `permission` on `resource` for the given identity.
    pub async fn check(
        &self,
        identity: &Identity,
        resource: &str,
        permission: Permission,
    ) -> Result<(), ServerError> {
        if !self.enabled {
            return Ok(());
        }
        let subject = identity
            .subject
            .as_deref()
            .ok_or_else(|| ServerError::Unauthorized("missing bearer token".to_owned()))?;
        if self
            .catalog
            .has_permission(subject, resource, permission)
            .await?
        {
            Ok(())
        } else {
            Err(ServerError::Forbidden(format!(
                "{subject} lacks {} on {resource}",
                permission.as_str()
            )))
        }
    }
}

//! Validated CRUD over declared backends.

use std::sync::Arc;

use chrono::Utc;
use corral_store::{Backend, Catalog, Permission, BACKEND_TYPE_OLLAMA};
use serde::Deserialize;

use crate::auth::{Authorizer, Identity};
use crate::error::ServerError;

/// Operator input for creating or updating a backend.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackendSpec {
    pub name: String,
    pub base_url: String,
    #[serde(rename = "type")]
    pub backend_type: String,
}

#[derive(Clone)]
pub struct BackendService {
    catalog: Arc<Catalog>,
    auth: Authorizer,
}

fn validate(spec: &BackendSpec) -> Result<(), ServerError> {
    if spec.name.is_empty() {
        return Err(ServerError::InvalidBackend("name is required".to_owned()));
    }
    if spec.base_url.is_empty() {
        return Err(ServerError::InvalidBackend("baseURL is required".to_owned()));
    }
    if spec.backend_type != BACKEND_TYPE_OLLAMA {
        return Err(ServerError::InvalidBackend(format!(
            "type is required to be {BACKEND_TYPE_OLLAMA}"
        )));
    }
    Ok(())
}

impl BackendService {
    pub const NAME: &'static str = "backendservice";

    pub fn new(catalog: Arc<Catalog>, auth: Authorizer) -> Self {
        Self { catalog, auth }
    }

    pub async fn create(
        &self,
        identity: &Identity,
        spec: BackendSpec,
    ) -> Result<Backend, ServerError> {
        self.auth
            .check(identity, Self::NAME, Permission::Manage)
            .await?;
        validate(&spec)?;
        let now = Utc::now();
        let backend = Backend {
            id: uuid::Uuid::new_v4().to_string(),
            name: spec.name,
            base_url: spec.base_url,
            backend_type: spec.backend_type,
            created_at: now,
            updated_at: now,
        };
        self.catalog.create_backend(&backend).await?;
        Ok(backend)
    }

    pub async fn get(&self, identity: &Identity, id: &str) -> Result<Backend, ServerError> {
        self.auth
            .check(identity, Self::NAME, Permission::View)
            .await?;
        Ok(self.catalog.get_backend(id).await?)
    }

    pub async fn update(
        &self,
        identity: &Identity,
        id: &str,
        spec: BackendSpec,
    ) -> Result<Backend, ServerError> {
        validate(&spec)?;
        self.auth
            .check(identity, Self::NAME, Permission::Manage)
            .await?;
        let mut backend = self.catalog.get_backend(id).await?;
        backend.name = spec.name;
        backend.base_url = spec.base_url;
        backend.backend_type = spec.backend_type;
        backend.updated_at = Utc::now();
        self.catalog.update_backend(&backend).await?;
        Ok(backend)
    }

    pub async fn delete(&self, identity: &Identity, id: &str) -> Result<(), ServerError> {
        self.auth
            .check(identity, Self::NAME, Permission::Manage)
            .await?;
        Ok(self.catalog.delete_backend(id).await?)
    }

    pub async fn list(&self, identity: &Identity) -> Result<Vec<Backend>, ServerError> {
        self.auth
            .check(identity, Self::NAME, Permission::View)
            .await?;
        Ok(self.catalog.list_backends().await?)
    }
}

//! Declared-model management.

use std::sync::Arc;

use chrono::Utc;
use corral_store::{Catalog, Model, Permission};

use crate::auth::{Authorizer, Identity};
use crate::error::ServerError;

#[derive(Clone)]
pub struct ModelService {
    catalog: Arc<Catalog>,
    auth: Authorizer,
}

impl ModelService {
    pub const NAME: &'static str = "modelservice";

    pub fn new(catalog: Arc<Catalog>, auth: Authorizer) -> Self {
        Self { catalog, auth }
    }

    /// Declare a model.  The reconciler picks it up on its next cycle.
    pub async fn append(&self, identity: &Identity, model: &str) -> Result<Model, ServerError> {
        self.auth
            .check(identity, Self::NAME, Permission::Manage)
            .await?;
        if model.is_empty() {
            return Err(ServerError::BadRequest("model name is required".to_owned()));
        }
        let now = Utc::now();
        let record = Model {
            id: uuid::Uuid::new_v4().to_string(),
            model: model.to_owned(),
            created_at: now,
            updated_at: now,
        };
        self.catalog.append_model(&record).await?;
        Ok(record)
    }

    pub async fn list(&self, identity: &Identity) -> Result<Vec<Model>, ServerError> {
        self.auth
            .check(identity, Self::NAME, Permission::View)
            .await?;
        Ok(self.catalog.list_models().await?)
    }

    /// Undeclare a model by canonical name.  The reconciler will delete it
    /// from backends on following cycles.
    pub async fn remove(&self, identity: &Identity, model: &str) -> Result<(), ServerError> {
        self.auth
            .check(identity, Self::NAME, Permission::Manage)
            .await?;
        Ok(self.catalog.delete_model(model).await?)
    }
}

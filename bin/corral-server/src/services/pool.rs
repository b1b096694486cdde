//! Pool management: named groupings of backends and models.

use std::sync::Arc;

use chrono::Utc;
use corral_store::{Backend, Catalog, Model, Permission, Pool};

use crate::auth::{Authorizer, Identity};
use crate::error::ServerError;

#[derive(Clone)]
pub struct PoolService {
    catalog: Arc<Catalog>,
    auth: Authorizer,
}

impl PoolService {
    pub const NAME: &'static str = "poolservice";

    pub fn new(catalog: Arc<Catalog>, auth: Authorizer) -> Self {
        Self { catalog, auth }
    }

    pub async fn create(&self, identity: &Identity, name: &str) -> Result<Pool, ServerError> {
        self.auth
            .check(identity, Self::NAME, Permission::Manage)
            .await?;
        if name.is_empty() {
            return Err(ServerError::BadRequest("pool name is required".to_owned()));
        }
        let now = Utc::now();
        let pool = Pool {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.to_owned(),
            created_at: now,
            updated_at: now,
        };
        self.catalog.create_pool(&pool).await?;
        Ok(pool)
    }

    pub async fn get(&self, identity: &Identity, id: &str) -> Result<Pool, ServerError> {
        self.auth
            .check(identity, Self::NAME, Permission::View)
            .await?;
        Ok(self.catalog.get_pool(id).await?)
    }

    pub async fn list(&self, identity: &Identity) -> Result<Vec<Pool>, ServerError> {
        self.auth
            .check(identity, Self::NAME, Permission::View)
            .await?;
        Ok(self.catalog.list_pools().await?)
    }

    pub async fn delete(&self, identity: &Identity, id: &str) -> Result<(), ServerError> {
        self.auth
            .check(identity, Self::NAME, Permission::Manage)
            .await?;
        Ok(self.catalog.delete_pool(id).await?)
    }

    pub async fn assign_backend(
        &self,
        identity: &Identity,
        pool_id: &str,
        backend_id: &str,
    ) -> Result<(), ServerError> {
        self.auth
            .check(identity, Self::NAME, Permission::Manage)
            .await?;
        // Validate both sides exist so a typo doesn't silently create an
        // orphan association.
        self.catalog.get_pool(pool_id).await?;
        self.catalog.get_backend(backend_id).await?;
        Ok(self.catalog.assign_backend(pool_id, backend_id).await?)
    }

    pub async fn remove_backend(
        &self,
        identity: &Identity,
        pool_id: &str,
        backend_id: &str,
    ) -> Result<(), ServerError> {
        self.auth
            .check(identity, Self::NAME, Permission::Manage)
            .await?;
        Ok(self.catalog.remove_backend(pool_id, backend_id).await?)
    }

    pub async fn assign_model(
        &self,
        identity: &Identity,
        pool_id: &str,
        model_id: &str,
    ) -> Result<(), ServerError> {
        self.auth
            .check(identity, Self::NAME, Permission::Manage)
            .await?;
        self.catalog.get_pool(pool_id).await?;
        Ok(self.catalog.assign_model(pool_id, model_id).await?)
    }

    pub async fn remove_model(
        &self,
        identity: &Identity,
        pool_id: &str,
        model_id: &str,
    ) -> Result<(), ServerError> {
        self.auth
            .check(identity, Self::NAME, Permission::Manage)
            .await?;
        Ok(self.catalog.remove_model(pool_id, model_id).await?)
    }

    pub async fn list_backends(
        &self,
        identity: &Identity,
        pool_id: &str,
    ) -> Result<Vec<Backend>, ServerError> {
        self.auth
            .check(identity, Self::NAME, Permission::View)
            .await?;
        Ok(self.catalog.list_backends_for_pool(pool_id).await?)
    }

    pub async fn list_models(
        &self,
        identity: &Identity,
        pool_id: &str,
    ) -> Result<Vec<Model>, ServerError> {
        self.auth
            .check(identity, Self::NAME, Permission::View)
            .await?;
        Ok(self.catalog.list_models_for_pool(pool_id).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use corral_store::BACKEND_TYPE_OLLAMA;

    async fn setup() -> (Arc<Catalog>, PoolService) {
        let catalog = Arc::new(Catalog::connect_in_memory().await.expect("connect"));
        let service = PoolService::new(Arc::clone(&catalog), Authorizer::new(false, Arc::clone(&catalog)));
        (catalog, service)
    }

    #[tokio::test]
    async fn create_and_assign_backend() {
        let (catalog, service) = setup().await;
        let pool = service
            .create(&Identity::default(), "gpu-pool")
            .await
            .expect("create pool");

        let now = Utc::now();
        catalog
            .create_backend(&Backend {
                id: "b1".to_owned(),
                name: "one".to_owned(),
                base_url: "http://b1:11434".to_owned(),
                backend_type: BACKEND_TYPE_OLLAMA.to_owned(),
                created_at: now,
                updated_at: now,
            })
            .await
            .expect("backend");

        service
            .assign_backend(&Identity::default(), &pool.id, "b1")
            .await
            .expect("assign");

        let backends = service
            .list_backends(&Identity::default(), &pool.id)
            .await
            .expect("list");
        assert_eq!(backends.len(), 1);
        assert_eq!(backends[0].id, "b1");
    }

    #[tokio::test]
    async fn assigning_unknown_backend_fails() {
        let (_catalog, service) = setup().await;
        let pool = service
            .create(&Identity::default(), "gpu-pool")
            .await
            .expect("create pool");
        let err = service
            .assign_backend(&Identity::default(), &pool.id, "ghost")
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ServerError::Store(corral_store::StoreError::NotFound)
        ));
    }
}

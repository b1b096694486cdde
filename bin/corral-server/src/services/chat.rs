//! Resolution of inference requests against the live snapshot.

use std::sync::Arc;

use corral_resolver::{
    resolve_chat, resolve_embed, resolve_randomly, Provider, ResolveEmbedRequest, ResolveRequest,
    Selection,
};
use corral_runtime::RuntimeState;
use corral_store::Permission;

use crate::auth::{Authorizer, Identity};
use crate::error::ServerError;
use crate::services::provider::providers_from_state;

#[derive(Clone)]
pub struct ChatService {
    runtime: Arc<RuntimeState>,
    auth: Authorizer,
}

impl ChatService {
    pub const NAME: &'static str = "chatservice";

    pub fn new(runtime: Arc<RuntimeState>, auth: Authorizer) -> Self {
        Self { runtime, auth }
    }

    async fn providers(&self) -> Vec<Provider> {
        providers_from_state(&self.runtime.get().await)
    }

    /// Pick a `(provider, backend)` able to serve a chat request.
    pub async fn resolve(
        &self,
        identity: &Identity,
        req: &ResolveRequest,
    ) -> Result<Selection, ServerError> {
        self.auth
            .check(identity, Self::NAME, Permission::View)
            .await?;
        let providers = self.providers().await;
        let selection = resolve_chat(
            req,
            move |_provider_type| std::future::ready(Ok(providers.clone())),
            resolve_randomly,
        )
        .await?;
        Ok(selection)
    }

    /// Pick a `(provider, backend)` able to serve an embedding request.
    pub async fn resolve_embed(
        &self,
        identity: &Identity,
        req: &ResolveEmbedRequest,
    ) -> Result<Selection, ServerError> {
        self.auth
            .check(identity, Self::NAME, Permission::View)
            .await?;
        let providers = self.providers().await;
        let selection = resolve_embed(
            req,
            move |_provider_type| std::future::ready(Ok(providers.clone())),
            resolve_randomly,
        )
        .await?;
        Ok(selection)
    }
}

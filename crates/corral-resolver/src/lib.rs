//! Resolves an inference request to a `(provider, backend)` pair.
//!
//! A [`Provider`] is the capability view of one model: what it can do, how
//! much context it takes, and which backends currently serve it.  Resolution
//! is filter-then-select: hard constraints (capability, context length, name)
//! narrow the candidate set, then a pluggable [`Policy`] picks one provider
//! and one of its backends.  The built-in policy is [`resolve_randomly`];
//! anything with the same signature plugs in, so smarter strategies need no
//! changes here.

use rand::Rng;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Capability record for one model, as observed across the fleet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Provider {
    pub id: String,
    /// Canonical model name, e.g. `llama2:latest`.
    pub name: String,
    pub context_length: u64,
    pub can_chat: bool,
    pub can_embed: bool,
    pub can_prompt: bool,
    pub can_stream: bool,
    /// Backends currently able to serve this model.  Never empty for a
    /// candidate that survives filtering.
    pub backends: Vec<String>,
}

/// Constraints for resolving a chat request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolveRequest {
    /// Acceptable model names; empty means any model.
    #[serde(default)]
    pub model_names: Vec<String>,
    /// Minimum context length the conversation needs.
    #[serde(default)]
    pub context_length: u64,
    /// Backend types to draw providers from; empty means the default type.
    #[serde(default)]
    pub provider_types: Vec<String>,
}

/// Constraints for resolving an embedding request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolveEmbedRequest {
    pub model_name: String,
    #[serde(default)]
    pub provider_types: Vec<String>,
}

/// The chosen `(provider, backend)` pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Selection {
    pub provider: Provider,
    pub backend_id: String,
}

#[derive(Debug, Error)]
pub enum ResolveError {
    /// The provider source returned nothing at all.
    #[error("no models are currently available")]
    NoAvailableModels,

    /// Providers exist but none satisfies the request, or the selected
    /// candidate has no backends.
    #[error("no model satisfies the request")]
    NoSatisfactoryModel,

    /// An embedding request without a model name.  The message text is load
    /// bearing: clients match it verbatim.
    #[error("model name is required")]
    ModelNameRequired,

    /// Failure while materializing the provider list.
    #[error("listing providers: {0}")]
    Providers(#[from] anyhow::Error),
}

/// A selection policy over the filtered candidate set.
///
/// Policies must pick both the provider and one of its backends; assuming a
/// single backend per provider is a bug.
pub type Policy = fn(&[Provider]) -> Result<Selection, ResolveError>;

const DEFAULT_PROVIDER_TYPE: &str = "Ollama";

async fn gather_providers<F, Fut>(
    provider_types: &[String],
    get_models: &F,
) -> Result<Vec<Provider>, ResolveError>
where
    F: Fn(String) -> Fut,
    Fut: std::future::Future<Output = Result<Vec<Provider>, anyhow::Error>>,
{
    let mut providers = Vec::new();
    if provider_types.is_empty() {
        providers.extend(get_models(DEFAULT_PROVIDER_TYPE.to_owned()).await?);
    } else {
        for provider_type in provider_types {
            providers.extend(get_models(provider_type.clone()).await?);
        }
    }
    Ok(providers)
}

/// Resolve a chat request.
///
/// Filters providers on chat capability, context length, requested model
/// names (empty list admits any), and a non-empty backend list, then hands
/// the survivors to `policy`.
pub async fn resolve_chat<F, Fut>(
    req: &ResolveRequest,
    get_models: F,
    policy: Policy,
) -> Result<Selection, ResolveError>
where
    F: Fn(String) -> Fut,
    Fut: std::future::Future<Output = Result<Vec<Provider>, anyhow::Error>>,
{
    let providers = gather_providers(&req.provider_types, &get_models).await?;
    if providers.is_empty() {
        return Err(ResolveError::NoAvailableModels);
    }

    let candidates: Vec<Provider> = providers
        .into_iter()
        .filter(|p| {
            p.can_chat
                && p.context_length >= req.context_length
                && (req.model_names.is_empty() || req.model_names.contains(&p.name))
                && !p.backends.is_empty()
        })
        .collect();

    if candidates.is_empty() {
        return Err(ResolveError::NoSatisfactoryModel);
    }
    policy(&candidates)
}

/// Resolve an embedding request: exact name match plus embed capability.
pub async fn resolve_embed<F, Fut>(
    req: &ResolveEmbedRequest,
    get_models: F,
    policy: Policy,
) -> Result<Selection, ResolveError>
where
    F: Fn(String) -> Fut,
    Fut: std::future::Future<Output = Result<Vec<Provider>, anyhow::Error>>,
{
    if req.model_name.is_empty() {
        return Err(ResolveError::ModelNameRequired);
    }

    let providers = gather_providers(&req.provider_types, &get_models).await?;
    if providers.is_empty() {
        return Err(ResolveError::NoAvailableModels);
    }

    let candidates: Vec<Provider> = providers
        .into_iter()
        .filter(|p| p.can_embed && p.name == req.model_name && !p.backends.is_empty())
        .collect();

    if candidates.is_empty() {
        return Err(ResolveError::NoSatisfactoryModel);
    }
    policy(&candidates)
}

/// Built-in policy: a uniformly random provider, then a uniformly random
/// backend of that provider.
pub fn resolve_randomly(candidates: &[Provider]) -> Result<Selection, ResolveError> {
    if candidates.is_empty() {
        return Err(ResolveError::NoSatisfactoryModel);
    }
    let mut rng = rand::thread_rng();
    let provider = &candidates[rng.gen_range(0..candidates.len())];
    if provider.backends.is_empty() {
        // Unreachable through the public entry points, which filter empty
        // backend lists; kept as a guard for custom callers.
        return Err(ResolveError::NoSatisfactoryModel);
    }
    let backend_id = provider.backends[rng.gen_range(0..provider.backends.len())].clone();
    Ok(Selection {
        provider: provider.clone(),
        backend_id,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provider(id: &str, name: &str) -> Provider {
        Provider {
            id: id.to_owned(),
            name: name.to_owned(),
            context_length: 4096,
            can_chat: false,
            can_embed: false,
            can_prompt: false,
            can_stream: false,
            backends: vec![],
        }
    }

    fn source(providers: Vec<Provider>) -> impl Fn(String) -> std::future::Ready<Result<Vec<Provider>, anyhow::Error>>
    {
        move |_provider_type| std::future::ready(Ok(providers.clone()))
    }

    #[tokio::test]
    async fn chat_exact_model_match() {
        let mut p = provider("1", "llama2:latest");
        p.can_chat = true;
        p.backends = vec!["b1".to_owned()];

        let req = ResolveRequest {
            model_names: vec!["llama2:latest".to_owned()],
            context_length: 4096,
            ..Default::default()
        };

        let selection = resolve_chat(&req, source(vec![p]), resolve_randomly)
            .await
            .expect("should resolve");
        assert_eq!(selection.provider.id, "1");
        assert_eq!(selection.backend_id, "b1");
    }

    #[tokio::test]
    async fn chat_no_models_available() {
        let req = ResolveRequest::default();
        let err = resolve_chat(&req, source(vec![]), resolve_randomly)
            .await
            .unwrap_err();
        assert!(matches!(err, ResolveError::NoAvailableModels));
    }

    #[tokio::test]
    async fn chat_insufficient_context_length() {
        let mut p = provider("1", "llama2:latest");
        p.can_chat = true;
        p.backends = vec!["b1".to_owned()];

        let req = ResolveRequest {
            context_length: 8000,
            ..Default::default()
        };
        let err = resolve_chat(&req, source(vec![p]), resolve_randomly)
            .await
            .unwrap_err();
        assert!(matches!(err, ResolveError::NoSatisfactoryModel));
    }

    #[tokio::test]
    async fn chat_name_mismatch() {
        let mut p = provider("2", "smollm2");
        p.can_chat = true;
        p.backends = vec!["b2".to_owned()];

        let req = ResolveRequest {
            model_names: vec!["smollm2:135m".to_owned()],
            ..Default::default()
        };
        let err = resolve_chat(&req, source(vec![p]), resolve_randomly)
            .await
            .unwrap_err();
        assert!(matches!(err, ResolveError::NoSatisfactoryModel));
    }

    #[tokio::test]
    async fn chat_skips_provider_without_backends() {
        let mut orphan = provider("1", "llama2:latest");
        orphan.can_chat = true;
        let mut served = provider("2", "llama2:latest");
        served.can_chat = true;
        served.backends = vec!["b2".to_owned()];

        let req = ResolveRequest::default();
        let selection = resolve_chat(&req, source(vec![orphan, served]), resolve_randomly)
            .await
            .expect("should resolve to the served provider");
        assert_eq!(selection.provider.id, "2");
        assert_eq!(selection.backend_id, "b2");
    }

    #[tokio::test]
    async fn embed_exact_model_match() {
        let mut p = provider("p1", "text-embed-model");
        p.can_embed = true;
        p.backends = vec!["b1".to_owned()];

        let req = ResolveEmbedRequest {
            model_name: "text-embed-model".to_owned(),
            ..Default::default()
        };
        let selection = resolve_embed(&req, source(vec![p]), resolve_randomly)
            .await
            .expect("should resolve");
        assert_eq!(selection.provider.id, "p1");
    }

    #[tokio::test]
    async fn embed_requires_model_name() {
        let mut p = provider("p1", "text-embed-model");
        p.can_embed = true;
        p.backends = vec!["b1".to_owned()];

        let req = ResolveEmbedRequest::default();
        let err = resolve_embed(&req, source(vec![p]), resolve_randomly)
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "model name is required");
    }

    #[tokio::test]
    async fn embed_no_models_available() {
        let req = ResolveEmbedRequest {
            model_name: "text-embed-model".to_owned(),
            ..Default::default()
        };
        let err = resolve_embed(&req, source(vec![]), resolve_randomly)
            .await
            .unwrap_err();
        assert!(matches!(err, ResolveError::NoAvailableModels));
    }

    #[tokio::test]
    async fn embed_name_mismatch() {
        let mut p = provider("p1", "text-embed-model");
        p.can_embed = true;
        p.backends = vec!["b1".to_owned()];

        let req = ResolveEmbedRequest {
            model_name: "non-existent-model".to_owned(),
            ..Default::default()
        };
        let err = resolve_embed(&req, source(vec![p]), resolve_randomly)
            .await
            .unwrap_err();
        assert!(matches!(err, ResolveError::NoSatisfactoryModel));
    }

    #[tokio::test]
    async fn embed_capability_mismatch() {
        let mut p = provider("p4", "text-embed-model");
        p.can_embed = false;
        p.backends = vec!["b4".to_owned()];

        let req = ResolveEmbedRequest {
            model_name: "text-embed-model".to_owned(),
            ..Default::default()
        };
        let err = resolve_embed(&req, source(vec![p]), resolve_randomly)
            .await
            .unwrap_err();
        assert!(matches!(err, ResolveError::NoSatisfactoryModel));
    }

    #[tokio::test]
    async fn embed_provider_without_backends() {
        let mut p = provider("p2", "text-embed-model");
        p.can_embed = true;
        // No backends: filtered out before the policy runs.

        let req = ResolveEmbedRequest {
            model_name: "text-embed-model".to_owned(),
            ..Default::default()
        };
        let err = resolve_embed(&req, source(vec![p]), resolve_randomly)
            .await
            .unwrap_err();
        assert!(matches!(err, ResolveError::NoSatisfactoryModel));
    }

    #[tokio::test]
    async fn embed_multiple_candidates_selects_one() {
        let mut a = provider("p1", "text-embed-model");
        a.can_embed = true;
        a.backends = vec!["b1".to_owned()];
        let mut b = provider("p6", "text-embed-model");
        b.can_embed = true;
        b.backends = vec!["b6".to_owned()];

        let req = ResolveEmbedRequest {
            model_name: "text-embed-model".to_owned(),
            ..Default::default()
        };
        let selection = resolve_embed(&req, source(vec![a, b]), resolve_randomly)
            .await
            .expect("should resolve");
        assert!(["p1", "p6"].contains(&selection.provider.id.as_str()));
    }

    #[test]
    fn random_policy_rejects_empty_candidates() {
        let err = resolve_randomly(&[]).unwrap_err();
        assert!(matches!(err, ResolveError::NoSatisfactoryModel));
    }

    #[test]
    fn random_policy_rejects_backendless_provider() {
        let p = provider("p1", "m");
        let err = resolve_randomly(&[p]).unwrap_err();
        assert!(matches!(err, ResolveError::NoSatisfactoryModel));
    }
}

//! Materializes resolver [`Provider`] views from the runtime snapshot.
//!
//! One provider per distinct pulled model name, carrying every backend id
//! that currently hosts it.  Capability defaults are deliberately broad:
//! every hosted model can chat, prompt, and stream; embedding capability is
//! inferred from the model name until backends report richer metadata.

use std::collections::{BTreeMap, HashMap};

use corral_resolver::Provider;
use corral_runtime::LlmState;

/// Context length assumed for providers until per-model metadata exists.
pub const DEFAULT_CONTEXT_LENGTH: u64 = 4096;

fn looks_like_embedder(model: &str) -> bool {
    let lower = model.to_ascii_lowercase();
    lower.contains("embed") || lower.contains("bge") || lower.contains("minilm")
}

/// Build the provider list from an observed-state snapshot.
///
/// Backends in an error state are skipped: their pulled-model list is stale
/// and routing a request at them would fail anyway.
pub fn providers_from_state(state: &HashMap<String, LlmState>) -> Vec<Provider> {
    let mut backends_by_model: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for entry in state.values() {
        if entry.error.is_some() {
            continue;
        }
        for model in &entry.pulled_models {
            backends_by_model
                .entry(model.model.clone())
                .or_default()
                .push(entry.id.clone());
        }
    }

    backends_by_model
        .into_iter()
        .map(|(name, mut backends)| {
            backends.sort();
            Provider {
                id: name.clone(),
                can_embed: looks_like_embedder(&name),
                name,
                context_length: DEFAULT_CONTEXT_LENGTH,
                can_chat: true,
                can_prompt: true,
                can_stream: true,
                backends,
            }
        })
        .collect()
}

//! Provider client abstraction: one uniform chat-completion capability over
//! N remote backends, plus the embedding capability used for semantic
//! scoring.
//!
//! Clients normalize every backend's request/response/usage shapes into
//! [`ProviderReply`]; they perform no retries and hold no circuit logic —
//! that is the job of [`crate::breaker`].

use crate::config::ModelConfig;
use crate::error::{OrchestratorError, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

pub(crate) mod remote_common;

#[cfg(feature = "provider-anthropic")]
pub mod anthropic;
#[cfg(feature = "provider-openai")]
pub mod embedding;
#[cfg(feature = "provider-gemini")]
pub mod gemini;
#[cfg(feature = "provider-openai")]
pub mod openai;
#[cfg(feature = "provider-xai")]
pub mod xai;

/// One turn of a chat conversation sent to a provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatMessage {
    /// `"system"`, `"user"`, or `"assistant"`.
    pub role: &'static str,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system",
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user",
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant",
            content: content.into(),
        }
    }
}

/// Sampling and length parameters for a single call.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CallParams {
    pub max_tokens: u32,
    pub temperature: f32,
}

impl Default for CallParams {
    fn default() -> Self {
        Self {
            max_tokens: 400,
            temperature: 0.7,
        }
    }
}

/// Token counts reported by the provider for one call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

/// Normalized result of one provider call.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderReply {
    pub content: String,
    pub usage: TokenUsage,
    /// Wall-clock latency measured inside the client.
    pub latency_ms: u64,
}

/// The single capability every chat backend is adapted to.
///
/// Implementations map their wire format into [`ProviderReply`] and their
/// failure modes into the crate's coarse error categories (429 →
/// [`OrchestratorError::RateLimited`], 5xx → `Transport`, unusable body →
/// `InvalidResponse`).
#[async_trait]
pub trait ProviderClient: Send + Sync {
    /// Provider family tag (e.g. `"openai"`, `"anthropic"`, `"gemini"`).
    fn provider_id(&self) -> &'static str;

    /// Execute one chat completion against `model` (the provider's own model
    /// name, not the catalog tag).
    async fn call(
        &self,
        model: &str,
        messages: &[ChatMessage],
        params: &CallParams,
    ) -> Result<ProviderReply>;
}

/// Capability for producing dense vector embeddings, used by the
/// calibration module for reference-similarity scoring. Subject to the same
/// breaker policy as chat clients.
#[async_trait]
pub trait EmbeddingClient: Send + Sync {
    fn provider_id(&self) -> &'static str;

    /// Embed a batch of texts into dense vectors, one per input.
    async fn embed(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>>;
}

/// A catalog entry bound to the client that serves it.
#[derive(Clone)]
pub struct RegisteredModel {
    pub config: ModelConfig,
    pub client: Arc<dyn ProviderClient>,
}

/// Maps stable model IDs to `(client, config)` pairs.
///
/// Built once at startup from the config catalog and the set of registered
/// provider clients; an entry whose provider has no registered client is a
/// configuration error.
#[derive(Default)]
pub struct ProviderRegistry {
    models: HashMap<String, RegisteredModel>,
}

impl ProviderRegistry {
    /// Build a registry by joining `catalog` against `clients` keyed by
    /// provider family.
    pub fn from_catalog(
        catalog: &[ModelConfig],
        clients: &HashMap<String, Arc<dyn ProviderClient>>,
    ) -> Result<Self> {
        let mut registry = Self::default();
        for config in catalog {
            let client = clients.get(&config.provider).ok_or_else(|| {
                OrchestratorError::Config(format!(
                    "No client registered for provider '{}' (model '{}')",
                    config.provider, config.model_id
                ))
            })?;
            registry.insert(config.clone(), client.clone())?;
        }
        Ok(registry)
    }

    /// Register a single model. Duplicate model IDs are rejected.
    pub fn insert(&mut self, config: ModelConfig, client: Arc<dyn ProviderClient>) -> Result<()> {
        config.validate()?;
        if self.models.contains_key(&config.model_id) {
            return Err(OrchestratorError::Config(format!(
                "Model '{}' already registered",
                config.model_id
            )));
        }
        self.models
            .insert(config.model_id.clone(), RegisteredModel { config, client });
        Ok(())
    }

    /// Look up a model by its stable tag.
    pub fn get(&self, model_id: &str) -> Result<&RegisteredModel> {
        self.models
            .get(model_id)
            .ok_or_else(|| OrchestratorError::ModelNotFound(model_id.to_string()))
    }

    /// Whether the registry knows this model ID.
    pub fn contains(&self, model_id: &str) -> bool {
        self.models.contains_key(model_id)
    }

    /// All registered model IDs, sorted for deterministic iteration.
    pub fn model_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.models.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// All registered models for a given provider family, sorted by ID.
    pub fn models_for_provider(&self, provider: &str) -> Vec<&RegisteredModel> {
        let mut out: Vec<&RegisteredModel> = self
            .models
            .values()
            .filter(|m| m.config.provider == provider)
            .collect();
        out.sort_by(|a, b| a.config.model_id.cmp(&b.config.model_id));
        out
    }

    /// Distinct provider families present in the registry, sorted.
    pub fn providers(&self) -> Vec<String> {
        let mut providers: Vec<String> = self
            .models
            .values()
            .map(|m| m.config.provider.clone())
            .collect();
        providers.sort();
        providers.dedup();
        providers
    }

    /// Number of registered models.
    pub fn len(&self) -> usize {
        self.models.len()
    }

    /// Whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }
}

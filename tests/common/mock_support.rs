//! Shared mock provider clients for the integration tests.

use async_trait::async_trait;
use conclave::config::{EnsembleConfig, ModelConfig};
use conclave::error::{OrchestratorError, Result};
use conclave::provider::{CallParams, ChatMessage, ProviderClient, ProviderReply, TokenUsage};
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

/// What a [`MockClient`] does on every call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Behavior {
    Succeed,
    FailTransport,
    FailRateLimited,
}

/// Configurable mock chat backend.
pub struct MockClient {
    provider: &'static str,
    reply: String,
    delay_ms: u64,
    behavior: Behavior,
    calls: AtomicU32,
}

impl MockClient {
    pub fn new(provider: &'static str, reply: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            provider,
            reply: reply.into(),
            delay_ms: 0,
            behavior: Behavior::Succeed,
            calls: AtomicU32::new(0),
        })
    }

    pub fn slow(provider: &'static str, reply: impl Into<String>, delay_ms: u64) -> Arc<Self> {
        Arc::new(Self {
            provider,
            reply: reply.into(),
            delay_ms,
            behavior: Behavior::Succeed,
            calls: AtomicU32::new(0),
        })
    }

    pub fn failing(provider: &'static str, behavior: Behavior) -> Arc<Self> {
        Arc::new(Self {
            provider,
            reply: String::new(),
            delay_ms: 0,
            behavior,
            calls: AtomicU32::new(0),
        })
    }

    pub fn call_count(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ProviderClient for MockClient {
    fn provider_id(&self) -> &'static str {
        self.provider
    }

    async fn call(
        &self,
        _model: &str,
        messages: &[ChatMessage],
        _params: &CallParams,
    ) -> Result<ProviderReply> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        if self.delay_ms > 0 {
            tokio::time::sleep(std::time::Duration::from_millis(self.delay_ms)).await;
        }

        match self.behavior {
            Behavior::Succeed => {
                let input_tokens: u64 = messages
                    .iter()
                    .map(|m| m.content.split_whitespace().count() as u64)
                    .sum();
                Ok(ProviderReply {
                    content: self.reply.clone(),
                    usage: TokenUsage {
                        input_tokens,
                        output_tokens: self.reply.split_whitespace().count() as u64,
                    },
                    latency_ms: self.delay_ms.max(25),
                })
            }
            Behavior::FailTransport => {
                Err(OrchestratorError::Transport("mock transport failure".into()))
            }
            Behavior::FailRateLimited => Err(OrchestratorError::RateLimited),
        }
    }
}

/// A catalog entry pointing at a mock provider family.
pub fn model(model_id: &str, provider: &str) -> ModelConfig {
    ModelConfig {
        model_id: model_id.to_string(),
        provider: provider.to_string(),
        model: model_id.to_string(),
        max_tokens: 400,
        temperature: 0.7,
        timeout_ms: 2_000,
        input_cost_per_1k: 0.00015,
        output_cost_per_1k: 0.0006,
    }
}

/// A 250-word-scale answer distinct per `angle`, substantial enough to pass
/// quality scoring.
pub fn detailed_answer(angle: &str) -> String {
    format!(
        "## Microservices compared with monolithic architectures: {}\n\n\
         Microservices decompose an application into independently deployable \
         services, because each service owns its own data store, release cadence, \
         and failure domain. For example, a payment service can scale to 10 \
         instances during a sale while the catalog service stays at 2. This means \
         teams ship without coordinating a single release train.\n\n\
         - Monolithic architectures deploy as one artifact with one database\n\
         - Microservices communicate over the network and need service discovery\n\
         - Operational cost differs sharply: 1 pipeline versus 20 pipelines\n\n\
         Monolithic systems keep transactions simple and latency low since every \
         call is in-process. In contrast, distributed systems pay for network hops \
         with retries, timeouts, and eventual consistency. Therefore the right \
         choice depends on team size, domain complexity, and scaling pressure. \
         As a result, small teams usually start monolithic and split out services \
         when {} becomes the bottleneck.",
        angle, angle
    )
}

/// Default config wired to the standard three-provider mock catalog.
pub fn base_config() -> EnsembleConfig {
    let mut config = EnsembleConfig::default();
    config.models = vec![
        model("gpt-4o-mini", "openai"),
        model("claude-3-5-haiku", "anthropic"),
        model("gemini-2.0-flash", "gemini"),
    ];
    config.synthesis.model = "gpt-4o-mini".to_string();
    config.fallback.stable_model = "gpt-4o-mini".to_string();
    config.meta_voter.model = "gpt-4o-mini".to_string();
    // Tests that want the meta-voter opt in explicitly.
    config.meta_voter.trigger.max_weight_difference = 0.0;
    config
}

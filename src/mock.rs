#![allow(dead_code)]

//! Mock implementations for testing
//!
//! This module provides mock provider clients and collaborators for unit
//! tests. All types are gated with `#[cfg(test)]`.

use crate::config::ModelConfig;
use crate::error::{OrchestratorError, Result};
use crate::orchestrator::{AuthTier, SessionMemory, StoredTurn};
use crate::provider::{
    CallParams, ChatMessage, EmbeddingClient, ProviderClient, ProviderReply, TokenUsage,
};
use async_trait::async_trait;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};

/// Failure modes a mock client can produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockFailure {
    RateLimited,
    Timeout,
    Transport,
    InvalidResponse,
}

impl MockFailure {
    pub fn to_error(self) -> OrchestratorError {
        match self {
            Self::RateLimited => OrchestratorError::RateLimited,
            Self::Timeout => OrchestratorError::Timeout,
            Self::Transport => OrchestratorError::Transport("mock transport failure".into()),
            Self::InvalidResponse => {
                OrchestratorError::InvalidResponse("mock invalid response".into())
            }
        }
    }
}

/// Mock chat client with configurable reply, delay, and failure behavior.
pub struct MockChatClient {
    provider: &'static str,
    reply: String,
    delay_ms: u64,
    /// Fail this many calls with a retryable error before succeeding.
    transient_failures: AtomicU32,
    /// Fail every call with this error kind.
    always_fail: Option<MockFailure>,
    calls: AtomicU32,
}

impl MockChatClient {
    pub fn new(provider: &'static str, reply: impl Into<String>) -> Self {
        Self {
            provider,
            reply: reply.into(),
            delay_ms: 0,
            transient_failures: AtomicU32::new(0),
            always_fail: None,
            calls: AtomicU32::new(0),
        }
    }

    pub fn with_delay(mut self, delay_ms: u64) -> Self {
        self.delay_ms = delay_ms;
        self
    }

    pub fn with_transient_failures(self, count: u32) -> Self {
        self.transient_failures.store(count, Ordering::SeqCst);
        self
    }

    pub fn failing_with(mut self, failure: MockFailure) -> Self {
        self.always_fail = Some(failure);
        self
    }

    pub fn call_count(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ProviderClient for MockChatClient {
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

        if let Some(failure) = self.always_fail {
            return Err(failure.to_error());
        }

        let remaining = self.transient_failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.transient_failures.fetch_sub(1, Ordering::SeqCst);
            return Err(OrchestratorError::RateLimited);
        }

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
            latency_ms: self.delay_ms.max(20),
        })
    }
}

/// Mock embedding client producing deterministic text-dependent vectors.
pub struct MockEmbeddingClient {
    dimensions: usize,
    calls: AtomicU32,
    fail: bool,
}

impl MockEmbeddingClient {
    pub fn new(dimensions: usize) -> Arc<Self> {
        Arc::new(Self {
            dimensions,
            calls: AtomicU32::new(0),
            fail: false,
        })
    }

    pub fn failing(dimensions: usize) -> Arc<Self> {
        Arc::new(Self {
            dimensions,
            calls: AtomicU32::new(0),
            fail: true,
        })
    }

    pub fn call_count(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EmbeddingClient for MockEmbeddingClient {
    fn provider_id(&self) -> &'static str {
        "mock-embed"
    }

    async fn embed(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(OrchestratorError::Transport("mock embed failure".into()));
        }
        Ok(texts
            .iter()
            .map(|text| {
                // Deterministic pseudo-embedding derived from byte content.
                let seed: u64 = text.bytes().map(u64::from).sum::<u64>().max(1);
                (0..self.dimensions)
                    .map(|i| {
                        let v = seed.wrapping_mul(i as u64 + 31) % 997;
                        v as f32 / 997.0
                    })
                    .collect()
            })
            .collect())
    }
}

/// In-memory session store collaborator.
#[derive(Default)]
pub struct MockSessionMemory {
    turns: Mutex<Vec<StoredTurn>>,
    context: Option<String>,
    fail: bool,
}

impl MockSessionMemory {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with_context(context: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            turns: Mutex::new(Vec::new()),
            context: Some(context.into()),
            fail: false,
        })
    }

    pub fn failing() -> Arc<Self> {
        Arc::new(Self {
            turns: Mutex::new(Vec::new()),
            context: None,
            fail: true,
        })
    }

    pub fn stored_turns(&self) -> Vec<StoredTurn> {
        self.turns.lock().unwrap().clone()
    }
}

#[async_trait]
impl SessionMemory for MockSessionMemory {
    async fn get_context(&self, _session_id: &str, _max_tokens: u32) -> Result<Option<String>> {
        if self.fail {
            return Err(OrchestratorError::Transport("mock memory failure".into()));
        }
        Ok(self.context.clone())
    }

    async fn store(&self, turn: StoredTurn) -> Result<()> {
        if self.fail {
            return Err(OrchestratorError::Transport("mock memory failure".into()));
        }
        self.turns.lock().unwrap().push(turn);
        Ok(())
    }
}

/// Tier lookup collaborator returning a fixed tier.
pub struct MockAuthTier {
    tier: crate::config::Tier,
}

impl MockAuthTier {
    pub fn new(tier: crate::config::Tier) -> Arc<Self> {
        Arc::new(Self { tier })
    }
}

#[async_trait]
impl AuthTier for MockAuthTier {
    async fn tier_for(&self, _user_id: &str) -> Result<crate::config::Tier> {
        Ok(self.tier)
    }
}

/// Helper to build a catalog entry for tests.
pub fn mock_model(model_id: &str, provider: &str) -> ModelConfig {
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

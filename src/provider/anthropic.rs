//! Remote client for the [Anthropic API](https://docs.anthropic.com/en/api/messages)
//! messages endpoint.
//!
//! Requires the `ANTHROPIC_API_KEY` environment variable.

use crate::error::{OrchestratorError, Result};
use crate::provider::remote_common::{check_http_status, resolve_api_key};
use crate::provider::{CallParams, ChatMessage, ProviderClient, ProviderReply, TokenUsage};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;
use std::time::Instant;

const BASE_URL: &str = "https://api.anthropic.com/v1";
const DEFAULT_API_VERSION: &str = "2023-06-01";

/// Chat client for Anthropic's `/v1/messages`.
pub struct AnthropicClient {
    client: Client,
    api_key: String,
    api_version: String,
}

impl AnthropicClient {
    /// Create a client reading its key from `ANTHROPIC_API_KEY`.
    pub fn new() -> Result<Self> {
        Self::with_api_key_env("ANTHROPIC_API_KEY")
    }

    /// Create a client reading its key from a custom env var.
    pub fn with_api_key_env(env_var: &str) -> Result<Self> {
        Ok(Self {
            client: Client::new(),
            api_key: resolve_api_key(env_var)?,
            api_version: DEFAULT_API_VERSION.to_string(),
        })
    }

    /// Override the `anthropic-version` header.
    pub fn with_api_version(mut self, version: impl Into<String>) -> Self {
        self.api_version = version.into();
        self
    }
}

#[async_trait]
impl ProviderClient for AnthropicClient {
    fn provider_id(&self) -> &'static str {
        "anthropic"
    }

    async fn call(
        &self,
        model: &str,
        messages: &[ChatMessage],
        params: &CallParams,
    ) -> Result<ProviderReply> {
        // Anthropic takes the system turn as a top-level field, not a message.
        let system: Vec<&str> = messages
            .iter()
            .filter(|m| m.role == "system")
            .map(|m| m.content.as_str())
            .collect();
        let turns: Vec<serde_json::Value> = messages
            .iter()
            .filter(|m| m.role != "system")
            .map(|m| json!({ "role": m.role, "content": m.content }))
            .collect();

        let mut payload = json!({
            "model": model,
            "messages": turns,
            "max_tokens": params.max_tokens,
            "temperature": params.temperature,
        });
        if !system.is_empty() {
            payload["system"] = json!(system.join("\n\n"));
        }

        let start = Instant::now();
        let response = self
            .client
            .post(format!("{}/messages", BASE_URL))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", &self.api_version)
            .json(&payload)
            .send()
            .await
            .map_err(|e| OrchestratorError::Transport(e.to_string()))?;

        let body: serde_json::Value = check_http_status("Anthropic", response)?
            .json()
            .await
            .map_err(|e| OrchestratorError::InvalidResponse(e.to_string()))?;

        let content = body
            .pointer("/content/0/text")
            .and_then(|v| v.as_str())
            .ok_or_else(|| {
                OrchestratorError::InvalidResponse(
                    "Anthropic response missing content text".to_string(),
                )
            })?;
        if content.trim().is_empty() {
            return Err(OrchestratorError::InvalidResponse(
                "Anthropic returned an empty completion".to_string(),
            ));
        }

        let usage = TokenUsage {
            input_tokens: body
                .pointer("/usage/input_tokens")
                .and_then(|v| v.as_u64())
                .unwrap_or(0),
            output_tokens: body
                .pointer("/usage/output_tokens")
                .and_then(|v| v.as_u64())
                .unwrap_or(0),
        };

        Ok(ProviderReply {
            content: content.to_string(),
            usage,
            latency_ms: start.elapsed().as_millis() as u64,
        })
    }
}

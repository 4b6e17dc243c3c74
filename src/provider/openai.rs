//! Remote client for the [OpenAI API](https://platform.openai.com/docs/api-reference)
//! chat completions endpoint.
//!
//! Requires the `OPENAI_API_KEY` environment variable (or a custom env var
//! name via [`OpenAiClient::with_api_key_env`]).

use crate::error::{OrchestratorError, Result};
use crate::provider::remote_common::{
    build_openai_chat_payload, check_http_status, parse_openai_chat_body, resolve_api_key,
};
use crate::provider::{CallParams, ChatMessage, ProviderClient, ProviderReply};
use async_trait::async_trait;
use reqwest::Client;
use std::time::Instant;

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// Chat client for OpenAI's `/v1/chat/completions`.
pub struct OpenAiClient {
    client: Client,
    base_url: String,
    api_key: String,
}

impl OpenAiClient {
    /// Create a client reading its key from `OPENAI_API_KEY`.
    pub fn new() -> Result<Self> {
        Self::with_api_key_env("OPENAI_API_KEY")
    }

    /// Create a client reading its key from a custom env var.
    pub fn with_api_key_env(env_var: &str) -> Result<Self> {
        Ok(Self {
            client: Client::new(),
            base_url: DEFAULT_BASE_URL.to_string(),
            api_key: resolve_api_key(env_var)?,
        })
    }

    /// Override the base URL (OpenAI-compatible gateways, test servers).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }
}

#[async_trait]
impl ProviderClient for OpenAiClient {
    fn provider_id(&self) -> &'static str {
        "openai"
    }

    async fn call(
        &self,
        model: &str,
        messages: &[ChatMessage],
        params: &CallParams,
    ) -> Result<ProviderReply> {
        let payload = build_openai_chat_payload(model, messages, params);
        let start = Instant::now();

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&payload)
            .send()
            .await
            .map_err(|e| OrchestratorError::Transport(e.to_string()))?;

        let body: serde_json::Value = check_http_status("OpenAI", response)?
            .json()
            .await
            .map_err(|e| OrchestratorError::InvalidResponse(e.to_string()))?;

        let (content, usage) = parse_openai_chat_body("OpenAI", &body)?;
        Ok(ProviderReply {
            content,
            usage,
            latency_ms: start.elapsed().as_millis() as u64,
        })
    }
}

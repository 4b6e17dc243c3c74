//! Remote client for the [xAI API](https://docs.x.ai/) chat completions
//! endpoint. The wire format is OpenAI-compatible, so the payload and body
//! parsing are shared with the OpenAI backend.
//!
//! Requires the `XAI_API_KEY` environment variable.

use crate::error::{OrchestratorError, Result};
use crate::provider::remote_common::{
    build_openai_chat_payload, check_http_status, parse_openai_chat_body, resolve_api_key,
};
use crate::provider::{CallParams, ChatMessage, ProviderClient, ProviderReply};
use async_trait::async_trait;
use reqwest::Client;
use std::time::Instant;

const BASE_URL: &str = "https://api.x.ai/v1";

/// Chat client for xAI's Grok models.
pub struct XaiClient {
    client: Client,
    api_key: String,
}

impl XaiClient {
    /// Create a client reading its key from `XAI_API_KEY`.
    pub fn new() -> Result<Self> {
        Self::with_api_key_env("XAI_API_KEY")
    }

    /// Create a client reading its key from a custom env var.
    pub fn with_api_key_env(env_var: &str) -> Result<Self> {
        Ok(Self {
            client: Client::new(),
            api_key: resolve_api_key(env_var)?,
        })
    }
}

#[async_trait]
impl ProviderClient for XaiClient {
    fn provider_id(&self) -> &'static str {
        "xai"
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
            .post(format!("{}/chat/completions", BASE_URL))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&payload)
            .send()
            .await
            .map_err(|e| OrchestratorError::Transport(e.to_string()))?;

        let body: serde_json::Value = check_http_status("xAI", response)?
            .json()
            .await
            .map_err(|e| OrchestratorError::InvalidResponse(e.to_string()))?;

        let (content, usage) = parse_openai_chat_body("xAI", &body)?;
        Ok(ProviderReply {
            content,
            usage,
            latency_ms: start.elapsed().as_millis() as u64,
        })
    }
}

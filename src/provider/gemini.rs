//! Remote client for the [Gemini API](https://ai.google.dev/api/generate-content)
//! generateContent endpoint.
//!
//! Requires the `GEMINI_API_KEY` environment variable.

use crate::error::{OrchestratorError, Result};
use crate::provider::remote_common::{check_http_status, resolve_api_key};
use crate::provider::{CallParams, ChatMessage, ProviderClient, ProviderReply, TokenUsage};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;
use std::time::Instant;

const BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Chat client for Google's Gemini models.
pub struct GeminiClient {
    client: Client,
    api_key: String,
}

impl GeminiClient {
    /// Create a client reading its key from `GEMINI_API_KEY`.
    pub fn new() -> Result<Self> {
        Self::with_api_key_env("GEMINI_API_KEY")
    }

    /// Create a client reading its key from a custom env var.
    pub fn with_api_key_env(env_var: &str) -> Result<Self> {
        Ok(Self {
            client: Client::new(),
            api_key: resolve_api_key(env_var)?,
        })
    }
}

/// Build a Google-style generateContent payload. System turns become
/// `systemInstruction`; assistant turns map to the `"model"` role.
fn build_gemini_payload(messages: &[ChatMessage], params: &CallParams) -> serde_json::Value {
    let system: Vec<&str> = messages
        .iter()
        .filter(|m| m.role == "system")
        .map(|m| m.content.as_str())
        .collect();
    let contents: Vec<serde_json::Value> = messages
        .iter()
        .filter(|m| m.role != "system")
        .map(|m| {
            let role = if m.role == "assistant" { "model" } else { "user" };
            json!({
                "role": role,
                "parts": [{ "text": m.content }]
            })
        })
        .collect();

    let mut payload = serde_json::Map::new();
    payload.insert("contents".to_string(), json!(contents));
    if !system.is_empty() {
        payload.insert(
            "systemInstruction".to_string(),
            json!({ "parts": [{ "text": system.join("\n\n") }] }),
        );
    }
    payload.insert(
        "generationConfig".to_string(),
        json!({
            "temperature": params.temperature,
            "maxOutputTokens": params.max_tokens,
        }),
    );
    serde_json::Value::Object(payload)
}

#[async_trait]
impl ProviderClient for GeminiClient {
    fn provider_id(&self) -> &'static str {
        "gemini"
    }

    async fn call(
        &self,
        model: &str,
        messages: &[ChatMessage],
        params: &CallParams,
    ) -> Result<ProviderReply> {
        let payload = build_gemini_payload(messages, params);
        let start = Instant::now();

        let response = self
            .client
            .post(format!(
                "{}/models/{}:generateContent?key={}",
                BASE_URL, model, self.api_key
            ))
            .json(&payload)
            .send()
            .await
            .map_err(|e| OrchestratorError::Transport(e.to_string()))?;

        let body: serde_json::Value = check_http_status("Gemini", response)?
            .json()
            .await
            .map_err(|e| OrchestratorError::InvalidResponse(e.to_string()))?;

        let content = body
            .pointer("/candidates/0/content/parts/0/text")
            .and_then(|v| v.as_str())
            .ok_or_else(|| {
                OrchestratorError::InvalidResponse(
                    "Gemini response missing candidate text".to_string(),
                )
            })?;
        if content.trim().is_empty() {
            return Err(OrchestratorError::InvalidResponse(
                "Gemini returned an empty completion".to_string(),
            ));
        }

        let usage = TokenUsage {
            input_tokens: body
                .pointer("/usageMetadata/promptTokenCount")
                .and_then(|v| v.as_u64())
                .unwrap_or(0),
            output_tokens: body
                .pointer("/usageMetadata/candidatesTokenCount")
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

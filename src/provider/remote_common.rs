//! Shared utilities for all remote (HTTP API) clients: HTTP status mapping,
//! API key resolution, and the OpenAI-compatible chat payload shape reused
//! by the OpenAI and xAI backends.

#![cfg(any(
    feature = "provider-openai",
    feature = "provider-anthropic",
    feature = "provider-gemini",
    feature = "provider-xai"
))]

use crate::error::{OrchestratorError, Result};

/// Map an HTTP response status to an `OrchestratorError` for non-success
/// codes. Returns `Ok(response)` when the status is 2xx.
pub(crate) fn check_http_status(
    provider_name: &str,
    response: reqwest::Response,
) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    Err(match status.as_u16() {
        429 => OrchestratorError::RateLimited,
        401 | 403 => OrchestratorError::Unauthorized,
        500..=599 => {
            OrchestratorError::Transport(format!("{} server error: {}", provider_name, status))
        }
        _ => OrchestratorError::InvalidResponse(format!(
            "{} API error: {}",
            provider_name, status
        )),
    })
}

/// Read an API key from `env_var`, failing with a `Config` error when unset.
pub(crate) fn resolve_api_key(env_var: &str) -> Result<String> {
    std::env::var(env_var)
        .map_err(|_| OrchestratorError::Config(format!("{} env var not set", env_var)))
}

/// Build an OpenAI-style `/chat/completions` payload. xAI's API is
/// wire-compatible, so both backends share this shape.
#[cfg(any(feature = "provider-openai", feature = "provider-xai"))]
pub(crate) fn build_openai_chat_payload(
    model: &str,
    messages: &[crate::provider::ChatMessage],
    params: &crate::provider::CallParams,
) -> serde_json::Value {
    let messages: Vec<serde_json::Value> = messages
        .iter()
        .map(|m| serde_json::json!({ "role": m.role, "content": m.content }))
        .collect();
    serde_json::json!({
        "model": model,
        "messages": messages,
        "max_tokens": params.max_tokens,
        "temperature": params.temperature,
    })
}

/// Extract content and usage from an OpenAI-style chat completion body.
#[cfg(any(feature = "provider-openai", feature = "provider-xai"))]
pub(crate) fn parse_openai_chat_body(
    provider_name: &str,
    body: &serde_json::Value,
) -> Result<(String, crate::provider::TokenUsage)> {
    let content = body
        .get("choices")
        .and_then(|c| c.get(0))
        .and_then(|c| c.get("message"))
        .and_then(|m| m.get("content"))
        .and_then(|c| c.as_str())
        .ok_or_else(|| {
            OrchestratorError::InvalidResponse(format!(
                "{} response missing message content",
                provider_name
            ))
        })?;
    if content.trim().is_empty() {
        return Err(OrchestratorError::InvalidResponse(format!(
            "{} returned an empty completion",
            provider_name
        )));
    }

    let usage = crate::provider::TokenUsage {
        input_tokens: body
            .pointer("/usage/prompt_tokens")
            .and_then(|v| v.as_u64())
            .unwrap_or(0),
        output_tokens: body
            .pointer("/usage/completion_tokens")
            .and_then(|v| v.as_u64())
            .unwrap_or(0),
    };
    Ok((content.to_string(), usage))
}

//! Embedding client backed by the OpenAI embeddings endpoint, used by the
//! calibration module for reference-similarity scoring.

use crate::error::{OrchestratorError, Result};
use crate::provider::remote_common::{check_http_status, resolve_api_key};
use crate::provider::EmbeddingClient;
use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;

const BASE_URL: &str = "https://api.openai.com/v1";
const DEFAULT_MODEL: &str = "text-embedding-3-small";

/// Embedding client for OpenAI's `/v1/embeddings`.
pub struct OpenAiEmbeddingClient {
    client: Client,
    api_key: String,
    model: String,
}

impl OpenAiEmbeddingClient {
    /// Create a client reading its key from `OPENAI_API_KEY`.
    pub fn new() -> Result<Self> {
        Ok(Self {
            client: Client::new(),
            api_key: resolve_api_key("OPENAI_API_KEY")?,
            model: DEFAULT_MODEL.to_string(),
        })
    }

    /// Override the embedding model name.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }
}

#[async_trait]
impl EmbeddingClient for OpenAiEmbeddingClient {
    fn provider_id(&self) -> &'static str {
        "openai"
    }

    async fn embed(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        let response = self
            .client
            .post(format!("{}/embeddings", BASE_URL))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&json!({ "model": self.model, "input": texts }))
            .send()
            .await
            .map_err(|e| OrchestratorError::Transport(e.to_string()))?;

        let body: serde_json::Value = check_http_status("OpenAI", response)?
            .json()
            .await
            .map_err(|e| OrchestratorError::InvalidResponse(e.to_string()))?;

        let data = body
            .get("data")
            .and_then(|d| d.as_array())
            .ok_or_else(|| {
                OrchestratorError::InvalidResponse(
                    "OpenAI embeddings response missing data".to_string(),
                )
            })?;

        let mut embeddings = Vec::with_capacity(data.len());
        for item in data {
            let vector: Vec<f32> = item
                .get("embedding")
                .and_then(|e| e.as_array())
                .map(|values| {
                    values
                        .iter()
                        .filter_map(|v| v.as_f64().map(|f| f as f32))
                        .collect()
                })
                .ok_or_else(|| {
                    OrchestratorError::InvalidResponse(
                        "OpenAI embeddings response missing vector".to_string(),
                    )
                })?;
            embeddings.push(vector);
        }
        if embeddings.len() != texts.len() {
            return Err(OrchestratorError::InvalidResponse(format!(
                "Expected {} embeddings, got {}",
                texts.len(),
                embeddings.len()
            )));
        }
        Ok(embeddings)
    }
}

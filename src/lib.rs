//! Multi-provider LLM ensemble orchestrator: parallel dispatch, calibrated
//! weighted voting, and answer synthesis.
//!
//! Conclave fans one user prompt out to several third-party model endpoints
//! in parallel, scores every reply against the others using calibrated
//! confidence plus historical reliability, resolves near-ties with a
//! meta-voter, and synthesizes a single consolidated answer.
//!
//! # Key concepts
//!
//! - **[`Orchestrator`](orchestrator::Orchestrator)** — the pipeline entry
//!   point: admission, routing, dispatch, scoring, voting, synthesis, and
//!   finalization for every request.
//! - **[`ProviderClient`](provider::ProviderClient)** — the single
//!   capability every chat backend is adapted to. Backends are data-driven
//!   instances distinguished by a model tag and a
//!   [`ModelConfig`](config::ModelConfig) catalog entry.
//! - **[`CircuitBreaker`](breaker::CircuitBreaker)** — per-model breaker
//!   that short-circuits calls after repeated failures, with exponential
//!   retry around transient errors.
//! - **[`ReliabilityTracker`](reliability::ReliabilityTracker)** — rolling
//!   24 h uptime and cost statistics feeding back into routing and voting.
//! - **[`VotingEngine`](voting::VotingEngine)** and
//!   **[`SynthesisEngine`](synthesis::SynthesisEngine)** — multi-factor
//!   weighted voting with consensus grading, then strategy-adapted
//!   consolidation with a quality-driven improvement round.
//!
//! # Quick start
//!
//! ```rust,no_run
//! use conclave::config::{EnsembleConfig, ModelConfig};
//! use conclave::orchestrator::{EnsembleRequest, Orchestrator};
//! # #[cfg(feature = "provider-openai")]
//! use conclave::provider::openai::OpenAiClient;
//! use std::sync::Arc;
//!
//! # #[cfg(feature = "provider-openai")]
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let mut config = EnsembleConfig::default();
//! config.models = vec![ModelConfig {
//!     model_id: "gpt-4o-mini".into(),
//!     provider: "openai".into(),
//!     model: "gpt-4o-mini".into(),
//!     max_tokens: 400,
//!     temperature: 0.7,
//!     timeout_ms: 12_000,
//!     input_cost_per_1k: 0.00015,
//!     output_cost_per_1k: 0.0006,
//! }];
//!
//! let orchestrator = Orchestrator::builder()
//!     .config(config)
//!     .register_client(Arc::new(OpenAiClient::new()?))
//!     .build()
//!     .await?;
//!
//! let outcome = orchestrator
//!     .handle(EnsembleRequest {
//!         prompt: "Explain microservices vs monolithic architectures.".into(),
//!         user_id: "user-1".into(),
//!         ..Default::default()
//!     })
//!     .await;
//! # let _ = outcome;
//! # Ok(())
//! # }
//! ```

pub mod admission;
pub mod breaker;
pub mod calibration;
pub mod classify;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod metrics;
pub mod orchestrator;
pub mod provider;
pub mod quality;
pub mod reliability;
pub mod router;
pub mod synthesis;
pub mod voting;

#[cfg(test)]
mod mock;

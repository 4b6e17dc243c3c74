//! Model routing: picks the ensemble for a request from the prompt class,
//! the tier, breaker states, historical reliability, and cost efficiency.

use crate::breaker::BreakerRegistry;
use crate::classify::PromptClass;
use crate::config::{ModelConfig, Tier};
use crate::provider::ProviderRegistry;
use crate::reliability::ReliabilityTracker;
use std::sync::Arc;

const RELIABILITY_WEIGHT: f64 = 0.40;
const AFFINITY_WEIGHT: f64 = 0.35;
const COST_WEIGHT: f64 = 0.25;

/// Fixed preferred triple used when ranked selection produces nothing.
const PREFERRED_FALLBACK: [&str; 3] = ["gpt-4o-mini", "claude-3-5-haiku", "gemini-2.0-flash"];

/// Chooses `N` models per request (3 for free, 4 for premium), skipping any
/// whose circuit breaker is open.
pub struct ModelRouter {
    registry: Arc<ProviderRegistry>,
    breakers: Arc<BreakerRegistry>,
    reliability: Arc<ReliabilityTracker>,
}

impl ModelRouter {
    pub fn new(
        registry: Arc<ProviderRegistry>,
        breakers: Arc<BreakerRegistry>,
        reliability: Arc<ReliabilityTracker>,
    ) -> Self {
        Self {
            registry,
            breakers,
            reliability,
        }
    }

    /// Select the ensemble for a prompt class and tier, best-ranked first.
    ///
    /// Candidates behind an open breaker are excluded outright; the
    /// remaining models are ranked by reliability, class affinity, and cost
    /// efficiency under the tier budget. An empty ranking falls back to the
    /// preferred triple (still breaker-filtered).
    pub fn select(&self, class: PromptClass, tier: Tier) -> Vec<String> {
        let n = tier.ensemble_size();

        let mut ranked: Vec<(String, f64)> = self
            .registry
            .model_ids()
            .into_iter()
            .filter(|id| !self.breakers.is_open(id))
            .filter_map(|id| {
                let model = self.registry.get(&id).ok()?;
                Some((id, self.rank(&model.config, class, tier)))
            })
            .collect();
        // Deterministic order: score descending, model ID as tie-break.
        ranked.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });

        let selected: Vec<String> = ranked.into_iter().take(n).map(|(id, _)| id).collect();
        if !selected.is_empty() {
            tracing::debug!(class = %class, tier = %tier, models = ?selected, "Models selected");
            return selected;
        }

        let fallback: Vec<String> = PREFERRED_FALLBACK
            .iter()
            .filter(|id| self.registry.contains(id) && !self.breakers.is_open(id))
            .map(|id| id.to_string())
            .collect();
        tracing::warn!(class = %class, models = ?fallback, "Ranked selection empty, using preferred fallback");
        fallback
    }

    fn rank(&self, config: &ModelConfig, class: PromptClass, tier: Tier) -> f64 {
        let reliability = self.reliability.uptime_24h(&config.provider);
        let affinity = provider_affinity(&config.provider, class);
        let cost = cost_efficiency(config, tier);
        RELIABILITY_WEIGHT * reliability + AFFINITY_WEIGHT * affinity + COST_WEIGHT * cost
    }
}

/// Static per-class affinity of each provider family, in [0, 1]. Unknown
/// families get a flat 0.7 so they participate without dominating.
fn provider_affinity(provider: &str, class: PromptClass) -> f64 {
    match (provider, class) {
        ("openai", PromptClass::Technical) => 0.90,
        ("openai", PromptClass::Analytical) => 0.85,
        ("openai", PromptClass::Factual) => 0.80,
        ("openai", _) => 0.80,

        ("anthropic", PromptClass::Creative) => 0.90,
        ("anthropic", PromptClass::Explanatory) => 0.90,
        ("anthropic", PromptClass::Analytical) => 0.85,
        ("anthropic", _) => 0.80,

        ("gemini", PromptClass::Factual) => 0.85,
        ("gemini", PromptClass::Technical) => 0.80,
        ("gemini", _) => 0.75,

        ("xai", PromptClass::Conversational) => 0.85,
        ("xai", PromptClass::Creative) => 0.80,
        ("xai", _) => 0.70,

        _ => 0.70,
    }
}

/// Cheapness under the tier budget: free tiers discount expensive models
/// much more aggressively than premium.
fn cost_efficiency(config: &ModelConfig, tier: Tier) -> f64 {
    let per_1k = config.input_cost_per_1k + config.output_cost_per_1k;
    let sensitivity = match tier {
        Tier::Free => 200.0,
        Tier::Premium => 50.0,
    };
    (1.0 / (1.0 + per_1k * sensitivity)).clamp(0.0, 1.0)
}

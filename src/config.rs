//! Configuration tree: ensemble settings, tier policy, voting and meta-voter
//! options, synthesis options, breaker thresholds, and the model catalog.
//!
//! The tree is deserialized from JSON with [`config_from_str`] /
//! [`config_from_file`], overridden by `CONCLAVE_*` environment variables,
//! and validated before use. Startup validation failure is fatal; a failed
//! runtime reload leaves the previous snapshot intact.

use crate::error::{OrchestratorError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, RwLock};

/// Subscription tier of the requesting user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    /// Default tier with tighter limits and a three-model ensemble.
    #[default]
    Free,
    /// Paid tier with larger budgets and a four-model ensemble.
    Premium,
}

impl Tier {
    /// Parse a tier from its boundary string form. Unknown values map to
    /// `Free` so that a malformed tier claim never widens limits.
    pub fn parse(s: &str) -> Self {
        match s {
            "premium" => Self::Premium,
            _ => Self::Free,
        }
    }

    /// Ensemble width for this tier (number of models dispatched).
    pub fn ensemble_size(&self) -> usize {
        match self {
            Self::Free => 3,
            Self::Premium => 4,
        }
    }
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Free => write!(f, "free"),
            Self::Premium => write!(f, "premium"),
        }
    }
}

/// Process-wide ensemble settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EnsembleSettings {
    /// Concurrent model calls allowed per tier inside the dispatcher.
    pub max_concurrent_per_tier: usize,
    /// Overall request deadline in milliseconds.
    pub timeout_ms: u64,
    /// Maximum provider-call attempts (including the initial call).
    pub retry_attempts: u32,
    /// Base retry delay in milliseconds; doubled per attempt, capped at 5 s.
    pub retry_delay_ms: u64,
    /// Hard cap on prompt length regardless of tier.
    pub max_prompt_length: usize,
}

impl Default for EnsembleSettings {
    fn default() -> Self {
        Self {
            max_concurrent_per_tier: 8,
            timeout_ms: 30_000,
            retry_attempts: 3,
            retry_delay_ms: 1_000,
            max_prompt_length: 8_000,
        }
    }
}

/// Per-tier request limits and budgets.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TierLimits {
    /// Word budget shared across all role responses.
    pub shared_word_limit: usize,
    /// Token ceiling for each individual model call.
    pub max_tokens_per_role: u32,
    /// Token ceiling for the synthesis call.
    pub max_synthesis_tokens: u32,
    /// Character ceiling for each role response.
    pub max_characters_per_role: usize,
    /// Per-model call timeout in milliseconds.
    pub timeout_ms: u64,
    /// Hourly request quota.
    pub requests_per_hour: u32,
    /// Daily request quota.
    pub requests_per_day: u32,
    /// Maximum admitted prompt length in characters.
    pub max_prompt_length: usize,
    /// Session-cache TTL in seconds (consumed by the memory collaborator).
    pub cache_ttl: u64,
    /// Concurrent in-flight requests admitted for this tier.
    pub concurrency_limit: usize,
    /// Minimum composite quality the final answer is validated against.
    pub quality_target: f64,
}

impl Default for TierLimits {
    fn default() -> Self {
        Self {
            shared_word_limit: 600,
            max_tokens_per_role: 400,
            max_synthesis_tokens: 500,
            max_characters_per_role: 4_000,
            timeout_ms: 15_000,
            requests_per_hour: 20,
            requests_per_day: 100,
            max_prompt_length: 4_000,
            cache_ttl: 300,
            concurrency_limit: 4,
            quality_target: 0.5,
        }
    }
}

impl TierLimits {
    fn premium_default() -> Self {
        Self {
            shared_word_limit: 1_200,
            max_tokens_per_role: 800,
            max_synthesis_tokens: 900,
            max_characters_per_role: 8_000,
            timeout_ms: 25_000,
            requests_per_hour: 120,
            requests_per_day: 1_000,
            max_prompt_length: 8_000,
            cache_ttl: 600,
            concurrency_limit: 16,
            quality_target: 0.6,
        }
    }
}

/// Limits for both tiers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TierPolicy {
    pub free: TierLimits,
    pub premium: TierLimits,
}

impl Default for TierPolicy {
    fn default() -> Self {
        Self {
            free: TierLimits::default(),
            premium: TierLimits::premium_default(),
        }
    }
}

impl TierPolicy {
    /// Limits for the given tier.
    pub fn limits(&self, tier: Tier) -> &TierLimits {
        match tier {
            Tier::Free => &self.free,
            Tier::Premium => &self.premium,
        }
    }
}

/// Relative weights of the voting factors. Normalized to sum to 1.0 at
/// config load time.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WeightFactors {
    /// Calibrated confidence of the response.
    pub confidence: f64,
    /// Composite quality score.
    pub quality: f64,
    /// Historical reliability and recent win rate of the model.
    pub historical: f64,
    /// Semantic confidence (reference similarity, grammar, latency).
    pub semantic: f64,
    /// Agreement with the other responses in the ensemble.
    pub consensus: f64,
    /// Uniqueness relative to the other responses.
    pub diversity: f64,
}

impl Default for WeightFactors {
    fn default() -> Self {
        Self {
            confidence: 0.25,
            quality: 0.20,
            historical: 0.20,
            semantic: 0.15,
            consensus: 0.10,
            diversity: 0.10,
        }
    }
}

impl WeightFactors {
    /// Sum of all six factors.
    pub fn sum(&self) -> f64 {
        self.confidence + self.quality + self.historical + self.semantic + self.consensus
            + self.diversity
    }

    /// Return a copy scaled so the factors sum to 1.0. Applying this twice
    /// is a no-op. A zero sum falls back to the defaults.
    pub fn normalized(&self) -> Self {
        let sum = self.sum();
        if sum <= f64::EPSILON {
            return Self::default();
        }
        Self {
            confidence: self.confidence / sum,
            quality: self.quality / sum,
            historical: self.historical / sum,
            semantic: self.semantic / sum,
            consensus: self.consensus / sum,
            diversity: self.diversity / sum,
        }
    }
}

/// Voting engine options.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VotingOptions {
    /// Allow the meta-voter tie-break call.
    pub enable_meta_voter: bool,
    /// Allow per-request adaptive weight adjustments.
    pub enable_adaptive_weights: bool,
    /// Factor weights; normalized at load.
    pub weight_factors: WeightFactors,
}

impl Default for VotingOptions {
    fn default() -> Self {
        Self {
            enable_meta_voter: true,
            enable_adaptive_weights: true,
            weight_factors: WeightFactors::default(),
        }
    }
}

/// Conditions under which the meta-voter is invoked.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetaVoterTrigger {
    /// Invoke when the top two normalized weights are closer than this.
    pub max_weight_difference: f64,
    /// Minimum consensus grade required (`"very-weak"` .. `"very-strong"`).
    pub min_consensus_strength: String,
}

impl Default for MetaVoterTrigger {
    fn default() -> Self {
        Self {
            max_weight_difference: 0.05,
            min_consensus_strength: "moderate".to_string(),
        }
    }
}

/// Meta-voter (tie-break LLM) options.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetaVoterOptions {
    /// Model ID (from the catalog) used for the comparison call.
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f32,
    /// Dedicated timeout for the tie-break call, in milliseconds.
    pub timeout_ms: u64,
    pub trigger: MetaVoterTrigger,
}

impl Default for MetaVoterOptions {
    fn default() -> Self {
        Self {
            model: "gpt-4o-mini".to_string(),
            max_tokens: 200,
            temperature: 0.1,
            timeout_ms: 8_000,
            trigger: MetaVoterTrigger::default(),
        }
    }
}

/// Synthesis engine options.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SynthesisOptions {
    /// Model ID used for synthesis and improvement calls.
    pub model: String,
    /// Quality floor below which one improvement round is attempted.
    pub min_quality: f64,
    /// Base sampling temperature before strategy adjustments.
    pub base_temperature: f32,
    /// Hard cap on synthesis tokens regardless of the allocation formula.
    pub max_tokens_cap: u32,
}

impl Default for SynthesisOptions {
    fn default() -> Self {
        Self {
            model: "gpt-4o-mini".to_string(),
            min_quality: 0.6,
            base_temperature: 0.4,
            max_tokens_cap: 700,
        }
    }
}

/// Circuit breaker thresholds shared by all per-model breakers.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct BreakerOptions {
    /// Consecutive failures within the window before the breaker opens.
    pub failure_threshold: u32,
    /// Window in which consecutive failures are counted, in seconds.
    pub failure_window_secs: u64,
    /// Time the breaker stays open before allowing a half-open probe.
    pub cooldown_secs: u64,
}

impl Default for BreakerOptions {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            failure_window_secs: 60,
            cooldown_secs: 30,
        }
    }
}

/// Degradation paths: the single-model fallback and per-family alternates.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FallbackOptions {
    /// Model ID used by the orchestrator's single-model failure path.
    pub stable_model: String,
    /// Provider-family substitutions tried once by the dispatcher
    /// (e.g. `"gemini" -> "xai"`).
    pub alternate_families: HashMap<String, String>,
}

impl Default for FallbackOptions {
    fn default() -> Self {
        let mut alternate_families = HashMap::new();
        alternate_families.insert("gemini".to_string(), "xai".to_string());
        Self {
            stable_model: "gpt-4o-mini".to_string(),
            alternate_families,
        }
    }
}

/// Immutable description of one (provider, model) pair in the catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Stable tag naming this pair (e.g. `"gpt-4o-mini"`).
    pub model_id: String,
    /// Provider family owning the model (e.g. `"openai"`, `"anthropic"`).
    pub provider: String,
    /// Model name understood by the provider API.
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f32,
    pub timeout_ms: u64,
    /// Dollars per 1 000 input tokens.
    pub input_cost_per_1k: f64,
    /// Dollars per 1 000 output tokens.
    pub output_cost_per_1k: f64,
}

impl ModelConfig {
    /// Validate invariants: non-empty identifiers, non-zero timeout,
    /// non-negative costs.
    pub fn validate(&self) -> Result<()> {
        if self.model_id.is_empty() {
            return Err(OrchestratorError::Config(
                "Model ID cannot be empty".to_string(),
            ));
        }
        if self.provider.is_empty() {
            return Err(OrchestratorError::Config(format!(
                "Model '{}' has an empty provider",
                self.model_id
            )));
        }
        if self.model.is_empty() {
            return Err(OrchestratorError::Config(format!(
                "Model '{}' has an empty provider model name",
                self.model_id
            )));
        }
        if self.timeout_ms == 0 {
            return Err(OrchestratorError::Config(format!(
                "Model '{}' timeout must be greater than 0",
                self.model_id
            )));
        }
        if self.input_cost_per_1k < 0.0 || self.output_cost_per_1k < 0.0 {
            return Err(OrchestratorError::Config(format!(
                "Model '{}' costs must be non-negative",
                self.model_id
            )));
        }
        Ok(())
    }
}

/// Exponential backoff policy for transient provider errors.
///
/// Delay for attempt `n` (1-based) is `min(base * 2^(n-1), cap)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum attempts including the initial call.
    pub max_attempts: u32,
    /// Base delay in milliseconds.
    pub base_delay_ms: u64,
}

/// Backoff ceiling applied regardless of the attempt count.
pub const RETRY_BACKOFF_CAP_MS: u64 = 5_000;

impl RetryPolicy {
    /// Compute the backoff for the given 1-based `attempt` number.
    pub fn backoff(&self, attempt: u32) -> std::time::Duration {
        let raw = self
            .base_delay_ms
            .saturating_mul(2u64.saturating_pow(attempt.saturating_sub(1)));
        std::time::Duration::from_millis(raw.min(RETRY_BACKOFF_CAP_MS))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 1_000,
        }
    }
}

/// The validated configuration tree.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct EnsembleConfig {
    pub ensemble: EnsembleSettings,
    pub tiers: TierPolicy,
    pub voting: VotingOptions,
    pub meta_voter: MetaVoterOptions,
    pub synthesis: SynthesisOptions,
    pub breaker: BreakerOptions,
    pub fallback: FallbackOptions,
    /// The model catalog. May be empty when the registry is built
    /// programmatically.
    pub models: Vec<ModelConfig>,
}

/// Consensus grade names accepted by `meta_voter.trigger.min_consensus_strength`.
const CONSENSUS_GRADES: [&str; 5] = ["very-weak", "weak", "moderate", "strong", "very-strong"];

impl EnsembleConfig {
    /// Validate the whole tree and normalize the voting weight factors.
    ///
    /// Emits a warning when the configured factors do not already sum to 1.0
    /// (some published presets double-count consensus and diversity).
    pub fn validate(&mut self) -> Result<()> {
        if self.ensemble.timeout_ms == 0 {
            return Err(OrchestratorError::Config(
                "ensemble.timeout_ms must be greater than 0".to_string(),
            ));
        }
        if self.ensemble.max_concurrent_per_tier == 0 {
            return Err(OrchestratorError::Config(
                "ensemble.max_concurrent_per_tier must be greater than 0".to_string(),
            ));
        }
        if self.ensemble.retry_attempts == 0 {
            return Err(OrchestratorError::Config(
                "ensemble.retry_attempts must be at least 1".to_string(),
            ));
        }
        for (name, limits) in [("free", &self.tiers.free), ("premium", &self.tiers.premium)] {
            if limits.concurrency_limit == 0 {
                return Err(OrchestratorError::Config(format!(
                    "tiers.{}.concurrency_limit must be greater than 0",
                    name
                )));
            }
            if limits.timeout_ms == 0 {
                return Err(OrchestratorError::Config(format!(
                    "tiers.{}.timeout_ms must be greater than 0",
                    name
                )));
            }
            if limits.max_prompt_length == 0 {
                return Err(OrchestratorError::Config(format!(
                    "tiers.{}.max_prompt_length must be greater than 0",
                    name
                )));
            }
        }

        let factors = self.voting.weight_factors;
        let fields = [
            factors.confidence,
            factors.quality,
            factors.historical,
            factors.semantic,
            factors.consensus,
            factors.diversity,
        ];
        if fields.iter().any(|f| *f < 0.0) {
            return Err(OrchestratorError::Config(
                "voting.weight_factors must be non-negative".to_string(),
            ));
        }
        let sum = factors.sum();
        if (sum - 1.0).abs() > 1e-3 {
            tracing::warn!(
                configured_sum = sum,
                "Voting weight factors do not sum to 1.0; normalizing"
            );
        }
        self.voting.weight_factors = factors.normalized();

        let trigger = &self.meta_voter.trigger;
        if !(0.0..=1.0).contains(&trigger.max_weight_difference) {
            return Err(OrchestratorError::Config(
                "meta_voter.trigger.max_weight_difference must be in [0, 1]".to_string(),
            ));
        }
        if !CONSENSUS_GRADES.contains(&trigger.min_consensus_strength.as_str()) {
            return Err(OrchestratorError::Config(format!(
                "meta_voter.trigger.min_consensus_strength '{}' is not a consensus grade",
                trigger.min_consensus_strength
            )));
        }
        if self.meta_voter.timeout_ms == 0 {
            return Err(OrchestratorError::Config(
                "meta_voter.timeout_ms must be greater than 0".to_string(),
            ));
        }

        if !(0.0..=1.0).contains(&self.synthesis.min_quality) {
            return Err(OrchestratorError::Config(
                "synthesis.min_quality must be in [0, 1]".to_string(),
            ));
        }

        if self.breaker.failure_threshold == 0 {
            return Err(OrchestratorError::Config(
                "breaker.failure_threshold must be at least 1".to_string(),
            ));
        }

        let mut seen = std::collections::HashSet::new();
        for model in &self.models {
            model.validate()?;
            if !seen.insert(model.model_id.as_str()) {
                return Err(OrchestratorError::Config(format!(
                    "Duplicate model ID '{}' in catalog",
                    model.model_id
                )));
            }
        }
        Ok(())
    }

    /// The retry policy derived from the ensemble settings.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.ensemble.retry_attempts,
            base_delay_ms: self.ensemble.retry_delay_ms,
        }
    }

    /// Apply `CONCLAVE_*` environment overrides to scalar options.
    pub fn apply_env_overrides(&mut self) {
        override_u64("CONCLAVE_TIMEOUT_MS", &mut self.ensemble.timeout_ms);
        override_usize(
            "CONCLAVE_MAX_CONCURRENT_PER_TIER",
            &mut self.ensemble.max_concurrent_per_tier,
        );
        override_u32("CONCLAVE_RETRY_ATTEMPTS", &mut self.ensemble.retry_attempts);
        override_u64("CONCLAVE_RETRY_DELAY_MS", &mut self.ensemble.retry_delay_ms);
        override_usize(
            "CONCLAVE_MAX_PROMPT_LENGTH",
            &mut self.ensemble.max_prompt_length,
        );

        for (prefix, limits) in [
            ("CONCLAVE_TIER_FREE", &mut self.tiers.free),
            ("CONCLAVE_TIER_PREMIUM", &mut self.tiers.premium),
        ] {
            override_u64(&format!("{prefix}_TIMEOUT_MS"), &mut limits.timeout_ms);
            override_usize(
                &format!("{prefix}_MAX_PROMPT_LENGTH"),
                &mut limits.max_prompt_length,
            );
            override_usize(
                &format!("{prefix}_CONCURRENCY_LIMIT"),
                &mut limits.concurrency_limit,
            );
            override_u32(
                &format!("{prefix}_MAX_TOKENS_PER_ROLE"),
                &mut limits.max_tokens_per_role,
            );
        }

        override_string("CONCLAVE_META_VOTER_MODEL", &mut self.meta_voter.model);
        override_u64(
            "CONCLAVE_META_VOTER_TIMEOUT_MS",
            &mut self.meta_voter.timeout_ms,
        );
        override_string("CONCLAVE_SYNTHESIS_MODEL", &mut self.synthesis.model);
        override_f64("CONCLAVE_MIN_QUALITY", &mut self.synthesis.min_quality);
        override_string("CONCLAVE_FALLBACK_MODEL", &mut self.fallback.stable_model);
        override_u32(
            "CONCLAVE_BREAKER_FAILURE_THRESHOLD",
            &mut self.breaker.failure_threshold,
        );
        override_u64(
            "CONCLAVE_BREAKER_COOLDOWN_SECS",
            &mut self.breaker.cooldown_secs,
        );
    }
}

fn override_u64(var: &str, field: &mut u64) {
    if let Ok(raw) = std::env::var(var) {
        if let Ok(v) = raw.parse() {
            *field = v;
        }
    }
}

fn override_u32(var: &str, field: &mut u32) {
    if let Ok(raw) = std::env::var(var) {
        if let Ok(v) = raw.parse() {
            *field = v;
        }
    }
}

fn override_usize(var: &str, field: &mut usize) {
    if let Ok(raw) = std::env::var(var) {
        if let Ok(v) = raw.parse() {
            *field = v;
        }
    }
}

fn override_f64(var: &str, field: &mut f64) {
    if let Ok(raw) = std::env::var(var) {
        if let Ok(v) = raw.parse() {
            *field = v;
        }
    }
}

fn override_string(var: &str, field: &mut String) {
    if let Ok(raw) = std::env::var(var) {
        if !raw.is_empty() {
            *field = raw;
        }
    }
}

/// Parse, env-override, and validate a config tree from a JSON string.
pub fn config_from_str(s: &str) -> Result<EnsembleConfig> {
    let mut config: EnsembleConfig = serde_json::from_str(s)
        .map_err(|e| OrchestratorError::Config(format!("Invalid config JSON: {}", e)))?;
    config.apply_env_overrides();
    config.validate()?;
    Ok(config)
}

/// Read, parse, env-override, and validate a config tree from a JSON file.
pub fn config_from_file(path: impl AsRef<Path>) -> Result<EnsembleConfig> {
    let path = path.as_ref();
    let contents = std::fs::read_to_string(path).map_err(|e| {
        OrchestratorError::Config(format!(
            "Failed to read config file '{}': {}",
            path.display(),
            e
        ))
    })?;
    config_from_str(&contents)
}

/// Shared handle to the current configuration snapshot.
///
/// Readers take an `Arc` clone and hold it for the duration of a request;
/// [`reload`](Self::reload) swaps the snapshot atomically and only after the
/// replacement validates, so a bad reload never disturbs in-flight requests.
pub struct ConfigHandle {
    inner: RwLock<Arc<EnsembleConfig>>,
}

impl ConfigHandle {
    /// Wrap an already-validated configuration.
    pub fn new(config: EnsembleConfig) -> Self {
        Self {
            inner: RwLock::new(Arc::new(config)),
        }
    }

    /// Current snapshot.
    pub fn load(&self) -> Arc<EnsembleConfig> {
        self.inner.read().expect("config lock poisoned").clone()
    }

    /// Validate `config` and swap it in. On error the previous snapshot
    /// remains current.
    pub fn reload(&self, mut config: EnsembleConfig) -> Result<()> {
        config.apply_env_overrides();
        config.validate()?;
        let mut guard = self.inner.write().expect("config lock poisoned");
        *guard = Arc::new(config);
        tracing::info!("Configuration reloaded");
        Ok(())
    }

    /// Reload from a JSON file, typically wired to a signal handler.
    pub fn reload_from_file(&self, path: impl AsRef<Path>) -> Result<()> {
        let config = config_from_file(path)?;
        let mut guard = self.inner.write().expect("config lock poisoned");
        *guard = Arc::new(config);
        tracing::info!("Configuration reloaded from file");
        Ok(())
    }
}

//! Multi-factor weighted voting: per-response factor scoring, per-request
//! adaptive weight adjustment, consensus grading, and the meta-voter
//! tie-break.
//!
//! Voting never fails: zero valid responses produce an empty result and the
//! orchestrator routes to its fallback path.

use crate::breaker::{BreakerRegistry, guarded_call};
use crate::classify::PromptClass;
use crate::config::{MetaVoterOptions, RetryPolicy, VotingOptions, WeightFactors};
use crate::dispatch::RoleResponse;
use crate::provider::{CallParams, ChatMessage, ProviderRegistry};
use crate::reliability::ReliabilityTracker;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// Qualitative agreement grade derived from the gap between the best and
/// mean vote scores.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ConsensusGrade {
    VeryWeak,
    Weak,
    Moderate,
    Strong,
    VeryStrong,
}

impl ConsensusGrade {
    /// Grade a scaled gap already clamped to [0, 1].
    pub fn from_scaled_gap(gap: f64) -> Self {
        if gap >= 0.85 {
            Self::VeryStrong
        } else if gap >= 0.70 {
            Self::Strong
        } else if gap >= 0.55 {
            Self::Moderate
        } else if gap >= 0.40 {
            Self::Weak
        } else {
            Self::VeryWeak
        }
    }

    /// Parse the config string form (`"very-weak"` .. `"very-strong"`).
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "very-weak" => Some(Self::VeryWeak),
            "weak" => Some(Self::Weak),
            "moderate" => Some(Self::Moderate),
            "strong" => Some(Self::Strong),
            "very-strong" => Some(Self::VeryStrong),
            _ => None,
        }
    }
}

impl std::fmt::Display for ConsensusGrade {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::VeryWeak => write!(f, "very-weak"),
            Self::Weak => write!(f, "weak"),
            Self::Moderate => write!(f, "moderate"),
            Self::Strong => write!(f, "strong"),
            Self::VeryStrong => write!(f, "very-strong"),
        }
    }
}

/// The six factor sub-scores of one response, each in [0, 1].
#[derive(Debug, Clone, Copy, Default)]
pub struct FactorScores {
    pub confidence: f64,
    pub quality: f64,
    pub historical: f64,
    pub semantic: f64,
    pub consensus: f64,
    pub diversity: f64,
}

impl FactorScores {
    fn combine(&self, weights: &WeightFactors) -> f64 {
        (weights.confidence * self.confidence
            + weights.quality * self.quality
            + weights.historical * self.historical
            + weights.semantic * self.semantic
            + weights.consensus * self.consensus
            + weights.diversity * self.diversity)
            .clamp(0.0, 1.0)
    }
}

/// Transparency block: one response's sub-scores, combined base score, and
/// normalized weight.
#[derive(Debug, Clone)]
pub struct ResponseScore {
    pub model_id: String,
    pub fulfilled: bool,
    pub factors: FactorScores,
    pub base: f64,
    pub weight: f64,
}

/// The voting outcome handed to synthesis and the boundary.
#[derive(Debug, Clone)]
pub struct VotingResult {
    pub winner: Option<String>,
    /// The winner's combined base score.
    pub confidence: f64,
    pub consensus: ConsensusGrade,
    /// Normalized weight per role label; sums to 1 (±1e-3) whenever at
    /// least one response was fulfilled.
    pub weights: HashMap<String, f64>,
    /// Scaled top-minus-mean score gap in [0, 1].
    pub score_gap: f64,
    /// The factor weights actually applied after adaptive adjustment.
    pub adaptive_weights: WeightFactors,
    pub response_scores: Vec<ResponseScore>,
    /// Whether the meta-voter was invoked for this request.
    pub tie_breaking: bool,
}

impl VotingResult {
    /// Result for an ensemble with no usable responses.
    pub fn empty() -> Self {
        Self {
            winner: None,
            confidence: 0.0,
            consensus: ConsensusGrade::VeryWeak,
            weights: HashMap::new(),
            score_gap: 0.0,
            adaptive_weights: WeightFactors::default(),
            response_scores: Vec::new(),
            tie_breaking: false,
        }
    }

    /// Write the per-model outcomes back into the reliability tracker. The
    /// orchestrator is the single writer; voting itself never mutates
    /// shared state.
    pub fn record_outcomes(&self, tracker: &ReliabilityTracker) {
        for score in &self.response_scores {
            if !score.fulfilled {
                continue;
            }
            let won = self.winner.as_deref() == Some(score.model_id.as_str());
            tracker.record_outcome(&score.model_id, won, score.base);
        }
    }
}

/// Multi-factor voting over scored role responses.
pub struct VotingEngine {
    registry: Arc<ProviderRegistry>,
    breakers: Arc<BreakerRegistry>,
    reliability: Arc<ReliabilityTracker>,
}

impl VotingEngine {
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

    /// Run the vote. `responses` must already carry quality and confidence
    /// scores. Exactly one winner is produced whenever at least one
    /// response is fulfilled.
    pub async fn vote(
        &self,
        prompt: &str,
        class: PromptClass,
        responses: &[RoleResponse],
        options: &VotingOptions,
        meta: &MetaVoterOptions,
    ) -> VotingResult {
        let fulfilled: Vec<&RoleResponse> =
            responses.iter().filter(|r| r.is_fulfilled()).collect();
        if fulfilled.is_empty() {
            return VotingResult::empty();
        }

        let similarity = pairwise_similarity(&fulfilled);
        let factors: Vec<FactorScores> = fulfilled
            .iter()
            .enumerate()
            .map(|(i, r)| self.factor_scores(r, i, &fulfilled, &similarity))
            .collect();

        // First pass with the configured weights to grade consensus, then
        // adapt and rescore.
        let configured = options.weight_factors.normalized();
        let first_pass: Vec<f64> = factors.iter().map(|f| f.combine(&configured)).collect();
        let preliminary_grade = grade(&first_pass).0;

        let applied = if options.enable_adaptive_weights {
            adaptive_weights(
                configured,
                preliminary_grade,
                &similarity,
                &fulfilled,
            )
        } else {
            configured
        };

        let bases: Vec<f64> = factors.iter().map(|f| f.combine(&applied)).collect();
        let (consensus, score_gap) = grade(&bases);
        let normalized = normalize(&bases);

        // Argmax over fulfilled responses, input order as tie-break.
        let mut top_index = 0usize;
        for (i, base) in bases.iter().enumerate() {
            if *base > bases[top_index] {
                top_index = i;
            }
        }
        let mut winner = fulfilled[top_index].model_id.clone();
        let confidence = bases[top_index];

        // Meta-voter tie-break on a near-tie with decent consensus.
        let mut tie_breaking = false;
        if options.enable_meta_voter && fulfilled.len() >= 2 {
            let mut sorted = normalized.clone();
            sorted.sort_by(|a, b| b.partial_cmp(a).unwrap_or(std::cmp::Ordering::Equal));
            let weight_gap = sorted[0] - sorted[1];
            let min_grade =
                ConsensusGrade::parse(&meta.trigger.min_consensus_strength)
                    .unwrap_or(ConsensusGrade::Moderate);
            if weight_gap < meta.trigger.max_weight_difference && consensus >= min_grade {
                tie_breaking = true;
                let mut order: Vec<usize> = (0..fulfilled.len()).collect();
                order.sort_by(|a, b| {
                    bases[*b]
                        .partial_cmp(&bases[*a])
                        .unwrap_or(std::cmp::Ordering::Equal)
                });
                let top_two = [fulfilled[order[0]], fulfilled[order[1]]];
                if let Some(verdict) = self.meta_vote(prompt, &top_two, meta).await {
                    winner = verdict;
                }
            }
        }

        let mut weights = HashMap::new();
        let mut response_scores = Vec::with_capacity(responses.len());
        let mut fulfilled_index = 0usize;
        for response in responses {
            if response.is_fulfilled() {
                let i = fulfilled_index;
                fulfilled_index += 1;
                weights.insert(response.model_id.clone(), normalized[i]);
                response_scores.push(ResponseScore {
                    model_id: response.model_id.clone(),
                    fulfilled: true,
                    factors: factors[i],
                    base: bases[i],
                    weight: normalized[i],
                });
            } else {
                weights.insert(response.model_id.clone(), 0.0);
                response_scores.push(ResponseScore {
                    model_id: response.model_id.clone(),
                    fulfilled: false,
                    factors: FactorScores::default(),
                    base: 0.0,
                    weight: 0.0,
                });
            }
        }

        tracing::debug!(
            winner = %winner,
            consensus = %consensus,
            score_gap,
            tie_breaking,
            class = %class,
            "Voting complete"
        );

        VotingResult {
            winner: Some(winner),
            confidence,
            consensus,
            weights,
            score_gap,
            adaptive_weights: applied,
            response_scores,
            tie_breaking,
        }
    }

    fn factor_scores(
        &self,
        response: &RoleResponse,
        index: usize,
        fulfilled: &[&RoleResponse],
        similarity: &[Vec<f64>],
    ) -> FactorScores {
        let others: Vec<f64> = (0..fulfilled.len())
            .filter(|j| *j != index)
            .map(|j| similarity[index][j])
            .collect();
        let mean_similarity = if others.is_empty() {
            0.5
        } else {
            others.iter().sum::<f64>() / others.len() as f64
        };
        let max_similarity = others.iter().cloned().fold(0.0f64, f64::max);

        let provider = self
            .registry
            .get(&response.model_id)
            .map(|m| m.config.provider.clone())
            .unwrap_or_default();
        let dynamic = self
            .reliability
            .dynamic_weight(&provider, response.confidence.calibrated);
        let performance = self.reliability.performance(&response.model_id);
        // Squash the unbounded dynamic weight into [0, 1) and blend with
        // the model's recent win rate.
        let historical = 0.5 * (dynamic / (1.0 + dynamic)) + 0.5 * performance.recent_win_rate;

        FactorScores {
            confidence: response.confidence.calibrated,
            quality: response.quality.composite,
            historical: historical.clamp(0.0, 1.0),
            semantic: response.confidence.raw,
            consensus: mean_similarity,
            diversity: (1.0 - max_similarity).clamp(0.0, 1.0),
        }
    }

    /// One bounded LLM call comparing the top two candidates. Returns the
    /// chosen role label, or `None` when the call fails or the verdict is
    /// unparseable (the algorithmic winner then stands).
    async fn meta_vote(
        &self,
        prompt: &str,
        candidates: &[&RoleResponse; 2],
        meta: &MetaVoterOptions,
    ) -> Option<String> {
        let registered = match self.registry.get(&meta.model) {
            Ok(m) => m,
            Err(e) => {
                tracing::warn!(model = %meta.model, error = %e, "Meta-voter model unavailable");
                metrics::counter!("meta_voter.total", "status" => "unavailable").increment(1);
                return None;
            }
        };

        let comparison = format!(
            "You are judging two answers to the same question.\n\n\
             Question:\n{}\n\n\
             Answer A:\n{}\n\n\
             Answer B:\n{}\n\n\
             Which answer is more accurate, complete, and useful? \
             Reply with exactly one letter: A or B.",
            truncate(prompt, 1_000),
            truncate(&candidates[0].content, 1_500),
            truncate(&candidates[1].content, 1_500),
        );
        let messages = [ChatMessage::user(comparison)];
        let params = CallParams {
            max_tokens: meta.max_tokens,
            temperature: meta.temperature,
        };

        let breaker = self.breakers.breaker_for(&meta.model);
        let client = Arc::clone(&registered.client);
        let model_name = registered.config.model.clone();
        let retry = RetryPolicy {
            max_attempts: 1,
            base_delay_ms: 0,
        };

        let result = guarded_call(
            &breaker,
            retry,
            Duration::from_millis(meta.timeout_ms),
            &registered.config.provider,
            || client.call(&model_name, &messages, &params),
        )
        .await;

        match result {
            Ok(reply) => {
                let verdict = parse_verdict(&reply.content);
                metrics::counter!("meta_voter.total", "status" => "success").increment(1);
                match verdict {
                    Some(0) => Some(candidates[0].model_id.clone()),
                    Some(1) => Some(candidates[1].model_id.clone()),
                    _ => {
                        tracing::warn!(reply = %reply.content, "Unparseable meta-voter verdict");
                        None
                    }
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "Meta-voter call failed");
                metrics::counter!("meta_voter.total", "status" => "failure").increment(1);
                None
            }
        }
    }
}

/// Scaled consensus gap and grade from a base score vector:
/// `(top − mean) × 2`, clamped to [0, 1].
fn grade(bases: &[f64]) -> (ConsensusGrade, f64) {
    if bases.is_empty() {
        return (ConsensusGrade::VeryWeak, 0.0);
    }
    let top = bases.iter().cloned().fold(f64::MIN, f64::max);
    let mean = bases.iter().sum::<f64>() / bases.len() as f64;
    let scaled = ((top - mean) * 2.0).clamp(0.0, 1.0);
    (ConsensusGrade::from_scaled_gap(scaled), scaled)
}

/// Normalize scores into weights summing to 1. Idempotent: normalizing an
/// already-normalized vector returns it unchanged. A zero vector becomes
/// uniform.
pub fn normalize(scores: &[f64]) -> Vec<f64> {
    if scores.is_empty() {
        return Vec::new();
    }
    let sum: f64 = scores.iter().sum();
    if sum <= f64::EPSILON {
        return vec![1.0 / scores.len() as f64; scores.len()];
    }
    scores.iter().map(|s| s / sum).collect()
}

/// Per-request weight adjustment: each boost adds 0.10 to its factor and
/// removes 0.02 from each of the other five, then the result is clamped
/// non-negative and renormalized.
fn adaptive_weights(
    configured: WeightFactors,
    preliminary: ConsensusGrade,
    similarity: &[Vec<f64>],
    fulfilled: &[&RoleResponse],
) -> WeightFactors {
    const BOOST: f64 = 0.10;
    const OFFSET: f64 = 0.02;

    let mut factors = configured;
    let boost = |target: &mut f64, others: [&mut f64; 5]| {
        *target += BOOST;
        for other in others {
            *other = (*other - OFFSET).max(0.0);
        }
    };

    if preliminary <= ConsensusGrade::Weak {
        let WeightFactors {
            confidence,
            quality,
            historical,
            semantic,
            consensus,
            diversity,
        } = &mut factors;
        boost(historical, [confidence, quality, semantic, consensus, diversity]);
    }

    let mut pair_diversity = Vec::new();
    for i in 0..fulfilled.len() {
        for j in (i + 1)..fulfilled.len() {
            pair_diversity.push(1.0 - similarity[i][j]);
        }
    }
    let mean_diversity = if pair_diversity.is_empty() {
        1.0
    } else {
        pair_diversity.iter().sum::<f64>() / pair_diversity.len() as f64
    };
    if mean_diversity < 0.3 {
        let WeightFactors {
            confidence,
            quality,
            historical,
            semantic,
            consensus,
            diversity,
        } = &mut factors;
        boost(diversity, [confidence, quality, historical, semantic, consensus]);
    }

    let mean_length = fulfilled
        .iter()
        .map(|r| r.content.chars().count())
        .sum::<usize>() as f64
        / fulfilled.len() as f64;
    if mean_length > 1_000.0 {
        let WeightFactors {
            confidence,
            quality,
            historical,
            semantic,
            consensus,
            diversity,
        } = &mut factors;
        boost(quality, [confidence, historical, semantic, consensus, diversity]);
    }

    factors.normalized()
}

/// Substantive tokens of a text: lowercased, alphanumeric, length > 3.
fn token_set(text: &str) -> std::collections::HashSet<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.len() > 3)
        .map(|t| t.to_string())
        .collect()
}

/// Jaccard similarity of two texts over their substantive tokens.
pub(crate) fn token_similarity(a: &str, b: &str) -> f64 {
    let set_a = token_set(a);
    let set_b = token_set(b);
    let union = set_a.union(&set_b).count();
    if union == 0 {
        return 0.0;
    }
    set_a.intersection(&set_b).count() as f64 / union as f64
}

/// Token-overlap similarity matrix over the fulfilled responses.
fn pairwise_similarity(fulfilled: &[&RoleResponse]) -> Vec<Vec<f64>> {
    let n = fulfilled.len();
    let mut matrix = vec![vec![0.0; n]; n];
    for i in 0..n {
        matrix[i][i] = 1.0;
        for j in (i + 1)..n {
            let sim = token_similarity(&fulfilled[i].content, &fulfilled[j].content);
            matrix[i][j] = sim;
            matrix[j][i] = sim;
        }
    }
    matrix
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        text.to_string()
    } else {
        let truncated: String = text.chars().take(max_chars).collect();
        format!("{}…", truncated)
    }
}

/// Find the judge's letter in the reply: the first standalone `A` or `B`.
fn parse_verdict(reply: &str) -> Option<usize> {
    for token in reply.split(|c: char| !c.is_alphanumeric()) {
        match token {
            "A" | "a" => return Some(0),
            "B" | "b" => return Some(1),
            _ => {}
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::breaker::BreakerRegistry;
    use crate::calibration::{ConfidenceLevel, ConfidenceScore};
    use crate::config::BreakerOptions;
    use crate::dispatch::RoleStatus;
    use crate::mock::{MockChatClient, mock_model};
    use crate::provider::{ProviderClient, TokenUsage};
    use crate::quality::QualityScore;

    fn role(model_id: &str, content: &str, confidence: f64, quality: f64) -> RoleResponse {
        RoleResponse {
            model_id: model_id.to_string(),
            status: RoleStatus::Fulfilled,
            content: content.to_string(),
            usage: TokenUsage::default(),
            response_time_ms: 300,
            error: None,
            quality: QualityScore {
                composite: quality,
                ..QualityScore::default()
            },
            confidence: ConfidenceScore {
                raw: confidence,
                calibrated: confidence,
                level: ConfidenceLevel::from_score(confidence),
                ..ConfidenceScore::default()
            },
        }
    }

    fn rejected_role(model_id: &str) -> RoleResponse {
        RoleResponse {
            model_id: model_id.to_string(),
            status: RoleStatus::Rejected,
            content: String::new(),
            usage: TokenUsage::default(),
            response_time_ms: 100,
            error: Some("transport".into()),
            quality: QualityScore::default(),
            confidence: ConfidenceScore::default(),
        }
    }

    fn engine_with_meta(reply: &str) -> VotingEngine {
        let mut registry = ProviderRegistry::default();
        let meta_client: Arc<dyn ProviderClient> = Arc::new(MockChatClient::new("openai", reply));
        registry
            .insert(mock_model("gpt-4o-mini", "openai"), meta_client)
            .unwrap();
        VotingEngine::new(
            Arc::new(registry),
            Arc::new(BreakerRegistry::new(BreakerOptions::default())),
            Arc::new(ReliabilityTracker::new()),
        )
    }

    fn distinct_roles() -> Vec<RoleResponse> {
        vec![
            role(
                "m-a",
                "Microservices decompose systems into small deployable services with \
                 independent scaling and isolated failure domains.",
                0.9,
                0.8,
            ),
            role(
                "m-b",
                "Monolithic applications bundle everything into a single artifact, \
                 which simplifies operations early on.",
                0.5,
                0.4,
            ),
            role(
                "m-c",
                "Databases and caching layers deserve separate consideration from \
                 compute topology entirely.",
                0.3,
                0.3,
            ),
        ]
    }

    #[tokio::test]
    async fn weights_sum_to_one_with_single_winner() {
        let engine = engine_with_meta("A");
        let options = VotingOptions::default();
        let mut meta = MetaVoterOptions::default();
        meta.trigger.max_weight_difference = 0.0; // never trigger

        let result = engine
            .vote(
                "compare architectures",
                PromptClass::Analytical,
                &distinct_roles(),
                &options,
                &meta,
            )
            .await;

        let sum: f64 = result.weights.values().sum();
        assert!((sum - 1.0).abs() < 1e-3);
        assert_eq!(result.winner.as_deref(), Some("m-a"));
        assert!(!result.tie_breaking);
        assert_eq!(result.response_scores.len(), 3);
    }

    #[tokio::test]
    async fn rejected_roles_carry_zero_weight() {
        let engine = engine_with_meta("A");
        let mut roles = distinct_roles();
        roles.push(rejected_role("m-dead"));
        let mut meta = MetaVoterOptions::default();
        meta.trigger.max_weight_difference = 0.0;

        let result = engine
            .vote(
                "compare architectures",
                PromptClass::Analytical,
                &roles,
                &VotingOptions::default(),
                &meta,
            )
            .await;

        assert_eq!(result.weights["m-dead"], 0.0);
        let sum: f64 = result.weights.values().sum();
        assert!((sum - 1.0).abs() < 1e-3);
    }

    #[tokio::test]
    async fn empty_ensemble_produces_empty_result() {
        let engine = engine_with_meta("A");
        let roles = vec![rejected_role("m-a"), rejected_role("m-b")];
        let result = engine
            .vote(
                "anything",
                PromptClass::Factual,
                &roles,
                &VotingOptions::default(),
                &MetaVoterOptions::default(),
            )
            .await;
        assert!(result.winner.is_none());
        assert!(result.weights.is_empty());
    }

    #[tokio::test]
    async fn meta_voter_replaces_winner_but_not_weights() {
        let engine = engine_with_meta("B");
        // Two nearly tied responses.
        let roles = vec![
            role("m-a", "Service boundaries reduce coupling across teams.", 0.80, 0.70),
            role("m-b", "Independent deployability shortens release cycles.", 0.79, 0.70),
        ];
        let options = VotingOptions::default();
        let mut meta = MetaVoterOptions::default();
        meta.model = "gpt-4o-mini".to_string();
        meta.trigger.max_weight_difference = 0.5;
        meta.trigger.min_consensus_strength = "very-weak".to_string();

        let without_meta = {
            let mut m = meta.clone();
            m.trigger.max_weight_difference = 0.0;
            engine
                .vote("q", PromptClass::Analytical, &roles, &options, &m)
                .await
        };
        let with_meta = engine
            .vote("q", PromptClass::Analytical, &roles, &options, &meta)
            .await;

        assert!(with_meta.tie_breaking);
        assert_eq!(with_meta.winner.as_deref(), Some("m-b"));
        // The weights table is untouched by the verdict.
        for (model, weight) in &without_meta.weights {
            assert!((with_meta.weights[model] - weight).abs() < 1e-9);
        }
    }

    #[tokio::test]
    async fn meta_voter_failure_keeps_algorithmic_winner() {
        // Meta model is not in the registry at all.
        let registry = Arc::new(ProviderRegistry::default());
        let engine = VotingEngine::new(
            registry,
            Arc::new(BreakerRegistry::new(BreakerOptions::default())),
            Arc::new(ReliabilityTracker::new()),
        );
        let roles = vec![
            role("m-a", "First nearly tied answer about services.", 0.80, 0.70),
            role("m-b", "Second nearly tied answer about releases.", 0.79, 0.70),
        ];
        let mut meta = MetaVoterOptions::default();
        meta.model = "missing-model".to_string();
        meta.trigger.max_weight_difference = 0.5;
        meta.trigger.min_consensus_strength = "very-weak".to_string();

        let result = engine
            .vote("q", PromptClass::Analytical, &roles, &VotingOptions::default(), &meta)
            .await;
        assert!(result.tie_breaking);
        assert_eq!(result.winner.as_deref(), Some("m-a"));
    }

    #[tokio::test]
    async fn adaptive_weights_boost_quality_for_long_responses() {
        let engine = engine_with_meta("A");
        let long = "distinct words ".repeat(120);
        let roles = vec![
            role("m-a", &format!("alpha {}", long), 0.9, 0.8),
            role("m-b", &format!("beta {}", "other tokens ".repeat(120)), 0.5, 0.5),
        ];
        let mut meta = MetaVoterOptions::default();
        meta.trigger.max_weight_difference = 0.0;

        let result = engine
            .vote("q", PromptClass::Analytical, &roles, &VotingOptions::default(), &meta)
            .await;
        let default = WeightFactors::default();
        assert!(result.adaptive_weights.quality > default.quality);
        assert!((result.adaptive_weights.sum() - 1.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn adaptive_weights_boost_diversity_for_near_duplicates() {
        let engine = engine_with_meta("A");
        let text = "Microservices decompose systems into independently deployable services.";
        let roles = vec![
            role("m-a", text, 0.8, 0.7),
            role("m-b", text, 0.78, 0.7),
        ];
        let mut meta = MetaVoterOptions::default();
        meta.trigger.max_weight_difference = 0.0;

        let result = engine
            .vote("q", PromptClass::Analytical, &roles, &VotingOptions::default(), &meta)
            .await;
        let default = WeightFactors::default();
        assert!(result.adaptive_weights.diversity > default.diversity);
    }

    #[tokio::test]
    async fn disabled_adaptive_weights_keep_configured_factors() {
        let engine = engine_with_meta("A");
        let options = VotingOptions {
            enable_adaptive_weights: false,
            ..VotingOptions::default()
        };
        let mut meta = MetaVoterOptions::default();
        meta.trigger.max_weight_difference = 0.0;

        let result = engine
            .vote(
                "q",
                PromptClass::Analytical,
                &distinct_roles(),
                &options,
                &meta,
            )
            .await;
        let expected = WeightFactors::default().normalized();
        assert!((result.adaptive_weights.confidence - expected.confidence).abs() < 1e-9);
        assert!((result.adaptive_weights.diversity - expected.diversity).abs() < 1e-9);
    }

    #[test]
    fn normalization_is_idempotent() {
        let scores = vec![0.8, 0.6, 0.2];
        let once = normalize(&scores);
        let twice = normalize(&once);
        for (a, b) in once.iter().zip(twice.iter()) {
            assert!((a - b).abs() < 1e-12);
        }
        assert!((once.iter().sum::<f64>() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn zero_scores_normalize_uniformly() {
        let weights = normalize(&[0.0, 0.0]);
        assert_eq!(weights, vec![0.5, 0.5]);
    }

    #[test]
    fn consensus_grade_is_monotonic_in_gap() {
        let grades = [0.0, 0.2, 0.41, 0.56, 0.71, 0.86, 1.0]
            .map(ConsensusGrade::from_scaled_gap);
        for pair in grades.windows(2) {
            assert!(pair[0] <= pair[1]);
        }
        assert_eq!(ConsensusGrade::from_scaled_gap(0.9), ConsensusGrade::VeryStrong);
        assert_eq!(ConsensusGrade::from_scaled_gap(0.1), ConsensusGrade::VeryWeak);
    }

    #[test]
    fn verdict_parsing_tolerates_prose() {
        assert_eq!(parse_verdict("B"), Some(1));
        assert_eq!(parse_verdict("The better answer is A."), Some(0));
        assert_eq!(parse_verdict("Neither, honestly"), None);
    }

    #[test]
    fn record_outcomes_updates_tracker() {
        let tracker = ReliabilityTracker::new();
        let mut result = VotingResult::empty();
        result.winner = Some("m-a".into());
        result.response_scores = vec![
            ResponseScore {
                model_id: "m-a".into(),
                fulfilled: true,
                factors: FactorScores::default(),
                base: 0.8,
                weight: 0.6,
            },
            ResponseScore {
                model_id: "m-b".into(),
                fulfilled: true,
                factors: FactorScores::default(),
                base: 0.5,
                weight: 0.4,
            },
        ];
        result.record_outcomes(&tracker);
        assert_eq!(tracker.performance("m-a").recent_win_rate, 1.0);
        assert_eq!(tracker.performance("m-b").recent_win_rate, 0.0);
    }
}

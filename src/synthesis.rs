//! Synthesis: strategy-adapted consolidation of the ensemble into a single
//! answer, with one quality-driven improvement round and a verbatim
//! best-role fallback.

use crate::breaker::{BreakerRegistry, guarded_call};
use crate::classify::{Complexity, PromptClass};
use crate::config::{RetryPolicy, SynthesisOptions, TierLimits};
use crate::dispatch::RoleResponse;
use crate::provider::{CallParams, ChatMessage, ProviderRegistry};
use crate::quality;
use crate::voting::{VotingResult, token_similarity};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// How the final content was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SynthesisStage {
    /// First synthesis call, accepted as-is.
    Initial,
    /// The improvement round's output scored higher and was kept.
    Improved,
    /// Synthesis was impossible or failed; a role answer (or the canned
    /// apology) was returned verbatim.
    Fallback,
}

impl std::fmt::Display for SynthesisStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Initial => write!(f, "initial"),
            Self::Improved => write!(f, "improved"),
            Self::Fallback => write!(f, "fallback"),
        }
    }
}

/// The consolidated answer.
#[derive(Debug, Clone)]
pub struct SynthesisResult {
    pub content: String,
    /// The model that produced `content` (the synthesizer, or the source
    /// role in fallback).
    pub model_id: String,
    pub strategy_name: &'static str,
    pub stage: SynthesisStage,
    pub quality_score: f64,
    pub processing_time_ms: u64,
    /// Number of fulfilled roles that fed the synthesis.
    pub source_count: usize,
}

/// Content returned when nothing at all can be answered.
const UNABLE_TO_RESPOND: &str =
    "I was unable to produce an answer to this request. Please try again in a moment.";

/// Quality attached to the canned apology.
const UNABLE_QUALITY: f64 = 0.1;

/// Prompt-class-specific synthesis strategy.
#[derive(Debug, Clone, Copy)]
pub struct SynthesisStrategy {
    pub name: &'static str,
    pub approach: &'static str,
    pub focus_areas: &'static [&'static str],
}

/// Strategy table keyed by prompt class.
pub fn strategy_for(class: PromptClass) -> SynthesisStrategy {
    match class {
        PromptClass::Analytical => SynthesisStrategy {
            name: "comparative-analysis",
            approach: "Weigh the perspectives against each other and draw a reasoned conclusion",
            focus_areas: &["criteria", "trade-offs", "conclusion"],
        },
        PromptClass::Creative => SynthesisStrategy {
            name: "creative-blend",
            approach: "Blend the strongest imagery and ideas into one coherent piece",
            focus_areas: &["voice", "imagery", "originality"],
        },
        PromptClass::Technical => SynthesisStrategy {
            name: "technical-merge",
            approach: "Merge the technically correct parts, preferring precise terminology and working examples",
            focus_areas: &["correctness", "examples", "edge cases"],
        },
        PromptClass::Explanatory => SynthesisStrategy {
            name: "layered-explanation",
            approach: "Build one explanation from simple foundations to the full picture",
            focus_areas: &["clarity", "progression", "examples"],
        },
        PromptClass::Factual => SynthesisStrategy {
            name: "fact-consolidation",
            approach: "Keep only claims the responses agree on or that are well supported",
            focus_areas: &["accuracy", "agreement", "brevity"],
        },
        PromptClass::Conversational => SynthesisStrategy {
            name: "conversational-merge",
            approach: "Answer naturally and directly, folding in the best points",
            focus_areas: &["directness", "tone"],
        },
    }
}

/// Strategy-adapted synthesis over the fulfilled role responses.
pub struct SynthesisEngine {
    registry: Arc<ProviderRegistry>,
    breakers: Arc<BreakerRegistry>,
}

impl SynthesisEngine {
    pub fn new(registry: Arc<ProviderRegistry>, breakers: Arc<BreakerRegistry>) -> Self {
        Self { registry, breakers }
    }

    /// Produce the consolidated answer. Never errors: synthesis failures
    /// degrade to the best individual role, and an empty ensemble yields
    /// the canned apology.
    #[allow(clippy::too_many_arguments)]
    pub async fn synthesize(
        &self,
        prompt: &str,
        class: PromptClass,
        complexity: Complexity,
        responses: &[RoleResponse],
        voting: &VotingResult,
        options: &SynthesisOptions,
        limits: &TierLimits,
        retry: RetryPolicy,
    ) -> SynthesisResult {
        let start = Instant::now();
        let strategy = strategy_for(class);
        let fulfilled: Vec<&RoleResponse> =
            responses.iter().filter(|r| r.is_fulfilled()).collect();

        if fulfilled.is_empty() {
            return self.fallback(prompt, strategy, &fulfilled, start);
        }

        let comparative_pairs = count_comparative_pairs(&fulfilled);
        let fallback_mode = fulfilled.len() == 1;

        let max_tokens = (200 + 200 * fulfilled.len() as u32 + 50 * comparative_pairs as u32)
            .min(options.max_tokens_cap)
            .min(limits.max_synthesis_tokens);
        let temperature = options.base_temperature
            + if comparative_pairs > 0 { 0.15 } else { 0.0 }
            - if fallback_mode { 0.1 } else { 0.0 };
        let params = CallParams {
            max_tokens,
            temperature,
        };

        // The tier's shared word budget is split evenly across the sources.
        let words_per_role = (limits.shared_word_limit / fulfilled.len()).max(50);
        let synthesis_prompt =
            build_synthesis_prompt(prompt, strategy, complexity, &fulfilled, voting, words_per_role);
        let first = self
            .call_synthesizer(&synthesis_prompt, options, params, retry)
            .await;

        let content = match first {
            Ok(content) => content,
            Err(e) => {
                tracing::warn!(error = %e, "Synthesis call failed, falling back to best role");
                return self.fallback(prompt, strategy, &fulfilled, start);
            }
        };

        let first_score = scored(prompt, &content, strategy);
        if first_score >= options.min_quality {
            return SynthesisResult {
                content,
                model_id: options.model.clone(),
                strategy_name: strategy.name,
                stage: SynthesisStage::Initial,
                quality_score: first_score,
                processing_time_ms: start.elapsed().as_millis() as u64,
                source_count: fulfilled.len(),
            };
        }

        // One improvement round citing the weakest components, keeping
        // whichever output scores higher.
        let gaps = quality_gaps(prompt, &content);
        let improvement_prompt = format!(
            "Improve the following answer to the question below. \
             Known weaknesses: {}.\n\nQuestion:\n{}\n\nAnswer to improve:\n{}",
            gaps.join(", "),
            prompt,
            content
        );
        match self
            .call_synthesizer(&improvement_prompt, options, params, retry)
            .await
        {
            Ok(improved) => {
                let improved_score = scored(prompt, &improved, strategy);
                if improved_score > first_score {
                    SynthesisResult {
                        content: improved,
                        model_id: options.model.clone(),
                        strategy_name: strategy.name,
                        stage: SynthesisStage::Improved,
                        quality_score: improved_score,
                        processing_time_ms: start.elapsed().as_millis() as u64,
                        source_count: fulfilled.len(),
                    }
                } else {
                    SynthesisResult {
                        content,
                        model_id: options.model.clone(),
                        strategy_name: strategy.name,
                        stage: SynthesisStage::Initial,
                        quality_score: first_score,
                        processing_time_ms: start.elapsed().as_millis() as u64,
                        source_count: fulfilled.len(),
                    }
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "Improvement call failed, keeping initial synthesis");
                SynthesisResult {
                    content,
                    model_id: options.model.clone(),
                    strategy_name: strategy.name,
                    stage: SynthesisStage::Initial,
                    quality_score: first_score,
                    processing_time_ms: start.elapsed().as_millis() as u64,
                    source_count: fulfilled.len(),
                }
            }
        }
    }

    async fn call_synthesizer(
        &self,
        synthesis_prompt: &str,
        options: &SynthesisOptions,
        params: CallParams,
        retry: RetryPolicy,
    ) -> crate::error::Result<String> {
        let registered = self.registry.get(&options.model)?;
        let breaker = self.breakers.breaker_for(&options.model);
        let client = Arc::clone(&registered.client);
        let model_name = registered.config.model.clone();
        let messages = [ChatMessage::user(synthesis_prompt.to_string())];
        let timeout = Duration::from_millis(registered.config.timeout_ms);

        let reply = guarded_call(
            &breaker,
            retry,
            timeout,
            &registered.config.provider,
            || client.call(&model_name, &messages, &params),
        )
        .await?;
        Ok(reply.content)
    }

    /// `stage = fallback`: the highest-confidence fulfilled role verbatim,
    /// or the canned apology when nothing succeeded.
    fn fallback(
        &self,
        prompt: &str,
        strategy: SynthesisStrategy,
        fulfilled: &[&RoleResponse],
        start: Instant,
    ) -> SynthesisResult {
        let best = fulfilled.iter().max_by(|a, b| {
            a.confidence
                .calibrated
                .partial_cmp(&b.confidence.calibrated)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        match best {
            Some(role) => SynthesisResult {
                content: role.content.clone(),
                model_id: role.model_id.clone(),
                strategy_name: strategy.name,
                stage: SynthesisStage::Fallback,
                quality_score: quality::score(prompt, &role.content).composite,
                processing_time_ms: start.elapsed().as_millis() as u64,
                source_count: fulfilled.len(),
            },
            None => SynthesisResult {
                content: UNABLE_TO_RESPOND.to_string(),
                model_id: String::new(),
                strategy_name: strategy.name,
                stage: SynthesisStage::Fallback,
                quality_score: UNABLE_QUALITY,
                processing_time_ms: start.elapsed().as_millis() as u64,
                source_count: 0,
            },
        }
    }
}

/// Quality composite plus a small strategy bonus when the content touches
/// the strategy's focus areas.
fn scored(prompt: &str, content: &str, strategy: SynthesisStrategy) -> f64 {
    let base = quality::score(prompt, content).composite;
    let lower = content.to_lowercase();
    let touched = strategy
        .focus_areas
        .iter()
        .filter(|area| lower.contains(*area))
        .count();
    (base + 0.05 * touched.min(2) as f64).clamp(0.0, 1.0)
}

/// Human-readable weaknesses for the improvement prompt.
fn quality_gaps(prompt: &str, content: &str) -> Vec<&'static str> {
    let score = quality::score(prompt, content);
    let mut gaps = Vec::new();
    if score.length_component < 0.15 {
        gaps.push("it is too short");
    }
    if score.structure_component < 0.1 {
        gaps.push("it lacks structure (headings or lists)");
    }
    if score.relevance_component < 0.15 {
        gaps.push("it drifts from the question");
    }
    if score.specificity_component < 0.1 {
        gaps.push("it needs concrete examples or numbers");
    }
    if gaps.is_empty() {
        gaps.push("it could be clearer and more complete");
    }
    gaps
}

/// Pairs of responses different enough to offer competing perspectives.
fn count_comparative_pairs(fulfilled: &[&RoleResponse]) -> usize {
    let mut pairs = 0;
    for i in 0..fulfilled.len() {
        for j in (i + 1)..fulfilled.len() {
            if token_similarity(&fulfilled[i].content, &fulfilled[j].content) < 0.5 {
                pairs += 1;
            }
        }
    }
    pairs
}

/// Contradiction markers that flag conflicting role answers.
const CONFLICT_MARKERS: [&str; 7] = [
    "however",
    "on the contrary",
    "incorrect",
    "not true",
    "disagree",
    "this is wrong",
    "misleading",
];

/// A pair conflicts when the responses overlap on topic yet one pushes back
/// with contradiction language.
fn detect_conflicts(fulfilled: &[&RoleResponse]) -> bool {
    for i in 0..fulfilled.len() {
        for j in (i + 1)..fulfilled.len() {
            let overlap = token_similarity(&fulfilled[i].content, &fulfilled[j].content);
            if overlap < 0.2 {
                continue;
            }
            let text = format!(
                "{} {}",
                fulfilled[i].content.to_lowercase(),
                fulfilled[j].content.to_lowercase()
            );
            if CONFLICT_MARKERS.iter().any(|m| text.contains(m)) {
                return true;
            }
        }
    }
    false
}

/// Cap a text to its first `max_words` whitespace-separated words.
fn cap_words(text: &str, max_words: usize) -> String {
    let words: Vec<&str> = text.split_whitespace().collect();
    if words.len() <= max_words {
        text.to_string()
    } else {
        words[..max_words].join(" ")
    }
}

/// Assemble the synthesis prompt: strategy header, adaptation clauses, and
/// the weighted role answers (each capped to its word budget).
fn build_synthesis_prompt(
    prompt: &str,
    strategy: SynthesisStrategy,
    complexity: Complexity,
    fulfilled: &[&RoleResponse],
    voting: &VotingResult,
    words_per_role: usize,
) -> String {
    let mut out = String::with_capacity(2_048);
    out.push_str(&format!(
        "You are consolidating {} independent answers into one. {}.\n",
        fulfilled.len(),
        strategy.approach
    ));

    if detect_conflicts(fulfilled) {
        out.push_str(
            "The answers contradict each other in places; resolve each conflict explicitly \
             rather than averaging over it.\n",
        );
    }
    match complexity {
        Complexity::High => {
            out.push_str("Preserve the technical depth of the source answers.\n");
        }
        Complexity::Low => {
            out.push_str("Expand the coverage a little; the sources are brief.\n");
        }
        Complexity::Medium => {}
    }
    if fulfilled.iter().any(|r| looks_structured(&r.content)) {
        out.push_str("Keep the structured formatting (headings, lists) of the sources.\n");
    }

    out.push_str(&format!("\nQuestion:\n{}\n", prompt));
    for (i, role) in fulfilled.iter().enumerate() {
        let weight = voting
            .weights
            .get(&role.model_id)
            .copied()
            .unwrap_or_default();
        out.push_str(&format!(
            "\nAnswer {} (vote weight {:.2}):\n{}\n",
            i + 1,
            weight,
            cap_words(&role.content, words_per_role)
        ));
    }
    out.push_str("\nWrite the single consolidated answer now.");
    out
}

fn looks_structured(content: &str) -> bool {
    content.lines().any(|line| {
        let trimmed = line.trim_start();
        trimmed.starts_with('#') || trimmed.starts_with("- ") || trimmed.starts_with("* ")
    })
}

//! Confidence calibration: per-model accuracy history with a monotonic
//! raw-to-calibrated mapping, plus the semantic confidence heuristics
//! (reference-embedding similarity, grammar quality, latency factor).

use crate::breaker::CircuitBreaker;
use crate::classify::ReferenceCategory;
use crate::config::BreakerOptions;
use crate::error::Result;
use crate::provider::EmbeddingClient;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

/// Retained `(predicted, outcome)` samples per model.
const MAX_SAMPLES: usize = 1_000;

/// Minimum samples before the calibration fit replaces the identity map.
const MIN_SAMPLES_FOR_FIT: usize = 10;

const REFERENCE_SIMILARITY_WEIGHT: f64 = 0.40;
const GRAMMAR_WEIGHT: f64 = 0.30;
const LATENCY_WEIGHT: f64 = 0.30;

/// Qualitative confidence bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ConfidenceLevel {
    VeryLow,
    Low,
    Medium,
    High,
    VeryHigh,
}

impl ConfidenceLevel {
    /// Bucket a score: very-low < 0.2 ≤ low < 0.4 ≤ medium < 0.6 ≤ high
    /// < 0.8 ≤ very-high.
    pub fn from_score(score: f64) -> Self {
        if score < 0.2 {
            Self::VeryLow
        } else if score < 0.4 {
            Self::Low
        } else if score < 0.6 {
            Self::Medium
        } else if score < 0.8 {
            Self::High
        } else {
            Self::VeryHigh
        }
    }

    /// Drop one bucket, saturating at very-low. Used when final validation
    /// downgrades an answer.
    pub fn downgraded(self) -> Self {
        match self {
            Self::VeryHigh => Self::High,
            Self::High => Self::Medium,
            Self::Medium => Self::Low,
            Self::Low | Self::VeryLow => Self::VeryLow,
        }
    }
}

impl std::fmt::Display for ConfidenceLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::VeryLow => write!(f, "very-low"),
            Self::Low => write!(f, "low"),
            Self::Medium => write!(f, "medium"),
            Self::High => write!(f, "high"),
            Self::VeryHigh => write!(f, "very-high"),
        }
    }
}

/// The heuristic sub-scores behind a semantic confidence value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConfidenceComponents {
    pub reference_similarity: f64,
    pub grammar: f64,
    pub latency_factor: f64,
    pub category: ReferenceCategory,
}

/// A response's confidence, raw and calibrated.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConfidenceScore {
    pub raw: f64,
    pub calibrated: f64,
    pub level: ConfidenceLevel,
    pub components: ConfidenceComponents,
}

impl Default for ConfidenceScore {
    fn default() -> Self {
        Self {
            raw: 0.0,
            calibrated: 0.0,
            level: ConfidenceLevel::VeryLow,
            components: ConfidenceComponents {
                reference_similarity: 0.0,
                grammar: 0.0,
                latency_factor: 0.0,
                category: ReferenceCategory::General,
            },
        }
    }
}

#[derive(Default)]
struct ModelHistory {
    samples: VecDeque<(f64, f64)>,
}

impl ModelHistory {
    fn push(&mut self, predicted: f64, outcome: f64) {
        if self.samples.len() == MAX_SAMPLES {
            self.samples.pop_front();
        }
        self.samples
            .push_back((predicted.clamp(0.0, 1.0), outcome.clamp(0.0, 1.0)));
    }

    /// Least-squares fit of outcome on predicted probability, slope clamped
    /// to be non-negative so the mapping stays monotonic (a linear stand-in
    /// for isotonic regression).
    fn fit(&self) -> Option<(f64, f64)> {
        let n = self.samples.len();
        if n < MIN_SAMPLES_FOR_FIT {
            return None;
        }
        let n_f = n as f64;
        let mean_x: f64 = self.samples.iter().map(|(x, _)| x).sum::<f64>() / n_f;
        let mean_y: f64 = self.samples.iter().map(|(_, y)| y).sum::<f64>() / n_f;
        let mut cov = 0.0;
        let mut var = 0.0;
        for (x, y) in &self.samples {
            cov += (x - mean_x) * (y - mean_y);
            var += (x - mean_x) * (x - mean_x);
        }
        if var < f64::EPSILON {
            // All predictions identical; map everything to the observed rate.
            return Some((0.0, mean_y));
        }
        let slope = (cov / var).max(0.0);
        let intercept = mean_y - slope * mean_x;
        Some((slope, intercept))
    }

    /// Mean squared error of predictions against outcomes.
    fn brier(&self) -> Option<f64> {
        if self.samples.is_empty() {
            return None;
        }
        let sum: f64 = self
            .samples
            .iter()
            .map(|(x, y)| (x - y) * (x - y))
            .sum();
        Some(sum / self.samples.len() as f64)
    }
}

/// Per-model calibration state plus the semantic confidence scorer.
///
/// Calibration histories live under per-model mutexes; reference-category
/// embeddings are computed once through the optional [`EmbeddingClient`]
/// and cached. Without an embedder, reference similarity degrades to a
/// neutral 0.5 so the remaining heuristics still discriminate.
pub struct ConfidenceCalibrator {
    histories: Mutex<HashMap<String, Arc<Mutex<ModelHistory>>>>,
    embedder: Option<Arc<dyn EmbeddingClient>>,
    /// Embedding calls run under the same breaker policy as chat calls.
    embed_breaker: CircuitBreaker,
    references: tokio::sync::Mutex<HashMap<ReferenceCategory, Vec<f32>>>,
}

impl ConfidenceCalibrator {
    /// Calibrator without an embedding backend.
    pub fn new() -> Self {
        Self {
            histories: Mutex::new(HashMap::new()),
            embedder: None,
            embed_breaker: CircuitBreaker::new("embedding", BreakerOptions::default()),
            references: tokio::sync::Mutex::new(HashMap::new()),
        }
    }

    /// Calibrator that scores reference similarity through `embedder`.
    pub fn with_embedder(embedder: Arc<dyn EmbeddingClient>) -> Self {
        Self {
            histories: Mutex::new(HashMap::new()),
            embedder: Some(embedder),
            embed_breaker: CircuitBreaker::new("embedding", BreakerOptions::default()),
            references: tokio::sync::Mutex::new(HashMap::new()),
        }
    }

    async fn embed_guarded(
        &self,
        embedder: &Arc<dyn EmbeddingClient>,
        texts: &[&str],
    ) -> Result<Vec<Vec<f32>>> {
        self.embed_breaker
            .call(|| embedder.embed(texts))
            .await
    }

    fn history_for(&self, model: &str) -> Arc<Mutex<ModelHistory>> {
        let mut histories = self.histories.lock().expect("calibration lock poisoned");
        histories
            .entry(model.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(ModelHistory::default())))
            .clone()
    }

    /// Record an observed `(predicted probability, actual outcome)` pair.
    pub fn record_sample(&self, model: &str, predicted: f64, outcome: bool) {
        let history = self.history_for(model);
        let mut history = history.lock().expect("model history poisoned");
        history.push(predicted, if outcome { 1.0 } else { 0.0 });
    }

    /// Map a raw confidence through the model's calibration fit. Identity
    /// until enough samples exist; always clamped to [0, 1].
    pub fn calibrate(&self, model: &str, raw: f64) -> f64 {
        let history = self.history_for(model);
        let history = history.lock().expect("model history poisoned");
        match history.fit() {
            Some((slope, intercept)) => (slope * raw + intercept).clamp(0.0, 1.0),
            None => raw.clamp(0.0, 1.0),
        }
    }

    /// Brier score of the model's recorded predictions, when any exist.
    pub fn brier_score(&self, model: &str) -> Option<f64> {
        let history = self.history_for(model);
        let history = history.lock().expect("model history poisoned");
        history.brier()
    }

    /// Full confidence score for one response: semantic raw confidence
    /// remapped through the model's calibration history.
    pub async fn score(&self, model: &str, content: &str, latency_ms: u64) -> ConfidenceScore {
        let category = ReferenceCategory::for_content(content);
        let reference_similarity = self.reference_similarity(category, content).await;
        let grammar = grammar_score(content);
        let latency_factor = latency_factor(latency_ms);

        let raw = (REFERENCE_SIMILARITY_WEIGHT * reference_similarity
            + GRAMMAR_WEIGHT * grammar
            + LATENCY_WEIGHT * latency_factor)
            .clamp(0.0, 1.0);
        let calibrated = self.calibrate(model, raw);

        ConfidenceScore {
            raw,
            calibrated,
            level: ConfidenceLevel::from_score(calibrated),
            components: ConfidenceComponents {
                reference_similarity,
                grammar,
                latency_factor,
                category,
            },
        }
    }

    /// Cosine similarity between the response embedding and the cached
    /// per-category reference embedding. Any embedding failure degrades to
    /// a neutral 0.5 rather than failing the pipeline.
    async fn reference_similarity(&self, category: ReferenceCategory, content: &str) -> f64 {
        let Some(embedder) = &self.embedder else {
            return 0.5;
        };

        let reference = {
            let mut references = self.references.lock().await;
            match references.get(&category) {
                Some(v) => v.clone(),
                None => {
                    match self.embed_guarded(embedder, &[category.reference_text()]).await {
                        Ok(mut vectors) if !vectors.is_empty() => {
                            let v = vectors.remove(0);
                            references.insert(category, v.clone());
                            v
                        }
                        Ok(_) | Err(_) => {
                            tracing::warn!(category = %category, "Reference embedding unavailable");
                            return 0.5;
                        }
                    }
                }
            }
        };

        match self.embed_guarded(embedder, &[content]).await {
            Ok(vectors) if !vectors.is_empty() => {
                cosine_similarity(&reference, &vectors[0]).clamp(0.0, 1.0)
            }
            Ok(_) => {
                tracing::warn!("Response embedding came back empty");
                0.5
            }
            Err(e) => {
                tracing::warn!(error = %e, "Response embedding failed");
                0.5
            }
        }
    }
}

impl Default for ConfidenceCalibrator {
    fn default() -> Self {
        Self::new()
    }
}

/// Cosine similarity of two vectors; 0.0 when either norm vanishes or the
/// dimensions disagree.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += (*x as f64) * (*y as f64);
        norm_a += (*x as f64) * (*x as f64);
        norm_b += (*y as f64) * (*y as f64);
    }
    if norm_a < f64::EPSILON || norm_b < f64::EPSILON {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

/// Surface-level grammar heuristic: sentence length band, sentence
/// capitalization, terminal punctuation, lexical diversity.
pub fn grammar_score(text: &str) -> f64 {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return 0.0;
    }

    let sentences: Vec<&str> = trimmed
        .split(['.', '!', '?'])
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect();
    if sentences.is_empty() {
        return 0.2;
    }

    // Average sentence length in a readable 8..=30 word band.
    let avg_words: f64 = sentences
        .iter()
        .map(|s| s.split_whitespace().count() as f64)
        .sum::<f64>()
        / sentences.len() as f64;
    let length_term = if (8.0..=30.0).contains(&avg_words) {
        1.0
    } else if avg_words < 8.0 {
        avg_words / 8.0
    } else {
        (30.0 / avg_words).max(0.3)
    };

    let capitalized = sentences
        .iter()
        .filter(|s| s.chars().next().map(char::is_uppercase).unwrap_or(false))
        .count();
    let capitalization_term = capitalized as f64 / sentences.len() as f64;

    let punctuation_term = if trimmed.ends_with(['.', '!', '?']) { 1.0 } else { 0.5 };

    let words: Vec<String> = trimmed
        .split_whitespace()
        .map(|w| w.to_lowercase())
        .collect();
    let distinct: std::collections::HashSet<&str> = words.iter().map(String::as_str).collect();
    let diversity_term = if words.is_empty() {
        0.0
    } else {
        (distinct.len() as f64 / words.len() as f64).min(1.0)
    };

    (0.3 * length_term + 0.25 * capitalization_term + 0.2 * punctuation_term
        + 0.25 * diversity_term)
        .clamp(0.0, 1.0)
}

/// `max(0, 1 − (log2(latency_ms) − 8) / 6)`, clamped to [0, 1]. Roughly:
/// full credit up to ~256 ms, zero beyond ~16 s.
pub fn latency_factor(latency_ms: u64) -> f64 {
    let ms = latency_ms.max(1) as f64;
    (1.0 - (ms.log2() - 8.0) / 6.0).clamp(0.0, 1.0)
}

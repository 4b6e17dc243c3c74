//! The request orchestrator: admission, routing, dispatch, scoring, voting,
//! synthesis, validation, persistence, and finalization — ten stages per
//! request, with graceful degradation at every step past admission.

use crate::admission::QuotaTracker;
use crate::breaker::{BreakerRegistry, BreakerSnapshot, guarded_call};
use crate::calibration::ConfidenceCalibrator;
use crate::classify::{Complexity, PromptClass};
use crate::config::{ConfigHandle, EnsembleConfig, Tier};
use crate::dispatch::{DispatchOptions, Dispatcher, RoleResponse};
use crate::error::{OrchestratorError, Result};
use crate::metrics::{MetricsSnapshot, RollingMetrics};
use crate::provider::{
    CallParams, ChatMessage, EmbeddingClient, ProviderClient, ProviderRegistry,
};
use crate::quality;
use crate::reliability::{CompactionHandle, ProviderStats, ReliabilityTracker};
use crate::router::ModelRouter;
use crate::synthesis::{SynthesisEngine, SynthesisStage};
use crate::voting::{VotingEngine, VotingResult};
use async_trait::async_trait;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tokio::sync::Semaphore;

/// One conversational exchange persisted to the session store.
#[derive(Debug, Clone)]
pub struct StoredTurn {
    pub session_id: String,
    pub user_message: String,
    pub assistant_message: String,
    pub correlation_id: String,
    pub quality: f64,
}

/// Session memory collaborator. Best-effort: failures are logged, never
/// fatal to the request.
#[async_trait]
pub trait SessionMemory: Send + Sync {
    async fn get_context(&self, session_id: &str, max_tokens: u32) -> Result<Option<String>>;
    async fn store(&self, turn: StoredTurn) -> Result<()>;
}

/// Tier lookup collaborator.
#[async_trait]
pub trait AuthTier: Send + Sync {
    async fn tier_for(&self, user_id: &str) -> Result<Tier>;
}

/// The boundary request shape.
#[derive(Debug, Clone, Default)]
pub struct EnsembleRequest {
    pub prompt: String,
    pub user_id: String,
    pub session_id: Option<String>,
    /// Include the per-response scoring breakdown in the voting envelope.
    pub explain: bool,
    pub correlation_id: Option<String>,
    /// Tier claim; overrides the auth collaborator when present.
    pub tier: Option<String>,
}

/// Final request disposition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeStatus {
    /// The full pipeline ran.
    Success,
    /// The single-model fallback answered.
    Degraded,
    /// Even the fallback failed.
    Error,
}

#[derive(Debug, Clone, Serialize)]
pub struct ConfidenceEnvelope {
    pub score: f64,
    pub level: String,
    pub factors: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SynthesisEnvelope {
    pub content: String,
    pub confidence: ConfidenceEnvelope,
    pub status: String,
    /// Whether the improvement round's output was kept.
    pub optimized: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct QualityEnvelope {
    pub composite: f64,
    pub length: f64,
    pub structure: f64,
    pub relevance: f64,
    pub specificity: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct RoleEnvelope {
    pub role: String,
    pub status: String,
    pub content: String,
    pub confidence: f64,
    pub response_time_ms: u64,
    pub quality: QualityEnvelope,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct VotingEnvelope {
    pub winner: Option<String>,
    pub confidence: f64,
    pub consensus: String,
    pub weights: HashMap<String, f64>,
    /// Per-response factor breakdown when `explain` was requested.
    pub analysis: serde_json::Value,
}

#[derive(Debug, Clone, Serialize)]
pub struct ValidationSummary {
    pub passed: bool,
    pub issues: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct OutcomeMetadata {
    pub total_processing_time_ms: u64,
    pub selected_models: Vec<String>,
    pub strategy: String,
    pub response_quality: f64,
    pub correlation_id: String,
    pub timestamp_ms: u64,
    pub prompt_class: String,
    pub complexity: String,
    pub tier: String,
    pub tie_breaking: bool,
    pub validation: ValidationSummary,
}

/// Everything returned to the boundary for a request that got past
/// admission.
#[derive(Debug, Clone, Serialize)]
pub struct EnsembleOutcome {
    pub status: OutcomeStatus,
    pub synthesis: SynthesisEnvelope,
    pub roles: Vec<RoleEnvelope>,
    pub voting: VotingEnvelope,
    pub metadata: OutcomeMetadata,
}

impl EnsembleOutcome {
    /// Boundary status code: degraded success is still a 200.
    pub fn http_status(&self) -> u16 {
        match self.status {
            OutcomeStatus::Success | OutcomeStatus::Degraded => 200,
            OutcomeStatus::Error => 500,
        }
    }
}

/// The boundary error envelope for requests rejected before dispatch.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorEnvelope {
    pub status: &'static str,
    pub kind: String,
    pub message: String,
    pub correlation_id: String,
    pub timestamp_ms: u64,
    #[serde(skip)]
    pub http_status: u16,
}

impl ErrorEnvelope {
    fn new(error: &OrchestratorError, correlation_id: String) -> Self {
        let http_status = match error {
            OrchestratorError::RateLimited => 429,
            _ => 400,
        };
        Self {
            status: "error",
            kind: error.kind().to_string(),
            message: error.to_string(),
            correlation_id,
            timestamp_ms: now_millis(),
            http_status,
        }
    }
}

/// Aggregated health view: rolling metrics, per-provider reliability, and
/// breaker states.
#[derive(Debug, Clone)]
pub struct HealthReport {
    pub metrics: MetricsSnapshot,
    pub providers: Vec<ProviderStats>,
    pub breakers: Vec<(String, BreakerSnapshot)>,
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Builder for an [`Orchestrator`], following the runtime-builder pattern:
/// register provider clients, collaborators, and a validated config, then
/// `build().await`.
#[derive(Default)]
pub struct OrchestratorBuilder {
    config: Option<EnsembleConfig>,
    clients: HashMap<String, Arc<dyn ProviderClient>>,
    embedder: Option<Arc<dyn EmbeddingClient>>,
    memory: Option<Arc<dyn SessionMemory>>,
    auth: Option<Arc<dyn AuthTier>>,
}

impl OrchestratorBuilder {
    pub fn config(mut self, config: EnsembleConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Register a chat client, keyed by its provider family.
    pub fn register_client(mut self, client: Arc<dyn ProviderClient>) -> Self {
        self.clients.insert(client.provider_id().to_string(), client);
        self
    }

    pub fn embedder(mut self, embedder: Arc<dyn EmbeddingClient>) -> Self {
        self.embedder = Some(embedder);
        self
    }

    pub fn session_memory(mut self, memory: Arc<dyn SessionMemory>) -> Self {
        self.memory = Some(memory);
        self
    }

    pub fn auth_tier(mut self, auth: Arc<dyn AuthTier>) -> Self {
        self.auth = Some(auth);
        self
    }

    /// Validate the config, build the registry and all pipeline components,
    /// and start background compaction.
    pub async fn build(self) -> Result<Orchestrator> {
        let mut config = self.config.unwrap_or_default();
        config.validate()?;

        let registry = Arc::new(ProviderRegistry::from_catalog(&config.models, &self.clients)?);
        let breakers = Arc::new(BreakerRegistry::new(config.breaker));
        let reliability = Arc::new(ReliabilityTracker::new());
        let calibrator = Arc::new(match self.embedder {
            Some(embedder) => ConfidenceCalibrator::with_embedder(embedder),
            None => ConfidenceCalibrator::new(),
        });

        let router = ModelRouter::new(
            Arc::clone(&registry),
            Arc::clone(&breakers),
            Arc::clone(&reliability),
        );
        let dispatcher = Dispatcher::new(
            Arc::clone(&registry),
            Arc::clone(&breakers),
            Arc::clone(&reliability),
            &config,
        );
        let voting = VotingEngine::new(
            Arc::clone(&registry),
            Arc::clone(&breakers),
            Arc::clone(&reliability),
        );
        let synthesis = SynthesisEngine::new(Arc::clone(&registry), Arc::clone(&breakers));

        let mut admission = HashMap::new();
        for tier in [Tier::Free, Tier::Premium] {
            admission.insert(
                tier,
                Arc::new(Semaphore::new(config.tiers.limits(tier).concurrency_limit)),
            );
        }

        let compaction = reliability.spawn_compaction();

        Ok(Orchestrator {
            config: ConfigHandle::new(config),
            registry,
            breakers,
            reliability,
            calibrator,
            router,
            dispatcher,
            voting,
            synthesis,
            rolling: RollingMetrics::new(),
            memory: self.memory,
            auth: self.auth,
            admission,
            quotas: QuotaTracker::new(),
            correlation_counter: AtomicU64::new(0),
            compaction,
        })
    }
}

/// The ensemble pipeline entry point. One instance serves all requests;
/// per-request state is local to [`handle`](Self::handle).
pub struct Orchestrator {
    config: ConfigHandle,
    registry: Arc<ProviderRegistry>,
    breakers: Arc<BreakerRegistry>,
    reliability: Arc<ReliabilityTracker>,
    calibrator: Arc<ConfidenceCalibrator>,
    router: ModelRouter,
    dispatcher: Dispatcher,
    voting: VotingEngine,
    synthesis: SynthesisEngine,
    rolling: RollingMetrics,
    memory: Option<Arc<dyn SessionMemory>>,
    auth: Option<Arc<dyn AuthTier>>,
    admission: HashMap<Tier, Arc<Semaphore>>,
    quotas: QuotaTracker,
    correlation_counter: AtomicU64,
    compaction: CompactionHandle,
}

/// Per-request context threaded through the stages.
struct RequestContext {
    correlation_id: String,
    tier: Tier,
    class: PromptClass,
    complexity: Complexity,
    started: Instant,
}

impl Orchestrator {
    pub fn builder() -> OrchestratorBuilder {
        OrchestratorBuilder::default()
    }

    /// The configuration handle, for signal-driven reloads.
    pub fn config(&self) -> &ConfigHandle {
        &self.config
    }

    /// The breaker registry, for administrative inspection.
    pub fn breakers(&self) -> &BreakerRegistry {
        &self.breakers
    }

    /// Stop background tasks. Idempotent.
    pub fn shutdown(&self) {
        self.compaction.shutdown();
        tracing::info!("Orchestrator shut down");
    }

    /// Current health view.
    pub fn health(&self) -> HealthReport {
        HealthReport {
            metrics: self.rolling.snapshot(),
            providers: self
                .reliability
                .known_providers()
                .iter()
                .map(|p| self.reliability.stats(p))
                .collect(),
            breakers: self.breakers.snapshots(),
        }
    }

    /// Handle one request through all ten stages.
    ///
    /// `Err` is returned only for admission failures (validation or tier
    /// rate limiting) — those map to 4xx and make zero provider calls.
    /// Everything after admission degrades instead of failing: the worst
    /// case is an `Error`-status outcome carrying the canned apology.
    #[tracing::instrument(skip(self, request), fields(correlation_id, tier))]
    pub async fn handle(
        &self,
        request: EnsembleRequest,
    ) -> std::result::Result<EnsembleOutcome, ErrorEnvelope> {
        let started = Instant::now();
        let config = self.config.load();
        let correlation_id = request
            .correlation_id
            .clone()
            .unwrap_or_else(|| self.next_correlation_id());
        tracing::Span::current().record("correlation_id", correlation_id.as_str());

        // Stage 1: analyze and admit.
        let tier = self.resolve_tier(&request).await;
        tracing::Span::current().record("tier", tier.to_string().as_str());
        if let Err(e) = admit(&request, tier, &config) {
            self.rolling.record_rejected_admission();
            metrics::counter!("ensemble_request.total", "status" => "rejected").increment(1);
            return Err(ErrorEnvelope::new(&e, correlation_id));
        }
        if let Err(e) = self
            .quotas
            .admit(&request.user_id, config.tiers.limits(tier))
        {
            self.rolling.record_rejected_admission();
            metrics::counter!("ensemble_request.total", "status" => "rejected").increment(1);
            return Err(ErrorEnvelope::new(&e, correlation_id));
        }
        let _permit = match self.admission[&tier].clone().try_acquire_owned() {
            Ok(permit) => permit,
            Err(_) => {
                self.rolling.record_rejected_admission();
                metrics::counter!("ensemble_request.total", "status" => "rejected").increment(1);
                return Err(ErrorEnvelope::new(
                    &OrchestratorError::RateLimited,
                    correlation_id,
                ));
            }
        };

        let ctx = RequestContext {
            correlation_id,
            tier,
            class: PromptClass::classify(&request.prompt),
            complexity: Complexity::assess(&request.prompt),
            started,
        };

        // Stage 2: select models.
        let selected = self.router.select(ctx.class, ctx.tier);
        if selected.is_empty() {
            tracing::warn!("No models available for selection");
            let outcome = self.handle_failure(&request, &ctx, &config, Vec::new()).await;
            return Ok(outcome);
        }

        // Stage 3: retrieve memory context (best-effort).
        let context = self.retrieve_context(&request, &config, ctx.tier).await;

        // Stage 4: dispatch in parallel.
        let limits = config.tiers.limits(ctx.tier);
        let overall_deadline = started + Duration::from_millis(config.ensemble.timeout_ms);
        let mut messages = Vec::new();
        if let Some(context) = context {
            messages.push(ChatMessage::system(format!(
                "Relevant context from this conversation so far:\n{}",
                context
            )));
        }
        messages.push(ChatMessage::user(request.prompt.clone()));
        let mut roles = self
            .dispatcher
            .dispatch(
                &messages,
                &selected,
                ctx.tier,
                DispatchOptions {
                    per_model_timeout: Duration::from_millis(limits.timeout_ms),
                    overall_deadline,
                    retry: config.retry_policy(),
                    max_tokens_per_role: limits.max_tokens_per_role,
                    max_characters_per_role: limits.max_characters_per_role,
                },
            )
            .await;

        if roles.iter().all(|r| !r.is_fulfilled()) {
            tracing::warn!("Every dispatched model failed");
            let outcome = self.handle_failure(&request, &ctx, &config, roles).await;
            return Ok(outcome);
        }

        // Stage 5: score quality and confidence, in input order.
        for role in roles.iter_mut() {
            if role.is_fulfilled() {
                role.quality = quality::score(&request.prompt, &role.content);
                role.confidence = self
                    .calibrator
                    .score(&role.model_id, &role.content, role.response_time_ms)
                    .await;
            }
        }

        // Stage 6: vote.
        let voting = self
            .voting
            .vote(&request.prompt, ctx.class, &roles, &config.voting, &config.meta_voter)
            .await;

        // Stage 7: synthesize.
        let synthesis = self
            .synthesis
            .synthesize(
                &request.prompt,
                ctx.class,
                ctx.complexity,
                &roles,
                &voting,
                &config.synthesis,
                limits,
                config.retry_policy(),
            )
            .await;

        // Stage 8: validate the final answer; failures downgrade, never
        // discard.
        let validation = validate_final(&request.prompt, &synthesis.content, synthesis.quality_score, limits.quality_target);

        // Stage 9: persist and feed reliability/calibration back.
        self.persist(&request, &ctx, &synthesis.content, synthesis.quality_score)
            .await;
        voting.record_outcomes(&self.reliability);
        for role in roles.iter().filter(|r| r.is_fulfilled()) {
            let won = voting.winner.as_deref() == Some(role.model_id.as_str());
            self.calibrator
                .record_sample(&role.model_id, role.confidence.raw, won);
        }

        // Stage 10: finalize.
        let outcome = self.finalize(
            &request,
            &ctx,
            OutcomeStatus::Success,
            &selected,
            roles,
            voting,
            synthesis,
            validation,
        );
        let elapsed = ctx.started.elapsed();
        self.rolling.record_request(
            true,
            elapsed.as_millis() as u64,
            false,
            outcome.metadata.tie_breaking,
        );
        metrics::histogram!("ensemble_request.duration_seconds")
            .record(elapsed.as_secs_f64());
        metrics::counter!("ensemble_request.total", "status" => "success").increment(1);
        Ok(outcome)
    }

    fn next_correlation_id(&self) -> String {
        let counter = self.correlation_counter.fetch_add(1, Ordering::Relaxed);
        format!("req-{:x}-{:04x}", now_millis(), counter & 0xffff)
    }

    async fn resolve_tier(&self, request: &EnsembleRequest) -> Tier {
        if let Some(claim) = &request.tier {
            return Tier::parse(claim);
        }
        if let Some(auth) = &self.auth {
            match auth.tier_for(&request.user_id).await {
                Ok(tier) => return tier,
                Err(e) => {
                    tracing::warn!(error = %e, "Tier lookup failed, defaulting to free");
                }
            }
        }
        Tier::Free
    }

    async fn retrieve_context(
        &self,
        request: &EnsembleRequest,
        config: &EnsembleConfig,
        tier: Tier,
    ) -> Option<String> {
        let memory = self.memory.as_ref()?;
        let session_id = request.session_id.as_ref()?;
        let limits = config.tiers.limits(tier);
        match memory
            .get_context(session_id, limits.max_tokens_per_role)
            .await
        {
            Ok(context) => context.filter(|c| !c.is_empty()),
            Err(e) => {
                tracing::warn!(error = %e, "Memory context retrieval failed");
                None
            }
        }
    }

    async fn persist(
        &self,
        request: &EnsembleRequest,
        ctx: &RequestContext,
        content: &str,
        quality: f64,
    ) {
        let (Some(memory), Some(session_id)) = (&self.memory, &request.session_id) else {
            return;
        };
        let turn = StoredTurn {
            session_id: session_id.clone(),
            user_message: request.prompt.clone(),
            assistant_message: content.to_string(),
            correlation_id: ctx.correlation_id.clone(),
            quality,
        };
        if let Err(e) = memory.store(turn).await {
            tracing::warn!(error = %e, "Session persistence failed");
        }
    }

    /// The single-model failure path: one call to the configured stable
    /// model with minimal parameters. Its own failure produces the
    /// `Error`-status outcome.
    async fn handle_failure(
        &self,
        request: &EnsembleRequest,
        ctx: &RequestContext,
        config: &EnsembleConfig,
        roles: Vec<RoleResponse>,
    ) -> EnsembleOutcome {
        metrics::counter!("ensemble_request.total", "status" => "fallback").increment(1);
        let stable = &config.fallback.stable_model;
        let messages = [ChatMessage::user(request.prompt.clone())];
        let params = CallParams {
            max_tokens: 300,
            temperature: 0.3,
        };

        let fallback_reply = match self.registry.get(stable) {
            Ok(registered) => {
                let breaker = self.breakers.breaker_for(stable);
                let client = Arc::clone(&registered.client);
                let model_name = registered.config.model.clone();
                guarded_call(
                    &breaker,
                    crate::config::RetryPolicy {
                        max_attempts: 1,
                        base_delay_ms: 0,
                    },
                    Duration::from_millis(registered.config.timeout_ms),
                    &registered.config.provider,
                    || client.call(&model_name, &messages, &params),
                )
                .await
                .map(|reply| reply.content)
            }
            Err(e) => Err(e),
        };

        let (status, content, quality_score) = match fallback_reply {
            Ok(content) => {
                let score = quality::score(&request.prompt, &content).composite;
                (OutcomeStatus::Degraded, content, score)
            }
            Err(e) => {
                tracing::error!(error = %e, "Single-model fallback failed");
                (
                    OutcomeStatus::Error,
                    "I was unable to produce an answer to this request. Please try again in a moment."
                        .to_string(),
                    0.1,
                )
            }
        };

        let synthesis = crate::synthesis::SynthesisResult {
            content,
            model_id: stable.clone(),
            strategy_name: "single-model-fallback",
            stage: SynthesisStage::Fallback,
            quality_score,
            processing_time_ms: ctx.started.elapsed().as_millis() as u64,
            source_count: 0,
        };
        let validation = ValidationSummary {
            passed: false,
            issues: vec!["ensemble pipeline degraded to fallback".to_string()],
        };

        let selected: Vec<String> = roles.iter().map(|r| r.model_id.clone()).collect();
        let success = status != OutcomeStatus::Error;
        let outcome = self.finalize(
            request,
            ctx,
            status,
            &selected,
            roles,
            VotingResult::empty(),
            synthesis,
            validation,
        );
        self.rolling.record_request(
            success,
            ctx.started.elapsed().as_millis() as u64,
            true,
            false,
        );
        outcome
    }

    #[allow(clippy::too_many_arguments)]
    fn finalize(
        &self,
        request: &EnsembleRequest,
        ctx: &RequestContext,
        status: OutcomeStatus,
        selected: &[String],
        roles: Vec<RoleResponse>,
        voting: VotingResult,
        synthesis: crate::synthesis::SynthesisResult,
        validation: ValidationSummary,
    ) -> EnsembleOutcome {
        let mut level = crate::calibration::ConfidenceLevel::from_score(synthesis.quality_score);
        if !validation.passed && status == OutcomeStatus::Success {
            level = level.downgraded();
        }

        let factors = vec![
            format!("consensus: {}", voting.consensus),
            format!("sources: {}", synthesis.source_count),
            format!("stage: {}", synthesis.stage),
        ];

        let role_envelopes: Vec<RoleEnvelope> = roles
            .iter()
            .map(|r| RoleEnvelope {
                role: r.model_id.clone(),
                status: r.status.to_string(),
                content: r.content.clone(),
                confidence: r.confidence.calibrated,
                response_time_ms: r.response_time_ms,
                quality: QualityEnvelope {
                    composite: r.quality.composite,
                    length: r.quality.length_component,
                    structure: r.quality.structure_component,
                    relevance: r.quality.relevance_component,
                    specificity: r.quality.specificity_component,
                },
                error: r.error.clone(),
            })
            .collect();

        let analysis = if request.explain {
            serde_json::json!(
                voting
                    .response_scores
                    .iter()
                    .map(|s| {
                        serde_json::json!({
                            "model": s.model_id,
                            "fulfilled": s.fulfilled,
                            "base_score": s.base,
                            "weight": s.weight,
                            "factors": {
                                "confidence": s.factors.confidence,
                                "quality": s.factors.quality,
                                "historical": s.factors.historical,
                                "semantic": s.factors.semantic,
                                "consensus": s.factors.consensus,
                                "diversity": s.factors.diversity,
                            },
                        })
                    })
                    .collect::<Vec<_>>()
            )
        } else {
            serde_json::Value::Null
        };

        EnsembleOutcome {
            status,
            synthesis: SynthesisEnvelope {
                content: synthesis.content,
                confidence: ConfidenceEnvelope {
                    score: synthesis.quality_score,
                    level: level.to_string(),
                    factors,
                },
                status: match status {
                    OutcomeStatus::Error => "error".to_string(),
                    _ => "success".to_string(),
                },
                optimized: synthesis.stage == SynthesisStage::Improved,
            },
            roles: role_envelopes,
            voting: VotingEnvelope {
                winner: voting.winner.clone(),
                confidence: voting.confidence,
                consensus: voting.consensus.to_string(),
                weights: voting.weights.clone(),
                analysis,
            },
            metadata: OutcomeMetadata {
                total_processing_time_ms: ctx.started.elapsed().as_millis() as u64,
                selected_models: selected.to_vec(),
                strategy: synthesis.strategy_name.to_string(),
                response_quality: synthesis.quality_score,
                correlation_id: ctx.correlation_id.clone(),
                timestamp_ms: now_millis(),
                prompt_class: ctx.class.to_string(),
                complexity: ctx.complexity.to_string(),
                tier: ctx.tier.to_string(),
                tie_breaking: voting.tie_breaking,
                validation,
            },
        }
    }
}

/// Stage-1 admission checks: required fields and prompt length against the
/// tier and global ceilings.
fn admit(request: &EnsembleRequest, tier: Tier, config: &EnsembleConfig) -> Result<()> {
    if request.prompt.trim().is_empty() {
        return Err(OrchestratorError::Validation(
            "Prompt cannot be empty".to_string(),
        ));
    }
    if request.user_id.trim().is_empty() {
        return Err(OrchestratorError::Validation(
            "user_id is required".to_string(),
        ));
    }
    let limit = config
        .tiers
        .limits(tier)
        .max_prompt_length
        .min(config.ensemble.max_prompt_length);
    let length = request.prompt.chars().count();
    if length > limit {
        return Err(OrchestratorError::Validation(format!(
            "Prompt length {} exceeds the {} limit of {}",
            length, tier, limit
        )));
    }
    Ok(())
}

/// Stage-8 checks: relevance ratio, minimum length, tier quality target.
fn validate_final(
    prompt: &str,
    content: &str,
    quality_score: f64,
    quality_target: f64,
) -> ValidationSummary {
    const MIN_FINAL_LENGTH: usize = 50;
    let mut issues = Vec::new();

    if quality::relevance_ratio(prompt, content) < 0.2 {
        issues.push("final answer drifts from the prompt".to_string());
    }
    if content.chars().count() < MIN_FINAL_LENGTH {
        issues.push("final answer is shorter than the minimum".to_string());
    }
    if quality_score < quality_target {
        issues.push(format!(
            "final quality {:.2} is below the tier target {:.2}",
            quality_score, quality_target
        ));
    }

    ValidationSummary {
        passed: issues.is_empty(),
        issues,
    }
}

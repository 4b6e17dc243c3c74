//! Parallel model dispatch: concurrency-bounded fan-out of one request to
//! the selected models, per-call deadlines, the single alternate-family
//! fallback, and reliability event recording.
//!
//! Provider-call errors stop here: every outcome — success or failure —
//! becomes a [`RoleResponse`], and the orchestrator decides what a fully
//! rejected ensemble means.

use crate::breaker::{BreakerRegistry, guarded_call};
use crate::calibration::ConfidenceScore;
use crate::config::{EnsembleConfig, RetryPolicy, Tier};
use crate::error::OrchestratorError;
use crate::provider::{CallParams, ChatMessage, ProviderRegistry, TokenUsage};
use crate::quality::QualityScore;
use crate::reliability::ReliabilityTracker;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

/// Whether a role's provider call produced usable content.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoleStatus {
    Fulfilled,
    Rejected,
}

impl std::fmt::Display for RoleStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Fulfilled => write!(f, "fulfilled"),
            Self::Rejected => write!(f, "rejected"),
        }
    }
}

/// One model's contribution to the ensemble.
///
/// Created by the dispatcher with empty scores; the orchestrator attaches
/// `quality` and `confidence` in stage 5 and the value is never mutated
/// afterwards.
#[derive(Debug, Clone)]
pub struct RoleResponse {
    /// The role label: the model ID originally selected for this slot. It
    /// is preserved even when the alternate-family fallback served the
    /// content, so downstream voting stays keyed consistently.
    pub model_id: String,
    pub status: RoleStatus,
    pub content: String,
    pub usage: TokenUsage,
    pub response_time_ms: u64,
    /// Error category when rejected.
    pub error: Option<String>,
    pub quality: QualityScore,
    pub confidence: ConfidenceScore,
}

impl RoleResponse {
    pub fn is_fulfilled(&self) -> bool {
        self.status == RoleStatus::Fulfilled
    }

    fn rejected(model_id: &str, error: &OrchestratorError, response_time_ms: u64) -> Self {
        Self {
            model_id: model_id.to_string(),
            status: RoleStatus::Rejected,
            content: String::new(),
            usage: TokenUsage::default(),
            response_time_ms,
            error: Some(error.kind().to_string()),
            quality: QualityScore::default(),
            confidence: ConfidenceScore::default(),
        }
    }
}

/// Per-dispatch knobs derived from the config snapshot and tier limits.
#[derive(Debug, Clone, Copy)]
pub struct DispatchOptions {
    pub per_model_timeout: Duration,
    pub overall_deadline: Instant,
    pub retry: RetryPolicy,
    /// Token ceiling applied on top of each model's own `max_tokens`.
    pub max_tokens_per_role: u32,
    /// Role content longer than this is truncated at a character boundary.
    pub max_characters_per_role: usize,
}

/// Concurrency-bounded fan-out over the provider clients.
pub struct Dispatcher {
    registry: Arc<ProviderRegistry>,
    breakers: Arc<BreakerRegistry>,
    reliability: Arc<ReliabilityTracker>,
    /// Provider-family substitutions tried once per failed role.
    alternates: Arc<HashMap<String, String>>,
    /// Per-tier cap on concurrent model calls across all requests.
    slots: HashMap<Tier, Arc<Semaphore>>,
}

impl Dispatcher {
    pub fn new(
        registry: Arc<ProviderRegistry>,
        breakers: Arc<BreakerRegistry>,
        reliability: Arc<ReliabilityTracker>,
        config: &EnsembleConfig,
    ) -> Self {
        let mut slots = HashMap::new();
        for tier in [Tier::Free, Tier::Premium] {
            slots.insert(
                tier,
                Arc::new(Semaphore::new(config.ensemble.max_concurrent_per_tier)),
            );
        }
        Self {
            registry,
            breakers,
            reliability,
            alternates: Arc::new(config.fallback.alternate_families.clone()),
            slots,
        }
    }

    /// Fan `messages` out to `models`, returning one [`RoleResponse`] per
    /// selected model **in input order** regardless of completion order.
    ///
    /// Dropping the returned future aborts all in-flight calls (the task
    /// set cancels on drop).
    pub async fn dispatch(
        &self,
        messages: &[ChatMessage],
        models: &[String],
        tier: Tier,
        opts: DispatchOptions,
    ) -> Vec<RoleResponse> {
        let mut join_set = JoinSet::new();
        let messages: Arc<Vec<ChatMessage>> = Arc::new(messages.to_vec());

        for (index, model_id) in models.iter().enumerate() {
            let registry = Arc::clone(&self.registry);
            let breakers = Arc::clone(&self.breakers);
            let reliability = Arc::clone(&self.reliability);
            let alternates = Arc::clone(&self.alternates);
            let slot = Arc::clone(&self.slots[&tier]);
            let messages = Arc::clone(&messages);
            let model_id = model_id.clone();
            let excluded: Vec<String> = models.to_vec();

            join_set.spawn(async move {
                let response = run_role(
                    &registry,
                    &breakers,
                    &reliability,
                    &alternates,
                    slot,
                    &messages,
                    &model_id,
                    &excluded,
                    opts,
                )
                .await;
                (index, response)
            });
        }

        let mut ordered: Vec<Option<RoleResponse>> = vec![None; models.len()];
        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok((index, response)) => ordered[index] = Some(response),
                Err(e) => tracing::error!(error = %e, "Dispatch task panicked"),
            }
        }

        ordered
            .into_iter()
            .enumerate()
            .map(|(i, slot)| {
                slot.unwrap_or_else(|| {
                    RoleResponse::rejected(
                        &models[i],
                        &OrchestratorError::Internal("dispatch task lost".into()),
                        0,
                    )
                })
            })
            .collect()
    }
}

/// Execute one role slot: primary call, then at most one alternate-family
/// attempt. Records a reliability event for every call made.
#[allow(clippy::too_many_arguments)]
async fn run_role(
    registry: &ProviderRegistry,
    breakers: &BreakerRegistry,
    reliability: &ReliabilityTracker,
    alternates: &HashMap<String, String>,
    slot: Arc<Semaphore>,
    messages: &[ChatMessage],
    model_id: &str,
    excluded: &[String],
    opts: DispatchOptions,
) -> RoleResponse {
    let _permit = match slot.acquire_owned().await {
        Ok(permit) => permit,
        Err(_) => {
            return RoleResponse::rejected(
                model_id,
                &OrchestratorError::Internal("admission semaphore closed".into()),
                0,
            );
        }
    };

    let start = Instant::now();
    let primary = call_model(registry, breakers, reliability, messages, model_id, opts).await;
    let provider = registry
        .get(model_id)
        .map(|m| m.config.provider.clone())
        .unwrap_or_default();

    match primary {
        Ok(response) => response,
        Err(primary_err) => {
            let elapsed = start.elapsed().as_millis() as u64;
            // One alternate-family attempt, keeping this slot's role label.
            if let Some(alternate) =
                pick_alternate(registry, breakers, alternates, &provider, excluded)
            {
                tracing::info!(
                    role = %model_id,
                    alternate = %alternate,
                    error = %primary_err,
                    "Primary role failed, trying alternate family"
                );
                let single_shot = DispatchOptions {
                    retry: RetryPolicy {
                        max_attempts: 1,
                        ..opts.retry
                    },
                    ..opts
                };
                match call_model(
                    registry,
                    breakers,
                    reliability,
                    messages,
                    &alternate,
                    single_shot,
                )
                .await
                {
                    Ok(mut response) => {
                        response.model_id = model_id.to_string();
                        response.response_time_ms = start.elapsed().as_millis() as u64;
                        return response;
                    }
                    Err(alternate_err) => {
                        tracing::warn!(
                            role = %model_id,
                            alternate = %alternate,
                            error = %alternate_err,
                            "Alternate family also failed"
                        );
                    }
                }
            }
            RoleResponse::rejected(model_id, &primary_err, elapsed)
        }
    }
}

/// One guarded provider call for `model_id`, mapped into a fulfilled
/// [`RoleResponse`] on success. The deadline for the call is
/// `min(per_model_timeout, overall_deadline − now)`.
async fn call_model(
    registry: &ProviderRegistry,
    breakers: &BreakerRegistry,
    reliability: &ReliabilityTracker,
    messages: &[ChatMessage],
    model_id: &str,
    opts: DispatchOptions,
) -> Result<RoleResponse, OrchestratorError> {
    let registered = registry.get(model_id)?;
    let config = &registered.config;

    let remaining = opts
        .overall_deadline
        .checked_duration_since(Instant::now())
        .unwrap_or(Duration::ZERO);
    if remaining.is_zero() {
        return Err(OrchestratorError::Timeout);
    }
    let timeout = opts
        .per_model_timeout
        .min(Duration::from_millis(config.timeout_ms))
        .min(remaining);

    let params = CallParams {
        max_tokens: config.max_tokens.min(opts.max_tokens_per_role),
        temperature: config.temperature,
    };

    let breaker = breakers.breaker_for(model_id);
    let client = Arc::clone(&registered.client);
    let model_name = config.model.clone();
    let start = Instant::now();

    let result = guarded_call(&breaker, opts.retry, timeout, &config.provider, || {
        client.call(&model_name, messages, &params)
    })
    .await;

    let latency_ms = start.elapsed().as_millis() as u64;
    match result {
        Ok(reply) => {
            reliability.record_event(
                &config.provider,
                true,
                reply.latency_ms,
                model_id,
                reply.usage.input_tokens,
                reply.usage.output_tokens,
                config.output_cost_per_1k,
            );
            let mut content = reply.content;
            if content.chars().count() > opts.max_characters_per_role {
                content = content.chars().take(opts.max_characters_per_role).collect();
                tracing::debug!(model = %model_id, "Role content truncated to tier limit");
            }
            Ok(RoleResponse {
                model_id: model_id.to_string(),
                status: RoleStatus::Fulfilled,
                content,
                usage: reply.usage,
                response_time_ms: reply.latency_ms,
                error: None,
                quality: QualityScore::default(),
                confidence: ConfidenceScore::default(),
            })
        }
        Err(e) => {
            reliability.record_event(
                &config.provider,
                false,
                latency_ms,
                model_id,
                0,
                0,
                config.output_cost_per_1k,
            );
            Err(e)
        }
    }
}

/// Find a substitute model from the configured alternate family: any
/// registry model of that family that is not already part of this request
/// and whose breaker is closed.
fn pick_alternate(
    registry: &ProviderRegistry,
    breakers: &BreakerRegistry,
    alternates: &HashMap<String, String>,
    provider: &str,
    excluded: &[String],
) -> Option<String> {
    let alternate_family = alternates.get(provider)?;
    registry
        .models_for_provider(alternate_family)
        .into_iter()
        .map(|m| m.config.model_id.clone())
        .find(|id| !excluded.contains(id) && !breakers.is_open(id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BreakerOptions;
    use crate::error::Result;
    use crate::mock::{MockChatClient, MockFailure, mock_model};
    use crate::provider::{ProviderClient, ProviderReply};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct Fixture {
        dispatcher: Dispatcher,
        reliability: Arc<ReliabilityTracker>,
        breakers: Arc<BreakerRegistry>,
    }

    fn fixture(clients: Vec<(&'static str, &str, Arc<MockChatClient>)>) -> Fixture {
        let mut registry = ProviderRegistry::default();
        for (provider, model_id, client) in clients {
            registry
                .insert(mock_model(model_id, provider), client as Arc<dyn ProviderClient>)
                .unwrap();
        }
        let registry = Arc::new(registry);
        let breakers = Arc::new(BreakerRegistry::new(BreakerOptions::default()));
        let reliability = Arc::new(ReliabilityTracker::new());
        let config = EnsembleConfig::default();
        let dispatcher = Dispatcher::new(
            Arc::clone(&registry),
            Arc::clone(&breakers),
            Arc::clone(&reliability),
            &config,
        );
        Fixture {
            dispatcher,
            reliability,
            breakers,
        }
    }

    fn opts() -> DispatchOptions {
        DispatchOptions {
            per_model_timeout: Duration::from_millis(500),
            overall_deadline: Instant::now() + Duration::from_secs(5),
            retry: RetryPolicy {
                max_attempts: 1,
                base_delay_ms: 1,
            },
            max_tokens_per_role: 400,
            max_characters_per_role: 4_000,
        }
    }

    fn prompt() -> Vec<ChatMessage> {
        vec![ChatMessage::user("Explain ensembles")]
    }

    #[tokio::test]
    async fn responses_come_back_in_input_order() {
        let f = fixture(vec![
            (
                "openai",
                "slow",
                Arc::new(MockChatClient::new("openai", "slow answer").with_delay(150)),
            ),
            (
                "anthropic",
                "fast",
                Arc::new(MockChatClient::new("anthropic", "fast answer")),
            ),
        ]);
        let models = vec!["slow".to_string(), "fast".to_string()];
        let roles = f.dispatcher.dispatch(&prompt(), &models, Tier::Free, opts()).await;

        assert_eq!(roles.len(), 2);
        assert_eq!(roles[0].model_id, "slow");
        assert_eq!(roles[0].content, "slow answer");
        assert_eq!(roles[1].model_id, "fast");
        assert_eq!(roles[1].content, "fast answer");
    }

    #[tokio::test]
    async fn timed_out_model_is_rejected_others_survive() {
        let f = fixture(vec![
            (
                "openai",
                "ok-a",
                Arc::new(MockChatClient::new("openai", "answer a")),
            ),
            (
                "anthropic",
                "sleeper",
                Arc::new(MockChatClient::new("anthropic", "late").with_delay(2_000)),
            ),
            (
                "openai",
                "ok-b",
                Arc::new(MockChatClient::new("openai", "answer b")),
            ),
        ]);
        let models = vec!["ok-a".to_string(), "sleeper".to_string(), "ok-b".to_string()];
        let roles = f.dispatcher.dispatch(&prompt(), &models, Tier::Free, opts()).await;

        assert!(roles[0].is_fulfilled());
        assert_eq!(roles[1].status, RoleStatus::Rejected);
        assert_eq!(roles[1].error.as_deref(), Some("timeout"));
        assert!(roles[2].is_fulfilled());

        // The slow model's breaker saw one failure.
        let snap = f.breakers.breaker_for("sleeper").snapshot();
        assert_eq!(snap.failure_count, 1);
    }

    #[tokio::test]
    async fn alternate_family_serves_failed_role_under_original_label() {
        let f = fixture(vec![
            (
                "gemini",
                "gemini-2.0-flash",
                Arc::new(
                    MockChatClient::new("gemini", "unused").failing_with(MockFailure::Transport),
                ),
            ),
            (
                "xai",
                "grok-3-mini",
                Arc::new(MockChatClient::new("xai", "grok answer")),
            ),
        ]);
        let models = vec!["gemini-2.0-flash".to_string()];
        let roles = f.dispatcher.dispatch(&prompt(), &models, Tier::Free, opts()).await;

        assert_eq!(roles.len(), 1);
        assert!(roles[0].is_fulfilled());
        // Role label preserved for voting consistency.
        assert_eq!(roles[0].model_id, "gemini-2.0-flash");
        assert_eq!(roles[0].content, "grok answer");

        // Both the failed primary and the successful alternate were recorded.
        assert_eq!(f.reliability.stats("gemini").events, 1);
        assert_eq!(f.reliability.stats("xai").events, 1);
        assert!(f.reliability.uptime_24h("gemini") < 1.0);
    }

    #[tokio::test]
    async fn alternate_is_not_tried_twice() {
        let failing_alternate =
            Arc::new(MockChatClient::new("xai", "unused").failing_with(MockFailure::Transport));
        let f = fixture(vec![
            (
                "gemini",
                "gemini-2.0-flash",
                Arc::new(
                    MockChatClient::new("gemini", "unused").failing_with(MockFailure::Transport),
                ),
            ),
            ("xai", "grok-3-mini", failing_alternate.clone()),
        ]);
        let models = vec!["gemini-2.0-flash".to_string()];
        let roles = f.dispatcher.dispatch(&prompt(), &models, Tier::Free, opts()).await;

        assert_eq!(roles[0].status, RoleStatus::Rejected);
        assert_eq!(failing_alternate.call_count(), 1);
    }

    #[tokio::test]
    async fn all_failures_return_all_rejected() {
        let f = fixture(vec![
            (
                "openai",
                "a",
                Arc::new(MockChatClient::new("openai", "x").failing_with(MockFailure::Transport)),
            ),
            (
                "anthropic",
                "b",
                Arc::new(
                    MockChatClient::new("anthropic", "y").failing_with(MockFailure::Transport),
                ),
            ),
        ]);
        let models = vec!["a".to_string(), "b".to_string()];
        let roles = f.dispatcher.dispatch(&prompt(), &models, Tier::Free, opts()).await;

        assert_eq!(roles.len(), 2);
        assert!(roles.iter().all(|r| r.status == RoleStatus::Rejected));
        assert!(roles.iter().all(|r| r.error.as_deref() == Some("transport")));
    }

    #[tokio::test]
    async fn open_breaker_rejects_without_calling_client() {
        let client = Arc::new(MockChatClient::new("openai", "never"));
        let f = fixture(vec![("openai", "guarded", client.clone())]);
        f.breakers.breaker_for("guarded").trip();

        let models = vec!["guarded".to_string()];
        let roles = f.dispatcher.dispatch(&prompt(), &models, Tier::Free, opts()).await;

        assert_eq!(roles[0].status, RoleStatus::Rejected);
        assert_eq!(roles[0].error.as_deref(), Some("circuit_open"));
        assert_eq!(client.call_count(), 0);
    }

    /// Client that records the peak number of concurrent calls.
    struct ConcurrencyProbe {
        current: AtomicU32,
        peak: AtomicU32,
    }

    #[async_trait]
    impl ProviderClient for ConcurrencyProbe {
        fn provider_id(&self) -> &'static str {
            "openai"
        }

        async fn call(
            &self,
            _model: &str,
            _messages: &[ChatMessage],
            _params: &CallParams,
        ) -> Result<ProviderReply> {
            let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(50)).await;
            self.current.fetch_sub(1, Ordering::SeqCst);
            Ok(ProviderReply {
                content: "ok".into(),
                usage: TokenUsage::default(),
                latency_ms: 50,
            })
        }
    }

    #[tokio::test]
    async fn concurrency_is_bounded_by_tier_slots() {
        let probe = Arc::new(ConcurrencyProbe {
            current: AtomicU32::new(0),
            peak: AtomicU32::new(0),
        });
        let mut registry = ProviderRegistry::default();
        for id in ["m1", "m2", "m3", "m4"] {
            registry
                .insert(mock_model(id, "openai"), probe.clone() as Arc<dyn ProviderClient>)
                .unwrap();
        }
        let mut config = EnsembleConfig::default();
        config.ensemble.max_concurrent_per_tier = 2;
        let dispatcher = Dispatcher::new(
            Arc::new(registry),
            Arc::new(BreakerRegistry::new(BreakerOptions::default())),
            Arc::new(ReliabilityTracker::new()),
            &config,
        );

        let models: Vec<String> = ["m1", "m2", "m3", "m4"].iter().map(|s| s.to_string()).collect();
        let roles = dispatcher.dispatch(&prompt(), &models, Tier::Free, opts()).await;

        assert!(roles.iter().all(|r| r.is_fulfilled()));
        assert!(probe.peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn oversized_role_content_is_truncated_to_tier_limit() {
        let long_reply = "word ".repeat(2_000);
        let f = fixture(vec![(
            "openai",
            "verbose",
            Arc::new(MockChatClient::new("openai", long_reply)),
        )]);
        let capped = DispatchOptions {
            max_characters_per_role: 100,
            ..opts()
        };
        let models = vec!["verbose".to_string()];
        let roles = f.dispatcher.dispatch(&prompt(), &models, Tier::Free, capped).await;

        assert!(roles[0].is_fulfilled());
        assert_eq!(roles[0].content.chars().count(), 100);
    }

    #[tokio::test]
    async fn exhausted_overall_deadline_rejects_immediately() {
        let client = Arc::new(MockChatClient::new("openai", "never"));
        let f = fixture(vec![("openai", "late", client.clone())]);

        let expired = DispatchOptions {
            overall_deadline: Instant::now(),
            ..opts()
        };
        let models = vec!["late".to_string()];
        let roles = f.dispatcher.dispatch(&prompt(), &models, Tier::Free, expired).await;

        assert_eq!(roles[0].status, RoleStatus::Rejected);
        assert_eq!(roles[0].error.as_deref(), Some("timeout"));
        assert_eq!(client.call_count(), 0);
    }
}

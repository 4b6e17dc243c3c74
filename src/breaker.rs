//! Per-model circuit breaking and retry: the breaker state machine, the
//! registry that owns one breaker per model ID, and the guarded-call wrapper
//! that adds timeout enforcement, exponential-backoff retries, and metrics
//! emission around every provider call.

use crate::config::{BreakerOptions, RetryPolicy};
use crate::error::{OrchestratorError, Result};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Observable breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

impl std::fmt::Display for BreakerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed => write!(f, "closed"),
            Self::Open => write!(f, "open"),
            Self::HalfOpen => write!(f, "half_open"),
        }
    }
}

/// Point-in-time view of a breaker, exposed to the router and health
/// reporting.
#[derive(Debug, Clone, Copy)]
pub struct BreakerSnapshot {
    pub state: BreakerState,
    pub failure_count: u32,
    /// Remaining cooldown when the breaker is open.
    pub open_remaining: Option<Duration>,
}

struct Inner {
    state: BreakerState,
    failures: u32,
    last_failure: Option<Instant>,
    open_until: Option<Instant>,
    probe_in_flight: bool,
    config: BreakerOptions,
}

impl Inner {
    fn transition(&mut self, model_id: &str, to: BreakerState) {
        if self.state != to {
            tracing::debug!(model = %model_id, from = %self.state, to = %to, "Breaker transition");
            metrics::counter!(
                "circuit_breaker.transitions",
                "model" => model_id.to_string(),
                "to" => to.to_string()
            )
            .increment(1);
            self.state = to;
        }
    }
}

/// Thread-safe circuit breaker that tracks failures and short-circuits calls
/// when a model is unhealthy.
///
/// State transitions: **Closed** -> (threshold consecutive failures within
/// the failure window) -> **Open** -> (cooldown elapsed) -> **HalfOpen** ->
/// (probe succeeds) -> **Closed** (or probe fails -> back to **Open**).
/// In the half-open state only a single probe call is allowed.
#[derive(Clone)]
pub struct CircuitBreaker {
    model_id: Arc<str>,
    inner: Arc<Mutex<Inner>>,
}

impl CircuitBreaker {
    /// Create a closed breaker for `model_id`.
    pub fn new(model_id: impl Into<Arc<str>>, config: BreakerOptions) -> Self {
        Self {
            model_id: model_id.into(),
            inner: Arc::new(Mutex::new(Inner {
                state: BreakerState::Closed,
                failures: 0,
                last_failure: None,
                open_until: None,
                probe_in_flight: false,
                config,
            })),
        }
    }

    /// The model this breaker guards.
    pub fn model_id(&self) -> &str {
        &self.model_id
    }

    /// Execute `f` through the breaker.
    ///
    /// Returns [`OrchestratorError::CircuitOpen`] immediately while the
    /// breaker is open or while another caller holds the half-open probe.
    pub async fn call<F, Fut, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<T>>,
    {
        let is_probe;
        {
            let mut inner = self.inner.lock().expect("breaker lock poisoned");
            match inner.state {
                BreakerState::Open => {
                    let cooled = inner
                        .open_until
                        .map(|until| Instant::now() >= until)
                        .unwrap_or(true);
                    if cooled {
                        inner.transition(&self.model_id, BreakerState::HalfOpen);
                    } else {
                        return Err(OrchestratorError::CircuitOpen);
                    }
                }
                BreakerState::HalfOpen => {
                    if inner.probe_in_flight {
                        return Err(OrchestratorError::CircuitOpen);
                    }
                }
                BreakerState::Closed => {}
            }
            is_probe = inner.state == BreakerState::HalfOpen;
            if is_probe {
                inner.probe_in_flight = true;
            }
        }

        let result = f().await;

        let mut inner = self.inner.lock().expect("breaker lock poisoned");
        match result {
            Ok(val) => {
                if is_probe {
                    inner.probe_in_flight = false;
                    inner.transition(&self.model_id, BreakerState::Closed);
                }
                inner.failures = 0;
                inner.open_until = None;
                Ok(val)
            }
            Err(e) => {
                if is_probe {
                    inner.probe_in_flight = false;
                }
                let now = Instant::now();
                let window = Duration::from_secs(inner.config.failure_window_secs);
                // Failures outside the window restart the streak.
                let within_window = inner
                    .last_failure
                    .map(|last| now.duration_since(last) <= window)
                    .unwrap_or(false);
                inner.failures = if within_window { inner.failures + 1 } else { 1 };
                inner.last_failure = Some(now);

                if is_probe
                    || (inner.state == BreakerState::Closed
                        && inner.failures >= inner.config.failure_threshold)
                {
                    inner.open_until = Some(now + Duration::from_secs(inner.config.cooldown_secs));
                    inner.transition(&self.model_id, BreakerState::Open);
                }
                Err(e)
            }
        }
    }

    /// Force the breaker open for a full cooldown period.
    pub fn trip(&self) {
        let mut inner = self.inner.lock().expect("breaker lock poisoned");
        inner.failures = inner.config.failure_threshold;
        inner.last_failure = Some(Instant::now());
        inner.open_until = Some(Instant::now() + Duration::from_secs(inner.config.cooldown_secs));
        inner.transition(&self.model_id, BreakerState::Open);
    }

    /// Whether calls would currently be short-circuited.
    pub fn is_open(&self) -> bool {
        let inner = self.inner.lock().expect("breaker lock poisoned");
        match inner.state {
            BreakerState::Open => inner
                .open_until
                .map(|until| Instant::now() < until)
                .unwrap_or(false),
            _ => false,
        }
    }

    /// Point-in-time view for routing and health reporting.
    pub fn snapshot(&self) -> BreakerSnapshot {
        let inner = self.inner.lock().expect("breaker lock poisoned");
        let now = Instant::now();
        BreakerSnapshot {
            state: inner.state,
            failure_count: inner.failures,
            open_remaining: match inner.state {
                BreakerState::Open => inner
                    .open_until
                    .and_then(|until| until.checked_duration_since(now)),
                _ => None,
            },
        }
    }
}

/// Owns one breaker per model ID. Entries are created on first access and
/// live for the process lifetime; each breaker guards its own state with an
/// internal mutex, so transitions are atomic read-modify-write.
pub struct BreakerRegistry {
    config: BreakerOptions,
    breakers: Mutex<HashMap<String, CircuitBreaker>>,
}

impl BreakerRegistry {
    pub fn new(config: BreakerOptions) -> Self {
        Self {
            config,
            breakers: Mutex::new(HashMap::new()),
        }
    }

    /// The breaker for `model_id`, created closed if absent.
    pub fn breaker_for(&self, model_id: &str) -> CircuitBreaker {
        let mut breakers = self.breakers.lock().expect("breaker registry poisoned");
        breakers
            .entry(model_id.to_string())
            .or_insert_with(|| CircuitBreaker::new(model_id, self.config))
            .clone()
    }

    /// Whether the breaker for `model_id` is currently open. Unknown models
    /// report closed.
    pub fn is_open(&self, model_id: &str) -> bool {
        let breakers = self.breakers.lock().expect("breaker registry poisoned");
        breakers.get(model_id).map(|b| b.is_open()).unwrap_or(false)
    }

    /// Snapshot of every known breaker, sorted by model ID.
    pub fn snapshots(&self) -> Vec<(String, BreakerSnapshot)> {
        let breakers = self.breakers.lock().expect("breaker registry poisoned");
        let mut out: Vec<(String, BreakerSnapshot)> = breakers
            .iter()
            .map(|(id, b)| (id.clone(), b.snapshot()))
            .collect();
        out.sort_by(|a, b| a.0.cmp(&b.0));
        out
    }
}

/// Execute `f` through `breaker` with a per-attempt timeout and
/// exponential-backoff retries for transient errors.
///
/// `RateLimited` and `Timeout` are retried up to `retry.max_attempts`;
/// `CircuitOpen` and `InvalidResponse` fail immediately. Emits
/// `model_call.duration_seconds` and `model_call.total` labeled with the
/// model, provider, and outcome status.
pub async fn guarded_call<F, Fut, T>(
    breaker: &CircuitBreaker,
    retry: RetryPolicy,
    timeout: Duration,
    provider: &str,
    f: F,
) -> Result<T>
where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = Result<T>>,
{
    let model = breaker.model_id().to_string();
    let start = Instant::now();
    let mut attempts = 0;

    let res = loop {
        attempts += 1;
        let res = breaker
            .call(|| async {
                match tokio::time::timeout(timeout, f()).await {
                    Ok(r) => r,
                    Err(_) => Err(OrchestratorError::Timeout),
                }
            })
            .await;

        match res {
            Ok(val) => break Ok(val),
            // An open breaker is not a transient condition worth waiting out
            // inside a single request.
            Err(OrchestratorError::CircuitOpen) => break Err(OrchestratorError::CircuitOpen),
            Err(e) if e.is_retryable() && attempts < retry.max_attempts => {
                let backoff = retry.backoff(attempts);
                tracing::warn!(
                    model = %model,
                    attempt = attempts,
                    backoff_ms = backoff.as_millis(),
                    error = %e,
                    "Retrying provider call"
                );
                tokio::time::sleep(backoff).await;
                continue;
            }
            Err(e) => break Err(e),
        }
    };

    let status = match &res {
        Ok(_) => "success",
        Err(e) => e.kind(),
    };
    metrics::histogram!(
        "model_call.duration_seconds",
        "model" => model.clone(),
        "provider" => provider.to_string()
    )
    .record(start.elapsed().as_secs_f64());
    metrics::counter!(
        "model_call.total",
        "model" => model,
        "provider" => provider.to_string(),
        "status" => status.to_string()
    )
    .increment(1);

    res
}

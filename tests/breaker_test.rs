//! Breaker recovery and retry behavior through the public API.

use conclave::breaker::{BreakerRegistry, BreakerState, CircuitBreaker, guarded_call};
use conclave::config::{BreakerOptions, RetryPolicy};
use conclave::error::OrchestratorError;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

fn options(threshold: u32, cooldown_secs: u64) -> BreakerOptions {
    BreakerOptions {
        failure_threshold: threshold,
        failure_window_secs: 60,
        cooldown_secs,
    }
}

#[tokio::test]
async fn breaker_recovery_law() {
    // After cooldown and one successful half-open probe, the state is
    // closed and the failure counter is reset.
    let breaker = CircuitBreaker::new("m", options(2, 1));

    for _ in 0..2 {
        let _ = breaker
            .call(|| async { Err::<(), _>(OrchestratorError::Transport("down".into())) })
            .await;
    }
    let open = breaker.snapshot();
    assert_eq!(open.state, BreakerState::Open);
    assert_eq!(open.failure_count, 2);
    assert!(open.open_remaining.is_some());

    tokio::time::sleep(Duration::from_millis(1_100)).await;

    let probe = breaker.call(|| async { Ok::<_, OrchestratorError>(42) }).await;
    assert_eq!(probe.unwrap(), 42);

    let closed = breaker.snapshot();
    assert_eq!(closed.state, BreakerState::Closed);
    assert_eq!(closed.failure_count, 0);
    assert!(closed.open_remaining.is_none());
}

#[tokio::test]
async fn open_breaker_produces_circuit_open_without_executing() {
    let registry = BreakerRegistry::new(options(1, 30));
    let breaker = registry.breaker_for("m");
    breaker.trip();

    let executed = Arc::new(AtomicU32::new(0));
    let executed_in = executed.clone();
    let res: Result<(), _> = guarded_call(
        &breaker,
        RetryPolicy {
            max_attempts: 3,
            base_delay_ms: 1,
        },
        Duration::from_secs(1),
        "mock",
        move || {
            let executed = executed_in.clone();
            async move {
                executed.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        },
    )
    .await;

    assert!(matches!(res, Err(OrchestratorError::CircuitOpen)));
    assert_eq!(executed.load(Ordering::SeqCst), 0);
    assert!(registry.is_open("m"));
}

#[tokio::test]
async fn retry_recovers_from_transient_rate_limits() {
    let breaker = CircuitBreaker::new("m", options(10, 30));
    let attempts = Arc::new(AtomicU32::new(0));
    let attempts_in = attempts.clone();

    let res = guarded_call(
        &breaker,
        RetryPolicy {
            max_attempts: 3,
            base_delay_ms: 1,
        },
        Duration::from_secs(1),
        "mock",
        move || {
            let attempts = attempts_in.clone();
            async move {
                if attempts.fetch_add(1, Ordering::SeqCst) == 0 {
                    Err(OrchestratorError::RateLimited)
                } else {
                    Ok("recovered")
                }
            }
        },
    )
    .await;

    assert_eq!(res.unwrap(), "recovered");
    assert_eq!(attempts.load(Ordering::SeqCst), 2);
    // The breaker closed on success; the transient failure left no streak.
    assert_eq!(breaker.snapshot().failure_count, 0);
}

#[tokio::test]
async fn backoff_doubles_until_the_cap() {
    let policy = RetryPolicy {
        max_attempts: 6,
        base_delay_ms: 1_000,
    };
    assert_eq!(policy.backoff(1), Duration::from_secs(1));
    assert_eq!(policy.backoff(2), Duration::from_secs(2));
    assert_eq!(policy.backoff(3), Duration::from_secs(4));
    assert_eq!(policy.backoff(4), Duration::from_secs(5));
    assert_eq!(policy.backoff(5), Duration::from_secs(5));
}

//! Rolling in-process request metrics: atomic counters, a bounded latency
//! window with snapshot-on-read aggregates, and a success-rate trend.
//!
//! These complement the `metrics` facade counters emitted throughout the
//! pipeline; this module is what the health surface reads synchronously.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

/// Retained latency samples.
const LATENCY_WINDOW: usize = 1_024;

/// Retained request outcomes for trend computation.
const OUTCOME_WINDOW: usize = 200;

/// Direction of the recent success rate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trend {
    Improving,
    Stable,
    Degrading,
}

impl std::fmt::Display for Trend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Improving => write!(f, "improving"),
            Self::Stable => write!(f, "stable"),
            Self::Degrading => write!(f, "degrading"),
        }
    }
}

/// Aggregates captured at a point in time.
#[derive(Debug, Clone)]
pub struct MetricsSnapshot {
    pub requests: u64,
    pub successes: u64,
    pub failures: u64,
    pub fallbacks: u64,
    pub meta_votes: u64,
    pub rejected_admissions: u64,
    pub success_rate: f64,
    pub avg_latency_ms: f64,
    pub p95_latency_ms: u64,
    pub trend: Trend,
}

/// Process-wide rolling request metrics. Counters use atomic increments;
/// windowed data sits behind a mutex and is aggregated on read.
#[derive(Default)]
pub struct RollingMetrics {
    requests: AtomicU64,
    successes: AtomicU64,
    failures: AtomicU64,
    fallbacks: AtomicU64,
    meta_votes: AtomicU64,
    rejected_admissions: AtomicU64,
    latencies: Mutex<VecDeque<u64>>,
    outcomes: Mutex<VecDeque<bool>>,
}

impl RollingMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a completed request.
    pub fn record_request(
        &self,
        success: bool,
        latency_ms: u64,
        used_fallback: bool,
        tie_breaking: bool,
    ) {
        self.requests.fetch_add(1, Ordering::Relaxed);
        if success {
            self.successes.fetch_add(1, Ordering::Relaxed);
        } else {
            self.failures.fetch_add(1, Ordering::Relaxed);
        }
        if used_fallback {
            self.fallbacks.fetch_add(1, Ordering::Relaxed);
        }
        if tie_breaking {
            self.meta_votes.fetch_add(1, Ordering::Relaxed);
        }

        {
            let mut latencies = self.latencies.lock().expect("latency window poisoned");
            if latencies.len() == LATENCY_WINDOW {
                latencies.pop_front();
            }
            latencies.push_back(latency_ms);
        }
        {
            let mut outcomes = self.outcomes.lock().expect("outcome window poisoned");
            if outcomes.len() == OUTCOME_WINDOW {
                outcomes.pop_front();
            }
            outcomes.push_back(success);
        }
    }

    /// Record a request bounced at admission.
    pub fn record_rejected_admission(&self) {
        self.rejected_admissions.fetch_add(1, Ordering::Relaxed);
    }

    /// Aggregate the current state.
    pub fn snapshot(&self) -> MetricsSnapshot {
        let requests = self.requests.load(Ordering::Relaxed);
        let successes = self.successes.load(Ordering::Relaxed);

        let (avg_latency_ms, p95_latency_ms) = {
            let latencies = self.latencies.lock().expect("latency window poisoned");
            if latencies.is_empty() {
                (0.0, 0)
            } else {
                let sum: u64 = latencies.iter().sum();
                let mut sorted: Vec<u64> = latencies.iter().copied().collect();
                sorted.sort_unstable();
                let p95_index =
                    ((sorted.len() as f64 * 0.95).ceil() as usize).saturating_sub(1);
                (sum as f64 / latencies.len() as f64, sorted[p95_index])
            }
        };

        MetricsSnapshot {
            requests,
            successes,
            failures: self.failures.load(Ordering::Relaxed),
            fallbacks: self.fallbacks.load(Ordering::Relaxed),
            meta_votes: self.meta_votes.load(Ordering::Relaxed),
            rejected_admissions: self.rejected_admissions.load(Ordering::Relaxed),
            success_rate: if requests == 0 {
                1.0
            } else {
                successes as f64 / requests as f64
            },
            avg_latency_ms,
            p95_latency_ms,
            trend: self.trend(),
        }
    }

    /// Compare the success rate of the two halves of the outcome window.
    fn trend(&self) -> Trend {
        let outcomes = self.outcomes.lock().expect("outcome window poisoned");
        if outcomes.len() < 10 {
            return Trend::Stable;
        }
        let mid = outcomes.len() / 2;
        let rate = |slice: &[bool]| {
            slice.iter().filter(|b| **b).count() as f64 / slice.len() as f64
        };
        let (older, newer) = {
            let v: Vec<bool> = outcomes.iter().copied().collect();
            (rate(&v[..mid]), rate(&v[mid..]))
        };
        if newer > older + 0.05 {
            Trend::Improving
        } else if newer + 0.05 < older {
            Trend::Degrading
        } else {
            Trend::Stable
        }
    }
}

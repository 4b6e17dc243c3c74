//! Provider reliability tracking: per-provider call history over a rolling
//! 24 h window, derived uptime and cost statistics, the dynamic voting
//! weight, and per-model performance feedback from the voting engine.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Trailing window over which uptime and cost are computed.
const WINDOW: Duration = Duration::from_secs(24 * 60 * 60);

/// Hard cap on retained events per provider, independent of the window.
const MAX_HISTORY: usize = 10_000;

/// Sliding window of per-model voting outcomes.
const PERFORMANCE_WINDOW: usize = 50;

/// Interval between background compaction passes.
const COMPACTION_INTERVAL: Duration = Duration::from_secs(60 * 60);

#[derive(Debug, Clone)]
struct CallEvent {
    at: Instant,
    success: bool,
    latency_ms: u64,
    output_tokens: u64,
    /// Dollar cost of the output tokens, derived from the model's
    /// `output_cost_per_1k` at ingest time.
    output_cost: f64,
}

#[derive(Default)]
struct ProviderHistory {
    events: VecDeque<CallEvent>,
}

impl ProviderHistory {
    fn push(&mut self, event: CallEvent) {
        if self.events.len() == MAX_HISTORY {
            self.events.pop_front();
        }
        self.events.push_back(event);
    }

    fn purge_stale(&mut self, now: Instant) {
        while let Some(front) = self.events.front() {
            if now.duration_since(front.at) > WINDOW {
                self.events.pop_front();
            } else {
                break;
            }
        }
    }

    fn live<'a>(&'a self, now: Instant) -> impl Iterator<Item = &'a CallEvent> {
        self.events
            .iter()
            .filter(move |e| now.duration_since(e.at) <= WINDOW)
    }
}

/// Per-model voting performance over a bounded sliding window.
#[derive(Debug, Default, Clone)]
struct ModelPerformance {
    wins: u64,
    total: u64,
    /// `(won, composite score)` pairs, newest at the back, capped at
    /// [`PERFORMANCE_WINDOW`].
    recent: VecDeque<(bool, f64)>,
}

impl ModelPerformance {
    fn record(&mut self, won: bool, composite: f64) {
        self.total += 1;
        if won {
            self.wins += 1;
        }
        if self.recent.len() == PERFORMANCE_WINDOW {
            self.recent.pop_front();
        }
        self.recent.push_back((won, composite.clamp(0.0, 1.0)));
    }

    fn recent_win_rate(&self) -> f64 {
        if self.recent.is_empty() {
            return 0.5;
        }
        let wins = self.recent.iter().filter(|(won, _)| *won).count();
        wins as f64 / self.recent.len() as f64
    }

    fn average_composite(&self) -> f64 {
        if self.recent.is_empty() {
            return 0.5;
        }
        let sum: f64 = self.recent.iter().map(|(_, score)| score).sum();
        sum / self.recent.len() as f64
    }
}

/// Read-only performance view handed to the voting engine.
#[derive(Debug, Clone, Copy)]
pub struct PerformanceSnapshot {
    pub wins: u64,
    pub total: u64,
    pub recent_win_rate: f64,
    pub average_composite: f64,
}

/// Read-only provider statistics for health reporting.
#[derive(Debug, Clone)]
pub struct ProviderStats {
    pub provider: String,
    pub events: usize,
    pub uptime_24h: f64,
    pub avg_latency_ms: f64,
    pub avg_cost_per_1k_out: f64,
}

/// Tracks per-provider call outcomes and per-model voting performance.
///
/// Writes are serialized per provider; derived statistics are recomputed on
/// read over the live window, so a stale entry that has not yet been
/// compacted never skews the numbers.
pub struct ReliabilityTracker {
    providers: Mutex<HashMap<String, Arc<Mutex<ProviderHistory>>>>,
    performance: Mutex<HashMap<String, ModelPerformance>>,
}

impl Default for ReliabilityTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl ReliabilityTracker {
    pub fn new() -> Self {
        Self {
            providers: Mutex::new(HashMap::new()),
            performance: Mutex::new(HashMap::new()),
        }
    }

    fn history_for(&self, provider: &str) -> Arc<Mutex<ProviderHistory>> {
        let mut providers = self.providers.lock().expect("reliability lock poisoned");
        providers
            .entry(provider.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(ProviderHistory::default())))
            .clone()
    }

    /// Record one call outcome. `output_cost_per_1k` is the catalog price of
    /// the model that served the call.
    pub fn record_event(
        &self,
        provider: &str,
        success: bool,
        latency_ms: u64,
        model: &str,
        input_tokens: u64,
        output_tokens: u64,
        output_cost_per_1k: f64,
    ) {
        self.record_event_at(
            provider,
            success,
            latency_ms,
            model,
            input_tokens,
            output_tokens,
            output_cost_per_1k,
            Instant::now(),
        );
    }

    #[allow(clippy::too_many_arguments)]
    pub(crate) fn record_event_at(
        &self,
        provider: &str,
        success: bool,
        latency_ms: u64,
        model: &str,
        _input_tokens: u64,
        output_tokens: u64,
        output_cost_per_1k: f64,
        at: Instant,
    ) {
        let history = self.history_for(provider);
        let mut history = history.lock().expect("provider history poisoned");
        history.push(CallEvent {
            at,
            success,
            latency_ms,
            output_tokens,
            output_cost: output_tokens as f64 / 1_000.0 * output_cost_per_1k,
        });
        tracing::trace!(
            provider = %provider,
            model = %model,
            success,
            latency_ms,
            "Recorded reliability event"
        );
    }

    /// Success ratio over the trailing 24 h. Defaults to 1.0 when no events
    /// exist.
    pub fn uptime_24h(&self, provider: &str) -> f64 {
        let history = self.history_for(provider);
        let history = history.lock().expect("provider history poisoned");
        let now = Instant::now();
        let mut total = 0u64;
        let mut successes = 0u64;
        for event in history.live(now) {
            total += 1;
            if event.success {
                successes += 1;
            }
        }
        if total == 0 {
            1.0
        } else {
            successes as f64 / total as f64
        }
    }

    /// Average dollar cost per 1 000 output tokens over the trailing 24 h.
    /// Defaults to 1.0 when no output tokens were observed, so the dynamic
    /// weight stays well-defined for fresh providers.
    pub fn avg_cost_per_1k_out(&self, provider: &str) -> f64 {
        let history = self.history_for(provider);
        let history = history.lock().expect("provider history poisoned");
        let now = Instant::now();
        let mut cost = 0.0f64;
        let mut tokens = 0u64;
        for event in history.live(now) {
            cost += event.output_cost;
            tokens += event.output_tokens;
        }
        if tokens == 0 {
            1.0
        } else {
            cost / tokens as f64 * 1_000.0
        }
    }

    /// Multiplicative voting weight for a provider given a calibrated
    /// confidence: `calibrated × (1 / avg_cost_per_1k_out) × uptime_24h`.
    /// Providers with no history return `1.0 × calibrated` terms collapsed
    /// to exactly `1.0` when `calibrated` is 1.0, matching the unknown-
    /// provider default.
    pub fn dynamic_weight(&self, provider: &str, calibrated_confidence: f64) -> f64 {
        let has_events = {
            let history = self.history_for(provider);
            let history = history.lock().expect("provider history poisoned");
            let now = Instant::now();
            history.live(now).next().is_some()
        };
        if !has_events {
            return 1.0;
        }
        let cost = self.avg_cost_per_1k_out(provider).max(f64::EPSILON);
        calibrated_confidence.clamp(0.0, 1.0) * (1.0 / cost) * self.uptime_24h(provider)
    }

    /// Point-in-time statistics for one provider.
    pub fn stats(&self, provider: &str) -> ProviderStats {
        let history = self.history_for(provider);
        let history = history.lock().expect("provider history poisoned");
        let now = Instant::now();
        let mut events = 0usize;
        let mut successes = 0u64;
        let mut latency_sum = 0u64;
        let mut cost = 0.0f64;
        let mut tokens = 0u64;
        for event in history.live(now) {
            events += 1;
            if event.success {
                successes += 1;
            }
            latency_sum += event.latency_ms;
            cost += event.output_cost;
            tokens += event.output_tokens;
        }
        ProviderStats {
            provider: provider.to_string(),
            events,
            uptime_24h: if events == 0 {
                1.0
            } else {
                successes as f64 / events as f64
            },
            avg_latency_ms: if events == 0 {
                0.0
            } else {
                latency_sum as f64 / events as f64
            },
            avg_cost_per_1k_out: if tokens == 0 {
                1.0
            } else {
                cost / tokens as f64 * 1_000.0
            },
        }
    }

    /// Providers with at least one recorded event, sorted.
    pub fn known_providers(&self) -> Vec<String> {
        let providers = self.providers.lock().expect("reliability lock poisoned");
        let mut out: Vec<String> = providers.keys().cloned().collect();
        out.sort();
        out
    }

    /// Record a voting outcome for a model (win flag plus its composite
    /// vote score).
    pub fn record_outcome(&self, model: &str, won: bool, composite: f64) {
        let mut performance = self.performance.lock().expect("performance lock poisoned");
        performance
            .entry(model.to_string())
            .or_default()
            .record(won, composite);
    }

    /// Performance snapshot for a model. Unknown models report neutral
    /// (0.5) rates so new models are neither favored nor punished.
    pub fn performance(&self, model: &str) -> PerformanceSnapshot {
        let performance = self.performance.lock().expect("performance lock poisoned");
        match performance.get(model) {
            Some(p) => PerformanceSnapshot {
                wins: p.wins,
                total: p.total,
                recent_win_rate: p.recent_win_rate(),
                average_composite: p.average_composite(),
            },
            None => PerformanceSnapshot {
                wins: 0,
                total: 0,
                recent_win_rate: 0.5,
                average_composite: 0.5,
            },
        }
    }

    /// Drop events older than the 24 h window from every provider history.
    pub fn compact(&self) {
        let histories: Vec<Arc<Mutex<ProviderHistory>>> = {
            let providers = self.providers.lock().expect("reliability lock poisoned");
            providers.values().cloned().collect()
        };
        let now = Instant::now();
        for history in histories {
            history
                .lock()
                .expect("provider history poisoned")
                .purge_stale(now);
        }
        tracing::debug!("Reliability history compacted");
    }

    /// Spawn the hourly compaction task. Dropping or shutting down the
    /// returned handle stops the timer.
    pub fn spawn_compaction(self: &Arc<Self>) -> CompactionHandle {
        let tracker = Arc::clone(self);
        let task = tokio::spawn(async move {
            let mut interval = tokio::time::interval(COMPACTION_INTERVAL);
            // The first tick fires immediately; skip it.
            interval.tick().await;
            loop {
                interval.tick().await;
                tracker.compact();
            }
        });
        CompactionHandle { task }
    }
}

/// Handle owning the background compaction task.
pub struct CompactionHandle {
    task: tokio::task::JoinHandle<()>,
}

impl CompactionHandle {
    /// Stop the compaction timer.
    pub fn shutdown(&self) {
        self.task.abort();
    }
}

impl Drop for CompactionHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

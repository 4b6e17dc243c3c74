//! Per-user request quotas: sliding hourly and daily windows checked at
//! stage 1, alongside the tier concurrency semaphore.

use crate::config::TierLimits;
use crate::error::{OrchestratorError, Result};
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::{Duration, Instant};

const HOUR: Duration = Duration::from_secs(60 * 60);
const DAY: Duration = Duration::from_secs(24 * 60 * 60);

/// Retained request timestamps per user, independent of the windows.
const MAX_TIMESTAMPS: usize = 4_096;

#[derive(Default)]
struct UserWindow {
    requests: VecDeque<Instant>,
}

impl UserWindow {
    fn prune(&mut self, now: Instant) {
        while let Some(front) = self.requests.front() {
            if now.duration_since(*front) > DAY {
                self.requests.pop_front();
            } else {
                break;
            }
        }
    }

    fn count_within(&self, now: Instant, window: Duration) -> u32 {
        self.requests
            .iter()
            .rev()
            .take_while(|t| now.duration_since(**t) <= window)
            .count() as u32
    }
}

/// Sliding-window request quota per user ID.
///
/// A request is admitted when both the hourly and daily counts are under
/// the tier's quotas; admitted requests are recorded immediately so that
/// concurrent callers cannot slip past the limit between check and record.
#[derive(Default)]
pub struct QuotaTracker {
    users: Mutex<HashMap<String, UserWindow>>,
}

impl QuotaTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Check and record one request for `user_id` under `limits`.
    pub fn admit(&self, user_id: &str, limits: &TierLimits) -> Result<()> {
        self.admit_at(user_id, limits, Instant::now())
    }

    pub(crate) fn admit_at(&self, user_id: &str, limits: &TierLimits, now: Instant) -> Result<()> {
        let mut users = self.users.lock().expect("quota lock poisoned");
        let window = users.entry(user_id.to_string()).or_default();
        window.prune(now);

        if window.count_within(now, HOUR) >= limits.requests_per_hour {
            return Err(OrchestratorError::RateLimited);
        }
        if window.count_within(now, DAY) >= limits.requests_per_day {
            return Err(OrchestratorError::RateLimited);
        }

        if window.requests.len() == MAX_TIMESTAMPS {
            window.requests.pop_front();
        }
        window.requests.push_back(now);
        Ok(())
    }

    /// Drop users whose whole history has aged out of the daily window.
    pub fn compact(&self) {
        let now = Instant::now();
        let mut users = self.users.lock().expect("quota lock poisoned");
        users.retain(|_, window| {
            window.prune(now);
            !window.requests.is_empty()
        });
    }

    /// Number of users with recorded requests.
    pub fn tracked_users(&self) -> usize {
        self.users.lock().expect("quota lock poisoned").len()
    }
}

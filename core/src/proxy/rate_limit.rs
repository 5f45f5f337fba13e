//! Sliding-window admission control for image generation requests
//!
//! Every admitted request leaves a timestamp behind. Timestamps older than the
//! window are purged lazily before each read or write, so the count of retained
//! timestamps is exactly the number of admissions inside the trailing window.
//!
//! Admission is recorded before the upstream call is made and is never refunded,
//! even if the upstream call later fails or the client disconnects mid-stream.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use crate::proxy::clock::{Clock, SystemClock};

/// Snapshot of the limiter's usage, derived on every call
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageStats {
    pub used: usize,
    pub remaining: usize,
    pub limit: usize,
    /// When the oldest retained admission leaves the window; "now" if there is none
    pub reset_time: DateTime<Utc>,
}

/// Body of `GET /api/rate-limit`
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitStatus {
    #[serde(flatten)]
    pub usage: UsageStats,
    pub window_hours: f64,
    pub percentage_used: u32,
}

pub struct RateLimiter {
    capacity: usize,
    window: Duration,
    clock: Arc<dyn Clock>,
    /// Monotonic admission times, oldest first
    admitted: Mutex<VecDeque<Instant>>,
}

impl RateLimiter {
    pub fn new(capacity: usize, window: Duration) -> Self {
        Self::with_clock(capacity, window, Arc::new(SystemClock))
    }

    pub fn with_clock(capacity: usize, window: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            capacity,
            window,
            clock,
            admitted: Mutex::new(VecDeque::with_capacity(capacity.min(1024))),
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Whether a request would be admitted right now. Only purges.
    pub fn can_admit(&self) -> bool {
        let q = self.purged(self.clock.instant());
        q.len() < self.capacity
    }

    /// Check-and-record under a single lock acquisition
    pub fn try_admit(&self) -> bool {
        let now = self.clock.instant();
        let mut q = self.purged(now);
        if q.len() < self.capacity {
            q.push_back(now);
            true
        } else {
            false
        }
    }

    pub fn usage_stats(&self) -> UsageStats {
        let instant = self.clock.instant();
        let now = self.clock.now();
        let q = self.purged(instant);
        let used = q.len();

        // Remaining life of the oldest entry, projected onto the wall clock
        let reset_time = match q.front() {
            Some(&oldest) => {
                let left = self.window.saturating_sub(instant.saturating_duration_since(oldest));
                chrono::Duration::from_std(left)
                    .ok()
                    .and_then(|d| now.checked_add_signed(d))
                    .unwrap_or(DateTime::<Utc>::MAX_UTC)
            }
            None => now,
        };

        UsageStats {
            used,
            remaining: self.capacity.saturating_sub(used),
            limit: self.capacity,
            reset_time,
        }
    }

    pub fn status(&self) -> RateLimitStatus {
        let usage = self.usage_stats();
        let percentage_used = if usage.limit == 0 {
            100
        } else {
            ((usage.used as f64 / usage.limit as f64) * 100.0).round() as u32
        };

        RateLimitStatus {
            usage,
            window_hours: self.window.as_secs_f64() / 3600.0,
            percentage_used,
        }
    }

    /// Whole seconds until `stats.reset_time`, never less than one
    pub fn retry_after_secs(&self, stats: &UsageStats) -> u64 {
        let wait = stats.reset_time.signed_duration_since(self.clock.now());
        wait.num_seconds().max(1) as u64
    }

    fn purged(&self, now: Instant) -> MutexGuard<'_, VecDeque<Instant>> {
        // Every mutation leaves the queue consistent, so a poisoned lock is still usable
        let mut q = self.admitted.lock().unwrap_or_else(|e| e.into_inner());
        while let Some(&front) = q.front() {
            if now.saturating_duration_since(front) >= self.window {
                q.pop_front();
            } else {
                break;
            }
        }
        q
    }
}

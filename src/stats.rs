//! Statistics tracking for the forwarder.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use crate::handler::Outcome;

/// Atomic counters shared by every transport task.
pub struct Stats {
    pub requests: AtomicU64,
    pub hosts: AtomicU64,
    pub cached: AtomicU64,
    pub resolved: AtomicU64,
    pub failed: AtomicU64,
    /// Cumulative response time in microseconds for averaging.
    total_response_time_us: AtomicU64,
}

impl Stats {
    pub fn new() -> Self {
        Self {
            requests: AtomicU64::new(0),
            hosts: AtomicU64::new(0),
            cached: AtomicU64::new(0),
            resolved: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            total_response_time_us: AtomicU64::new(0),
        }
    }

    pub fn record(&self, outcome: &Outcome, elapsed: Duration) {
        self.requests.fetch_add(1, Ordering::Relaxed);
        let counter = match outcome {
            Outcome::Hosts => &self.hosts,
            Outcome::Cached => &self.cached,
            Outcome::Resolved(_) => &self.resolved,
            Outcome::Failed => &self.failed,
        };
        counter.fetch_add(1, Ordering::Relaxed);
        self.total_response_time_us
            .fetch_add(elapsed.as_micros() as u64, Ordering::Relaxed);
    }

    pub fn snapshot_and_reset(&self) -> StatsSnapshot {
        let requests = self.requests.swap(0, Ordering::Relaxed);
        let hosts = self.hosts.swap(0, Ordering::Relaxed);
        let cached = self.cached.swap(0, Ordering::Relaxed);
        let resolved = self.resolved.swap(0, Ordering::Relaxed);
        let failed = self.failed.swap(0, Ordering::Relaxed);
        let total_us = self.total_response_time_us.swap(0, Ordering::Relaxed);

        let avg_response_ms = if requests > 0 {
            (total_us as f64 / requests as f64) / 1000.0
        } else {
            0.0
        };

        StatsSnapshot {
            requests,
            hosts,
            cached,
            resolved,
            failed,
            avg_response_ms,
        }
    }
}

impl Default for Stats {
    fn default() -> Self {
        Self::new()
    }
}

pub struct StatsSnapshot {
    pub requests: u64,
    pub hosts: u64,
    pub cached: u64,
    pub resolved: u64,
    pub failed: u64,
    pub avg_response_ms: f64,
}

//! Cache and remote-call counters.
//!
//! All counters are `AtomicU64` so the resolver and the remote client can
//! record outcomes from any task without locking. `snapshot()` derives the
//! rates; `reset()` exists for test isolation only.

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

static GLOBAL: OnceLock<Arc<Metrics>> = OnceLock::new();

#[derive(Debug)]
pub struct Metrics {
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    remote_calls: AtomicU64,
    remote_successes: AtomicU64,
    remote_errors: AtomicU64,
    remote_total_latency_ms: AtomicU64,
    stale_serves: AtomicU64,
    estimate_serves: AtomicU64,
    session_handshakes: AtomicU64,
    /// Unix epoch milliseconds of the last recorded event.
    last_updated_ms: AtomicI64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub remote_calls: u64,
    pub remote_successes: u64,
    pub remote_errors: u64,
    pub remote_total_latency_ms: u64,
    pub stale_serves: u64,
    pub estimate_serves: u64,
    pub session_handshakes: u64,
    pub last_updated: DateTime<Utc>,
    /// Percentage of store lookups that hit, one decimal.
    pub cache_hit_rate: f64,
    /// Percentage of remote calls that succeeded; 100 when none were made.
    pub remote_success_rate: f64,
    /// Mean remote latency in whole milliseconds; 0 when none were made.
    pub avg_remote_latency_ms: u64,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            cache_hits: AtomicU64::new(0),
            cache_misses: AtomicU64::new(0),
            remote_calls: AtomicU64::new(0),
            remote_successes: AtomicU64::new(0),
            remote_errors: AtomicU64::new(0),
            remote_total_latency_ms: AtomicU64::new(0),
            stale_serves: AtomicU64::new(0),
            estimate_serves: AtomicU64::new(0),
            session_handshakes: AtomicU64::new(0),
            last_updated_ms: AtomicI64::new(Utc::now().timestamp_millis()),
        }
    }

    /// Process-wide instance, created on first use.
    pub fn global() -> Arc<Metrics> {
        GLOBAL.get_or_init(|| Arc::new(Metrics::new())).clone()
    }

    pub fn record_cache_hit(&self) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
        self.touch();
    }

    pub fn record_cache_miss(&self) {
        self.cache_misses.fetch_add(1, Ordering::Relaxed);
        self.touch();
    }

    pub fn record_remote_call(&self, success: bool, latency: Duration) {
        self.remote_calls.fetch_add(1, Ordering::Relaxed);
        let latency_ms = u64::try_from(latency.as_millis()).unwrap_or(u64::MAX);
        self.remote_total_latency_ms
            .fetch_add(latency_ms, Ordering::Relaxed);
        if success {
            self.remote_successes.fetch_add(1, Ordering::Relaxed);
        } else {
            self.remote_errors.fetch_add(1, Ordering::Relaxed);
        }
        self.touch();
    }

    pub fn record_stale_serve(&self) {
        self.stale_serves.fetch_add(1, Ordering::Relaxed);
        self.touch();
    }

    pub fn record_estimate_serve(&self) {
        self.estimate_serves.fetch_add(1, Ordering::Relaxed);
        self.touch();
    }

    pub fn record_handshake(&self) {
        self.session_handshakes.fetch_add(1, Ordering::Relaxed);
        self.touch();
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let cache_hits = self.cache_hits.load(Ordering::Relaxed);
        let cache_misses = self.cache_misses.load(Ordering::Relaxed);
        let remote_calls = self.remote_calls.load(Ordering::Relaxed);
        let remote_successes = self.remote_successes.load(Ordering::Relaxed);
        let remote_total_latency_ms = self.remote_total_latency_ms.load(Ordering::Relaxed);

        let lookups = cache_hits + cache_misses;
        let cache_hit_rate = if lookups > 0 {
            round_one(cache_hits as f64 / lookups as f64 * 100.0)
        } else {
            0.0
        };
        let remote_success_rate = if remote_calls > 0 {
            round_one(remote_successes as f64 / remote_calls as f64 * 100.0)
        } else {
            100.0
        };
        let avg_remote_latency_ms = if remote_calls > 0 {
            (remote_total_latency_ms as f64 / remote_calls as f64).round() as u64
        } else {
            0
        };

        let last_updated = Utc
            .timestamp_millis_opt(self.last_updated_ms.load(Ordering::Relaxed))
            .single()
            .unwrap_or_else(Utc::now);

        MetricsSnapshot {
            cache_hits,
            cache_misses,
            remote_calls,
            remote_successes,
            remote_errors: self.remote_errors.load(Ordering::Relaxed),
            remote_total_latency_ms,
            stale_serves: self.stale_serves.load(Ordering::Relaxed),
            estimate_serves: self.estimate_serves.load(Ordering::Relaxed),
            session_handshakes: self.session_handshakes.load(Ordering::Relaxed),
            last_updated,
            cache_hit_rate,
            remote_success_rate,
            avg_remote_latency_ms,
        }
    }

    pub fn reset(&self) {
        for counter in [
            &self.cache_hits,
            &self.cache_misses,
            &self.remote_calls,
            &self.remote_successes,
            &self.remote_errors,
            &self.remote_total_latency_ms,
            &self.stale_serves,
            &self.estimate_serves,
            &self.session_handshakes,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
        self.touch();
    }

    fn touch(&self) {
        self.last_updated_ms
            .store(Utc::now().timestamp_millis(), Ordering::Relaxed);
    }
}

fn round_one(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_snapshot_defaults() {
        let snap = Metrics::new().snapshot();
        assert_eq!(snap.cache_hit_rate, 0.0);
        assert_eq!(snap.remote_success_rate, 100.0);
        assert_eq!(snap.avg_remote_latency_ms, 0);
    }

    #[test]
    fn derived_rates() {
        let m = Metrics::new();
        m.record_cache_hit();
        m.record_cache_hit();
        m.record_cache_miss();
        m.record_remote_call(true, Duration::from_millis(100));
        m.record_remote_call(true, Duration::from_millis(250));
        m.record_remote_call(false, Duration::from_millis(5000));

        let snap = m.snapshot();
        assert_eq!(snap.cache_hit_rate, 66.7);
        assert_eq!(snap.remote_success_rate, 66.7);
        assert_eq!(snap.remote_errors, 1);
        assert_eq!(snap.remote_total_latency_ms, 5350);
        assert_eq!(snap.avg_remote_latency_ms, 1783);
    }

    #[test]
    fn reset_clears_counters() {
        let m = Metrics::new();
        m.record_cache_miss();
        m.record_estimate_serve();
        m.record_stale_serve();
        m.record_handshake();
        m.reset();
        let snap = m.snapshot();
        assert_eq!(snap.cache_misses, 0);
        assert_eq!(snap.estimate_serves, 0);
        assert_eq!(snap.stale_serves, 0);
        assert_eq!(snap.session_handshakes, 0);
    }

    #[test]
    fn concurrent_increments_are_not_lost() {
        let m = Arc::new(Metrics::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let m = Arc::clone(&m);
                std::thread::spawn(move || {
                    for _ in 0..1000 {
                        m.record_cache_hit();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(m.snapshot().cache_hits, 8000);
    }

    #[test]
    fn global_is_shared() {
        assert!(Arc::ptr_eq(&Metrics::global(), &Metrics::global()));
    }
}

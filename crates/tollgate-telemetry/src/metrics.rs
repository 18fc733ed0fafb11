//! Evaluation and refresh metrics
//!
//! Every recording goes to the `metrics` facade (exported by whatever
//! recorder the binary installs) and to in-process counters that back the
//! operator stats view.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Metrics collector for policy evaluations
#[derive(Clone, Debug)]
pub struct MetricsCollector {
    inner: Arc<MetricsInner>,
}

#[derive(Debug, Default)]
struct MetricsInner {
    evaluations: AtomicU64,
    blocked: AtomicU64,
    policy_hits: AtomicU64,
    total_latency_us: AtomicU64,
    refreshes: AtomicU64,
    refresh_failures: AtomicU64,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(MetricsInner::default()),
        }
    }

    /// Record one evaluation and how many policies it triggered
    pub fn record_evaluation(&self, blocked: bool, triggered: usize, latency_us: u64) {
        self.inner.evaluations.fetch_add(1, Ordering::Relaxed);
        self.inner
            .total_latency_us
            .fetch_add(latency_us, Ordering::Relaxed);
        if blocked {
            self.inner.blocked.fetch_add(1, Ordering::Relaxed);
        }
        self.inner
            .policy_hits
            .fetch_add(triggered as u64, Ordering::Relaxed);

        let outcome = if blocked {
            "blocked"
        } else if triggered > 0 {
            "flagged"
        } else {
            "allowed"
        };
        ::metrics::counter!("tollgate_evaluations_total", "outcome" => outcome).increment(1);
        if triggered > 0 {
            ::metrics::counter!("tollgate_policy_hits_total").increment(triggered as u64);
        }
        ::metrics::histogram!("tollgate_evaluation_latency_us").record(latency_us as f64);
    }

    /// Record the result of one policy reload
    pub fn record_refresh(&self, ok: bool) {
        self.inner.refreshes.fetch_add(1, Ordering::Relaxed);
        if !ok {
            self.inner.refresh_failures.fetch_add(1, Ordering::Relaxed);
        }
        let result = if ok { "ok" } else { "failed" };
        ::metrics::counter!("tollgate_policy_refresh_total", "result" => result).increment(1);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            evaluations: self.inner.evaluations.load(Ordering::Relaxed),
            blocked: self.inner.blocked.load(Ordering::Relaxed),
            policy_hits: self.inner.policy_hits.load(Ordering::Relaxed),
            total_latency_us: self.inner.total_latency_us.load(Ordering::Relaxed),
            refreshes: self.inner.refreshes.load(Ordering::Relaxed),
            refresh_failures: self.inner.refresh_failures.load(Ordering::Relaxed),
        }
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

/// Point-in-time copy of the counters
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub evaluations: u64,
    pub blocked: u64,
    pub policy_hits: u64,
    pub total_latency_us: u64,
    pub refreshes: u64,
    pub refresh_failures: u64,
}

impl MetricsSnapshot {
    pub fn avg_latency_us(&self) -> u64 {
        if self.evaluations == 0 {
            0
        } else {
            self.total_latency_us / self.evaluations
        }
    }

    /// Fraction of evaluations that were blocked
    pub fn block_rate(&self) -> f64 {
        if self.evaluations == 0 {
            0.0
        } else {
            self.blocked as f64 / self.evaluations as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_evaluation_counters() {
        let metrics = MetricsCollector::new();

        metrics.record_evaluation(true, 1, 300);
        metrics.record_evaluation(false, 2, 100);
        metrics.record_evaluation(false, 0, 200);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.evaluations, 3);
        assert_eq!(snapshot.blocked, 1);
        assert_eq!(snapshot.policy_hits, 3);
        assert_eq!(snapshot.avg_latency_us(), 200);
        assert!((snapshot.block_rate() - 1.0 / 3.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_refresh_counters() {
        let metrics = MetricsCollector::new();
        metrics.record_refresh(true);
        metrics.record_refresh(false);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.refreshes, 2);
        assert_eq!(snapshot.refresh_failures, 1);
    }

    #[test]
    fn test_empty_snapshot() {
        let snapshot = MetricsCollector::new().snapshot();
        assert_eq!(snapshot.avg_latency_us(), 0);
        assert_eq!(snapshot.block_rate(), 0.0);
    }
}

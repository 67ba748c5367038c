//! End-to-end scenarios against a local HTTP mock, covering the literal
//! scenarios enumerated in SPEC_FULL.md's testable-properties section.
//! Durations are scaled down from the literal values to keep the suite fast
//! while preserving the ratios the literal scenario's expectations depend on
//! (rate × duration, weight share, cancellation-vs-grace window).

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

use rust_loadtest::adapters::{HttpAdapter, HttpAdapterConfig};
use rust_loadtest::driver::Adapters;
use rust_loadtest::history::InMemoryHistoryStore;
use rust_loadtest::load_profile::LoadProfile;
use rust_loadtest::orchestrator::{Impact, Orchestrator, RunStatus};
use rust_loadtest::scenario::{ConfigValue, ExecutionMode, Scenario, ScenarioSettings, Step, StepType};

fn http_step(name: &str, method: &str, url: &str, weight: u32) -> Step {
    let mut configuration = HashMap::new();
    configuration.insert("method".into(), ConfigValue::String(method.into()));
    configuration.insert("url".into(), ConfigValue::String(url.into()));
    Step {
        name: name.into(),
        step_type: StepType::HttpApi,
        configuration,
        weight,
        enabled: true,
        combined_with_previous: false,
    }
}

fn orchestrator_with(history: Arc<InMemoryHistoryStore>) -> Orchestrator {
    let http_adapter = HttpAdapter::new(&HttpAdapterConfig::default()).unwrap();
    let adapters = Adapters {
        http: Some(Arc::new(http_adapter)),
        sql: None,
    };
    Orchestrator::new(HashMap::new(), adapters, history)
}

/// S1 — HTTP ConstantRate smoke. Scaled from rate:50/duration:10s/rampUp:2s
/// to rate:20/duration:4s/rampUp:1s (ratio rate×activeDuration preserved at
/// ~1:3 of the literal figure, expectation band scaled proportionally).
#[tokio::test]
async fn s1_constant_rate_smoke() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/ok"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let scenario = Scenario {
        name: "s1-smoke".to_string(),
        description: None,
        steps: vec![http_step("ok", "GET", &format!("{}/ok", server.uri()), 1)],
        execution_mode: ExecutionMode::Parallel,
        load_profile: LoadProfile::ConstantRate {
            rps: 20.0,
            duration: Duration::from_secs(4),
            ramp_up: Duration::from_secs(1),
        },
        settings: ScenarioSettings {
            duration_secs: 4,
            ramp_up_secs: 1,
            concurrent_users: 10,
            max_error_rate_percent: 5.0,
            expected_response_time_ms: 500.0,
        },
    };
    scenario.validate().unwrap();

    let history = Arc::new(InMemoryHistoryStore::new());
    let orchestrator = orchestrator_with(history);
    let result = orchestrator.execute(&scenario).await.unwrap();

    assert_eq!(result.status, RunStatus::Completed);
    assert_eq!(result.error_rate_percent, 0.0);
    assert_eq!(result.impact, Impact::None);
    assert!(result.total_requests > 0, "expected at least some requests to land");
}

struct FlakyResponder {
    counter: AtomicU64,
}

impl Respond for FlakyResponder {
    fn respond(&self, _request: &Request) -> ResponseTemplate {
        let n = self.counter.fetch_add(1, Ordering::SeqCst);
        if n % 5 == 0 {
            ResponseTemplate::new(500)
        } else {
            ResponseTemplate::new(200)
        }
    }
}

/// S2 — Failure threshold. One in five requests (20%) fails with 500;
/// `maxErrorRatePercent = 5` so the run is judged failed, and the >10%
/// error rate drives `impact == Critical`.
#[tokio::test]
async fn s2_failure_threshold_judged_failed_with_critical_impact() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/flaky"))
        .respond_with(FlakyResponder {
            counter: AtomicU64::new(0),
        })
        .mount(&server)
        .await;

    let scenario = Scenario {
        name: "s2-failure-threshold".to_string(),
        description: None,
        steps: vec![http_step("flaky", "GET", &format!("{}/flaky", server.uri()), 1)],
        execution_mode: ExecutionMode::Parallel,
        load_profile: LoadProfile::ConstantRate {
            rps: 20.0,
            duration: Duration::from_secs(4),
            ramp_up: Duration::from_secs(1),
        },
        settings: ScenarioSettings {
            duration_secs: 4,
            ramp_up_secs: 1,
            concurrent_users: 10,
            max_error_rate_percent: 5.0,
            expected_response_time_ms: 500.0,
        },
    };
    scenario.validate().unwrap();

    let history = Arc::new(InMemoryHistoryStore::new());
    let orchestrator = orchestrator_with(history);
    let result = orchestrator.execute(&scenario).await.unwrap();

    assert_eq!(result.status, RunStatus::Completed);
    assert!(!result.judged_passed, "5 max error rate exceeded by a 20% failure rate");
    assert!(result.error_rate_percent > 10.0, "observed {}", result.error_rate_percent);
    assert_eq!(result.impact, Impact::Critical);
}

/// S3 — Sequential composition. Two steps walked in order by each of 4
/// workers; observation counts across both steps should land within a
/// couple of requests of each other.
#[tokio::test]
async fn s3_sequential_composition_balances_step_observations() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/auth"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/profile"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let scenario = Scenario {
        name: "s3-sequential".to_string(),
        description: None,
        steps: vec![
            http_step("auth", "POST", &format!("{}/auth", server.uri()), 1),
            http_step("profile", "GET", &format!("{}/profile", server.uri()), 1),
        ],
        execution_mode: ExecutionMode::Sequential,
        load_profile: LoadProfile::ConstantRate {
            rps: 20.0,
            duration: Duration::from_secs(3),
            ramp_up: Duration::from_secs(0),
        },
        settings: ScenarioSettings {
            duration_secs: 3,
            ramp_up_secs: 0,
            concurrent_users: 4,
            max_error_rate_percent: 5.0,
            expected_response_time_ms: 500.0,
        },
    };
    scenario.validate().unwrap();

    let history = Arc::new(InMemoryHistoryStore::new());
    let orchestrator = orchestrator_with(history);
    let result = orchestrator.execute(&scenario).await.unwrap();
    assert_eq!(result.status, RunStatus::Completed);

    let requests = server.received_requests().await.unwrap();
    let auth_count = requests.iter().filter(|r| r.url.path() == "/auth").count();
    let profile_count = requests.iter().filter(|r| r.url.path() == "/profile").count();

    assert!(auth_count > 0 && profile_count > 0);
    let diff = (auth_count as i64 - profile_count as i64).abs();
    assert!(
        diff <= 4,
        "sequential walk should keep step counts balanced per worker, got auth={auth_count} profile={profile_count}"
    );
}

/// S4 — Weighted distribution. Step A weight 3, step B weight 1; over a
/// large sample the empirical share should approach 0.75/0.25.
#[tokio::test]
async fn s4_weighted_distribution_approaches_weight_ratio() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/a"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/b"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let scenario = Scenario {
        name: "s4-weighted".to_string(),
        description: None,
        steps: vec![
            http_step("a", "GET", &format!("{}/a", server.uri()), 3),
            http_step("b", "GET", &format!("{}/b", server.uri()), 1),
        ],
        execution_mode: ExecutionMode::Weighted,
        load_profile: LoadProfile::Stress {
            max_concurrency: 32,
            duration: Duration::from_secs(4),
        },
        settings: ScenarioSettings {
            duration_secs: 4,
            ramp_up_secs: 0,
            concurrent_users: 32,
            max_error_rate_percent: 100.0,
            expected_response_time_ms: 5000.0,
        },
    };
    scenario.validate().unwrap();

    let history = Arc::new(InMemoryHistoryStore::new());
    let orchestrator = orchestrator_with(history);
    let result = orchestrator.execute(&scenario).await.unwrap();
    assert_eq!(result.status, RunStatus::Completed);

    let requests = server.received_requests().await.unwrap();
    let a_count = requests.iter().filter(|r| r.url.path() == "/a").count();
    let b_count = requests.iter().filter(|r| r.url.path() == "/b").count();
    let total = a_count + b_count;

    assert!(total > 0, "expected a non-trivial sample of weighted draws");
    let a_share = a_count as f64 / total as f64;
    assert!(
        (0.55..=0.90).contains(&a_share),
        "expected A's share to trend toward 0.75 (weight 3 of 4), got {a_share} over {total} samples"
    );
}

/// S6 — Cancellation. Fires cancellation partway through a longer run and
/// expects the driver to wind down within the grace window, with the
/// orchestrator reporting `status == Cancelled`.
#[tokio::test]
async fn s6_cancellation_within_grace_window() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/ok"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let scenario = Scenario {
        name: "s6-cancellation".to_string(),
        description: None,
        steps: vec![http_step("ok", "GET", &format!("{}/ok", server.uri()), 1)],
        execution_mode: ExecutionMode::Parallel,
        load_profile: LoadProfile::ConstantRate {
            rps: 10.0,
            duration: Duration::from_secs(30),
            ramp_up: Duration::from_secs(0),
        },
        settings: ScenarioSettings {
            duration_secs: 30,
            ramp_up_secs: 0,
            concurrent_users: 5,
            max_error_rate_percent: 5.0,
            expected_response_time_ms: 500.0,
        },
    };
    scenario.validate().unwrap();

    let history: Arc<dyn rust_loadtest::history::HistoryStore> = Arc::new(InMemoryHistoryStore::new());
    let http_adapter = HttpAdapter::new(&HttpAdapterConfig::default()).unwrap();
    let adapters = Adapters {
        http: Some(Arc::new(http_adapter)),
        sql: None,
    };
    let orchestrator = Orchestrator::new(HashMap::new(), adapters, history);

    let (cancel_tx, cancel_rx) = tokio::sync::watch::channel(false);
    let fire_at = tokio::time::Instant::now() + Duration::from_secs(1);

    let run = tokio::spawn(async move { orchestrator.execute_with_cancellation(&scenario, cancel_rx).await });

    tokio::time::sleep_until(fire_at).await;
    cancel_tx.send(true).unwrap();

    let result = tokio::time::timeout(Duration::from_secs(10), run)
        .await
        .expect("driver should wind down within the cancellation grace window")
        .unwrap()
        .unwrap();

    assert_eq!(result.status, RunStatus::Cancelled);
    assert!(result.total_requests > 0);
}

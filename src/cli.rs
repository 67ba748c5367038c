//! Command-line surface (C9, §6.3/§6.4): flag parsing and CI-readable
//! result emission. An external collaborator by design — this module never
//! touches `Orchestrator::execute`/`execute_by_name` themselves, it only
//! builds the inputs they need and prints their outputs.
//!
//! Grounded on the teacher's original `main.rs`, which read `TARGET_URL`,
//! `NUM_CONCURRENT_TASKS`, `TEST_DURATION`, `LOAD_MODEL` etc. from bare
//! environment variables with hand-rolled parsing. `clap`'s derive API
//! replaces that by-hand parsing while keeping the same flag vocabulary,
//! now sourced from argv per §6.3 instead of the environment.

use std::collections::HashMap;
use std::time::Duration;

use clap::{Parser, ValueEnum};

use crate::load_profile::LoadProfile;
use crate::orchestrator::RunResult;
use crate::scenario::{ConfigValue, ExecutionMode, Scenario, ScenarioSettings, Step, StepType};

/// `--test-type` values; determines which ad-hoc step is synthesized when
/// `--scenario` isn't given.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum TestType {
    Api,
    Sql,
    Combined,
}

#[derive(Debug, Parser)]
#[command(name = "rust_loadtest", about = "HTTP/SQL load-testing engine")]
pub struct Cli {
    /// Name of a scenario already present in the loaded scenario file.
    #[arg(long)]
    pub scenario: Option<String>,

    /// Overrides the scenario's (or ad-hoc run's) duration, in seconds.
    #[arg(long)]
    pub duration: Option<u64>,

    /// Overrides the scenario's (or ad-hoc run's) concurrent user count.
    #[arg(long)]
    pub users: Option<usize>,

    /// Target URL for an ad-hoc HttpApi run (used when `--scenario` is absent).
    #[arg(long)]
    pub endpoint: Option<String>,

    /// HTTP method for an ad-hoc HttpApi run. Defaults to GET.
    #[arg(long)]
    pub method: Option<String>,

    /// Connection string for an ad-hoc SqlProcedure/SqlQuery run.
    #[arg(long = "sql-connection")]
    pub sql_connection: Option<String>,

    /// Stored procedure name for an ad-hoc SqlProcedure run.
    #[arg(long = "sql-procedure")]
    pub sql_procedure: Option<String>,

    /// Selects which kind of ad-hoc step(s) `--endpoint`/`--sql-*` synthesize.
    #[arg(long = "test-type", value_enum, default_value_t = TestType::Api)]
    pub test_type: TestType,

    /// Prints every scenario name in the loaded file and exits without running.
    #[arg(long = "list-scenarios")]
    pub list_scenarios: bool,
}

/// Builds a single-step, single-scenario ad-hoc `Scenario` from CLI flags,
/// used when the operator passes `--endpoint`/`--sql-*` instead of
/// `--scenario`. Execution mode is always `Sequential` since there is at
/// most one enabled step of each protocol kind.
pub fn scenario_from_flags(cli: &Cli) -> Result<Scenario, String> {
    let mut steps = Vec::new();

    if matches!(cli.test_type, TestType::Api | TestType::Combined) {
        let url = cli
            .endpoint
            .clone()
            .ok_or_else(|| "--endpoint is required for an Api/Combined ad-hoc run".to_string())?;
        let method = cli.method.clone().unwrap_or_else(|| "GET".to_string());

        let mut configuration = HashMap::new();
        configuration.insert("method".into(), ConfigValue::String(method));
        configuration.insert("url".into(), ConfigValue::String(url));
        steps.push(Step {
            name: "cli-http".into(),
            step_type: StepType::HttpApi,
            configuration,
            weight: 1,
            enabled: true,
            combined_with_previous: false,
        });
    }

    if matches!(cli.test_type, TestType::Sql | TestType::Combined) {
        let connection_string = cli
            .sql_connection
            .clone()
            .ok_or_else(|| "--sql-connection is required for a Sql/Combined ad-hoc run".to_string())?;
        let procedure_name = cli
            .sql_procedure
            .clone()
            .ok_or_else(|| "--sql-procedure is required for a Sql/Combined ad-hoc run".to_string())?;

        let mut configuration = HashMap::new();
        configuration.insert("connectionString".into(), ConfigValue::String(connection_string));
        configuration.insert("procedureName".into(), ConfigValue::String(procedure_name));
        steps.push(Step {
            name: "cli-sql".into(),
            step_type: StepType::SqlProcedure,
            configuration,
            weight: 1,
            enabled: true,
            combined_with_previous: false,
        });
    }

    if steps.is_empty() {
        return Err("no ad-hoc step could be built from the given flags".to_string());
    }

    let duration_secs = cli.duration.unwrap_or(60);
    let concurrent_users = cli.users.unwrap_or(10);

    let settings = ScenarioSettings {
        duration_secs,
        concurrent_users,
        ..ScenarioSettings::default()
    };

    let scenario = Scenario {
        name: cli.scenario.clone().unwrap_or_else(|| "cli-adhoc".to_string()),
        description: Some("ad-hoc scenario synthesized from CLI flags".to_string()),
        steps,
        execution_mode: ExecutionMode::Sequential,
        load_profile: LoadProfile::ConstantRate {
            rps: concurrent_users as f64,
            duration: Duration::from_secs(duration_secs),
            ramp_up: Duration::from_secs(0),
        },
        settings,
    };
    scenario.validate()?;
    Ok(scenario)
}

/// Applies `--duration`/`--users` overrides to a scenario resolved by name
/// from the loaded file, leaving everything else untouched.
pub fn apply_overrides(mut scenario: Scenario, cli: &Cli) -> Scenario {
    if let Some(duration) = cli.duration {
        scenario.settings.duration_secs = duration;
    }
    if let Some(users) = cli.users {
        scenario.settings.concurrent_users = users;
    }
    scenario
}

/// Emits the §6.4 CI-readable lines for one `RunResult`: a tagged
/// SUCCESS/FAILURE summary line (derived from `judged_passed`, not `status`)
/// followed by one `key=value` line per statistic, each prefixed by the test
/// name so a downstream CI step can grep a specific scenario's numbers.
pub fn emit_ci_result(result: &RunResult) {
    let verdict = if result.judged_passed { "SUCCESS" } else { "FAILURE" };
    println!("{}: {}", result.test_name, verdict);

    let prefix = &result.test_name;
    println!("{prefix}.TotalRequests={}", result.total_requests);
    println!("{prefix}.SuccessfulRequests={}", result.successful_requests);
    println!("{prefix}.FailedRequests={}", result.failed_requests);
    println!("{prefix}.ErrorRatePercent={:.2}", result.error_rate_percent);
    println!("{prefix}.AverageResponseTimeMs={:.2}", result.latency.avg_ms);
    println!("{prefix}.P95ResponseTimeMs={:.2}", result.latency.p95_ms);
    println!("{prefix}.P99ResponseTimeMs={:.2}", result.latency.p99_ms);
    println!("{prefix}.RequestsPerSecond={:.2}", result.requests_per_second);
    println!("{prefix}.CpuUsagePercent={:.2}", result.host.avg_cpu_percent);
    println!("{prefix}.MemoryUsagePercent={:.2}", result.host.avg_mem_percent);
    println!("{prefix}.PerformanceImpact={:?}", result.impact);
}

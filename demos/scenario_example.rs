//! Example of building a scenario programmatically and executing it through
//! the orchestrator, without going through the JSON/YAML loader.
//!
//! This demonstrates a Sequential shopping-flow scenario: browse a product
//! listing, view a product, and check out. Multi-step chained-variable
//! extraction and response assertions are out of scope for this engine (see
//! SPEC_FULL.md's Non-goals) — each step here is independent, judged only on
//! status/transport outcome, matching how `adapters.rs` classifies results.
//!
//! Run with: cargo run --example scenario_example

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use rust_loadtest::adapters::{HttpAdapter, HttpAdapterConfig};
use rust_loadtest::driver::Adapters;
use rust_loadtest::history::InMemoryHistoryStore;
use rust_loadtest::load_profile::LoadProfile;
use rust_loadtest::orchestrator::Orchestrator;
use rust_loadtest::scenario::{ConfigValue, ExecutionMode, Scenario, ScenarioSettings, Step, StepType};

fn http_step(name: &str, method: &str, url: &str) -> Step {
    let mut configuration = HashMap::new();
    configuration.insert("method".into(), ConfigValue::String(method.into()));
    configuration.insert("url".into(), ConfigValue::String(url.into()));
    Step {
        name: name.into(),
        step_type: StepType::HttpApi,
        configuration,
        weight: 1,
        enabled: true,
        combined_with_previous: false,
    }
}

fn shopping_scenario(base_url: &str) -> Scenario {
    let scenario = Scenario {
        name: "shopping-flow".to_string(),
        description: Some("browse, view, and check out against a storefront".to_string()),
        steps: vec![
            http_step("browse products", "GET", &format!("{base_url}/products")),
            http_step("view product", "GET", &format!("{base_url}/products/1")),
            http_step("check out", "POST", &format!("{base_url}/checkout")),
        ],
        execution_mode: ExecutionMode::Sequential,
        load_profile: LoadProfile::ConstantRate {
            rps: 5.0,
            duration: Duration::from_secs(30),
            ramp_up: Duration::from_secs(5),
        },
        settings: ScenarioSettings {
            duration_secs: 30,
            ramp_up_secs: 5,
            concurrent_users: 5,
            max_error_rate_percent: 5.0,
            expected_response_time_ms: 500.0,
        },
    };
    scenario.validate().expect("example scenario must be valid");
    scenario
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let base_url = "https://ecom.edge.baugus-lab.com";
    let scenario = shopping_scenario(base_url);

    let http_adapter = HttpAdapter::new(&HttpAdapterConfig::default())?;
    let adapters = Adapters {
        http: Some(Arc::new(http_adapter)),
        sql: None,
    };
    let history = Arc::new(InMemoryHistoryStore::new());
    let orchestrator = Orchestrator::new(HashMap::new(), adapters, history);

    let result = orchestrator.execute(&scenario).await?;

    println!("\n=== Run Result ===");
    println!("Scenario: {}", result.test_name);
    println!("Status: {:?}", result.status);
    println!("Judged passed: {}", result.judged_passed);
    println!("Impact: {:?}", result.impact);
    println!(
        "Requests: {} total, {} successful, {} failed ({:.2}% error rate)",
        result.total_requests, result.successful_requests, result.failed_requests, result.error_rate_percent
    );
    println!(
        "Latency: avg {:.1}ms, p95 {:.1}ms, p99 {:.1}ms",
        result.latency.avg_ms, result.latency.p95_ms, result.latency.p99_ms
    );
    println!("Throughput: {:.2} req/s", result.requests_per_second);

    Ok(())
}

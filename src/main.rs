use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use mimalloc::MiMalloc;
use tracing::{error, info};

use rust_loadtest::adapters::{HttpAdapter, HttpAdapterConfig};
use rust_loadtest::cli::{self, Cli};
use rust_loadtest::config::Config;
use rust_loadtest::driver::Adapters;
use rust_loadtest::history::InMemoryHistoryStore;
use rust_loadtest::loader;
use rust_loadtest::metrics_server::{self, EngineMetrics};
use rust_loadtest::orchestrator::Orchestrator;
use rust_loadtest::scenario::Scenario;

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

/// Scenario file path; the wire format is JSON-equivalent (§6.1), so this
/// also happily accepts a YAML document using the same keys.
fn scenario_file_path() -> PathBuf {
    std::env::var("SCENARIO_FILE")
        .unwrap_or_else(|_| "scenarios.json".to_string())
        .into()
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .json()
        .init();

    let cli = Cli::parse();

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(err) => {
            error!(%err, "invalid configuration");
            std::process::exit(1);
        }
    };

    let metrics = Arc::new(EngineMetrics::new()?);
    let metrics_addr: SocketAddr = ([0, 0, 0, 0], config.metrics_port).into();
    metrics_server::spawn(metrics_addr, metrics.clone());

    let mut scenarios: HashMap<String, Scenario> = match loader::load_file(&scenario_file_path()) {
        Ok(scenarios) => scenarios,
        Err(err) => {
            info!(%err, "no usable scenario file found; continuing with ad-hoc scenarios only");
            HashMap::new()
        }
    };

    if cli.list_scenarios {
        let mut names: Vec<&String> = scenarios.keys().collect();
        names.sort();
        for name in names {
            println!("{name}");
        }
        return Ok(());
    }

    let scenario = match &cli.scenario {
        Some(name) => match scenarios.remove(name) {
            Some(scenario) => cli::apply_overrides(scenario, &cli),
            None => {
                error!(name, "no scenario named '{}' is registered", name);
                std::process::exit(1);
            }
        },
        None => match cli::scenario_from_flags(&cli) {
            Ok(scenario) => scenario,
            Err(err) => {
                error!(%err, "could not build an ad-hoc scenario from the given flags");
                std::process::exit(1);
            }
        },
    };

    let http_config = HttpAdapterConfig {
        timeout: Some(config.default_http_timeout),
        skip_tls_verify: config.skip_tls_verify,
        resolve_target_addr: config.resolve_target_addr.clone(),
        client_cert_path: config.client_cert_path.clone(),
        client_key_path: config.client_key_path.clone(),
        custom_headers: config.custom_headers.clone(),
        ..Default::default()
    };
    let http_adapter = match HttpAdapter::new(&http_config) {
        Ok(adapter) => Some(Arc::new(adapter)),
        Err(err) => {
            error!(%err, "failed to build HTTP adapter");
            std::process::exit(1);
        }
    };

    let adapters = Adapters {
        http: http_adapter,
        sql: None,
    };

    let history = Arc::new(InMemoryHistoryStore::new());
    let orchestrator = Orchestrator::new(HashMap::new(), adapters, history).with_metrics(metrics.clone());

    let result = match orchestrator.execute(&scenario).await {
        Ok(result) => result,
        Err(err) => {
            error!(%err, "engine error; run did not complete");
            std::process::exit(1);
        }
    };

    cli::emit_ci_result(&result);

    // Exit 0 on run completion even when thresholds were exceeded
    // (judgedPassed == false); only an engine error above exits 1 (§6.3).
    Ok(())
}

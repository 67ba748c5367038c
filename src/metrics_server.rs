//! Engine self-observability (C9, §6.5): a small Prometheus registry plus a
//! hyper `/metrics` endpoint. Distinct from the sampler (C2), which reports
//! on the *host machine*; these gauges/counters report on the *engine
//! process itself* — dispatch volume, worker concurrency, aggregator
//! reservoir occupancy, sampler tick failures — so an operator scraping the
//! engine can tell it apart from the system under test.
//!
//! Grounded on the teacher's original `main.rs`, which registered a
//! `lazy_static` `Registry` and served it from a bare hyper `Server` behind a
//! `service_fn`. This module keeps that shape but wraps the registry in a
//! struct so a binary can hold one instance per process instead of relying
//! on global statics, and exposes engine-shaped metrics instead of the
//! teacher's single-target request counters.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Request, Response, Server};
use prometheus::{Encoder, IntCounter, IntGauge, Opts, Registry, TextEncoder};
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{error, info};

#[derive(Error, Debug)]
pub enum MetricsServerError {
    #[error("failed to register metric: {0}")]
    Registration(#[from] prometheus::Error),

    #[error("metrics server failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: hyper::Error,
    },
}

/// The engine's own counters and gauges, independent of any one run.
/// Cheap to clone — every field is an `Arc`-backed prometheus handle.
#[derive(Clone)]
pub struct EngineMetrics {
    registry: Registry,
    dispatch_total: IntCounter,
    dispatch_failed_total: IntCounter,
    active_workers: IntGauge,
    aggregator_occupancy: IntGauge,
    sampler_tick_failures_total: IntCounter,
    // Plain atomics mirrored into the gauges on each scrape; cheaper than a
    // prometheus gauge update on every single dispatch in the hot loop.
    active_workers_raw: Arc<AtomicU64>,
    aggregator_occupancy_raw: Arc<AtomicU64>,
}

impl EngineMetrics {
    pub fn new() -> Result<Self, MetricsServerError> {
        let registry = Registry::new();

        let dispatch_total = IntCounter::with_opts(Opts::new(
            "loadtest_dispatch_total",
            "Total number of step dispatches issued by the driver",
        ))?;
        let dispatch_failed_total = IntCounter::with_opts(Opts::new(
            "loadtest_dispatch_failed_total",
            "Total number of step dispatches that observed a request or transport failure",
        ))?;
        let active_workers = IntGauge::with_opts(Opts::new(
            "loadtest_active_workers",
            "Number of driver worker tasks currently running",
        ))?;
        let aggregator_occupancy = IntGauge::with_opts(Opts::new(
            "loadtest_aggregator_reservoir_occupancy",
            "Number of latency samples currently held in the active run's histogram",
        ))?;
        let sampler_tick_failures_total = IntCounter::with_opts(Opts::new(
            "loadtest_sampler_tick_failures_total",
            "Total number of host sampler ticks that degraded to a zeroed reading",
        ))?;

        registry.register(Box::new(dispatch_total.clone()))?;
        registry.register(Box::new(dispatch_failed_total.clone()))?;
        registry.register(Box::new(active_workers.clone()))?;
        registry.register(Box::new(aggregator_occupancy.clone()))?;
        registry.register(Box::new(sampler_tick_failures_total.clone()))?;

        Ok(Self {
            registry,
            dispatch_total,
            dispatch_failed_total,
            active_workers,
            aggregator_occupancy,
            sampler_tick_failures_total,
            active_workers_raw: Arc::new(AtomicU64::new(0)),
            aggregator_occupancy_raw: Arc::new(AtomicU64::new(0)),
        })
    }

    pub fn record_dispatch(&self, failed: bool) {
        self.dispatch_total.inc();
        if failed {
            self.dispatch_failed_total.inc();
        }
    }

    pub fn record_sampler_tick_failure(&self) {
        self.sampler_tick_failures_total.inc();
    }

    pub fn set_active_workers(&self, count: u64) {
        self.active_workers_raw.store(count, Ordering::Relaxed);
    }

    pub fn set_aggregator_occupancy(&self, count: u64) {
        self.aggregator_occupancy_raw.store(count, Ordering::Relaxed);
    }

    /// Renders the current registry (after syncing the raw-atomic gauges) as
    /// Prometheus text exposition format.
    fn render(&self) -> Vec<u8> {
        self.active_workers
            .set(self.active_workers_raw.load(Ordering::Relaxed) as i64);
        self.aggregator_occupancy
            .set(self.aggregator_occupancy_raw.load(Ordering::Relaxed) as i64);

        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        if let Err(err) = encoder.encode(&metric_families, &mut buffer) {
            error!(%err, "failed to encode prometheus metrics");
        }
        buffer
    }
}

impl Default for EngineMetrics {
    fn default() -> Self {
        Self::new().expect("static metric registration cannot fail")
    }
}

async fn serve(req: Request<Body>, metrics: Arc<EngineMetrics>) -> Result<Response<Body>, Infallible> {
    if req.uri().path() != "/metrics" {
        return Ok(Response::builder()
            .status(404)
            .body(Body::from("not found"))
            .unwrap());
    }

    let buffer = metrics.render();
    Ok(Response::builder()
        .status(200)
        .header("Content-Type", TextEncoder::new().format_type())
        .body(Body::from(buffer))
        .unwrap())
}

/// Spawns the `/metrics` endpoint on `addr` and returns its task handle. The
/// caller owns cancellation by aborting the returned handle (the engine has
/// no graceful-shutdown signal for this server; it dies with the process).
pub fn spawn(addr: SocketAddr, metrics: Arc<EngineMetrics>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let make_svc = make_service_fn(move |_conn| {
            let metrics = metrics.clone();
            async move { Ok::<_, Infallible>(service_fn(move |req| serve(req, metrics.clone()))) }
        });

        let server = Server::bind(&addr).serve(make_svc);
        info!(%addr, "metrics server listening");
        if let Err(err) = server.await {
            error!(%err, "metrics server exited with error");
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_registers_without_error() {
        assert!(EngineMetrics::new().is_ok());
    }

    #[test]
    fn render_includes_registered_metric_names() {
        let metrics = EngineMetrics::new().unwrap();
        metrics.record_dispatch(false);
        metrics.record_dispatch(true);
        metrics.set_active_workers(4);
        metrics.set_aggregator_occupancy(128);

        let text = String::from_utf8(metrics.render()).unwrap();
        assert!(text.contains("loadtest_dispatch_total"));
        assert!(text.contains("loadtest_dispatch_failed_total"));
        assert!(text.contains("loadtest_active_workers 4"));
        assert!(text.contains("loadtest_aggregator_reservoir_occupancy 128"));
    }

    #[test]
    fn dispatch_counters_are_monotonic() {
        let metrics = EngineMetrics::new().unwrap();
        for _ in 0..10 {
            metrics.record_dispatch(false);
        }
        let text = String::from_utf8(metrics.render()).unwrap();
        assert!(text.contains("loadtest_dispatch_total 10"));
        assert!(text.contains("loadtest_dispatch_failed_total 0"));
    }

    #[tokio::test]
    async fn serve_returns_404_for_unknown_path() {
        let metrics = Arc::new(EngineMetrics::new().unwrap());
        let req = Request::builder()
            .uri("/other")
            .body(Body::empty())
            .unwrap();
        let resp = serve(req, metrics).await.unwrap();
        assert_eq!(resp.status(), 404);
    }

    #[tokio::test]
    async fn serve_returns_200_for_metrics_path() {
        let metrics = Arc::new(EngineMetrics::new().unwrap());
        let req = Request::builder()
            .uri("/metrics")
            .body(Body::empty())
            .unwrap();
        let resp = serve(req, metrics).await.unwrap();
        assert_eq!(resp.status(), 200);
    }
}

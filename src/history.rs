//! History store (C6): persists `RunResult` records and answers the
//! recency/range/baseline queries the deviation analyzer (C7) and any
//! reporting collaborator need.
//!
//! Two backends satisfy the same `HistoryStore` trait, matching §4.6's "two
//! backends specified": `InMemoryHistoryStore` (the default, a
//! `RwLock<HashMap<String, Vec<HistoryRecord>>>` keyed by test name) and
//! `SqlBackedHistoryStore`, a relational backend against the §6.2 schema that
//! delegates every statement to an externally-supplied `SqlHistoryExecutor`
//! (the engine ships no concrete driver, mirroring `adapters.rs`'s
//! `SqlAdapter`). The in-memory backend is what the orchestrator uses unless
//! a durable store is wired in; swapping backends never touches C5 or C7,
//! since both only see the `HistoryStore` trait.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

use crate::orchestrator::{Impact, RunResult, RunStatus};

/// Errors raised while writing or reading history. `cleanup` failures are
/// logged and swallowed by the caller per §7 — they are never fatal to a run.
#[derive(Error, Debug)]
pub enum HistoryError {
    #[error("history backend error: {0}")]
    Backend(String),
}

/// A projection of `RunResult` sufficient for baseline computation and
/// trend analysis; keyed by test name with a secondary index on execution
/// date. Mirrors the §6.2 persisted schema column-for-column.
#[derive(Debug, Clone, PartialEq)]
pub struct HistoryRecord {
    pub id: Uuid,
    pub test_name: String,
    pub execution_date: DateTime<Utc>,
    pub duration_seconds: f64,
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    pub error_rate_percent: f64,
    pub average_response_time_ms: f64,
    pub min_response_time_ms: f64,
    pub max_response_time_ms: f64,
    pub p95_response_time_ms: f64,
    pub p99_response_time_ms: f64,
    pub requests_per_second: f64,
    pub cpu_usage_percent: f64,
    pub memory_usage_percent: f64,
    pub performance_impact: Impact,
    pub status: RunStatus,
}

impl HistoryRecord {
    pub fn from_run_result(result: &RunResult) -> Self {
        Self {
            id: result.id,
            test_name: result.test_name.clone(),
            execution_date: result.start,
            duration_seconds: result.duration_seconds,
            total_requests: result.total_requests,
            successful_requests: result.successful_requests,
            failed_requests: result.failed_requests,
            error_rate_percent: result.error_rate_percent,
            average_response_time_ms: result.latency.avg_ms,
            min_response_time_ms: result.latency.min_ms,
            max_response_time_ms: result.latency.max_ms,
            p95_response_time_ms: result.latency.p95_ms,
            p99_response_time_ms: result.latency.p99_ms,
            requests_per_second: result.requests_per_second,
            cpu_usage_percent: result.host.avg_cpu_percent,
            memory_usage_percent: result.host.avg_mem_percent,
            performance_impact: result.impact,
            status: result.status,
        }
    }
}

/// Persistence surface both backends implement identically.
pub trait HistoryStore: Send + Sync {
    fn append(&self, result: &RunResult) -> Result<HistoryRecord, HistoryError>;
    fn list_by_test(&self, name: &str) -> Result<Vec<HistoryRecord>, HistoryError>;
    /// Newest first, at most `n`.
    fn recent(&self, name: &str, n: usize) -> Result<Vec<HistoryRecord>, HistoryError>;
    fn by_range(
        &self,
        name: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<HistoryRecord>, HistoryError>;
    /// `None` if fewer than 3 Completed records exist for `name`; otherwise a
    /// synthetic record whose numeric fields are arithmetic means over the
    /// most recent `sample_size` Completed records, and whose `performance_impact`
    /// is the modal value among them.
    fn baseline(&self, name: &str, sample_size: usize) -> Result<Option<HistoryRecord>, HistoryError>;
    /// Deletes records older than `now - retention_days`; returns the count removed.
    fn cleanup(&self, retention_days: u32) -> Result<usize, HistoryError>;
}

/// The default in-memory backend. Single-writer (the orchestrator),
/// concurrent-reader, per §5's shared-resource policy.
#[derive(Default)]
pub struct InMemoryHistoryStore {
    records: RwLock<HashMap<String, Vec<HistoryRecord>>>,
}

impl InMemoryHistoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl HistoryStore for InMemoryHistoryStore {
    fn append(&self, result: &RunResult) -> Result<HistoryRecord, HistoryError> {
        let record = HistoryRecord::from_run_result(result);
        let mut guard = self
            .records
            .write()
            .map_err(|_| HistoryError::Backend("history lock poisoned".into()))?;
        guard.entry(record.test_name.clone()).or_default().push(record.clone());
        Ok(record)
    }

    fn list_by_test(&self, name: &str) -> Result<Vec<HistoryRecord>, HistoryError> {
        let guard = self
            .records
            .read()
            .map_err(|_| HistoryError::Backend("history lock poisoned".into()))?;
        Ok(guard.get(name).cloned().unwrap_or_default())
    }

    fn recent(&self, name: &str, n: usize) -> Result<Vec<HistoryRecord>, HistoryError> {
        let mut all = self.list_by_test(name)?;
        all.sort_by(|a, b| b.execution_date.cmp(&a.execution_date));
        all.truncate(n);
        Ok(all)
    }

    fn by_range(
        &self,
        name: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<HistoryRecord>, HistoryError> {
        let all = self.list_by_test(name)?;
        Ok(all
            .into_iter()
            .filter(|r| r.execution_date >= from && r.execution_date <= to)
            .collect())
    }

    fn baseline(&self, name: &str, sample_size: usize) -> Result<Option<HistoryRecord>, HistoryError> {
        let mut completed: Vec<HistoryRecord> = self
            .list_by_test(name)?
            .into_iter()
            .filter(|r| r.status == RunStatus::Completed)
            .collect();
        if completed.len() < 3 {
            return Ok(None);
        }
        completed.sort_by(|a, b| b.execution_date.cmp(&a.execution_date));
        completed.truncate(sample_size.max(3));

        Ok(Some(synthesize_baseline(name, &completed)))
    }

    fn cleanup(&self, retention_days: u32) -> Result<usize, HistoryError> {
        let cutoff = Utc::now() - chrono::Duration::days(retention_days as i64);
        let mut guard = self
            .records
            .write()
            .map_err(|_| HistoryError::Backend("history lock poisoned".into()))?;
        let mut removed = 0usize;
        for records in guard.values_mut() {
            let before = records.len();
            records.retain(|r| r.execution_date >= cutoff);
            removed += before - records.len();
        }
        Ok(removed)
    }
}

/// A narrow SQL execution surface against the §6.2 schema. The engine ships
/// no concrete implementation — callers wire in whatever database client
/// their deployment uses and hand `SqlBackedHistoryStore` a `Box<dyn
/// SqlHistoryExecutor>`. Mirrors `adapters.rs`'s `SqlAdapter`: an
/// externally-supplied collaborator, not a bundled driver.
#[async_trait]
pub trait SqlHistoryExecutor: Send + Sync {
    async fn insert(&self, record: &HistoryRecord) -> Result<(), HistoryError>;
    async fn select_by_test(&self, test_name: &str) -> Result<Vec<HistoryRecord>, HistoryError>;
    async fn select_by_range(
        &self,
        test_name: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<HistoryRecord>, HistoryError>;
    async fn delete_older_than(&self, cutoff: DateTime<Utc>) -> Result<usize, HistoryError>;
}

/// Relational backend. `HistoryStore` is a synchronous trait (the
/// orchestrator calls it from within an async context without awaiting it),
/// so each method steps off the async task via `block_in_place` before
/// driving the executor's async statements to completion — the same
/// off-thread-blocking shape `sampler.rs` uses for its `/proc` reads, just
/// via `block_in_place` rather than `spawn_blocking` since the call must
/// still run on the current worker thread to reuse `&self`.
pub struct SqlBackedHistoryStore {
    executor: Arc<dyn SqlHistoryExecutor>,
}

impl SqlBackedHistoryStore {
    pub fn new(executor: Arc<dyn SqlHistoryExecutor>) -> Self {
        Self { executor }
    }

    fn block_on<F: std::future::Future>(fut: F) -> F::Output {
        tokio::task::block_in_place(|| tokio::runtime::Handle::current().block_on(fut))
    }
}

impl HistoryStore for SqlBackedHistoryStore {
    fn append(&self, result: &RunResult) -> Result<HistoryRecord, HistoryError> {
        let record = HistoryRecord::from_run_result(result);
        Self::block_on(self.executor.insert(&record))?;
        Ok(record)
    }

    fn list_by_test(&self, name: &str) -> Result<Vec<HistoryRecord>, HistoryError> {
        Self::block_on(self.executor.select_by_test(name))
    }

    fn recent(&self, name: &str, n: usize) -> Result<Vec<HistoryRecord>, HistoryError> {
        let mut all = self.list_by_test(name)?;
        all.sort_by(|a, b| b.execution_date.cmp(&a.execution_date));
        all.truncate(n);
        Ok(all)
    }

    fn by_range(
        &self,
        name: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<HistoryRecord>, HistoryError> {
        Self::block_on(self.executor.select_by_range(name, from, to))
    }

    fn baseline(&self, name: &str, sample_size: usize) -> Result<Option<HistoryRecord>, HistoryError> {
        let mut completed: Vec<HistoryRecord> = self
            .list_by_test(name)?
            .into_iter()
            .filter(|r| r.status == RunStatus::Completed)
            .collect();
        if completed.len() < 3 {
            return Ok(None);
        }
        completed.sort_by(|a, b| b.execution_date.cmp(&a.execution_date));
        completed.truncate(sample_size.max(3));

        Ok(Some(synthesize_baseline(name, &completed)))
    }

    fn cleanup(&self, retention_days: u32) -> Result<usize, HistoryError> {
        let cutoff = Utc::now() - chrono::Duration::days(retention_days as i64);
        Self::block_on(self.executor.delete_older_than(cutoff))
    }
}

/// Arithmetic means over numeric fields, modal value over `performance_impact`.
fn synthesize_baseline(name: &str, records: &[HistoryRecord]) -> HistoryRecord {
    let n = records.len() as f64;
    let mean = |f: fn(&HistoryRecord) -> f64| records.iter().map(f).sum::<f64>() / n;
    let mean_u64 = |f: fn(&HistoryRecord) -> u64| {
        (records.iter().map(|r| f(r) as f64).sum::<f64>() / n).round() as u64
    };

    let mut impact_counts: HashMap<Impact, usize> = HashMap::new();
    for r in records {
        *impact_counts.entry(r.performance_impact).or_insert(0) += 1;
    }
    let modal_impact = impact_counts
        .into_iter()
        .max_by_key(|(_, count)| *count)
        .map(|(impact, _)| impact)
        .unwrap_or(Impact::None);

    HistoryRecord {
        id: Uuid::nil(),
        test_name: name.to_string(),
        execution_date: records[0].execution_date,
        duration_seconds: mean(|r| r.duration_seconds),
        total_requests: mean_u64(|r| r.total_requests),
        successful_requests: mean_u64(|r| r.successful_requests),
        failed_requests: mean_u64(|r| r.failed_requests),
        error_rate_percent: mean(|r| r.error_rate_percent),
        average_response_time_ms: mean(|r| r.average_response_time_ms),
        min_response_time_ms: mean(|r| r.min_response_time_ms),
        max_response_time_ms: mean(|r| r.max_response_time_ms),
        p95_response_time_ms: mean(|r| r.p95_response_time_ms),
        p99_response_time_ms: mean(|r| r.p99_response_time_ms),
        requests_per_second: mean(|r| r.requests_per_second),
        cpu_usage_percent: mean(|r| r.cpu_usage_percent),
        memory_usage_percent: mean(|r| r.memory_usage_percent),
        performance_impact: modal_impact,
        status: RunStatus::Completed,
    }
}

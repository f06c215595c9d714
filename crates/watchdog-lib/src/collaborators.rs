//! Interfaces to the systems the monitoring core depends on
//!
//! The engine never talks to a cluster, a metrics backend or a database
//! directly. Everything external is reached through these traits:
//! - `Collector` turns a cluster plus metrics endpoint into snapshots
//! - `ConnectivityManager` owns the tunnels that expose metrics endpoints
//! - `BaselineCollector` summarises recent history before a stress test
//! - `Comparator` grades live snapshots against a baseline
//! - `PersistenceSink` stores snapshots, baselines and stress results

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::anomaly::{Anomaly, AnomalyType};
use crate::config::ScanTarget;
use crate::models::{Baseline, HpaKey, Snapshot, StressTestMetrics};

/// Output of one collection pass over one target
#[derive(Debug, Clone, Default)]
pub struct ScanResult {
    pub snapshots: Vec<Snapshot>,
    /// Anomalies the collector itself raised
    pub anomalies: Vec<Anomaly>,
    /// Non-fatal per-HPA collection errors
    pub errors: Vec<String>,
    pub duration: Duration,
}

/// Produces snapshots for one target
#[async_trait]
pub trait Collector: Send + Sync {
    /// Scan every HPA selected by `target` using the metrics backend at `endpoint`
    async fn scan(&self, target: &ScanTarget, endpoint: &str) -> anyhow::Result<ScanResult>;
}

/// Lifecycle of per-cluster metrics backend tunnels
#[async_trait]
pub trait ConnectivityManager: Send + Sync {
    async fn start(&self, cluster: &str) -> anyhow::Result<()>;

    async fn stop_all(&self) -> anyhow::Result<()>;

    /// Local endpoint for `cluster`, `None` while unavailable
    fn url(&self, cluster: &str) -> Option<String>;
}

/// Captures pre-test reference values
#[async_trait]
pub trait BaselineCollector: Send + Sync {
    async fn capture_baseline(
        &self,
        target: &ScanTarget,
        endpoint: &str,
        lookback: Duration,
    ) -> anyhow::Result<Baseline>;
}

/// Health classification of an HPA relative to its baseline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComparisonStatus {
    Normal,
    Degraded,
    Critical,
}

/// One problem found while comparing against the baseline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComparisonIssue {
    pub issue_type: AnomalyType,
    pub status: ComparisonStatus,
    pub message: String,
}

/// Live snapshot graded against its baseline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComparisonResult {
    pub key: HpaKey,
    pub timestamp: DateTime<Utc>,
    pub status: ComparisonStatus,

    pub cpu_current: f64,
    pub cpu_baseline: Option<f64>,
    pub memory_current: f64,
    pub memory_baseline: Option<f64>,
    pub replicas_current: i32,
    pub replicas_baseline: Option<i32>,
    pub error_rate: Option<f64>,
    pub p95_latency_ms: Option<f64>,

    pub issues: Vec<ComparisonIssue>,
}

/// Aggregate of one comparison pass
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ComparisonSummary {
    pub total_hpas: usize,
    pub normal_count: usize,
    pub degraded_count: usize,
    pub critical_count: usize,
    pub health_percentage: f64,
}

/// Compares live snapshots against a captured baseline
pub trait Comparator: Send + Sync {
    fn compare_multiple(&self, snapshots: &[Snapshot]) -> Vec<ComparisonResult>;

    fn summary(&self, results: &[ComparisonResult]) -> ComparisonSummary;
}

/// Builds a comparator once a baseline exists
pub trait ComparatorFactory: Send + Sync {
    fn create(&self, baseline: Baseline) -> Box<dyn Comparator>;
}

/// Durable storage; every call is best-effort from the engine's point of view
#[async_trait]
pub trait PersistenceSink: Send + Sync {
    async fn save_snapshot(&self, snapshot: &Snapshot) -> anyhow::Result<()>;

    async fn save_baseline(&self, test_id: &str, baseline: &Baseline) -> anyhow::Result<()>;

    async fn save_stress_result(
        &self,
        test_id: &str,
        metrics: &StressTestMetrics,
    ) -> anyhow::Result<()>;
}

//! Core data models for the HPA watchdog

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use crate::anomaly::AnomalyType;

/// Identity of a monitored HPA
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct HpaKey {
    pub cluster: String,
    pub namespace: String,
    pub name: String,
}

impl HpaKey {
    pub fn new(
        cluster: impl Into<String>,
        namespace: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            cluster: cluster.into(),
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for HpaKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.cluster, self.namespace, self.name)
    }
}

/// Where the metrics of a snapshot came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataSource {
    /// Kubernetes resource metrics API only
    #[default]
    MetricsServer,
    /// Metrics backend (Prometheus), carries extended metrics
    Prometheus,
}

/// One observation of one HPA at one instant
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub cluster: String,
    pub namespace: String,
    pub name: String,
    /// Scale target of the HPA, when the collector resolves it
    #[serde(default)]
    pub deployment: Option<String>,
    pub timestamp: DateTime<Utc>,

    pub min_replicas: i32,
    pub max_replicas: i32,
    pub current_replicas: i32,
    pub desired_replicas: i32,

    /// CPU utilisation in percent of request
    pub cpu_current: f64,
    /// CPU target utilisation in percent, 0 when the HPA has no CPU target
    pub cpu_target: i32,
    pub memory_current: f64,
    pub memory_target: i32,

    #[serde(default)]
    pub request_rate: Option<f64>,
    /// Percentage of 5xx responses
    #[serde(default)]
    pub error_rate: Option<f64>,
    #[serde(default)]
    pub p95_latency_ms: Option<f64>,
    #[serde(default)]
    pub network_rx_bytes: Option<u64>,
    #[serde(default)]
    pub network_tx_bytes: Option<u64>,

    pub ready: bool,
    pub scaling_active: bool,
    #[serde(default)]
    pub last_scale_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub data_source: DataSource,
}

impl Snapshot {
    /// Build a snapshot with neutral metric values, mostly useful for tests
    /// and replay tooling
    pub fn new(key: &HpaKey, timestamp: DateTime<Utc>) -> Self {
        Self {
            cluster: key.cluster.clone(),
            namespace: key.namespace.clone(),
            name: key.name.clone(),
            deployment: None,
            timestamp,
            min_replicas: 1,
            max_replicas: 1,
            current_replicas: 1,
            desired_replicas: 1,
            cpu_current: 0.0,
            cpu_target: 0,
            memory_current: 0.0,
            memory_target: 0,
            request_rate: None,
            error_rate: None,
            p95_latency_ms: None,
            network_rx_bytes: None,
            network_tx_bytes: None,
            ready: true,
            scaling_active: false,
            last_scale_time: None,
            data_source: DataSource::MetricsServer,
        }
    }

    pub fn key(&self) -> HpaKey {
        HpaKey::new(&self.cluster, &self.namespace, &self.name)
    }

    /// Percentage points of CPU above (positive) or below target
    pub fn cpu_deviation(&self) -> f64 {
        self.cpu_current - f64::from(self.cpu_target)
    }

    pub fn is_maxed_out(&self) -> bool {
        self.current_replicas >= self.max_replicas
    }
}

/// Pre-test reference values for one HPA
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HpaBaseline {
    pub key: HpaKey,
    pub min_replicas: i32,
    pub max_replicas: i32,
    pub replicas: i32,
    pub cpu_avg: f64,
    pub cpu_max: f64,
    pub cpu_target: i32,
    pub memory_avg: f64,
    pub memory_max: f64,
    #[serde(default)]
    pub error_rate_avg: Option<f64>,
    #[serde(default)]
    pub p95_latency_avg: Option<f64>,
}

impl HpaBaseline {
    /// Summarise a run of snapshots of one HPA, `None` when empty
    pub fn from_snapshots(snapshots: &[Snapshot]) -> Option<Self> {
        let last = snapshots.last()?;
        let n = snapshots.len() as f64;

        let cpu_avg = snapshots.iter().map(|s| s.cpu_current).sum::<f64>() / n;
        let cpu_max = snapshots.iter().map(|s| s.cpu_current).fold(f64::MIN, f64::max);
        let memory_avg = snapshots.iter().map(|s| s.memory_current).sum::<f64>() / n;
        let memory_max = snapshots
            .iter()
            .map(|s| s.memory_current)
            .fold(f64::MIN, f64::max);

        Some(Self {
            key: last.key(),
            min_replicas: last.min_replicas,
            max_replicas: last.max_replicas,
            replicas: last.current_replicas,
            cpu_avg,
            cpu_max,
            cpu_target: last.cpu_target,
            memory_avg,
            memory_max,
            error_rate_avg: mean(snapshots.iter().filter_map(|s| s.error_rate)),
            p95_latency_avg: mean(snapshots.iter().filter_map(|s| s.p95_latency_ms)),
        })
    }
}

fn mean(values: impl Iterator<Item = f64>) -> Option<f64> {
    let (sum, count) = values.fold((0.0, 0usize), |(sum, count), v| (sum + v, count + 1));
    (count > 0).then(|| sum / count as f64)
}

/// Aggregate system state captured before a stress test
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Baseline {
    pub captured_at: DateTime<Utc>,
    pub lookback_secs: u64,
    pub total_hpas: usize,
    pub total_replicas: i64,
    /// Keyed by `HpaKey` display form
    pub hpa_baselines: HashMap<String, HpaBaseline>,
}

impl Baseline {
    pub fn empty(captured_at: DateTime<Utc>, lookback: Duration) -> Self {
        Self {
            captured_at,
            lookback_secs: lookback.as_secs(),
            total_hpas: 0,
            total_replicas: 0,
            hpa_baselines: HashMap::new(),
        }
    }

    /// Add one HPA, updating the totals
    pub fn insert(&mut self, hpa: HpaBaseline) {
        self.total_hpas += 1;
        self.total_replicas += i64::from(hpa.replicas);
        self.hpa_baselines.insert(hpa.key.to_string(), hpa);
    }

    /// Fold another cluster's baseline into this one
    pub fn merge(&mut self, other: Baseline) {
        self.total_hpas += other.total_hpas;
        self.total_replicas += other.total_replicas;
        self.hpa_baselines.extend(other.hpa_baselines);
    }

    pub fn get(&self, key: &HpaKey) -> Option<&HpaBaseline> {
        self.hpa_baselines.get(&key.to_string())
    }
}

/// Lifecycle of a stress test run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StressTestStatus {
    Running,
    Completed,
    Failed,
}

/// Overall verdict of a finished stress test
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TestResult {
    Pass,
    Fail,
}

/// Issue severity buckets for stress test reporting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IssueSeverity {
    Info,
    Warning,
    Critical,
}

/// One categorized problem observed during a stress test
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StressIssue {
    pub hpa: String,
    pub issue_type: AnomalyType,
    pub severity: IssueSeverity,
    pub message: String,
    pub detected_at: DateTime<Utc>,
}

/// Peak observations over the course of a stress test
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PeakMetrics {
    pub max_cpu_percent: f64,
    pub max_cpu_hpa: String,
    pub max_cpu_time: Option<DateTime<Utc>>,

    pub max_memory_percent: f64,
    pub max_memory_hpa: String,
    pub max_memory_time: Option<DateTime<Utc>>,

    pub max_error_rate: f64,
    pub max_error_rate_hpa: String,
    pub max_error_rate_time: Option<DateTime<Utc>>,

    pub max_latency_ms: f64,
    pub max_latency_hpa: String,
    pub max_latency_time: Option<DateTime<Utc>>,

    pub total_replicas_pre: i64,
    pub total_replicas_peak: i64,
    pub total_replicas_post: i64,
    pub replica_increase: i64,
    /// Replica increase relative to the pre-test total, in percent
    pub replica_increase_percent: f64,
}

/// Accumulated result of one stress test run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StressTestMetrics {
    pub test_id: String,
    pub test_name: String,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub duration_secs: u64,
    pub status: StressTestStatus,
    pub scan_interval_secs: u64,

    pub total_scans: u64,
    pub total_clusters: usize,
    pub total_hpas: usize,
    pub total_hpas_monitored: usize,
    pub total_hpas_with_issues: usize,

    pub peak_metrics: PeakMetrics,

    pub critical_issues: Vec<StressIssue>,
    pub warning_issues: Vec<StressIssue>,
    pub info_issues: Vec<StressIssue>,
}

impl StressTestMetrics {
    pub fn new(
        test_id: impl Into<String>,
        start_time: DateTime<Utc>,
        scan_interval: Duration,
    ) -> Self {
        Self {
            test_id: test_id.into(),
            test_name: format!("Stress Test {}", start_time.format("%Y-%m-%d %H:%M:%S")),
            start_time,
            end_time: None,
            duration_secs: 0,
            status: StressTestStatus::Running,
            scan_interval_secs: scan_interval.as_secs(),
            total_scans: 0,
            total_clusters: 0,
            total_hpas: 0,
            total_hpas_monitored: 0,
            total_hpas_with_issues: 0,
            peak_metrics: PeakMetrics::default(),
            critical_issues: Vec::new(),
            warning_issues: Vec::new(),
            info_issues: Vec::new(),
        }
    }

    /// Close the run at `end_time`
    pub fn complete(&mut self, end_time: DateTime<Utc>, status: StressTestStatus) {
        self.end_time = Some(end_time);
        self.duration_secs = (end_time - self.start_time).num_seconds().max(0) as u64;
        self.status = status;
    }

    pub fn health_percentage(&self) -> f64 {
        if self.total_hpas == 0 {
            return 100.0;
        }
        let healthy = self.total_hpas.saturating_sub(self.total_hpas_with_issues);
        healthy as f64 / self.total_hpas as f64 * 100.0
    }

    pub fn test_result(&self) -> TestResult {
        if self.critical_issues.is_empty() && self.health_percentage() >= 90.0 {
            TestResult::Pass
        } else {
            TestResult::Fail
        }
    }
}

//! Anomaly records produced by detection

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

use crate::cache::Stats;
use crate::models::{HpaKey, Snapshot};

/// Alert severity levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Info => write!(f, "info"),
            Severity::Warning => write!(f, "warning"),
            Severity::Critical => write!(f, "critical"),
        }
    }
}

/// Anomaly classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AnomalyType {
    /// Replica count flapping inside the window
    Oscillation,
    /// Pinned at max replicas with CPU well above target
    MaxedOut,
    PodsNotReady,
    HighErrorRate,

    // Raised by baseline comparison during stress tests
    CpuSpike,
    MemorySpike,
    ReplicaSpike,
    ErrorRateSpike,
    LatencySpike,
}

impl AnomalyType {
    pub fn is_stress_spike(&self) -> bool {
        matches!(
            self,
            AnomalyType::CpuSpike
                | AnomalyType::MemorySpike
                | AnomalyType::ReplicaSpike
                | AnomalyType::ErrorRateSpike
                | AnomalyType::LatencySpike
        )
    }

    /// Stable label used for metrics and log fields
    pub fn as_str(&self) -> &'static str {
        match self {
            AnomalyType::Oscillation => "oscillation",
            AnomalyType::MaxedOut => "maxed_out",
            AnomalyType::PodsNotReady => "pods_not_ready",
            AnomalyType::HighErrorRate => "high_error_rate",
            AnomalyType::CpuSpike => "cpu_spike",
            AnomalyType::MemorySpike => "memory_spike",
            AnomalyType::ReplicaSpike => "replica_spike",
            AnomalyType::ErrorRateSpike => "error_rate_spike",
            AnomalyType::LatencySpike => "latency_spike",
        }
    }
}

impl fmt::Display for AnomalyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A detected anomaly with context and remediation hints
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Anomaly {
    pub anomaly_type: AnomalyType,
    pub severity: Severity,
    pub key: HpaKey,
    pub timestamp: DateTime<Utc>,
    pub message: String,
    pub description: String,
    /// Snapshot that triggered the anomaly
    pub snapshot: Snapshot,
    /// Window statistics at detection time, when available
    pub stats: Option<Stats>,
    pub actions: Vec<String>,
}

/// Output of one detection pass
#[derive(Debug, Clone)]
pub struct DetectionResult {
    pub anomalies: Vec<Anomaly>,
    /// Number of HPAs examined
    pub checked: usize,
    pub timestamp: DateTime<Utc>,
}

impl DetectionResult {
    pub fn count_by_type(&self) -> HashMap<AnomalyType, usize> {
        let mut counts = HashMap::new();
        for anomaly in &self.anomalies {
            *counts.entry(anomaly.anomaly_type).or_insert(0) += 1;
        }
        counts
    }

    pub fn by_severity(&self, severity: Severity) -> Vec<&Anomaly> {
        self.anomalies
            .iter()
            .filter(|a| a.severity == severity)
            .collect()
    }

    pub fn by_cluster(&self, cluster: &str) -> Vec<&Anomaly> {
        self.anomalies
            .iter()
            .filter(|a| a.key.cluster == cluster)
            .collect()
    }
}

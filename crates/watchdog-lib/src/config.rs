//! Scan configuration

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use crate::error::EngineError;
use crate::models::Snapshot;

/// What the engine is scanning for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanMode {
    /// Every HPA in every selected cluster
    #[default]
    Full,
    /// Hand-picked namespaces, deployments or HPAs
    Individual,
    /// Baseline capture followed by a bounded observation run
    StressTest,
}

impl fmt::Display for ScanMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScanMode::Full => write!(f, "full"),
            ScanMode::Individual => write!(f, "individual"),
            ScanMode::StressTest => write!(f, "stress_test"),
        }
    }
}

/// A cluster plus optional narrowing filters
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ScanTarget {
    pub cluster: String,
    #[serde(default)]
    pub namespaces: Vec<String>,
    #[serde(default)]
    pub deployments: Vec<String>,
    #[serde(default)]
    pub hpas: Vec<String>,
}

impl ScanTarget {
    pub fn cluster(name: impl Into<String>) -> Self {
        Self {
            cluster: name.into(),
            ..Default::default()
        }
    }

    /// Whether `snapshot` passes every filter of this target
    ///
    /// A deployment filter only selects snapshots whose scale target is known.
    pub fn matches(&self, snapshot: &Snapshot) -> bool {
        let namespace_ok =
            self.namespaces.is_empty() || self.namespaces.iter().any(|n| *n == snapshot.namespace);
        let deployment_ok = self.deployments.is_empty()
            || snapshot
                .deployment
                .as_deref()
                .is_some_and(|d| self.deployments.iter().any(|wanted| wanted == d));
        let hpa_ok = self.hpas.is_empty() || self.hpas.iter().any(|h| *h == snapshot.name);
        namespace_ok && deployment_ok && hpa_ok
    }
}

/// Configuration for one engine run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanConfig {
    pub mode: ScanMode,
    pub targets: Vec<ScanTarget>,
    /// Time between scan cycles
    pub interval: Duration,
    /// Total run time, zero for unbounded
    #[serde(default)]
    pub duration: Duration,
}

impl ScanConfig {
    pub fn new(mode: ScanMode, targets: Vec<ScanTarget>, interval: Duration) -> Self {
        Self {
            mode,
            targets,
            interval,
            duration: Duration::ZERO,
        }
    }

    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = duration;
        self
    }

    pub fn is_stress_test(&self) -> bool {
        self.mode == ScanMode::StressTest
    }

    /// Expected number of ticks for a bounded run, zero when unbounded
    pub fn estimate_scans(&self) -> u64 {
        if self.duration.is_zero() || self.interval.is_zero() {
            return 0;
        }
        (self.duration.as_millis() / self.interval.as_millis()) as u64
    }

    pub fn validate(&self) -> Result<(), EngineError> {
        if self.targets.is_empty() {
            return Err(EngineError::InvalidConfig(
                "at least one scan target is required".to_string(),
            ));
        }
        if self.interval.is_zero() {
            return Err(EngineError::InvalidConfig(
                "scan interval must be greater than zero".to_string(),
            ));
        }
        if let Some(target) = self.targets.iter().find(|t| t.cluster.is_empty()) {
            return Err(EngineError::InvalidConfig(format!(
                "scan target has an empty cluster name: {:?}",
                target
            )));
        }
        Ok(())
    }
}

/// Tunables of the engine itself
#[derive(Debug, Clone)]
pub struct EngineOptions {
    /// Upper bound on one target's collection call
    pub target_timeout: Duration,
    /// Upper bound on one target's baseline capture
    pub baseline_timeout: Duration,
    /// History window requested for the baseline
    pub baseline_lookback: Duration,
    /// Capacity of the snapshot output stream
    pub snapshot_buffer: usize,
    /// Capacity of the anomaly output stream
    pub anomaly_buffer: usize,
    /// Capacity of the stress result stream
    pub stress_result_buffer: usize,
    /// Pause between stop and start on restart
    pub restart_delay: Duration,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            target_timeout: Duration::from_secs(2 * 60),
            baseline_timeout: Duration::from_secs(5 * 60),
            baseline_lookback: Duration::from_secs(30 * 60),
            snapshot_buffer: 1000,
            anomaly_buffer: 100,
            stress_result_buffer: 1,
            restart_delay: Duration::from_millis(200),
        }
    }
}

//! Baseline comparison for stress tests
//!
//! Grades each live snapshot against the HPA's pre-test baseline:
//! - CPU and memory deviation from the baseline average
//! - Replica growth relative to baseline replicas
//! - Error rate and P95 latency where the metrics backend provides them
//!
//! HPAs that were not part of the baseline are graded against their own
//! CPU target.

use super::types::AnomalyType;
use crate::collaborators::{
    Comparator, ComparatorFactory, ComparisonIssue, ComparisonResult, ComparisonStatus,
    ComparisonSummary,
};
use crate::models::{Baseline, HpaBaseline, Snapshot};

/// Grading thresholds
#[derive(Debug, Clone, PartialEq)]
pub struct ComparatorThresholds {
    /// CPU points above baseline that mark an HPA degraded
    pub cpu_degraded_delta: f64,
    /// CPU points above baseline that mark an HPA critical
    pub cpu_critical_delta: f64,
    pub memory_degraded_delta: f64,
    /// Replica multiple of baseline that marks an HPA degraded
    pub replica_degraded_factor: f64,
    /// Error rate in percent
    pub error_rate_degraded: f64,
    pub error_rate_critical: f64,
    /// Latency multiple of baseline that marks an HPA degraded
    pub latency_degraded_factor: f64,
}

impl Default for ComparatorThresholds {
    fn default() -> Self {
        Self {
            cpu_degraded_delta: 30.0,
            cpu_critical_delta: 50.0,
            memory_degraded_delta: 30.0,
            replica_degraded_factor: 1.5,
            error_rate_degraded: 1.0,
            error_rate_critical: 5.0,
            latency_degraded_factor: 2.0,
        }
    }
}

/// Comparator over a captured baseline
pub struct BaselineComparator {
    baseline: Baseline,
    thresholds: ComparatorThresholds,
}

impl BaselineComparator {
    pub fn new(baseline: Baseline) -> Self {
        Self::with_thresholds(baseline, ComparatorThresholds::default())
    }

    pub fn with_thresholds(baseline: Baseline, thresholds: ComparatorThresholds) -> Self {
        Self {
            baseline,
            thresholds,
        }
    }

    pub fn baseline(&self) -> &Baseline {
        &self.baseline
    }

    pub fn compare(&self, snapshot: &Snapshot) -> ComparisonResult {
        let key = snapshot.key();
        let reference = self.baseline.get(&key);

        let mut issues = Vec::new();
        self.check_cpu(snapshot, reference, &mut issues);
        self.check_memory(snapshot, reference, &mut issues);
        self.check_replicas(snapshot, reference, &mut issues);
        self.check_error_rate(snapshot, &mut issues);
        self.check_latency(snapshot, reference, &mut issues);

        let status = issues
            .iter()
            .map(|i| i.status)
            .max()
            .unwrap_or(ComparisonStatus::Normal);

        ComparisonResult {
            key,
            timestamp: snapshot.timestamp,
            status,
            cpu_current: snapshot.cpu_current,
            cpu_baseline: reference.map(|b| b.cpu_avg),
            memory_current: snapshot.memory_current,
            memory_baseline: reference.map(|b| b.memory_avg),
            replicas_current: snapshot.current_replicas,
            replicas_baseline: reference.map(|b| b.replicas),
            error_rate: snapshot.error_rate,
            p95_latency_ms: snapshot.p95_latency_ms,
            issues,
        }
    }

    fn check_cpu(
        &self,
        snapshot: &Snapshot,
        reference: Option<&HpaBaseline>,
        issues: &mut Vec<ComparisonIssue>,
    ) {
        let (delta, against) = match reference {
            Some(b) => (snapshot.cpu_current - b.cpu_avg, "baseline"),
            None if snapshot.cpu_target > 0 => (snapshot.cpu_deviation(), "target"),
            None => return,
        };

        let status = if delta > self.thresholds.cpu_critical_delta {
            ComparisonStatus::Critical
        } else if delta > self.thresholds.cpu_degraded_delta {
            ComparisonStatus::Degraded
        } else {
            return;
        };

        issues.push(ComparisonIssue {
            issue_type: AnomalyType::CpuSpike,
            status,
            message: format!(
                "CPU {:.1}% is {:.1} points above {}",
                snapshot.cpu_current, delta, against
            ),
        });
    }

    fn check_memory(
        &self,
        snapshot: &Snapshot,
        reference: Option<&HpaBaseline>,
        issues: &mut Vec<ComparisonIssue>,
    ) {
        let Some(b) = reference else { return };
        let delta = snapshot.memory_current - b.memory_avg;
        if delta > self.thresholds.memory_degraded_delta {
            issues.push(ComparisonIssue {
                issue_type: AnomalyType::MemorySpike,
                status: ComparisonStatus::Degraded,
                message: format!(
                    "Memory {:.1}% is {:.1} points above baseline",
                    snapshot.memory_current, delta
                ),
            });
        }
    }

    fn check_replicas(
        &self,
        snapshot: &Snapshot,
        reference: Option<&HpaBaseline>,
        issues: &mut Vec<ComparisonIssue>,
    ) {
        if snapshot.is_maxed_out()
            && snapshot.cpu_target > 0
            && snapshot.cpu_current > f64::from(snapshot.cpu_target)
        {
            issues.push(ComparisonIssue {
                issue_type: AnomalyType::ReplicaSpike,
                status: ComparisonStatus::Critical,
                message: format!(
                    "At max replicas ({}) with CPU {:.1}% above target {}%",
                    snapshot.max_replicas, snapshot.cpu_current, snapshot.cpu_target
                ),
            });
            return;
        }

        let Some(b) = reference else { return };
        if b.replicas <= 0 {
            return;
        }
        let limit = f64::from(b.replicas) * self.thresholds.replica_degraded_factor;
        if f64::from(snapshot.current_replicas) > limit {
            issues.push(ComparisonIssue {
                issue_type: AnomalyType::ReplicaSpike,
                status: ComparisonStatus::Degraded,
                message: format!(
                    "Replicas grew from {} to {}",
                    b.replicas, snapshot.current_replicas
                ),
            });
        }
    }

    fn check_error_rate(&self, snapshot: &Snapshot, issues: &mut Vec<ComparisonIssue>) {
        let Some(rate) = snapshot.error_rate else { return };

        let status = if rate > self.thresholds.error_rate_critical {
            ComparisonStatus::Critical
        } else if rate > self.thresholds.error_rate_degraded {
            ComparisonStatus::Degraded
        } else {
            return;
        };

        issues.push(ComparisonIssue {
            issue_type: AnomalyType::ErrorRateSpike,
            status,
            message: format!("Error rate at {:.2}%", rate),
        });
    }

    fn check_latency(
        &self,
        snapshot: &Snapshot,
        reference: Option<&HpaBaseline>,
        issues: &mut Vec<ComparisonIssue>,
    ) {
        let (Some(latency), Some(base)) = (
            snapshot.p95_latency_ms,
            reference.and_then(|b| b.p95_latency_avg),
        ) else {
            return;
        };

        if base > 0.0 && latency > base * self.thresholds.latency_degraded_factor {
            issues.push(ComparisonIssue {
                issue_type: AnomalyType::LatencySpike,
                status: ComparisonStatus::Degraded,
                message: format!(
                    "P95 latency {:.0}ms vs {:.0}ms baseline",
                    latency, base
                ),
            });
        }
    }
}

impl Comparator for BaselineComparator {
    fn compare_multiple(&self, snapshots: &[Snapshot]) -> Vec<ComparisonResult> {
        snapshots.iter().map(|s| self.compare(s)).collect()
    }

    fn summary(&self, results: &[ComparisonResult]) -> ComparisonSummary {
        let count = |status| results.iter().filter(|r| r.status == status).count();

        let total = results.len();
        let normal = count(ComparisonStatus::Normal);
        let health_percentage = if total == 0 {
            100.0
        } else {
            normal as f64 / total as f64 * 100.0
        };

        ComparisonSummary {
            total_hpas: total,
            normal_count: normal,
            degraded_count: count(ComparisonStatus::Degraded),
            critical_count: count(ComparisonStatus::Critical),
            health_percentage,
        }
    }
}

/// Factory producing [`BaselineComparator`]s
#[derive(Debug, Clone, Default)]
pub struct BaselineComparatorFactory {
    thresholds: ComparatorThresholds,
}

impl BaselineComparatorFactory {
    pub fn new(thresholds: ComparatorThresholds) -> Self {
        Self { thresholds }
    }
}

impl ComparatorFactory for BaselineComparatorFactory {
    fn create(&self, baseline: Baseline) -> Box<dyn Comparator> {
        Box::new(BaselineComparator::with_thresholds(
            baseline,
            self.thresholds.clone(),
        ))
    }
}

//! Rule-based HPA anomaly detection
//!
//! Evaluates every tracked HPA window against four rules:
//! - Oscillation: too many replica changes inside the window
//! - Maxed out: at max replicas with CPU far above target, sustained
//! - Pods not ready: readiness failing, sustained
//! - High error rate: metrics-backend error rate above threshold, sustained
//!
//! Sustained rules require an unbroken run of qualifying samples ending at
//! the most recent one (see [`check_min_duration`]).

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use super::types::{Anomaly, AnomalyType, DetectionResult, Severity};
use crate::cache::{to_chrono, TimeSeries, TimeSeriesCache};
use crate::models::{DataSource, Snapshot};

/// Thresholds and minimum durations for each rule
#[derive(Debug, Clone, PartialEq)]
pub struct DetectorConfig {
    /// Replica changes tolerated inside the window
    pub oscillation_max_changes: usize,
    /// Window the oscillation count refers to (reporting only)
    pub oscillation_window: Duration,

    /// CPU percentage points above target that count as maxed out
    pub maxed_out_cpu_deviation: f64,
    pub maxed_out_min_duration: Duration,

    /// Error rate in percent
    pub error_rate_threshold: f64,
    pub error_rate_min_duration: Duration,

    pub not_ready_min_duration: Duration,

    /// Minimum time between two alerts of the same type for the same HPA
    pub alert_cooldown: Duration,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            oscillation_max_changes: 5,
            oscillation_window: Duration::from_secs(5 * 60),
            maxed_out_cpu_deviation: 20.0,
            maxed_out_min_duration: Duration::from_secs(2 * 60),
            error_rate_threshold: 5.0,
            error_rate_min_duration: Duration::from_secs(2 * 60),
            not_ready_min_duration: Duration::from_secs(3 * 60),
            alert_cooldown: Duration::from_secs(5 * 60),
        }
    }
}

/// Stateless evaluator over the shared cache
pub struct AnomalyDetector {
    cache: Arc<TimeSeriesCache>,
    config: DetectorConfig,
}

impl AnomalyDetector {
    pub fn new(cache: Arc<TimeSeriesCache>, config: DetectorConfig) -> Self {
        info!(
            oscillation_max_changes = config.oscillation_max_changes,
            maxed_out_cpu_deviation = config.maxed_out_cpu_deviation,
            error_rate_threshold = config.error_rate_threshold,
            "Anomaly detector initialized"
        );
        Self { cache, config }
    }

    pub fn config(&self) -> &DetectorConfig {
        &self.config
    }

    /// Run every rule against every tracked HPA
    pub fn detect(&self) -> DetectionResult {
        let all = self.cache.get_all();
        let mut result = DetectionResult {
            anomalies: Vec::new(),
            checked: all.len(),
            timestamp: Utc::now(),
        };

        for (key, series) in &all {
            let Some(latest) = series.latest() else {
                continue;
            };

            let found: Vec<Anomaly> = [
                self.detect_oscillation(series, latest),
                self.detect_maxed_out(series, latest),
                self.detect_pods_not_ready(series, latest),
                self.detect_high_error_rate(series, latest),
            ]
            .into_iter()
            .flatten()
            .collect();

            if !found.is_empty() {
                debug!(hpa = %key, anomalies = found.len(), "Anomalies detected");
            }
            result.anomalies.extend(found);
        }

        if !result.anomalies.is_empty() {
            info!(
                total = result.anomalies.len(),
                checked = result.checked,
                "Anomaly detection complete"
            );
        }

        result
    }

    fn detect_oscillation(&self, series: &TimeSeries, latest: &Snapshot) -> Option<Anomaly> {
        let changes = series.stats().replica_changes;
        if changes <= self.config.oscillation_max_changes {
            return None;
        }

        let window_mins = self.config.oscillation_window.as_secs() / 60;
        Some(self.anomaly(
            AnomalyType::Oscillation,
            series,
            latest,
            format!(
                "HPA oscillating: {} replica changes in {}m",
                changes, window_mins
            ),
            format!(
                "Replica count changed {} times in the last {}m (limit {}). \
                 This points at an unstable configuration or highly variable load.",
                changes, window_mins, self.config.oscillation_max_changes
            ),
            vec![
                "Increase HPA stabilizationWindowSeconds (scaleDown: 300s)".to_string(),
                "Review CPU/memory targets, they may be too sensitive".to_string(),
                "Check whether load is really variable or the application misbehaves".to_string(),
                "Consider scaling behavior policies (autoscaling/v2)".to_string(),
            ],
        ))
    }

    fn detect_maxed_out(&self, series: &TimeSeries, latest: &Snapshot) -> Option<Anomaly> {
        if !latest.is_maxed_out() {
            return None;
        }
        if latest.cpu_target == 0 || latest.cpu_current == 0.0 {
            return None;
        }

        let deviation = latest.cpu_deviation();
        if deviation < self.config.maxed_out_cpu_deviation {
            return None;
        }

        let threshold = self.config.maxed_out_cpu_deviation;
        let sustained = check_min_duration(series, self.config.maxed_out_min_duration, |s| {
            s.is_maxed_out() && s.cpu_current > f64::from(s.cpu_target) + threshold
        });
        if !sustained {
            return None;
        }

        Some(self.anomaly(
            AnomalyType::MaxedOut,
            series,
            latest,
            format!(
                "HPA at max capacity: {} replicas, CPU {:.2}% (target {}%)",
                latest.max_replicas, latest.cpu_current, latest.cpu_target
            ),
            format!(
                "HPA reached its maximum of {} replicas and CPU is at {:.2}% \
                 ({:.2} points above the {}% target). It cannot scale further.",
                latest.max_replicas, latest.cpu_current, deviation, latest.cpu_target
            ),
            vec![
                format!(
                    "URGENT: raise maxReplicas from {} to {} or more",
                    latest.max_replicas,
                    latest.max_replicas * 2
                ),
                "Check that the cluster has spare capacity".to_string(),
                "Consider scaling vertically (larger requests per pod)".to_string(),
                "Look for bottlenecks beyond CPU (database, external APIs)".to_string(),
            ],
        ))
    }

    fn detect_pods_not_ready(&self, series: &TimeSeries, latest: &Snapshot) -> Option<Anomaly> {
        if latest.current_replicas == 0 || latest.ready {
            return None;
        }

        if !check_min_duration(series, self.config.not_ready_min_duration, |s| !s.ready) {
            return None;
        }

        let min_secs = self.config.not_ready_min_duration.as_secs();
        Some(self.anomaly(
            AnomalyType::PodsNotReady,
            series,
            latest,
            format!("Pods not ready for more than {}s", min_secs),
            format!(
                "HPA has {} replicas but pods are failing readiness checks. \
                 The problem has persisted for more than {}s.",
                latest.current_replicas, min_secs
            ),
            vec![
                format!("Check pod logs: kubectl logs -n {}", latest.namespace),
                "Inspect pod readiness: kubectl describe pod".to_string(),
                "Check external dependencies (database, cache, APIs)".to_string(),
                "Relax the readiness check if it is too sensitive".to_string(),
            ],
        ))
    }

    fn detect_high_error_rate(&self, series: &TimeSeries, latest: &Snapshot) -> Option<Anomaly> {
        if latest.data_source != DataSource::Prometheus {
            return None;
        }

        let threshold = self.config.error_rate_threshold;
        let error_rate = latest.error_rate?;
        if error_rate < threshold {
            return None;
        }

        let sustained = check_min_duration(series, self.config.error_rate_min_duration, |s| {
            s.error_rate.is_some_and(|rate| rate >= threshold)
        });
        if !sustained {
            return None;
        }

        Some(self.anomaly(
            AnomalyType::HighErrorRate,
            series,
            latest,
            format!(
                "High error rate: {:.2}% (limit {:.2}%)",
                error_rate, threshold
            ),
            format!(
                "Application has returned {:.2}% 5xx errors for more than {}s. \
                 Request rate: {:.2} req/s, P95 latency: {:.2}ms",
                error_rate,
                self.config.error_rate_min_duration.as_secs(),
                latest.request_rate.unwrap_or(0.0),
                latest.p95_latency_ms.unwrap_or(0.0)
            ),
            vec![
                format!(
                    "Check error logs: kubectl logs -n {} --tail=100 | grep ERROR",
                    latest.namespace
                ),
                "Check downstream dependencies (APIs, database)".to_string(),
                "Scale up if the errors are capacity related".to_string(),
                "Check latency and throughput metrics".to_string(),
                "Inspect distributed traces if available".to_string(),
            ],
        ))
    }

    fn anomaly(
        &self,
        anomaly_type: AnomalyType,
        series: &TimeSeries,
        latest: &Snapshot,
        message: String,
        description: String,
        actions: Vec<String>,
    ) -> Anomaly {
        Anomaly {
            anomaly_type,
            severity: Severity::Critical,
            key: latest.key(),
            timestamp: latest.timestamp,
            message,
            description,
            snapshot: latest.clone(),
            stats: Some(series.stats().clone()),
            actions,
        }
    }
}

/// Whether `condition` has held without interruption for at least
/// `min_duration`, ending at the most recent snapshot
///
/// Walks backward from the newest sample, stopping at the first sample that
/// is older than `latest - min_duration` or that fails `condition`. Holds
/// only when at least two samples qualified and the oldest qualifying one is
/// at least `min_duration` older than the newest.
pub fn check_min_duration<F>(series: &TimeSeries, min_duration: Duration, condition: F) -> bool
where
    F: Fn(&Snapshot) -> bool,
{
    let snapshots = series.snapshots();
    if snapshots.len() < 2 {
        return false;
    }

    let Some(latest) = snapshots.back() else {
        return false;
    };

    let min_duration = to_chrono(min_duration);
    let cutoff = latest.timestamp - min_duration;

    let mut satisfied = 0usize;
    let mut oldest_satisfied = latest.timestamp;

    for snapshot in snapshots.iter().rev() {
        if snapshot.timestamp < cutoff {
            break;
        }
        if !condition(snapshot) {
            break;
        }
        satisfied += 1;
        oldest_satisfied = snapshot.timestamp;
    }

    satisfied >= 2 && latest.timestamp - oldest_satisfied >= min_duration
}

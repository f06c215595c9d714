//! Observability infrastructure for the watchdog
//!
//! Provides:
//! - Prometheus metrics (scan latency, scans, tracked HPAs, anomalies, drops, target failures)
//! - Structured logging of engine events with tracing

use prometheus::{
    register_histogram, register_int_counter, register_int_counter_vec, register_int_gauge,
    Histogram, IntCounter, IntCounterVec, IntGauge,
};
use std::sync::OnceLock;
use tracing::{info, warn};

use crate::anomaly::{Anomaly, Severity};
use crate::models::StressTestMetrics;

/// Histogram buckets for scan cycle latency (in seconds)
const SCAN_LATENCY_BUCKETS: &[f64] = &[
    0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0,
];

/// Global metrics instance (registered once)
static GLOBAL_METRICS: OnceLock<WatchdogMetricsInner> = OnceLock::new();

struct WatchdogMetricsInner {
    scan_cycle_latency_seconds: Histogram,
    scans_total: IntCounter,
    hpas_tracked: IntGauge,
    anomalies_detected: IntCounterVec,
    items_dropped: IntCounterVec,
    target_failures: IntCounterVec,
    persistence_failures: IntCounter,
}

impl WatchdogMetricsInner {
    fn new() -> Self {
        Self {
            scan_cycle_latency_seconds: register_histogram!(
                "hpa_watchdog_scan_cycle_latency_seconds",
                "Time spent on one scan cycle across all targets",
                SCAN_LATENCY_BUCKETS.to_vec()
            )
            .expect("Failed to register scan_cycle_latency_seconds"),

            scans_total: register_int_counter!(
                "hpa_watchdog_scans_total",
                "Total number of completed scan cycles"
            )
            .expect("Failed to register scans_total"),

            hpas_tracked: register_int_gauge!(
                "hpa_watchdog_hpas_tracked",
                "Number of HPAs currently held in the time-series cache"
            )
            .expect("Failed to register hpas_tracked"),

            anomalies_detected: register_int_counter_vec!(
                "hpa_watchdog_anomalies_detected_total",
                "Anomalies emitted, by type",
                &["type"]
            )
            .expect("Failed to register anomalies_detected"),

            items_dropped: register_int_counter_vec!(
                "hpa_watchdog_items_dropped_total",
                "Items dropped because a downstream stream was full",
                &["stream"]
            )
            .expect("Failed to register items_dropped"),

            target_failures: register_int_counter_vec!(
                "hpa_watchdog_target_failures_total",
                "Failed or skipped target scans, by cluster",
                &["cluster"]
            )
            .expect("Failed to register target_failures"),

            persistence_failures: register_int_counter!(
                "hpa_watchdog_persistence_failures_total",
                "Failed writes to the persistence sink"
            )
            .expect("Failed to register persistence_failures"),
        }
    }
}

/// Watchdog metrics for Prometheus exposition
///
/// Lightweight handle to the global metrics instance; clones share the
/// same underlying metrics.
#[derive(Clone)]
pub struct WatchdogMetrics {
    _private: (),
}

impl Default for WatchdogMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl WatchdogMetrics {
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(WatchdogMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &WatchdogMetricsInner {
        GLOBAL_METRICS.get_or_init(WatchdogMetricsInner::new)
    }

    pub fn observe_scan_latency(&self, duration_secs: f64) {
        self.inner().scan_cycle_latency_seconds.observe(duration_secs);
    }

    pub fn inc_scans(&self) {
        self.inner().scans_total.inc();
    }

    pub fn set_hpas_tracked(&self, count: i64) {
        self.inner().hpas_tracked.set(count);
    }

    pub fn inc_anomalies(&self, anomaly_type: &str) {
        self.inner()
            .anomalies_detected
            .with_label_values(&[anomaly_type])
            .inc();
    }

    pub fn inc_dropped(&self, stream: &str) {
        self.inner().items_dropped.with_label_values(&[stream]).inc();
    }

    pub fn inc_target_failures(&self, cluster: &str) {
        self.inner()
            .target_failures
            .with_label_values(&[cluster])
            .inc();
    }

    pub fn inc_persistence_failures(&self) {
        self.inner().persistence_failures.inc();
    }
}

/// Structured logger for engine events
///
/// Every record carries an `event` field so log pipelines can route on it.
#[derive(Clone)]
pub struct StructuredLogger {
    instance: String,
}

impl StructuredLogger {
    pub fn new(instance: impl Into<String>) -> Self {
        Self {
            instance: instance.into(),
        }
    }

    pub fn log_anomaly(&self, anomaly: &Anomaly) {
        match anomaly.severity {
            Severity::Critical => {
                warn!(
                    event = "anomaly_detected",
                    instance = %self.instance,
                    cluster = %anomaly.key.cluster,
                    namespace = %anomaly.key.namespace,
                    hpa = %anomaly.key.name,
                    anomaly_type = %anomaly.anomaly_type,
                    severity = %anomaly.severity,
                    details = %anomaly.message,
                    "Critical anomaly detected"
                );
            }
            _ => {
                info!(
                    event = "anomaly_detected",
                    instance = %self.instance,
                    cluster = %anomaly.key.cluster,
                    namespace = %anomaly.key.namespace,
                    hpa = %anomaly.key.name,
                    anomaly_type = %anomaly.anomaly_type,
                    severity = %anomaly.severity,
                    details = %anomaly.message,
                    "Anomaly detected"
                );
            }
        }
    }

    pub fn log_scan_cycle(
        &self,
        scan: u64,
        targets: usize,
        failed_targets: usize,
        snapshots: usize,
        anomalies: usize,
        duration_ms: u64,
    ) {
        info!(
            event = "scan_cycle_complete",
            instance = %self.instance,
            scan = scan,
            targets = targets,
            failed_targets = failed_targets,
            snapshots = snapshots,
            anomalies = anomalies,
            duration_ms = duration_ms,
            "Scan cycle complete"
        );
    }

    pub fn log_stress_finalized(&self, metrics: &StressTestMetrics) {
        info!(
            event = "stress_test_finalized",
            instance = %self.instance,
            test_id = %metrics.test_id,
            status = ?metrics.status,
            result = ?metrics.test_result(),
            total_scans = metrics.total_scans,
            replicas_pre = metrics.peak_metrics.total_replicas_pre,
            replicas_peak = metrics.peak_metrics.total_replicas_peak,
            replicas_post = metrics.peak_metrics.total_replicas_post,
            replica_increase_percent = metrics.peak_metrics.replica_increase_percent,
            critical_issues = metrics.critical_issues.len(),
            "Stress test finalized"
        );
    }

    pub fn log_started(&self, mode: &str, targets: usize, interval_secs: u64) {
        info!(
            event = "engine_started",
            instance = %self.instance,
            mode = %mode,
            targets = targets,
            interval_secs = interval_secs,
            "Scan engine started"
        );
    }

    pub fn log_stopped(&self, reason: &str) {
        info!(
            event = "engine_stopped",
            instance = %self.instance,
            reason = %reason,
            "Scan engine stopped"
        );
    }

    pub fn log_dropped(&self, stream: &str, dropped_total: u64) {
        warn!(
            event = "item_dropped",
            instance = %self.instance,
            stream = %stream,
            dropped_total = dropped_total,
            "Downstream stream full, item dropped"
        );
    }
}

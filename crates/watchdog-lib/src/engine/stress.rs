//! Stress test accounting
//!
//! One `StressRun` lives from engine start to engine stop in stress mode.
//! It owns the baseline comparator, accumulates peaks and issues after
//! every scan cycle, and produces the final metrics exactly once.

use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::time::Duration;
use tracing::{debug, info};

use crate::anomaly::{Anomaly, AnomalyType, Severity};
use crate::collaborators::{Comparator, ComparatorFactory, ComparisonStatus, ComparisonSummary};
use crate::models::{
    Baseline, HpaKey, IssueSeverity, Snapshot, StressIssue, StressTestMetrics, StressTestStatus,
};

pub(crate) struct StressRun {
    metrics: StressTestMetrics,
    baseline: Option<Baseline>,
    comparator: Option<Box<dyn Comparator>>,
    /// HPAs seen in any cycle
    monitored: HashSet<String>,
    /// HPAs that were non-normal in any cycle
    with_issues: HashSet<String>,
    /// Most recent issue per (HPA, type)
    issues: HashMap<(String, AnomalyType), StressIssue>,
    last_summary: Option<ComparisonSummary>,
}

impl StressRun {
    pub(crate) fn new(
        test_id: impl Into<String>,
        start_time: DateTime<Utc>,
        interval: Duration,
        clusters: usize,
    ) -> Self {
        let mut metrics = StressTestMetrics::new(test_id, start_time, interval);
        metrics.total_clusters = clusters;
        Self {
            metrics,
            baseline: None,
            comparator: None,
            monitored: HashSet::new(),
            with_issues: HashSet::new(),
            issues: HashMap::new(),
            last_summary: None,
        }
    }

    pub(crate) fn test_id(&self) -> &str {
        &self.metrics.test_id
    }

    pub(crate) fn has_baseline(&self) -> bool {
        self.baseline.is_some()
    }

    /// Comparison summary of the most recent cycle
    pub(crate) fn last_summary(&self) -> Option<&ComparisonSummary> {
        self.last_summary.as_ref()
    }

    pub(crate) fn attach_baseline(&mut self, baseline: Baseline, factory: &dyn ComparatorFactory) {
        self.metrics.total_hpas = baseline.total_hpas;
        self.metrics.peak_metrics.total_replicas_pre = baseline.total_replicas;
        self.metrics.peak_metrics.total_replicas_peak = baseline.total_replicas;
        self.comparator = Some(factory.create(baseline.clone()));
        self.baseline = Some(baseline);
    }

    /// Fold one cycle's snapshots into the run
    ///
    /// Returns spike anomalies for every critical comparison issue.
    pub(crate) fn record_cycle(&mut self, snapshots: &[Snapshot]) -> Vec<Anomaly> {
        self.metrics.total_scans += 1;

        for snapshot in snapshots {
            self.monitored.insert(snapshot.key().to_string());
            self.update_peaks(snapshot);
        }
        self.metrics.total_hpas_monitored = self.monitored.len();
        self.metrics.total_hpas = self.metrics.total_hpas.max(self.monitored.len());

        let cycle_replicas: i64 = snapshots.iter().map(|s| i64::from(s.current_replicas)).sum();
        let peak = &mut self.metrics.peak_metrics;
        peak.total_replicas_peak = peak.total_replicas_peak.max(cycle_replicas);

        let Some(comparator) = self.comparator.as_ref() else {
            return Vec::new();
        };

        let results = comparator.compare_multiple(snapshots);
        let summary = comparator.summary(&results);
        info!(
            test_id = %self.metrics.test_id,
            total = summary.total_hpas,
            normal = summary.normal_count,
            degraded = summary.degraded_count,
            critical = summary.critical_count,
            health = summary.health_percentage,
            "Baseline comparison"
        );
        self.last_summary = Some(summary);

        let by_key: HashMap<HpaKey, &Snapshot> = snapshots.iter().map(|s| (s.key(), s)).collect();
        let mut spikes = Vec::new();

        for result in &results {
            if result.status == ComparisonStatus::Normal {
                continue;
            }
            let hpa = result.key.to_string();
            self.with_issues.insert(hpa.clone());

            for issue in &result.issues {
                let severity = match issue.status {
                    ComparisonStatus::Critical => IssueSeverity::Critical,
                    ComparisonStatus::Degraded => IssueSeverity::Warning,
                    ComparisonStatus::Normal => IssueSeverity::Info,
                };
                self.issues.insert(
                    (hpa.clone(), issue.issue_type),
                    StressIssue {
                        hpa: hpa.clone(),
                        issue_type: issue.issue_type,
                        severity,
                        message: issue.message.clone(),
                        detected_at: result.timestamp,
                    },
                );

                if issue.status != ComparisonStatus::Critical {
                    continue;
                }
                let Some(snapshot) = by_key.get(&result.key).copied() else {
                    debug!(hpa = %hpa, "Comparison result without a matching snapshot");
                    continue;
                };
                spikes.push(Anomaly {
                    anomaly_type: issue.issue_type,
                    severity: Severity::Critical,
                    key: result.key.clone(),
                    timestamp: result.timestamp,
                    message: issue.message.clone(),
                    description: format!(
                        "Stress test {}: {} deviated critically from its baseline",
                        self.metrics.test_id, hpa
                    ),
                    snapshot: snapshot.clone(),
                    stats: None,
                    actions: vec![
                        "Compare against the baseline in the stress test report".to_string(),
                        "Check whether the HPA limits fit the tested load".to_string(),
                    ],
                });
            }
        }
        self.metrics.total_hpas_with_issues = self.with_issues.len();

        spikes
    }

    fn update_peaks(&mut self, s: &Snapshot) {
        let hpa = s.key().to_string();
        let peak = &mut self.metrics.peak_metrics;

        if s.cpu_current > peak.max_cpu_percent {
            peak.max_cpu_percent = s.cpu_current;
            peak.max_cpu_hpa = hpa.clone();
            peak.max_cpu_time = Some(s.timestamp);
        }
        if s.memory_current > peak.max_memory_percent {
            peak.max_memory_percent = s.memory_current;
            peak.max_memory_hpa = hpa.clone();
            peak.max_memory_time = Some(s.timestamp);
        }
        if let Some(rate) = s.error_rate.filter(|r| *r > peak.max_error_rate) {
            peak.max_error_rate = rate;
            peak.max_error_rate_hpa = hpa.clone();
            peak.max_error_rate_time = Some(s.timestamp);
        }
        if let Some(latency) = s.p95_latency_ms.filter(|l| *l > peak.max_latency_ms) {
            peak.max_latency_ms = latency;
            peak.max_latency_hpa = hpa;
            peak.max_latency_time = Some(s.timestamp);
        }
    }

    /// Close the run. `post_replicas` is the settled replica total.
    pub(crate) fn finalize(mut self, end_time: DateTime<Utc>, post_replicas: i64) -> StressTestMetrics {
        let peak = &mut self.metrics.peak_metrics;
        peak.total_replicas_post = post_replicas;
        peak.replica_increase = peak.total_replicas_peak - peak.total_replicas_pre;
        if peak.total_replicas_pre > 0 {
            peak.replica_increase_percent =
                peak.replica_increase as f64 / peak.total_replicas_pre as f64 * 100.0;
        }

        let mut issues: Vec<StressIssue> = self.issues.into_values().collect();
        issues.sort_by(|a, b| a.detected_at.cmp(&b.detected_at).then_with(|| a.hpa.cmp(&b.hpa)));
        for issue in issues {
            match issue.severity {
                IssueSeverity::Critical => self.metrics.critical_issues.push(issue),
                IssueSeverity::Warning => self.metrics.warning_issues.push(issue),
                IssueSeverity::Info => self.metrics.info_issues.push(issue),
            }
        }

        let status = if self.baseline.is_some() {
            StressTestStatus::Completed
        } else {
            StressTestStatus::Failed
        };
        self.metrics.complete(end_time, status);
        self.metrics
    }
}

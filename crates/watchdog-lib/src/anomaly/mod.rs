//! Anomaly detection for HPA behaviour
//!
//! This module provides:
//! - Rule evaluation over the time-series cache (oscillation, capacity
//!   exhaustion, readiness failures, error rate)
//! - A cooldown post-filter for repeat alerts
//! - Baseline comparison used by stress tests

mod comparator;
mod cooldown;
mod detector;
mod types;

pub use comparator::{BaselineComparator, BaselineComparatorFactory, ComparatorThresholds};
pub use cooldown::AlertCooldown;
pub use detector::{check_min_duration, AnomalyDetector, DetectorConfig};
pub use types::{Anomaly, AnomalyType, DetectionResult, Severity};

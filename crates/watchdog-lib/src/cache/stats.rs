//! Derived statistics over a time-series window
//!
//! Stats are a pure function of the window contents and are recomputed
//! from scratch after every append.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

use crate::models::Snapshot;

/// Minimum samples before a trend other than `Stable` is reported
const MIN_SAMPLES_FOR_TREND: usize = 3;

/// Slope (CPU percentage points per minute) beyond which the trend is directional
const TREND_SLOPE_THRESHOLD: f64 = 1.0;

/// Coarse direction of CPU utilisation over the window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Trend {
    Rising,
    Falling,
    #[default]
    Stable,
}

/// Summary statistics for one HPA window
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Stats {
    pub sample_count: usize,

    pub cpu_min: f64,
    pub cpu_max: f64,
    pub cpu_avg: f64,

    pub memory_min: f64,
    pub memory_max: f64,
    pub memory_avg: f64,

    pub cpu_trend: Trend,
    /// Number of adjacent samples whose replica count differs
    pub replica_changes: usize,

    pub first_seen: Option<DateTime<Utc>>,
    pub last_seen: Option<DateTime<Utc>>,
}

impl Stats {
    /// Compute statistics over a timestamp-ordered window
    pub fn compute(window: &VecDeque<Snapshot>) -> Self {
        let count = window.len();
        if count == 0 {
            return Self::default();
        }

        let mut stats = Self {
            sample_count: count,
            cpu_min: f64::MAX,
            cpu_max: f64::MIN,
            memory_min: f64::MAX,
            memory_max: f64::MIN,
            ..Default::default()
        };

        let mut cpu_sum = 0.0;
        let mut memory_sum = 0.0;

        for snapshot in window {
            stats.cpu_min = stats.cpu_min.min(snapshot.cpu_current);
            stats.cpu_max = stats.cpu_max.max(snapshot.cpu_current);
            stats.memory_min = stats.memory_min.min(snapshot.memory_current);
            stats.memory_max = stats.memory_max.max(snapshot.memory_current);
            cpu_sum += snapshot.cpu_current;
            memory_sum += snapshot.memory_current;
        }

        stats.cpu_avg = cpu_sum / count as f64;
        stats.memory_avg = memory_sum / count as f64;

        stats.replica_changes = window
            .iter()
            .zip(window.iter().skip(1))
            .filter(|(prev, next)| prev.current_replicas != next.current_replicas)
            .count();

        stats.cpu_trend = cpu_trend(window);
        stats.first_seen = window.front().map(|s| s.timestamp);
        stats.last_seen = window.back().map(|s| s.timestamp);

        stats
    }
}

/// Classify the least-squares CPU slope over the window
fn cpu_trend(window: &VecDeque<Snapshot>) -> Trend {
    let slope = cpu_slope_per_minute(window);
    if slope > TREND_SLOPE_THRESHOLD {
        Trend::Rising
    } else if slope < -TREND_SLOPE_THRESHOLD {
        Trend::Falling
    } else {
        Trend::Stable
    }
}

fn cpu_slope_per_minute(window: &VecDeque<Snapshot>) -> f64 {
    if window.len() < MIN_SAMPLES_FOR_TREND {
        return 0.0;
    }

    // Normalize timestamps to avoid precision issues
    let Some(t0) = window.front().map(|s| s.timestamp) else {
        return 0.0;
    };

    let n = window.len() as f64;
    let mut sum_x = 0.0;
    let mut sum_y = 0.0;
    let mut sum_xy = 0.0;
    let mut sum_xx = 0.0;

    for snapshot in window {
        let x = (snapshot.timestamp - t0).num_milliseconds() as f64 / 60_000.0;
        let y = snapshot.cpu_current;
        sum_x += x;
        sum_y += y;
        sum_xy += x * y;
        sum_xx += x * x;
    }

    let denominator = n * sum_xx - sum_x * sum_x;
    if denominator.abs() < f64::EPSILON {
        return 0.0;
    }

    (n * sum_xy - sum_x * sum_y) / denominator
}

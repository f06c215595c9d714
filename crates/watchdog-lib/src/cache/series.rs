//! Sliding window of snapshots for a single HPA

use chrono::{DateTime, Utc};
use std::collections::VecDeque;
use std::time::Duration;

use super::Stats;
use crate::models::Snapshot;

/// Time-ordered window of snapshots with derived statistics
#[derive(Debug, Clone)]
pub struct TimeSeries {
    snapshots: VecDeque<Snapshot>,
    max_duration: Duration,
    stats: Stats,
}

impl TimeSeries {
    pub fn new(max_duration: Duration) -> Self {
        Self {
            snapshots: VecDeque::new(),
            max_duration,
            stats: Stats::default(),
        }
    }

    /// Append a snapshot, evict aged-out entries, recompute stats
    pub fn push(&mut self, snapshot: Snapshot) {
        // Keep the window sorted even if a sample arrives late
        let position = self
            .snapshots
            .partition_point(|existing| existing.timestamp <= snapshot.timestamp);
        self.snapshots.insert(position, snapshot);

        self.evict_expired();
        self.stats = Stats::compute(&self.snapshots);
    }

    /// Drop entries strictly older than `latest - max_duration`
    fn evict_expired(&mut self) {
        let Some(latest) = self.snapshots.back().map(|s| s.timestamp) else {
            return;
        };
        let cutoff = latest - to_chrono(self.max_duration);

        while let Some(front) = self.snapshots.front() {
            if front.timestamp < cutoff {
                self.snapshots.pop_front();
            } else {
                break;
            }
        }
    }

    pub fn latest(&self) -> Option<&Snapshot> {
        self.snapshots.back()
    }

    pub fn snapshots(&self) -> &VecDeque<Snapshot> {
        &self.snapshots
    }

    pub fn stats(&self) -> &Stats {
        &self.stats
    }

    pub fn max_duration(&self) -> Duration {
        self.max_duration
    }

    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }

    /// Time covered between the oldest and newest retained snapshot
    pub fn span(&self) -> chrono::Duration {
        match (self.snapshots.front(), self.snapshots.back()) {
            (Some(first), Some(last)) => last.timestamp - first.timestamp,
            _ => chrono::Duration::zero(),
        }
    }

    pub fn oldest_timestamp(&self) -> Option<DateTime<Utc>> {
        self.snapshots.front().map(|s| s.timestamp)
    }
}

/// Convert a std duration into a chrono duration, saturating on overflow
pub(crate) fn to_chrono(duration: Duration) -> chrono::Duration {
    chrono::Duration::from_std(duration).unwrap_or_else(|_| chrono::Duration::weeks(52 * 1000))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::HpaKey;
    use chrono::TimeZone;

    fn at(secs: i64) -> Snapshot {
        let t0 = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
        Snapshot::new(
            &HpaKey::new("c", "ns", "hpa"),
            t0 + chrono::Duration::seconds(secs),
        )
    }

    #[test]
    fn test_eviction_relative_to_latest() {
        let mut series = TimeSeries::new(Duration::from_secs(300));
        for i in 0..20 {
            series.push(at(i * 30));
        }

        // Latest at 570s, cutoff at 270s: 270..=570 step 30 = 11 entries
        assert_eq!(series.len(), 11);
        let latest = series.latest().unwrap().timestamp;
        for snapshot in series.snapshots() {
            assert!(latest - snapshot.timestamp <= chrono::Duration::seconds(300));
        }
    }

    #[test]
    fn test_boundary_entry_is_retained() {
        let mut series = TimeSeries::new(Duration::from_secs(300));
        series.push(at(0));
        series.push(at(300));
        assert_eq!(series.len(), 2);

        series.push(at(301));
        assert_eq!(series.len(), 2);
        assert_eq!(series.oldest_timestamp(), Some(at(300).timestamp));
    }

    #[test]
    fn test_out_of_order_insert_keeps_ordering() {
        let mut series = TimeSeries::new(Duration::from_secs(600));
        series.push(at(0));
        series.push(at(120));
        series.push(at(60));

        let times: Vec<_> = series.snapshots().iter().map(|s| s.timestamp).collect();
        let mut sorted = times.clone();
        sorted.sort();
        assert_eq!(times, sorted);
        assert_eq!(series.latest().unwrap().timestamp, at(120).timestamp);
    }

    #[test]
    fn test_stats_follow_window() {
        let mut series = TimeSeries::new(Duration::from_secs(60));
        let mut first = at(0);
        first.cpu_current = 90.0;
        series.push(first);

        let mut second = at(120);
        second.cpu_current = 10.0;
        series.push(second);

        // First sample aged out, so it no longer contributes
        assert_eq!(series.stats().sample_count, 1);
        assert_eq!(series.stats().cpu_max, 10.0);
        assert_eq!(series.span(), chrono::Duration::zero());
    }
}

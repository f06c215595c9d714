//! Per-HPA sliding-window cache
//!
//! This module provides:
//! - A keyed store of time-bounded snapshot windows
//! - Statistics recomputed on every append
//! - Optional best-effort forwarding to a persistence sink

mod series;
mod stats;

pub use series::TimeSeries;
pub(crate) use series::to_chrono;
pub use stats::{Stats, Trend};

use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::collaborators::PersistenceSink;
use crate::models::{HpaKey, Snapshot};

/// Default window length (5 minutes, the oscillation analysis window)
pub const DEFAULT_MAX_DURATION: Duration = Duration::from_secs(5 * 60);

/// Configuration for the time-series cache
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Maximum age of a retained snapshot relative to the newest one
    pub max_duration: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_duration: DEFAULT_MAX_DURATION,
        }
    }
}

/// Concurrent store of per-HPA time series
pub struct TimeSeriesCache {
    series: DashMap<HpaKey, TimeSeries>,
    config: CacheConfig,
    sink: Option<Arc<dyn PersistenceSink>>,
    sink_failures: AtomicU64,
}

impl TimeSeriesCache {
    pub fn new(config: CacheConfig) -> Self {
        Self {
            series: DashMap::new(),
            config,
            sink: None,
            sink_failures: AtomicU64::new(0),
        }
    }

    /// Forward every added snapshot to `sink`
    pub fn with_sink(mut self, sink: Arc<dyn PersistenceSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Append a snapshot to its window without touching the sink
    pub fn insert(&self, snapshot: Snapshot) {
        let key = snapshot.key();
        // The entry guard holds the shard lock until push() returns, so
        // readers never see a half-evicted window
        self.series
            .entry(key)
            .or_insert_with(|| TimeSeries::new(self.config.max_duration))
            .push(snapshot);
    }

    /// Append a snapshot and forward it to the persistence sink, if any
    ///
    /// The snapshot stays in the cache even when the sink rejects it; the
    /// sink error is counted and returned.
    pub async fn add(&self, snapshot: Snapshot) -> anyhow::Result<()> {
        let forwarded = self.sink.as_ref().map(|sink| (sink.clone(), snapshot.clone()));
        self.insert(snapshot);

        let Some((sink, snapshot)) = forwarded else {
            return Ok(());
        };
        sink.save_snapshot(&snapshot).await.map_err(|e| {
            self.sink_failures.fetch_add(1, Ordering::Relaxed);
            e.context(format!("save snapshot of {}", snapshot.key()))
        })
    }

    pub fn get_latest(&self, key: &HpaKey) -> Option<Snapshot> {
        self.series.get(key).and_then(|s| s.latest().cloned())
    }

    pub fn get(&self, key: &HpaKey) -> Option<TimeSeries> {
        self.series.get(key).map(|s| s.value().clone())
    }

    /// Copy of every tracked window
    pub fn get_all(&self) -> HashMap<HpaKey, TimeSeries> {
        self.series
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect()
    }

    pub fn keys(&self) -> Vec<HpaKey> {
        self.series.iter().map(|entry| entry.key().clone()).collect()
    }

    /// Sum of current replicas over the latest snapshot of every HPA
    pub fn total_current_replicas(&self) -> i64 {
        self.series
            .iter()
            .filter_map(|entry| entry.value().latest().map(|s| i64::from(s.current_replicas)))
            .sum()
    }

    pub fn len(&self) -> usize {
        self.series.len()
    }

    pub fn is_empty(&self) -> bool {
        self.series.is_empty()
    }

    pub fn clear(&self) {
        debug!(entries = self.series.len(), "Clearing time-series cache");
        self.series.clear();
    }

    pub fn max_duration(&self) -> Duration {
        self.config.max_duration
    }

    /// Number of sink writes that failed since creation
    pub fn sink_failures(&self) -> u64 {
        self.sink_failures.load(Ordering::Relaxed)
    }
}

impl Default for TimeSeriesCache {
    fn default() -> Self {
        Self::new(CacheConfig::default())
    }
}

//! File-backed collaborators for running the daemon without a live cluster
//!
//! Each cluster reads `<dir>/<cluster>.json`, a JSON array of frames where
//! every frame is an array of snapshots. Every scan returns the next frame,
//! wrapping at the end, re-stamped with the current time.

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};
use tracing::{debug, info};

use watchdog_lib::{
    Baseline, BaselineCollector, Collector, ConnectivityManager, HpaBaseline, ScanResult,
    ScanTarget, Snapshot,
};

type Frames = HashMap<String, Vec<Vec<Snapshot>>>;

/// Replays recorded snapshot frames in a loop
pub struct ReplayCollector {
    frames: Arc<Frames>,
    positions: Mutex<HashMap<String, usize>>,
}

impl ReplayCollector {
    /// Read one replay file per cluster from `dir`
    pub fn load(dir: &Path, clusters: &[String]) -> Result<Self> {
        let mut frames = HashMap::new();
        for cluster in clusters {
            let path = dir.join(format!("{}.json", cluster));
            let raw = std::fs::read_to_string(&path)
                .with_context(|| format!("failed to read replay file {}", path.display()))?;
            let cluster_frames: Vec<Vec<Snapshot>> = serde_json::from_str(&raw)
                .with_context(|| format!("invalid replay file {}", path.display()))?;
            if cluster_frames.is_empty() {
                bail!("replay file {} has no frames", path.display());
            }

            info!(
                cluster = %cluster,
                frames = cluster_frames.len(),
                "Loaded replay frames"
            );
            frames.insert(cluster.clone(), cluster_frames);
        }
        Ok(Self::from_frames(frames))
    }

    pub fn from_frames(frames: Frames) -> Self {
        Self {
            frames: Arc::new(frames),
            positions: Mutex::new(HashMap::new()),
        }
    }

    /// Baseline collector over the same recordings
    pub fn baseline_collector(&self) -> ReplayBaselineCollector {
        ReplayBaselineCollector {
            frames: Arc::clone(&self.frames),
        }
    }

    fn next_frame(&self, cluster: &str) -> Option<&[Snapshot]> {
        let frames = self.frames.get(cluster)?;
        let mut positions = self.positions.lock().unwrap_or_else(|e| e.into_inner());
        let position = positions.entry(cluster.to_string()).or_insert(0);
        let frame = frames.get(*position % frames.len())?;
        *position += 1;
        Some(frame.as_slice())
    }
}

#[async_trait]
impl Collector for ReplayCollector {
    async fn scan(&self, target: &ScanTarget, endpoint: &str) -> Result<ScanResult> {
        let started = Instant::now();
        let frame = self
            .next_frame(&target.cluster)
            .ok_or_else(|| anyhow!("no replay data for cluster {}", target.cluster))?;

        let now = Utc::now();
        let snapshots: Vec<Snapshot> = frame
            .iter()
            .filter(|s| target.matches(s))
            .map(|s| {
                let mut snapshot = s.clone();
                snapshot.cluster = target.cluster.clone();
                snapshot.timestamp = now;
                snapshot
            })
            .collect();

        debug!(
            cluster = %target.cluster,
            endpoint = endpoint,
            snapshots = snapshots.len(),
            "Replayed frame"
        );

        Ok(ScanResult {
            snapshots,
            duration: started.elapsed(),
            ..ScanResult::default()
        })
    }
}

/// Baseline built from the first recorded frame of each cluster
pub struct ReplayBaselineCollector {
    frames: Arc<Frames>,
}

#[async_trait]
impl BaselineCollector for ReplayBaselineCollector {
    async fn capture_baseline(
        &self,
        target: &ScanTarget,
        _endpoint: &str,
        lookback: Duration,
    ) -> Result<Baseline> {
        let first = self
            .frames
            .get(&target.cluster)
            .and_then(|frames| frames.first())
            .ok_or_else(|| anyhow!("no replay data for cluster {}", target.cluster))?;

        let mut baseline = Baseline::empty(Utc::now(), lookback);
        for snapshot in first
            .iter()
            .filter(|s| target.matches(s))
        {
            let mut snapshot = snapshot.clone();
            snapshot.cluster = target.cluster.clone();
            if let Some(hpa) = HpaBaseline::from_snapshots(std::slice::from_ref(&snapshot)) {
                baseline.insert(hpa);
            }
        }
        Ok(baseline)
    }
}

/// Fixed metrics endpoints per cluster
pub struct StaticConnectivity {
    endpoints: HashMap<String, String>,
    active: RwLock<HashSet<String>>,
}

impl StaticConnectivity {
    pub fn new(endpoints: HashMap<String, String>) -> Self {
        Self {
            endpoints,
            active: RwLock::new(HashSet::new()),
        }
    }
}

#[async_trait]
impl ConnectivityManager for StaticConnectivity {
    async fn start(&self, cluster: &str) -> Result<()> {
        if !self.endpoints.contains_key(cluster) {
            bail!("no metrics endpoint configured for cluster {}", cluster);
        }
        self.active
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(cluster.to_string());
        Ok(())
    }

    async fn stop_all(&self) -> Result<()> {
        self.active.write().unwrap_or_else(|e| e.into_inner()).clear();
        Ok(())
    }

    fn url(&self, cluster: &str) -> Option<String> {
        let active = self.active.read().unwrap_or_else(|e| e.into_inner());
        if active.contains(cluster) {
            self.endpoints.get(cluster).cloned()
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use watchdog_lib::HpaKey;

    fn frame(replicas: &[(&str, i32)]) -> Vec<Snapshot> {
        replicas
            .iter()
            .map(|(name, count)| {
                let mut s = Snapshot::new(&HpaKey::new("recorded", "payments", *name), Utc::now());
                s.current_replicas = *count;
                s.max_replicas = 10;
                s
            })
            .collect()
    }

    fn write_replay(dir: &Path, cluster: &str, frames: &[Vec<Snapshot>]) {
        let path = dir.join(format!("{}.json", cluster));
        std::fs::write(path, serde_json::to_string(frames).unwrap()).unwrap();
    }

    #[tokio::test]
    async fn test_replay_wraps_and_restamps() {
        let dir = tempfile::tempdir().unwrap();
        write_replay(
            dir.path(),
            "prod",
            &[frame(&[("api", 2)]), frame(&[("api", 4)])],
        );

        let collector = ReplayCollector::load(dir.path(), &["prod".to_string()]).unwrap();
        let target = ScanTarget::cluster("prod");

        let mut seen = Vec::new();
        for _ in 0..3 {
            let result = collector.scan(&target, "http://localhost:9090").await.unwrap();
            assert_eq!(result.snapshots.len(), 1);
            assert_eq!(result.snapshots[0].cluster, "prod");
            seen.push(result.snapshots[0].current_replicas);
        }
        assert_eq!(seen, vec![2, 4, 2]);
    }

    #[tokio::test]
    async fn test_replay_applies_target_filter() {
        let collector = ReplayCollector::from_frames(HashMap::from([(
            "prod".to_string(),
            vec![frame(&[("api", 2), ("worker", 3)])],
        )]));

        let mut target = ScanTarget::cluster("prod");
        target.hpas = vec!["worker".to_string()];

        let result = collector.scan(&target, "").await.unwrap();
        assert_eq!(result.snapshots.len(), 1);
        assert_eq!(result.snapshots[0].name, "worker");
    }

    #[tokio::test]
    async fn test_replay_applies_deployment_filter() {
        let mut recorded = frame(&[("api", 2), ("worker", 3)]);
        recorded[0].deployment = Some("checkout".to_string());
        let collector =
            ReplayCollector::from_frames(HashMap::from([("prod".to_string(), vec![recorded])]));

        let mut target = ScanTarget::cluster("prod");
        target.deployments = vec!["checkout".to_string()];

        let result = collector.scan(&target, "").await.unwrap();
        assert_eq!(result.snapshots.len(), 1);
        assert_eq!(result.snapshots[0].name, "api");
    }

    #[tokio::test]
    async fn test_unknown_cluster_fails() {
        let collector = ReplayCollector::from_frames(HashMap::new());
        assert!(collector.scan(&ScanTarget::cluster("nope"), "").await.is_err());
    }

    #[test]
    fn test_load_rejects_missing_and_empty_files() {
        let dir = tempfile::tempdir().unwrap();
        assert!(ReplayCollector::load(dir.path(), &["prod".to_string()]).is_err());

        write_replay(dir.path(), "prod", &[]);
        assert!(ReplayCollector::load(dir.path(), &["prod".to_string()]).is_err());
    }

    #[tokio::test]
    async fn test_baseline_from_first_frame() {
        let collector = ReplayCollector::from_frames(HashMap::from([(
            "prod".to_string(),
            vec![frame(&[("api", 2), ("worker", 3)]), frame(&[("api", 9)])],
        )]));

        let baseline = collector
            .baseline_collector()
            .capture_baseline(&ScanTarget::cluster("prod"), "", Duration::from_secs(1800))
            .await
            .unwrap();

        assert_eq!(baseline.total_hpas, 2);
        assert_eq!(baseline.total_replicas, 5);
        assert_eq!(baseline.lookback_secs, 1800);
        assert!(baseline.get(&HpaKey::new("prod", "payments", "api")).is_some());
    }

    #[tokio::test]
    async fn test_static_connectivity() {
        let connectivity = StaticConnectivity::new(HashMap::from([(
            "prod".to_string(),
            "http://localhost:9090".to_string(),
        )]));

        assert_eq!(connectivity.url("prod"), None);
        connectivity.start("prod").await.unwrap();
        assert_eq!(connectivity.url("prod").as_deref(), Some("http://localhost:9090"));

        assert!(connectivity.start("staging").await.is_err());
        assert_eq!(connectivity.url("staging"), None);

        connectivity.stop_all().await.unwrap();
        assert_eq!(connectivity.url("prod"), None);
    }
}

//! Engine behaviour tests
//!
//! Collaborators are hand-written mocks; timers run on tokio's paused clock
//! so interval and timeout behaviour is deterministic.

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::broadcast;

use super::*;
use crate::anomaly::AnomalyType;
use crate::collaborators::ScanResult;
use crate::config::{ScanMode, ScanTarget};
use crate::health::ComponentStatus;
use crate::models::{HpaBaseline, HpaKey, StressTestStatus};

const INTERVAL: Duration = Duration::from_secs(30);

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap()
}

fn snapshot(cluster: &str, name: &str, replicas: i32, at: DateTime<Utc>) -> Snapshot {
    let mut s = Snapshot::new(&HpaKey::new(cluster, "default", name), at);
    s.max_replicas = 50;
    s.current_replicas = replicas;
    s.cpu_target = 70;
    s.cpu_current = 40.0;
    s
}

/// Scripted collector: each call for a cluster returns the next frame,
/// repeating the last one when the script runs out
struct MockCollector {
    frames: Mutex<HashMap<String, Vec<Vec<Snapshot>>>>,
    positions: Mutex<HashMap<String, usize>>,
    failing: HashSet<String>,
    hanging: HashSet<String>,
    calls: AtomicUsize,
}

impl MockCollector {
    fn new() -> Self {
        Self {
            frames: Mutex::new(HashMap::new()),
            positions: Mutex::new(HashMap::new()),
            failing: HashSet::new(),
            hanging: HashSet::new(),
            calls: AtomicUsize::new(0),
        }
    }

    fn with_frames(self, cluster: &str, frames: Vec<Vec<Snapshot>>) -> Self {
        self.frames
            .lock()
            .unwrap()
            .insert(cluster.to_string(), frames);
        self
    }

    /// One snapshot per call with the timestamp advancing by the interval
    fn with_generated(self, cluster: &str, calls: usize, make: impl Fn(DateTime<Utc>) -> Snapshot) -> Self {
        let frames = (0..calls)
            .map(|i| vec![make(t0() + chrono::Duration::seconds(i as i64 * INTERVAL.as_secs() as i64))])
            .collect();
        self.with_frames(cluster, frames)
    }

    fn failing(mut self, cluster: &str) -> Self {
        self.failing.insert(cluster.to_string());
        self
    }

    fn hanging(mut self, cluster: &str) -> Self {
        self.hanging.insert(cluster.to_string());
        self
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Collector for MockCollector {
    async fn scan(&self, target: &ScanTarget, _endpoint: &str) -> anyhow::Result<ScanResult> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        if self.hanging.contains(&target.cluster) {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        }
        if self.failing.contains(&target.cluster) {
            anyhow::bail!("metrics backend unreachable");
        }

        let snapshots = {
            let frames = self.frames.lock().unwrap();
            let mut positions = self.positions.lock().unwrap();
            match frames.get(&target.cluster) {
                Some(script) if !script.is_empty() => {
                    let pos = positions.entry(target.cluster.clone()).or_insert(0);
                    let frame = script[(*pos).min(script.len() - 1)].clone();
                    *pos += 1;
                    frame
                }
                _ => Vec::new(),
            }
        };

        Ok(ScanResult {
            snapshots,
            anomalies: Vec::new(),
            errors: Vec::new(),
            duration: Duration::from_millis(5),
        })
    }
}

struct MockConnectivity {
    unavailable: HashSet<String>,
    started: AtomicUsize,
    stopped: AtomicUsize,
}

impl MockConnectivity {
    fn new() -> Self {
        Self {
            unavailable: HashSet::new(),
            started: AtomicUsize::new(0),
            stopped: AtomicUsize::new(0),
        }
    }

    fn unavailable(mut self, cluster: &str) -> Self {
        self.unavailable.insert(cluster.to_string());
        self
    }
}

#[async_trait]
impl ConnectivityManager for MockConnectivity {
    async fn start(&self, cluster: &str) -> anyhow::Result<()> {
        self.started.fetch_add(1, Ordering::SeqCst);
        if self.unavailable.contains(cluster) {
            anyhow::bail!("port-forward failed for {}", cluster);
        }
        Ok(())
    }

    async fn stop_all(&self) -> anyhow::Result<()> {
        self.stopped.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn url(&self, cluster: &str) -> Option<String> {
        if self.unavailable.contains(cluster) {
            None
        } else {
            Some(format!("http://localhost:9090/{}", cluster))
        }
    }
}

struct MockBaselineCollector {
    baseline: Baseline,
}

#[async_trait]
impl BaselineCollector for MockBaselineCollector {
    async fn capture_baseline(
        &self,
        _target: &ScanTarget,
        _endpoint: &str,
        lookback: Duration,
    ) -> anyhow::Result<Baseline> {
        assert_eq!(lookback, Duration::from_secs(1800));
        Ok(self.baseline.clone())
    }
}

#[derive(Default)]
struct RecordingSink {
    snapshots: AtomicUsize,
    baselines: Mutex<Vec<String>>,
    results: Mutex<Vec<StressTestMetrics>>,
}

#[async_trait]
impl PersistenceSink for RecordingSink {
    async fn save_snapshot(&self, _snapshot: &Snapshot) -> anyhow::Result<()> {
        self.snapshots.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn save_baseline(&self, test_id: &str, _baseline: &Baseline) -> anyhow::Result<()> {
        self.baselines.lock().unwrap().push(test_id.to_string());
        Ok(())
    }

    async fn save_stress_result(
        &self,
        _test_id: &str,
        metrics: &StressTestMetrics,
    ) -> anyhow::Result<()> {
        self.results.lock().unwrap().push(metrics.clone());
        Ok(())
    }
}

/// Sink whose every write fails
struct FailingSink;

#[async_trait]
impl PersistenceSink for FailingSink {
    async fn save_snapshot(&self, _snapshot: &Snapshot) -> anyhow::Result<()> {
        anyhow::bail!("disk full")
    }

    async fn save_baseline(&self, _test_id: &str, _baseline: &Baseline) -> anyhow::Result<()> {
        anyhow::bail!("disk full")
    }

    async fn save_stress_result(
        &self,
        _test_id: &str,
        _metrics: &StressTestMetrics,
    ) -> anyhow::Result<()> {
        anyhow::bail!("disk full")
    }
}

fn targets(clusters: &[&str]) -> Vec<ScanTarget> {
    clusters.iter().map(|c| ScanTarget::cluster(*c)).collect()
}

fn build(
    config: ScanConfig,
    collector: Arc<MockCollector>,
    connectivity: Arc<MockConnectivity>,
) -> (ScanEngine, EngineStreams) {
    ScanEngine::builder(config)
        .collector(collector)
        .connectivity(connectivity)
        .build()
        .unwrap()
}

/// Let spawned tasks run without moving the clock past the next tick
async fn settle() {
    tokio::time::sleep(Duration::from_millis(10)).await;
}

#[tokio::test(start_paused = true)]
async fn test_start_is_idempotent() {
    let collector = Arc::new(MockCollector::new());
    let connectivity = Arc::new(MockConnectivity::new());
    let config = ScanConfig::new(ScanMode::Full, targets(&["a", "b"]), INTERVAL);
    let (engine, _streams) = build(config, collector.clone(), connectivity.clone());

    engine.start().await.unwrap();
    engine.start().await.unwrap();
    settle().await;

    assert!(engine.is_running().await);
    assert_eq!(connectivity.started.load(Ordering::SeqCst), 2);
    // One immediate scan over both targets
    assert_eq!(collector.calls(), 2);

    engine.stop().await;
    assert!(!engine.is_running().await);
}

#[tokio::test(start_paused = true)]
async fn test_stop_when_stopped_is_noop() {
    let collector = Arc::new(MockCollector::new());
    let connectivity = Arc::new(MockConnectivity::new());
    let config = ScanConfig::new(ScanMode::Full, targets(&["a"]), INTERVAL);
    let (engine, _streams) = build(config, collector.clone(), connectivity.clone());

    engine.stop().await;
    assert!(!engine.is_running().await);
    assert_eq!(connectivity.stopped.load(Ordering::SeqCst), 0);

    engine.start().await.unwrap();
    engine.stop().await;
    engine.stop().await;
    assert_eq!(connectivity.stopped.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_start_rejects_invalid_config() {
    let config = ScanConfig::new(ScanMode::Full, Vec::new(), INTERVAL);
    let result = ScanEngine::builder(config)
        .collector(Arc::new(MockCollector::new()))
        .connectivity(Arc::new(MockConnectivity::new()))
        .build();
    assert!(matches!(result, Err(EngineError::InvalidConfig(_))));

    let missing_collector = ScanEngine::builder(ScanConfig::new(ScanMode::Full, targets(&["a"]), INTERVAL))
        .connectivity(Arc::new(MockConnectivity::new()))
        .build();
    assert!(missing_collector.is_err());
}

#[tokio::test(start_paused = true)]
async fn test_pause_skips_ticks() {
    let collector = Arc::new(MockCollector::new());
    let connectivity = Arc::new(MockConnectivity::new());
    let config = ScanConfig::new(ScanMode::Full, targets(&["a"]), INTERVAL);
    let (engine, _streams) = build(config, collector.clone(), connectivity.clone());

    // Pausing a stopped engine does nothing
    engine.pause().await;
    assert!(!engine.is_paused().await);

    engine.start().await.unwrap();
    settle().await;
    assert_eq!(collector.calls(), 1);

    engine.pause().await;
    engine.pause().await;
    assert!(engine.is_paused().await);

    tokio::time::sleep(INTERVAL * 3).await;
    assert_eq!(collector.calls(), 1);
    // Connectivity stays up while paused
    assert_eq!(connectivity.stopped.load(Ordering::SeqCst), 0);

    engine.resume().await;
    assert!(!engine.is_paused().await);
    tokio::time::sleep(INTERVAL).await;
    settle().await;
    assert_eq!(collector.calls(), 2);

    engine.stop().await;
    assert!(!engine.is_paused().await);
}

#[tokio::test(start_paused = true)]
async fn test_failing_target_is_isolated() {
    let collector = Arc::new(
        MockCollector::new()
            .with_frames("good", vec![vec![snapshot("good", "api", 3, t0())]])
            .failing("bad"),
    );
    let connectivity = Arc::new(MockConnectivity::new());
    let health = HealthRegistry::new();
    let config = ScanConfig::new(ScanMode::Full, targets(&["bad", "good"]), INTERVAL);
    let (engine, _streams) = ScanEngine::builder(config)
        .collector(collector.clone())
        .connectivity(connectivity)
        .health(health.clone())
        .build()
        .unwrap();

    engine.start().await.unwrap();
    settle().await;

    assert_eq!(collector.calls(), 2);
    assert!(engine
        .cache()
        .get_latest(&HpaKey::new("good", "default", "api"))
        .is_some());
    let collector_health = health.get(components::COLLECTOR).await.unwrap();
    assert_eq!(collector_health.status, ComponentStatus::Degraded);

    engine.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_unavailable_connectivity_skips_target() {
    let collector = Arc::new(
        MockCollector::new().with_frames("up", vec![vec![snapshot("up", "api", 3, t0())]]),
    );
    let connectivity = Arc::new(MockConnectivity::new().unavailable("down"));
    let health = HealthRegistry::new();
    let config = ScanConfig::new(ScanMode::Full, targets(&["down", "up"]), INTERVAL);
    let (engine, _streams) = ScanEngine::builder(config)
        .collector(collector.clone())
        .connectivity(connectivity)
        .health(health.clone())
        .build()
        .unwrap();

    engine.start().await.unwrap();
    settle().await;

    // Only the reachable target reached the collector
    assert_eq!(collector.calls(), 1);
    assert_eq!(engine.cache().len(), 1);
    assert_eq!(
        health.get(components::CONNECTIVITY).await.unwrap().status,
        ComponentStatus::Degraded
    );

    engine.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_snapshot_sink_failure_degrades_persistence() {
    let collector = Arc::new(
        MockCollector::new().with_frames("prod", vec![vec![snapshot("prod", "api", 3, t0())]]),
    );
    let connectivity = Arc::new(MockConnectivity::new());
    let health = HealthRegistry::new();
    health.register_all().await;
    let config = ScanConfig::new(ScanMode::Full, targets(&["prod"]), INTERVAL);
    let (engine, _streams) = ScanEngine::builder(config)
        .collector(collector)
        .connectivity(connectivity)
        .health(health.clone())
        .sink(Arc::new(FailingSink))
        .build()
        .unwrap();

    engine.start().await.unwrap();
    settle().await;

    // The snapshot is cached even though the sink rejected it
    assert!(engine
        .cache()
        .get_latest(&HpaKey::new("prod", "default", "api"))
        .is_some());
    assert_eq!(engine.cache().sink_failures(), 1);

    let persistence = health.get(components::PERSISTENCE).await.unwrap();
    assert_eq!(persistence.status, ComponentStatus::Degraded);
    assert!(persistence
        .message
        .as_deref()
        .unwrap()
        .starts_with("save_snapshot failed"));
    assert!(engine.is_running().await);

    engine.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_hung_target_times_out() {
    let collector = Arc::new(
        MockCollector::new()
            .hanging("slow")
            .with_frames("fast", vec![vec![snapshot("fast", "api", 2, t0())]]),
    );
    let connectivity = Arc::new(MockConnectivity::new());
    let config = ScanConfig::new(ScanMode::Full, targets(&["slow", "fast"]), Duration::from_secs(600));
    let (engine, _streams) = build(config, collector.clone(), connectivity);

    engine.start().await.unwrap();
    tokio::time::sleep(Duration::from_secs(121)).await;

    assert_eq!(collector.calls(), 2);
    assert!(engine
        .cache()
        .get_latest(&HpaKey::new("fast", "default", "api"))
        .is_some());

    engine.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_stop_interrupts_hung_scan() {
    let collector = Arc::new(MockCollector::new().hanging("slow"));
    let connectivity = Arc::new(MockConnectivity::new());
    let config = ScanConfig::new(ScanMode::Full, targets(&["slow"]), INTERVAL);
    let (engine, _streams) = build(config, collector.clone(), connectivity);

    engine.start().await.unwrap();
    settle().await;

    let stopped_at = Instant::now();
    engine.stop().await;
    assert!(stopped_at.elapsed() < Duration::from_secs(1));
    assert!(!engine.is_running().await);
}

#[tokio::test(start_paused = true)]
async fn test_full_stream_drops_without_blocking() {
    let frame: Vec<Snapshot> = (0..5)
        .map(|i| snapshot("a", &format!("hpa-{}", i), 2, t0()))
        .collect();
    let collector = Arc::new(MockCollector::new().with_frames("a", vec![frame]));
    let connectivity = Arc::new(MockConnectivity::new());
    let options = EngineOptions {
        snapshot_buffer: 1,
        ..EngineOptions::default()
    };
    let config = ScanConfig::new(ScanMode::Full, targets(&["a"]), INTERVAL);
    let (engine, mut streams) = ScanEngine::builder(config)
        .collector(collector)
        .connectivity(connectivity)
        .options(options)
        .build()
        .unwrap();

    engine.start().await.unwrap();
    settle().await;

    // Nobody reads the stream, yet the cycle completed and cached everything
    let status = engine.status().await;
    assert_eq!(status.scans, 1);
    assert_eq!(status.hpas_tracked, 5);
    assert_eq!(status.snapshots_dropped, 4);
    assert!(streams.snapshots.try_recv().is_ok());
    assert!(streams.snapshots.try_recv().is_err());

    engine.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_bounded_run_stops_itself() {
    let collector = Arc::new(MockCollector::new());
    let connectivity = Arc::new(MockConnectivity::new());
    let config = ScanConfig::new(ScanMode::Full, targets(&["a"]), Duration::from_secs(10))
        .with_duration(Duration::from_secs(60));
    let (engine, _streams) = build(config, collector.clone(), connectivity.clone());

    engine.start().await.unwrap();
    tokio::time::sleep(Duration::from_secs(120)).await;

    assert!(!engine.is_running().await);
    assert_eq!(collector.calls(), 6);
    assert_eq!(connectivity.stopped.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_sustained_anomaly_emitted_once_within_cooldown() {
    let collector = Arc::new(MockCollector::new().with_generated("prod", 8, |at| {
        let mut s = snapshot("prod", "api", 10, at);
        s.max_replicas = 10;
        s.cpu_current = 95.0;
        s
    }));
    let connectivity = Arc::new(MockConnectivity::new());
    let config = ScanConfig::new(ScanMode::Full, targets(&["prod"]), INTERVAL);
    let (engine, mut streams) = build(config, collector.clone(), connectivity);

    engine.start().await.unwrap();
    // Initial scan plus seven ticks covers 3.5 minutes of samples
    tokio::time::sleep(INTERVAL * 7).await;
    settle().await;
    engine.stop().await;
    assert_eq!(collector.calls(), 8);

    let mut maxed = 0;
    while let Ok(anomaly) = streams.anomalies.try_recv() {
        assert_eq!(anomaly.key, HpaKey::new("prod", "default", "api"));
        if anomaly.anomaly_type == AnomalyType::MaxedOut {
            maxed += 1;
        }
    }
    assert_eq!(maxed, 1);
}

fn stress_baseline() -> Baseline {
    let mut baseline = Baseline::empty(t0(), Duration::from_secs(1800));
    for (name, replicas) in [("api", 8), ("worker", 12)] {
        baseline.insert(HpaBaseline {
            key: HpaKey::new("prod", "default", name),
            min_replicas: 1,
            max_replicas: 50,
            replicas,
            cpu_avg: 40.0,
            cpu_max: 45.0,
            cpu_target: 70,
            memory_avg: 0.0,
            memory_max: 0.0,
            error_rate_avg: None,
            p95_latency_avg: None,
        });
    }
    baseline
}

#[tokio::test(start_paused = true)]
async fn test_stress_run_finalizes_once() {
    let at = |i: i64| t0() + chrono::Duration::seconds(i * 10);
    let collector = Arc::new(MockCollector::new().with_frames(
        "prod",
        vec![
            vec![snapshot("prod", "api", 10, at(0)), snapshot("prod", "worker", 15, at(0))],
            vec![snapshot("prod", "api", 15, at(1)), snapshot("prod", "worker", 20, at(1))],
            vec![snapshot("prod", "api", 12, at(2)), snapshot("prod", "worker", 16, at(2))],
        ],
    ));
    let connectivity = Arc::new(MockConnectivity::new());
    let sink = Arc::new(RecordingSink::default());
    let config = ScanConfig::new(ScanMode::StressTest, targets(&["prod"]), Duration::from_secs(10))
        .with_duration(Duration::from_secs(30));

    let (engine, mut streams) = ScanEngine::builder(config)
        .collector(collector.clone())
        .connectivity(connectivity)
        .baseline_collector(Arc::new(MockBaselineCollector {
            baseline: stress_baseline(),
        }))
        .sink(sink.clone())
        .build()
        .unwrap();

    engine.start().await.unwrap();
    assert!(engine.status().await.test_id.is_some());

    let result = streams.stress_results.recv().await.unwrap();
    assert_eq!(collector.calls(), 3);

    let peak = &result.peak_metrics;
    assert_eq!(peak.total_replicas_pre, 20);
    assert_eq!(peak.total_replicas_peak, 35);
    assert_eq!(peak.total_replicas_post, 28);
    assert_eq!(peak.replica_increase, 15);
    assert_eq!(peak.replica_increase_percent, 75.0);
    assert_eq!(result.status, StressTestStatus::Completed);
    assert_eq!(result.total_scans, 3);

    // Stopping again neither re-finalizes nor re-emits
    settle().await;
    engine.stop().await;
    assert!(streams.stress_results.try_recv().is_err());

    assert_eq!(sink.results.lock().unwrap().len(), 1);
    assert_eq!(sink.baselines.lock().unwrap().len(), 1);
    assert_eq!(sink.baselines.lock().unwrap()[0], result.test_id);
    assert_eq!(sink.snapshots.load(Ordering::SeqCst), 6);
}

#[tokio::test(start_paused = true)]
async fn test_stress_run_without_baseline_fails() {
    let collector = Arc::new(
        MockCollector::new().with_frames("prod", vec![vec![snapshot("prod", "api", 4, t0())]]),
    );
    let connectivity = Arc::new(MockConnectivity::new());
    let config = ScanConfig::new(ScanMode::StressTest, targets(&["prod"]), INTERVAL);
    let (engine, mut streams) = build(config, collector, connectivity);

    engine.start().await.unwrap();
    settle().await;
    engine.stop().await;

    let result = streams.stress_results.try_recv().unwrap();
    assert_eq!(result.status, StressTestStatus::Failed);
    assert_eq!(result.total_scans, 1);
}

#[tokio::test(start_paused = true)]
async fn test_restart_clears_cache_and_rescans() {
    let collector = Arc::new(
        MockCollector::new().with_frames(
            "a",
            vec![
                vec![snapshot("a", "old", 2, t0())],
                vec![snapshot("a", "new", 2, t0())],
            ],
        ),
    );
    let connectivity = Arc::new(MockConnectivity::new());
    let config = ScanConfig::new(ScanMode::Full, targets(&["a"]), INTERVAL);
    let (engine, _streams) = build(config, collector.clone(), connectivity.clone());

    engine.start().await.unwrap();
    settle().await;
    assert!(engine.cache().get_latest(&HpaKey::new("a", "default", "old")).is_some());

    engine.restart().await.unwrap();
    settle().await;

    assert!(engine.is_running().await);
    assert_eq!(collector.calls(), 2);
    assert_eq!(connectivity.stopped.load(Ordering::SeqCst), 1);
    assert_eq!(connectivity.started.load(Ordering::SeqCst), 2);
    assert!(engine.cache().get_latest(&HpaKey::new("a", "default", "old")).is_none());
    assert!(engine.cache().get_latest(&HpaKey::new("a", "default", "new")).is_some());

    engine.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_supervisor_applies_commands() {
    let collector = Arc::new(MockCollector::new());
    let connectivity = Arc::new(MockConnectivity::new());
    let config = ScanConfig::new(ScanMode::Full, targets(&["a"]), INTERVAL);
    let (engine, _streams) = build(config, collector, connectivity);
    engine.start().await.unwrap();

    let (controller, supervisor) = EngineSupervisor::new(engine.clone());
    let (_shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let handle = tokio::spawn(supervisor.run(shutdown_rx));

    controller.toggle_pause().unwrap();
    settle().await;
    assert!(engine.is_paused().await);

    controller.toggle_pause().unwrap();
    settle().await;
    assert!(!engine.is_paused().await);

    controller.stop().unwrap();
    handle.await.unwrap();
    assert!(!engine.is_running().await);

    // Supervisor gone, commands report it
    assert_eq!(controller.restart(), Err(crate::error::ControlError::Disconnected));
}

#[tokio::test(start_paused = true)]
async fn test_supervisor_stops_engine_on_shutdown() {
    let collector = Arc::new(MockCollector::new());
    let connectivity = Arc::new(MockConnectivity::new());
    let config = ScanConfig::new(ScanMode::Full, targets(&["a"]), INTERVAL);
    let (engine, _streams) = build(config, collector, connectivity);
    engine.start().await.unwrap();

    let (_controller, supervisor) = EngineSupervisor::new(engine.clone());
    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let handle = tokio::spawn(supervisor.run(shutdown_rx));

    shutdown_tx.send(()).unwrap();
    handle.await.unwrap();
    assert!(!engine.is_running().await);
}

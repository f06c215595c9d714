//! Scan orchestration
//!
//! The engine owns the run lifecycle (stopped, running, paused) and drives
//! periodic collection:
//! - Connects every target's metrics backend on start
//! - Scans each target in isolation with a bounded timeout per target
//! - Feeds the time-series cache, runs detection and pushes results
//!   downstream without ever blocking on a slow consumer
//! - In stress mode, captures a baseline first and grades every cycle
//!   against it, producing one final report on stop

mod control;
mod outbox;
mod stress;

#[cfg(test)]
mod tests;

pub use control::{EngineController, EngineSupervisor};
pub use outbox::{streams, Outbox};

use chrono::Utc;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, watch, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::anomaly::{
    AlertCooldown, Anomaly, AnomalyDetector, BaselineComparatorFactory, DetectorConfig,
};
use crate::cache::{CacheConfig, TimeSeriesCache};
use crate::collaborators::{
    BaselineCollector, Collector, ComparatorFactory, ComparisonSummary, ConnectivityManager,
    PersistenceSink,
};
use crate::config::{EngineOptions, ScanConfig};
use crate::error::EngineError;
use crate::health::{components, HealthRegistry};
use crate::models::{Baseline, Snapshot, StressTestMetrics};
use crate::observability::{StructuredLogger, WatchdogMetrics};
use stress::StressRun;

/// Receiving ends of the engine's downstream streams
pub struct EngineStreams {
    pub snapshots: mpsc::Receiver<Snapshot>,
    pub anomalies: mpsc::Receiver<Anomaly>,
    pub stress_results: mpsc::Receiver<StressTestMetrics>,
}

/// Point-in-time view of the engine for status endpoints
#[derive(Debug, Clone, Serialize)]
pub struct EngineStatus {
    pub running: bool,
    pub paused: bool,
    pub mode: String,
    pub targets: usize,
    pub scans: u64,
    pub hpas_tracked: usize,
    pub snapshots_dropped: u64,
    pub anomalies_dropped: u64,
    pub stress_results_dropped: u64,
    pub test_id: Option<String>,
    /// Latest baseline comparison of a stress run
    pub comparison: Option<ComparisonSummary>,
}

#[derive(Default)]
struct EngineState {
    running: bool,
    paused: bool,
    /// Incremented on every start so a stale self-stop cannot end a newer run
    generation: u64,
    cancel: Option<watch::Sender<bool>>,
    worker: Option<JoinHandle<()>>,
}

/// Periodic multi-target scanner with lifecycle control
///
/// Cheap to clone; clones drive the same engine.
#[derive(Clone)]
pub struct ScanEngine {
    inner: Arc<EngineInner>,
}

struct EngineInner {
    config: ScanConfig,
    options: EngineOptions,

    cache: Arc<TimeSeriesCache>,
    detector: AnomalyDetector,
    cooldown: AlertCooldown,

    collector: Arc<dyn Collector>,
    connectivity: Arc<dyn ConnectivityManager>,
    baseline_collector: Option<Arc<dyn BaselineCollector>>,
    comparator_factory: Arc<dyn ComparatorFactory>,
    sink: Option<Arc<dyn PersistenceSink>>,

    snapshots: Outbox<Snapshot>,
    anomalies: Outbox<Anomaly>,
    stress_results: Outbox<StressTestMetrics>,

    health: HealthRegistry,
    metrics: WatchdogMetrics,
    logger: StructuredLogger,

    /// Serializes start, stop and restart
    lifecycle: Mutex<()>,
    state: RwLock<EngineState>,
    stress: Mutex<Option<StressRun>>,
    scans: AtomicU64,
}

impl ScanEngine {
    pub fn builder(config: ScanConfig) -> ScanEngineBuilder {
        ScanEngineBuilder::new(config)
    }

    /// Start scanning. No-op if already running.
    ///
    /// Fails only for an unusable configuration; unreachable targets and a
    /// failed baseline capture are logged and tolerated.
    pub async fn start(&self) -> Result<(), EngineError> {
        let _guard = self.inner.lifecycle.lock().await;
        self.start_locked().await
    }

    /// Stop scanning and wait for the scan loop to exit. No-op if stopped.
    pub async fn stop(&self) {
        let _guard = self.inner.lifecycle.lock().await;
        self.stop_locked(None, "stop requested").await;
    }

    /// Stop, clear the cache and start a fresh run
    pub async fn restart(&self) -> Result<(), EngineError> {
        let _guard = self.inner.lifecycle.lock().await;
        info!("Restarting scan engine");

        self.stop_locked(None, "restart").await;
        self.inner.cache.clear();
        self.inner.cooldown.clear();
        tokio::time::sleep(self.inner.options.restart_delay).await;

        self.start_locked().await
    }

    /// Suspend scanning; connectivity stays up. No-op unless running.
    pub async fn pause(&self) {
        let mut state = self.inner.state.write().await;
        if state.running && !state.paused {
            state.paused = true;
            info!("Scan engine paused");
        }
    }

    /// Resume a paused engine. No-op unless paused.
    pub async fn resume(&self) {
        let mut state = self.inner.state.write().await;
        if state.running && state.paused {
            state.paused = false;
            info!("Scan engine resumed");
        }
    }

    pub async fn is_running(&self) -> bool {
        self.inner.state.read().await.running
    }

    pub async fn is_paused(&self) -> bool {
        self.inner.state.read().await.paused
    }

    pub fn cache(&self) -> &Arc<TimeSeriesCache> {
        &self.inner.cache
    }

    pub fn config(&self) -> &ScanConfig {
        &self.inner.config
    }

    pub async fn status(&self) -> EngineStatus {
        let (running, paused) = {
            let state = self.inner.state.read().await;
            (state.running, state.paused)
        };
        let (test_id, comparison) = match self.inner.stress.lock().await.as_ref() {
            Some(run) => (
                Some(run.test_id().to_string()),
                run.last_summary().cloned(),
            ),
            None => (None, None),
        };

        EngineStatus {
            running,
            paused,
            mode: self.inner.config.mode.to_string(),
            targets: self.inner.config.targets.len(),
            scans: self.inner.scans.load(Ordering::Relaxed),
            hpas_tracked: self.inner.cache.len(),
            snapshots_dropped: self.inner.snapshots.dropped(),
            anomalies_dropped: self.inner.anomalies.dropped(),
            stress_results_dropped: self.inner.stress_results.dropped(),
            test_id,
            comparison,
        }
    }

    async fn start_locked(&self) -> Result<(), EngineError> {
        let inner = &self.inner;
        if inner.state.read().await.running {
            debug!("Scan engine already running");
            return Ok(());
        }
        inner.config.validate()?;

        inner.connect_targets().await;

        if inner.config.is_stress_test() {
            let run = inner.prepare_stress_run().await;
            *inner.stress.lock().await = Some(run);
        }

        let (cancel_tx, cancel_rx) = watch::channel(false);
        let mut state = inner.state.write().await;
        state.generation += 1;
        state.running = true;
        state.paused = false;
        state.cancel = Some(cancel_tx);

        let generation = state.generation;
        let worker = tokio::spawn(inner.clone().run_loop(generation, cancel_rx));
        state.worker = Some(worker);
        drop(state);

        inner.health.set_healthy(components::ENGINE).await;
        inner.health.set_ready(true).await;
        inner.logger.log_started(
            &inner.config.mode.to_string(),
            inner.config.targets.len(),
            inner.config.interval.as_secs(),
        );
        Ok(())
    }

    async fn stop_locked(&self, generation: Option<u64>, reason: &str) {
        self.inner.clone().stop_run(generation, reason).await;
    }
}

impl EngineInner {
    async fn stop_run(self: Arc<Self>, generation: Option<u64>, reason: &str) {
        let (cancel, worker) = {
            let mut state = self.state.write().await;
            if !state.running {
                debug!("Scan engine already stopped");
                return;
            }
            if generation.is_some_and(|g| g != state.generation) {
                return;
            }
            (state.cancel.take(), state.worker.take())
        };

        if let Some(cancel) = cancel {
            let _ = cancel.send(true);
        }
        if let Some(worker) = worker {
            if let Err(e) = worker.await {
                error!(error = %e, "Scan loop terminated abnormally");
            }
        }

        if let Err(e) = self.connectivity.stop_all().await {
            warn!(error = %e, "Failed to tear down connectivity");
        }

        self.finalize_stress_run().await;

        {
            let mut state = self.state.write().await;
            state.running = false;
            state.paused = false;
        }
        self.health.set_ready(false).await;
        self.logger.log_stopped(reason);
    }

    async fn connect_targets(&self) {
        let mut failed = 0usize;
        for target in &self.config.targets {
            if let Err(e) = self.connectivity.start(&target.cluster).await {
                failed += 1;
                warn!(cluster = %target.cluster, error = %e, "Failed to establish connectivity");
            }
        }

        if failed == 0 {
            self.health.set_healthy(components::CONNECTIVITY).await;
        } else {
            self.health
                .set_degraded(
                    components::CONNECTIVITY,
                    format!("{} of {} targets unreachable", failed, self.config.targets.len()),
                )
                .await;
        }
    }

    async fn prepare_stress_run(&self) -> StressRun {
        let test_id = uuid::Uuid::new_v4().to_string();
        let mut run = StressRun::new(
            test_id.clone(),
            Utc::now(),
            self.config.interval,
            self.config.targets.len(),
        );

        match self.capture_baseline().await {
            Some(baseline) => {
                info!(
                    test_id = %test_id,
                    hpas = baseline.total_hpas,
                    replicas = baseline.total_replicas,
                    "Baseline captured"
                );
                if let Some(sink) = &self.sink {
                    if let Err(e) = sink.save_baseline(&test_id, &baseline).await {
                        self.persistence_failed("save_baseline", &e).await;
                    }
                }
                run.attach_baseline(baseline, self.comparator_factory.as_ref());
            }
            None => {
                warn!(test_id = %test_id, "No baseline captured, stress test continues without comparison");
            }
        }
        run
    }

    async fn capture_baseline(&self) -> Option<Baseline> {
        let Some(collector) = &self.baseline_collector else {
            warn!("No baseline collector configured");
            return None;
        };

        let mut merged: Option<Baseline> = None;
        for target in &self.config.targets {
            let Some(endpoint) = self.connectivity.url(&target.cluster) else {
                warn!(cluster = %target.cluster, "Connectivity unavailable, skipping baseline");
                continue;
            };

            let capture = collector.capture_baseline(target, &endpoint, self.options.baseline_lookback);
            match tokio::time::timeout(self.options.baseline_timeout, capture).await {
                Ok(Ok(baseline)) => match merged.as_mut() {
                    Some(existing) => existing.merge(baseline),
                    None => merged = Some(baseline),
                },
                Ok(Err(e)) => {
                    warn!(cluster = %target.cluster, error = %e, "Baseline capture failed");
                }
                Err(_) => {
                    warn!(
                        cluster = %target.cluster,
                        timeout_secs = self.options.baseline_timeout.as_secs(),
                        "Baseline capture timed out"
                    );
                }
            }
        }
        merged
    }

    async fn run_loop(self: Arc<Self>, generation: u64, mut cancel: watch::Receiver<bool>) {
        let interval = self.config.interval;
        let max_scans = self.config.estimate_scans();
        let deadline =
            (!self.config.duration.is_zero()).then(|| Instant::now() + self.config.duration);

        info!(
            interval_secs = interval.as_secs(),
            max_scans = max_scans,
            "Starting scan loop"
        );

        self.scan_cycle(&mut cancel).await;

        let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut ticks = 0u64;

        let finished = loop {
            tokio::select! {
                _ = cancelled(&mut cancel) => {
                    info!("Scan loop cancelled");
                    break None;
                }
                _ = wait_until(deadline) => {
                    info!("Scan duration elapsed");
                    break Some("duration elapsed");
                }
                _ = ticker.tick() => {
                    if self.state.read().await.paused {
                        debug!("Scan paused, tick skipped");
                        continue;
                    }

                    ticks += 1;
                    if max_scans > 0 && ticks >= max_scans {
                        info!(scans = ticks, "Maximum scan count reached");
                        break Some("max scans reached");
                    }

                    self.scan_cycle(&mut cancel).await;
                }
            }
        };

        // The stop path joins this task, so it has to run elsewhere
        if let Some(reason) = finished {
            let engine = ScanEngine {
                inner: self.clone(),
            };
            tokio::spawn(async move {
                let _guard = engine.inner.lifecycle.lock().await;
                engine.inner.clone().stop_run(Some(generation), reason).await;
            });
        }
    }

    async fn scan_cycle(&self, cancel: &mut watch::Receiver<bool>) {
        let started = Instant::now();
        let targets = self.config.targets.len();
        let mut failed = 0usize;
        let mut collected: Vec<Snapshot> = Vec::new();
        let mut reported: Vec<Anomaly> = Vec::new();

        for target in &self.config.targets {
            if *cancel.borrow() {
                return;
            }

            let Some(endpoint) = self.connectivity.url(&target.cluster) else {
                warn!(cluster = %target.cluster, "Connectivity unavailable, skipping target");
                self.metrics.inc_target_failures(&target.cluster);
                failed += 1;
                continue;
            };

            let scan = tokio::time::timeout(
                self.options.target_timeout,
                self.collector.scan(target, &endpoint),
            );
            let outcome = tokio::select! {
                outcome = scan => outcome,
                _ = cancelled(cancel) => return,
            };

            let result = match outcome {
                Ok(Ok(result)) => result,
                Ok(Err(e)) => {
                    warn!(cluster = %target.cluster, error = %e, "Target scan failed");
                    self.metrics.inc_target_failures(&target.cluster);
                    failed += 1;
                    continue;
                }
                Err(_) => {
                    warn!(
                        cluster = %target.cluster,
                        timeout_secs = self.options.target_timeout.as_secs(),
                        "Target scan timed out"
                    );
                    self.metrics.inc_target_failures(&target.cluster);
                    failed += 1;
                    continue;
                }
            };

            for e in &result.errors {
                debug!(cluster = %target.cluster, error = %e, "Collection error");
            }
            info!(
                cluster = %target.cluster,
                snapshots = result.snapshots.len(),
                anomalies = result.anomalies.len(),
                errors = result.errors.len(),
                duration_ms = result.duration.as_millis() as u64,
                "Target scanned"
            );

            for snapshot in result.snapshots {
                if let Err(e) = self.cache.add(snapshot.clone()).await {
                    self.persistence_failed("save_snapshot", &e).await;
                }
                self.snapshots.push(snapshot.clone());
                collected.push(snapshot);
            }
            reported.extend(result.anomalies);
        }

        let detection = self.detector.detect();
        reported.extend(detection.anomalies);

        let spikes = match self.stress.lock().await.as_mut() {
            Some(run) => run.record_cycle(&collected),
            None => Vec::new(),
        };
        reported.extend(spikes.into_iter().map(|mut spike| {
            spike.stats = self.cache.get(&spike.key).map(|s| s.stats().clone());
            spike
        }));

        let emitted = self.cooldown.filter(reported);
        for anomaly in &emitted {
            self.logger.log_anomaly(anomaly);
            self.metrics.inc_anomalies(anomaly.anomaly_type.as_str());
        }
        let emitted_count = emitted.len();
        for anomaly in emitted {
            self.anomalies.push(anomaly);
        }

        self.update_collector_health(targets, failed).await;

        let scan = self.scans.fetch_add(1, Ordering::Relaxed) + 1;
        let elapsed = started.elapsed();
        self.metrics.observe_scan_latency(elapsed.as_secs_f64());
        self.metrics.inc_scans();
        self.metrics.set_hpas_tracked(self.cache.len() as i64);
        self.logger.log_scan_cycle(
            scan,
            targets,
            failed,
            collected.len(),
            emitted_count,
            elapsed.as_millis() as u64,
        );
    }

    async fn update_collector_health(&self, targets: usize, failed: usize) {
        if failed == 0 {
            self.health.set_healthy(components::COLLECTOR).await;
        } else if failed >= targets {
            self.health
                .set_unhealthy(components::COLLECTOR, format!("all {} targets failed", targets))
                .await;
        } else {
            self.health
                .set_degraded(
                    components::COLLECTOR,
                    format!("{} of {} targets failed", failed, targets),
                )
                .await;
        }
    }

    async fn finalize_stress_run(&self) {
        let Some(run) = self.stress.lock().await.take() else {
            return;
        };

        let post_replicas = self.cache.total_current_replicas();
        let metrics = run.finalize(Utc::now(), post_replicas);
        self.logger.log_stress_finalized(&metrics);

        if let Some(sink) = &self.sink {
            if let Err(e) = sink.save_stress_result(&metrics.test_id, &metrics).await {
                self.persistence_failed("save_stress_result", &e).await;
            }
        }
        self.stress_results.push(metrics);
    }

    async fn persistence_failed(&self, operation: &str, e: &anyhow::Error) {
        warn!(operation = operation, error = %e, "Persistence sink write failed");
        self.metrics.inc_persistence_failures();
        self.health
            .set_degraded(components::PERSISTENCE, format!("{} failed: {}", operation, e))
            .await;
    }
}

/// Resolves once cancellation is signalled or the sender is gone
async fn cancelled(rx: &mut watch::Receiver<bool>) {
    while !*rx.borrow_and_update() {
        if rx.changed().await.is_err() {
            return;
        }
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

/// Builder for the scan engine
pub struct ScanEngineBuilder {
    config: ScanConfig,
    options: EngineOptions,
    detector_config: DetectorConfig,
    cache_config: CacheConfig,
    cache: Option<Arc<TimeSeriesCache>>,
    collector: Option<Arc<dyn Collector>>,
    connectivity: Option<Arc<dyn ConnectivityManager>>,
    baseline_collector: Option<Arc<dyn BaselineCollector>>,
    comparator_factory: Option<Arc<dyn ComparatorFactory>>,
    sink: Option<Arc<dyn PersistenceSink>>,
    health: Option<HealthRegistry>,
    logger: Option<StructuredLogger>,
}

impl ScanEngineBuilder {
    pub fn new(config: ScanConfig) -> Self {
        Self {
            config,
            options: EngineOptions::default(),
            detector_config: DetectorConfig::default(),
            cache_config: CacheConfig::default(),
            cache: None,
            collector: None,
            connectivity: None,
            baseline_collector: None,
            comparator_factory: None,
            sink: None,
            health: None,
            logger: None,
        }
    }

    pub fn options(mut self, options: EngineOptions) -> Self {
        self.options = options;
        self
    }

    pub fn detector_config(mut self, config: DetectorConfig) -> Self {
        self.detector_config = config;
        self
    }

    pub fn cache_config(mut self, config: CacheConfig) -> Self {
        self.cache_config = config;
        self
    }

    /// Use an existing cache instead of building one
    pub fn cache(mut self, cache: Arc<TimeSeriesCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn collector(mut self, collector: Arc<dyn Collector>) -> Self {
        self.collector = Some(collector);
        self
    }

    pub fn connectivity(mut self, connectivity: Arc<dyn ConnectivityManager>) -> Self {
        self.connectivity = Some(connectivity);
        self
    }

    pub fn baseline_collector(mut self, collector: Arc<dyn BaselineCollector>) -> Self {
        self.baseline_collector = Some(collector);
        self
    }

    pub fn comparator_factory(mut self, factory: Arc<dyn ComparatorFactory>) -> Self {
        self.comparator_factory = Some(factory);
        self
    }

    /// Persistence for snapshots, baselines and stress results
    pub fn sink(mut self, sink: Arc<dyn PersistenceSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn health(mut self, health: HealthRegistry) -> Self {
        self.health = Some(health);
        self
    }

    pub fn logger(mut self, logger: StructuredLogger) -> Self {
        self.logger = Some(logger);
        self
    }

    pub fn build(self) -> Result<(ScanEngine, EngineStreams), EngineError> {
        self.config.validate()?;

        let collector = self
            .collector
            .ok_or_else(|| EngineError::InvalidConfig("collector is required".to_string()))?;
        let connectivity = self.connectivity.ok_or_else(|| {
            EngineError::InvalidConfig("connectivity manager is required".to_string())
        })?;

        let cache = match self.cache {
            Some(cache) => cache,
            None => {
                let cache = TimeSeriesCache::new(self.cache_config);
                Arc::new(match &self.sink {
                    Some(sink) => cache.with_sink(sink.clone()),
                    None => cache,
                })
            }
        };

        let logger = self
            .logger
            .unwrap_or_else(|| StructuredLogger::new("hpa-watchdog"));
        let (snapshots, snapshots_rx) =
            Outbox::channel(streams::SNAPSHOTS, self.options.snapshot_buffer, logger.clone());
        let (anomalies, anomalies_rx) =
            Outbox::channel(streams::ANOMALIES, self.options.anomaly_buffer, logger.clone());
        let (stress_results, stress_rx) = Outbox::channel(
            streams::STRESS_RESULTS,
            self.options.stress_result_buffer,
            logger.clone(),
        );

        let cooldown = AlertCooldown::new(self.detector_config.alert_cooldown);
        let detector = AnomalyDetector::new(cache.clone(), self.detector_config);
        let comparator_factory = self
            .comparator_factory
            .unwrap_or_else(|| Arc::new(BaselineComparatorFactory::default()));

        let inner = EngineInner {
            config: self.config,
            options: self.options,
            cache,
            detector,
            cooldown,
            collector,
            connectivity,
            baseline_collector: self.baseline_collector,
            comparator_factory,
            sink: self.sink,
            snapshots,
            anomalies,
            stress_results,
            health: self.health.unwrap_or_default(),
            metrics: WatchdogMetrics::new(),
            logger,
            lifecycle: Mutex::new(()),
            state: RwLock::new(EngineState::default()),
            stress: Mutex::new(None),
            scans: AtomicU64::new(0),
        };

        let streams = EngineStreams {
            snapshots: snapshots_rx,
            anomalies: anomalies_rx,
            stress_results: stress_rx,
        };

        Ok((
            ScanEngine {
                inner: Arc::new(inner),
            },
            streams,
        ))
    }
}

//! HPA watchdog - autoscaler monitoring daemon
//!
//! Scans the configured clusters on a fixed interval, keeps a sliding
//! window of HPA snapshots and reports anomalies. In stress test mode it
//! captures a baseline first and reports a single result at the end.

use anyhow::Result;
use hpa_watchdog::{
    api,
    config::WatchdogConfig,
    replay::{ReplayCollector, StaticConnectivity},
    sink::JsonlSink,
};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use watchdog_lib::{
    health::HealthRegistry, Anomaly, EngineStreams, EngineSupervisor, ScanEngine, Snapshot,
    StressTestMetrics, StructuredLogger, WatchdogMetrics,
};

const WATCHDOG_VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> Result<()> {
    // JSON logs, filtered by RUST_LOG
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();

    info!(version = WATCHDOG_VERSION, "Starting hpa-watchdog");

    let config = WatchdogConfig::load()?;
    info!(
        instance = %config.instance_name,
        mode = %config.mode,
        clusters = ?config.clusters,
        "Watchdog configured"
    );

    let health_registry = HealthRegistry::new();
    health_registry.register_all().await;

    let metrics = WatchdogMetrics::new();
    let logger = StructuredLogger::new(&config.instance_name);

    let collector = Arc::new(ReplayCollector::load(&config.replay_dir, &config.clusters)?);
    let baseline_collector = Arc::new(collector.baseline_collector());
    let connectivity = Arc::new(StaticConnectivity::new(config.endpoints.clone()));

    let mut builder = ScanEngine::builder(config.scan_config())
        .options(config.engine_options())
        .detector_config(config.detector_config())
        .cache_config(config.cache_config())
        .collector(collector)
        .baseline_collector(baseline_collector)
        .connectivity(connectivity)
        .health(health_registry.clone())
        .logger(logger.clone());

    if let Some(dir) = &config.data_dir {
        info!(dir = %dir.display(), "Persisting to JSON-lines files");
        builder = builder.sink(Arc::new(JsonlSink::new(dir)?));
    }

    let (engine, streams) = builder.build()?;
    spawn_consumers(streams);

    let (shutdown_tx, _) = broadcast::channel::<()>(1);
    let (controller, supervisor) = EngineSupervisor::new(engine.clone());

    engine.start().await?;
    let mut supervisor_handle = tokio::spawn(supervisor.run(shutdown_tx.subscribe()));

    let app_state = Arc::new(api::AppState::new(
        health_registry,
        metrics,
        engine.clone(),
        controller,
    ));
    let api_handle = tokio::spawn(api::serve(config.api_port, app_state));

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result?;
            logger.log_stopped("SIGINT received");
            let _ = shutdown_tx.send(());
            if let Err(e) = (&mut supervisor_handle).await {
                warn!(error = %e, "Engine supervisor task failed");
            }
        }
        result = &mut supervisor_handle => {
            if let Err(e) = result {
                warn!(error = %e, "Engine supervisor task failed");
            }
        }
    }

    api_handle.abort();
    info!("Shutting down");

    Ok(())
}

/// Drain the engine's output streams so producers never block on them
fn spawn_consumers(streams: EngineStreams) {
    let EngineStreams {
        snapshots,
        anomalies,
        stress_results,
    } = streams;

    tokio::spawn(drain(snapshots, |snapshot: Snapshot| {
        debug!(
            hpa = %snapshot.key(),
            replicas = snapshot.current_replicas,
            cpu = snapshot.cpu_current,
            "Snapshot"
        );
    }));

    tokio::spawn(drain(anomalies, |anomaly: Anomaly| {
        debug!(
            hpa = %anomaly.key,
            anomaly_type = %anomaly.anomaly_type,
            "Anomaly delivered"
        );
    }));

    tokio::spawn(drain(stress_results, |result: StressTestMetrics| {
        info!(
            test_id = %result.test_id,
            status = ?result.status,
            result = ?result.test_result(),
            total_scans = result.total_scans,
            hpas_with_issues = result.total_hpas_with_issues,
            "Stress test result"
        );
    }));
}

async fn drain<T, F>(mut rx: mpsc::Receiver<T>, mut handle: F)
where
    F: FnMut(T),
{
    while let Some(item) = rx.recv().await {
        handle(item);
    }
}

//! Monitoring core for Kubernetes HPA watchdogs
//!
//! This crate provides the core functionality for:
//! - Sliding-window time series of HPA snapshots with derived statistics
//! - Rule-based anomaly detection over those windows
//! - Scan orchestration with lifecycle control and stress testing
//! - Health checks and observability

pub mod anomaly;
pub mod cache;
pub mod collaborators;
pub mod config;
pub mod engine;
pub mod error;
pub mod health;
pub mod models;
pub mod observability;

pub use anomaly::{
    AlertCooldown, Anomaly, AnomalyDetector, AnomalyType, BaselineComparator,
    BaselineComparatorFactory, DetectionResult, DetectorConfig, Severity,
};
pub use cache::{CacheConfig, Stats, TimeSeries, TimeSeriesCache, Trend};
pub use collaborators::{
    BaselineCollector, Collector, Comparator, ComparatorFactory, ComparisonResult,
    ComparisonStatus, ComparisonSummary, ConnectivityManager, PersistenceSink, ScanResult,
};
pub use config::{EngineOptions, ScanConfig, ScanMode, ScanTarget};
pub use engine::{
    EngineController, EngineStatus, EngineStreams, EngineSupervisor, ScanEngine, ScanEngineBuilder,
};
pub use error::{ControlError, EngineError};
pub use health::{
    ComponentHealth, ComponentStatus, HealthRegistry, HealthResponse, ReadinessResponse,
};
pub use models::*;
pub use observability::{StructuredLogger, WatchdogMetrics};

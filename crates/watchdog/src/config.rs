//! Daemon configuration
//!
//! Loaded from an optional file named by `WATCHDOG_CONFIG`, overridden by
//! `WATCHDOG_*` environment variables. Nested keys use `__`, for example
//! `WATCHDOG_ENDPOINTS__PROD=http://localhost:9090`.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use watchdog_lib::{
    CacheConfig, DetectorConfig, EngineOptions, ScanConfig, ScanMode, ScanTarget,
};

/// Environment variable naming the optional config file
pub const CONFIG_PATH_ENV: &str = "WATCHDOG_CONFIG";

/// Watchdog daemon configuration
#[derive(Debug, Clone, Deserialize)]
pub struct WatchdogConfig {
    /// Instance name attached to structured log records
    #[serde(default = "default_instance_name")]
    pub instance_name: String,

    /// API server port for health, metrics and control
    #[serde(default = "default_api_port")]
    pub api_port: u16,

    #[serde(default)]
    pub mode: ScanMode,

    /// Clusters to scan
    #[serde(default = "default_clusters")]
    pub clusters: Vec<String>,

    /// Namespace filter applied to every cluster, empty for all
    #[serde(default)]
    pub namespaces: Vec<String>,

    #[serde(default = "default_interval")]
    pub interval_secs: u64,

    /// Total run time in seconds, 0 for unbounded
    #[serde(default)]
    pub duration_secs: u64,

    /// Metrics backend URL per cluster
    #[serde(default)]
    pub endpoints: HashMap<String, String>,

    /// Directory holding `<cluster>.json` replay files
    #[serde(default = "default_replay_dir")]
    pub replay_dir: PathBuf,

    /// Directory for JSON-lines persistence, disabled when unset
    #[serde(default)]
    pub data_dir: Option<PathBuf>,

    #[serde(default = "default_cache_window")]
    pub cache_window_secs: u64,

    #[serde(default = "default_oscillation_max_changes")]
    pub oscillation_max_changes: usize,

    #[serde(default = "default_maxed_out_cpu_deviation")]
    pub maxed_out_cpu_deviation: f64,

    #[serde(default = "default_error_rate_threshold")]
    pub error_rate_threshold: f64,

    #[serde(default = "default_alert_cooldown")]
    pub alert_cooldown_secs: u64,
}

fn default_instance_name() -> String {
    std::env::var("HOSTNAME").unwrap_or_else(|_| "hpa-watchdog".to_string())
}

fn default_api_port() -> u16 {
    8080
}

fn default_clusters() -> Vec<String> {
    vec!["default".to_string()]
}

fn default_interval() -> u64 {
    30
}

fn default_replay_dir() -> PathBuf {
    PathBuf::from("replay")
}

fn default_cache_window() -> u64 {
    300
}

fn default_oscillation_max_changes() -> usize {
    5
}

fn default_maxed_out_cpu_deviation() -> f64 {
    20.0
}

fn default_error_rate_threshold() -> f64 {
    5.0
}

fn default_alert_cooldown() -> u64 {
    300
}

impl WatchdogConfig {
    /// Load configuration from the environment and optional config file
    pub fn load() -> Result<Self> {
        let path = std::env::var(CONFIG_PATH_ENV).ok();
        Self::from_sources(path.as_deref().map(Path::new), None)
    }

    /// Build from an optional file and an environment map (process env when `None`)
    pub fn from_sources(
        file: Option<&Path>,
        env: Option<config::Map<String, String>>,
    ) -> Result<Self> {
        let mut builder = config::Config::builder();

        if let Some(path) = file {
            builder = builder.add_source(config::File::from(path).required(true));
        }

        builder = builder.add_source(
            config::Environment::with_prefix("WATCHDOG")
                .prefix_separator("_")
                .separator("__")
                .list_separator(",")
                .with_list_parse_key("clusters")
                .with_list_parse_key("namespaces")
                .try_parsing(true)
                .source(env),
        );

        let config = builder.build().context("failed to read configuration")?;
        config
            .try_deserialize()
            .context("invalid watchdog configuration")
    }

    pub fn scan_config(&self) -> ScanConfig {
        let targets = self
            .clusters
            .iter()
            .map(|cluster| ScanTarget {
                cluster: cluster.clone(),
                namespaces: self.namespaces.clone(),
                ..ScanTarget::default()
            })
            .collect();

        ScanConfig::new(self.mode, targets, Duration::from_secs(self.interval_secs))
            .with_duration(Duration::from_secs(self.duration_secs))
    }

    pub fn detector_config(&self) -> DetectorConfig {
        DetectorConfig {
            oscillation_max_changes: self.oscillation_max_changes,
            oscillation_window: Duration::from_secs(self.cache_window_secs),
            maxed_out_cpu_deviation: self.maxed_out_cpu_deviation,
            error_rate_threshold: self.error_rate_threshold,
            alert_cooldown: Duration::from_secs(self.alert_cooldown_secs),
            ..DetectorConfig::default()
        }
    }

    pub fn cache_config(&self) -> CacheConfig {
        CacheConfig {
            max_duration: Duration::from_secs(self.cache_window_secs),
        }
    }

    pub fn engine_options(&self) -> EngineOptions {
        EngineOptions::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn env(pairs: &[(&str, &str)]) -> config::Map<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_defaults() {
        let config = WatchdogConfig::from_sources(None, Some(env(&[]))).unwrap();
        assert_eq!(config.api_port, 8080);
        assert_eq!(config.mode, ScanMode::Full);
        assert_eq!(config.clusters, vec!["default".to_string()]);
        assert_eq!(config.interval_secs, 30);
        assert!(config.data_dir.is_none());

        let detector = config.detector_config();
        assert_eq!(detector, DetectorConfig::default());
    }

    #[test]
    fn test_environment_overrides() {
        let config = WatchdogConfig::from_sources(
            None,
            Some(env(&[
                ("WATCHDOG_API_PORT", "9100"),
                ("WATCHDOG_MODE", "stress_test"),
                ("WATCHDOG_CLUSTERS", "prod,staging"),
                ("WATCHDOG_DURATION_SECS", "600"),
                ("WATCHDOG_ENDPOINTS__PROD", "http://localhost:9090"),
            ])),
        )
        .unwrap();

        assert_eq!(config.api_port, 9100);
        assert_eq!(config.mode, ScanMode::StressTest);
        assert_eq!(config.clusters, vec!["prod".to_string(), "staging".to_string()]);
        assert_eq!(
            config.endpoints.get("prod").map(String::as_str),
            Some("http://localhost:9090")
        );

        let scan = config.scan_config();
        assert!(scan.is_stress_test());
        assert_eq!(scan.targets.len(), 2);
        assert_eq!(scan.estimate_scans(), 20);
    }

    #[test]
    fn test_file_then_environment() {
        let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        write!(
            file,
            r#"{{"clusters": ["east"], "interval_secs": 10, "namespaces": ["payments"]}}"#
        )
        .unwrap();

        let config = WatchdogConfig::from_sources(
            Some(file.path()),
            Some(env(&[("WATCHDOG_INTERVAL_SECS", "15")])),
        )
        .unwrap();

        assert_eq!(config.clusters, vec!["east".to_string()]);
        assert_eq!(config.interval_secs, 15);
        assert_eq!(config.scan_config().targets[0].namespaces, vec!["payments".to_string()]);
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let result = WatchdogConfig::from_sources(
            Some(Path::new("/nonexistent/watchdog.toml")),
            Some(env(&[])),
        );
        assert!(result.is_err());
    }
}

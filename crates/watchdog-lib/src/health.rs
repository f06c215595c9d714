//! Health tracking for the watchdog components
//!
//! Backs the liveness and readiness endpoints of the daemon. The engine
//! reports on itself at start and stop, on connectivity when targets are
//! connected, and on the collector after every cycle.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Health status of a component, ordered from best to worst
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentStatus {
    Healthy,
    /// Partially failing but still producing results
    Degraded,
    Unhealthy,
}

impl ComponentStatus {
    pub fn is_operational(&self) -> bool {
        *self != ComponentStatus::Unhealthy
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentHealth {
    pub status: ComponentStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub last_check: DateTime<Utc>,
    /// Updates in a row that were not healthy
    pub consecutive_failures: u32,
}

impl ComponentHealth {
    fn with_status(status: ComponentStatus, message: Option<String>) -> Self {
        Self {
            status,
            message,
            last_check: Utc::now(),
            consecutive_failures: 0,
        }
    }

    pub fn healthy() -> Self {
        Self::with_status(ComponentStatus::Healthy, None)
    }

    pub fn degraded(message: impl Into<String>) -> Self {
        Self::with_status(ComponentStatus::Degraded, Some(message.into()))
    }

    pub fn unhealthy(message: impl Into<String>) -> Self {
        Self::with_status(ComponentStatus::Unhealthy, Some(message.into()))
    }
}

/// Body of the liveness endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: ComponentStatus,
    pub components: BTreeMap<String, ComponentHealth>,
}

impl HealthResponse {
    /// Worst status among `components`, healthy when there are none
    pub fn compute_status(components: &BTreeMap<String, ComponentHealth>) -> ComponentStatus {
        components
            .values()
            .map(|c| c.status)
            .max()
            .unwrap_or(ComponentStatus::Healthy)
    }
}

/// Body of the readiness endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadinessResponse {
    pub ready: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Component names for health tracking
pub mod components {
    pub const ENGINE: &str = "engine";
    pub const COLLECTOR: &str = "collector";
    pub const CONNECTIVITY: &str = "connectivity";
    pub const PERSISTENCE: &str = "persistence";

    pub const ALL: [&str; 4] = [ENGINE, COLLECTOR, CONNECTIVITY, PERSISTENCE];
}

#[derive(Debug, Default)]
struct HealthState {
    components: BTreeMap<String, ComponentHealth>,
    /// Set while the scan engine is running
    engine_running: bool,
}

/// Shared component health, cheap to clone
#[derive(Debug, Clone, Default)]
pub struct HealthRegistry {
    state: Arc<RwLock<HealthState>>,
}

impl HealthRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a component as healthy
    pub async fn register(&self, name: &str) {
        self.state
            .write()
            .await
            .components
            .insert(name.to_string(), ComponentHealth::healthy());
    }

    pub async fn register_all(&self) {
        let mut state = self.state.write().await;
        for name in components::ALL {
            state
                .components
                .insert(name.to_string(), ComponentHealth::healthy());
        }
    }

    pub async fn get(&self, name: &str) -> Option<ComponentHealth> {
        self.state.read().await.components.get(name).cloned()
    }

    /// Replace a component's health, carrying the failure streak forward
    pub async fn update(&self, name: &str, mut health: ComponentHealth) {
        let mut state = self.state.write().await;
        if health.status != ComponentStatus::Healthy {
            let previous = state
                .components
                .get(name)
                .map(|c| c.consecutive_failures)
                .unwrap_or(0);
            health.consecutive_failures = previous.saturating_add(1);
        }
        state.components.insert(name.to_string(), health);
    }

    pub async fn set_healthy(&self, name: &str) {
        self.update(name, ComponentHealth::healthy()).await;
    }

    pub async fn set_degraded(&self, name: &str, message: impl Into<String>) {
        self.update(name, ComponentHealth::degraded(message)).await;
    }

    pub async fn set_unhealthy(&self, name: &str, message: impl Into<String>) {
        self.update(name, ComponentHealth::unhealthy(message)).await;
    }

    /// Mark the scan engine as running or stopped
    pub async fn set_ready(&self, ready: bool) {
        self.state.write().await.engine_running = ready;
    }

    pub async fn health(&self) -> HealthResponse {
        let components = self.state.read().await.components.clone();
        let status = HealthResponse::compute_status(&components);
        HealthResponse { status, components }
    }

    /// Ready while the engine runs and no component is unhealthy
    pub async fn readiness(&self) -> ReadinessResponse {
        let state = self.state.read().await;

        if !state.engine_running {
            return ReadinessResponse {
                ready: false,
                reason: Some("Scan engine not running".to_string()),
            };
        }

        let unhealthy: Vec<&str> = state
            .components
            .iter()
            .filter(|(_, c)| !c.status.is_operational())
            .map(|(name, _)| name.as_str())
            .collect();

        if unhealthy.is_empty() {
            ReadinessResponse {
                ready: true,
                reason: None,
            }
        } else {
            ReadinessResponse {
                ready: false,
                reason: Some(format!("Unhealthy components: {}", unhealthy.join(", "))),
            }
        }
    }
}

//! HTTP API for health checks, Prometheus metrics and engine control

use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use prometheus::{Encoder, TextEncoder};
use serde::Serialize;
use std::sync::Arc;
use tracing::{error, info};
use watchdog_lib::{
    health::{ComponentStatus, HealthRegistry},
    ControlError, EngineController, ScanEngine, WatchdogMetrics,
};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub health_registry: HealthRegistry,
    pub metrics: WatchdogMetrics,
    pub engine: ScanEngine,
    pub controller: EngineController,
}

impl AppState {
    pub fn new(
        health_registry: HealthRegistry,
        metrics: WatchdogMetrics,
        engine: ScanEngine,
        controller: EngineController,
    ) -> Self {
        Self {
            health_registry,
            metrics,
            engine,
            controller,
        }
    }
}

#[derive(Debug, Serialize)]
struct CommandResponse {
    command: &'static str,
    accepted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

/// Health check response - returns 200 if healthy or degraded, 503 if unhealthy
async fn healthz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let health = state.health_registry.health().await;

    let status_code = match health.status {
        ComponentStatus::Healthy => StatusCode::OK,
        ComponentStatus::Degraded => StatusCode::OK,
        ComponentStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };

    (status_code, Json(health))
}

/// Readiness check response - 200 while the engine is running
async fn readyz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let readiness = state.health_registry.readiness().await;

    let status_code = if readiness.ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (status_code, Json(readiness))
}

/// Prometheus metrics endpoint
async fn metrics() -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();

    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        error!(error = %e, "Failed to encode metrics");
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            [("content-type", "text/plain; charset=utf-8")],
            Vec::new(),
        );
    }

    (
        StatusCode::OK,
        [("content-type", "text/plain; charset=utf-8")],
        buffer,
    )
}

async fn status(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.engine.status().await)
}

async fn pause(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    state.engine.pause().await;
    Json(state.engine.status().await)
}

async fn resume(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    state.engine.resume().await;
    Json(state.engine.status().await)
}

async fn stop(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    command_response("stop", state.controller.stop())
}

async fn restart(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    command_response("restart", state.controller.restart())
}

fn command_response(
    command: &'static str,
    result: Result<(), ControlError>,
) -> (StatusCode, Json<CommandResponse>) {
    match result {
        Ok(()) => {
            info!(command = command, "Control command accepted");
            (
                StatusCode::ACCEPTED,
                Json(CommandResponse {
                    command,
                    accepted: true,
                    error: None,
                }),
            )
        }
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(CommandResponse {
                command,
                accepted: false,
                error: Some(e.to_string()),
            }),
        ),
    }
}

/// Create the API router
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics))
        .route("/status", get(status))
        .route("/control/pause", post(pause))
        .route("/control/resume", post(resume))
        .route("/control/stop", post(stop))
        .route("/control/restart", post(restart))
        .with_state(state)
}

/// Start the API server
pub async fn serve(port: u16, state: Arc<AppState>) -> anyhow::Result<()> {
    let app = create_router(state);

    let addr = format!("0.0.0.0:{}", port);
    info!(addr = %addr, "Starting API server");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

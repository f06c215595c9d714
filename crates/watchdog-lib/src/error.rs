//! Error types surfaced by the monitoring core

use thiserror::Error;

/// Errors returned by engine lifecycle operations
#[derive(Debug, Error)]
pub enum EngineError {
    /// The scan configuration cannot be run
    #[error("invalid scan configuration: {0}")]
    InvalidConfig(String),
}

/// Errors returned by the lifecycle controller
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ControlError {
    /// The supervisor is gone and nobody will act on the command
    #[error("engine supervisor is no longer running")]
    Disconnected,
}

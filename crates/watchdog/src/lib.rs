//! HPA watchdog daemon
//!
//! Wires the monitoring core to file-backed collaborators and exposes
//! health, metrics and control over HTTP.

pub mod api;
pub mod config;
pub mod replay;
pub mod sink;

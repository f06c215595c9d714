//! Lifecycle commands delivered to a running engine
//!
//! Commands travel over single-slot channels. A command sent while another
//! of the same kind is still pending is dropped, since the engine state is
//! level-triggered and a second identical request adds nothing.

use tokio::sync::{broadcast, mpsc, mpsc::error::TrySendError};
use tracing::{debug, error, info};

use super::ScanEngine;
use crate::error::ControlError;

/// Sending side of the lifecycle commands
#[derive(Clone)]
pub struct EngineController {
    pause_tx: mpsc::Sender<()>,
    stop_tx: mpsc::Sender<()>,
    restart_tx: mpsc::Sender<()>,
}

impl EngineController {
    /// Pause a running engine, resume a paused one
    pub fn toggle_pause(&self) -> Result<(), ControlError> {
        offer(&self.pause_tx, "pause")
    }

    pub fn stop(&self) -> Result<(), ControlError> {
        offer(&self.stop_tx, "stop")
    }

    pub fn restart(&self) -> Result<(), ControlError> {
        offer(&self.restart_tx, "restart")
    }
}

fn offer(tx: &mpsc::Sender<()>, command: &str) -> Result<(), ControlError> {
    match tx.try_send(()) {
        Ok(()) => Ok(()),
        Err(TrySendError::Full(())) => {
            debug!(command = command, "Command already pending, dropped");
            Ok(())
        }
        Err(TrySendError::Closed(())) => Err(ControlError::Disconnected),
    }
}

/// Applies lifecycle commands to an engine
pub struct EngineSupervisor {
    engine: ScanEngine,
    pause_rx: mpsc::Receiver<()>,
    stop_rx: mpsc::Receiver<()>,
    restart_rx: mpsc::Receiver<()>,
}

impl EngineSupervisor {
    pub fn new(engine: ScanEngine) -> (EngineController, Self) {
        let (pause_tx, pause_rx) = mpsc::channel(1);
        let (stop_tx, stop_rx) = mpsc::channel(1);
        let (restart_tx, restart_rx) = mpsc::channel(1);

        let controller = EngineController {
            pause_tx,
            stop_tx,
            restart_tx,
        };
        let supervisor = Self {
            engine,
            pause_rx,
            stop_rx,
            restart_rx,
        };
        (controller, supervisor)
    }

    /// Process commands until a stop command or shutdown arrives
    ///
    /// The engine is stopped on the way out either way.
    pub async fn run(mut self, mut shutdown: broadcast::Receiver<()>) {
        info!("Engine supervisor started");

        loop {
            tokio::select! {
                Some(()) = self.pause_rx.recv() => {
                    if self.engine.is_paused().await {
                        self.engine.resume().await;
                    } else {
                        self.engine.pause().await;
                    }
                }
                Some(()) = self.restart_rx.recv() => {
                    if let Err(e) = self.engine.restart().await {
                        error!(error = %e, "Engine restart failed");
                    }
                }
                Some(()) = self.stop_rx.recv() => {
                    info!("Stop command received");
                    break;
                }
                _ = shutdown.recv() => {
                    info!("Shutting down engine supervisor");
                    break;
                }
            }
        }

        self.engine.stop().await;
    }
}

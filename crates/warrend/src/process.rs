//! Foreground process lifecycle: bootstrap, start, wait for a signal, stop.

use std::io;
use std::sync::Arc;

use signal_hook::consts::signal::{SIGINT, SIGTERM};
use signal_hook::iterator::Signals;
use thiserror::Error;
use tracing::info;

use warren_nabd::LinkError;

use crate::bootstrap::{self, BootstrapError, SystemConfigLoader};
use crate::health::{HealthReporter, StructuredHealthReporter};
use crate::service::Service;

const PROCESS_TARGET: &str = "warrend::process";

/// Abstraction over shutdown notification mechanisms.
pub trait ShutdownSignal: Send + Sync {
    /// Blocks until shutdown should proceed.
    fn wait(&self) -> Result<(), ShutdownError>;
}

/// Errors reported by shutdown signal listeners.
#[derive(Debug, Error)]
pub enum ShutdownError {
    /// Installing signal handlers failed.
    #[error("failed to install signal handlers: {source}")]
    Install {
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
}

/// Shutdown listener that waits for SIGINT or SIGTERM.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemShutdownSignal;

impl ShutdownSignal for SystemShutdownSignal {
    fn wait(&self) -> Result<(), ShutdownError> {
        let mut signals =
            Signals::new([SIGTERM, SIGINT]).map_err(|source| ShutdownError::Install { source })?;
        if let Some(signal) = signals.forever().next() {
            info!(target: PROCESS_TARGET, signal, "shutdown signal received");
        }
        Ok(())
    }
}

/// Errors that end the process.
#[derive(Debug, Error)]
pub enum LaunchError {
    /// Bootstrap failed.
    #[error(transparent)]
    Bootstrap(#[from] BootstrapError),
    /// Device links could not be started.
    #[error("failed to start device links: {0}")]
    Start(#[from] LinkError),
    /// Waiting for the shutdown signal failed.
    #[error(transparent)]
    Shutdown(#[from] ShutdownError),
}

/// Runs the service until SIGINT or SIGTERM, with real bridges.
pub fn run() -> Result<(), LaunchError> {
    let reporter: Arc<dyn HealthReporter> = Arc::new(StructuredHealthReporter::new());
    let service = bootstrap::bootstrap(&SystemConfigLoader, reporter)?;
    serve(&service, &SystemShutdownSignal)
}

/// Starts a bootstrapped service, blocks on `shutdown`, then stops it.
///
/// The service is stopped even when starting or waiting fails.
pub fn serve(service: &Service, shutdown: &dyn ShutdownSignal) -> Result<(), LaunchError> {
    let outcome = service
        .start()
        .map_err(LaunchError::from)
        .and_then(|()| shutdown.wait().map_err(LaunchError::from));
    service.stop();
    outcome
}

//! Structured health reporting for service lifecycle events.

use std::sync::Arc;

use warren_config::Config;

use crate::bootstrap::BootstrapError;

const HEALTH_TARGET: &str = "warrend::health";

/// Observer trait used to surface lifecycle events to telemetry sinks.
pub trait HealthReporter: Send + Sync {
    /// Invoked before configuration loading begins.
    fn bootstrap_starting(&self);

    /// Invoked after bootstrap completes successfully.
    fn bootstrap_succeeded(&self, config: &Config);

    /// Invoked when bootstrap fails.
    fn bootstrap_failed(&self, error: &BootstrapError);

    /// Invoked once every device link has been asked to connect.
    fn service_started(&self, devices: usize);

    /// Invoked after every device link has stopped.
    fn service_stopped(&self);
}

impl<T> HealthReporter for Arc<T>
where
    T: HealthReporter + ?Sized,
{
    fn bootstrap_starting(&self) {
        (**self).bootstrap_starting();
    }

    fn bootstrap_succeeded(&self, config: &Config) {
        (**self).bootstrap_succeeded(config);
    }

    fn bootstrap_failed(&self, error: &BootstrapError) {
        (**self).bootstrap_failed(error);
    }

    fn service_started(&self, devices: usize) {
        (**self).service_started(devices);
    }

    fn service_stopped(&self) {
        (**self).service_stopped();
    }
}

/// Default reporter that records lifecycle events using `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct StructuredHealthReporter;

impl StructuredHealthReporter {
    /// Builds a new reporter.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl HealthReporter for StructuredHealthReporter {
    fn bootstrap_starting(&self) {
        tracing::info!(
            target: HEALTH_TARGET,
            event = "bootstrap_starting",
            "starting service bootstrap"
        );
    }

    fn bootstrap_succeeded(&self, config: &Config) {
        tracing::info!(
            target: HEALTH_TARGET,
            event = "bootstrap_succeeded",
            devices = config.devices().len(),
            read_timeout_ms = config.read_timeout_ms,
            reconnect_cooldown_ms = config.reconnect_cooldown_ms,
            log_filter = %config.log_filter(),
            log_format = %config.log_format(),
            "service bootstrap completed"
        );
    }

    fn bootstrap_failed(&self, error: &BootstrapError) {
        tracing::error!(
            target: HEALTH_TARGET,
            event = "bootstrap_failed",
            error = %error,
            "service bootstrap failed"
        );
    }

    fn service_started(&self, devices: usize) {
        tracing::info!(
            target: HEALTH_TARGET,
            event = "service_started",
            devices,
            "device links started"
        );
    }

    fn service_stopped(&self) {
        tracing::info!(
            target: HEALTH_TARGET,
            event = "service_stopped",
            "device links stopped"
        );
    }
}

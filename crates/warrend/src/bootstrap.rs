//! Service bootstrap orchestration.

use std::sync::Arc;

use ortho_config::{OrthoConfig, OrthoError};
use thiserror::Error;

use warren_config::Config;
use warren_nabd::{
    BridgeConfig, BridgeConnector, Connector, DeviceRegistry, EventBus, LinkTiming, RegistryError,
    SessionManager, StateTracker,
};

use crate::health::HealthReporter;
use crate::service::Service;
use crate::telemetry::{self, TelemetryError};

/// Trait abstracting configuration loading for testability.
pub trait ConfigLoader: Send + Sync {
    /// Loads the service configuration.
    fn load(&self) -> Result<Config, Arc<OrthoError>>;
}

/// Loader that delegates to [`Config::load`].
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemConfigLoader;

impl ConfigLoader for SystemConfigLoader {
    fn load(&self) -> Result<Config, Arc<OrthoError>> {
        Config::load()
    }
}

/// Loader returning a fixed configuration, for embedding and tests.
#[derive(Debug, Clone)]
pub struct StaticConfigLoader {
    config: Config,
}

impl StaticConfigLoader {
    /// Wraps the configuration to hand out.
    #[must_use]
    pub const fn new(config: Config) -> Self {
        Self { config }
    }
}

impl ConfigLoader for StaticConfigLoader {
    fn load(&self) -> Result<Config, Arc<OrthoError>> {
        Ok(self.config.clone())
    }
}

/// Errors surfaced during bootstrap.
#[derive(Debug, Error)]
pub enum BootstrapError {
    /// Configuration failed to load.
    #[error("failed to load configuration: {source}")]
    Configuration {
        /// Underlying loader error.
        #[source]
        source: Arc<OrthoError>,
    },
    /// Telemetry initialisation failed.
    #[error("failed to initialise telemetry: {source}")]
    Telemetry {
        /// Underlying telemetry error.
        #[source]
        source: TelemetryError,
    },
    /// The device table is inconsistent.
    #[error("invalid device table: {source}")]
    Registry {
        /// Underlying registry error.
        #[source]
        source: RegistryError,
    },
}

/// Builds the connector spawning real bridge processes.
#[must_use]
pub fn bridge_connector(config: &Config) -> Arc<dyn Connector> {
    Arc::new(BridgeConnector::new(BridgeConfig::from_config(config)))
}

/// Bootstraps the service with real bridges.
pub fn bootstrap(
    loader: &dyn ConfigLoader,
    reporter: Arc<dyn HealthReporter>,
) -> Result<Service, BootstrapError> {
    bootstrap_with(loader, reporter, bridge_connector)
}

/// Bootstraps the service using the supplied collaborators.
///
/// `connector` is called once with the resolved configuration. The returned
/// service is idle until [`Service::start`] is called.
pub fn bootstrap_with<F>(
    loader: &dyn ConfigLoader,
    reporter: Arc<dyn HealthReporter>,
    connector: F,
) -> Result<Service, BootstrapError>
where
    F: FnOnce(&Config) -> Arc<dyn Connector>,
{
    reporter.bootstrap_starting();

    let config = match loader.load() {
        Ok(config) => config,
        Err(source) => {
            let error = BootstrapError::Configuration { source };
            reporter.bootstrap_failed(&error);
            return Err(error);
        }
    };

    let telemetry = match telemetry::initialise(&config) {
        Ok(handle) => handle,
        Err(source) => {
            let error = BootstrapError::Telemetry { source };
            reporter.bootstrap_failed(&error);
            return Err(error);
        }
    };

    let registry = match DeviceRegistry::from_entries(config.devices()) {
        Ok(registry) => registry,
        Err(source) => {
            let error = BootstrapError::Registry { source };
            reporter.bootstrap_failed(&error);
            return Err(error);
        }
    };

    let bus = Arc::new(EventBus::new());
    let states = Arc::new(StateTracker::new());
    bus.subscribe_shared(Arc::clone(&states) as Arc<dyn warren_nabd::Subscriber>);
    let manager = SessionManager::new(
        registry,
        Arc::clone(&bus),
        connector(&config),
        LinkTiming::from_config(&config),
    );
    reporter.bootstrap_succeeded(&config);

    Ok(Service::new(config, bus, states, manager, telemetry, reporter))
}

//! Service test world shared across BDD scenarios.

use std::cell::RefCell;
use std::sync::Arc;
use std::time::Duration;

use rstest::fixture;
use warren_config::DeviceEntry;
use warren_nabd::Connector;
use warren_nabd::test_support::{FakeRemote, ScriptedConnector};

use super::{FailingConfigLoader, RecordingHealthReporter, test_config};
use crate::bootstrap::{BootstrapError, ConfigLoader, StaticConfigLoader, bootstrap_with};
use crate::health::HealthReporter;
use crate::service::Service;

pub const WAIT_TIMEOUT: Duration = Duration::from_secs(5);

/// Builds a fresh world for each scenario.
#[fixture]
pub fn world() -> RefCell<TestWorld> {
    RefCell::new(TestWorld::new())
}

pub struct TestWorld {
    pub reporter: Arc<RecordingHealthReporter>,
    pub connector: Arc<ScriptedConnector>,
    devices: Vec<DeviceEntry>,
    failing_loader: bool,
    service: Option<Service>,
    bootstrap_error: Option<BootstrapError>,
}

impl TestWorld {
    pub fn new() -> Self {
        Self {
            reporter: Arc::new(RecordingHealthReporter::default()),
            connector: Arc::new(ScriptedConnector::new()),
            devices: Vec::new(),
            failing_loader: false,
            service: None,
            bootstrap_error: None,
        }
    }

    pub fn declare_device(&mut self, name: String, address: String) {
        self.devices.push(DeviceEntry::new(name, address));
    }

    pub fn use_failing_loader(&mut self) {
        self.failing_loader = true;
    }

    pub fn bootstrap(&mut self) {
        let loader: Box<dyn ConfigLoader> = if self.failing_loader {
            Box::new(FailingConfigLoader)
        } else {
            Box::new(StaticConfigLoader::new(test_config(self.devices.clone())))
        };
        let reporter = Arc::clone(&self.reporter) as Arc<dyn HealthReporter>;
        let connector = Arc::clone(&self.connector) as Arc<dyn Connector>;
        match bootstrap_with(loader.as_ref(), reporter, move |_| connector) {
            Ok(service) => self.service = Some(service),
            Err(error) => self.bootstrap_error = Some(error),
        }
    }

    pub fn service(&self) -> Result<&Service, String> {
        self.service.as_ref().ok_or_else(|| {
            format!(
                "service was not bootstrapped: {:?}",
                self.bootstrap_error.as_ref().map(ToString::to_string)
            )
        })
    }

    pub const fn bootstrap_error(&self) -> Option<&BootstrapError> {
        self.bootstrap_error.as_ref()
    }

    /// Daemon side of every session opened so far, waiting for `count`.
    pub fn remotes(&self, count: usize) -> Result<Vec<Arc<FakeRemote>>, String> {
        (0..count)
            .map(|index| {
                self.connector
                    .remote(index, WAIT_TIMEOUT)
                    .ok_or_else(|| format!("session {index} never opened"))
            })
            .collect()
    }

    /// Daemon side of the first session opened for the named device.
    pub fn remote_for(&self, name: &str) -> Result<Arc<FakeRemote>, String> {
        let mut index = 0;
        while let Some(remote) = self.connector.remote(index, WAIT_TIMEOUT) {
            if remote.device().name() == name {
                return Ok(remote);
            }
            index += 1;
        }
        Err(format!("no session opened for {name}"))
    }
}

impl Drop for TestWorld {
    fn drop(&mut self) {
        if let Some(service) = self.service.take() {
            service.stop();
        }
    }
}

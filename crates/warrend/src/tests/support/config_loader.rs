//! Configuration loaders covering success and failure paths.

use std::ffi::OsString;
use std::sync::Arc;

use ortho_config::{OrthoConfig, OrthoError};
use warren_config::{Config, DeviceEntry};

use crate::bootstrap::ConfigLoader;

/// Configuration with quick reconnects and reads long enough that no probe
/// fires during a scenario.
pub fn test_config(devices: Vec<DeviceEntry>) -> Config {
    Config {
        devices,
        read_timeout_ms: 30_000,
        reconnect_cooldown_ms: 20,
        ..Config::default()
    }
}

/// Loader that intentionally fails by passing an invalid CLI value.
pub struct FailingConfigLoader;

impl ConfigLoader for FailingConfigLoader {
    fn load(&self) -> Result<Config, Arc<OrthoError>> {
        let args = vec![
            OsString::from("warrend"),
            OsString::from("--read-timeout-ms"),
            OsString::from("soon"),
        ];
        Config::load_from_iter(args)
    }
}

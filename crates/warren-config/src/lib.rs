//! Layered configuration shared by the warren crates.
//!
//! Values are merged from built-in defaults, an optional TOML file, `WARREN_*`
//! environment variables and command-line flags, in increasing order of
//! precedence. The device table, bridge commands and connection timings all
//! live here so the session manager and the service agree on a single source
//! of truth.

mod defaults;
mod device;
mod logging;

use std::time::Duration;

use ortho_config::OrthoConfig;
use serde::{Deserialize, Serialize};

pub use defaults::{
    DEFAULT_LOG_FILTER, DEFAULT_NABD_PORT, DEFAULT_READ_TIMEOUT_MS, DEFAULT_RECONNECT_COOLDOWN_MS,
    DEFAULT_RELAY_COMMAND, DEFAULT_SSH_COMMAND, DEFAULT_SSH_USER, default_log_filter,
    default_log_filter_string, default_log_format,
};
pub use device::{DeviceEntry, DeviceEntryParseError};
pub use logging::{LogFormat, LogFormatParseError};

/// Resolved configuration for the service and its session manager.
#[derive(Debug, Clone, Deserialize, Serialize, OrthoConfig, PartialEq, Eq)]
#[ortho_config(prefix = "WARREN")]
pub struct Config {
    /// Devices known to the service, in declaration order.
    #[serde(default)]
    #[ortho_config(merge_strategy = "append")]
    pub devices: Vec<DeviceEntry>,
    /// Bounded wait for one inbound frame before the daemon is probed.
    #[serde(default = "defaults::default_read_timeout_ms")]
    pub read_timeout_ms: u64,
    /// Pause between a lost session and the next connection attempt.
    #[serde(default = "defaults::default_reconnect_cooldown_ms")]
    pub reconnect_cooldown_ms: u64,
    /// Port the daemon listens on, on the device.
    #[serde(default = "defaults::default_nabd_port")]
    pub nabd_port: u16,
    /// Remote shell binary used for non-local devices.
    #[serde(default = "defaults::default_ssh_command")]
    pub ssh_command: String,
    /// Login used by the remote shell.
    #[serde(default = "defaults::default_ssh_user")]
    pub ssh_user: String,
    /// Relay binary that turns the daemon socket into stdio.
    #[serde(default = "defaults::default_relay_command")]
    pub relay_command: String,
    /// Whether devices rotate their ears once connected at service start.
    #[serde(default = "defaults::default_greet_on_connect")]
    pub greet_on_connect: bool,
    /// Tracing filter expression.
    #[serde(default = "defaults::default_log_filter_string")]
    pub log_filter: String,
    /// Output format of the tracing subscriber.
    #[serde(default = "defaults::default_log_format")]
    pub log_format: LogFormat,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            devices: Vec::new(),
            read_timeout_ms: DEFAULT_READ_TIMEOUT_MS,
            reconnect_cooldown_ms: DEFAULT_RECONNECT_COOLDOWN_MS,
            nabd_port: DEFAULT_NABD_PORT,
            ssh_command: DEFAULT_SSH_COMMAND.to_owned(),
            ssh_user: DEFAULT_SSH_USER.to_owned(),
            relay_command: DEFAULT_RELAY_COMMAND.to_owned(),
            greet_on_connect: true,
            log_filter: default_log_filter_string(),
            log_format: default_log_format(),
        }
    }
}

impl Config {
    /// Devices declared in the configuration.
    #[must_use]
    pub fn devices(&self) -> &[DeviceEntry] {
        &self.devices
    }

    /// Bounded read timeout that drives the liveness probe.
    #[must_use]
    pub const fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    /// Cooldown applied before every reconnection attempt.
    #[must_use]
    pub const fn reconnect_cooldown(&self) -> Duration {
        Duration::from_millis(self.reconnect_cooldown_ms)
    }

    /// Daemon port on the device.
    #[must_use]
    pub const fn nabd_port(&self) -> u16 {
        self.nabd_port
    }

    /// Remote shell binary.
    #[must_use]
    pub fn ssh_command(&self) -> &str {
        &self.ssh_command
    }

    /// Remote shell login.
    #[must_use]
    pub fn ssh_user(&self) -> &str {
        &self.ssh_user
    }

    /// Relay binary.
    #[must_use]
    pub fn relay_command(&self) -> &str {
        &self.relay_command
    }

    /// Whether to rotate the ears on the first session of each device.
    #[must_use]
    pub const fn greet_on_connect(&self) -> bool {
        self.greet_on_connect
    }

    /// Tracing filter expression.
    #[must_use]
    pub fn log_filter(&self) -> &str {
        &self.log_filter
    }

    /// Output format of the tracing subscriber.
    #[must_use]
    pub const fn log_format(&self) -> LogFormat {
        self.log_format
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    fn defaults_match_the_daemon_protocol() {
        let config = Config::default();

        assert!(config.devices().is_empty());
        assert_eq!(config.read_timeout(), Duration::from_secs(15));
        assert_eq!(config.reconnect_cooldown(), Duration::from_secs(1));
        assert_eq!(config.nabd_port(), 10543);
        assert_eq!(config.ssh_user(), "pi");
        assert!(config.greet_on_connect());
        assert_eq!(config.log_format(), LogFormat::Json);
    }
}

//! Built-in defaults shared by the configuration layers.

use crate::logging::LogFormat;

/// Port the nabd daemon listens on, on the device itself.
pub const DEFAULT_NABD_PORT: u16 = 10543;

/// Milliseconds to wait for a frame before probing the daemon.
pub const DEFAULT_READ_TIMEOUT_MS: u64 = 15_000;

/// Milliseconds to wait between two connection attempts.
pub const DEFAULT_RECONNECT_COOLDOWN_MS: u64 = 1_000;

/// Remote shell used to reach devices that are not the local host.
pub const DEFAULT_SSH_COMMAND: &str = "ssh";

/// Account the remote shell logs in as.
pub const DEFAULT_SSH_USER: &str = "pi";

/// Raw socket relay bridging stdio to the daemon port.
pub const DEFAULT_RELAY_COMMAND: &str = "nc";

/// Default log filter expression used by the service.
pub const DEFAULT_LOG_FILTER: &str = "info";

/// Default log filter expression used by the service.
#[must_use]
pub fn default_log_filter() -> &'static str {
    DEFAULT_LOG_FILTER
}

/// Owned log filter value used where allocation is required (e.g. serde).
#[must_use]
pub fn default_log_filter_string() -> String {
    DEFAULT_LOG_FILTER.to_owned()
}

/// Default logging format for the service.
#[must_use]
pub fn default_log_format() -> LogFormat {
    LogFormat::Json
}

pub(crate) const fn default_nabd_port() -> u16 {
    DEFAULT_NABD_PORT
}

pub(crate) const fn default_read_timeout_ms() -> u64 {
    DEFAULT_READ_TIMEOUT_MS
}

pub(crate) const fn default_reconnect_cooldown_ms() -> u64 {
    DEFAULT_RECONNECT_COOLDOWN_MS
}

pub(crate) fn default_ssh_command() -> String {
    DEFAULT_SSH_COMMAND.to_owned()
}

pub(crate) fn default_ssh_user() -> String {
    DEFAULT_SSH_USER.to_owned()
}

pub(crate) fn default_relay_command() -> String {
    DEFAULT_RELAY_COMMAND.to_owned()
}

pub(crate) const fn default_greet_on_connect() -> bool {
    true
}

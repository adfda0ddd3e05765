//! Service hosting the nabd connectivity core.
//!
//! The service loads the layered configuration from [`warren_config`],
//! installs structured telemetry, builds the device table and the session
//! manager from [`warren_nabd`], then keeps one supervised session per device
//! until it receives SIGINT or SIGTERM.
//!
//! Every stage of the bootstrap is reported through a [`HealthReporter`] so
//! operators can tell a configuration mistake from an unreachable device. A
//! device that cannot be reached is not a bootstrap failure: its supervisor
//! keeps retrying in the background and the device is reported `offline`
//! until a session comes up.

mod bootstrap;
mod health;
mod process;
mod service;
pub mod telemetry;

pub use bootstrap::{
    BootstrapError, ConfigLoader, StaticConfigLoader, SystemConfigLoader, bootstrap,
    bootstrap_with, bridge_connector,
};
pub use health::{HealthReporter, StructuredHealthReporter};
pub use process::{LaunchError, ShutdownError, ShutdownSignal, SystemShutdownSignal, run, serve};
pub use service::{EventLogger, Service};
pub use telemetry::{TelemetryError, TelemetryHandle};

#[cfg(test)]
mod tests;

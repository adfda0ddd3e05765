//! Connectivity core for nabd-speaking devices.
//!
//! The crate keeps one long-lived session to the daemon of every configured
//! device. Sessions run through an external bridge process (a local relay, or
//! the same relay behind a remote shell) and carry newline-delimited JSON in
//! both directions.
//!
//! - [`device`] holds the immutable device table.
//! - [`codec`] turns frames into [`codec::Event`] values and back.
//! - [`transport`] spawns bridges and provides bounded reads.
//! - [`manager`] supervises sessions, probes silent daemons, reconnects and
//!   queues outbound commands.
//! - [`bus`] fans decoded events out to subscribers.
//! - [`state`] caches the last state reported by each device.
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use warren_config::{Config, DeviceEntry};
//! use warren_nabd::codec::Command;
//! use warren_nabd::{
//!     BridgeConfig, BridgeConnector, DeviceRegistry, EventBus, LinkTiming, SessionManager,
//! };
//!
//! let config = Config {
//!     devices: vec![DeviceEntry::new("nabaztag1", "10.0.0.5")],
//!     ..Config::default()
//! };
//! let registry = DeviceRegistry::from_entries(config.devices())?;
//! let bus = Arc::new(EventBus::new());
//! let connector = Arc::new(BridgeConnector::new(BridgeConfig::from_config(&config)));
//! let manager = SessionManager::new(registry, bus, connector, LinkTiming::from_config(&config));
//!
//! manager.publish("nabaztag1", Command::ears(5, 5))?;
//! manager.shutdown();
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod bus;
pub mod codec;
pub mod device;
pub mod manager;
pub mod state;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
pub mod transport;

pub use bus::{EventBus, Subscriber, SubscriberError};
pub use codec::{Command, DeviceState, Event, EventKind, MalformedFrame};
pub use device::{Device, DeviceRegistry, RegistryError};
pub use manager::{Batch, LinkError, LinkStatus, LinkTiming, SessionManager};
pub use state::StateTracker;
pub use transport::{BridgeConfig, BridgeConnector, Connector, ReadOutcome, Session, TransportError};

#[cfg(test)]
mod tests;

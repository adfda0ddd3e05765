//! Device links and the outbound queue.
//!
//! The [`SessionManager`] owns one link per registered device. Each link runs
//! at most one supervisor thread that keeps a session to the daemon alive for
//! as long as the manager lives: it connects, subscribes, dispatches every
//! inbound frame, probes silent daemons, and reconnects after a cooldown
//! whenever the session is lost.
//!
//! Publishers never see a transport error. [`SessionManager::publish`] blocks
//! until the device has a live session and retries on the next session when
//! the current one dies under it, so a command is only ever refused when the
//! device is unknown or the manager is shutting down.

mod supervisor;

use std::collections::HashMap;
use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use strum::Display;
use thiserror::Error;
use tracing::{debug, info};

use warren_config::Config;

use crate::bus::EventBus;
use crate::codec::{self, Command};
use crate::device::{Device, DeviceRegistry};
use crate::transport::Connector;
use supervisor::DeviceLink;

/// Log target for publishing and lifecycle operations.
const MANAGER_TARGET: &str = "warren_nabd::manager";

/// Bounded waits driving the supervisor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkTiming {
    /// Wait for one inbound frame before probing, and again for the reply.
    pub read_timeout: Duration,
    /// Pause after a failed attempt or a lost session.
    pub reconnect_cooldown: Duration,
}

impl LinkTiming {
    /// Extracts the timings from the shared configuration.
    #[must_use]
    pub const fn from_config(config: &Config) -> Self {
        Self {
            read_timeout: config.read_timeout(),
            reconnect_cooldown: config.reconnect_cooldown(),
        }
    }
}

impl Default for LinkTiming {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

/// Connectivity of one device as seen by its supervisor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
#[strum(serialize_all = "snake_case")]
pub enum LinkStatus {
    /// No session; the supervisor is idle, cooling down, or not started.
    Disconnected,
    /// Opening a bridge and subscribing.
    Connecting,
    /// Session live and traffic flowing.
    Connected,
    /// Session live but silent; a probe is awaiting its reply.
    Probing,
}

/// Errors surfaced to callers of the manager.
#[derive(Debug, Clone, Error)]
pub enum LinkError {
    /// The text names no registered device.
    #[error("unknown device or address: {query}")]
    UnknownDevice {
        /// Text that was looked up.
        query: String,
    },
    /// [`SessionManager::shutdown`] was called.
    #[error("session manager is shutting down")]
    ShuttingDown,
    /// The operating system refused to start the supervisor thread.
    #[error("failed to start supervisor for {device}: {source}")]
    SupervisorSpawn {
        /// Device whose supervisor could not start.
        device: String,
        /// Underlying spawn error.
        #[source]
        source: Arc<io::Error>,
    },
}

/// One or more commands written back to back.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Batch(Vec<Command>);

impl Batch {
    /// Commands in write order.
    #[must_use]
    pub fn commands(&self) -> &[Command] {
        &self.0
    }

    /// Number of commands.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the batch carries no command.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Command> for Batch {
    fn from(command: Command) -> Self {
        Self(vec![command])
    }
}

impl From<Vec<Command>> for Batch {
    fn from(commands: Vec<Command>) -> Self {
        Self(commands)
    }
}

impl FromIterator<Command> for Batch {
    fn from_iter<I: IntoIterator<Item = Command>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Owner of every device link.
///
/// Dropping the manager shuts it down.
pub struct SessionManager {
    registry: DeviceRegistry,
    links: HashMap<String, DeviceLink>,
    stopping: Arc<AtomicBool>,
}

impl SessionManager {
    /// Creates one idle link per registered device. Nothing connects until
    /// [`Self::connect`], [`Self::connect_all`] or [`Self::publish`] is
    /// called.
    #[must_use]
    pub fn new(
        registry: DeviceRegistry,
        bus: Arc<EventBus>,
        connector: Arc<dyn Connector>,
        timing: LinkTiming,
    ) -> Self {
        let stopping = Arc::new(AtomicBool::new(false));
        let links = registry
            .devices()
            .map(|device| {
                let link = DeviceLink::new(
                    device.clone(),
                    Arc::clone(&bus),
                    Arc::clone(&connector),
                    timing,
                    Arc::clone(&stopping),
                );
                (device.address().to_owned(), link)
            })
            .collect();
        Self {
            registry,
            links,
            stopping,
        }
    }

    /// Devices managed by this instance.
    #[must_use]
    pub const fn registry(&self) -> &DeviceRegistry {
        &self.registry
    }

    /// Starts the supervisor of the device unless one is already running.
    ///
    /// With `greet` set, the device rotates its ears once its session is up:
    /// immediately when a session is already live, otherwise right after the
    /// next handshake.
    pub fn connect(&self, device: &str, greet: bool) -> Result<(), LinkError> {
        let link = self.link(device)?;
        link.ensure_started()?;
        if greet {
            link.request_greeting();
        }
        Ok(())
    }

    /// Connects every registered device in configuration order.
    pub fn connect_all(&self, greet: bool) -> Result<(), LinkError> {
        info!(
            target: MANAGER_TARGET,
            devices = self.registry.len(),
            greet,
            "connecting every device"
        );
        for device in self.registry.devices() {
            self.connect(device.address(), greet)?;
        }
        Ok(())
    }

    /// Writes the commands to the device, waiting as long as it takes for a
    /// live session. The supervisor is started even for an empty batch.
    ///
    /// The batch is written under the session's writer lock, so batches from
    /// concurrent publishers never interleave and sequential calls from one
    /// caller arrive in order.
    pub fn publish(&self, device: &str, batch: impl Into<Batch>) -> Result<(), LinkError> {
        let link = self.link(device)?;
        let batch = batch.into();
        link.ensure_started()?;
        if batch.is_empty() {
            return Ok(());
        }
        debug!(
            target: MANAGER_TARGET,
            device = %link.device(),
            commands = batch.len(),
            "publishing"
        );
        let frames: Vec<Vec<u8>> = batch.commands().iter().map(codec::encode).collect();
        link.deliver(&frames)
    }

    /// Current connectivity of the device.
    pub fn status(&self, device: &str) -> Result<LinkStatus, LinkError> {
        Ok(self.link(device)?.status())
    }

    /// Stops every supervisor and releases waiting publishers.
    ///
    /// Live bridges are killed so blocked reads return at once; supervisors
    /// are joined before this returns. Idempotent.
    pub fn shutdown(&self) {
        if !self.stopping.swap(true, Ordering::AcqRel) {
            info!(target: MANAGER_TARGET, "shutting down device links");
        }
        for link in self.links.values() {
            link.halt();
        }
        for link in self.links.values() {
            link.join();
        }
    }

    /// Whether [`Self::shutdown`] has been called.
    #[must_use]
    pub fn is_shutting_down(&self) -> bool {
        self.stopping.load(Ordering::Acquire)
    }

    fn link(&self, name_or_address: &str) -> Result<&DeviceLink, LinkError> {
        self.registry
            .resolve(name_or_address)
            .ok()
            .and_then(|device: &Device| self.links.get(device.address()))
            .ok_or_else(|| LinkError::UnknownDevice {
                query: name_or_address.to_owned(),
            })
    }
}

impl Drop for SessionManager {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionManager")
            .field("devices", &self.registry.len())
            .field("stopping", &self.is_shutting_down())
            .finish_non_exhaustive()
    }
}

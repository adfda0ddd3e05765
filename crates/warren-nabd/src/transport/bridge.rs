//! Bridge strategies and the process-backed connector.

use std::io;
use std::process::{Command, Stdio};
use std::sync::Arc;

use tracing::debug;

use warren_config::Config;

use super::{Session, TRANSPORT_TARGET, TransportError};
use crate::device::Device;

/// Opens sessions to devices.
///
/// The supervisor only talks to this trait, so tests can hand it in-memory
/// sessions without spawning processes.
pub trait Connector: Send + Sync {
    /// Opens a fresh session to the device.
    fn open(&self, device: &Device) -> Result<Session, TransportError>;
}

/// Binaries and port used to build bridge invocations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgeConfig {
    /// Remote shell binary.
    pub ssh_command: String,
    /// Remote shell login.
    pub ssh_user: String,
    /// Relay binary, run locally or on the device.
    pub relay_command: String,
    /// Daemon port on the device.
    pub port: u16,
}

impl BridgeConfig {
    /// Extracts the bridge settings from the shared configuration.
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self {
            ssh_command: config.ssh_command().to_owned(),
            ssh_user: config.ssh_user().to_owned(),
            relay_command: config.relay_command().to_owned(),
            port: config.nabd_port(),
        }
    }

    /// Invocation reaching the daemon of `device`.
    ///
    /// A loopback device runs the relay directly; any other device runs it
    /// on the far side of a remote shell.
    #[must_use]
    pub fn command_for(&self, device: &Device) -> BridgeCommand {
        let relay_args = vec![
            String::from("-4"),
            String::from("localhost"),
            self.port.to_string(),
        ];
        if device.is_loopback() {
            return BridgeCommand {
                program: self.relay_command.clone(),
                args: relay_args,
            };
        }
        let remote = std::iter::once(self.relay_command.as_str())
            .chain(relay_args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ");
        BridgeCommand {
            program: self.ssh_command.clone(),
            args: vec![
                String::from("-T"),
                format!("{}@{}", self.ssh_user, device.address()),
                remote,
            ],
        }
    }
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

/// Program and arguments of one bridge process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgeCommand {
    /// Executable name or path.
    pub program: String,
    /// Arguments passed to the executable.
    pub args: Vec<String>,
}

/// Connector spawning a real bridge per session.
#[derive(Debug, Clone, Default)]
pub struct BridgeConnector {
    config: BridgeConfig,
}

impl BridgeConnector {
    /// Creates a connector with the given bridge settings.
    #[must_use]
    pub const fn new(config: BridgeConfig) -> Self {
        Self { config }
    }
}

impl Connector for BridgeConnector {
    fn open(&self, device: &Device) -> Result<Session, TransportError> {
        let invocation = self.config.command_for(device);
        debug!(
            target: TRANSPORT_TARGET,
            device = %device,
            command = %invocation.program,
            args = ?invocation.args,
            "spawning bridge process"
        );

        let child = Command::new(&invocation.program)
            .args(&invocation.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|error| {
                if error.kind() == io::ErrorKind::NotFound {
                    TransportError::BridgeNotFound {
                        command: invocation.program.clone(),
                        source: Arc::new(error),
                    }
                } else {
                    TransportError::SpawnFailed {
                        message: format!("failed to start {}", invocation.program),
                        source: Arc::new(error),
                    }
                }
            })?;

        debug!(
            target: TRANSPORT_TARGET,
            device = %device,
            pid = child.id(),
            "bridge process spawned"
        );

        Session::from_child(child)
    }
}

//! Static device table resolved once at startup.
//!
//! Devices are declared in configuration as `name = address` pairs. The
//! registry validates the table, then answers lookups by either form so the
//! rest of the crate can work exclusively with [`Device`] values keyed by
//! address.

use std::collections::HashMap;
use std::fmt;
use std::net::IpAddr;

use thiserror::Error;

use warren_config::DeviceEntry;

/// One physical device, identified by the address the bridge connects to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Device {
    address: String,
    alias: Option<String>,
}

impl Device {
    /// Creates a device with an optional alias.
    #[must_use]
    pub fn new(address: impl Into<String>, alias: Option<String>) -> Self {
        Self {
            address: address.into(),
            alias,
        }
    }

    /// Network address of the device.
    #[must_use]
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Alias when present, address otherwise.
    #[must_use]
    pub fn name(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.address)
    }

    /// Whether the daemon runs on this very machine, so no remote shell is
    /// needed to reach it.
    #[must_use]
    pub fn is_loopback(&self) -> bool {
        if self.address.eq_ignore_ascii_case("localhost") {
            return true;
        }
        self.address
            .parse::<IpAddr>()
            .is_ok_and(|ip| ip.is_loopback())
    }
}

impl fmt::Display for Device {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(self.name())
    }
}

/// Errors raised while building or querying the registry.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RegistryError {
    /// Two entries share the same name.
    #[error("duplicate device name: {name}")]
    DuplicateName {
        /// Offending name.
        name: String,
    },
    /// Two entries share the same address.
    #[error("duplicate device address: {address}")]
    DuplicateAddress {
        /// Offending address.
        address: String,
    },
    /// The lookup matched neither a name nor an address.
    #[error("unknown device or address: {query}")]
    UnknownDevice {
        /// Text that was looked up.
        query: String,
    },
}

/// Immutable table of every device the process manages.
#[derive(Debug, Clone, Default)]
pub struct DeviceRegistry {
    devices: Vec<Device>,
    by_address: HashMap<String, usize>,
    by_name: HashMap<String, usize>,
}

impl DeviceRegistry {
    /// Builds the registry from configuration entries, rejecting duplicates.
    pub fn from_entries<'a, I>(entries: I) -> Result<Self, RegistryError>
    where
        I: IntoIterator<Item = &'a DeviceEntry>,
    {
        let mut registry = Self::default();
        for entry in entries {
            registry.insert(&entry.name, &entry.address)?;
        }
        Ok(registry)
    }

    fn insert(&mut self, name: &str, address: &str) -> Result<(), RegistryError> {
        let name = name.trim().to_lowercase();
        let address = address.trim().to_owned();
        if self.by_name.contains_key(&name) {
            return Err(RegistryError::DuplicateName { name });
        }
        if self.by_address.contains_key(&address) {
            return Err(RegistryError::DuplicateAddress { address });
        }
        let index = self.devices.len();
        self.by_name.insert(name.clone(), index);
        self.by_address.insert(address.clone(), index);
        self.devices.push(Device::new(address, Some(name)));
        Ok(())
    }

    /// Resolves a device from its alias (case-insensitive) or its address.
    pub fn resolve(&self, name_or_address: &str) -> Result<&Device, RegistryError> {
        let query = name_or_address.trim();
        self.by_name
            .get(&query.to_lowercase())
            .or_else(|| self.by_address.get(query))
            .and_then(|index| self.devices.get(*index))
            .ok_or_else(|| RegistryError::UnknownDevice {
                query: name_or_address.to_owned(),
            })
    }

    /// Devices in configuration order.
    pub fn devices(&self) -> impl Iterator<Item = &Device> {
        self.devices.iter()
    }

    /// Number of registered devices.
    #[must_use]
    pub fn len(&self) -> usize {
        self.devices.len()
    }

    /// Whether no device is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }
}

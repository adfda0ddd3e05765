use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors produced when parsing [`DeviceEntry`] values.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DeviceEntryParseError {
    /// Address assignment (`=`) was missing from the entry.
    #[error("device entry '{0}' is missing the address assignment '='")]
    MissingAddress(String),
    /// The name part was blank.
    #[error("device entry '{0}' has an empty name")]
    EmptyName(String),
    /// The address part was blank.
    #[error("device entry '{0}' has an empty address")]
    EmptyAddress(String),
}

/// Static declaration of one device: a human-readable name bound to the
/// network address the bridge connects to.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct DeviceEntry {
    /// Alias used by operators, matched case-insensitively.
    pub name: String,
    /// Address handed to the remote shell, e.g. `10.0.0.5`.
    pub address: String,
}

impl DeviceEntry {
    /// Creates a new entry, normalising the name to lower case.
    #[must_use]
    pub fn new(name: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            name: normalise_name(&name.into()),
            address: address.into().trim().to_owned(),
        }
    }
}

impl fmt::Display for DeviceEntry {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "{}={}", self.name, self.address)
    }
}

impl FromStr for DeviceEntry {
    type Err = DeviceEntryParseError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let (name, address) = input
            .split_once('=')
            .ok_or_else(|| DeviceEntryParseError::MissingAddress(input.to_owned()))?;
        if name.trim().is_empty() {
            return Err(DeviceEntryParseError::EmptyName(input.to_owned()));
        }
        if address.trim().is_empty() {
            return Err(DeviceEntryParseError::EmptyAddress(input.to_owned()));
        }
        Ok(Self::new(name, address))
    }
}

fn normalise_name(name: &str) -> String {
    name.trim().to_lowercase()
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    fn parses_name_and_address() {
        let entry: DeviceEntry = " Nabaztag1 = 10.0.0.5 ".parse().expect("valid entry");

        assert_eq!(entry.name, "nabaztag1");
        assert_eq!(entry.address, "10.0.0.5");
        assert_eq!(entry.to_string(), "nabaztag1=10.0.0.5");
    }

    #[rstest]
    #[case("nabaztag1", DeviceEntryParseError::MissingAddress(String::from("nabaztag1")))]
    #[case("=10.0.0.5", DeviceEntryParseError::EmptyName(String::from("=10.0.0.5")))]
    #[case("kitchen= ", DeviceEntryParseError::EmptyAddress(String::from("kitchen= ")))]
    fn rejects_incomplete_entries(#[case] input: &str, #[case] expected: DeviceEntryParseError) {
        assert_eq!(input.parse::<DeviceEntry>(), Err(expected));
    }
}

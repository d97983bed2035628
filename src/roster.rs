//! Device roster: the allowlist of thermometers to export, with their
//! human-readable names.
//!
//! Entries come from a JSON file (an array of `{"address": ..., "name": ...}`
//! objects) and from repeated `--device ADDR=NAME` flags. Addresses are
//! normalized on load, so lookups are case-insensitive and independent of the
//! separator style used in the configuration.

use crate::mac_address::{MacAddress, ParseMacError};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::warn;

/// One configured device as written in the roster file or on the command line.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct DeviceEntry {
    /// The hardware address, in any accepted spelling (e.g. "aa:bb:cc:dd:ee:ff")
    pub address: String,
    /// The human-readable name (e.g. "Bedroom")
    pub name: String,
}

/// Errors returned while loading the roster.
#[derive(Error, Debug)]
pub enum RosterError {
    #[error("failed to read roster {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse roster: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("roster entry '{name}' has an invalid address '{address}': {source}")]
    Address {
        address: String,
        name: String,
        source: ParseMacError,
    },
}

/// Parse a device entry from a string in the format "MAC=NAME".
///
/// Used as the clap value parser for `--device`.
///
/// # Example
/// ```
/// use switchbot_mhz19_exporter::roster::parse_device;
///
/// let entry = parse_device("AA:BB:CC:DD:EE:FF=Kitchen").unwrap();
/// assert_eq!(entry.address, "AA:BB:CC:DD:EE:FF");
/// assert_eq!(entry.name, "Kitchen");
/// ```
pub fn parse_device(src: &str) -> Result<DeviceEntry, String> {
    let (address, name) = src
        .split_once('=')
        .ok_or_else(|| "invalid device: expected format MAC=NAME".to_string())?;
    address
        .parse::<MacAddress>()
        .map_err(|e| format!("invalid device: {e}"))?;
    Ok(DeviceEntry {
        address: address.into(),
        name: name.into(),
    })
}

/// Read device entries from a JSON roster file.
pub fn load_file(path: &Path) -> Result<Vec<DeviceEntry>, RosterError> {
    let contents = std::fs::read_to_string(path).map_err(|source| RosterError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    parse_json(&contents)
}

/// Parse device entries from JSON roster contents.
pub fn parse_json(contents: &str) -> Result<Vec<DeviceEntry>, RosterError> {
    Ok(serde_json::from_str(contents)?)
}

/// Read-only lookup table from normalized address to device name.
#[derive(Debug, Clone, Default)]
pub struct Roster {
    devices: HashMap<MacAddress, String>,
}

impl Roster {
    /// Build a roster from device entries.
    ///
    /// When an address appears more than once the later entry wins, so flags
    /// given after a roster file override the file.
    pub fn from_entries<'a, I>(entries: I) -> Result<Self, RosterError>
    where
        I: IntoIterator<Item = &'a DeviceEntry>,
    {
        let mut devices = HashMap::new();
        for entry in entries {
            let address = entry.address.parse::<MacAddress>().map_err(|source| {
                RosterError::Address {
                    address: entry.address.clone(),
                    name: entry.name.clone(),
                    source,
                }
            })?;
            if let Some(previous) = devices.insert(address, entry.name.clone()) {
                warn!(
                    %address,
                    %previous,
                    name = %entry.name,
                    "duplicate roster entry, using the later name"
                );
            }
        }
        Ok(Roster { devices })
    }

    /// Look up the configured name of a device.
    pub fn name(&self, address: &MacAddress) -> Option<&str> {
        self.devices.get(address).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }
}

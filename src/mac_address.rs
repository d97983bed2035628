//! Normalized Bluetooth hardware address used to join advertisements with the
//! device roster.
//!
//! Addresses are accepted in colon (`aa:bb:cc:dd:ee:ff`), dash
//! (`AA-BB-CC-DD-EE-FF`) or bare (`AABBCCDDEEFF`) form, in any letter case, and
//! always display as uppercase colon form. Equality is on the raw bytes, so two
//! spellings of the same address compare equal once parsed.

use std::fmt;
use std::hash::Hash;
use std::str::FromStr;
use thiserror::Error;

/// A Bluetooth MAC address stored as a compact 6-byte array.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
pub struct MacAddress(pub [u8; 6]);

impl fmt::Display for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(f, "{a:02X}:{b:02X}:{c:02X}:{d:02X}:{e:02X}:{g:02X}")
    }
}

/// Errors returned when parsing a MAC address string.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseMacError {
    #[error("invalid MAC address: expected 6 octets, got {0}")]
    InvalidLength(usize),
    #[error("invalid MAC address: octet {0} has wrong length")]
    InvalidPartLength(usize),
    #[error("invalid MAC address: '{0}' is not valid hex")]
    InvalidHex(String),
}

fn octets(s: &str) -> Result<Vec<&str>, ParseMacError> {
    if let Some(separator) = [':', '-'].into_iter().find(|c| s.contains(*c)) {
        return Ok(s.split(separator).collect());
    }

    // Bare form: twelve hex digits, no separators.
    if !s.is_ascii() {
        return Err(ParseMacError::InvalidHex(s.to_string()));
    }
    if s.len() % 2 != 0 {
        return Err(ParseMacError::InvalidPartLength(s.len() / 2));
    }
    Ok((0..s.len()).step_by(2).map(|i| &s[i..i + 2]).collect())
}

impl FromStr for MacAddress {
    type Err = ParseMacError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts = octets(s.trim())?;
        if parts.len() != 6 {
            return Err(ParseMacError::InvalidLength(parts.len()));
        }

        let mut bytes = [0u8; 6];
        for (i, part) in parts.iter().enumerate() {
            if part.len() != 2 {
                return Err(ParseMacError::InvalidPartLength(i));
            }
            bytes[i] = u8::from_str_radix(part, 16)
                .map_err(|_| ParseMacError::InvalidHex(part.to_string()))?;
        }

        Ok(MacAddress(bytes))
    }
}

impl From<[u8; 6]> for MacAddress {
    fn from(bytes: [u8; 6]) -> Self {
        Self(bytes)
    }
}

#[cfg(feature = "bluer")]
impl From<bluer::Address> for MacAddress {
    fn from(addr: bluer::Address) -> Self {
        Self(addr.0)
    }
}

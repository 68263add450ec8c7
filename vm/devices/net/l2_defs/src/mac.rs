// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! MAC address type used by filter commands and device configuration.

use serde::Deserialize;
use serde::Serialize;
use std::fmt::Display;
use std::str::FromStr;
use thiserror::Error;

/// A 48-bit Ethernet MAC address.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
#[repr(transparent)]
pub struct MacAddress([u8; 6]);

impl MacAddress {
    pub const BROADCAST: Self = Self([0xff; 6]);

    /// Returns a new MAC address from the given bytes.
    pub const fn new(value: [u8; 6]) -> Self {
        Self(value)
    }

    /// Returns the bytes of the MAC address.
    pub const fn to_bytes(self) -> [u8; 6] {
        self.0
    }

    pub const fn is_multicast(&self) -> bool {
        self.0[0] & 1 != 0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0; 6]
    }
}

impl From<[u8; 6]> for MacAddress {
    fn from(value: [u8; 6]) -> Self {
        Self::new(value)
    }
}

impl From<MacAddress> for [u8; 6] {
    fn from(value: MacAddress) -> Self {
        value.0
    }
}

impl From<MacAddress> for String {
    fn from(value: MacAddress) -> Self {
        value.to_string()
    }
}

impl TryFrom<String> for MacAddress {
    type Error = InvalidMacAddress;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl Display for MacAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            self.0[0], self.0[1], self.0[2], self.0[3], self.0[4], self.0[5]
        )
    }
}

/// Error returned when parsing a [`MacAddress`] fails.
#[derive(Debug, Error)]
#[error("invalid mac address")]
pub struct InvalidMacAddress;

impl FromStr for MacAddress {
    type Err = InvalidMacAddress;

    fn from_str(val: &str) -> Result<Self, InvalidMacAddress> {
        if val.len() != 17 {
            return Err(InvalidMacAddress);
        }
        let sep = val.as_bytes()[2];
        if sep != b'-' && sep != b':' {
            return Err(InvalidMacAddress);
        }
        let mut mac = [0u8; 6];
        let mut parts = 0;
        for (src, dst) in val.split(sep as char).zip(&mut mac) {
            if src.len() != 2 {
                return Err(InvalidMacAddress);
            }
            *dst = u8::from_str_radix(src, 16).map_err(|_| InvalidMacAddress)?;
            parts += 1;
        }
        if parts != 6 {
            return Err(InvalidMacAddress);
        }
        Ok(MacAddress(mac))
    }
}

//! Value types shared by the message definitions and handlers.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;

/// Error returned when parsing an address or prefix from text.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("invalid MAC address: {0}")]
    InvalidMacAddress(String),

    #[error("invalid IP prefix: {0}")]
    InvalidIpPrefix(String),
}

/// Dataplane interface handle (`sw_if_index`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct InterfaceIndex(pub u32);

impl InterfaceIndex {
    /// "Any interface" wildcard (`~0`).
    pub const INVALID: InterfaceIndex = InterfaceIndex(u32::MAX);

    pub fn is_valid(&self) -> bool {
        *self != Self::INVALID
    }
}

impl fmt::Display for InterfaceIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_valid() {
            write!(f, "{}", self.0)
        } else {
            write!(f, "~0")
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AddressFamily {
    Ip4 = 0,
    Ip6 = 1,
}

impl AddressFamily {
    pub fn from_raw(raw: u32) -> Option<Self> {
        match raw {
            0 => Some(AddressFamily::Ip4),
            1 => Some(AddressFamily::Ip6),
            _ => None,
        }
    }

    pub fn of(addr: &IpAddr) -> Self {
        match addr {
            IpAddr::V4(_) => AddressFamily::Ip4,
            IpAddr::V6(_) => AddressFamily::Ip6,
        }
    }
}

/// IP protocol numbers used by punt registrations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IpProto {
    Icmp = 1,
    Tcp = 6,
    Udp = 17,
    Icmp6 = 58,
}

impl IpProto {
    pub fn from_raw(raw: u32) -> Option<Self> {
        match raw {
            1 => Some(IpProto::Icmp),
            6 => Some(IpProto::Tcp),
            17 => Some(IpProto::Udp),
            58 => Some(IpProto::Icmp6),
            _ => None,
        }
    }
}

/// A 48-bit Ethernet MAC address, written as `aa:bb:cc:dd:ee:ff`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct MacAddress(pub [u8; 6]);

impl MacAddress {
    pub const ZERO: MacAddress = MacAddress([0; 6]);

    pub fn is_zero(&self) -> bool {
        *self == Self::ZERO
    }
}

impl fmt::Display for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let b = &self.0;
        write!(
            f,
            "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            b[0], b[1], b[2], b[3], b[4], b[5]
        )
    }
}

impl FromStr for MacAddress {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut bytes = [0u8; 6];
        let mut parts = s.split(|c| c == ':' || c == '-');
        for byte in bytes.iter_mut() {
            let part = parts
                .next()
                .filter(|p| p.len() == 2)
                .ok_or_else(|| ParseError::InvalidMacAddress(s.to_string()))?;
            *byte = u8::from_str_radix(part, 16)
                .map_err(|_| ParseError::InvalidMacAddress(s.to_string()))?;
        }
        if parts.next().is_some() {
            return Err(ParseError::InvalidMacAddress(s.to_string()));
        }
        Ok(MacAddress(bytes))
    }
}

impl TryFrom<String> for MacAddress {
    type Error = ParseError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<MacAddress> for String {
    fn from(mac: MacAddress) -> String {
        mac.to_string()
    }
}

/// An interface address with its prefix length, e.g. `10.0.0.1/24`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct IpPrefix {
    pub address: IpAddr,
    pub len: u8,
}

impl IpPrefix {
    pub fn new(address: IpAddr, len: u8) -> Result<Self, ParseError> {
        let max = if address.is_ipv4() { 32 } else { 128 };
        if len > max {
            return Err(ParseError::InvalidIpPrefix(format!("{}/{}", address, len)));
        }
        Ok(IpPrefix { address, len })
    }

    pub fn family(&self) -> AddressFamily {
        AddressFamily::of(&self.address)
    }
}

impl fmt::Display for IpPrefix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.address, self.len)
    }
}

impl FromStr for IpPrefix {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ParseError::InvalidIpPrefix(s.to_string());
        let (addr, len) = s.split_once('/').ok_or_else(invalid)?;
        let address: IpAddr = addr.parse().map_err(|_| invalid())?;
        let len: u8 = len.parse().map_err(|_| invalid())?;
        IpPrefix::new(address, len)
    }
}

//! Interface model and key layout.

use std::fmt;

use serde::{Deserialize, Serialize};
use vpp_binapi::{InterfaceIndex, IpPrefix, MacAddress};

/// Prefix of every interface key.
pub const INTERFACE_PREFIX: &str = "config/vpp/v2/interfaces/";

/// Prefix of the derived interface address keys.
pub const ADDRESS_PREFIX: &str = "vpp/interface/";

const ADDRESS_INFIX: &str = "/address/";

/// Longest interface name VPP stores in a tag.
pub const MAX_NAME_LEN: usize = 63;

/// Name VPP gives the interface it always creates.
pub const LOCAL0: &str = "local0";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InterfaceKind {
    #[default]
    Loopback,
    /// The built-in `local0`; reported by dumps, never created.
    Local,
}

impl fmt::Display for InterfaceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InterfaceKind::Loopback => write!(f, "loopback"),
            InterfaceKind::Local => write!(f, "local"),
        }
    }
}

/// A desired (or dumped) VPP interface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Interface {
    pub name: String,
    #[serde(default, rename = "type")]
    pub kind: InterfaceKind,
    #[serde(default)]
    pub enabled: bool,
    /// Requested MAC; VPP assigns one when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phys_address: Option<String>,
    /// Addresses in CIDR form, e.g. `10.0.0.1/24`.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ip_addresses: Vec<String>,
}

vpp_scheduler::impl_proto_value!(Interface);

impl Interface {
    pub fn loopback(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: InterfaceKind::Loopback,
            enabled: false,
            phys_address: None,
            ip_addresses: Vec::new(),
        }
    }

    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn with_phys_address(mut self, mac: impl Into<String>) -> Self {
        self.phys_address = Some(mac.into());
        self
    }

    pub fn with_address(mut self, address: impl Into<String>) -> Self {
        self.ip_addresses.push(address.into());
        self
    }

    /// Requested MAC, `None` when unset or unparsable.
    pub fn mac(&self) -> Option<MacAddress> {
        self.phys_address.as_deref().and_then(|m| m.parse().ok())
    }

    pub fn key(&self) -> String {
        interface_key(&self.name)
    }
}

/// An address assigned to a named interface; derived from [`Interface`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterfaceAddress {
    pub interface: String,
    pub prefix: IpPrefix,
}

vpp_scheduler::impl_proto_value!(InterfaceAddress);

/// Runtime state of a configured interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InterfaceMeta {
    pub sw_if_index: InterfaceIndex,
}

impl InterfaceMeta {
    /// Handle extractor for the name→handle index.
    pub fn handle(&self) -> u32 {
        self.sw_if_index.0
    }
}

pub fn interface_key(name: &str) -> String {
    format!("{}{}", INTERFACE_PREFIX, name)
}

pub fn address_key(interface: &str, prefix: &IpPrefix) -> String {
    format!("{}{}{}{}", ADDRESS_PREFIX, interface, ADDRESS_INFIX, prefix)
}

/// Splits an address key into interface name and prefix.
pub fn parse_address_key(key: &str) -> Option<(&str, IpPrefix)> {
    let rest = key.strip_prefix(ADDRESS_PREFIX)?;
    let (interface, prefix) = rest.split_once(ADDRESS_INFIX)?;
    if interface.is_empty() {
        return None;
    }
    Some((interface, prefix.parse().ok()?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_address_key_round_trip() {
        let prefix: IpPrefix = "2001:db8::1/64".parse().unwrap();
        let key = address_key("uplink", &prefix);
        assert_eq!(key, "vpp/interface/uplink/address/2001:db8::1/64");
        assert_eq!(parse_address_key(&key), Some(("uplink", prefix)));
    }

    #[test]
    fn test_parse_address_key_rejects() {
        assert_eq!(parse_address_key("vpp/interface//address/10.0.0.1/24"), None);
        assert_eq!(parse_address_key("vpp/interface/if1/address/10.0.0.1"), None);
        assert_eq!(parse_address_key("config/vpp/v2/interfaces/if1"), None);
    }

    #[test]
    fn test_interface_yaml() {
        let yaml = r#"
name: if1
type: loopback
enabled: true
phys_address: "02:00:00:00:00:01"
ip_addresses: ["10.0.0.1/24"]
"#;
        let iface: Interface = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(
            iface,
            Interface::loopback("if1")
                .enabled(true)
                .with_phys_address("02:00:00:00:00:01")
                .with_address("10.0.0.1/24")
        );
        assert_eq!(iface.key(), "config/vpp/v2/interfaces/if1");
        assert_eq!(iface.mac(), Some("02:00:00:00:00:01".parse().unwrap()));
    }
}

//! Punt model and key layout.

use std::net::IpAddr;

use serde::{Deserialize, Serialize};
pub use vpp_binapi::vppcalls::{L3Protocol, L4Protocol};

pub const TO_HOST_PREFIX: &str = "config/vpp/v2/punt/tohost/";
pub const EXCEPTION_PREFIX: &str = "config/vpp/v2/punt/exception/";
pub const IP_REDIRECT_PREFIX: &str = "config/vpp/v2/punt/ip-redirect/";

/// Marks a socket path VPP reported without the client path it punts to.
pub const UNKNOWN_PATH_MARK: &str = "!";

/// Punt of L4 traffic for one port to a unix socket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToHost {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub l3_protocol: Option<L3Protocol>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub l4_protocol: Option<L4Protocol>,
    #[serde(default)]
    pub port: u32,
    #[serde(default)]
    pub socket_path: String,
}

/// Punt of packets VPP drops for a named reason to a unix socket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Exception {
    #[serde(default)]
    pub reason: String,
    #[serde(default)]
    pub socket_path: String,
}

/// Redirect of punted IP traffic out of an interface towards a next hop.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IpRedirect {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub l3_protocol: Option<L3Protocol>,
    /// Receiving interface; empty means any.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub rx_interface: String,
    #[serde(default)]
    pub tx_interface: String,
    /// Next hop address, optionally with a mask that is ignored.
    #[serde(default)]
    pub next_hop: String,
}

vpp_scheduler::impl_proto_value!(ToHost, Exception, IpRedirect);

/// Socket path VPP uses for a registration.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PuntSocketMeta {
    pub vpp_socket_path: String,
}

fn l3_label(l3: Option<L3Protocol>) -> String {
    l3.map_or_else(|| "UNDEFINED_L3".to_string(), |p| p.to_string())
}

fn l4_label(l4: Option<L4Protocol>) -> String {
    l4.map_or_else(|| "UNDEFINED_L4".to_string(), |p| p.to_string())
}

impl ToHost {
    pub fn new(l3: L3Protocol, l4: L4Protocol, port: u32, socket_path: impl Into<String>) -> Self {
        Self {
            l3_protocol: Some(l3),
            l4_protocol: Some(l4),
            port,
            socket_path: socket_path.into(),
        }
    }

    pub fn key(&self) -> String {
        format!(
            "{}l3/{}/l4/{}/port/{}",
            TO_HOST_PREFIX,
            l3_label(self.l3_protocol),
            l4_label(self.l4_protocol),
            self.port
        )
    }
}

impl Exception {
    pub fn new(reason: impl Into<String>, socket_path: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
            socket_path: socket_path.into(),
        }
    }

    pub fn key(&self) -> String {
        format!("{}{}", EXCEPTION_PREFIX, self.reason)
    }
}

impl IpRedirect {
    pub fn new(
        l3: L3Protocol,
        rx_interface: impl Into<String>,
        tx_interface: impl Into<String>,
        next_hop: impl Into<String>,
    ) -> Self {
        Self {
            l3_protocol: Some(l3),
            rx_interface: rx_interface.into(),
            tx_interface: tx_interface.into(),
            next_hop: next_hop.into(),
        }
    }

    pub fn key(&self) -> String {
        format!(
            "{}l3/{}/tx/{}",
            IP_REDIRECT_PREFIX,
            l3_label(self.l3_protocol),
            self.tx_interface
        )
    }

    /// The next hop without any `/mask` suffix.
    pub fn next_hop_addr(&self) -> Option<IpAddr> {
        let addr = self
            .next_hop
            .split_once('/')
            .map_or(self.next_hop.as_str(), |(addr, _)| addr);
        addr.parse().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_keys() {
        let punt = ToHost::new(L3Protocol::All, L4Protocol::Udp, 9000, "/tmp/p.sock");
        assert_eq!(punt.key(), "config/vpp/v2/punt/tohost/l3/ALL/l4/UDP/port/9000");

        let undefined = ToHost {
            l3_protocol: None,
            l4_protocol: None,
            port: 0,
            socket_path: String::new(),
        };
        assert_eq!(
            undefined.key(),
            "config/vpp/v2/punt/tohost/l3/UNDEFINED_L3/l4/UNDEFINED_L4/port/0"
        );

        assert_eq!(
            Exception::new("ipsec4-no-such-tunnel", "/tmp/e.sock").key(),
            "config/vpp/v2/punt/exception/ipsec4-no-such-tunnel"
        );
        assert_eq!(
            IpRedirect::new(L3Protocol::Ipv4, "", "if2", "10.0.0.2").key(),
            "config/vpp/v2/punt/ip-redirect/l3/IPV4/tx/if2"
        );
    }

    #[test]
    fn test_next_hop_mask_stripped() {
        let redirect = IpRedirect::new(L3Protocol::Ipv6, "if1", "if2", "2001:db8::2/64");
        assert_eq!(redirect.next_hop_addr(), Some("2001:db8::2".parse().unwrap()));
        let redirect = IpRedirect::new(L3Protocol::Ipv4, "if1", "if2", "bogus");
        assert_eq!(redirect.next_hop_addr(), None);
    }

    #[test]
    fn test_to_host_yaml() {
        let punt: ToHost = serde_yaml::from_str(
            "l3_protocol: IPV4\nl4_protocol: UDP\nport: 9000\nsocket_path: /tmp/p.sock\n",
        )
        .unwrap();
        assert_eq!(punt, ToHost::new(L3Protocol::Ipv4, L4Protocol::Udp, 9000, "/tmp/p.sock"));
    }
}

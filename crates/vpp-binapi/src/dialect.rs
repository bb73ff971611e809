//! Protocol dialects: per-release message CRCs and layout differences.
//!
//! A message is identified on the wire by `{name}_{crc}`, the CRC being a
//! hash of the message definition. Two releases agree on a message only when
//! both name and CRC match. Layout differences this crate models:
//!
//! | field                          | vpp1908 | vpp2001 |
//! |--------------------------------|---------|---------|
//! | address family, IP protocol    | u32     | u8      |
//! | punt union                     | 10 B    | 4 B     |
//! | interface admin state          | u8 flag | u32 flags |

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// A dataplane release whose message schema this crate can speak.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dialect {
    Vpp1908,
    Vpp2001,
}

const VPP1908_CRCS: &[(&str, &str)] = &[
    ("sockclnt_create", "455fb9c4"),
    ("sockclnt_create_reply", "35166268"),
    ("control_ping", "51077d14"),
    ("control_ping_reply", "f6b0b8ca"),
    ("create_loopback", "3b54129c"),
    ("create_loopback_reply", "5383d31f"),
    ("delete_loopback", "529cb13f"),
    ("delete_loopback_reply", "e8d4e804"),
    ("sw_interface_set_flags", "555485f5"),
    ("sw_interface_set_flags_reply", "e8d4e804"),
    ("sw_interface_tag_add_del", "426f8bc1"),
    ("sw_interface_tag_add_del_reply", "e8d4e804"),
    ("sw_interface_add_del_address", "7b583179"),
    ("sw_interface_add_del_address_reply", "e8d4e804"),
    ("sw_interface_dump", "052753c5"),
    ("sw_interface_details", "7cf6f6a6"),
    ("ip_address_dump", "6b7bcd0a"),
    ("ip_address_details", "2f1dbc7d"),
    ("ip_punt_redirect", "a953495b"),
    ("ip_punt_redirect_reply", "e8d4e804"),
    ("ip_punt_redirect_dump", "2d033de4"),
    ("ip_punt_redirect_details", "a47f70da"),
    ("punt_reason_details", "2c9d4a40"),
    ("punt_reason_dump", "5c0dd4fe"),
    ("punt_socket_deregister", "98a444f4"),
    ("punt_socket_deregister_reply", "e8d4e804"),
    ("punt_socket_details", "25100aad"),
    ("punt_socket_dump", "52974935"),
    ("punt_socket_register", "ddc0d8e0"),
    ("punt_socket_register_reply", "42dc0ee6"),
];

const VPP2001_CRCS: &[(&str, &str)] = &[
    ("sockclnt_create", "455fb9c4"),
    ("sockclnt_create_reply", "35166268"),
    ("control_ping", "51077d14"),
    ("control_ping_reply", "f6b0b8ca"),
    ("create_loopback", "3b54129c"),
    ("create_loopback_reply", "5383d31f"),
    ("delete_loopback", "529cb13f"),
    ("delete_loopback_reply", "e8d4e804"),
    ("sw_interface_set_flags", "6a2b491a"),
    ("sw_interface_set_flags_reply", "e8d4e804"),
    ("sw_interface_tag_add_del", "426f8bc1"),
    ("sw_interface_tag_add_del_reply", "e8d4e804"),
    ("sw_interface_add_del_address", "5803d5c4"),
    ("sw_interface_add_del_address_reply", "e8d4e804"),
    ("sw_interface_dump", "aa610c27"),
    ("sw_interface_details", "17b69fa2"),
    ("ip_address_dump", "9ae64d7a"),
    ("ip_address_details", "7002eee7"),
    ("ip_punt_redirect", "6580f635"),
    ("ip_punt_redirect_reply", "e8d4e804"),
    ("ip_punt_redirect_dump", "2d033de4"),
    ("ip_punt_redirect_details", "2cef63e7"),
    ("punt_reason_details", "2c9d4a40"),
    ("punt_reason_dump", "5c0dd4fe"),
    ("punt_socket_deregister", "3e6cd3a1"),
    ("punt_socket_deregister_reply", "e8d4e804"),
    ("punt_socket_details", "7e83a7b5"),
    ("punt_socket_dump", "916fb004"),
    ("punt_socket_register", "e8a8d0b8"),
    ("punt_socket_register_reply", "bd30ae90"),
];

impl Dialect {
    pub const ALL: [Dialect; 2] = [Dialect::Vpp1908, Dialect::Vpp2001];

    pub fn name(&self) -> &'static str {
        match self {
            Dialect::Vpp1908 => "vpp1908",
            Dialect::Vpp2001 => "vpp2001",
        }
    }

    fn crcs(&self) -> &'static [(&'static str, &'static str)] {
        match self {
            Dialect::Vpp1908 => VPP1908_CRCS,
            Dialect::Vpp2001 => VPP2001_CRCS,
        }
    }

    /// Schema CRC of `message` in this dialect.
    pub fn crc(&self, message: &str) -> Option<&'static str> {
        self.crcs()
            .iter()
            .find(|(name, _)| *name == message)
            .map(|(_, crc)| *crc)
    }

    /// Wire identifier `{name}_{crc}`.
    pub fn name_crc(&self, message: &str) -> Option<String> {
        self.crc(message).map(|crc| format!("{}_{}", message, crc))
    }

    /// Every message this dialect defines, as `{name}_{crc}`.
    pub fn message_table(&self) -> Vec<String> {
        self.crcs()
            .iter()
            .map(|(name, crc)| format!("{}_{}", name, crc))
            .collect()
    }

    /// Whether enum fields (address family, IP protocol) are 32 bits wide.
    pub fn wide_enums(&self) -> bool {
        matches!(self, Dialect::Vpp1908)
    }

    /// Size of the punt union payload.
    pub fn punt_union_len(&self) -> usize {
        match self {
            Dialect::Vpp1908 => 10,
            Dialect::Vpp2001 => 4,
        }
    }
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Dialect {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Dialect::ALL
            .into_iter()
            .find(|d| d.name() == s)
            .ok_or_else(|| format!("unknown dialect {:?} (expected vpp1908 or vpp2001)", s))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_name_crc() {
        assert_eq!(
            Dialect::Vpp1908.name_crc("punt_socket_register").as_deref(),
            Some("punt_socket_register_ddc0d8e0")
        );
        assert!(Dialect::Vpp2001.name_crc("nat44_add_del_address_range").is_none());
    }

    #[test]
    fn test_changed_layouts_have_distinct_crcs() {
        for message in ["punt_socket_register", "sw_interface_set_flags", "ip_punt_redirect"] {
            assert_ne!(Dialect::Vpp1908.crc(message), Dialect::Vpp2001.crc(message), "{}", message);
        }
        assert_eq!(
            Dialect::Vpp1908.crc("control_ping"),
            Dialect::Vpp2001.crc("control_ping")
        );
    }

    #[test]
    fn test_parse() {
        assert_eq!("vpp2001".parse::<Dialect>(), Ok(Dialect::Vpp2001));
        assert!("vpp2005".parse::<Dialect>().is_err());
    }
}

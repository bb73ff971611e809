//! Desired-state file: the YAML document the agent reconciles VPP against.
//!
//! ```yaml
//! interfaces:
//!   - name: if1
//!     type: loopback
//!     enabled: true
//!     ip_addresses: [10.0.0.1/24]
//! punt:
//!   to_host:
//!     - { l3_protocol: ALL, l4_protocol: UDP, port: 9000, socket_path: /tmp/punt.sock }
//!   exceptions:
//!     - { reason: ipsec4-spi-o-udp-0, socket_path: /tmp/ipsec.sock }
//!   ip_redirects:
//!     - { l3_protocol: IPV4, tx_interface: if2, next_hop: 10.0.0.2 }
//! ```

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;
use vpp_scheduler::KeyValuePair;

use crate::error::{AgentError, Result};
use crate::interfaces::Interface;
use crate::punt::{Exception, IpRedirect, ToHost};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PuntConfig {
    #[serde(default)]
    pub to_host: Vec<ToHost>,
    #[serde(default)]
    pub exceptions: Vec<Exception>,
    #[serde(default)]
    pub ip_redirects: Vec<IpRedirect>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DesiredState {
    #[serde(default)]
    pub interfaces: Vec<Interface>,
    #[serde(default)]
    pub punt: PuntConfig,
}

impl DesiredState {
    /// Parses a desired-state document; `path` only labels errors.
    pub fn from_yaml(path: &Path, text: &str) -> Result<Self> {
        serde_yaml::from_str(text).map_err(|e| desired_err(path, e.to_string()))
    }

    /// Flattens the document into key-value pairs. Keys must be unique.
    pub fn into_pairs(self, path: &Path) -> Result<Vec<KeyValuePair>> {
        let mut pairs = Vec::new();
        for iface in self.interfaces {
            pairs.push(KeyValuePair::new(iface.key(), iface));
        }
        for punt in self.punt.to_host {
            pairs.push(KeyValuePair::new(punt.key(), punt));
        }
        for exception in self.punt.exceptions {
            pairs.push(KeyValuePair::new(exception.key(), exception));
        }
        for redirect in self.punt.ip_redirects {
            pairs.push(KeyValuePair::new(redirect.key(), redirect));
        }

        let mut seen = HashSet::with_capacity(pairs.len());
        for kv in &pairs {
            if !seen.insert(kv.key.as_str()) {
                return Err(desired_err(path, format!("duplicate key {}", kv.key)));
            }
        }
        Ok(pairs)
    }
}

fn desired_err(path: &Path, reason: String) -> AgentError {
    AgentError::Desired {
        path: PathBuf::from(path),
        reason,
    }
}

/// Reads the desired-state file at `path` as key-value pairs.
pub fn load(path: &Path) -> Result<Vec<KeyValuePair>> {
    let text = fs::read_to_string(path).map_err(|e| desired_err(path, e.to_string()))?;
    let pairs = DesiredState::from_yaml(path, &text)?.into_pairs(path)?;
    debug!(path = %path.display(), items = pairs.len(), "desired state loaded");
    Ok(pairs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::punt::{L3Protocol, L4Protocol};
    use pretty_assertions::assert_eq;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const DOC: &str = r#"
interfaces:
  - name: if1
    type: loopback
    enabled: true
    ip_addresses: [10.0.0.1/24]
  - name: if2
punt:
  to_host:
    - { l3_protocol: ALL, l4_protocol: UDP, port: 9000, socket_path: /tmp/punt.sock }
  exceptions:
    - { reason: ipsec4-spi-o-udp-0, socket_path: /tmp/ipsec.sock }
  ip_redirects:
    - { l3_protocol: IPV4, rx_interface: if1, tx_interface: if2, next_hop: 10.0.0.2 }
"#;

    #[test]
    fn test_parse_document() {
        let state = DesiredState::from_yaml(Path::new("test"), DOC).unwrap();
        assert_eq!(
            state.interfaces,
            vec![
                Interface::loopback("if1").enabled(true).with_address("10.0.0.1/24"),
                Interface::loopback("if2"),
            ]
        );
        assert_eq!(
            state.punt.to_host,
            vec![ToHost::new(L3Protocol::All, L4Protocol::Udp, 9000, "/tmp/punt.sock")]
        );
        assert_eq!(
            state.punt.ip_redirects,
            vec![IpRedirect::new(L3Protocol::Ipv4, "if1", "if2", "10.0.0.2")]
        );
    }

    #[test]
    fn test_load_keys() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(DOC.as_bytes()).unwrap();

        let keys: Vec<String> = load(file.path())
            .unwrap()
            .into_iter()
            .map(|kv| kv.key)
            .collect();
        assert_eq!(
            keys,
            vec![
                "config/vpp/v2/interfaces/if1",
                "config/vpp/v2/interfaces/if2",
                "config/vpp/v2/punt/tohost/l3/ALL/l4/UDP/port/9000",
                "config/vpp/v2/punt/exception/ipsec4-spi-o-udp-0",
                "config/vpp/v2/punt/ip-redirect/l3/IPV4/tx/if2",
            ]
        );
    }

    #[test]
    fn test_empty_document() {
        let state = DesiredState::from_yaml(Path::new("test"), "{}").unwrap();
        assert_eq!(state, DesiredState::default());
        assert!(state.into_pairs(Path::new("test")).unwrap().is_empty());
    }

    #[test]
    fn test_duplicate_key_rejected() {
        let doc = "interfaces:\n  - name: if1\n  - name: if1\n    enabled: true\n";
        let err = DesiredState::from_yaml(Path::new("d.yaml"), doc)
            .unwrap()
            .into_pairs(Path::new("d.yaml"))
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "Desired state d.yaml: duplicate key config/vpp/v2/interfaces/if1"
        );
    }

    #[test]
    fn test_errors_name_the_file() {
        let err = load(Path::new("/nonexistent/desired.yaml")).unwrap_err();
        assert!(matches!(err, AgentError::Desired { .. }));
        assert!(err.to_string().starts_with("Desired state /nonexistent/desired.yaml:"));

        let err = DesiredState::from_yaml(Path::new("d.yaml"), "routes: []").unwrap_err();
        assert!(err.to_string().contains("unknown field"));
    }

    #[test]
    fn test_sample_desired_state() {
        let path = Path::new("config/desired.yaml");
        let text = include_str!("../../../config/desired.yaml");
        let pairs = DesiredState::from_yaml(path, text)
            .unwrap()
            .into_pairs(path)
            .unwrap();
        assert_eq!(pairs.len(), 5);
    }
}

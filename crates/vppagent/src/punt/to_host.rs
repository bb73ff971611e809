//! Descriptor for punt-to-host registrations.
//!
//! A registration with L3 protocol `ALL` is two registrations in VPP, one
//! per address family. A dump reports them separately, so when the desired
//! entry is `ALL` the IPv4 and IPv6 halves are folded back into one item.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;
use vpp_binapi::msgs::punt::Punt;
use vpp_binapi::vppcalls::{PuntSocketEntry, PuntVppApi};
use vpp_scheduler::{Descriptor, DescriptorError, Origin, RetrieveSource, RetrievedItem};

use super::types::*;
use crate::error::{dp_err, is_gone};

pub const TO_HOST_DESCRIPTOR: &str = "vpp-punt-to-host";

type Item = RetrievedItem<ToHost, PuntSocketMeta>;

pub struct PuntToHostDescriptor {
    handler: Arc<dyn PuntVppApi>,
}

impl PuntToHostDescriptor {
    pub fn new(handler: Arc<dyn PuntVppApi>) -> Self {
        Self { handler }
    }

    fn port(key: &str, value: &ToHost) -> Result<u16, DescriptorError> {
        u16::try_from(value.port)
            .map_err(|_| DescriptorError::invalid(key, format!("port {} out of range", value.port)))
    }

    /// Dumped L4 registration as a value, `None` for other punt kinds.
    fn from_entry(&self, entry: &PuntSocketEntry) -> Option<ToHost> {
        let Punt::L4 { af, protocol, port } = entry.punt else {
            return None;
        };
        let socket_path = if entry.client_path.is_empty() {
            // Only VPP's own socket is known; never equivalent to desired.
            format!(
                "{}{}",
                UNKNOWN_PATH_MARK,
                self.handler.vpp_socket_path().unwrap_or_default()
            )
        } else {
            entry.client_path.clone()
        };
        Some(ToHost {
            l3_protocol: Some(L3Protocol::of(af)),
            l4_protocol: Some(L4Protocol::from_ip_proto(protocol)?),
            port: u32::from(port),
            socket_path,
        })
    }
}

/// Folds IPv4 and IPv6 halves wanted as `ALL` into single items.
fn fold_all(dumped: Vec<ToHost>, correlate: &[Item]) -> Vec<ToHost> {
    let wants_all = |punt: &ToHost| {
        correlate.iter().any(|c| {
            c.value.l3_protocol == Some(L3Protocol::All)
                && c.value.l4_protocol == punt.l4_protocol
                && c.value.port == punt.port
        })
    };

    let mut result = Vec::new();
    let mut ipv4 = Vec::new();
    let mut ipv6 = Vec::new();
    for punt in dumped {
        if !wants_all(&punt) {
            result.push(punt);
        } else if punt.l3_protocol == Some(L3Protocol::Ipv4) {
            ipv4.push(punt);
        } else {
            ipv6.push(punt);
        }
    }

    for mut punt in ipv4 {
        let paired = ipv6
            .iter()
            .any(|v6| v6.l4_protocol == punt.l4_protocol && v6.port == punt.port);
        if paired {
            punt.l3_protocol = Some(L3Protocol::All);
            result.push(punt);
        }
    }
    result
}

#[async_trait]
impl Descriptor for PuntToHostDescriptor {
    type Value = ToHost;
    type Metadata = PuntSocketMeta;

    fn name(&self) -> &str {
        TO_HOST_DESCRIPTOR
    }

    fn key_prefix(&self) -> &str {
        TO_HOST_PREFIX
    }

    fn value_type_name(&self) -> &str {
        "vpp.punt.ToHost"
    }

    fn validate(&self, key: &str, value: &ToHost) -> Result<(), DescriptorError> {
        if value.l3_protocol.is_none() {
            return Err(DescriptorError::invalid(key, "punt defined without L3 protocol"));
        }
        if value.l4_protocol.is_none() {
            return Err(DescriptorError::invalid(key, "punt defined without L4 protocol"));
        }
        if value.port == 0 {
            return Err(DescriptorError::invalid(key, "punt defined without port"));
        }
        Self::port(key, value)?;
        if value.socket_path.is_empty() {
            return Err(DescriptorError::invalid(key, "punt defined without socket path"));
        }
        Ok(())
    }

    async fn create(&self, key: &str, value: &ToHost) -> Result<PuntSocketMeta, DescriptorError> {
        let (Some(l3), Some(l4)) = (value.l3_protocol, value.l4_protocol) else {
            return Err(DescriptorError::invalid(key, "punt defined without protocols"));
        };
        let vpp_socket_path = self
            .handler
            .register_punt_socket(l3, l4, Self::port(key, value)?, &value.socket_path)
            .await
            .map_err(dp_err)?;
        debug!(key, vpp_socket_path = %vpp_socket_path, "punt socket registered");
        Ok(PuntSocketMeta { vpp_socket_path })
    }

    async fn delete(
        &self,
        key: &str,
        value: &ToHost,
        _metadata: Option<&PuntSocketMeta>,
    ) -> Result<(), DescriptorError> {
        let (Some(l3), Some(l4)) = (value.l3_protocol, value.l4_protocol) else {
            return Ok(());
        };
        match self
            .handler
            .deregister_punt_socket(l3, l4, Self::port(key, value)?)
            .await
        {
            Err(err) if is_gone(&err) => {
                debug!(key, error = %err, "punt socket already deregistered");
                Ok(())
            }
            other => other.map_err(dp_err),
        }
    }

    /// Socket paths are not compared: a dump may only know VPP's side.
    fn equivalent(&self, _key: &str, old: &ToHost, new: &ToHost) -> bool {
        old.l3_protocol == new.l3_protocol
            && old.l4_protocol == new.l4_protocol
            && old.port == new.port
            && !old.socket_path.starts_with(UNKNOWN_PATH_MARK)
    }

    fn retrieve_source(&self) -> RetrieveSource {
        if self.handler.live_socket_dump() {
            RetrieveSource::Live
        } else {
            RetrieveSource::Cache
        }
    }

    async fn retrieve(&self, correlate: &[Item]) -> Result<Vec<Item>, DescriptorError> {
        let entries = self.handler.dump_punt_sockets().await.map_err(dp_err)?;
        let dumped: Vec<ToHost> = entries.iter().filter_map(|e| self.from_entry(e)).collect();
        let vpp_socket_path = self.handler.vpp_socket_path().unwrap_or_default();

        Ok(fold_all(dumped, correlate)
            .into_iter()
            .map(|punt| {
                RetrievedItem::new(punt.key(), punt, Origin::FromNb).with_metadata(PuntSocketMeta {
                    vpp_socket_path: vpp_socket_path.clone(),
                })
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::time::Duration;
    use vpp_binapi::sim::{SimVpp, SIM_PUNT_SOCKET};
    use vpp_binapi::vppcalls::punt_handlers;
    use vpp_binapi::{AddressFamily, Connection, Dialect, IpProto};

    async fn descriptor(sim: &Arc<SimVpp>) -> (Connection, PuntToHostDescriptor) {
        let conn = Connection::connect(sim.transport(), "test", Duration::from_millis(500))
            .await
            .unwrap();
        let handler = punt_handlers().resolve(&conn).unwrap().handler;
        (conn, PuntToHostDescriptor::new(handler))
    }

    #[tokio::test]
    async fn test_validate_messages() {
        let sim = SimVpp::new(Dialect::Vpp2001);
        let (_conn, d) = descriptor(&sim).await;
        let valid = ToHost::new(L3Protocol::Ipv4, L4Protocol::Udp, 9000, "/tmp/p.sock");
        assert!(d.validate(&valid.key(), &valid).is_ok());

        let cases = vec![
            (
                ToHost {
                    l3_protocol: None,
                    ..valid.clone()
                },
                "punt defined without L3 protocol",
            ),
            (
                ToHost {
                    l4_protocol: None,
                    ..valid.clone()
                },
                "punt defined without L4 protocol",
            ),
            (
                ToHost {
                    port: 0,
                    ..valid.clone()
                },
                "punt defined without port",
            ),
            (
                ToHost {
                    socket_path: String::new(),
                    ..valid.clone()
                },
                "punt defined without socket path",
            ),
        ];
        for (value, reason) in cases {
            match d.validate(&value.key(), &value) {
                Err(DescriptorError::Invalid { reason: got, .. }) => assert_eq!(got, reason),
                other => panic!("expected invalid, got {:?}", other),
            }
        }

        let too_big = ToHost {
            port: 70000,
            ..valid
        };
        assert!(d.validate(&too_big.key(), &too_big).unwrap_err().is_invalid());
    }

    #[tokio::test]
    async fn test_equivalent() {
        let sim = SimVpp::new(Dialect::Vpp2001);
        let (_conn, d) = descriptor(&sim).await;
        let desired = ToHost::new(L3Protocol::Ipv4, L4Protocol::Tcp, 22, "/tmp/a.sock");
        let key = desired.key();

        let other_path = ToHost {
            socket_path: "/tmp/b.sock".into(),
            ..desired.clone()
        };
        assert!(d.equivalent(&key, &other_path, &desired));

        let unknown = ToHost {
            socket_path: format!("!{}", SIM_PUNT_SOCKET),
            ..desired.clone()
        };
        assert!(!d.equivalent(&key, &unknown, &desired));

        let other_port = ToHost {
            port: 23,
            ..desired.clone()
        };
        assert!(!d.equivalent(&key, &other_port, &desired));
    }

    #[tokio::test]
    async fn test_retrieve_folds_all() {
        let sim = SimVpp::new(Dialect::Vpp2001);
        let (_conn, d) = descriptor(&sim).await;
        let all = ToHost::new(L3Protocol::All, L4Protocol::Udp, 9000, "/tmp/p.sock");
        let meta = d.create(&all.key(), &all).await.unwrap();
        assert_eq!(meta.vpp_socket_path, SIM_PUNT_SOCKET);
        assert_eq!(sim.calls(), vec!["punt_socket_register", "punt_socket_register"]);

        let correlate = vec![RetrievedItem::new(all.key(), all.clone(), Origin::FromNb)];
        let retrieved = d.retrieve(&correlate).await.unwrap();
        assert_eq!(retrieved.len(), 1);
        assert_eq!(retrieved[0].key, all.key());
        assert_eq!(retrieved[0].value, all);
        assert!(d.equivalent(&all.key(), &retrieved[0].value, &all));

        // Without an ALL entry to correlate with, both halves are reported.
        let keys: Vec<String> = d
            .retrieve(&[])
            .await
            .unwrap()
            .into_iter()
            .map(|i| i.key)
            .collect();
        assert_eq!(
            keys,
            vec![
                "config/vpp/v2/punt/tohost/l3/IPV4/l4/UDP/port/9000",
                "config/vpp/v2/punt/tohost/l3/IPV6/l4/UDP/port/9000",
            ]
        );
    }

    #[tokio::test]
    async fn test_retrieve_marks_unknown_client_path() {
        let sim = SimVpp::new(Dialect::Vpp2001);
        sim.add_external_punt_socket(
            Punt::L4 {
                af: AddressFamily::Ip4,
                protocol: IpProto::Tcp,
                port: 179,
            },
            "",
        );
        let (_conn, d) = descriptor(&sim).await;
        let retrieved = d.retrieve(&[]).await.unwrap();
        assert_eq!(retrieved.len(), 1);
        assert!(retrieved[0].value.socket_path.starts_with(UNKNOWN_PATH_MARK));
    }

    #[tokio::test]
    async fn test_retrieve_source_follows_handler() {
        let sim = SimVpp::new(Dialect::Vpp1908);
        let (_conn, d) = descriptor(&sim).await;
        assert_eq!(d.retrieve_source(), RetrieveSource::Cache);

        let sim = SimVpp::new(Dialect::Vpp2001);
        let (_conn, d) = descriptor(&sim).await;
        assert_eq!(d.retrieve_source(), RetrieveSource::Live);
    }

    #[tokio::test]
    async fn test_delete_missing_is_swallowed() {
        let sim = SimVpp::new(Dialect::Vpp2001);
        let (_conn, d) = descriptor(&sim).await;
        let punt = ToHost::new(L3Protocol::Ipv6, L4Protocol::Udp, 4789, "/tmp/v.sock");
        d.delete(&punt.key(), &punt, None).await.unwrap();
    }
}

//! Descriptor for IP punt redirects.
//!
//! Interfaces are referenced by name and resolved to sw_if_index through
//! the interface index when the redirect is applied. The redirect depends on
//! both interfaces, so it stays pending until they exist.

use std::net::IpAddr;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;
use vpp_binapi::vppcalls::PuntVppApi;
use vpp_binapi::InterfaceIndex;
use vpp_scheduler::{
    Dependency, Descriptor, DescriptorError, Origin, RetrieveSource, RetrievedItem,
};

use super::types::*;
use crate::error::{dp_err, is_gone};
use crate::interfaces::{interface_key, InterfaceIndexMap, INTERFACE_DESCRIPTOR};

pub const IP_REDIRECT_DESCRIPTOR: &str = "vpp-punt-ip-redirect";

/// Interface handles a redirect was created with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RedirectMeta {
    pub rx: InterfaceIndex,
    pub tx: InterfaceIndex,
}

type Item = RetrievedItem<IpRedirect, RedirectMeta>;

pub struct IpRedirectDescriptor {
    handler: Arc<dyn PuntVppApi>,
    if_index: Arc<InterfaceIndexMap>,
}

impl IpRedirectDescriptor {
    pub fn new(handler: Arc<dyn PuntVppApi>, if_index: Arc<InterfaceIndexMap>) -> Self {
        Self { handler, if_index }
    }

    fn resolve(&self, name: &str) -> Result<InterfaceIndex, DescriptorError> {
        self.if_index
            .lookup_by_name(name)
            .map(|meta| meta.sw_if_index)
            .ok_or_else(|| {
                DescriptorError::terminal(format!("index not found for interface {}", name))
            })
    }

    /// Handles for rx and tx; an empty rx means any interface.
    fn handles(&self, value: &IpRedirect) -> Result<RedirectMeta, DescriptorError> {
        let rx = if value.rx_interface.is_empty() {
            InterfaceIndex::INVALID
        } else {
            self.resolve(&value.rx_interface)?
        };
        let tx = self.resolve(&value.tx_interface)?;
        Ok(RedirectMeta { rx, tx })
    }

    fn name_of(&self, index: InterfaceIndex) -> Option<String> {
        if !index.is_valid() {
            return Some(String::new());
        }
        self.if_index.lookup_by_handle(index.0).map(|(name, _)| name)
    }
}

fn parts(key: &str, value: &IpRedirect) -> Result<(L3Protocol, IpAddr), DescriptorError> {
    let l3 = value
        .l3_protocol
        .ok_or_else(|| DescriptorError::invalid(key, "IP redirect defined without L3 protocol"))?;
    let next_hop = value.next_hop_addr().ok_or_else(|| {
        DescriptorError::invalid(key, format!("invalid next hop {:?}", value.next_hop))
    })?;
    Ok((l3, next_hop))
}

#[async_trait]
impl Descriptor for IpRedirectDescriptor {
    type Value = IpRedirect;
    type Metadata = RedirectMeta;

    fn name(&self) -> &str {
        IP_REDIRECT_DESCRIPTOR
    }

    fn key_prefix(&self) -> &str {
        IP_REDIRECT_PREFIX
    }

    fn value_type_name(&self) -> &str {
        "vpp.punt.IPRedirect"
    }

    fn validate(&self, key: &str, value: &IpRedirect) -> Result<(), DescriptorError> {
        if value.tx_interface.is_empty() {
            return Err(DescriptorError::invalid(
                key,
                "IP redirect defined without tx interface",
            ));
        }
        let (l3, next_hop) = parts(key, value)?;
        if !l3.matches(&next_hop) {
            return Err(DescriptorError::invalid(
                key,
                format!("next hop {} does not match L3 protocol {}", next_hop, l3),
            ));
        }
        if value.key() != key {
            return Err(DescriptorError::invalid(key, "IP redirect does not match the key"));
        }
        Ok(())
    }

    async fn create(&self, key: &str, value: &IpRedirect) -> Result<RedirectMeta, DescriptorError> {
        let (l3, next_hop) = parts(key, value)?;
        let meta = self.handles(value)?;
        self.handler
            .add_punt_redirect(l3, meta.rx, meta.tx, next_hop)
            .await
            .map_err(dp_err)?;
        debug!(key, rx = %meta.rx, tx = %meta.tx, %next_hop, "IP punt redirect added");
        Ok(meta)
    }

    async fn delete(
        &self,
        key: &str,
        value: &IpRedirect,
        metadata: Option<&RedirectMeta>,
    ) -> Result<(), DescriptorError> {
        let (l3, next_hop) = parts(key, value)?;
        let meta = match metadata {
            Some(meta) => *meta,
            None => self.handles(value)?,
        };
        match self
            .handler
            .delete_punt_redirect(l3, meta.rx, meta.tx, next_hop)
            .await
        {
            Err(err) if is_gone(&err) => {
                debug!(key, error = %err, "IP punt redirect already gone");
                Ok(())
            }
            other => other.map_err(dp_err),
        }
    }

    fn equivalent(&self, _key: &str, old: &IpRedirect, new: &IpRedirect) -> bool {
        old.l3_protocol == new.l3_protocol
            && old.rx_interface == new.rx_interface
            && old.tx_interface == new.tx_interface
            && old.next_hop_addr() == new.next_hop_addr()
    }

    fn dependencies(&self, _key: &str, value: &IpRedirect) -> Vec<Dependency> {
        let mut deps = Vec::with_capacity(2);
        if !value.rx_interface.is_empty() {
            deps.push(Dependency::new("rx-interface", interface_key(&value.rx_interface)));
        }
        deps.push(Dependency::new("tx-interface", interface_key(&value.tx_interface)));
        deps
    }

    fn retrieve_source(&self) -> RetrieveSource {
        RetrieveSource::Live
    }

    fn retrieve_dependencies(&self) -> Vec<String> {
        vec![INTERFACE_DESCRIPTOR.to_string()]
    }

    /// A dumped redirect is reported as `ALL` when an `ALL` redirect with
    /// the same interfaces and next hop is desired.
    async fn retrieve(&self, correlate: &[Item]) -> Result<Vec<Item>, DescriptorError> {
        let dumped = self.handler.dump_punt_redirects().await.map_err(dp_err)?;

        let mut retrieved = Vec::with_capacity(dumped.len());
        for entry in dumped {
            let (Some(rx), Some(tx)) = (self.name_of(entry.rx), self.name_of(entry.tx)) else {
                debug!(rx = %entry.rx, tx = %entry.tx, "redirect over unknown interface skipped");
                continue;
            };
            let family = L3Protocol::of(vpp_binapi::AddressFamily::of(&entry.next_hop));
            let wanted_all = correlate.iter().any(|c| {
                c.value.l3_protocol == Some(L3Protocol::All)
                    && c.value.rx_interface == rx
                    && c.value.tx_interface == tx
                    && c.value.next_hop_addr() == Some(entry.next_hop)
            });
            let l3 = if wanted_all { L3Protocol::All } else { family };

            let value = IpRedirect::new(l3, rx, tx, entry.next_hop.to_string());
            retrieved.push(
                RetrievedItem::new(value.key(), value, Origin::FromNb).with_metadata(RedirectMeta {
                    rx: entry.rx,
                    tx: entry.tx,
                }),
            );
        }
        Ok(retrieved)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interfaces::{new_interface_index, InterfaceMeta};
    use pretty_assertions::assert_eq;
    use std::time::Duration;
    use vpp_binapi::sim::SimVpp;
    use vpp_binapi::vppcalls::punt_handlers;
    use vpp_binapi::{Connection, Dialect};

    struct Fixture {
        sim: Arc<SimVpp>,
        _conn: Connection,
        index: Arc<InterfaceIndexMap>,
        d: IpRedirectDescriptor,
    }

    async fn fixture() -> Fixture {
        let sim = SimVpp::new(Dialect::Vpp2001);
        let conn = Connection::connect(sim.transport(), "test", Duration::from_millis(500))
            .await
            .unwrap();
        let handler = punt_handlers().resolve(&conn).unwrap().handler;
        let index = new_interface_index();
        let d = IpRedirectDescriptor::new(handler, index.clone());
        Fixture {
            sim,
            _conn: conn,
            index,
            d,
        }
    }

    #[tokio::test]
    async fn test_validate() {
        let f = fixture().await;
        let ok = IpRedirect::new(L3Protocol::Ipv4, "if1", "if2", "10.0.0.2/24");
        assert!(f.d.validate(&ok.key(), &ok).is_ok());

        let all = IpRedirect::new(L3Protocol::All, "", "if2", "2001:db8::2");
        assert!(f.d.validate(&all.key(), &all).is_ok());

        let no_tx = IpRedirect::new(L3Protocol::Ipv4, "if1", "", "10.0.0.2");
        let mismatch = IpRedirect::new(L3Protocol::Ipv6, "if1", "if2", "10.0.0.2");
        let bad_hop = IpRedirect::new(L3Protocol::Ipv4, "if1", "if2", "10.0.0");
        let no_l3 = IpRedirect {
            l3_protocol: None,
            ..ok.clone()
        };
        for value in [no_tx, mismatch, bad_hop, no_l3] {
            assert!(f.d.validate(&value.key(), &value).unwrap_err().is_invalid(), "{:?}", value);
        }
    }

    #[tokio::test]
    async fn test_dependencies() {
        let f = fixture().await;
        let any_rx = IpRedirect::new(L3Protocol::Ipv4, "", "if2", "10.0.0.2");
        assert_eq!(
            f.d.dependencies(&any_rx.key(), &any_rx),
            vec![Dependency::new("tx-interface", "config/vpp/v2/interfaces/if2")]
        );
        let both = IpRedirect::new(L3Protocol::Ipv4, "if1", "if2", "10.0.0.2");
        assert_eq!(f.d.dependencies(&both.key(), &both).len(), 2);
    }

    #[tokio::test]
    async fn test_create_resolves_handles() {
        let f = fixture().await;
        let value = IpRedirect::new(L3Protocol::Ipv4, "", "if2", "10.0.0.2/32");
        let err = f.d.create(&value.key(), &value).await.unwrap_err();
        assert_eq!(err.to_string(), "index not found for interface if2");

        let tx = f.sim.add_external_interface("loop7");
        f.index.put("if2", InterfaceMeta { sw_if_index: tx });
        let meta = f.d.create(&value.key(), &value).await.unwrap();
        assert_eq!(
            meta,
            RedirectMeta {
                rx: InterfaceIndex::INVALID,
                tx
            }
        );
        assert_eq!(f.sim.calls(), vec!["ip_punt_redirect"]);
        assert_eq!(f.sim.redirects()[0].tx_sw_if_index, tx);

        let retrieved = f.d.retrieve(&[]).await.unwrap();
        assert_eq!(retrieved.len(), 1);
        assert_eq!(retrieved[0].key, value.key());
        assert!(f.d.equivalent(&value.key(), &retrieved[0].value, &value));

        f.d.delete(&value.key(), &value, Some(&meta)).await.unwrap();
        f.d.delete(&value.key(), &value, Some(&meta)).await.unwrap();
        assert!(f.sim.redirects().is_empty());
    }

    #[tokio::test]
    async fn test_retrieve_reports_all_when_desired() {
        let f = fixture().await;
        let tx = f.sim.add_external_interface("loop7");
        f.index.put("if2", InterfaceMeta { sw_if_index: tx });
        let value = IpRedirect::new(L3Protocol::All, "", "if2", "10.0.0.2");
        f.d.create(&value.key(), &value).await.unwrap();

        let correlate = vec![RetrievedItem::new(value.key(), value.clone(), Origin::FromNb)];
        let retrieved = f.d.retrieve(&correlate).await.unwrap();
        assert_eq!(retrieved[0].key, "config/vpp/v2/punt/ip-redirect/l3/ALL/tx/if2");

        let retrieved = f.d.retrieve(&[]).await.unwrap();
        assert_eq!(retrieved[0].key, "config/vpp/v2/punt/ip-redirect/l3/IPV4/tx/if2");
    }
}

//! Interface calls: loopbacks, admin state, tags and addresses.

use std::sync::Arc;

use async_trait::async_trait;
use futures::future::try_join_all;
use tracing::debug;

use crate::channel::ApiChannel;
use crate::dialect::Dialect;
use crate::error::BinapiResult;
use crate::msgs::interface::*;
use crate::types::{InterfaceIndex, IpPrefix, MacAddress};
use crate::version::HandlerRegistry;

/// Messages every interface handler version sends or receives.
pub const INTERFACE_MESSAGES: &[&str] = &[
    "control_ping",
    "control_ping_reply",
    "create_loopback",
    "create_loopback_reply",
    "delete_loopback",
    "delete_loopback_reply",
    "sw_interface_set_flags",
    "sw_interface_set_flags_reply",
    "sw_interface_tag_add_del",
    "sw_interface_tag_add_del_reply",
    "sw_interface_add_del_address",
    "sw_interface_add_del_address_reply",
    "sw_interface_dump",
    "sw_interface_details",
    "ip_address_dump",
    "ip_address_details",
];

/// One dumped interface with its addresses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterfaceDetails {
    pub sw_if_index: InterfaceIndex,
    pub name: String,
    pub tag: String,
    pub mac: MacAddress,
    pub admin_up: bool,
    pub link_up: bool,
    pub addresses: Vec<IpPrefix>,
}

#[async_trait]
pub trait InterfaceVppApi: Send + Sync {
    /// Creates a loopback; VPP picks a MAC address when none is given.
    async fn add_loopback(&self, mac: Option<MacAddress>) -> BinapiResult<InterfaceIndex>;

    async fn delete_loopback(&self, index: InterfaceIndex) -> BinapiResult<()>;

    async fn set_interface_tag(&self, index: InterfaceIndex, tag: &str) -> BinapiResult<()>;

    async fn remove_interface_tag(&self, index: InterfaceIndex, tag: &str) -> BinapiResult<()>;

    async fn set_admin_state(&self, index: InterfaceIndex, up: bool) -> BinapiResult<()>;

    async fn add_address(&self, index: InterfaceIndex, prefix: &IpPrefix) -> BinapiResult<()>;

    async fn del_address(&self, index: InterfaceIndex, prefix: &IpPrefix) -> BinapiResult<()>;

    /// Dumps every interface together with its IPv4 and IPv6 addresses.
    async fn dump_interfaces(&self) -> BinapiResult<Vec<InterfaceDetails>>;
}

/// Interface handler for every supported dialect.
pub struct InterfaceHandler {
    channel: ApiChannel,
}

impl InterfaceHandler {
    pub fn new(channel: ApiChannel) -> Self {
        Self { channel }
    }

    async fn tag_add_del(&self, index: InterfaceIndex, tag: &str, is_add: bool) -> BinapiResult<()> {
        self.channel
            .request(&SwInterfaceTagAddDel {
                is_add,
                sw_if_index: index,
                tag: tag.to_string(),
            })
            .await?;
        Ok(())
    }

    async fn add_del_address(
        &self,
        index: InterfaceIndex,
        prefix: &IpPrefix,
        is_add: bool,
    ) -> BinapiResult<()> {
        self.channel
            .request(&SwInterfaceAddDelAddress {
                sw_if_index: index,
                is_add,
                del_all: false,
                prefix: *prefix,
            })
            .await?;
        Ok(())
    }

    async fn dump_addresses(&self, index: InterfaceIndex) -> BinapiResult<Vec<IpPrefix>> {
        let req4 = IpAddressDump {
            sw_if_index: index,
            is_ipv6: false,
        };
        let req6 = IpAddressDump {
            sw_if_index: index,
            is_ipv6: true,
        };
        let (v4, v6) = futures::try_join!(self.channel.dump(&req4), self.channel.dump(&req6))?;
        Ok(v4.into_iter().chain(v6).map(|d| d.prefix).collect())
    }
}

#[async_trait]
impl InterfaceVppApi for InterfaceHandler {
    async fn add_loopback(&self, mac: Option<MacAddress>) -> BinapiResult<InterfaceIndex> {
        let reply = self
            .channel
            .request(&CreateLoopback {
                mac_address: mac.unwrap_or(MacAddress::ZERO),
            })
            .await?;
        let index = InterfaceIndex(reply.sw_if_index);
        debug!(sw_if_index = %index, "loopback created");
        Ok(index)
    }

    async fn delete_loopback(&self, index: InterfaceIndex) -> BinapiResult<()> {
        self.channel
            .request(&DeleteLoopback { sw_if_index: index })
            .await?;
        Ok(())
    }

    async fn set_interface_tag(&self, index: InterfaceIndex, tag: &str) -> BinapiResult<()> {
        self.tag_add_del(index, tag, true).await
    }

    async fn remove_interface_tag(&self, index: InterfaceIndex, tag: &str) -> BinapiResult<()> {
        self.tag_add_del(index, tag, false).await
    }

    async fn set_admin_state(&self, index: InterfaceIndex, up: bool) -> BinapiResult<()> {
        self.channel
            .request(&SwInterfaceSetFlags {
                sw_if_index: index,
                admin_up: up,
            })
            .await?;
        Ok(())
    }

    async fn add_address(&self, index: InterfaceIndex, prefix: &IpPrefix) -> BinapiResult<()> {
        self.add_del_address(index, prefix, true).await
    }

    async fn del_address(&self, index: InterfaceIndex, prefix: &IpPrefix) -> BinapiResult<()> {
        self.add_del_address(index, prefix, false).await
    }

    async fn dump_interfaces(&self) -> BinapiResult<Vec<InterfaceDetails>> {
        let details = self.channel.dump(&SwInterfaceDump::default()).await?;
        let addresses =
            try_join_all(details.iter().map(|d| self.dump_addresses(d.sw_if_index))).await?;

        Ok(details
            .into_iter()
            .zip(addresses)
            .map(|(d, addresses)| InterfaceDetails {
                sw_if_index: d.sw_if_index,
                name: d.interface_name,
                tag: d.tag,
                mac: d.l2_address,
                admin_up: d.admin_up,
                link_up: d.link_up,
                addresses,
            })
            .collect())
    }
}

fn new_interface_handler(channel: ApiChannel) -> Arc<dyn InterfaceVppApi> {
    Arc::new(InterfaceHandler::new(channel))
}

/// Supported interface handler versions, newest first.
pub fn interface_handlers() -> HandlerRegistry<dyn InterfaceVppApi> {
    let mut registry = HandlerRegistry::new("interface");
    registry
        .add_version("vpp2001", Dialect::Vpp2001, INTERFACE_MESSAGES, new_interface_handler)
        .add_version("vpp1908", Dialect::Vpp1908, INTERFACE_MESSAGES, new_interface_handler);
    registry
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::Connection;
    use crate::sim::SimVpp;
    use pretty_assertions::assert_eq;
    use std::time::Duration;

    async fn handler(sim: &Arc<SimVpp>) -> (Connection, Arc<dyn InterfaceVppApi>) {
        let conn = Connection::connect(sim.transport(), "test", Duration::from_millis(500))
            .await
            .unwrap();
        let resolved = interface_handlers().resolve(&conn).unwrap();
        (conn, resolved.handler)
    }

    #[tokio::test]
    async fn test_loopback_lifecycle() {
        for dialect in Dialect::ALL {
            let sim = SimVpp::new(dialect);
            let (_conn, api) = handler(&sim).await;

            let mac: MacAddress = "02:00:00:aa:bb:cc".parse().unwrap();
            let index = api.add_loopback(Some(mac)).await.unwrap();
            api.set_interface_tag(index, "uplink").await.unwrap();
            api.set_admin_state(index, true).await.unwrap();
            api.add_address(index, &"10.0.0.1/24".parse().unwrap())
                .await
                .unwrap();
            api.add_address(index, &"2001:db8::1/64".parse().unwrap())
                .await
                .unwrap();

            let dumped = api.dump_interfaces().await.unwrap();
            let lo = dumped.iter().find(|d| d.sw_if_index == index).unwrap();
            assert_eq!(lo.tag, "uplink", "{}", dialect);
            assert_eq!(lo.mac, mac);
            assert!(lo.admin_up);
            assert_eq!(
                lo.addresses,
                vec!["10.0.0.1/24".parse().unwrap(), "2001:db8::1/64".parse().unwrap()]
            );

            api.delete_loopback(index).await.unwrap();
            let dumped = api.dump_interfaces().await.unwrap();
            assert_eq!(dumped.len(), 1);
            assert_eq!(dumped[0].name, "local0");
        }
    }

    #[tokio::test]
    async fn test_selects_dialect_of_peer() {
        let sim = SimVpp::new(Dialect::Vpp1908);
        let conn = Connection::connect(sim.transport(), "test", Duration::from_millis(500))
            .await
            .unwrap();
        let resolved = interface_handlers().resolve(&conn).unwrap();
        assert_eq!(resolved.version, "vpp1908");
        assert_eq!(resolved.dialect, Dialect::Vpp1908);
    }

    #[tokio::test]
    async fn test_missing_address_delete_is_not_found() {
        let sim = SimVpp::new(Dialect::Vpp2001);
        let (_conn, api) = handler(&sim).await;
        let index = api.add_loopback(None).await.unwrap();
        let err = api
            .del_address(index, &"192.168.1.1/32".parse().unwrap())
            .await
            .unwrap_err();
        assert!(err.is_not_found(), "{}", err);
    }
}

//! Punt calls: punt-to-host sockets, punt exceptions and IP punt redirects.
//!
//! Both supported releases share one implementation. The only behavioral
//! difference is the socket dump: vpp1908 has no usable `punt_socket_dump`,
//! so its handler answers dumps from the registrations it made itself.

use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::channel::ApiChannel;
use crate::codec::Message;
use crate::dialect::Dialect;
use crate::error::{BinapiError, BinapiResult};
use crate::msgs::ip::*;
use crate::msgs::punt::*;
use crate::types::{AddressFamily, InterfaceIndex, IpProto};
use crate::version::HandlerRegistry;

const VPP1908_PUNT_MESSAGES: &[&str] = &[
    "control_ping",
    "control_ping_reply",
    "punt_socket_register",
    "punt_socket_register_reply",
    "punt_socket_deregister",
    "punt_socket_deregister_reply",
    "punt_reason_dump",
    "punt_reason_details",
    "ip_punt_redirect",
    "ip_punt_redirect_reply",
    "ip_punt_redirect_dump",
    "ip_punt_redirect_details",
];

const VPP2001_PUNT_MESSAGES: &[&str] = &[
    "control_ping",
    "control_ping_reply",
    "punt_socket_register",
    "punt_socket_register_reply",
    "punt_socket_deregister",
    "punt_socket_deregister_reply",
    "punt_socket_dump",
    "punt_socket_details",
    "punt_reason_dump",
    "punt_reason_details",
    "ip_punt_redirect",
    "ip_punt_redirect_reply",
    "ip_punt_redirect_dump",
    "ip_punt_redirect_details",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum L3Protocol {
    Ipv4,
    Ipv6,
    All,
}

impl L3Protocol {
    pub fn families(&self) -> &'static [AddressFamily] {
        match self {
            L3Protocol::Ipv4 => &[AddressFamily::Ip4],
            L3Protocol::Ipv6 => &[AddressFamily::Ip6],
            L3Protocol::All => &[AddressFamily::Ip4, AddressFamily::Ip6],
        }
    }

    pub fn of(af: AddressFamily) -> Self {
        match af {
            AddressFamily::Ip4 => L3Protocol::Ipv4,
            AddressFamily::Ip6 => L3Protocol::Ipv6,
        }
    }

    pub fn matches(&self, addr: &IpAddr) -> bool {
        self.families().contains(&AddressFamily::of(addr))
    }
}

impl fmt::Display for L3Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            L3Protocol::Ipv4 => "IPV4",
            L3Protocol::Ipv6 => "IPV6",
            L3Protocol::All => "ALL",
        };
        write!(f, "{}", s)
    }
}

impl FromStr for L3Protocol {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "IPV4" => Ok(L3Protocol::Ipv4),
            "IPV6" => Ok(L3Protocol::Ipv6),
            "ALL" => Ok(L3Protocol::All),
            _ => Err(format!("unknown L3 protocol {:?}", s)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum L4Protocol {
    Tcp,
    Udp,
}

impl L4Protocol {
    pub fn ip_proto(&self) -> IpProto {
        match self {
            L4Protocol::Tcp => IpProto::Tcp,
            L4Protocol::Udp => IpProto::Udp,
        }
    }

    pub fn from_ip_proto(proto: IpProto) -> Option<Self> {
        match proto {
            IpProto::Tcp => Some(L4Protocol::Tcp),
            IpProto::Udp => Some(L4Protocol::Udp),
            _ => None,
        }
    }
}

impl fmt::Display for L4Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            L4Protocol::Tcp => write!(f, "TCP"),
            L4Protocol::Udp => write!(f, "UDP"),
        }
    }
}

impl FromStr for L4Protocol {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "TCP" => Ok(L4Protocol::Tcp),
            "UDP" => Ok(L4Protocol::Udp),
            _ => Err(format!("unknown L4 protocol {:?}", s)),
        }
    }
}

/// A registered punt socket as reported by a dump.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PuntSocketEntry {
    pub punt: Punt,
    /// Socket of the client receiving the punted packets.
    pub client_path: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PuntReasonEntry {
    pub id: u32,
    pub name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PuntRedirectEntry {
    pub rx: InterfaceIndex,
    pub tx: InterfaceIndex,
    pub next_hop: IpAddr,
}

#[async_trait]
pub trait PuntVppApi: Send + Sync {
    /// Registers `path` for L4 traffic, once per address family of `l3`.
    /// Returns the socket VPP punts from.
    async fn register_punt_socket(
        &self,
        l3: L3Protocol,
        l4: L4Protocol,
        port: u16,
        path: &str,
    ) -> BinapiResult<String>;

    async fn deregister_punt_socket(&self, l3: L3Protocol, l4: L4Protocol, port: u16) -> BinapiResult<()>;

    /// Registers `path` for packets punted with the named reason.
    async fn add_punt_exception(&self, reason: &str, path: &str) -> BinapiResult<String>;

    async fn delete_punt_exception(&self, reason: &str) -> BinapiResult<()>;

    /// Adds a redirect for each family of `l3` matching the next hop.
    async fn add_punt_redirect(
        &self,
        l3: L3Protocol,
        rx: InterfaceIndex,
        tx: InterfaceIndex,
        next_hop: IpAddr,
    ) -> BinapiResult<()>;

    async fn delete_punt_redirect(
        &self,
        l3: L3Protocol,
        rx: InterfaceIndex,
        tx: InterfaceIndex,
        next_hop: IpAddr,
    ) -> BinapiResult<()>;

    async fn dump_punt_sockets(&self) -> BinapiResult<Vec<PuntSocketEntry>>;

    async fn dump_punt_reasons(&self) -> BinapiResult<Vec<PuntReasonEntry>>;

    async fn dump_punt_redirects(&self) -> BinapiResult<Vec<PuntRedirectEntry>>;

    /// False when socket dumps come from this handler's own records.
    fn live_socket_dump(&self) -> bool;

    /// Socket path VPP reported in the last registration.
    fn vpp_socket_path(&self) -> Option<String>;
}

/// Punt handler for every supported dialect.
pub struct PuntHandler {
    channel: ApiChannel,
    live_socket_dump: bool,
    registrations: Mutex<Vec<PuntSocketEntry>>,
    vpp_socket_path: Mutex<Option<String>>,
}

impl PuntHandler {
    pub fn new(channel: ApiChannel, live_socket_dump: bool) -> Self {
        Self {
            channel,
            live_socket_dump,
            registrations: Mutex::new(Vec::new()),
            vpp_socket_path: Mutex::new(None),
        }
    }

    async fn register(&self, punt: Punt, path: &str) -> BinapiResult<String> {
        debug!(?punt, pathname = path, "registering punt socket");
        let reply = self
            .channel
            .request(&PuntSocketRegister {
                header_version: PUNT_SOCKET_HEADER_VERSION,
                punt,
                pathname: path.to_string(),
            })
            .await?;

        let mut current = self.vpp_socket_path.lock();
        if current.as_deref() != Some(reply.pathname.as_str()) {
            debug!(pathname = %reply.pathname, "vpp punt socket path updated");
            *current = Some(reply.pathname.clone());
        }
        drop(current);

        let mut registrations = self.registrations.lock();
        registrations.retain(|r| r.punt != punt);
        registrations.push(PuntSocketEntry {
            punt,
            client_path: path.to_string(),
        });
        Ok(reply.pathname)
    }

    async fn deregister(&self, punt: Punt) -> BinapiResult<()> {
        self.channel.request(&PuntSocketDeregister { punt }).await?;
        self.registrations.lock().retain(|r| r.punt != punt);
        Ok(())
    }

    async fn reason_id(&self, reason: &str) -> BinapiResult<u32> {
        let reasons = self.dump_punt_reasons().await?;
        debug!(count = reasons.len(), "dumped punt reasons");
        reasons
            .into_iter()
            .find(|r| r.name == reason)
            .map(|r| r.id)
            .ok_or_else(|| BinapiError::NotFound(format!("punt reason {:?} not found", reason)))
    }

    async fn redirect(
        &self,
        l3: L3Protocol,
        rx: InterfaceIndex,
        tx: InterfaceIndex,
        next_hop: IpAddr,
        is_add: bool,
    ) -> BinapiResult<()> {
        if !l3.matches(&next_hop) {
            return Err(BinapiError::encode(
                IpPuntRedirect::NAME,
                format!("next hop {} does not match L3 protocol {}", next_hop, l3),
            ));
        }
        // The message carries one next hop, and a redirect of the other
        // family with it would be rejected. ALL is therefore a single call in
        // the next hop's family rather than one call per family.
        self.channel
            .request(&IpPuntRedirect {
                punt: PuntRedirect {
                    rx_sw_if_index: rx,
                    tx_sw_if_index: tx,
                    nh: next_hop,
                },
                is_add,
            })
            .await?;
        Ok(())
    }
}

fn l4_punt(af: AddressFamily, l4: L4Protocol, port: u16) -> Punt {
    Punt::L4 {
        af,
        protocol: l4.ip_proto(),
        port,
    }
}

#[async_trait]
impl PuntVppApi for PuntHandler {
    async fn register_punt_socket(
        &self,
        l3: L3Protocol,
        l4: L4Protocol,
        port: u16,
        path: &str,
    ) -> BinapiResult<String> {
        let mut vpp_path = String::new();
        for af in l3.families() {
            vpp_path = self.register(l4_punt(*af, l4, port), path).await?;
        }
        Ok(vpp_path)
    }

    async fn deregister_punt_socket(&self, l3: L3Protocol, l4: L4Protocol, port: u16) -> BinapiResult<()> {
        for af in l3.families() {
            self.deregister(l4_punt(*af, l4, port)).await?;
        }
        Ok(())
    }

    async fn add_punt_exception(&self, reason: &str, path: &str) -> BinapiResult<String> {
        let id = self.reason_id(reason).await?;
        self.register(Punt::Exception { id }, path).await
    }

    async fn delete_punt_exception(&self, reason: &str) -> BinapiResult<()> {
        let id = self.reason_id(reason).await?;
        self.deregister(Punt::Exception { id }).await
    }

    async fn add_punt_redirect(
        &self,
        l3: L3Protocol,
        rx: InterfaceIndex,
        tx: InterfaceIndex,
        next_hop: IpAddr,
    ) -> BinapiResult<()> {
        self.redirect(l3, rx, tx, next_hop, true).await
    }

    async fn delete_punt_redirect(
        &self,
        l3: L3Protocol,
        rx: InterfaceIndex,
        tx: InterfaceIndex,
        next_hop: IpAddr,
    ) -> BinapiResult<()> {
        self.redirect(l3, rx, tx, next_hop, false).await
    }

    async fn dump_punt_sockets(&self) -> BinapiResult<Vec<PuntSocketEntry>> {
        if !self.live_socket_dump {
            return Ok(self.registrations.lock().clone());
        }
        let (l4, exceptions) = futures::try_join!(
            self.channel.dump(&PuntSocketDump {
                punt_type: PUNT_API_TYPE_L4,
            }),
            self.channel.dump(&PuntSocketDump {
                punt_type: PUNT_API_TYPE_EXCEPTION,
            }),
        )?;
        Ok(l4
            .into_iter()
            .chain(exceptions)
            .map(|d| PuntSocketEntry {
                punt: d.punt,
                client_path: d.pathname,
            })
            .collect())
    }

    async fn dump_punt_reasons(&self) -> BinapiResult<Vec<PuntReasonEntry>> {
        let details = self.channel.dump(&PuntReasonDump::default()).await?;
        Ok(details
            .into_iter()
            .map(|d| PuntReasonEntry {
                id: d.reason.id,
                name: d.reason.name,
            })
            .collect())
    }

    async fn dump_punt_redirects(&self) -> BinapiResult<Vec<PuntRedirectEntry>> {
        let (v4, v6) = futures::try_join!(
            self.channel.dump(&IpPuntRedirectDump {
                sw_if_index: InterfaceIndex::INVALID,
                is_ipv6: false,
            }),
            self.channel.dump(&IpPuntRedirectDump {
                sw_if_index: InterfaceIndex::INVALID,
                is_ipv6: true,
            }),
        )?;
        Ok(v4
            .into_iter()
            .chain(v6)
            .map(|d| PuntRedirectEntry {
                rx: d.punt.rx_sw_if_index,
                tx: d.punt.tx_sw_if_index,
                next_hop: d.punt.nh,
            })
            .collect())
    }

    fn live_socket_dump(&self) -> bool {
        self.live_socket_dump
    }

    fn vpp_socket_path(&self) -> Option<String> {
        self.vpp_socket_path.lock().clone()
    }
}

fn new_vpp1908_handler(channel: ApiChannel) -> Arc<dyn PuntVppApi> {
    Arc::new(PuntHandler::new(channel, false))
}

fn new_vpp2001_handler(channel: ApiChannel) -> Arc<dyn PuntVppApi> {
    Arc::new(PuntHandler::new(channel, true))
}

/// Supported punt handler versions, newest first.
pub fn punt_handlers() -> HandlerRegistry<dyn PuntVppApi> {
    let mut registry = HandlerRegistry::new("punt");
    registry
        .add_version("vpp2001", Dialect::Vpp2001, VPP2001_PUNT_MESSAGES, new_vpp2001_handler)
        .add_version("vpp1908", Dialect::Vpp1908, VPP1908_PUNT_MESSAGES, new_vpp1908_handler);
    registry
}

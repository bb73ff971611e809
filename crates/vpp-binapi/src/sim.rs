//! In-process dataplane simulator.
//!
//! [`SimVpp`] decodes real request frames in one dialect, keeps a small model
//! of interfaces, punt registrations and redirects, and answers with real
//! reply frames. It backs the handler, descriptor and daemon tests, and the
//! agent's `--simulate` mode.
//!
//! Faults are injected per message name: [`SimVpp::fail_next`] answers the
//! next request with a retval instead of executing it, and
//! [`SimVpp::drop_next_reply`] swallows the next request so the client
//! times out.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::codec::{
    decode_body, decode_request_header, encode_reply, Dump, Message, Reply, ReplyHeader, Request,
};
use crate::dialect::Dialect;
use crate::error::{BinapiError, BinapiResult, VppRetval};
use crate::msgs::interface::*;
use crate::msgs::ip::*;
use crate::msgs::memclnt::*;
use crate::msgs::punt::*;
use crate::transport::Transport;
use crate::types::{AddressFamily, InterfaceIndex, IpPrefix, MacAddress};

const FIRST_DYNAMIC_ID: u16 = 17;
const VPE_PID: u32 = 4242;

/// Punt socket path the simulated dataplane reports in register replies.
pub const SIM_PUNT_SOCKET: &str = "/run/vpp/punt.sock";

const DEFAULT_PUNT_REASONS: &[&str] = &[
    "ipsec4-spi-o-udp-0",
    "ipsec4-no-such-tunnel",
    "ipsec6-no-such-tunnel",
    "VXLAN-GBP-no-such-v4-tunnel",
];

/// A simulated interface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimInterface {
    pub sw_if_index: InterfaceIndex,
    pub name: String,
    pub tag: String,
    pub mac: MacAddress,
    pub admin_up: bool,
    pub addresses: Vec<IpPrefix>,
}

struct SimState {
    table: Vec<MessageTableEntry>,
    ids: HashMap<String, u16>,
    names: HashMap<u16, &'static str>,
    next_client: u32,
    next_sw_if_index: u32,
    next_loopback: u32,
    interfaces: BTreeMap<InterfaceIndex, SimInterface>,
    punt_sockets: Vec<PuntSocketDetails>,
    reasons: Vec<PuntReason>,
    redirects: Vec<PuntRedirect>,
    calls: Vec<String>,
    faults: HashMap<String, VecDeque<i32>>,
    dropped: HashSet<String>,
}

impl SimState {
    fn new(dialect: Dialect, omit: &[&str]) -> Self {
        let mut state = SimState {
            table: Vec::new(),
            ids: HashMap::new(),
            names: HashMap::new(),
            next_client: 1,
            next_sw_if_index: 0,
            next_loopback: 0,
            interfaces: BTreeMap::new(),
            punt_sockets: Vec::new(),
            reasons: DEFAULT_PUNT_REASONS
                .iter()
                .enumerate()
                .map(|(id, name)| PuntReason {
                    id: id as u32,
                    name: name.to_string(),
                })
                .collect(),
            redirects: Vec::new(),
            calls: Vec::new(),
            faults: HashMap::new(),
            dropped: HashSet::new(),
        };

        let mut next_id = FIRST_DYNAMIC_ID;
        for name in ALL_MESSAGES {
            if omit.contains(name) {
                continue;
            }
            let index = match *name {
                SockclntCreate::NAME => SOCKCLNT_CREATE_ID,
                SockclntCreateReply::NAME => SOCKCLNT_CREATE_REPLY_ID,
                _ => {
                    next_id += 1;
                    next_id - 1
                }
            };
            if let Some(name_crc) = dialect.name_crc(name) {
                state.ids.insert(name_crc.clone(), index);
                state.names.insert(index, name);
                state.table.push(MessageTableEntry {
                    index,
                    name: name_crc,
                });
            }
        }

        state.add_interface("local0".to_string(), MacAddress::ZERO);
        state
    }

    fn add_interface(&mut self, name: String, mac: MacAddress) -> InterfaceIndex {
        let sw_if_index = InterfaceIndex(self.next_sw_if_index);
        self.next_sw_if_index += 1;
        self.interfaces.insert(
            sw_if_index,
            SimInterface {
                sw_if_index,
                name,
                tag: String::new(),
                mac,
                admin_up: false,
                addresses: Vec::new(),
            },
        );
        sw_if_index
    }

    fn interface_mut(&mut self, sw_if_index: InterfaceIndex) -> Result<&mut SimInterface, i32> {
        self.interfaces
            .get_mut(&sw_if_index)
            .ok_or(VppRetval::InvalidSwIfIndex as i32)
    }
}

/// Every message the simulator answers, without CRCs.
const ALL_MESSAGES: &[&str] = &[
    SockclntCreate::NAME,
    SockclntCreateReply::NAME,
    ControlPing::NAME,
    ControlPingReply::NAME,
    CreateLoopback::NAME,
    CreateLoopbackReply::NAME,
    DeleteLoopback::NAME,
    DeleteLoopbackReply::NAME,
    SwInterfaceSetFlags::NAME,
    SwInterfaceSetFlagsReply::NAME,
    SwInterfaceTagAddDel::NAME,
    SwInterfaceTagAddDelReply::NAME,
    SwInterfaceAddDelAddress::NAME,
    SwInterfaceAddDelAddressReply::NAME,
    SwInterfaceDump::NAME,
    SwInterfaceDetails::NAME,
    IpAddressDump::NAME,
    IpAddressDetails::NAME,
    IpPuntRedirect::NAME,
    IpPuntRedirectReply::NAME,
    IpPuntRedirectDump::NAME,
    IpPuntRedirectDetails::NAME,
    PuntSocketRegister::NAME,
    PuntSocketRegisterReply::NAME,
    PuntSocketDeregister::NAME,
    PuntSocketDeregisterReply::NAME,
    PuntSocketDump::NAME,
    PuntSocketDetails::NAME,
    PuntReasonDump::NAME,
    PuntReasonDetails::NAME,
];

/// Replies the simulator can turn into a bare failure.
trait ErrorReply: Reply + Default {
    fn with_retval(retval: i32) -> Self;
}

macro_rules! error_reply {
    ($($ty:ty),+ $(,)?) => {
        $(
            impl ErrorReply for $ty {
                fn with_retval(retval: i32) -> Self {
                    Self {
                        retval,
                        ..Default::default()
                    }
                }
            }
        )+
    };
}

error_reply!(
    ControlPingReply,
    CreateLoopbackReply,
    DeleteLoopbackReply,
    SwInterfaceSetFlagsReply,
    SwInterfaceTagAddDelReply,
    SwInterfaceAddDelAddressReply,
    IpPuntRedirectReply,
    PuntSocketRegisterReply,
    PuntSocketDeregisterReply,
);

/// Simulated VPP instance speaking one dialect.
pub struct SimVpp {
    dialect: Dialect,
    state: Mutex<SimState>,
}

impl SimVpp {
    pub fn new(dialect: Dialect) -> Arc<Self> {
        Self::without_messages(dialect, &[])
    }

    /// A peer whose message table lacks `omit` (names without CRC).
    pub fn without_messages(dialect: Dialect, omit: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            dialect,
            state: Mutex::new(SimState::new(dialect, omit)),
        })
    }

    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    /// A transport connected to this instance.
    pub fn transport(self: &Arc<Self>) -> SimTransport {
        let (tx, rx) = mpsc::unbounded_channel();
        SimTransport {
            sim: self.clone(),
            tx,
            rx: tokio::sync::Mutex::new(rx),
        }
    }

    /// State-changing requests received so far, in order.
    pub fn calls(&self) -> Vec<String> {
        self.state.lock().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.state.lock().calls.clear();
    }

    /// Answers the next `message` request with `retval` without executing it.
    pub fn fail_next(&self, message: &str, retval: i32) {
        self.state
            .lock()
            .faults
            .entry(message.to_string())
            .or_default()
            .push_back(retval);
    }

    /// Swallows the next `message` request.
    pub fn drop_next_reply(&self, message: &str) {
        self.state.lock().dropped.insert(message.to_string());
    }

    pub fn interfaces(&self) -> Vec<SimInterface> {
        self.state.lock().interfaces.values().cloned().collect()
    }

    pub fn punt_sockets(&self) -> Vec<PuntSocketDetails> {
        self.state.lock().punt_sockets.clone()
    }

    pub fn redirects(&self) -> Vec<PuntRedirect> {
        self.state.lock().redirects.clone()
    }

    pub fn add_punt_reason(&self, name: &str) -> u32 {
        let mut st = self.state.lock();
        let id = st.reasons.len() as u32;
        st.reasons.push(PuntReason {
            id,
            name: name.to_string(),
        });
        id
    }

    /// Registers a punt socket as another client would.
    pub fn add_external_punt_socket(&self, punt: Punt, pathname: &str) {
        self.state.lock().punt_sockets.push(PuntSocketDetails {
            punt,
            pathname: pathname.to_string(),
        });
    }

    /// Creates an interface as another client would.
    pub fn add_external_interface(&self, name: &str) -> InterfaceIndex {
        self.state
            .lock()
            .add_interface(name.to_string(), MacAddress::ZERO)
    }

    /// Forgets everything but `local0`, as after a dataplane restart.
    pub fn restart(&self) {
        let mut st = self.state.lock();
        st.interfaces.retain(|index, _| index.0 == 0);
        st.punt_sockets.clear();
        st.redirects.clear();
        debug!("simulated VPP restarted");
    }

    /// Handles one request frame and returns the reply frames.
    pub fn handle_frame(&self, frame: &[u8]) -> Vec<Vec<u8>> {
        let (header, body) = match decode_request_header(frame) {
            Ok(decoded) => decoded,
            Err(err) => {
                warn!(error = %err, "simulator dropped malformed frame");
                return Vec::new();
            }
        };
        let mut st = self.state.lock();

        if header.msg_id == SOCKCLNT_CREATE_ID {
            let client = st.next_client;
            st.next_client += 1;
            let reply = SockclntCreateReply {
                response: 0,
                index: client,
                message_table: st.table.clone(),
            };
            let header = ReplyHeader {
                msg_id: SOCKCLNT_CREATE_REPLY_ID,
                context: header.context,
            };
            return match encode_reply(header, &reply, self.dialect) {
                Ok(frame) => vec![frame],
                Err(err) => {
                    warn!(error = %err, "simulator failed to encode handshake");
                    Vec::new()
                }
            };
        }

        let name = match st.names.get(&header.msg_id) {
            Some(name) => *name,
            None => {
                warn!(msg_id = header.msg_id, "simulator received unknown message id");
                return Vec::new();
            }
        };
        debug!(message = name, context = header.context, "simulator request");

        match self.dispatch(&mut st, name, header.context, body) {
            Ok(frames) => frames,
            Err(err) => {
                warn!(message = name, error = %err, "simulator failed to handle request");
                Vec::new()
            }
        }
    }

    fn dispatch(
        &self,
        st: &mut SimState,
        name: &str,
        context: u32,
        body: &[u8],
    ) -> BinapiResult<Vec<Vec<u8>>> {
        match name {
            ControlPing::NAME => self.call(st, context, body, |st, _: ControlPing| {
                Ok(ControlPingReply {
                    retval: 0,
                    client_index: st.next_client - 1,
                    vpe_pid: VPE_PID,
                })
            }),
            CreateLoopback::NAME => self.call(st, context, body, |st, req: CreateLoopback| {
                let instance = st.next_loopback;
                st.next_loopback += 1;
                let mac = if req.mac_address.is_zero() {
                    MacAddress([0xde, 0xad, 0, 0, 0, (st.next_sw_if_index & 0xff) as u8])
                } else {
                    req.mac_address
                };
                let sw_if_index = st.add_interface(format!("loop{}", instance), mac);
                Ok(CreateLoopbackReply {
                    retval: 0,
                    sw_if_index: sw_if_index.0,
                })
            }),
            DeleteLoopback::NAME => self.call(st, context, body, |st, req: DeleteLoopback| {
                let is_loopback = st
                    .interfaces
                    .get(&req.sw_if_index)
                    .map_or(false, |i| i.name.starts_with("loop"));
                if !is_loopback {
                    return Err(VppRetval::InvalidSwIfIndex as i32);
                }
                st.interfaces.remove(&req.sw_if_index);
                Ok(DeleteLoopbackReply::default())
            }),
            SwInterfaceSetFlags::NAME => {
                self.call(st, context, body, |st, req: SwInterfaceSetFlags| {
                    st.interface_mut(req.sw_if_index)?.admin_up = req.admin_up;
                    Ok(SwInterfaceSetFlagsReply::default())
                })
            }
            SwInterfaceTagAddDel::NAME => {
                self.call(st, context, body, |st, req: SwInterfaceTagAddDel| {
                    let iface = st.interface_mut(req.sw_if_index)?;
                    iface.tag = if req.is_add { req.tag } else { String::new() };
                    Ok(SwInterfaceTagAddDelReply::default())
                })
            }
            SwInterfaceAddDelAddress::NAME => {
                self.call(st, context, body, |st, req: SwInterfaceAddDelAddress| {
                    let iface = st.interface_mut(req.sw_if_index)?;
                    if req.del_all {
                        iface.addresses.clear();
                    } else if req.is_add {
                        if iface.addresses.contains(&req.prefix) {
                            return Err(VppRetval::EntryAlreadyExists as i32);
                        }
                        iface.addresses.push(req.prefix);
                    } else {
                        let before = iface.addresses.len();
                        iface.addresses.retain(|p| *p != req.prefix);
                        if iface.addresses.len() == before {
                            return Err(VppRetval::NoSuchEntry as i32);
                        }
                    }
                    Ok(SwInterfaceAddDelAddressReply::default())
                })
            }
            SwInterfaceDump::NAME => self.dump(st, context, body, |st, req: SwInterfaceDump| {
                st.interfaces
                    .values()
                    .filter(|i| !req.sw_if_index.is_valid() || i.sw_if_index == req.sw_if_index)
                    .filter(|i| req.name_filter.as_ref().map_or(true, |f| i.name.contains(f.as_str())))
                    .map(|i| SwInterfaceDetails {
                        sw_if_index: i.sw_if_index,
                        interface_name: i.name.clone(),
                        tag: i.tag.clone(),
                        l2_address: i.mac,
                        admin_up: i.admin_up,
                        link_up: i.admin_up,
                    })
                    .collect()
            }),
            IpAddressDump::NAME => self.dump(st, context, body, |st, req: IpAddressDump| {
                let family = if req.is_ipv6 {
                    AddressFamily::Ip6
                } else {
                    AddressFamily::Ip4
                };
                st.interfaces
                    .get(&req.sw_if_index)
                    .map(|i| {
                        i.addresses
                            .iter()
                            .filter(|p| p.family() == family)
                            .map(|p| IpAddressDetails {
                                sw_if_index: i.sw_if_index,
                                prefix: *p,
                            })
                            .collect()
                    })
                    .unwrap_or_default()
            }),
            PuntSocketRegister::NAME => {
                self.call(st, context, body, |st, req: PuntSocketRegister| {
                    if let Punt::Exception { id } = req.punt {
                        if !st.reasons.iter().any(|r| r.id == id) {
                            return Err(VppRetval::InvalidValue as i32);
                        }
                    }
                    st.punt_sockets.retain(|s| s.punt != req.punt);
                    st.punt_sockets.push(PuntSocketDetails {
                        punt: req.punt,
                        pathname: req.pathname,
                    });
                    Ok(PuntSocketRegisterReply {
                        retval: 0,
                        pathname: SIM_PUNT_SOCKET.to_string(),
                    })
                })
            }
            PuntSocketDeregister::NAME => {
                self.call(st, context, body, |st, req: PuntSocketDeregister| {
                    let before = st.punt_sockets.len();
                    st.punt_sockets.retain(|s| s.punt != req.punt);
                    if st.punt_sockets.len() == before {
                        return Err(VppRetval::NoSuchEntry as i32);
                    }
                    Ok(PuntSocketDeregisterReply::default())
                })
            }
            PuntSocketDump::NAME => self.dump(st, context, body, |st, req: PuntSocketDump| {
                st.punt_sockets
                    .iter()
                    .filter(|s| s.punt.type_tag() == req.punt_type)
                    .cloned()
                    .collect()
            }),
            PuntReasonDump::NAME => self.dump(st, context, body, |st, req: PuntReasonDump| {
                st.reasons
                    .iter()
                    .filter(|r| req.reason.name.is_empty() || r.name == req.reason.name)
                    .map(|r| PuntReasonDetails { reason: r.clone() })
                    .collect()
            }),
            IpPuntRedirect::NAME => self.call(st, context, body, |st, req: IpPuntRedirect| {
                let punt = req.punt;
                if !st.interfaces.contains_key(&punt.tx_sw_if_index)
                    || (punt.rx_sw_if_index.is_valid()
                        && !st.interfaces.contains_key(&punt.rx_sw_if_index))
                {
                    return Err(VppRetval::InvalidSwIfIndex as i32);
                }
                let same_slot = |r: &PuntRedirect| {
                    r.rx_sw_if_index == punt.rx_sw_if_index
                        && AddressFamily::of(&r.nh) == AddressFamily::of(&punt.nh)
                };
                if req.is_add {
                    st.redirects.retain(|r| !same_slot(r));
                    st.redirects.push(punt);
                } else {
                    let before = st.redirects.len();
                    st.redirects.retain(|r| !same_slot(r));
                    if st.redirects.len() == before {
                        return Err(VppRetval::NoSuchEntry as i32);
                    }
                }
                Ok(IpPuntRedirectReply::default())
            }),
            IpPuntRedirectDump::NAME => {
                self.dump(st, context, body, |st, req: IpPuntRedirectDump| {
                    st.redirects
                        .iter()
                        .filter(|r| {
                            !req.sw_if_index.is_valid() || r.rx_sw_if_index == req.sw_if_index
                        })
                        .filter(|r| r.nh.is_ipv6() == req.is_ipv6)
                        .map(|r| IpPuntRedirectDetails { punt: *r })
                        .collect()
                })
            }
            other => {
                warn!(message = other, "simulator has no handler for message");
                Ok(Vec::new())
            }
        }
    }

    fn call<Q, F>(&self, st: &mut SimState, context: u32, body: &[u8], op: F) -> BinapiResult<Vec<Vec<u8>>>
    where
        Q: Request,
        Q::Reply: ErrorReply,
        F: FnOnce(&mut SimState, Q) -> Result<Q::Reply, i32>,
    {
        let req: Q = decode_body(body, self.dialect)?;
        if Q::NAME != ControlPing::NAME {
            st.calls.push(Q::NAME.to_string());
        }
        if st.dropped.remove(Q::NAME) {
            debug!(message = Q::NAME, "simulator dropped request");
            return Ok(Vec::new());
        }
        let injected = st.faults.get_mut(Q::NAME).and_then(|q| q.pop_front());
        let reply = match injected {
            Some(retval) => <Q::Reply as ErrorReply>::with_retval(retval),
            None => op(st, req).unwrap_or_else(<Q::Reply as ErrorReply>::with_retval),
        };
        Ok(vec![self.frame(st, context, &reply)?])
    }

    fn dump<D, F>(&self, st: &SimState, context: u32, body: &[u8], op: F) -> BinapiResult<Vec<Vec<u8>>>
    where
        D: Dump,
        F: FnOnce(&SimState, D) -> Vec<D::Details>,
    {
        let req: D = decode_body(body, self.dialect)?;
        op(st, req)
            .iter()
            .map(|details| self.frame(st, context, details))
            .collect()
    }

    fn frame<M: Message>(&self, st: &SimState, context: u32, msg: &M) -> BinapiResult<Vec<u8>> {
        let name_crc = self
            .dialect
            .name_crc(M::NAME)
            .ok_or_else(|| BinapiError::UnknownMessage(M::NAME.to_string()))?;
        let msg_id = *st
            .ids
            .get(&name_crc)
            .ok_or(BinapiError::UnknownMessage(name_crc))?;
        encode_reply(ReplyHeader { msg_id, context }, msg, self.dialect)
    }
}

/// Transport delivering frames to a [`SimVpp`] without a socket.
pub struct SimTransport {
    sim: Arc<SimVpp>,
    tx: mpsc::UnboundedSender<Vec<u8>>,
    rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<Vec<u8>>>,
}

#[async_trait]
impl Transport for SimTransport {
    async fn send(&self, frame: Vec<u8>) -> BinapiResult<()> {
        for reply in self.sim.handle_frame(&frame) {
            self.tx.send(reply).map_err(|_| BinapiError::Disconnected)?;
        }
        Ok(())
    }

    async fn recv(&self) -> BinapiResult<Option<Vec<u8>>> {
        Ok(self.rx.lock().await.recv().await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_message_table_respects_omissions() {
        let sim = SimVpp::without_messages(Dialect::Vpp1908, &["punt_socket_dump", "punt_socket_details"]);
        let st = sim.state.lock();
        assert!(st.ids.contains_key("punt_socket_register_ddc0d8e0"));
        assert!(!st.ids.contains_key("punt_socket_dump_52974935"));
        assert_eq!(st.ids.get("sockclnt_create_455fb9c4"), Some(&SOCKCLNT_CREATE_ID));
    }

    #[test]
    fn test_restart_keeps_local0() {
        let sim = SimVpp::new(Dialect::Vpp2001);
        sim.add_external_interface("tap0");
        sim.add_external_punt_socket(Punt::Exception { id: 1 }, "/tmp/x.sock");
        sim.restart();

        let names: Vec<_> = sim.interfaces().into_iter().map(|i| i.name).collect();
        assert_eq!(names, vec!["local0"]);
        assert!(sim.punt_sockets().is_empty());
    }
}

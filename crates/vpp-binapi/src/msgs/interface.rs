//! Interface module: loopbacks, admin state, tags and addresses.

use crate::codec::{retval_reply, Decoder, Dump, Encoder, Message, Reply, Request};
use crate::dialect::Dialect;
use crate::error::BinapiResult;
use crate::types::{InterfaceIndex, IpPrefix, MacAddress};

const NAME_LEN: usize = 64;
const TAG_LEN: usize = 64;

const IF_STATUS_ADMIN_UP: u32 = 1;
const IF_STATUS_LINK_UP: u32 = 2;

/// Admin/link state: two u8 flags in vpp1908, one u32 bit set in vpp2001.
fn encode_status(enc: &mut Encoder, admin_up: bool, link_up: Option<bool>, dialect: Dialect) {
    match dialect {
        Dialect::Vpp1908 => {
            enc.bool(admin_up);
            if let Some(link_up) = link_up {
                enc.bool(link_up);
            }
        }
        Dialect::Vpp2001 => {
            let mut flags = 0;
            if admin_up {
                flags |= IF_STATUS_ADMIN_UP;
            }
            if link_up == Some(true) {
                flags |= IF_STATUS_LINK_UP;
            }
            enc.u32(flags);
        }
    }
}

fn decode_status(dec: &mut Decoder<'_>, with_link: bool, dialect: Dialect) -> BinapiResult<(bool, bool)> {
    match dialect {
        Dialect::Vpp1908 => {
            let admin_up = dec.bool()?;
            let link_up = if with_link { dec.bool()? } else { false };
            Ok((admin_up, link_up))
        }
        Dialect::Vpp2001 => {
            let flags = dec.u32()?;
            Ok((flags & IF_STATUS_ADMIN_UP != 0, flags & IF_STATUS_LINK_UP != 0))
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CreateLoopback {
    pub mac_address: MacAddress,
}

impl Message for CreateLoopback {
    const NAME: &'static str = "create_loopback";

    fn encode(&self, enc: &mut Encoder, _dialect: Dialect) -> BinapiResult<()> {
        enc.bytes(&self.mac_address.0);
        Ok(())
    }

    fn decode(dec: &mut Decoder<'_>, _dialect: Dialect) -> BinapiResult<Self> {
        Ok(Self {
            mac_address: MacAddress(dec.array()?),
        })
    }
}

impl Request for CreateLoopback {
    type Reply = CreateLoopbackReply;
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CreateLoopbackReply {
    pub retval: i32,
    pub sw_if_index: u32,
}

impl Message for CreateLoopbackReply {
    const NAME: &'static str = "create_loopback_reply";

    fn encode(&self, enc: &mut Encoder, _dialect: Dialect) -> BinapiResult<()> {
        enc.i32(self.retval).u32(self.sw_if_index);
        Ok(())
    }

    fn decode(dec: &mut Decoder<'_>, _dialect: Dialect) -> BinapiResult<Self> {
        Ok(Self {
            retval: dec.i32()?,
            sw_if_index: dec.u32()?,
        })
    }
}

impl Reply for CreateLoopbackReply {
    fn retval(&self) -> i32 {
        self.retval
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeleteLoopback {
    pub sw_if_index: InterfaceIndex,
}

impl Message for DeleteLoopback {
    const NAME: &'static str = "delete_loopback";

    fn encode(&self, enc: &mut Encoder, _dialect: Dialect) -> BinapiResult<()> {
        enc.u32(self.sw_if_index.0);
        Ok(())
    }

    fn decode(dec: &mut Decoder<'_>, _dialect: Dialect) -> BinapiResult<Self> {
        Ok(Self {
            sw_if_index: InterfaceIndex(dec.u32()?),
        })
    }
}

impl Request for DeleteLoopback {
    type Reply = DeleteLoopbackReply;
}

retval_reply!(DeleteLoopbackReply, "delete_loopback_reply");

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SwInterfaceSetFlags {
    pub sw_if_index: InterfaceIndex,
    pub admin_up: bool,
}

impl Message for SwInterfaceSetFlags {
    const NAME: &'static str = "sw_interface_set_flags";

    fn encode(&self, enc: &mut Encoder, dialect: Dialect) -> BinapiResult<()> {
        enc.u32(self.sw_if_index.0);
        encode_status(enc, self.admin_up, None, dialect);
        Ok(())
    }

    fn decode(dec: &mut Decoder<'_>, dialect: Dialect) -> BinapiResult<Self> {
        let sw_if_index = InterfaceIndex(dec.u32()?);
        let (admin_up, _) = decode_status(dec, false, dialect)?;
        Ok(Self {
            sw_if_index,
            admin_up,
        })
    }
}

impl Request for SwInterfaceSetFlags {
    type Reply = SwInterfaceSetFlagsReply;
}

retval_reply!(SwInterfaceSetFlagsReply, "sw_interface_set_flags_reply");

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SwInterfaceTagAddDel {
    pub is_add: bool,
    pub sw_if_index: InterfaceIndex,
    pub tag: String,
}

impl Message for SwInterfaceTagAddDel {
    const NAME: &'static str = "sw_interface_tag_add_del";

    fn encode(&self, enc: &mut Encoder, _dialect: Dialect) -> BinapiResult<()> {
        enc.bool(self.is_add)
            .u32(self.sw_if_index.0)
            .fixed_str(&self.tag, TAG_LEN)?;
        Ok(())
    }

    fn decode(dec: &mut Decoder<'_>, _dialect: Dialect) -> BinapiResult<Self> {
        Ok(Self {
            is_add: dec.bool()?,
            sw_if_index: InterfaceIndex(dec.u32()?),
            tag: dec.fixed_str(TAG_LEN)?,
        })
    }
}

impl Request for SwInterfaceTagAddDel {
    type Reply = SwInterfaceTagAddDelReply;
}

retval_reply!(SwInterfaceTagAddDelReply, "sw_interface_tag_add_del_reply");

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SwInterfaceAddDelAddress {
    pub sw_if_index: InterfaceIndex,
    pub is_add: bool,
    pub del_all: bool,
    pub prefix: IpPrefix,
}

impl Message for SwInterfaceAddDelAddress {
    const NAME: &'static str = "sw_interface_add_del_address";

    fn encode(&self, enc: &mut Encoder, dialect: Dialect) -> BinapiResult<()> {
        enc.u32(self.sw_if_index.0)
            .bool(self.is_add)
            .bool(self.del_all)
            .prefix(&self.prefix, dialect)?;
        Ok(())
    }

    fn decode(dec: &mut Decoder<'_>, dialect: Dialect) -> BinapiResult<Self> {
        Ok(Self {
            sw_if_index: InterfaceIndex(dec.u32()?),
            is_add: dec.bool()?,
            del_all: dec.bool()?,
            prefix: dec.prefix(dialect)?,
        })
    }
}

impl Request for SwInterfaceAddDelAddress {
    type Reply = SwInterfaceAddDelAddressReply;
}

retval_reply!(SwInterfaceAddDelAddressReply, "sw_interface_add_del_address_reply");

/// Dumps interfaces; `INVALID` index dumps all of them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SwInterfaceDump {
    pub sw_if_index: InterfaceIndex,
    pub name_filter: Option<String>,
}

impl Default for SwInterfaceDump {
    fn default() -> Self {
        Self {
            sw_if_index: InterfaceIndex::INVALID,
            name_filter: None,
        }
    }
}

impl Message for SwInterfaceDump {
    const NAME: &'static str = "sw_interface_dump";

    fn encode(&self, enc: &mut Encoder, _dialect: Dialect) -> BinapiResult<()> {
        enc.u32(self.sw_if_index.0)
            .bool(self.name_filter.is_some())
            .var_str(self.name_filter.as_deref().unwrap_or_default());
        Ok(())
    }

    fn decode(dec: &mut Decoder<'_>, _dialect: Dialect) -> BinapiResult<Self> {
        let sw_if_index = InterfaceIndex(dec.u32()?);
        let filtered = dec.bool()?;
        let filter = dec.var_str()?;
        Ok(Self {
            sw_if_index,
            name_filter: filtered.then_some(filter),
        })
    }
}

impl Dump for SwInterfaceDump {
    type Details = SwInterfaceDetails;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SwInterfaceDetails {
    pub sw_if_index: InterfaceIndex,
    pub interface_name: String,
    pub tag: String,
    pub l2_address: MacAddress,
    pub admin_up: bool,
    pub link_up: bool,
}

impl Message for SwInterfaceDetails {
    const NAME: &'static str = "sw_interface_details";

    fn encode(&self, enc: &mut Encoder, dialect: Dialect) -> BinapiResult<()> {
        enc.u32(self.sw_if_index.0)
            .fixed_str(&self.interface_name, NAME_LEN)?
            .fixed_str(&self.tag, TAG_LEN)?
            .bytes(&self.l2_address.0);
        encode_status(enc, self.admin_up, Some(self.link_up), dialect);
        Ok(())
    }

    fn decode(dec: &mut Decoder<'_>, dialect: Dialect) -> BinapiResult<Self> {
        let sw_if_index = InterfaceIndex(dec.u32()?);
        let interface_name = dec.fixed_str(NAME_LEN)?;
        let tag = dec.fixed_str(TAG_LEN)?;
        let l2_address = MacAddress(dec.array()?);
        let (admin_up, link_up) = decode_status(dec, true, dialect)?;
        Ok(Self {
            sw_if_index,
            interface_name,
            tag,
            l2_address,
            admin_up,
            link_up,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IpAddressDump {
    pub sw_if_index: InterfaceIndex,
    pub is_ipv6: bool,
}

impl Message for IpAddressDump {
    const NAME: &'static str = "ip_address_dump";

    fn encode(&self, enc: &mut Encoder, _dialect: Dialect) -> BinapiResult<()> {
        enc.u32(self.sw_if_index.0).bool(self.is_ipv6);
        Ok(())
    }

    fn decode(dec: &mut Decoder<'_>, _dialect: Dialect) -> BinapiResult<Self> {
        Ok(Self {
            sw_if_index: InterfaceIndex(dec.u32()?),
            is_ipv6: dec.bool()?,
        })
    }
}

impl Dump for IpAddressDump {
    type Details = IpAddressDetails;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IpAddressDetails {
    pub sw_if_index: InterfaceIndex,
    pub prefix: IpPrefix,
}

impl Message for IpAddressDetails {
    const NAME: &'static str = "ip_address_details";

    fn encode(&self, enc: &mut Encoder, dialect: Dialect) -> BinapiResult<()> {
        enc.u32(self.sw_if_index.0).prefix(&self.prefix, dialect)?;
        Ok(())
    }

    fn decode(dec: &mut Decoder<'_>, dialect: Dialect) -> BinapiResult<Self> {
        Ok(Self {
            sw_if_index: InterfaceIndex(dec.u32()?),
            prefix: dec.prefix(dialect)?,
        })
    }
}

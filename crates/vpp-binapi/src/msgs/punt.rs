//! Punt module: socket registrations and punt reasons.
//!
//! The wire `punt_t` is a type tag followed by a fixed-size union. Here it is
//! the [`Punt`] enum; the union is packed and padded by its codec.

use crate::codec::{retval_reply, Decoder, Dump, Encoder, Message, Reply, Request};
use crate::dialect::Dialect;
use crate::error::{BinapiError, BinapiResult};
use crate::types::{AddressFamily, IpProto};

pub const PUNT_API_TYPE_L4: u32 = 1;
pub const PUNT_API_TYPE_IP_PROTO: u32 = 2;
pub const PUNT_API_TYPE_EXCEPTION: u32 = 3;

/// Version of the header prepended to punted packets.
pub const PUNT_SOCKET_HEADER_VERSION: u32 = 1;

const PATHNAME_LEN: usize = 108;
const REPLY_PATHNAME_LEN: usize = 64;

/// What traffic a punt registration matches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Punt {
    Exception {
        id: u32,
    },
    L4 {
        af: AddressFamily,
        protocol: IpProto,
        port: u16,
    },
    IpProto {
        af: AddressFamily,
        protocol: IpProto,
    },
}

impl Punt {
    pub fn type_tag(&self) -> u32 {
        match self {
            Punt::Exception { .. } => PUNT_API_TYPE_EXCEPTION,
            Punt::L4 { .. } => PUNT_API_TYPE_L4,
            Punt::IpProto { .. } => PUNT_API_TYPE_IP_PROTO,
        }
    }

    pub fn encode(&self, enc: &mut Encoder, dialect: Dialect) -> BinapiResult<()> {
        enc.u32(self.type_tag());
        let start = enc.len();
        match self {
            Punt::Exception { id } => {
                enc.u32(*id);
            }
            Punt::L4 { af, protocol, port } => {
                enc.enum_field(*af as u32, dialect)?
                    .enum_field(*protocol as u32, dialect)?
                    .u16(*port);
            }
            Punt::IpProto { af, protocol } => {
                enc.enum_field(*af as u32, dialect)?
                    .enum_field(*protocol as u32, dialect)?;
            }
        }
        let used = enc.len() - start;
        enc.zeros(dialect.punt_union_len().saturating_sub(used));
        Ok(())
    }

    pub fn decode(dec: &mut Decoder<'_>, dialect: Dialect) -> BinapiResult<Self> {
        let tag = dec.u32()?;
        let union = dec.bytes(dialect.punt_union_len())?;
        let mut inner = Decoder::new("punt_union", union);
        let family = |raw: u32| {
            AddressFamily::from_raw(raw)
                .ok_or_else(|| BinapiError::decode("punt_union", format!("unknown address family {}", raw)))
        };
        let proto = |raw: u32| {
            IpProto::from_raw(raw)
                .ok_or_else(|| BinapiError::decode("punt_union", format!("unknown IP protocol {}", raw)))
        };
        match tag {
            PUNT_API_TYPE_EXCEPTION => Ok(Punt::Exception { id: inner.u32()? }),
            PUNT_API_TYPE_L4 => Ok(Punt::L4 {
                af: family(inner.enum_field(dialect)?)?,
                protocol: proto(inner.enum_field(dialect)?)?,
                port: inner.u16()?,
            }),
            PUNT_API_TYPE_IP_PROTO => Ok(Punt::IpProto {
                af: family(inner.enum_field(dialect)?)?,
                protocol: proto(inner.enum_field(dialect)?)?,
            }),
            other => Err(BinapiError::decode("punt", format!("unknown punt type {}", other))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PuntSocketRegister {
    pub header_version: u32,
    pub punt: Punt,
    pub pathname: String,
}

impl Message for PuntSocketRegister {
    const NAME: &'static str = "punt_socket_register";

    fn encode(&self, enc: &mut Encoder, dialect: Dialect) -> BinapiResult<()> {
        enc.u32(self.header_version);
        self.punt.encode(enc, dialect)?;
        enc.fixed_str(&self.pathname, PATHNAME_LEN)?;
        Ok(())
    }

    fn decode(dec: &mut Decoder<'_>, dialect: Dialect) -> BinapiResult<Self> {
        Ok(Self {
            header_version: dec.u32()?,
            punt: Punt::decode(dec, dialect)?,
            pathname: dec.fixed_str(PATHNAME_LEN)?,
        })
    }
}

impl Request for PuntSocketRegister {
    type Reply = PuntSocketRegisterReply;
}

/// `pathname` is the dataplane's own punt socket, from its startup config.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PuntSocketRegisterReply {
    pub retval: i32,
    pub pathname: String,
}

impl Message for PuntSocketRegisterReply {
    const NAME: &'static str = "punt_socket_register_reply";

    fn encode(&self, enc: &mut Encoder, _dialect: Dialect) -> BinapiResult<()> {
        enc.i32(self.retval).fixed_str(&self.pathname, REPLY_PATHNAME_LEN)?;
        Ok(())
    }

    fn decode(dec: &mut Decoder<'_>, _dialect: Dialect) -> BinapiResult<Self> {
        Ok(Self {
            retval: dec.i32()?,
            pathname: dec.fixed_str(REPLY_PATHNAME_LEN)?,
        })
    }
}

impl Reply for PuntSocketRegisterReply {
    fn retval(&self) -> i32 {
        self.retval
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PuntSocketDeregister {
    pub punt: Punt,
}

impl Message for PuntSocketDeregister {
    const NAME: &'static str = "punt_socket_deregister";

    fn encode(&self, enc: &mut Encoder, dialect: Dialect) -> BinapiResult<()> {
        self.punt.encode(enc, dialect)
    }

    fn decode(dec: &mut Decoder<'_>, dialect: Dialect) -> BinapiResult<Self> {
        Ok(Self {
            punt: Punt::decode(dec, dialect)?,
        })
    }
}

impl Request for PuntSocketDeregister {
    type Reply = PuntSocketDeregisterReply;
}

retval_reply!(PuntSocketDeregisterReply, "punt_socket_deregister_reply");

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PuntSocketDump {
    pub punt_type: u32,
}

impl Message for PuntSocketDump {
    const NAME: &'static str = "punt_socket_dump";

    fn encode(&self, enc: &mut Encoder, _dialect: Dialect) -> BinapiResult<()> {
        enc.u32(self.punt_type);
        Ok(())
    }

    fn decode(dec: &mut Decoder<'_>, _dialect: Dialect) -> BinapiResult<Self> {
        Ok(Self {
            punt_type: dec.u32()?,
        })
    }
}

impl Dump for PuntSocketDump {
    type Details = PuntSocketDetails;
}

/// `pathname` is the client socket packets are punted to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PuntSocketDetails {
    pub punt: Punt,
    pub pathname: String,
}

impl Message for PuntSocketDetails {
    const NAME: &'static str = "punt_socket_details";

    fn encode(&self, enc: &mut Encoder, dialect: Dialect) -> BinapiResult<()> {
        self.punt.encode(enc, dialect)?;
        enc.fixed_str(&self.pathname, PATHNAME_LEN)?;
        Ok(())
    }

    fn decode(dec: &mut Decoder<'_>, dialect: Dialect) -> BinapiResult<Self> {
        Ok(Self {
            punt: Punt::decode(dec, dialect)?,
            pathname: dec.fixed_str(PATHNAME_LEN)?,
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PuntReason {
    pub id: u32,
    pub name: String,
}

impl PuntReason {
    fn encode(&self, enc: &mut Encoder) {
        enc.u32(self.id).var_str(&self.name);
    }

    fn decode(dec: &mut Decoder<'_>) -> BinapiResult<Self> {
        Ok(Self {
            id: dec.u32()?,
            name: dec.var_str()?,
        })
    }
}

/// Dumps punt reasons; an empty name dumps all of them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PuntReasonDump {
    pub reason: PuntReason,
}

impl Message for PuntReasonDump {
    const NAME: &'static str = "punt_reason_dump";

    fn encode(&self, enc: &mut Encoder, _dialect: Dialect) -> BinapiResult<()> {
        self.reason.encode(enc);
        Ok(())
    }

    fn decode(dec: &mut Decoder<'_>, _dialect: Dialect) -> BinapiResult<Self> {
        Ok(Self {
            reason: PuntReason::decode(dec)?,
        })
    }
}

impl Dump for PuntReasonDump {
    type Details = PuntReasonDetails;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PuntReasonDetails {
    pub reason: PuntReason,
}

impl Message for PuntReasonDetails {
    const NAME: &'static str = "punt_reason_details";

    fn encode(&self, enc: &mut Encoder, _dialect: Dialect) -> BinapiResult<()> {
        self.reason.encode(enc);
        Ok(())
    }

    fn decode(dec: &mut Decoder<'_>, _dialect: Dialect) -> BinapiResult<Self> {
        Ok(Self {
            reason: PuntReason::decode(dec)?,
        })
    }
}

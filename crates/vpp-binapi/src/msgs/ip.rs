//! IP module: punt redirects.

use std::net::IpAddr;

use crate::codec::{retval_reply, Decoder, Dump, Encoder, Message, Request};
use crate::dialect::Dialect;
use crate::error::BinapiResult;
use crate::types::InterfaceIndex;

/// Traffic punted on `rx_sw_if_index` (`INVALID` = any interface) is sent
/// out of `tx_sw_if_index` towards `nh`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PuntRedirect {
    pub rx_sw_if_index: InterfaceIndex,
    pub tx_sw_if_index: InterfaceIndex,
    pub nh: IpAddr,
}

impl PuntRedirect {
    fn encode(&self, enc: &mut Encoder, dialect: Dialect) -> BinapiResult<()> {
        enc.u32(self.rx_sw_if_index.0)
            .u32(self.tx_sw_if_index.0)
            .address(&self.nh, dialect)?;
        Ok(())
    }

    fn decode(dec: &mut Decoder<'_>, dialect: Dialect) -> BinapiResult<Self> {
        Ok(Self {
            rx_sw_if_index: InterfaceIndex(dec.u32()?),
            tx_sw_if_index: InterfaceIndex(dec.u32()?),
            nh: dec.address(dialect)?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IpPuntRedirect {
    pub punt: PuntRedirect,
    pub is_add: bool,
}

impl Message for IpPuntRedirect {
    const NAME: &'static str = "ip_punt_redirect";

    fn encode(&self, enc: &mut Encoder, dialect: Dialect) -> BinapiResult<()> {
        self.punt.encode(enc, dialect)?;
        enc.bool(self.is_add);
        Ok(())
    }

    fn decode(dec: &mut Decoder<'_>, dialect: Dialect) -> BinapiResult<Self> {
        Ok(Self {
            punt: PuntRedirect::decode(dec, dialect)?,
            is_add: dec.bool()?,
        })
    }
}

impl Request for IpPuntRedirect {
    type Reply = IpPuntRedirectReply;
}

retval_reply!(IpPuntRedirectReply, "ip_punt_redirect_reply");

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IpPuntRedirectDump {
    pub sw_if_index: InterfaceIndex,
    pub is_ipv6: bool,
}

impl Message for IpPuntRedirectDump {
    const NAME: &'static str = "ip_punt_redirect_dump";

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

impl Dump for IpPuntRedirectDump {
    type Details = IpPuntRedirectDetails;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IpPuntRedirectDetails {
    pub punt: PuntRedirect,
}

impl Message for IpPuntRedirectDetails {
    const NAME: &'static str = "ip_punt_redirect_details";

    fn encode(&self, enc: &mut Encoder, dialect: Dialect) -> BinapiResult<()> {
        self.punt.encode(enc, dialect)
    }

    fn decode(dec: &mut Decoder<'_>, dialect: Dialect) -> BinapiResult<Self> {
        Ok(Self {
            punt: PuntRedirect::decode(dec, dialect)?,
        })
    }
}

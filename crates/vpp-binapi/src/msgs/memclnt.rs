//! Connection bootstrap and the control ping used to terminate dumps.

use crate::codec::{Decoder, Encoder, Message, Reply, Request};
use crate::dialect::Dialect;
use crate::error::BinapiResult;

/// Message ids fixed by the socket protocol; everything else is learned from
/// the message table returned by `sockclnt_create_reply`.
pub const SOCKCLNT_CREATE_ID: u16 = 15;
pub const SOCKCLNT_CREATE_REPLY_ID: u16 = 16;

const NAME_LEN: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SockclntCreate {
    pub name: String,
}

impl Message for SockclntCreate {
    const NAME: &'static str = "sockclnt_create";

    fn encode(&self, enc: &mut Encoder, _dialect: Dialect) -> BinapiResult<()> {
        enc.fixed_str(&self.name, NAME_LEN)?;
        Ok(())
    }

    fn decode(dec: &mut Decoder<'_>, _dialect: Dialect) -> BinapiResult<Self> {
        Ok(Self {
            name: dec.fixed_str(NAME_LEN)?,
        })
    }
}

impl Request for SockclntCreate {
    type Reply = SockclntCreateReply;
}

/// One `{name}_{crc}` → message id mapping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageTableEntry {
    pub index: u16,
    pub name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SockclntCreateReply {
    pub response: i32,
    pub index: u32,
    pub message_table: Vec<MessageTableEntry>,
}

impl Message for SockclntCreateReply {
    const NAME: &'static str = "sockclnt_create_reply";

    fn encode(&self, enc: &mut Encoder, _dialect: Dialect) -> BinapiResult<()> {
        enc.i32(self.response)
            .u32(self.index)
            .u16(self.message_table.len() as u16);
        for entry in &self.message_table {
            enc.u16(entry.index).fixed_str(&entry.name, NAME_LEN)?;
        }
        Ok(())
    }

    fn decode(dec: &mut Decoder<'_>, _dialect: Dialect) -> BinapiResult<Self> {
        let response = dec.i32()?;
        let index = dec.u32()?;
        let count = dec.u16()?;
        let mut message_table = Vec::with_capacity(count as usize);
        for _ in 0..count {
            message_table.push(MessageTableEntry {
                index: dec.u16()?,
                name: dec.fixed_str(NAME_LEN)?,
            });
        }
        Ok(Self {
            response,
            index,
            message_table,
        })
    }
}

impl Reply for SockclntCreateReply {
    fn retval(&self) -> i32 {
        self.response
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ControlPing;

impl Message for ControlPing {
    const NAME: &'static str = "control_ping";

    fn encode(&self, _enc: &mut Encoder, _dialect: Dialect) -> BinapiResult<()> {
        Ok(())
    }

    fn decode(_dec: &mut Decoder<'_>, _dialect: Dialect) -> BinapiResult<Self> {
        Ok(ControlPing)
    }
}

impl Request for ControlPing {
    type Reply = ControlPingReply;
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ControlPingReply {
    pub retval: i32,
    pub client_index: u32,
    pub vpe_pid: u32,
}

impl Message for ControlPingReply {
    const NAME: &'static str = "control_ping_reply";

    fn encode(&self, enc: &mut Encoder, _dialect: Dialect) -> BinapiResult<()> {
        enc.i32(self.retval).u32(self.client_index).u32(self.vpe_pid);
        Ok(())
    }

    fn decode(dec: &mut Decoder<'_>, _dialect: Dialect) -> BinapiResult<Self> {
        Ok(Self {
            retval: dec.i32()?,
            client_index: dec.u32()?,
            vpe_pid: dec.u32()?,
        })
    }
}

impl Reply for ControlPingReply {
    fn retval(&self) -> i32 {
        self.retval
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::decode_body;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_message_table_roundtrip() {
        let reply = SockclntCreateReply {
            response: 0,
            index: 3,
            message_table: vec![
                MessageTableEntry {
                    index: 16,
                    name: "control_ping_51077d14".into(),
                },
                MessageTableEntry {
                    index: 17,
                    name: "control_ping_reply_f6b0b8ca".into(),
                },
            ],
        };
        let mut enc = Encoder::new(SockclntCreateReply::NAME);
        reply.encode(&mut enc, Dialect::Vpp2001).unwrap();
        assert_eq!(enc.len(), 4 + 4 + 2 + 2 * (2 + 64));
        let decoded: SockclntCreateReply =
            decode_body(&enc.into_bytes(), Dialect::Vpp2001).unwrap();
        assert_eq!(decoded, reply);
    }
}

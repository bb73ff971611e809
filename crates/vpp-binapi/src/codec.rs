//! Big-endian wire codec and the message traits.
//!
//! Frame layout:
//!
//! ```text
//! request: msg_id u16 | client_index u32 | context u32 | body
//! reply:   msg_id u16 | context u32      | body
//! ```
//!
//! Strings are fixed-size NUL-padded byte arrays unless noted otherwise;
//! addresses are `{af, un[16]}` with a dialect-dependent family width.

use std::io::Cursor;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use byteorder::{BigEndian, ByteOrder, ReadBytesExt};

use crate::dialect::Dialect;
use crate::error::{BinapiError, BinapiResult};
use crate::types::{AddressFamily, IpPrefix};

pub const REQUEST_HEADER_LEN: usize = 10;
pub const REPLY_HEADER_LEN: usize = 6;

/// A binary API message.
///
/// Both directions are implemented for every message so that the client and
/// the in-process simulator share one definition.
pub trait Message: Sized + Send + 'static {
    const NAME: &'static str;

    fn encode(&self, enc: &mut Encoder, dialect: Dialect) -> BinapiResult<()>;

    fn decode(dec: &mut Decoder<'_>, dialect: Dialect) -> BinapiResult<Self>;
}

/// A request answered by exactly one reply.
pub trait Request: Message {
    type Reply: Reply;
}

/// A reply carrying a `retval`.
pub trait Reply: Message {
    fn retval(&self) -> i32;
}

/// A request answered by a stream of details messages.
pub trait Dump: Message {
    type Details: Message;
}

/// Serializes message fields into a growing buffer.
pub struct Encoder {
    message: &'static str,
    buf: Vec<u8>,
}

impl Encoder {
    pub fn new(message: &'static str) -> Self {
        Self {
            message,
            buf: Vec::with_capacity(64),
        }
    }

    pub fn u8(&mut self, v: u8) -> &mut Self {
        self.buf.push(v);
        self
    }

    pub fn bool(&mut self, v: bool) -> &mut Self {
        self.u8(u8::from(v))
    }

    pub fn u16(&mut self, v: u16) -> &mut Self {
        let mut b = [0u8; 2];
        BigEndian::write_u16(&mut b, v);
        self.bytes(&b)
    }

    pub fn u32(&mut self, v: u32) -> &mut Self {
        let mut b = [0u8; 4];
        BigEndian::write_u32(&mut b, v);
        self.bytes(&b)
    }

    pub fn i32(&mut self, v: i32) -> &mut Self {
        let mut b = [0u8; 4];
        BigEndian::write_i32(&mut b, v);
        self.bytes(&b)
    }

    pub fn bytes(&mut self, b: &[u8]) -> &mut Self {
        self.buf.extend_from_slice(b);
        self
    }

    pub fn zeros(&mut self, n: usize) -> &mut Self {
        self.buf.resize(self.buf.len() + n, 0);
        self
    }

    /// Fixed-size NUL-padded string; at least one NUL must fit.
    pub fn fixed_str(&mut self, s: &str, len: usize) -> BinapiResult<&mut Self> {
        if s.len() >= len {
            return Err(BinapiError::encode(
                self.message,
                format!("string {:?} does not fit in {} bytes", s, len),
            ));
        }
        self.bytes(s.as_bytes());
        Ok(self.zeros(len - s.len()))
    }

    /// Length-prefixed string (`u32` length).
    pub fn var_str(&mut self, s: &str) -> &mut Self {
        self.u32(s.len() as u32);
        self.bytes(s.as_bytes())
    }

    /// Enum field whose width depends on the dialect.
    pub fn enum_field(&mut self, v: u32, dialect: Dialect) -> BinapiResult<&mut Self> {
        if dialect.wide_enums() {
            return Ok(self.u32(v));
        }
        let narrow = u8::try_from(v)
            .map_err(|_| BinapiError::encode(self.message, format!("enum value {} exceeds u8", v)))?;
        Ok(self.u8(narrow))
    }

    pub fn address(&mut self, addr: &IpAddr, dialect: Dialect) -> BinapiResult<&mut Self> {
        self.enum_field(AddressFamily::of(addr) as u32, dialect)?;
        match addr {
            IpAddr::V4(v4) => {
                self.bytes(&v4.octets());
                Ok(self.zeros(12))
            }
            IpAddr::V6(v6) => Ok(self.bytes(&v6.octets())),
        }
    }

    pub fn prefix(&mut self, prefix: &IpPrefix, dialect: Dialect) -> BinapiResult<&mut Self> {
        self.address(&prefix.address, dialect)?;
        Ok(self.u8(prefix.len))
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }
}

/// Reads message fields from a received body.
pub struct Decoder<'a> {
    message: &'static str,
    cursor: Cursor<&'a [u8]>,
}

impl<'a> Decoder<'a> {
    pub fn new(message: &'static str, body: &'a [u8]) -> Self {
        Self {
            message,
            cursor: Cursor::new(body),
        }
    }

    fn short(&self, err: std::io::Error) -> BinapiError {
        BinapiError::decode(self.message, err)
    }

    pub fn u8(&mut self) -> BinapiResult<u8> {
        self.cursor.read_u8().map_err(|e| self.short(e))
    }

    pub fn bool(&mut self) -> BinapiResult<bool> {
        Ok(self.u8()? != 0)
    }

    pub fn u16(&mut self) -> BinapiResult<u16> {
        self.cursor.read_u16::<BigEndian>().map_err(|e| self.short(e))
    }

    pub fn u32(&mut self) -> BinapiResult<u32> {
        self.cursor.read_u32::<BigEndian>().map_err(|e| self.short(e))
    }

    pub fn i32(&mut self) -> BinapiResult<i32> {
        self.cursor.read_i32::<BigEndian>().map_err(|e| self.short(e))
    }

    pub fn bytes(&mut self, n: usize) -> BinapiResult<&'a [u8]> {
        let start = self.cursor.position() as usize;
        let data: &'a [u8] = *self.cursor.get_ref();
        let end = start
            .checked_add(n)
            .filter(|end| *end <= data.len())
            .ok_or_else(|| {
                BinapiError::decode(self.message, format!("need {} bytes at offset {}", n, start))
            })?;
        self.cursor.set_position(end as u64);
        Ok(&data[start..end])
    }

    pub fn array<const N: usize>(&mut self) -> BinapiResult<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.bytes(N)?);
        Ok(out)
    }

    pub fn skip(&mut self, n: usize) -> BinapiResult<()> {
        self.bytes(n).map(|_| ())
    }

    /// Fixed-size string, cut at the first NUL.
    pub fn fixed_str(&mut self, len: usize) -> BinapiResult<String> {
        let raw = self.bytes(len)?;
        let end = raw.iter().position(|b| *b == 0).unwrap_or(raw.len());
        Ok(String::from_utf8_lossy(&raw[..end]).into_owned())
    }

    pub fn var_str(&mut self) -> BinapiResult<String> {
        let len = self.u32()? as usize;
        let raw = self.bytes(len)?;
        Ok(String::from_utf8_lossy(raw).into_owned())
    }

    pub fn enum_field(&mut self, dialect: Dialect) -> BinapiResult<u32> {
        if dialect.wide_enums() {
            self.u32()
        } else {
            self.u8().map(u32::from)
        }
    }

    pub fn address(&mut self, dialect: Dialect) -> BinapiResult<IpAddr> {
        let raw = self.enum_field(dialect)?;
        let family = AddressFamily::from_raw(raw).ok_or_else(|| {
            BinapiError::decode(self.message, format!("unknown address family {}", raw))
        })?;
        let un: [u8; 16] = self.array()?;
        Ok(match family {
            AddressFamily::Ip4 => IpAddr::V4(Ipv4Addr::new(un[0], un[1], un[2], un[3])),
            AddressFamily::Ip6 => IpAddr::V6(Ipv6Addr::from(un)),
        })
    }

    pub fn prefix(&mut self, dialect: Dialect) -> BinapiResult<IpPrefix> {
        let address = self.address(dialect)?;
        let len = self.u8()?;
        IpPrefix::new(address, len).map_err(|e| BinapiError::decode(self.message, e))
    }

    pub fn remaining(&self) -> usize {
        self.cursor.get_ref().len() - self.cursor.position() as usize
    }
}

/// Header of a client → dataplane frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestHeader {
    pub msg_id: u16,
    pub client_index: u32,
    pub context: u32,
}

/// Header of a dataplane → client frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReplyHeader {
    pub msg_id: u16,
    pub context: u32,
}

pub fn encode_request<M: Message>(
    header: RequestHeader,
    msg: &M,
    dialect: Dialect,
) -> BinapiResult<Vec<u8>> {
    let mut enc = Encoder::new(M::NAME);
    enc.u16(header.msg_id)
        .u32(header.client_index)
        .u32(header.context);
    msg.encode(&mut enc, dialect)?;
    Ok(enc.into_bytes())
}

pub fn encode_reply<M: Message>(header: ReplyHeader, msg: &M, dialect: Dialect) -> BinapiResult<Vec<u8>> {
    let mut enc = Encoder::new(M::NAME);
    enc.u16(header.msg_id).u32(header.context);
    msg.encode(&mut enc, dialect)?;
    Ok(enc.into_bytes())
}

pub fn decode_request_header(frame: &[u8]) -> BinapiResult<(RequestHeader, &[u8])> {
    if frame.len() < REQUEST_HEADER_LEN {
        return Err(BinapiError::decode("request header", format!("frame of {} bytes", frame.len())));
    }
    let header = RequestHeader {
        msg_id: BigEndian::read_u16(&frame[0..2]),
        client_index: BigEndian::read_u32(&frame[2..6]),
        context: BigEndian::read_u32(&frame[6..10]),
    };
    Ok((header, &frame[REQUEST_HEADER_LEN..]))
}

pub fn decode_reply_header(frame: &[u8]) -> BinapiResult<(ReplyHeader, &[u8])> {
    if frame.len() < REPLY_HEADER_LEN {
        return Err(BinapiError::decode("reply header", format!("frame of {} bytes", frame.len())));
    }
    let header = ReplyHeader {
        msg_id: BigEndian::read_u16(&frame[0..2]),
        context: BigEndian::read_u32(&frame[2..6]),
    };
    Ok((header, &frame[REPLY_HEADER_LEN..]))
}

/// Decodes a message body (the frame without its header).
pub fn decode_body<M: Message>(body: &[u8], dialect: Dialect) -> BinapiResult<M> {
    let mut dec = Decoder::new(M::NAME, body);
    M::decode(&mut dec, dialect)
}

/// Defines a reply whose body is only `retval i32`.
macro_rules! retval_reply {
    ($(#[$meta:meta])* $ty:ident, $name:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Default, PartialEq, Eq)]
        pub struct $ty {
            pub retval: i32,
        }

        impl $crate::codec::Message for $ty {
            const NAME: &'static str = $name;

            fn encode(
                &self,
                enc: &mut $crate::codec::Encoder,
                _dialect: $crate::dialect::Dialect,
            ) -> $crate::error::BinapiResult<()> {
                enc.i32(self.retval);
                Ok(())
            }

            fn decode(
                dec: &mut $crate::codec::Decoder<'_>,
                _dialect: $crate::dialect::Dialect,
            ) -> $crate::error::BinapiResult<Self> {
                Ok(Self { retval: dec.i32()? })
            }
        }

        impl $crate::codec::Reply for $ty {
            fn retval(&self) -> i32 {
                self.retval
            }
        }
    };
}

pub(crate) use retval_reply;

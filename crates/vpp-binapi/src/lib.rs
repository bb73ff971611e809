//! Binary API access to the VPP dataplane.
//!
//! This crate provides:
//! - The big-endian wire codec and the message definitions of the modules
//!   the agent uses (memclnt, interface, ip, punt)
//! - [`Connection`]: `sockclnt_create` handshake, message table and a reader
//!   task routing replies by context
//! - [`ApiChannel`]: request/reply and dump calls with timeouts
//! - [`HandlerRegistry`]: per-module handler versions, checked against the
//!   peer's message table and resolved once per connection
//! - [`vppcalls`]: the interface and punt handlers
//! - [`sim::SimVpp`]: an in-process dataplane speaking the same wire format
//!
//! # Dialects
//!
//! Two dataplane releases are supported, `vpp1908` and `vpp2001`. They differ
//! in message CRCs, enum widths and the size of the punt union; see
//! [`Dialect`].

pub mod channel;
pub mod codec;
pub mod dialect;
pub mod error;
pub mod msgs;
pub mod sim;
pub mod transport;
pub mod types;
pub mod version;
pub mod vppcalls;

pub use channel::{ApiChannel, Connection};
pub use dialect::Dialect;
pub use error::{BinapiError, BinapiResult, VppRetval};
pub use transport::{Transport, UnixTransport};
pub use types::{AddressFamily, InterfaceIndex, IpPrefix, IpProto, MacAddress, ParseError};
pub use version::{HandlerRegistry, HandlerVersion, Resolved, ResolvedHandler};

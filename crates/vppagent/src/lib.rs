//! VPP configuration agent.
//!
//! Drives a VPP dataplane into the state described by a desired-state file.
//! The descriptors here plug the interface and punt families into the
//! reconciliation scheduler of `vpp-scheduler`; their handlers come from
//! `vpp-binapi`, resolved against the connected VPP release.
//!
//! - [`interfaces`]: loopback interfaces and their derived addresses
//! - [`punt`]: punt-to-host sockets, punt exceptions and IP punt redirects
//! - [`northbound`]: the YAML desired-state file
//! - [`daemon`]: connection, descriptor registration and the resync loop
//! - [`audit`]: structured audit records for transactions and lifecycle events
//!
//! # Key layout
//!
//! | Item | Key |
//! |---|---|
//! | interface | `config/vpp/v2/interfaces/{name}` |
//! | interface address (derived) | `vpp/interface/{name}/address/{ip}/{len}` |
//! | punt to host | `config/vpp/v2/punt/tohost/l3/{l3}/l4/{l4}/port/{port}` |
//! | punt exception | `config/vpp/v2/punt/exception/{reason}` |
//! | IP punt redirect | `config/vpp/v2/punt/ip-redirect/l3/{l3}/tx/{tx}` |

pub mod audit;
pub mod config;
pub mod daemon;
pub mod error;
pub mod interfaces;
pub mod logging;
pub mod northbound;
pub mod punt;

pub use audit::{AuditCategory, AuditOutcome, AuditRecord};
pub use config::AgentConfig;
pub use daemon::{build_scheduler, Agent};
pub use error::{AgentError, Result};
pub use northbound::DesiredState;

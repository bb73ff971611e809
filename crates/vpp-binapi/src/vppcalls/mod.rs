//! Per-module call wrappers.
//!
//! Each module exposes one handler trait, one generic implementation over an
//! [`ApiChannel`](crate::channel::ApiChannel) and a [`HandlerRegistry`]
//! listing the dataplane releases it supports. Descriptors only ever see the
//! trait object picked by the registry.
//!
//! [`HandlerRegistry`]: crate::version::HandlerRegistry

pub mod interfaces;
pub mod punt;

pub use interfaces::{interface_handlers, InterfaceDetails, InterfaceHandler, InterfaceVppApi};
pub use punt::{
    punt_handlers, L3Protocol, L4Protocol, PuntHandler, PuntReasonEntry, PuntRedirectEntry,
    PuntSocketEntry, PuntVppApi,
};

//! Punt descriptors: to-host sockets, exceptions and IP redirects.

pub mod exception;
pub mod ip_redirect;
pub mod to_host;
pub mod types;

pub use exception::{PuntExceptionDescriptor, EXCEPTION_DESCRIPTOR};
pub use ip_redirect::{IpRedirectDescriptor, RedirectMeta, IP_REDIRECT_DESCRIPTOR};
pub use to_host::{PuntToHostDescriptor, TO_HOST_DESCRIPTOR};
pub use types::{
    Exception, IpRedirect, L3Protocol, L4Protocol, PuntSocketMeta, ToHost, EXCEPTION_PREFIX,
    IP_REDIRECT_PREFIX, TO_HOST_PREFIX, UNKNOWN_PATH_MARK,
};

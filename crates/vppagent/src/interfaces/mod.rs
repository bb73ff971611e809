//! Interface descriptors: loopbacks and their addresses.

pub mod address;
pub mod descriptor;
pub mod types;

pub use address::{InterfaceAddressDescriptor, ADDRESS_DESCRIPTOR};
pub use descriptor::{new_interface_index, InterfaceDescriptor, InterfaceIndexMap, INTERFACE_DESCRIPTOR};
pub use types::{
    address_key, interface_key, parse_address_key, Interface, InterfaceAddress, InterfaceKind,
    InterfaceMeta, ADDRESS_PREFIX, INTERFACE_PREFIX,
};

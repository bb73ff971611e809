//! Descriptor for VPP interfaces.
//!
//! Interfaces are created as loopbacks and tagged with their configured
//! name, which is how a later dump tells agent-created interfaces from
//! everything else. The sw_if_index returned on create is the metadata and
//! is published through the name→handle index the address and punt
//! descriptors resolve interfaces with.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;
use vpp_binapi::vppcalls::InterfaceVppApi;
use vpp_binapi::{IpPrefix, MacAddress};
use vpp_scheduler::{
    Descriptor, DescriptorError, KeyValuePair, MetadataIndex, Origin, RetrieveSource,
    RetrievedItem,
};

use super::types::*;
use crate::error::{dp_err, is_bad_handle, is_gone};

pub const INTERFACE_DESCRIPTOR: &str = "vpp-interface";

/// Index of configured interfaces keyed by name.
pub type InterfaceIndexMap = MetadataIndex<InterfaceMeta>;

/// Creates the shared index other descriptors resolve interfaces through.
pub fn new_interface_index() -> Arc<InterfaceIndexMap> {
    Arc::new(MetadataIndex::with_handles("vpp-interface-index", InterfaceMeta::handle))
}

pub struct InterfaceDescriptor {
    handler: Arc<dyn InterfaceVppApi>,
    index: Arc<InterfaceIndexMap>,
}

impl InterfaceDescriptor {
    pub fn new(handler: Arc<dyn InterfaceVppApi>, index: Arc<InterfaceIndexMap>) -> Self {
        Self { handler, index }
    }
}

fn mac_changed(old: &Interface, new: &Interface) -> bool {
    match new.mac() {
        None => false,
        Some(mac) => old.mac() != Some(mac),
    }
}

#[async_trait]
impl Descriptor for InterfaceDescriptor {
    type Value = Interface;
    type Metadata = InterfaceMeta;

    fn name(&self) -> &str {
        INTERFACE_DESCRIPTOR
    }

    fn key_prefix(&self) -> &str {
        INTERFACE_PREFIX
    }

    fn is_key_valid(&self, key: &str) -> bool {
        key.strip_prefix(INTERFACE_PREFIX)
            .map_or(false, |name| !name.is_empty() && !name.contains('/'))
    }

    fn value_type_name(&self) -> &str {
        "vpp.interfaces.Interface"
    }

    fn validate(&self, key: &str, value: &Interface) -> Result<(), DescriptorError> {
        if value.name.is_empty() {
            return Err(DescriptorError::invalid(key, "interface defined without name"));
        }
        if value.name.len() > MAX_NAME_LEN {
            return Err(DescriptorError::invalid(
                key,
                format!("interface name longer than {} bytes", MAX_NAME_LEN),
            ));
        }
        if interface_key(&value.name) != key {
            return Err(DescriptorError::invalid(
                key,
                format!("interface name {:?} does not match the key", value.name),
            ));
        }
        if value.kind == InterfaceKind::Local {
            return Err(DescriptorError::invalid(
                key,
                "interface type local is reserved for local0",
            ));
        }
        if let Some(mac) = &value.phys_address {
            mac.parse::<MacAddress>()
                .map_err(|e| DescriptorError::invalid(key, e.to_string()))?;
        }
        for address in &value.ip_addresses {
            address
                .parse::<IpPrefix>()
                .map_err(|e| DescriptorError::invalid(key, e.to_string()))?;
        }
        Ok(())
    }

    async fn create(&self, _key: &str, value: &Interface) -> Result<InterfaceMeta, DescriptorError> {
        let sw_if_index = self.handler.add_loopback(value.mac()).await.map_err(dp_err)?;
        self.handler
            .set_interface_tag(sw_if_index, &value.name)
            .await
            .map_err(dp_err)?;
        if value.enabled {
            self.handler
                .set_admin_state(sw_if_index, true)
                .await
                .map_err(dp_err)?;
        }
        debug!(name = %value.name, %sw_if_index, "interface created");
        Ok(InterfaceMeta { sw_if_index })
    }

    async fn delete(
        &self,
        key: &str,
        value: &Interface,
        metadata: Option<&InterfaceMeta>,
    ) -> Result<(), DescriptorError> {
        let Some(meta) = metadata else {
            return Err(DescriptorError::terminal(format!(
                "no sw_if_index known for interface {}",
                value.name
            )));
        };
        match self.handler.delete_loopback(meta.sw_if_index).await {
            Err(err) if is_gone(&err) => {
                debug!(key, error = %err, "interface already gone");
                Ok(())
            }
            Err(err) if is_bad_handle(&err) => {
                let present = self
                    .handler
                    .dump_interfaces()
                    .await
                    .map_err(dp_err)?
                    .iter()
                    .any(|d| d.sw_if_index == meta.sw_if_index);
                if present {
                    return Err(dp_err(err));
                }
                debug!(key, sw_if_index = %meta.sw_if_index, "interface already gone");
                Ok(())
            }
            other => other.map_err(dp_err),
        }
    }

    fn supports_update(&self) -> bool {
        true
    }

    async fn update(
        &self,
        _key: &str,
        old: &Interface,
        new: &Interface,
        old_metadata: Option<&InterfaceMeta>,
    ) -> Result<InterfaceMeta, DescriptorError> {
        let meta = *old_metadata.ok_or_else(|| {
            DescriptorError::terminal(format!("no sw_if_index known for interface {}", new.name))
        })?;
        if old.enabled != new.enabled {
            self.handler
                .set_admin_state(meta.sw_if_index, new.enabled)
                .await
                .map_err(dp_err)?;
        }
        Ok(meta)
    }

    fn update_with_recreate(
        &self,
        _key: &str,
        old: &Interface,
        new: &Interface,
        _metadata: Option<&InterfaceMeta>,
    ) -> bool {
        old.kind != new.kind || mac_changed(old, new)
    }

    /// Addresses are separate derived items and the dumped MAC is only
    /// compared when one was requested.
    fn equivalent(&self, _key: &str, old: &Interface, new: &Interface) -> bool {
        old.name == new.name
            && old.kind == new.kind
            && old.enabled == new.enabled
            && !mac_changed(old, new)
    }

    fn derived_values(&self, _key: &str, value: &Interface) -> Vec<KeyValuePair> {
        value
            .ip_addresses
            .iter()
            .filter_map(|a| a.parse::<IpPrefix>().ok())
            .map(|prefix| {
                KeyValuePair::new(
                    address_key(&value.name, &prefix),
                    InterfaceAddress {
                        interface: value.name.clone(),
                        prefix,
                    },
                )
            })
            .collect()
    }

    fn retrieve_source(&self) -> RetrieveSource {
        RetrieveSource::Live
    }

    /// Tagged interfaces were created by the agent; `local0` and untagged
    /// ones belong to someone else.
    async fn retrieve(
        &self,
        _correlate: &[RetrievedItem<Interface, InterfaceMeta>],
    ) -> Result<Vec<RetrievedItem<Interface, InterfaceMeta>>, DescriptorError> {
        let dumped = self.handler.dump_interfaces().await.map_err(dp_err)?;

        let mut retrieved = Vec::with_capacity(dumped.len());
        for details in dumped {
            let (name, kind, origin) = if details.name == LOCAL0 {
                (details.name.clone(), InterfaceKind::Local, Origin::FromSb)
            } else if details.tag.is_empty() {
                (details.name.clone(), InterfaceKind::Loopback, Origin::FromSb)
            } else {
                (details.tag.clone(), InterfaceKind::Loopback, Origin::FromNb)
            };
            if name.is_empty() || name.contains('/') {
                debug!(sw_if_index = %details.sw_if_index, name = %name, "skipping unnamed interface");
                continue;
            }

            let value = Interface {
                name: name.clone(),
                kind,
                enabled: details.admin_up,
                phys_address: Some(details.mac.to_string()),
                ip_addresses: details.addresses.iter().map(|a| a.to_string()).collect(),
            };
            retrieved.push(
                RetrievedItem::new(interface_key(&name), value, origin).with_metadata(
                    InterfaceMeta {
                        sw_if_index: details.sw_if_index,
                    },
                ),
            );
        }
        Ok(retrieved)
    }

    fn metadata_index(&self) -> Option<Arc<InterfaceIndexMap>> {
        Some(self.index.clone())
    }
}

//! Descriptor for interface addresses, derived from interface values.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;
use vpp_binapi::vppcalls::InterfaceVppApi;
use vpp_scheduler::{Dependency, Descriptor, DescriptorError, Origin, RetrieveSource, RetrievedItem};

use super::descriptor::{InterfaceIndexMap, INTERFACE_DESCRIPTOR};
use super::types::*;
use crate::error::{dp_err, is_gone};

pub const ADDRESS_DESCRIPTOR: &str = "vpp-interface-address";

pub struct InterfaceAddressDescriptor {
    handler: Arc<dyn InterfaceVppApi>,
    if_index: Arc<InterfaceIndexMap>,
}

impl InterfaceAddressDescriptor {
    pub fn new(handler: Arc<dyn InterfaceVppApi>, if_index: Arc<InterfaceIndexMap>) -> Self {
        Self { handler, if_index }
    }

    fn lookup(&self, interface: &str) -> Result<InterfaceMeta, DescriptorError> {
        self.if_index.lookup_by_name(interface).ok_or_else(|| {
            DescriptorError::terminal(format!("index not found for interface {}", interface))
        })
    }
}

#[async_trait]
impl Descriptor for InterfaceAddressDescriptor {
    type Value = InterfaceAddress;
    type Metadata = ();

    fn name(&self) -> &str {
        ADDRESS_DESCRIPTOR
    }

    fn key_prefix(&self) -> &str {
        ADDRESS_PREFIX
    }

    fn is_key_valid(&self, key: &str) -> bool {
        parse_address_key(key).is_some()
    }

    fn value_type_name(&self) -> &str {
        "vpp.interfaces.InterfaceAddress"
    }

    async fn create(&self, _key: &str, value: &InterfaceAddress) -> Result<(), DescriptorError> {
        let meta = self.lookup(&value.interface)?;
        self.handler
            .add_address(meta.sw_if_index, &value.prefix)
            .await
            .map_err(dp_err)
    }

    async fn delete(
        &self,
        key: &str,
        value: &InterfaceAddress,
        _metadata: Option<&()>,
    ) -> Result<(), DescriptorError> {
        let Some(meta) = self.if_index.lookup_by_name(&value.interface) else {
            debug!(key, "interface gone, address removed with it");
            return Ok(());
        };
        match self.handler.del_address(meta.sw_if_index, &value.prefix).await {
            Err(err) if is_gone(&err) => {
                debug!(key, error = %err, "address already gone");
                Ok(())
            }
            other => other.map_err(dp_err),
        }
    }

    fn dependencies(&self, _key: &str, value: &InterfaceAddress) -> Vec<Dependency> {
        vec![Dependency::new("interface", interface_key(&value.interface))]
    }

    fn retrieve_source(&self) -> RetrieveSource {
        RetrieveSource::Live
    }

    fn retrieve_dependencies(&self) -> Vec<String> {
        vec![INTERFACE_DESCRIPTOR.to_string()]
    }

    /// Addresses of interfaces the index knows, named through it.
    async fn retrieve(
        &self,
        _correlate: &[RetrievedItem<InterfaceAddress, ()>],
    ) -> Result<Vec<RetrievedItem<InterfaceAddress, ()>>, DescriptorError> {
        let dumped = self.handler.dump_interfaces().await.map_err(dp_err)?;

        let mut retrieved = Vec::new();
        for details in dumped {
            let Some((name, _)) = self.if_index.lookup_by_handle(details.sw_if_index.0) else {
                continue;
            };
            let origin = if details.tag.is_empty() {
                Origin::FromSb
            } else {
                Origin::FromNb
            };
            for prefix in details.addresses {
                retrieved.push(RetrievedItem::new(
                    address_key(&name, &prefix),
                    InterfaceAddress {
                        interface: name.clone(),
                        prefix,
                    },
                    origin,
                ));
            }
        }
        Ok(retrieved)
    }
}

//! Descriptor for punt exceptions: packets VPP drops for a named reason,
//! punted to a unix socket instead.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;
use vpp_binapi::msgs::punt::Punt;
use vpp_binapi::vppcalls::PuntVppApi;
use vpp_scheduler::{Descriptor, DescriptorError, Origin, RetrieveSource, RetrievedItem};

use super::types::*;
use crate::error::{dp_err, is_gone};

pub const EXCEPTION_DESCRIPTOR: &str = "vpp-punt-exception";

type Item = RetrievedItem<Exception, PuntSocketMeta>;

pub struct PuntExceptionDescriptor {
    handler: Arc<dyn PuntVppApi>,
}

impl PuntExceptionDescriptor {
    pub fn new(handler: Arc<dyn PuntVppApi>) -> Self {
        Self { handler }
    }
}

#[async_trait]
impl Descriptor for PuntExceptionDescriptor {
    type Value = Exception;
    type Metadata = PuntSocketMeta;

    fn name(&self) -> &str {
        EXCEPTION_DESCRIPTOR
    }

    fn key_prefix(&self) -> &str {
        EXCEPTION_PREFIX
    }

    fn value_type_name(&self) -> &str {
        "vpp.punt.Exception"
    }

    fn validate(&self, key: &str, value: &Exception) -> Result<(), DescriptorError> {
        if value.reason.is_empty() {
            return Err(DescriptorError::invalid(key, "punt exception defined without reason"));
        }
        if value.socket_path.is_empty() {
            return Err(DescriptorError::invalid(key, "punt defined without socket path"));
        }
        if value.key() != key {
            return Err(DescriptorError::invalid(
                key,
                format!("punt reason {:?} does not match the key", value.reason),
            ));
        }
        Ok(())
    }

    /// An unknown reason fails terminally: the reason set is fixed at VPP
    /// startup.
    async fn create(&self, key: &str, value: &Exception) -> Result<PuntSocketMeta, DescriptorError> {
        let vpp_socket_path = self
            .handler
            .add_punt_exception(&value.reason, &value.socket_path)
            .await
            .map_err(dp_err)?;
        debug!(key, vpp_socket_path = %vpp_socket_path, "punt exception registered");
        Ok(PuntSocketMeta { vpp_socket_path })
    }

    async fn delete(
        &self,
        key: &str,
        value: &Exception,
        _metadata: Option<&PuntSocketMeta>,
    ) -> Result<(), DescriptorError> {
        match self.handler.delete_punt_exception(&value.reason).await {
            Err(err) if is_gone(&err) => {
                debug!(key, error = %err, "punt exception already gone");
                Ok(())
            }
            other => other.map_err(dp_err),
        }
    }

    fn equivalent(&self, _key: &str, old: &Exception, new: &Exception) -> bool {
        old.reason == new.reason
            && old.socket_path == new.socket_path
            && !old.socket_path.starts_with(UNKNOWN_PATH_MARK)
    }

    fn retrieve_source(&self) -> RetrieveSource {
        if self.handler.live_socket_dump() {
            RetrieveSource::Live
        } else {
            RetrieveSource::Cache
        }
    }

    async fn retrieve(&self, _correlate: &[Item]) -> Result<Vec<Item>, DescriptorError> {
        let (sockets, reasons) = futures::try_join!(
            self.handler.dump_punt_sockets(),
            self.handler.dump_punt_reasons()
        )
        .map_err(dp_err)?;
        let names: HashMap<u32, String> = reasons.into_iter().map(|r| (r.id, r.name)).collect();
        let vpp_socket_path = self.handler.vpp_socket_path().unwrap_or_default();

        let mut retrieved = Vec::new();
        for entry in sockets {
            let Punt::Exception { id } = entry.punt else {
                continue;
            };
            let Some(reason) = names.get(&id) else {
                debug!(id, "punt exception with unknown reason id skipped");
                continue;
            };
            let socket_path = if entry.client_path.is_empty() {
                format!("{}{}", UNKNOWN_PATH_MARK, vpp_socket_path)
            } else {
                entry.client_path
            };
            let value = Exception::new(reason.clone(), socket_path);
            retrieved.push(
                RetrievedItem::new(value.key(), value, Origin::FromNb).with_metadata(
                    PuntSocketMeta {
                        vpp_socket_path: vpp_socket_path.clone(),
                    },
                ),
            );
        }
        Ok(retrieved)
    }
}

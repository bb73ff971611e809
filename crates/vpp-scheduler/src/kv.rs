//! Key/value model: keys, opaque values, provenance and dependencies.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// Hierarchical item key, e.g. `config/vpp/v2/interfaces/if1`.
pub type Key = String;

/// Where a key/value pair came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Origin {
    /// Desired (northbound) configuration.
    FromNb,
    /// Discovered by dumping the dataplane.
    FromSb,
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Origin::FromNb => write!(f, "from-nb"),
            Origin::FromSb => write!(f, "from-sb"),
        }
    }
}

/// An opaque configuration payload.
///
/// Implemented through [`impl_proto_value!`](crate::impl_proto_value) for
/// every model type a descriptor registers.
pub trait ProtoValue: fmt::Debug + Send + Sync + 'static {
    fn as_any(&self) -> &dyn Any;
}

/// Implements [`ProtoValue`] for one or more model types.
#[macro_export]
macro_rules! impl_proto_value {
    ($($ty:ty),+ $(,)?) => {
        $(
            impl $crate::ProtoValue for $ty {
                fn as_any(&self) -> &dyn ::std::any::Any {
                    self
                }
            }
        )+
    };
}

/// Type-erased value as stored in the graph.
pub type AnyValue = Arc<dyn ProtoValue>;

/// Type-erased descriptor metadata as stored in the graph.
pub type AnyMetadata = Arc<dyn Any + Send + Sync>;

/// Downcasts an erased value to its model type.
pub fn downcast_value<T: 'static>(value: &dyn ProtoValue) -> Option<&T> {
    value.as_any().downcast_ref::<T>()
}

/// A key with its value.
#[derive(Debug, Clone)]
pub struct KeyValuePair {
    pub key: Key,
    pub value: AnyValue,
}

impl KeyValuePair {
    pub fn new<V: ProtoValue>(key: impl Into<Key>, value: V) -> Self {
        Self {
            key: key.into(),
            value: Arc::new(value),
        }
    }
}

/// "The item under `key` must be configured before I can be created."
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Dependency {
    pub label: String,
    pub key: Key,
}

impl Dependency {
    pub fn new(label: impl Into<String>, key: impl Into<Key>) -> Self {
        Self {
            label: label.into(),
            key: key.into(),
        }
    }
}

/// How a descriptor obtains its view of the dataplane.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RetrieveSource {
    /// Items cannot be dumped; the graph's last known state is kept.
    Unsupported,
    /// Items are dumped live from the dataplane.
    Live,
    /// Items come from an agent-side cache that may diverge from the dataplane.
    Cache,
}

/// An item returned by `Descriptor::retrieve`, or handed to it for correlation.
#[derive(Debug, Clone, PartialEq)]
pub struct RetrievedItem<V, M> {
    pub key: Key,
    pub value: V,
    pub metadata: Option<M>,
    pub origin: Origin,
}

impl<V, M> RetrievedItem<V, M> {
    pub fn new(key: impl Into<Key>, value: V, origin: Origin) -> Self {
        Self {
            key: key.into(),
            value,
            metadata: None,
            origin,
        }
    }

    pub fn with_metadata(mut self, metadata: M) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

//! Descriptor-driven reconciliation scheduler.
//!
//! Every configurable dataplane item is a key/value pair whose behavior is
//! supplied by a [`Descriptor`]. The scheduler turns desired state into a
//! dependency graph, plans a safe order of create/update/delete operations and
//! executes them with retry and failure isolation:
//!
//! - [`Descriptor`]: the per-item-kind behavior contract
//! - [`Registry`]: catalog of descriptors, looked up by key prefix or value type
//! - [`MetadataIndex`]: descriptor-owned metadata plus name→handle lookups
//! - [`KvScheduler`]: transactions, resync and the node graph
//! - [`TxnResult`]: per-node outcome of one transaction
//!
//! # Architecture
//!
//! 1. A client commits a [`Txn`] of puts and deletes
//! 2. Values are validated and expanded into derived values
//! 3. The planner computes the affected subgraph, parks items with missing
//!    dependencies as pending and orders the rest topologically
//! 4. The executor runs deletes (dependents first) then creates/updates
//!    (dependencies first), dispatching independent branches concurrently
//! 5. Resync retrieves live state through every descriptor and reconciles it
//!    against the desired state in one transaction
//!
//! # Example
//!
//! ```ignore
//! use vpp_scheduler::{KvScheduler, SchedulerConfig, Txn};
//!
//! let mut scheduler = KvScheduler::new(SchedulerConfig::default());
//! scheduler.register(InterfaceDescriptor::new(handler.clone(), if_index.clone()))?;
//!
//! let result = scheduler
//!     .commit(Txn::new().put("config/vpp/v2/interfaces/if1", iface))
//!     .await?;
//! assert!(result.is_success());
//! ```

mod config;
mod descriptor;
mod desired;
mod error;
mod executor;
mod graph;
mod kv;
mod metadata;
mod pending;
mod planner;
mod registry;
mod resync;
mod scheduler;
mod txn;

pub use config::{CachedDumpPolicy, ExternalItemPolicy, SchedulerConfig};
pub use descriptor::{Descriptor, KvDescriptor};
pub use error::{DescriptorError, PlanError, SchedulerError, SchedulerResult};
pub use graph::{Node, NodeState};
pub use kv::{
    downcast_value, AnyMetadata, AnyValue, Dependency, Key, KeyValuePair, Origin, ProtoValue,
    RetrieveSource, RetrievedItem,
};
pub use metadata::MetadataIndex;
pub use registry::Registry;
pub use scheduler::KvScheduler;
pub use txn::{Operation, Outcome, Txn, TxnEntry, TxnKind, TxnResult};

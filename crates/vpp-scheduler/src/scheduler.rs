//! The scheduler: desired state, node graph and transaction entry points.

use std::collections::{BTreeSet, VecDeque};
use std::time::Instant;

use tracing::{debug, info, instrument, warn};

use crate::config::SchedulerConfig;
use crate::descriptor::Descriptor;
use crate::desired::DesiredState;
use crate::error::{DescriptorError, SchedulerResult};
use crate::executor::Executor;
use crate::graph::{Graph, Node, NodeState};
use crate::kv::{AnyValue, Key, KeyValuePair};
use crate::pending::PendingCache;
use crate::planner::{Planner, Scope};
use crate::registry::Registry;
use crate::resync::Refresh;
use crate::txn::{Outcome, Txn, TxnKind, TxnRecorder, TxnResult};

/// Reconciles desired key/value pairs with the dataplane through registered
/// descriptors.
///
/// Transactions are serialized by `&mut self`; callers sharing a scheduler
/// wrap it in a `tokio::sync::Mutex`.
pub struct KvScheduler {
    config: SchedulerConfig,
    registry: Registry,
    graph: Graph,
    desired: DesiredState,
    pending: PendingCache,
    txn_seq: u64,
    history: VecDeque<TxnResult>,
}

impl KvScheduler {
    pub fn new(config: SchedulerConfig) -> Self {
        Self {
            config,
            registry: Registry::new(),
            graph: Graph::default(),
            desired: DesiredState::default(),
            pending: PendingCache::default(),
            txn_seq: 0,
            history: VecDeque::new(),
        }
    }

    /// Registers a descriptor. All descriptors must be registered before the
    /// first transaction.
    pub fn register<D: Descriptor>(&mut self, descriptor: D) -> SchedulerResult<()> {
        self.registry.register(descriptor)
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Applies a northbound transaction.
    ///
    /// Invalid values are reported with outcome `Invalid` and leave the
    /// previous desired value in place. A dependency cycle aborts the whole
    /// transaction before anything is executed.
    #[instrument(skip_all, fields(ops = txn.len()))]
    pub async fn commit(&mut self, txn: Txn) -> SchedulerResult<TxnResult> {
        let started = Instant::now();
        let mut recorder = TxnRecorder::default();
        let snapshot = self.desired.clone();
        let mut seeds: BTreeSet<Key> = BTreeSet::new();

        for (key, value) in txn.ops {
            match value {
                Some(value) => {
                    if let Err(error) = self.check(&key, &value) {
                        warn!(key = %key, error = %error, "invalid value rejected");
                        let state = self.graph.get(&key).map_or(NodeState::Removed, |n| n.state);
                        recorder.record(&key, None, Outcome::Invalid { error }, state);
                        continue;
                    }
                    let unchanged = self.desired.get(&key).map_or(false, |entry| {
                        entry.parent.is_none()
                            && entry
                                .descriptor
                                .as_ref()
                                .map_or(false, |d| d.equivalent(&key, &entry.value, &value))
                    });
                    let changed = self.desired.put(&self.registry, key.clone(), value);
                    if unchanged {
                        debug!(key = %key, "value unchanged");
                        seeds.extend(changed.into_iter().filter(|k| *k != key));
                        continue;
                    }
                    for changed_key in &changed {
                        if let Some(node) = self.graph.get_mut(changed_key) {
                            node.attempts = 0;
                        }
                    }
                    seeds.extend(changed);
                }
                None => seeds.extend(self.desired.delete(&key)),
            }
        }

        let planner = Planner {
            graph: &self.graph,
            desired: &self.desired,
            registry: &self.registry,
            pending: &self.pending,
        };
        let plan = match planner.plan(Scope::Keys(seeds)) {
            Ok(plan) => plan,
            Err(err) => {
                warn!(error = %err, "transaction rejected");
                self.desired = snapshot;
                return Err(err.into());
            }
        };

        self.execute(plan, &mut recorder).await;
        Ok(self.finish(TxnKind::Northbound, txn.description, recorder, Vec::new(), started))
    }

    /// Reconciles the dataplane with the desired state.
    ///
    /// With `Some(values)` the desired state is replaced first (full resync);
    /// with `None` the stored desired state is reused (downstream resync).
    #[instrument(skip_all, fields(full = values.is_some()))]
    pub async fn resync(&mut self, values: Option<Vec<KeyValuePair>>) -> SchedulerResult<TxnResult> {
        let started = Instant::now();
        let mut recorder = TxnRecorder::default();
        let snapshot = self.desired.clone();
        let kind = match values {
            Some(values) => {
                let mut accepted = Vec::with_capacity(values.len());
                for kv in values {
                    match self.check(&kv.key, &kv.value) {
                        Ok(()) => accepted.push(kv),
                        Err(error) => {
                            warn!(key = %kv.key, error = %error, "invalid value rejected");
                            recorder.record(&kv.key, None, Outcome::Invalid { error }, NodeState::Removed);
                        }
                    }
                }
                self.desired.replace(&self.registry, accepted);
                TxnKind::FullResync
            }
            None => TxnKind::DownstreamResync,
        };

        let mut refresh = Refresh {
            graph: &mut self.graph,
            desired: &self.desired,
            registry: &self.registry,
            config: &self.config,
        };
        let retrieve_errors = match refresh.run().await {
            Ok(errors) => errors,
            Err(err) => {
                self.desired = snapshot;
                return Err(err.into());
            }
        };

        let failed: Vec<Key> = self
            .graph
            .nodes()
            .filter(|n| n.state == NodeState::Failed)
            .map(|n| n.key.clone())
            .collect();
        for key in failed {
            if let Some(node) = self.graph.get_mut(&key) {
                node.attempts = 0;
            }
        }

        let planner = Planner {
            graph: &self.graph,
            desired: &self.desired,
            registry: &self.registry,
            pending: &self.pending,
        };
        let plan = match planner.plan(Scope::All) {
            Ok(plan) => plan,
            Err(err) => {
                warn!(error = %err, "resync rejected");
                self.desired = snapshot;
                return Err(err.into());
            }
        };

        self.execute(plan, &mut recorder).await;
        Ok(self.finish(kind, None, recorder, retrieve_errors, started))
    }

    /// Re-attempts nodes that failed retriably and have attempts left.
    #[instrument(skip_all)]
    pub async fn retry_failed(&mut self) -> SchedulerResult<TxnResult> {
        let started = Instant::now();
        let mut recorder = TxnRecorder::default();
        let seeds: BTreeSet<Key> = self
            .graph
            .nodes()
            .filter(|n| {
                n.state == NodeState::Failed
                    && n.attempts < self.config.max_total_attempts
                    && n.last_error.as_ref().map_or(false, |e| self.is_retriable(n, e))
            })
            .map(|n| n.key.clone())
            .collect();

        if !seeds.is_empty() {
            debug!(keys = ?seeds, "retrying failed items");
            let planner = Planner {
                graph: &self.graph,
                desired: &self.desired,
                registry: &self.registry,
                pending: &self.pending,
            };
            let plan = planner.plan(Scope::Keys(seeds))?;
            self.execute(plan, &mut recorder).await;
        }
        Ok(self.finish(TxnKind::RetryFailed, None, recorder, Vec::new(), started))
    }

    async fn execute(&mut self, plan: crate::planner::Plan, recorder: &mut TxnRecorder) {
        if plan.is_empty() && plan.retained.is_empty() && plan.dropped.is_empty() {
            return;
        }
        let mut executor = Executor {
            graph: &mut self.graph,
            pending: &mut self.pending,
            desired: &self.desired,
            config: &self.config,
            recorder,
        };
        executor.execute(plan).await;
    }

    fn finish(
        &mut self,
        kind: TxnKind,
        description: Option<String>,
        recorder: TxnRecorder,
        retrieve_errors: Vec<(String, DescriptorError)>,
        started: Instant,
    ) -> TxnResult {
        self.txn_seq += 1;
        let result = TxnResult {
            seq: self.txn_seq,
            kind,
            description,
            entries: recorder.into_entries(),
            retrieve_errors,
            duration: started.elapsed(),
        };

        if result.entries.is_empty() && result.retrieve_errors.is_empty() {
            debug!(seq = result.seq, kind = %kind, "transaction had nothing to do");
        } else {
            info!(
                seq = result.seq,
                kind = %kind,
                operations = result.operations(),
                failed = result.failed_keys().len(),
                pending = result.pending_keys().len(),
                duration_ms = result.duration.as_millis() as u64,
                "transaction finished"
            );
        }

        self.history.push_back(result.clone());
        while self.history.len() > self.config.history_size {
            self.history.pop_front();
        }
        result
    }

    fn check(&self, key: &str, value: &AnyValue) -> Result<(), DescriptorError> {
        match self.registry.for_key(key) {
            Some(descriptor) => descriptor.validate(key, value),
            None => Err(DescriptorError::invalid(key, "no descriptor claims this key")),
        }
    }

    fn is_retriable(&self, node: &Node, error: &DescriptorError) -> bool {
        node.descriptor
            .as_deref()
            .and_then(|name| self.registry.by_name(name))
            .map_or(error.is_retriable(), |d| d.is_retriable_failure(error))
    }

    /// The node stored under `key`.
    pub fn node(&self, key: &str) -> Option<&Node> {
        self.graph.get(key)
    }

    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.graph.nodes()
    }

    /// Typed metadata of a configured node.
    pub fn metadata<M: Clone + 'static>(&self, key: &str) -> Option<M> {
        self.graph
            .get(key)?
            .metadata
            .as_ref()?
            .downcast_ref::<M>()
            .cloned()
    }

    pub fn failed_keys(&self) -> Vec<Key> {
        self.graph
            .nodes()
            .filter(|n| n.state == NodeState::Failed)
            .map(|n| n.key.clone())
            .collect()
    }

    pub fn pending_keys(&self) -> Vec<Key> {
        self.graph
            .nodes()
            .filter(|n| n.state == NodeState::Pending)
            .map(|n| n.key.clone())
            .collect()
    }

    /// Top-level desired values.
    pub fn desired(&self) -> Vec<KeyValuePair> {
        self.desired.top_level()
    }

    /// Most recent transaction results, oldest first.
    pub fn history(&self) -> impl Iterator<Item = &TxnResult> {
        self.history.iter()
    }
}

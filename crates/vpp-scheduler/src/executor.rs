//! Plan execution.
//!
//! Deletes run before applies. Within a phase every step whose `after` keys
//! completed is dispatched in the same batch, so independent branches run
//! concurrently while one key never has two operations in flight. Graph and
//! metadata index updates happen between batches, on the scheduler's own
//! task.

use std::collections::{BTreeMap, HashMap, HashSet};

use futures::future::join_all;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, warn};

use crate::config::SchedulerConfig;
use crate::desired::DesiredState;
use crate::error::DescriptorError;
use crate::graph::{Graph, Node, NodeState};
use crate::kv::{AnyMetadata, Key, Origin};
use crate::pending::PendingCache;
use crate::planner::{DeleteReason, Plan, Step, StepKind};
use crate::txn::{Operation, Outcome, TxnRecorder};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Delete,
    Apply,
}

pub(crate) struct Executor<'a> {
    pub graph: &'a mut Graph,
    pub pending: &'a mut PendingCache,
    pub desired: &'a DesiredState,
    pub config: &'a SchedulerConfig,
    pub recorder: &'a mut TxnRecorder,
}

impl Executor<'_> {
    pub async fn execute(&mut self, plan: Plan) {
        self.settle(&plan);

        let none = HashSet::new();
        let (deleted, failed_deletes) = self
            .run_phase(Phase::Delete, plan.deletes, &none, &none)
            .await;
        self.run_phase(Phase::Apply, plan.applies, &deleted, &failed_deletes)
            .await;
    }

    /// Bookkeeping that needs no dataplane call.
    fn settle(&mut self, plan: &Plan) {
        for key in &plan.dropped {
            self.graph.remove(key);
            self.pending.release(key);
        }

        for item in &plan.retained {
            if let Some(node) = self.graph.get_mut(&item.key) {
                if node.origin == Origin::FromSb {
                    debug!(key = %item.key, "discovered item claimed by desired state");
                }
                node.origin = Origin::FromNb;
                node.adopted = false;
                node.state = NodeState::Configured;
                node.last_error = None;
                node.attempts = 0;
                node.descriptor = item.descriptor.clone();
                node.derived_from = item.parent.clone();
                node.dependencies = item.dependencies.clone();
            }
            self.pending.release(&item.key);
        }

        for item in &plan.pending {
            debug!(key = %item.key, missing = ?item.missing, "waiting for dependencies");
            let state = match self.graph.get_mut(&item.key) {
                Some(node) if node.value.is_some() => node.state,
                Some(node) => {
                    node.state = NodeState::Pending;
                    node.dependencies = item.dependencies.clone();
                    node.derived_from = item.parent.clone();
                    NodeState::Pending
                }
                None => {
                    let mut node = Node::new(&item.key, Origin::FromNb, NodeState::Pending, item.seq);
                    node.descriptor = item.descriptor.clone();
                    node.derived_from = item.parent.clone();
                    node.dependencies = item.dependencies.clone();
                    self.graph.insert(node);
                    NodeState::Pending
                }
            };
            self.pending.park(&item.key, item.missing.iter().cloned());
            self.recorder.record(
                &item.key,
                item.descriptor.as_deref(),
                Outcome::SkippedUnsatisfiedDependency {
                    missing: item.missing.clone(),
                },
                state,
            );
        }
    }

    /// Runs one phase; returns the keys that completed and the keys that did
    /// not.
    async fn run_phase(
        &mut self,
        phase: Phase,
        steps: Vec<Step>,
        deleted: &HashSet<Key>,
        blocked: &HashSet<Key>,
    ) -> (HashSet<Key>, HashSet<Key>) {
        let mut waiting: BTreeMap<usize, Step> = steps.into_iter().enumerate().collect();
        let mut done: HashSet<Key> = HashSet::new();
        let mut failed: HashSet<Key> = HashSet::new();
        let mut not_before: HashMap<usize, Instant> = HashMap::new();
        let mut tries: HashMap<usize, u32> = HashMap::new();

        // Applies of keys whose delete did not go through are skipped.
        let skipped: Vec<usize> = waiting
            .iter()
            .filter(|(_, s)| blocked.contains(&s.key))
            .map(|(p, _)| *p)
            .collect();
        for position in skipped {
            if let Some(step) = waiting.remove(&position) {
                debug!(key = %step.key, "skipping apply, delete did not complete");
                failed.insert(step.key.clone());
                self.fail_followers(phase, &step.key, false, &mut waiting, &mut failed);
            }
        }

        loop {
            let now = Instant::now();
            let ready: Vec<usize> = waiting
                .iter()
                .filter(|(position, step)| {
                    step.after.iter().all(|k| done.contains(k))
                        && not_before.get(*position).map_or(true, |at| *at <= now)
                })
                .map(|(position, _)| *position)
                .collect();

            if ready.is_empty() {
                let next = waiting
                    .keys()
                    .filter_map(|position| not_before.get(position))
                    .min()
                    .copied();
                match next {
                    Some(at) => {
                        sleep_until(at).await;
                        continue;
                    }
                    None => break,
                }
            }

            let batch: Vec<(usize, Step)> = ready
                .into_iter()
                .filter_map(|position| waiting.remove(&position).map(|s| (position, s)))
                .collect();
            for (_, step) in &batch {
                self.mark_updating(step);
            }

            let results = join_all(batch.iter().map(|(_, step)| run_step(step))).await;

            for ((position, step), result) in batch.into_iter().zip(results) {
                match result {
                    Ok(metadata) => {
                        self.commit_success(&step, metadata, deleted);
                        done.insert(step.key.clone());
                    }
                    Err(err) => {
                        let attempt = tries.entry(position).or_insert(0);
                        *attempt += 1;
                        let retriable = step
                            .descriptor
                            .as_ref()
                            .map_or(false, |d| d.is_retriable_failure(&err));
                        let total = self.graph.get(&step.key).map_or(0, |n| n.attempts) + 1;

                        if retriable
                            && *attempt < self.config.max_attempts_per_txn
                            && total < self.config.max_total_attempts
                        {
                            let delay = self.config.backoff(*attempt);
                            debug!(
                                key = %step.key,
                                op = %step.kind,
                                attempt = *attempt,
                                delay_ms = delay.as_millis() as u64,
                                error = %err,
                                "retriable failure, retrying"
                            );
                            if let Some(node) = self.graph.get_mut(&step.key) {
                                node.attempts = total;
                                node.last_error = Some(err);
                            }
                            not_before.insert(position, Instant::now() + delay);
                            waiting.insert(position, step);
                            continue;
                        }

                        let retrying = retriable && total < self.config.max_total_attempts;
                        self.commit_failure(&step, err, retrying, total);
                        failed.insert(step.key.clone());
                        self.fail_followers(phase, &step.key, retrying, &mut waiting, &mut failed);
                    }
                }
            }
        }

        for (_, step) in waiting {
            let dependency = step
                .after
                .iter()
                .find(|k| !done.contains(*k))
                .cloned()
                .unwrap_or_default();
            warn!(key = %step.key, dependency = %dependency, "step never became ready");
            self.mark_follower(phase, &step, &dependency, false);
            failed.insert(step.key);
        }

        (done, failed)
    }

    fn mark_updating(&mut self, step: &Step) {
        match self.graph.get_mut(&step.key) {
            Some(node) => node.state = NodeState::Updating,
            None => {
                let mut node = Node::new(&step.key, Origin::FromNb, NodeState::Updating, step.seq);
                node.descriptor = step.descriptor_name().map(str::to_string);
                node.derived_from = step.parent.clone();
                node.dependencies = step.dependencies.clone();
                self.graph.insert(node);
            }
        }
    }

    fn commit_success(
        &mut self,
        step: &Step,
        metadata: Option<AnyMetadata>,
        deleted: &HashSet<Key>,
    ) {
        let descriptor = step.descriptor_name();
        match step.kind {
            StepKind::Delete(reason) => {
                if let Some(d) = &step.descriptor {
                    d.index_remove(&step.key);
                }
                if self.desired.contains(&step.key) {
                    if let Some(node) = self.graph.get_mut(&step.key) {
                        node.value = None;
                        node.metadata = None;
                        node.state = NodeState::Pending;
                        node.last_error = None;
                    }
                    let outcome = if reason == DeleteReason::Unconfigure {
                        Outcome::SkippedUnsatisfiedDependency {
                            missing: self.pending.missing(&step.key),
                        }
                    } else {
                        Outcome::Applied {
                            op: Operation::Delete,
                        }
                    };
                    debug!(key = %step.key, op = %step.kind, "deleted");
                    self.recorder
                        .record(&step.key, descriptor, outcome, NodeState::Pending);
                } else {
                    self.graph.remove(&step.key);
                    self.pending.release(&step.key);
                    debug!(key = %step.key, "deleted");
                    self.recorder.record(
                        &step.key,
                        descriptor,
                        Outcome::Applied {
                            op: Operation::Delete,
                        },
                        NodeState::Removed,
                    );
                }
            }
            StepKind::Create | StepKind::Update | StepKind::Property => {
                let mut node = self.graph.remove(&step.key).unwrap_or_else(|| {
                    Node::new(&step.key, Origin::FromNb, NodeState::Configured, step.seq)
                });
                node.value = Some(step.value.clone());
                node.origin = Origin::FromNb;
                node.adopted = false;
                node.state = NodeState::Configured;
                node.descriptor = descriptor.map(str::to_string);
                node.derived_from = step.parent.clone();
                node.dependencies = step.dependencies.clone();
                node.last_error = None;
                node.attempts = 0;
                node.seq = step.seq;
                if step.kind != StepKind::Property {
                    node.metadata = metadata;
                }
                if let (Some(d), Some(m)) = (&step.descriptor, &node.metadata) {
                    d.index_put(&step.key, m);
                }
                self.graph.insert(node);
                self.pending.release(&step.key);

                if step.kind == StepKind::Property {
                    return;
                }
                let op = if deleted.contains(&step.key) {
                    Operation::Recreate
                } else if step.kind == StepKind::Update {
                    Operation::Update
                } else {
                    Operation::Create
                };
                debug!(key = %step.key, op = %op, "applied");
                self.recorder.record(
                    &step.key,
                    descriptor,
                    Outcome::Applied { op },
                    NodeState::Configured,
                );
            }
        }
    }

    fn commit_failure(&mut self, step: &Step, err: DescriptorError, retrying: bool, total: u32) {
        warn!(
            key = %step.key,
            op = %step.kind,
            attempts = total,
            retrying,
            error = %err,
            "operation failed"
        );
        if let Some(node) = self.graph.get_mut(&step.key) {
            node.state = NodeState::Failed;
            node.last_error = Some(err.clone());
            node.attempts = total;
        }
        let outcome = if retrying {
            Outcome::FailedRetrying {
                error: err,
                attempts: total,
            }
        } else {
            Outcome::FailedTerminal { error: err }
        };
        self.recorder
            .record(&step.key, step.descriptor_name(), outcome, NodeState::Failed);
    }

    /// Takes every step transitively waiting for `key` out of the phase.
    fn fail_followers(
        &mut self,
        phase: Phase,
        key: &str,
        retrying: bool,
        waiting: &mut BTreeMap<usize, Step>,
        failed: &mut HashSet<Key>,
    ) {
        let mut frontier = vec![key.to_string()];
        while let Some(current) = frontier.pop() {
            let followers: Vec<usize> = waiting
                .iter()
                .filter(|(_, s)| s.after.contains(&current))
                .map(|(p, _)| *p)
                .collect();
            for position in followers {
                if let Some(step) = waiting.remove(&position) {
                    self.mark_follower(phase, &step, key, retrying);
                    failed.insert(step.key.clone());
                    frontier.push(step.key);
                }
            }
        }
    }

    fn mark_follower(&mut self, phase: Phase, step: &Step, cause: &str, retrying: bool) {
        let (state, outcome, error) = match (phase, retrying) {
            (Phase::Apply, true) => (
                NodeState::Pending,
                Outcome::SkippedUnsatisfiedDependency {
                    missing: vec![cause.to_string()],
                },
                None,
            ),
            (Phase::Apply, false) => {
                let error = DescriptorError::DependencyFailed {
                    key: cause.to_string(),
                };
                (
                    NodeState::Failed,
                    Outcome::FailedTerminal {
                        error: error.clone(),
                    },
                    Some(error),
                )
            }
            (Phase::Delete, _) => {
                let error = DescriptorError::Blocked {
                    key: cause.to_string(),
                };
                (
                    NodeState::Failed,
                    Outcome::FailedTerminal {
                        error: error.clone(),
                    },
                    Some(error),
                )
            }
        };
        debug!(key = %step.key, cause, state = ?state, "not executed");

        match self.graph.get_mut(&step.key) {
            Some(node) => {
                node.state = state;
                node.last_error = error;
            }
            None => {
                let mut node = Node::new(&step.key, Origin::FromNb, state, step.seq);
                node.descriptor = step.descriptor_name().map(str::to_string);
                node.derived_from = step.parent.clone();
                node.dependencies = step.dependencies.clone();
                node.last_error = error;
                self.graph.insert(node);
            }
        }
        if !cause.is_empty() {
            self.pending.park(&step.key, [cause.to_string()]);
        }
        self.recorder
            .record(&step.key, step.descriptor_name(), outcome, state);
    }
}

async fn run_step(step: &Step) -> Result<Option<AnyMetadata>, DescriptorError> {
    let Some(descriptor) = &step.descriptor else {
        return Ok(None);
    };
    match (step.kind, &step.old_value) {
        (StepKind::Create, _) | (StepKind::Update, None) => {
            descriptor.create(&step.key, &step.value).await.map(Some)
        }
        (StepKind::Update, Some(old)) => descriptor
            .update(&step.key, old, &step.value, step.metadata.as_ref())
            .await
            .map(Some),
        (StepKind::Delete(_), _) => descriptor
            .delete(&step.key, &step.value, step.metadata.as_ref())
            .await
            .map(|()| None),
        (StepKind::Property, _) => Ok(None),
    }
}

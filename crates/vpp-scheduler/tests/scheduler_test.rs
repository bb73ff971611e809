//! Scheduler behavior against a recording in-memory dataplane.
//!
//! Every descriptor call is appended to a shared call log so the tests can
//! assert on the exact order of dataplane operations.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use vpp_scheduler::{
    Dependency, Descriptor, DescriptorError, ExternalItemPolicy, KeyValuePair, KvScheduler,
    MetadataIndex, NodeState, Operation, Origin, Outcome, PlanError, RetrieveSource,
    RetrievedItem, SchedulerConfig, SchedulerError, Txn,
};

#[derive(Debug, Clone, Default, PartialEq)]
struct Item {
    data: u32,
    deps: Vec<String>,
    derived: Vec<String>,
    /// Not reported back by the dataplane; ignored by the comparator.
    tag: Option<String>,
}
vpp_scheduler::impl_proto_value!(Item);

impl Item {
    fn new(data: u32) -> Self {
        Self {
            data,
            ..Default::default()
        }
    }

    fn after(mut self, dep: &str) -> Self {
        self.deps.push(dep.to_string());
        self
    }

    fn deriving(mut self, key: &str) -> Self {
        self.derived.push(key.to_string());
        self
    }
}

/// Shared state of the fake dataplane.
#[derive(Clone, Default)]
struct Dataplane {
    calls: Arc<Mutex<Vec<String>>>,
    live: Arc<Mutex<BTreeMap<String, (Item, Origin, u32)>>>,
    failures: Arc<Mutex<HashMap<String, VecDeque<DescriptorError>>>>,
    next_handle: Arc<AtomicU32>,
}

impl Dataplane {
    fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    fn clear_calls(&self) {
        self.calls.lock().clear();
    }

    fn fail(&self, key: &str, errors: Vec<DescriptorError>) {
        self.failures
            .lock()
            .entry(key.to_string())
            .or_default()
            .extend(errors);
    }

    fn add_external(&self, key: &str, item: Item) {
        self.live
            .lock()
            .insert(key.to_string(), (item, Origin::FromSb, 1000));
    }

    fn call(&self, op: &str, key: &str) -> Result<(), DescriptorError> {
        self.calls.lock().push(format!("{} {}", op, key));
        match self.failures.lock().get_mut(key).and_then(|q| q.pop_front()) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

struct Mock {
    name: &'static str,
    prefix: &'static str,
    dataplane: Dataplane,
    update: bool,
    retrieve: RetrieveSource,
    index: Option<Arc<MetadataIndex<u32>>>,
}

impl Mock {
    fn new(name: &'static str, prefix: &'static str, dataplane: &Dataplane) -> Self {
        Self {
            name,
            prefix,
            dataplane: dataplane.clone(),
            update: false,
            retrieve: RetrieveSource::Live,
            index: None,
        }
    }

    fn with_update(mut self) -> Self {
        self.update = true;
        self
    }

    fn with_index(mut self, index: Arc<MetadataIndex<u32>>) -> Self {
        self.index = Some(index);
        self
    }
}

#[async_trait]
impl Descriptor for Mock {
    type Value = Item;
    type Metadata = u32;

    fn name(&self) -> &str {
        self.name
    }

    fn key_prefix(&self) -> &str {
        self.prefix
    }

    fn validate(&self, key: &str, value: &Item) -> Result<(), DescriptorError> {
        if value.data == 0 {
            return Err(DescriptorError::invalid(key, "data must not be zero"));
        }
        Ok(())
    }

    async fn create(&self, key: &str, value: &Item) -> Result<u32, DescriptorError> {
        self.dataplane.call("create", key)?;
        let handle = self.dataplane.next_handle.fetch_add(1, Ordering::SeqCst) + 1;
        let mut stored = value.clone();
        stored.tag = None;
        self.dataplane
            .live
            .lock()
            .insert(key.to_string(), (stored, Origin::FromNb, handle));
        Ok(handle)
    }

    async fn delete(&self, key: &str, _: &Item, _: Option<&u32>) -> Result<(), DescriptorError> {
        self.dataplane.call("delete", key)?;
        self.dataplane.live.lock().remove(key);
        Ok(())
    }

    fn supports_update(&self) -> bool {
        self.update
    }

    async fn update(
        &self,
        key: &str,
        _old: &Item,
        new: &Item,
        metadata: Option<&u32>,
    ) -> Result<u32, DescriptorError> {
        self.dataplane.call("update", key)?;
        let handle = metadata.copied().unwrap_or_default();
        let mut stored = new.clone();
        stored.tag = None;
        self.dataplane
            .live
            .lock()
            .insert(key.to_string(), (stored, Origin::FromNb, handle));
        Ok(handle)
    }

    fn equivalent(&self, _key: &str, old: &Item, new: &Item) -> bool {
        old.data == new.data && old.deps == new.deps && old.derived == new.derived
    }

    fn dependencies(&self, _key: &str, value: &Item) -> Vec<Dependency> {
        value
            .deps
            .iter()
            .map(|d| Dependency::new("dep", d.clone()))
            .collect()
    }

    fn derived_values(&self, _key: &str, value: &Item) -> Vec<KeyValuePair> {
        value
            .derived
            .iter()
            .map(|k| KeyValuePair::new(k.clone(), Item::new(value.data)))
            .collect()
    }

    fn retrieve_source(&self) -> RetrieveSource {
        self.retrieve
    }

    async fn retrieve(
        &self,
        _correlate: &[RetrievedItem<Item, u32>],
    ) -> Result<Vec<RetrievedItem<Item, u32>>, DescriptorError> {
        self.dataplane.call("retrieve", self.name)?;
        Ok(self
            .dataplane
            .live
            .lock()
            .iter()
            .filter(|(k, _)| k.starts_with(self.prefix))
            .map(|(k, (item, origin, handle))| {
                RetrievedItem::new(k.clone(), item.clone(), *origin).with_metadata(*handle)
            })
            .collect())
    }

    fn metadata_index(&self) -> Option<Arc<MetadataIndex<u32>>> {
        self.index.clone()
    }
}

fn scheduler(dataplane: &Dataplane) -> KvScheduler {
    scheduler_with(dataplane, SchedulerConfig::default())
}

fn scheduler_with(dataplane: &Dataplane, config: SchedulerConfig) -> KvScheduler {
    let mut scheduler = KvScheduler::new(config);
    scheduler
        .register(Mock::new("item", "item/", dataplane))
        .unwrap();
    scheduler
        .register(Mock::new("child", "child/", dataplane))
        .unwrap();
    scheduler
}

fn mutating(calls: Vec<String>) -> Vec<String> {
    calls
        .into_iter()
        .filter(|c| !c.starts_with("retrieve"))
        .collect()
}

#[tokio::test]
async fn test_creates_follow_dependencies() {
    let dp = Dataplane::default();
    let mut s = scheduler(&dp);

    let result = s
        .commit(
            Txn::new()
                .put("item/c", Item::new(3).after("item/b"))
                .put("item/b", Item::new(2).after("item/a"))
                .put("item/a", Item::new(1)),
        )
        .await
        .unwrap();

    assert!(result.is_success());
    assert_eq!(result.operations(), 3);
    assert_eq!(
        dp.calls(),
        vec!["create item/a", "create item/b", "create item/c"]
    );
    assert_eq!(s.node("item/c").unwrap().state, NodeState::Configured);
    assert_eq!(s.metadata::<u32>("item/a"), Some(1));
}

#[tokio::test]
async fn test_independent_items_keep_declaration_order() {
    let dp = Dataplane::default();
    let mut s = scheduler(&dp);

    s.commit(
        Txn::new()
            .put("item/z", Item::new(1))
            .put("item/m", Item::new(1))
            .put("item/a", Item::new(1)),
    )
    .await
    .unwrap();

    assert_eq!(
        dp.calls(),
        vec!["create item/z", "create item/m", "create item/a"]
    );
}

#[tokio::test]
async fn test_deletes_run_dependents_first() {
    let dp = Dataplane::default();
    let mut s = scheduler(&dp);
    s.commit(
        Txn::new()
            .put("item/a", Item::new(1))
            .put("item/b", Item::new(2).after("item/a"))
            .put("item/c", Item::new(3).after("item/b")),
    )
    .await
    .unwrap();
    dp.clear_calls();

    let result = s
        .commit(
            Txn::new()
                .delete("item/a")
                .delete("item/b")
                .delete("item/c"),
        )
        .await
        .unwrap();

    assert_eq!(
        dp.calls(),
        vec!["delete item/c", "delete item/b", "delete item/a"]
    );
    assert_eq!(result.operations(), 3);
    assert!(s.node("item/a").is_none());
    assert!(result
        .entries
        .iter()
        .all(|e| e.state == NodeState::Removed));
}

#[tokio::test]
async fn test_missing_dependency_parks_item_until_it_appears() {
    let dp = Dataplane::default();
    let mut s = scheduler(&dp);

    let result = s
        .commit(Txn::new().put("item/b", Item::new(2).after("item/a")))
        .await
        .unwrap();
    assert!(dp.calls().is_empty());
    match result.outcome("item/b") {
        Some(Outcome::SkippedUnsatisfiedDependency { missing }) => {
            assert_eq!(missing, &vec!["item/a".to_string()])
        }
        other => panic!("unexpected outcome {:?}", other),
    }
    assert_eq!(s.pending_keys(), vec!["item/b"]);

    let result = s
        .commit(Txn::new().put("item/a", Item::new(1)))
        .await
        .unwrap();
    assert_eq!(dp.calls(), vec!["create item/a", "create item/b"]);
    assert!(matches!(
        result.outcome("item/b"),
        Some(Outcome::Applied {
            op: Operation::Create
        })
    ));
    assert!(s.pending_keys().is_empty());

    dp.clear_calls();
    let result = s.commit(Txn::new().delete("item/a")).await.unwrap();
    assert_eq!(dp.calls(), vec!["delete item/b", "delete item/a"]);
    assert!(matches!(
        result.outcome("item/b"),
        Some(Outcome::SkippedUnsatisfiedDependency { .. })
    ));
    assert_eq!(s.node("item/b").unwrap().state, NodeState::Pending);
    assert!(s.node("item/b").unwrap().value.is_none());
}

#[tokio::test]
async fn test_pending_propagates_transitively() {
    let dp = Dataplane::default();
    let mut s = scheduler(&dp);

    let result = s
        .commit(
            Txn::new()
                .put("item/b", Item::new(2).after("item/a"))
                .put("item/c", Item::new(3).after("item/b")),
        )
        .await
        .unwrap();

    assert!(dp.calls().is_empty());
    assert_eq!(result.pending_keys(), vec!["item/b", "item/c"]);
}

#[tokio::test]
async fn test_cycle_rejects_transaction() {
    let dp = Dataplane::default();
    let mut s = scheduler(&dp);

    let err = s
        .commit(
            Txn::new()
                .put("item/a", Item::new(1).after("item/b"))
                .put("item/b", Item::new(2).after("item/a"))
                .put("item/x", Item::new(3)),
        )
        .await
        .unwrap_err();

    match err {
        SchedulerError::Plan(PlanError::DependencyCycle { keys }) => {
            assert_eq!(keys, vec!["item/a", "item/b"])
        }
        other => panic!("unexpected error {:?}", other),
    }
    assert!(dp.calls().is_empty());
    assert!(s.desired().is_empty());
}

#[tokio::test]
async fn test_invalid_value_is_never_applied() {
    let dp = Dataplane::default();
    let mut s = scheduler(&dp);

    let result = s
        .commit(
            Txn::new()
                .put("item/bad", Item::new(0))
                .put("item/good", Item::new(1))
                .put("unknown/x", Item::new(1)),
        )
        .await
        .unwrap();

    assert_eq!(dp.calls(), vec!["create item/good"]);
    assert!(matches!(
        result.outcome("item/bad"),
        Some(Outcome::Invalid { error }) if error.is_invalid()
    ));
    assert!(matches!(
        result.outcome("unknown/x"),
        Some(Outcome::Invalid { .. })
    ));
    assert!(s.node("item/bad").is_none());
}

#[tokio::test]
async fn test_terminal_failure_isolated_to_branch() {
    let dp = Dataplane::default();
    let mut s = scheduler(&dp);
    dp.fail("item/a", vec![DescriptorError::terminal("rejected")]);

    let result = s
        .commit(
            Txn::new()
                .put("item/a", Item::new(1))
                .put("item/b", Item::new(2).after("item/a"))
                .put("item/c", Item::new(3)),
        )
        .await
        .unwrap();

    assert!(!result.is_success());
    assert!(matches!(
        result.outcome("item/a"),
        Some(Outcome::FailedTerminal { .. })
    ));
    assert!(matches!(
        result.outcome("item/b"),
        Some(Outcome::FailedTerminal {
            error: DescriptorError::DependencyFailed { .. }
        })
    ));
    assert!(matches!(
        result.outcome("item/c"),
        Some(Outcome::Applied {
            op: Operation::Create
        })
    ));
    assert!(!dp.calls().contains(&"create item/b".to_string()));
    assert_eq!(s.failed_keys(), vec!["item/a", "item/b"]);

    // Re-submitting an unchanged value does not re-attempt a failed node.
    dp.clear_calls();
    let result = s
        .commit(Txn::new().put("item/a", Item::new(1)))
        .await
        .unwrap();
    assert!(dp.calls().is_empty());
    assert!(result.entries.is_empty());

    // A changed value does, and unblocks the dependent.
    let result = s
        .commit(Txn::new().put("item/a", Item::new(5)))
        .await
        .unwrap();
    assert_eq!(dp.calls(), vec!["create item/a", "create item/b"]);
    assert!(result.is_success());
}

#[tokio::test]
async fn test_failed_delete_blocks_dependencies() {
    let dp = Dataplane::default();
    let mut s = scheduler(&dp);
    s.commit(
        Txn::new()
            .put("item/a", Item::new(1))
            .put("item/b", Item::new(2).after("item/a")),
    )
    .await
    .unwrap();
    dp.clear_calls();
    dp.fail("item/b", vec![DescriptorError::terminal("busy object")]);

    let result = s
        .commit(Txn::new().delete("item/a").delete("item/b"))
        .await
        .unwrap();

    assert_eq!(dp.calls(), vec!["delete item/b"]);
    assert!(matches!(
        result.outcome("item/a"),
        Some(Outcome::FailedTerminal {
            error: DescriptorError::Blocked { .. }
        })
    ));
    assert!(s.node("item/a").unwrap().value.is_some());
}

#[tokio::test(start_paused = true)]
async fn test_retriable_failure_backs_off_and_recovers() {
    let dp = Dataplane::default();
    let mut s = scheduler(&dp);
    dp.fail(
        "item/a",
        vec![
            DescriptorError::retriable("try again"),
            DescriptorError::timeout("create"),
        ],
    );

    let start = tokio::time::Instant::now();
    let result = s
        .commit(
            Txn::new()
                .put("item/a", Item::new(1))
                .put("item/b", Item::new(2).after("item/a"))
                .put("item/c", Item::new(3)),
        )
        .await
        .unwrap();

    assert!(result.is_success());
    assert_eq!(
        dp.calls(),
        vec![
            "create item/a",
            "create item/c",
            "create item/a",
            "create item/a",
            "create item/b",
        ]
    );
    // 50ms then 100ms with the default backoff.
    assert!(start.elapsed() >= Duration::from_millis(150));
    assert_eq!(s.node("item/a").unwrap().attempts, 0);
}

#[tokio::test(start_paused = true)]
async fn test_retriable_failure_becomes_terminal_after_total_attempts() {
    let dp = Dataplane::default();
    let config = SchedulerConfig {
        max_attempts_per_txn: 2,
        max_total_attempts: 3,
        ..Default::default()
    };
    let mut s = scheduler_with(&dp, config);
    dp.fail(
        "item/a",
        (0..5).map(|_| DescriptorError::retriable("busy")).collect(),
    );

    let result = s
        .commit(
            Txn::new()
                .put("item/a", Item::new(1))
                .put("item/b", Item::new(2).after("item/a")),
        )
        .await
        .unwrap();
    assert!(matches!(
        result.outcome("item/a"),
        Some(Outcome::FailedRetrying { attempts: 2, .. })
    ));
    assert!(matches!(
        result.outcome("item/b"),
        Some(Outcome::SkippedUnsatisfiedDependency { .. })
    ));

    let result = s.retry_failed().await.unwrap();
    assert!(matches!(
        result.outcome("item/a"),
        Some(Outcome::FailedTerminal { .. })
    ));
    assert_eq!(dp.calls().len(), 3);

    let result = s.retry_failed().await.unwrap();
    assert!(result.entries.is_empty());
    assert_eq!(dp.calls().len(), 3);
}

#[tokio::test]
async fn test_retry_failed_unblocks_waiters() {
    let dp = Dataplane::default();
    let config = SchedulerConfig {
        max_attempts_per_txn: 1,
        ..Default::default()
    };
    let mut s = scheduler_with(&dp, config);
    dp.fail("item/a", vec![DescriptorError::retriable("busy")]);

    s.commit(
        Txn::new()
            .put("item/a", Item::new(1))
            .put("item/b", Item::new(2).after("item/a")),
    )
    .await
    .unwrap();
    assert_eq!(s.node("item/b").unwrap().state, NodeState::Pending);

    let result = s.retry_failed().await.unwrap();
    assert!(result.is_success());
    assert_eq!(result.operations(), 2);
    assert_eq!(s.node("item/b").unwrap().state, NodeState::Configured);
}

#[tokio::test]
async fn test_recreate_cascades_to_dependents() {
    let dp = Dataplane::default();
    let mut s = scheduler(&dp);
    s.commit(
        Txn::new()
            .put("item/a", Item::new(1))
            .put("item/b", Item::new(2).after("item/a"))
            .put("item/x", Item::new(9)),
    )
    .await
    .unwrap();
    dp.clear_calls();

    let result = s
        .commit(Txn::new().put("item/a", Item::new(7)))
        .await
        .unwrap();

    assert_eq!(
        dp.calls(),
        vec![
            "delete item/b",
            "delete item/a",
            "create item/a",
            "create item/b"
        ]
    );
    assert!(matches!(
        result.outcome("item/a"),
        Some(Outcome::Applied {
            op: Operation::Recreate
        })
    ));
    assert!(matches!(
        result.outcome("item/b"),
        Some(Outcome::Applied {
            op: Operation::Recreate
        })
    ));
    assert!(result.outcome("item/x").is_none());
}

#[tokio::test]
async fn test_update_in_place() {
    let dp = Dataplane::default();
    let mut s = KvScheduler::new(SchedulerConfig::default());
    s.register(Mock::new("item", "item/", &dp).with_update())
        .unwrap();
    s.commit(
        Txn::new()
            .put("item/a", Item::new(1))
            .put("item/b", Item::new(2).after("item/a")),
    )
    .await
    .unwrap();
    dp.clear_calls();

    let result = s
        .commit(Txn::new().put("item/a", Item::new(4)))
        .await
        .unwrap();

    assert_eq!(dp.calls(), vec!["update item/a"]);
    assert!(matches!(
        result.outcome("item/a"),
        Some(Outcome::Applied {
            op: Operation::Update
        })
    ));
    assert_eq!(s.metadata::<u32>("item/a"), Some(1));
}

#[tokio::test]
async fn test_derived_values_follow_parent() {
    let dp = Dataplane::default();
    let mut s = scheduler(&dp);

    let result = s
        .commit(Txn::new().put(
            "item/a",
            Item::new(1).deriving("child/a/1").deriving("prop/a/flag"),
        ))
        .await
        .unwrap();

    assert_eq!(dp.calls(), vec!["create item/a", "create child/a/1"]);
    assert_eq!(result.operations(), 2);
    let property = s.node("prop/a/flag").unwrap();
    assert_eq!(property.state, NodeState::Configured);
    assert!(property.descriptor.is_none());
    assert_eq!(property.derived_from.as_deref(), Some("item/a"));

    dp.clear_calls();
    s.commit(Txn::new().put("item/a", Item::new(1).deriving("prop/a/flag")))
        .await
        .unwrap();
    assert_eq!(
        mutating(dp.calls()),
        vec![
            "delete child/a/1",
            "delete item/a",
            "create item/a"
        ]
    );

    dp.clear_calls();
    s.commit(Txn::new().delete("item/a")).await.unwrap();
    assert_eq!(dp.calls(), vec!["delete item/a"]);
    assert!(s.node("prop/a/flag").is_none());
    assert_eq!(s.nodes().count(), 0);
}

#[tokio::test]
async fn test_resync_is_idempotent() {
    let dp = Dataplane::default();
    let mut s = scheduler(&dp);
    let desired = vec![
        KeyValuePair::new("item/a", Item::new(1)),
        KeyValuePair::new("item/b", Item::new(2).after("item/a")),
    ];

    let first = s.resync(Some(desired.clone())).await.unwrap();
    assert_eq!(first.operations(), 2);
    assert_eq!(
        mutating(dp.calls()),
        vec!["create item/a", "create item/b"]
    );

    dp.clear_calls();
    let second = s.resync(Some(desired)).await.unwrap();
    assert_eq!(second.operations(), 0);
    assert!(second.entries.is_empty());
    assert!(mutating(dp.calls()).is_empty());

    let third = s.resync(None).await.unwrap();
    assert_eq!(third.operations(), 0);
}

#[tokio::test]
async fn test_resync_ignores_fields_the_comparator_ignores() {
    let dp = Dataplane::default();
    let mut s = scheduler(&dp);
    let mut tagged = Item::new(1);
    tagged.tag = Some("operator note".to_string());

    s.commit(Txn::new().put("item/a", tagged)).await.unwrap();
    dp.clear_calls();

    let result = s.resync(None).await.unwrap();
    assert_eq!(result.operations(), 0);
    assert!(mutating(dp.calls()).is_empty());
}

#[tokio::test]
async fn test_resync_corrects_drift() {
    let dp = Dataplane::default();
    let mut s = scheduler(&dp);
    s.resync(Some(vec![
        KeyValuePair::new("item/a", Item::new(1)),
        KeyValuePair::new("item/b", Item::new(2)),
    ]))
    .await
    .unwrap();

    // Out-of-band changes: one item removed, one modified, one agent-created
    // leftover that is no longer desired.
    dp.live.lock().remove("item/a");
    dp.live
        .lock()
        .insert("item/b".to_string(), (Item::new(5), Origin::FromNb, 2));
    dp.live
        .lock()
        .insert("item/old".to_string(), (Item::new(3), Origin::FromNb, 9));
    dp.clear_calls();

    let result = s.resync(None).await.unwrap();

    let mut calls = mutating(dp.calls());
    calls.sort();
    assert_eq!(
        calls,
        vec![
            "create item/a",
            "create item/b",
            "delete item/b",
            "delete item/old"
        ]
    );
    assert!(result.is_success());
    assert!(s.node("item/old").is_none());
}

#[tokio::test]
async fn test_external_items_kept_or_adopted() {
    let dp = Dataplane::default();
    dp.add_external("item/local0", Item::new(1));
    let mut s = scheduler(&dp);

    let result = s.resync(Some(Vec::new())).await.unwrap();
    assert_eq!(result.operations(), 0);
    let node = s.node("item/local0").unwrap();
    assert_eq!(node.state, NodeState::Discovered);
    assert_eq!(node.origin, Origin::FromSb);

    // Claiming the discovered item leaves the dataplane untouched.
    dp.clear_calls();
    let result = s
        .commit(Txn::new().put("item/local0", Item::new(1)))
        .await
        .unwrap();
    assert!(dp.calls().is_empty());
    assert_eq!(result.operations(), 0);
    assert_eq!(s.node("item/local0").unwrap().origin, Origin::FromNb);

    let dp = Dataplane::default();
    dp.add_external("item/stray", Item::new(1));
    let config = SchedulerConfig {
        external_items: ExternalItemPolicy::Adopt,
        ..Default::default()
    };
    let mut s = scheduler_with(&dp, config);
    let result = s.resync(Some(Vec::new())).await.unwrap();
    assert!(result.is_success());
    assert_eq!(result.operations(), 0);
    assert!(mutating(dp.calls()).is_empty());
    let node = s.node("item/stray").unwrap();
    assert_eq!(node.origin, Origin::FromNb);
    assert_eq!(node.state, NodeState::Configured);
    assert!(node.adopted);

    let again = s.resync(Some(Vec::new())).await.unwrap();
    assert_eq!(again.operations(), 0);
    assert!(mutating(dp.calls()).is_empty());
    assert!(dp.live.lock().contains_key("item/stray"));

    // Once desired, an adopted item is owned like any other.
    s.commit(Txn::new().put("item/stray", Item::new(1)))
        .await
        .unwrap();
    assert!(!s.node("item/stray").unwrap().adopted);
    s.commit(Txn::new().delete("item/stray")).await.unwrap();
    assert_eq!(mutating(dp.calls()), vec!["delete item/stray"]);
    assert!(s.node("item/stray").is_none());
}

#[tokio::test]
async fn test_metadata_index_tracks_lifecycle() {
    let dp = Dataplane::default();
    let index = Arc::new(MetadataIndex::with_handles("item", |h: &u32| *h));
    let mut s = KvScheduler::new(SchedulerConfig::default());
    s.register(Mock::new("item", "item/", &dp).with_index(index.clone()))
        .unwrap();

    s.commit(Txn::new().put("item/a", Item::new(1)))
        .await
        .unwrap();
    assert_eq!(index.lookup_by_name("a"), Some(1));
    assert_eq!(index.lookup_by_handle(1).map(|(name, _)| name), Some("a".to_string()));

    s.commit(Txn::new().delete("item/a")).await.unwrap();
    assert!(index.lookup_by_name("a").is_none());
    assert!(index.is_empty());
}

#[tokio::test]
async fn test_retrieve_failure_keeps_graph() {
    let dp = Dataplane::default();
    let mut s = scheduler(&dp);
    s.commit(Txn::new().put("item/a", Item::new(1)))
        .await
        .unwrap();
    dp.fail("item", vec![DescriptorError::timeout("dump")]);
    dp.clear_calls();

    let result = s.resync(None).await.unwrap();

    assert!(!result.is_success());
    assert_eq!(result.retrieve_errors.len(), 1);
    assert_eq!(result.retrieve_errors[0].0, "item");
    assert!(mutating(dp.calls()).is_empty());
    assert_eq!(s.node("item/a").unwrap().state, NodeState::Configured);
}

#[tokio::test]
async fn test_history_is_bounded() {
    let dp = Dataplane::default();
    let config = SchedulerConfig {
        history_size: 2,
        ..Default::default()
    };
    let mut s = scheduler_with(&dp, config);
    for i in 1..=4 {
        s.commit(Txn::new().put("item/a", Item::new(i)))
            .await
            .unwrap();
    }
    let seqs: Vec<u64> = s.history().map(|r| r.seq).collect();
    assert_eq!(seqs, vec![3, 4]);
}

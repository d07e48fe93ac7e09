use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::config::CoordinatorConfig;
use crate::model::EntityContext;
use crate::strategy::StrategyRegistry;
use crate::watch::WatchHandler;
use crate::watch::WatchSnapshot;
use crate::Coordinator;
use crate::CoordinationStore;
use crate::CreateMode;
use crate::Flags;
use crate::MemoryCluster;
use crate::MemoryStore;

pub(crate) const WAIT: Duration = Duration::from_secs(5);

/// Forwards every snapshot to a channel.
pub(crate) struct RecordingHandler {
    tx: mpsc::UnboundedSender<WatchSnapshot>,
}

impl RecordingHandler {
    pub(crate) fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<WatchSnapshot>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Arc::new(Self { tx }), rx)
    }
}

#[async_trait]
impl WatchHandler for RecordingHandler {
    async fn on_change(
        &self,
        snapshot: WatchSnapshot,
    ) {
        let _ = self.tx.send(snapshot);
    }
}

pub(crate) async fn recv_within<T>(rx: &mut mpsc::UnboundedReceiver<T>) -> T {
    tokio::time::timeout(WAIT, rx.recv())
        .await
        .expect("timed out waiting for notification")
        .expect("channel closed")
}

/// Asserts nothing arrives for a short while.
pub(crate) async fn assert_quiet<T: std::fmt::Debug>(rx: &mut mpsc::UnboundedReceiver<T>) {
    let result = tokio::time::timeout(Duration::from_millis(100), rx.recv()).await;
    assert!(result.is_err(), "unexpected notification: {:?}", result);
}

/// Polls `check` until it returns true or the wait budget runs out.
pub(crate) async fn eventually<F, Fut>(check: F) -> bool
where
    F: Fn() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + WAIT;
    while tokio::time::Instant::now() < deadline {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    false
}

/// Polls a synchronous condition, typically over cached state kept current by watches.
pub(crate) async fn wait_until(check: impl Fn() -> bool) -> bool {
    eventually(|| std::future::ready(check())).await
}

pub(crate) fn memory_store() -> (MemoryCluster, Arc<MemoryStore>) {
    let cluster = MemoryCluster::new();
    let store = cluster.connect();
    (cluster, store)
}

pub(crate) fn as_dyn(store: &Arc<MemoryStore>) -> Arc<dyn CoordinationStore> {
    store.clone()
}

pub(crate) async fn mkdir(
    store: &dyn CoordinationStore,
    path: &str,
) {
    crate::ensure_path(store, path).await.unwrap();
}

pub(crate) async fn put_node(
    store: &dyn CoordinationStore,
    path: &str,
    data: &[u8],
) {
    store.create(path, data.to_vec(), CreateMode::Persistent).await.unwrap();
}

pub(crate) fn entity_context(store: &Arc<MemoryStore>) -> EntityContext {
    entity_context_with(store, CoordinatorConfig::default())
}

pub(crate) fn entity_context_with(
    store: &Arc<MemoryStore>,
    config: CoordinatorConfig,
) -> EntityContext {
    EntityContext::new(as_dyn(store), Arc::new(config))
}

/// Connects a coordinator with default settings over a fresh session of `cluster`.
pub(crate) async fn connect_coordinator(cluster: &MemoryCluster) -> Coordinator {
    connect_coordinator_with(cluster, CoordinatorConfig::default()).await
}

pub(crate) async fn connect_coordinator_with(
    cluster: &MemoryCluster,
    config: CoordinatorConfig,
) -> Coordinator {
    Coordinator::connect(cluster.connect(), config, StrategyRegistry::with_defaults())
        .await
        .unwrap()
}

pub(crate) fn flags(names: &[&str]) -> Flags {
    names.iter().map(|n| n.to_string()).collect()
}

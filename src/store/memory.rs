//! In-process coordination service.
//!
//! [`MemoryCluster`] plays the server: one namespace shared by any number of
//! [`MemoryStore`] sessions. Each session can be disconnected, reconnected or expired
//! to exercise the coordinator's session handling.

use std::collections::BTreeSet;
use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::watch;
use tracing::debug;
use tracing::trace;

use super::node_name;
use super::parent_of;
use super::validate_path;
use super::CoordinationStore;
use super::CreateMode;
use super::EventType;
use super::SessionId;
use super::SessionState;
use super::Stat;
use super::StoreResult;
use super::WatchedEvent;
use super::Watcher;
use crate::constants::SEQUENTIAL_SUFFIX_WIDTH;
use crate::utils::time::now_ms;
use crate::StoreError;

struct Node {
    data: Vec<u8>,
    stat: Stat,
    children: BTreeSet<String>,
    next_sequence: u64,
}

impl Node {
    fn new(
        data: Vec<u8>,
        ephemeral_owner: Option<SessionId>,
    ) -> Self {
        let now = now_ms();
        Self {
            data,
            stat: Stat {
                version: 0,
                cversion: 0,
                ctime_ms: now,
                mtime_ms: now,
                ephemeral_owner,
                num_children: 0,
            },
            children: BTreeSet::new(),
            next_sequence: 0,
        }
    }
}

type PendingWatches = HashMap<String, Vec<(SessionId, Watcher)>>;
type Fired = Vec<(Watcher, WatchedEvent)>;

struct Tree {
    nodes: HashMap<String, Node>,
    data_watches: PendingWatches,
    child_watches: PendingWatches,
}

impl Tree {
    fn new() -> Self {
        let mut nodes = HashMap::new();
        nodes.insert("/".to_string(), Node::new(Vec::new(), None));
        Self {
            nodes,
            data_watches: HashMap::new(),
            child_watches: HashMap::new(),
        }
    }

    fn trigger(
        watches: &mut PendingWatches,
        path: &str,
        event_type: EventType,
        fired: &mut Fired,
    ) {
        if let Some(list) = watches.remove(path) {
            for (_, watcher) in list {
                fired.push((watcher, WatchedEvent::node(event_type, path)));
            }
        }
    }

    fn create(
        &mut self,
        path: &str,
        data: Vec<u8>,
        mode: CreateMode,
        session_id: SessionId,
        fired: &mut Fired,
    ) -> StoreResult<String> {
        validate_path(path)?;
        let parent_path = parent_of(path).ok_or_else(|| StoreError::NodeExists(path.to_string()))?;

        let parent = self
            .nodes
            .get_mut(parent_path)
            .ok_or_else(|| StoreError::NoNode(parent_path.to_string()))?;
        if parent.stat.ephemeral_owner.is_some() {
            return Err(StoreError::NoChildrenForEphemerals(path.to_string()));
        }

        let actual_path = if mode.is_sequential() {
            let sequence = parent.next_sequence;
            format!("{path}{sequence:0width$}", width = SEQUENTIAL_SUFFIX_WIDTH)
        } else {
            path.to_string()
        };
        let name = node_name(&actual_path).to_string();
        if parent.children.contains(&name) {
            return Err(StoreError::NodeExists(actual_path));
        }

        if mode.is_sequential() {
            parent.next_sequence += 1;
        }
        parent.children.insert(name);
        parent.stat.cversion += 1;
        parent.stat.num_children = parent.children.len();

        let owner = mode.is_ephemeral().then_some(session_id);
        self.nodes.insert(actual_path.clone(), Node::new(data, owner));

        Self::trigger(&mut self.data_watches, &actual_path, EventType::NodeCreated, fired);
        Self::trigger(
            &mut self.child_watches,
            parent_path,
            EventType::NodeChildrenChanged,
            fired,
        );
        Ok(actual_path)
    }

    fn set_data(
        &mut self,
        path: &str,
        data: Vec<u8>,
        expected_version: Option<i32>,
        fired: &mut Fired,
    ) -> StoreResult<Stat> {
        validate_path(path)?;
        let node = self.nodes.get_mut(path).ok_or_else(|| StoreError::NoNode(path.to_string()))?;
        if let Some(expected) = expected_version {
            if expected != node.stat.version {
                return Err(StoreError::BadVersion {
                    path: path.to_string(),
                    expected,
                    actual: node.stat.version,
                });
            }
        }
        node.data = data;
        node.stat.version += 1;
        node.stat.mtime_ms = now_ms();
        let stat = node.stat.clone();

        Self::trigger(&mut self.data_watches, path, EventType::NodeDataChanged, fired);
        Ok(stat)
    }

    fn delete(
        &mut self,
        path: &str,
        expected_version: Option<i32>,
        fired: &mut Fired,
    ) -> StoreResult<()> {
        validate_path(path)?;
        let parent_path = parent_of(path).ok_or_else(|| StoreError::InvalidPath(path.to_string()))?;
        let node = self.nodes.get(path).ok_or_else(|| StoreError::NoNode(path.to_string()))?;
        if let Some(expected) = expected_version {
            if expected != node.stat.version {
                return Err(StoreError::BadVersion {
                    path: path.to_string(),
                    expected,
                    actual: node.stat.version,
                });
            }
        }
        if !node.children.is_empty() {
            return Err(StoreError::NotEmpty(path.to_string()));
        }

        self.nodes.remove(path);
        if let Some(parent) = self.nodes.get_mut(parent_path) {
            parent.children.remove(node_name(path));
            parent.stat.cversion += 1;
            parent.stat.num_children = parent.children.len();
        }

        Self::trigger(&mut self.data_watches, path, EventType::NodeDeleted, fired);
        Self::trigger(&mut self.child_watches, path, EventType::NodeDeleted, fired);
        Self::trigger(
            &mut self.child_watches,
            parent_path,
            EventType::NodeChildrenChanged,
            fired,
        );
        Ok(())
    }

    /// Drops every watch owned by `session_id`, reporting `state` to each.
    fn drain_session_watches(
        &mut self,
        session_id: SessionId,
        state: SessionState,
        fired: &mut Fired,
    ) {
        for watches in [&mut self.data_watches, &mut self.child_watches] {
            for list in watches.values_mut() {
                let (owned, kept): (Vec<_>, Vec<_>) =
                    std::mem::take(list).into_iter().partition(|(owner, _)| *owner == session_id);
                *list = kept;
                fired.extend(owned.into_iter().map(|(_, w)| (w, WatchedEvent::session(state))));
            }
            watches.retain(|_, list| !list.is_empty());
        }
    }

    fn ephemerals_of(
        &self,
        session_id: SessionId,
    ) -> Vec<String> {
        self.nodes
            .iter()
            .filter(|(_, node)| node.stat.ephemeral_owner == Some(session_id))
            .map(|(path, _)| path.clone())
            .collect()
    }
}

fn deliver(fired: Fired) {
    for (watcher, event) in fired {
        trace!(path = %event.path, event_type = ?event.event_type, "deliver watch event");
        // The receiving side may already be gone (cancelled watch)
        let _ = watcher.send(event);
    }
}

struct ClusterInner {
    tree: Mutex<Tree>,
    sessions: DashMap<SessionId, Arc<watch::Sender<SessionState>>>,
    next_session_id: AtomicU64,
}

impl ClusterInner {
    fn end_session(
        &self,
        session_id: SessionId,
    ) {
        let Some((_, state_tx)) = self.sessions.remove(&session_id) else {
            return;
        };
        let mut fired = Vec::new();
        {
            let mut tree = self.tree.lock();
            tree.drain_session_watches(session_id, SessionState::Expired, &mut fired);
            for path in tree.ephemerals_of(session_id) {
                if let Err(e) = tree.delete(&path, None, &mut fired) {
                    debug!(session_id, %path, "ephemeral cleanup skipped: {:?}", e);
                }
            }
        }
        state_tx.send_replace(SessionState::Expired);
        deliver(fired);
        debug!(session_id, "session ended");
    }
}

/// Shared in-memory namespace. Cheap to clone.
#[derive(Clone)]
pub struct MemoryCluster {
    inner: Arc<ClusterInner>,
}

impl Default for MemoryCluster {
    fn default() -> Self {
        Self::new()
    }
}

impl Debug for MemoryCluster {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("MemoryCluster")
            .field("sessions", &self.inner.sessions.len())
            .finish_non_exhaustive()
    }
}

impl MemoryCluster {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(ClusterInner {
                tree: Mutex::new(Tree::new()),
                sessions: DashMap::new(),
                next_session_id: AtomicU64::new(1),
            }),
        }
    }

    /// Opens a new session.
    pub fn connect(&self) -> Arc<MemoryStore> {
        let session_id = self.inner.next_session_id.fetch_add(1, Ordering::SeqCst);
        let (state_tx, _) = watch::channel(SessionState::Connected);
        let state_tx = Arc::new(state_tx);
        self.inner.sessions.insert(session_id, state_tx.clone());
        debug!(session_id, "session opened");
        Arc::new(MemoryStore {
            cluster: self.inner.clone(),
            session_id,
            state_tx,
        })
    }

    /// Expires a session from the server side, as a session timeout would.
    pub fn expire_session(
        &self,
        session_id: SessionId,
    ) {
        self.inner.end_session(session_id);
    }

    pub fn session_count(&self) -> usize {
        self.inner.sessions.len()
    }

    pub fn contains(
        &self,
        path: &str,
    ) -> bool {
        self.inner.tree.lock().nodes.contains_key(path)
    }

    /// All node paths in lexicographic order.
    pub fn paths(&self) -> Vec<String> {
        let mut paths: Vec<String> = self.inner.tree.lock().nodes.keys().cloned().collect();
        paths.sort();
        paths
    }
}

/// One session against a [`MemoryCluster`]. Dropping it ends the session.
pub struct MemoryStore {
    cluster: Arc<ClusterInner>,
    session_id: SessionId,
    state_tx: Arc<watch::Sender<SessionState>>,
}

impl Debug for MemoryStore {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("MemoryStore")
            .field("session_id", &self.session_id)
            .field("state", &*self.state_tx.borrow())
            .finish()
    }
}

impl MemoryStore {
    fn check_connected(&self) -> StoreResult<()> {
        match *self.state_tx.borrow() {
            SessionState::Connected => Ok(()),
            SessionState::Disconnected => Err(StoreError::ConnectionLoss),
            SessionState::Expired => Err(StoreError::SessionExpired),
        }
    }

    fn with_tree<R>(
        &self,
        op: impl FnOnce(&mut Tree, &mut Fired) -> StoreResult<R>,
    ) -> StoreResult<R> {
        self.check_connected()?;
        let mut fired = Vec::new();
        let result = {
            let mut tree = self.cluster.tree.lock();
            op(&mut tree, &mut fired)
        };
        deliver(fired);
        result
    }

    /// Simulates a dropped connection. Pending watches receive a session event and
    /// every call fails with `ConnectionLoss` until [`reconnect`](Self::reconnect).
    pub fn disconnect(&self) {
        if *self.state_tx.borrow() != SessionState::Connected {
            return;
        }
        let mut fired = Vec::new();
        self.cluster.tree.lock().drain_session_watches(
            self.session_id,
            SessionState::Disconnected,
            &mut fired,
        );
        self.state_tx.send_replace(SessionState::Disconnected);
        deliver(fired);
        debug!(session_id = self.session_id, "session disconnected");
    }

    pub fn reconnect(&self) {
        if *self.state_tx.borrow() == SessionState::Disconnected {
            self.state_tx.send_replace(SessionState::Connected);
            debug!(session_id = self.session_id, "session reconnected");
        }
    }

    /// Ends the session; its ephemeral nodes disappear.
    pub fn close(&self) {
        self.cluster.end_session(self.session_id);
    }
}

impl Drop for MemoryStore {
    fn drop(&mut self) {
        self.cluster.end_session(self.session_id);
    }
}

#[async_trait]
impl CoordinationStore for MemoryStore {
    fn session_id(&self) -> SessionId {
        self.session_id
    }

    fn session_state(&self) -> SessionState {
        *self.state_tx.borrow()
    }

    fn subscribe_session(&self) -> watch::Receiver<SessionState> {
        self.state_tx.subscribe()
    }

    async fn create(
        &self,
        path: &str,
        data: Vec<u8>,
        mode: CreateMode,
    ) -> StoreResult<String> {
        trace!(%path, ?mode, "create");
        let session_id = self.session_id;
        self.with_tree(|tree, fired| tree.create(path, data, mode, session_id, fired))
    }

    async fn get_data(
        &self,
        path: &str,
        watcher: Option<Watcher>,
    ) -> StoreResult<(Vec<u8>, Stat)> {
        let session_id = self.session_id;
        self.with_tree(|tree, _| {
            validate_path(path)?;
            let node = tree.nodes.get(path).ok_or_else(|| StoreError::NoNode(path.to_string()))?;
            let result = (node.data.clone(), node.stat.clone());
            if let Some(watcher) = watcher {
                tree.data_watches.entry(path.to_string()).or_default().push((session_id, watcher));
            }
            Ok(result)
        })
    }

    async fn set_data(
        &self,
        path: &str,
        data: Vec<u8>,
        expected_version: Option<i32>,
    ) -> StoreResult<Stat> {
        trace!(%path, ?expected_version, "set_data");
        self.with_tree(|tree, fired| tree.set_data(path, data, expected_version, fired))
    }

    async fn delete(
        &self,
        path: &str,
        expected_version: Option<i32>,
    ) -> StoreResult<()> {
        trace!(%path, "delete");
        self.with_tree(|tree, fired| tree.delete(path, expected_version, fired))
    }

    async fn exists(
        &self,
        path: &str,
        watcher: Option<Watcher>,
    ) -> StoreResult<Option<Stat>> {
        let session_id = self.session_id;
        self.with_tree(|tree, _| {
            validate_path(path)?;
            let stat = tree.nodes.get(path).map(|node| node.stat.clone());
            if let Some(watcher) = watcher {
                tree.data_watches.entry(path.to_string()).or_default().push((session_id, watcher));
            }
            Ok(stat)
        })
    }

    async fn get_children(
        &self,
        path: &str,
        watcher: Option<Watcher>,
    ) -> StoreResult<Vec<String>> {
        let session_id = self.session_id;
        self.with_tree(|tree, _| {
            validate_path(path)?;
            let node = tree.nodes.get(path).ok_or_else(|| StoreError::NoNode(path.to_string()))?;
            let children = node.children.iter().cloned().collect();
            if let Some(watcher) = watcher {
                tree.child_watches.entry(path.to_string()).or_default().push((session_id, watcher));
            }
            Ok(children)
        })
    }
}

//! Coordination-service contract.
//!
//! The coordinator only needs a small, ZooKeeper-shaped substrate:
//! - a hierarchical namespace of byte-valued nodes
//! - persistent / ephemeral / sequential creation modes
//! - data writes conditional on a per-node version stamp
//! - one-shot watches on a node's data and on its child list
//! - session-scoped ephemeral nodes
//!
//! There are no multi-path transactions. Recursive delete is implemented client-side in
//! [`delete_recursive`]. [`MemoryCluster`] is an in-process implementation of the whole
//! contract.

mod memory;
mod ops;

#[cfg(test)]
mod ops_test;

pub use memory::*;
pub use ops::*;

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use tokio::sync::oneshot;
use tokio::sync::watch;

use crate::StoreError;

pub type StoreResult<T> = std::result::Result<T, StoreError>;

pub type SessionId = u64;

/// One-shot watch registration handed to a read call. Fires at most once.
pub type Watcher = oneshot::Sender<WatchedEvent>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CreateMode {
    Persistent,
    Ephemeral,
    PersistentSequential,
    EphemeralSequential,
}

impl CreateMode {
    pub fn is_ephemeral(&self) -> bool {
        matches!(self, CreateMode::Ephemeral | CreateMode::EphemeralSequential)
    }

    pub fn is_sequential(&self) -> bool {
        matches!(
            self,
            CreateMode::PersistentSequential | CreateMode::EphemeralSequential
        )
    }
}

/// Node metadata returned alongside reads and writes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Stat {
    /// Data version, incremented by every successful write
    pub version: i32,
    /// Child-list version, incremented by every child create/delete
    pub cversion: i32,
    pub ctime_ms: u64,
    pub mtime_ms: u64,
    /// Owning session for ephemeral nodes
    pub ephemeral_owner: Option<SessionId>,
    pub num_children: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    Connected,
    Disconnected,
    Expired,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventType {
    NodeCreated,
    NodeDeleted,
    NodeDataChanged,
    NodeChildrenChanged,
    /// Connection state changed; pending watches are discarded
    Session,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchedEvent {
    pub event_type: EventType,
    pub path: String,
    /// Session state at the time the event was produced
    pub state: SessionState,
}

impl WatchedEvent {
    pub(crate) fn node(
        event_type: EventType,
        path: &str,
    ) -> Self {
        Self {
            event_type,
            path: path.to_string(),
            state: SessionState::Connected,
        }
    }

    pub(crate) fn session(state: SessionState) -> Self {
        Self {
            event_type: EventType::Session,
            path: String::new(),
            state,
        }
    }
}

/// One client session against the coordination service.
///
/// All calls may block on network I/O. Implementations must:
/// - register the supplied watcher atomically with the read it accompanies
/// - deliver a [`EventType::Session`] event to pending watchers when the connection drops
/// - remove the session's ephemeral nodes when the session ends
#[cfg_attr(test, automock)]
#[async_trait]
pub trait CoordinationStore: Send + Sync + 'static {
    fn session_id(&self) -> SessionId;

    fn session_state(&self) -> SessionState;

    fn subscribe_session(&self) -> watch::Receiver<SessionState>;

    /// Creates a node and returns its actual path (differs for sequential modes).
    /// Fails with `NoNode` when the parent is missing and `NodeExists` on collision.
    async fn create(
        &self,
        path: &str,
        data: Vec<u8>,
        mode: CreateMode,
    ) -> StoreResult<String>;

    /// Reads a node. The watcher is only registered when the node exists.
    async fn get_data(
        &self,
        path: &str,
        watcher: Option<Watcher>,
    ) -> StoreResult<(Vec<u8>, Stat)>;

    /// Writes a node, failing with `BadVersion` when `expected_version` does not match.
    async fn set_data(
        &self,
        path: &str,
        data: Vec<u8>,
        expected_version: Option<i32>,
    ) -> StoreResult<Stat>;

    async fn delete(
        &self,
        path: &str,
        expected_version: Option<i32>,
    ) -> StoreResult<()>;

    /// Checks existence. The watcher is registered either way and fires on create,
    /// data change or delete.
    async fn exists(
        &self,
        path: &str,
        watcher: Option<Watcher>,
    ) -> StoreResult<Option<Stat>>;

    /// Lists child names (unordered). The watcher is only registered when the node exists.
    async fn get_children(
        &self,
        path: &str,
        watcher: Option<Watcher>,
    ) -> StoreResult<Vec<String>>;
}

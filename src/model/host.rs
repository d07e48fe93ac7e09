use std::collections::BTreeMap;
use std::fmt::Debug;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::sync::Weak;

use async_trait::async_trait;
use serde::Deserialize;
use serde::Serialize;
use tracing::debug;
use tracing::info;
use tracing::instrument;

use super::Domain;
use super::EntityContext;
use super::Flags;
use super::HostAddress;
use super::HostAssignments;
use super::HostCommand;
use super::HostDomain;
use super::HostDomainAssignment;
use super::HostState;
use crate::constants::COMMAND_NODE_PREFIX;
use crate::constants::HOST_ASSIGNMENTS_NODE;
use crate::constants::HOST_COMMAND_QUEUE_NODE;
use crate::constants::HOST_CURRENT_COMMAND_NODE;
use crate::constants::HOST_RUNTIME_STATISTICS_NODE;
use crate::constants::HOST_STATE_NODE;
use crate::constants::HOST_STATISTICS_NODE;
use crate::store::children_or_empty;
use crate::store::delete_if_exists;
use crate::store::join_path;
use crate::store::read_if_exists;
use crate::store::sequence_of;
use crate::utils::codec;
use crate::watch::mark_complete;
use crate::watch::CellValue;
use crate::watch::CollectionEntity;
use crate::watch::ListenerId;
use crate::watch::ListenerSet;
use crate::watch::ReactiveWatch;
use crate::watch::ScalarCell;
use crate::watch::StructuredRecord;
use crate::watch::WatchHandler;
use crate::watch::WatchKind;
use crate::watch::WatchSnapshot;
use crate::CreateMode;
use crate::Result;
use crate::StoreError;
use crate::UsageError;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostMetadata {
    pub flags: Flags,
}

/// Forwards command-queue structure changes to the host's listeners.
struct CommandQueueWatchHandler {
    address: HostAddress,
    listeners: Weak<ListenerSet<HostAddress>>,
}

#[async_trait]
impl WatchHandler for CommandQueueWatchHandler {
    async fn on_change(
        &self,
        _snapshot: WatchSnapshot,
    ) {
        if let Some(listeners) = self.listeners.upgrade() {
            listeners.notify(&self.address);
        }
    }
}

/// One serving process: its state, command queue and partition assignments.
///
/// ```text
/// <host>/
///   state              ephemeral, absent while offline
///   assignments        domain id -> partitions
///   commands/command_* FIFO queue
///   current_command
///   statistics         persistent key/value map
///   runtime_statistics ephemeral blob
/// ```
pub struct Host {
    address: HostAddress,
    path: String,
    ctx: EntityContext,
    metadata: StructuredRecord<HostMetadata>,
    state: ScalarCell<HostState>,
    current_command: ScalarCell<HostCommand>,
    assignments: Arc<StructuredRecord<HostAssignments>>,
    statistics: StructuredRecord<BTreeMap<String, String>>,
    runtime_statistics: ScalarCell<Vec<u8>>,
    command_watch: ReactiveWatch,
    command_queue_listeners: Arc<ListenerSet<HostAddress>>,
    data_location_listeners: Arc<ListenerSet<HostAddress>>,
}

impl Debug for Host {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("Host")
            .field("address", &self.address)
            .field("state", &self.state())
            .field("current_command", &self.current_command())
            .finish()
    }
}

impl Host {
    /// Writes a new host subtree at `path` and publishes it.
    pub(crate) async fn create(
        ctx: EntityContext,
        path: &str,
        address: HostAddress,
        flags: Flags,
    ) -> Result<Self> {
        let store = ctx.store();
        match store
            .create(path, codec::encode(&HostMetadata { flags })?, CreateMode::Persistent)
            .await
        {
            Ok(_) => {}
            Err(StoreError::NodeExists(_)) => {
                return Err(UsageError::AlreadyExists {
                    kind: "host",
                    name: address.to_string(),
                }
                .into())
            }
            Err(e) => return Err(e.into()),
        }
        store
            .create(
                &join_path(path, HOST_ASSIGNMENTS_NODE),
                codec::encode(&HostAssignments::default())?,
                CreateMode::Persistent,
            )
            .await?;
        store
            .create(&join_path(path, HOST_COMMAND_QUEUE_NODE), Vec::new(), CreateMode::Persistent)
            .await?;
        store
            .create(
                &join_path(path, HOST_STATISTICS_NODE),
                codec::encode(&BTreeMap::<String, String>::new())?,
                CreateMode::Persistent,
            )
            .await?;
        mark_complete(store, path).await?;
        info!(%address, "host created");

        Self::load(ctx, path, address).await
    }

    pub(crate) async fn load(
        ctx: EntityContext,
        path: &str,
        address: HostAddress,
    ) -> Result<Self> {
        let store = ctx.store.clone();
        let retry = ctx.retry();
        let metadata = StructuredRecord::load(store.clone(), path, "host", retry).await?;
        let state = ScalarCell::open(store.clone(), join_path(path, HOST_STATE_NODE), true).await?;
        let current_command =
            ScalarCell::open(store.clone(), join_path(path, HOST_CURRENT_COMMAND_NODE), false).await?;
        let assignments = Arc::new(
            StructuredRecord::load(
                store.clone(),
                join_path(path, HOST_ASSIGNMENTS_NODE),
                "host_assignments",
                retry,
            )
            .await?,
        );
        let statistics =
            StructuredRecord::load(store.clone(), join_path(path, HOST_STATISTICS_NODE), "host_statistics", retry)
                .await?;
        let runtime_statistics =
            ScalarCell::open(store.clone(), join_path(path, HOST_RUNTIME_STATISTICS_NODE), true).await?;

        let command_queue_listeners = Arc::new(ListenerSet::new());
        let (command_watch, _) = ReactiveWatch::arm(
            store,
            join_path(path, HOST_COMMAND_QUEUE_NODE),
            WatchKind::Children,
            Arc::new(CommandQueueWatchHandler {
                address: address.clone(),
                listeners: Arc::downgrade(&command_queue_listeners),
            }),
        )
        .await?;

        let data_location_listeners: Arc<ListenerSet<HostAddress>> = Arc::new(ListenerSet::new());
        {
            let listeners = Arc::downgrade(&data_location_listeners);
            let address = address.clone();
            assignments.add_listener(move |_| {
                if let Some(listeners) = listeners.upgrade() {
                    listeners.notify(&address);
                }
            });
        }

        Ok(Self {
            address,
            path: path.to_string(),
            ctx,
            metadata,
            state,
            current_command,
            assignments,
            statistics,
            runtime_statistics,
            command_watch,
            command_queue_listeners,
            data_location_listeners,
        })
    }

    pub fn address(&self) -> &HostAddress {
        &self.address
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn flags(&self) -> Flags {
        self.metadata.get().flags.clone()
    }

    pub async fn set_flags(
        &self,
        flags: Flags,
    ) -> Result<()> {
        self.metadata.update(|m| m.flags = flags.clone()).await?;
        Ok(())
    }

    // -
    // State

    /// Last observed state; [`HostState::Offline`] when no state is stored.
    pub fn state(&self) -> HostState {
        self.state.get_or(HostState::Offline)
    }

    /// Stores the state in an ephemeral node, so it reverts to offline when this session
    /// ends. Setting [`HostState::Offline`] deletes the node.
    pub async fn set_state(
        &self,
        state: HostState,
    ) -> Result<()> {
        let value = (state != HostState::Offline).then_some(state);
        self.state.set(value).await?;
        debug!(address = %self.address, ?state, "host state set");
        Ok(())
    }

    pub fn is_online(&self) -> bool {
        self.state() != HostState::Offline
    }

    // -
    // Command queue

    fn command_queue_path(&self) -> String {
        join_path(&self.path, HOST_COMMAND_QUEUE_NODE)
    }

    /// Queued command node names, oldest first.
    async fn queued_names(&self) -> Result<Vec<String>> {
        let mut names: Vec<String> = children_or_empty(self.ctx.store(), &self.command_queue_path())
            .await?
            .into_iter()
            .filter(|name| name.starts_with(COMMAND_NODE_PREFIX))
            .collect();
        names.sort_by_key(|name| sequence_of(name));
        Ok(names)
    }

    pub async fn enqueue_command(
        &self,
        command: HostCommand,
    ) -> Result<()> {
        let path = self
            .ctx
            .store()
            .create(
                &join_path(&self.command_queue_path(), COMMAND_NODE_PREFIX),
                command.encode(),
                CreateMode::PersistentSequential,
            )
            .await?;
        debug!(address = %self.address, ?command, %path, "command enqueued");
        Ok(())
    }

    /// Pending commands in FIFO order.
    pub async fn command_queue(&self) -> Result<Vec<HostCommand>> {
        let queue_path = self.command_queue_path();
        let mut commands = Vec::new();
        for name in self.queued_names().await? {
            if let Some((bytes, _)) = read_if_exists(self.ctx.store(), &join_path(&queue_path, &name), None).await? {
                commands.push(HostCommand::decode(&bytes)?);
            }
        }
        Ok(commands)
    }

    /// Moves the head of the queue into the current-command cell and returns it.
    ///
    /// The current command is written before the queue entry is deleted, so an observer
    /// of the current command always sees a command that is still in flight. When the
    /// queue is empty the current command is cleared and `None` is returned.
    #[instrument(skip(self), fields(address = %self.address))]
    pub async fn next_command(&self) -> Result<Option<HostCommand>> {
        let store = self.ctx.store();
        let queue_path = self.command_queue_path();
        loop {
            let Some(head) = self.queued_names().await?.into_iter().next() else {
                self.current_command.set(None).await?;
                return Ok(None);
            };
            let head_path = join_path(&queue_path, &head);
            let Some((bytes, _)) = read_if_exists(store, &head_path, None).await? else {
                continue;
            };
            let command = HostCommand::decode(&bytes)?;

            self.current_command.set(Some(command)).await?;
            match store.delete(&head_path, None).await {
                Ok(()) => {
                    debug!(?command, "command dequeued");
                    return Ok(Some(command));
                }
                // Taken by a concurrent consumer; move on to the next entry
                Err(StoreError::NoNode(_)) => continue,
                Err(e) => return Err(e.into()),
            }
        }
    }

    pub fn current_command(&self) -> Option<HostCommand> {
        self.current_command.get()
    }

    pub async fn clear_current_command(&self) -> Result<()> {
        self.current_command.set(None).await
    }

    /// Drops every pending command. The current command is left untouched.
    pub async fn clear_command_queue(&self) -> Result<usize> {
        let queue_path = self.command_queue_path();
        let mut cleared = 0;
        for name in self.queued_names().await? {
            if delete_if_exists(self.ctx.store(), &join_path(&queue_path, &name)).await? {
                cleared += 1;
            }
        }
        info!(address = %self.address, cleared, "command queue cleared");
        Ok(cleared)
    }

    // -
    // Assignments

    pub fn assigned_domains(&self) -> Vec<HostDomain> {
        self.assignments
            .get()
            .domains
            .keys()
            .map(|id| HostDomain::new(self.address.clone(), *id, self.assignments.clone()))
            .collect()
    }

    pub fn host_domain(
        &self,
        domain_id: u32,
    ) -> Option<HostDomain> {
        self.assignments
            .get()
            .domains
            .contains_key(&domain_id)
            .then(|| HostDomain::new(self.address.clone(), domain_id, self.assignments.clone()))
    }

    /// Assigns `domain` to this host with no partitions yet.
    pub async fn add_domain(
        &self,
        domain: &Domain,
    ) -> Result<HostDomain> {
        let domain_id = domain.id();
        let num_partitions = domain.num_partitions();
        self.assignments
            .try_update(|a| {
                if a.domains.contains_key(&domain_id) {
                    return Err(UsageError::DuplicateAssignment(format!(
                        "domain {} on host {}",
                        domain_id, self.address
                    ))
                    .into());
                }
                a.domains.insert(
                    domain_id,
                    HostDomainAssignment {
                        num_partitions,
                        ..Default::default()
                    },
                );
                Ok(())
            })
            .await?;
        info!(address = %self.address, domain = %domain.name(), "domain assigned");
        Ok(HostDomain::new(self.address.clone(), domain_id, self.assignments.clone()))
    }

    /// Unassigns a domain and all its partitions. Returns whether it was assigned.
    pub async fn remove_domain(
        &self,
        domain_id: u32,
    ) -> Result<bool> {
        let removed = AtomicBool::new(false);
        self.assignments
            .update(|a| removed.store(a.domains.remove(&domain_id).is_some(), Ordering::SeqCst))
            .await?;
        Ok(removed.load(Ordering::SeqCst))
    }

    // -
    // Statistics

    pub fn statistic(
        &self,
        key: &str,
    ) -> Option<String> {
        self.statistics.get().get(key).cloned()
    }

    pub fn statistics(&self) -> BTreeMap<String, String> {
        (*self.statistics.get()).clone()
    }

    pub async fn set_statistic(
        &self,
        key: &str,
        value: &str,
    ) -> Result<()> {
        self.statistics
            .update(|s| {
                s.insert(key.to_string(), value.to_string());
            })
            .await?;
        Ok(())
    }

    pub async fn delete_statistic(
        &self,
        key: &str,
    ) -> Result<bool> {
        let removed = AtomicBool::new(false);
        self.statistics
            .update(|s| removed.store(s.remove(key).is_some(), Ordering::SeqCst))
            .await?;
        Ok(removed.load(Ordering::SeqCst))
    }

    /// Telemetry published by the running server; absent while it is down.
    pub fn runtime_statistics(&self) -> Option<Vec<u8>> {
        self.runtime_statistics.get()
    }

    pub async fn set_runtime_statistics(
        &self,
        statistics: Option<Vec<u8>>,
    ) -> Result<()> {
        self.runtime_statistics.set(statistics).await
    }

    // -
    // Listeners

    pub fn add_state_listener(
        &self,
        listener: impl Fn(&HostState) + Send + Sync + 'static,
    ) -> ListenerId {
        self.state
            .add_listener(move |state: &Option<HostState>| listener(&state.unwrap_or(HostState::Offline)))
    }

    pub fn remove_state_listener(
        &self,
        id: ListenerId,
    ) -> bool {
        self.state.remove_listener(id)
    }

    /// Fires on every enqueue, dequeue or clear, with this host's address.
    pub fn add_command_queue_listener(
        &self,
        listener: impl Fn(&HostAddress) + Send + Sync + 'static,
    ) -> ListenerId {
        self.command_queue_listeners.add(listener)
    }

    pub fn remove_command_queue_listener(
        &self,
        id: ListenerId,
    ) -> bool {
        self.command_queue_listeners.remove(id)
    }

    /// Fires whenever the host's domain or partition assignments change.
    pub fn add_data_location_listener(
        &self,
        listener: impl Fn(&HostAddress) + Send + Sync + 'static,
    ) -> ListenerId {
        self.data_location_listeners.add(listener)
    }

    pub fn remove_data_location_listener(
        &self,
        id: ListenerId,
    ) -> bool {
        self.data_location_listeners.remove(id)
    }

    /// Stops every watch held by this host.
    pub fn close(&self) {
        self.metadata.close();
        self.state.close();
        self.current_command.close();
        self.assignments.close();
        self.statistics.close();
        self.runtime_statistics.close();
        self.command_watch.cancel();
        debug!(address = %self.address, "host watches closed");
    }
}

impl CollectionEntity for Host {
    fn close_watches(&self) {
        self.close();
    }
}

use std::fmt::Debug;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;
use tracing::info;
use tracing::warn;

use super::EntityContext;
use super::Flags;
use super::Host;
use super::HostAddress;
use crate::constants::RING_HOSTS_NODE;
use crate::store::join_path;
use crate::watch::mark_complete;
use crate::watch::CollectionEntity;
use crate::watch::CollectionEvent;
use crate::watch::EntityLoader;
use crate::watch::ListenerId;
use crate::watch::ListenerSet;
use crate::watch::WatchedCollection;
use crate::CreateMode;
use crate::Result;
use crate::StoreError;
use crate::UsageError;

/// Loads member hosts and wires their data-location events into the ring's listeners.
struct HostLoader {
    ctx: EntityContext,
    data_location_listeners: Arc<ListenerSet<HostAddress>>,
}

impl HostLoader {
    fn forward_data_location(
        &self,
        host: &Host,
    ) {
        let listeners = Arc::downgrade(&self.data_location_listeners);
        host.add_data_location_listener(move |address| {
            if let Some(listeners) = listeners.upgrade() {
                listeners.notify(address);
            }
        });
    }
}

#[async_trait]
impl EntityLoader<Host> for HostLoader {
    async fn load(
        &self,
        name: &str,
        path: &str,
    ) -> Result<Option<Host>> {
        let address: HostAddress = match name.parse() {
            Ok(address) => address,
            Err(_) => {
                warn!(%path, "ignoring host node with malformed address");
                return Ok(None);
            }
        };
        let host = Host::load(self.ctx.clone(), path, address).await?;
        self.forward_data_location(&host);
        Ok(Some(host))
    }
}

/// A numbered set of hosts within a ring group.
pub struct Ring {
    number: u32,
    path: String,
    ctx: EntityContext,
    hosts: WatchedCollection<Host>,
    loader: Arc<HostLoader>,
}

impl Debug for Ring {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("Ring")
            .field("number", &self.number)
            .field("hosts", &self.hosts)
            .finish()
    }
}

impl Ring {
    pub(crate) async fn create(
        ctx: EntityContext,
        path: &str,
        number: u32,
    ) -> Result<Self> {
        let store = ctx.store();
        match store.create(path, Vec::new(), CreateMode::Persistent).await {
            Ok(_) => {}
            Err(StoreError::NodeExists(_)) => {
                return Err(UsageError::AlreadyExists {
                    kind: "ring",
                    name: number.to_string(),
                }
                .into())
            }
            Err(e) => return Err(e.into()),
        }
        store
            .create(&join_path(path, RING_HOSTS_NODE), Vec::new(), CreateMode::Persistent)
            .await?;
        mark_complete(store, path).await?;
        info!(%path, "ring created");
        Ok(Self::load(ctx, path, number))
    }

    /// Builds the ring handle. Hosts are listed on first access.
    pub(crate) fn load(
        ctx: EntityContext,
        path: &str,
        number: u32,
    ) -> Self {
        let loader = Arc::new(HostLoader {
            ctx: ctx.clone(),
            data_location_listeners: Arc::new(ListenerSet::new()),
        });
        let hosts = WatchedCollection::new(
            ctx.store.clone(),
            join_path(path, RING_HOSTS_NODE),
            "host",
            loader.clone(),
        );
        Self {
            number,
            path: path.to_string(),
            ctx,
            hosts,
            loader,
        }
    }

    pub fn number(&self) -> u32 {
        self.number
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub async fn hosts(&self) -> Result<Vec<Arc<Host>>> {
        self.hosts.values().await
    }

    pub async fn host(
        &self,
        address: &HostAddress,
    ) -> Result<Option<Arc<Host>>> {
        self.hosts.get(&address.to_string()).await
    }

    /// Creates a member host. Fails with a usage error when the address is taken.
    pub async fn add_host(
        &self,
        address: HostAddress,
        flags: Flags,
    ) -> Result<Arc<Host>> {
        let name = address.to_string();
        let path = self.hosts.child_path(&name);
        let host = Host::create(self.ctx.clone(), &path, address, flags).await?;
        self.loader.forward_data_location(&host);
        self.hosts.put(&name, host).await
    }

    /// Deletes a member host and stops its watches. Returns whether it existed.
    pub async fn remove_host(
        &self,
        address: &HostAddress,
    ) -> Result<bool> {
        let removed = self.hosts.remove(&address.to_string()).await?;
        debug!(ring = self.number, %address, removed, "host removed");
        Ok(removed)
    }

    /// Fires when a host joins or leaves the ring.
    pub fn add_hosts_listener(
        &self,
        listener: impl Fn(&CollectionEvent) + Send + Sync + 'static,
    ) -> ListenerId {
        self.hosts.add_listener(listener)
    }

    pub fn remove_hosts_listener(
        &self,
        id: ListenerId,
    ) -> bool {
        self.hosts.remove_listener(id)
    }

    /// Fires with the member host's address whenever its assignments change.
    pub fn add_data_location_listener(
        &self,
        listener: impl Fn(&HostAddress) + Send + Sync + 'static,
    ) -> ListenerId {
        self.loader.data_location_listeners.add(listener)
    }

    pub fn remove_data_location_listener(
        &self,
        id: ListenerId,
    ) -> bool {
        self.loader.data_location_listeners.remove(id)
    }

    pub async fn reload(&self) -> Result<()> {
        self.hosts.reload().await
    }

    /// Stops the ring's watches and those of every member host.
    pub fn close(&self) {
        self.hosts.close();
    }
}

impl CollectionEntity for Ring {
    fn close_watches(&self) {
        self.close();
    }
}

use std::fmt::Debug;
use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde::Serialize;
use tracing::debug;
use tracing::info;
use tracing::instrument;
use tracing::warn;

use super::ClientMetadata;
use super::ConductorMode;
use super::EntityContext;
use super::HostAddress;
use super::Ring;
use super::ServerMetadata;
use crate::constants::CLIENT_NODE_PREFIX;
use crate::constants::RING_GROUP_CLIENTS_NODE;
use crate::constants::RING_GROUP_CONDUCTOR_NODE;
use crate::constants::RING_GROUP_RINGS_NODE;
use crate::constants::RING_GROUP_SERVERS_NODE;
use crate::constants::RING_NODE_PREFIX;
use crate::constants::SERVER_NODE_PREFIX;
use crate::store::children_or_empty;
use crate::store::join_path;
use crate::store::read_if_exists;
use crate::store::sequence_of;
use crate::utils::codec;
use crate::watch::mark_complete;
use crate::watch::CollectionEntity;
use crate::watch::CollectionEvent;
use crate::watch::EntityLoader;
use crate::watch::ListenerId;
use crate::watch::ScalarCell;
use crate::watch::StructuredRecord;
use crate::watch::WatchedCollection;
use crate::CreateMode;
use crate::Result;
use crate::StoreError;
use crate::UsageError;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RingGroupMetadata {
    pub domain_group_name: String,
}

fn ring_name(number: u32) -> String {
    format!("{RING_NODE_PREFIX}{number}")
}

struct RingLoader {
    ctx: EntityContext,
}

#[async_trait]
impl EntityLoader<Ring> for RingLoader {
    async fn load(
        &self,
        name: &str,
        path: &str,
    ) -> Result<Option<Ring>> {
        match name.strip_prefix(RING_NODE_PREFIX).and_then(|n| n.parse().ok()) {
            Some(number) => Ok(Some(Ring::load(self.ctx.clone(), path, number))),
            None => {
                warn!(%path, "ignoring unexpected node under rings");
                Ok(None)
            }
        }
    }
}

/// The deployment of one domain group over a set of rings.
///
/// Also hosts the conductor slot, an ephemeral node held by at most one session, and
/// the ephemeral registrations of connected clients and servers.
pub struct RingGroup {
    name: String,
    path: String,
    ctx: EntityContext,
    metadata: StructuredRecord<RingGroupMetadata>,
    rings: WatchedCollection<Ring>,
    conductor: ScalarCell<ConductorMode>,
}

impl Debug for RingGroup {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("RingGroup")
            .field("name", &self.name)
            .field("domain_group", &self.metadata.get().domain_group_name)
            .field("conductor", &self.conductor.get())
            .finish()
    }
}

impl RingGroup {
    pub(crate) async fn create(
        ctx: EntityContext,
        path: &str,
        name: &str,
        domain_group_name: &str,
    ) -> Result<Self> {
        let store = ctx.store();
        let metadata = RingGroupMetadata {
            domain_group_name: domain_group_name.to_string(),
        };
        match store.create(path, codec::encode(&metadata)?, CreateMode::Persistent).await {
            Ok(_) => {}
            Err(StoreError::NodeExists(_)) => {
                return Err(UsageError::AlreadyExists {
                    kind: "ring group",
                    name: name.to_string(),
                }
                .into())
            }
            Err(e) => return Err(e.into()),
        }
        for child in [RING_GROUP_RINGS_NODE, RING_GROUP_CLIENTS_NODE, RING_GROUP_SERVERS_NODE] {
            store
                .create(&join_path(path, child), Vec::new(), CreateMode::Persistent)
                .await?;
        }
        mark_complete(store, path).await?;
        info!(%name, domain_group = %domain_group_name, "ring group created");
        Self::load(ctx, path, name).await
    }

    pub(crate) async fn load(
        ctx: EntityContext,
        path: &str,
        name: &str,
    ) -> Result<Self> {
        let store = ctx.store.clone();
        let metadata = StructuredRecord::load(store.clone(), path, "ring_group", ctx.retry()).await?;
        let conductor = ScalarCell::open(store.clone(), join_path(path, RING_GROUP_CONDUCTOR_NODE), true).await?;
        let rings = WatchedCollection::new(
            store,
            join_path(path, RING_GROUP_RINGS_NODE),
            "ring",
            Arc::new(RingLoader { ctx: ctx.clone() }),
        );
        Ok(Self {
            name: name.to_string(),
            path: path.to_string(),
            ctx,
            metadata,
            rings,
            conductor,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn domain_group_name(&self) -> String {
        self.metadata.get().domain_group_name.clone()
    }

    // -
    // Rings

    /// Member rings ordered by number.
    pub async fn rings(&self) -> Result<Vec<Arc<Ring>>> {
        let mut rings = self.rings.values().await?;
        rings.sort_by_key(|r| r.number());
        Ok(rings)
    }

    pub async fn ring(
        &self,
        number: u32,
    ) -> Result<Option<Arc<Ring>>> {
        self.rings.get(&ring_name(number)).await
    }

    pub async fn add_ring(
        &self,
        number: u32,
    ) -> Result<Arc<Ring>> {
        let name = ring_name(number);
        let ring = Ring::create(self.ctx.clone(), &self.rings.child_path(&name), number).await?;
        self.rings.put(&name, ring).await
    }

    /// Deletes a ring with all its hosts. Returns whether it existed.
    pub async fn remove_ring(
        &self,
        number: u32,
    ) -> Result<bool> {
        let removed = self.rings.remove(&ring_name(number)).await?;
        debug!(ring_group = %self.name, number, removed, "ring removed");
        Ok(removed)
    }

    /// The ring `address` belongs to, if any.
    pub async fn ring_for_host(
        &self,
        address: &HostAddress,
    ) -> Result<Option<Arc<Ring>>> {
        for ring in self.rings().await? {
            if ring.host(address).await?.is_some() {
                return Ok(Some(ring));
            }
        }
        Ok(None)
    }

    pub fn add_rings_listener(
        &self,
        listener: impl Fn(&CollectionEvent) + Send + Sync + 'static,
    ) -> ListenerId {
        self.rings.add_listener(listener)
    }

    pub fn remove_rings_listener(
        &self,
        id: ListenerId,
    ) -> bool {
        self.rings.remove_listener(id)
    }

    // -
    // Conductor

    /// Tries once to take the conductor slot. Returns whether this call took it.
    #[instrument(skip(self), fields(ring_group = %self.name))]
    pub async fn claim_conductor(
        &self,
        mode: ConductorMode,
    ) -> Result<bool> {
        let claimed = self.conductor.create_if_absent(mode).await?;
        if claimed {
            info!(?mode, "conductor claimed");
        } else {
            debug!("conductor already held");
        }
        Ok(claimed)
    }

    /// Whether this session currently holds the conductor slot.
    pub async fn is_conductor_held(&self) -> Result<bool> {
        let stat = self.ctx.store().exists(self.conductor.path(), None).await?;
        Ok(stat.and_then(|s| s.ephemeral_owner) == Some(self.ctx.store().session_id()))
    }

    /// Gives up the conductor slot. Fails when this session does not hold it.
    pub async fn release_conductor(&self) -> Result<()> {
        self.ensure_conductor_held().await?;
        self.conductor.set(None).await?;
        info!(ring_group = %self.name, "conductor released");
        Ok(())
    }

    /// Mode advertised by the current holder, `None` while the slot is free.
    pub fn conductor_mode(&self) -> Option<ConductorMode> {
        self.conductor.get()
    }

    /// Changes the advertised mode. Only the holder may do so.
    pub async fn set_conductor_mode(
        &self,
        mode: ConductorMode,
    ) -> Result<()> {
        self.ensure_conductor_held().await?;
        self.conductor.set(Some(mode)).await
    }

    pub fn is_conductor_online(&self) -> bool {
        self.conductor.get().is_some()
    }

    pub fn add_conductor_listener(
        &self,
        listener: impl Fn(&Option<ConductorMode>) + Send + Sync + 'static,
    ) -> ListenerId {
        self.conductor.add_listener(listener)
    }

    pub fn remove_conductor_listener(
        &self,
        id: ListenerId,
    ) -> bool {
        self.conductor.remove_listener(id)
    }

    async fn ensure_conductor_held(&self) -> Result<()> {
        if self.is_conductor_held().await? {
            Ok(())
        } else {
            Err(UsageError::ConductorNotHeld {
                ring_group: self.name.clone(),
            }
            .into())
        }
    }

    // -
    // Registrations

    /// Announces a connected client until this session ends. Returns the node path.
    pub async fn register_client(
        &self,
        client: &ClientMetadata,
    ) -> Result<String> {
        self.register(RING_GROUP_CLIENTS_NODE, CLIENT_NODE_PREFIX, client).await
    }

    pub async fn clients(&self) -> Result<Vec<ClientMetadata>> {
        self.registrations(RING_GROUP_CLIENTS_NODE).await
    }

    /// Announces a running server until this session ends. Returns the node path.
    pub async fn register_server(
        &self,
        server: &ServerMetadata,
    ) -> Result<String> {
        self.register(RING_GROUP_SERVERS_NODE, SERVER_NODE_PREFIX, server).await
    }

    pub async fn servers(&self) -> Result<Vec<ServerMetadata>> {
        self.registrations(RING_GROUP_SERVERS_NODE).await
    }

    async fn register<T: Serialize>(
        &self,
        dir: &str,
        prefix: &str,
        value: &T,
    ) -> Result<String> {
        let path = self
            .ctx
            .store()
            .create(
                &join_path(&join_path(&self.path, dir), prefix),
                codec::encode(value)?,
                CreateMode::EphemeralSequential,
            )
            .await?;
        debug!(%path, "registered");
        Ok(path)
    }

    async fn registrations<T: DeserializeOwned>(
        &self,
        dir: &str,
    ) -> Result<Vec<T>> {
        let dir_path = join_path(&self.path, dir);
        let mut names = children_or_empty(self.ctx.store(), &dir_path).await?;
        names.sort_by_key(|name| sequence_of(name));
        let mut values = Vec::with_capacity(names.len());
        for name in names {
            // Registrations vanish with their session at any time
            if let Some((bytes, _)) = read_if_exists(self.ctx.store(), &join_path(&dir_path, &name), None).await? {
                values.push(codec::decode(&bytes)?);
            }
        }
        Ok(values)
    }

    /// Re-reads the metadata and re-lists rings and their hosts.
    pub async fn reload(&self) -> Result<()> {
        self.metadata.fetch().await?;
        self.rings.reload().await?;
        for ring in self.rings.values().await? {
            ring.reload().await?;
        }
        Ok(())
    }

    /// Stops every watch held by this ring group, its rings and their hosts.
    pub fn close(&self) {
        self.metadata.close();
        self.conductor.close();
        self.rings.close();
    }
}

impl CollectionEntity for RingGroup {
    fn close_watches(&self) {
        self.close();
    }
}

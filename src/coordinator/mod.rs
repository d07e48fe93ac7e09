//! Coordinator aggregate.
//!
//! A [`Coordinator`] owns the three top-level collections (domains, domain groups, ring
//! groups), the global domain id counter and the strategy registry. One coordinator
//! wraps one store session.

mod loaders;
mod session;


use std::fmt::Debug;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::info;
use tracing::instrument;
use tracing::warn;

use self::loaders::DomainGroupLoader;
use self::loaders::DomainLoader;
use self::loaders::RingGroupLoader;
use crate::config::CoordinatorConfig;
use crate::model::validate_name;
use crate::model::EntityContext;
use crate::store::ensure_path;
use crate::store::parent_of;
use crate::strategy::Partitioner;
use crate::strategy::PropertiesSerializer;
use crate::strategy::StorageEngine;
use crate::strategy::StrategyRegistry;
use crate::utils::async_task::retry_on_connection_loss;
use crate::utils::async_task::spawn_task;
use crate::watch::CollectionEvent;
use crate::watch::ListenerId;
use crate::watch::StructuredRecord;
use crate::watch::WatchedCollection;
use crate::CoordinationStore;
use crate::Domain;
use crate::DomainDefinition;
use crate::DomainGroup;
use crate::NotFoundError;
use crate::Result;
use crate::RingGroup;
use crate::SessionState;
use crate::StoreError;
use crate::UsageError;

pub(crate) struct CoordinatorInner {
    ctx: EntityContext,
    registry: StrategyRegistry,
    domains: WatchedCollection<Domain>,
    domain_groups: WatchedCollection<DomainGroup>,
    ring_groups: WatchedCollection<RingGroup>,
    /// Next domain id to hand out
    domain_ids: StructuredRecord<u32>,
    session_expired: AtomicBool,
}

impl CoordinatorInner {
    /// Re-lists every top-level collection and the collections nested in their entities.
    async fn reload(&self) -> Result<()> {
        self.domains.reload().await?;
        for domain in self.domains.values().await? {
            domain.reload().await?;
        }
        self.domain_groups.reload().await?;
        self.ring_groups.reload().await?;
        for ring_group in self.ring_groups.values().await? {
            ring_group.reload().await?;
        }
        self.domain_ids.fetch().await?;
        debug!("coordinator reloaded");
        Ok(())
    }
}

/// Entry point to the cluster metadata.
///
/// Dropping the coordinator stops its session supervisor. Entities handed out keep
/// working against the store, but a [`DomainGroup`] can no longer validate mutations
/// once its coordinator is gone.
pub struct Coordinator {
    inner: Arc<CoordinatorInner>,
    shutdown: CancellationToken,
}

impl Debug for Coordinator {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("Coordinator")
            .field("paths", &self.inner.ctx.config.paths)
            .field("session", &self.inner.ctx.store.session_state())
            .finish()
    }
}

/// Creates the root layout, retrying connection loss for at most one session timeout.
async fn ensure_layout(
    store: &dyn CoordinationStore,
    layout: &[String],
    config: &CoordinatorConfig,
) -> Result<()> {
    let deadline = config.session.session_timeout();
    let created = timeout(deadline, async {
        for path in layout {
            retry_on_connection_loss(
                || async { ensure_path(store, path).await.map_err(crate::Error::from) },
                config.retry,
            )
            .await?;
        }
        Ok::<(), crate::Error>(())
    })
    .await;
    match created {
        Ok(result) => result,
        Err(_) => {
            warn!(?deadline, "store unreachable while creating the root layout");
            Err(StoreError::ConnectionLoss.into())
        }
    }
}

impl Coordinator {
    /// Validates `config`, creates the root layout if missing and starts following the
    /// store session.
    pub async fn connect(
        store: Arc<dyn CoordinationStore>,
        config: CoordinatorConfig,
        registry: StrategyRegistry,
    ) -> Result<Self> {
        let config = Arc::new(config.validate()?);
        let paths = &config.paths;
        let counter_path = paths.domain_id_counter_path();
        let mut layout = vec![paths.domains_root(), paths.domain_groups_root(), paths.ring_groups_root()];
        if let Some(parent) = parent_of(&counter_path) {
            layout.push(parent.to_string());
        }
        ensure_layout(store.as_ref(), &layout, &config).await?;

        let ctx = EntityContext::new(store.clone(), config.clone());
        let domain_ids =
            StructuredRecord::create_or_load(store.clone(), counter_path, "domain_id_counter", &0u32, config.retry)
                .await?;
        let domains = WatchedCollection::new(
            store.clone(),
            paths.domains_root(),
            "domain",
            Arc::new(DomainLoader { ctx: ctx.clone() }),
        );
        let domain_groups = WatchedCollection::new(
            store.clone(),
            paths.domain_groups_root(),
            "domain_group",
            Arc::new(DomainGroupLoader {
                ctx: ctx.clone(),
                domains: domains.downgrade(),
            }),
        );
        let ring_groups = WatchedCollection::new(
            store.clone(),
            paths.ring_groups_root(),
            "ring_group",
            Arc::new(RingGroupLoader { ctx: ctx.clone() }),
        );

        let inner = Arc::new(CoordinatorInner {
            ctx,
            registry,
            domains,
            domain_groups,
            ring_groups,
            domain_ids,
            session_expired: AtomicBool::new(store.session_state() == SessionState::Expired),
        });

        let shutdown = CancellationToken::new();
        let weak = Arc::downgrade(&inner);
        let session_rx = store.subscribe_session();
        let token = shutdown.clone();
        spawn_task("session supervisor", move || {
            session::supervise_session(weak, session_rx, token)
        });

        info!(root = %config.paths.root, session_id = store.session_id(), "coordinator connected");
        Ok(Self { inner, shutdown })
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.inner.ctx.config
    }

    pub fn registry(&self) -> &StrategyRegistry {
        &self.inner.registry
    }

    pub fn store(&self) -> &Arc<dyn CoordinationStore> {
        &self.inner.ctx.store
    }

    /// Whether the store session expired. Watches are dead from that point on.
    pub fn is_session_expired(&self) -> bool {
        self.inner.session_expired.load(Ordering::SeqCst)
            || self.inner.ctx.store.session_state() == SessionState::Expired
    }

    /// Hands out the next globally unique domain id.
    pub async fn allocate_domain_id(&self) -> Result<u32> {
        let next = self.inner.domain_ids.update(|n| *n += 1).await?;
        Ok(next - 1)
    }

    // -
    // Domains

    /// Creates a domain under a freshly allocated id.
    #[instrument(skip(self, definition))]
    pub async fn add_domain(
        &self,
        name: &str,
        definition: DomainDefinition,
    ) -> Result<Arc<Domain>> {
        validate_name(name)?;
        definition.validate()?;
        self.inner.registry.check_definition(&definition)?;
        if self.inner.domains.contains(name).await? {
            return Err(UsageError::AlreadyExists {
                kind: "domain",
                name: name.to_string(),
            }
            .into());
        }

        let id = self.allocate_domain_id().await?;
        let path = self.inner.domains.child_path(name);
        let domain = Domain::create(self.inner.ctx.clone(), &path, name, id, &definition).await?;
        self.inner.domains.put(name, domain).await
    }

    /// Replaces a domain's definition; its id and versions are kept.
    pub async fn update_domain(
        &self,
        name: &str,
        definition: DomainDefinition,
    ) -> Result<Arc<Domain>> {
        self.inner.registry.check_definition(&definition)?;
        let domain = self.require_domain(name).await?;
        domain.update_metadata(&definition).await?;
        Ok(domain)
    }

    /// Deletes a domain and all its versions. Returns whether it existed.
    ///
    /// Refused while a domain group still pins a version of it.
    #[instrument(skip(self))]
    pub async fn delete_domain(
        &self,
        name: &str,
    ) -> Result<bool> {
        let Some(domain) = self.domain(name).await? else {
            return Ok(false);
        };
        let id = domain.id();
        for group in self.inner.domain_groups.values().await? {
            if group.refresh().await?.domain_versions.contains_key(&id) {
                return Err(UsageError::DomainInUse {
                    domain: name.to_string(),
                    domain_group: group.name().to_string(),
                }
                .into());
            }
        }
        self.inner.domains.remove(name).await
    }

    pub async fn domain(
        &self,
        name: &str,
    ) -> Result<Option<Arc<Domain>>> {
        self.inner.domains.get(name).await
    }

    pub async fn domain_by_id(
        &self,
        id: u32,
    ) -> Result<Option<Arc<Domain>>> {
        Ok(self.inner.domains.values().await?.into_iter().find(|d| d.id() == id))
    }

    /// Every domain, ordered by name.
    pub async fn domains(&self) -> Result<Vec<Arc<Domain>>> {
        self.inner.domains.values().await
    }

    async fn require_domain(
        &self,
        name: &str,
    ) -> Result<Arc<Domain>> {
        self.domain(name)
            .await?
            .ok_or_else(|| NotFoundError::Domain(name.to_string()).into())
    }

    // -
    // Domain groups

    pub async fn add_domain_group(
        &self,
        name: &str,
    ) -> Result<Arc<DomainGroup>> {
        validate_name(name)?;
        let path = self.inner.domain_groups.child_path(name);
        let group = DomainGroup::create(self.inner.ctx.clone(), &path, name, self.inner.domains.downgrade()).await?;
        self.inner.domain_groups.put(name, group).await
    }

    /// Returns whether the group existed.
    pub async fn delete_domain_group(
        &self,
        name: &str,
    ) -> Result<bool> {
        self.inner.domain_groups.remove(name).await
    }

    pub async fn domain_group(
        &self,
        name: &str,
    ) -> Result<Option<Arc<DomainGroup>>> {
        self.inner.domain_groups.get(name).await
    }

    pub async fn domain_groups(&self) -> Result<Vec<Arc<DomainGroup>>> {
        self.inner.domain_groups.values().await
    }

    // -
    // Ring groups

    /// Creates a ring group serving an existing domain group.
    pub async fn add_ring_group(
        &self,
        name: &str,
        domain_group_name: &str,
    ) -> Result<Arc<RingGroup>> {
        validate_name(name)?;
        if !self.inner.domain_groups.contains(domain_group_name).await? {
            return Err(NotFoundError::DomainGroup(domain_group_name.to_string()).into());
        }
        let path = self.inner.ring_groups.child_path(name);
        let ring_group = RingGroup::create(self.inner.ctx.clone(), &path, name, domain_group_name).await?;
        self.inner.ring_groups.put(name, ring_group).await
    }

    /// Deletes a ring group with its rings and hosts. Returns whether it existed.
    pub async fn delete_ring_group(
        &self,
        name: &str,
    ) -> Result<bool> {
        self.inner.ring_groups.remove(name).await
    }

    pub async fn ring_group(
        &self,
        name: &str,
    ) -> Result<Option<Arc<RingGroup>>> {
        self.inner.ring_groups.get(name).await
    }

    pub async fn ring_groups(&self) -> Result<Vec<Arc<RingGroup>>> {
        self.inner.ring_groups.values().await
    }

    pub async fn ring_groups_for_domain_group(
        &self,
        domain_group_name: &str,
    ) -> Result<Vec<Arc<RingGroup>>> {
        Ok(self
            .inner
            .ring_groups
            .values()
            .await?
            .into_iter()
            .filter(|rg| rg.domain_group_name() == domain_group_name)
            .collect())
    }

    // -
    // Strategies

    pub fn partitioner_for(
        &self,
        domain: &Domain,
    ) -> Result<Arc<dyn Partitioner>> {
        self.inner.registry.partitioner(&domain.partitioner_id())
    }

    pub fn storage_engine_for(
        &self,
        domain: &Domain,
    ) -> Result<Box<dyn StorageEngine>> {
        self.inner.registry.storage_engine(&domain.storage_engine_id())?.create(
            domain.name(),
            domain.num_partitions(),
            &domain.storage_engine_options(),
        )
    }

    pub fn properties_serializer_for(
        &self,
        domain: &Domain,
    ) -> Result<Arc<dyn PropertiesSerializer>> {
        self.inner
            .registry
            .properties_serializer(&domain.properties_serializer_id())
    }

    // -
    // Listeners

    pub fn add_domains_listener(
        &self,
        listener: impl Fn(&CollectionEvent) + Send + Sync + 'static,
    ) -> ListenerId {
        self.inner.domains.add_listener(listener)
    }

    pub fn remove_domains_listener(
        &self,
        id: ListenerId,
    ) -> bool {
        self.inner.domains.remove_listener(id)
    }

    pub fn add_domain_groups_listener(
        &self,
        listener: impl Fn(&CollectionEvent) + Send + Sync + 'static,
    ) -> ListenerId {
        self.inner.domain_groups.add_listener(listener)
    }

    pub fn remove_domain_groups_listener(
        &self,
        id: ListenerId,
    ) -> bool {
        self.inner.domain_groups.remove_listener(id)
    }

    pub fn add_ring_groups_listener(
        &self,
        listener: impl Fn(&CollectionEvent) + Send + Sync + 'static,
    ) -> ListenerId {
        self.inner.ring_groups.add_listener(listener)
    }

    pub fn remove_ring_groups_listener(
        &self,
        id: ListenerId,
    ) -> bool {
        self.inner.ring_groups.remove_listener(id)
    }

    // -
    // Lifecycle

    /// Re-lists every collection from the store.
    pub async fn reload(&self) -> Result<()> {
        self.inner.reload().await
    }

    /// Stops the session supervisor and every watch held by cached entities.
    pub fn close(&self) {
        self.shutdown.cancel();
        self.inner.domains.close();
        self.inner.domain_groups.close();
        self.inner.ring_groups.close();
        self.inner.domain_ids.close();
        info!("coordinator closed");
    }
}

impl Drop for Coordinator {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

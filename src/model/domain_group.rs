use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::fmt::Debug;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use serde::Deserialize;
use serde::Serialize;
use tracing::debug;
use tracing::info;

use super::Domain;
use super::EntityContext;
use crate::utils::codec;
use crate::watch::mark_complete;
use crate::watch::CollectionEntity;
use crate::watch::ListenerId;
use crate::watch::StructuredRecord;
use crate::watch::WeakCollection;
use crate::CreateMode;
use crate::NotFoundError;
use crate::Result;
use crate::StoreError;
use crate::UsageError;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomainGroupMetadata {
    /// Domain id -> pinned version number
    pub domain_versions: BTreeMap<u32, u32>,
}

/// A named pinning of domain versions that are meant to be served together.
pub struct DomainGroup {
    name: String,
    record: StructuredRecord<DomainGroupMetadata>,
    domains: WeakCollection<Domain>,
}

impl Debug for DomainGroup {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("DomainGroup")
            .field("name", &self.name)
            .field("domain_versions", &self.record.get().domain_versions)
            .finish()
    }
}

impl DomainGroup {
    pub(crate) async fn create(
        ctx: EntityContext,
        path: &str,
        name: &str,
        domains: WeakCollection<Domain>,
    ) -> Result<Self> {
        let store = ctx.store();
        let initial = codec::encode(&DomainGroupMetadata::default())?;
        match store.create(path, initial, CreateMode::Persistent).await {
            Ok(_) => {}
            Err(StoreError::NodeExists(_)) => {
                return Err(UsageError::AlreadyExists {
                    kind: "domain group",
                    name: name.to_string(),
                }
                .into())
            }
            Err(e) => return Err(e.into()),
        }
        mark_complete(store, path).await?;
        info!(%name, "domain group created");
        Self::load(ctx, path, name, domains).await
    }

    pub(crate) async fn load(
        ctx: EntityContext,
        path: &str,
        name: &str,
        domains: WeakCollection<Domain>,
    ) -> Result<Self> {
        let record = StructuredRecord::load(ctx.store.clone(), path, "domain_group", ctx.retry()).await?;
        Ok(Self {
            name: name.to_string(),
            record,
            domains,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn path(&self) -> &str {
        self.record.path()
    }

    /// Pinned version of every domain in the group, keyed by domain id.
    pub fn domain_versions(&self) -> BTreeMap<u32, u32> {
        self.record.get().domain_versions.clone()
    }

    pub fn version_for(
        &self,
        domain_id: u32,
    ) -> Option<u32> {
        self.record.get().domain_versions.get(&domain_id).copied()
    }

    pub fn contains_domain(
        &self,
        domain_id: u32,
    ) -> bool {
        self.record.get().domain_versions.contains_key(&domain_id)
    }

    /// Replaces the whole mapping.
    pub async fn set_all(
        &self,
        versions: BTreeMap<u32, u32>,
    ) -> Result<()> {
        self.check_domains(versions.keys().copied()).await?;
        self.record.update(|m| m.domain_versions = versions.clone()).await?;
        info!(name = %self.name, "domain group versions replaced");
        Ok(())
    }

    pub async fn set(
        &self,
        domain_id: u32,
        version: u32,
    ) -> Result<()> {
        self.check_domains([domain_id]).await?;
        self.record
            .update(|m| {
                m.domain_versions.insert(domain_id, version);
            })
            .await?;
        debug!(name = %self.name, domain_id, version, "domain version pinned");
        Ok(())
    }

    /// Overlays `versions` onto the mapping, keeping entries it does not mention.
    pub async fn merge(
        &self,
        versions: BTreeMap<u32, u32>,
    ) -> Result<()> {
        self.check_domains(versions.keys().copied()).await?;
        self.record
            .update(|m| m.domain_versions.extend(versions.iter().map(|(k, v)| (*k, *v))))
            .await?;
        Ok(())
    }

    /// Drops a domain from the group. Returns whether it was present.
    pub async fn remove(
        &self,
        domain_id: u32,
    ) -> Result<bool> {
        let removed = AtomicBool::new(false);
        self.record
            .update(|m| removed.store(m.domain_versions.remove(&domain_id).is_some(), Ordering::SeqCst))
            .await?;
        Ok(removed.load(Ordering::SeqCst))
    }

    pub async fn refresh(&self) -> Result<DomainGroupMetadata> {
        self.record.fetch().await
    }

    /// Fires on every observed change of the mapping, whichever operation caused it.
    pub fn add_listener(
        &self,
        listener: impl Fn(&DomainGroupMetadata) + Send + Sync + 'static,
    ) -> ListenerId {
        self.record.add_listener(listener)
    }

    pub fn remove_listener(
        &self,
        id: ListenerId,
    ) -> bool {
        self.record.remove_listener(id)
    }

    pub fn close(&self) {
        self.record.close();
    }

    /// Fails unless every id names a domain known to the owning coordinator.
    async fn check_domains(
        &self,
        ids: impl IntoIterator<Item = u32>,
    ) -> Result<()> {
        let domains = self.domains.upgrade().ok_or_else(|| UsageError::CoordinatorDetached {
            entity: format!("domain group '{}'", self.name),
        })?;
        let known: BTreeSet<u32> = domains.values().await?.iter().map(|d: &Arc<Domain>| d.id()).collect();
        for id in ids {
            if !known.contains(&id) {
                return Err(NotFoundError::DomainId(id).into());
            }
        }
        Ok(())
    }
}

impl CollectionEntity for DomainGroup {
    fn close_watches(&self) {
        self.close();
    }
}

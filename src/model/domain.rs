use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde::Serialize;
use tracing::debug;
use tracing::info;
use tracing::instrument;
use tracing::warn;

use super::DomainVersion;
use super::EntityContext;
use super::Flags;
use crate::constants::BINCODE_PROPERTIES_SERIALIZER;
use crate::constants::DOMAIN_VERSIONS_NODE;
use crate::constants::MURMUR64_PARTITIONER;
use crate::constants::OPAQUE_STORAGE_ENGINE;
use crate::store::join_path;
use crate::utils::codec;
use crate::watch::mark_complete;
use crate::watch::CollectionEntity;
use crate::watch::CollectionEvent;
use crate::watch::EntityLoader;
use crate::watch::ListenerId;
use crate::watch::StructuredRecord;
use crate::watch::WatchedCollection;
use crate::CreateMode;
use crate::NotFoundError;
use crate::Result;
use crate::StoreError;
use crate::UsageError;

/// Persisted definition of a domain, stored as the domain node's data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomainMetadata {
    pub id: u32,
    pub num_partitions: u32,
    pub storage_engine_id: String,
    pub storage_engine_options: Vec<u8>,
    pub partitioner_id: String,
    pub properties_serializer_id: String,
    pub required_host_flags: Flags,
    /// Number handed to the next version opened; only ever incremented
    pub next_version_number: u32,
}

/// The mutable part of a domain's definition, as supplied by callers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DomainDefinition {
    pub num_partitions: u32,
    pub storage_engine_id: String,
    pub storage_engine_options: Vec<u8>,
    pub partitioner_id: String,
    pub properties_serializer_id: String,
    pub required_host_flags: Flags,
}

impl DomainDefinition {
    /// A definition using the built-in strategies.
    pub fn new(num_partitions: u32) -> Self {
        Self {
            num_partitions,
            storage_engine_id: OPAQUE_STORAGE_ENGINE.to_string(),
            storage_engine_options: Vec::new(),
            partitioner_id: MURMUR64_PARTITIONER.to_string(),
            properties_serializer_id: BINCODE_PROPERTIES_SERIALIZER.to_string(),
            required_host_flags: Flags::new(),
        }
    }

    pub fn with_storage_engine(
        mut self,
        id: impl Into<String>,
        options: Vec<u8>,
    ) -> Self {
        self.storage_engine_id = id.into();
        self.storage_engine_options = options;
        self
    }

    pub fn with_partitioner(
        mut self,
        id: impl Into<String>,
    ) -> Self {
        self.partitioner_id = id.into();
        self
    }

    pub fn with_properties_serializer(
        mut self,
        id: impl Into<String>,
    ) -> Self {
        self.properties_serializer_id = id.into();
        self
    }

    pub fn with_required_host_flags<I, S>(
        mut self,
        flags: I,
    ) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.required_host_flags = flags.into_iter().map(Into::into).collect();
        self
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if self.num_partitions == 0 {
            return Err(UsageError::InvalidArgument("num_partitions must be positive".to_string()).into());
        }
        Ok(())
    }

    fn apply_to(
        &self,
        metadata: &mut DomainMetadata,
    ) {
        metadata.num_partitions = self.num_partitions;
        metadata.storage_engine_id = self.storage_engine_id.clone();
        metadata.storage_engine_options = self.storage_engine_options.clone();
        metadata.partitioner_id = self.partitioner_id.clone();
        metadata.properties_serializer_id = self.properties_serializer_id.clone();
        metadata.required_host_flags = self.required_host_flags.clone();
    }
}

struct DomainVersionLoader {
    ctx: EntityContext,
}

#[async_trait]
impl EntityLoader<DomainVersion> for DomainVersionLoader {
    async fn load(
        &self,
        name: &str,
        path: &str,
    ) -> Result<Option<DomainVersion>> {
        let Ok(number) = name.parse::<u32>() else {
            warn!(%path, "ignoring non-numeric version node");
            return Ok(None);
        };
        match DomainVersion::load(self.ctx.clone(), path, number).await {
            Ok(version) => Ok(Some(version)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }
}

/// A named, partitioned dataset and its version history.
#[derive(Debug)]
pub struct Domain {
    name: String,
    ctx: EntityContext,
    record: StructuredRecord<DomainMetadata>,
    versions: WatchedCollection<DomainVersion>,
}

impl Domain {
    /// Writes a new domain subtree at `path` and publishes it.
    pub(crate) async fn create(
        ctx: EntityContext,
        path: &str,
        name: &str,
        id: u32,
        definition: &DomainDefinition,
    ) -> Result<Self> {
        definition.validate()?;
        let mut metadata = DomainMetadata {
            id,
            num_partitions: 0,
            storage_engine_id: String::new(),
            storage_engine_options: Vec::new(),
            partitioner_id: String::new(),
            properties_serializer_id: String::new(),
            required_host_flags: Flags::new(),
            next_version_number: 0,
        };
        definition.apply_to(&mut metadata);

        let store = ctx.store();
        match store.create(path, codec::encode(&metadata)?, CreateMode::Persistent).await {
            Ok(_) => {}
            Err(StoreError::NodeExists(_)) => {
                return Err(UsageError::AlreadyExists {
                    kind: "domain",
                    name: name.to_string(),
                }
                .into())
            }
            Err(e) => return Err(e.into()),
        }
        store
            .create(&join_path(path, DOMAIN_VERSIONS_NODE), Vec::new(), CreateMode::Persistent)
            .await?;
        mark_complete(store, path).await?;
        info!(%name, id, "domain created");

        Self::load(ctx, path, name).await
    }

    pub(crate) async fn load(
        ctx: EntityContext,
        path: &str,
        name: &str,
    ) -> Result<Self> {
        let record = StructuredRecord::load(ctx.store.clone(), path, "domain", ctx.retry()).await?;
        let versions = WatchedCollection::new(
            ctx.store.clone(),
            join_path(path, DOMAIN_VERSIONS_NODE),
            "domain_version",
            Arc::new(DomainVersionLoader { ctx: ctx.clone() }),
        );
        Ok(Self {
            name: name.to_string(),
            ctx,
            record,
            versions,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn path(&self) -> &str {
        self.record.path()
    }

    pub fn id(&self) -> u32 {
        self.record.get().id
    }

    pub fn metadata(&self) -> Arc<DomainMetadata> {
        self.record.get()
    }

    pub fn num_partitions(&self) -> u32 {
        self.record.get().num_partitions
    }

    pub fn storage_engine_id(&self) -> String {
        self.record.get().storage_engine_id.clone()
    }

    pub fn storage_engine_options(&self) -> Vec<u8> {
        self.record.get().storage_engine_options.clone()
    }

    pub fn partitioner_id(&self) -> String {
        self.record.get().partitioner_id.clone()
    }

    pub fn properties_serializer_id(&self) -> String {
        self.record.get().properties_serializer_id.clone()
    }

    pub fn required_host_flags(&self) -> Flags {
        self.record.get().required_host_flags.clone()
    }

    /// Number the next opened version will get, as last observed.
    pub fn next_version_number(&self) -> u32 {
        self.record.get().next_version_number
    }

    /// Replaces the definition. The id and the version counter are kept.
    pub async fn update_metadata(
        &self,
        definition: &DomainDefinition,
    ) -> Result<DomainMetadata> {
        definition.validate()?;
        let committed = self.record.update(|m| definition.apply_to(m)).await?;
        info!(name = %self.name, "domain definition updated");
        Ok(committed)
    }

    /// Re-reads the definition from the store.
    pub async fn refresh(&self) -> Result<DomainMetadata> {
        self.record.fetch().await
    }

    /// All published versions, ordered by number.
    pub async fn versions(&self) -> Result<Vec<Arc<DomainVersion>>> {
        let mut versions = self.versions.values().await?;
        versions.sort_by_key(|v| v.number());
        Ok(versions)
    }

    pub async fn version(
        &self,
        number: u32,
    ) -> Result<Option<Arc<DomainVersion>>> {
        self.versions.get(&number.to_string()).await
    }

    pub async fn latest_version(&self) -> Result<Option<Arc<DomainVersion>>> {
        Ok(self.versions().await?.pop())
    }

    pub async fn latest_closed_version(&self) -> Result<Option<Arc<DomainVersion>>> {
        Ok(self.versions().await?.into_iter().rev().find(|v| v.is_closed()))
    }

    pub async fn open_versions(&self) -> Result<Vec<Arc<DomainVersion>>> {
        Ok(self.versions().await?.into_iter().filter(|v| !v.is_closed()).collect())
    }

    /// Reserves the next version number and publishes a new open version under it.
    ///
    /// Concurrent callers always receive distinct numbers; a number is never handed out
    /// twice even if the version is later cancelled.
    #[instrument(skip(self, properties), fields(domain = %self.name))]
    pub async fn open_new_version(
        &self,
        properties: Option<Vec<u8>>,
    ) -> Result<Arc<DomainVersion>> {
        if !self.ctx.config.versions.allow_concurrent_open_versions {
            for open in self.open_versions().await? {
                if open.refresh().await?.closed_at.is_none() {
                    return Err(UsageError::ConcurrentOpenVersion {
                        domain: self.name.clone(),
                        version: open.number(),
                    }
                    .into());
                }
            }
        }

        let committed = self.record.update(|m| m.next_version_number += 1).await?;
        let number = committed.next_version_number - 1;
        let name = number.to_string();
        let path = self.versions.child_path(&name);
        let version = DomainVersion::create(self.ctx.clone(), &path, number, properties).await?;
        info!(number, "domain version opened");
        self.versions.put(&name, version).await
    }

    /// Cancels an open version. Returns `false` when the version is already closed.
    pub async fn cancel_version(
        &self,
        number: u32,
    ) -> Result<bool> {
        let version = self.require_version(number).await?;
        let cancelled = version.cancel().await?;
        if cancelled {
            self.versions.evict(&number.to_string());
        }
        Ok(cancelled)
    }

    /// Deletes a version whatever its state. Returns whether it existed.
    pub async fn delete_version(
        &self,
        number: u32,
    ) -> Result<bool> {
        let removed = self.versions.remove(&number.to_string()).await?;
        debug!(name = %self.name, number, removed, "domain version deleted");
        Ok(removed)
    }

    pub fn add_versions_listener(
        &self,
        listener: impl Fn(&CollectionEvent) + Send + Sync + 'static,
    ) -> ListenerId {
        self.versions.add_listener(listener)
    }

    pub fn remove_versions_listener(
        &self,
        id: ListenerId,
    ) -> bool {
        self.versions.remove_listener(id)
    }

    pub fn add_metadata_listener(
        &self,
        listener: impl Fn(&DomainMetadata) + Send + Sync + 'static,
    ) -> ListenerId {
        self.record.add_listener(listener)
    }

    pub fn remove_metadata_listener(
        &self,
        id: ListenerId,
    ) -> bool {
        self.record.remove_listener(id)
    }

    /// Re-lists the versions from the store.
    pub async fn reload(&self) -> Result<()> {
        self.record.fetch().await?;
        self.versions.reload().await
    }

    /// Stops all watches held by this domain and its versions.
    pub fn close(&self) {
        self.record.close();
        self.versions.close();
    }

    async fn require_version(
        &self,
        number: u32,
    ) -> Result<Arc<DomainVersion>> {
        self.version(number).await?.ok_or_else(|| {
            NotFoundError::DomainVersion {
                domain: self.name.clone(),
                version: number,
            }
            .into()
        })
    }
}

impl CollectionEntity for Domain {
    fn close_watches(&self) {
        self.close();
    }
}

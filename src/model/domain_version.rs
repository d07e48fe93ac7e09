use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Deserialize;
use serde::Serialize;
use tracing::debug;
use tracing::info;

use super::EntityContext;
use super::PartitionProperties;
use crate::store::delete_if_exists;
use crate::store::delete_recursive;
use crate::utils::codec;
use crate::utils::time::now_ms_i64;
use crate::watch::mark_complete;
use crate::watch::marker_path;
use crate::watch::CollectionEntity;
use crate::watch::ListenerId;
use crate::watch::StructuredRecord;
use crate::CreateMode;
use crate::Result;
use crate::StoreError;

/// Persisted state of one domain version.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomainVersionMetadata {
    /// Close time in milliseconds since the epoch; `None` while open
    pub closed_at: Option<i64>,
    pub defunct: bool,
    /// Opaque blob decoded by the domain's properties serializer
    pub properties: Option<Vec<u8>>,
    pub partitions: BTreeMap<u32, PartitionProperties>,
}

/// One numbered snapshot of a domain's data.
///
/// Created open, filled with partition statistics by writers, then either closed
/// (terminal) or cancelled (subtree deleted) while still open.
#[derive(Debug)]
pub struct DomainVersion {
    number: u32,
    ctx: EntityContext,
    record: StructuredRecord<DomainVersionMetadata>,
}

impl DomainVersion {
    /// Writes a new open version at `path` and publishes it.
    pub(crate) async fn create(
        ctx: EntityContext,
        path: &str,
        number: u32,
        properties: Option<Vec<u8>>,
    ) -> Result<Self> {
        let metadata = DomainVersionMetadata {
            properties,
            ..Default::default()
        };
        ctx.store()
            .create(path, codec::encode(&metadata)?, CreateMode::Persistent)
            .await?;
        mark_complete(ctx.store(), path).await?;
        debug!(%path, number, "domain version created");
        Self::load(ctx, path, number).await
    }

    pub(crate) async fn load(
        ctx: EntityContext,
        path: &str,
        number: u32,
    ) -> Result<Self> {
        let record = StructuredRecord::load(ctx.store.clone(), path, "domain_version", ctx.retry()).await?;
        Ok(Self { number, ctx, record })
    }

    pub fn number(&self) -> u32 {
        self.number
    }

    pub fn path(&self) -> &str {
        self.record.path()
    }

    pub fn metadata(&self) -> Arc<DomainVersionMetadata> {
        self.record.get()
    }

    pub fn closed_at(&self) -> Option<i64> {
        self.record.get().closed_at
    }

    pub fn is_closed(&self) -> bool {
        self.closed_at().is_some()
    }

    pub fn is_defunct(&self) -> bool {
        self.record.get().defunct
    }

    pub fn properties(&self) -> Option<Vec<u8>> {
        self.record.get().properties.clone()
    }

    pub fn partitions(&self) -> BTreeMap<u32, PartitionProperties> {
        self.record.get().partitions.clone()
    }

    pub fn total_num_bytes(&self) -> u64 {
        self.record.get().partitions.values().map(|p| p.num_bytes).sum()
    }

    pub fn total_num_records(&self) -> u64 {
        self.record.get().partitions.values().map(|p| p.num_records).sum()
    }

    /// Marks the version closed. Closing again keeps the first timestamp.
    pub async fn close(&self) -> Result<()> {
        let now = now_ms_i64();
        let committed = self
            .record
            .update(|m| {
                if m.closed_at.is_none() {
                    m.closed_at = Some(now);
                }
            })
            .await?;
        info!(path = %self.path(), closed_at = ?committed.closed_at, "domain version closed");
        Ok(())
    }

    /// Deletes the version while it is still open. Returns whether it was deleted;
    /// a closed or already removed version is left alone.
    pub async fn cancel(&self) -> Result<bool> {
        let store = self.ctx.store();
        let path = self.path();
        loop {
            let (bytes, stat) = match store.get_data(path, None).await {
                Ok(found) => found,
                Err(StoreError::NoNode(_)) => return Ok(false),
                Err(e) => return Err(e.into()),
            };
            let metadata: DomainVersionMetadata = codec::decode(&bytes)?;
            if metadata.closed_at.is_some() {
                debug!(%path, "refusing to cancel closed version");
                return Ok(false);
            }

            // Unpublish first so readers never see a half-deleted version
            delete_if_exists(store, &marker_path(path)).await?;
            match store.delete(path, Some(stat.version)).await {
                Ok(()) => {
                    info!(%path, "domain version cancelled");
                    return Ok(true);
                }
                Err(StoreError::NoNode(_)) => return Ok(false),
                Err(StoreError::BadVersion { .. }) => {
                    // Written concurrently, possibly closed; republish and re-check
                    mark_complete(store, path).await?;
                }
                Err(StoreError::NotEmpty(_)) => {
                    for child in store.get_children(path, None).await? {
                        delete_recursive(store, &format!("{path}/{child}")).await?;
                    }
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Records the bulk-load statistics of one partition, replacing earlier ones.
    pub async fn add_partition_properties(
        &self,
        partition: u32,
        num_bytes: u64,
        num_records: u64,
    ) -> Result<()> {
        self.record
            .update(|m| {
                m.partitions.insert(partition, PartitionProperties { num_bytes, num_records });
            })
            .await?;
        Ok(())
    }

    pub async fn set_defunct(
        &self,
        defunct: bool,
    ) -> Result<()> {
        self.record.update(|m| m.defunct = defunct).await?;
        Ok(())
    }

    pub async fn set_properties(
        &self,
        properties: Option<Vec<u8>>,
    ) -> Result<()> {
        self.record.update(|m| m.properties = properties.clone()).await?;
        Ok(())
    }

    /// Re-reads the version from the store.
    pub async fn refresh(&self) -> Result<DomainVersionMetadata> {
        self.record.fetch().await
    }

    pub fn add_listener(
        &self,
        listener: impl Fn(&DomainVersionMetadata) + Send + Sync + 'static,
    ) -> ListenerId {
        self.record.add_listener(listener)
    }

    pub fn remove_listener(
        &self,
        id: ListenerId,
    ) -> bool {
        self.record.remove_listener(id)
    }
}

impl CollectionEntity for DomainVersion {
    fn close_watches(&self) {
        self.record.close();
    }
}

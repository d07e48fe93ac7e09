use async_trait::async_trait;

use crate::model::EntityContext;
use crate::watch::EntityLoader;
use crate::watch::WeakCollection;
use crate::Domain;
use crate::DomainGroup;
use crate::Result;
use crate::RingGroup;

pub(super) struct DomainLoader {
    pub(super) ctx: EntityContext,
}

#[async_trait]
impl EntityLoader<Domain> for DomainLoader {
    async fn load(
        &self,
        name: &str,
        path: &str,
    ) -> Result<Option<Domain>> {
        Ok(Some(Domain::load(self.ctx.clone(), path, name).await?))
    }
}

pub(super) struct DomainGroupLoader {
    pub(super) ctx: EntityContext,
    pub(super) domains: WeakCollection<Domain>,
}

#[async_trait]
impl EntityLoader<DomainGroup> for DomainGroupLoader {
    async fn load(
        &self,
        name: &str,
        path: &str,
    ) -> Result<Option<DomainGroup>> {
        Ok(Some(
            DomainGroup::load(self.ctx.clone(), path, name, self.domains.clone()).await?,
        ))
    }
}

pub(super) struct RingGroupLoader {
    pub(super) ctx: EntityContext,
}

#[async_trait]
impl EntityLoader<RingGroup> for RingGroupLoader {
    async fn load(
        &self,
        name: &str,
        path: &str,
    ) -> Result<Option<RingGroup>> {
        Ok(Some(RingGroup::load(self.ctx.clone(), path, name).await?))
    }
}

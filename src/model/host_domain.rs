use std::collections::BTreeMap;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use serde::Deserialize;
use serde::Serialize;
use tracing::debug;

use super::Flags;
use super::HostAddress;
use super::HostDomainPartition;
use crate::watch::StructuredRecord;
use crate::NotFoundError;
use crate::Result;
use crate::UsageError;

/// Every domain assigned to one host, stored as a single record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostAssignments {
    pub domains: BTreeMap<u32, HostDomainAssignment>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostDomainAssignment {
    /// Partition count of the domain when it was assigned, bounds partition numbers
    pub num_partitions: u32,
    pub flags: Flags,
    pub partitions: BTreeMap<u32, HostDomainPartition>,
}

pub(crate) fn assignment_mut<'a>(
    assignments: &'a mut HostAssignments,
    host: &HostAddress,
    domain_id: u32,
) -> Result<&'a mut HostDomainAssignment> {
    assignments.domains.get_mut(&domain_id).ok_or_else(|| {
        NotFoundError::HostDomain {
            host: host.to_string(),
            domain_id,
        }
        .into()
    })
}

fn partition_mut<'a>(
    assignments: &'a mut HostAssignments,
    host: &HostAddress,
    domain_id: u32,
    partition: u32,
) -> Result<&'a mut HostDomainPartition> {
    assignment_mut(assignments, host, domain_id)?
        .partitions
        .get_mut(&partition)
        .ok_or_else(|| {
            NotFoundError::HostDomainPartition {
                host: host.to_string(),
                domain_id,
                partition,
            }
            .into()
        })
}

/// View of one domain's partitions on one host.
///
/// Every mutation is a version-checked update of the host's assignment record, so it
/// fires the host's data-location listeners.
#[derive(Debug, Clone)]
pub struct HostDomain {
    host: HostAddress,
    domain_id: u32,
    assignments: Arc<StructuredRecord<HostAssignments>>,
}

impl HostDomain {
    pub(crate) fn new(
        host: HostAddress,
        domain_id: u32,
        assignments: Arc<StructuredRecord<HostAssignments>>,
    ) -> Self {
        Self {
            host,
            domain_id,
            assignments,
        }
    }

    pub fn host(&self) -> &HostAddress {
        &self.host
    }

    pub fn domain_id(&self) -> u32 {
        self.domain_id
    }

    fn cached(&self) -> Option<HostDomainAssignment> {
        self.assignments.get().domains.get(&self.domain_id).cloned()
    }

    pub fn num_partitions(&self) -> u32 {
        self.cached().map(|a| a.num_partitions).unwrap_or_default()
    }

    /// Assigned partitions ordered by number. Empty once the domain is unassigned.
    pub fn partitions(&self) -> Vec<HostDomainPartition> {
        self.cached()
            .map(|a| a.partitions.into_values().collect())
            .unwrap_or_default()
    }

    pub fn partition(
        &self,
        partition: u32,
    ) -> Option<HostDomainPartition> {
        self.cached().and_then(|a| a.partitions.get(&partition).copied())
    }

    pub fn flags(&self) -> Flags {
        self.cached().map(|a| a.flags).unwrap_or_default()
    }

    pub async fn set_flags(
        &self,
        flags: Flags,
    ) -> Result<()> {
        self.assignments
            .try_update(|a| {
                assignment_mut(a, &self.host, self.domain_id)?.flags = flags.clone();
                Ok(())
            })
            .await?;
        Ok(())
    }

    /// Assigns a partition that has never been served.
    pub async fn add_partition(
        &self,
        partition: u32,
    ) -> Result<HostDomainPartition> {
        self.assignments
            .try_update(|a| {
                let assignment = assignment_mut(a, &self.host, self.domain_id)?;
                if partition >= assignment.num_partitions {
                    return Err(UsageError::PartitionOutOfRange {
                        domain: self.domain_id.to_string(),
                        partition,
                        num_partitions: assignment.num_partitions,
                    }
                    .into());
                }
                if assignment.partitions.contains_key(&partition) {
                    return Err(UsageError::DuplicateAssignment(format!(
                        "partition {} of domain {} on host {}",
                        partition, self.domain_id, self.host
                    ))
                    .into());
                }
                assignment
                    .partitions
                    .insert(partition, HostDomainPartition::new(partition));
                Ok(())
            })
            .await?;
        debug!(host = %self.host, domain_id = self.domain_id, partition, "partition assigned");
        Ok(HostDomainPartition::new(partition))
    }

    /// Returns whether the partition was assigned.
    pub async fn remove_partition(
        &self,
        partition: u32,
    ) -> Result<bool> {
        let removed = AtomicBool::new(false);
        self.assignments
            .try_update(|a| {
                let gone = assignment_mut(a, &self.host, self.domain_id)?
                    .partitions
                    .remove(&partition)
                    .is_some();
                removed.store(gone, Ordering::SeqCst);
                Ok(())
            })
            .await?;
        Ok(removed.load(Ordering::SeqCst))
    }

    /// Records the version the host now serves for `partition`.
    pub async fn set_current_version(
        &self,
        partition: u32,
        version: Option<u32>,
    ) -> Result<()> {
        self.assignments
            .try_update(|a| {
                partition_mut(a, &self.host, self.domain_id, partition)?.current_version = version;
                Ok(())
            })
            .await?;
        Ok(())
    }

    pub async fn set_deletable(
        &self,
        partition: u32,
        deletable: bool,
    ) -> Result<()> {
        self.assignments
            .try_update(|a| {
                partition_mut(a, &self.host, self.domain_id, partition)?.deletable = deletable;
                Ok(())
            })
            .await?;
        Ok(())
    }

    /// Re-reads the assignment from the store. `None` once the domain is unassigned.
    pub async fn refresh(&self) -> Result<Option<HostDomainAssignment>> {
        Ok(self.assignments.fetch().await?.domains.get(&self.domain_id).cloned())
    }
}

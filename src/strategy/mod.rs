//! Pluggable strategies addressed by string id.
//!
//! Domains name their partitioner, storage engine and version-properties serializer by
//! id. A [`StrategyRegistry`] maps those ids to implementations; it is filled explicitly
//! at startup and consulted by the coordinator.

mod partitioner;
mod properties;
mod registry;
mod storage;

#[cfg(test)]
mod properties_test;

pub use partitioner::*;
pub use properties::*;
pub use registry::*;
pub use storage::*;

use std::fmt::Debug;

use crate::Result;

/// Maps a key to one of a domain's partitions.
pub trait Partitioner: Send + Sync + Debug {
    /// Always returns a value below `num_partitions`, which must be positive.
    fn partition(
        &self,
        key: &[u8],
        num_partitions: u32,
    ) -> u32;
}

/// Handle on a domain's storage engine, consumed by the serving and bulk-load paths.
pub trait StorageEngine: Send + Sync + Debug {
    fn domain_name(&self) -> &str;

    fn num_partitions(&self) -> u32;

    /// Engine options exactly as stored with the domain
    fn options(&self) -> &[u8];
}

/// Builds a [`StorageEngine`] from a domain's opaque options blob.
pub trait StorageEngineFactory: Send + Sync + Debug {
    fn create(
        &self,
        domain_name: &str,
        num_partitions: u32,
        options: &[u8],
    ) -> Result<Box<dyn StorageEngine>>;
}

/// Converts the opaque properties blob of a domain version.
pub trait PropertiesSerializer: Send + Sync + Debug {
    fn serialize(
        &self,
        properties: &VersionProperties,
    ) -> Result<Vec<u8>>;

    fn deserialize(
        &self,
        bytes: &[u8],
    ) -> Result<VersionProperties>;
}

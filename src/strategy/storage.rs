use super::StorageEngine;
use super::StorageEngineFactory;
use crate::Result;

/// Engine that only carries the domain's options blob; the actual engine lives
/// outside the coordinator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpaqueStorageEngine {
    domain_name: String,
    num_partitions: u32,
    options: Vec<u8>,
}

impl StorageEngine for OpaqueStorageEngine {
    fn domain_name(&self) -> &str {
        &self.domain_name
    }

    fn num_partitions(&self) -> u32 {
        self.num_partitions
    }

    fn options(&self) -> &[u8] {
        &self.options
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct OpaqueStorageEngineFactory;

impl StorageEngineFactory for OpaqueStorageEngineFactory {
    fn create(
        &self,
        domain_name: &str,
        num_partitions: u32,
        options: &[u8],
    ) -> Result<Box<dyn StorageEngine>> {
        Ok(Box::new(OpaqueStorageEngine {
            domain_name: domain_name.to_string(),
            num_partitions,
            options: options.to_vec(),
        }))
    }
}

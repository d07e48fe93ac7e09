use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;

use super::BincodePropertiesSerializer;
use super::Murmur64Partitioner;
use super::OpaqueStorageEngineFactory;
use super::Partitioner;
use super::PropertiesSerializer;
use super::StorageEngineFactory;
use crate::constants::BINCODE_PROPERTIES_SERIALIZER;
use crate::constants::MURMUR64_PARTITIONER;
use crate::constants::OPAQUE_STORAGE_ENGINE;
use crate::DomainDefinition;
use crate::Result;
use crate::UsageError;

/// Id -> implementation tables for every strategy kind.
#[derive(Debug, Default, Clone)]
pub struct StrategyRegistry {
    partitioners: HashMap<String, Arc<dyn Partitioner>>,
    storage_engines: HashMap<String, Arc<dyn StorageEngineFactory>>,
    properties_serializers: HashMap<String, Arc<dyn PropertiesSerializer>>,
}

impl StrategyRegistry {
    /// An empty registry. Every lookup fails until strategies are registered.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry holding the built-in strategies.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register_partitioner(MURMUR64_PARTITIONER, Arc::new(Murmur64Partitioner));
        registry.register_storage_engine(OPAQUE_STORAGE_ENGINE, Arc::new(OpaqueStorageEngineFactory));
        registry.register_properties_serializer(BINCODE_PROPERTIES_SERIALIZER, Arc::new(BincodePropertiesSerializer));
        registry
    }

    /// Registers or replaces a partitioner.
    pub fn register_partitioner(
        &mut self,
        id: impl Into<String>,
        partitioner: Arc<dyn Partitioner>,
    ) -> &mut Self {
        let id = id.into();
        debug!(%id, "partitioner registered");
        self.partitioners.insert(id, partitioner);
        self
    }

    pub fn register_storage_engine(
        &mut self,
        id: impl Into<String>,
        factory: Arc<dyn StorageEngineFactory>,
    ) -> &mut Self {
        let id = id.into();
        debug!(%id, "storage engine registered");
        self.storage_engines.insert(id, factory);
        self
    }

    pub fn register_properties_serializer(
        &mut self,
        id: impl Into<String>,
        serializer: Arc<dyn PropertiesSerializer>,
    ) -> &mut Self {
        let id = id.into();
        debug!(%id, "properties serializer registered");
        self.properties_serializers.insert(id, serializer);
        self
    }

    pub fn partitioner(
        &self,
        id: &str,
    ) -> Result<Arc<dyn Partitioner>> {
        lookup(&self.partitioners, "partitioner", id)
    }

    pub fn storage_engine(
        &self,
        id: &str,
    ) -> Result<Arc<dyn StorageEngineFactory>> {
        lookup(&self.storage_engines, "storage engine", id)
    }

    pub fn properties_serializer(
        &self,
        id: &str,
    ) -> Result<Arc<dyn PropertiesSerializer>> {
        lookup(&self.properties_serializers, "properties serializer", id)
    }

    /// Fails unless every strategy `definition` names is registered.
    pub fn check_definition(
        &self,
        definition: &DomainDefinition,
    ) -> Result<()> {
        self.partitioner(&definition.partitioner_id)?;
        self.storage_engine(&definition.storage_engine_id)?;
        self.properties_serializer(&definition.properties_serializer_id)?;
        Ok(())
    }
}

fn lookup<T: ?Sized>(
    table: &HashMap<String, Arc<T>>,
    kind: &'static str,
    id: &str,
) -> Result<Arc<T>> {
    table.get(id).cloned().ok_or_else(|| {
        UsageError::UnknownStrategy {
            kind,
            id: id.to_string(),
        }
        .into()
    })
}

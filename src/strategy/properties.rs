use std::collections::BTreeMap;

use serde::Deserialize;
use serde::Serialize;

use super::PropertiesSerializer;
use crate::utils::codec;
use crate::Result;

/// Typed view of a domain version's properties blob.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionProperties {
    /// Version this one was derived from, for incremental builds
    pub parent_version: Option<u32>,
    /// Where the data came from (job id, input path)
    pub source: Option<String>,
    pub extra: BTreeMap<String, String>,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct BincodePropertiesSerializer;

impl PropertiesSerializer for BincodePropertiesSerializer {
    fn serialize(
        &self,
        properties: &VersionProperties,
    ) -> Result<Vec<u8>> {
        codec::encode(properties)
    }

    fn deserialize(
        &self,
        bytes: &[u8],
    ) -> Result<VersionProperties> {
        codec::decode(bytes)
    }
}

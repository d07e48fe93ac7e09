use std::collections::HashSet;

use serde::Deserialize;
use serde::Serialize;

use super::invalid;
use crate::constants::COMPLETION_MARKER;
use crate::store::join_path;
use crate::Result;

/// Where the coordinator keeps its entities inside the coordination namespace.
///
/// Every collection lives directly below `root`.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct PathsConfig {
    /// Absolute root of the coordinator namespace
    #[serde(default = "default_root")]
    pub root: String,

    #[serde(default = "default_domains")]
    pub domains: String,

    #[serde(default = "default_domain_groups")]
    pub domain_groups: String,

    #[serde(default = "default_ring_groups")]
    pub ring_groups: String,

    /// Node holding the global domain id counter
    #[serde(default = "default_domain_id_counter")]
    pub domain_id_counter: String,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            root: default_root(),
            domains: default_domains(),
            domain_groups: default_domain_groups(),
            ring_groups: default_ring_groups(),
            domain_id_counter: default_domain_id_counter(),
        }
    }
}

impl PathsConfig {
    pub fn domains_root(&self) -> String {
        join_path(&self.root, &self.domains)
    }

    pub fn domain_groups_root(&self) -> String {
        join_path(&self.root, &self.domain_groups)
    }

    pub fn ring_groups_root(&self) -> String {
        join_path(&self.root, &self.ring_groups)
    }

    pub fn domain_id_counter_path(&self) -> String {
        join_path(&self.root, &self.domain_id_counter)
    }

    pub fn validate(&self) -> Result<()> {
        if !self.root.starts_with('/') {
            return Err(invalid(format!("paths.root must be absolute, got '{}'", self.root)));
        }
        if self.root.len() > 1 && self.root.ends_with('/') {
            return Err(invalid(format!(
                "paths.root must not end with '/', got '{}'",
                self.root
            )));
        }

        let names = [
            ("domains", &self.domains),
            ("domain_groups", &self.domain_groups),
            ("ring_groups", &self.ring_groups),
            ("domain_id_counter", &self.domain_id_counter),
        ];
        let mut seen = HashSet::new();
        for (field, name) in names {
            if name.is_empty() || name.contains('/') {
                return Err(invalid(format!(
                    "paths.{field} must be a single non-empty node name, got '{name}'"
                )));
            }
            if name == COMPLETION_MARKER {
                return Err(invalid(format!("paths.{field} uses a reserved name")));
            }
            if !seen.insert(name.as_str()) {
                return Err(invalid(format!("paths.{field} collides with another collection")));
            }
        }
        Ok(())
    }
}

fn default_root() -> String {
    "/ringkeeper".to_string()
}
fn default_domains() -> String {
    "domains".to_string()
}
fn default_domain_groups() -> String {
    "domain_groups".to_string()
}
fn default_ring_groups() -> String {
    "ring_groups".to_string()
}
fn default_domain_id_counter() -> String {
    "domain_id_counter".to_string()
}

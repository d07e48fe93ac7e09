use serde::Deserialize;
use serde::Serialize;

/// Lifecycle rules for domain versions.
#[derive(Debug, Serialize, Deserialize, Clone, Copy)]
pub struct VersionPolicy {
    /// Allow opening a new version while an earlier one is still open.
    /// When disabled, `Domain::open_new_version` refuses until every version is closed
    /// or cancelled.
    #[serde(default = "default_allow_concurrent_open_versions")]
    pub allow_concurrent_open_versions: bool,
}

impl Default for VersionPolicy {
    fn default() -> Self {
        Self {
            allow_concurrent_open_versions: default_allow_concurrent_open_versions(),
        }
    }
}

fn default_allow_concurrent_open_versions() -> bool {
    true
}

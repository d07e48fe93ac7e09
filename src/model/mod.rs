//! Versioned entity model.
//!
//! ```text
//! Domain ── v/<n> ──> DomainVersion
//! DomainGroup  (domain id -> pinned version)
//! RingGroup ── rings/ring-<n> ──> Ring ── hosts/<host:port> ──> Host ──> HostDomain
//! ```
//!
//! Every entity root is published with a completion marker, so collections never expose
//! half-written subtrees.

mod domain;
mod domain_group;
mod domain_version;
mod host;
mod host_domain;
mod ring;
mod ring_group;
mod types;


pub use domain::*;
pub use domain_group::*;
pub use domain_version::*;
pub use host::*;
pub use host_domain::*;
pub use ring::*;
pub use ring_group::*;
pub use types::*;

use std::sync::Arc;

use crate::config::BackoffPolicy;
use crate::config::CoordinatorConfig;
use crate::watch::is_reserved_name;
use crate::CoordinationStore;
use crate::Result;
use crate::UsageError;

/// Store session and settings shared by every entity of one coordinator.
#[derive(Clone)]
pub(crate) struct EntityContext {
    pub(crate) store: Arc<dyn CoordinationStore>,
    pub(crate) config: Arc<CoordinatorConfig>,
}

impl std::fmt::Debug for EntityContext {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("EntityContext")
            .field("session_id", &self.store.session_id())
            .finish()
    }
}

impl EntityContext {
    pub(crate) fn new(
        store: Arc<dyn CoordinationStore>,
        config: Arc<CoordinatorConfig>,
    ) -> Self {
        Self { store, config }
    }

    pub(crate) fn retry(&self) -> BackoffPolicy {
        self.config.retry
    }

    pub(crate) fn store(&self) -> &dyn CoordinationStore {
        self.store.as_ref()
    }
}

/// Rejects names that cannot be used as a single path segment of an entity.
pub(crate) fn validate_name(name: &str) -> Result<()> {
    let reason = if name.is_empty() {
        "name is empty"
    } else if name.contains('/') {
        "name contains '/'"
    } else if is_reserved_name(name) {
        "name is reserved"
    } else {
        return Ok(());
    };
    Err(UsageError::InvalidName {
        name: name.to_string(),
        reason,
    }
    .into())
}

//! # ringkeeper
//!
//! Control-plane coordinator for a versioned, sharded, read-only key-value serving
//! platform.
//!
//! The coordinator keeps a watch-driven cached view of cluster metadata held in a
//! ZooKeeper-style coordination service, and mediates every mutation with
//! optimistic-concurrency writes.
//!
//! ## Layers
//!
//! - **Store** - [`CoordinationStore`], the substrate contract, plus the in-process
//!   [`MemoryCluster`]
//! - **Watch** - [`ReactiveWatch`], [`ScalarCell`], [`StructuredRecord`],
//!   [`WatchedCollection`] and the completion-marker protocol
//! - **Model** - [`Domain`], [`DomainVersion`], [`DomainGroup`], [`RingGroup`], [`Ring`],
//!   [`Host`]
//! - **Coordinator** - [`Coordinator`], the aggregate root
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use ringkeeper::{Coordinator, CoordinatorConfig, DomainDefinition, MemoryCluster, StrategyRegistry};
//!
//! let cluster = MemoryCluster::new();
//! let coordinator = Coordinator::connect(
//!     cluster.connect(),
//!     CoordinatorConfig::new()?,
//!     StrategyRegistry::with_defaults(),
//! )
//! .await?;
//!
//! let users = coordinator.add_domain("users", DomainDefinition::new(1024)).await?;
//! let version = users.open_new_version(None).await?;
//! version.add_partition_properties(0, 4096, 100).await?;
//! version.close().await?;
//! ```
//!
//! ## Errors
//!
//! Store failures, usage errors and not-found conditions are distinct [`Error`]
//! variants. Version conflicts are retried internally and never reach callers.

mod constants;
mod coordinator;
mod errors;
pub mod config;
pub mod metrics;
pub mod model;
pub mod store;
pub mod strategy;
pub mod watch;

pub(crate) mod utils;

pub use config::*;
pub use constants::BINCODE_PROPERTIES_SERIALIZER;
pub use constants::COMPLETION_MARKER;
pub use constants::MURMUR64_PARTITIONER;
pub use constants::OPAQUE_STORAGE_ENGINE;
pub use coordinator::*;
pub use errors::*;
pub use model::*;
pub use store::*;
pub use strategy::*;
pub use watch::*;

//-----------------------------------------------------------
// Test utils

#[cfg(test)]
pub(crate) mod test_utils;

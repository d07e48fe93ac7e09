//! Coordinator Error Hierarchy
//!
//! Errors are grouped by what a caller can do about them:
//! - [`SystemError`]: the backing coordination service could not be asked (network, session,
//!   serialization). Retrying later may help.
//! - [`UsageError`]: the call itself is wrong (duplicate assignment, unheld lock, reserved
//!   name, unknown strategy). Retrying cannot help.
//! - [`NotFoundError`]: the named entity does not exist.
//!
//! Optimistic-write conflicts never appear here; they are retried inside
//! [`StructuredRecord::update`](crate::StructuredRecord::update).

use config::ConfigError;
use tokio::task::JoinError;

#[doc(hidden)]
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Infrastructure-level failures (coordination service, serialization)
    #[error(transparent)]
    System(#[from] SystemError),

    /// Configuration loading and validation failures
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Programming errors reported by the coordinator API
    #[error(transparent)]
    Usage(#[from] UsageError),

    /// The addressed entity does not exist
    #[error(transparent)]
    NotFound(#[from] NotFoundError),

    /// Unrecoverable failures
    #[error("Fatal error: {0}")]
    Fatal(String),
}

#[derive(Debug, thiserror::Error)]
pub enum SystemError {
    /// Coordination service call failed
    #[error("Coordination store error: {0}")]
    Store(#[from] StoreError),

    //Serialization
    #[error("Serialization error")]
    Serialization(#[from] SerializationError),

    #[error("Background task failed: {0}")]
    TaskFailed(#[from] JoinError),
}

/// Failures reported by a [`CoordinationStore`](crate::CoordinationStore).
///
/// `NoNode`, `NodeExists` and `BadVersion` are normally consumed by the coordinator itself
/// (create-if-absent, version-checked retries). Anything that escapes is surfaced as
/// [`SystemError::Store`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("Node does not exist: {0}")]
    NoNode(String),

    #[error("Node already exists: {0}")]
    NodeExists(String),

    #[error("Version mismatch at {path} (expected {expected}, actual {actual})")]
    BadVersion {
        path: String,
        expected: i32,
        actual: i32,
    },

    #[error("Node has children: {0}")]
    NotEmpty(String),

    #[error("Ephemeral node cannot have children: {0}")]
    NoChildrenForEphemerals(String),

    #[error("Invalid path: {0}")]
    InvalidPath(String),

    #[error("Connection to coordination service lost")]
    ConnectionLoss,

    #[error("Coordination session expired")]
    SessionExpired,
}

#[derive(Debug, thiserror::Error)]
pub enum SerializationError {
    #[error("Bincode serialization failed: {0}")]
    Bincode(#[from] bincode::Error),

    #[error("Invalid {kind} value: {value:?}")]
    InvalidValue { kind: &'static str, value: String },
}

#[derive(Debug, thiserror::Error)]
pub enum UsageError {
    /// The owning coordinator was dropped while an entity was still in use
    #[error("{entity} is detached from its coordinator")]
    CoordinatorDetached { entity: String },

    #[error("{kind} '{name}' already exists")]
    AlreadyExists { kind: &'static str, name: String },

    #[error("Duplicate assignment: {0}")]
    DuplicateAssignment(String),

    #[error("Conductor of ring group '{ring_group}' is not held by this session")]
    ConductorNotHeld { ring_group: String },

    #[error("Invalid name '{name}': {reason}")]
    InvalidName { name: String, reason: &'static str },

    #[error("No {kind} registered under id '{id}'")]
    UnknownStrategy { kind: &'static str, id: String },

    #[error("Domain '{domain}' already has open version {version}")]
    ConcurrentOpenVersion { domain: String, version: u32 },

    #[error("Domain '{domain}' is referenced by domain group '{domain_group}'")]
    DomainInUse { domain: String, domain_group: String },

    #[error("Partition {partition} is out of range for domain '{domain}' ({num_partitions} partitions)")]
    PartitionOutOfRange {
        domain: String,
        partition: u32,
        num_partitions: u32,
    },

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
}

#[derive(Debug, thiserror::Error)]
pub enum NotFoundError {
    #[error("Domain '{0}' not found")]
    Domain(String),

    #[error("Domain with id {0} not found")]
    DomainId(u32),

    #[error("Version {version} of domain '{domain}' not found")]
    DomainVersion { domain: String, version: u32 },

    #[error("Domain group '{0}' not found")]
    DomainGroup(String),

    #[error("Domain {domain_id} is not assigned to host '{host}'")]
    HostDomain { host: String, domain_id: u32 },

    #[error("Partition {partition} of domain {domain_id} is not assigned to host '{host}'")]
    HostDomainPartition {
        host: String,
        domain_id: u32,
        partition: u32,
    },

    #[error("Node '{0}' not found")]
    Node(String),
}

impl Error {
    /// Whether retrying the same call later could succeed.
    ///
    /// Only a lost connection qualifies. An expired session needs a new store handle, and
    /// usage or not-found errors are final.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::System(SystemError::Store(StoreError::ConnectionLoss))
        )
    }

    pub fn is_session_expired(&self) -> bool {
        matches!(
            self,
            Error::System(SystemError::Store(StoreError::SessionExpired))
        )
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound(_))
    }

    pub fn is_usage(&self) -> bool {
        matches!(self, Error::Usage(_))
    }
}

// ============== Conversion Implementations ============== //
impl From<StoreError> for Error {
    fn from(e: StoreError) -> Self {
        Error::System(SystemError::Store(e))
    }
}

impl From<SerializationError> for Error {
    fn from(e: SerializationError) -> Self {
        Error::System(SystemError::Serialization(e))
    }
}

impl From<bincode::Error> for Error {
    fn from(e: bincode::Error) -> Self {
        SerializationError::Bincode(e).into()
    }
}

impl From<JoinError> for Error {
    fn from(err: JoinError) -> Self {
        Error::System(SystemError::TaskFailed(err))
    }
}

// -
// Reserved node names

/// Child created last by every multi-node constructor. Readers ignore an entity until it exists.
pub const COMPLETION_MARKER: &str = ".complete";

/// Separator used by the hierarchical namespace.
pub(crate) const PATH_SEPARATOR: char = '/';

/// Width of the counter appended to sequential node names.
pub(crate) const SEQUENTIAL_SUFFIX_WIDTH: usize = 10;

// -
// Domain layout

/// Child of a domain node holding one sub-node per version.
pub(crate) const DOMAIN_VERSIONS_NODE: &str = "v";

// -
// Ring group layout

pub(crate) const RING_GROUP_RINGS_NODE: &str = "rings";
pub(crate) const RING_GROUP_CONDUCTOR_NODE: &str = "conductor";
pub(crate) const RING_GROUP_CLIENTS_NODE: &str = "clients";
pub(crate) const RING_GROUP_SERVERS_NODE: &str = "servers";
pub(crate) const RING_NODE_PREFIX: &str = "ring-";
pub(crate) const RING_HOSTS_NODE: &str = "hosts";

pub(crate) const CLIENT_NODE_PREFIX: &str = "client_";
pub(crate) const SERVER_NODE_PREFIX: &str = "server_";

// -
// Host layout

pub(crate) const HOST_STATE_NODE: &str = "state";
pub(crate) const HOST_ASSIGNMENTS_NODE: &str = "assignments";
pub(crate) const HOST_COMMAND_QUEUE_NODE: &str = "commands";
pub(crate) const HOST_CURRENT_COMMAND_NODE: &str = "current_command";
pub(crate) const HOST_STATISTICS_NODE: &str = "statistics";
pub(crate) const HOST_RUNTIME_STATISTICS_NODE: &str = "runtime_statistics";
pub(crate) const COMMAND_NODE_PREFIX: &str = "command_";

// -
// Strategy identifiers

pub const MURMUR64_PARTITIONER: &str = "murmur64";
pub const OPAQUE_STORAGE_ENGINE: &str = "opaque";
pub const BINCODE_PROPERTIES_SERIALIZER: &str = "bincode";

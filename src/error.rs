use crate::NodeAddress;

#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum KeyspaceError {
    /// Keyspace must contain at least one position.
    #[error("Keyspace length must be positive")]
    EmptyKeyspace,

    /// Range length exceeds the keyspace.
    #[error("Range length {length} exceeds keyspace length {space}")]
    LengthOutOfBounds { length: u32, space: u32 },

    /// Ranges belong to keyspaces of different sizes.
    #[error("Keyspace mismatch: {0} vs {1}")]
    KeyspaceMismatch(u32, u32),

    /// Union of ranges that neither overlap nor touch.
    #[error("Cannot union disjoint ranges {0} and {1}")]
    DisjointRanges(String, String),

    /// Node index outside of the configured node count.
    #[error("Node index {index} out of bounds for {count} nodes")]
    IndexOutOfBounds { index: usize, count: usize },
}

pub type KeyspaceResult<T> = Result<T, KeyspaceError>;

#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum NodeStateError {
    /// Self-reported update time went backwards.
    #[error("Last-updated time of {address} cannot move back from {current} to {proposed}")]
    TimestampRegression {
        address: NodeAddress,
        current: u64,
        proposed: u64,
    },

    /// Malformed `host:port` address.
    #[error("Invalid node address '{0}'")]
    InvalidAddress(String),

    /// Node ranges could not be combined.
    #[error(transparent)]
    Keyspace(#[from] KeyspaceError),
}

/// Errors raised while bootstrapping the cluster from configuration.
///
/// All of these are fatal: the process must not start with an ambiguous view
/// of which node it is.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("No configured node matches local interfaces on port {port}")]
    NoLocalNode { port: u16 },

    #[error("Multiple configured nodes match local interfaces on port {port}: {matches:?}")]
    AmbiguousLocalNode { port: u16, matches: Vec<NodeAddress> },

    #[error("Cluster configuration lists no nodes")]
    NoNodes,

    #[error("Duplicate node address {0} in configuration")]
    DuplicateNode(NodeAddress),

    #[error(transparent)]
    NodeState(#[from] NodeStateError),

    #[error(transparent)]
    Keyspace(#[from] KeyspaceError),

    #[error("Failed to read persisted node state: {0}")]
    Store(#[from] StoreError),
}

/// Storage engine and node-state store failures.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Storage I/O failure: {0}")]
    Io(#[from] std::io::Error),

    #[error("Stored record is corrupt: {0}")]
    Corrupt(String),

    #[error("Streamed payload for '{key}' exceeded {limit} bytes")]
    PayloadTooLarge { key: String, limit: u64 },

    #[error("Storage failure: {0}")]
    Other(String),
}

/// Failures decoding sync-pull streams.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("Pull stream truncated: needed {needed} bytes, {available} available")]
    Truncated { needed: usize, available: usize },

    #[error("Malformed pull header: {0}")]
    Header(#[from] serde_json::Error),

    #[error("Checksum mismatch for '{key}': header {expected:#010x}, payload {actual:#010x}")]
    ChecksumMismatch {
        key: String,
        expected: u32,
        actual: u32,
    },

    #[error("Pull stream ended without sentinel")]
    MissingSentinel,
}

/// Failures of a single synchronization step with a peer.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("Connection to {0} failed: {1}")]
    Connect(NodeAddress, String),

    #[error("Request to {0} timed out")]
    Timeout(NodeAddress),

    #[error("Peer {peer} answered with status {status}")]
    Status { peer: NodeAddress, status: u16 },

    #[error("Invalid response from {0}: {1}")]
    InvalidResponse(NodeAddress, String),

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Synchronization interrupted by shutdown")]
    Shutdown,
}

pub type SyncResult<T> = Result<T, SyncError>;

#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum QueueError {
    #[error("Queue thresholds must satisfy optimal <= delay <= max, got {optimal}/{delay}/{max}")]
    InvalidThresholds {
        optimal: usize,
        delay: usize,
        max: usize,
    },

    #[error("Deferred queue delay range is inverted")]
    InvalidDelayRange,

    #[error("Deferred queue consumer already started")]
    AlreadyStarted,
}

use {
    crate::{
        ClusterStatus,
        EntryKey,
        NodeAddress,
        SyncListRequest,
        SyncListResponse,
        SyncPullRequest,
        SyncResult,
    },
    async_trait::async_trait,
    bytes::Bytes,
    std::{fmt, time::Duration},
};

/// Kind of a failed call to a replica.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallFailureKind {
    ConnectTimeout,
    ReadTimeout,
    /// Failure inside the client itself (encoding, broken invariants).
    ClientInternal,
    /// Unexpected HTTP status.
    Http(u16),
}

impl fmt::Display for CallFailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ConnectTimeout => f.write_str("connect timeout"),
            Self::ReadTimeout => f.write_str("read timeout"),
            Self::ClientInternal => f.write_str("client failure"),
            Self::Http(status) => write!(f, "HTTP {status}"),
        }
    }
}

/// One failed attempt to call a node.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{kind} calling {node}: {message}")]
pub struct CallFailure {
    node: NodeAddress,
    kind: CallFailureKind,
    retriable: bool,
    message: String,
}

impl CallFailure {
    pub fn new(
        node: NodeAddress,
        kind: CallFailureKind,
        retriable: bool,
        message: impl Into<String>,
    ) -> Self {
        Self {
            node,
            kind,
            retriable,
            message: message.into(),
        }
    }

    pub fn connect_timeout(node: NodeAddress, message: impl Into<String>) -> Self {
        Self::new(node, CallFailureKind::ConnectTimeout, true, message)
    }

    pub fn read_timeout(node: NodeAddress, message: impl Into<String>) -> Self {
        Self::new(node, CallFailureKind::ReadTimeout, true, message)
    }

    pub fn internal(node: NodeAddress, message: impl Into<String>) -> Self {
        Self::new(node, CallFailureKind::ClientInternal, false, message)
    }

    /// Server errors and throttling are worth retrying, other statuses are
    /// final.
    pub fn http(node: NodeAddress, status: u16, message: impl Into<String>) -> Self {
        let retriable = status >= 500 || status == 408 || status == 429;
        Self::new(node, CallFailureKind::Http(status), retriable, message)
    }

    pub fn node(&self) -> &NodeAddress {
        &self.node
    }

    pub fn kind(&self) -> CallFailureKind {
        self.kind
    }

    pub fn is_retriable(&self) -> bool {
        self.retriable
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

/// Client used by quorum operations to reach a single replica.
///
/// Every call gets its own timeout, already clamped to the remaining budget of
/// the enclosing operation.
#[async_trait]
pub trait EntryClient: Send + Sync {
    async fn put(
        &self,
        node: &NodeAddress,
        key: &EntryKey,
        payload: Bytes,
        timeout: Duration,
    ) -> Result<(), CallFailure>;

    /// `Ok(None)` when the node does not have the entry (404 or tombstone).
    async fn get(
        &self,
        node: &NodeAddress,
        key: &EntryKey,
        timeout: Duration,
    ) -> Result<Option<Bytes>, CallFailure>;

    /// Content length; `Ok(None)` when the node does not have the entry.
    async fn head(
        &self,
        node: &NodeAddress,
        key: &EntryKey,
        timeout: Duration,
    ) -> Result<Option<u64>, CallFailure>;

    /// Deleting a missing entry is a success.
    async fn delete(
        &self,
        node: &NodeAddress,
        key: &EntryKey,
        timeout: Duration,
    ) -> Result<(), CallFailure>;
}

/// Client side of the peer-to-peer synchronization protocol.
#[async_trait]
pub trait SyncClient: Send + Sync {
    /// Change list of entries inserted or modified since `request.since`.
    async fn sync_list(
        &self,
        peer: &NodeAddress,
        request: &SyncListRequest,
        timeout: Duration,
    ) -> SyncResult<SyncListResponse>;

    /// Raw pull stream (see [`PullStreamReader`](crate::PullStreamReader)).
    async fn sync_pull(
        &self,
        peer: &NodeAddress,
        request: &SyncPullRequest,
        timeout: Duration,
    ) -> SyncResult<Bytes>;

    /// Cluster status as seen by the peer; used as a heartbeat when no content
    /// needs to be exchanged.
    async fn fetch_status(
        &self,
        peer: &NodeAddress,
        timeout: Duration,
    ) -> SyncResult<ClusterStatus>;

    /// Tells the peer that `local` is going away.
    async fn notify_inactive(
        &self,
        peer: &NodeAddress,
        local: &NodeAddress,
        timeout: Duration,
    ) -> SyncResult<()>;
}

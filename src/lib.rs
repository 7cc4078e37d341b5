//! Replication core of a ring-partitioned content store.
//!
//! Entries are placed on a circular keyspace by hashing their keys. Every
//! node serves a contiguous range of the ring (its active range) and may
//! replicate a wider one (its passive range). On top of that layout:
//!
//! - [`ClusterBootstrapper`] reconciles configuration with persisted peer
//!   state at startup, and [`ClusterStates`] keeps the shared cluster view.
//! - [`ClusterView`] runs one [`ClusterPeer`] sync engine per peer, pulling
//!   whatever changed in the overlapping part of the ring.
//! - [`QuorumEngine`] performs client PUT/GET/HEAD/DELETE against the
//!   replicas of a key, with tiered success thresholds and a time budget.
//! - [`DeferredQueue`] retries work that could not be completed in time,
//!   shedding load randomly as it fills up.
//!
//! Storage and transport are abstract: see [`EntryStore`],
//! [`NodeStateStore`], [`EntryClient`] and [`SyncClient`].

mod bootstrap;
mod cluster;
mod config;
mod error;
mod hash;
mod keyspace;
mod node;
mod protocol;
mod queue;
mod quorum;
mod storage;
mod sync;
mod time;
mod transport;

pub use {
    bootstrap::{BootstrapOutcome, ClusterBootstrapper},
    cluster::{ClusterStates, ClusterView},
    config::{
        ClusterConfig,
        DeferredQueueConfig,
        NodeConfig,
        OperationConfig,
        RangeConfig,
        SyncConfig,
    },
    error::{
        CodecError,
        ConfigError,
        KeyspaceError,
        KeyspaceResult,
        NodeStateError,
        QueueError,
        StoreError,
        SyncError,
        SyncResult,
    },
    keyspace::{KeyRange, KeySpace},
    node::{ActiveNodeState, NodeAddress, NodeDefinition, NodeStateCell},
    protocol::{
        ClusterStatus,
        END_OF_STREAM,
        PullHeader,
        PullStreamReader,
        PullStreamWriter,
        PulledEntry,
        SyncEntry,
        SyncListRequest,
        SyncListResponse,
        SyncPullRequest,
        payload_checksum,
        topology_hash,
    },
    queue::{BoxError, DeferredProcessor, DeferredQueue, EnqueueOutcome},
    quorum::{
        Candidate,
        CallOutcome,
        DeferredDeleteProcessor,
        NodeFailure,
        NodesForKey,
        OperationResult,
        QuorumEngine,
    },
    storage::{
        Compression,
        DeleteOutcome,
        EntryKey,
        EntryMetadata,
        EntryStore,
        MemoryEntryStore,
        MemoryNodeStateStore,
        NodeStateStore,
        OverwriteChecker,
        ScanControl,
        UpsertOutcome,
    },
    sync::{
        ClusterPeer,
        PeerStatus,
        RemoteOverwrite,
        SyncListSource,
        pull_batch_len,
        remote_wins,
        sync_delay,
    },
    time::{Clock, ManualClock, SystemClock},
    transport::{CallFailure, CallFailureKind, EntryClient, SyncClient},
};

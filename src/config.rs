use {
    crate::{KeyRange, KeySpace, KeyspaceResult, NodeAddress, QueueError},
    serde::{Deserialize, Serialize},
    std::time::Duration,
};

/// Cluster layout and tuning knobs, as loaded by the hosting service.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterConfig {
    /// Number of positions on the ring.
    pub keyspace_length: u32,
    /// Ring segments each node actively serves.
    pub copies: usize,
    /// Extra segments each node replicates without serving them.
    pub passive_copies: usize,
    /// Cluster members in ring order; the first entry gets index 1.
    pub nodes: Vec<NodeConfig>,
    /// Port the local service listens on, used to find the local node.
    pub listen_port: u16,
    /// How long state of nodes dropped from `nodes` is kept around.
    #[serde(with = "humantime_serde")]
    pub orphan_retention: Duration,
    pub sync: SyncConfig,
    pub operation: OperationConfig,
    pub deferred_deletes: DeferredQueueConfig,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            keyspace_length: KeySpace::DEFAULT_LENGTH,
            copies: 3,
            passive_copies: 0,
            nodes: Vec::new(),
            listen_port: 9090,
            orphan_retention: Duration::from_secs(24 * 60 * 60),
            sync: SyncConfig::default(),
            operation: OperationConfig::default(),
            deferred_deletes: DeferredQueueConfig::default(),
        }
    }
}

/// Configured cluster member.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    pub address: NodeAddress,
    /// Explicit active range; derived from the node's position if absent.
    #[serde(default)]
    pub active: Option<RangeConfig>,
    /// Explicit passive range; derived from the node's position if absent.
    #[serde(default)]
    pub passive: Option<RangeConfig>,
}

impl NodeConfig {
    pub fn new(address: NodeAddress) -> Self {
        Self {
            address,
            active: None,
            passive: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RangeConfig {
    pub start: u32,
    pub length: u32,
}

impl RangeConfig {
    pub fn to_range(self, space: KeySpace) -> KeyspaceResult<KeyRange> {
        space.range(self.start, self.length)
    }
}

/// Peer synchronization tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    #[serde(with = "humantime_serde")]
    pub list_timeout: Duration,
    #[serde(with = "humantime_serde")]
    pub pull_timeout: Duration,
    #[serde(with = "humantime_serde")]
    pub status_timeout: Duration,
    /// Entries requested per change list, and the most served in one.
    pub max_list_entries: usize,
    /// Keys requested per pull round.
    pub max_pull_entries: usize,
    /// Aggregate payload size requested per pull round.
    pub max_pull_bytes: u64,
    pub max_pull_rounds: usize,
    /// Short or empty pull rounds tolerated before a pass is abandoned.
    pub pull_failure_budget: usize,
    /// Payloads up to this size are stored in one piece.
    pub inline_threshold: u64,
    /// Upper bound for a single streamed payload.
    pub max_entry_size: u64,
    /// Pause after an empty change list; shrinks as lists grow.
    #[serde(with = "humantime_serde")]
    pub idle_delay: Duration,
    /// Lag behind the peer beyond which no pause is taken at all.
    #[serde(with = "humantime_serde")]
    pub no_delay_lag: Duration,
    /// Pause after a failed pass.
    #[serde(with = "humantime_serde")]
    pub failure_cooldown: Duration,
    /// Heartbeat cadence for peers sharing no part of the ring.
    #[serde(with = "humantime_serde")]
    pub minimal_sync_interval: Duration,
    #[serde(with = "humantime_serde")]
    pub inactive_notify_timeout: Duration,
    /// Entries younger than this are not listed yet, so in-flight writes
    /// cannot be skipped over.
    #[serde(with = "humantime_serde")]
    pub list_grace: Duration,
    /// Suppresses side effects meant for real deployments.
    pub test_mode: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            list_timeout: Duration::from_secs(10),
            pull_timeout: Duration::from_secs(30),
            status_timeout: Duration::from_secs(2),
            max_list_entries: 500,
            max_pull_entries: 200,
            max_pull_bytes: 8 * 1024 * 1024,
            max_pull_rounds: 8,
            pull_failure_budget: 3,
            inline_threshold: 64 * 1024,
            max_entry_size: 256 * 1024 * 1024,
            idle_delay: Duration::from_secs(5),
            no_delay_lag: Duration::from_secs(3 * 60),
            failure_cooldown: Duration::from_secs(10),
            minimal_sync_interval: Duration::from_secs(30),
            inactive_notify_timeout: Duration::from_millis(250),
            list_grace: Duration::from_secs(10),
            test_mode: false,
        }
    }
}

/// Success thresholds and time budgets of one quorum operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OperationConfig {
    /// Successes required for the operation to count as done at all.
    pub minimal_ok: usize,
    /// Successes the operation keeps retrying for.
    pub optimal_ok: usize,
    /// Successes after which no further nodes are called.
    pub max_ok: usize,
    pub allow_retries: bool,
    #[serde(with = "humantime_serde")]
    pub operation_timeout: Duration,
    #[serde(with = "humantime_serde")]
    pub call_timeout: Duration,
    /// Calls are not attempted with less time than this left.
    #[serde(with = "humantime_serde")]
    pub min_call_timeout: Duration,
    #[serde(with = "humantime_serde")]
    pub retry_delay: Duration,
    /// Rounds faster than this are taken as a sign of contention and followed
    /// by `retry_delay`.
    #[serde(with = "humantime_serde")]
    pub quick_round_threshold: Duration,
    /// Retry rounds after the disabled-node fallback.
    pub extra_retry_rounds: usize,
}

impl Default for OperationConfig {
    fn default() -> Self {
        Self {
            minimal_ok: 1,
            optimal_ok: 2,
            max_ok: 3,
            allow_retries: true,
            operation_timeout: Duration::from_secs(10),
            call_timeout: Duration::from_secs(5),
            min_call_timeout: Duration::from_millis(100),
            retry_delay: Duration::from_millis(250),
            quick_round_threshold: Duration::from_secs(1),
            extra_retry_rounds: 2,
        }
    }
}

impl OperationConfig {
    pub fn with_thresholds(mut self, minimal_ok: usize, optimal_ok: usize, max_ok: usize) -> Self {
        self.minimal_ok = minimal_ok;
        self.optimal_ok = optimal_ok.max(minimal_ok);
        self.max_ok = max_ok.max(self.optimal_ok);
        self
    }

    pub fn with_operation_timeout(mut self, timeout: Duration) -> Self {
        self.operation_timeout = timeout;
        self
    }

    pub fn with_retries(mut self, allow_retries: bool) -> Self {
        self.allow_retries = allow_retries;
        self
    }
}

/// Admission control of the deferred operation queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeferredQueueConfig {
    /// Up to this many queued items, callers are not slowed down.
    pub optimal_size: usize,
    /// From this size on, callers get the full delay and may be dropped.
    pub delay_size: usize,
    /// Hard capacity.
    pub max_size: usize,
    #[serde(with = "humantime_serde")]
    pub min_delay: Duration,
    #[serde(with = "humantime_serde")]
    pub max_delay: Duration,
}

impl Default for DeferredQueueConfig {
    fn default() -> Self {
        Self {
            optimal_size: 200,
            delay_size: 500,
            max_size: 1000,
            min_delay: Duration::from_millis(5),
            max_delay: Duration::from_millis(100),
        }
    }
}

impl DeferredQueueConfig {
    pub fn validate(&self) -> Result<(), QueueError> {
        if self.optimal_size > self.delay_size
            || self.delay_size > self.max_size
            || self.max_size == 0
        {
            return Err(QueueError::InvalidThresholds {
                optimal: self.optimal_size,
                delay: self.delay_size,
                max: self.max_size,
            });
        }
        if self.min_delay > self.max_delay {
            return Err(QueueError::InvalidDelayRange);
        }
        Ok(())
    }
}

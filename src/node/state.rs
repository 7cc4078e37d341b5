use {
    super::{NodeAddress, NodeDefinition},
    crate::{KeyRange, KeyspaceResult, NodeStateError},
    parking_lot::RwLock,
    serde::{Deserialize, Serialize},
    std::{
        hash::{Hash, Hasher},
        sync::Arc,
    },
};

/// Runtime state of a cluster member, as seen by the local node.
///
/// Values are immutable: every `with_*` method consumes the state and returns
/// the replacement, which is then published through a [`NodeStateCell`].
/// A mutator that would not change anything hands back the very same value.
///
/// Equality and hashing only consider topology (address, index, ranges and the
/// disabled flag), never timestamps: two states compare equal when they
/// describe the same node layout, regardless of when they were observed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActiveNodeState {
    address: NodeAddress,
    index: u32,
    active_range: KeyRange,
    passive_range: KeyRange,
    total_range: KeyRange,

    /// Time of the node's own last self-report.
    last_updated: u64,

    /// Part of the ring both this node and the local node store.
    range_sync: KeyRange,

    /// Everything inserted before this time has been pulled from the node.
    synced_up_to: u64,

    last_sync_attempt: u64,

    disabled: bool,
    disabled_updated: u64,
}

impl PartialEq for ActiveNodeState {
    fn eq(&self, other: &Self) -> bool {
        self.address == other.address
            && self.index == other.index
            && self.disabled == other.disabled
            && self.active_range == other.active_range
            && self.passive_range == other.passive_range
    }
}

impl Eq for ActiveNodeState {}

impl Hash for ActiveNodeState {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.address.hash(state);
        self.index.hash(state);
        self.disabled.hash(state);
        self.active_range.hash(state);
        self.passive_range.hash(state);
    }
}

impl ActiveNodeState {
    /// State of the local node itself.
    ///
    /// The local node trivially shares its whole total range with itself.
    pub fn local(definition: &NodeDefinition, now: u64) -> Self {
        Self::from_definition(definition, definition.total_range(), now)
    }

    /// Fresh state of a remote peer that has never been synchronized with.
    pub fn remote(local: &NodeDefinition, remote: &NodeDefinition) -> Self {
        let range_sync = local.total_range().intersection(&remote.total_range());
        Self::from_definition(remote, range_sync, 0)
    }

    fn from_definition(definition: &NodeDefinition, range_sync: KeyRange, now: u64) -> Self {
        Self {
            address: definition.address().clone(),
            index: definition.index(),
            active_range: definition.active_range(),
            passive_range: definition.passive_range(),
            total_range: definition.total_range(),
            last_updated: now,
            range_sync,
            synced_up_to: 0,
            last_sync_attempt: 0,
            disabled: false,
            disabled_updated: 0,
        }
    }

    pub fn address(&self) -> &NodeAddress {
        &self.address
    }

    /// One-based position of the node in the configured node list.
    pub fn index(&self) -> u32 {
        self.index
    }

    /// Range the node serves client requests for.
    pub fn active_range(&self) -> KeyRange {
        self.active_range
    }

    /// Range the node replicates beyond its active one.
    pub fn passive_range(&self) -> KeyRange {
        self.passive_range
    }

    /// Union of the active and passive ranges: everything the node stores.
    pub fn total_range(&self) -> KeyRange {
        self.total_range
    }

    /// Time of the node's latest self-report, in epoch millis.
    pub fn last_updated(&self) -> u64 {
        self.last_updated
    }

    /// Part of the ring shared with the local node, i.e. what gets synchronized.
    pub fn range_sync(&self) -> KeyRange {
        self.range_sync
    }

    /// Watermark: entries inserted before this time have been pulled.
    pub fn synced_up_to(&self) -> u64 {
        self.synced_up_to
    }

    /// When a sync pass with the node last ended, successfully or not.
    pub fn last_sync_attempt(&self) -> u64 {
        self.last_sync_attempt
    }

    /// Disabled nodes keep syncing but are only a last resort for clients.
    pub fn is_disabled(&self) -> bool {
        self.disabled
    }

    /// When the disabled flag last changed.
    pub fn disabled_updated(&self) -> u64 {
        self.disabled_updated
    }

    /// Static part of the state.
    pub fn definition(&self) -> KeyspaceResult<NodeDefinition> {
        NodeDefinition::new(
            self.address.clone(),
            self.index,
            self.active_range,
            self.passive_range,
        )
    }

    /// Records a self-report of the node.
    ///
    /// Reports must not go back in time; a report for the current time is a
    /// no-op.
    pub fn with_last_updated(self, last_updated: u64) -> Result<Self, NodeStateError> {
        if last_updated < self.last_updated {
            return Err(NodeStateError::TimestampRegression {
                address: self.address,
                current: self.last_updated,
                proposed: last_updated,
            });
        }
        if last_updated == self.last_updated {
            return Ok(self);
        }
        Ok(Self {
            last_updated,
            ..self
        })
    }

    pub fn with_range_sync(self, range_sync: KeyRange) -> Self {
        if range_sync == self.range_sync {
            return self;
        }
        Self { range_sync, ..self }
    }

    pub fn with_synced_up_to(self, synced_up_to: u64) -> Self {
        Self {
            synced_up_to,
            ..self
        }
    }

    pub fn with_last_sync_attempt(self, last_sync_attempt: u64) -> Self {
        Self {
            last_sync_attempt,
            ..self
        }
    }

    /// Flips the disabled flag; toggling to the current value keeps the old
    /// change time.
    pub fn with_disabled(self, disabled: bool, now: u64) -> Self {
        if disabled == self.disabled {
            return self;
        }
        Self {
            disabled,
            disabled_updated: now,
            ..self
        }
    }

    /// Replaces the static part of the state, keeping synchronization
    /// progress. The caller decides whether `range_sync` must be recomputed.
    pub fn with_definition(self, definition: &NodeDefinition) -> Self {
        Self {
            address: definition.address().clone(),
            index: definition.index(),
            active_range: definition.active_range(),
            passive_range: definition.passive_range(),
            total_range: definition.total_range(),
            ..self
        }
    }

    /// Checks whether anything persisted differs, timestamps included.
    pub fn differs_from(&self, other: &ActiveNodeState) -> bool {
        self != other
            || self.last_updated != other.last_updated
            || self.range_sync != other.range_sync
            || self.synced_up_to != other.synced_up_to
            || self.last_sync_attempt != other.last_sync_attempt
            || self.disabled_updated != other.disabled_updated
    }
}

/// Published, atomically replaceable [`ActiveNodeState`].
///
/// Readers get an `Arc` snapshot and never block writers for longer than a
/// pointer swap. Writers are expected to be few (one sync engine per peer,
/// plus occasional cluster-status merges).
#[derive(Debug)]
pub struct NodeStateCell {
    current: RwLock<Arc<ActiveNodeState>>,
}

impl NodeStateCell {
    pub fn new(state: ActiveNodeState) -> Self {
        Self {
            current: RwLock::new(Arc::new(state)),
        }
    }

    /// Current snapshot.
    pub fn load(&self) -> Arc<ActiveNodeState> {
        Arc::clone(&self.current.read())
    }

    pub fn store(&self, state: ActiveNodeState) -> Arc<ActiveNodeState> {
        let state = Arc::new(state);
        *self.current.write() = Arc::clone(&state);
        state
    }

    /// Replaces the state with `f(current)`, returning the previous and the
    /// new snapshot.
    pub fn update<F>(&self, f: F) -> (Arc<ActiveNodeState>, Arc<ActiveNodeState>)
    where
        F: FnOnce(ActiveNodeState) -> ActiveNodeState,
    {
        let mut guard = self.current.write();
        let previous = Arc::clone(&guard);
        let next = Arc::new(f((*previous).clone()));
        *guard = Arc::clone(&next);
        (previous, next)
    }

    /// Like [`update()`](Self::update), leaving the state untouched when `f`
    /// fails.
    pub fn try_update<F, E>(&self, f: F) -> Result<Arc<ActiveNodeState>, E>
    where
        F: FnOnce(ActiveNodeState) -> Result<ActiveNodeState, E>,
    {
        let mut guard = self.current.write();
        let next = Arc::new(f((**guard).clone())?);
        *guard = Arc::clone(&next);
        Ok(next)
    }
}

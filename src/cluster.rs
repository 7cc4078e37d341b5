use {
    crate::{
        ActiveNodeState,
        BootstrapOutcome,
        Candidate,
        Clock,
        ClusterPeer,
        ClusterStatus,
        EntryKey,
        EntryStore,
        KeyRange,
        KeySpace,
        NodeAddress,
        NodeStateCell,
        NodeStateError,
        NodeStateStore,
        NodesForKey,
        StoreError,
        SyncClient,
        SyncConfig,
        protocol::topology_hash,
    },
    hrw_hash::HrwNodes,
    std::{collections::BTreeMap, iter, sync::Arc},
    tracing::{debug, info, warn},
};

/// Published states of the local node and all configured peers.
///
/// The set of peers is fixed at bootstrap; their states change through the
/// per-peer cells. Shared by the sync engines, the sync-list responder and
/// request routing.
pub struct ClusterStates {
    keyspace: KeySpace,
    creation_time: u64,
    local: NodeStateCell,
    peers: BTreeMap<NodeAddress, Arc<NodeStateCell>>,
    orphans: Vec<ActiveNodeState>,
    store: Arc<dyn NodeStateStore>,
    clock: Arc<dyn Clock>,
}

impl ClusterStates {
    pub fn new(
        outcome: BootstrapOutcome,
        store: Arc<dyn NodeStateStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let BootstrapOutcome {
            keyspace,
            local,
            peers,
            retained_orphans,
        } = outcome;
        Self {
            keyspace,
            creation_time: clock.now_millis(),
            local: NodeStateCell::new(local),
            peers: peers
                .into_iter()
                .map(|(address, state)| (address, Arc::new(NodeStateCell::new(state))))
                .collect(),
            orphans: retained_orphans,
            store,
            clock,
        }
    }

    pub fn keyspace(&self) -> KeySpace {
        self.keyspace
    }

    pub fn now(&self) -> u64 {
        self.clock.now_millis()
    }

    pub fn local(&self) -> Arc<ActiveNodeState> {
        self.local.load()
    }

    pub fn peer(&self, address: &NodeAddress) -> Option<Arc<ActiveNodeState>> {
        self.peers.get(address).map(|cell| cell.load())
    }

    #[cfg(test)]
    fn peer_cell(&self, address: &NodeAddress) -> Option<&Arc<NodeStateCell>> {
        self.peers.get(address)
    }

    pub fn peer_addresses(&self) -> impl Iterator<Item = &NodeAddress> {
        self.peers.keys()
    }

    /// Snapshots of all peers, in address order.
    pub fn peers(&self) -> Vec<Arc<ActiveNodeState>> {
        self.peers.values().map(|cell| cell.load()).collect()
    }

    /// Unconfigured nodes whose state was kept at bootstrap.
    pub fn orphans(&self) -> &[ActiveNodeState] {
        &self.orphans
    }

    pub fn persist(&self, state: &ActiveNodeState) -> Result<(), StoreError> {
        self.store.upsert(state)
    }

    pub fn status(&self) -> ClusterStatus {
        ClusterStatus {
            local: (*self.local()).clone(),
            remote: self.peers().iter().map(|state| (**state).clone()).collect(),
            creation_time: self.creation_time,
        }
    }

    /// Hash of the topology as seen locally; equal on all nodes that agree.
    pub fn status_hash(&self) -> u64 {
        let local = self.local();
        let peers = self.peers();
        topology_hash(iter::once(&*local).chain(peers.iter().map(|state| &**state)))
    }

    /// Folds a peer's cluster view into the local one.
    ///
    /// Only states newer than what is known (by self-reported update time)
    /// are taken; the local node and unknown nodes are skipped. Returns the
    /// number of peers updated.
    pub fn merge_status(&self, status: &ClusterStatus) -> usize {
        let local = self.local();
        let mut updated = 0;

        for incoming in iter::once(&status.local).chain(status.remote.iter()) {
            if incoming.address() == local.address() {
                continue;
            }
            let Some(cell) = self.peers.get(incoming.address()) else {
                debug!(node = %incoming.address(), "ignoring status of unconfigured node");
                continue;
            };
            if incoming.last_updated() <= cell.load().last_updated() {
                continue;
            }
            let definition = match incoming.definition() {
                Ok(definition) => definition,
                Err(err) => {
                    warn!(node = %incoming.address(), "ignoring inconsistent node status: {err}");
                    continue;
                }
            };

            let merged = cell.try_update(|state| {
                let old_sync = state.range_sync();
                let new_sync = local.total_range().intersection(&definition.total_range());
                let next = state
                    .with_definition(&definition)
                    .with_disabled(incoming.is_disabled(), incoming.disabled_updated())
                    .with_last_updated(incoming.last_updated())?;
                Ok::<_, NodeStateError>(if new_sync == old_sync {
                    next
                } else if old_sync.contains(&new_sync) {
                    next.with_range_sync(new_sync)
                } else {
                    next.with_range_sync(new_sync).with_synced_up_to(0)
                })
            });

            match merged {
                Ok(next) => {
                    updated += 1;
                    debug!(
                        node = %next.address(),
                        last_updated = next.last_updated(),
                        "merged node status"
                    );
                    if let Err(err) = self.persist(&next) {
                        warn!(node = %next.address(), "failed to persist merged state: {err}");
                    }
                }
                Err(err) => warn!(node = %incoming.address(), "cannot merge node status: {err}"),
            }
        }
        updated
    }

    /// Marks the local node as (not) serving requests.
    pub fn set_local_disabled(&self, disabled: bool) -> Result<(), NodeStateError> {
        let now = self.now();
        self.local.try_update(|state| {
            let reported = now.max(state.last_updated());
            state.with_disabled(disabled, now).with_last_updated(reported)
        })?;
        info!(disabled, "local node availability changed");
        Ok(())
    }

    /// Percentage of the ring served by enabled nodes.
    pub fn active_coverage(&self) -> f64 {
        self.coverage(ActiveNodeState::active_range)
    }

    /// Percentage of the ring stored by enabled nodes, passive copies included.
    pub fn total_coverage(&self) -> f64 {
        self.coverage(ActiveNodeState::total_range)
    }

    fn coverage(&self, range: fn(&ActiveNodeState) -> KeyRange) -> f64 {
        let local = self.local();
        let peers = self.peers();
        let ranges = iter::once(&local)
            .chain(peers.iter())
            .filter(|state| !state.is_disabled())
            .map(|state| range(state));
        coverage_percent(self.keyspace, ranges)
    }

    /// Replica candidates for `key`: nodes storing its ring position, active
    /// holders first, otherwise in rendezvous-hash order.
    pub fn nodes_for_key(&self, key: &EntryKey) -> NodesForKey {
        let position = self.keyspace.position(key);
        let local = self.local();
        let peers = self.peers();
        let holders: BTreeMap<u32, &ActiveNodeState> = iter::once(&local)
            .chain(peers.iter())
            .filter(|state| state.total_range().contains_position(position))
            .map(|state| (state.index(), &**state))
            .collect();

        let hrw = HrwNodes::new(holders.keys().copied());
        let mut ordered: Vec<_> = hrw
            .sorted(&position)
            .filter_map(|idx| holders.get(idx).copied())
            .collect();
        ordered.sort_by_key(|state| !state.active_range().contains_position(position));

        let candidates = ordered
            .into_iter()
            .map(|state| Candidate {
                address: state.address().clone(),
                disabled: state.is_disabled(),
            })
            .collect();
        NodesForKey::new(key.clone(), candidates)
    }
}

/// Share of the ring covered by the union of `ranges`, in percent.
fn coverage_percent(space: KeySpace, ranges: impl Iterator<Item = KeyRange>) -> f64 {
    let length = u64::from(space.length());
    let mut segments = Vec::new();
    for range in ranges {
        if range.is_full() {
            return 100.0;
        }
        if range.is_empty() {
            continue;
        }
        let start = u64::from(range.start());
        let end = start + u64::from(range.length());
        if end <= length {
            segments.push((start, end));
        } else {
            segments.push((start, length));
            segments.push((0, end - length));
        }
    }
    segments.sort_unstable();

    let mut covered = 0;
    let mut reach = 0;
    for (start, end) in segments {
        let start = start.max(reach);
        if end > start {
            covered += end - start;
        }
        reach = reach.max(end);
    }
    covered as f64 * 100.0 / length as f64
}

/// The local node's cluster membership: shared states plus one sync engine
/// per peer.
pub struct ClusterView {
    states: Arc<ClusterStates>,
    peers: BTreeMap<NodeAddress, Arc<ClusterPeer>>,
}

impl ClusterView {
    pub fn new(
        states: Arc<ClusterStates>,
        client: Arc<dyn SyncClient>,
        entries: Arc<dyn EntryStore>,
        config: SyncConfig,
    ) -> Self {
        let peers = states
            .peers
            .iter()
            .map(|(address, cell)| {
                let peer = ClusterPeer::new(
                    address.clone(),
                    Arc::clone(cell),
                    Arc::clone(&states),
                    Arc::clone(&client),
                    Arc::clone(&entries),
                    config.clone(),
                );
                (address.clone(), Arc::new(peer))
            })
            .collect();
        Self { states, peers }
    }

    pub fn states(&self) -> &Arc<ClusterStates> {
        &self.states
    }

    pub fn local_state(&self) -> Arc<ActiveNodeState> {
        self.states.local()
    }

    pub fn peer_state(&self, address: &NodeAddress) -> Option<Arc<ActiveNodeState>> {
        self.states.peer(address)
    }

    pub fn peer(&self, address: &NodeAddress) -> Option<&Arc<ClusterPeer>> {
        self.peers.get(address)
    }

    pub fn peers(&self) -> impl Iterator<Item = &Arc<ClusterPeer>> {
        self.peers.values()
    }

    pub fn status(&self) -> ClusterStatus {
        self.states.status()
    }

    pub fn active_coverage(&self) -> f64 {
        self.states.active_coverage()
    }

    pub fn total_coverage(&self) -> f64 {
        self.states.total_coverage()
    }

    /// Starts synchronizing with every peer.
    pub fn start(&self) {
        info!(
            local = %self.states.local().address(),
            peers = self.peers.len(),
            "starting cluster sync"
        );
        for peer in self.peers.values() {
            peer.start();
        }
    }

    /// Stops all sync engines and waits for them to wind down.
    pub async fn stop(&self) {
        for peer in self.peers.values() {
            peer.stop().await;
        }
        info!("cluster sync stopped");
    }
}

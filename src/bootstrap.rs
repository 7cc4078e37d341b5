use {
    crate::{
        ActiveNodeState,
        Clock,
        ClusterConfig,
        ConfigError,
        KeySpace,
        NodeAddress,
        NodeDefinition,
        NodeStateStore,
    },
    std::{
        collections::{BTreeMap, HashSet},
        net::IpAddr,
    },
    tracing::{debug, info, warn},
};

/// Result of reconciling configuration with persisted node state.
#[derive(Debug, Clone)]
pub struct BootstrapOutcome {
    pub keyspace: KeySpace,
    pub local: ActiveNodeState,
    /// Configured peers, keyed by address.
    pub peers: BTreeMap<NodeAddress, ActiveNodeState>,
    /// Persisted states of nodes no longer configured, kept because they were
    /// active recently.
    pub retained_orphans: Vec<ActiveNodeState>,
}

/// Builds the authoritative peer map at process start.
///
/// Configuration says which nodes exist and what they own; the node state
/// store remembers how far each peer has been synchronized. Where the two
/// disagree, configuration wins, and synchronization progress is kept only
/// where it is still valid.
pub struct ClusterBootstrapper<S, C> {
    config: ClusterConfig,
    store: S,
    clock: C,
}

impl<S: NodeStateStore, C: Clock> ClusterBootstrapper<S, C> {
    pub fn new(config: ClusterConfig, store: S, clock: C) -> Self {
        Self { config, store, clock }
    }

    pub fn keyspace(&self) -> Result<KeySpace, ConfigError> {
        Ok(KeySpace::new(self.config.keyspace_length)?)
    }

    /// Node definitions in configured order.
    ///
    /// Nodes without explicit ranges get linear ones: node `i` of `n` starts
    /// at segment `i` and covers `copies` (active) or
    /// `copies + passive_copies` (passive) segments.
    pub fn definitions(&self) -> Result<Vec<NodeDefinition>, ConfigError> {
        let keyspace = self.keyspace()?;
        let count = self.config.nodes.len();
        if count == 0 {
            return Err(ConfigError::NoNodes);
        }

        let mut seen = HashSet::with_capacity(count);
        let mut definitions = Vec::with_capacity(count);
        for (idx, node) in self.config.nodes.iter().enumerate() {
            if !seen.insert(node.address.clone()) {
                return Err(ConfigError::DuplicateNode(node.address.clone()));
            }
            let active = match node.active {
                Some(range) => range.to_range(keyspace)?,
                None => keyspace.linear_range(idx, count, self.config.copies)?,
            };
            let passive = match node.passive {
                Some(range) => range.to_range(keyspace)?,
                None => keyspace.linear_range(
                    idx,
                    count,
                    self.config.copies + self.config.passive_copies,
                )?,
            };
            definitions.push(NodeDefinition::new(
                node.address.clone(),
                idx as u32 + 1,
                active,
                passive,
            )?);
        }
        Ok(definitions)
    }

    /// Finds the one configured node this process is.
    ///
    /// A node is local if it uses the listening port and its host is a
    /// loopback address or one of `interfaces`.
    pub fn resolve_local<'a>(
        &self,
        definitions: &'a [NodeDefinition],
        interfaces: &[IpAddr],
    ) -> Result<&'a NodeDefinition, ConfigError> {
        let port = self.config.listen_port;
        let matches: Vec<_> = definitions
            .iter()
            .filter(|def| def.address().port() == port && is_local_host(def.address(), interfaces))
            .collect();

        match matches.as_slice() {
            [local] => Ok(*local),
            [] => Err(ConfigError::NoLocalNode { port }),
            _ => Err(ConfigError::AmbiguousLocalNode {
                port,
                matches: matches.iter().map(|def| def.address().clone()).collect(),
            }),
        }
    }

    /// Resolves the local node and reconciles persisted peer state.
    pub fn bootstrap(&self, interfaces: &[IpAddr]) -> Result<BootstrapOutcome, ConfigError> {
        let definitions = self.definitions()?;
        let local = self.resolve_local(&definitions, interfaces)?;
        info!(local = %local.address(), nodes = definitions.len(), "resolved local cluster node");
        self.reconcile(local, &definitions)
    }

    /// Reconciles persisted state against configured definitions, with
    /// `local` already known.
    pub fn reconcile(
        &self,
        local: &NodeDefinition,
        definitions: &[NodeDefinition],
    ) -> Result<BootstrapOutcome, ConfigError> {
        let now = self.clock.now_millis();
        let configured: BTreeMap<_, _> = definitions
            .iter()
            .filter(|def| def.address() != local.address())
            .map(|def| (def.address().clone(), def))
            .collect();

        let mut peers = BTreeMap::new();
        let mut retained_orphans = Vec::new();

        for persisted in self.store.read_all()? {
            let address = persisted.address().clone();
            if &address == local.address() {
                continue;
            }
            match configured.get(&address) {
                Some(def) => {
                    let state = self.refresh(local, def, persisted)?;
                    peers.insert(address, state);
                }
                None => {
                    let age = now.saturating_sub(persisted.last_sync_attempt());
                    if u128::from(age) < self.config.orphan_retention.as_millis() {
                        info!(node = %address, age_ms = age, "keeping state of unconfigured node");
                        retained_orphans.push(persisted);
                    } else {
                        info!(
                            node = %address,
                            age_ms = age,
                            "removing stale state of unconfigured node"
                        );
                        self.store.delete(&address)?;
                    }
                }
            }
        }

        for (address, def) in configured {
            if peers.contains_key(&address) {
                continue;
            }
            let state = ActiveNodeState::remote(local, def);
            debug!(
                node = %address,
                range_sync = %state.range_sync(),
                "creating state for new peer"
            );
            self.store.upsert(&state)?;
            peers.insert(address, state);
        }

        Ok(BootstrapOutcome {
            keyspace: self.keyspace()?,
            local: ActiveNodeState::local(local, now),
            peers,
            retained_orphans,
        })
    }

    /// Applies the configured definition to a persisted peer state.
    ///
    /// Synchronization progress stays valid when the shared range is
    /// unchanged or narrower; any part of the new range outside the old one
    /// was never verified, so progress restarts from zero.
    fn refresh(
        &self,
        local: &NodeDefinition,
        def: &NodeDefinition,
        persisted: ActiveNodeState,
    ) -> Result<ActiveNodeState, ConfigError> {
        let old_sync = persisted.range_sync();
        let new_sync = local.total_range().intersection(&def.total_range());
        let mut state = persisted.clone().with_definition(def);

        if old_sync != new_sync {
            if old_sync.contains(&new_sync) {
                debug!(
                    node = %def.address(),
                    from = %old_sync,
                    to = %new_sync,
                    "sync range narrowed"
                );
                state = state.with_range_sync(new_sync);
            } else {
                warn!(
                    node = %def.address(),
                    from = %old_sync,
                    to = %new_sync,
                    "sync range grew, peer will be fully resynchronized"
                );
                state = state.with_range_sync(new_sync).with_synced_up_to(0);
            }
        }

        if state.differs_from(&persisted) {
            self.store.upsert(&state)?;
        }
        Ok(state)
    }
}

fn is_local_host(address: &NodeAddress, interfaces: &[IpAddr]) -> bool {
    let host = address.host().trim_start_matches('[').trim_end_matches(']');
    let candidates = match host.parse::<IpAddr>() {
        Ok(ip) => vec![ip],
        Err(_) => match address.resolve() {
            Ok(addrs) => addrs.into_iter().map(|addr| addr.ip()).collect(),
            Err(err) => {
                warn!(node = %address, "cannot resolve configured node: {err}");
                Vec::new()
            }
        },
    };
    candidates
        .iter()
        .any(|ip| ip.is_loopback() || interfaces.contains(ip))
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::{ManualClock, MemoryNodeStateStore, NodeConfig, RangeConfig},
        std::{net::Ipv4Addr, sync::Arc},
    };

    const HOUR: u64 = 60 * 60 * 1000;
    const NOW: u64 = 1_000 * HOUR;

    fn addr(n: u8) -> NodeAddress {
        NodeAddress::new(format!("10.0.0.{n}"), 7070)
    }

    fn config(nodes: &[u8]) -> ClusterConfig {
        ClusterConfig {
            keyspace_length: 360,
            copies: 2,
            listen_port: 7070,
            nodes: nodes.iter().map(|n| NodeConfig::new(addr(*n))).collect(),
            ..Default::default()
        }
    }

    fn interfaces(n: u8) -> Vec<IpAddr> {
        vec![IpAddr::V4(Ipv4Addr::new(10, 0, 0, n))]
    }

    fn bootstrapper(
        config: ClusterConfig,
        store: &Arc<MemoryNodeStateStore>,
    ) -> ClusterBootstrapper<Arc<MemoryNodeStateStore>, ManualClock> {
        ClusterBootstrapper::new(config, Arc::clone(store), ManualClock::new(NOW))
    }

    #[test]
    fn linear_definitions() {
        let store = Arc::new(MemoryNodeStateStore::new());
        let defs = bootstrapper(config(&[1, 2, 3]), &store).definitions().unwrap();
        assert_eq!(defs.len(), 3);
        assert_eq!(defs[0].index(), 1);
        assert_eq!(defs[2].active_range().start(), 240);
        assert_eq!(defs[2].active_range().length(), 240);
        assert_eq!(defs[2].total_range(), defs[2].active_range());

        let mut dup = config(&[1, 2, 1]);
        dup.copies = 1;
        assert!(matches!(
            bootstrapper(dup, &store).definitions(),
            Err(ConfigError::DuplicateNode(_))
        ));
        assert!(matches!(
            bootstrapper(config(&[]), &store).definitions(),
            Err(ConfigError::NoNodes)
        ));

        let mut explicit = config(&[1, 2]);
        explicit.nodes[0].active = Some(RangeConfig { start: 10, length: 20 });
        explicit.nodes[0].passive = Some(RangeConfig { start: 10, length: 50 });
        let defs = bootstrapper(explicit, &store).definitions().unwrap();
        assert_eq!(defs[0].total_range().length(), 50);
    }

    #[test]
    fn local_node_must_be_unique() {
        let store = Arc::new(MemoryNodeStateStore::new());
        let boot = bootstrapper(config(&[1, 2, 3]), &store);
        let defs = boot.definitions().unwrap();

        assert_eq!(boot.resolve_local(&defs, &interfaces(2)).unwrap().address(), &addr(2));
        assert!(matches!(
            boot.resolve_local(&defs, &interfaces(9)),
            Err(ConfigError::NoLocalNode { port: 7070 })
        ));

        let both = [interfaces(1), interfaces(3)].concat();
        assert!(matches!(
            boot.resolve_local(&defs, &both),
            Err(ConfigError::AmbiguousLocalNode { .. })
        ));

        // Right host, wrong port.
        let mut other_port = config(&[1, 2, 3]);
        other_port.listen_port = 8080;
        let boot = bootstrapper(other_port, &store);
        assert!(boot.resolve_local(&defs, &interfaces(1)).is_err());

        // Loopback addresses are always local.
        let mut looped = config(&[1]);
        looped.nodes.push(NodeConfig::new(NodeAddress::new("127.0.0.1", 7070)));
        let boot = bootstrapper(looped, &store);
        let defs = boot.definitions().unwrap();
        assert_eq!(boot.resolve_local(&defs, &[]).unwrap().index(), 2);
    }

    #[test]
    fn fresh_cluster_creates_peer_states() {
        let store = Arc::new(MemoryNodeStateStore::new());
        let outcome = bootstrapper(config(&[1, 2, 3]), &store)
            .bootstrap(&interfaces(1))
            .unwrap();

        assert_eq!(outcome.local.address(), &addr(1));
        assert_eq!(outcome.local.last_updated(), NOW);
        assert_eq!(outcome.peers.len(), 2);
        assert_eq!(store.len(), 2);

        // Node 1 owns [0, 240), node 2 owns [120, 360).
        let peer = &outcome.peers[&addr(2)];
        assert_eq!(peer.range_sync().start(), 120);
        assert_eq!(peer.range_sync().length(), 120);
        assert_eq!(peer.synced_up_to(), 0);
    }

    #[test]
    fn orphans_expire_after_retention() {
        let store = Arc::new(MemoryNodeStateStore::new());
        let defs = bootstrapper(config(&[1, 2, 3, 4]), &store).definitions().unwrap();
        let recent = ActiveNodeState::remote(&defs[0], &defs[2]).with_last_sync_attempt(NOW - HOUR);
        let stale =
            ActiveNodeState::remote(&defs[0], &defs[3]).with_last_sync_attempt(NOW - 25 * HOUR);
        store.upsert(&recent).unwrap();
        store.upsert(&stale).unwrap();

        let outcome = bootstrapper(config(&[1, 2]), &store)
            .bootstrap(&interfaces(1))
            .unwrap();

        assert_eq!(outcome.retained_orphans.len(), 1);
        assert_eq!(outcome.retained_orphans[0].address(), &addr(3));
        assert!(store.get(&addr(3)).unwrap().is_some());
        assert!(store.get(&addr(4)).unwrap().is_none());
        assert_eq!(outcome.peers.keys().collect::<Vec<_>>(), [&addr(2)]);
    }

    #[test]
    fn narrowed_range_keeps_progress() {
        let store = Arc::new(MemoryNodeStateStore::new());

        // Previously both nodes owned the whole ring.
        let mut wide = config(&[1, 2]);
        wide.copies = 2;
        let boot = bootstrapper(wide, &store);
        let defs = boot.definitions().unwrap();
        let persisted = ActiveNodeState::remote(&defs[0], &defs[1]).with_synced_up_to(NOW - 5);
        assert!(persisted.range_sync().is_full());
        store.upsert(&persisted).unwrap();

        // Now a third node takes over part of the ring.
        let outcome = bootstrapper(config(&[1, 2, 3]), &store)
            .bootstrap(&interfaces(1))
            .unwrap();
        let peer = &outcome.peers[&addr(2)];
        assert_eq!(peer.range_sync().length(), 120);
        assert_eq!(peer.synced_up_to(), NOW - 5);
        assert_eq!(store.get(&addr(2)).unwrap().unwrap().range_sync().length(), 120);
    }

    #[test]
    fn grown_range_resets_progress() {
        let store = Arc::new(MemoryNodeStateStore::new());

        let boot = bootstrapper(config(&[1, 2, 3]), &store);
        let defs = boot.definitions().unwrap();
        let persisted = ActiveNodeState::remote(&defs[0], &defs[1]).with_synced_up_to(NOW - 5);
        assert_eq!(persisted.range_sync().length(), 120);
        store.upsert(&persisted).unwrap();

        // Shrinking the cluster to two nodes widens what node 1 and 2 share.
        let outcome = bootstrapper(config(&[1, 2]), &store)
            .bootstrap(&interfaces(1))
            .unwrap();
        let peer = &outcome.peers[&addr(2)];
        assert!(peer.range_sync().contains(&persisted.range_sync()));
        assert!(peer.range_sync().length() > 120);
        assert_eq!(peer.synced_up_to(), 0);
    }

    #[test]
    fn unchanged_range_is_left_alone() {
        let store = Arc::new(MemoryNodeStateStore::new());
        let boot = bootstrapper(config(&[1, 2, 3]), &store);
        let defs = boot.definitions().unwrap();
        let persisted = ActiveNodeState::remote(&defs[0], &defs[1])
            .with_synced_up_to(NOW - 5)
            .with_last_sync_attempt(NOW - 1);
        store.upsert(&persisted).unwrap();

        let outcome = boot.bootstrap(&interfaces(1)).unwrap();
        let peer = &outcome.peers[&addr(2)];
        assert!(!peer.differs_from(&persisted));
        assert_eq!(outcome.keyspace.length(), 360);
    }
}

use {
    super::NodeAddress,
    crate::{KeyRange, KeyspaceResult},
    serde::{Deserialize, Serialize},
};

/// Static description of a cluster member, as configured.
///
/// The active range is what the node serves to clients, the passive range what
/// it additionally replicates and only serves as a fallback. Together they
/// form the total range the node keeps data for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeDefinition {
    address: NodeAddress,
    index: u32,
    active_range: KeyRange,
    passive_range: KeyRange,
    total_range: KeyRange,
}

impl NodeDefinition {
    /// Creates a definition; fails if the two ranges are disjoint, since no
    /// single arc would describe what the node stores.
    pub fn new(
        address: NodeAddress,
        index: u32,
        active_range: KeyRange,
        passive_range: KeyRange,
    ) -> KeyspaceResult<Self> {
        let total_range = active_range.union(&passive_range)?;
        Ok(Self {
            address,
            index,
            active_range,
            passive_range,
            total_range,
        })
    }

    pub fn address(&self) -> &NodeAddress {
        &self.address
    }

    /// 1-based position of the node in the configured ring, `0` if unknown.
    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn active_range(&self) -> KeyRange {
        self.active_range
    }

    pub fn passive_range(&self) -> KeyRange {
        self.passive_range
    }

    pub fn total_range(&self) -> KeyRange {
        self.total_range
    }
}

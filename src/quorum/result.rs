use {
    crate::{CallFailure, EntryKey, NodeAddress},
    std::fmt,
};

/// Replica candidate for one key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub address: NodeAddress,
    pub disabled: bool,
}

impl Candidate {
    pub fn enabled(address: NodeAddress) -> Self {
        Self {
            address,
            disabled: false,
        }
    }

    pub fn disabled(address: NodeAddress) -> Self {
        Self {
            address,
            disabled: true,
        }
    }
}

/// Ordered replica candidates for one key.
///
/// Order matters: operations call nodes front to back, enabled nodes before
/// disabled ones.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodesForKey {
    key: EntryKey,
    candidates: Vec<Candidate>,
}

impl NodesForKey {
    pub fn new(key: EntryKey, candidates: Vec<Candidate>) -> Self {
        Self { key, candidates }
    }

    pub fn key(&self) -> &EntryKey {
        &self.key
    }

    /// Number of candidates, enabled and disabled.
    pub fn len(&self) -> usize {
        self.candidates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }

    /// All candidates in call order.
    pub fn candidates(&self) -> &[Candidate] {
        &self.candidates
    }

    /// Enabled candidates, in order.
    pub fn enabled(&self) -> impl Iterator<Item = &NodeAddress> {
        self.candidates
            .iter()
            .filter(|c| !c.disabled)
            .map(|c| &c.address)
    }

    /// Disabled candidates, in order.
    pub fn disabled(&self) -> impl Iterator<Item = &NodeAddress> {
        self.candidates
            .iter()
            .filter(|c| c.disabled)
            .map(|c| &c.address)
    }
}

/// Outcome of one call to one replica.
#[derive(Debug, Clone, PartialEq)]
pub enum CallOutcome<T> {
    Success(T),
    /// The replica answered that it has no such entry.
    Missing,
    Failed(CallFailure),
}

/// Failure history of one node within one operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeFailure {
    address: NodeAddress,
    failures: Vec<CallFailure>,
}

impl NodeFailure {
    pub(crate) fn new(address: NodeAddress, failure: CallFailure) -> Self {
        Self {
            address,
            failures: vec![failure],
        }
    }

    pub fn address(&self) -> &NodeAddress {
        &self.address
    }

    /// All failed attempts, oldest first.
    pub fn failures(&self) -> &[CallFailure] {
        &self.failures
    }

    pub fn last(&self) -> Option<&CallFailure> {
        self.failures.last()
    }

    /// Whether the most recent attempt may be retried.
    pub fn is_retriable(&self) -> bool {
        self.last().is_some_and(CallFailure::is_retriable)
    }

    pub(crate) fn push(&mut self, failure: CallFailure) {
        self.failures.push(failure);
    }
}

/// Result of one quorum operation.
///
/// Never an error: callers decide whether the reached success tier is good
/// enough.
#[derive(Debug, Clone)]
pub struct OperationResult<T> {
    key: EntryKey,
    minimal_ok: usize,
    optimal_ok: usize,
    max_ok: usize,
    successes: Vec<NodeAddress>,
    missing: Vec<NodeAddress>,
    failures: Vec<NodeFailure>,
    value: Option<T>,
}

impl<T> OperationResult<T> {
    pub(crate) fn new(key: EntryKey, minimal_ok: usize, optimal_ok: usize, max_ok: usize) -> Self {
        Self {
            key,
            minimal_ok,
            optimal_ok,
            max_ok,
            successes: Vec::new(),
            missing: Vec::new(),
            failures: Vec::new(),
            value: None,
        }
    }

    pub fn key(&self) -> &EntryKey {
        &self.key
    }

    pub fn successes(&self) -> &[NodeAddress] {
        &self.successes
    }

    pub fn success_count(&self) -> usize {
        self.successes.len()
    }

    /// Nodes that answered they do not have the entry.
    pub fn missing(&self) -> &[NodeAddress] {
        &self.missing
    }

    pub fn failures(&self) -> &[NodeFailure] {
        &self.failures
    }

    pub fn failure(&self, address: &NodeAddress) -> Option<&NodeFailure> {
        self.failures.iter().find(|f| f.address() == address)
    }

    /// Content (GET) or length (HEAD) found on some replica.
    pub fn value(&self) -> Option<&T> {
        self.value.as_ref()
    }

    pub fn into_value(self) -> Option<T> {
        self.value
    }

    pub fn succeeded_minimally(&self) -> bool {
        self.success_count() >= self.minimal_ok
    }

    pub fn succeeded_optimally(&self) -> bool {
        self.success_count() >= self.optimal_ok
    }

    pub fn succeeded_maximally(&self) -> bool {
        self.success_count() >= self.max_ok
    }

    pub(crate) fn record_success(&mut self, address: NodeAddress, value: Option<T>) {
        if value.is_some() {
            self.value = value;
        }
        self.successes.push(address);
    }

    pub(crate) fn record_missing(&mut self, address: NodeAddress) {
        self.missing.push(address);
    }

    pub(crate) fn record_failure(&mut self, failure: CallFailure) {
        match self.failures.iter_mut().find(|f| f.address() == failure.node()) {
            Some(history) => history.push(failure),
            None => self
                .failures
                .push(NodeFailure::new(failure.node().clone(), failure)),
        }
    }
}

impl<T> fmt::Display for OperationResult<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "'{}': {} ok (min {}, opt {}, max {}), {} missing, {} failed",
            self.key,
            self.successes.len(),
            self.minimal_ok,
            self.optimal_ok,
            self.max_ok,
            self.missing.len(),
            self.failures.len()
        )
    }
}

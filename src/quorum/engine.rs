use {
    super::{CallOutcome, NodesForKey, OperationResult},
    crate::{CallFailure, EntryClient, NodeAddress, OperationConfig},
    bytes::Bytes,
    std::{future::Future, time::Duration},
    tokio::time::Instant,
    tracing::{debug, warn},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Verb {
    Put,
    Get,
    Head,
    Delete,
}

impl Verb {
    fn is_read(self) -> bool {
        matches!(self, Self::Get | Self::Head)
    }

    fn name(self) -> &'static str {
        match self {
            Self::Put => "PUT",
            Self::Get => "GET",
            Self::Head => "HEAD",
            Self::Delete => "DELETE",
        }
    }
}

/// Stage of a quorum operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    /// Every enabled node, in candidate order.
    Round1,
    /// Nodes whose first call failed retriably.
    Retry,
    /// Disabled nodes, once each.
    DisabledFallback,
    /// Further retry rounds, counting completed ones.
    ExtraRounds(usize),
    Done,
}

/// Runs PUT/GET/HEAD/DELETE against the replicas of a key.
///
/// Each operation has a total time budget; single calls get
/// `call_timeout`, clamped to what is left of it. Calls are sequential within
/// a round and rounds never overlap.
#[derive(Debug)]
pub struct QuorumEngine<C> {
    client: C,
}

impl<C: EntryClient> QuorumEngine<C> {
    pub fn new(client: C) -> Self {
        Self { client }
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    /// Stores `payload` on the replicas, stopping once `max_ok` succeeded.
    pub async fn put(
        &self,
        nodes: &NodesForKey,
        payload: Bytes,
        config: &OperationConfig,
    ) -> OperationResult<()> {
        let client = &self.client;
        let key = nodes.key();
        let call = |node: NodeAddress, timeout: Duration| {
            let payload = payload.clone();
            async move {
                match client.put(&node, key, payload, timeout).await {
                    Ok(()) => CallOutcome::Success(()),
                    Err(failure) => CallOutcome::Failed(failure),
                }
            }
        };
        self.run(Verb::Put, nodes, config, call).await
    }

    /// Fetches content from the first replica that has it.
    pub async fn get(
        &self,
        nodes: &NodesForKey,
        config: &OperationConfig,
    ) -> OperationResult<Bytes> {
        let client = &self.client;
        let key = nodes.key();
        let call = |node: NodeAddress, timeout: Duration| async move {
            match client.get(&node, key, timeout).await {
                Ok(Some(content)) => CallOutcome::Success(content),
                Ok(None) => CallOutcome::Missing,
                Err(failure) => CallOutcome::Failed(failure),
            }
        };
        self.run(Verb::Get, nodes, config, call).await
    }

    /// Fetches the content length from the first replica that has the entry.
    pub async fn head(
        &self,
        nodes: &NodesForKey,
        config: &OperationConfig,
    ) -> OperationResult<u64> {
        let client = &self.client;
        let key = nodes.key();
        let call = |node: NodeAddress, timeout: Duration| async move {
            match client.head(&node, key, timeout).await {
                Ok(Some(length)) => CallOutcome::Success(length),
                Ok(None) => CallOutcome::Missing,
                Err(failure) => CallOutcome::Failed(failure),
            }
        };
        self.run(Verb::Head, nodes, config, call).await
    }

    pub async fn delete(
        &self,
        nodes: &NodesForKey,
        config: &OperationConfig,
    ) -> OperationResult<()> {
        let client = &self.client;
        let key = nodes.key();
        let call = |node: NodeAddress, timeout: Duration| async move {
            match client.delete(&node, key, timeout).await {
                Ok(()) => CallOutcome::Success(()),
                Err(failure) => CallOutcome::Failed(failure),
            }
        };
        self.run(Verb::Delete, nodes, config, call).await
    }

    async fn run<T, F, Fut>(
        &self,
        verb: Verb,
        nodes: &NodesForKey,
        config: &OperationConfig,
        call: F,
    ) -> OperationResult<T>
    where
        F: Fn(NodeAddress, Duration) -> Fut,
        Fut: Future<Output = CallOutcome<T>>,
    {
        let mut op = Operation::new(verb, nodes, config);
        if nodes.len() < config.minimal_ok {
            warn!(
                key = %nodes.key(),
                candidates = nodes.len(),
                required = config.minimal_ok,
                "not enough replicas for {}",
                verb.name()
            );
            return op.result;
        }

        let mut phase = Phase::Round1;
        let mut round_started = Instant::now();
        while phase != Phase::Done {
            phase = match phase {
                Phase::Round1 => {
                    // Without retries there is no fallback, so disabled nodes
                    // get their chance right away.
                    let targets: Vec<_> = if config.allow_retries {
                        nodes.enabled().cloned().collect()
                    } else {
                        nodes.candidates().iter().map(|c| c.address.clone()).collect()
                    };
                    op.round(&targets, &call).await;
                    if !config.allow_retries || op.is_done() {
                        Phase::Done
                    } else {
                        Phase::Retry
                    }
                }
                Phase::Retry => {
                    if !op.retry.is_empty() {
                        op.pause(round_started).await;
                        round_started = Instant::now();
                        let targets = op.retry.clone();
                        op.round(&targets, &call).await;
                    }
                    if op.is_done() {
                        Phase::Done
                    } else {
                        Phase::DisabledFallback
                    }
                }
                Phase::DisabledFallback => {
                    let targets: Vec<_> = nodes.disabled().cloned().collect();
                    op.round(&targets, &call).await;
                    if op.is_done() {
                        Phase::Done
                    } else {
                        Phase::ExtraRounds(0)
                    }
                }
                Phase::ExtraRounds(completed) => {
                    if completed >= config.extra_retry_rounds || op.retry.is_empty() {
                        Phase::Done
                    } else {
                        op.pause(round_started).await;
                        round_started = Instant::now();
                        let targets = op.retry.clone();
                        op.round(&targets, &call).await;
                        if op.is_done() {
                            Phase::Done
                        } else {
                            Phase::ExtraRounds(completed + 1)
                        }
                    }
                }
                Phase::Done => Phase::Done,
            };
        }

        if !op.result.succeeded_minimally() && !(verb.is_read() && op.all_answered(nodes)) {
            warn!(result = %op.result, "{} below minimal success", verb.name());
        } else {
            debug!(result = %op.result, "{} finished", verb.name());
        }
        op.result
    }
}

/// Accumulated state of one operation across all phases.
struct Operation<'a, T> {
    verb: Verb,
    config: &'a OperationConfig,
    end_of_time: Instant,
    result: OperationResult<T>,
    /// Nodes whose last call failed retriably, in the order they failed.
    retry: Vec<NodeAddress>,
}

impl<'a, T> Operation<'a, T> {
    fn new(verb: Verb, nodes: &NodesForKey, config: &'a OperationConfig) -> Self {
        Self {
            verb,
            config,
            end_of_time: Instant::now() + config.operation_timeout,
            result: OperationResult::new(
                nodes.key().clone(),
                config.minimal_ok,
                config.optimal_ok,
                config.max_ok,
            ),
            retry: Vec::new(),
        }
    }

    fn remaining(&self) -> Duration {
        self.end_of_time.saturating_duration_since(Instant::now())
    }

    fn out_of_time(&self) -> bool {
        self.remaining() < self.config.min_call_timeout
    }

    /// Reads are done once content turned up, writes once the optimal
    /// number of replicas took the change.
    fn is_satisfied(&self) -> bool {
        if self.verb.is_read() {
            self.result.value().is_some() || self.result.succeeded_minimally()
        } else {
            self.result.succeeded_optimally()
        }
    }

    fn is_done(&self) -> bool {
        self.is_satisfied() || self.out_of_time()
    }

    /// Whether the round must end early.
    fn stops_round(&self) -> bool {
        if self.verb.is_read() {
            self.result.value().is_some()
        } else {
            self.result.succeeded_maximally()
        }
    }

    fn all_answered(&self, nodes: &NodesForKey) -> bool {
        self.result.missing().len() == nodes.len()
    }

    /// Waits before a retry round, but only when the previous round was
    /// quick: a fast failure hints at contention, a slow one already waited.
    async fn pause(&self, round_started: Instant) {
        let delay = self.config.retry_delay;
        if round_started.elapsed() < self.config.quick_round_threshold
            && self.remaining() >= delay * 4
        {
            tokio::time::sleep(delay).await;
        }
    }

    async fn round<F, Fut>(&mut self, targets: &[NodeAddress], call: &F)
    where
        F: Fn(NodeAddress, Duration) -> Fut,
        Fut: Future<Output = CallOutcome<T>>,
    {
        for node in targets {
            if self.out_of_time() || self.stops_round() {
                break;
            }
            let timeout = self.config.call_timeout.min(self.remaining());
            let outcome = match tokio::time::timeout(timeout, call(node.clone(), timeout)).await {
                Ok(outcome) => outcome,
                Err(_) => CallOutcome::Failed(CallFailure::read_timeout(
                    node.clone(),
                    format!("no answer within {timeout:?}"),
                )),
            };
            self.record(node, outcome);
        }
    }

    fn record(&mut self, node: &NodeAddress, outcome: CallOutcome<T>) {
        self.retry.retain(|queued| queued != node);
        match outcome {
            CallOutcome::Success(value) => self.result.record_success(node.clone(), Some(value)),
            CallOutcome::Missing => self.result.record_missing(node.clone()),
            CallOutcome::Failed(failure) => {
                debug!(
                    node = %node,
                    key = %self.result.key(),
                    "{} failed: {failure}",
                    self.verb.name()
                );
                if failure.is_retriable() && self.config.allow_retries {
                    self.retry.push(node.clone());
                }
                self.result.record_failure(failure);
            }
        }
    }
}

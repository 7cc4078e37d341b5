use {
    super::{RemoteOverwrite, pull_batch_len, remote_wins, sync_delay},
    crate::{
        ActiveNodeState,
        ClusterStates,
        EntryStore,
        NodeAddress,
        NodeStateCell,
        PullStreamReader,
        PulledEntry,
        SyncClient,
        SyncConfig,
        SyncEntry,
        SyncError,
        SyncListRequest,
        SyncPullRequest,
        SyncResult,
    },
    bytes::Buf,
    parking_lot::Mutex,
    std::{
        collections::HashSet,
        future::Future,
        sync::{
            Arc,
            atomic::{AtomicU64, Ordering},
        },
        time::Duration,
    },
    tokio::{sync::watch, task::JoinHandle},
    tracing::{debug, info, warn},
};

/// Snapshot of a sync engine, for status reporting.
#[derive(Debug, Clone)]
pub struct PeerStatus {
    pub address: NodeAddress,
    pub running: bool,
    /// Failed passes since start.
    pub failures: u64,
    pub last_error: Option<String>,
    pub state: Arc<ActiveNodeState>,
}

/// Result of one pass over a peer's change list.
struct Pass {
    listed: usize,
    /// List size limit the peer applied.
    max_entries: usize,
    synced_up_to: u64,
    client_wait: Duration,
    gave_up: bool,
}

/// Background synchronization with one peer.
///
/// When the local and peer ranges overlap, the engine repeatedly fetches the
/// peer's change list, applies tombstones, pulls missing or losing entries and
/// advances the peer's `synced_up_to` watermark. Otherwise it only exchanges
/// cluster status now and then.
pub struct ClusterPeer {
    address: NodeAddress,
    cell: Arc<NodeStateCell>,
    cluster: Arc<ClusterStates>,
    client: Arc<dyn SyncClient>,
    entries: Arc<dyn EntryStore>,
    config: SyncConfig,
    shutdown: watch::Sender<bool>,
    task: Mutex<Option<JoinHandle<()>>>,
    failures: AtomicU64,
    last_error: Mutex<Option<String>>,
}

impl ClusterPeer {
    pub(crate) fn new(
        address: NodeAddress,
        cell: Arc<NodeStateCell>,
        cluster: Arc<ClusterStates>,
        client: Arc<dyn SyncClient>,
        entries: Arc<dyn EntryStore>,
        config: SyncConfig,
    ) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            address,
            cell,
            cluster,
            client,
            entries,
            config,
            shutdown,
            task: Mutex::new(None),
            failures: AtomicU64::new(0),
            last_error: Mutex::new(None),
        }
    }

    pub fn address(&self) -> &NodeAddress {
        &self.address
    }

    pub fn state(&self) -> Arc<ActiveNodeState> {
        self.cell.load()
    }

    pub fn is_running(&self) -> bool {
        self.task
            .lock()
            .as_ref()
            .is_some_and(|task| !task.is_finished())
    }

    pub fn status(&self) -> PeerStatus {
        PeerStatus {
            address: self.address.clone(),
            running: self.is_running(),
            failures: self.failures.load(Ordering::Relaxed),
            last_error: self.last_error.lock().clone(),
            state: self.cell.load(),
        }
    }

    /// Spawns the sync task. Calling it again, or after [`stop()`](Self::stop),
    /// does nothing.
    pub fn start(self: &Arc<Self>) {
        let mut task = self.task.lock();
        if task.is_some() || *self.shutdown.borrow() {
            return;
        }
        let shutdown = self.shutdown.subscribe();
        *task = Some(tokio::spawn(Arc::clone(self).run(shutdown)));
    }

    /// Stops the sync task and waits for it to exit. Safe to call before
    /// [`start()`](Self::start) and more than once.
    pub async fn stop(&self) {
        self.shutdown.send_replace(true);
        let task = self.task.lock().take();
        if let Some(task) = task {
            if let Err(err) = task.await {
                warn!(peer = %self.address, "sync task panicked: {err}");
            }
        }
    }

    async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        info!(peer = %self.address, "peer sync started");
        loop {
            if *shutdown.borrow() {
                break;
            }
            let delay = match self.sync_pass(&mut shutdown).await {
                Ok(delay) => delay,
                Err(SyncError::Shutdown) => break,
                Err(err) => {
                    self.record_failure(&err);
                    self.record_attempt();
                    self.config.failure_cooldown
                }
            };
            if !pause(&mut shutdown, delay).await {
                break;
            }
        }
        self.notify_inactive().await;
        info!(peer = %self.address, "peer sync stopped");
    }

    /// Runs one pass and returns the pause before the next one.
    async fn sync_pass(&self, shutdown: &mut watch::Receiver<bool>) -> SyncResult<Duration> {
        let state = self.cell.load();
        let local = self.cluster.local();
        if !local.total_range().overlaps_with(&state.total_range()) {
            return self.heartbeat(shutdown).await;
        }

        let pass = self.pull_changes(&state, &local, shutdown).await?;
        let now = self.cluster.now();
        let (_, next) = self.cell.update(|current| {
            let current = current.with_last_sync_attempt(now);
            // A status merge may have moved the range mid-pass; progress
            // against the old range says nothing about the new one.
            if current.range_sync() == state.range_sync() {
                let synced_up_to = current.synced_up_to().max(pass.synced_up_to);
                current.with_synced_up_to(synced_up_to)
            } else {
                current
            }
        });
        self.cluster.persist(&next)?;

        if pass.gave_up {
            let err = SyncError::InvalidResponse(
                self.address.clone(),
                "too many incomplete pull rounds".into(),
            );
            self.record_failure(&err);
            return Ok(self.config.failure_cooldown);
        }

        let lag = Duration::from_millis(now.saturating_sub(next.synced_up_to()));
        Ok(sync_delay(pass.listed, pass.max_entries, lag, pass.client_wait, &self.config))
    }

    /// Exchange with a peer sharing no part of the ring: status only.
    async fn heartbeat(&self, shutdown: &mut watch::Receiver<bool>) -> SyncResult<Duration> {
        let timeout = self.config.status_timeout;
        let status = self
            .call(shutdown, timeout, self.client.fetch_status(&self.address, timeout))
            .await?;
        let merged = self.cluster.merge_status(&status);
        debug!(peer = %self.address, merged, "heartbeat");
        self.record_attempt();
        Ok(self.config.minimal_sync_interval)
    }

    async fn pull_changes(
        &self,
        state: &ActiveNodeState,
        local: &ActiveNodeState,
        shutdown: &mut watch::Receiver<bool>,
    ) -> SyncResult<Pass> {
        let request = SyncListRequest {
            caller: local.address().clone(),
            since: state.synced_up_to(),
            range: state.range_sync(),
            cluster_hash: self.cluster.status_hash(),
            max_entries: self.config.max_list_entries,
        };
        let timeout = self.config.list_timeout;
        let response = self
            .call(shutdown, timeout, self.client.sync_list(&self.address, &request, timeout))
            .await?;

        match &response.cluster_status {
            Some(status) => {
                self.cluster.merge_status(status);
            }
            None if response.cluster_hash != request.cluster_hash => {
                warn!(peer = %self.address, "cluster views differ, but peer sent no status");
            }
            None => {}
        }

        // Deletions win over whatever is stored locally.
        let mut deleted = 0;
        for entry in response.entries.iter().filter(|entry| entry.deleted) {
            self.entries.soft_delete(&entry.key, entry.inserted_at)?;
            deleted += 1;
        }

        let mut missing = Vec::new();
        for entry in response.entries.iter().filter(|entry| !entry.deleted) {
            let wanted = match self.entries.find_entry(&entry.key)? {
                None => true,
                Some(existing) => {
                    !existing.deleted
                        && remote_wins(
                            existing.inserted_at,
                            existing.content_hash,
                            entry.inserted_at,
                            entry.content_hash,
                        )
                }
            };
            if wanted {
                missing.push(entry.clone());
            }
        }

        debug!(
            peer = %self.address,
            since = request.since,
            listed = response.entries.len(),
            deleted,
            missing = missing.len(),
            "fetched change list"
        );

        let wanted = missing.len();
        let (still_missing, gave_up) = self.pull(local.address(), missing, shutdown).await?;
        if wanted > 0 {
            debug!(peer = %self.address, pulled = wanted - still_missing.len(), "pulled entries");
        }

        // Everything before the first entry still missing is in place.
        let synced_up_to = match still_missing.iter().map(|entry| entry.inserted_at).min() {
            None => response.last_seen,
            Some(earliest) => earliest,
        };

        Ok(Pass {
            listed: response.entries.len(),
            max_entries: response.max_entries,
            synced_up_to: synced_up_to.max(state.synced_up_to()),
            client_wait: response.client_wait,
            gave_up,
        })
    }

    /// Pulls `pending` in size-bounded rounds. Returns the entries that could
    /// not be fetched and whether the failure budget ran out.
    async fn pull(
        &self,
        caller: &NodeAddress,
        mut pending: Vec<SyncEntry>,
        shutdown: &mut watch::Receiver<bool>,
    ) -> SyncResult<(Vec<SyncEntry>, bool)> {
        let mut rounds = 0;
        let mut incomplete = 0;
        while !pending.is_empty() && rounds < self.config.max_pull_rounds {
            rounds += 1;
            let len = pull_batch_len(
                &pending,
                self.config.max_pull_entries,
                self.config.max_pull_bytes,
            );
            let request = SyncPullRequest {
                caller: caller.clone(),
                keys: pending[..len].iter().map(|entry| entry.key.clone()).collect(),
            };
            let timeout = self.config.pull_timeout;
            let stream = self
                .call(shutdown, timeout, self.client.sync_pull(&self.address, &request, timeout))
                .await?;

            let mut fetched = HashSet::new();
            for pulled in PullStreamReader::new(stream) {
                let pulled = pulled?;
                self.apply(&pulled)?;
                fetched.insert(pulled.header.key);
            }

            let received = request.keys.iter().filter(|key| fetched.contains(*key)).count();
            pending.retain(|entry| !fetched.contains(&entry.key));
            if received < request.keys.len() {
                incomplete += 1;
                debug!(
                    peer = %self.address,
                    requested = request.keys.len(),
                    received,
                    "incomplete pull round"
                );
                if incomplete > self.config.pull_failure_budget {
                    warn!(peer = %self.address, pending = pending.len(), "giving up on pull");
                    return Ok((pending, true));
                }
            }
        }
        Ok((pending, false))
    }

    /// Stores one pulled entry, never materializing deleted ones.
    fn apply(&self, pulled: &PulledEntry) -> SyncResult<()> {
        let header = &pulled.header;
        if header.deleted {
            let outcome = self.entries.soft_delete(&header.key, header.inserted_at)?;
            debug!(peer = %self.address, key = %header.key, ?outcome, "applied pulled tombstone");
            return Ok(());
        }

        let metadata = header.metadata();
        let outcome = if header.size <= self.config.inline_threshold {
            self.entries
                .upsert(metadata, pulled.payload.clone(), &RemoteOverwrite)?
        } else {
            let mut source = pulled.payload.clone().reader();
            self.entries.upsert_streaming(
                metadata,
                &mut source,
                self.config.max_entry_size,
                &RemoteOverwrite,
            )?
        };
        debug!(peer = %self.address, key = %header.key, ?outcome, "applied pulled entry");
        Ok(())
    }

    /// Awaits a peer call, bounded by `timeout` and interrupted by shutdown.
    async fn call<T>(
        &self,
        shutdown: &mut watch::Receiver<bool>,
        timeout: Duration,
        call: impl Future<Output = SyncResult<T>>,
    ) -> SyncResult<T> {
        tokio::select! {
            biased;
            _ = shutdown.wait_for(|stop| *stop) => Err(SyncError::Shutdown),
            result = tokio::time::timeout(timeout, call) => {
                result.unwrap_or_else(|_| Err(SyncError::Timeout(self.address.clone())))
            }
        }
    }

    fn record_failure(&self, err: &SyncError) {
        let failures = self.failures.fetch_add(1, Ordering::Relaxed) + 1;
        warn!(peer = %self.address, failures, "sync pass failed: {err}");
        *self.last_error.lock() = Some(err.to_string());
    }

    fn record_attempt(&self) {
        let now = self.cluster.now();
        let (_, next) = self.cell.update(|state| state.with_last_sync_attempt(now));
        if let Err(err) = self.cluster.persist(&next) {
            warn!(peer = %self.address, "failed to persist peer state: {err}");
        }
    }

    /// Best-effort goodbye, so the peer stops counting on this node.
    async fn notify_inactive(&self) {
        if self.config.test_mode || self.cell.load().is_disabled() {
            return;
        }
        let local = self.cluster.local();
        let timeout = self.config.inactive_notify_timeout;
        let notified = tokio::time::timeout(
            timeout,
            self.client.notify_inactive(&self.address, local.address(), timeout),
        )
        .await;
        match notified {
            Ok(Ok(())) => debug!(peer = %self.address, "notified peer of shutdown"),
            Ok(Err(err)) => debug!(peer = %self.address, "shutdown notification failed: {err}"),
            Err(_) => debug!(peer = %self.address, "shutdown notification timed out"),
        }
    }
}

/// Sleeps for `delay` unless shut down first; `false` on shutdown.
async fn pause(shutdown: &mut watch::Receiver<bool>, delay: Duration) -> bool {
    if delay.is_zero() {
        tokio::task::yield_now().await;
        return !*shutdown.borrow();
    }
    tokio::select! {
        biased;
        _ = shutdown.wait_for(|stop| *stop) => false,
        _ = tokio::time::sleep(delay) => true,
    }
}

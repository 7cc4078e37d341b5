use {
    crate::{
        ClusterStates,
        EntryStore,
        PullStreamWriter,
        ScanControl,
        StoreError,
        SyncConfig,
        SyncEntry,
        SyncListRequest,
        SyncListResponse,
        SyncPullRequest,
        SyncResult,
    },
    bytes::Bytes,
    std::{sync::Arc, time::Duration},
    tracing::debug,
};

/// Serving side of peer synchronization: answers change-list and pull
/// requests from the local entry store.
pub struct SyncListSource {
    cluster: Arc<ClusterStates>,
    entries: Arc<dyn EntryStore>,
    list_grace: Duration,
    max_entries: usize,
    client_wait: Duration,
}

impl SyncListSource {
    pub fn new(
        cluster: Arc<ClusterStates>,
        entries: Arc<dyn EntryStore>,
        config: &SyncConfig,
    ) -> Self {
        Self {
            cluster,
            entries,
            list_grace: config.list_grace,
            max_entries: config.max_list_entries,
            client_wait: Duration::ZERO,
        }
    }

    /// Wait suggested to callers in every response.
    pub fn with_client_wait(mut self, client_wait: Duration) -> Self {
        self.client_wait = client_wait;
        self
    }

    /// Entries of the requested range inserted at or after `since`.
    ///
    /// The most recent `list_grace` is held back: writes still in flight may
    /// land with slightly older timestamps, and listing past them would let
    /// the caller's watermark skip them.
    ///
    /// At most `max_entries` entries are listed (the smaller of the caller's
    /// and the local limit), except that entries sharing an insertion time
    /// are never split across lists: `since` is inclusive, so a split group
    /// would be listed again from its start forever.
    pub fn list(&self, request: &SyncListRequest) -> Result<SyncListResponse, StoreError> {
        let keyspace = self.cluster.keyspace();
        let upper = self
            .cluster
            .now()
            .saturating_sub(self.list_grace.as_millis() as u64)
            .max(request.since);

        let mut listed = Vec::new();
        self.entries.scan_prefix("", &mut |meta| {
            if meta.inserted_at >= request.since
                && meta.inserted_at < upper
                && request.range.contains_position(keyspace.position(&meta.key))
            {
                listed.push(SyncEntry::from(meta));
            }
            ScanControl::Continue
        })?;
        listed.sort_by(|a, b| {
            a.inserted_at
                .cmp(&b.inserted_at)
                .then_with(|| a.key.cmp(&b.key))
        });

        let max_entries = request.max_entries.min(self.max_entries).max(1);
        let last_seen = if listed.len() > max_entries {
            let cut = listed[max_entries - 1].inserted_at;
            listed.retain(|entry| entry.inserted_at <= cut);
            cut + 1
        } else {
            upper
        };

        let cluster_hash = self.cluster.status_hash();
        let cluster_status = (request.cluster_hash != cluster_hash).then(|| self.cluster.status());
        debug!(
            caller = %request.caller,
            since = request.since,
            listed = listed.len(),
            last_seen,
            with_status = cluster_status.is_some(),
            "serving change list"
        );

        Ok(SyncListResponse {
            entries: listed,
            last_seen,
            max_entries,
            cluster_hash,
            cluster_status,
            client_wait: self.client_wait,
        })
    }

    /// Pull stream with the requested entries that still exist locally.
    pub fn pull(&self, request: &SyncPullRequest) -> SyncResult<Bytes> {
        let mut writer = PullStreamWriter::new();
        for key in &request.keys {
            let Some(meta) = self.entries.find_entry(key)? else {
                continue;
            };
            if meta.deleted {
                writer.push_deleted(&meta)?;
            } else if let Some(payload) = self.entries.read_payload(key)? {
                writer.push(&meta, &payload)?;
            }
        }
        Ok(writer.finish())
    }
}

//! Peer-to-peer synchronization messages.
//!
//! A sync-list exchange tells the caller which entries changed on the peer; a
//! sync-pull exchange then streams the missing entries as a sequence of
//! length-prefixed JSON headers, each followed by the raw payload, terminated
//! by a sentinel header length.

use {
    crate::{
        ActiveNodeState,
        CodecError,
        Compression,
        EntryKey,
        EntryMetadata,
        KeyRange,
        NodeAddress,
        hash::DefaultHasher,
    },
    bytes::{Buf, BufMut, Bytes, BytesMut},
    rapidhash::v3::rapidhash_v3,
    serde::{Deserialize, Serialize},
    std::{
        hash::{BuildHasher, BuildHasherDefault},
        time::Duration,
    },
};

/// Header length marking the end of a pull stream.
pub const END_OF_STREAM: u32 = u32::MAX;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncListRequest {
    pub caller: NodeAddress,

    /// Inclusive lower bound on insertion time.
    pub since: u64,

    /// Part of the ring the caller is interested in.
    pub range: KeyRange,

    /// Hash of the caller's cluster view; the peer only sends its full status
    /// when its own hash differs.
    pub cluster_hash: u64,

    pub max_entries: usize,
}

/// One changed entry in a change list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncEntry {
    pub key: EntryKey,
    pub inserted_at: u64,
    pub content_hash: u32,
    pub size: u64,
    #[serde(default)]
    pub deleted: bool,
}

impl From<&EntryMetadata> for SyncEntry {
    fn from(meta: &EntryMetadata) -> Self {
        Self {
            key: meta.key.clone(),
            inserted_at: meta.inserted_at,
            content_hash: meta.content_hash,
            size: meta.size,
            deleted: meta.deleted,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncListResponse {
    /// Changed entries, ordered by insertion time.
    pub entries: Vec<SyncEntry>,

    /// Everything up to this time (exclusive) has been listed.
    pub last_seen: u64,

    /// List size limit the peer applied: the smaller of the caller's request
    /// and the peer's own configured maximum.
    pub max_entries: usize,

    pub cluster_hash: u64,

    /// Present only when the caller's cluster hash was stale.
    #[serde(default)]
    pub cluster_status: Option<ClusterStatus>,

    /// How long the peer would like the caller to wait before asking again.
    #[serde(default, with = "humantime_serde")]
    pub client_wait: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncPullRequest {
    pub caller: NodeAddress,
    pub keys: Vec<EntryKey>,
}

/// Snapshot of a node's view of the cluster.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterStatus {
    pub local: ActiveNodeState,
    pub remote: Vec<ActiveNodeState>,
    pub creation_time: u64,
}

impl ClusterStatus {
    /// Hash of the cluster topology described by the snapshot.
    ///
    /// Independent of which node produced the snapshot and of when states were
    /// observed: only addresses, indexes, ranges and disabled flags take part,
    /// in address order.
    pub fn topology_hash(&self) -> u64 {
        topology_hash(std::iter::once(&self.local).chain(self.remote.iter()))
    }
}

/// Hash of the topology of a set of node states, see
/// [`ClusterStatus::topology_hash()`].
pub fn topology_hash<'a, I>(states: I) -> u64
where
    I: IntoIterator<Item = &'a ActiveNodeState>,
{
    let mut nodes: Vec<_> = states
        .into_iter()
        .map(|s| {
            (
                s.address().to_string(),
                s.index(),
                s.active_range(),
                s.passive_range(),
                s.is_disabled(),
            )
        })
        .collect();
    nodes.sort_by(|a, b| a.0.cmp(&b.0));
    BuildHasherDefault::<DefaultHasher>::default().hash_one(&nodes)
}

/// Header preceding each entry of a pull stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullHeader {
    pub key: EntryKey,
    pub inserted_at: u64,
    pub content_hash: u32,
    pub size: u64,
    #[serde(default)]
    pub compression: Compression,
    pub checksum: u32,
    #[serde(default)]
    pub deleted: bool,
}

impl PullHeader {
    pub fn metadata(&self) -> EntryMetadata {
        EntryMetadata {
            key: self.key.clone(),
            inserted_at: self.inserted_at,
            content_hash: self.content_hash,
            size: self.size,
            compression: self.compression,
            deleted: self.deleted,
        }
    }
}

/// Entry decoded from a pull stream.
#[derive(Debug, Clone, PartialEq)]
pub struct PulledEntry {
    pub header: PullHeader,
    /// Empty for deleted entries.
    pub payload: Bytes,
}

/// Checksum carried in pull headers: low 32 bits of the payload's rapidhash.
pub fn payload_checksum(payload: &[u8]) -> u32 {
    rapidhash_v3(payload) as u32
}

/// Encodes a pull stream.
#[derive(Debug, Default)]
pub struct PullStreamWriter {
    buf: BytesMut,
}

impl PullStreamWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a live entry with its payload.
    pub fn push(&mut self, meta: &EntryMetadata, payload: &[u8]) -> Result<(), CodecError> {
        let header = PullHeader {
            key: meta.key.clone(),
            inserted_at: meta.inserted_at,
            content_hash: meta.content_hash,
            size: payload.len() as u64,
            compression: meta.compression,
            checksum: payload_checksum(payload),
            deleted: false,
        };
        self.push_header(&header)?;
        self.buf.put_slice(payload);
        Ok(())
    }

    /// Appends a tombstone; no payload follows its header.
    pub fn push_deleted(&mut self, meta: &EntryMetadata) -> Result<(), CodecError> {
        let header = PullHeader {
            key: meta.key.clone(),
            inserted_at: meta.inserted_at,
            content_hash: meta.content_hash,
            size: 0,
            compression: meta.compression,
            checksum: 0,
            deleted: true,
        };
        self.push_header(&header)
    }

    fn push_header(&mut self, header: &PullHeader) -> Result<(), CodecError> {
        let encoded = serde_json::to_vec(header)?;
        self.buf.put_u32(encoded.len() as u32);
        self.buf.put_slice(&encoded);
        Ok(())
    }

    /// Terminates the stream.
    pub fn finish(mut self) -> Bytes {
        self.buf.put_u32(END_OF_STREAM);
        self.buf.freeze()
    }
}

/// Decodes a pull stream, verifying payload checksums.
///
/// Yields an error (and then stops) on truncated input, malformed headers,
/// checksum mismatches or a missing end-of-stream sentinel.
#[derive(Debug)]
pub struct PullStreamReader {
    buf: Bytes,
    done: bool,
}

impl PullStreamReader {
    pub fn new(buf: Bytes) -> Self {
        Self { buf, done: false }
    }

    fn take(&mut self, needed: usize) -> Result<Bytes, CodecError> {
        if self.buf.remaining() < needed {
            return Err(CodecError::Truncated {
                needed,
                available: self.buf.remaining(),
            });
        }
        Ok(self.buf.split_to(needed))
    }

    fn next_entry(&mut self) -> Result<Option<PulledEntry>, CodecError> {
        if self.buf.is_empty() {
            return Err(CodecError::MissingSentinel);
        }
        let header_len = self.take(4)?.get_u32();
        if header_len == END_OF_STREAM {
            return Ok(None);
        }
        let header: PullHeader = serde_json::from_slice(&self.take(header_len as usize)?)?;
        if header.deleted {
            return Ok(Some(PulledEntry {
                header,
                payload: Bytes::new(),
            }));
        }

        let payload = self.take(header.size as usize)?;
        let actual = payload_checksum(&payload);
        if actual != header.checksum {
            return Err(CodecError::ChecksumMismatch {
                key: header.key.to_string(),
                expected: header.checksum,
                actual,
            });
        }
        Ok(Some(PulledEntry { header, payload }))
    }
}

impl Iterator for PullStreamReader {
    type Item = Result<PulledEntry, CodecError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.next_entry() {
            Ok(Some(entry)) => Some(Ok(entry)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(err) => {
                self.done = true;
                Some(Err(err))
            }
        }
    }
}

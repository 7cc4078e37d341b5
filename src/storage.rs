mod memory;

use {
    crate::{ActiveNodeState, NodeAddress, StoreError},
    auto_impl::auto_impl,
    bytes::Bytes,
    serde::{Deserialize, Serialize},
    std::{fmt, io::Read},
};

pub use memory::{MemoryEntryStore, MemoryNodeStateStore};

/// Key of a stored entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntryKey(String);

impl EntryKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl AsRef<[u8]> for EntryKey {
    fn as_ref(&self) -> &[u8] {
        self.0.as_bytes()
    }
}

impl fmt::Display for EntryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for EntryKey {
    fn from(key: &str) -> Self {
        Self::new(key)
    }
}

/// Compression applied to a stored payload; payloads are replicated as-is.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Compression {
    #[default]
    None,
    Gzip,
    Lzf,
}

/// Everything about an entry except its payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryMetadata {
    pub key: EntryKey,

    /// Insertion (or, for tombstones, deletion) time in milliseconds.
    pub inserted_at: u64,

    /// Hash of the uncompressed content, used for conflict resolution.
    pub content_hash: u32,

    /// Payload size as stored.
    pub size: u64,

    #[serde(default)]
    pub compression: Compression,

    #[serde(default)]
    pub deleted: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted,
    Overwritten,
    /// The overwrite predicate rejected the new entry.
    Kept,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    Deleted,
    AlreadyDeleted,
    NotFound,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanControl {
    Continue,
    Stop,
}

/// Predicate guarding conditional upserts: may `existing` be replaced by
/// `incoming`?
pub trait OverwriteChecker: Send + Sync {
    fn may_overwrite(
        &self,
        key: &EntryKey,
        existing: &EntryMetadata,
        incoming: &EntryMetadata,
    ) -> bool;
}

impl<F> OverwriteChecker for F
where
    F: Fn(&EntryKey, &EntryMetadata, &EntryMetadata) -> bool + Send + Sync,
{
    fn may_overwrite(
        &self,
        key: &EntryKey,
        existing: &EntryMetadata,
        incoming: &EntryMetadata,
    ) -> bool {
        self(key, existing, incoming)
    }
}

/// Local storage engine.
///
/// Implementations provide their own per-key concurrency control; callers
/// layer conflict resolution on top through the overwrite predicate.
#[auto_impl(&, Arc)]
pub trait EntryStore: Send + Sync {
    /// Point lookup, tombstones included.
    fn find_entry(&self, key: &EntryKey) -> Result<Option<EntryMetadata>, StoreError>;

    /// Payload of a live entry.
    fn read_payload(&self, key: &EntryKey) -> Result<Option<Bytes>, StoreError>;

    /// Marks an entry deleted, stamping the tombstone with `deleted_at`.
    fn soft_delete(&self, key: &EntryKey, deleted_at: u64) -> Result<DeleteOutcome, StoreError>;

    /// Inserts the entry, or replaces an existing one if `checker` allows.
    fn upsert(
        &self,
        metadata: EntryMetadata,
        payload: Bytes,
        checker: &dyn OverwriteChecker,
    ) -> Result<UpsertOutcome, StoreError>;

    /// Like [`upsert()`](Self::upsert), reading at most `max_length` payload
    /// bytes from `source`.
    fn upsert_streaming(
        &self,
        metadata: EntryMetadata,
        source: &mut dyn Read,
        max_length: u64,
        checker: &dyn OverwriteChecker,
    ) -> Result<UpsertOutcome, StoreError>;

    /// Visits entries whose key starts with `prefix`, in key order.
    fn scan_prefix(
        &self,
        prefix: &str,
        visitor: &mut dyn FnMut(&EntryMetadata) -> ScanControl,
    ) -> Result<(), StoreError>;
}

/// Durable record of peer states, scoped to one keyspace.
#[auto_impl(&, Arc)]
pub trait NodeStateStore: Send + Sync {
    fn upsert(&self, state: &ActiveNodeState) -> Result<(), StoreError>;

    fn delete(&self, address: &NodeAddress) -> Result<(), StoreError>;

    fn read_all(&self) -> Result<Vec<ActiveNodeState>, StoreError>;
}

use {
    super::{
        DeleteOutcome,
        EntryKey,
        EntryMetadata,
        EntryStore,
        NodeStateStore,
        OverwriteChecker,
        ScanControl,
        UpsertOutcome,
    },
    crate::{ActiveNodeState, NodeAddress, StoreError},
    bytes::Bytes,
    parking_lot::RwLock,
    std::{collections::BTreeMap, io::Read},
};

/// In-memory entry store.
///
/// Suitable for tests and embedding; nothing survives the process.
#[derive(Debug, Default)]
pub struct MemoryEntryStore {
    entries: RwLock<BTreeMap<EntryKey, (EntryMetadata, Bytes)>>,
}

impl MemoryEntryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored entries, tombstones included.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

impl EntryStore for MemoryEntryStore {
    fn find_entry(&self, key: &EntryKey) -> Result<Option<EntryMetadata>, StoreError> {
        Ok(self.entries.read().get(key).map(|(meta, _)| meta.clone()))
    }

    fn read_payload(&self, key: &EntryKey) -> Result<Option<Bytes>, StoreError> {
        Ok(self
            .entries
            .read()
            .get(key)
            .filter(|(meta, _)| !meta.deleted)
            .map(|(_, payload)| payload.clone()))
    }

    fn soft_delete(&self, key: &EntryKey, deleted_at: u64) -> Result<DeleteOutcome, StoreError> {
        let mut entries = self.entries.write();
        let Some((meta, payload)) = entries.get_mut(key) else {
            return Ok(DeleteOutcome::NotFound);
        };
        if meta.deleted {
            return Ok(DeleteOutcome::AlreadyDeleted);
        }
        meta.deleted = true;
        meta.inserted_at = meta.inserted_at.max(deleted_at);
        *payload = Bytes::new();
        Ok(DeleteOutcome::Deleted)
    }

    fn upsert(
        &self,
        metadata: EntryMetadata,
        payload: Bytes,
        checker: &dyn OverwriteChecker,
    ) -> Result<UpsertOutcome, StoreError> {
        let mut entries = self.entries.write();
        let outcome = match entries.get(&metadata.key) {
            None => UpsertOutcome::Inserted,
            Some((existing, _)) if checker.may_overwrite(&metadata.key, existing, &metadata) => {
                UpsertOutcome::Overwritten
            }
            Some(_) => return Ok(UpsertOutcome::Kept),
        };
        entries.insert(metadata.key.clone(), (metadata, payload));
        Ok(outcome)
    }

    fn upsert_streaming(
        &self,
        metadata: EntryMetadata,
        source: &mut dyn Read,
        max_length: u64,
        checker: &dyn OverwriteChecker,
    ) -> Result<UpsertOutcome, StoreError> {
        let mut buf = Vec::with_capacity(metadata.size.min(max_length) as usize);
        source.take(max_length + 1).read_to_end(&mut buf)?;
        if buf.len() as u64 > max_length {
            return Err(StoreError::PayloadTooLarge {
                key: metadata.key.to_string(),
                limit: max_length,
            });
        }
        if buf.len() as u64 != metadata.size {
            return Err(StoreError::Corrupt(format!(
                "'{}' declared {} bytes, read {}",
                metadata.key,
                metadata.size,
                buf.len()
            )));
        }
        self.upsert(metadata, Bytes::from(buf), checker)
    }

    fn scan_prefix(
        &self,
        prefix: &str,
        visitor: &mut dyn FnMut(&EntryMetadata) -> ScanControl,
    ) -> Result<(), StoreError> {
        let entries = self.entries.read();
        let matching = entries
            .range(EntryKey::new(prefix)..)
            .take_while(|(key, _)| key.as_str().starts_with(prefix));
        for (_, (meta, _)) in matching {
            if visitor(meta) == ScanControl::Stop {
                break;
            }
        }
        Ok(())
    }
}

/// In-memory node state store.
///
/// Records are kept JSON-encoded, the way a durable store would keep them, so
/// encoding problems show up here too.
#[derive(Debug, Default)]
pub struct MemoryNodeStateStore {
    records: RwLock<BTreeMap<NodeAddress, Vec<u8>>>,
}

impl MemoryNodeStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, address: &NodeAddress) -> Result<Option<ActiveNodeState>, StoreError> {
        self.records
            .read()
            .get(address)
            .map(|raw| decode(raw))
            .transpose()
    }

    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }
}

fn decode(raw: &[u8]) -> Result<ActiveNodeState, StoreError> {
    serde_json::from_slice(raw).map_err(|err| StoreError::Corrupt(err.to_string()))
}

impl NodeStateStore for MemoryNodeStateStore {
    fn upsert(&self, state: &ActiveNodeState) -> Result<(), StoreError> {
        let raw = serde_json::to_vec(state).map_err(|err| StoreError::Other(err.to_string()))?;
        self.records.write().insert(state.address().clone(), raw);
        Ok(())
    }

    fn delete(&self, address: &NodeAddress) -> Result<(), StoreError> {
        self.records.write().remove(address);
        Ok(())
    }

    fn read_all(&self) -> Result<Vec<ActiveNodeState>, StoreError> {
        self.records.read().values().map(|raw| decode(raw)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta(key: &str, inserted_at: u64, size: u64) -> EntryMetadata {
        EntryMetadata {
            key: EntryKey::new(key),
            inserted_at,
            content_hash: 7,
            size,
            compression: Default::default(),
            deleted: false,
        }
    }

    #[test]
    fn conditional_upsert() {
        let store = MemoryEntryStore::new();
        let newer_wins = |_: &EntryKey, old: &EntryMetadata, new: &EntryMetadata| {
            new.inserted_at > old.inserted_at
        };

        let outcome = store
            .upsert(meta("a", 10, 3), Bytes::from_static(b"abc"), &newer_wins)
            .unwrap();
        assert_eq!(outcome, UpsertOutcome::Inserted);

        let outcome = store
            .upsert(meta("a", 5, 3), Bytes::from_static(b"old"), &newer_wins)
            .unwrap();
        assert_eq!(outcome, UpsertOutcome::Kept);
        assert_eq!(store.read_payload(&"a".into()).unwrap().unwrap(), "abc");

        let outcome = store
            .upsert(meta("a", 20, 3), Bytes::from_static(b"new"), &newer_wins)
            .unwrap();
        assert_eq!(outcome, UpsertOutcome::Overwritten);
        assert_eq!(store.read_payload(&"a".into()).unwrap().unwrap(), "new");
    }

    #[test]
    fn streaming_upsert_is_bounded() {
        let store = MemoryEntryStore::new();
        let always = |_: &EntryKey, _: &EntryMetadata, _: &EntryMetadata| true;

        let mut source: &[u8] = b"0123456789";
        let err = store
            .upsert_streaming(meta("big", 1, 10), &mut source, 8, &always)
            .unwrap_err();
        assert!(matches!(err, StoreError::PayloadTooLarge { limit: 8, .. }));

        let mut source: &[u8] = b"0123456789";
        let outcome = store
            .upsert_streaming(meta("big", 1, 10), &mut source, 64, &always)
            .unwrap();
        assert_eq!(outcome, UpsertOutcome::Inserted);
        assert_eq!(store.find_entry(&"big".into()).unwrap().unwrap().size, 10);
    }

    #[test]
    fn soft_delete_leaves_tombstone() {
        let store = MemoryEntryStore::new();
        let always = |_: &EntryKey, _: &EntryMetadata, _: &EntryMetadata| true;
        store
            .upsert(meta("a", 10, 1), Bytes::from_static(b"x"), &always)
            .unwrap();

        assert_eq!(store.soft_delete(&"a".into(), 50).unwrap(), DeleteOutcome::Deleted);
        assert_eq!(
            store.soft_delete(&"a".into(), 60).unwrap(),
            DeleteOutcome::AlreadyDeleted
        );
        assert_eq!(store.soft_delete(&"b".into(), 60).unwrap(), DeleteOutcome::NotFound);

        let tombstone = store.find_entry(&"a".into()).unwrap().unwrap();
        assert!(tombstone.deleted);
        assert_eq!(tombstone.inserted_at, 50);
        assert!(store.read_payload(&"a".into()).unwrap().is_none());
    }

    #[test]
    fn prefix_scan() {
        let store = MemoryEntryStore::new();
        let always = |_: &EntryKey, _: &EntryMetadata, _: &EntryMetadata| true;
        for key in ["img/1", "img/2", "doc/1", "img/3", "imz"] {
            store.upsert(meta(key, 1, 0), Bytes::new(), &always).unwrap();
        }

        let mut seen = vec![];
        store
            .scan_prefix("img/", &mut |meta| {
                seen.push(meta.key.to_string());
                ScanControl::Continue
            })
            .unwrap();
        assert_eq!(seen, ["img/1", "img/2", "img/3"]);

        let mut count = 0;
        store
            .scan_prefix("", &mut |_| {
                count += 1;
                if count == 2 { ScanControl::Stop } else { ScanControl::Continue }
            })
            .unwrap();
        assert_eq!(count, 2);
    }
}

use crate::{EntryKey, EntryMetadata, OverwriteChecker};

/// Decides whether a remote copy of an entry replaces the local one.
///
/// Copies with equal content hashes never replace each other. Otherwise the
/// newer insertion wins, and on a tie the numerically greater hash does, so
/// every replica independently picks the same winner.
pub fn remote_wins(
    local_inserted_at: u64,
    local_hash: u32,
    remote_inserted_at: u64,
    remote_hash: u32,
) -> bool {
    if local_hash == remote_hash {
        return false;
    }
    remote_inserted_at > local_inserted_at
        || (remote_inserted_at == local_inserted_at && remote_hash > local_hash)
}

/// Overwrite guard for entries pulled from peers.
///
/// Local tombstones are final; live entries yield only to winning copies.
#[derive(Debug, Clone, Copy, Default)]
pub struct RemoteOverwrite;

impl OverwriteChecker for RemoteOverwrite {
    fn may_overwrite(
        &self,
        _key: &EntryKey,
        existing: &EntryMetadata,
        incoming: &EntryMetadata,
    ) -> bool {
        !existing.deleted
            && remote_wins(
                existing.inserted_at,
                existing.content_hash,
                incoming.inserted_at,
                incoming.content_hash,
            )
    }
}

#[cfg(test)]
mod tests {
    use {super::*, proptest::prelude::*};

    #[test]
    fn newer_or_greater_wins() {
        assert!(remote_wins(10, 1, 11, 2));
        assert!(!remote_wins(11, 1, 10, 2));
        assert!(remote_wins(10, 1, 10, 2));
        assert!(!remote_wins(10, 2, 10, 1));
        // Identical content never conflicts.
        assert!(!remote_wins(10, 5, 20, 5));
        // Hashes compare unsigned.
        assert!(remote_wins(10, 1, 10, 0x8000_0000));
    }

    #[test]
    fn tombstones_are_kept() {
        let meta = |inserted_at, content_hash, deleted| EntryMetadata {
            key: EntryKey::new("k"),
            inserted_at,
            content_hash,
            size: 0,
            compression: Default::default(),
            deleted,
        };
        let key = EntryKey::new("k");
        assert!(RemoteOverwrite.may_overwrite(&key, &meta(1, 1, false), &meta(2, 2, false)));
        assert!(!RemoteOverwrite.may_overwrite(&key, &meta(1, 1, true), &meta(2, 2, false)));
    }

    proptest! {
        #[test]
        fn exactly_one_side_overwrites(a_ts: u64, a_hash: u32, b_ts: u64, b_hash: u32) {
            prop_assume!(a_hash != b_hash);
            let a_takes_b = remote_wins(a_ts, a_hash, b_ts, b_hash);
            let b_takes_a = remote_wins(b_ts, b_hash, a_ts, a_hash);
            prop_assert!(a_takes_b != b_takes_a);
        }

        #[test]
        fn equal_content_never_overwrites(a_ts: u64, b_ts: u64, hash: u32) {
            prop_assert!(!remote_wins(a_ts, hash, b_ts, hash));
        }
    }
}

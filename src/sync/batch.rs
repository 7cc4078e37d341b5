use crate::SyncEntry;

/// Number of leading `pending` entries to request in one pull round.
///
/// Bounded by key count and by aggregate payload size; an entry larger than
/// `max_bytes` on its own still goes out, alone.
pub fn pull_batch_len(pending: &[SyncEntry], max_entries: usize, max_bytes: u64) -> usize {
    let mut total = 0u64;
    let mut count = 0;
    for entry in pending.iter().take(max_entries.max(1)) {
        total = total.saturating_add(entry.size);
        if count > 0 && total > max_bytes {
            break;
        }
        count += 1;
    }
    count
}

#[cfg(test)]
mod tests {
    use {super::*, crate::EntryKey};

    fn entries(sizes: &[u64]) -> Vec<SyncEntry> {
        sizes
            .iter()
            .enumerate()
            .map(|(i, size)| SyncEntry {
                key: EntryKey::new(format!("k{i}")),
                inserted_at: i as u64,
                content_hash: 0,
                size: *size,
                deleted: false,
            })
            .collect()
    }

    #[test]
    fn batches_are_capped() {
        assert_eq!(pull_batch_len(&[], 10, 100), 0);
        assert_eq!(pull_batch_len(&entries(&[10, 10, 10]), 10, 100), 3);
        assert_eq!(pull_batch_len(&entries(&[10, 10, 10]), 2, 100), 2);
        assert_eq!(pull_batch_len(&entries(&[40, 40, 40]), 10, 100), 2);
        assert_eq!(pull_batch_len(&entries(&[40, 60, 1]), 10, 100), 2);
        // Oversized entries travel alone.
        assert_eq!(pull_batch_len(&entries(&[500, 1]), 10, 100), 1);
        assert_eq!(pull_batch_len(&entries(&[1, 500]), 10, 100), 1);
    }
}

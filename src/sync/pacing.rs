use {crate::SyncConfig, std::time::Duration};

/// Share of the peer's list size limit from which the next list is
/// requested right away.
const BUSY_LIST_RATIO: f64 = 0.75;

/// Pause before asking a peer for its next change list.
///
/// Full-ish lists mean more changes are waiting, and a node far behind must
/// catch up, so neither waits. Otherwise the pause shrinks linearly from
/// `idle_delay` (empty list) to nothing (busy list). The peer's own
/// suggestion is a lower bound.
pub fn sync_delay(
    listed: usize,
    max_entries: usize,
    lag: Duration,
    client_wait: Duration,
    config: &SyncConfig,
) -> Duration {
    let busy = max_entries as f64 * BUSY_LIST_RATIO;
    if listed as f64 >= busy || lag > config.no_delay_lag {
        return Duration::ZERO;
    }
    let idle_share = 1.0 - listed as f64 / busy;
    config.idle_delay.mul_f64(idle_share).max(client_wait)
}

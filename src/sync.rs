//! Peer-to-peer replication.
//!
//! Every node runs one [`ClusterPeer`] per configured peer and answers the
//! peers' requests through a [`SyncListSource`].

mod batch;
mod conflict;
mod pacing;
mod peer;
mod source;


pub use {
    batch::pull_batch_len,
    conflict::{RemoteOverwrite, remote_wins},
    pacing::sync_delay,
    peer::{ClusterPeer, PeerStatus},
    source::SyncListSource,
};

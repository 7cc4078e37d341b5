//! Quorum operations against the replicas of a key.
//!
//! A logical PUT, GET, HEAD or DELETE walks an ordered candidate list in
//! rounds: every enabled node first, then retriable failures, then disabled
//! nodes as a last resort, then a few more retry rounds. Three success tiers
//! (minimal, optimal, maximal) decide when to stop.

mod deferred;
mod engine;
mod result;


pub use {
    deferred::DeferredDeleteProcessor,
    engine::QuorumEngine,
    result::{Candidate, CallOutcome, NodeFailure, NodesForKey, OperationResult},
};

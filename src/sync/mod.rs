/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Catching up with the chain, and deciding which chain to follow.
//!
//! The [fork detector](fork_detector) records every header this node hears about, tracks the last and
//! final checkpoints of the chain it follows, and tells when the local chain diverged from the one the
//! network agrees on. The [bootstrapper](bootstrap) runs a loop that fetches and executes the blocks
//! the node is missing, and rolls the chain back when the fork detector asks for it.

use std::time::Duration;

pub mod bootstrap;

pub mod errors;

pub mod fork_detector;

/// Number of rounds without a committed block after which consensus is considered stuck.
pub const MAX_ROUNDS_WITHOUT_COMMITTED_BLOCK: u64 = 10;

/// Number of rounds after its own round within which a received header is still useful.
pub const BLOCK_FINALITY: u64 = 1;

/// Round reported for forks that must win regardless of round, e.g., forks notarized by the metachain.
pub const MIN_FORK_ROUND: u64 = 0;

/// Number of failed attempts at syncing a nonce after which the chain is rolled back by one block.
pub const MAX_SYNC_WITH_ERRORS_ALLOWED: u32 = 10;

/// How far beyond the next nonce headers and mini blocks are requested in advance.
pub const MAX_HEADERS_TO_REQUEST_IN_ADVANCE: u64 = 20;

/// Interval between two iterations of the sync loop.
pub const SLEEP_TIME: Duration = Duration::from_millis(5);

/// How long the sync loop waits for a requested header or body.
pub const PROCESS_WAIT_TIME: Duration = Duration::from_millis(100);

/// Lowest time a synced block may be given to execute.
pub const MIN_PROCESS_WAIT_TIME: Duration = Duration::from_millis(10);

/// Whether this node is caught up with the chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeState {
    /// The node has the highest block the network knows of and no fork was detected.
    Synchronized,

    /// The node is behind, or on a fork.
    NotSynchronized,

    /// The node is behind and is executing a block it fetched.
    Synchronizing,

    /// The state was not computed yet.
    NotCalculated,
}

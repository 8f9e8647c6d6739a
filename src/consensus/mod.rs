/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Secure Proof of Stake (SPoS) consensus on the blocks of a shard or of the metachain.
//!
//! ## Rounds
//!
//! Time is divided into rounds of equal duration. In every round a consensus group is drawn from the
//! validators eligible in the current epoch, using the previous block's random seed, and the first
//! member of the group leads the round. A round proceeds through four subrounds:
//! 1. **Start round**: every node computes the consensus group and resets its round state.
//! 2. **Block**: the leader creates a block and broadcasts its body and header. Members of the group
//!    process the block received from the leader.
//! 3. **Signature**: members sign the header hash and send their signature shares to the leader.
//! 4. **End round**: once a threshold of the group signed, the leader aggregates the shares, adds the
//!    aggregate signature and the signers' bitmap to the header, commits the block, and broadcasts the
//!    final header. Members commit after verifying it.
//!
//! A subround that cannot reach its goal before its deadline cancels the round. The node then waits
//! for the next round, and falls back on the [bootstrapper](crate::sync::bootstrap) to catch up with
//! the blocks it missed.
//!
//! ## Components
//!
//! - [`chronology`]: ticks the round clock and runs the subrounds in order.
//! - [`subround`], [`start_round`], [`block`], [`signature`], [`end_round`]: the subrounds.
//! - [`factory`]: builds the subrounds and connects them with the chronology and the worker.
//! - [`worker`] and [`message_validator`]: receive, check, store, and dispatch consensus messages.
//! - [`state`] and [`round_consensus`]: what this node knows about the current round.
//! - [`core`]: the collaborators every subround needs.

use crate::pluggables::sharding::ShardCoordinator;

pub mod block;

pub mod chronology;

pub mod core;

pub mod end_round;

pub mod errors;

pub mod factory;

pub mod message_validator;

pub mod messages;

pub mod round_consensus;

pub mod signature;

pub mod start_round;

pub mod state;

pub mod subround;

pub mod worker;

/// Prefix of the name of the topic carrying consensus messages.
pub const CONSENSUS_TOPIC: &str = "consensus";

/// Name of the topic carrying the consensus messages of this node's shard.
pub fn consensus_topic_id(shard_coordinator: &dyn ShardCoordinator) -> String {
    format!(
        "{}{}",
        CONSENSUS_TOPIC,
        shard_coordinator.communication_identifier(shard_coordinator.self_id())
    )
}

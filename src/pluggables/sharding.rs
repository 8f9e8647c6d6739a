/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Pluggable shard membership and validator selection.

use std::collections::HashSet;
use std::fmt::{self, Display, Formatter};

use crate::types::data_types::{PublicKeyBytes, ShardID, METACHAIN_SHARD_ID};

pub trait ShardCoordinator: Send + Sync {
    /// Shard this node belongs to.
    fn self_id(&self) -> ShardID;

    fn number_of_shards(&self) -> u32;

    /// Suffix of topics carrying data between the own shard and `destination`.
    fn communication_identifier(&self, destination: ShardID) -> String {
        let shard_name = |shard_id: ShardID| {
            if shard_id == METACHAIN_SHARD_ID {
                "META".to_string()
            } else {
                shard_id.to_string()
            }
        };

        let self_id = self.self_id();
        if destination == self_id {
            return format!("_{}", shard_name(self_id));
        }
        let (low, high) = if self_id < destination {
            (self_id, destination)
        } else {
            (destination, self_id)
        };

        format!("_{}_{}", shard_name(low), shard_name(high))
    }
}

/// Selects the consensus group of every round from the validators eligible in an epoch.
pub trait NodesCoordinator: Send + Sync {
    /// Returns the leader and the ordered consensus group (leader included) for `round`.
    fn compute_consensus_group(
        &self,
        randomness: &[u8],
        round: u64,
        shard_id: ShardID,
        epoch: u32,
    ) -> Result<(PublicKeyBytes, Vec<PublicKeyBytes>), NodesCoordinatorError>;

    fn consensus_group_size_for_shard_and_epoch(&self, shard_id: ShardID, epoch: u32) -> usize;

    /// Public keys allowed to send consensus messages in `epoch`.
    fn get_consensus_whitelisted_nodes(
        &self,
        epoch: u32,
    ) -> Result<HashSet<PublicKeyBytes>, NodesCoordinatorError>;

    fn shard_id_for_epoch(&self, epoch: u32) -> Result<ShardID, NodesCoordinatorError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodesCoordinatorError {
    EpochNodesConfigDoesNotExist { epoch: u32 },
    NilRandomness,
    InvalidShardId,
    Other(String),
}

impl Display for NodesCoordinatorError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            NodesCoordinatorError::EpochNodesConfigDoesNotExist { epoch } => {
                write!(f, "no nodes configuration for epoch {}", epoch)
            }
            NodesCoordinatorError::NilRandomness => write!(f, "nil randomness"),
            NodesCoordinatorError::InvalidShardId => write!(f, "invalid shard id"),
            NodesCoordinatorError::Other(reason) => write!(f, "{}", reason),
        }
    }
}

/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Pluggable peer-to-peer networking.
//!
//! Receiving is not abstracted here: the library user's networking provider hands every payload
//! received on the consensus topic to [`Worker::process_received_message`](crate::consensus::worker::Worker::process_received_message),
//! and every header or mini block received on the data topics to the [pools](crate::pluggables::pools).

use std::fmt::{self, Display, Formatter};
use std::time::Duration;

use crate::consensus::messages::ConsensusMessage;
use crate::types::{
    block::{Body, Header},
    data_types::{CryptoHash, PeerID, ShardID},
};

/// Sends consensus messages and finalized blocks to peers.
pub trait BroadcastMessenger: Send + Sync {
    fn broadcast_consensus_message(&self, message: &ConsensusMessage) -> Result<(), NetworkError>;

    fn broadcast_block(&self, body: &Body, header: &Header) -> Result<(), NetworkError>;

    fn broadcast_header(&self, header: &Header, public_key: &[u8]) -> Result<(), NetworkError>;
}

/// Asks peers for data. Requests are fire-and-forget: answers arrive through the pools.
pub trait RequestHandler: Send + Sync {
    fn request_shard_header_by_nonce(&self, shard_id: ShardID, nonce: u64);

    fn request_meta_header_by_nonce(&self, nonce: u64);

    fn request_mini_blocks(&self, shard_id: ShardID, hashes: Vec<CryptoHash>);

    fn request_equivalent_proof_by_nonce(&self, shard_id: ShardID, nonce: u64);
}

/// Protects the node from peers that send too much.
pub trait AntifloodHandler: Send + Sync {
    fn can_process_message(&self, payload_len: usize, from: &PeerID) -> Result<(), NetworkError>;

    /// Forgets the per-topic counters. Called at the start of every round.
    fn reset_for_topic(&self, topic: &str);

    fn blacklist_peer(&self, peer: &PeerID, reason: &str, duration: Duration);
}

/// Keeps a reputation score per validator public key.
pub trait PeerHonestyHandler: Send + Sync {
    fn change_score(&self, public_key: &[u8], topic: &str, units: i32);
}

pub trait PeerBlacklistHandler: Send + Sync {
    fn is_peer_blacklisted(&self, peer: &PeerID) -> bool;

    fn blacklist_peer(&self, peer: &PeerID, duration: Duration);
}

pub trait NetworkWatcher: Send + Sync {
    fn is_connected_to_the_network(&self) -> bool;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NetworkError {
    /// The peer exceeded the amount of data it may send.
    Flooded { peer: PeerID },
    SystemBusy,
    Disconnected,
    Other(String),
}

impl Display for NetworkError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            NetworkError::Flooded { peer } => write!(f, "peer {} is flooding", peer),
            NetworkError::SystemBusy => write!(f, "system busy"),
            NetworkError::Disconnected => write!(f, "disconnected"),
            NetworkError::Other(reason) => write!(f, "{}", reason),
        }
    }
}

/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Definitions of the events emitted by the consensus engine and the bootstrapper.
//!
//! An event signals that an action has been completed. Events are sent over a channel to the
//! [event bus](crate::event_bus) thread, which passes them to the default [loggers](crate::logging)
//! (if enabled) and to the handlers registered through [`NodeSpec`](crate::node::NodeSpec).
//!
//! ## Kinds of events
//!
//! |Emitted by|Events|
//! |---|---|
//! |Consensus subrounds|[`StartRound`](Event::StartRound), [`ProposeBlock`](Event::ProposeBlock), [`ReceiveBlock`](Event::ReceiveBlock), [`SendSignature`](Event::SendSignature), [`ReceiveSignature`](Event::ReceiveSignature), [`CommitBlock`](Event::CommitBlock)|
//! |Subround lifecycle|[`RoundCanceled`](Event::RoundCanceled), [`SubroundTimeout`](Event::SubroundTimeout)|
//! |Bootstrapper|[`ForkDetected`](Event::ForkDetected), [`RollBack`](Event::RollBack), [`SyncBlock`](Event::SyncBlock), [`NodeStateChanged`](Event::NodeStateChanged)|

use std::sync::mpsc::Sender;
use std::time::SystemTime;

use crate::consensus::subround::SubroundId;
use crate::types::data_types::{CryptoHash, PublicKeyBytes};

pub enum Event {
    // Events emitted while running the subrounds of a round.
    StartRound(StartRoundEvent),
    ProposeBlock(ProposeBlockEvent),
    ReceiveBlock(ReceiveBlockEvent),
    SendSignature(SendSignatureEvent),
    ReceiveSignature(ReceiveSignatureEvent),
    CommitBlock(CommitBlockEvent),
    // Events that end a round early.
    RoundCanceled(RoundCanceledEvent),
    SubroundTimeout(SubroundTimeoutEvent),
    // Sync events.
    ForkDetected(ForkDetectedEvent),
    RollBack(RollBackEvent),
    SyncBlock(SyncBlockEvent),
    NodeStateChanged(NodeStateChangedEvent),
}

impl Event {
    /// Sends `event` if a publisher is set. An event bus that already shut down is not an error.
    pub(crate) fn publish(event_publisher: &Option<Sender<Event>>, event: Event) {
        if let Some(event_publisher) = event_publisher {
            let _ = event_publisher.send(event);
        }
    }
}

/// The start round subround computed the consensus group of a new round.
pub struct StartRoundEvent {
    pub timestamp: SystemTime,
    pub round: i64,
    pub leader: PublicKeyBytes,
}

/// This node, as leader, broadcast the block of the round.
pub struct ProposeBlockEvent {
    pub timestamp: SystemTime,
    pub round: i64,
    pub nonce: u64,
    pub header_hash: CryptoHash,
}

/// This node received and executed the block proposed by `leader`.
pub struct ReceiveBlockEvent {
    pub timestamp: SystemTime,
    pub round: i64,
    pub nonce: u64,
    pub header_hash: CryptoHash,
    pub leader: PublicKeyBytes,
}

pub struct SendSignatureEvent {
    pub timestamp: SystemTime,
    pub round: i64,
    pub header_hash: CryptoHash,
    pub public_key: PublicKeyBytes,
}

pub struct ReceiveSignatureEvent {
    pub timestamp: SystemTime,
    pub round: i64,
    pub header_hash: CryptoHash,
    pub signer: PublicKeyBytes,
}

/// A block agreed on by consensus was committed to the local chain.
pub struct CommitBlockEvent {
    pub timestamp: SystemTime,
    pub round: i64,
    pub nonce: u64,
    pub header_hash: CryptoHash,
}

pub struct RoundCanceledEvent {
    pub timestamp: SystemTime,
    pub round: i64,
    pub subround: SubroundId,
}

/// `subround` did not finish before its end time.
pub struct SubroundTimeoutEvent {
    pub timestamp: SystemTime,
    pub round: i64,
    pub subround: SubroundId,
}

/// The bootstrapper is about to roll back to before the fork at `nonce`.
pub struct ForkDetectedEvent {
    pub timestamp: SystemTime,
    pub nonce: u64,
    pub round: u64,
    pub hash: Option<CryptoHash>,
}

/// The block at `nonce` was reverted.
pub struct RollBackEvent {
    pub timestamp: SystemTime,
    pub nonce: u64,
    pub header_hash: CryptoHash,
}

/// The bootstrapper fetched, executed, and committed a block.
pub struct SyncBlockEvent {
    pub timestamp: SystemTime,
    pub nonce: u64,
    pub round: u64,
    pub header_hash: CryptoHash,
}

pub struct NodeStateChangedEvent {
    pub timestamp: SystemTime,
    pub round: i64,
    pub is_synchronized: bool,
}

/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Structural and authentication checks on received consensus messages.
//!
//! Main type: [`ConsensusMessageValidator`].
//!
//! The [`Worker`](crate::consensus::worker::Worker) runs every message that passes its own checks
//! through [`check_consensus_message_validity`](ConsensusMessageValidator::check_consensus_message_validity)
//! before storing it or handing it to a subround. The checks, in order:
//! 1. The message's chain ID matches this node's.
//! 2. Exactly the fields its [`MessageType`] requires are filled, with the expected sizes.
//! 3. The header hash, public key and signature have the configured sizes.
//! 4. The sender is eligible, and the message belongs to the current or the next round.
//! 5. The sender has not already sent a message of this type in this round.
//! 6. The sender's key signed the peer ID the message originates from, and that peer ID is the one
//!    that relayed the message to us.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::consensus::errors::ConsensusError;
use crate::consensus::messages::{ConsensusMessage, MessageType};
use crate::consensus::state::ConsensusState;
use crate::pluggables::crypto::PeerSignatureHandler;
use crate::types::data_types::{ChainID, PeerID};

/// Largest body or header accepted in a consensus message.
pub const MAX_BLOCK_PART_SIZE_IN_BYTES: usize = 1024 * 1024;

/// Number of messages of each type a public key may send in a round.
pub const MAX_NUM_OF_MESSAGE_TYPE_ACCEPTED: u32 = 1;

/// Arguments of [`ConsensusMessageValidator::new`].
pub struct ConsensusMessageValidatorArgs {
    pub consensus_state: Option<Arc<ConsensusState>>,
    pub peer_signature_handler: Option<Arc<dyn PeerSignatureHandler>>,
    pub signature_size: usize,
    pub public_key_size: usize,
    pub header_hash_size: usize,
    pub chain_id: ChainID,
}

pub struct ConsensusMessageValidator {
    consensus_state: Arc<ConsensusState>,
    peer_signature_handler: Arc<dyn PeerSignatureHandler>,
    signature_size: usize,
    public_key_size: usize,
    header_hash_size: usize,
    chain_id: ChainID,
    /// Message types already received from each `(public key, round)`.
    consensus_messages: RwLock<HashMap<(Vec<u8>, i64), HashMap<MessageType, u32>>>,
}

impl ConsensusMessageValidator {
    pub fn new(
        args: ConsensusMessageValidatorArgs,
    ) -> Result<ConsensusMessageValidator, ConsensusError> {
        let consensus_state = args
            .consensus_state
            .ok_or(ConsensusError::NilConsensusState)?;
        let peer_signature_handler = args
            .peer_signature_handler
            .ok_or(ConsensusError::NilPeerSignatureHandler)?;
        if args.chain_id.is_empty() {
            return Err(ConsensusError::InvalidChainID);
        }
        if args.signature_size == 0 {
            return Err(ConsensusError::InvalidSignatureSize);
        }
        if args.public_key_size == 0 {
            return Err(ConsensusError::InvalidPublicKeySize);
        }
        if args.header_hash_size == 0 {
            return Err(ConsensusError::InvalidHeaderHashSize);
        }

        Ok(ConsensusMessageValidator {
            consensus_state,
            peer_signature_handler,
            signature_size: args.signature_size,
            public_key_size: args.public_key_size,
            header_hash_size: args.header_hash_size,
            chain_id: args.chain_id,
            consensus_messages: RwLock::new(HashMap::new()),
        })
    }

    /// Forgets which message types were received, e.g., at the start of a round.
    pub fn reset_consensus_messages(&self) {
        self.consensus_messages.write().clear();
    }

    pub fn check_consensus_message_validity(
        &self,
        message: &ConsensusMessage,
        originator: &PeerID,
    ) -> Result<(), ConsensusError> {
        if message.chain_id != self.chain_id {
            return Err(ConsensusError::InvalidChainID);
        }

        let msg_type = self.check_consensus_message_validity_for_message_type(message)?;

        if !self.is_block_header_hash_size_valid(message, msg_type) {
            return Err(ConsensusError::InvalidHeaderHashSize);
        }
        if message.pub_key.len() != self.public_key_size {
            return Err(ConsensusError::InvalidPublicKeySize);
        }
        if message.signature.len() != self.signature_size {
            return Err(ConsensusError::InvalidSignatureSize);
        }
        if !self
            .consensus_state
            .is_node_in_eligible_list(&message.pub_key)
        {
            return Err(ConsensusError::NodeIsNotInEligibleList);
        }

        let round = message.round_index;
        if self.is_message_for_future_round(round) {
            return Err(ConsensusError::MessageForFutureRound);
        }
        if self.is_message_for_past_round(round) {
            return Err(ConsensusError::MessageForPastRound);
        }
        if self.is_message_type_limit_reached(&message.pub_key, round, msg_type) {
            return Err(ConsensusError::MessageTypeLimitReached);
        }

        self.peer_signature_handler
            .verify_peer_signature(&message.pub_key, &message.originator_pid, &message.signature)
            .map_err(|_| ConsensusError::InvalidSignature)?;

        if &message.originator_pid != originator {
            return Err(ConsensusError::OriginatorMismatch);
        }

        self.add_message_type_to_public_key(&message.pub_key, round, msg_type);

        Ok(())
    }

    fn check_consensus_message_validity_for_message_type(
        &self,
        message: &ConsensusMessage,
    ) -> Result<MessageType, ConsensusError> {
        let msg_type = message
            .message_type()
            .filter(|msg_type| MessageType::RECEIVABLE.contains(msg_type))
            .ok_or(ConsensusError::InvalidMessageType {
                msg_type: message.msg_type,
            })?;

        match msg_type {
            MessageType::BlockBodyAndHeader => self.check_message_with_block_body_and_header(message),
            MessageType::BlockBody => self.check_message_with_block_body(message),
            MessageType::BlockHeader => self.check_message_with_block_header(message),
            MessageType::Signature => self.check_message_with_signature(message),
            MessageType::BlockHeaderFinalInfo => self.check_message_with_final_info(message),
            MessageType::Unknown => Err(ConsensusError::InvalidMessageType {
                msg_type: message.msg_type,
            }),
        }?;

        Ok(msg_type)
    }

    fn check_message_with_block_body_and_header(
        &self,
        message: &ConsensusMessage,
    ) -> Result<(), ConsensusError> {
        if !message.signature_share.is_empty()
            || !message.pub_keys_bitmap.is_empty()
            || !message.aggregate_signature.is_empty()
            || !message.leader_signature.is_empty()
        {
            return Err(ConsensusError::InvalidMessage);
        }
        if message.body.len() > MAX_BLOCK_PART_SIZE_IN_BYTES {
            return Err(ConsensusError::InvalidBodySize);
        }
        check_header_size(&message.header)
    }

    fn check_message_with_block_body(&self, message: &ConsensusMessage) -> Result<(), ConsensusError> {
        if !message.header.is_empty()
            || !message.signature_share.is_empty()
            || !message.pub_keys_bitmap.is_empty()
            || !message.aggregate_signature.is_empty()
            || !message.leader_signature.is_empty()
        {
            return Err(ConsensusError::InvalidMessage);
        }
        if message.body.len() > MAX_BLOCK_PART_SIZE_IN_BYTES {
            return Err(ConsensusError::InvalidBodySize);
        }
        Ok(())
    }

    fn check_message_with_block_header(
        &self,
        message: &ConsensusMessage,
    ) -> Result<(), ConsensusError> {
        if !message.body.is_empty()
            || !message.signature_share.is_empty()
            || !message.pub_keys_bitmap.is_empty()
            || !message.aggregate_signature.is_empty()
            || !message.leader_signature.is_empty()
        {
            return Err(ConsensusError::InvalidMessage);
        }
        check_header_size(&message.header)
    }

    fn check_message_with_signature(&self, message: &ConsensusMessage) -> Result<(), ConsensusError> {
        if !message.body.is_empty()
            || !message.header.is_empty()
            || !message.pub_keys_bitmap.is_empty()
            || !message.aggregate_signature.is_empty()
            || !message.leader_signature.is_empty()
        {
            return Err(ConsensusError::InvalidMessage);
        }
        if message.signature_share.len() != self.signature_size {
            return Err(ConsensusError::InvalidSignatureShareSize);
        }
        Ok(())
    }

    fn check_message_with_final_info(&self, message: &ConsensusMessage) -> Result<(), ConsensusError> {
        if !message.body.is_empty()
            || !message.header.is_empty()
            || !message.signature_share.is_empty()
        {
            return Err(ConsensusError::InvalidMessage);
        }
        if message.pub_keys_bitmap.len() != self.bitmap_size() {
            return Err(ConsensusError::InvalidPublicKeyBitmapSize);
        }
        if message.aggregate_signature.len() != self.signature_size
            || message.leader_signature.len() != self.signature_size
        {
            return Err(ConsensusError::InvalidSignatureSize);
        }
        Ok(())
    }

    fn bitmap_size(&self) -> usize {
        (self.consensus_state.consensus_group_size() + 7) / 8
    }

    fn is_block_header_hash_size_valid(&self, message: &ConsensusMessage, msg_type: MessageType) -> bool {
        if msg_type.is_with_block_body() {
            return message.block_header_hash.is_empty();
        }
        message.block_header_hash.len() == self.header_hash_size
    }

    fn is_message_for_future_round(&self, round: i64) -> bool {
        self.consensus_state.round_index() + 1 < round
    }

    fn is_message_for_past_round(&self, round: i64) -> bool {
        round < self.consensus_state.round_index()
    }

    fn is_message_type_limit_reached(&self, public_key: &[u8], round: i64, msg_type: MessageType) -> bool {
        self.consensus_messages
            .read()
            .get(&(public_key.to_vec(), round))
            .and_then(|types| types.get(&msg_type))
            .map(|count| *count >= MAX_NUM_OF_MESSAGE_TYPE_ACCEPTED)
            .unwrap_or(false)
    }

    fn add_message_type_to_public_key(&self, public_key: &[u8], round: i64, msg_type: MessageType) {
        *self
            .consensus_messages
            .write()
            .entry((public_key.to_vec(), round))
            .or_default()
            .entry(msg_type)
            .or_insert(0) += 1;
    }

    /// Public keys that sent a message in `round`.
    pub fn senders_in_round(&self, round: i64) -> HashSet<Vec<u8>> {
        self.consensus_messages
            .read()
            .keys()
            .filter(|(_, message_round)| *message_round == round)
            .map(|(public_key, _)| public_key.clone())
            .collect()
    }
}

fn check_header_size(header: &[u8]) -> Result<(), ConsensusError> {
    if header.is_empty() || header.len() > MAX_BLOCK_PART_SIZE_IN_BYTES {
        return Err(ConsensusError::InvalidHeaderSize);
    }
    Ok(())
}

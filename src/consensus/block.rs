/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The subround in which the leader proposes a block and every other validator executes it.
//!
//! Main type: [`SubroundBlock`].
//!
//! ## Proposing
//!
//! The leader builds a header on top of its chain head, fills it through the
//! [`BlockProcessor`](crate::pluggables::chain::BlockProcessor), and broadcasts it. If the marshalled
//! body and header fit together in [`MAX_ALLOWED_SIZE_IN_BYTES`], they travel in a single
//! [`BlockBodyAndHeader`](MessageType::BlockBodyAndHeader) message. Otherwise the body and the header
//! are sent in two separate messages.
//!
//! ## Receiving
//!
//! A validator accepts at most one header and one body per round, and only from the round's leader.
//! Once it holds both, it executes the block and marks the leader's block job as done, which is all
//! the [check](SubroundJob::check) of this subround waits for.

use std::sync::Arc;
use std::time::{Duration, SystemTime};

use crate::consensus::errors::ConsensusError;
use crate::consensus::messages::{ConsensusMessage, MessageType};
use crate::consensus::subround::{
    Subround, SubroundJob, SubroundStatus, LEADER_PEER_HONESTY_DECREASE_FACTOR,
    LEADER_PEER_HONESTY_INCREASE_FACTOR,
};
use crate::consensus::consensus_topic_id;
use crate::consensus::worker::WorkerHandler;
use crate::events::{Event, ProposeBlockEvent, ReceiveBlockEvent};
use crate::types::block::{Body, Header};
use crate::types::data_types::CryptoHash;

/// Largest size of a marshalled body and header for them to be sent in the same message.
pub const MAX_ALLOWED_SIZE_IN_BYTES: usize = 1024 * 1024 * 95 / 100;

pub struct SubroundBlock {
    base: Subround,
    processing_threshold_percentage: u32,
}

impl SubroundBlock {
    pub fn new(
        base: Subround,
        processing_threshold_percentage: u32,
        worker: Option<Arc<dyn WorkerHandler>>,
    ) -> Result<SubroundBlock, ConsensusError> {
        let worker = worker.ok_or(ConsensusError::NilWorker)?;

        let mut base = base;
        base.set_extend(Arc::new(move |subround| worker.extend(subround)));

        Ok(SubroundBlock {
            base,
            processing_threshold_percentage,
        })
    }

    /* ↓↓↓ Leader ↓↓↓ */

    fn do_block_job(&self) -> bool {
        let state = &self.base.consensus_state;
        let core = &self.base.core;

        if state.round_canceled() {
            return false;
        }
        if !self.base.is_self_leader() {
            return false;
        }
        if core.round_handler.index() <= self.round_in_last_committed_block() {
            return false;
        }
        if state.is_leader_job_done(self.base.current()) {
            return false;
        }
        if state.is_subround_finished(self.base.current()) {
            return false;
        }

        let header = match self.create_header() {
            Ok(header) => header,
            Err(err) => {
                log::debug!("doBlockJob.createHeader: {}", err);
                return false;
            }
        };

        let (header, body) = match self.create_block(header) {
            Ok(block) => block,
            Err(err) => {
                log::debug!("doBlockJob.createBlock: {}", err);
                return false;
            }
        };

        let header_hash = match self.send_block(&header, &body) {
            Ok(header_hash) => header_hash,
            Err(err) => {
                log::debug!("doBlockJob.sendBlock: {}", err);
                return false;
            }
        };

        if !state.try_set_block(Some(header_hash.clone()), Some(body), Some(header.clone())) {
            log::debug!("doBlockJob: a block was already set in round {}", state.round_index());
            return false;
        }

        let leader = match state.get_leader() {
            Ok(leader) => leader,
            Err(err) => {
                log::debug!("doBlockJob.GetLeader: {}", err);
                return false;
            }
        };
        if let Err(err) = state.set_job_done(&leader, self.base.current(), true) {
            log::debug!("doBlockJob.SetSelfJobDone: {}", err);
            return false;
        }

        self.base.publish(Event::ProposeBlock(ProposeBlockEvent {
            timestamp: SystemTime::now(),
            round: state.round_index(),
            nonce: header.nonce,
            header_hash,
        }));

        true
    }

    fn round_in_last_committed_block(&self) -> i64 {
        self.base
            .core
            .blockchain
            .current_block_header()
            .map(|header| header.round as i64)
            .unwrap_or(0)
    }

    fn create_header(&self) -> Result<Header, ConsensusError> {
        let core = &self.base.core;
        let state = &self.base.consensus_state;

        let (nonce, prev_hash, prev_rand_seed) = match (
            core.blockchain.current_block_header(),
            core.blockchain.current_block_header_hash(),
        ) {
            (Some(current_header), Some(current_hash)) => (
                current_header.nonce + 1,
                current_hash,
                current_header.rand_seed,
            ),
            _ => {
                let genesis = core
                    .blockchain
                    .genesis_header()
                    .ok_or(ConsensusError::NilHeader)?;
                (
                    genesis.nonce + 1,
                    core.blockchain.genesis_header_hash(),
                    genesis.rand_seed,
                )
            }
        };

        let round = core.round_handler.index().max(0) as u64;
        let mut header = core.block_processor.create_new_header(round, nonce)?;

        let leader = state.get_leader()?;
        let rand_seed = core
            .signing_handler
            .create_signature_for_public_key(&prev_rand_seed, &leader)?;

        header.prev_hash = prev_hash;
        header.shard_id = core.shard_coordinator.self_id();
        header.timestamp = core
            .round_handler
            .time_stamp()
            .duration_since(SystemTime::UNIX_EPOCH)
            .map(|duration| duration.as_secs())
            .unwrap_or(0);
        header.prev_rand_seed = prev_rand_seed;
        header.rand_seed = rand_seed;
        header.chain_id = self.base.chain_id().clone();

        Ok(header)
    }

    fn create_block(&self, header: Header) -> Result<(Header, Body), ConsensusError> {
        let round_handler = self.base.core.round_handler.clone();
        let start_time = self.base.consensus_state.round_timestamp();
        let max_time = self.base.end_time();
        let have_time_in_current_subround =
            move || !round_handler.remaining_time(start_time, max_time).is_zero();

        Ok(self
            .base
            .core
            .block_processor
            .create_block(header, &have_time_in_current_subround)?)
    }

    /// Broadcasts the proposal, returning the hash of its header.
    fn send_block(&self, header: &Header, body: &Body) -> Result<CryptoHash, ConsensusError> {
        let core = &self.base.core;
        let marshalled_body = core.marshalizer.marshal_body(body)?;
        let marshalled_header = core.marshalizer.marshal_header(header)?;
        let header_hash = core.hasher.compute(&marshalled_header);

        if could_be_sent_together(&marshalled_body, &marshalled_header) {
            self.send_message(
                MessageType::BlockBodyAndHeader,
                header_hash.bytes().to_vec(),
                marshalled_body,
                marshalled_header,
            )?;
            log::debug!(
                "step 1: block body and header have been sent, nonce {}, hash {}",
                header.nonce,
                header_hash
            );
        } else {
            self.send_message(MessageType::BlockBody, Vec::new(), marshalled_body, Vec::new())?;
            log::debug!("step 1: block body has been sent");
            self.send_message(
                MessageType::BlockHeader,
                header_hash.bytes().to_vec(),
                Vec::new(),
                marshalled_header,
            )?;
            log::debug!(
                "step 1: block header has been sent, nonce {}, hash {}",
                header.nonce,
                header_hash
            );
        }

        Ok(header_hash)
    }

    fn send_message(
        &self,
        msg_type: MessageType,
        block_header_hash: Vec<u8>,
        body: Vec<u8>,
        header: Vec<u8>,
    ) -> Result<(), ConsensusError> {
        let leader = self.base.consensus_state.get_leader()?;
        let message = ConsensusMessage::builder()
            .block_header_hash(block_header_hash)
            .body(body)
            .header(header)
            .originator_pid(self.base.get_associated_pid(&leader))
            .pub_key(leader)
            .msg_type(msg_type)
            .round_index(self.base.core.round_handler.index())
            .chain_id(self.base.chain_id().clone())
            .build();

        Ok(self
            .base
            .core
            .broadcast_messenger
            .broadcast_consensus_message(&message)?)
    }

    /* ↓↓↓ Validators ↓↓↓ */

    /// Handles a message carrying both the body and the header of the proposed block.
    pub fn received_block_body_and_header(&self, message: &ConsensusMessage) -> bool {
        let state = &self.base.consensus_state;
        if state.is_consensus_data_set() {
            return false;
        }
        if !self.check_sender_is_leader(message) {
            return false;
        }
        if state.is_block_body_already_received() || state.is_header_already_received() {
            return false;
        }
        if !state.can_process_received_message(
            message,
            self.base.core.round_handler.index(),
            self.base.current(),
        ) {
            return false;
        }

        let Some(header) = self.decode_valid_header(message) else {
            return false;
        };
        let Some(body) = self.base.core.block_processor.decode_block_body(&message.body) else {
            return false;
        };
        let data = CryptoHash::new(message.block_header_hash.clone());
        if !state.try_set_block(Some(data), Some(body), Some(header)) {
            return false;
        }

        log::debug!("step 1: block body and header have been received");

        self.process_and_score(message)
    }

    /// Handles a message carrying only the body of the proposed block.
    pub fn received_block_body(&self, message: &ConsensusMessage) -> bool {
        let state = &self.base.consensus_state;
        if !self.check_sender_is_leader(message) {
            return false;
        }
        if state.is_block_body_already_received() {
            return false;
        }
        if !state.can_process_received_message(
            message,
            self.base.core.round_handler.index(),
            self.base.current(),
        ) {
            return false;
        }

        let Some(body) = self.base.core.block_processor.decode_block_body(&message.body) else {
            return false;
        };
        if !state.try_set_block(None, Some(body), None) {
            return false;
        }

        log::debug!("step 1: block body has been received");

        self.process_and_score(message)
    }

    /// Handles a message carrying only the header of the proposed block.
    pub fn received_block_header(&self, message: &ConsensusMessage) -> bool {
        let state = &self.base.consensus_state;
        if state.is_consensus_data_set() {
            return false;
        }
        if !self.check_sender_is_leader(message) {
            return false;
        }
        if state.is_header_already_received() {
            return false;
        }
        if !state.can_process_received_message(
            message,
            self.base.core.round_handler.index(),
            self.base.current(),
        ) {
            return false;
        }

        let Some(header) = self.decode_valid_header(message) else {
            return false;
        };
        let data = CryptoHash::new(message.block_header_hash.clone());
        if !state.try_set_block(Some(data), None, Some(header)) {
            return false;
        }

        log::debug!("step 1: block header has been received");

        self.process_and_score(message)
    }

    /// Lowers the score of a sender that proposes without leading the round.
    fn check_sender_is_leader(&self, message: &ConsensusMessage) -> bool {
        if self
            .base
            .consensus_state
            .is_node_leader_in_current_round(&message.pub_key)
        {
            return true;
        }

        self.base.core.peer_honesty_handler.change_score(
            &message.pub_key,
            &consensus_topic_id(self.base.core.shard_coordinator.as_ref()),
            LEADER_PEER_HONESTY_DECREASE_FACTOR,
        );
        false
    }

    fn decode_valid_header(&self, message: &ConsensusMessage) -> Option<Header> {
        if message.block_header_hash.is_empty() {
            return None;
        }
        let header = self
            .base
            .core
            .block_processor
            .decode_block_header(&message.header)?;
        header.check_fields_for_nil().ok()?;
        Some(header)
    }

    fn process_and_score(&self, message: &ConsensusMessage) -> bool {
        let processed = self.process_received_block(message.round_index, &message.pub_key);
        self.base.core.peer_honesty_handler.change_score(
            &message.pub_key,
            &consensus_topic_id(self.base.core.shard_coordinator.as_ref()),
            LEADER_PEER_HONESTY_INCREASE_FACTOR,
        );
        processed
    }

    /// Executes the proposed block once both its body and its header were received.
    fn process_received_block(&self, round: i64, sender_public_key: &[u8]) -> bool {
        let state = &self.base.consensus_state;

        let block = state.round_block();
        let (Some(header), Some(body), Some(data)) = (block.header, block.body, block.data) else {
            return false;
        };

        state.set_processing_block(true);
        let processed = self.process_block(round, sender_public_key, &header, &body);
        state.set_processing_block(false);

        if processed {
            self.base.publish(Event::ReceiveBlock(ReceiveBlockEvent {
                timestamp: SystemTime::now(),
                round,
                nonce: header.nonce,
                header_hash: data,
                leader: sender_public_key.to_vec(),
            }));
        }

        processed
    }

    fn process_block(
        &self,
        round: i64,
        sender_public_key: &[u8],
        header: &Header,
        body: &Body,
    ) -> bool {
        let state = &self.base.consensus_state;
        let core = &self.base.core;

        if state.extended_called() || round < core.round_handler.index() {
            log::debug!(
                "canceled round {}, extended has been called or round index has been changed",
                round
            );
            return false;
        }

        let round_handler = core.round_handler.clone();
        let start_time = state.round_timestamp();
        let max_time: Duration =
            round_handler.time_duration() * self.processing_threshold_percentage / 100;
        let remaining_time_in_current_round =
            move || round_handler.remaining_time(start_time, max_time);

        let result = core
            .block_processor
            .process_block(header, body, &remaining_time_in_current_round);

        if round < core.round_handler.index() {
            log::debug!("canceled round {}, round index has been changed", round);
            return false;
        }

        if let Err(err) = result {
            self.base
                .cancel_round(&format!("processing the received block failed: {}", err));
            return false;
        }

        if let Err(err) = state.set_job_done(sender_public_key, self.base.current(), true) {
            log::debug!("processReceivedBlock.SetJobDone: {}", err);
            return false;
        }

        true
    }

    fn do_block_consensus_check(&self) -> bool {
        let state = &self.base.consensus_state;
        if state.round_canceled() {
            return false;
        }
        if state.is_subround_finished(self.base.current()) {
            return true;
        }

        let threshold = state.threshold(self.base.current());
        if self.is_block_received(threshold) {
            log::debug!("step 1: subround {} has been finished", self.base.name());
            state.set_status(self.base.current(), SubroundStatus::Finished);
            return true;
        }

        false
    }

    fn is_block_received(&self, threshold: usize) -> bool {
        self.base.consensus_state.compute_size(self.base.current()) >= threshold
    }
}

fn could_be_sent_together(marshalled_body: &[u8], marshalled_header: &[u8]) -> bool {
    marshalled_body.len() + marshalled_header.len() <= MAX_ALLOWED_SIZE_IN_BYTES
}

impl SubroundJob for SubroundBlock {
    fn base(&self) -> &Subround {
        &self.base
    }

    fn job(&self) -> bool {
        self.do_block_job()
    }

    fn check(&self) -> bool {
        self.do_block_consensus_check()
    }
}

/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The last subround of a round: the leader aggregates the signatures and everyone commits.
//!
//! Main type: [`SubroundEndRound`].
//!
//! The leader aggregates the signature shares it collected into the header, signs the completed
//! header, commits the block, and broadcasts the header's "final info" (the signers bitmap, the
//! aggregated signature, and its own signature). A validator commits the block once it receives that
//! final info, or a complete header matching the proposal through the headers pool.

use std::sync::Arc;
use std::time::{Instant, SystemTime};

use parking_lot::Mutex;

use crate::consensus::consensus_topic_id;
use crate::consensus::errors::ConsensusError;
use crate::consensus::messages::{ConsensusMessage, MessageType};
use crate::consensus::subround::{
    Subround, SubroundId, SubroundJob, SubroundStatus, LEADER_PEER_HONESTY_DECREASE_FACTOR,
    LEADER_PEER_HONESTY_INCREASE_FACTOR,
};
use crate::consensus::worker::WorkerHandler;
use crate::events::{CommitBlockEvent, Event};
use crate::pluggables::encoding::header_hash;
use crate::pluggables::status::{
    METRIC_CONSENSUS_ROUND_STATE, METRIC_COUNT_ACCEPTED_BLOCKS,
    METRIC_COUNT_CONSENSUS_ACCEPTED_BLOCKS,
};
use crate::types::block::{Body, Header};
use crate::types::data_types::{PublicKeyBytes, SignatureBytes};

pub struct SubroundEndRound {
    base: Subround,
    processing_threshold_percentage: u32,
    worker: Arc<dyn WorkerHandler>,
    processing_end_round: Mutex<()>,
}

impl SubroundEndRound {
    pub fn new(
        base: Subround,
        processing_threshold_percentage: u32,
        worker: Option<Arc<dyn WorkerHandler>>,
    ) -> Result<SubroundEndRound, ConsensusError> {
        let worker = worker.ok_or(ConsensusError::NilWorker)?;

        let mut base = base;
        let extend_worker = worker.clone();
        base.set_extend(Arc::new(move |subround| extend_worker.extend(subround)));

        Ok(SubroundEndRound {
            base,
            processing_threshold_percentage,
            worker,
            processing_end_round: Mutex::new(()),
        })
    }

    fn do_end_round_job(&self) -> bool {
        if !self.base.is_self_leader() {
            return self.do_end_round_job_by_participant(None);
        }

        self.do_end_round_job_by_leader()
    }

    /* ↓↓↓ Leader ↓↓↓ */

    fn do_end_round_job_by_leader(&self) -> bool {
        let state = &self.base.consensus_state;
        let core = &self.base.core;

        if state.round_canceled() {
            return false;
        }
        let bitmap = state.generate_bitmap(SubroundId::Signature);
        if let Err(err) = self.check_signatures_validity(&bitmap) {
            log::debug!("doEndRoundJobByLeader.checkSignaturesValidity: {}", err);
            return false;
        }

        let (Some(mut header), Some(body)) = (state.header(), state.body()) else {
            log::error!("doEndRoundJobByLeader: {}", ConsensusError::NilHeader);
            return false;
        };

        let leader = match state.get_leader() {
            Ok(leader) => leader,
            Err(err) => {
                log::debug!("doEndRoundJobByLeader.GetLeader: {}", err);
                return false;
            }
        };

        let signature = match core.signing_handler.aggregate_sigs(&bitmap, header.epoch) {
            Ok(signature) => signature,
            Err(err) => {
                log::debug!("doEndRoundJobByLeader.AggregateSigs: {}", err);
                return false;
            }
        };
        if let Err(err) = core.signing_handler.set_aggregated_sig(&signature) {
            log::debug!("doEndRoundJobByLeader.SetAggregatedSig: {}", err);
            return false;
        }

        header.pub_keys_bitmap = bitmap;
        header.signature = signature;

        let leader_signature = match self.sign_block_header(&header, &leader) {
            Ok(leader_signature) => leader_signature,
            Err(err) => {
                log::debug!("doEndRoundJobByLeader.signBlockHeader: {}", err);
                return false;
            }
        };
        header.leader_signature = leader_signature;
        state.replace_header(header.clone());

        let round_handler = &core.round_handler;
        if round_handler
            .remaining_time(round_handler.time_stamp(), round_handler.time_duration())
            .is_zero()
        {
            log::debug!(
                "doEndRoundJob: time is out, cancel broadcasting final info and header of round {}",
                round_handler.index()
            );
            return false;
        }

        self.create_and_broadcast_header_final_info(&header, &leader);

        if let Err(err) = core.broadcast_messenger.broadcast_header(&header, &leader) {
            log::debug!("doEndRoundJobByLeader.BroadcastHeader: {}", err);
        }

        let start_time = Instant::now();
        let result = core.block_processor.commit_block(&header, &body);
        log::debug!("elapsed time to commit block: {:?}", start_time.elapsed());
        if let Err(err) = result {
            log::debug!("doEndRoundJobByLeader.CommitBlock: {}", err);
            return false;
        }

        state.set_status(self.base.current(), SubroundStatus::Finished);
        self.worker.display_statistics();
        log::debug!("step 3: body and header have been committed and header has been broadcast");

        if let Err(err) = core.broadcast_messenger.broadcast_block(&body, &header) {
            log::debug!("doEndRoundJobByLeader.broadcastBlockDataLeader: {}", err);
        }

        log::debug!(
            "added proposed block with nonce {} in blockchain at {}",
            header.nonce,
            core.sync_timer.formatted_current_time()
        );
        self.publish_commit(&header);

        self.base
            .app_status_handler
            .increment(METRIC_COUNT_ACCEPTED_BLOCKS);
        let elapsed = SystemTime::now()
            .duration_since(round_handler.time_stamp())
            .unwrap_or_default();
        self.base.app_status_handler.set_string_value(
            METRIC_CONSENSUS_ROUND_STATE,
            &format!("valid block produced in {:.3} sec", elapsed.as_secs_f64()),
        );

        true
    }

    /// Every signer marked in `bitmap` must have done its signature job.
    fn check_signatures_validity(&self, bitmap: &[u8]) -> Result<(), ConsensusError> {
        let state = &self.base.consensus_state;
        let consensus_group = state.consensus_group();
        for (i, public_key) in consensus_group.iter().enumerate() {
            let is_signer = bitmap
                .get(i / 8)
                .map(|byte| byte & (1 << (i % 8)) != 0)
                .unwrap_or(false);
            if !is_signer {
                continue;
            }
            if !state.job_done(public_key, SubroundId::Signature)? {
                return Err(ConsensusError::NilSignature);
            }
        }
        Ok(())
    }

    fn sign_block_header(
        &self,
        header: &Header,
        leader: &[u8],
    ) -> Result<SignatureBytes, ConsensusError> {
        let marshalled_header = self
            .base
            .core
            .marshalizer
            .marshal_header(&header.without_leader_signature())?;
        Ok(self
            .base
            .core
            .signing_handler
            .create_signature_for_public_key(&marshalled_header, leader)?)
    }

    fn create_and_broadcast_header_final_info(&self, header: &Header, leader: &PublicKeyBytes) {
        let state = &self.base.consensus_state;
        let message = ConsensusMessage::builder()
            .block_header_hash(state.data().map(|data| data.bytes().to_vec()).unwrap_or_default())
            .pub_key(leader.clone())
            .msg_type(MessageType::BlockHeaderFinalInfo)
            .round_index(self.base.core.round_handler.index())
            .chain_id(self.base.chain_id().clone())
            .pub_keys_bitmap(header.pub_keys_bitmap.clone())
            .aggregate_signature(header.signature.clone())
            .leader_signature(header.leader_signature.clone())
            .originator_pid(self.base.get_associated_pid(leader))
            .build();

        match self
            .base
            .core
            .broadcast_messenger
            .broadcast_consensus_message(&message)
        {
            Ok(()) => log::debug!(
                "step 3: block header final info has been sent, nonce {}",
                header.nonce
            ),
            Err(err) => log::debug!("doEndRoundJob.BroadcastConsensusMessage: {}", err),
        }
    }

    /* ↓↓↓ Validators ↓↓↓ */

    /// Handles the final info the leader sends once it aggregated the signatures.
    pub fn received_block_header_final_info(&self, message: &ConsensusMessage) -> bool {
        let state = &self.base.consensus_state;
        let topic = consensus_topic_id(self.base.core.shard_coordinator.as_ref());

        if !state.is_consensus_data_set() {
            return false;
        }

        if !state.is_node_leader_in_current_round(&message.pub_key) {
            self.base.core.peer_honesty_handler.change_score(
                &message.pub_key,
                &topic,
                LEADER_PEER_HONESTY_DECREASE_FACTOR,
            );
            return false;
        }

        if self.base.is_self_leader() {
            return false;
        }

        if !state.is_consensus_data_equal(&message.block_header_hash) {
            return false;
        }

        if !state.can_process_received_message(
            message,
            self.base.core.round_handler.index(),
            self.base.current(),
        ) {
            return false;
        }

        if !self.is_block_header_final_info_valid(message) {
            return false;
        }

        log::debug!("step 3: block header final info has been received");
        self.base.core.peer_honesty_handler.change_score(
            &message.pub_key,
            &topic,
            LEADER_PEER_HONESTY_INCREASE_FACTOR,
        );

        self.do_end_round_job_by_participant(Some(message))
    }

    fn is_block_header_final_info_valid(&self, message: &ConsensusMessage) -> bool {
        let Some(header) = self.base.consensus_state.header() else {
            return false;
        };
        let header = with_final_info(header, message);

        let verifier = &self.base.core.header_sig_verifier;
        if let Err(err) = verifier.verify_leader_signature(&header) {
            log::debug!("isBlockHeaderFinalInfoValid.VerifyLeaderSignature: {}", err);
            return false;
        }
        if let Err(err) = verifier.verify_signature(&header) {
            log::debug!("isBlockHeaderFinalInfoValid.VerifySignature: {}", err);
            return false;
        }

        true
    }

    /// Handles a complete header of the current round received through the headers pool.
    pub fn received_header(&self, header: &Header) {
        let state = &self.base.consensus_state;
        if state.consensus_group().is_empty() || self.base.is_self_leader() {
            return;
        }

        state.add_received_header(header.clone());
        self.do_end_round_job_by_participant(None);
    }

    fn do_end_round_job_by_participant(&self, message: Option<&ConsensusMessage>) -> bool {
        let _processing = self.processing_end_round.lock();
        let state = &self.base.consensus_state;

        if state.round_canceled() {
            return false;
        }
        if !state.is_consensus_data_set() {
            return false;
        }
        if !state.is_subround_finished(SubroundId::Signature) {
            return false;
        }
        if state.is_subround_finished(self.base.current()) {
            return false;
        }

        let Some(header) = self.have_consensus_header_with_full_info(message) else {
            return false;
        };
        let Some(body) = state.body() else {
            return false;
        };

        state.set_processing_block(true);
        let committed = self.commit_as_participant(message.is_some(), &header, &body);
        state.set_processing_block(false);

        if committed {
            self.publish_commit(&header);
            if state.is_node_in_consensus_group(&state.self_pub_key()) {
                self.base
                    .app_status_handler
                    .increment(METRIC_COUNT_CONSENSUS_ACCEPTED_BLOCKS);
            }
        }

        committed
    }

    fn commit_as_participant(
        &self,
        assembled: bool,
        header: &Header,
        body: &Body,
    ) -> bool {
        let state = &self.base.consensus_state;
        let core = &self.base.core;

        if state.extended_called() || (header.round as i64) < core.round_handler.index() {
            log::debug!(
                "canceled round {}, extended has been called or round index has been changed",
                header.round
            );
            return false;
        }

        if self.is_out_of_time() {
            return false;
        }

        let start_time = Instant::now();
        let result = core.block_processor.commit_block(header, body);
        log::debug!("elapsed time to commit block: {:?}", start_time.elapsed());
        if let Err(err) = result {
            log::debug!("doEndRoundJobByParticipant.CommitBlock: {}", err);
            return false;
        }

        state.set_status(self.base.current(), SubroundStatus::Finished);
        self.worker.display_statistics();
        log::debug!("step 3: body and header have been committed");

        let header_type = if assembled { "assembled" } else { "received" };
        log::debug!(
            "added {} block with nonce {} in blockchain at {}",
            header_type,
            header.nonce,
            core.sync_timer.formatted_current_time()
        );

        true
    }

    /// The header to commit: the proposed header completed with the final info in `message`, or, when
    /// there is no message, a complete header received through the headers pool.
    fn have_consensus_header_with_full_info(
        &self,
        message: Option<&ConsensusMessage>,
    ) -> Option<Header> {
        let header = self.base.consensus_state.header()?;
        match message {
            Some(message) => Some(with_final_info(header, message)),
            None => self.received_consensus_header(&header),
        }
    }

    fn received_consensus_header(&self, consensus_header: &Header) -> Option<Header> {
        let core = &self.base.core;
        let consensus_header_hash =
            header_hash(core.marshalizer.as_ref(), core.hasher.as_ref(), consensus_header).ok()?;

        self.base
            .consensus_state
            .received_headers()
            .into_iter()
            .find(|received_header| {
                let stripped = Header {
                    leader_signature: Vec::new(),
                    pub_keys_bitmap: Vec::new(),
                    signature: Vec::new(),
                    ..received_header.clone()
                };
                header_hash(core.marshalizer.as_ref(), core.hasher.as_ref(), &stripped)
                    .map(|hash| hash == consensus_header_hash)
                    .unwrap_or(false)
            })
    }

    fn is_out_of_time(&self) -> bool {
        let max_time =
            self.base.core.round_handler.time_duration() * self.processing_threshold_percentage / 100;
        if self.base.remaining_time_in_round(max_time).is_zero() {
            self.base.cancel_round("time is out");
            return true;
        }
        false
    }

    fn publish_commit(&self, header: &Header) {
        self.base.publish(Event::CommitBlock(CommitBlockEvent {
            timestamp: SystemTime::now(),
            round: header.round as i64,
            nonce: header.nonce,
            header_hash: self.base.consensus_state.data().unwrap_or_default(),
        }));
    }

    fn do_end_round_consensus_check(&self) -> bool {
        let state = &self.base.consensus_state;
        if state.round_canceled() {
            return false;
        }
        state.is_subround_finished(self.base.current())
    }
}

fn with_final_info(header: Header, message: &ConsensusMessage) -> Header {
    Header {
        pub_keys_bitmap: message.pub_keys_bitmap.clone(),
        signature: message.aggregate_signature.clone(),
        leader_signature: message.leader_signature.clone(),
        ..header
    }
}

impl SubroundJob for SubroundEndRound {
    fn base(&self) -> &Subround {
        &self.base
    }

    fn job(&self) -> bool {
        self.do_end_round_job()
    }

    fn check(&self) -> bool {
        self.do_end_round_consensus_check()
    }
}

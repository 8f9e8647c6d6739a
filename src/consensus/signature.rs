/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The subround in which validators sign the proposed header and the leader collects their shares.
//!
//! Main type: [`SubroundSignature`].
//!
//! Every consensus group member that is not the leader sends its signature share on the consensus
//! topic. The leader stores every valid share it receives. The subround finishes:
//! - For a validator, once it (and every managed key it speaks for) has sent its share.
//! - For the leader, once every member signed, or once a threshold of members signed and the leader
//!   gave up waiting for the rest after [`WAITING_ALL_SIGS_MAX_TIME_THRESHOLD`] of the subround.
//! - For a node outside the consensus group, immediately.

use std::sync::Arc;
use std::thread;
use std::time::{Duration, SystemTime};

use crate::consensus::consensus_topic_id;
use crate::consensus::errors::ConsensusError;
use crate::consensus::messages::{ConsensusMessage, MessageType};
use crate::consensus::subround::{
    Subround, SubroundJob, SubroundStatus, VALIDATOR_PEER_HONESTY_DECREASE_FACTOR,
    VALIDATOR_PEER_HONESTY_INCREASE_FACTOR, WAITING_ALL_SIGS_MAX_TIME_THRESHOLD,
};
use crate::consensus::worker::WorkerHandler;
use crate::events::{Event, ReceiveSignatureEvent, SendSignatureEvent};
use crate::pluggables::status::{SentSignatureTracker, METRIC_CONSENSUS_ROUND_STATE};
use crate::types::data_types::{CryptoHash, SignatureBytes};

pub struct SubroundSignature {
    base: Subround,
    sent_signature_tracker: Arc<dyn SentSignatureTracker>,
    worker: Arc<dyn WorkerHandler>,
}

impl SubroundSignature {
    pub fn new(
        base: Subround,
        sent_signature_tracker: Option<Arc<dyn SentSignatureTracker>>,
        worker: Option<Arc<dyn WorkerHandler>>,
    ) -> Result<SubroundSignature, ConsensusError> {
        let sent_signature_tracker =
            sent_signature_tracker.ok_or(ConsensusError::NilSentSignatureTracker)?;
        let worker = worker.ok_or(ConsensusError::NilWorker)?;

        let mut base = base;
        let extend_worker = worker.clone();
        base.set_extend(Arc::new(move |subround| extend_worker.extend(subround)));

        Ok(SubroundSignature {
            base,
            sent_signature_tracker,
            worker,
        })
    }

    fn do_signature_job(&self) -> bool {
        let state = &self.base.consensus_state;
        if !state.can_do_subround_job(self.base.current()) {
            return false;
        }
        let (Some(header), Some(data)) = (state.header(), state.data()) else {
            log::error!("doSignatureJob: {}", ConsensusError::NilHeader);
            return false;
        };

        let self_pub_key = state.self_pub_key();
        let is_self_leader = self.base.is_self_leader_in_current_round();
        let is_self_in_consensus_group = state.is_node_in_consensus_group(&self_pub_key)
            && self.base.should_consider_self_key_in_consensus();

        if is_self_leader || is_self_in_consensus_group {
            let self_index = match state.self_consensus_group_index() {
                Ok(index) => index,
                Err(err) => {
                    log::debug!("doSignatureJob.SelfConsensusGroupIndex: {}", err);
                    return false;
                }
            };

            let signature_share = match self
                .base
                .core
                .signing_handler
                .create_signature_share_for_public_key(
                    data.bytes(),
                    self_index as u16,
                    header.epoch,
                    &self_pub_key,
                ) {
                Ok(signature_share) => signature_share,
                Err(err) => {
                    log::debug!("doSignatureJob.CreateSignatureShareForPublicKey: {}", err);
                    return false;
                }
            };

            if !is_self_leader
                && !self.create_and_send_signature_message(signature_share, &self_pub_key, &data)
            {
                return false;
            }

            if !self.complete_signature_subround(&self_pub_key, is_self_leader) {
                return false;
            }
        }

        self.do_signature_job_for_managed_keys(header.epoch, &data)
    }

    fn do_signature_job_for_managed_keys(&self, epoch: u32, data: &CryptoHash) -> bool {
        let state = &self.base.consensus_state;
        let is_multi_key_leader = state.is_multi_key_leader_in_current_round();
        let leader = state.get_leader().unwrap_or_default();

        let mut num_multi_keys_signatures_sent = 0;
        for public_key in state.consensus_group() {
            if state.is_job_done(&public_key, self.base.current()) {
                continue;
            }
            if !state.is_key_managed_by_self(&public_key) {
                continue;
            }

            let index = match state.consensus_group_index(&public_key) {
                Ok(index) => index,
                Err(err) => {
                    log::warn!("doSignatureJobForManagedKeys: index not found: {}", err);
                    return false;
                }
            };

            let signature_share = match self
                .base
                .core
                .signing_handler
                .create_signature_share_for_public_key(
                    data.bytes(),
                    index as u16,
                    epoch,
                    &public_key,
                ) {
                Ok(signature_share) => signature_share,
                Err(err) => {
                    log::debug!(
                        "doSignatureJobForManagedKeys.CreateSignatureShareForPublicKey: {}",
                        err
                    );
                    return false;
                }
            };

            if !is_multi_key_leader {
                if !self.create_and_send_signature_message(signature_share, &public_key, data) {
                    return false;
                }
                num_multi_keys_signatures_sent += 1;
            }
            self.sent_signature_tracker.signature_sent(&public_key);

            if !self.complete_signature_subround(&public_key, public_key == leader) {
                return false;
            }
        }

        if num_multi_keys_signatures_sent > 0 {
            log::debug!(
                "step 2: {} multi keys signatures have been sent",
                num_multi_keys_signatures_sent
            );
        }

        true
    }

    fn create_and_send_signature_message(
        &self,
        signature_share: SignatureBytes,
        public_key: &[u8],
        data: &CryptoHash,
    ) -> bool {
        let message = ConsensusMessage::builder()
            .block_header_hash(data.bytes().to_vec())
            .signature_share(signature_share)
            .pub_key(public_key.to_vec())
            .msg_type(MessageType::Signature)
            .round_index(self.base.core.round_handler.index())
            .chain_id(self.base.chain_id().clone())
            .originator_pid(self.base.get_associated_pid(public_key))
            .build();

        if let Err(err) = self
            .base
            .core
            .broadcast_messenger
            .broadcast_consensus_message(&message)
        {
            log::debug!("createAndSendSignatureMessage.BroadcastConsensusMessage: {}", err);
            return false;
        }

        log::debug!("step 2: signature has been sent");
        self.base.publish(Event::SendSignature(SendSignatureEvent {
            timestamp: SystemTime::now(),
            round: message.round_index,
            header_hash: data.clone(),
            public_key: public_key.to_vec(),
        }));

        true
    }

    fn complete_signature_subround(&self, public_key: &[u8], should_wait_for_all_sigs: bool) -> bool {
        if let Err(err) =
            self.base
                .consensus_state
                .set_job_done(public_key, self.base.current(), true)
        {
            log::debug!("completeSignatureSubround.SetJobDone: {}", err);
            return false;
        }

        if should_wait_for_all_sigs {
            self.spawn_wait_all_signatures();
        }

        true
    }

    /// Once the leader's patience runs out, lets the check settle for the threshold of signatures.
    fn spawn_wait_all_signatures(&self) {
        let state = self.base.consensus_state.clone();
        let round_handler = self.base.core.round_handler.clone();
        let channel = self.worker.consensus_state_changed_channel();
        let current = self.base.current();

        let start_time = self.base.start_time().as_secs_f64();
        let end_time = self.base.end_time().as_secs_f64();
        let max_time = Duration::from_secs_f64(
            start_time + (end_time - start_time) * WAITING_ALL_SIGS_MAX_TIME_THRESHOLD,
        );

        thread::spawn(move || {
            let remaining_time = round_handler.remaining_time(round_handler.time_stamp(), max_time);
            thread::sleep(remaining_time);

            if state.is_subround_finished(current) {
                return;
            }
            state.set_waiting_all_signatures_time_out(true);
            channel.notify();
        });
    }

    /// Handles a signature share sent by a consensus group member. Only the leader stores shares.
    pub fn received_signature(&self, message: &ConsensusMessage) -> bool {
        let state = &self.base.consensus_state;
        let topic = consensus_topic_id(self.base.core.shard_coordinator.as_ref());

        if !state.is_consensus_data_set() {
            return false;
        }

        if !state.is_node_in_consensus_group(&message.pub_key) {
            self.base.core.peer_honesty_handler.change_score(
                &message.pub_key,
                &topic,
                VALIDATOR_PEER_HONESTY_DECREASE_FACTOR,
            );
            return false;
        }

        if !self.base.is_self_leader() {
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

        if state.is_job_done(&message.pub_key, self.base.current()) {
            return false;
        }

        let index = match state.consensus_group_index(&message.pub_key) {
            Ok(index) => index,
            Err(err) => {
                log::debug!("receivedSignature.ConsensusGroupIndex: {}", err);
                return false;
            }
        };

        if let Err(err) = self
            .base
            .core
            .signing_handler
            .store_signature_share(index as u16, &message.signature_share)
        {
            log::debug!("receivedSignature.StoreSignatureShare: {}", err);
            return false;
        }

        if let Err(err) = state.set_job_done(&message.pub_key, self.base.current(), true) {
            log::debug!("receivedSignature.SetJobDone: {}", err);
            return false;
        }

        self.base.core.peer_honesty_handler.change_score(
            &message.pub_key,
            &topic,
            VALIDATOR_PEER_HONESTY_INCREASE_FACTOR,
        );

        self.base
            .app_status_handler
            .set_string_value(METRIC_CONSENSUS_ROUND_STATE, "signed");

        self.base.publish(Event::ReceiveSignature(ReceiveSignatureEvent {
            timestamp: SystemTime::now(),
            round: message.round_index,
            header_hash: CryptoHash::new(message.block_header_hash.clone()),
            signer: message.pub_key.clone(),
        }));

        true
    }

    fn do_signature_consensus_check(&self) -> bool {
        let state = &self.base.consensus_state;
        let current = self.base.current();

        if state.round_canceled() {
            return false;
        }
        if state.is_subround_finished(current) {
            self.base
                .app_status_handler
                .set_string_value(METRIC_CONSENSUS_ROUND_STATE, "signed");
            return true;
        }
        let Some(header) = state.header() else {
            return false;
        };

        let self_pub_key = state.self_pub_key();
        let is_self_leader = self.base.is_self_leader();
        let is_self_in_consensus_group = self.base.is_self_in_consensus_group();

        let threshold = if self
            .base
            .core
            .fallback_header_validator
            .should_apply_fallback_validation(&header)
        {
            state.fallback_threshold(current)
        } else {
            state.threshold(current)
        };

        let num_sigs = state.compute_size(current);
        let are_signatures_collected = num_sigs >= threshold;
        let are_all_signatures_collected = num_sigs == state.consensus_group_size();

        let is_job_done_by_leader = is_self_leader
            && (are_all_signatures_collected
                || (are_signatures_collected && state.waiting_all_signatures_time_out()));

        let self_job_done = !state.is_node_in_consensus_group(&self_pub_key)
            || state.is_self_job_done(current);
        let multi_key_job_done =
            !state.is_multi_key_in_consensus_group() || state.is_multi_key_job_done(current);
        let is_job_done_by_consensus_node =
            !is_self_leader && is_self_in_consensus_group && self_job_done && multi_key_job_done;

        let is_subround_finished =
            !is_self_in_consensus_group || is_job_done_by_consensus_node || is_job_done_by_leader;

        if is_subround_finished {
            if is_self_leader {
                log::debug!(
                    "step 2: signatures, received {} of {}, threshold {}",
                    num_sigs,
                    state.consensus_group_size(),
                    threshold
                );
            }
            log::debug!("step 2: subround {} has been finished", self.base.name());
            state.set_status(current, SubroundStatus::Finished);
            self.base
                .app_status_handler
                .set_string_value(METRIC_CONSENSUS_ROUND_STATE, "signed");
            return true;
        }

        false
    }
}

impl SubroundJob for SubroundSignature {
    fn base(&self) -> &Subround {
        &self.base
    }

    fn job(&self) -> bool {
        self.do_signature_job()
    }

    fn check(&self) -> bool {
        self.do_signature_consensus_check()
    }
}

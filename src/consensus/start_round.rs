/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The first subround of a round: forgets the previous round and computes the new consensus group.
//!
//! Main type: [`SubroundStartRound`].
//!
//! The start subround only finishes once the node is synchronized with the network. Until then, its
//! check fails, the subround times out, and the node sits the round out.

use std::collections::HashSet;
use std::sync::Arc;
use std::thread;
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::RwLock;

use crate::consensus::consensus_topic_id;
use crate::consensus::errors::ConsensusError;
use crate::consensus::subround::{Subround, SubroundJob, SubroundStatus};
use crate::consensus::worker::WorkerHandler;
use crate::events::{Event, StartRoundEvent};
use crate::pluggables::status::{
    OutportHandler, RoundInfo, SentSignatureTracker, METRIC_CONSENSUS_ROUND_STATE,
    METRIC_CONSENSUS_STATE, METRIC_COUNT_CONSENSUS, METRIC_COUNT_LEADER,
};
use crate::sync::NodeState;
use crate::types::block::Header;
use crate::types::data_types::PublicKeyBytes;

pub struct SubroundStartRound {
    base: Subround,
    processing_threshold_percentage: u32,
    sent_signature_tracker: Arc<dyn SentSignatureTracker>,
    worker: Arc<dyn WorkerHandler>,
    outport_handler: RwLock<Option<Arc<dyn OutportHandler>>>,
}

impl SubroundStartRound {
    pub fn new(
        base: Subround,
        processing_threshold_percentage: u32,
        sent_signature_tracker: Option<Arc<dyn SentSignatureTracker>>,
        worker: Option<Arc<dyn WorkerHandler>>,
    ) -> Result<SubroundStartRound, ConsensusError> {
        let sent_signature_tracker =
            sent_signature_tracker.ok_or(ConsensusError::NilSentSignatureTracker)?;
        let worker = worker.ok_or(ConsensusError::NilWorker)?;

        let mut base = base;
        let extend_worker = worker.clone();
        base.set_extend(Arc::new(move |subround| extend_worker.extend(subround)));

        Ok(SubroundStartRound {
            base,
            processing_threshold_percentage,
            sent_signature_tracker,
            worker,
            outport_handler: RwLock::new(None),
        })
    }

    /// Sets the handler that exports a summary of every round this node takes part in.
    pub fn set_outport_handler(
        &self,
        outport_handler: Option<Arc<dyn OutportHandler>>,
    ) -> Result<(), ConsensusError> {
        let outport_handler = outport_handler.ok_or(ConsensusError::NilDriver)?;
        *self.outport_handler.write() = Some(outport_handler);
        Ok(())
    }

    /// Reacts to the start of a new epoch by replacing the list of validators eligible to send
    /// consensus messages.
    pub fn epoch_start_action(&self, header: &Header) {
        if let Err(err) = self.change_epoch(header.epoch) {
            log::error!("epoch start action failed: {}", err);
        }
    }

    fn change_epoch(&self, epoch: u32) -> Result<(), ConsensusError> {
        let whitelisted: HashSet<PublicKeyBytes> = self
            .base
            .core
            .nodes_coordinator
            .get_consensus_whitelisted_nodes(epoch)?;
        self.base.consensus_state.set_eligible_list(whitelisted);
        Ok(())
    }

    fn do_start_round_job(&self) -> bool {
        let state = &self.base.consensus_state;
        let round_handler = &self.base.core.round_handler;

        state.reset_consensus_state();
        state.set_round_index(round_handler.index());
        state.set_round_timestamp(round_handler.time_stamp());

        let topic = consensus_topic_id(self.base.core.shard_coordinator.as_ref());
        self.base.core.antiflood_handler.reset_for_topic(&topic);
        self.worker.reset_consensus_messages();

        true
    }

    fn do_start_round_consensus_check(&self) -> bool {
        let state = &self.base.consensus_state;
        if state.round_canceled() {
            return false;
        }
        if state.is_subround_finished(self.base.current()) {
            return true;
        }

        self.init_current_round()
    }

    fn init_current_round(&self) -> bool {
        let state = &self.base.consensus_state;
        let core = &self.base.core;
        let status = &self.base.app_status_handler;

        if core.bootstrapper.get_node_state() != NodeState::Synchronized {
            return false;
        }

        status.set_string_value(METRIC_CONSENSUS_ROUND_STATE, "");

        if let Err(err) = self.generate_next_consensus_group() {
            self.base
                .cancel_round(&format!("generating next consensus group failed: {}", err));
            return false;
        }

        if core.node_redundancy_handler.is_redundancy_node() {
            core.node_redundancy_handler.adjust_inactivity_if_needed(
                &state.self_pub_key(),
                &state.consensus_group(),
                core.round_handler.index(),
            );
        }

        let leader = match state.get_leader() {
            Ok(leader) => leader,
            Err(err) => {
                self.base
                    .cancel_round(&format!("getting the leader failed: {}", err));
                return false;
            }
        };

        let msg = self.base.get_leader_start_round_message();
        if !msg.is_empty() {
            status.increment(METRIC_COUNT_LEADER);
            status.set_string_value(METRIC_CONSENSUS_ROUND_STATE, "proposed");
            status.set_string_value(METRIC_CONSENSUS_STATE, "proposer");
        }
        log::debug!(
            "step 0: preparing the round, leader {}{}",
            crate::logging::first_seven_base64_chars(&leader),
            msg
        );

        self.sent_signature_tracker.start_round();

        let public_keys = state.consensus_group();
        let num_multi_keys_in_consensus_group =
            self.compute_num_managed_keys_in_consensus_group(&public_keys);
        if num_multi_keys_in_consensus_group > 0 {
            log::debug!(
                "in consensus group with {} multi keys identities",
                num_multi_keys_in_consensus_group
            );
        }

        self.index_round_if_needed(&public_keys);

        if !self.base.is_self_in_consensus_group() {
            log::debug!("not in consensus group");
            status.set_string_value(METRIC_CONSENSUS_STATE, "not in consensus group");
        } else if !self.base.is_self_leader() {
            status.increment(METRIC_COUNT_CONSENSUS);
            status.set_string_value(METRIC_CONSENSUS_STATE, "participant");
        }

        if let Err(err) = core.signing_handler.reset(&public_keys) {
            self.base
                .cancel_round(&format!("resetting the signing handler failed: {}", err));
            return false;
        }

        let max_time =
            core.round_handler.time_duration() * self.processing_threshold_percentage / 100;
        if self.base.remaining_time_in_round(max_time).is_zero() {
            self.base.cancel_round("time is out");
            return false;
        }

        state.set_status(self.base.current(), SubroundStatus::Finished);

        self.base.publish(Event::StartRound(StartRoundEvent {
            timestamp: SystemTime::now(),
            round: state.round_index(),
            leader,
        }));

        // Messages received in this round before the consensus group was known.
        let worker = self.worker.clone();
        thread::spawn(move || worker.execute_stored_messages());

        true
    }

    fn compute_num_managed_keys_in_consensus_group(&self, public_keys: &[PublicKeyBytes]) -> usize {
        let state = &self.base.consensus_state;
        let mut num_multi_keys_in_consensus_group = 0;
        for public_key in public_keys {
            if state.is_key_managed_by_self(public_key) {
                num_multi_keys_in_consensus_group += 1;
                state.increment_rounds_without_received_messages(public_key);
            }
        }
        num_multi_keys_in_consensus_group
    }

    fn index_round_if_needed(&self, public_keys: &[PublicKeyBytes]) {
        let outport_handler = self.outport_handler.read();
        let outport_handler = match outport_handler.as_ref() {
            Some(outport_handler) if outport_handler.has_drivers() => outport_handler,
            _ => return,
        };

        let core = &self.base.core;
        let current_header = match core
            .blockchain
            .current_block_header()
            .or_else(|| core.blockchain.genesis_header())
        {
            Some(header) => header,
            None => return,
        };

        let epoch = current_header.epoch;
        let shard_id = core.shard_coordinator.self_id();
        let nodes_coordinator_shard_id = match core.nodes_coordinator.shard_id_for_epoch(epoch) {
            Ok(shard_id) => shard_id,
            Err(err) => {
                log::debug!("index round: shard id for epoch {} failed: {}", epoch, err);
                return;
            }
        };
        if shard_id != nodes_coordinator_shard_id {
            log::debug!(
                "index round: shard id {} does not match nodes coordinator shard id {}",
                shard_id,
                nodes_coordinator_shard_id
            );
            return;
        }

        let state = &self.base.consensus_state;
        let signers_indexes = public_keys
            .iter()
            .filter_map(|pk| state.consensus_group_index(pk).ok())
            .map(|index| index as u64)
            .collect();
        let timestamp = state
            .round_timestamp()
            .duration_since(UNIX_EPOCH)
            .map(|duration| duration.as_secs())
            .unwrap_or(0);

        outport_handler.save_rounds_info(vec![RoundInfo {
            round: core.round_handler.index().max(0) as u64,
            signers_indexes,
            block_was_proposed: false,
            shard_id,
            epoch,
            timestamp,
        }]);
    }

    fn generate_next_consensus_group(&self) -> Result<(), ConsensusError> {
        let core = &self.base.core;
        let state = &self.base.consensus_state;

        let current_header = core
            .blockchain
            .current_block_header()
            .or_else(|| core.blockchain.genesis_header())
            .ok_or(ConsensusError::NilHeader)?;

        let shard_id = core.shard_coordinator.self_id();
        let (leader, next_consensus_group) = state.get_next_consensus_group(
            &current_header.rand_seed,
            state.round_index().max(0) as u64,
            shard_id,
            core.nodes_coordinator.as_ref(),
            current_header.epoch,
        )?;

        log::trace!(
            "consensus group of round {} formed by {} validators",
            state.round_index(),
            next_consensus_group.len()
        );

        state.set_consensus_group(next_consensus_group);
        state.set_leader(leader);

        let consensus_group_size = core
            .nodes_coordinator
            .consensus_group_size_for_shard_and_epoch(shard_id, current_header.epoch);
        state.set_thresholds_for_group_size(consensus_group_size);

        Ok(())
    }
}

impl SubroundJob for SubroundStartRound {
    fn base(&self) -> &Subround {
        &self.base
    }

    fn job(&self) -> bool {
        self.do_start_round_job()
    }

    fn check(&self) -> bool {
        self.do_start_round_consensus_check()
    }
}

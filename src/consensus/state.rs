/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Everything a node knows about the consensus round in progress.
//!
//! Main type: [`ConsensusState`].
//!
//! The state is shared as an `Arc<ConsensusState>` between the chronology thread, which runs the
//! subround jobs and checks, and the worker, which delivers received messages to the subrounds. Every
//! field is guarded separately so that no method ever holds two locks at once.

use std::ops::Deref;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;
use std::time::SystemTime;

use parking_lot::RwLock;

use crate::consensus::errors::ConsensusError;
use crate::consensus::messages::ConsensusMessage;
use crate::consensus::round_consensus::RoundConsensus;
use crate::consensus::subround::{SubroundId, SubroundStatus};
use crate::pluggables::sharding::NodesCoordinator;
use crate::types::block::{Body, Header};
use crate::types::data_types::{CryptoHash, PeerID, PublicKeyBytes, ShardID};

/// Block proposed in the current round, as far as this node has received it.
#[derive(Clone, Default)]
pub struct RoundBlock {
    /// Hash of the proposed header.
    pub data: Option<CryptoHash>,
    pub body: Option<Body>,
    pub header: Option<Header>,
}

/// Per-round consensus state of a node.
pub struct ConsensusState {
    round_consensus: RoundConsensus,
    thresholds: RwLock<[usize; SubroundId::COUNT]>,
    fallback_thresholds: RwLock<[usize; SubroundId::COUNT]>,
    round_status: RwLock<[SubroundStatus; SubroundId::COUNT]>,
    block: RwLock<RoundBlock>,
    received_headers: RwLock<Vec<Header>>,
    round_index: AtomicI64,
    round_timestamp: RwLock<SystemTime>,
    round_canceled: AtomicBool,
    extended_called: AtomicBool,
    waiting_all_signatures_time_out: AtomicBool,
    processing_block: AtomicBool,
}

impl ConsensusState {
    pub fn new(round_consensus: RoundConsensus) -> ConsensusState {
        let consensus_state = ConsensusState {
            round_consensus,
            thresholds: RwLock::new([0; SubroundId::COUNT]),
            fallback_thresholds: RwLock::new([0; SubroundId::COUNT]),
            round_status: RwLock::new([SubroundStatus::NotFinished; SubroundId::COUNT]),
            block: RwLock::new(RoundBlock::default()),
            received_headers: RwLock::new(Vec::new()),
            round_index: AtomicI64::new(0),
            round_timestamp: RwLock::new(SystemTime::UNIX_EPOCH),
            round_canceled: AtomicBool::new(false),
            extended_called: AtomicBool::new(false),
            waiting_all_signatures_time_out: AtomicBool::new(false),
            processing_block: AtomicBool::new(false),
        };
        let size = consensus_state.consensus_group_size();
        consensus_state.set_thresholds_for_group_size(size);
        consensus_state
    }

    /// Forgets everything about the previous round: the proposed block, the cancel and extend flags,
    /// every subround status, and every job-done bit.
    pub fn reset_consensus_state(&self) {
        *self.block.write() = RoundBlock::default();
        self.received_headers.write().clear();
        self.round_canceled.store(false, Ordering::SeqCst);
        self.extended_called.store(false, Ordering::SeqCst);
        self.waiting_all_signatures_time_out
            .store(false, Ordering::SeqCst);
        self.reset_round_status();
        self.round_consensus.reset_round_state();
    }

    pub fn reset_round_status(&self) {
        *self.round_status.write() = [SubroundStatus::NotFinished; SubroundId::COUNT];
    }

    /* ↓↓↓ Thresholds ↓↓↓ */

    pub fn threshold(&self, subround: SubroundId) -> usize {
        self.thresholds.read()[subround.index()]
    }

    pub fn set_threshold(&self, subround: SubroundId, threshold: usize) {
        self.thresholds.write()[subround.index()] = threshold;
    }

    pub fn fallback_threshold(&self, subround: SubroundId) -> usize {
        self.fallback_thresholds.read()[subround.index()]
    }

    pub fn set_fallback_threshold(&self, subround: SubroundId, threshold: usize) {
        self.fallback_thresholds.write()[subround.index()] = threshold;
    }

    /// Sets the group size and derives every threshold from it: one proposal for the block subround,
    /// and a two-thirds-plus-one (fallback: half-plus-one) majority of signatures afterwards.
    pub fn set_thresholds_for_group_size(&self, consensus_group_size: usize) {
        self.round_consensus
            .set_consensus_group_size(consensus_group_size);

        let pbft_threshold = consensus_group_size * 2 / 3 + 1;
        let fallback_threshold = consensus_group_size / 2 + 1;

        self.set_threshold(SubroundId::Block, 1);
        self.set_threshold(SubroundId::Signature, pbft_threshold);
        self.set_threshold(SubroundId::EndRound, pbft_threshold);

        self.set_fallback_threshold(SubroundId::Block, 1);
        self.set_fallback_threshold(SubroundId::Signature, fallback_threshold);
        self.set_fallback_threshold(SubroundId::EndRound, fallback_threshold);
    }

    /* ↓↓↓ Round status ↓↓↓ */

    pub fn status(&self, subround: SubroundId) -> SubroundStatus {
        self.round_status.read()[subround.index()]
    }

    pub fn set_status(&self, subround: SubroundId, status: SubroundStatus) {
        self.round_status.write()[subround.index()] = status;
    }

    pub fn is_subround_finished(&self, subround: SubroundId) -> bool {
        self.status(subround) == SubroundStatus::Finished
    }

    /* ↓↓↓ Round clock and flags ↓↓↓ */

    pub fn round_index(&self) -> i64 {
        self.round_index.load(Ordering::SeqCst)
    }

    pub fn set_round_index(&self, round_index: i64) {
        self.round_index.store(round_index, Ordering::SeqCst)
    }

    pub fn round_timestamp(&self) -> SystemTime {
        *self.round_timestamp.read()
    }

    pub fn set_round_timestamp(&self, timestamp: SystemTime) {
        *self.round_timestamp.write() = timestamp;
    }

    pub fn round_canceled(&self) -> bool {
        self.round_canceled.load(Ordering::SeqCst)
    }

    pub fn set_round_canceled(&self, value: bool) {
        self.round_canceled.store(value, Ordering::SeqCst)
    }

    pub fn extended_called(&self) -> bool {
        self.extended_called.load(Ordering::SeqCst)
    }

    pub fn set_extended_called(&self, value: bool) {
        self.extended_called.store(value, Ordering::SeqCst)
    }

    pub fn waiting_all_signatures_time_out(&self) -> bool {
        self.waiting_all_signatures_time_out.load(Ordering::SeqCst)
    }

    pub fn set_waiting_all_signatures_time_out(&self, value: bool) {
        self.waiting_all_signatures_time_out
            .store(value, Ordering::SeqCst)
    }

    pub fn processing_block(&self) -> bool {
        self.processing_block.load(Ordering::SeqCst)
    }

    pub fn set_processing_block(&self, value: bool) {
        self.processing_block.store(value, Ordering::SeqCst)
    }

    /* ↓↓↓ Proposed block ↓↓↓ */

    pub fn data(&self) -> Option<CryptoHash> {
        self.block.read().data.clone()
    }

    pub fn body(&self) -> Option<Body> {
        self.block.read().body.clone()
    }

    pub fn header(&self) -> Option<Header> {
        self.block.read().header.clone()
    }

    pub fn round_block(&self) -> RoundBlock {
        self.block.read().clone()
    }

    /// Stores the given parts of the proposed block, but only if none of them was stored before in
    /// this round. Returns whether the parts were stored.
    ///
    /// Checking and storing happen under a single write lock, so that two proposals racing for the
    /// same round can never both be accepted.
    pub fn try_set_block(
        &self,
        data: Option<CryptoHash>,
        body: Option<Body>,
        header: Option<Header>,
    ) -> bool {
        let mut block = self.block.write();
        if (data.is_some() && block.data.is_some())
            || (body.is_some() && block.body.is_some())
            || (header.is_some() && block.header.is_some())
        {
            return false;
        }

        if data.is_some() {
            block.data = data;
        }
        if body.is_some() {
            block.body = body;
        }
        if header.is_some() {
            block.header = header;
        }
        true
    }

    /// Replaces the stored header, e.g., after the aggregated signature has been added to it.
    pub fn replace_header(&self, header: Header) {
        self.block.write().header = Some(header);
    }

    /// Remembers a complete header of the current round that arrived outside the consensus topic.
    pub fn add_received_header(&self, header: Header) {
        self.received_headers.write().push(header);
    }

    pub fn received_headers(&self) -> Vec<Header> {
        self.received_headers.read().clone()
    }

    pub fn is_consensus_data_set(&self) -> bool {
        self.block.read().data.is_some()
    }

    pub fn is_consensus_data_equal(&self, data: &[u8]) -> bool {
        match &self.block.read().data {
            Some(stored) => stored.bytes() == data,
            None => false,
        }
    }

    pub fn is_block_body_already_received(&self) -> bool {
        self.block.read().body.is_some()
    }

    pub fn is_header_already_received(&self) -> bool {
        self.block.read().header.is_some()
    }

    /* ↓↓↓ Leadership and jobs ↓↓↓ */

    pub fn get_leader(&self) -> Result<PublicKeyBytes, ConsensusError> {
        let leader = self.round_consensus.leader();
        if leader.is_empty() {
            return Err(ConsensusError::EmptyConsensusGroup);
        }
        Ok(leader)
    }

    pub fn is_node_leader_in_current_round(&self, public_key: &[u8]) -> bool {
        match self.get_leader() {
            Ok(leader) => leader.as_slice() == public_key,
            Err(_) => false,
        }
    }

    /// Whether this node's own key leads the current round. Redundancy is accounted for by the
    /// subrounds, not here.
    pub fn is_self_leader_in_current_round(&self) -> bool {
        let self_pub_key = self.self_pub_key();
        self.is_node_leader_in_current_round(&self_pub_key)
    }

    /// Whether the current round's leader is one of the keys this node manages.
    pub fn is_multi_key_leader_in_current_round(&self) -> bool {
        match self.get_leader() {
            Ok(leader) => self.is_key_managed_by_self(&leader),
            Err(_) => false,
        }
    }

    pub fn is_node_self(&self, public_key: &[u8]) -> bool {
        self.self_pub_key().as_slice() == public_key
    }

    pub fn is_job_done(&self, public_key: &[u8], subround: SubroundId) -> bool {
        self.job_done(public_key, subround).unwrap_or(false)
    }

    pub fn is_self_job_done(&self, subround: SubroundId) -> bool {
        self.self_job_done(subround).unwrap_or(false)
    }

    pub fn is_leader_job_done(&self, subround: SubroundId) -> bool {
        match self.get_leader() {
            Ok(leader) => self.is_job_done(&leader, subround),
            Err(_) => false,
        }
    }

    /// Whether every consensus group member managed by this node finished its job in `subround`.
    pub fn is_multi_key_job_done(&self, subround: SubroundId) -> bool {
        self.consensus_group()
            .iter()
            .filter(|pk| self.is_key_managed_by_self(pk))
            .all(|pk| self.is_job_done(pk, subround))
    }

    /// Whether this node still has work to do in `subround`: a block was proposed, some key this node
    /// speaks for has not done its job, the subround is not finished, and the round is not canceled.
    pub fn can_do_subround_job(&self, subround: SubroundId) -> bool {
        if self.round_canceled() {
            return false;
        }
        if !self.is_consensus_data_set() {
            return false;
        }

        let self_pub_key = self.self_pub_key();
        let self_job_done = !self.is_node_in_consensus_group(&self_pub_key)
            || self.is_self_job_done(subround);
        let multi_key_job_done =
            !self.is_multi_key_in_consensus_group() || self.is_multi_key_job_done(subround);
        if self_job_done && multi_key_job_done {
            return false;
        }

        !self.is_subround_finished(subround)
    }

    /// Whether a received message belongs to this round, comes from another node, and targets a
    /// subround that is still open.
    pub fn can_process_received_message(
        &self,
        message: &ConsensusMessage,
        current_round_index: i64,
        subround: SubroundId,
    ) -> bool {
        if self.is_node_self(&message.pub_key) {
            return false;
        }
        if current_round_index != message.round_index {
            return false;
        }
        !self.is_subround_finished(subround)
    }

    /// Bitmap with bit `i` set when the `i`-th consensus group member finished its job in `subround`.
    /// The bitmap is `ceil(consensus group size / 8)` bytes long.
    pub fn generate_bitmap(&self, subround: SubroundId) -> Vec<u8> {
        let consensus_group = self.consensus_group();
        let mut bitmap = vec![0u8; (consensus_group.len() + 7) / 8];
        for (i, public_key) in consensus_group.iter().enumerate() {
            if self.is_job_done(public_key, subround) {
                bitmap[i / 8] |= 1 << (i % 8);
            }
        }
        bitmap
    }

    /// Computes the consensus group of `round` from `randomness`. Returns the leader and the group.
    pub fn get_next_consensus_group(
        &self,
        randomness: &[u8],
        round: u64,
        shard_id: ShardID,
        nodes_coordinator: &dyn NodesCoordinator,
        epoch: u32,
    ) -> Result<(PublicKeyBytes, Vec<PublicKeyBytes>), ConsensusError> {
        let (leader, consensus_group) =
            nodes_coordinator.compute_consensus_group(randomness, round, shard_id, epoch)?;
        Ok((leader, consensus_group))
    }

    pub fn reset_rounds_without_received_messages(&self, public_key: &[u8], pid: &PeerID) {
        self.round_consensus
            .keys_handler()
            .reset_rounds_without_received_messages(public_key, pid)
    }
}

impl Deref for ConsensusState {
    type Target = RoundConsensus;

    fn deref(&self) -> &RoundConsensus {
        &self.round_consensus
    }
}

/// Shared handle to the consensus state.
pub type SharedConsensusState = Arc<ConsensusState>;

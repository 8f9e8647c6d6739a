/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Membership of the current round's consensus group and the job each member has done.
//!
//! Main type: [`RoundConsensus`].

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::consensus::errors::ConsensusError;
use crate::consensus::subround::SubroundId;
use crate::pluggables::crypto::KeysHandler;
use crate::types::data_types::PublicKeyBytes;

/// Job-done bits of a single consensus group member, one per subround.
#[derive(Clone, Copy, Default)]
struct RoundState {
    job_done: [bool; SubroundId::COUNT],
}

#[derive(Default)]
struct Group {
    consensus_group: Vec<PublicKeyBytes>,
    leader: PublicKeyBytes,
    validator_round_states: HashMap<PublicKeyBytes, RoundState>,
}

/// Tracks which validators form the consensus group of the current round, which of them leads it,
/// and which subround jobs each of them has completed.
///
/// All methods take `&self`: membership and job-done bits are written both by the chronology thread
/// and by the threads delivering received messages, and are guarded by internal read-write locks.
pub struct RoundConsensus {
    eligible_nodes: RwLock<HashSet<PublicKeyBytes>>,
    group: RwLock<Group>,
    consensus_group_size: RwLock<usize>,
    self_pub_key: RwLock<PublicKeyBytes>,
    keys_handler: Arc<dyn KeysHandler>,
}

impl RoundConsensus {
    pub fn new(
        eligible_nodes: HashSet<PublicKeyBytes>,
        consensus_group_size: usize,
        self_pub_key: PublicKeyBytes,
        keys_handler: Option<Arc<dyn KeysHandler>>,
    ) -> Result<RoundConsensus, ConsensusError> {
        let keys_handler = keys_handler.ok_or(ConsensusError::NilKeysHandler)?;

        Ok(RoundConsensus {
            eligible_nodes: RwLock::new(eligible_nodes),
            group: RwLock::new(Group::default()),
            consensus_group_size: RwLock::new(consensus_group_size),
            self_pub_key: RwLock::new(self_pub_key),
            keys_handler,
        })
    }

    /// Position of `public_key` in the consensus group.
    pub fn consensus_group_index(&self, public_key: &[u8]) -> Result<usize, ConsensusError> {
        self.group
            .read()
            .consensus_group
            .iter()
            .position(|pk| pk.as_slice() == public_key)
            .ok_or(ConsensusError::NotFoundInConsensus)
    }

    pub fn self_consensus_group_index(&self) -> Result<usize, ConsensusError> {
        let self_pub_key = self.self_pub_key();
        self.consensus_group_index(&self_pub_key)
    }

    pub fn set_eligible_list(&self, eligible_nodes: HashSet<PublicKeyBytes>) {
        *self.eligible_nodes.write() = eligible_nodes;
    }

    pub fn consensus_group(&self) -> Vec<PublicKeyBytes> {
        self.group.read().consensus_group.clone()
    }

    /// Replaces the consensus group. Every member starts with no job done.
    pub fn set_consensus_group(&self, consensus_group: Vec<PublicKeyBytes>) {
        let mut group = self.group.write();
        group.validator_round_states = consensus_group
            .iter()
            .map(|pk| (pk.clone(), RoundState::default()))
            .collect();
        group.consensus_group = consensus_group;
    }

    pub fn leader(&self) -> PublicKeyBytes {
        self.group.read().leader.clone()
    }

    pub fn set_leader(&self, leader: PublicKeyBytes) {
        self.group.write().leader = leader;
    }

    pub fn consensus_group_size(&self) -> usize {
        *self.consensus_group_size.read()
    }

    pub fn set_consensus_group_size(&self, consensus_group_size: usize) {
        *self.consensus_group_size.write() = consensus_group_size;
    }

    pub fn self_pub_key(&self) -> PublicKeyBytes {
        self.self_pub_key.read().clone()
    }

    pub fn set_self_pub_key(&self, self_pub_key: PublicKeyBytes) {
        *self.self_pub_key.write() = self_pub_key;
    }

    /// Whether `public_key` finished its job in `subround`. Fails if `public_key` is not in the group.
    pub fn job_done(&self, public_key: &[u8], subround: SubroundId) -> Result<bool, ConsensusError> {
        self.group
            .read()
            .validator_round_states
            .get(public_key)
            .map(|state| state.job_done[subround.index()])
            .ok_or(ConsensusError::InvalidKey)
    }

    pub fn set_job_done(
        &self,
        public_key: &[u8],
        subround: SubroundId,
        value: bool,
    ) -> Result<(), ConsensusError> {
        let mut group = self.group.write();
        let state = group
            .validator_round_states
            .get_mut(public_key)
            .ok_or(ConsensusError::InvalidKey)?;
        state.job_done[subround.index()] = value;
        Ok(())
    }

    pub fn self_job_done(&self, subround: SubroundId) -> Result<bool, ConsensusError> {
        let self_pub_key = self.self_pub_key();
        self.job_done(&self_pub_key, subround)
    }

    pub fn is_node_in_consensus_group(&self, public_key: &[u8]) -> bool {
        self.group
            .read()
            .consensus_group
            .iter()
            .any(|pk| pk.as_slice() == public_key)
    }

    pub fn is_node_in_eligible_list(&self, public_key: &[u8]) -> bool {
        self.eligible_nodes.read().contains(public_key)
    }

    /// Number of consensus group members that finished their job in `subround`.
    pub fn compute_size(&self, subround: SubroundId) -> usize {
        let group = self.group.read();
        group
            .consensus_group
            .iter()
            .filter_map(|pk| group.validator_round_states.get(pk))
            .filter(|state| state.job_done[subround.index()])
            .count()
    }

    /// Clears the job-done bits of every member, keeping the group itself.
    pub fn reset_round_state(&self) {
        let mut group = self.group.write();
        group
            .validator_round_states
            .values_mut()
            .for_each(|state| *state = RoundState::default());
    }

    /// Whether any member of the consensus group is a key managed by this node.
    pub fn is_multi_key_in_consensus_group(&self) -> bool {
        self.consensus_group()
            .iter()
            .any(|pk| self.is_key_managed_by_self(pk))
    }

    pub fn is_key_managed_by_self(&self, public_key: &[u8]) -> bool {
        self.keys_handler.is_key_managed_by_current_node(public_key)
    }

    pub fn increment_rounds_without_received_messages(&self, public_key: &[u8]) {
        self.keys_handler
            .increment_rounds_without_received_messages(public_key)
    }

    pub fn keys_handler(&self) -> &Arc<dyn KeysHandler> {
        &self.keys_handler
    }
}

/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Records the headers this node hears about and decides whether its chain forked.
//!
//! Main type: [`BaseForkDetector`].
//!
//! ## Header records
//!
//! Every header passed to [`add_header`](ForkDetector::add_header) is recorded under its nonce, together
//! with the [`BlockHeaderState`] it was seen in. The same hash may be recorded more than once under
//! different states (e.g., first [`Received`](BlockHeaderState::Received) and then
//! [`Processed`](BlockHeaderState::Processed)), but never twice with the same state.
//!
//! ## Checkpoints
//!
//! The detector keeps two checkpoints of the chain this node follows:
//! - The **last checkpoint**: the last header this node processed.
//! - The **final checkpoint**: the highest header that can no longer be reverted.
//!
//! The final checkpoint never exceeds the last one. How the final checkpoint moves depends on the chain,
//! and is decided by the [`CheckpointStrategy`] the detector was built with:
//!
//! |Chain|Constructor|Final checkpoint|
//! |---|---|---|
//! |Shard|[`new_shard_fork_detector`]|Highest processed header that the metachain notarized.|
//! |Metachain|[`new_meta_fork_detector`]|The previous last checkpoint.|
//!
//! On both chains, once equivalent proofs are enabled, every processed header is final at once.
//!
//! ## Forks
//!
//! [`check_fork`](ForkDetector::check_fork) reports a fork when, at some nonce, the header this node
//! processed lost against another recorded header. A header notarized by the metachain, or carrying an
//! equivalent proof, beats any header that is not. Otherwise the header of the lower round wins, and the
//! lower hash breaks ties. A fork is also reported when consensus has not committed a block for
//! [`MAX_ROUNDS_WITHOUT_COMMITTED_BLOCK`] rounds, or when a roll back was requested through
//! [`set_roll_back_nonce`](ForkDetector::set_roll_back_nonce).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use typed_builder::TypedBuilder;

use crate::pluggables::pools::{BlockTracker, ProofsPool, TimeCacher};
use crate::pluggables::status::EnableEpochsHandler;
use crate::pluggables::timing::RoundHandler;
use crate::sync::errors::ForkDetectorError;
use crate::sync::{BLOCK_FINALITY, MAX_ROUNDS_WITHOUT_COMMITTED_BLOCK, MIN_FORK_ROUND};
use crate::types::block::Header;
use crate::types::data_types::{CryptoHash, ShardID, METACHAIN_SHARD_ID};

pub mod meta;
pub use meta::new_meta_fork_detector;

pub mod shard;
pub use shard::new_shard_fork_detector;

/// How long a header that failed the basic validity checks stays black-listed.
pub const HEADER_BLACKLIST_DURATION: Duration = Duration::from_secs(4 * 60 * 60);

/// How this node came to know about a header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlockHeaderState {
    /// Received from the network, e.g., through the headers pool.
    Received,
    /// Proposed by the leader of a consensus round. Not yet agreed upon.
    Proposed,
    /// Executed and committed by this node.
    Processed,
    /// Notarized by another chain.
    Notarized,
}

/// A header recorded by the fork detector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderInfo {
    pub epoch: u32,
    pub nonce: u64,
    pub round: u64,
    pub hash: CryptoHash,
    pub state: BlockHeaderState,
    /// Whether an equivalent proof for the header was in the proofs pool when it was recorded.
    pub has_proof: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Checkpoint {
    pub nonce: u64,
    pub round: u64,
    pub hash: CryptoHash,
}

/// Result of [`check_fork`](ForkDetector::check_fork).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForkInfo {
    pub is_detected: bool,
    /// Lowest nonce at which the fork starts. `u64::MAX` when no fork was detected.
    pub nonce: u64,
    /// Round of the header that should replace this node's. [`MIN_FORK_ROUND`] when it is notarized or
    /// finalized by a proof.
    pub round: u64,
    /// Hash of the header that should replace this node's, if there is one to follow.
    pub hash: Option<CryptoHash>,
}

impl ForkInfo {
    pub fn not_detected() -> ForkInfo {
        ForkInfo {
            is_detected: false,
            nonce: u64::MAX,
            round: u64::MAX,
            hash: None,
        }
    }
}

pub trait ForkDetector: Send + Sync {
    /// Records `header` with the given state. `self_notarized_headers` and `self_notarized_hashes` are
    /// headers of this shard notarized by the metachain and arriving together with a processed header.
    fn add_header(
        &self,
        header: Option<&Header>,
        hash: &CryptoHash,
        state: BlockHeaderState,
        self_notarized_headers: &[Header],
        self_notarized_hashes: &[CryptoHash],
    ) -> Result<(), ForkDetectorError>;

    /// Forgets the header with `hash` at `nonce`, and every checkpoint from `nonce` on.
    fn remove_header(&self, nonce: u64, hash: &CryptoHash);

    fn check_fork(&self) -> ForkInfo;

    fn get_highest_final_block_nonce(&self) -> u64;

    fn get_highest_final_block_hash(&self) -> CryptoHash;

    /// Highest nonce the network is believed to have reached.
    fn probable_highest_nonce(&self) -> u64;

    /// Drops received headers above the last checkpoint and recomputes the probable highest nonce.
    fn reset_probable_highest_nonce(&self);

    /// Like [`reset_probable_highest_nonce`](Self::reset_probable_highest_nonce), but also records that
    /// a fork was resolved in the current round.
    fn reset_fork(&self);

    /// Makes the next [`check_fork`](Self::check_fork) report a fork at `nonce`.
    fn set_roll_back_nonce(&self, nonce: u64);

    fn restore_to_genesis(&self);

    /// Hash of the header notarized by another chain at `nonce`, if any.
    fn get_notarized_header_hash(&self, nonce: u64) -> Option<CryptoHash>;

    fn set_final_to_last_checkpoint(&self);

    /// Called when another chain notarized headers of this chain.
    fn received_self_notarized_from_cross_headers(
        &self,
        shard_id: ShardID,
        self_notarized_headers: &[Header],
        self_notarized_hashes: &[CryptoHash],
    );

    fn get_headers(&self, nonce: u64) -> Vec<HeaderInfo>;

    fn last_checkpoint(&self) -> Checkpoint;

    fn final_checkpoint(&self) -> Checkpoint;
}

/// How the checkpoints of a [`BaseForkDetector`] move, which differs between shards and the metachain.
pub trait CheckpointStrategy: Send + Sync {
    /// Called after a processed header was recorded.
    fn on_header_processed(
        &self,
        detector: &BaseForkDetector,
        header: &Header,
        hash: &CryptoHash,
        self_notarized_headers: &[Header],
        self_notarized_hashes: &[CryptoHash],
    );

    fn on_self_notarized_headers(
        &self,
        detector: &BaseForkDetector,
        shard_id: ShardID,
        self_notarized_headers: &[Header],
        self_notarized_hashes: &[CryptoHash],
    );
}

/// Arguments of [`new_shard_fork_detector`] and [`new_meta_fork_detector`].
#[derive(TypedBuilder)]
pub struct ArgBaseForkDetector {
    #[builder(default, setter(strip_option))]
    pub round_handler: Option<Arc<dyn RoundHandler>>,
    #[builder(default, setter(strip_option))]
    pub black_list_handler: Option<Arc<dyn TimeCacher>>,
    #[builder(default, setter(strip_option))]
    pub block_tracker: Option<Arc<dyn BlockTracker>>,
    /// Seconds since the Unix epoch at which round 0 began.
    pub genesis_time: i64,
    #[builder(default, setter(strip_option))]
    pub enable_epochs_handler: Option<Arc<dyn EnableEpochsHandler>>,
    #[builder(default, setter(strip_option))]
    pub proofs_pool: Option<Arc<dyn ProofsPool>>,
}

struct ForkState {
    checkpoints: Vec<Checkpoint>,
    final_checkpoint: Checkpoint,
    probable_highest_nonce: u64,
    roll_back_nonce: u64,
    last_round_with_forced_fork: i64,
}

/// Fork detector shared by shards and the metachain. Chain-specific behavior is delegated to its
/// [`CheckpointStrategy`].
pub struct BaseForkDetector {
    round_handler: Arc<dyn RoundHandler>,
    black_list_handler: Arc<dyn TimeCacher>,
    pub(crate) block_tracker: Arc<dyn BlockTracker>,
    genesis_time: i64,
    genesis: Checkpoint,
    pub(crate) enable_epochs_handler: Arc<dyn EnableEpochsHandler>,
    pub(crate) proofs_pool: Arc<dyn ProofsPool>,
    headers: RwLock<HashMap<u64, Vec<HeaderInfo>>>,
    fork: RwLock<ForkState>,
    strategy: Box<dyn CheckpointStrategy>,
}

impl BaseForkDetector {
    pub(crate) fn new(
        args: ArgBaseForkDetector,
        strategy: Box<dyn CheckpointStrategy>,
    ) -> Result<BaseForkDetector, ForkDetectorError> {
        let round_handler = args
            .round_handler
            .ok_or(ForkDetectorError::NilRoundHandler)?;
        let black_list_handler = args
            .black_list_handler
            .ok_or(ForkDetectorError::NilBlackListCacher)?;
        let block_tracker = args
            .block_tracker
            .ok_or(ForkDetectorError::NilBlockTracker)?;
        let enable_epochs_handler = args
            .enable_epochs_handler
            .ok_or(ForkDetectorError::NilEnableEpochsHandler)?;
        let proofs_pool = args.proofs_pool.ok_or(ForkDetectorError::NilProofsPool)?;

        let (genesis_header, genesis_hash) = block_tracker
            .get_self_notarized_header(METACHAIN_SHARD_ID, 0)
            .ok_or(ForkDetectorError::MissingGenesisHeader)?;
        let genesis = Checkpoint {
            nonce: genesis_header.nonce,
            round: genesis_header.round,
            hash: genesis_hash,
        };

        Ok(BaseForkDetector {
            round_handler,
            black_list_handler,
            block_tracker,
            genesis_time: args.genesis_time,
            genesis: genesis.clone(),
            enable_epochs_handler,
            proofs_pool,
            headers: RwLock::new(HashMap::new()),
            fork: RwLock::new(ForkState::at_genesis(genesis)),
            strategy,
        })
    }

    /* ↓↓↓ Checkpoints ↓↓↓ */

    pub(crate) fn add_checkpoint(&self, checkpoint: Checkpoint) {
        self.fork.write().checkpoints.push(checkpoint);
    }

    /// Moves the final checkpoint. A checkpoint above the last checkpoint is ignored.
    pub(crate) fn set_final_checkpoint(&self, checkpoint: Checkpoint) {
        let mut fork = self.fork.write();
        let last_nonce = fork.last_checkpoint().nonce;
        if checkpoint.nonce > last_nonce {
            log::debug!(
                "final checkpoint with nonce {} is above the last checkpoint with nonce {}",
                checkpoint.nonce,
                last_nonce
            );
            return;
        }
        fork.final_checkpoint = checkpoint;
    }

    /* ↓↓↓ Header records ↓↓↓ */

    /// Records `header_info` unless the same hash is already recorded with the same state. Returns
    /// whether it was recorded.
    pub(crate) fn append(&self, header_info: HeaderInfo) -> bool {
        let mut headers = self.headers.write();
        let header_infos = headers.entry(header_info.nonce).or_default();
        let already_recorded = header_infos
            .iter()
            .any(|stored| stored.hash == header_info.hash && stored.state == header_info.state);
        if already_recorded {
            return false;
        }

        header_infos.push(header_info);
        true
    }

    /// Drops headers and checkpoints behind the final checkpoint, and received headers that could not
    /// extend it.
    pub(crate) fn remove_past_or_invalid_records(&self) {
        let final_checkpoint = self.final_checkpoint();

        let mut headers = self.headers.write();
        headers.retain(|nonce, _| *nonce >= final_checkpoint.nonce);
        for header_infos in headers.values_mut() {
            header_infos.retain(|header_info| {
                let round_dif = header_info.round as i128 - final_checkpoint.round as i128;
                let nonce_dif = header_info.nonce as i128 - final_checkpoint.nonce as i128;
                !(header_info.state == BlockHeaderState::Received && round_dif < nonce_dif)
            });
        }
        headers.retain(|_, header_infos| !header_infos.is_empty());
        drop(headers);

        self.fork
            .write()
            .checkpoints
            .retain(|checkpoint| checkpoint.nonce >= final_checkpoint.nonce);
    }

    /// The highest processed header that was also notarized by the metachain, with the same hash.
    pub(crate) fn highest_processed_and_notarized(&self) -> Option<Checkpoint> {
        let headers = self.headers.read();
        let mut highest: Option<Checkpoint> = None;
        for (nonce, header_infos) in headers.iter() {
            if highest.as_ref().is_some_and(|checkpoint| checkpoint.nonce >= *nonce) {
                continue;
            }

            let processed = header_infos
                .iter()
                .rev()
                .find(|header_info| header_info.state == BlockHeaderState::Processed);
            let notarized = header_infos
                .iter()
                .rev()
                .find(|header_info| header_info.state == BlockHeaderState::Notarized);
            if let (Some(processed), Some(notarized)) = (processed, notarized) {
                if processed.hash == notarized.hash {
                    highest = Some(Checkpoint {
                        nonce: *nonce,
                        round: notarized.round,
                        hash: notarized.hash.clone(),
                    });
                }
            }
        }

        highest
    }

    /* ↓↓↓ Validity ↓↓↓ */

    fn is_header_received_too_late(&self, header: &Header, state: BlockHeaderState) -> bool {
        if state == BlockHeaderState::Processed || header.is_start_of_epoch_block() {
            return false;
        }

        let final_round = self.final_checkpoint().round as i128;
        (header.round as i128) < final_round - BLOCK_FINALITY as i128
    }

    fn check_block_basic_validity(
        &self,
        header: &Header,
        hash: &CryptoHash,
    ) -> Result<(), ForkDetectorError> {
        let final_checkpoint = self.final_checkpoint();
        let round_dif = header.round as i128 - final_checkpoint.round as i128;
        let nonce_dif = header.nonce as i128 - final_checkpoint.nonce as i128;
        let next_round = self.round_handler.index() as i128 + 1;

        self.black_list_handler.sweep();
        if self.black_list_handler.has(&header.prev_hash) {
            self.add_to_black_list(hash);
            return Err(ForkDetectorError::HeaderIsBlackListed);
        }
        if self.genesis_time_from_header(header) != self.genesis_time {
            self.add_to_black_list(hash);
            return Err(ForkDetectorError::GenesisTimeMissmatch);
        }
        if round_dif < 0 {
            return Err(ForkDetectorError::LowerRoundInBlock);
        }
        if nonce_dif < 0 {
            return Err(ForkDetectorError::LowerNonceInBlock);
        }
        if header.round as i128 > next_round {
            return Err(ForkDetectorError::HigherRoundInBlock);
        }
        if round_dif < nonce_dif {
            self.add_to_black_list(hash);
            return Err(ForkDetectorError::HigherNonceInBlock);
        }

        Ok(())
    }

    fn genesis_time_from_header(&self, header: &Header) -> i64 {
        let rounds_since_genesis = header.round as i128 - self.genesis.round as i128;
        let round_secs = self.round_handler.time_duration().as_secs() as i128;
        let genesis_time = (header.timestamp as i128)
            .saturating_sub(rounds_since_genesis.saturating_mul(round_secs));
        i64::try_from(genesis_time).unwrap_or(i64::MIN)
    }

    fn add_to_black_list(&self, hash: &CryptoHash) {
        if hash.is_empty() {
            return;
        }
        self.black_list_handler
            .upsert(hash.clone(), HEADER_BLACKLIST_DURATION);
    }

    /* ↓↓↓ Fork choice ↓↓↓ */

    fn compute_probable_highest_nonce(&self) -> u64 {
        let final_nonce = self.final_checkpoint().nonce;
        self.headers
            .read()
            .values()
            .flat_map(|header_infos| header_infos.iter())
            .map(|header_info| {
                // A proposed header was not agreed upon yet. Only its parent is.
                if header_info.state == BlockHeaderState::Proposed && header_info.nonce > 1 {
                    header_info.nonce - 1
                } else {
                    header_info.nonce
                }
            })
            .fold(final_nonce, u64::max)
    }

    fn set_probable_highest_nonce(&self, nonce: u64) {
        self.fork.write().probable_highest_nonce = nonce;
    }

    fn cleanup_received_headers_higher_than_nonce(&self, nonce: u64) {
        let mut headers = self.headers.write();
        for (header_nonce, header_infos) in headers.iter_mut() {
            if *header_nonce <= nonce {
                continue;
            }
            header_infos.retain(|header_info| header_info.state == BlockHeaderState::Notarized);
        }
        headers.retain(|_, header_infos| !header_infos.is_empty());
    }

    fn is_consensus_stuck(&self) -> bool {
        let last_checkpoint = self.last_checkpoint();
        if last_checkpoint.nonce < self.probable_highest_nonce() {
            return false;
        }

        let round_index = self.round_handler.index();
        if self.fork.read().last_round_with_forced_fork == round_index {
            return false;
        }

        let rounds_without_block = round_index as i128 - last_checkpoint.round as i128;
        rounds_without_block > MAX_ROUNDS_WITHOUT_COMMITTED_BLOCK as i128
    }

    /// The best header at a nonce among those this node did not process itself.
    fn best_fork_candidate(header_infos: &[HeaderInfo]) -> Option<(u32, u64, CryptoHash)> {
        let mut best: Option<(u32, u64, CryptoHash)> = None;
        for header_info in header_infos {
            if matches!(
                header_info.state,
                BlockHeaderState::Processed | BlockHeaderState::Proposed
            ) {
                continue;
            }

            let round = if header_info.state == BlockHeaderState::Notarized || header_info.has_proof
            {
                MIN_FORK_ROUND
            } else {
                header_info.round
            };

            let is_better = match &best {
                None => true,
                Some((_, best_round, best_hash)) => {
                    round < *best_round || (round == *best_round && header_info.hash < *best_hash)
                }
            };
            if is_better {
                best = Some((header_info.epoch, round, header_info.hash.clone()));
            }
        }

        best
    }

    fn should_signal_fork(
        processed: &HeaderInfo,
        processed_round: u64,
        (fork_epoch, fork_round, fork_hash): &(u32, u64, CryptoHash),
    ) -> bool {
        if processed.hash == *fork_hash {
            return false;
        }

        *fork_epoch > processed.epoch
            || processed_round > *fork_round
            || (processed_round == *fork_round && processed.hash > *fork_hash)
    }
}

impl ForkDetector for BaseForkDetector {
    fn add_header(
        &self,
        header: Option<&Header>,
        hash: &CryptoHash,
        state: BlockHeaderState,
        self_notarized_headers: &[Header],
        self_notarized_hashes: &[CryptoHash],
    ) -> Result<(), ForkDetectorError> {
        let header = header.ok_or(ForkDetectorError::NilHeader)?;
        if hash.is_empty() {
            return Err(ForkDetectorError::NilHash);
        }
        if self.is_header_received_too_late(header, state) {
            log::debug!(
                "header with nonce {} and round {} was received too late",
                header.nonce,
                header.round
            );
            return Ok(());
        }

        self.check_block_basic_validity(header, hash)?;

        let has_proof = self.proofs_pool.has_proof(header.shard_id, hash);
        self.append(HeaderInfo {
            epoch: header.epoch,
            nonce: header.nonce,
            round: header.round,
            hash: hash.clone(),
            state,
            has_proof,
        });

        if state == BlockHeaderState::Processed {
            self.strategy.on_header_processed(
                self,
                header,
                hash,
                self_notarized_headers,
                self_notarized_hashes,
            );
        }

        let probable_highest_nonce = self.compute_probable_highest_nonce();
        self.set_probable_highest_nonce(probable_highest_nonce);

        log::debug!(
            "fork detector added header: nonce {}, round {}, state {:?}, probable highest nonce {}",
            header.nonce,
            header.round,
            state,
            probable_highest_nonce
        );

        Ok(())
    }

    fn remove_header(&self, nonce: u64, hash: &CryptoHash) {
        let mut headers = self.headers.write();
        if let Some(header_infos) = headers.get_mut(&nonce) {
            header_infos.retain(|header_info| header_info.hash != *hash);
            if header_infos.is_empty() {
                headers.remove(&nonce);
            }
        }
        drop(headers);

        let mut fork = self.fork.write();
        fork.checkpoints.retain(|checkpoint| checkpoint.nonce < nonce);
        if fork.checkpoints.is_empty() {
            fork.checkpoints.push(self.genesis.clone());
        }
        let last_checkpoint = fork.last_checkpoint();
        if fork.final_checkpoint.nonce > last_checkpoint.nonce {
            fork.final_checkpoint = last_checkpoint;
        }
        drop(fork);

        let probable_highest_nonce = self.compute_probable_highest_nonce();
        self.set_probable_highest_nonce(probable_highest_nonce);
    }

    fn check_fork(&self) -> ForkInfo {
        if self.is_consensus_stuck() {
            return ForkInfo {
                is_detected: true,
                nonce: self.last_checkpoint().nonce,
                round: MIN_FORK_ROUND,
                hash: None,
            };
        }

        let mut fork_info = ForkInfo::not_detected();

        {
            let mut fork = self.fork.write();
            if fork.roll_back_nonce != u64::MAX {
                fork_info.is_detected = true;
                fork_info.nonce = fork.roll_back_nonce;
                fork.roll_back_nonce = u64::MAX;
            }
        }

        let headers = self.headers.read();
        for (nonce, header_infos) in headers.iter() {
            if header_infos.len() < 2 {
                continue;
            }

            let Some(processed) = header_infos
                .iter()
                .rev()
                .find(|header_info| header_info.state == BlockHeaderState::Processed)
            else {
                continue;
            };
            let notarized = header_infos.iter().any(|header_info| {
                header_info.state == BlockHeaderState::Notarized && header_info.hash == processed.hash
            });
            let processed_round = if processed.has_proof || notarized {
                MIN_FORK_ROUND
            } else {
                processed.round
            };

            let Some(candidate) = Self::best_fork_candidate(header_infos) else {
                continue;
            };
            if !Self::should_signal_fork(processed, processed_round, &candidate) {
                continue;
            }

            fork_info.is_detected = true;
            if *nonce < fork_info.nonce {
                fork_info.nonce = *nonce;
                fork_info.round = candidate.1;
                fork_info.hash = Some(candidate.2);
            }
        }

        fork_info
    }

    fn get_highest_final_block_nonce(&self) -> u64 {
        self.final_checkpoint().nonce
    }

    fn get_highest_final_block_hash(&self) -> CryptoHash {
        self.final_checkpoint().hash
    }

    fn probable_highest_nonce(&self) -> u64 {
        self.fork.read().probable_highest_nonce
    }

    fn reset_probable_highest_nonce(&self) {
        self.cleanup_received_headers_higher_than_nonce(self.last_checkpoint().nonce);
        let probable_highest_nonce = self.compute_probable_highest_nonce();
        self.set_probable_highest_nonce(probable_highest_nonce);
    }

    fn reset_fork(&self) {
        self.reset_probable_highest_nonce();
        self.fork.write().last_round_with_forced_fork = self.round_handler.index();

        log::debug!(
            "fork detector reset fork: last checkpoint nonce {}, probable highest nonce {}",
            self.last_checkpoint().nonce,
            self.probable_highest_nonce()
        );
    }

    fn set_roll_back_nonce(&self, nonce: u64) {
        self.fork.write().roll_back_nonce = nonce;
    }

    fn restore_to_genesis(&self) {
        self.headers.write().clear();
        *self.fork.write() = ForkState::at_genesis(self.genesis.clone());
    }

    fn get_notarized_header_hash(&self, nonce: u64) -> Option<CryptoHash> {
        self.headers.read().get(&nonce).and_then(|header_infos| {
            header_infos
                .iter()
                .find(|header_info| header_info.state == BlockHeaderState::Notarized)
                .map(|header_info| header_info.hash.clone())
        })
    }

    fn set_final_to_last_checkpoint(&self) {
        let mut fork = self.fork.write();
        fork.final_checkpoint = fork.last_checkpoint();
    }

    fn received_self_notarized_from_cross_headers(
        &self,
        shard_id: ShardID,
        self_notarized_headers: &[Header],
        self_notarized_hashes: &[CryptoHash],
    ) {
        self.strategy.on_self_notarized_headers(
            self,
            shard_id,
            self_notarized_headers,
            self_notarized_hashes,
        );
    }

    fn get_headers(&self, nonce: u64) -> Vec<HeaderInfo> {
        self.headers
            .read()
            .get(&nonce)
            .cloned()
            .unwrap_or_default()
    }

    fn last_checkpoint(&self) -> Checkpoint {
        self.fork.read().last_checkpoint()
    }

    fn final_checkpoint(&self) -> Checkpoint {
        self.fork.read().final_checkpoint.clone()
    }
}

impl ForkState {
    fn at_genesis(genesis: Checkpoint) -> ForkState {
        ForkState {
            probable_highest_nonce: genesis.nonce,
            checkpoints: vec![genesis.clone()],
            final_checkpoint: genesis,
            roll_back_nonce: u64::MAX,
            last_round_with_forced_fork: i64::MIN,
        }
    }

    fn last_checkpoint(&self) -> Checkpoint {
        self.checkpoints
            .last()
            .cloned()
            .unwrap_or_else(|| self.final_checkpoint.clone())
    }
}

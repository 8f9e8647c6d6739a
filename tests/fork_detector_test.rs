use std::sync::Arc;
use std::time::Duration;

use log::LevelFilter;

use spos_rs::sync::errors::ForkDetectorError;
use spos_rs::sync::fork_detector::{
    new_meta_fork_detector, new_shard_fork_detector, ArgBaseForkDetector, BaseForkDetector,
    BlockHeaderState, ForkDetector,
};
use spos_rs::sync::MIN_FORK_ROUND;
use spos_rs::types::block::Header;
use spos_rs::types::data_types::{CryptoHash, ShardID, METACHAIN_SHARD_ID};

mod common;

use common::{
    chain::{genesis_header, hash_of, make_chain, make_header},
    logging::setup_logger,
    pools::{MemBlockTracker, MemProofsPool, MemTimeCacher},
    status::MockEnableEpochs,
    timing::ManualRoundHandler,
};

struct Detector {
    detector: Arc<BaseForkDetector>,
    block_tracker: Arc<MemBlockTracker>,
    round_handler: Arc<ManualRoundHandler>,
    genesis: Header,
}

fn args(
    shard_id: ShardID,
    round_index: i64,
    andromeda_epoch: Option<u32>,
) -> (ArgBaseForkDetector, Arc<MemBlockTracker>, Arc<ManualRoundHandler>, Header) {
    let genesis = genesis_header(shard_id);
    let block_tracker = Arc::new(MemBlockTracker::new(Some((
        genesis.clone(),
        hash_of(&genesis),
    ))));
    let round_handler = Arc::new(ManualRoundHandler::new(round_index, Duration::from_secs(1)));
    let args = ArgBaseForkDetector::builder()
        .round_handler(round_handler.clone())
        .black_list_handler(Arc::new(MemTimeCacher::default()))
        .block_tracker(block_tracker.clone())
        .genesis_time(0)
        .enable_epochs_handler(Arc::new(MockEnableEpochs { andromeda_epoch }))
        .proofs_pool(Arc::new(MemProofsPool::default()))
        .build();
    (args, block_tracker, round_handler, genesis)
}

fn shard_detector(round_index: i64, andromeda_epoch: Option<u32>) -> Detector {
    let (args, block_tracker, round_handler, genesis) = args(0, round_index, andromeda_epoch);
    Detector {
        detector: new_shard_fork_detector(args).unwrap(),
        block_tracker,
        round_handler,
        genesis,
    }
}

fn meta_detector(round_index: i64, andromeda_epoch: Option<u32>) -> Detector {
    let (args, block_tracker, round_handler, genesis) =
        args(METACHAIN_SHARD_ID, round_index, andromeda_epoch);
    Detector {
        detector: new_meta_fork_detector(args).unwrap(),
        block_tracker,
        round_handler,
        genesis,
    }
}

fn add(
    detector: &dyn ForkDetector,
    header: &Header,
    hash: &CryptoHash,
    state: BlockHeaderState,
) -> Result<(), ForkDetectorError> {
    detector.add_header(Some(header), hash, state, &[], &[])
}

#[test]
fn constructor_errors_test() {
    setup_logger(LevelFilter::Trace);

    // 1. A missing collaborator is reported.
    let missing_round_handler = ArgBaseForkDetector::builder().genesis_time(0).build();
    assert_eq!(
        new_shard_fork_detector(missing_round_handler).err(),
        Some(ForkDetectorError::NilRoundHandler)
    );

    // 2. A block tracker that does not know the genesis header is rejected.
    let (mut args, _, _, _) = args(0, 0, None);
    args.block_tracker = Some(Arc::new(MemBlockTracker::new(None)));
    assert_eq!(
        new_shard_fork_detector(args).err(),
        Some(ForkDetectorError::MissingGenesisHeader)
    );
}

#[test]
fn add_header_rejects_invalid_headers_test() {
    setup_logger(LevelFilter::Trace);

    // 1. Initialize a shard fork detector in round 5.
    let Detector {
        detector, genesis, ..
    } = shard_detector(5, None);
    let genesis_hash = hash_of(&genesis);

    // 2. Missing header or hash.
    assert_eq!(
        detector.add_header(None, &genesis_hash, BlockHeaderState::Received, &[], &[]),
        Err(ForkDetectorError::NilHeader)
    );
    let header = make_header(0, 1, 1, genesis_hash.clone());
    assert_eq!(
        add(detector.as_ref(), &header, &CryptoHash::default(), BlockHeaderState::Received),
        Err(ForkDetectorError::NilHash)
    );

    // 3. A header from a round further than the next one.
    let from_the_future = make_header(0, 1, 7, genesis_hash.clone());
    assert_eq!(
        add(detector.as_ref(), &from_the_future, &hash_of(&from_the_future), BlockHeaderState::Received),
        Err(ForkDetectorError::HigherRoundInBlock)
    );

    // 4. A header whose timestamp does not fit the genesis time.
    let mut wrong_time = make_header(0, 1, 1, genesis_hash.clone());
    wrong_time.timestamp = 100;
    assert_eq!(
        add(detector.as_ref(), &wrong_time, &hash_of(&wrong_time), BlockHeaderState::Received),
        Err(ForkDetectorError::GenesisTimeMissmatch)
    );

    // 5. A header with more nonces than rounds above the final checkpoint is black-listed, and so is
    //    every header built on top of it.
    let too_many_nonces = make_header(0, 3, 2, genesis_hash);
    let too_many_nonces_hash = hash_of(&too_many_nonces);
    assert_eq!(
        add(detector.as_ref(), &too_many_nonces, &too_many_nonces_hash, BlockHeaderState::Received),
        Err(ForkDetectorError::HigherNonceInBlock)
    );
    let child = make_header(0, 4, 3, too_many_nonces_hash);
    assert_eq!(
        add(detector.as_ref(), &child, &hash_of(&child), BlockHeaderState::Received),
        Err(ForkDetectorError::HeaderIsBlackListed)
    );

    // 6. Nothing was recorded.
    assert!(detector.get_headers(1).is_empty());
    assert_eq!(detector.probable_highest_nonce(), 0);
}

#[test]
fn add_header_rejects_headers_at_the_top_of_the_range_test() {
    setup_logger(LevelFilter::Trace);

    // 1. Initialize a metachain fork detector in round 5.
    let Detector {
        detector, genesis, ..
    } = meta_detector(5, None);
    let genesis_hash = hash_of(&genesis);

    // 2. A nonce in the upper half of the u64 range is still further than the rounds allow.
    let huge_nonce = make_header(METACHAIN_SHARD_ID, 1 << 63, 4, genesis_hash.clone());
    assert_eq!(
        add(detector.as_ref(), &huge_nonce, &hash_of(&huge_nonce), BlockHeaderState::Received),
        Err(ForkDetectorError::HigherNonceInBlock)
    );

    // 3. So is the largest round.
    let huge_round = make_header(METACHAIN_SHARD_ID, 1, u64::MAX, genesis_hash);
    assert_eq!(
        add(detector.as_ref(), &huge_round, &hash_of(&huge_round), BlockHeaderState::Received),
        Err(ForkDetectorError::HigherRoundInBlock)
    );

    // 4. Nothing was recorded.
    assert!(detector.get_headers(1 << 63).is_empty());
    assert_eq!(detector.probable_highest_nonce(), 0);
}

#[test]
fn add_header_is_idempotent_per_state_test() {
    setup_logger(LevelFilter::Trace);

    let Detector {
        detector, genesis, ..
    } = shard_detector(1, None);
    let (header, hash) = make_chain(&genesis, 1).remove(0);

    // 1. Adding the same header twice with the same state records it once.
    add(detector.as_ref(), &header, &hash, BlockHeaderState::Received).unwrap();
    add(detector.as_ref(), &header, &hash, BlockHeaderState::Received).unwrap();
    assert_eq!(detector.get_headers(1).len(), 1);

    // 2. The same header with another state is recorded again.
    add(detector.as_ref(), &header, &hash, BlockHeaderState::Processed).unwrap();
    let states: Vec<BlockHeaderState> = detector.get_headers(1).iter().map(|info| info.state).collect();
    assert_eq!(
        states,
        vec![BlockHeaderState::Received, BlockHeaderState::Processed]
    );
}

#[test]
fn processed_headers_move_the_last_checkpoint_test() {
    setup_logger(LevelFilter::Trace);

    // 1. Initialize a shard fork detector in round 5, and a chain of three blocks above genesis.
    let Detector {
        detector, genesis, ..
    } = shard_detector(5, None);
    let chain = make_chain(&genesis, 3);

    // 2. Process the chain.
    for (header, hash) in &chain {
        add(detector.as_ref(), header, hash, BlockHeaderState::Processed).unwrap();
    }

    // 3. The last checkpoint follows the chain, but nothing became final without notarization.
    assert_eq!(detector.last_checkpoint().nonce, 3);
    assert_eq!(detector.last_checkpoint().hash, chain[2].1);
    assert_eq!(detector.get_highest_final_block_nonce(), 0);
    assert_eq!(detector.get_highest_final_block_hash(), hash_of(&genesis));
    assert_eq!(detector.probable_highest_nonce(), 3);

    // 4. A header received from the network raises the probable highest nonce.
    let received = make_chain(&chain[2].0, 2);
    add(detector.as_ref(), &received[1].0, &received[1].1, BlockHeaderState::Received).unwrap();
    assert_eq!(detector.probable_highest_nonce(), 5);

    // 5. Resetting forgets received headers above the last checkpoint.
    detector.reset_probable_highest_nonce();
    assert_eq!(detector.probable_highest_nonce(), 3);
    assert!(detector.get_headers(5).is_empty());
}

#[test]
fn proposed_header_counts_as_its_parent_test() {
    setup_logger(LevelFilter::Trace);

    let Detector {
        detector, genesis, ..
    } = shard_detector(5, None);
    let chain = make_chain(&genesis, 3);

    add(detector.as_ref(), &chain[2].0, &chain[2].1, BlockHeaderState::Proposed).unwrap();
    assert_eq!(detector.probable_highest_nonce(), 2);
}

#[test]
fn shard_final_checkpoint_follows_metachain_notarization_test() {
    setup_logger(LevelFilter::Trace);

    // 1. Initialize a shard fork detector and process three blocks.
    let Detector {
        detector,
        block_tracker,
        genesis,
        ..
    } = shard_detector(5, None);
    let chain = make_chain(&genesis, 3);
    for (header, hash) in &chain {
        add(detector.as_ref(), header, hash, BlockHeaderState::Processed).unwrap();
    }

    // 2. Notarization by another shard is ignored.
    block_tracker.notarize(1, &[chain[1].0.clone()], &[chain[1].1.clone()]);
    assert_eq!(detector.get_highest_final_block_nonce(), 0);

    // 3. The metachain notarizes block 2, which becomes final.
    block_tracker.notarize(
        METACHAIN_SHARD_ID,
        &[chain[1].0.clone()],
        &[chain[1].1.clone()],
    );
    assert_eq!(detector.get_highest_final_block_nonce(), 2);
    assert_eq!(detector.get_highest_final_block_hash(), chain[1].1);
    assert_eq!(detector.get_notarized_header_hash(2), Some(chain[1].1.clone()));

    // 4. The final checkpoint never passes the last checkpoint.
    assert!(detector.final_checkpoint().nonce <= detector.last_checkpoint().nonce);
}

#[test]
fn shard_headers_are_final_at_once_with_equivalent_proofs_test() {
    setup_logger(LevelFilter::Trace);

    let Detector {
        detector, genesis, ..
    } = shard_detector(5, Some(0));
    let chain = make_chain(&genesis, 2);

    for (header, hash) in &chain {
        add(detector.as_ref(), header, hash, BlockHeaderState::Processed).unwrap();
    }

    assert_eq!(detector.get_highest_final_block_nonce(), 2);
    assert_eq!(detector.get_highest_final_block_hash(), chain[1].1);
}

#[test]
fn meta_final_checkpoint_trails_the_last_one_test() {
    setup_logger(LevelFilter::Trace);

    // 1. Without equivalent proofs, a metachain block is final once the next one is processed.
    let Detector {
        detector, genesis, ..
    } = meta_detector(5, None);
    let chain = make_chain(&genesis, 3);
    for (header, hash) in &chain {
        add(detector.as_ref(), header, hash, BlockHeaderState::Processed).unwrap();
    }
    assert_eq!(detector.last_checkpoint().nonce, 3);
    assert_eq!(detector.get_highest_final_block_nonce(), 2);

    // 2. With equivalent proofs, every processed block is final at once.
    let Detector {
        detector, genesis, ..
    } = meta_detector(5, Some(0));
    let chain = make_chain(&genesis, 3);
    for (header, hash) in &chain {
        add(detector.as_ref(), header, hash, BlockHeaderState::Processed).unwrap();
    }
    assert_eq!(detector.get_highest_final_block_nonce(), 3);
}

#[test]
fn header_received_too_late_is_ignored_test() {
    setup_logger(LevelFilter::Trace);

    // 1. Make block 3 final on the metachain.
    let Detector {
        detector, genesis, ..
    } = meta_detector(5, None);
    let chain = make_chain(&genesis, 4);
    for (header, hash) in &chain {
        add(detector.as_ref(), header, hash, BlockHeaderState::Processed).unwrap();
    }
    assert_eq!(detector.final_checkpoint().round, 3);

    // 2. A header from round 1 arrives long after round 1 ended. It is dropped without an error.
    let mut late = make_header(METACHAIN_SHARD_ID, 1, 1, hash_of(&genesis));
    late.rand_seed = vec![9; 32];
    let late_hash = hash_of(&late);
    assert_eq!(
        add(detector.as_ref(), &late, &late_hash, BlockHeaderState::Received),
        Ok(())
    );
    assert!(detector
        .get_headers(1)
        .iter()
        .all(|info| info.hash != late_hash));
}

#[test]
fn fork_detected_for_header_of_lower_round_test() {
    setup_logger(LevelFilter::Trace);

    // 1. This node processed block 1 proposed in round 2.
    let Detector {
        detector, genesis, ..
    } = shard_detector(2, None);
    let processed = make_header(0, 1, 2, hash_of(&genesis));
    let processed_hash = hash_of(&processed);
    add(detector.as_ref(), &processed, &processed_hash, BlockHeaderState::Processed).unwrap();
    assert!(!detector.check_fork().is_detected);

    // 2. The network agreed on another block 1, proposed earlier in round 1.
    let competing = make_header(0, 1, 1, hash_of(&genesis));
    let competing_hash = hash_of(&competing);
    add(detector.as_ref(), &competing, &competing_hash, BlockHeaderState::Received).unwrap();

    // 3. The fork is reported at nonce 1, in favor of the header of round 1.
    let fork_info = detector.check_fork();
    assert!(fork_info.is_detected);
    assert_eq!(fork_info.nonce, 1);
    assert_eq!(fork_info.round, 1);
    assert_eq!(fork_info.hash, Some(competing_hash));
}

#[test]
fn notarized_header_wins_fork_choice_test() {
    setup_logger(LevelFilter::Trace);

    // 1. This node processed block 1 of round 1. A competing block 1 of round 2 is not a fork.
    let Detector {
        detector,
        block_tracker,
        genesis,
        ..
    } = shard_detector(2, None);
    let processed = make_header(0, 1, 1, hash_of(&genesis));
    let processed_hash = hash_of(&processed);
    add(detector.as_ref(), &processed, &processed_hash, BlockHeaderState::Processed).unwrap();
    let competing = make_header(0, 1, 2, hash_of(&genesis));
    let competing_hash = hash_of(&competing);
    add(detector.as_ref(), &competing, &competing_hash, BlockHeaderState::Received).unwrap();
    assert!(!detector.check_fork().is_detected);

    // 2. The metachain notarizes the competing block, which now wins regardless of its round.
    block_tracker.notarize(METACHAIN_SHARD_ID, &[competing], &[competing_hash.clone()]);
    let fork_info = detector.check_fork();
    assert!(fork_info.is_detected);
    assert_eq!(fork_info.nonce, 1);
    assert_eq!(fork_info.round, MIN_FORK_ROUND);
    assert_eq!(fork_info.hash, Some(competing_hash));
}

#[test]
fn stuck_consensus_is_reported_as_fork_test() {
    setup_logger(LevelFilter::Trace);

    // 1. Process block 1 in round 1.
    let Detector {
        detector,
        round_handler,
        genesis,
        ..
    } = shard_detector(1, None);
    let (header, hash) = make_chain(&genesis, 1).remove(0);
    add(detector.as_ref(), &header, &hash, BlockHeaderState::Processed).unwrap();
    assert!(!detector.check_fork().is_detected);

    // 2. No block is committed for more than ten rounds.
    round_handler.set_index(12);
    let fork_info = detector.check_fork();
    assert!(fork_info.is_detected);
    assert_eq!(fork_info.nonce, 1);
    assert_eq!(fork_info.round, MIN_FORK_ROUND);

    // 3. Once the fork was resolved in this round, it is not reported again in the same round.
    detector.reset_fork();
    assert!(!detector.check_fork().is_detected);
}

#[test]
fn roll_back_nonce_is_reported_once_test() {
    setup_logger(LevelFilter::Trace);

    let Detector { detector, .. } = shard_detector(1, None);

    detector.set_roll_back_nonce(4);
    let fork_info = detector.check_fork();
    assert!(fork_info.is_detected);
    assert_eq!(fork_info.nonce, 4);

    assert!(!detector.check_fork().is_detected);
}

#[test]
fn remove_header_and_restore_to_genesis_test() {
    setup_logger(LevelFilter::Trace);

    // 1. Process three blocks.
    let Detector {
        detector, genesis, ..
    } = shard_detector(5, None);
    let chain = make_chain(&genesis, 3);
    for (header, hash) in &chain {
        add(detector.as_ref(), header, hash, BlockHeaderState::Processed).unwrap();
    }

    // 2. Removing block 3 forgets it and its checkpoint.
    detector.remove_header(3, &chain[2].1);
    assert!(detector.get_headers(3).is_empty());
    assert_eq!(detector.last_checkpoint().nonce, 2);
    assert_eq!(detector.probable_highest_nonce(), 2);

    // 3. Restoring to genesis forgets everything.
    detector.restore_to_genesis();
    assert!(detector.get_headers(1).is_empty());
    assert_eq!(detector.last_checkpoint().nonce, 0);
    assert_eq!(detector.last_checkpoint().hash, hash_of(&genesis));
    assert_eq!(detector.probable_highest_nonce(), 0);
}

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use log::LevelFilter;
use parking_lot::Mutex;

use spos_rs::pluggables::chain::{BlockChain, BlockProcessor, ProcessError, PEER_ACCOUNTS_UNIT};
use spos_rs::pluggables::pools::HeadersPool;
use spos_rs::pluggables::status::{METRIC_IS_SYNCING, METRIC_NONCE};
use spos_rs::sync::bootstrap::{
    ArgBaseBootstrapper, ArgMetaBootstrapper, Bootstrapper, MetaBootstrap, ShardBootstrap,
};
use spos_rs::sync::errors::BootstrapError;
use spos_rs::sync::fork_detector::{
    new_meta_fork_detector, new_shard_fork_detector, ArgBaseForkDetector, BaseForkDetector,
    BlockHeaderState, ForkDetector, ForkInfo,
};
use spos_rs::sync::NodeState;
use spos_rs::types::block::{Body, Header};
use spos_rs::types::data_types::{ShardID, METACHAIN_SHARD_ID};

mod common;

use common::{
    chain::{
        genesis_header, hash_of, make_chain, make_header, MemBlockChain, MemBlockStorage,
        MockAccounts, MockAccountsDBSyncer, MockBlockProcessor, MockStorageBootstrapper,
    },
    consensus::SingleShardCoordinator,
    logging::setup_logger,
    network::{MockNetworkWatcher, RecordingRequestHandler},
    pools::{MemBlockTracker, MemHeadersPool, MemPoolsHolder, MemTimeCacher},
    status::{FixedEpochHandler, MockEnableEpochs, MockEpochStartTrigger, RecordingAppStatusHandler},
    timing::ManualRoundHandler,
};

/// Everything a bootstrapper under test talks to.
struct SyncHarness {
    genesis: Header,
    pool: Arc<MemHeadersPool>,
    blockchain: Arc<MemBlockChain>,
    storage: Arc<MemBlockStorage>,
    block_processor: Arc<MockBlockProcessor>,
    fork_detector: Arc<BaseForkDetector>,
    request_handler: Arc<RecordingRequestHandler>,
    round_handler: Arc<ManualRoundHandler>,
    network_watcher: Arc<MockNetworkWatcher>,
    app_status: Arc<RecordingAppStatusHandler>,
    accounts: Arc<MockAccounts>,
    accounts_db_syncer: Arc<MockAccountsDBSyncer>,
}

impl SyncHarness {
    fn new(shard_id: ShardID, round_index: i64, andromeda_epoch: Option<u32>) -> (SyncHarness, ArgBaseBootstrapper) {
        let genesis = genesis_header(shard_id);
        let pools_holder = MemPoolsHolder::new();
        let pool = pools_holder.headers.clone().unwrap();
        let blockchain = Arc::new(MemBlockChain::new(genesis.clone()));
        let storage = Arc::new(MemBlockStorage::default());
        let block_processor = Arc::new(MockBlockProcessor::new(blockchain.clone(), storage.clone()));
        let round_handler = Arc::new(ManualRoundHandler::new(round_index, Duration::from_secs(1)));
        let enable_epochs = Arc::new(MockEnableEpochs { andromeda_epoch });

        let fork_detector_args = ArgBaseForkDetector::builder()
            .round_handler(round_handler.clone())
            .black_list_handler(Arc::new(MemTimeCacher::default()))
            .block_tracker(Arc::new(MemBlockTracker::new(Some((
                genesis.clone(),
                hash_of(&genesis),
            )))))
            .genesis_time(0)
            .enable_epochs_handler(enable_epochs.clone())
            .proofs_pool(pools_holder.proofs.clone().unwrap())
            .build();
        let fork_detector = if shard_id == METACHAIN_SHARD_ID {
            new_meta_fork_detector(fork_detector_args).unwrap()
        } else {
            new_shard_fork_detector(fork_detector_args).unwrap()
        };

        let request_handler = Arc::new(RecordingRequestHandler::new(Some(pool.clone())));
        let network_watcher = Arc::new(MockNetworkWatcher::connected());
        let app_status = Arc::new(RecordingAppStatusHandler::default());
        let accounts = Arc::new(MockAccounts::default());
        let accounts_db_syncer = Arc::new(MockAccountsDBSyncer::default());

        let args = ArgBaseBootstrapper::builder()
            .pools_holder(Arc::new(pools_holder))
            .block_chain(blockchain.clone())
            .round_handler(round_handler.clone())
            .block_processor(block_processor.clone())
            .fork_detector(fork_detector.clone())
            .request_handler(request_handler.clone())
            .shard_coordinator(Arc::new(SingleShardCoordinator(shard_id)))
            .accounts(accounts.clone())
            .block_storage(storage.clone())
            .black_list_handler(Arc::new(MemTimeCacher::default()))
            .network_watcher(network_watcher.clone())
            .storage_bootstrapper(Arc::new(MockStorageBootstrapper {
                has_stored_chain: true,
            }))
            .app_status_handler(app_status.clone())
            .accounts_db_syncer(accounts_db_syncer.clone())
            .enable_epochs_handler(enable_epochs)
            .wait_time(Duration::from_millis(50))
            .sleep_time(Duration::from_millis(1))
            .build();

        let harness = SyncHarness {
            genesis,
            pool,
            blockchain,
            storage,
            block_processor,
            fork_detector,
            request_handler,
            round_handler,
            network_watcher,
            app_status,
            accounts,
            accounts_db_syncer,
        };
        (harness, args)
    }

    /// Commits `header` as if this node had produced it in consensus.
    fn commit(&self, header: &Header) {
        self.block_processor
            .commit_block(header, &Body::default())
            .unwrap();
        self.fork_detector
            .add_header(Some(header), &hash_of(header), BlockHeaderState::Processed, &[], &[])
            .unwrap();
    }
}

#[test]
fn shard_bootstrap_constructor_errors_test() {
    setup_logger(LevelFilter::Trace);

    // 1. Missing pools.
    assert_eq!(
        ShardBootstrap::new(ArgBaseBootstrapper::builder().build()).err(),
        Some(BootstrapError::NilPoolsHolder)
    );
    let no_pools = ArgBaseBootstrapper::builder()
        .pools_holder(Arc::new(MemPoolsHolder::default()))
        .build();
    assert_eq!(
        ShardBootstrap::new(no_pools).err(),
        Some(BootstrapError::NilHeadersDataPool)
    );
    let headers_only = ArgBaseBootstrapper::builder()
        .pools_holder(Arc::new(MemPoolsHolder {
            headers: Some(Arc::new(MemHeadersPool::default())),
            ..Default::default()
        }))
        .build();
    assert_eq!(
        ShardBootstrap::new(headers_only).err(),
        Some(BootstrapError::NilProofsPool)
    );

    // 2. Pools present, collaborators missing.
    let pools_only = ArgBaseBootstrapper::builder()
        .pools_holder(Arc::new(MemPoolsHolder::new()))
        .build();
    assert_eq!(
        ShardBootstrap::new(pools_only).err(),
        Some(BootstrapError::NilBlockChain)
    );

    // 3. A process wait time below the minimum.
    let (_, mut args) = SyncHarness::new(0, 1, None);
    args.process_wait_time = Duration::from_millis(1);
    assert_eq!(
        ShardBootstrap::new(args).err(),
        Some(BootstrapError::InvalidProcessWaitTime)
    );

    // 4. Everything in place.
    let (_, args) = SyncHarness::new(0, 1, None);
    let boot = ShardBootstrap::new(args).unwrap();
    assert_eq!(boot.get_node_state(), NodeState::NotCalculated);
}

#[test]
fn meta_bootstrap_constructor_errors_test() {
    setup_logger(LevelFilter::Trace);

    let (_, args) = SyncHarness::new(METACHAIN_SHARD_ID, 1, None);
    let missing_trigger = ArgMetaBootstrapper::builder().base(args).build();
    assert_eq!(
        MetaBootstrap::new(missing_trigger).err(),
        Some(BootstrapError::NilEpochStartTrigger)
    );

    let (_, args) = SyncHarness::new(METACHAIN_SHARD_ID, 1, None);
    let missing_validator_accounts = ArgMetaBootstrapper::builder()
        .base(args)
        .epoch_start_trigger(Arc::new(MockEpochStartTrigger::default()))
        .epoch_handler(Arc::new(FixedEpochHandler(0)))
        .validator_statistics_db_syncer(Arc::new(MockAccountsDBSyncer::default()))
        .build();
    assert_eq!(
        MetaBootstrap::new(missing_validator_accounts).err(),
        Some(BootstrapError::NilPeerAccountsAdapter)
    );
}

#[test]
fn sync_blocks_from_pool_test() {
    setup_logger(LevelFilter::Trace);

    // 1. Initialize a shard bootstrapper in round 3, and put three blocks in the headers pool.
    let (harness, args) = SyncHarness::new(0, 3, None);
    let boot = ShardBootstrap::new(args).unwrap();
    let chain = make_chain(&harness.genesis, 3);
    for (header, hash) in &chain {
        harness.pool.add_header(hash.clone(), header.clone());
    }
    assert_eq!(harness.fork_detector.probable_highest_nonce(), 3);

    // 2. Each sync call commits the next block.
    for _ in 0..3 {
        boot.sync_block().unwrap();
    }
    assert_eq!(harness.block_processor.committed_nonces(), vec![1, 2, 3]);
    assert_eq!(harness.blockchain.head_nonce(), 3);
    assert_eq!(harness.app_status.u64_value(METRIC_NONCE), Some(3));
    assert_eq!(harness.fork_detector.last_checkpoint().hash, chain[2].1);
    assert!(harness.request_handler.shard_headers.lock().is_empty());

    // 3. In the next round the node finds itself synchronized, and does nothing more.
    harness.round_handler.set_index(4);
    boot.sync_block().unwrap();
    assert_eq!(boot.get_node_state(), NodeState::Synchronized);
    assert_eq!(harness.app_status.u64_value(METRIC_IS_SYNCING), Some(0));
    assert_eq!(harness.block_processor.committed_nonces().len(), 3);
}

#[test]
fn requested_header_is_synced_test() {
    setup_logger(LevelFilter::Trace);

    // 1. The network reached nonce 2, but this node holds only genesis, and its pool is empty.
    let (harness, args) = SyncHarness::new(0, 2, None);
    let boot = ShardBootstrap::new(args).unwrap();
    let chain = make_chain(&harness.genesis, 2);
    harness
        .fork_detector
        .add_header(Some(&chain[1].0), &chain[1].1, BlockHeaderState::Received, &[], &[])
        .unwrap();
    harness.request_handler.serve(chain[0].0.clone(), chain[0].1.clone());

    // 2. Syncing requests block 1 and its proof, receives it, and commits it. Block 2 is requested in
    //    advance.
    boot.sync_block().unwrap();
    assert_eq!(harness.block_processor.committed_nonces(), vec![1]);
    assert_eq!(*harness.request_handler.shard_headers.lock(), vec![(0, 1), (0, 2)]);
    assert_eq!(*harness.request_handler.proofs.lock(), vec![(0, 1)]);
    assert!(harness.pool.contains(&chain[0].1));
}

#[test]
fn missing_header_times_out_test() {
    setup_logger(LevelFilter::Trace);

    // 1. The network reached nonce 1, but nobody answers the request for it.
    let (harness, args) = SyncHarness::new(0, 1, None);
    let boot = ShardBootstrap::new(args).unwrap();
    let (header, hash) = make_chain(&harness.genesis, 1).remove(0);
    harness
        .fork_detector
        .add_header(Some(&header), &hash, BlockHeaderState::Received, &[], &[])
        .unwrap();

    // 2. The attempt fails and is counted against nonce 1.
    assert_eq!(boot.sync_block(), Err(BootstrapError::TimeIsOut));
    assert_eq!(boot.num_synced_with_errors_for_nonce(1), 1);
    assert!(harness.block_processor.committed_nonces().is_empty());
}

#[test]
fn disconnected_node_is_not_synchronized_test() {
    setup_logger(LevelFilter::Trace);

    let (harness, args) = SyncHarness::new(0, 1, None);
    let boot = ShardBootstrap::new(args).unwrap();
    let transitions = Arc::new(Mutex::new(Vec::new()));
    let recorded = transitions.clone();
    boot.add_sync_state_listener(Box::new(move |is_synchronized| {
        recorded.lock().push(is_synchronized)
    }));

    // 1. Connected and holding every known block: synchronized.
    boot.compute_node_state();
    assert_eq!(boot.get_node_state(), NodeState::Synchronized);

    // 2. The state is computed once per round.
    harness.network_watcher.set_connected(false);
    boot.compute_node_state();
    assert_eq!(boot.get_node_state(), NodeState::Synchronized);

    // 3. In the next round the disconnection is noticed.
    harness.round_handler.set_index(2);
    boot.compute_node_state();
    assert_eq!(boot.get_node_state(), NodeState::NotSynchronized);
    assert_eq!(*transitions.lock(), vec![true, false]);
}

#[test]
fn fork_is_resolved_by_rolling_back_test() {
    setup_logger(LevelFilter::Trace);

    // 1. This node committed block 1 of round 1 and block 2 of round 3.
    let (harness, args) = SyncHarness::new(0, 5, None);
    let boot = ShardBootstrap::new(args).unwrap();
    let block_1 = make_header(0, 1, 1, hash_of(&harness.genesis));
    let own_block_2 = make_header(0, 2, 3, hash_of(&block_1));
    harness.commit(&block_1);
    harness.commit(&own_block_2);
    assert_eq!(harness.blockchain.head_nonce(), 2);

    // 2. The network built another block 2 in round 2.
    let network_block_2 = make_header(0, 2, 2, hash_of(&block_1));
    let network_block_2_hash = hash_of(&network_block_2);
    harness
        .pool
        .add_header(network_block_2_hash.clone(), network_block_2.clone());
    let fork_info = harness.fork_detector.check_fork();
    assert!(fork_info.is_detected);
    assert_eq!(fork_info.nonce, 2);

    // 3. The first sync call rolls the chain back to block 1.
    boot.sync_block().unwrap();
    assert_eq!(harness.blockchain.head_nonce(), 1);
    assert_eq!(harness.block_processor.restored_nonces(), vec![2]);
    assert_eq!(
        harness.block_processor.reverted_root_hashes(),
        vec![block_1.root_hash.clone()]
    );
    assert!(harness
        .fork_detector
        .get_headers(2)
        .iter()
        .all(|info| info.hash != hash_of(&own_block_2)));

    // 4. Once the network's block 2 is broadcast again, the next sync call follows it.
    harness
        .pool
        .add_header(network_block_2_hash.clone(), network_block_2);
    boot.sync_block().unwrap();
    assert_eq!(harness.blockchain.head_nonce(), 2);
    assert_eq!(
        harness.blockchain.current_block_header_hash(),
        Some(network_block_2_hash)
    );
}

#[test]
fn roll_back_stops_at_final_block_test() {
    setup_logger(LevelFilter::Trace);

    // 1. Nothing to roll back on an empty chain.
    let (harness, args) = SyncHarness::new(0, 2, None);
    let boot = ShardBootstrap::new(args).unwrap();
    assert_eq!(
        boot.roll_back(false, &ForkInfo::not_detected()),
        Err(BootstrapError::NilBlockHeader)
    );

    // 2. A block that is not final is reverted, back to genesis.
    let block_1 = make_header(0, 1, 1, hash_of(&harness.genesis));
    harness.commit(&block_1);
    boot.roll_back(false, &ForkInfo::not_detected()).unwrap();
    assert_eq!(harness.blockchain.head_nonce(), 0);
    assert_eq!(harness.blockchain.root_hash(), harness.genesis.root_hash);
    assert_eq!(harness.block_processor.restored_nonces(), vec![1]);

    // 3. With equivalent proofs every committed block is final, and cannot be rolled back.
    let (harness, args) = SyncHarness::new(0, 2, Some(0));
    let boot = ShardBootstrap::new(args).unwrap();
    let block_1 = make_header(0, 1, 1, hash_of(&harness.genesis));
    harness.commit(&block_1);
    assert_eq!(harness.fork_detector.get_highest_final_block_nonce(), 1);
    assert_eq!(
        boot.roll_back(false, &ForkInfo::not_detected()),
        Err(BootstrapError::RollBackBehindFinalHeader)
    );
    assert_eq!(harness.blockchain.head_nonce(), 1);
}

#[test]
fn meta_bootstrap_syncs_missing_validator_trie_test() {
    setup_logger(LevelFilter::Trace);

    // 1. Initialize a metachain bootstrapper whose stored chain is in epoch 2, which started in round
    //    40.
    let (harness, args) = SyncHarness::new(METACHAIN_SHARD_ID, 1, None);
    let epoch_start_header = Header {
        epoch: 2,
        epoch_start: true,
        ..make_header(METACHAIN_SHARD_ID, 30, 40, hash_of(&harness.genesis))
    };
    harness.storage.put_epoch_start_header(2, epoch_start_header);
    let epoch_start_trigger = Arc::new(MockEpochStartTrigger::default());
    let validator_syncer = Arc::new(MockAccountsDBSyncer::default());
    let validator_accounts = Arc::new(MockAccounts::default());
    let boot = MetaBootstrap::new(
        ArgMetaBootstrapper::builder()
            .base(args)
            .epoch_start_trigger(epoch_start_trigger.clone())
            .epoch_handler(Arc::new(FixedEpochHandler(2)))
            .validator_statistics_db_syncer(validator_syncer.clone())
            .validator_accounts(validator_accounts.clone())
            .build(),
    )
    .unwrap();

    // 2. Block 1 is in the pool, but executing it needs a validator trie node this node lacks.
    let (header, hash) = make_chain(&harness.genesis, 1).remove(0);
    harness.pool.add_header(hash, header);
    let missing_key = vec![7; 32];
    harness
        .block_processor
        .fail_processing_with(Some(ProcessError::MissingTrieNode {
            key: missing_key.clone(),
            identifier: PEER_ACCOUNTS_UNIT.to_string(),
        }));

    // 3. Start syncing, and wait for the sync loop to sync the validator trie.
    boot.start_syncing_blocks().unwrap();
    assert_eq!(*epoch_start_trigger.epoch_start_round.lock(), Some(40));
    let deadline = Instant::now() + Duration::from_secs(5);
    while validator_syncer.synced_roots().is_empty() && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(5));
    }
    boot.close();

    // 4. The validator trie was synced and recreated. The user accounts trie was left alone.
    assert!(validator_syncer.synced_roots().contains(&missing_key));
    assert!(validator_accounts.recreated_tries().contains(&missing_key));
    assert!(harness.accounts_db_syncer.synced_roots().is_empty());
    assert!(harness.accounts.recreated_tries().is_empty());
}

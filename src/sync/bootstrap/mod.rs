/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The loop that brings a node up to date with the chain.
//!
//! Main type: [`BaseBootstrap`], wrapped by [`ShardBootstrap`] on shards and [`MetaBootstrap`] on the
//! metachain.
//!
//! ## Sync loop
//!
//! [`start_syncing_blocks`](Bootstrapper::start_syncing_blocks) first restores the chain from local
//! storage, then spawns a thread that calls [`sync_block`](BaseBootstrap::sync_block) every
//! [`SLEEP_TIME`]. Each call:
//! 1. Computes the [`NodeState`], at most once per round. A synchronized node does nothing else.
//! 2. If the [fork detector](crate::sync::fork_detector) reported a fork, rolls the chain back to
//!    before the fork and returns.
//! 3. Otherwise fetches the header following the chain head, from the headers pool or by requesting it
//!    from peers, then its body in the same way.
//! 4. Executes and commits the block, and records it in the fork detector as processed.
//!
//! A failed call is retried at the next iteration. After [`MAX_SYNC_WITH_ERRORS_ALLOWED`] failed
//! attempts at the same nonce, the header is dropped and the chain head is rolled back by one block, in
//! case the node sits on a chain its peers abandoned.
//!
//! ## Roll back
//!
//! Rolling back reverts the chain head block by block, restoring the previous header from storage,
//! reverting the state tries, and returning the reverted transactions to the pools. Blocks at or below
//! the highest final nonce are never reverted, except to resolve a fork the fork detector reported.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender, SyncSender, TryRecvError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant, SystemTime};

use parking_lot::{Mutex, RwLock};
use typed_builder::TypedBuilder;

use crate::events::*;
use crate::pluggables::chain::{
    AccountsAdapter, AccountsDBSyncer, BlockChain, BlockProcessor, BlockStorage, ProcessError,
    StorageBootstrapper,
};
use crate::pluggables::network::{NetworkWatcher, RequestHandler};
use crate::pluggables::pools::{HeadersPool, MiniBlocksPool, PoolsHolder, ProofsPool, TimeCacher};
use crate::pluggables::sharding::ShardCoordinator;
use crate::pluggables::status::{
    is_proofs_flag_enabled_for_header, AppStatusHandler, EnableEpochsHandler, METRIC_IS_SYNCING,
    METRIC_NONCE, METRIC_NUM_TIMES_IN_FORK_CHOICE, METRIC_PROBABLE_HIGHEST_NONCE,
    METRIC_SYNCHRONIZED_ROUND,
};
use crate::pluggables::timing::RoundHandler;
use crate::sync::errors::BootstrapError;
use crate::sync::fork_detector::{
    BlockHeaderState, ForkDetector, ForkInfo, HEADER_BLACKLIST_DURATION,
};
use crate::sync::*;
use crate::types::block::{Body, Header, MiniBlock};
use crate::types::data_types::{CryptoHash, ShardID};

pub mod meta;
pub use meta::{ArgMetaBootstrapper, MetaBootstrap};

pub mod shard;
pub use shard::{ArgShardBootstrapper, ShardBootstrap};

/// Called with `true` when the node becomes synchronized, and with `false` when it falls behind.
pub type SyncStateListener = Box<dyn Fn(bool) + Send + Sync>;

pub trait Bootstrapper: Send + Sync {
    fn get_node_state(&self) -> NodeState;

    /// Restores the chain from storage and starts the sync loop. Calling this more than once has no
    /// effect.
    fn start_syncing_blocks(&self) -> Result<(), BootstrapError>;

    fn add_sync_state_listener(&self, listener: SyncStateListener);

    fn set_status_handler(
        &self,
        status_handler: Option<Arc<dyn AppStatusHandler>>,
    ) -> Result<(), BootstrapError>;

    /// Stops the sync loop and waits for it to exit.
    fn close(&self);
}

/// Behavior that differs between the shard and the metachain bootstrappers.
pub(crate) trait ChainSync: Send + Sync {
    fn request_header_by_nonce(&self, boot: &BaseBootstrap, nonce: u64);

    fn request_proof_by_nonce(&self, boot: &BaseBootstrap, nonce: u64);

    /// Whether `fork_info` describes a fork resolved by a header the metachain notarized.
    fn is_fork_triggered_by_meta(&self, fork_info: &ForkInfo) -> bool;

    /// Syncs the trie named `identifier` from the node with the missing `key`.
    fn sync_accounts_state(
        &self,
        boot: &BaseBootstrap,
        key: &[u8],
        identifier: &str,
    ) -> Result<(), BootstrapError>;
}

/// Collaborators and timing shared by [`ShardBootstrap::new`] and [`MetaBootstrap::new`].
#[derive(TypedBuilder)]
pub struct ArgBaseBootstrapper {
    #[builder(default, setter(strip_option))]
    pub pools_holder: Option<Arc<dyn PoolsHolder>>,
    #[builder(default, setter(strip_option))]
    pub block_chain: Option<Arc<dyn BlockChain>>,
    #[builder(default, setter(strip_option))]
    pub round_handler: Option<Arc<dyn RoundHandler>>,
    #[builder(default, setter(strip_option))]
    pub block_processor: Option<Arc<dyn BlockProcessor>>,
    #[builder(default, setter(strip_option))]
    pub fork_detector: Option<Arc<dyn ForkDetector>>,
    #[builder(default, setter(strip_option))]
    pub request_handler: Option<Arc<dyn RequestHandler>>,
    #[builder(default, setter(strip_option))]
    pub shard_coordinator: Option<Arc<dyn ShardCoordinator>>,
    #[builder(default, setter(strip_option))]
    pub accounts: Option<Arc<dyn AccountsAdapter>>,
    #[builder(default, setter(strip_option))]
    pub block_storage: Option<Arc<dyn BlockStorage>>,
    #[builder(default, setter(strip_option))]
    pub black_list_handler: Option<Arc<dyn TimeCacher>>,
    #[builder(default, setter(strip_option))]
    pub network_watcher: Option<Arc<dyn NetworkWatcher>>,
    #[builder(default, setter(strip_option))]
    pub storage_bootstrapper: Option<Arc<dyn StorageBootstrapper>>,
    #[builder(default, setter(strip_option))]
    pub app_status_handler: Option<Arc<dyn AppStatusHandler>>,
    #[builder(default, setter(strip_option))]
    pub accounts_db_syncer: Option<Arc<dyn AccountsDBSyncer>>,
    #[builder(default, setter(strip_option))]
    pub enable_epochs_handler: Option<Arc<dyn EnableEpochsHandler>>,
    /// How long to wait for a requested header or body.
    #[builder(default = PROCESS_WAIT_TIME)]
    pub wait_time: Duration,
    /// How long a synced block may take to execute.
    #[builder(default = PROCESS_WAIT_TIME)]
    pub process_wait_time: Duration,
    /// Interval between two iterations of the sync loop.
    #[builder(default = SLEEP_TIME)]
    pub sleep_time: Duration,
    #[builder(default)]
    pub event_publisher: Option<Sender<Event>>,
}

/// The pools a bootstrapper reads headers and bodies from.
pub(crate) struct SyncPools {
    pub(crate) headers: Arc<dyn HeadersPool>,
    pub(crate) mini_blocks: Arc<dyn MiniBlocksPool>,
    pub(crate) proofs: Arc<dyn ProofsPool>,
}

#[derive(Default)]
struct NodeStateInfo {
    round_index: i64,
    is_calculated: bool,
    is_synchronized: bool,
}

/// What a sync attempt got hold of before it failed.
#[derive(Default)]
struct SyncAttempt {
    header: Option<(Header, CryptoHash)>,
    body: Option<Body>,
}

pub struct BaseBootstrap {
    pub(crate) block_chain: Arc<dyn BlockChain>,
    round_handler: Arc<dyn RoundHandler>,
    block_processor: Arc<dyn BlockProcessor>,
    fork_detector: Arc<dyn ForkDetector>,
    pub(crate) request_handler: Arc<dyn RequestHandler>,
    pub(crate) shard_coordinator: Arc<dyn ShardCoordinator>,
    pub(crate) accounts: Arc<dyn AccountsAdapter>,
    pub(crate) block_storage: Arc<dyn BlockStorage>,
    black_list_handler: Arc<dyn TimeCacher>,
    network_watcher: Arc<dyn NetworkWatcher>,
    storage_bootstrapper: Arc<dyn StorageBootstrapper>,
    status_handler: RwLock<Arc<dyn AppStatusHandler>>,
    pub(crate) accounts_db_syncer: Arc<dyn AccountsDBSyncer>,
    enable_epochs_handler: Arc<dyn EnableEpochsHandler>,
    headers: Arc<dyn HeadersPool>,
    mini_blocks: Arc<dyn MiniBlocksPool>,
    proofs: Arc<dyn ProofsPool>,
    wait_time: Duration,
    process_wait_time: Duration,
    sleep_time: Duration,
    event_publisher: Option<Sender<Event>>,
    chain_sync: Box<dyn ChainSync>,

    node_state: Mutex<NodeStateInfo>,
    synchronizing: AtomicBool,
    fork_info: Mutex<ForkInfo>,
    nonces_synced_with_errors: Mutex<HashMap<u64, u32>>,
    requested_header_nonce: Mutex<Option<u64>>,
    requested_header_hash: Mutex<Option<CryptoHash>>,
    header_received_sender: SyncSender<()>,
    header_received_receiver: Mutex<Receiver<()>>,
    sync_state_listeners: RwLock<Vec<SyncStateListener>>,
    sync_thread: Mutex<Option<(Sender<()>, JoinHandle<()>)>>,
}

impl BaseBootstrap {
    pub(crate) fn new(
        args: ArgBaseBootstrapper,
        pools: SyncPools,
        chain_sync: Box<dyn ChainSync>,
    ) -> Result<Arc<BaseBootstrap>, BootstrapError> {
        let block_chain = args.block_chain.ok_or(BootstrapError::NilBlockChain)?;
        let round_handler = args
            .round_handler
            .ok_or(BootstrapError::NilRoundHandler)?;
        let block_processor = args
            .block_processor
            .ok_or(BootstrapError::NilBlockProcessor)?;
        let fork_detector = args
            .fork_detector
            .ok_or(BootstrapError::NilForkDetector)?;
        let request_handler = args
            .request_handler
            .ok_or(BootstrapError::NilRequestHandler)?;
        let shard_coordinator = args
            .shard_coordinator
            .ok_or(BootstrapError::NilShardCoordinator)?;
        let accounts = args.accounts.ok_or(BootstrapError::NilAccountsAdapter)?;
        let block_storage = args
            .block_storage
            .ok_or(BootstrapError::NilBlockStorage)?;
        let black_list_handler = args
            .black_list_handler
            .ok_or(BootstrapError::NilBlackListCacher)?;
        let network_watcher = args
            .network_watcher
            .ok_or(BootstrapError::NilNetworkWatcher)?;
        let storage_bootstrapper = args
            .storage_bootstrapper
            .ok_or(BootstrapError::NilStorageBootstrapper)?;
        let app_status_handler = args
            .app_status_handler
            .ok_or(BootstrapError::NilAppStatusHandler)?;
        let accounts_db_syncer = args
            .accounts_db_syncer
            .ok_or(BootstrapError::NilAccountsDBSyncer)?;
        let enable_epochs_handler = args
            .enable_epochs_handler
            .ok_or(BootstrapError::NilEnableEpochsHandler)?;
        if args.process_wait_time < MIN_PROCESS_WAIT_TIME {
            return Err(BootstrapError::InvalidProcessWaitTime);
        }

        let (header_received_sender, header_received_receiver) = mpsc::sync_channel(1);

        let boot = Arc::new(BaseBootstrap {
            block_chain,
            round_handler,
            block_processor,
            fork_detector,
            request_handler,
            shard_coordinator,
            accounts,
            block_storage,
            black_list_handler,
            network_watcher,
            storage_bootstrapper,
            status_handler: RwLock::new(app_status_handler),
            accounts_db_syncer,
            enable_epochs_handler,
            headers: pools.headers,
            mini_blocks: pools.mini_blocks,
            proofs: pools.proofs,
            wait_time: args.wait_time,
            process_wait_time: args.process_wait_time,
            sleep_time: args.sleep_time,
            event_publisher: args.event_publisher,
            chain_sync,
            node_state: Mutex::new(NodeStateInfo::default()),
            synchronizing: AtomicBool::new(false),
            fork_info: Mutex::new(ForkInfo::not_detected()),
            nonces_synced_with_errors: Mutex::new(HashMap::new()),
            requested_header_nonce: Mutex::new(None),
            requested_header_hash: Mutex::new(None),
            header_received_sender,
            header_received_receiver: Mutex::new(header_received_receiver),
            sync_state_listeners: RwLock::new(Vec::new()),
            sync_thread: Mutex::new(None),
        });

        let weak_boot = Arc::downgrade(&boot);
        boot.headers.register_handler(Box::new(move |header, hash| {
            if let Some(boot) = weak_boot.upgrade() {
                boot.process_received_header(header, hash);
            }
        }));

        Ok(boot)
    }

    /* ↓↓↓ Sync loop ↓↓↓ */

    /// Restores the chain persisted in local storage. Returns whether it succeeded.
    pub(crate) fn load_from_storage(&self) -> bool {
        match self.storage_bootstrapper.load_from_storage() {
            Ok(()) => true,
            Err(err) => {
                log::debug!("load from storage: {}", err);
                false
            }
        }
    }

    pub(crate) fn start_sync_loop(boot: &Arc<BaseBootstrap>) {
        let mut sync_thread = boot.sync_thread.lock();
        if sync_thread.is_some() {
            return;
        }

        let looping_boot = boot.clone();
        let (shutdown_sender, shutdown_receiver) = mpsc::channel();
        let handle = thread::spawn(move || loop {
            match shutdown_receiver.try_recv() {
                Ok(()) => return,
                Err(TryRecvError::Empty) => (),
                Err(TryRecvError::Disconnected) => return,
            }

            thread::sleep(looping_boot.sleep_time);
            looping_boot.sync_block_and_recover();
        });

        *sync_thread = Some((shutdown_sender, handle));
    }

    pub(crate) fn stop_sync_loop(&self) {
        if let Some((shutdown_sender, handle)) = self.sync_thread.lock().take() {
            let _ = shutdown_sender.send(());
            let _ = handle.join();
        }
    }

    /// Runs one iteration of the sync loop. A block whose execution needs a trie node that is missing
    /// locally triggers a sync of that trie.
    fn sync_block_and_recover(&self) {
        let Err(err) = self.sync_block() else {
            return;
        };
        log::debug!("sync block: {}", err);

        if let BootstrapError::Process(ProcessError::MissingTrieNode { key, identifier }) = &err {
            if let Err(err) = self.chain_sync.sync_accounts_state(self, key, identifier) {
                log::error!("syncing trie {} failed: {}", identifier, err);
            }
        }
    }

    /// Fetches, executes, and commits the block following the chain head, or rolls the chain back if a
    /// fork was detected. Does nothing when the node is synchronized.
    pub fn sync_block(&self) -> Result<(), BootstrapError> {
        self.compute_node_state();
        if self.get_node_state() != NodeState::NotSynchronized {
            return Ok(());
        }

        let fork_info = self.fork_info.lock().clone();
        if fork_info.is_detected {
            self.roll_back_on_forced_fork(&fork_info);
            return Ok(());
        }

        self.synchronizing.store(true, Ordering::SeqCst);
        let mut attempt = SyncAttempt::default();
        let result = self.sync_next_block(&mut attempt);
        if let Err(err) = &result {
            self.do_job_on_sync_block_fail(&attempt, err);
        }
        self.synchronizing.store(false, Ordering::SeqCst);

        result
    }

    fn sync_next_block(&self, attempt: &mut SyncAttempt) -> Result<(), BootstrapError> {
        let nonce = self.next_nonce();
        let (header, hash) = match self.fork_detector.get_notarized_header_hash(nonce) {
            Some(hash) => self.get_header_with_hash_requesting_if_missing(&hash, nonce)?,
            None => self.get_header_with_nonce_requesting_if_missing(nonce)?,
        };
        attempt.header = Some((header.clone(), hash.clone()));

        self.request_headers_from_nonce_if_missing(header.nonce + 1);

        let body = self.get_block_body_requesting_if_missing(&header)?;
        attempt.body = Some(body.clone());

        let start_time = Instant::now();
        let process_wait_time = self.process_wait_time;
        let have_time = move || process_wait_time.saturating_sub(start_time.elapsed());
        self.block_processor
            .process_block(&header, &body, &have_time)?;
        self.block_processor.commit_block(&header, &body)?;

        if let Err(err) =
            self.fork_detector
                .add_header(Some(&header), &hash, BlockHeaderState::Processed, &[], &[])
        {
            log::debug!("fork detector rejected synced header: {}", err);
        }

        log::info!(
            "block has been synced successfully: nonce {}, round {}, hash {}",
            header.nonce,
            header.round,
            hash
        );
        let status_handler = self.status_handler();
        status_handler.set_u64_value(METRIC_NONCE, header.nonce);
        status_handler.set_u64_value(METRIC_SYNCHRONIZED_ROUND, header.round);
        Event::publish(
            &self.event_publisher,
            Event::SyncBlock(SyncBlockEvent {
                timestamp: SystemTime::now(),
                nonce: header.nonce,
                round: header.round,
                header_hash: hash,
            }),
        );

        self.clean_nonces_synced_with_errors_behind_final();

        Ok(())
    }

    fn do_job_on_sync_block_fail(&self, attempt: &SyncAttempt, err: &BootstrapError) {
        if attempt.body.is_some() {
            self.block_processor.revert_current_block();
        }

        let nonce = attempt
            .header
            .as_ref()
            .map(|(header, _)| header.nonce)
            .unwrap_or_else(|| self.next_nonce());
        let num_synced_with_errors = self.increment_synced_with_errors_for_nonce(nonce);
        log::debug!(
            "sync attempt {} of nonce {} failed: {}",
            num_synced_with_errors,
            nonce,
            err
        );

        let is_in_proper_round = attempt
            .header
            .as_ref()
            .map_or(true, |(header, _)| header.round as i64 <= self.round_handler.index());
        if num_synced_with_errors < MAX_SYNC_WITH_ERRORS_ALLOWED || !is_in_proper_round {
            return;
        }

        if let Some((header, hash)) = &attempt.header {
            self.headers.remove_header_by_hash(hash);
            self.fork_detector.remove_header(header.nonce, hash);
        }
        if let Err(err) = self.roll_back(false, &ForkInfo::not_detected()) {
            log::debug!("roll back after failed sync attempts: {}", err);
        }
    }

    fn increment_synced_with_errors_for_nonce(&self, nonce: u64) -> u32 {
        let mut nonces_synced_with_errors = self.nonces_synced_with_errors.lock();
        let count = nonces_synced_with_errors.entry(nonce).or_insert(0);
        *count += 1;
        *count
    }

    fn clean_nonces_synced_with_errors_behind_final(&self) {
        let final_nonce = self.fork_detector.get_highest_final_block_nonce();
        self.nonces_synced_with_errors
            .lock()
            .retain(|nonce, _| *nonce > final_nonce);
    }

    /// Number of failed attempts at syncing `nonce` since it was last final.
    pub fn num_synced_with_errors_for_nonce(&self, nonce: u64) -> u32 {
        self.nonces_synced_with_errors
            .lock()
            .get(&nonce)
            .copied()
            .unwrap_or(0)
    }

    /* ↓↓↓ Node state ↓↓↓ */

    /// Recomputes whether the node is synchronized, unless it was already computed in the current
    /// round.
    pub fn compute_node_state(&self) {
        let round_index = self.round_handler.index();
        {
            let node_state = self.node_state.lock();
            if node_state.is_calculated && node_state.round_index == round_index {
                return;
            }
        }

        let fork_info = self.fork_detector.check_fork();
        let probable_highest_nonce = self.fork_detector.probable_highest_nonce();
        let has_last_block = probable_highest_nonce <= self.current_nonce();
        let is_connected = self.network_watcher.is_connected_to_the_network();
        let is_synchronized = !fork_info.is_detected && has_last_block && is_connected;

        if fork_info.is_detected {
            log::debug!(
                "fork detected: nonce {}, round {}",
                fork_info.nonce,
                fork_info.round
            );
        }
        *self.fork_info.lock() = fork_info;

        let has_changed = {
            let mut node_state = self.node_state.lock();
            let has_changed =
                !node_state.is_calculated || node_state.is_synchronized != is_synchronized;
            node_state.round_index = round_index;
            node_state.is_calculated = true;
            node_state.is_synchronized = is_synchronized;
            has_changed
        };

        let status_handler = self.status_handler();
        status_handler.set_u64_value(METRIC_IS_SYNCING, u64::from(!is_synchronized));
        status_handler.set_u64_value(METRIC_PROBABLE_HIGHEST_NONCE, probable_highest_nonce);

        if !is_synchronized {
            self.request_headers_if_sync_is_stuck();
        }

        if has_changed {
            log::debug!(
                "node has changed its synchronized state: synchronized {}",
                is_synchronized
            );
            Event::publish(
                &self.event_publisher,
                Event::NodeStateChanged(NodeStateChangedEvent {
                    timestamp: SystemTime::now(),
                    round: round_index,
                    is_synchronized,
                }),
            );
            self.notify_sync_state_listeners(is_synchronized);
        }
    }

    pub fn get_node_state(&self) -> NodeState {
        let node_state = self.node_state.lock();
        if !node_state.is_calculated {
            return NodeState::NotCalculated;
        }
        if node_state.is_synchronized {
            return NodeState::Synchronized;
        }
        if self.synchronizing.load(Ordering::SeqCst) {
            return NodeState::Synchronizing;
        }

        NodeState::NotSynchronized
    }

    fn notify_sync_state_listeners(&self, is_synchronized: bool) {
        for listener in self.sync_state_listeners.read().iter() {
            listener(is_synchronized);
        }
    }

    pub(crate) fn add_sync_state_listener(&self, listener: SyncStateListener) {
        self.sync_state_listeners.write().push(listener);
    }

    pub(crate) fn set_status_handler(
        &self,
        status_handler: Option<Arc<dyn AppStatusHandler>>,
    ) -> Result<(), BootstrapError> {
        let status_handler = status_handler.ok_or(BootstrapError::NilAppStatusHandler)?;
        *self.status_handler.write() = status_handler;
        Ok(())
    }

    fn status_handler(&self) -> Arc<dyn AppStatusHandler> {
        self.status_handler.read().clone()
    }

    /* ↓↓↓ Roll back ↓↓↓ */

    fn roll_back_on_forced_fork(&self, fork_info: &ForkInfo) {
        self.status_handler()
            .increment(METRIC_NUM_TIMES_IN_FORK_CHOICE);
        Event::publish(
            &self.event_publisher,
            Event::ForkDetected(ForkDetectedEvent {
                timestamp: SystemTime::now(),
                nonce: fork_info.nonce,
                round: fork_info.round,
                hash: fork_info.hash.clone(),
            }),
        );

        if let Err(err) = self.roll_back(true, fork_info) {
            log::debug!("roll back on forced fork: {}", err);
        }

        self.fork_detector.reset_fork();
        self.node_state.lock().is_calculated = false;
    }

    /// Reverts the chain head. With `revert_using_fork_nonce` unset, reverts a single block that is not
    /// final. Otherwise reverts every block down to and including the one at `fork_info.nonce`.
    pub fn roll_back(
        &self,
        revert_using_fork_nonce: bool,
        fork_info: &ForkInfo,
    ) -> Result<(), BootstrapError> {
        loop {
            let current_header = self
                .block_chain
                .current_block_header()
                .ok_or(BootstrapError::NilBlockHeader)?;
            let current_hash = self
                .block_chain
                .current_block_header_hash()
                .ok_or(BootstrapError::NilBlockHeader)?;

            let final_nonce = self.fork_detector.get_highest_final_block_nonce();
            if !revert_using_fork_nonce && current_header.nonce <= final_nonce {
                return Err(BootstrapError::RollBackBehindFinalHeader);
            }

            let current_body = self.get_block_body(&current_header)?;
            let previous = self.get_prev_header(&current_header)?;

            log::debug!(
                "roll back to block: nonce {}, hash {}",
                current_header.nonce.saturating_sub(1),
                current_header.prev_hash
            );
            self.roll_back_one_block(&current_header, &current_hash, &current_body, previous)?;

            Event::publish(
                &self.event_publisher,
                Event::RollBack(RollBackEvent {
                    timestamp: SystemTime::now(),
                    nonce: current_header.nonce,
                    header_hash: current_hash.clone(),
                }),
            );

            if revert_using_fork_nonce && self.chain_sync.is_fork_triggered_by_meta(fork_info) {
                self.black_list_handler
                    .upsert(current_hash, HEADER_BLACKLIST_DURATION);
            }

            if revert_using_fork_nonce && current_header.nonce > fork_info.nonce {
                continue;
            }

            return Ok(());
        }
    }

    fn roll_back_one_block(
        &self,
        current_header: &Header,
        current_hash: &CryptoHash,
        current_body: &Body,
        previous: Option<(Header, CryptoHash)>,
    ) -> Result<(), BootstrapError> {
        match previous {
            Some((previous_header, previous_hash)) => {
                let root_hash = previous_header.root_hash.clone();
                self.block_chain.set_current_block_header_and_root_hash(
                    Some(previous_header.clone()),
                    root_hash.clone(),
                )?;
                self.block_chain
                    .set_current_block_header_hash(Some(previous_hash));
                self.block_processor
                    .revert_state_to_block(&previous_header, &root_hash)?;
            }
            None => {
                let genesis_header = self
                    .block_chain
                    .genesis_header()
                    .ok_or(BootstrapError::NilBlockHeader)?;
                let root_hash = genesis_header.root_hash.clone();
                self.block_chain
                    .set_current_block_header_and_root_hash(None, root_hash.clone())?;
                self.block_chain.set_current_block_header_hash(None);
                self.block_processor
                    .revert_state_to_block(&genesis_header, &root_hash)?;
            }
        }

        self.block_processor
            .restore_block_into_pools(current_header, current_body)?;
        self.headers.remove_header_by_hash(current_hash);
        self.fork_detector
            .remove_header(current_header.nonce, current_hash);

        Ok(())
    }

    /// The header the chain head builds on. `None` when that is the genesis header.
    fn get_prev_header(&self, header: &Header) -> Result<Option<(Header, CryptoHash)>, BootstrapError> {
        if header.prev_hash == self.block_chain.genesis_header_hash() {
            return Ok(None);
        }

        let previous_header = self.block_storage.get_header(&header.prev_hash)?;
        Ok(Some((previous_header, header.prev_hash.clone())))
    }

    /* ↓↓↓ Headers ↓↓↓ */

    pub(crate) fn self_shard_id(&self) -> ShardID {
        self.shard_coordinator.self_id()
    }

    fn genesis_nonce(&self) -> u64 {
        self.block_chain
            .genesis_header()
            .map(|header| header.nonce)
            .unwrap_or(0)
    }

    fn current_nonce(&self) -> u64 {
        self.block_chain
            .current_block_header()
            .map(|header| header.nonce)
            .unwrap_or_else(|| self.genesis_nonce())
    }

    fn current_round(&self) -> u64 {
        self.block_chain
            .current_block_header()
            .or_else(|| self.block_chain.genesis_header())
            .map(|header| header.round)
            .unwrap_or(0)
    }

    fn next_nonce(&self) -> u64 {
        self.current_nonce() + 1
    }

    /// Called by the headers pool for every header added to it.
    pub(crate) fn process_received_header(&self, header: &Header, hash: &CryptoHash) {
        if header.shard_id != self.self_shard_id() {
            return;
        }

        log::trace!(
            "received header from network: nonce {}, round {}, hash {}",
            header.nonce,
            header.round,
            hash
        );

        if let Err(err) =
            self.fork_detector
                .add_header(Some(header), hash, BlockHeaderState::Received, &[], &[])
        {
            log::debug!("fork detector rejected received header: {}", err);
        }

        self.request_mini_blocks_in_advance(header);

        let requested_by_nonce = {
            let mut requested_nonce = self.requested_header_nonce.lock();
            let is_requested = *requested_nonce == Some(header.nonce);
            if is_requested {
                *requested_nonce = None;
            }
            is_requested
        };
        let requested_by_hash = {
            let mut requested_hash = self.requested_header_hash.lock();
            let is_requested = requested_hash.as_ref() == Some(hash);
            if is_requested {
                *requested_hash = None;
            }
            is_requested
        };
        if requested_by_nonce || requested_by_hash {
            let _ = self.header_received_sender.try_send(());
        }
    }

    fn get_header_with_nonce_requesting_if_missing(
        &self,
        nonce: u64,
    ) -> Result<(Header, CryptoHash), BootstrapError> {
        let shard_id = self.self_shard_id();
        if let Some(found) = self.headers.get_header_by_nonce_and_shard_id(nonce, shard_id) {
            return self.with_proof_if_required(found, nonce);
        }

        self.drain_header_received_signal();
        *self.requested_header_nonce.lock() = Some(nonce);
        self.chain_sync.request_header_by_nonce(self, nonce);
        self.chain_sync.request_proof_by_nonce(self, nonce);
        self.wait_for_header()?;

        let found = self
            .headers
            .get_header_by_nonce_and_shard_id(nonce, shard_id)
            .ok_or(BootstrapError::MissingHeader)?;
        self.with_proof_if_required(found, nonce)
    }

    fn get_header_with_hash_requesting_if_missing(
        &self,
        hash: &CryptoHash,
        nonce: u64,
    ) -> Result<(Header, CryptoHash), BootstrapError> {
        if let Some(header) = self.get_header_from_pool_or_storage(hash) {
            return self.with_proof_if_required((header, hash.clone()), nonce);
        }

        self.drain_header_received_signal();
        *self.requested_header_hash.lock() = Some(hash.clone());
        self.chain_sync.request_header_by_nonce(self, nonce);
        self.chain_sync.request_proof_by_nonce(self, nonce);
        self.wait_for_header()?;

        let header = self
            .get_header_from_pool_or_storage(hash)
            .ok_or(BootstrapError::MissingHeader)?;
        self.with_proof_if_required((header, hash.clone()), nonce)
    }

    fn get_header_from_pool_or_storage(&self, hash: &CryptoHash) -> Option<Header> {
        self.headers
            .get_header_by_hash(hash)
            .or_else(|| self.block_storage.get_header(hash).ok())
    }

    /// Once equivalent proofs are enabled, a header is only synced together with its proof.
    fn with_proof_if_required(
        &self,
        (header, hash): (Header, CryptoHash),
        nonce: u64,
    ) -> Result<(Header, CryptoHash), BootstrapError> {
        if !is_proofs_flag_enabled_for_header(self.enable_epochs_handler.as_ref(), &header)
            || self.proofs.has_proof(header.shard_id, &hash)
        {
            return Ok((header, hash));
        }

        self.chain_sync.request_proof_by_nonce(self, nonce);
        if self.wait_until(|| self.proofs.has_proof(header.shard_id, &hash)) {
            return Ok((header, hash));
        }

        Err(BootstrapError::MissingHeader)
    }

    fn drain_header_received_signal(&self) {
        let header_received_receiver = self.header_received_receiver.lock();
        while header_received_receiver.try_recv().is_ok() {}
    }

    fn wait_for_header(&self) -> Result<(), BootstrapError> {
        match self
            .header_received_receiver
            .lock()
            .recv_timeout(self.wait_time)
        {
            Ok(()) => Ok(()),
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => {
                Err(BootstrapError::TimeIsOut)
            }
        }
    }

    /// Polls `condition` every [`sleep_time`](ArgBaseBootstrapper::sleep_time) until it holds or the
    /// wait time passed. Returns whether it held.
    fn wait_until(&self, condition: impl Fn() -> bool) -> bool {
        let deadline = Instant::now() + self.wait_time;
        loop {
            if condition() {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            thread::sleep(self.sleep_time);
        }
    }

    /// Requests, from `from_nonce` on, the headers not yet in the pool, up to the probable highest
    /// nonce.
    fn request_headers_from_nonce_if_missing(&self, from_nonce: u64) {
        let to_nonce = (from_nonce + MAX_HEADERS_TO_REQUEST_IN_ADVANCE - 1)
            .min(self.fork_detector.probable_highest_nonce());
        let shard_id = self.self_shard_id();
        for nonce in from_nonce..=to_nonce {
            if self
                .headers
                .get_header_by_nonce_and_shard_id(nonce, shard_id)
                .is_none()
            {
                self.chain_sync.request_header_by_nonce(self, nonce);
            }
        }
    }

    /// Requests the headers following the chain head when no block was committed for a while, in case
    /// this node missed the headers its peers produced.
    fn request_headers_if_sync_is_stuck(&self) {
        let round_index = self.round_handler.index();
        let rounds_without_block = (round_index - self.current_round() as i64).max(0) as u64;
        if rounds_without_block <= MAX_ROUNDS_WITHOUT_COMMITTED_BLOCK {
            return;
        }

        let from_nonce = self.next_nonce();
        let num_headers = MAX_HEADERS_TO_REQUEST_IN_ADVANCE.min(rounds_without_block - 1);
        log::debug!(
            "sync seems stuck, requesting {} headers from nonce {}",
            num_headers,
            from_nonce
        );
        for nonce in from_nonce..from_nonce + num_headers {
            self.chain_sync.request_header_by_nonce(self, nonce);
        }
    }

    /* ↓↓↓ Bodies ↓↓↓ */

    /// The mini blocks with the given hashes found in the pool or in storage, and the hashes of those
    /// found in neither.
    fn get_mini_blocks(&self, hashes: &[CryptoHash]) -> (Vec<MiniBlock>, Vec<CryptoHash>) {
        let mut mini_blocks = Vec::with_capacity(hashes.len());
        let mut missing = Vec::new();
        for hash in hashes {
            let mini_block = self
                .mini_blocks
                .get(hash)
                .or_else(|| self.block_storage.get_mini_block(hash).ok());
            match mini_block {
                Some(mini_block) => mini_blocks.push(mini_block),
                None => missing.push(hash.clone()),
            }
        }

        (mini_blocks, missing)
    }

    fn get_block_body(&self, header: &Header) -> Result<Body, BootstrapError> {
        let (mini_blocks, missing) = self.get_mini_blocks(&header.mini_block_hashes());
        if !missing.is_empty() {
            return Err(BootstrapError::MissingBody);
        }

        Ok(Body { mini_blocks })
    }

    fn get_block_body_requesting_if_missing(&self, header: &Header) -> Result<Body, BootstrapError> {
        let hashes = header.mini_block_hashes();
        let (_, missing) = self.get_mini_blocks(&hashes);
        if missing.is_empty() {
            return self.get_block_body(header);
        }

        self.request_handler
            .request_mini_blocks(self.self_shard_id(), missing);
        if !self.wait_until(|| self.get_mini_blocks(&hashes).1.is_empty()) {
            return Err(BootstrapError::MissingBody);
        }

        self.get_block_body(header)
    }

    /// Requests the mini blocks of `header` missing from the pool if the header will be synced soon.
    fn request_mini_blocks_in_advance(&self, header: &Header) {
        let next_nonce = self.next_nonce();
        let max_nonce = (next_nonce + MAX_HEADERS_TO_REQUEST_IN_ADVANCE - 1)
            .min(self.fork_detector.probable_highest_nonce());
        if header.nonce < next_nonce || header.nonce > max_nonce {
            return;
        }

        let missing: Vec<CryptoHash> = header
            .mini_block_hashes()
            .into_iter()
            .filter(|hash| self.mini_blocks.get(hash).is_none())
            .collect();
        if !missing.is_empty() {
            log::trace!(
                "requesting in advance {} mini blocks of header with nonce {}",
                missing.len(),
                header.nonce
            );
            self.request_handler
                .request_mini_blocks(self.self_shard_id(), missing);
        }
    }

    /* ↓↓↓ Trie sync ↓↓↓ */

    pub(crate) fn sync_user_accounts_state(&self, key: &[u8]) -> Result<(), BootstrapError> {
        log::warn!("started syncing user accounts state");
        self.accounts_db_syncer.sync_accounts(key)?;
        self.accounts.recreate_trie(key)?;
        Ok(())
    }
}

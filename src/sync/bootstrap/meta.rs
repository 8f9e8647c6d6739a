/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Bootstrapping the metachain.
//!
//! Differs from shard bootstrapping in three ways:
//! 1. Headers and proofs are requested from the metachain topics.
//! 2. A block missing a validator accounts trie node triggers a sync of that trie, as well as of the
//!    user accounts trie.
//! 3. After loading from storage, the epoch start trigger learns the round the current epoch started
//!    in.

use std::ops::Deref;
use std::sync::Arc;

use typed_builder::TypedBuilder;

use crate::pluggables::chain::{
    AccountsAdapter, AccountsDBSyncer, TrieSyncError, PEER_ACCOUNTS_UNIT, USER_ACCOUNTS_UNIT,
};
use crate::pluggables::status::{AppStatusHandler, EpochHandler, EpochStartTrigger};
use crate::sync::bootstrap::*;
use crate::sync::errors::BootstrapError;
use crate::sync::fork_detector::ForkInfo;
use crate::sync::NodeState;
use crate::types::data_types::METACHAIN_SHARD_ID;

#[derive(TypedBuilder)]
pub struct ArgMetaBootstrapper {
    pub base: ArgBaseBootstrapper,
    #[builder(default, setter(strip_option))]
    pub epoch_start_trigger: Option<Arc<dyn EpochStartTrigger>>,
    #[builder(default, setter(strip_option))]
    pub epoch_handler: Option<Arc<dyn EpochHandler>>,
    #[builder(default, setter(strip_option))]
    pub validator_statistics_db_syncer: Option<Arc<dyn AccountsDBSyncer>>,
    #[builder(default, setter(strip_option))]
    pub validator_accounts: Option<Arc<dyn AccountsAdapter>>,
}

pub struct MetaBootstrap {
    base: Arc<BaseBootstrap>,
    epoch_start_trigger: Arc<dyn EpochStartTrigger>,
    epoch_handler: Arc<dyn EpochHandler>,
}

impl MetaBootstrap {
    pub fn new(args: ArgMetaBootstrapper) -> Result<MetaBootstrap, BootstrapError> {
        let pools_holder = args
            .base
            .pools_holder
            .clone()
            .ok_or(BootstrapError::NilPoolsHolder)?;
        let headers = pools_holder
            .headers()
            .ok_or(BootstrapError::NilMetaBlocksPool)?;
        let proofs = pools_holder.proofs().ok_or(BootstrapError::NilProofsPool)?;
        let mini_blocks = pools_holder
            .mini_blocks()
            .ok_or(BootstrapError::NilTxBlockBody)?;
        let epoch_start_trigger = args
            .epoch_start_trigger
            .ok_or(BootstrapError::NilEpochStartTrigger)?;
        let epoch_handler = args
            .epoch_handler
            .ok_or(BootstrapError::NilEpochHandler)?;
        let validator_statistics_db_syncer = args
            .validator_statistics_db_syncer
            .ok_or(BootstrapError::NilAccountsDBSyncer)?;
        let validator_accounts = args
            .validator_accounts
            .ok_or(BootstrapError::NilPeerAccountsAdapter)?;

        let base = BaseBootstrap::new(
            args.base,
            SyncPools {
                headers,
                mini_blocks,
                proofs,
            },
            Box::new(MetaChainSync {
                validator_statistics_db_syncer,
                validator_accounts,
            }),
        )?;

        Ok(MetaBootstrap {
            base,
            epoch_start_trigger,
            epoch_handler,
        })
    }

    /// Tells the epoch start trigger in which round the current epoch started. Nothing to do in the
    /// first epoch.
    fn set_last_epoch_start_round(&self) -> Result<(), BootstrapError> {
        let epoch = self.epoch_handler.meta_epoch();
        if epoch < 1 {
            return Ok(());
        }

        let epoch_start_header = self.base.block_storage.get_epoch_start_header(epoch)?;
        self.epoch_start_trigger
            .set_current_epoch_start_round(epoch_start_header.round);

        Ok(())
    }
}

impl Deref for MetaBootstrap {
    type Target = BaseBootstrap;

    fn deref(&self) -> &Self::Target {
        &self.base
    }
}

impl Bootstrapper for MetaBootstrap {
    fn get_node_state(&self) -> NodeState {
        self.base.get_node_state()
    }

    fn start_syncing_blocks(&self) -> Result<(), BootstrapError> {
        if self.base.load_from_storage() {
            if let Err(err) = self.set_last_epoch_start_round() {
                log::debug!("set last epoch start round: {}", err);
            }
        }

        BaseBootstrap::start_sync_loop(&self.base);
        Ok(())
    }

    fn add_sync_state_listener(&self, listener: SyncStateListener) {
        self.base.add_sync_state_listener(listener)
    }

    fn set_status_handler(
        &self,
        status_handler: Option<Arc<dyn AppStatusHandler>>,
    ) -> Result<(), BootstrapError> {
        self.base.set_status_handler(status_handler)
    }

    fn close(&self) {
        self.base.stop_sync_loop()
    }
}

impl Drop for MetaBootstrap {
    fn drop(&mut self) {
        self.base.stop_sync_loop()
    }
}

struct MetaChainSync {
    validator_statistics_db_syncer: Arc<dyn AccountsDBSyncer>,
    validator_accounts: Arc<dyn AccountsAdapter>,
}

impl MetaChainSync {
    fn sync_validator_accounts_state(&self, key: &[u8]) -> Result<(), BootstrapError> {
        log::warn!("started syncing validator accounts state");
        self.validator_statistics_db_syncer.sync_accounts(key)?;
        self.validator_accounts.recreate_trie(key)?;
        Ok(())
    }
}

impl ChainSync for MetaChainSync {
    fn request_header_by_nonce(&self, boot: &BaseBootstrap, nonce: u64) {
        boot.request_handler.request_meta_header_by_nonce(nonce);
    }

    fn request_proof_by_nonce(&self, boot: &BaseBootstrap, nonce: u64) {
        boot.request_handler
            .request_equivalent_proof_by_nonce(METACHAIN_SHARD_ID, nonce);
    }

    /// The metachain follows no other chain's notarization.
    fn is_fork_triggered_by_meta(&self, _fork_info: &ForkInfo) -> bool {
        false
    }

    fn sync_accounts_state(
        &self,
        boot: &BaseBootstrap,
        key: &[u8],
        identifier: &str,
    ) -> Result<(), BootstrapError> {
        match identifier {
            USER_ACCOUNTS_UNIT => boot.sync_user_accounts_state(key),
            PEER_ACCOUNTS_UNIT => self.sync_validator_accounts_state(key),
            _ => Err(TrieSyncError::InvalidTrieIdentifier(identifier.to_string()).into()),
        }
    }
}

/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Bootstrapping a shard chain.

use std::ops::Deref;
use std::sync::Arc;

use crate::pluggables::status::AppStatusHandler;
use crate::sync::bootstrap::*;
use crate::sync::errors::BootstrapError;
use crate::sync::fork_detector::ForkInfo;
use crate::sync::{NodeState, MIN_FORK_ROUND};

/// Shard bootstrappers take no argument beyond the shared ones.
pub type ArgShardBootstrapper = ArgBaseBootstrapper;

pub struct ShardBootstrap {
    base: Arc<BaseBootstrap>,
}

impl ShardBootstrap {
    pub fn new(args: ArgShardBootstrapper) -> Result<ShardBootstrap, BootstrapError> {
        let pools_holder = args
            .pools_holder
            .clone()
            .ok_or(BootstrapError::NilPoolsHolder)?;
        let headers = pools_holder
            .headers()
            .ok_or(BootstrapError::NilHeadersDataPool)?;
        let proofs = pools_holder.proofs().ok_or(BootstrapError::NilProofsPool)?;
        let mini_blocks = pools_holder
            .mini_blocks()
            .ok_or(BootstrapError::NilTxBlockBody)?;

        let base = BaseBootstrap::new(
            args,
            SyncPools {
                headers,
                mini_blocks,
                proofs,
            },
            Box::new(ShardChainSync),
        )?;

        Ok(ShardBootstrap { base })
    }
}

impl Deref for ShardBootstrap {
    type Target = BaseBootstrap;

    fn deref(&self) -> &Self::Target {
        &self.base
    }
}

impl Bootstrapper for ShardBootstrap {
    fn get_node_state(&self) -> NodeState {
        self.base.get_node_state()
    }

    fn start_syncing_blocks(&self) -> Result<(), BootstrapError> {
        self.base.load_from_storage();
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

impl Drop for ShardBootstrap {
    fn drop(&mut self) {
        self.base.stop_sync_loop()
    }
}

struct ShardChainSync;

impl ChainSync for ShardChainSync {
    fn request_header_by_nonce(&self, boot: &BaseBootstrap, nonce: u64) {
        boot.request_handler
            .request_shard_header_by_nonce(boot.self_shard_id(), nonce);
    }

    fn request_proof_by_nonce(&self, boot: &BaseBootstrap, nonce: u64) {
        boot.request_handler
            .request_equivalent_proof_by_nonce(boot.self_shard_id(), nonce);
    }

    fn is_fork_triggered_by_meta(&self, fork_info: &ForkInfo) -> bool {
        fork_info.is_detected
            && fork_info.nonce != u64::MAX
            && fork_info.round == MIN_FORK_ROUND
            && fork_info.hash.is_some()
    }

    fn sync_accounts_state(
        &self,
        boot: &BaseBootstrap,
        key: &[u8],
        _identifier: &str,
    ) -> Result<(), BootstrapError> {
        boot.sync_user_accounts_state(key)
    }
}

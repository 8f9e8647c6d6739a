/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Errors returned by the fork detector and the bootstrapper.

use std::fmt::{self, Display, Formatter};

use crate::pluggables::chain::{ProcessError, StorageError, TrieSyncError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ForkDetectorError {
    NilRoundHandler,
    NilBlackListCacher,
    NilBlockTracker,
    NilEnableEpochsHandler,
    NilProofsPool,
    /// The block tracker has no notarized genesis header to start from.
    MissingGenesisHeader,
    NilHeader,
    NilHash,
    /// The header builds on a black-listed header.
    HeaderIsBlackListed,
    /// The header implies a genesis time different from the one of this chain.
    GenesisTimeMissmatch,
    LowerRoundInBlock,
    LowerNonceInBlock,
    /// The header's round is more than one round ahead of the current round.
    HigherRoundInBlock,
    /// The header's nonce grew more than its round since the final checkpoint.
    HigherNonceInBlock,
}

impl Display for ForkDetectorError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        use ForkDetectorError::*;
        match self {
            NilRoundHandler => write!(f, "nil round handler"),
            NilBlackListCacher => write!(f, "nil black list cacher"),
            NilBlockTracker => write!(f, "nil block tracker"),
            NilEnableEpochsHandler => write!(f, "nil enable epochs handler"),
            NilProofsPool => write!(f, "nil proofs pool"),
            MissingGenesisHeader => write!(f, "missing notarized genesis header"),
            NilHeader => write!(f, "nil header"),
            NilHash => write!(f, "nil hash"),
            HeaderIsBlackListed => write!(f, "header is black listed"),
            GenesisTimeMissmatch => write!(f, "genesis time missmatch"),
            LowerRoundInBlock => write!(f, "lower round in block"),
            LowerNonceInBlock => write!(f, "lower nonce in block"),
            HigherRoundInBlock => write!(f, "higher round in block"),
            HigherNonceInBlock => write!(f, "higher nonce in block"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BootstrapError {
    NilPoolsHolder,
    NilHeadersDataPool,
    NilMetaBlocksPool,
    NilProofsPool,
    NilTxBlockBody,
    NilBlockChain,
    NilRoundHandler,
    NilBlockProcessor,
    NilForkDetector,
    NilRequestHandler,
    NilShardCoordinator,
    NilAccountsAdapter,
    NilBlockStorage,
    NilBlackListCacher,
    NilNetworkWatcher,
    NilStorageBootstrapper,
    NilAppStatusHandler,
    NilAccountsDBSyncer,
    NilEnableEpochsHandler,
    NilEpochStartTrigger,
    NilEpochHandler,
    NilPeerAccountsAdapter,
    InvalidProcessWaitTime,
    /// The chain holds no block above genesis.
    NilBlockHeader,
    MissingHeader,
    MissingBody,
    TimeIsOut,
    /// Rolling back would revert a block that is already final.
    RollBackBehindFinalHeader,
    Process(ProcessError),
    Storage(StorageError),
    TrieSync(TrieSyncError),
}

impl Display for BootstrapError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        use BootstrapError::*;
        match self {
            NilPoolsHolder => write!(f, "nil pools holder"),
            NilHeadersDataPool => write!(f, "nil headers data pool"),
            NilMetaBlocksPool => write!(f, "nil meta blocks pool"),
            NilProofsPool => write!(f, "nil proofs pool"),
            NilTxBlockBody => write!(f, "nil tx block body"),
            NilBlockChain => write!(f, "nil block chain"),
            NilRoundHandler => write!(f, "nil round handler"),
            NilBlockProcessor => write!(f, "nil block processor"),
            NilForkDetector => write!(f, "nil fork detector"),
            NilRequestHandler => write!(f, "nil request handler"),
            NilShardCoordinator => write!(f, "nil shard coordinator"),
            NilAccountsAdapter => write!(f, "nil accounts adapter"),
            NilBlockStorage => write!(f, "nil block storage"),
            NilBlackListCacher => write!(f, "nil black list cacher"),
            NilNetworkWatcher => write!(f, "nil network watcher"),
            NilStorageBootstrapper => write!(f, "nil storage bootstrapper"),
            NilAppStatusHandler => write!(f, "nil app status handler"),
            NilAccountsDBSyncer => write!(f, "nil accounts db syncer"),
            NilEnableEpochsHandler => write!(f, "nil enable epochs handler"),
            NilEpochStartTrigger => write!(f, "nil epoch start trigger"),
            NilEpochHandler => write!(f, "nil epoch handler"),
            NilPeerAccountsAdapter => write!(f, "nil peer accounts adapter"),
            InvalidProcessWaitTime => write!(f, "invalid process wait time"),
            NilBlockHeader => write!(f, "nil block header"),
            MissingHeader => write!(f, "missing header"),
            MissingBody => write!(f, "missing body"),
            TimeIsOut => write!(f, "time is out"),
            RollBackBehindFinalHeader => write!(f, "roll back behind final header"),
            Process(err) => write!(f, "process: {}", err),
            Storage(err) => write!(f, "storage: {}", err),
            TrieSync(err) => write!(f, "trie sync: {}", err),
        }
    }
}

impl From<ProcessError> for BootstrapError {
    fn from(value: ProcessError) -> Self {
        BootstrapError::Process(value)
    }
}

impl From<StorageError> for BootstrapError {
    fn from(value: StorageError) -> Self {
        BootstrapError::Storage(value)
    }
}

impl From<TrieSyncError> for BootstrapError {
    fn from(value: TrieSyncError) -> Self {
        BootstrapError::TrieSync(value)
    }
}

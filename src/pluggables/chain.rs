/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Pluggable access to the local chain: its head, block execution, storage and state tries.

use std::fmt::{self, Display, Formatter};
use std::time::Duration;

use crate::types::{
    block::{Body, Header, MiniBlock},
    data_types::CryptoHash,
};

/// Holds the head of the local chain.
pub trait BlockChain: Send + Sync {
    /// Header of the genesis block, if the chain was initialized with one.
    fn genesis_header(&self) -> Option<Header>;

    /// Hash of the genesis header.
    fn genesis_header_hash(&self) -> CryptoHash;

    /// Header of the highest committed block, or `None` if only genesis exists.
    fn current_block_header(&self) -> Option<Header>;

    /// Hash of the highest committed block, or `None` if only genesis exists.
    fn current_block_header_hash(&self) -> Option<CryptoHash>;

    /// Move the chain head to `header` (or back to genesis when `None`) with the given state root.
    fn set_current_block_header_and_root_hash(
        &self,
        header: Option<Header>,
        root_hash: Vec<u8>,
    ) -> Result<(), ProcessError>;

    fn set_current_block_header_hash(&self, hash: Option<CryptoHash>);
}

/// Creates, executes, commits and reverts blocks.
///
/// `create_block` and `process_block` receive a closure reporting the time left to do their work.
/// For `process_block` a zero duration means the caller's deadline has passed.
pub trait BlockProcessor: Send + Sync {
    fn create_new_header(&self, round: u64, nonce: u64) -> Result<Header, ProcessError>;

    fn create_block(
        &self,
        initial_header: Header,
        have_time: &dyn Fn() -> bool,
    ) -> Result<(Header, Body), ProcessError>;

    fn process_block(
        &self,
        header: &Header,
        body: &Body,
        have_time: &dyn Fn() -> Duration,
    ) -> Result<(), ProcessError>;

    /// Persists the block and moves the chain head to it.
    fn commit_block(&self, header: &Header, body: &Body) -> Result<(), ProcessError>;

    /// Discards the changes of a block that was processed but not committed.
    fn revert_current_block(&self);

    /// Reverts the state tries to the ones committed by `header`.
    fn revert_state_to_block(&self, header: &Header, root_hash: &[u8]) -> Result<(), ProcessError>;

    /// Puts the transactions of a rolled back block back into the data pools.
    fn restore_block_into_pools(&self, header: &Header, body: &Body) -> Result<(), ProcessError>;

    fn decode_block_header(&self, bytes: &[u8]) -> Option<Header>;

    fn decode_block_body(&self, bytes: &[u8]) -> Option<Body>;
}

/// Read access to the persisted chain.
pub trait BlockStorage: Send + Sync {
    fn get_header(&self, hash: &CryptoHash) -> Result<Header, StorageError>;

    fn get_mini_block(&self, hash: &CryptoHash) -> Result<MiniBlock, StorageError>;

    /// Header that started `epoch`.
    fn get_epoch_start_header(&self, epoch: u32) -> Result<Header, StorageError>;

    /// Remembers the round at which the chain head last changed, so that a restart resumes from it.
    fn save_last_round(&self, round: i64) -> Result<(), StorageError>;
}

/// Restores the chain head from local storage when the node starts.
pub trait StorageBootstrapper: Send + Sync {
    fn load_from_storage(&self) -> Result<(), StorageError>;
}

/// Downloads the missing nodes of an accounts trie from peers.
pub trait AccountsDBSyncer: Send + Sync {
    /// Blocks until the trie rooted at `root_hash` is fully available locally.
    fn sync_accounts(&self, root_hash: &[u8]) -> Result<(), TrieSyncError>;
}

/// Handle to an accounts trie.
pub trait AccountsAdapter: Send + Sync {
    fn root_hash(&self) -> Result<Vec<u8>, ProcessError>;

    fn recreate_trie(&self, root_hash: &[u8]) -> Result<(), ProcessError>;
}

/// Identifier of the user accounts trie, carried by [`ProcessError::MissingTrieNode`].
pub const USER_ACCOUNTS_UNIT: &str = "UserAccountsUnit";

/// Identifier of the validator (peer) accounts trie, carried by [`ProcessError::MissingTrieNode`].
pub const PEER_ACCOUNTS_UNIT: &str = "PeerAccountsUnit";

/// Ways block creation, execution, or commitment can fail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessError {
    /// The deadline passed before the work could complete.
    TimeIsOut,

    MissingHeader,

    MissingBody,

    /// Execution hit a trie node that is not available locally. `identifier` names the trie
    /// ([`USER_ACCOUNTS_UNIT`] or [`PEER_ACCOUNTS_UNIT`]) and `key` the missing node.
    MissingTrieNode { key: Vec<u8>, identifier: String },

    /// The block is not valid on top of the current chain head.
    InvalidBlock(String),

    Other(String),
}

impl Display for ProcessError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            ProcessError::TimeIsOut => write!(f, "time is out"),
            ProcessError::MissingHeader => write!(f, "missing header"),
            ProcessError::MissingBody => write!(f, "missing body"),
            ProcessError::MissingTrieNode { identifier, .. } => {
                write!(f, "missing trie node in {}", identifier)
            }
            ProcessError::InvalidBlock(reason) => write!(f, "invalid block: {}", reason),
            ProcessError::Other(reason) => write!(f, "{}", reason),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    KeyNotFound,
    Unmarshal(String),
    Other(String),
}

impl Display for StorageError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            StorageError::KeyNotFound => write!(f, "key not found"),
            StorageError::Unmarshal(reason) => write!(f, "unmarshal failed: {}", reason),
            StorageError::Other(reason) => write!(f, "{}", reason),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrieSyncError {
    /// The trie identifier does not name a trie that can be synced.
    InvalidTrieIdentifier(String),
    Timeout,
    Other(String),
}

impl Display for TrieSyncError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            TrieSyncError::InvalidTrieIdentifier(id) => {
                write!(f, "invalid trie identifier, id: {}", id)
            }
            TrieSyncError::Timeout => write!(f, "trie sync timed out"),
            TrieSyncError::Other(reason) => write!(f, "{}", reason),
        }
    }
}

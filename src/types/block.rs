/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Definitions for the header and body of a block, and their associated methods.
//!
//! A block is split into a [`Header`], which is what consensus votes on, and a [`Body`], a list of
//! [`MiniBlock`]s whose hashes are committed to by the header's [`MiniBlockHeader`]s.

use borsh::{BorshDeserialize, BorshSerialize};

use crate::types::data_types::{ChainID, CryptoHash, ShardID, METACHAIN_SHARD_ID};

/// Header of a shard block or a metachain block.
#[derive(Clone, Debug, PartialEq, Eq, Default, BorshSerialize, BorshDeserialize)]
pub struct Header {
    pub nonce: u64,
    pub round: u64,
    pub epoch: u32,
    pub shard_id: ShardID,
    pub timestamp: u64,
    pub prev_hash: CryptoHash,
    pub prev_rand_seed: Vec<u8>,
    pub rand_seed: Vec<u8>,
    pub root_hash: Vec<u8>,
    /// Root of the validator accounts trie. Only metachain headers set it.
    pub validator_stats_root_hash: Vec<u8>,
    pub chain_id: ChainID,
    pub pub_keys_bitmap: Vec<u8>,
    pub signature: Vec<u8>,
    pub leader_signature: Vec<u8>,
    pub mini_block_headers: Vec<MiniBlockHeader>,
    pub epoch_start: bool,
}

impl Header {
    /// Whether this header belongs to the metachain.
    pub fn is_meta(&self) -> bool {
        self.shard_id == METACHAIN_SHARD_ID
    }

    /// Whether this header is the first header of its epoch.
    pub fn is_start_of_epoch_block(&self) -> bool {
        self.epoch_start
    }

    /// Hashes of every mini block referenced by this header, in order.
    pub fn mini_block_hashes(&self) -> Vec<CryptoHash> {
        self.mini_block_headers
            .iter()
            .map(|mb_header| mb_header.hash.clone())
            .collect()
    }

    /// Checks that none of the fields every proposed header must carry is left empty.
    pub fn check_fields_for_nil(&self) -> Result<(), HeaderFieldError> {
        if self.prev_hash.is_empty() {
            return Err(HeaderFieldError::NilPrevHash);
        }
        if self.prev_rand_seed.is_empty() {
            return Err(HeaderFieldError::NilPrevRandSeed);
        }
        if self.rand_seed.is_empty() {
            return Err(HeaderFieldError::NilRandSeed);
        }
        if self.root_hash.is_empty() {
            return Err(HeaderFieldError::NilRootHash);
        }
        if self.chain_id.is_empty() {
            return Err(HeaderFieldError::NilChainID);
        }

        Ok(())
    }

    /// Returns a copy of this header with the leader signature stripped, i.e., the exact contents the
    /// leader signs.
    pub fn without_leader_signature(&self) -> Header {
        Header {
            leader_signature: Vec::new(),
            ..self.clone()
        }
    }
}

/// Field of a [`Header`] found empty by [`Header::check_fields_for_nil`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaderFieldError {
    NilPrevHash,
    NilPrevRandSeed,
    NilRandSeed,
    NilRootHash,
    NilChainID,
}

/// Commitment to a single [`MiniBlock`] inside a [`Header`].
#[derive(Clone, Debug, PartialEq, Eq, Default, BorshSerialize, BorshDeserialize)]
pub struct MiniBlockHeader {
    pub hash: CryptoHash,
    pub sender_shard_id: ShardID,
    pub receiver_shard_id: ShardID,
    pub tx_count: u32,
}

/// List of transaction hashes flowing from one shard to another.
#[derive(Clone, Debug, PartialEq, Eq, Default, BorshSerialize, BorshDeserialize)]
pub struct MiniBlock {
    pub tx_hashes: Vec<Vec<u8>>,
    pub sender_shard_id: ShardID,
    pub receiver_shard_id: ShardID,
}

/// Body of a block.
#[derive(Clone, Debug, PartialEq, Eq, Default, BorshSerialize, BorshDeserialize)]
pub struct Body {
    pub mini_blocks: Vec<MiniBlock>,
}

impl Body {
    pub fn new(mini_blocks: Vec<MiniBlock>) -> Body {
        Body { mini_blocks }
    }

    pub fn is_empty(&self) -> bool {
        self.mini_blocks.is_empty()
    }
}

/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Pluggable data pools: in-memory stores filled by the networking provider with headers, mini
//! blocks, and proofs received from peers.

use std::sync::Arc;
use std::time::Duration;

use crate::types::{
    block::{Header, MiniBlock},
    data_types::{CryptoHash, ShardID},
};

/// Callback invoked by a [`HeadersPool`] whenever a header is added to it.
pub type ReceivedHeaderHandler = Box<dyn Fn(&Header, &CryptoHash) + Send + Sync>;

/// Callback invoked by a [`BlockTracker`] with the headers of shard `shard_id` that another chain
/// has just notarized.
pub type SelfNotarizedHeadersHandler =
    Box<dyn Fn(ShardID, &[Header], &[CryptoHash]) + Send + Sync>;

/// Pool of equivalent proofs, i.e., finality proofs carried separately from headers.
pub trait ProofsPool: Send + Sync {
    fn has_proof(&self, shard_id: ShardID, header_hash: &CryptoHash) -> bool;
}

pub trait HeadersPool: Send + Sync {
    /// Any header with `nonce` in `shard_id`, together with its hash.
    fn get_header_by_nonce_and_shard_id(
        &self,
        nonce: u64,
        shard_id: ShardID,
    ) -> Option<(Header, CryptoHash)>;

    fn get_header_by_hash(&self, hash: &CryptoHash) -> Option<Header>;

    fn add_header(&self, hash: CryptoHash, header: Header);

    fn remove_header_by_hash(&self, hash: &CryptoHash);

    fn register_handler(&self, handler: ReceivedHeaderHandler);
}

pub trait MiniBlocksPool: Send + Sync {
    fn get(&self, hash: &CryptoHash) -> Option<MiniBlock>;

    fn put(&self, hash: CryptoHash, mini_block: MiniBlock);

    fn remove(&self, hash: &CryptoHash);
}

/// Groups the pools a bootstrapper reads from. A missing pool is reported as `None`.
pub trait PoolsHolder: Send + Sync {
    fn headers(&self) -> Option<Arc<dyn HeadersPool>>;

    fn mini_blocks(&self) -> Option<Arc<dyn MiniBlocksPool>>;

    fn proofs(&self) -> Option<Arc<dyn ProofsPool>>;
}

/// Set of keys that expire after a given span. Used to black-list hashes.
pub trait TimeCacher: Send + Sync {
    fn upsert(&self, key: CryptoHash, span: Duration);

    fn has(&self, key: &CryptoHash) -> bool;

    /// Drops every expired key.
    fn sweep(&self);
}

/// Tracks which headers of this shard have been notarized by other chains.
pub trait BlockTracker: Send + Sync {
    /// Last header of `shard_id` notarized by the metachain, `offset` headers back from the latest.
    fn get_self_notarized_header(
        &self,
        shard_id: ShardID,
        offset: u64,
    ) -> Option<(Header, CryptoHash)>;

    fn register_self_notarized_from_cross_headers_handler(
        &self,
        handler: SelfNotarizedHeadersHandler,
    );
}

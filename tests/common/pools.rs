//! In-memory pools, black list, and block tracker.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};
use spos_rs::pluggables::pools::{
    BlockTracker, HeadersPool, MiniBlocksPool, PoolsHolder, ProofsPool, ReceivedHeaderHandler,
    SelfNotarizedHeadersHandler, TimeCacher,
};
use spos_rs::types::block::{Header, MiniBlock};
use spos_rs::types::data_types::{CryptoHash, ShardID};

/// Headers pool that calls its registered handlers on every added header, like the pool of a real
/// node does when a header arrives from the network.
#[derive(Default)]
pub(crate) struct MemHeadersPool {
    headers: RwLock<HashMap<CryptoHash, Header>>,
    handlers: RwLock<Vec<ReceivedHeaderHandler>>,
}

impl MemHeadersPool {
    pub(crate) fn len(&self) -> usize {
        self.headers.read().len()
    }

    pub(crate) fn contains(&self, hash: &CryptoHash) -> bool {
        self.headers.read().contains_key(hash)
    }
}

impl HeadersPool for MemHeadersPool {
    fn get_header_by_nonce_and_shard_id(
        &self,
        nonce: u64,
        shard_id: ShardID,
    ) -> Option<(Header, CryptoHash)> {
        self.headers
            .read()
            .iter()
            .find(|(_, header)| header.nonce == nonce && header.shard_id == shard_id)
            .map(|(hash, header)| (header.clone(), hash.clone()))
    }

    fn get_header_by_hash(&self, hash: &CryptoHash) -> Option<Header> {
        self.headers.read().get(hash).cloned()
    }

    fn add_header(&self, hash: CryptoHash, header: Header) {
        self.headers.write().insert(hash.clone(), header.clone());
        for handler in self.handlers.read().iter() {
            handler(&header, &hash);
        }
    }

    fn remove_header_by_hash(&self, hash: &CryptoHash) {
        self.headers.write().remove(hash);
    }

    fn register_handler(&self, handler: ReceivedHeaderHandler) {
        self.handlers.write().push(handler);
    }
}

#[derive(Default)]
pub(crate) struct MemMiniBlocksPool {
    mini_blocks: RwLock<HashMap<CryptoHash, MiniBlock>>,
}

impl MiniBlocksPool for MemMiniBlocksPool {
    fn get(&self, hash: &CryptoHash) -> Option<MiniBlock> {
        self.mini_blocks.read().get(hash).cloned()
    }

    fn put(&self, hash: CryptoHash, mini_block: MiniBlock) {
        self.mini_blocks.write().insert(hash, mini_block);
    }

    fn remove(&self, hash: &CryptoHash) {
        self.mini_blocks.write().remove(hash);
    }
}

#[derive(Default)]
pub(crate) struct MemProofsPool {
    proofs: RwLock<HashSet<(ShardID, CryptoHash)>>,
}

impl MemProofsPool {
    pub(crate) fn add_proof(&self, shard_id: ShardID, header_hash: CryptoHash) {
        self.proofs.write().insert((shard_id, header_hash));
    }
}

impl ProofsPool for MemProofsPool {
    fn has_proof(&self, shard_id: ShardID, header_hash: &CryptoHash) -> bool {
        self.proofs
            .read()
            .contains(&(shard_id, header_hash.clone()))
    }
}

/// Any pool set to `None` is reported missing.
#[derive(Default)]
pub(crate) struct MemPoolsHolder {
    pub(crate) headers: Option<Arc<MemHeadersPool>>,
    pub(crate) mini_blocks: Option<Arc<MemMiniBlocksPool>>,
    pub(crate) proofs: Option<Arc<MemProofsPool>>,
}

impl MemPoolsHolder {
    pub(crate) fn new() -> MemPoolsHolder {
        MemPoolsHolder {
            headers: Some(Arc::new(MemHeadersPool::default())),
            mini_blocks: Some(Arc::new(MemMiniBlocksPool::default())),
            proofs: Some(Arc::new(MemProofsPool::default())),
        }
    }
}

impl PoolsHolder for MemPoolsHolder {
    fn headers(&self) -> Option<Arc<dyn HeadersPool>> {
        self.headers
            .clone()
            .map(|pool| pool as Arc<dyn HeadersPool>)
    }

    fn mini_blocks(&self) -> Option<Arc<dyn MiniBlocksPool>> {
        self.mini_blocks
            .clone()
            .map(|pool| pool as Arc<dyn MiniBlocksPool>)
    }

    fn proofs(&self) -> Option<Arc<dyn ProofsPool>> {
        self.proofs.clone().map(|pool| pool as Arc<dyn ProofsPool>)
    }
}

#[derive(Default)]
pub(crate) struct MemTimeCacher {
    expiries: Mutex<HashMap<CryptoHash, Instant>>,
}

impl TimeCacher for MemTimeCacher {
    fn upsert(&self, key: CryptoHash, span: Duration) {
        self.expiries.lock().insert(key, Instant::now() + span);
    }

    fn has(&self, key: &CryptoHash) -> bool {
        self.expiries.lock().contains_key(key)
    }

    fn sweep(&self) {
        let now = Instant::now();
        self.expiries.lock().retain(|_, expiry| *expiry > now);
    }
}

/// Block tracker that knows only the genesis header, and lets a test play the metachain notarizing
/// headers of this shard.
pub(crate) struct MemBlockTracker {
    genesis: Option<(Header, CryptoHash)>,
    handlers: RwLock<Vec<SelfNotarizedHeadersHandler>>,
}

impl MemBlockTracker {
    pub(crate) fn new(genesis: Option<(Header, CryptoHash)>) -> MemBlockTracker {
        MemBlockTracker {
            genesis,
            handlers: RwLock::new(Vec::new()),
        }
    }

    pub(crate) fn notarize(&self, shard_id: ShardID, headers: &[Header], hashes: &[CryptoHash]) {
        for handler in self.handlers.read().iter() {
            handler(shard_id, headers, hashes);
        }
    }
}

impl BlockTracker for MemBlockTracker {
    fn get_self_notarized_header(
        &self,
        _shard_id: ShardID,
        _offset: u64,
    ) -> Option<(Header, CryptoHash)> {
        self.genesis.clone()
    }

    fn register_self_notarized_from_cross_headers_handler(
        &self,
        handler: SelfNotarizedHeadersHandler,
    ) {
        self.handlers.write().push(handler);
    }
}

//! An in-memory chain, and a block processor that executes nothing but commits what it is given.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use spos_rs::pluggables::chain::{
    AccountsAdapter, AccountsDBSyncer, BlockChain, BlockProcessor, BlockStorage, ProcessError,
    StorageBootstrapper, StorageError, TrieSyncError,
};
use spos_rs::pluggables::encoding::{header_hash, BorshMarshalizer, Marshalizer, Sha256Hasher};
use spos_rs::types::block::{Body, Header, MiniBlock};
use spos_rs::types::data_types::{ChainID, CryptoHash, ShardID};

pub(crate) const CHAIN_ID: &[u8] = b"spos-test-chain";

pub(crate) fn chain_id() -> ChainID {
    ChainID::new(CHAIN_ID.to_vec())
}

/// The hash every stub in this module uses to name a header.
pub(crate) fn hash_of(header: &Header) -> CryptoHash {
    header_hash(&BorshMarshalizer, &Sha256Hasher, header).unwrap()
}

/// A header at `nonce` and `round` on top of `prev_hash`, with every field consensus requires set.
/// Its timestamp matches a genesis time of 0 and rounds of one second.
pub(crate) fn make_header(shard_id: ShardID, nonce: u64, round: u64, prev_hash: CryptoHash) -> Header {
    Header {
        nonce,
        round,
        shard_id,
        timestamp: round,
        prev_hash,
        prev_rand_seed: vec![1; 32],
        rand_seed: vec![2; 32],
        root_hash: vec![nonce as u8; 32],
        chain_id: chain_id(),
        ..Default::default()
    }
}

pub(crate) fn genesis_header(shard_id: ShardID) -> Header {
    make_header(shard_id, 0, 0, CryptoHash::new(vec![0; 32]))
}

/// `count` headers extending `parent`, one per round.
pub(crate) fn make_chain(parent: &Header, count: u64) -> Vec<(Header, CryptoHash)> {
    let mut chain = Vec::new();
    let mut prev = (parent.clone(), hash_of(parent));
    for _ in 0..count {
        let header = make_header(
            parent.shard_id,
            prev.0.nonce + 1,
            prev.0.round + 1,
            prev.1.clone(),
        );
        let hash = hash_of(&header);
        chain.push((header.clone(), hash.clone()));
        prev = (header, hash);
    }
    chain
}

pub(crate) struct MemBlockChain {
    genesis: (Header, CryptoHash),
    current: RwLock<Option<(Header, CryptoHash)>>,
    root_hash: RwLock<Vec<u8>>,
}

impl MemBlockChain {
    pub(crate) fn new(genesis: Header) -> MemBlockChain {
        let genesis_hash = hash_of(&genesis);
        MemBlockChain {
            root_hash: RwLock::new(genesis.root_hash.clone()),
            genesis: (genesis, genesis_hash),
            current: RwLock::new(None),
        }
    }

    pub(crate) fn set_head(&self, header: Header, hash: CryptoHash) {
        *self.root_hash.write() = header.root_hash.clone();
        *self.current.write() = Some((header, hash));
    }

    /// Nonce of the chain head. The genesis nonce while nothing was committed.
    pub(crate) fn head_nonce(&self) -> u64 {
        self.current
            .read()
            .as_ref()
            .map(|(header, _)| header.nonce)
            .unwrap_or(self.genesis.0.nonce)
    }

    pub(crate) fn root_hash(&self) -> Vec<u8> {
        self.root_hash.read().clone()
    }
}

impl BlockChain for MemBlockChain {
    fn genesis_header(&self) -> Option<Header> {
        Some(self.genesis.0.clone())
    }

    fn genesis_header_hash(&self) -> CryptoHash {
        self.genesis.1.clone()
    }

    fn current_block_header(&self) -> Option<Header> {
        self.current.read().as_ref().map(|(header, _)| header.clone())
    }

    fn current_block_header_hash(&self) -> Option<CryptoHash> {
        self.current.read().as_ref().map(|(_, hash)| hash.clone())
    }

    fn set_current_block_header_and_root_hash(
        &self,
        header: Option<Header>,
        root_hash: Vec<u8>,
    ) -> Result<(), ProcessError> {
        *self.root_hash.write() = root_hash;
        let mut current = self.current.write();
        *current = header.map(|header| {
            let hash = hash_of(&header);
            (header, hash)
        });
        Ok(())
    }

    fn set_current_block_header_hash(&self, hash: Option<CryptoHash>) {
        let mut current = self.current.write();
        match (current.as_mut(), hash) {
            (Some((_, current_hash)), Some(hash)) => *current_hash = hash,
            (_, None) => *current = None,
            (None, Some(_)) => (),
        }
    }
}

#[derive(Default)]
pub(crate) struct MemBlockStorage {
    headers: RwLock<HashMap<CryptoHash, Header>>,
    mini_blocks: RwLock<HashMap<CryptoHash, MiniBlock>>,
    epoch_start_headers: RwLock<HashMap<u32, Header>>,
}

impl MemBlockStorage {
    pub(crate) fn put_header(&self, hash: CryptoHash, header: Header) {
        self.headers.write().insert(hash, header);
    }

    pub(crate) fn put_epoch_start_header(&self, epoch: u32, header: Header) {
        self.epoch_start_headers.write().insert(epoch, header);
    }
}

impl BlockStorage for MemBlockStorage {
    fn get_header(&self, hash: &CryptoHash) -> Result<Header, StorageError> {
        self.headers
            .read()
            .get(hash)
            .cloned()
            .ok_or(StorageError::KeyNotFound)
    }

    fn get_mini_block(&self, hash: &CryptoHash) -> Result<MiniBlock, StorageError> {
        self.mini_blocks
            .read()
            .get(hash)
            .cloned()
            .ok_or(StorageError::KeyNotFound)
    }

    fn get_epoch_start_header(&self, epoch: u32) -> Result<Header, StorageError> {
        self.epoch_start_headers
            .read()
            .get(&epoch)
            .cloned()
            .ok_or(StorageError::KeyNotFound)
    }

    fn save_last_round(&self, _round: i64) -> Result<(), StorageError> {
        Ok(())
    }
}

/// Block processor whose committed blocks become the head of `chain` and are stored in `storage`.
pub(crate) struct MockBlockProcessor {
    chain: Arc<MemBlockChain>,
    storage: Arc<MemBlockStorage>,
    process_error: RwLock<Option<ProcessError>>,
    committed: Mutex<Vec<u64>>,
    restored: Mutex<Vec<u64>>,
    reverted_to: Mutex<Vec<Vec<u8>>>,
    reverted_current: Mutex<u32>,
}

impl MockBlockProcessor {
    pub(crate) fn new(chain: Arc<MemBlockChain>, storage: Arc<MemBlockStorage>) -> MockBlockProcessor {
        MockBlockProcessor {
            chain,
            storage,
            process_error: RwLock::new(None),
            committed: Mutex::new(Vec::new()),
            restored: Mutex::new(Vec::new()),
            reverted_to: Mutex::new(Vec::new()),
            reverted_current: Mutex::new(0),
        }
    }

    /// Makes every following `process_block` call fail with `err`.
    pub(crate) fn fail_processing_with(&self, err: Option<ProcessError>) {
        *self.process_error.write() = err;
    }

    pub(crate) fn committed_nonces(&self) -> Vec<u64> {
        self.committed.lock().clone()
    }

    pub(crate) fn restored_nonces(&self) -> Vec<u64> {
        self.restored.lock().clone()
    }

    pub(crate) fn reverted_root_hashes(&self) -> Vec<Vec<u8>> {
        self.reverted_to.lock().clone()
    }

    pub(crate) fn num_reverted_current_block(&self) -> u32 {
        *self.reverted_current.lock()
    }
}

impl BlockProcessor for MockBlockProcessor {
    fn create_new_header(&self, round: u64, nonce: u64) -> Result<Header, ProcessError> {
        Ok(Header {
            round,
            nonce,
            ..Default::default()
        })
    }

    fn create_block(
        &self,
        initial_header: Header,
        _have_time: &dyn Fn() -> bool,
    ) -> Result<(Header, Body), ProcessError> {
        Ok((initial_header, Body::default()))
    }

    fn process_block(
        &self,
        _header: &Header,
        _body: &Body,
        _have_time: &dyn Fn() -> Duration,
    ) -> Result<(), ProcessError> {
        match self.process_error.read().clone() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn commit_block(&self, header: &Header, _body: &Body) -> Result<(), ProcessError> {
        let hash = hash_of(header);
        self.storage.put_header(hash.clone(), header.clone());
        self.chain.set_head(header.clone(), hash);
        self.committed.lock().push(header.nonce);
        Ok(())
    }

    fn revert_current_block(&self) {
        *self.reverted_current.lock() += 1;
    }

    fn revert_state_to_block(&self, _header: &Header, root_hash: &[u8]) -> Result<(), ProcessError> {
        self.reverted_to.lock().push(root_hash.to_vec());
        Ok(())
    }

    fn restore_block_into_pools(&self, header: &Header, _body: &Body) -> Result<(), ProcessError> {
        self.restored.lock().push(header.nonce);
        Ok(())
    }

    fn decode_block_header(&self, bytes: &[u8]) -> Option<Header> {
        BorshMarshalizer.unmarshal_header(bytes).ok()
    }

    fn decode_block_body(&self, bytes: &[u8]) -> Option<Body> {
        BorshMarshalizer.unmarshal_body(bytes).ok()
    }
}

#[derive(Default)]
pub(crate) struct MockStorageBootstrapper {
    pub(crate) has_stored_chain: bool,
}

impl StorageBootstrapper for MockStorageBootstrapper {
    fn load_from_storage(&self) -> Result<(), StorageError> {
        if self.has_stored_chain {
            Ok(())
        } else {
            Err(StorageError::KeyNotFound)
        }
    }
}

/// Records the root hashes of the tries it was asked to recreate.
#[derive(Default)]
pub(crate) struct MockAccounts {
    recreated: Mutex<Vec<Vec<u8>>>,
}

impl MockAccounts {
    pub(crate) fn recreated_tries(&self) -> Vec<Vec<u8>> {
        self.recreated.lock().clone()
    }
}

impl AccountsAdapter for MockAccounts {
    fn root_hash(&self) -> Result<Vec<u8>, ProcessError> {
        Ok(vec![0; 32])
    }

    fn recreate_trie(&self, root_hash: &[u8]) -> Result<(), ProcessError> {
        self.recreated.lock().push(root_hash.to_vec());
        Ok(())
    }
}

#[derive(Default)]
pub(crate) struct MockAccountsDBSyncer {
    synced: Mutex<Vec<Vec<u8>>>,
}

impl MockAccountsDBSyncer {
    pub(crate) fn synced_roots(&self) -> Vec<Vec<u8>> {
        self.synced.lock().clone()
    }
}

impl AccountsDBSyncer for MockAccountsDBSyncer {
    fn sync_accounts(&self, root_hash: &[u8]) -> Result<(), TrieSyncError> {
        self.synced.lock().push(root_hash.to_vec());
        Ok(())
    }
}

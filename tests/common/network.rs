//! Network collaborators that record what was asked of them.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use spos_rs::consensus::messages::ConsensusMessage;
use spos_rs::pluggables::network::{
    AntifloodHandler, BroadcastMessenger, NetworkError, NetworkWatcher, PeerBlacklistHandler,
    PeerHonestyHandler, RequestHandler,
};
use spos_rs::pluggables::pools::HeadersPool;
use spos_rs::types::block::{Body, Header};
use spos_rs::types::data_types::{CryptoHash, PeerID, ShardID};

use crate::common::pools::MemHeadersPool;

/// Records every request. Headers put "on the network" with [`serve`](Self::serve) are delivered to
/// the headers pool as soon as they are requested.
pub(crate) struct RecordingRequestHandler {
    headers_pool: Option<Arc<MemHeadersPool>>,
    network: RwLock<HashMap<u64, (Header, CryptoHash)>>,
    pub(crate) shard_headers: Mutex<Vec<(ShardID, u64)>>,
    pub(crate) meta_headers: Mutex<Vec<u64>>,
    pub(crate) mini_blocks: Mutex<Vec<(ShardID, Vec<CryptoHash>)>>,
    pub(crate) proofs: Mutex<Vec<(ShardID, u64)>>,
}

impl RecordingRequestHandler {
    pub(crate) fn new(headers_pool: Option<Arc<MemHeadersPool>>) -> RecordingRequestHandler {
        RecordingRequestHandler {
            headers_pool,
            network: RwLock::new(HashMap::new()),
            shard_headers: Mutex::new(Vec::new()),
            meta_headers: Mutex::new(Vec::new()),
            mini_blocks: Mutex::new(Vec::new()),
            proofs: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn serve(&self, header: Header, hash: CryptoHash) {
        self.network.write().insert(header.nonce, (header, hash));
    }

    fn deliver(&self, nonce: u64) {
        let served = self.network.read().get(&nonce).cloned();
        if let (Some(pool), Some((header, hash))) = (&self.headers_pool, served) {
            pool.add_header(hash, header);
        }
    }
}

impl RequestHandler for RecordingRequestHandler {
    fn request_shard_header_by_nonce(&self, shard_id: ShardID, nonce: u64) {
        self.shard_headers.lock().push((shard_id, nonce));
        self.deliver(nonce);
    }

    fn request_meta_header_by_nonce(&self, nonce: u64) {
        self.meta_headers.lock().push(nonce);
        self.deliver(nonce);
    }

    fn request_mini_blocks(&self, shard_id: ShardID, hashes: Vec<CryptoHash>) {
        self.mini_blocks.lock().push((shard_id, hashes));
    }

    fn request_equivalent_proof_by_nonce(&self, shard_id: ShardID, nonce: u64) {
        self.proofs.lock().push((shard_id, nonce));
    }
}

pub(crate) struct MockNetworkWatcher {
    connected: AtomicBool,
}

impl MockNetworkWatcher {
    pub(crate) fn connected() -> MockNetworkWatcher {
        MockNetworkWatcher {
            connected: AtomicBool::new(true),
        }
    }

    pub(crate) fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }
}

impl NetworkWatcher for MockNetworkWatcher {
    fn is_connected_to_the_network(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

#[derive(Default)]
pub(crate) struct RecordingBroadcastMessenger {
    pub(crate) messages: Mutex<Vec<ConsensusMessage>>,
}

impl BroadcastMessenger for RecordingBroadcastMessenger {
    fn broadcast_consensus_message(&self, message: &ConsensusMessage) -> Result<(), NetworkError> {
        self.messages.lock().push(message.clone());
        Ok(())
    }

    fn broadcast_block(&self, _body: &Body, _header: &Header) -> Result<(), NetworkError> {
        Ok(())
    }

    fn broadcast_header(&self, _header: &Header, _public_key: &[u8]) -> Result<(), NetworkError> {
        Ok(())
    }
}

#[derive(Default)]
pub(crate) struct MockAntifloodHandler {
    pub(crate) blacklisted: Mutex<Vec<PeerID>>,
}

impl AntifloodHandler for MockAntifloodHandler {
    fn can_process_message(&self, _payload_len: usize, _from: &PeerID) -> Result<(), NetworkError> {
        Ok(())
    }

    fn reset_for_topic(&self, _topic: &str) {}

    fn blacklist_peer(&self, peer: &PeerID, _reason: &str, _duration: Duration) {
        self.blacklisted.lock().push(peer.clone());
    }
}

/// Keeps the running score of every public key.
#[derive(Default)]
pub(crate) struct RecordingPeerHonesty {
    scores: Mutex<HashMap<Vec<u8>, i32>>,
}

impl RecordingPeerHonesty {
    pub(crate) fn score(&self, public_key: &[u8]) -> i32 {
        self.scores.lock().get(public_key).copied().unwrap_or(0)
    }
}

impl PeerHonestyHandler for RecordingPeerHonesty {
    fn change_score(&self, public_key: &[u8], _topic: &str, units: i32) {
        *self.scores.lock().entry(public_key.to_vec()).or_insert(0) += units;
    }
}

#[derive(Default)]
pub(crate) struct MockPeerBlacklist;

impl PeerBlacklistHandler for MockPeerBlacklist {
    fn is_peer_blacklisted(&self, _peer: &PeerID) -> bool {
        false
    }

    fn blacklist_peer(&self, _peer: &PeerID, _duration: Duration) {}
}

//! Consensus collaborators, and a [`ConsensusHarness`] that wires a full consensus core for a single
//! node of a small consensus group.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use ed25519_dalek::SigningKey;
use parking_lot::{Mutex, RwLock};
use rand_core::OsRng;
use spos_rs::consensus::chronology::{Chronology, ChronologyArgs};
use spos_rs::consensus::core::ConsensusCore;
use spos_rs::consensus::errors::ConsensusError;
use spos_rs::consensus::messages::{ConsensusMessage, MessageType};
use spos_rs::consensus::round_consensus::RoundConsensus;
use spos_rs::consensus::state::ConsensusState;
use spos_rs::consensus::subround::{ConsensusStateChangedChannel, Subround, SubroundArgs, SubroundId};
use spos_rs::consensus::worker::{
    ReceivedHeaderCall, ReceivedMessage, ReceivedMessageCall, WorkerArgs, WorkerHandler,
};
use spos_rs::pluggables::crypto::{HeaderSigVerifier, KeysHandler, SigningError, SigningHandler};
use spos_rs::pluggables::encoding::{BorshMarshalizer, Marshalizer, Sha256Hasher};
use spos_rs::pluggables::sharding::{NodesCoordinator, NodesCoordinatorError, ShardCoordinator};
use spos_rs::pluggables::status::AppStatusHandler;
use spos_rs::pluggables::timing::RoundHandler;
use spos_rs::sync::bootstrap::{Bootstrapper, SyncStateListener};
use spos_rs::sync::errors::BootstrapError;
use spos_rs::sync::fork_detector::{new_shard_fork_detector, ArgBaseForkDetector, ForkDetector};
use spos_rs::sync::NodeState;
use spos_rs::types::block::{Body, Header};
use spos_rs::types::crypto_primitives::{Ed25519PeerSignatureHandler, Keypair};
use spos_rs::types::data_types::{
    CryptoHash, PeerID, PublicKeyBytes, ShardID, SignatureBytes,
};

use crate::common::chain::{
    chain_id, genesis_header, hash_of, make_header, MemBlockChain, MemBlockStorage,
    MockBlockProcessor,
};
use crate::common::network::{
    MockAntifloodHandler, MockPeerBlacklist, RecordingBroadcastMessenger, RecordingPeerHonesty,
};
use crate::common::pools::{MemBlockTracker, MemPoolsHolder, MemTimeCacher};
use crate::common::status::{
    MockEnableEpochs, MockFallbackValidator, MockRedundancy, MockSentSignatureTracker,
    RecordingAppStatusHandler,
};
use crate::common::timing::{ManualRoundHandler, SystemSyncTimer};

pub(crate) const SIGNATURE_SIZE: usize = 64;
pub(crate) const PUBLIC_KEY_SIZE: usize = 32;

/// The peer every test key speaks through.
pub(crate) fn pid_of(public_key: &[u8]) -> PeerID {
    PeerID::new(public_key.to_vec())
}

/// Signing handler whose share for group index `i` is `i` repeated [`SIGNATURE_SIZE`] times.
#[derive(Default)]
pub(crate) struct MockSigningHandler {
    shares: Mutex<HashMap<u16, Vec<u8>>>,
    aggregated: Mutex<Option<Vec<u8>>>,
}

impl MockSigningHandler {
    pub(crate) fn share_for(index: u16) -> Vec<u8> {
        vec![index as u8; SIGNATURE_SIZE]
    }

    pub(crate) fn stored_shares(&self) -> usize {
        self.shares.lock().len()
    }
}

impl SigningHandler for MockSigningHandler {
    fn reset(&self, _public_keys: &[PublicKeyBytes]) -> Result<(), SigningError> {
        self.shares.lock().clear();
        *self.aggregated.lock() = None;
        Ok(())
    }

    fn create_signature_share_for_public_key(
        &self,
        _message: &[u8],
        index: u16,
        _epoch: u32,
        _public_key: &[u8],
    ) -> Result<SignatureBytes, SigningError> {
        let share = Self::share_for(index);
        self.shares.lock().insert(index, share.clone());
        Ok(share)
    }

    fn create_signature_for_public_key(
        &self,
        _message: &[u8],
        _public_key: &[u8],
    ) -> Result<SignatureBytes, SigningError> {
        Ok(vec![0xAA; SIGNATURE_SIZE])
    }

    fn store_signature_share(&self, index: u16, signature: &[u8]) -> Result<(), SigningError> {
        self.shares.lock().insert(index, signature.to_vec());
        Ok(())
    }

    fn signature_share(&self, index: u16) -> Result<SignatureBytes, SigningError> {
        self.shares
            .lock()
            .get(&index)
            .cloned()
            .ok_or(SigningError::NilSignature)
    }

    fn verify_signature_share(
        &self,
        index: u16,
        signature: &[u8],
        _message: &[u8],
        _epoch: u32,
    ) -> Result<(), SigningError> {
        if signature == Self::share_for(index).as_slice() {
            Ok(())
        } else {
            Err(SigningError::InvalidSignature)
        }
    }

    fn aggregate_sigs(&self, bitmap: &[u8], _epoch: u32) -> Result<SignatureBytes, SigningError> {
        let shares = self.shares.lock();
        let mut aggregated = vec![0u8; SIGNATURE_SIZE];
        for (index, share) in shares.iter() {
            let i = *index as usize;
            let is_signer = bitmap
                .get(i / 8)
                .map(|byte| byte & (1 << (i % 8)) != 0)
                .unwrap_or(false);
            if is_signer {
                aggregated
                    .iter_mut()
                    .zip(share.iter())
                    .for_each(|(a, s)| *a ^= s);
            }
        }
        Ok(aggregated)
    }

    fn set_aggregated_sig(&self, signature: &[u8]) -> Result<(), SigningError> {
        *self.aggregated.lock() = Some(signature.to_vec());
        Ok(())
    }

    fn verify(&self, _message: &[u8], _bitmap: &[u8], _epoch: u32) -> Result<(), SigningError> {
        match self.aggregated.lock().as_ref() {
            Some(_) => Ok(()),
            None => Err(SigningError::NilSignature),
        }
    }
}

/// Keys handler of a single-key node, optionally speaking for some extra `managed` keys.
#[derive(Default)]
pub(crate) struct MockKeysHandler {
    pub(crate) managed: HashSet<PublicKeyBytes>,
}

impl KeysHandler for MockKeysHandler {
    fn is_key_managed_by_current_node(&self, public_key: &[u8]) -> bool {
        self.managed.contains(public_key)
    }

    fn increment_rounds_without_received_messages(&self, _public_key: &[u8]) {}

    fn reset_rounds_without_received_messages(&self, _public_key: &[u8], _pid: &PeerID) {}

    fn get_associated_pid(&self, public_key: &[u8]) -> PeerID {
        pid_of(public_key)
    }

    fn is_original_public_key_of_the_node(&self, _public_key: &[u8]) -> bool {
        true
    }
}

#[derive(Default)]
pub(crate) struct MockHeaderSigVerifier;

impl HeaderSigVerifier for MockHeaderSigVerifier {
    fn verify_leader_signature(&self, header: &Header) -> Result<(), SigningError> {
        if header.leader_signature.is_empty() {
            return Err(SigningError::NilSignature);
        }
        Ok(())
    }

    fn verify_signature(&self, header: &Header) -> Result<(), SigningError> {
        if header.signature.is_empty() || header.pub_keys_bitmap.is_empty() {
            return Err(SigningError::NilSignature);
        }
        Ok(())
    }
}

pub(crate) struct SingleShardCoordinator(pub(crate) ShardID);

impl ShardCoordinator for SingleShardCoordinator {
    fn self_id(&self) -> ShardID {
        self.0
    }

    fn number_of_shards(&self) -> u32 {
        1
    }
}

/// Draws the same group, led by its first member, in every round.
pub(crate) struct FixedNodesCoordinator {
    pub(crate) group: Vec<PublicKeyBytes>,
}

impl NodesCoordinator for FixedNodesCoordinator {
    fn compute_consensus_group(
        &self,
        randomness: &[u8],
        _round: u64,
        _shard_id: ShardID,
        _epoch: u32,
    ) -> Result<(PublicKeyBytes, Vec<PublicKeyBytes>), NodesCoordinatorError> {
        if randomness.is_empty() {
            return Err(NodesCoordinatorError::NilRandomness);
        }
        let leader = self
            .group
            .first()
            .cloned()
            .ok_or(NodesCoordinatorError::InvalidShardId)?;
        Ok((leader, self.group.clone()))
    }

    fn consensus_group_size_for_shard_and_epoch(&self, _shard_id: ShardID, _epoch: u32) -> usize {
        self.group.len()
    }

    fn get_consensus_whitelisted_nodes(
        &self,
        _epoch: u32,
    ) -> Result<HashSet<PublicKeyBytes>, NodesCoordinatorError> {
        Ok(self.group.iter().cloned().collect())
    }

    fn shard_id_for_epoch(&self, _epoch: u32) -> Result<ShardID, NodesCoordinatorError> {
        Ok(0)
    }
}

/// Worker that only remembers what subrounds registered with it.
#[derive(Default)]
pub(crate) struct MockWorker {
    calls: RwLock<HashMap<MessageType, Vec<ReceivedMessageCall>>>,
    header_handlers: RwLock<Vec<ReceivedHeaderCall>>,
    channel: ConsensusStateChangedChannel,
    pub(crate) extended: Mutex<Vec<SubroundId>>,
}

impl MockWorker {
    pub(crate) fn num_calls(&self, msg_type: MessageType) -> usize {
        self.calls.read().get(&msg_type).map_or(0, |calls| calls.len())
    }

    pub(crate) fn num_header_handlers(&self) -> usize {
        self.header_handlers.read().len()
    }

    /// Hands `message` to every receiver registered for its type, as the worker thread would.
    pub(crate) fn deliver(&self, message: &ConsensusMessage) -> bool {
        let Some(msg_type) = message.message_type() else {
            return false;
        };
        let calls = self.calls.read().get(&msg_type).cloned().unwrap_or_default();
        calls.iter().fold(false, |changed, call| call(message) || changed)
    }
}

impl WorkerHandler for MockWorker {
    fn add_received_message_call(&self, msg_type: MessageType, call: ReceivedMessageCall) {
        self.calls.write().entry(msg_type).or_default().push(call);
    }

    fn add_received_header_handler(&self, handler: ReceivedHeaderCall) {
        self.header_handlers.write().push(handler);
    }

    fn remove_all_received_message_calls(&self) {
        self.calls.write().clear();
    }

    fn process_received_message(
        &self,
        _message: &ReceivedMessage,
        _from_connected_peer: &PeerID,
    ) -> Result<(), ConsensusError> {
        Ok(())
    }

    fn extend(&self, subround: SubroundId) {
        self.extended.lock().push(subround);
    }

    fn consensus_state_changed_channel(&self) -> ConsensusStateChangedChannel {
        self.channel.clone()
    }

    fn execute_stored_messages(&self) {}

    fn display_statistics(&self) {}

    fn reset_consensus_messages(&self) {}

    fn received_header(&self, header: &Header, _hash: &CryptoHash) {
        for handler in self.header_handlers.read().iter() {
            handler(header);
        }
    }

    fn close(&self) {}
}

pub(crate) struct MockBootstrapper {
    node_state: RwLock<NodeState>,
}

impl MockBootstrapper {
    pub(crate) fn synchronized() -> MockBootstrapper {
        MockBootstrapper {
            node_state: RwLock::new(NodeState::Synchronized),
        }
    }

    pub(crate) fn set_node_state(&self, node_state: NodeState) {
        *self.node_state.write() = node_state;
    }
}

impl Bootstrapper for MockBootstrapper {
    fn get_node_state(&self) -> NodeState {
        *self.node_state.read()
    }

    fn start_syncing_blocks(&self) -> Result<(), BootstrapError> {
        Ok(())
    }

    fn add_sync_state_listener(&self, _listener: SyncStateListener) {}

    fn set_status_handler(
        &self,
        status_handler: Option<Arc<dyn AppStatusHandler>>,
    ) -> Result<(), BootstrapError> {
        status_handler
            .map(|_| ())
            .ok_or(BootstrapError::NilAppStatusHandler)
    }

    fn close(&self) {}
}

/// A node that is member `self_index` of a consensus group of `keypairs.len()` validators, in round
/// 1 of shard 0, on top of a chain that holds only its genesis block. The first member leads.
pub(crate) struct ConsensusHarness {
    pub(crate) keypairs: Vec<Keypair>,
    pub(crate) keys: Vec<PublicKeyBytes>,
    pub(crate) self_index: usize,
    pub(crate) consensus_state: Arc<ConsensusState>,
    pub(crate) core: ConsensusCore,
    pub(crate) blockchain: Arc<MemBlockChain>,
    pub(crate) block_processor: Arc<MockBlockProcessor>,
    pub(crate) round_handler: Arc<ManualRoundHandler>,
    pub(crate) signing_handler: Arc<MockSigningHandler>,
    pub(crate) peer_honesty: Arc<RecordingPeerHonesty>,
    pub(crate) messenger: Arc<RecordingBroadcastMessenger>,
    pub(crate) antiflood: Arc<MockAntifloodHandler>,
    pub(crate) bootstrapper: Arc<MockBootstrapper>,
    pub(crate) chronology: Arc<Chronology>,
    pub(crate) worker: Arc<MockWorker>,
    pub(crate) app_status: Arc<RecordingAppStatusHandler>,
    pub(crate) sent_signature_tracker: Arc<MockSentSignatureTracker>,
}

impl ConsensusHarness {
    pub(crate) fn new(group_size: usize, self_index: usize) -> ConsensusHarness {
        let keypairs: Vec<Keypair> = (0..group_size)
            .map(|_| Keypair::new(SigningKey::generate(&mut OsRng)))
            .collect();
        let keys: Vec<PublicKeyBytes> = keypairs.iter().map(|kp| kp.public_bytes()).collect();

        let round_consensus = RoundConsensus::new(
            keys.iter().cloned().collect(),
            group_size,
            keys[self_index].clone(),
            Some(Arc::new(MockKeysHandler::default()) as Arc<dyn KeysHandler>),
        )
        .unwrap();
        let consensus_state = Arc::new(ConsensusState::new(round_consensus));
        consensus_state.set_consensus_group(keys.clone());
        consensus_state.set_leader(keys[0].clone());
        consensus_state.set_thresholds_for_group_size(group_size);
        consensus_state.set_round_index(1);
        consensus_state.set_round_timestamp(SystemTime::now());

        let blockchain = Arc::new(MemBlockChain::new(genesis_header(0)));
        let storage = Arc::new(MemBlockStorage::default());
        let block_processor = Arc::new(MockBlockProcessor::new(blockchain.clone(), storage));
        let round_handler = Arc::new(ManualRoundHandler::new(1, Duration::from_secs(4)));
        let signing_handler = Arc::new(MockSigningHandler::default());
        let peer_honesty = Arc::new(RecordingPeerHonesty::default());
        let messenger = Arc::new(RecordingBroadcastMessenger::default());
        let antiflood = Arc::new(MockAntifloodHandler::default());
        let bootstrapper = Arc::new(MockBootstrapper::synchronized());
        let app_status = Arc::new(RecordingAppStatusHandler::default());
        let chronology = Arc::new(
            Chronology::new(
                ChronologyArgs::builder()
                    .genesis_time(SystemTime::UNIX_EPOCH)
                    .round_handler(round_handler.clone())
                    .sync_timer(Arc::new(SystemSyncTimer))
                    .app_status_handler(app_status.clone())
                    .build(),
            )
            .unwrap(),
        );

        let core = ConsensusCore::builder()
            .blockchain(blockchain.clone())
            .block_processor(block_processor.clone())
            .bootstrapper(bootstrapper.clone())
            .broadcast_messenger(messenger.clone())
            .chronology_handler(chronology.clone())
            .hasher(Arc::new(Sha256Hasher))
            .marshalizer(Arc::new(BorshMarshalizer))
            .signing_handler(signing_handler.clone())
            .round_handler(round_handler.clone())
            .shard_coordinator(Arc::new(SingleShardCoordinator(0)))
            .sync_timer(Arc::new(SystemSyncTimer))
            .nodes_coordinator(Arc::new(FixedNodesCoordinator {
                group: keys.clone(),
            }))
            .antiflood_handler(antiflood.clone())
            .peer_honesty_handler(peer_honesty.clone())
            .header_sig_verifier(Arc::new(MockHeaderSigVerifier))
            .fallback_header_validator(Arc::new(MockFallbackValidator))
            .node_redundancy_handler(Arc::new(MockRedundancy))
            .peer_signature_handler(Arc::new(Ed25519PeerSignatureHandler))
            .peer_blacklist_handler(Arc::new(MockPeerBlacklist))
            .enable_epochs_handler(Arc::new(MockEnableEpochs::default()))
            .build();

        ConsensusHarness {
            keypairs,
            keys,
            self_index,
            consensus_state,
            core,
            blockchain,
            block_processor,
            round_handler,
            signing_handler,
            peer_honesty,
            messenger,
            antiflood,
            bootstrapper,
            chronology,
            worker: Arc::new(MockWorker::default()),
            app_status,
            sent_signature_tracker: Arc::new(MockSentSignatureTracker::default()),
        }
    }

    pub(crate) fn self_key(&self) -> &PublicKeyBytes {
        &self.keys[self.self_index]
    }

    /// Base of the subround `current`, running over the first quarter of the round.
    pub(crate) fn subround(&self, current: SubroundId) -> Subround {
        let worker = self.worker.clone();
        Subround::new(
            SubroundArgs::builder()
                .current(current)
                .start_time(Duration::ZERO)
                .end_time(Duration::from_secs(1))
                .consensus_state(self.consensus_state.clone())
                .consensus_state_changed_channel(self.worker.consensus_state_changed_channel())
                .execute_stored_messages(Arc::new(move || worker.execute_stored_messages()))
                .core(self.core.clone())
                .chain_id(chain_id())
                .current_pid(pid_of(self.self_key()))
                .app_status_handler(self.app_status.clone())
                .build(),
        )
        .unwrap()
    }

    /// The block the leader proposes in round 1, on top of genesis.
    pub(crate) fn proposed_header(&self) -> (Header, CryptoHash) {
        let genesis = genesis_header(0);
        let header = make_header(0, 1, 1, hash_of(&genesis));
        let hash = hash_of(&header);
        (header, hash)
    }

    /// Stores the proposed block as if it had been received from the leader.
    pub(crate) fn set_proposed_block(&self) -> (Header, CryptoHash) {
        let (header, hash) = self.proposed_header();
        assert!(self.consensus_state.try_set_block(
            Some(hash.clone()),
            Some(Body::default()),
            Some(header.clone()),
        ));
        (header, hash)
    }

    /// A message of type `msg_type` from group member `sender` in the current round.
    pub(crate) fn message_from(&self, sender: usize, msg_type: MessageType) -> ConsensusMessage {
        let pub_key = self.keys[sender].clone();
        ConsensusMessage::builder()
            .pub_key(pub_key.clone())
            .msg_type(msg_type)
            .round_index(self.round_handler.index())
            .chain_id(chain_id())
            .originator_pid(pid_of(&pub_key))
            .build()
    }

    /// A signature share of group member `sender` on `hash`.
    pub(crate) fn signature_from(&self, sender: usize, hash: &CryptoHash) -> ConsensusMessage {
        let mut message = self.message_from(sender, MessageType::Signature);
        message.block_header_hash = hash.bytes().to_vec();
        message.signature_share = MockSigningHandler::share_for(sender as u16);
        message
    }

    /// The header of `header` marshalled as the leader sends it.
    pub(crate) fn header_message(&self, header: &Header, hash: &CryptoHash) -> ConsensusMessage {
        let mut message = self.message_from(0, MessageType::BlockHeader);
        message.block_header_hash = hash.bytes().to_vec();
        message.header = BorshMarshalizer.marshal_header(header).unwrap();
        message
    }

    pub(crate) fn body_message(&self, body: &Body) -> ConsensusMessage {
        let mut message = self.message_from(0, MessageType::BlockBody);
        message.body = BorshMarshalizer.marshal_body(body).unwrap();
        message
    }

    /// Arguments of a real worker serving this node, with every collaborator set.
    pub(crate) fn worker_args(&self) -> WorkerArgs {
        let genesis = genesis_header(0);
        let pools_holder = MemPoolsHolder::new();
        let fork_detector = new_shard_fork_detector(
            ArgBaseForkDetector::builder()
                .round_handler(self.round_handler.clone())
                .black_list_handler(Arc::new(MemTimeCacher::default()))
                .block_tracker(Arc::new(MemBlockTracker::new(Some((
                    genesis.clone(),
                    hash_of(&genesis),
                )))))
                .genesis_time(0)
                .enable_epochs_handler(Arc::new(MockEnableEpochs::default()))
                .proofs_pool(pools_holder.proofs.clone().unwrap())
                .build(),
        )
        .unwrap();

        WorkerArgs::builder()
            .block_processor(self.block_processor.clone())
            .consensus_state(self.consensus_state.clone())
            .fork_detector(fork_detector as Arc<dyn ForkDetector>)
            .marshalizer(Arc::new(BorshMarshalizer))
            .hasher(Arc::new(Sha256Hasher))
            .round_handler(self.round_handler.clone())
            .shard_coordinator(Arc::new(SingleShardCoordinator(0)))
            .peer_signature_handler(Arc::new(Ed25519PeerSignatureHandler))
            .sync_timer(Arc::new(SystemSyncTimer))
            .chain_id(chain_id())
            .antiflood_handler(self.antiflood.clone())
            .signature_size(SIGNATURE_SIZE)
            .public_key_size(PUBLIC_KEY_SIZE)
            .node_redundancy_handler(Arc::new(MockRedundancy))
            .peer_blacklist_handler(Arc::new(MockPeerBlacklist))
            .build()
    }
}

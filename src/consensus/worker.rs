/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Receives messages from the consensus topic and hands them to the subrounds.
//!
//! Main type: [`Worker`].
//!
//! ## Message flow
//!
//! [`process_received_message`](WorkerHandler::process_received_message) is called by the networking
//! layer for every message on the consensus topic. A message that survives the
//! [validator](crate::consensus::message_validator) is stored by type. Stored messages are replayed
//! whenever a subround begins and whenever a new message arrives: every message of the current round
//! whose subround may already proceed is sent to the worker thread, which calls the receivers the
//! subrounds registered for its type. A receiver that returns `true` changed the consensus state, so
//! the worker wakes the running subround through the
//! [`ConsensusStateChangedChannel`](crate::consensus::subround::ConsensusStateChangedChannel).

use std::collections::HashMap;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use typed_builder::TypedBuilder;

use crate::consensus::consensus_topic_id;
use crate::consensus::errors::ConsensusError;
use crate::consensus::message_validator::{
    ConsensusMessageValidator, ConsensusMessageValidatorArgs,
};
use crate::consensus::messages::{ConsensusMessage, MessageType};
use crate::consensus::state::ConsensusState;
use crate::consensus::subround::{ConsensusStateChangedChannel, SubroundId};
use crate::pluggables::{
    chain::BlockProcessor,
    crypto::PeerSignatureHandler,
    encoding::{Hasher, Marshalizer},
    network::{AntifloodHandler, PeerBlacklistHandler},
    sharding::ShardCoordinator,
    status::NodeRedundancyHandler,
    timing::{RoundHandler, SyncTimer},
};
use crate::sync::fork_detector::{BlockHeaderState, ForkDetector};
use crate::types::block::Header;
use crate::types::data_types::{ChainID, CryptoHash, PeerID};

/// How long a peer that sent an invalid consensus message is blacklisted for.
pub const INVALID_MESSAGE_BLACKLIST_DURATION: Duration = Duration::from_secs(4 * 3600);

/// How long the worker thread waits for a message before checking whether it should stop.
const CHECK_CHANNELS_TIMEOUT: Duration = Duration::from_millis(5);

/// Receiver a subround registers for one [`MessageType`]. Returns whether the message changed the
/// consensus state.
pub type ReceivedMessageCall = Arc<dyn Fn(&ConsensusMessage) -> bool + Send + Sync>;

/// Receiver of complete headers of the current round arriving through the headers pool.
pub type ReceivedHeaderCall = Arc<dyn Fn(&Header) + Send + Sync>;

/// A message as delivered by the peer-to-peer layer.
#[derive(Clone, Debug, Default)]
pub struct ReceivedMessage {
    /// The marshalled [`ConsensusMessage`].
    pub data: Vec<u8>,
    /// Peer that originated the message.
    pub peer: PeerID,
    /// Signature of the peer-to-peer message.
    pub signature: Vec<u8>,
}

/// The interface through which subrounds and the factory reach the worker.
pub trait WorkerHandler: Send + Sync {
    fn add_received_message_call(&self, msg_type: MessageType, call: ReceivedMessageCall);

    fn add_received_header_handler(&self, handler: ReceivedHeaderCall);

    fn remove_all_received_message_calls(&self);

    fn process_received_message(
        &self,
        message: &ReceivedMessage,
        from_connected_peer: &PeerID,
    ) -> Result<(), ConsensusError>;

    /// Called by a subround that timed out. Reverts the block executed in the round, if any.
    fn extend(&self, subround: SubroundId);

    fn consensus_state_changed_channel(&self) -> ConsensusStateChangedChannel;

    fn execute_stored_messages(&self);

    fn display_statistics(&self);

    fn reset_consensus_messages(&self);

    fn received_header(&self, header: &Header, hash: &CryptoHash);

    fn close(&self);
}

/// Arguments of [`Worker::new`].
#[derive(TypedBuilder)]
pub struct WorkerArgs {
    #[builder(default, setter(strip_option))]
    pub block_processor: Option<Arc<dyn BlockProcessor>>,
    #[builder(default, setter(strip_option))]
    pub consensus_state: Option<Arc<ConsensusState>>,
    #[builder(default, setter(strip_option))]
    pub fork_detector: Option<Arc<dyn ForkDetector>>,
    #[builder(default, setter(strip_option))]
    pub marshalizer: Option<Arc<dyn Marshalizer>>,
    #[builder(default, setter(strip_option))]
    pub hasher: Option<Arc<dyn Hasher>>,
    #[builder(default, setter(strip_option))]
    pub round_handler: Option<Arc<dyn RoundHandler>>,
    #[builder(default, setter(strip_option))]
    pub shard_coordinator: Option<Arc<dyn ShardCoordinator>>,
    #[builder(default, setter(strip_option))]
    pub peer_signature_handler: Option<Arc<dyn PeerSignatureHandler>>,
    #[builder(default, setter(strip_option))]
    pub sync_timer: Option<Arc<dyn SyncTimer>>,
    pub chain_id: ChainID,
    #[builder(default, setter(strip_option))]
    pub antiflood_handler: Option<Arc<dyn AntifloodHandler>>,
    pub signature_size: usize,
    pub public_key_size: usize,
    #[builder(default, setter(strip_option))]
    pub node_redundancy_handler: Option<Arc<dyn NodeRedundancyHandler>>,
    #[builder(default, setter(strip_option))]
    pub peer_blacklist_handler: Option<Arc<dyn PeerBlacklistHandler>>,
}

type ReceivedMessageCalls = Arc<RwLock<HashMap<MessageType, Vec<ReceivedMessageCall>>>>;

pub struct Worker {
    block_processor: Arc<dyn BlockProcessor>,
    consensus_state: Arc<ConsensusState>,
    fork_detector: Arc<dyn ForkDetector>,
    marshalizer: Arc<dyn Marshalizer>,
    round_handler: Arc<dyn RoundHandler>,
    shard_coordinator: Arc<dyn ShardCoordinator>,
    sync_timer: Arc<dyn SyncTimer>,
    antiflood_handler: Arc<dyn AntifloodHandler>,
    node_redundancy_handler: Arc<dyn NodeRedundancyHandler>,
    peer_blacklist_handler: Arc<dyn PeerBlacklistHandler>,
    message_validator: ConsensusMessageValidator,

    received_messages: Mutex<HashMap<MessageType, Vec<Option<ConsensusMessage>>>>,
    received_message_calls: ReceivedMessageCalls,
    received_header_handlers: RwLock<Vec<ReceivedHeaderCall>>,
    /// Signature messages received in the round, grouped by the header hash they sign.
    displayed_signatures: Mutex<HashMap<CryptoHash, Vec<ConsensusMessage>>>,

    execute_message_sender: Sender<ConsensusMessage>,
    execute_message_receiver: Mutex<Option<Receiver<ConsensusMessage>>>,
    consensus_state_changed_channel: ConsensusStateChangedChannel,
    worker_thread: Mutex<Option<(Sender<()>, JoinHandle<()>)>>,
}

impl Worker {
    pub fn new(args: WorkerArgs) -> Result<Worker, ConsensusError> {
        let block_processor = args
            .block_processor
            .ok_or(ConsensusError::NilBlockProcessor)?;
        let consensus_state = args
            .consensus_state
            .ok_or(ConsensusError::NilConsensusState)?;
        let fork_detector = args
            .fork_detector
            .ok_or(ConsensusError::NilForkDetector)?;
        let marshalizer = args.marshalizer.ok_or(ConsensusError::NilMarshalizer)?;
        let hasher = args.hasher.ok_or(ConsensusError::NilHasher)?;
        let round_handler = args
            .round_handler
            .ok_or(ConsensusError::NilRoundHandler)?;
        let shard_coordinator = args
            .shard_coordinator
            .ok_or(ConsensusError::NilShardCoordinator)?;
        let peer_signature_handler = args
            .peer_signature_handler
            .ok_or(ConsensusError::NilPeerSignatureHandler)?;
        let sync_timer = args.sync_timer.ok_or(ConsensusError::NilSyncTimer)?;
        if args.chain_id.is_empty() {
            return Err(ConsensusError::InvalidChainID);
        }
        let antiflood_handler = args
            .antiflood_handler
            .ok_or(ConsensusError::NilAntifloodHandler)?;
        if args.signature_size == 0 {
            return Err(ConsensusError::InvalidSignatureSize);
        }
        if args.public_key_size == 0 {
            return Err(ConsensusError::InvalidPublicKeySize);
        }
        let node_redundancy_handler = args
            .node_redundancy_handler
            .ok_or(ConsensusError::NilNodeRedundancyHandler)?;
        let peer_blacklist_handler = args
            .peer_blacklist_handler
            .ok_or(ConsensusError::NilPeerBlacklistHandler)?;

        let message_validator = ConsensusMessageValidator::new(ConsensusMessageValidatorArgs {
            consensus_state: Some(consensus_state.clone()),
            peer_signature_handler: Some(peer_signature_handler),
            signature_size: args.signature_size,
            public_key_size: args.public_key_size,
            header_hash_size: hasher.size(),
            chain_id: args.chain_id,
        })?;

        let (execute_message_sender, execute_message_receiver) = mpsc::channel();

        Ok(Worker {
            block_processor,
            consensus_state,
            fork_detector,
            marshalizer,
            round_handler,
            shard_coordinator,
            sync_timer,
            antiflood_handler,
            node_redundancy_handler,
            peer_blacklist_handler,
            message_validator,
            received_messages: Mutex::new(HashMap::new()),
            received_message_calls: Arc::new(RwLock::new(HashMap::new())),
            received_header_handlers: RwLock::new(Vec::new()),
            displayed_signatures: Mutex::new(HashMap::new()),
            execute_message_sender,
            execute_message_receiver: Mutex::new(Some(execute_message_receiver)),
            consensus_state_changed_channel: ConsensusStateChangedChannel::new(),
            worker_thread: Mutex::new(None),
        })
    }

    /// Signatures received in this round for the header with `hash`.
    pub fn num_received_signatures(&self, hash: &CryptoHash) -> usize {
        self.displayed_signatures
            .lock()
            .get(hash)
            .map_or(0, |messages| messages.len())
    }

    /// Starts the thread that feeds stored messages to the subrounds. Calling this more than once has
    /// no effect.
    pub fn start_working(&self) {
        let Some(execute_message_receiver) = self.execute_message_receiver.lock().take() else {
            return;
        };
        let received_message_calls = self.received_message_calls.clone();
        let consensus_state_changed_channel = self.consensus_state_changed_channel.clone();
        let (shutdown_sender, shutdown_receiver) = mpsc::channel();

        let handle = thread::spawn(move || loop {
            match shutdown_receiver.try_recv() {
                Ok(()) => return,
                Err(TryRecvError::Empty) => (),
                Err(TryRecvError::Disconnected) => return,
            }

            match execute_message_receiver.recv_timeout(CHECK_CHANNELS_TIMEOUT) {
                Ok(message) => {
                    let Some(msg_type) = message.message_type() else {
                        continue;
                    };
                    let calls = received_message_calls
                        .read()
                        .get(&msg_type)
                        .cloned()
                        .unwrap_or_default();
                    for call in calls {
                        if call(&message) {
                            consensus_state_changed_channel.notify();
                        }
                    }
                }
                Err(RecvTimeoutError::Timeout) => (),
                Err(RecvTimeoutError::Disconnected) => return,
            }
        });

        *self.worker_thread.lock() = Some((shutdown_sender, handle));
    }

    fn do_job_on_message_with_header(&self, message: &ConsensusMessage) -> Result<(), ConsensusError> {
        if message.block_header_hash.is_empty() {
            return Err(ConsensusError::InvalidHeader);
        }
        let header = self
            .block_processor
            .decode_block_header(&message.header)
            .ok_or(ConsensusError::InvalidHeader)?;
        header
            .check_fields_for_nil()
            .map_err(|_| ConsensusError::InvalidHeader)?;

        let header_hash = CryptoHash::new(message.block_header_hash.clone());
        if let Err(err) =
            self.fork_detector
                .add_header(Some(&header), &header_hash, BlockHeaderState::Proposed, &[], &[])
        {
            log::debug!("doJobOnMessageWithHeader.AddHeader: {}", err);
        }

        Ok(())
    }

    fn do_job_on_message_with_signature(&self, message: &ConsensusMessage) {
        self.displayed_signatures
            .lock()
            .entry(CryptoHash::new(message.block_header_hash.clone()))
            .or_default()
            .push(message.clone());
    }

    /// Messages from keys this node manages, and messages of a canceled round, are not executed.
    fn check_self_state(&self, message: &ConsensusMessage) -> Result<(), ConsensusError> {
        let state = &self.consensus_state;
        if state.is_node_self(&message.pub_key) || state.is_key_managed_by_self(&message.pub_key) {
            return Err(ConsensusError::MessageFromItself);
        }
        if state.round_canceled() && state.round_index() == message.round_index {
            return Err(ConsensusError::RoundCanceled);
        }
        Ok(())
    }

    fn execute_received_message(&self, message: ConsensusMessage) {
        let Some(msg_type) = message.message_type() else {
            return;
        };
        let mut received_messages = self.received_messages.lock();
        received_messages
            .entry(msg_type)
            .or_default()
            .push(Some(message));
        self.execute_stored_messages_locked(&mut received_messages);
    }

    fn execute_stored_messages_locked(
        &self,
        received_messages: &mut HashMap<MessageType, Vec<Option<ConsensusMessage>>>,
    ) {
        for msg_type in MessageType::RECEIVABLE {
            let Some(messages) = received_messages.get_mut(&msg_type) else {
                continue;
            };
            for slot in messages.iter_mut() {
                let can_execute = match slot {
                    Some(message) => {
                        message.round_index == self.consensus_state.round_index()
                            && can_proceed(&self.consensus_state, msg_type)
                    }
                    None => false,
                };
                if !can_execute {
                    continue;
                }
                if let Some(message) = slot.take() {
                    let _ = self.execute_message_sender.send(message);
                }
            }
        }
    }

    fn should_blacklist_peer(err: &ConsensusError) -> bool {
        !matches!(
            err,
            ConsensusError::MessageForPastRound
                | ConsensusError::MessageForFutureRound
                | ConsensusError::NodeIsNotInEligibleList
                | ConsensusError::MessageTypeLimitReached
                | ConsensusError::InvalidSignature
                | ConsensusError::NodesCoordinator(_)
        )
    }

    fn check_received_message(
        &self,
        message: &ReceivedMessage,
    ) -> Result<ConsensusMessage, ConsensusError> {
        let consensus_message = self.marshalizer.unmarshal_message(&message.data)?;

        self.consensus_state
            .reset_rounds_without_received_messages(&consensus_message.pub_key, &message.peer);

        let msg_type = consensus_message.msg_type;
        log::trace!(
            "received message {} from consensus topic, round {}",
            crate::consensus::messages::message_type_label(msg_type),
            consensus_message.round_index
        );

        self.message_validator
            .check_consensus_message_validity(&consensus_message, &message.peer)?;

        Ok(consensus_message)
    }
}

impl WorkerHandler for Worker {
    fn add_received_message_call(&self, msg_type: MessageType, call: ReceivedMessageCall) {
        self.received_message_calls
            .write()
            .entry(msg_type)
            .or_default()
            .push(call);
    }

    fn add_received_header_handler(&self, handler: ReceivedHeaderCall) {
        self.received_header_handlers.write().push(handler);
    }

    fn remove_all_received_message_calls(&self) {
        self.received_message_calls.write().clear();
        self.received_header_handlers.write().clear();
    }

    fn process_received_message(
        &self,
        message: &ReceivedMessage,
        from_connected_peer: &PeerID,
    ) -> Result<(), ConsensusError> {
        if message.data.is_empty() {
            return Err(ConsensusError::NilDataToProcess);
        }
        if message.signature.is_empty() {
            return Err(ConsensusError::NilSignatureOnP2PMessage);
        }
        if self.peer_blacklist_handler.is_peer_blacklisted(from_connected_peer) {
            log::debug!("received message from blacklisted consensus peer {}", from_connected_peer);
            return Err(ConsensusError::BlacklistedConsensusPeer);
        }

        self.antiflood_handler
            .can_process_message(message.data.len(), &message.peer)?;

        let consensus_message = match self.check_received_message(message) {
            Ok(consensus_message) => consensus_message,
            Err(err) => {
                if Self::should_blacklist_peer(&err) {
                    let topic = consensus_topic_id(self.shard_coordinator.as_ref());
                    self.antiflood_handler.blacklist_peer(
                        &message.peer,
                        &format!("{} on topic {}", err, topic),
                        INVALID_MESSAGE_BLACKLIST_DURATION,
                    );
                }
                return Err(err);
            }
        };

        if self.node_redundancy_handler.is_redundancy_node() {
            log::trace!("redundancy node received a message from {}", message.peer);
        }

        let Some(msg_type) = consensus_message.message_type() else {
            return Err(ConsensusError::InvalidMessageType {
                msg_type: consensus_message.msg_type,
            });
        };

        if msg_type.is_with_block_header() || msg_type.is_with_block_body_and_header() {
            self.do_job_on_message_with_header(&consensus_message)?;
        }
        if msg_type.is_with_signature() {
            self.do_job_on_message_with_signature(&consensus_message);
        }

        if let Err(err) = self.check_self_state(&consensus_message) {
            log::trace!("checkSelfState: {}", err);
            return Ok(());
        }

        self.execute_received_message(consensus_message);

        Ok(())
    }

    fn extend(&self, subround: SubroundId) {
        self.consensus_state.set_extended_called(true);
        log::debug!("extend function is called from subround {}", subround.name());

        self.display_statistics();

        if subround == SubroundId::StartRound {
            return;
        }

        while self.consensus_state.processing_block() {
            thread::sleep(Duration::from_millis(1));
        }

        log::debug!("account state is reverted to snapshot");
        self.block_processor.revert_current_block();
    }

    fn consensus_state_changed_channel(&self) -> ConsensusStateChangedChannel {
        self.consensus_state_changed_channel.clone()
    }

    fn execute_stored_messages(&self) {
        let mut received_messages = self.received_messages.lock();
        self.execute_stored_messages_locked(&mut received_messages);
    }

    fn display_statistics(&self) {
        let mut displayed_signatures = self.displayed_signatures.lock();
        for (hash, messages) in displayed_signatures.iter() {
            log::debug!(
                "proposed header with signatures, hash {}, received signatures {}, at {}",
                hash,
                messages.len(),
                self.sync_timer.formatted_current_time()
            );
        }
        displayed_signatures.clear();

        let round = self.consensus_state.round_index();
        log::debug!(
            "{} peers sent consensus messages in round {}",
            self.message_validator.senders_in_round(round).len(),
            round
        );
    }

    fn reset_consensus_messages(&self) {
        self.message_validator.reset_consensus_messages();
        self.received_messages.lock().clear();
        self.displayed_signatures.lock().clear();
    }

    fn received_header(&self, header: &Header, _hash: &CryptoHash) {
        let is_header_for_other_shard = header.shard_id != self.shard_coordinator.self_id();
        let is_header_for_other_round = header.round as i64 != self.round_handler.index();
        if is_header_for_other_shard || is_header_for_other_round {
            return;
        }

        for handler in self.received_header_handlers.read().iter() {
            handler(header);
        }

        self.consensus_state_changed_channel.notify();
    }

    fn close(&self) {
        self.remove_all_received_message_calls();
        if let Some((shutdown_sender, handle)) = self.worker_thread.lock().take() {
            let _ = shutdown_sender.send(());
            let _ = handle.join();
        }
    }
}

/// Whether a message of `msg_type` may be executed given how far the round has progressed.
pub fn can_proceed(consensus_state: &ConsensusState, msg_type: MessageType) -> bool {
    match msg_type {
        MessageType::BlockBodyAndHeader | MessageType::BlockBody | MessageType::BlockHeader => {
            consensus_state.is_subround_finished(SubroundId::StartRound)
        }
        MessageType::Signature => consensus_state.is_subround_finished(SubroundId::Block),
        MessageType::BlockHeaderFinalInfo => {
            consensus_state.is_subround_finished(SubroundId::Signature)
        }
        MessageType::Unknown => false,
    }
}

/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Methods to start and stop the threads of a consensus node.
//!
//! A node runs four threads:
//! 1. The [worker](crate::consensus::worker) thread, which feeds received consensus messages to the
//!    subrounds.
//! 2. The [bootstrapper](crate::sync::bootstrap) thread, which keeps the local chain up to date.
//! 3. The [chronology](crate::consensus::chronology) thread, which drives the subrounds of each round.
//! 4. The [event bus](crate::event_bus) thread, if any event handler is registered or
//!    [`log_events`](Configuration::log_events) is set.
//!
//! ## Starting a node
//!
//! The event channel is created by the library user, so that its sender can be given to the subrounds
//! factory and the bootstrapper when they are built, and its receiver to the node:
//!
//! ```ignore
//! let (event_publisher, event_subscriber) = mpsc::channel();
//!
//! let bootstrapper = ShardBootstrap::new(
//!     ArgShardBootstrapper::builder()
//!         // ...
//!         .event_publisher(Some(event_publisher.clone()))
//!         .build(),
//! )?;
//! let subrounds_factory = SubroundsFactory::new(
//!     SubroundsFactoryArgs::builder()
//!         // ...
//!         .event_publisher(Some(event_publisher))
//!         .build(),
//! )?;
//!
//! let node = NodeSpec::builder()
//!     .configuration(configuration)
//!     .subrounds_factory(subrounds_factory)
//!     .worker(worker)
//!     .chronology(chronology)
//!     .bootstrapper(Arc::new(bootstrapper))
//!     .event_subscriber(event_subscriber)
//!     .on_commit_block(commit_handler)
//!     .build()
//!     .start()?;
//! ```
//!
//! Dropping the returned [`Node`] stops every thread.

use std::fmt::{self, Display, Formatter};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::thread::JoinHandle;

use typed_builder::TypedBuilder;

use crate::consensus::chronology::{Chronology, ChronologyHandler};
use crate::consensus::errors::ConsensusError;
use crate::consensus::factory::SubroundsFactory;
use crate::consensus::worker::{Worker, WorkerHandler};
use crate::event_bus::*;
use crate::events::*;
use crate::logging::first_seven_base64_chars;
use crate::sync::bootstrap::Bootstrapper;
use crate::sync::errors::BootstrapError;
use crate::types::block::Header;
use crate::types::data_types::{ChainID, PeerID, PublicKeyBytes, ShardID};

/// Parameters of a node that are not collaborators.
#[derive(TypedBuilder)]
#[builder(builder_method(doc = "
    Create a builder for building a [Configuration].

    Required:
    - `.chain_id(...)`
    - `.shard_id(...)`
    - `.self_public_key(...)`
    - `.log_events(...)`

    Optional:
    - `.self_pid(...)`
"))]
pub struct Configuration {
    #[builder(setter(doc = "Set the chain ID of the blockchain. Required."))]
    pub chain_id: ChainID,
    #[builder(setter(doc = "Set the shard this node validates. Required."))]
    pub shard_id: ShardID,
    #[builder(setter(doc = "Set the public key this node participates in consensus with. Required."))]
    pub self_public_key: PublicKeyBytes,
    #[builder(default, setter(doc = "Set the peer ID of this node. Optional."))]
    pub self_pid: PeerID,
    #[builder(setter(doc = "Enable logging of events? Required."))]
    pub log_events: bool,
}

/// Everything needed to run a node.
#[derive(TypedBuilder)]
#[builder(builder_method(doc = "
    Create a builder for building a [NodeSpec].

    Required:
    - `.configuration(...)`
    - `.subrounds_factory(...)`
    - `.worker(...)`
    - `.chronology(...)`
    - `.bootstrapper(...)`

    Optional:
    - `.event_subscriber(...)`
    - `.on_start_round(...)`
    - `.on_propose_block(...)`
    - `.on_receive_block(...)`
    - `.on_send_signature(...)`
    - `.on_receive_signature(...)`
    - `.on_commit_block(...)`
    - `.on_round_canceled(...)`
    - `.on_subround_timeout(...)`
    - `.on_fork_detected(...)`
    - `.on_roll_back(...)`
    - `.on_sync_block(...)`
    - `.on_node_state_changed(...)`
"))]
pub struct NodeSpec {
    // Required parameters
    #[builder(setter(doc = "Set the [configuration](Configuration). Required."))]
    configuration: Configuration,
    #[builder(setter(doc = "Set the factory that generates the subrounds. Required."))]
    subrounds_factory: SubroundsFactory,
    #[builder(setter(doc = "Set the worker that receives consensus messages. Required."))]
    worker: Arc<Worker>,
    #[builder(setter(doc = "Set the chronology the subrounds are registered with. Required."))]
    chronology: Arc<Chronology>,
    #[builder(setter(doc = "Set the bootstrapper that keeps the chain up to date. Required."))]
    bootstrapper: Arc<dyn Bootstrapper>,
    // Optional parameters
    #[builder(default, setter(strip_option, doc = "Set the receiving end of the channel whose sending end was given to the subrounds factory and the bootstrapper. Optional."))]
    event_subscriber: Option<Receiver<Event>>,
    #[builder(default, setter(transform = |handler: impl Fn(&StartRoundEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<StartRoundEvent>),
    doc = "Register a handler closure to be invoked after a round starts. Optional."))]
    on_start_round: Option<HandlerPtr<StartRoundEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&ProposeBlockEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<ProposeBlockEvent>),
    doc = "Register a handler closure to be invoked after the node, as leader, broadcasts a block. Optional."))]
    on_propose_block: Option<HandlerPtr<ProposeBlockEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&ReceiveBlockEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<ReceiveBlockEvent>),
    doc = "Register a handler closure to be invoked after the node executes a block received from the leader. Optional."))]
    on_receive_block: Option<HandlerPtr<ReceiveBlockEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&SendSignatureEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<SendSignatureEvent>),
    doc = "Register a handler closure to be invoked after the node sends a signature share. Optional."))]
    on_send_signature: Option<HandlerPtr<SendSignatureEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&ReceiveSignatureEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<ReceiveSignatureEvent>),
    doc = "Register a handler closure to be invoked after the leader stores a signature share. Optional."))]
    on_receive_signature: Option<HandlerPtr<ReceiveSignatureEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&CommitBlockEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<CommitBlockEvent>),
    doc = "Register a handler closure to be invoked after a block is committed by consensus. Optional."))]
    on_commit_block: Option<HandlerPtr<CommitBlockEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&RoundCanceledEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<RoundCanceledEvent>),
    doc = "Register a handler closure to be invoked after a round is canceled. Optional."))]
    on_round_canceled: Option<HandlerPtr<RoundCanceledEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&SubroundTimeoutEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<SubroundTimeoutEvent>),
    doc = "Register a handler closure to be invoked after a subround times out. Optional."))]
    on_subround_timeout: Option<HandlerPtr<SubroundTimeoutEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&ForkDetectedEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<ForkDetectedEvent>),
    doc = "Register a handler closure to be invoked before the bootstrapper resolves a fork. Optional."))]
    on_fork_detected: Option<HandlerPtr<ForkDetectedEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&RollBackEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<RollBackEvent>),
    doc = "Register a handler closure to be invoked after a block is reverted. Optional."))]
    on_roll_back: Option<HandlerPtr<RollBackEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&SyncBlockEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<SyncBlockEvent>),
    doc = "Register a handler closure to be invoked after the bootstrapper commits a block. Optional."))]
    on_sync_block: Option<HandlerPtr<SyncBlockEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&NodeStateChangedEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<NodeStateChangedEvent>),
    doc = "Register a handler closure to be invoked after the node becomes synchronized or falls behind. Optional."))]
    on_node_state_changed: Option<HandlerPtr<NodeStateChangedEvent>>,
}

impl NodeSpec {
    /// Generates the subrounds, then starts the worker, bootstrapper, chronology, and event bus threads.
    pub fn start(self) -> Result<Node, NodeError> {
        let configuration = &self.configuration;
        if configuration.chain_id.is_empty() {
            return Err(NodeError::InvalidChainID);
        }
        if configuration.self_public_key.is_empty() {
            return Err(NodeError::InvalidPublicKey);
        }
        log::info!(
            "starting node: chain {}, shard {}, public key {}, pid {}",
            configuration.chain_id,
            configuration.shard_id,
            first_seven_base64_chars(&configuration.self_public_key),
            configuration.self_pid
        );

        let mut event_handlers = EventHandlers::default();
        event_handlers.start_round_handlers.extend(self.on_start_round);
        event_handlers.propose_block_handlers.extend(self.on_propose_block);
        event_handlers.receive_block_handlers.extend(self.on_receive_block);
        event_handlers.send_signature_handlers.extend(self.on_send_signature);
        event_handlers
            .receive_signature_handlers
            .extend(self.on_receive_signature);
        event_handlers.commit_block_handlers.extend(self.on_commit_block);
        event_handlers.round_canceled_handlers.extend(self.on_round_canceled);
        event_handlers
            .subround_timeout_handlers
            .extend(self.on_subround_timeout);
        event_handlers.fork_detected_handlers.extend(self.on_fork_detected);
        event_handlers.roll_back_handlers.extend(self.on_roll_back);
        event_handlers.sync_block_handlers.extend(self.on_sync_block);
        event_handlers
            .node_state_changed_handlers
            .extend(self.on_node_state_changed);
        if self.configuration.log_events {
            event_handlers.add_loggers();
        }

        self.subrounds_factory.generate_subrounds()?;
        self.worker.start_working();
        self.bootstrapper.start_syncing_blocks()?;
        self.chronology.start_rounds();

        let event_bus = match self.event_subscriber {
            Some(event_subscriber) if !event_handlers.is_empty() => {
                let (event_bus_shutdown, event_bus_shutdown_receiver) = mpsc::channel();
                let handle = start_event_bus(
                    event_handlers,
                    event_subscriber,
                    event_bus_shutdown_receiver,
                );
                Some((event_bus_shutdown, handle))
            }
            _ => None,
        };

        Ok(Node {
            subrounds_factory: self.subrounds_factory,
            worker: self.worker,
            chronology: self.chronology,
            bootstrapper: self.bootstrapper,
            event_bus,
        })
    }
}

/// A handle to the background threads of a node. When this value is dropped, all background threads
/// are gracefully shut down.
pub struct Node {
    subrounds_factory: SubroundsFactory,
    worker: Arc<Worker>,
    chronology: Arc<Chronology>,
    bootstrapper: Arc<dyn Bootstrapper>,
    event_bus: Option<(Sender<()>, JoinHandle<()>)>,
}

impl Node {
    /// Replaces the eligible validators with those of the epoch `header` starts.
    pub fn epoch_start_action(&self, header: &Header) {
        self.subrounds_factory.epoch_start_action(header)
    }

    pub fn worker(&self) -> &Arc<Worker> {
        &self.worker
    }

    pub fn bootstrapper(&self) -> &Arc<dyn Bootstrapper> {
        &self.bootstrapper
    }
}

impl Drop for Node {
    fn drop(&mut self) {
        // The subrounds call into the worker and the bootstrapper, so they are stopped first.
        self.chronology.close();
        self.chronology.remove_all_subrounds();
        self.worker.close();
        self.bootstrapper.close();

        if let Some((event_bus_shutdown, handle)) = self.event_bus.take() {
            let _ = event_bus_shutdown.send(());
            let _ = handle.join();
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeError {
    InvalidChainID,
    InvalidPublicKey,
    Consensus(ConsensusError),
    Bootstrap(BootstrapError),
}

impl Display for NodeError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            NodeError::InvalidChainID => write!(f, "invalid chain id"),
            NodeError::InvalidPublicKey => write!(f, "invalid public key"),
            NodeError::Consensus(err) => write!(f, "consensus: {}", err),
            NodeError::Bootstrap(err) => write!(f, "bootstrap: {}", err),
        }
    }
}

impl From<ConsensusError> for NodeError {
    fn from(value: ConsensusError) -> Self {
        NodeError::Consensus(value)
    }
}

impl From<BootstrapError> for NodeError {
    fn from(value: BootstrapError) -> Self {
        NodeError::Bootstrap(value)
    }
}

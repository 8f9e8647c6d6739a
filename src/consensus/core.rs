/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The collaborators every subround and the worker depend on.
//!
//! Main types: [`ConsensusCore`] and [`ConsensusCoreHandler`].
//!
//! A [`ConsensusCore`] is assembled by the library user, one collaborator at a time. Any of them may
//! still be missing, so every field is an `Option`. [`ConsensusCore::validate`] checks that all of them
//! are present, in a fixed order, and hands out a [`ConsensusCoreHandler`] whose fields can be used
//! without further checks.

use std::sync::Arc;

use typed_builder::TypedBuilder;

use crate::consensus::chronology::ChronologyHandler;
use crate::consensus::errors::ConsensusError;
use crate::pluggables::{
    chain::{BlockChain, BlockProcessor},
    crypto::{HeaderSigVerifier, PeerSignatureHandler, SigningHandler},
    encoding::{Hasher, Marshalizer},
    network::{AntifloodHandler, BroadcastMessenger, PeerBlacklistHandler, PeerHonestyHandler},
    sharding::{NodesCoordinator, ShardCoordinator},
    status::{EnableEpochsHandler, FallbackHeaderValidator, NodeRedundancyHandler},
    timing::{RoundHandler, SyncTimer},
};
use crate::sync::bootstrap::Bootstrapper;

/// Container of the collaborators of the consensus engine, any of which may be missing.
#[derive(Clone, Default, TypedBuilder)]
#[builder(builder_method(doc = "Create a builder for a consensus core. Every setter is optional, but \
    [`validate`](ConsensusCore::validate) fails for as long as any collaborator is missing."))]
pub struct ConsensusCore {
    #[builder(default, setter(strip_option))]
    blockchain: Option<Arc<dyn BlockChain>>,
    #[builder(default, setter(strip_option))]
    block_processor: Option<Arc<dyn BlockProcessor>>,
    #[builder(default, setter(strip_option))]
    bootstrapper: Option<Arc<dyn Bootstrapper>>,
    #[builder(default, setter(strip_option))]
    broadcast_messenger: Option<Arc<dyn BroadcastMessenger>>,
    #[builder(default, setter(strip_option))]
    chronology_handler: Option<Arc<dyn ChronologyHandler>>,
    #[builder(default, setter(strip_option))]
    hasher: Option<Arc<dyn Hasher>>,
    #[builder(default, setter(strip_option))]
    marshalizer: Option<Arc<dyn Marshalizer>>,
    #[builder(default, setter(strip_option))]
    signing_handler: Option<Arc<dyn SigningHandler>>,
    #[builder(default, setter(strip_option))]
    round_handler: Option<Arc<dyn RoundHandler>>,
    #[builder(default, setter(strip_option))]
    shard_coordinator: Option<Arc<dyn ShardCoordinator>>,
    #[builder(default, setter(strip_option))]
    sync_timer: Option<Arc<dyn SyncTimer>>,
    #[builder(default, setter(strip_option))]
    nodes_coordinator: Option<Arc<dyn NodesCoordinator>>,
    #[builder(default, setter(strip_option))]
    antiflood_handler: Option<Arc<dyn AntifloodHandler>>,
    #[builder(default, setter(strip_option))]
    peer_honesty_handler: Option<Arc<dyn PeerHonestyHandler>>,
    #[builder(default, setter(strip_option))]
    header_sig_verifier: Option<Arc<dyn HeaderSigVerifier>>,
    #[builder(default, setter(strip_option))]
    fallback_header_validator: Option<Arc<dyn FallbackHeaderValidator>>,
    #[builder(default, setter(strip_option))]
    node_redundancy_handler: Option<Arc<dyn NodeRedundancyHandler>>,
    #[builder(default, setter(strip_option))]
    peer_signature_handler: Option<Arc<dyn PeerSignatureHandler>>,
    #[builder(default, setter(strip_option))]
    peer_blacklist_handler: Option<Arc<dyn PeerBlacklistHandler>>,
    #[builder(default, setter(strip_option))]
    enable_epochs_handler: Option<Arc<dyn EnableEpochsHandler>>,
}

impl ConsensusCore {
    pub fn set_blockchain(&mut self, blockchain: Option<Arc<dyn BlockChain>>) {
        self.blockchain = blockchain;
    }

    pub fn set_block_processor(&mut self, block_processor: Option<Arc<dyn BlockProcessor>>) {
        self.block_processor = block_processor;
    }

    pub fn set_bootstrapper(&mut self, bootstrapper: Option<Arc<dyn Bootstrapper>>) {
        self.bootstrapper = bootstrapper;
    }

    pub fn set_broadcast_messenger(
        &mut self,
        broadcast_messenger: Option<Arc<dyn BroadcastMessenger>>,
    ) {
        self.broadcast_messenger = broadcast_messenger;
    }

    pub fn set_chronology_handler(
        &mut self,
        chronology_handler: Option<Arc<dyn ChronologyHandler>>,
    ) {
        self.chronology_handler = chronology_handler;
    }

    pub fn set_hasher(&mut self, hasher: Option<Arc<dyn Hasher>>) {
        self.hasher = hasher;
    }

    pub fn set_marshalizer(&mut self, marshalizer: Option<Arc<dyn Marshalizer>>) {
        self.marshalizer = marshalizer;
    }

    pub fn set_signing_handler(&mut self, signing_handler: Option<Arc<dyn SigningHandler>>) {
        self.signing_handler = signing_handler;
    }

    pub fn set_round_handler(&mut self, round_handler: Option<Arc<dyn RoundHandler>>) {
        self.round_handler = round_handler;
    }

    pub fn set_shard_coordinator(&mut self, shard_coordinator: Option<Arc<dyn ShardCoordinator>>) {
        self.shard_coordinator = shard_coordinator;
    }

    pub fn set_sync_timer(&mut self, sync_timer: Option<Arc<dyn SyncTimer>>) {
        self.sync_timer = sync_timer;
    }

    pub fn set_nodes_coordinator(&mut self, nodes_coordinator: Option<Arc<dyn NodesCoordinator>>) {
        self.nodes_coordinator = nodes_coordinator;
    }

    pub fn set_antiflood_handler(&mut self, antiflood_handler: Option<Arc<dyn AntifloodHandler>>) {
        self.antiflood_handler = antiflood_handler;
    }

    pub fn set_peer_honesty_handler(
        &mut self,
        peer_honesty_handler: Option<Arc<dyn PeerHonestyHandler>>,
    ) {
        self.peer_honesty_handler = peer_honesty_handler;
    }

    pub fn set_header_sig_verifier(
        &mut self,
        header_sig_verifier: Option<Arc<dyn HeaderSigVerifier>>,
    ) {
        self.header_sig_verifier = header_sig_verifier;
    }

    pub fn set_fallback_header_validator(
        &mut self,
        fallback_header_validator: Option<Arc<dyn FallbackHeaderValidator>>,
    ) {
        self.fallback_header_validator = fallback_header_validator;
    }

    pub fn set_node_redundancy_handler(
        &mut self,
        node_redundancy_handler: Option<Arc<dyn NodeRedundancyHandler>>,
    ) {
        self.node_redundancy_handler = node_redundancy_handler;
    }

    pub fn set_peer_signature_handler(
        &mut self,
        peer_signature_handler: Option<Arc<dyn PeerSignatureHandler>>,
    ) {
        self.peer_signature_handler = peer_signature_handler;
    }

    pub fn set_peer_blacklist_handler(
        &mut self,
        peer_blacklist_handler: Option<Arc<dyn PeerBlacklistHandler>>,
    ) {
        self.peer_blacklist_handler = peer_blacklist_handler;
    }

    pub fn set_enable_epochs_handler(
        &mut self,
        enable_epochs_handler: Option<Arc<dyn EnableEpochsHandler>>,
    ) {
        self.enable_epochs_handler = enable_epochs_handler;
    }

    /// Checks that every collaborator is present. The first missing collaborator, in declaration
    /// order, determines the error.
    pub fn validate(&self) -> Result<ConsensusCoreHandler, ConsensusError> {
        Ok(ConsensusCoreHandler {
            blockchain: required(&self.blockchain, ConsensusError::NilBlockChain)?,
            block_processor: required(&self.block_processor, ConsensusError::NilBlockProcessor)?,
            bootstrapper: required(&self.bootstrapper, ConsensusError::NilBootstrapper)?,
            broadcast_messenger: required(
                &self.broadcast_messenger,
                ConsensusError::NilBroadcastMessenger,
            )?,
            chronology_handler: required(
                &self.chronology_handler,
                ConsensusError::NilChronologyHandler,
            )?,
            hasher: required(&self.hasher, ConsensusError::NilHasher)?,
            marshalizer: required(&self.marshalizer, ConsensusError::NilMarshalizer)?,
            signing_handler: required(&self.signing_handler, ConsensusError::NilSigningHandler)?,
            round_handler: required(&self.round_handler, ConsensusError::NilRoundHandler)?,
            shard_coordinator: required(
                &self.shard_coordinator,
                ConsensusError::NilShardCoordinator,
            )?,
            sync_timer: required(&self.sync_timer, ConsensusError::NilSyncTimer)?,
            nodes_coordinator: required(
                &self.nodes_coordinator,
                ConsensusError::NilNodesCoordinator,
            )?,
            antiflood_handler: required(
                &self.antiflood_handler,
                ConsensusError::NilAntifloodHandler,
            )?,
            peer_honesty_handler: required(
                &self.peer_honesty_handler,
                ConsensusError::NilPeerHonestyHandler,
            )?,
            header_sig_verifier: required(
                &self.header_sig_verifier,
                ConsensusError::NilHeaderSigVerifier,
            )?,
            fallback_header_validator: required(
                &self.fallback_header_validator,
                ConsensusError::NilFallbackHeaderValidator,
            )?,
            node_redundancy_handler: required(
                &self.node_redundancy_handler,
                ConsensusError::NilNodeRedundancyHandler,
            )?,
            peer_signature_handler: required(
                &self.peer_signature_handler,
                ConsensusError::NilPeerSignatureHandler,
            )?,
            peer_blacklist_handler: required(
                &self.peer_blacklist_handler,
                ConsensusError::NilPeerBlacklistHandler,
            )?,
            enable_epochs_handler: required(
                &self.enable_epochs_handler,
                ConsensusError::NilEnableEpochsHandler,
            )?,
        })
    }
}

fn required<T: ?Sized>(
    collaborator: &Option<Arc<T>>,
    error: ConsensusError,
) -> Result<Arc<T>, ConsensusError> {
    collaborator.clone().ok_or(error)
}

/// A [`ConsensusCore`] known to be complete.
#[derive(Clone)]
pub struct ConsensusCoreHandler {
    pub blockchain: Arc<dyn BlockChain>,
    pub block_processor: Arc<dyn BlockProcessor>,
    pub bootstrapper: Arc<dyn Bootstrapper>,
    pub broadcast_messenger: Arc<dyn BroadcastMessenger>,
    pub chronology_handler: Arc<dyn ChronologyHandler>,
    pub hasher: Arc<dyn Hasher>,
    pub marshalizer: Arc<dyn Marshalizer>,
    pub signing_handler: Arc<dyn SigningHandler>,
    pub round_handler: Arc<dyn RoundHandler>,
    pub shard_coordinator: Arc<dyn ShardCoordinator>,
    pub sync_timer: Arc<dyn SyncTimer>,
    pub nodes_coordinator: Arc<dyn NodesCoordinator>,
    pub antiflood_handler: Arc<dyn AntifloodHandler>,
    pub peer_honesty_handler: Arc<dyn PeerHonestyHandler>,
    pub header_sig_verifier: Arc<dyn HeaderSigVerifier>,
    pub fallback_header_validator: Arc<dyn FallbackHeaderValidator>,
    pub node_redundancy_handler: Arc<dyn NodeRedundancyHandler>,
    pub peer_signature_handler: Arc<dyn PeerSignatureHandler>,
    pub peer_blacklist_handler: Arc<dyn PeerBlacklistHandler>,
    pub enable_epochs_handler: Arc<dyn EnableEpochsHandler>,
}

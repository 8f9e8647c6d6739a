/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Builds the four subrounds of a round and registers them with the chronology and the worker.
//!
//! Main type: [`SubroundsFactory`].
//!
//! ## Wiring
//!
//! [`generate_subrounds`](SubroundsFactory::generate_subrounds) creates, in order, the start round,
//! block, signature, and end round subrounds. Each one is handed to the
//! [chronology](crate::consensus::chronology) as a [`SubroundHandler`], and its message receivers are
//! registered with the [worker](crate::consensus::worker):
//!
//! |Message type|Receiver|
//! |---|---|
//! |[`BlockBodyAndHeader`](MessageType::BlockBodyAndHeader)|[`SubroundBlock::received_block_body_and_header`]|
//! |[`BlockBody`](MessageType::BlockBody)|[`SubroundBlock::received_block_body`]|
//! |[`BlockHeader`](MessageType::BlockHeader)|[`SubroundBlock::received_block_header`]|
//! |[`Signature`](MessageType::Signature)|[`SubroundSignature::received_signature`]|
//! |[`BlockHeaderFinalInfo`](MessageType::BlockHeaderFinalInfo)|[`SubroundEndRound::received_block_header_final_info`]|
//!
//! Complete headers of the current round that arrive through the headers pool are forwarded to
//! [`SubroundEndRound::received_header`].
//!
//! The chronology owns the subrounds. The worker's receivers hold them weakly, so once the chronology
//! drops a subround its receivers return `false`. Each subround still reaches the chronology through
//! its [`ConsensusCore`], so the subrounds live until
//! [`remove_all_subrounds`](crate::consensus::chronology::ChronologyHandler::remove_all_subrounds) is
//! called, as [`Node`](crate::node::Node) does when it is dropped.

use std::sync::mpsc::Sender;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use typed_builder::TypedBuilder;

use crate::consensus::block::SubroundBlock;
use crate::consensus::core::{ConsensusCore, ConsensusCoreHandler};
use crate::consensus::end_round::SubroundEndRound;
use crate::consensus::errors::ConsensusError;
use crate::consensus::messages::MessageType;
use crate::consensus::signature::SubroundSignature;
use crate::consensus::start_round::SubroundStartRound;
use crate::consensus::state::ConsensusState;
use crate::consensus::subround::*;
use crate::consensus::worker::WorkerHandler;
use crate::events::Event;
use crate::pluggables::status::{AppStatusHandler, OutportHandler, SentSignatureTracker};
use crate::types::block::Header;
use crate::types::data_types::{ChainID, PeerID};

/// Arguments of [`SubroundsFactory::new`].
#[derive(TypedBuilder)]
pub struct SubroundsFactoryArgs {
    #[builder(default, setter(strip_option))]
    pub consensus_core: Option<ConsensusCore>,
    #[builder(default, setter(strip_option))]
    pub consensus_state: Option<Arc<ConsensusState>>,
    #[builder(default, setter(strip_option))]
    pub worker: Option<Arc<dyn WorkerHandler>>,
    pub chain_id: ChainID,
    #[builder(default)]
    pub current_pid: PeerID,
    #[builder(default, setter(strip_option))]
    pub app_status_handler: Option<Arc<dyn AppStatusHandler>>,
    #[builder(default, setter(strip_option))]
    pub sent_signature_tracker: Option<Arc<dyn SentSignatureTracker>>,
    #[builder(default)]
    pub event_publisher: Option<Sender<Event>>,
}

pub struct SubroundsFactory {
    consensus_core: ConsensusCore,
    core: ConsensusCoreHandler,
    consensus_state: Arc<ConsensusState>,
    worker: Arc<dyn WorkerHandler>,
    chain_id: ChainID,
    current_pid: PeerID,
    app_status_handler: Arc<dyn AppStatusHandler>,
    sent_signature_tracker: Arc<dyn SentSignatureTracker>,
    outport_handler: Option<Arc<dyn OutportHandler>>,
    event_publisher: Option<Sender<Event>>,
    start_round: RwLock<Option<Arc<SubroundStartRound>>>,
}

impl SubroundsFactory {
    pub fn new(args: SubroundsFactoryArgs) -> Result<SubroundsFactory, ConsensusError> {
        let consensus_core = args
            .consensus_core
            .ok_or(ConsensusError::NilConsensusCore)?;
        let core = consensus_core.validate()?;
        let consensus_state = args
            .consensus_state
            .ok_or(ConsensusError::NilConsensusState)?;
        let worker = args.worker.ok_or(ConsensusError::NilWorker)?;
        if args.chain_id.is_empty() {
            return Err(ConsensusError::InvalidChainID);
        }
        let app_status_handler = args
            .app_status_handler
            .ok_or(ConsensusError::NilAppStatusHandler)?;
        let sent_signature_tracker = args
            .sent_signature_tracker
            .ok_or(ConsensusError::NilSentSignatureTracker)?;

        Ok(SubroundsFactory {
            consensus_core,
            core,
            consensus_state,
            worker,
            chain_id: args.chain_id,
            current_pid: args.current_pid,
            app_status_handler,
            sent_signature_tracker,
            outport_handler: None,
            event_publisher: args.event_publisher,
            start_round: RwLock::new(None),
        })
    }

    /// Sets the handler that exports round summaries. Required before generating the subrounds.
    pub fn set_outport_handler(&mut self, outport_handler: Option<Arc<dyn OutportHandler>>) {
        self.outport_handler = outport_handler;
    }

    /// Creates the four subrounds and registers them with the chronology and the worker.
    pub fn generate_subrounds(&self) -> Result<(), ConsensusError> {
        self.worker.remove_all_received_message_calls();

        self.generate_start_round_subround()?;
        self.generate_block_subround()?;
        self.generate_signature_subround()?;
        self.generate_end_round_subround()?;

        Ok(())
    }

    /// Replaces the eligible validators at the start of an epoch. Has no effect before the subrounds
    /// were generated.
    pub fn epoch_start_action(&self, header: &Header) {
        if let Some(start_round) = self.start_round.read().as_ref() {
            start_round.epoch_start_action(header);
        }
    }

    fn generate_start_round_subround(&self) -> Result<(), ConsensusError> {
        let base = self.new_subround(
            None,
            SubroundId::StartRound,
            Some(SubroundId::Block),
            SR_START_START_TIME,
            SR_START_END_TIME,
        )?;

        let subround = SubroundStartRound::new(
            base,
            PROCESSING_THRESHOLD_PERCENT,
            Some(self.sent_signature_tracker.clone()),
            Some(self.worker.clone()),
        )?;
        subround.set_outport_handler(self.outport_handler.clone())?;

        let subround = Arc::new(subround);
        self.core.chronology_handler.add_subround(subround.clone());
        *self.start_round.write() = Some(subround);

        Ok(())
    }

    fn generate_block_subround(&self) -> Result<(), ConsensusError> {
        let base = self.new_subround(
            Some(SubroundId::StartRound),
            SubroundId::Block,
            Some(SubroundId::Signature),
            SR_BLOCK_START_TIME,
            SR_BLOCK_END_TIME,
        )?;

        let subround = Arc::new(SubroundBlock::new(
            base,
            PROCESSING_THRESHOLD_PERCENT,
            Some(self.worker.clone()),
        )?);

        let receiver = Arc::downgrade(&subround);
        self.worker.add_received_message_call(
            MessageType::BlockBodyAndHeader,
            Arc::new(move |message| {
                receiver
                    .upgrade()
                    .map_or(false, |subround| subround.received_block_body_and_header(message))
            }),
        );
        let receiver = Arc::downgrade(&subround);
        self.worker.add_received_message_call(
            MessageType::BlockBody,
            Arc::new(move |message| {
                receiver.upgrade().map_or(false, |subround| subround.received_block_body(message))
            }),
        );
        let receiver = Arc::downgrade(&subround);
        self.worker.add_received_message_call(
            MessageType::BlockHeader,
            Arc::new(move |message| {
                receiver.upgrade().map_or(false, |subround| subround.received_block_header(message))
            }),
        );

        self.core.chronology_handler.add_subround(subround);

        Ok(())
    }

    fn generate_signature_subround(&self) -> Result<(), ConsensusError> {
        let base = self.new_subround(
            Some(SubroundId::Block),
            SubroundId::Signature,
            Some(SubroundId::EndRound),
            SR_SIGNATURE_START_TIME,
            SR_SIGNATURE_END_TIME,
        )?;

        let subround = Arc::new(SubroundSignature::new(
            base,
            Some(self.sent_signature_tracker.clone()),
            Some(self.worker.clone()),
        )?);

        let receiver = Arc::downgrade(&subround);
        self.worker.add_received_message_call(
            MessageType::Signature,
            Arc::new(move |message| {
                receiver.upgrade().map_or(false, |subround| subround.received_signature(message))
            }),
        );

        self.core.chronology_handler.add_subround(subround);

        Ok(())
    }

    fn generate_end_round_subround(&self) -> Result<(), ConsensusError> {
        let base = self.new_subround(
            Some(SubroundId::Signature),
            SubroundId::EndRound,
            None,
            SR_END_START_TIME,
            SR_END_END_TIME,
        )?;

        let subround = Arc::new(SubroundEndRound::new(
            base,
            PROCESSING_THRESHOLD_PERCENT,
            Some(self.worker.clone()),
        )?);

        let receiver = Arc::downgrade(&subround);
        self.worker.add_received_message_call(
            MessageType::BlockHeaderFinalInfo,
            Arc::new(move |message| {
                receiver
                    .upgrade()
                    .map_or(false, |subround| subround.received_block_header_final_info(message))
            }),
        );
        let receiver = Arc::downgrade(&subround);
        self.worker
            .add_received_header_handler(Arc::new(move |header| {
                if let Some(subround) = receiver.upgrade() {
                    subround.received_header(header);
                }
            }));

        self.core.chronology_handler.add_subround(subround);

        Ok(())
    }

    fn new_subround(
        &self,
        previous: Option<SubroundId>,
        current: SubroundId,
        next: Option<SubroundId>,
        start_fraction: f64,
        end_fraction: f64,
    ) -> Result<Subround, ConsensusError> {
        let round_duration = self.core.round_handler.time_duration();
        let worker = self.worker.clone();

        Subround::new(
            SubroundArgs::builder()
                .previous(previous)
                .current(current)
                .next(next)
                .start_time(fraction_of(round_duration, start_fraction))
                .end_time(fraction_of(round_duration, end_fraction))
                .consensus_state(self.consensus_state.clone())
                .consensus_state_changed_channel(self.worker.consensus_state_changed_channel())
                .execute_stored_messages(Arc::new(move || worker.execute_stored_messages()))
                .core(self.consensus_core.clone())
                .chain_id(self.chain_id.clone())
                .current_pid(self.current_pid.clone())
                .app_status_handler(self.app_status_handler.clone())
                .event_publisher(self.event_publisher.clone())
                .build(),
        )
    }
}

fn fraction_of(round_duration: Duration, fraction: f64) -> Duration {
    round_duration.mul_f64(fraction)
}

/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The thread that passes [events](crate::events) to their handlers.

use std::sync::mpsc::{Receiver, RecvTimeoutError, TryRecvError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::events::*;
use crate::logging::Logger;

pub(crate) type HandlerPtr<T> = Box<dyn Fn(&T) + Send>;

/// Handlers for every kind of [`Event`].
#[derive(Default)]
pub(crate) struct EventHandlers {
    pub(crate) start_round_handlers: Vec<HandlerPtr<StartRoundEvent>>,
    pub(crate) propose_block_handlers: Vec<HandlerPtr<ProposeBlockEvent>>,
    pub(crate) receive_block_handlers: Vec<HandlerPtr<ReceiveBlockEvent>>,
    pub(crate) send_signature_handlers: Vec<HandlerPtr<SendSignatureEvent>>,
    pub(crate) receive_signature_handlers: Vec<HandlerPtr<ReceiveSignatureEvent>>,
    pub(crate) commit_block_handlers: Vec<HandlerPtr<CommitBlockEvent>>,
    pub(crate) round_canceled_handlers: Vec<HandlerPtr<RoundCanceledEvent>>,
    pub(crate) subround_timeout_handlers: Vec<HandlerPtr<SubroundTimeoutEvent>>,
    pub(crate) fork_detected_handlers: Vec<HandlerPtr<ForkDetectedEvent>>,
    pub(crate) roll_back_handlers: Vec<HandlerPtr<RollBackEvent>>,
    pub(crate) sync_block_handlers: Vec<HandlerPtr<SyncBlockEvent>>,
    pub(crate) node_state_changed_handlers: Vec<HandlerPtr<NodeStateChangedEvent>>,
}

impl EventHandlers {
    /// Adds the default logger of every event kind in front of the user's handlers.
    pub(crate) fn add_loggers(&mut self) {
        self.start_round_handlers.insert(0, StartRoundEvent::get_logger());
        self.propose_block_handlers.insert(0, ProposeBlockEvent::get_logger());
        self.receive_block_handlers.insert(0, ReceiveBlockEvent::get_logger());
        self.send_signature_handlers.insert(0, SendSignatureEvent::get_logger());
        self.receive_signature_handlers
            .insert(0, ReceiveSignatureEvent::get_logger());
        self.commit_block_handlers.insert(0, CommitBlockEvent::get_logger());
        self.round_canceled_handlers.insert(0, RoundCanceledEvent::get_logger());
        self.subround_timeout_handlers
            .insert(0, SubroundTimeoutEvent::get_logger());
        self.fork_detected_handlers.insert(0, ForkDetectedEvent::get_logger());
        self.roll_back_handlers.insert(0, RollBackEvent::get_logger());
        self.sync_block_handlers.insert(0, SyncBlockEvent::get_logger());
        self.node_state_changed_handlers
            .insert(0, NodeStateChangedEvent::get_logger());
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.start_round_handlers.is_empty()
            && self.propose_block_handlers.is_empty()
            && self.receive_block_handlers.is_empty()
            && self.send_signature_handlers.is_empty()
            && self.receive_signature_handlers.is_empty()
            && self.commit_block_handlers.is_empty()
            && self.round_canceled_handlers.is_empty()
            && self.subround_timeout_handlers.is_empty()
            && self.fork_detected_handlers.is_empty()
            && self.roll_back_handlers.is_empty()
            && self.sync_block_handlers.is_empty()
            && self.node_state_changed_handlers.is_empty()
    }

    pub(crate) fn fire_handlers(&self, event: Event) {
        match event {
            Event::StartRound(event) => fire(&self.start_round_handlers, &event),
            Event::ProposeBlock(event) => fire(&self.propose_block_handlers, &event),
            Event::ReceiveBlock(event) => fire(&self.receive_block_handlers, &event),
            Event::SendSignature(event) => fire(&self.send_signature_handlers, &event),
            Event::ReceiveSignature(event) => fire(&self.receive_signature_handlers, &event),
            Event::CommitBlock(event) => fire(&self.commit_block_handlers, &event),
            Event::RoundCanceled(event) => fire(&self.round_canceled_handlers, &event),
            Event::SubroundTimeout(event) => fire(&self.subround_timeout_handlers, &event),
            Event::ForkDetected(event) => fire(&self.fork_detected_handlers, &event),
            Event::RollBack(event) => fire(&self.roll_back_handlers, &event),
            Event::SyncBlock(event) => fire(&self.sync_block_handlers, &event),
            Event::NodeStateChanged(event) => fire(&self.node_state_changed_handlers, &event),
        }
    }
}

fn fire<T>(handlers: &[HandlerPtr<T>], event: &T) {
    handlers.iter().for_each(|handler| handler(event))
}

/// Spawns the event bus thread. The thread exits on the shutdown signal, or once every publisher of
/// `event_subscriber` is dropped.
pub(crate) fn start_event_bus(
    event_handlers: EventHandlers,
    event_subscriber: Receiver<Event>,
    shutdown_signal: Receiver<()>,
) -> JoinHandle<()> {
    thread::spawn(move || loop {
        match shutdown_signal.try_recv() {
            Ok(()) => return,
            Err(TryRecvError::Empty) => (),
            Err(TryRecvError::Disconnected) => return,
        }

        match event_subscriber.recv_timeout(Duration::from_millis(50)) {
            Ok(event) => event_handlers.fire_handlers(event),
            Err(RecvTimeoutError::Timeout) => (),
            Err(RecvTimeoutError::Disconnected) => return,
        }
    })
}

/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Behavior shared by the four subrounds of a consensus round.
//!
//! Main types: [`Subround`], [`SubroundJob`], and [`SubroundHandler`].
//!
//! ## Subround lifecycle
//!
//! A round is split into four subrounds, each owning a slice of the round's duration:
//!
//! |Subround|Starts at|Ends at|
//! |---|---|---|
//! |[`StartRound`](SubroundId::StartRound)|0%|5%|
//! |[`Block`](SubroundId::Block)|5%|25%|
//! |[`Signature`](SubroundId::Signature)|25%|85%|
//! |[`EndRound`](SubroundId::EndRound)|85%|95%|
//!
//! When the [chronology](crate::consensus::chronology) reaches a subround it calls
//! [`do_work`](SubroundHandler::do_work), which:
//! 1. Replays the messages the worker stored for this round, on a separate thread.
//! 2. Runs the subround's [job](SubroundJob::job) once, e.g., proposing or signing a block.
//! 3. Runs the subround's [check](SubroundJob::check), and returns `true` if it passes.
//! 4. Otherwise waits for the worker to report a change in the consensus state, re-running the check
//!    after each report, until either the check passes or [`MAX_THRESHOLD_PERCENT`] of the round has
//!    elapsed. On timeout the round is canceled and the subround's extend function is called.

use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender, SyncSender};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, SystemTime};

use parking_lot::Mutex;
use typed_builder::TypedBuilder;

use crate::consensus::core::{ConsensusCore, ConsensusCoreHandler};
use crate::consensus::errors::ConsensusError;
use crate::consensus::state::ConsensusState;
use crate::events::{Event, RoundCanceledEvent, SubroundTimeoutEvent};
use crate::pluggables::status::AppStatusHandler;
use crate::pluggables::timing::RoundHandler;
use crate::types::data_types::{ChainID, PeerID};

/// Identifier of a subround within a round.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SubroundId {
    StartRound = 0,
    Block = 1,
    Signature = 2,
    EndRound = 3,
}

impl SubroundId {
    pub const COUNT: usize = 4;

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn name(self) -> &'static str {
        match self {
            SubroundId::StartRound => "(START_ROUND)",
            SubroundId::Block => "(BLOCK)",
            SubroundId::Signature => "(SIGNATURE)",
            SubroundId::EndRound => "(END_ROUND)",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum SubroundStatus {
    #[default]
    NotFinished,
    Finished,
}

// Fractions of the round duration at which each subround starts and ends.
pub const SR_START_START_TIME: f64 = 0.0;
pub const SR_START_END_TIME: f64 = 0.05;
pub const SR_BLOCK_START_TIME: f64 = 0.05;
pub const SR_BLOCK_END_TIME: f64 = 0.25;
pub const SR_SIGNATURE_START_TIME: f64 = 0.25;
pub const SR_SIGNATURE_END_TIME: f64 = 0.85;
pub const SR_END_START_TIME: f64 = 0.85;
pub const SR_END_END_TIME: f64 = 0.95;

/// Percentage of the round after which a received block is no longer processed, and after which a
/// round that has not finished its start subround is canceled.
pub const PROCESSING_THRESHOLD_PERCENT: u32 = 85;

/// Percentage of the round after which a subround waiting for its check gives up.
pub const MAX_THRESHOLD_PERCENT: u32 = 95;

/// Fraction of the signature subround the leader waits for every signature before settling for the
/// threshold.
pub const WAITING_ALL_SIGS_MAX_TIME_THRESHOLD: f64 = 0.5;

// Peer honesty score changes.
pub const VALIDATOR_PEER_HONESTY_INCREASE_FACTOR: i32 = 2;
pub const VALIDATOR_PEER_HONESTY_DECREASE_FACTOR: i32 = -4;
pub const LEADER_PEER_HONESTY_INCREASE_FACTOR: i32 = 4;
pub const LEADER_PEER_HONESTY_DECREASE_FACTOR: i32 = -4;

const SINGLE_KEY_START_MSG: &str = " (my turn)";
const MULTI_KEY_START_MSG: &str = " (my turn in multi-key)";

/// Called by a subround that timed out, with the id of that subround.
pub type ExtendFn = Arc<dyn Fn(SubroundId) + Send + Sync>;

/// Replays the consensus messages the worker stored for the current round.
pub type ExecuteStoredMessagesFn = Arc<dyn Fn() + Send + Sync>;

/// Bounded channel through which the worker wakes the running subround after a received message
/// changed the consensus state.
#[derive(Clone)]
pub struct ConsensusStateChangedChannel {
    sender: SyncSender<bool>,
    receiver: Arc<Mutex<Receiver<bool>>>,
}

impl ConsensusStateChangedChannel {
    pub fn new() -> ConsensusStateChangedChannel {
        let (sender, receiver) = mpsc::sync_channel(1);
        ConsensusStateChangedChannel {
            sender,
            receiver: Arc::new(Mutex::new(receiver)),
        }
    }

    /// Wakes the waiting subround, unless a wake-up is already pending.
    pub fn notify(&self) {
        let _ = self.sender.try_send(true);
    }

    pub fn recv_timeout(&self, timeout: Duration) -> Result<bool, RecvTimeoutError> {
        self.receiver.lock().recv_timeout(timeout)
    }
}

impl Default for ConsensusStateChangedChannel {
    fn default() -> Self {
        Self::new()
    }
}

/// Arguments of [`Subround::new`].
#[derive(TypedBuilder)]
pub struct SubroundArgs {
    #[builder(default)]
    pub previous: Option<SubroundId>,
    pub current: SubroundId,
    #[builder(default)]
    pub next: Option<SubroundId>,
    pub start_time: Duration,
    pub end_time: Duration,
    #[builder(default, setter(strip_option))]
    pub consensus_state: Option<Arc<ConsensusState>>,
    #[builder(default, setter(strip_option))]
    pub consensus_state_changed_channel: Option<ConsensusStateChangedChannel>,
    #[builder(default, setter(strip_option))]
    pub execute_stored_messages: Option<ExecuteStoredMessagesFn>,
    pub core: ConsensusCore,
    pub chain_id: ChainID,
    #[builder(default)]
    pub current_pid: PeerID,
    #[builder(default, setter(strip_option))]
    pub app_status_handler: Option<Arc<dyn AppStatusHandler>>,
    #[builder(default)]
    pub event_publisher: Option<Sender<Event>>,
}

/// State and collaborators shared by every subround.
pub struct Subround {
    previous: Option<SubroundId>,
    current: SubroundId,
    next: Option<SubroundId>,
    start_time: Duration,
    end_time: Duration,
    pub(crate) consensus_state: Arc<ConsensusState>,
    consensus_state_changed_channel: ConsensusStateChangedChannel,
    execute_stored_messages: ExecuteStoredMessagesFn,
    pub(crate) core: ConsensusCoreHandler,
    chain_id: ChainID,
    current_pid: PeerID,
    pub(crate) app_status_handler: Arc<dyn AppStatusHandler>,
    extend: Option<ExtendFn>,
    event_publisher: Option<Sender<Event>>,
}

impl Subround {
    pub fn new(args: SubroundArgs) -> Result<Subround, ConsensusError> {
        let core = args.core.validate()?;
        let consensus_state_changed_channel = args
            .consensus_state_changed_channel
            .ok_or(ConsensusError::NilChannel)?;
        let consensus_state = args
            .consensus_state
            .ok_or(ConsensusError::NilConsensusState)?;
        let execute_stored_messages = args
            .execute_stored_messages
            .ok_or(ConsensusError::NilExecuteStoredMessages)?;
        if args.chain_id.is_empty() {
            return Err(ConsensusError::InvalidChainID);
        }
        let app_status_handler = args
            .app_status_handler
            .ok_or(ConsensusError::NilAppStatusHandler)?;

        Ok(Subround {
            previous: args.previous,
            current: args.current,
            next: args.next,
            start_time: args.start_time,
            end_time: args.end_time,
            consensus_state,
            consensus_state_changed_channel,
            execute_stored_messages,
            core,
            chain_id: args.chain_id,
            current_pid: args.current_pid,
            app_status_handler,
            extend: None,
            event_publisher: args.event_publisher,
        })
    }

    pub(crate) fn set_extend(&mut self, extend: ExtendFn) {
        self.extend = Some(extend);
    }

    pub fn previous(&self) -> Option<SubroundId> {
        self.previous
    }

    pub fn current(&self) -> SubroundId {
        self.current
    }

    pub fn next(&self) -> Option<SubroundId> {
        self.next
    }

    /// Offset from the start of the round at which this subround starts.
    pub fn start_time(&self) -> Duration {
        self.start_time
    }

    /// Offset from the start of the round at which this subround ends.
    pub fn end_time(&self) -> Duration {
        self.end_time
    }

    pub fn name(&self) -> &'static str {
        self.current.name()
    }

    pub fn chain_id(&self) -> &ChainID {
        &self.chain_id
    }

    pub fn current_pid(&self) -> &PeerID {
        &self.current_pid
    }

    pub fn consensus_state(&self) -> &Arc<ConsensusState> {
        &self.consensus_state
    }

    pub fn core(&self) -> &ConsensusCoreHandler {
        &self.core
    }

    pub(crate) fn publish(&self, event: Event) {
        Event::publish(&self.event_publisher, event)
    }

    /// A redundancy node only acts with its own key while its main machine is silent.
    pub fn should_consider_self_key_in_consensus(&self) -> bool {
        let redundancy_handler = &self.core.node_redundancy_handler;
        !redundancy_handler.is_redundancy_node() || !redundancy_handler.is_main_machine_active()
    }

    pub fn is_self_leader_in_current_round(&self) -> bool {
        self.consensus_state.is_self_leader_in_current_round()
            && self.should_consider_self_key_in_consensus()
    }

    /// Whether this node, through its own key or a managed one, is in the consensus group.
    pub fn is_self_in_consensus_group(&self) -> bool {
        let self_pub_key = self.consensus_state.self_pub_key();
        self.consensus_state.is_node_in_consensus_group(&self_pub_key)
            || self.consensus_state.is_multi_key_in_consensus_group()
    }

    /// Whether this node, through its own key or a managed one, leads the current round.
    pub fn is_self_leader(&self) -> bool {
        self.is_self_leader_in_current_round()
            || self.consensus_state.is_multi_key_leader_in_current_round()
    }

    /// Suffix for the round-start log line, telling whether this node leads the round.
    pub fn get_leader_start_round_message(&self) -> &'static str {
        if self.consensus_state.is_multi_key_leader_in_current_round() {
            return MULTI_KEY_START_MSG;
        }
        if self.is_self_leader_in_current_round() {
            return SINGLE_KEY_START_MSG;
        }
        ""
    }

    pub fn get_associated_pid(&self, public_key: &[u8]) -> PeerID {
        self.consensus_state
            .keys_handler()
            .get_associated_pid(public_key)
    }

    /// Time left until `max_time` past the start of the round. Zero means the deadline has passed.
    pub fn remaining_time_in_round(&self, max_time: Duration) -> Duration {
        self.core
            .round_handler
            .remaining_time(self.consensus_state.round_timestamp(), max_time)
    }

    /// Cancels the round, e.g., because an error made it impossible to reach consensus in it.
    pub(crate) fn cancel_round(&self, reason: &str) {
        log::debug!(
            "canceled round {} in subround {}, {}",
            self.core.round_handler.index(),
            self.name(),
            reason
        );
        self.consensus_state.set_round_canceled(true);
        self.publish(Event::RoundCanceled(RoundCanceledEvent {
            timestamp: SystemTime::now(),
            round: self.core.round_handler.index(),
            subround: self.current,
        }));
    }
}

/// The job and check that make a subround what it is.
pub trait SubroundJob: Send + Sync {
    fn base(&self) -> &Subround;

    /// The work this node does once when the subround begins, e.g., proposing or signing a block.
    /// Returns whether the work was done.
    fn job(&self) -> bool;

    /// Whether the subround reached its goal and the next subround may begin.
    fn check(&self) -> bool;
}

/// A subround as driven by the chronology.
pub trait SubroundHandler: Send + Sync {
    /// Runs the subround until its check passes or it times out. Returns whether the check passed.
    fn do_work(&self, round_handler: &dyn RoundHandler) -> bool;

    fn previous(&self) -> Option<SubroundId>;

    fn current(&self) -> SubroundId;

    fn next(&self) -> Option<SubroundId>;

    fn start_time(&self) -> Duration;

    fn end_time(&self) -> Duration;

    fn name(&self) -> &'static str;
}

impl<T: SubroundJob> SubroundHandler for T {
    fn do_work(&self, round_handler: &dyn RoundHandler) -> bool {
        let base = self.base();

        let execute_stored_messages = base.execute_stored_messages.clone();
        thread::spawn(move || execute_stored_messages());

        let start_time = round_handler.time_stamp();
        let max_time = round_handler.time_duration() * MAX_THRESHOLD_PERCENT / 100;

        self.job();
        if self.check() {
            return true;
        }

        loop {
            let remaining_time = round_handler.remaining_time(start_time, max_time);
            if remaining_time.is_zero() {
                break;
            }

            match base
                .consensus_state_changed_channel
                .recv_timeout(remaining_time)
            {
                Ok(_) => {
                    if self.check() {
                        return true;
                    }
                }
                Err(RecvTimeoutError::Timeout) => break,
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }

        log::debug!(
            "subround {} timed out in round {}",
            base.name(),
            round_handler.index()
        );
        base.publish(Event::SubroundTimeout(SubroundTimeoutEvent {
            timestamp: SystemTime::now(),
            round: round_handler.index(),
            subround: base.current(),
        }));

        if let Some(extend) = &base.extend {
            base.consensus_state.set_round_canceled(true);
            extend(base.current());
        }

        false
    }

    fn previous(&self) -> Option<SubroundId> {
        self.base().previous()
    }

    fn current(&self) -> SubroundId {
        self.base().current()
    }

    fn next(&self) -> Option<SubroundId> {
        self.base().next()
    }

    fn start_time(&self) -> Duration {
        self.base().start_time()
    }

    fn end_time(&self) -> Duration {
        self.base().end_time()
    }

    fn name(&self) -> &'static str {
        self.base().name()
    }
}

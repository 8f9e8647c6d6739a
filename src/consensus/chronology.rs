/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The clock that drives consensus rounds.
//!
//! Main type: [`Chronology`].
//!
//! The chronology thread ticks every [`CHRONOLOGY_TICK`]. Between rounds (after the end-round subround
//! finished, or after a subround failed) it only asks the [`RoundHandler`] to recompute the round index.
//! Once the index changes, it begins the new round at the first registered subround, and from then on
//! calls [`do_work`](SubroundHandler::do_work) on each subround in turn, moving to the subround's
//! [`next`](SubroundHandler::next) whenever the work succeeds.

use std::sync::mpsc::{self, Sender, TryRecvError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use parking_lot::{Mutex, RwLock};
use typed_builder::TypedBuilder;

use crate::consensus::errors::ConsensusError;
use crate::consensus::subround::{SubroundHandler, SubroundId};
use crate::pluggables::status::{
    AppStatusHandler, METRIC_CURRENT_ROUND, METRIC_CURRENT_ROUND_TIMESTAMP,
};
use crate::pluggables::timing::{RoundHandler, SyncTimer};

/// Interval at which the chronology thread re-evaluates the round.
pub const CHRONOLOGY_TICK: Duration = Duration::from_millis(5);

/// Drives the subrounds registered with it.
pub trait ChronologyHandler: Send + Sync {
    fn add_subround(&self, subround_handler: Arc<dyn SubroundHandler>);

    fn remove_all_subrounds(&self);

    /// Starts the chronology thread. Calling this more than once has no effect.
    fn start_rounds(&self);

    fn close(&self);
}

/// Arguments of [`Chronology::new`].
#[derive(TypedBuilder)]
pub struct ChronologyArgs {
    pub genesis_time: SystemTime,
    #[builder(default, setter(strip_option))]
    pub round_handler: Option<Arc<dyn RoundHandler>>,
    #[builder(default, setter(strip_option))]
    pub sync_timer: Option<Arc<dyn SyncTimer>>,
    #[builder(default, setter(strip_option))]
    pub app_status_handler: Option<Arc<dyn AppStatusHandler>>,
}

pub struct Chronology {
    inner: Arc<ChronologyInner>,
    chronology_thread: Mutex<Option<(Sender<()>, JoinHandle<()>)>>,
}

struct ChronologyInner {
    genesis_time: SystemTime,
    round_handler: Arc<dyn RoundHandler>,
    sync_timer: Arc<dyn SyncTimer>,
    app_status_handler: Arc<dyn AppStatusHandler>,
    subround_handlers: RwLock<Vec<Arc<dyn SubroundHandler>>>,
    /// The subround being worked on. `None` while waiting for the next round.
    subround_id: Mutex<Option<SubroundId>>,
}

impl Chronology {
    pub fn new(args: ChronologyArgs) -> Result<Chronology, ConsensusError> {
        let round_handler = args
            .round_handler
            .ok_or(ConsensusError::NilRoundHandler)?;
        let sync_timer = args.sync_timer.ok_or(ConsensusError::NilSyncTimer)?;
        let app_status_handler = args
            .app_status_handler
            .ok_or(ConsensusError::NilAppStatusHandler)?;

        Ok(Chronology {
            inner: Arc::new(ChronologyInner {
                genesis_time: args.genesis_time,
                round_handler,
                sync_timer,
                app_status_handler,
                subround_handlers: RwLock::new(Vec::new()),
                subround_id: Mutex::new(None),
            }),
            chronology_thread: Mutex::new(None),
        })
    }

    /// Number of subrounds registered.
    pub fn subrounds_count(&self) -> usize {
        self.inner.subround_handlers.read().len()
    }

    /// The subround the chronology is currently working on.
    pub fn subround_id(&self) -> Option<SubroundId> {
        *self.inner.subround_id.lock()
    }

    /// Runs a single tick of the chronology on the calling thread.
    pub fn start_round(&self) {
        self.inner.start_round()
    }
}

impl ChronologyHandler for Chronology {
    /// Registers `subround_handler`. A handler for a subround that is already registered replaces it.
    fn add_subround(&self, subround_handler: Arc<dyn SubroundHandler>) {
        let mut subround_handlers = self.inner.subround_handlers.write();
        subround_handlers.retain(|handler| handler.current() != subround_handler.current());
        subround_handlers.push(subround_handler);
    }

    fn remove_all_subrounds(&self) {
        self.inner.subround_handlers.write().clear();
        *self.inner.subround_id.lock() = None;
    }

    fn start_rounds(&self) {
        let mut chronology_thread = self.chronology_thread.lock();
        if chronology_thread.is_some() {
            return;
        }

        let inner = self.inner.clone();
        let (shutdown_sender, shutdown_receiver) = mpsc::channel();
        let handle = thread::spawn(move || loop {
            match shutdown_receiver.try_recv() {
                Ok(()) => return,
                Err(TryRecvError::Empty) => (),
                Err(TryRecvError::Disconnected) => return,
            }

            thread::sleep(CHRONOLOGY_TICK);
            inner.start_round();
        });

        *chronology_thread = Some((shutdown_sender, handle));
    }

    fn close(&self) {
        if let Some((shutdown_sender, handle)) = self.chronology_thread.lock().take() {
            let _ = shutdown_sender.send(());
            let _ = handle.join();
        }
    }
}

impl Drop for Chronology {
    fn drop(&mut self) {
        self.close();
    }
}

impl ChronologyInner {
    fn start_round(&self) {
        if self.subround_id.lock().is_none() {
            self.update_round();
        }

        if self.round_handler.before_genesis() {
            return;
        }

        let Some(subround_id) = *self.subround_id.lock() else {
            return;
        };
        let Some(subround_handler) = self.load_subround_handler(subround_id) else {
            return;
        };

        log::trace!(
            "running subround {} in round {}",
            subround_handler.name(),
            self.round_handler.index()
        );

        if !subround_handler.do_work(self.round_handler.as_ref()) {
            *self.subround_id.lock() = None;
            return;
        }

        let mut current_subround_id = self.subround_id.lock();
        if *current_subround_id != Some(subround_handler.current()) {
            return;
        }
        *current_subround_id = subround_handler.next();
    }

    fn update_round(&self) {
        let old_round_index = self.round_handler.index();
        self.round_handler
            .update_round(self.genesis_time, self.sync_timer.current_time());

        if old_round_index != self.round_handler.index() {
            log::debug!(
                "ROUND {} BEGINS ({})",
                self.round_handler.index(),
                self.sync_timer.formatted_current_time()
            );
            self.init_round();
        }
    }

    fn init_round(&self) {
        let first_subround = self
            .subround_handlers
            .read()
            .iter()
            .map(|handler| handler.current())
            .min();

        let mut subround_id = self.subround_id.lock();
        *subround_id = None;
        if !self.round_handler.before_genesis() {
            *subround_id = first_subround;
        }
        drop(subround_id);

        let round_index = self.round_handler.index();
        self.app_status_handler
            .set_u64_value(METRIC_CURRENT_ROUND, round_index.max(0) as u64);
        let round_timestamp = self
            .round_handler
            .time_stamp()
            .duration_since(UNIX_EPOCH)
            .map(|since_epoch| since_epoch.as_secs())
            .unwrap_or_default();
        self.app_status_handler
            .set_u64_value(METRIC_CURRENT_ROUND_TIMESTAMP, round_timestamp);
    }

    fn load_subround_handler(&self, subround_id: SubroundId) -> Option<Arc<dyn SubroundHandler>> {
        self.subround_handlers
            .read()
            .iter()
            .find(|handler| handler.current() == subround_id)
            .cloned()
    }
}

use std::sync::atomic::{AtomicI64, Ordering};
use std::time::{Duration, SystemTime};

use parking_lot::Mutex;
use spos_rs::pluggables::timing::{RoundHandler, SyncTimer};

/// Round handler whose round only changes when a test says so.
pub(crate) struct ManualRoundHandler {
    index: AtomicI64,
    time_stamp: Mutex<SystemTime>,
    duration: Duration,
}

impl ManualRoundHandler {
    pub(crate) fn new(index: i64, duration: Duration) -> ManualRoundHandler {
        ManualRoundHandler {
            index: AtomicI64::new(index),
            time_stamp: Mutex::new(SystemTime::now()),
            duration,
        }
    }

    /// Moves to round `index`, starting now.
    pub(crate) fn set_index(&self, index: i64) {
        self.index.store(index, Ordering::SeqCst);
        *self.time_stamp.lock() = SystemTime::now();
    }
}

impl RoundHandler for ManualRoundHandler {
    fn index(&self) -> i64 {
        self.index.load(Ordering::SeqCst)
    }

    fn before_genesis(&self) -> bool {
        false
    }

    fn update_round(&self, _genesis_time: SystemTime, _current_time: SystemTime) {}

    fn time_stamp(&self) -> SystemTime {
        *self.time_stamp.lock()
    }

    fn time_duration(&self) -> Duration {
        self.duration
    }

    fn remaining_time(&self, start_time: SystemTime, max_time: Duration) -> Duration {
        let elapsed = SystemTime::now()
            .duration_since(start_time)
            .unwrap_or_default();
        max_time.saturating_sub(elapsed)
    }
}

#[derive(Default)]
pub(crate) struct SystemSyncTimer;

impl SyncTimer for SystemSyncTimer {
    fn current_time(&self) -> SystemTime {
        SystemTime::now()
    }

    fn formatted_current_time(&self) -> String {
        format!("{:?}", SystemTime::now())
    }
}

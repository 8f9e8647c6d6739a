/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Pluggable round clock.

use std::time::{Duration, SystemTime};

/// Divides wall-clock time into rounds of equal duration, counted from the genesis time.
pub trait RoundHandler: Send + Sync {
    /// Index of the current round. Negative before genesis.
    fn index(&self) -> i64;

    fn before_genesis(&self) -> bool;

    /// Recomputes the current round from `current_time`.
    fn update_round(&self, genesis_time: SystemTime, current_time: SystemTime);

    /// Instant the current round started.
    fn time_stamp(&self) -> SystemTime;

    fn time_duration(&self) -> Duration;

    /// Time left until `start_time + max_time`. Zero once that instant has passed.
    fn remaining_time(&self, start_time: SystemTime, max_time: Duration) -> Duration;
}

/// Source of network-synchronized time.
pub trait SyncTimer: Send + Sync {
    fn current_time(&self) -> SystemTime;

    fn formatted_current_time(&self) -> String;
}

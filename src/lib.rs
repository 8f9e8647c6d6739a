/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! A Rust implementation of Secure Proof of Stake (SPoS) subround consensus, together with the
//! bootstrapper that keeps a node's chain in sync with its shard.
//!
//! spos-rs does not move bytes over the network, store blocks, or execute transactions. The library
//! user provides those by implementing the traits in [`pluggables`], and spos-rs decides, round by
//! round, which block the consensus group commits, and which blocks a lagging node should fetch or
//! revert.
//!
//! ## Modules
//!
//! |Module|Role|
//! |---|---|
//! |[`consensus`]|Rounds and their four subrounds, the worker that receives consensus messages, and the chronology that drives them.|
//! |[`sync`]|The fork detector and the bootstrapper.|
//! |[`pluggables`]|Traits implemented by the library user.|
//! |[`types`]|Headers, bodies, hashes, and identifiers.|
//! |[`events`], [`logging`]|Events emitted while running, and their default loggers.|
//! |[`node`]|Starting and stopping every thread of a node.|

pub mod consensus;

pub mod events;

pub(crate) mod event_bus;

pub mod logging;

pub mod node;

pub mod pluggables;

pub mod sync;

pub mod types;

/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Traits through which the consensus engine and the bootstrapper consume the rest of the node.
//!
//! Nothing in this crate transports bytes over the network, persists blocks, executes transactions,
//! or produces multi-signatures. Those concerns belong to the library user, who provides them by
//! implementing the traits in this module:
//! - [`chain`]: the local chain head, block creation and execution, and block storage.
//! - [`crypto`]: multi-signature shares, peer signatures, header signature checks, and managed keys.
//! - [`encoding`]: hashing and marshalling (default implementations are provided).
//! - [`network`]: broadcasting, requesting, flood protection, and peer reputation.
//! - [`pools`]: the data pools the bootstrapper pulls headers, mini blocks and proofs from.
//! - [`sharding`]: shard membership and consensus group selection.
//! - [`status`]: metrics, epoch activation flags, and other node-level hooks.
//! - [`timing`]: the round clock.
//!
//! All traits are object-safe and `Send + Sync`, since every collaborator is shared between the
//! chronology, worker, and bootstrapper threads as an `Arc<dyn Trait>`.

pub mod chain;

pub mod crypto;

pub mod encoding;

pub mod network;

pub mod pools;

pub mod sharding;

pub mod status;

pub mod timing;

/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Types that are used across the consensus engine and the chain bootstrapper.
//!
//! Types specific to a single component live next to that component, e.g., the consensus message in
//! [`crate::consensus::messages`].

pub mod block;

pub mod crypto_primitives;

pub mod data_types;

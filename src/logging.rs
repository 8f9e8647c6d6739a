/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Functions that log out events.
//!
//! The logs defined in this module are printed if the user enabled them via the node's
//! [configuration](crate::node::Configuration).
//!
//! spos-rs logs using the [log](https://docs.rs/log/latest/log/) crate. To get these messages
//! printed onto a terminal or to a file, set up a
//! [logging implementation](https://docs.rs/log/latest/log/#available-logging-implementations).
//!
//! ## Log message format
//!
//! Log messages are CSVs (Comma Separated Values) with at least two values. The first two values are
//! always:
//! 1. The name of the [event](crate::events) in PascalCase (defined in this module as constants).
//! 2. The time the event was emitted (as number of seconds since the Unix Epoch).
//!
//! The rest of the values differ depending on the kind of event. For example, the following snippet
//! is how a [ReceiveBlock](crate::events::ReceiveBlockEvent) is printed:
//!
//! ```text
//! ReceiveBlock, 1701329264, 1342, 1290, fNGCJyk, Id5u7f6
//! ```
//!
//! In the snippet:
//! - The third value is the round the block was proposed in.
//! - The fourth value is the nonce of the block.
//! - The fifth value is the first seven characters of the Base64 encoding of the header hash.
//! - The sixth value is the first seven characters of the Base64 encoding of the leader's public key.

use std::time::SystemTime;

use base64::{engine::general_purpose::STANDARD_NO_PAD, Engine as _};

use crate::events::*;

// Names of each event in PascalCase for printing:
pub const START_ROUND: &str = "StartRound";
pub const PROPOSE_BLOCK: &str = "ProposeBlock";
pub const RECEIVE_BLOCK: &str = "ReceiveBlock";
pub const SEND_SIGNATURE: &str = "SendSignature";
pub const RECEIVE_SIGNATURE: &str = "ReceiveSignature";
pub const COMMIT_BLOCK: &str = "CommitBlock";

pub const ROUND_CANCELED: &str = "RoundCanceled";
pub const SUBROUND_TIMEOUT: &str = "SubroundTimeout";

pub const FORK_DETECTED: &str = "ForkDetected";
pub const ROLL_BACK: &str = "RollBack";
pub const SYNC_BLOCK: &str = "SyncBlock";
pub const NODE_STATE_CHANGED: &str = "NodeStateChanged";

/// Implemented by event types. Used to get a closure that logs the event.
pub(crate) trait Logger {
    /// Returns a pointer to the default logging handler for a given event type.
    fn get_logger() -> Box<dyn Fn(&Self) + Send>;
}

impl Logger for StartRoundEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |start_round_event: &StartRoundEvent| {
            log::info!(
                "{}, {}, {}, {}",
                START_ROUND,
                secs_since_unix_epoch(start_round_event.timestamp),
                start_round_event.round,
                first_seven_base64_chars(&start_round_event.leader)
            )
        };
        Box::new(logger)
    }
}

impl Logger for ProposeBlockEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |propose_block_event: &ProposeBlockEvent| {
            log::info!(
                "{}, {}, {}, {}, {}",
                PROPOSE_BLOCK,
                secs_since_unix_epoch(propose_block_event.timestamp),
                propose_block_event.round,
                propose_block_event.nonce,
                first_seven_base64_chars(propose_block_event.header_hash.bytes())
            )
        };
        Box::new(logger)
    }
}

impl Logger for ReceiveBlockEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |receive_block_event: &ReceiveBlockEvent| {
            log::info!(
                "{}, {}, {}, {}, {}, {}",
                RECEIVE_BLOCK,
                secs_since_unix_epoch(receive_block_event.timestamp),
                receive_block_event.round,
                receive_block_event.nonce,
                first_seven_base64_chars(receive_block_event.header_hash.bytes()),
                first_seven_base64_chars(&receive_block_event.leader)
            )
        };
        Box::new(logger)
    }
}

impl Logger for SendSignatureEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |send_signature_event: &SendSignatureEvent| {
            log::info!(
                "{}, {}, {}, {}, {}",
                SEND_SIGNATURE,
                secs_since_unix_epoch(send_signature_event.timestamp),
                send_signature_event.round,
                first_seven_base64_chars(send_signature_event.header_hash.bytes()),
                first_seven_base64_chars(&send_signature_event.public_key)
            )
        };
        Box::new(logger)
    }
}

impl Logger for ReceiveSignatureEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |receive_signature_event: &ReceiveSignatureEvent| {
            log::info!(
                "{}, {}, {}, {}, {}",
                RECEIVE_SIGNATURE,
                secs_since_unix_epoch(receive_signature_event.timestamp),
                receive_signature_event.round,
                first_seven_base64_chars(receive_signature_event.header_hash.bytes()),
                first_seven_base64_chars(&receive_signature_event.signer)
            )
        };
        Box::new(logger)
    }
}

impl Logger for CommitBlockEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |commit_block_event: &CommitBlockEvent| {
            log::info!(
                "{}, {}, {}, {}, {}",
                COMMIT_BLOCK,
                secs_since_unix_epoch(commit_block_event.timestamp),
                commit_block_event.round,
                commit_block_event.nonce,
                first_seven_base64_chars(commit_block_event.header_hash.bytes())
            )
        };
        Box::new(logger)
    }
}

impl Logger for RoundCanceledEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |round_canceled_event: &RoundCanceledEvent| {
            log::info!(
                "{}, {}, {}, {:?}",
                ROUND_CANCELED,
                secs_since_unix_epoch(round_canceled_event.timestamp),
                round_canceled_event.round,
                round_canceled_event.subround
            )
        };
        Box::new(logger)
    }
}

impl Logger for SubroundTimeoutEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |subround_timeout_event: &SubroundTimeoutEvent| {
            log::info!(
                "{}, {}, {}, {:?}",
                SUBROUND_TIMEOUT,
                secs_since_unix_epoch(subround_timeout_event.timestamp),
                subround_timeout_event.round,
                subround_timeout_event.subround
            )
        };
        Box::new(logger)
    }
}

impl Logger for ForkDetectedEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |fork_detected_event: &ForkDetectedEvent| {
            log::info!(
                "{}, {}, {}, {}, {}",
                FORK_DETECTED,
                secs_since_unix_epoch(fork_detected_event.timestamp),
                fork_detected_event.nonce,
                fork_detected_event.round,
                fork_detected_event
                    .hash
                    .as_ref()
                    .map(|hash| first_seven_base64_chars(hash.bytes()))
                    .unwrap_or_else(|| String::from("None"))
            )
        };
        Box::new(logger)
    }
}

impl Logger for RollBackEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |roll_back_event: &RollBackEvent| {
            log::info!(
                "{}, {}, {}, {}",
                ROLL_BACK,
                secs_since_unix_epoch(roll_back_event.timestamp),
                roll_back_event.nonce,
                first_seven_base64_chars(roll_back_event.header_hash.bytes())
            )
        };
        Box::new(logger)
    }
}

impl Logger for SyncBlockEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |sync_block_event: &SyncBlockEvent| {
            log::info!(
                "{}, {}, {}, {}, {}",
                SYNC_BLOCK,
                secs_since_unix_epoch(sync_block_event.timestamp),
                sync_block_event.nonce,
                sync_block_event.round,
                first_seven_base64_chars(sync_block_event.header_hash.bytes())
            )
        };
        Box::new(logger)
    }
}

impl Logger for NodeStateChangedEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |node_state_changed_event: &NodeStateChangedEvent| {
            log::info!(
                "{}, {}, {}, {}",
                NODE_STATE_CHANGED,
                secs_since_unix_epoch(node_state_changed_event.timestamp),
                node_state_changed_event.round,
                node_state_changed_event.is_synchronized
            )
        };
        Box::new(logger)
    }
}

pub(crate) fn first_seven_base64_chars(bytes: &[u8]) -> String {
    let encoded = STANDARD_NO_PAD.encode(bytes);
    if encoded.len() > 7 {
        encoded[0..7].to_string()
    } else {
        encoded
    }
}

/// Seconds between the Unix Epoch and `timestamp`, or 0 for a timestamp before it.
pub(crate) fn secs_since_unix_epoch(timestamp: SystemTime) -> u64 {
    timestamp
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|duration| duration.as_secs())
        .unwrap_or(0)
}

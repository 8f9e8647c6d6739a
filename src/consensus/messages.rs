/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The message validators exchange during a consensus round.
//!
//! Main type: [`ConsensusMessage`].
//!
//! Every message carries the same set of fields; which ones must be filled depends on its
//! [`MessageType`]:
//!
//! |Message type|Sent by|Filled fields (besides the common ones)|
//! |---|---|---|
//! |[`BlockBodyAndHeader`](MessageType::BlockBodyAndHeader)|Leader|`block_header_hash`, `body`, `header`|
//! |[`BlockBody`](MessageType::BlockBody)|Leader|`body`|
//! |[`BlockHeader`](MessageType::BlockHeader)|Leader|`block_header_hash`, `header`|
//! |[`Signature`](MessageType::Signature)|Validators|`block_header_hash`, `signature_share`|
//! |[`BlockHeaderFinalInfo`](MessageType::BlockHeaderFinalInfo)|Leader|`block_header_hash`, `pub_keys_bitmap`, `aggregate_signature`, `leader_signature`|
//!
//! The common fields are `pub_key`, `signature`, `msg_type`, `round_index`, `chain_id` and
//! `originator_pid`. An empty byte field means the field is not set.

use borsh::{BorshDeserialize, BorshSerialize};
use typed_builder::TypedBuilder;

use crate::types::data_types::{ChainID, PeerID};

/// Kinds of [`ConsensusMessage`]. On the wire the kind travels as its `i64` discriminant.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum MessageType {
    Unknown = 0,
    BlockBodyAndHeader = 1,
    BlockBody = 2,
    BlockHeader = 3,
    Signature = 4,
    BlockHeaderFinalInfo = 5,
}

impl MessageType {
    /// Every message type that subrounds can react to, in the order they are expected within a round.
    pub const RECEIVABLE: [MessageType; 5] = [
        MessageType::BlockBodyAndHeader,
        MessageType::BlockBody,
        MessageType::BlockHeader,
        MessageType::Signature,
        MessageType::BlockHeaderFinalInfo,
    ];

    /// The `MessageType` with discriminant `value`, if any.
    pub fn from_i64(value: i64) -> Option<MessageType> {
        match value {
            0 => Some(MessageType::Unknown),
            1 => Some(MessageType::BlockBodyAndHeader),
            2 => Some(MessageType::BlockBody),
            3 => Some(MessageType::BlockHeader),
            4 => Some(MessageType::Signature),
            5 => Some(MessageType::BlockHeaderFinalInfo),
            _ => None,
        }
    }

    pub fn is_with_block_body_and_header(&self) -> bool {
        *self == MessageType::BlockBodyAndHeader
    }

    pub fn is_with_block_body(&self) -> bool {
        *self == MessageType::BlockBody
    }

    pub fn is_with_block_header(&self) -> bool {
        *self == MessageType::BlockHeader
    }

    pub fn is_with_signature(&self) -> bool {
        *self == MessageType::Signature
    }

    pub fn is_with_final_info(&self) -> bool {
        *self == MessageType::BlockHeaderFinalInfo
    }

    /// Human readable label of this message type, used in logs.
    pub fn label(&self) -> &'static str {
        message_type_label(*self as i64)
    }
}

const MESSAGE_TYPE_LABELS: [(i64, &str); 6] = [
    (MessageType::Unknown as i64, "(UNKNOWN)"),
    (MessageType::BlockBodyAndHeader as i64, "(BLOCK_BODY_AND_HEADER)"),
    (MessageType::BlockBody as i64, "(BLOCK_BODY)"),
    (MessageType::BlockHeader as i64, "(BLOCK_HEADER)"),
    (MessageType::Signature as i64, "(SIGNATURE)"),
    (MessageType::BlockHeaderFinalInfo as i64, "(FINAL_INFO)"),
];

/// Label used in logs for the raw message type `msg_type`. Values that name no [`MessageType`] are
/// reported as `"Undefined message type"`.
pub fn message_type_label(msg_type: i64) -> &'static str {
    MESSAGE_TYPE_LABELS
        .iter()
        .find(|(value, _)| *value == msg_type)
        .map(|(_, label)| *label)
        .unwrap_or("Undefined message type")
}

/// A message sent on the consensus topic.
#[derive(Clone, Debug, PartialEq, Eq, Default, BorshSerialize, BorshDeserialize, TypedBuilder)]
pub struct ConsensusMessage {
    #[builder(default)]
    pub block_header_hash: Vec<u8>,
    #[builder(default)]
    pub signature_share: Vec<u8>,
    #[builder(default)]
    pub body: Vec<u8>,
    #[builder(default)]
    pub header: Vec<u8>,
    pub pub_key: Vec<u8>,
    /// Signature of `originator_pid` by `pub_key`. Filled in by the broadcaster.
    #[builder(default)]
    pub signature: Vec<u8>,
    #[builder(setter(transform = |msg_type: MessageType| msg_type as i64))]
    pub msg_type: i64,
    pub round_index: i64,
    pub chain_id: ChainID,
    #[builder(default)]
    pub pub_keys_bitmap: Vec<u8>,
    #[builder(default)]
    pub aggregate_signature: Vec<u8>,
    #[builder(default)]
    pub leader_signature: Vec<u8>,
    pub originator_pid: PeerID,
}

impl ConsensusMessage {
    /// The [`MessageType`] of this message, or `None` if `msg_type` is not a known discriminant.
    pub fn message_type(&self) -> Option<MessageType> {
        MessageType::from_i64(self.msg_type)
    }
}

/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Types that exist only to store bytes, and do not have any major "active" behavior.

use std::fmt::{self, Debug, Display, Formatter};

use base64::{engine::general_purpose::STANDARD_NO_PAD, Engine as _};
use borsh::{BorshDeserialize, BorshSerialize};

/// Identifier of a shard. Shards are numbered from 0; the metachain uses [`METACHAIN_SHARD_ID`].
pub type ShardID = u32;

/// Shard identifier reserved for the metachain, the chain that notarizes every other shard.
pub const METACHAIN_SHARD_ID: ShardID = u32::MAX;

/// Bytes of a validator public key, as produced by the multi-signature scheme in use.
pub type PublicKeyBytes = Vec<u8>;

/// Bytes of a signature or a signature share.
pub type SignatureBytes = Vec<u8>;

/// Bytes that uniquely identify a blockchain.
///
/// Every header and every consensus message carries the `ChainID` of the chain it belongs to, so that
/// messages meant for one chain are never mistaken for messages meant for another. The `ChainID` must
/// not be empty.
#[derive(Clone, PartialEq, Eq, Hash, Default, BorshDeserialize, BorshSerialize)]
pub struct ChainID(Vec<u8>);

impl ChainID {
    /// Create a new `ChainID` wrapping `bytes`.
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    /// Get the bytes of this `ChainID`.
    pub fn bytes(&self) -> &[u8] {
        &self.0
    }

    /// Whether this `ChainID` has no bytes at all.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Display for ChainID {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", String::from_utf8_lossy(&self.0))
    }
}

impl Debug for ChainID {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Display::fmt(self, f)
    }
}

/// Identifier of a peer in the peer-to-peer network.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default, BorshDeserialize, BorshSerialize)]
pub struct PeerID(Vec<u8>);

impl PeerID {
    /// Create a new `PeerID` wrapping `bytes`.
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    /// Get the bytes of this `PeerID`.
    pub fn bytes(&self) -> &[u8] {
        &self.0
    }

    /// Whether this `PeerID` has no bytes at all.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Display for PeerID {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", STANDARD_NO_PAD.encode(&self.0))
    }
}

impl Debug for PeerID {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Display::fmt(self, f)
    }
}

/// Hash of a header, mini block, or any other marshalled value.
///
/// Unlike fixed-size digests, a `CryptoHash` stores as many bytes as the configured
/// [`Hasher`](crate::pluggables::encoding::Hasher) produces. An empty `CryptoHash` stands for "no hash".
#[derive(
    Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default, BorshDeserialize, BorshSerialize,
)]
pub struct CryptoHash(Vec<u8>);

impl CryptoHash {
    /// Create a new `CryptoHash` wrapping `bytes`.
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    /// Get the bytes of this `CryptoHash`.
    pub fn bytes(&self) -> &[u8] {
        &self.0
    }

    /// Whether this `CryptoHash` has no bytes at all.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Number of bytes in this `CryptoHash`.
    pub fn len(&self) -> usize {
        self.0.len()
    }
}

impl From<&[u8]> for CryptoHash {
    fn from(value: &[u8]) -> Self {
        CryptoHash(value.to_vec())
    }
}

impl Display for CryptoHash {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", STANDARD_NO_PAD.encode(&self.0))
    }
}

impl Debug for CryptoHash {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Display::fmt(self, f)
    }
}

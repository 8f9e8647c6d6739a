/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Pluggable signature schemes.
//!
//! The consensus engine never inspects key or signature bytes itself. Signature shares and their
//! aggregation go through [`SigningHandler`], checks on finalized headers through [`HeaderSigVerifier`],
//! and the binding between a message's public key and the peer that relayed it through
//! [`PeerSignatureHandler`].

use std::fmt::{self, Display, Formatter};

use crate::types::{
    block::Header,
    data_types::{PeerID, PublicKeyBytes, SignatureBytes},
};

/// Creates, stores, aggregates and verifies the multi-signature shares of a consensus round.
///
/// Shares are indexed by the signer's position in the round's consensus group. [`reset`](Self::reset)
/// is called once per round with the new group, before any share is created or stored.
pub trait SigningHandler: Send + Sync {
    fn reset(&self, public_keys: &[PublicKeyBytes]) -> Result<(), SigningError>;

    fn create_signature_share_for_public_key(
        &self,
        message: &[u8],
        index: u16,
        epoch: u32,
        public_key: &[u8],
    ) -> Result<SignatureBytes, SigningError>;

    /// Single (non-aggregatable) signature by a managed key, e.g., the leader's signature.
    fn create_signature_for_public_key(
        &self,
        message: &[u8],
        public_key: &[u8],
    ) -> Result<SignatureBytes, SigningError>;

    fn store_signature_share(&self, index: u16, signature: &[u8]) -> Result<(), SigningError>;

    fn signature_share(&self, index: u16) -> Result<SignatureBytes, SigningError>;

    fn verify_signature_share(
        &self,
        index: u16,
        signature: &[u8],
        message: &[u8],
        epoch: u32,
    ) -> Result<(), SigningError>;

    /// Aggregates the stored shares of the signers marked in `bitmap`.
    fn aggregate_sigs(&self, bitmap: &[u8], epoch: u32) -> Result<SignatureBytes, SigningError>;

    fn set_aggregated_sig(&self, signature: &[u8]) -> Result<(), SigningError>;

    /// Verifies the aggregated signature set by [`set_aggregated_sig`](Self::set_aggregated_sig).
    fn verify(&self, message: &[u8], bitmap: &[u8], epoch: u32) -> Result<(), SigningError>;
}

/// Verifies that a public key belongs to the peer that relayed a message.
pub trait PeerSignatureHandler: Send + Sync {
    fn verify_peer_signature(
        &self,
        public_key: &[u8],
        pid: &PeerID,
        signature: &[u8],
    ) -> Result<(), SigningError>;
}

/// Verifies the signatures carried by a finalized header.
pub trait HeaderSigVerifier: Send + Sync {
    fn verify_leader_signature(&self, header: &Header) -> Result<(), SigningError>;

    /// Verifies the aggregated signature and bitmap of `header`.
    fn verify_signature(&self, header: &Header) -> Result<(), SigningError>;
}

/// Knows which validator keys are run by this node.
///
/// A node may run a single key, or several keys at once ("multi-key" mode). In multi-key mode the
/// node's own [`self_pub_key`](crate::consensus::round_consensus::RoundConsensus::self_pub_key) takes
/// no part in consensus, and every managed key is handled as if it were a separate validator.
pub trait KeysHandler: Send + Sync {
    fn is_key_managed_by_current_node(&self, public_key: &[u8]) -> bool;

    fn increment_rounds_without_received_messages(&self, public_key: &[u8]);

    fn reset_rounds_without_received_messages(&self, public_key: &[u8], pid: &PeerID);

    /// Peer through which messages signed by `public_key` are sent.
    fn get_associated_pid(&self, public_key: &[u8]) -> PeerID;

    fn is_original_public_key_of_the_node(&self, public_key: &[u8]) -> bool;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SigningError {
    IndexOutOfBounds,
    NilSignature,
    InvalidSignature,
    InvalidPublicKey,
    Other(String),
}

impl Display for SigningError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            SigningError::IndexOutOfBounds => write!(f, "index out of bounds"),
            SigningError::NilSignature => write!(f, "nil signature"),
            SigningError::InvalidSignature => write!(f, "invalid signature"),
            SigningError::InvalidPublicKey => write!(f, "invalid public key"),
            SigningError::Other(reason) => write!(f, "{}", reason),
        }
    }
}

/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Cryptographic primitives used to authenticate peers.
//!
//! The definitions and re-exports in this module provide two categories of cryptographic primitives:
//! 1. **Cryptographic Hashes**: provided by the [`sha2`] crate.
//! 2. **Digital Signatures**: provided by the [`ed25519_dalek`] crate. These sign the peer ID a consensus
//!    message originates from, binding the message's public key to the peer that relayed it.
//!
//! Multi-signatures over headers are not produced here. They are consumed through the
//! [`SigningHandler`](crate::pluggables::crypto::SigningHandler) trait.

// re-exports below.
pub use sha2::Digest;
pub use sha2::Sha256 as CryptoHasher;

pub use ed25519_dalek::{Signature, SignatureError, Signer, SigningKey, Verifier, VerifyingKey};

use crate::pluggables::crypto::{PeerSignatureHandler, SigningError};
use crate::types::data_types::{PeerID, PublicKeyBytes, SignatureBytes};

/// A facade around [`SigningKey`] that implements method for [`sign`](Self::sign)-ing messages as well
/// as getters for the [`public`](Self::public) key associated with the signing key.
#[derive(Clone)]
pub struct Keypair(SigningKey);

impl Keypair {
    /// Create a `Keypair` that wraps over `signing_key`.
    pub fn new(signing_key: SigningKey) -> Keypair {
        Keypair(signing_key)
    }

    /// Sign an arbitrary `message` with the `Keypair`.
    pub fn sign(&self, message: &[u8]) -> SignatureBytes {
        self.0.sign(message).to_bytes().to_vec()
    }

    /// Sign `pid`, proving that this keypair's owner speaks through that peer.
    pub fn sign_peer_id(&self, pid: &PeerID) -> SignatureBytes {
        self.sign(pid.bytes())
    }

    /// Get the `VerifyingKey` of this `Keypair`.
    pub fn public(&self) -> VerifyingKey {
        self.0.verifying_key()
    }

    /// Get the bytes of the `VerifyingKey` of this `Keypair`.
    pub fn public_bytes(&self) -> PublicKeyBytes {
        self.0.verifying_key().to_bytes().to_vec()
    }
}

/// [`PeerSignatureHandler`] for peers whose consensus public keys are Ed25519 verifying keys.
#[derive(Clone, Copy, Default)]
pub struct Ed25519PeerSignatureHandler;

impl PeerSignatureHandler for Ed25519PeerSignatureHandler {
    fn verify_peer_signature(
        &self,
        public_key: &[u8],
        pid: &PeerID,
        signature: &[u8],
    ) -> Result<(), SigningError> {
        let public_key: [u8; 32] = public_key
            .try_into()
            .map_err(|_| SigningError::InvalidPublicKey)?;
        let verifying_key =
            VerifyingKey::from_bytes(&public_key).map_err(|_| SigningError::InvalidPublicKey)?;
        let signature = Signature::from_slice(signature).map_err(|_| SigningError::InvalidSignature)?;

        verifying_key
            .verify(pid.bytes(), &signature)
            .map_err(|_| SigningError::InvalidSignature)
    }
}

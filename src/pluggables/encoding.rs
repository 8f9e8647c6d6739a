/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Hashing and marshalling, with default implementations backed by [`sha2`] and [`borsh`].

use std::fmt::{self, Display, Formatter};

use borsh::{BorshDeserialize, BorshSerialize};

use crate::consensus::messages::ConsensusMessage;
use crate::types::{
    block::{Body, Header},
    crypto_primitives::{CryptoHasher, Digest},
    data_types::CryptoHash,
};

pub trait Hasher: Send + Sync {
    fn compute(&self, bytes: &[u8]) -> CryptoHash;

    /// Number of bytes in every hash this `Hasher` computes.
    fn size(&self) -> usize;
}

/// Converts the values that travel between nodes to and from bytes.
pub trait Marshalizer: Send + Sync {
    fn marshal_header(&self, header: &Header) -> Result<Vec<u8>, MarshalError>;

    fn unmarshal_header(&self, bytes: &[u8]) -> Result<Header, MarshalError>;

    fn marshal_body(&self, body: &Body) -> Result<Vec<u8>, MarshalError>;

    fn unmarshal_body(&self, bytes: &[u8]) -> Result<Body, MarshalError>;

    fn marshal_message(&self, message: &ConsensusMessage) -> Result<Vec<u8>, MarshalError>;

    fn unmarshal_message(&self, bytes: &[u8]) -> Result<ConsensusMessage, MarshalError>;
}

/// Computes the hash of `header` as marshalled by `marshalizer`.
pub fn header_hash(
    marshalizer: &dyn Marshalizer,
    hasher: &dyn Hasher,
    header: &Header,
) -> Result<CryptoHash, MarshalError> {
    let bytes = marshalizer.marshal_header(header)?;
    Ok(hasher.compute(&bytes))
}

/// [`Hasher`] computing SHA-256 digests.
#[derive(Clone, Copy, Default)]
pub struct Sha256Hasher;

impl Hasher for Sha256Hasher {
    fn compute(&self, bytes: &[u8]) -> CryptoHash {
        let mut hasher = CryptoHasher::new();
        hasher.update(bytes);
        CryptoHash::new(hasher.finalize().to_vec())
    }

    fn size(&self) -> usize {
        32
    }
}

/// [`Marshalizer`] using the Borsh binary format.
#[derive(Clone, Copy, Default)]
pub struct BorshMarshalizer;

impl BorshMarshalizer {
    fn marshal<T: BorshSerialize>(value: &T) -> Result<Vec<u8>, MarshalError> {
        value
            .try_to_vec()
            .map_err(|err| MarshalError::Serialize(err.to_string()))
    }

    fn unmarshal<T: BorshDeserialize>(bytes: &[u8]) -> Result<T, MarshalError> {
        T::try_from_slice(bytes).map_err(|err| MarshalError::Deserialize(err.to_string()))
    }
}

impl Marshalizer for BorshMarshalizer {
    fn marshal_header(&self, header: &Header) -> Result<Vec<u8>, MarshalError> {
        Self::marshal(header)
    }

    fn unmarshal_header(&self, bytes: &[u8]) -> Result<Header, MarshalError> {
        Self::unmarshal(bytes)
    }

    fn marshal_body(&self, body: &Body) -> Result<Vec<u8>, MarshalError> {
        Self::marshal(body)
    }

    fn unmarshal_body(&self, bytes: &[u8]) -> Result<Body, MarshalError> {
        Self::unmarshal(bytes)
    }

    fn marshal_message(&self, message: &ConsensusMessage) -> Result<Vec<u8>, MarshalError> {
        Self::marshal(message)
    }

    fn unmarshal_message(&self, bytes: &[u8]) -> Result<ConsensusMessage, MarshalError> {
        Self::unmarshal(bytes)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MarshalError {
    Serialize(String),
    Deserialize(String),
}

impl Display for MarshalError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            MarshalError::Serialize(reason) => write!(f, "serialize failed: {}", reason),
            MarshalError::Deserialize(reason) => write!(f, "deserialize failed: {}", reason),
        }
    }
}

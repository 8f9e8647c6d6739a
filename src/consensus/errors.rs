/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Enumerates the ways the consensus engine's operations can fail.

use std::fmt::{self, Display, Formatter};

use crate::pluggables::{
    chain::ProcessError, crypto::SigningError, encoding::MarshalError,
    network::NetworkError, sharding::NodesCoordinatorError,
};

/// Failure of a consensus engine operation.
///
/// The `Nil*` variants are returned by constructors when a required collaborator was not provided.
/// They are fatal to the construction: nothing is started with a partially built component. Every
/// other variant is reported by an operation on a live component, and never stops the node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsensusError {
    // Missing collaborators.
    NilConsensusCore,
    NilConsensusState,
    NilBlockChain,
    NilBlockProcessor,
    NilBootstrapper,
    NilChronologyHandler,
    NilHasher,
    NilMarshalizer,
    NilSigningHandler,
    NilRoundHandler,
    NilShardCoordinator,
    NilSyncTimer,
    NilNodesCoordinator,
    NilBroadcastMessenger,
    NilAntifloodHandler,
    NilPeerHonestyHandler,
    NilHeaderSigVerifier,
    NilFallbackHeaderValidator,
    NilNodeRedundancyHandler,
    NilPeerSignatureHandler,
    NilPeerBlacklistHandler,
    NilEnableEpochsHandler,
    NilKeysHandler,
    NilWorker,
    NilForkDetector,
    NilAppStatusHandler,
    NilSentSignatureTracker,
    NilChannel,
    NilExecuteStoredMessages,
    NilSubround,
    NilFunctionHandler,
    /// The outport handler (the driver exporting round data) is missing.
    NilDriver,

    // Bad configuration.
    InvalidChainID,
    InvalidSignatureSize,
    InvalidPublicKeySize,
    InvalidHeaderHashSize,

    // Round state queries.
    InvalidKey,
    NotFoundInConsensus,
    EmptyConsensusGroup,
    NilHeader,
    NilBody,
    NilSignature,
    InvalidIndex,

    // Received message checks.
    NilMessage,
    NilSignatureOnP2PMessage,
    NilDataToProcess,
    InvalidMessageType { msg_type: i64 },
    InvalidMessage,
    InvalidHeader,
    InvalidBodySize,
    InvalidHeaderSize,
    InvalidPublicKeyBitmapSize,
    InvalidSignatureShareSize,
    NodeIsNotInEligibleList,
    MessageForFutureRound,
    MessageForPastRound,
    MessageTypeLimitReached,
    InvalidSignature,
    OriginatorMismatch,
    MessageFromItself,
    RoundCanceled,
    BlacklistedConsensusPeer,
    TimeIsOut,

    // Collaborator failures.
    Marshal(MarshalError),
    Signing(SigningError),
    Process(ProcessError),
    Network(NetworkError),
    NodesCoordinator(NodesCoordinatorError),
}

impl Display for ConsensusError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            ConsensusError::InvalidMessageType { msg_type } => {
                write!(f, "received message type from consensus topic is invalid: {}", msg_type)
            }
            ConsensusError::Marshal(err) => write!(f, "marshal error: {}", err),
            ConsensusError::Signing(err) => write!(f, "signing error: {}", err),
            ConsensusError::Process(err) => write!(f, "process error: {}", err),
            ConsensusError::Network(err) => write!(f, "network error: {}", err),
            ConsensusError::NodesCoordinator(err) => write!(f, "nodes coordinator error: {}", err),
            other => write!(f, "{:?}", other),
        }
    }
}

impl From<MarshalError> for ConsensusError {
    fn from(value: MarshalError) -> Self {
        ConsensusError::Marshal(value)
    }
}

impl From<SigningError> for ConsensusError {
    fn from(value: SigningError) -> Self {
        ConsensusError::Signing(value)
    }
}

impl From<ProcessError> for ConsensusError {
    fn from(value: ProcessError) -> Self {
        ConsensusError::Process(value)
    }
}

impl From<NetworkError> for ConsensusError {
    fn from(value: NetworkError) -> Self {
        ConsensusError::Network(value)
    }
}

impl From<NodesCoordinatorError> for ConsensusError {
    fn from(value: NodesCoordinatorError) -> Self {
        ConsensusError::NodesCoordinator(value)
    }
}

/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Fork detection on the metachain. A metachain block is final once the next one is processed on top
//! of it, or at once when it carries an equivalent proof.

use std::sync::Arc;

use crate::pluggables::status::is_proofs_flag_enabled_for_header;
use crate::sync::errors::ForkDetectorError;
use crate::sync::fork_detector::*;
use crate::types::block::Header;
use crate::types::data_types::{CryptoHash, ShardID};

pub fn new_meta_fork_detector(
    args: ArgBaseForkDetector,
) -> Result<Arc<BaseForkDetector>, ForkDetectorError> {
    Ok(Arc::new(BaseForkDetector::new(
        args,
        Box::new(MetaCheckpoints),
    )?))
}

struct MetaCheckpoints;

impl CheckpointStrategy for MetaCheckpoints {
    fn on_header_processed(
        &self,
        detector: &BaseForkDetector,
        header: &Header,
        hash: &CryptoHash,
        _self_notarized_headers: &[Header],
        _self_notarized_hashes: &[CryptoHash],
    ) {
        detector.set_final_checkpoint(detector.last_checkpoint());

        let new_checkpoint = Checkpoint {
            nonce: header.nonce,
            round: header.round,
            hash: hash.clone(),
        };
        detector.add_checkpoint(new_checkpoint.clone());
        if is_proofs_flag_enabled_for_header(detector.enable_epochs_handler.as_ref(), header) {
            detector.set_final_checkpoint(new_checkpoint);
        }

        detector.remove_past_or_invalid_records();
    }

    /// The metachain is notarized by no other chain.
    fn on_self_notarized_headers(
        &self,
        _detector: &BaseForkDetector,
        _shard_id: ShardID,
        _self_notarized_headers: &[Header],
        _self_notarized_hashes: &[CryptoHash],
    ) {
    }
}

/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Fork detection on a shard chain, where finality comes from metachain notarization.

use std::sync::Arc;

use crate::pluggables::status::{is_flag_enabled_after_epochs_start_block, EnableEpochFlag};
use crate::sync::errors::ForkDetectorError;
use crate::sync::fork_detector::*;
use crate::types::block::Header;
use crate::types::data_types::{CryptoHash, ShardID, METACHAIN_SHARD_ID};

/// Creates the fork detector of a shard and subscribes it to the block tracker's notifications of shard
/// headers notarized by the metachain.
pub fn new_shard_fork_detector(
    args: ArgBaseForkDetector,
) -> Result<Arc<BaseForkDetector>, ForkDetectorError> {
    let detector = Arc::new(BaseForkDetector::new(args, Box::new(ShardCheckpoints))?);

    let weak_detector = Arc::downgrade(&detector);
    detector
        .block_tracker
        .register_self_notarized_from_cross_headers_handler(Box::new(
            move |shard_id, headers, hashes| {
                if let Some(detector) = weak_detector.upgrade() {
                    detector.received_self_notarized_from_cross_headers(shard_id, headers, hashes);
                }
            },
        ));

    Ok(detector)
}

struct ShardCheckpoints;

impl ShardCheckpoints {
    /// Records the headers notarized by `shard_id` above the final checkpoint. Returns whether any of
    /// them was new.
    fn append_self_notarized_headers(
        detector: &BaseForkDetector,
        shard_id: ShardID,
        headers: &[Header],
        hashes: &[CryptoHash],
    ) -> bool {
        let final_nonce = detector.final_checkpoint().nonce;
        let mut appended_any = false;
        for (header, hash) in headers.iter().zip(hashes.iter()) {
            if header.nonce <= final_nonce {
                continue;
            }

            let appended = detector.append(HeaderInfo {
                epoch: header.epoch,
                nonce: header.nonce,
                round: header.round,
                hash: hash.clone(),
                state: BlockHeaderState::Notarized,
                has_proof: detector.proofs_pool.has_proof(header.shard_id, hash),
            });
            if appended {
                log::debug!(
                    "added self notarized header in fork detector: notarized by shard {}, round {}, nonce {}, hash {}",
                    shard_id,
                    header.round,
                    header.nonce,
                    hash
                );
                appended_any = true;
            }
        }

        appended_any
    }

    fn compute_final_checkpoint(detector: &BaseForkDetector) {
        if let Some(checkpoint) = detector.highest_processed_and_notarized() {
            detector.set_final_checkpoint(checkpoint);
        }
    }
}

impl CheckpointStrategy for ShardCheckpoints {
    fn on_header_processed(
        &self,
        detector: &BaseForkDetector,
        header: &Header,
        hash: &CryptoHash,
        self_notarized_headers: &[Header],
        self_notarized_hashes: &[CryptoHash],
    ) {
        Self::append_self_notarized_headers(
            detector,
            METACHAIN_SHARD_ID,
            self_notarized_headers,
            self_notarized_hashes,
        );

        let new_checkpoint = Checkpoint {
            nonce: header.nonce,
            round: header.round,
            hash: hash.clone(),
        };
        detector.add_checkpoint(new_checkpoint.clone());
        Self::compute_final_checkpoint(detector);

        // The first header with a proof is not signed by the increased consensus group yet, so instant
        // finality starts with the next one.
        if is_flag_enabled_after_epochs_start_block(
            header,
            detector.enable_epochs_handler.as_ref(),
            EnableEpochFlag::Andromeda,
        ) {
            detector.set_final_checkpoint(new_checkpoint);
        }

        detector.remove_past_or_invalid_records();
    }

    fn on_self_notarized_headers(
        &self,
        detector: &BaseForkDetector,
        shard_id: ShardID,
        self_notarized_headers: &[Header],
        self_notarized_hashes: &[CryptoHash],
    ) {
        if shard_id != METACHAIN_SHARD_ID {
            return;
        }

        if Self::append_self_notarized_headers(
            detector,
            shard_id,
            self_notarized_headers,
            self_notarized_hashes,
        ) {
            Self::compute_final_checkpoint(detector);
        }
    }
}

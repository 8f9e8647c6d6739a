/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Pluggable node-level hooks: metrics, protocol activation flags, redundancy, epochs, and exporters.

use crate::types::{
    block::Header,
    data_types::{PublicKeyBytes, ShardID},
};

// Names of the metrics set through [`AppStatusHandler`]:
pub const METRIC_CONSENSUS_ROUND_STATE: &str = "spos_consensus_round_state";
pub const METRIC_CONSENSUS_STATE: &str = "spos_consensus_state";
pub const METRIC_COUNT_LEADER: &str = "spos_count_leader";
pub const METRIC_COUNT_CONSENSUS: &str = "spos_count_consensus";
pub const METRIC_COUNT_ACCEPTED_BLOCKS: &str = "spos_count_accepted_blocks";
pub const METRIC_COUNT_CONSENSUS_ACCEPTED_BLOCKS: &str = "spos_count_consensus_accepted_blocks";
pub const METRIC_IS_SYNCING: &str = "spos_is_syncing";
pub const METRIC_NUM_TIMES_IN_FORK_CHOICE: &str = "spos_fork_choice_count";
pub const METRIC_SYNCHRONIZED_ROUND: &str = "spos_synchronized_round";
pub const METRIC_CURRENT_ROUND: &str = "spos_current_round";
pub const METRIC_CURRENT_ROUND_TIMESTAMP: &str = "spos_current_round_timestamp";
pub const METRIC_NONCE: &str = "spos_nonce";
pub const METRIC_PROBABLE_HIGHEST_NONCE: &str = "spos_probable_highest_nonce";

/// Sink for the node's metrics.
pub trait AppStatusHandler: Send + Sync {
    fn set_string_value(&self, key: &str, value: &str);

    fn set_u64_value(&self, key: &str, value: u64);

    fn increment(&self, key: &str);
}

/// Protocol upgrades that change consensus or sync behavior once their activation epoch is reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EnableEpochFlag {
    /// Headers are finalized by equivalent proofs instead of by being built upon.
    Andromeda,
}

pub trait EnableEpochsHandler: Send + Sync {
    fn is_flag_enabled_in_epoch(&self, flag: EnableEpochFlag, epoch: u32) -> bool;

    fn get_activation_epoch(&self, flag: EnableEpochFlag) -> u32;
}

/// Whether `header` is the epoch-start block of the epoch in which `flag` activated.
pub fn is_epoch_change_block_for_flag_activation(
    header: &Header,
    enable_epochs_handler: &dyn EnableEpochsHandler,
    flag: EnableEpochFlag,
) -> bool {
    header.is_start_of_epoch_block()
        && header.epoch == enable_epochs_handler.get_activation_epoch(flag)
}

/// Whether `flag` is active for `header`, not counting the epoch-start block of the activation epoch.
pub fn is_flag_enabled_after_epochs_start_block(
    header: &Header,
    enable_epochs_handler: &dyn EnableEpochsHandler,
    flag: EnableEpochFlag,
) -> bool {
    enable_epochs_handler.is_flag_enabled_in_epoch(flag, header.epoch)
        && !is_epoch_change_block_for_flag_activation(header, enable_epochs_handler, flag)
}

/// Whether `header` is finalized by an equivalent proof.
pub fn is_proofs_flag_enabled_for_header(
    enable_epochs_handler: &dyn EnableEpochsHandler,
    header: &Header,
) -> bool {
    enable_epochs_handler.is_flag_enabled_in_epoch(EnableEpochFlag::Andromeda, header.epoch)
}

/// Summary of a consensus round handed to exporters.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RoundInfo {
    pub round: u64,
    pub signers_indexes: Vec<u64>,
    pub block_was_proposed: bool,
    pub shard_id: ShardID,
    pub epoch: u32,
    pub timestamp: u64,
}

/// Exports consensus data to external indexers.
pub trait OutportHandler: Send + Sync {
    fn has_drivers(&self) -> bool;

    fn save_rounds_info(&self, rounds_info: Vec<RoundInfo>);
}

/// Remembers which managed keys sent a signature in the current round.
pub trait SentSignatureTracker: Send + Sync {
    fn start_round(&self);

    fn signature_sent(&self, public_key: &[u8]);
}

/// Decides whether the lowered ("fallback") signature threshold applies to a header.
pub trait FallbackHeaderValidator: Send + Sync {
    fn should_apply_fallback_validation(&self, header: &Header) -> bool;
}

/// Lets a backup machine take over a validator key when its main machine goes silent.
pub trait NodeRedundancyHandler: Send + Sync {
    fn is_redundancy_node(&self) -> bool;

    fn is_main_machine_active(&self) -> bool;

    fn adjust_inactivity_if_needed(
        &self,
        self_public_key: &[u8],
        consensus_group: &[PublicKeyBytes],
        round_index: i64,
    );
}

/// Tracks epoch-start rounds on the metachain.
pub trait EpochStartTrigger: Send + Sync {
    fn set_current_epoch_start_round(&self, round: u64);
}

pub trait EpochHandler: Send + Sync {
    fn meta_epoch(&self) -> u32;
}

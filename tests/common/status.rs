//! Status, epoch, and bookkeeping collaborators.

use std::collections::HashMap;

use parking_lot::Mutex;
use spos_rs::pluggables::status::{
    AppStatusHandler, EnableEpochFlag, EnableEpochsHandler, EpochHandler, EpochStartTrigger,
    FallbackHeaderValidator, NodeRedundancyHandler, OutportHandler, RoundInfo,
    SentSignatureTracker,
};
use spos_rs::types::block::Header;
use spos_rs::types::data_types::PublicKeyBytes;

#[derive(Default)]
pub(crate) struct RecordingAppStatusHandler {
    strings: Mutex<HashMap<String, String>>,
    numbers: Mutex<HashMap<String, u64>>,
}

impl RecordingAppStatusHandler {
    pub(crate) fn string_value(&self, key: &str) -> Option<String> {
        self.strings.lock().get(key).cloned()
    }

    pub(crate) fn u64_value(&self, key: &str) -> Option<u64> {
        self.numbers.lock().get(key).copied()
    }
}

impl AppStatusHandler for RecordingAppStatusHandler {
    fn set_string_value(&self, key: &str, value: &str) {
        self.strings.lock().insert(key.to_string(), value.to_string());
    }

    fn set_u64_value(&self, key: &str, value: u64) {
        self.numbers.lock().insert(key.to_string(), value);
    }

    fn increment(&self, key: &str) {
        *self.numbers.lock().entry(key.to_string()).or_insert(0) += 1;
    }
}

/// Enables the equivalent proofs flag from `andromeda_epoch` on, or never if it is `None`.
#[derive(Default)]
pub(crate) struct MockEnableEpochs {
    pub(crate) andromeda_epoch: Option<u32>,
}

impl EnableEpochsHandler for MockEnableEpochs {
    fn is_flag_enabled_in_epoch(&self, flag: EnableEpochFlag, epoch: u32) -> bool {
        match flag {
            EnableEpochFlag::Andromeda => self
                .andromeda_epoch
                .map_or(false, |activation_epoch| epoch >= activation_epoch),
        }
    }

    fn get_activation_epoch(&self, flag: EnableEpochFlag) -> u32 {
        match flag {
            EnableEpochFlag::Andromeda => self.andromeda_epoch.unwrap_or(u32::MAX),
        }
    }
}

#[derive(Default)]
pub(crate) struct MockSentSignatureTracker {
    pub(crate) sent: Mutex<Vec<Vec<u8>>>,
}

impl SentSignatureTracker for MockSentSignatureTracker {
    fn start_round(&self) {
        self.sent.lock().clear();
    }

    fn signature_sent(&self, public_key: &[u8]) {
        self.sent.lock().push(public_key.to_vec());
    }
}

#[derive(Default)]
pub(crate) struct MockOutportHandler {
    pub(crate) rounds_info: Mutex<Vec<RoundInfo>>,
}

impl OutportHandler for MockOutportHandler {
    fn has_drivers(&self) -> bool {
        true
    }

    fn save_rounds_info(&self, rounds_info: Vec<RoundInfo>) {
        self.rounds_info.lock().extend(rounds_info);
    }
}

#[derive(Default)]
pub(crate) struct MockFallbackValidator;

impl FallbackHeaderValidator for MockFallbackValidator {
    fn should_apply_fallback_validation(&self, _header: &Header) -> bool {
        false
    }
}

/// A main machine, never a redundancy node.
#[derive(Default)]
pub(crate) struct MockRedundancy;

impl NodeRedundancyHandler for MockRedundancy {
    fn is_redundancy_node(&self) -> bool {
        false
    }

    fn is_main_machine_active(&self) -> bool {
        true
    }

    fn adjust_inactivity_if_needed(
        &self,
        _self_public_key: &[u8],
        _consensus_group: &[PublicKeyBytes],
        _round_index: i64,
    ) {
    }
}

#[derive(Default)]
pub(crate) struct MockEpochStartTrigger {
    pub(crate) epoch_start_round: Mutex<Option<u64>>,
}

impl EpochStartTrigger for MockEpochStartTrigger {
    fn set_current_epoch_start_round(&self, round: u64) {
        *self.epoch_start_round.lock() = Some(round);
    }
}

pub(crate) struct FixedEpochHandler(pub(crate) u32);

impl EpochHandler for FixedEpochHandler {
    fn meta_epoch(&self) -> u32 {
        self.0
    }
}

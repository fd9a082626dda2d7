use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::constants::N_SERVICE_RECORD_CODES;

const N_ERROR_KINDS: usize = 10;
const N_TRIGGER_ERROR_KINDS: usize = 4;

/// Protocol and content errors found by the EventBuilder. Each has a fixed
/// bucket in the error histogram.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ErrorKind {
    UnknownWord,
    NoEventOpen,
    EventIncomplete,
    NonConstLvl1id,
    BcidJump,
    OrphanValueRecord,
    ServiceRecordMismatch,
    TruncatedStream,
    ManyTdcWords,
    /// Second pixel of a data record falls outside the pixel matrix
    PixelOutOfRange,
}

impl ErrorKind {
    pub const ALL: [ErrorKind; N_ERROR_KINDS] = [
        ErrorKind::UnknownWord,
        ErrorKind::NoEventOpen,
        ErrorKind::EventIncomplete,
        ErrorKind::NonConstLvl1id,
        ErrorKind::BcidJump,
        ErrorKind::OrphanValueRecord,
        ErrorKind::ServiceRecordMismatch,
        ErrorKind::TruncatedStream,
        ErrorKind::ManyTdcWords,
        ErrorKind::PixelOutOfRange,
    ];

    fn index(self) -> usize {
        self as usize
    }

    /// Structural errors break the record grammar itself, the rest are content errors
    pub fn is_structural(self) -> bool {
        matches!(
            self,
            Self::UnknownWord
                | Self::NoEventOpen
                | Self::EventIncomplete
                | Self::OrphanValueRecord
                | Self::TruncatedStream
        )
    }
}

/// Trigger word bookkeeping errors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum TriggerErrorKind {
    /// Trigger number equal to or below the previous one
    NotIncreasing,
    /// Trigger number skipped ahead by more than one
    Jump,
    /// More than one trigger word for a single event
    MultipleTriggerWords,
    /// Event built without a trigger word while aligning on trigger numbers
    MissingTriggerWord,
}

impl TriggerErrorKind {
    pub const ALL: [TriggerErrorKind; N_TRIGGER_ERROR_KINDS] = [
        TriggerErrorKind::NotIncreasing,
        TriggerErrorKind::Jump,
        TriggerErrorKind::MultipleTriggerWords,
        TriggerErrorKind::MissingTriggerWord,
    ];

    fn index(self) -> usize {
        self as usize
    }
}

/// The fixed-size histograms handed to downstream histogramming and export.
///
/// All buckets only ever increase; [`Counters::reset`] is the only way down.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Counters {
    errors: [u64; N_ERROR_KINDS],
    service_records: [u64; N_SERVICE_RECORD_CODES],
    trigger_errors: [u64; N_TRIGGER_ERROR_KINDS],
    skipped_triggers: u64,
}

impl Default for Counters {
    fn default() -> Self {
        Self {
            errors: [0; N_ERROR_KINDS],
            service_records: [0; N_SERVICE_RECORD_CODES],
            trigger_errors: [0; N_TRIGGER_ERROR_KINDS],
            skipped_triggers: 0,
        }
    }
}

impl Counters {
    pub fn count_error(&mut self, kind: ErrorKind) {
        self.errors[kind.index()] += 1;
    }

    pub fn count_service_record(&mut self, code: u8) {
        // code is a 6 bit field so it always has a bucket
        self.service_records[code as usize % N_SERVICE_RECORD_CODES] += 1;
    }

    pub fn count_trigger_error(&mut self, kind: TriggerErrorKind) {
        self.trigger_errors[kind.index()] += 1;
    }

    pub fn add_skipped_triggers(&mut self, n: u64) {
        self.skipped_triggers += n;
    }

    pub fn error(&self, kind: ErrorKind) -> u64 {
        self.errors[kind.index()]
    }

    pub fn trigger_error(&self, kind: TriggerErrorKind) -> u64 {
        self.trigger_errors[kind.index()]
    }

    pub fn service_record(&self, code: u8) -> u64 {
        self.service_records
            .get(code as usize)
            .copied()
            .unwrap_or_default()
    }

    pub fn error_histogram(&self) -> &[u64] {
        &self.errors
    }

    pub fn service_record_histogram(&self) -> &[u64] {
        &self.service_records
    }

    pub fn trigger_error_histogram(&self) -> &[u64] {
        &self.trigger_errors
    }

    pub fn skipped_triggers(&self) -> u64 {
        self.skipped_triggers
    }

    pub fn total_errors(&self) -> u64 {
        self.errors.iter().sum()
    }

    pub fn structural_errors(&self) -> u64 {
        ErrorKind::ALL
            .iter()
            .filter(|kind| kind.is_structural())
            .map(|kind| self.error(*kind))
            .sum()
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Non-zero buckets by name, for logs and run summaries
    pub fn summary(&self) -> CounterSummary {
        CounterSummary {
            errors: ErrorKind::ALL
                .iter()
                .filter(|kind| self.error(**kind) > 0)
                .map(|kind| (format!("{kind:?}"), self.error(*kind)))
                .collect(),
            service_records: self
                .service_records
                .iter()
                .enumerate()
                .filter(|(_, count)| **count > 0)
                .map(|(code, count)| (code as u8, *count))
                .collect(),
            trigger_errors: TriggerErrorKind::ALL
                .iter()
                .filter(|kind| self.trigger_error(**kind) > 0)
                .map(|kind| (format!("{kind:?}"), self.trigger_error(*kind)))
                .collect(),
            skipped_triggers: self.skipped_triggers,
        }
    }
}

/// Serializable view of the non-zero counter buckets
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CounterSummary {
    pub errors: BTreeMap<String, u64>,
    pub service_records: BTreeMap<u8, u64>,
    pub trigger_errors: BTreeMap<String, u64>,
    pub skipped_triggers: u64,
}

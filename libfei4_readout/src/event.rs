use serde::{Deserialize, Serialize};
use std::fmt;

/// A single pixel hit within an event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hit {
    pub column: u8,
    pub row: u16,
    pub tot: u8,
    /// Index of the data header (bunch crossing) the hit was read out in
    pub relative_bcid: u16,
}

/// Bit flags summarizing everything unusual seen while building one event.
///
/// Consumers filter on these rather than discarding a whole run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash, Serialize, Deserialize)]
pub struct EventStatus(u16);

impl EventStatus {
    pub const HAS_SERVICE_RECORD: Self = Self(1 << 0);
    pub const NO_TRIGGER_WORD: Self = Self(1 << 1);
    pub const NON_CONST_LVL1ID: Self = Self(1 << 2);
    pub const EVENT_INCOMPLETE: Self = Self(1 << 3);
    pub const UNKNOWN_WORD: Self = Self(1 << 4);
    pub const BCID_JUMP: Self = Self(1 << 5);
    pub const TRIGGER_ERROR: Self = Self(1 << 6);
    pub const TRUNCATED: Self = Self(1 << 7);
    pub const HAS_TDC_WORD: Self = Self(1 << 8);
    pub const MANY_TDC_WORDS: Self = Self(1 << 9);
    pub const NO_HIT: Self = Self(1 << 10);
    pub const SERVICE_RECORD_MISMATCH: Self = Self(1 << 11);
    pub const ORPHAN_VALUE_RECORD: Self = Self(1 << 12);

    const NAMES: [(Self, &'static str); 13] = [
        (Self::HAS_SERVICE_RECORD, "HasServiceRecord"),
        (Self::NO_TRIGGER_WORD, "NoTriggerWord"),
        (Self::NON_CONST_LVL1ID, "NonConstLvl1id"),
        (Self::EVENT_INCOMPLETE, "EventIncomplete"),
        (Self::UNKNOWN_WORD, "UnknownWord"),
        (Self::BCID_JUMP, "BcidJump"),
        (Self::TRIGGER_ERROR, "TriggerError"),
        (Self::TRUNCATED, "Truncated"),
        (Self::HAS_TDC_WORD, "HasTdcWord"),
        (Self::MANY_TDC_WORDS, "ManyTdcWords"),
        (Self::NO_HIT, "NoHit"),
        (Self::SERVICE_RECORD_MISMATCH, "ServiceRecordMismatch"),
        (Self::ORPHAN_VALUE_RECORD, "OrphanValueRecord"),
    ];

    pub fn empty() -> Self {
        Self(0)
    }

    pub fn bits(&self) -> u16 {
        self.0
    }

    pub fn contains(&self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn insert(&mut self, other: Self) {
        self.0 |= other.0;
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    /// Names of all set flags, in bit order
    pub fn names(&self) -> Vec<&'static str> {
        Self::NAMES
            .iter()
            .filter(|(flag, _)| self.contains(*flag))
            .map(|(_, name)| *name)
            .collect()
    }
}

impl fmt::Display for EventStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            write!(f, "Ok")
        } else {
            write!(f, "{}", self.names().join("|"))
        }
    }
}

/// A reconstructed event: all hits read out for one trigger window.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Event {
    pub event_number: u64,
    pub trigger_number: Option<u32>,
    /// LVL1ID of the first data header
    pub lvl1id: u16,
    /// BCID of the first data header
    pub bcid: u16,
    pub hits: Vec<Hit>,
    pub status: EventStatus,
    pub n_data_headers: u32,
    pub tdc: Option<u16>,
}

impl Event {
    pub fn new(event_number: u64) -> Self {
        Self {
            event_number,
            ..Default::default()
        }
    }

    pub fn is_truncated(&self) -> bool {
        self.status.contains(EventStatus::TRUNCATED)
    }
}

use serde::{Deserialize, Serialize};

use super::constants::*;

/// The FE-I4 hardware revision. Selects the bit layout of data headers and of
/// several service records.
///
/// A decode session uses exactly one flavor; words from mixed flavors decode
/// to garbage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ChipFlavor {
    /// FE-I4A: 7 bit LVL1ID, 8 bit BCID
    A,
    /// FE-I4B: 5 bit LVL1ID, 10 bit BCID, extended service records
    #[default]
    B,
}

impl ChipFlavor {
    /// Number of distinct BCID values reported in a data header
    pub fn bcid_range(&self) -> u16 {
        match self {
            Self::A => 1 << 8,
            Self::B => 1 << 10,
        }
    }
}

/// Which register file an address record refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AddressKind {
    GlobalRegister,
    ShiftRegister,
}

/// Service record payloads. Only FE-I4B gives codes 14-16 a structure; every other
/// code (and every FE-I4A code) carries a plain 10 bit counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServicePayload {
    Counter(u16),
    Lvl1Bcid { lvl1id_high: u8, bcid_high: u8 },
    Skipped(u16),
    Truncation { flag: bool, counter: u8, l1_req: u8 },
}

/// A single classified word from the FIFO
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Record {
    DataHeader { flag: bool, lvl1id: u16, bcid: u16 },
    AddressRecord { kind: AddressKind, address: u16 },
    ValueRecord { value: u16 },
    ServiceRecord { code: u8, payload: ServicePayload },
    DataRecord {
        column: u8,
        row: u16,
        tot1: u8,
        tot2: u8,
    },
    TriggerWord { tlu_number: u32 },
    TdcWord { value: u16, counter: u16 },
    Unknown { raw: u32 },
}

/// Classify a raw FIFO word for the given chip flavor.
///
/// Never fails: words matching no signature come back as `Record::Unknown` and are
/// left to the caller to count.
pub fn classify(word: u32, flavor: ChipFlavor) -> Record {
    if word & TRIGGER_WORD_FLAG != 0 {
        return Record::TriggerWord {
            tlu_number: word & TRIGGER_NUMBER_MASK,
        };
    }
    if word & WORD_KIND_MASK == TDC_WORD_KIND {
        return Record::TdcWord {
            value: (word & TDC_VALUE_MASK) as u16,
            counter: ((word & TDC_COUNTER_MASK) >> 12) as u16,
        };
    }

    let payload = word & FE_PAYLOAD_MASK;
    let low = (payload & 0xFFFF) as u16;
    match payload >> 16 {
        DATA_HEADER_SIGNATURE => decode_data_header(low, flavor),
        ADDRESS_RECORD_SIGNATURE => Record::AddressRecord {
            kind: if low & 0x8000 != 0 {
                AddressKind::ShiftRegister
            } else {
                AddressKind::GlobalRegister
            },
            address: low & 0x7FFF,
        },
        VALUE_RECORD_SIGNATURE => Record::ValueRecord { value: low },
        SERVICE_RECORD_SIGNATURE => decode_service_record(low, flavor),
        _ => decode_data_record(payload),
    }
}

fn decode_data_header(low: u16, flavor: ChipFlavor) -> Record {
    let flag = low & 0x8000 != 0;
    match flavor {
        ChipFlavor::A => Record::DataHeader {
            flag,
            lvl1id: (low >> 8) & 0x7F,
            bcid: low & 0xFF,
        },
        ChipFlavor::B => Record::DataHeader {
            flag,
            lvl1id: (low >> 10) & 0x1F,
            bcid: low & 0x3FF,
        },
    }
}

fn decode_service_record(low: u16, flavor: ChipFlavor) -> Record {
    let code = ((low >> 10) & 0x3F) as u8;
    let bits = low & 0x3FF;
    let payload = match (flavor, code) {
        (ChipFlavor::B, SR_CODE_LVL1ID_BCID) => ServicePayload::Lvl1Bcid {
            lvl1id_high: ((bits >> 3) & 0x7F) as u8,
            bcid_high: (bits & 0x7) as u8,
        },
        (ChipFlavor::B, SR_CODE_SKIPPED) => ServicePayload::Skipped(bits),
        (ChipFlavor::B, SR_CODE_TRUNCATION) => ServicePayload::Truncation {
            flag: bits & 0x200 != 0,
            counter: ((bits >> 4) & 0x1F) as u8,
            l1_req: (bits & 0xF) as u8,
        },
        _ => ServicePayload::Counter(bits),
    };
    Record::ServiceRecord { code, payload }
}

fn decode_data_record(payload: u32) -> Record {
    let column = ((payload >> 17) & 0x7F) as u8;
    let row = ((payload >> 8) & 0x1FF) as u16;
    if (MIN_COLUMN..=MAX_COLUMN).contains(&column) && (MIN_ROW..=MAX_ROW).contains(&row) {
        Record::DataRecord {
            column,
            row,
            tot1: ((payload >> 4) & 0xF) as u8,
            tot2: (payload & 0xF) as u8,
        }
    } else {
        Record::Unknown { raw: payload }
    }
}

/// Word builders, the inverse of [`classify`]. Used to synthesize streams for
/// simulation and tests.
pub mod encode {
    use super::super::constants::*;
    use super::ChipFlavor;

    pub fn data_header(flag: bool, lvl1id: u16, bcid: u16, flavor: ChipFlavor) -> u32 {
        let low = match flavor {
            ChipFlavor::A => ((lvl1id as u32 & 0x7F) << 8) | (bcid as u32 & 0xFF),
            ChipFlavor::B => ((lvl1id as u32 & 0x1F) << 10) | (bcid as u32 & 0x3FF),
        };
        (DATA_HEADER_SIGNATURE << 16) | ((flag as u32) << 15) | low
    }

    pub fn address_record(shift_register: bool, address: u16) -> u32 {
        (ADDRESS_RECORD_SIGNATURE << 16)
            | ((shift_register as u32) << 15)
            | (address as u32 & 0x7FFF)
    }

    pub fn value_record(value: u16) -> u32 {
        (VALUE_RECORD_SIGNATURE << 16) | value as u32
    }

    pub fn service_record(code: u8, bits: u16) -> u32 {
        (SERVICE_RECORD_SIGNATURE << 16) | ((code as u32 & 0x3F) << 10) | (bits as u32 & 0x3FF)
    }

    pub fn data_record(column: u8, row: u16, tot1: u8, tot2: u8) -> u32 {
        ((column as u32 & 0x7F) << 17)
            | ((row as u32 & 0x1FF) << 8)
            | ((tot1 as u32 & 0xF) << 4)
            | (tot2 as u32 & 0xF)
    }

    pub fn trigger_word(number: u32) -> u32 {
        TRIGGER_WORD_FLAG | (number & TRIGGER_NUMBER_MASK)
    }

    pub fn tdc_word(value: u16, counter: u16) -> u32 {
        TDC_WORD_KIND | ((counter as u32 & 0xFFFF) << 12) | (value as u32 & TDC_VALUE_MASK)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_data_header_flavors() {
        let word = encode::data_header(false, 3, 700, ChipFlavor::B);
        assert_eq!(
            classify(word, ChipFlavor::B),
            Record::DataHeader {
                flag: false,
                lvl1id: 3,
                bcid: 700
            }
        );
        // The same bits split differently on FE-I4A
        assert_eq!(
            classify(word, ChipFlavor::A),
            Record::DataHeader {
                flag: false,
                lvl1id: (word as u16 >> 8) & 0x7F,
                bcid: word as u16 & 0xFF
            }
        );
        let word = encode::data_header(true, 100, 200, ChipFlavor::A);
        assert_eq!(
            classify(word, ChipFlavor::A),
            Record::DataHeader {
                flag: true,
                lvl1id: 100,
                bcid: 200
            }
        );
    }

    #[test]
    fn test_priority_and_unknown() {
        assert!(matches!(
            classify(encode::address_record(true, 42), ChipFlavor::B),
            Record::AddressRecord {
                kind: AddressKind::ShiftRegister,
                address: 42
            }
        ));
        assert_eq!(
            classify(encode::value_record(0xBEEF), ChipFlavor::B),
            Record::ValueRecord { value: 0xBEEF }
        );
        assert_eq!(
            classify(encode::data_record(80, 336, 3, 15), ChipFlavor::A),
            Record::DataRecord {
                column: 80,
                row: 336,
                tot1: 3,
                tot2: 15
            }
        );
        // column 0 and row 337 are outside the matrix
        assert!(matches!(
            classify(encode::data_record(0, 10, 1, 1), ChipFlavor::B),
            Record::Unknown { .. }
        ));
        assert!(matches!(
            classify(encode::data_record(10, 337, 1, 1), ChipFlavor::B),
            Record::Unknown { .. }
        ));
        assert_eq!(
            classify(encode::trigger_word(12345), ChipFlavor::B),
            Record::TriggerWord { tlu_number: 12345 }
        );
        assert_eq!(
            classify(encode::tdc_word(0x123, 7), ChipFlavor::B),
            Record::TdcWord {
                value: 0x123,
                counter: 7
            }
        );
    }

    #[test]
    fn test_service_record_payloads() {
        let sr14 = encode::service_record(14, (0x55 << 3) | 0x5);
        assert_eq!(
            classify(sr14, ChipFlavor::B),
            Record::ServiceRecord {
                code: 14,
                payload: ServicePayload::Lvl1Bcid {
                    lvl1id_high: 0x55,
                    bcid_high: 0x5
                }
            }
        );
        assert_eq!(
            classify(sr14, ChipFlavor::A),
            Record::ServiceRecord {
                code: 14,
                payload: ServicePayload::Counter((0x55 << 3) | 0x5)
            }
        );
        let sr16 = encode::service_record(16, 0x200 | (3 << 4) | 2);
        assert_eq!(
            classify(sr16, ChipFlavor::B),
            Record::ServiceRecord {
                code: 16,
                payload: ServicePayload::Truncation {
                    flag: true,
                    counter: 3,
                    l1_req: 2
                }
            }
        );
        assert_eq!(
            classify(encode::service_record(15, 9), ChipFlavor::B),
            Record::ServiceRecord {
                code: 15,
                payload: ServicePayload::Skipped(9)
            }
        );
    }
}

use fxhash::FxHashMap;

use super::config::{Alignment, DecoderSettings};
use super::constants::{FEI4B_EXTENDED_LVL1ID_BITS, MAX_COLUMN, TRIGGER_NUMBER_MASK};
use super::counters::{Counters, ErrorKind, TriggerErrorKind};
use super::error::ConfigError;
use super::event::{Event, EventStatus, Hit};
use super::record::{AddressKind, Record, ServicePayload};

/// Markers and flags seen while no event was open; they belong to the next event
#[derive(Debug, Default)]
struct NextEvent {
    trigger_number: Option<u32>,
    tdc: Option<u16>,
    status: EventStatus,
}

/// EventBuilder is the FE-I4 event reconstruction state machine.
///
/// Records must be pushed in acquisition order. A data header opens an event (or continues
/// one that has not yet seen all of its headers); data records add hits to the open event.
/// Once an event has `bcids_per_event * trigger_multiplicity` headers the next header closes it.
/// With trigger-number or TDC alignment, the alignment marker closes the open event instead
/// and starts the next one.
///
/// Protocol problems never stop the builder. They are counted in the [`Counters`] and flagged
/// in the [`EventStatus`] of the event they occurred in.
#[derive(Debug)]
pub struct EventBuilder {
    settings: DecoderSettings,
    counters: Counters,
    registers: FxHashMap<(AddressKind, u16), u16>,
    pending_address: Option<(AddressKind, u16)>,
    current: Option<Event>,
    next: NextEvent,
    next_event_number: u64,
    last_trigger_number: Option<u32>,
    last_header: Option<(u16, u16)>,
    last_block_lvl1id: Option<u16>,
    lvl1id_high: Option<u8>,
}

impl EventBuilder {
    /// Create a builder for one decode session. The settings are validated here, as the
    /// event boundaries depend on them.
    pub fn new(settings: DecoderSettings) -> Result<Self, ConfigError> {
        settings.validate()?;
        Ok(Self {
            settings,
            counters: Counters::default(),
            registers: FxHashMap::default(),
            pending_address: None,
            current: None,
            next: NextEvent::default(),
            next_event_number: 0,
            last_trigger_number: None,
            last_header: None,
            last_block_lvl1id: None,
            lvl1id_high: None,
        })
    }

    pub fn settings(&self) -> &DecoderSettings {
        &self.settings
    }

    pub fn counters(&self) -> &Counters {
        &self.counters
    }

    pub fn reset_counters(&mut self) {
        self.counters.reset();
    }

    /// Last value read back from a register through an address/value record pair
    pub fn register_value(&self, kind: AddressKind, address: u16) -> Option<u16> {
        self.registers.get(&(kind, address)).copied()
    }

    /// Full FE-I4B LVL1ID: data header low bits extended by the high bits of service record 14.
    /// None until a service record 14 has been seen.
    pub fn extended_lvl1id(&self) -> Option<u16> {
        let (high, low) = self.lvl1id_high.zip(self.last_block_lvl1id)?;
        Some((((high as u16) << 5) | low) & ((1 << FEI4B_EXTENDED_LVL1ID_BITS) - 1))
    }

    /// Number of events emitted or in progress so far
    pub fn n_events(&self) -> u64 {
        self.next_event_number
    }

    /// Feed the next record. Returns an event when this record closed one.
    pub fn push_record(&mut self, record: Record) -> Option<Event> {
        // An address record only pairs with the record directly after it
        let pending_address = self.pending_address.take();
        match record {
            Record::DataHeader { lvl1id, bcid, .. } => self.on_data_header(lvl1id, bcid),
            Record::AddressRecord { kind, address } => {
                self.pending_address = Some((kind, address));
                None
            }
            Record::ValueRecord { value } => {
                match pending_address {
                    Some(key) => {
                        self.registers.insert(key, value);
                    }
                    None => {
                        self.counters.count_error(ErrorKind::OrphanValueRecord);
                        self.flag(EventStatus::ORPHAN_VALUE_RECORD);
                    }
                }
                None
            }
            Record::ServiceRecord { code, payload } => {
                self.on_service_record(code, payload);
                None
            }
            Record::DataRecord {
                column,
                row,
                tot1,
                tot2,
            } => {
                self.on_data_record(column, row, tot1, tot2);
                None
            }
            Record::TriggerWord { tlu_number } => self.on_trigger_word(tlu_number),
            Record::TdcWord { value, .. } => self.on_tdc_word(value),
            Record::Unknown { .. } => {
                self.counters.count_error(ErrorKind::UnknownWord);
                self.flag(EventStatus::UNKNOWN_WORD);
                None
            }
        }
    }

    /// End of stream. Flushes the open event, flagged as truncated if it never saw all of
    /// its data headers, and readies the builder for a new stream. Counters, register
    /// read-backs and event numbering carry over.
    pub fn finish(&mut self) -> Option<Event> {
        self.pending_address = None;
        self.next = NextEvent::default();
        self.last_trigger_number = None;
        self.last_header = None;
        self.last_block_lvl1id = None;
        self.lvl1id_high = None;

        let mut event = self.current.take()?;
        if event.n_data_headers < self.settings.headers_per_event() {
            self.counters.count_error(ErrorKind::TruncatedStream);
            event.status.insert(EventStatus::TRUNCATED);
        }
        Some(self.finalize(event))
    }

    fn on_data_header(&mut self, lvl1id: u16, bcid: u16) -> Option<Event> {
        let headers_per_event = self.settings.headers_per_event();
        let full = self
            .current
            .as_ref()
            .is_some_and(|event| event.n_data_headers >= headers_per_event);
        let emitted = if full { self.close_event() } else { None };
        if self.current.is_none() {
            self.open_event();
        }

        let n_headers = self
            .current
            .as_ref()
            .map_or(0, |event| event.n_data_headers);
        if n_headers % self.settings.bcids_per_event == 0 {
            // First header of a trigger; LVL1ID and BCID are free to change here
            self.track_lvl1id(lvl1id);
        } else if let Some((previous_lvl1id, previous_bcid)) = self.last_header {
            if lvl1id != previous_lvl1id {
                self.counters.count_error(ErrorKind::NonConstLvl1id);
                self.flag(EventStatus::NON_CONST_LVL1ID);
            }
            if bcid != (previous_bcid + 1) % self.settings.chip_flavor.bcid_range() {
                self.counters.count_error(ErrorKind::BcidJump);
                self.flag(EventStatus::BCID_JUMP);
            }
        }
        self.last_header = Some((lvl1id, bcid));

        if let Some(event) = self.current.as_mut() {
            if event.n_data_headers == 0 {
                event.lvl1id = lvl1id;
                event.bcid = bcid;
            }
            event.n_data_headers += 1;
        }
        emitted
    }

    fn on_data_record(&mut self, column: u8, row: u16, tot1: u8, tot2: u8) {
        let max_tot = self.settings.max_tot;
        let Some(event) = self
            .current
            .as_mut()
            .filter(|event| event.n_data_headers > 0)
        else {
            self.counters.count_error(ErrorKind::NoEventOpen);
            return;
        };

        // Fits: validation caps an event at MAX_HEADERS_PER_EVENT headers
        let relative_bcid = (event.n_data_headers - 1) as u16;
        event.hits.push(Hit {
            column,
            row,
            tot: tot1,
            relative_bcid,
        });
        if tot2 > max_tot {
            return;
        }
        // The pair's second pixel sits in the next column, which column 80 does not have
        if column >= MAX_COLUMN {
            self.counters.count_error(ErrorKind::PixelOutOfRange);
            return;
        }
        event.hits.push(Hit {
            column: column + 1,
            row,
            tot: tot2,
            relative_bcid,
        });
    }

    fn on_service_record(&mut self, code: u8, payload: ServicePayload) {
        self.counters.count_service_record(code);
        self.flag(EventStatus::HAS_SERVICE_RECORD);
        match payload {
            ServicePayload::Lvl1Bcid { lvl1id_high, .. } => {
                if self.lvl1id_high.is_some_and(|tracked| tracked != lvl1id_high) {
                    self.counters.count_error(ErrorKind::ServiceRecordMismatch);
                    self.flag(EventStatus::SERVICE_RECORD_MISMATCH);
                }
                self.lvl1id_high = Some(lvl1id_high);
            }
            ServicePayload::Skipped(n_skipped) => {
                self.counters.add_skipped_triggers(n_skipped as u64)
            }
            ServicePayload::Truncation { flag: true, .. } => self.flag(EventStatus::TRUNCATED),
            ServicePayload::Truncation { .. } | ServicePayload::Counter(_) => (),
        }
    }

    fn on_trigger_word(&mut self, tlu_number: u32) -> Option<Event> {
        if self.settings.alignment != Alignment::TriggerNumber {
            let headers_per_event = self.settings.headers_per_event();
            let (trigger_number, status) =
                match filling_event(&mut self.current, headers_per_event) {
                    Some(event) => (&mut event.trigger_number, &mut event.status),
                    None => (&mut self.next.trigger_number, &mut self.next.status),
                };
            if trigger_number.is_some() {
                self.counters
                    .count_trigger_error(TriggerErrorKind::MultipleTriggerWords);
                status.insert(EventStatus::TRIGGER_ERROR);
            } else {
                *trigger_number = Some(tlu_number);
            }
            return None;
        }

        if let Some(previous) = self.last_trigger_number {
            let expected = (previous + 1) & TRIGGER_NUMBER_MASK;
            if tlu_number != expected {
                let kind = if tlu_number <= previous {
                    TriggerErrorKind::NotIncreasing
                } else {
                    TriggerErrorKind::Jump
                };
                self.counters.count_trigger_error(kind);
                self.next.status.insert(EventStatus::TRIGGER_ERROR);
            }
        }
        self.last_trigger_number = Some(tlu_number);

        let emitted = self.close_event();
        self.next.trigger_number = Some(tlu_number);
        self.open_event();
        emitted
    }

    fn on_tdc_word(&mut self, value: u16) -> Option<Event> {
        if self.settings.alignment != Alignment::TdcWord {
            let headers_per_event = self.settings.headers_per_event();
            let (tdc, status) = match filling_event(&mut self.current, headers_per_event) {
                Some(event) => (&mut event.tdc, &mut event.status),
                None => (&mut self.next.tdc, &mut self.next.status),
            };
            if tdc.is_some() {
                self.counters.count_error(ErrorKind::ManyTdcWords);
                status.insert(EventStatus::MANY_TDC_WORDS);
            } else {
                *tdc = Some(value);
                status.insert(EventStatus::HAS_TDC_WORD);
            }
            return None;
        }

        let emitted = self.close_event();
        self.next.tdc = Some(value);
        self.next.status.insert(EventStatus::HAS_TDC_WORD);
        self.open_event();
        emitted
    }

    /// Follow LVL1ID wrap-arounds of the data header bits so the FE-I4B high bits stay in step
    fn track_lvl1id(&mut self, lvl1id: u16) {
        if let (Some(previous), Some(high)) = (self.last_block_lvl1id, self.lvl1id_high.as_mut()) {
            if lvl1id < previous {
                *high = high.wrapping_add(1) & 0x7F;
            }
        }
        self.last_block_lvl1id = Some(lvl1id);
    }

    fn flag(&mut self, status: EventStatus) {
        match self.current.as_mut() {
            Some(event) => event.status.insert(status),
            None => self.next.status.insert(status),
        }
    }

    fn open_event(&mut self) {
        let next = std::mem::take(&mut self.next);
        let mut event = Event::new(self.next_event_number);
        self.next_event_number += 1;
        event.trigger_number = next.trigger_number;
        event.tdc = next.tdc;
        event.status = next.status;
        self.last_header = None;
        self.current = Some(event);
    }

    fn close_event(&mut self) -> Option<Event> {
        let mut event = self.current.take()?;
        if event.n_data_headers < self.settings.headers_per_event() {
            self.counters.count_error(ErrorKind::EventIncomplete);
            event.status.insert(EventStatus::EVENT_INCOMPLETE);
        }
        Some(self.finalize(event))
    }

    fn finalize(&mut self, mut event: Event) -> Event {
        if event.hits.is_empty() {
            event.status.insert(EventStatus::NO_HIT);
        }
        if event.trigger_number.is_none() {
            event.status.insert(EventStatus::NO_TRIGGER_WORD);
            if self.settings.alignment == Alignment::TriggerNumber {
                self.counters
                    .count_trigger_error(TriggerErrorKind::MissingTriggerWord);
                event.status.insert(EventStatus::TRIGGER_ERROR);
            }
        }
        event
    }
}

/// The open event while it still expects data headers. Markers arriving after that belong to
/// the next event.
fn filling_event(current: &mut Option<Event>, headers_per_event: u32) -> Option<&mut Event> {
    current
        .as_mut()
        .filter(|event| event.n_data_headers < headers_per_event)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{classify, encode, ChipFlavor};

    fn settings(bcids_per_event: u32) -> DecoderSettings {
        DecoderSettings {
            bcids_per_event,
            ..Default::default()
        }
    }

    fn run(builder: &mut EventBuilder, words: &[u32]) -> Vec<Event> {
        let flavor = builder.settings().chip_flavor;
        let mut events: Vec<Event> = words
            .iter()
            .filter_map(|word| builder.push_record(classify(*word, flavor)))
            .collect();
        events.extend(builder.finish());
        events
    }

    fn hit(column: u8, row: u16, tot: u8, relative_bcid: u16) -> Hit {
        Hit {
            column,
            row,
            tot,
            relative_bcid,
        }
    }

    fn dh(lvl1id: u16, bcid: u16) -> u32 {
        encode::data_header(false, lvl1id, bcid, ChipFlavor::B)
    }

    #[test]
    fn test_header_and_two_data_records() {
        let mut builder = EventBuilder::new(settings(1)).unwrap();
        let words = [
            dh(1, 100),
            encode::data_record(10, 20, 5, 3),
            encode::data_record(30, 40, 2, 15),
            // The next header closes the event
            dh(2, 200),
        ];
        let events = run(&mut builder, &words);
        assert_eq!(events.len(), 2);
        assert_eq!(
            events[0].hits,
            vec![
                hit(10, 20, 5, 0),
                hit(11, 20, 3, 0),
                hit(30, 40, 2, 0),
            ]
        );
        assert_eq!(events[0].lvl1id, 1);
        assert_eq!(events[0].bcid, 100);
        assert!(!events[0].is_truncated());
        assert_eq!(builder.counters().structural_errors(), 0);
        assert_eq!(builder.counters().total_errors(), 0);
    }

    /// Streams of `Header+ (Address, Value)* DataRecord*` blocks decode to exactly the encoded hits
    #[test]
    fn test_grammar_reconstructs_encoded_hits() {
        let bcids_per_event = 4;
        let mut builder = EventBuilder::new(settings(bcids_per_event)).unwrap();
        let mut words = Vec::new();
        let mut expected: Vec<Vec<Hit>> = Vec::new();
        for n in 0..20u16 {
            let lvl1id = n % 32;
            let mut hits = Vec::new();
            for relative_bcid in 0..bcids_per_event as u16 {
                words.push(dh(lvl1id, (n * 7 + relative_bcid) % 1024));
                words.push(encode::address_record(false, n));
                words.push(encode::value_record(n * 3));
                let column = (n % 79 + 1) as u8;
                let row = relative_bcid * 50 + n + 1;
                let tot2 = if n % 2 == 0 { 15 } else { (n % 14) as u8 };
                words.push(encode::data_record(column, row, 4, tot2));
                hits.push(hit(column, row, 4, relative_bcid));
                if tot2 != 15 {
                    hits.push(hit(column + 1, row, tot2, relative_bcid));
                }
            }
            expected.push(hits);
        }

        let events = run(&mut builder, &words);
        let decoded: Vec<Vec<Hit>> = events.iter().map(|e| e.hits.clone()).collect();
        assert_eq!(decoded, expected);
        assert!(events.iter().all(|e| e.n_data_headers == bcids_per_event));
        assert_eq!(
            events.iter().map(|e| e.event_number).collect::<Vec<_>>(),
            (0..20).collect::<Vec<_>>()
        );
        assert_eq!(builder.counters().total_errors(), 0);
        assert_eq!(builder.register_value(AddressKind::GlobalRegister, 19), Some(57));
    }

    #[test]
    fn test_replay_is_deterministic() {
        let words = [
            dh(3, 10),
            encode::data_record(5, 6, 7, 8),
            dh(3, 12),
            0x00FF_FFFF,
            encode::value_record(1),
            encode::service_record(15, 4),
            dh(4, 20),
            encode::data_record(1, 1, 1, 15),
        ];
        let mut first = EventBuilder::new(settings(2)).unwrap();
        let mut second = EventBuilder::new(settings(2)).unwrap();
        assert_eq!(run(&mut first, &words), run(&mut second, &words));
        assert_eq!(first.counters(), second.counters());
        assert_eq!(first.counters().error(ErrorKind::BcidJump), 1);
        assert_eq!(first.counters().error(ErrorKind::UnknownWord), 1);
        assert_eq!(first.counters().error(ErrorKind::OrphanValueRecord), 1);
        assert_eq!(first.counters().skipped_triggers(), 4);
    }

    #[test]
    fn test_truncated_stream_keeps_completed_events() {
        let mut builder = EventBuilder::new(settings(2)).unwrap();
        let words = [
            dh(1, 0),
            encode::data_record(1, 1, 1, 15),
            dh(1, 1),
            dh(2, 50),
            encode::data_record(2, 2, 2, 15),
        ];
        let events = run(&mut builder, &words);
        assert_eq!(events.len(), 2);
        assert!(!events[0].is_truncated());
        assert_eq!(events[0].hits.len(), 1);
        assert!(events[1].is_truncated());
        assert_eq!(events[1].hits.len(), 1);
        assert_eq!(builder.counters().error(ErrorKind::TruncatedStream), 1);
        // Nothing left to flush
        assert!(builder.finish().is_none());
    }

    #[test]
    fn test_max_tot_sets_second_hit_threshold() {
        let mut builder = EventBuilder::new(DecoderSettings {
            bcids_per_event: 1,
            max_tot: 13,
            ..Default::default()
        })
        .unwrap();
        let events = run(
            &mut builder,
            &[
                dh(0, 0),
                encode::data_record(4, 4, 1, 13),
                encode::data_record(6, 6, 1, 14),
            ],
        );
        assert_eq!(events[0].hits.len(), 3);
    }

    #[test]
    fn test_trigger_multiplicity_and_bcid_checks() {
        let mut builder = EventBuilder::new(DecoderSettings {
            bcids_per_event: 2,
            trigger_multiplicity: 2,
            ..Default::default()
        })
        .unwrap();
        let words = [
            dh(1, 10),
            dh(1, 11),
            // New trigger block: LVL1ID and BCID may change
            dh(2, 500),
            encode::data_record(3, 3, 3, 15),
            dh(3, 502),
        ];
        let events = run(&mut builder, &words);
        assert_eq!(events.len(), 1);
        let event = &events[0];
        assert_eq!(event.n_data_headers, 4);
        assert_eq!(event.hits[0].relative_bcid, 2);
        assert!(event.status.contains(EventStatus::NON_CONST_LVL1ID));
        assert!(event.status.contains(EventStatus::BCID_JUMP));
        assert_eq!(builder.counters().error(ErrorKind::NonConstLvl1id), 1);
        assert_eq!(builder.counters().error(ErrorKind::BcidJump), 1);
    }

    #[test]
    fn test_bcid_wraps_around() {
        let mut builder = EventBuilder::new(settings(3)).unwrap();
        run(&mut builder, &[dh(0, 1022), dh(0, 1023), dh(0, 0)]);
        assert_eq!(builder.counters().total_errors(), 0);

        let mut builder = EventBuilder::new(DecoderSettings {
            chip_flavor: ChipFlavor::A,
            bcids_per_event: 2,
            ..Default::default()
        })
        .unwrap();
        let a = |bcid| encode::data_header(false, 100, bcid, ChipFlavor::A);
        run(&mut builder, &[a(255), a(0)]);
        assert_eq!(builder.counters().total_errors(), 0);
    }

    #[test]
    fn test_data_record_without_event() {
        let mut builder = EventBuilder::new(settings(1)).unwrap();
        let events = run(
            &mut builder,
            &[encode::data_record(1, 1, 1, 1), dh(0, 0), encode::data_record(1, 1, 1, 15)],
        );
        assert_eq!(builder.counters().error(ErrorKind::NoEventOpen), 1);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].hits.len(), 1);
    }

    #[test]
    fn test_address_value_pairing() {
        let mut builder = EventBuilder::new(settings(1)).unwrap();
        let words = [
            dh(0, 0),
            encode::address_record(true, 7),
            encode::value_record(0x1234),
            encode::address_record(false, 8),
            encode::data_record(1, 1, 1, 15),
            // The address record above is no longer pending
            encode::value_record(0x5678),
        ];
        let events = run(&mut builder, &words);
        assert_eq!(builder.register_value(AddressKind::ShiftRegister, 7), Some(0x1234));
        assert_eq!(builder.register_value(AddressKind::GlobalRegister, 8), None);
        assert_eq!(builder.counters().error(ErrorKind::OrphanValueRecord), 1);
        assert!(events[0].status.contains(EventStatus::ORPHAN_VALUE_RECORD));
    }

    #[test]
    fn test_trigger_number_alignment() {
        let mut builder = EventBuilder::new(DecoderSettings {
            bcids_per_event: 1,
            alignment: Alignment::TriggerNumber,
            ..Default::default()
        })
        .unwrap();
        let words = [
            encode::trigger_word(1),
            dh(0, 0),
            encode::data_record(1, 1, 1, 15),
            encode::trigger_word(2),
            dh(1, 5),
            encode::trigger_word(5),
            // Closes an event without any header
            encode::trigger_word(4),
            dh(3, 9),
            // Header overflow starts an event with no trigger word
            dh(4, 11),
        ];
        let events = run(&mut builder, &words);
        let triggers: Vec<Option<u32>> = events.iter().map(|e| e.trigger_number).collect();
        assert_eq!(triggers, vec![Some(1), Some(2), Some(5), Some(4), None]);
        assert!(events[0].status.is_empty());
        assert!(events[1].status.contains(EventStatus::NO_HIT));
        assert!(events[2].status.contains(EventStatus::TRIGGER_ERROR));
        assert!(events[2].status.contains(EventStatus::EVENT_INCOMPLETE));
        assert!(events[3].status.contains(EventStatus::TRIGGER_ERROR));
        assert!(events[4].status.contains(EventStatus::NO_TRIGGER_WORD));

        let counters = builder.counters();
        assert_eq!(counters.trigger_error(TriggerErrorKind::Jump), 1);
        assert_eq!(counters.trigger_error(TriggerErrorKind::NotIncreasing), 1);
        assert_eq!(counters.trigger_error(TriggerErrorKind::MissingTriggerWord), 1);
        assert_eq!(counters.error(ErrorKind::EventIncomplete), 1);
    }

    #[test]
    fn test_trigger_words_without_alignment() {
        let mut builder = EventBuilder::new(settings(1)).unwrap();
        let words = [
            encode::trigger_word(7),
            encode::trigger_word(8),
            dh(0, 0),
            // The open event already has all its headers, so this belongs to the next one
            encode::trigger_word(9),
            dh(1, 1),
            dh(2, 2),
        ];
        let events = run(&mut builder, &words);
        assert_eq!(events.len(), 3);
        assert_eq!(events[0].trigger_number, Some(7));
        assert!(events[0].status.contains(EventStatus::TRIGGER_ERROR));
        assert_eq!(events[1].trigger_number, Some(9));
        assert!(!events[1].status.contains(EventStatus::TRIGGER_ERROR));
        assert_eq!(events[2].trigger_number, None);
        assert!(events[2].status.contains(EventStatus::NO_TRIGGER_WORD));
        assert_eq!(
            builder
                .counters()
                .trigger_error(TriggerErrorKind::MultipleTriggerWords),
            1
        );
        assert_eq!(
            builder
                .counters()
                .trigger_error(TriggerErrorKind::MissingTriggerWord),
            0
        );
    }

    #[test]
    fn test_tdc_words() {
        let mut builder = EventBuilder::new(DecoderSettings {
            bcids_per_event: 1,
            alignment: Alignment::TdcWord,
            ..Default::default()
        })
        .unwrap();
        let words = [
            encode::tdc_word(100, 1),
            dh(0, 0),
            encode::tdc_word(200, 2),
            dh(1, 1),
        ];
        let events = run(&mut builder, &words);
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].tdc, Some(100));
        assert_eq!(events[1].tdc, Some(200));
        assert!(events[1].status.contains(EventStatus::HAS_TDC_WORD));

        let mut builder = EventBuilder::new(settings(2)).unwrap();
        let events = run(
            &mut builder,
            &[dh(0, 0), encode::tdc_word(1, 1), encode::tdc_word(2, 2), dh(0, 1)],
        );
        assert_eq!(events[0].tdc, Some(1));
        assert!(events[0].status.contains(EventStatus::MANY_TDC_WORDS));
        assert_eq!(builder.counters().error(ErrorKind::ManyTdcWords), 1);
    }

    #[test]
    fn test_service_records() {
        let mut builder = EventBuilder::new(settings(1)).unwrap();
        let sr14 = |high: u16| encode::service_record(14, high << 3);
        let words = [
            dh(30, 0),
            sr14(3),
            dh(31, 1),
            // LVL1ID low bits wrap, so the high bits move on to 4
            dh(0, 2),
            sr14(4),
            dh(1, 3),
            sr14(9),
            encode::service_record(15, 12),
            encode::service_record(16, 0x200),
            encode::service_record(2, 1),
        ];
        let events = run(&mut builder, &words);
        let counters = builder.counters();
        assert_eq!(counters.service_record(14), 3);
        assert_eq!(counters.service_record(2), 1);
        assert_eq!(counters.error(ErrorKind::ServiceRecordMismatch), 1);
        assert_eq!(counters.skipped_triggers(), 12);
        let last = events.last().unwrap();
        assert!(last.status.contains(EventStatus::SERVICE_RECORD_MISMATCH));
        assert!(last.status.contains(EventStatus::TRUNCATED));
        assert!(last.status.contains(EventStatus::HAS_SERVICE_RECORD));
        assert!(!events[2].status.contains(EventStatus::SERVICE_RECORD_MISMATCH));
        // Service records are not structural errors
        assert_eq!(counters.structural_errors(), 0);
    }

    #[test]
    fn test_extended_lvl1id_resyncs() {
        let mut builder = EventBuilder::new(settings(1)).unwrap();
        for word in [dh(5, 0), encode::service_record(14, 2 << 3), dh(6, 1)] {
            builder.push_record(classify(word, ChipFlavor::B));
        }
        assert_eq!(builder.extended_lvl1id(), Some((2 << 5) | 6));
    }

    #[test]
    fn test_reset_counters() {
        let mut builder = EventBuilder::new(settings(1)).unwrap();
        run(&mut builder, &[0x00FF_FFFF, 0x00FF_FFFF]);
        assert_eq!(builder.counters().error(ErrorKind::UnknownWord), 2);
        builder.reset_counters();
        assert_eq!(builder.counters().total_errors(), 0);
    }

    #[test]
    fn test_second_pixel_beyond_last_column() {
        let mut builder = EventBuilder::new(settings(1)).unwrap();
        let events = run(
            &mut builder,
            &[dh(0, 0), encode::data_record(80, 7, 3, 5), dh(1, 1)],
        );
        // Only the first pixel of the pair is inside the matrix
        assert_eq!(events[0].hits, vec![hit(80, 7, 3, 0)]);
        assert_eq!(builder.counters().error(ErrorKind::PixelOutOfRange), 1);
        assert_eq!(builder.counters().structural_errors(), 0);
    }

    #[test]
    fn test_invalid_settings_are_rejected() {
        assert!(matches!(
            EventBuilder::new(settings(0)),
            Err(ConfigError::InvalidValue {
                field: "bcids_per_event",
                ..
            })
        ));
        let oversized = DecoderSettings {
            bcids_per_event: 1024,
            trigger_multiplicity: 5_000_000,
            ..Default::default()
        };
        assert!(matches!(
            EventBuilder::new(oversized),
            Err(ConfigError::InvalidValue {
                field: "trigger_multiplicity",
                ..
            })
        ));
    }

    #[test]
    fn test_largest_event_keeps_relative_bcids() {
        let settings = DecoderSettings {
            bcids_per_event: 1024,
            trigger_multiplicity: 64,
            ..Default::default()
        };
        let mut builder = EventBuilder::new(settings).unwrap();
        let mut words = Vec::new();
        for n in 0..settings.headers_per_event() {
            let bcid = (n % 1024) as u16;
            words.push(dh((n / 1024) as u16 % 32, bcid));
            if n + 1 == settings.headers_per_event() {
                words.push(encode::data_record(1, 1, 2, 15));
            }
        }
        let events = run(&mut builder, &words);
        assert_eq!(events.len(), 1);
        assert!(!events[0].is_truncated());
        assert_eq!(events[0].hits, vec![hit(1, 1, 2, u16::MAX)]);
    }
}

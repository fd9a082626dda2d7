use serde::{Deserialize, Serialize};

use super::constants::*;
use super::error::SinkError;
use super::hit_sink::HitSink;

/// One decoded telescope hit. Plane 0 records carry only a trigger number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TelescopeHit {
    pub plane: u8,
    pub frame: u32,
    pub x: u16,
    pub y: u16,
    pub tlu: u16,
}

/// Frame decoding errors and aborts, summed over all planes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TelescopeCounters {
    pub header_errors: u64,
    pub length_errors: u64,
    pub trailer_errors: u64,
    pub frame_end_errors: u64,
    pub overflows: u64,
    pub unknown_words: u64,
}

impl TelescopeCounters {
    pub fn total(&self) -> u64 {
        self.header_errors
            + self.length_errors
            + self.trailer_errors
            + self.frame_end_errors
            + self.overflows
            + self.unknown_words
    }
}

/// Outcome of feeding one word to a plane
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PlaneStep {
    Nothing,
    Frame(u32),
    Columns {
        frame: u32,
        row: u16,
        first: u16,
        last: u16,
    },
    HeaderError,
    LengthError,
    TrailerError,
    FrameEndError,
    Overflow,
}

/// Decode cursor of a single Mimosa26 plane.
///
/// `idx` is -1 while waiting for a start marker and otherwise counts the words of the
/// current frame: 1 header, 2-3 frame number, 4-5 data length, then the data section,
/// the trailer and the frame end.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlaneDecoderState {
    pub frame: u32,
    pub declared_len: i32,
    pub idx: i32,
    pub pending_status_count: u8,
    pub current_row: u16,
}

impl Default for PlaneDecoderState {
    fn default() -> Self {
        Self {
            frame: 0,
            declared_len: 0,
            idx: -1,
            pending_status_count: 0,
            current_row: 0,
        }
    }
}

impl PlaneDecoderState {
    pub fn is_idle(&self) -> bool {
        self.idx < 0
    }

    fn reset(&mut self) {
        self.idx = -1;
        self.pending_status_count = 0;
    }

    fn step(&mut self, plane_id: u8, word: u32) -> PlaneStep {
        if word & M26_START_MASK == M26_START_PATTERN {
            self.idx = 0;
            self.pending_status_count = 0;
            return PlaneStep::Nothing;
        }
        if self.is_idle() {
            return PlaneStep::Nothing;
        }

        self.idx += 1;
        let low = word & M26_LOW_WORD_MASK;
        let data_end = M26_DATA_START_INDEX + self.declared_len;
        match self.idx {
            1 if low != M26_HEADER_PATTERN | plane_id as u32 => PlaneStep::HeaderError,
            1 => PlaneStep::Nothing,
            2 => {
                self.frame = low;
                PlaneStep::Nothing
            }
            3 => {
                self.frame |= low << 16;
                PlaneStep::Frame(self.frame)
            }
            4 => {
                self.declared_len = (low * 2) as i32;
                PlaneStep::Nothing
            }
            5 if (low * 2) as i32 != self.declared_len => PlaneStep::LengthError,
            5 => PlaneStep::Nothing,
            idx if idx < data_end => self.data_word(low, idx == data_end - 1),
            idx if idx == data_end => {
                if low != M26_TRAILER_PATTERN {
                    PlaneStep::TrailerError
                } else {
                    PlaneStep::Nothing
                }
            }
            _ => {
                self.reset();
                if low != M26_TRAILER_PATTERN | plane_id as u32 {
                    PlaneStep::FrameEndError
                } else {
                    PlaneStep::Nothing
                }
            }
        }
    }

    fn data_word(&mut self, low: u32, last_slot: bool) -> PlaneStep {
        if self.pending_status_count > 0 {
            let n_extra = (low & 0x3) as u16;
            let first = ((low >> 2) & 0x7FF) as u16;
            self.pending_status_count -= 1;
            return PlaneStep::Columns {
                frame: self.frame,
                row: self.current_row,
                first,
                last: first + n_extra,
            };
        }
        // The data section is padded to an even length; a slot left over at the end is filler
        if last_slot {
            return PlaneStep::Nothing;
        }
        if low & 0x8000 != 0 {
            self.reset();
            return PlaneStep::Overflow;
        }
        self.pending_status_count = (low & 0xF) as u8;
        self.current_row = ((low >> 4) & 0x7FF) as u16;
        PlaneStep::Nothing
    }
}

/// Mimosa26 telescope decoder: one independent state machine per plane, and a bounded hit
/// buffer flushed to a [`HitSink`] whenever it fills up.
///
/// Trigger words are decoded regardless of plane state. They produce a plane 0 record stamped
/// with the current frame number of plane 1, and every later plane hit carries their TLU number.
#[derive(Debug)]
pub struct TelescopeDecoder<K: HitSink> {
    planes: [PlaneDecoderState; N_TELESCOPE_PLANES],
    reference_frame: u32,
    tlu: u16,
    buffer: Vec<TelescopeHit>,
    capacity: usize,
    sink: K,
    counters: TelescopeCounters,
    n_hits: u64,
    n_batches: u64,
}

impl<K: HitSink> TelescopeDecoder<K> {
    pub fn new(sink: K, capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            planes: [PlaneDecoderState::default(); N_TELESCOPE_PLANES],
            reference_frame: 0,
            tlu: 0,
            buffer: Vec::with_capacity(capacity),
            capacity,
            sink,
            counters: TelescopeCounters::default(),
            n_hits: 0,
            n_batches: 0,
        }
    }

    pub fn counters(&self) -> &TelescopeCounters {
        &self.counters
    }

    /// State of plane 1..=6
    pub fn plane_state(&self, plane_id: u8) -> Option<&PlaneDecoderState> {
        self.planes.get((plane_id as usize).checked_sub(1)?)
    }

    pub fn n_hits(&self) -> u64 {
        self.n_hits
    }

    pub fn n_batches(&self) -> u64 {
        self.n_batches
    }

    pub fn n_buffered(&self) -> usize {
        self.buffer.len()
    }

    pub fn sink(&self) -> &K {
        &self.sink
    }

    pub fn into_sink(self) -> K {
        self.sink
    }

    /// Feed the next raw word. Only a failing sink is an error.
    pub fn push_word(&mut self, word: u32) -> Result<(), SinkError> {
        if word & TRIGGER_WORD_FLAG != 0 {
            self.tlu = (word & M26_TLU_MASK) as u16;
            return self.emit(TelescopeHit {
                plane: M26_TRIGGER_PLANE,
                frame: self.reference_frame,
                x: 0,
                y: 0,
                tlu: self.tlu,
            });
        }

        let plane_id = ((word & M26_PLANE_MASK) >> 20) as u8;
        if word & WORD_KIND_MASK != M26_WORD_KIND
            || !(1..=N_TELESCOPE_PLANES as u8).contains(&plane_id)
        {
            self.counters.unknown_words += 1;
            return Ok(());
        }

        let mid = (plane_id - 1) as usize;
        match self.planes[mid].step(plane_id, word) {
            PlaneStep::Nothing => (),
            PlaneStep::Frame(frame) => {
                if mid == 0 {
                    self.reference_frame = frame;
                }
            }
            PlaneStep::Columns {
                frame,
                row,
                first,
                last,
            } => {
                for x in first..=last {
                    self.emit(TelescopeHit {
                        plane: plane_id,
                        frame,
                        x,
                        y: row,
                        tlu: self.tlu,
                    })?;
                }
            }
            PlaneStep::HeaderError => self.counters.header_errors += 1,
            PlaneStep::LengthError => self.counters.length_errors += 1,
            PlaneStep::TrailerError => self.counters.trailer_errors += 1,
            PlaneStep::FrameEndError => self.counters.frame_end_errors += 1,
            PlaneStep::Overflow => self.counters.overflows += 1,
        }
        Ok(())
    }

    pub fn push_words(&mut self, words: &[u32]) -> Result<(), SinkError> {
        for word in words {
            self.push_word(*word)?;
        }
        Ok(())
    }

    /// Flush whatever is buffered. Plane states are kept, so decoding may continue.
    pub fn finish(&mut self) -> Result<(), SinkError> {
        self.flush_buffer()?;
        self.sink.flush()
    }

    fn emit(&mut self, hit: TelescopeHit) -> Result<(), SinkError> {
        self.buffer.push(hit);
        self.n_hits += 1;
        if self.buffer.len() >= self.capacity {
            self.flush_buffer()?;
        }
        Ok(())
    }

    fn flush_buffer(&mut self) -> Result<(), SinkError> {
        if self.buffer.is_empty() {
            return Ok(());
        }
        self.sink.write_batch(&self.buffer)?;
        self.n_batches += 1;
        self.buffer.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hit(plane: u8, frame: u32, x: u16, y: u16, tlu: u16) -> TelescopeHit {
        TelescopeHit {
            plane,
            frame,
            x,
            y,
            tlu,
        }
    }

    fn m26(plane: u32, low: u32) -> u32 {
        M26_WORD_KIND | (plane << 20) | low
    }

    fn start(plane: u32) -> u32 {
        m26(plane, M26_START_PATTERN)
    }

    fn status(row: u32, count: u32) -> u32 {
        (row << 4) | count
    }

    fn column(col: u32, n_extra: u32) -> u32 {
        (col << 2) | n_extra
    }

    /// A full frame with the given data section. The length field counts pairs of data words.
    fn frame(plane: u32, frame_number: u32, data: &[u32]) -> Vec<u32> {
        let length = (data.len() as u32).div_ceil(2);
        let mut words = vec![
            start(plane),
            m26(plane, M26_HEADER_PATTERN | plane),
            m26(plane, frame_number & 0xFFFF),
            m26(plane, frame_number >> 16),
            m26(plane, length),
            m26(plane, length),
        ];
        words.extend(data.iter().map(|low| m26(plane, *low)));
        words.push(m26(plane, M26_TRAILER_PATTERN));
        words.push(m26(plane, M26_TRAILER_PATTERN | plane));
        words
    }

    #[test]
    fn test_single_frame() {
        let mut decoder = TelescopeDecoder::new(Vec::new(), 100);
        // The length word counts word pairs, so these two data words go with a length of 1.
        // A length of 4 would declare eight data slots (see the telescope length entry in
        // DESIGN.md).
        let words = frame(1, 0x0056_1234, &[status(100, 1), column(20, 1)]);
        decoder.push_words(&words).unwrap();
        decoder.finish().unwrap();

        let hits = decoder.sink();
        assert_eq!(
            hits,
            &vec![
                hit(1, 0x0056_1234, 20, 100, 0),
                hit(1, 0x0056_1234, 21, 100, 0),
            ]
        );
        assert_eq!(decoder.counters().total(), 0);
        assert!(decoder.plane_state(1).unwrap().is_idle());
    }

    #[test]
    fn test_header_error_does_not_abort() {
        let mut decoder = TelescopeDecoder::new(Vec::new(), 100);
        let mut words = frame(1, 7, &[status(5, 1), column(3, 0)]);
        words[1] = m26(1, 0x1234);
        decoder.push_words(&words).unwrap();
        decoder.finish().unwrap();
        assert_eq!(decoder.counters().header_errors, 1);
        assert_eq!(decoder.counters().total(), 1);
        assert_eq!(decoder.sink().len(), 1);
        assert_eq!(decoder.sink()[0].frame, 7);
    }

    #[test]
    fn test_length_and_trailer_errors() {
        let mut decoder = TelescopeDecoder::new(Vec::new(), 100);
        let mut words = frame(2, 1, &[status(5, 1), column(3, 0)]);
        words[5] = m26(2, 3);
        let n = words.len();
        words[n - 2] = m26(2, 0xAA00);
        words[n - 1] = m26(2, 0xAA00);
        decoder.push_words(&words).unwrap();
        let counters = decoder.counters();
        assert_eq!(counters.length_errors, 1);
        assert_eq!(counters.trailer_errors, 1);
        assert_eq!(counters.frame_end_errors, 1);
        // The frame end resets the plane regardless
        assert!(decoder.plane_state(2).unwrap().is_idle());
    }

    #[test]
    fn test_overflow_aborts_frame() {
        let mut decoder = TelescopeDecoder::new(Vec::new(), 100);
        let mut words = frame(3, 1, &[status(5, 1) | 0x8000, column(3, 0)]);
        words.extend(frame(3, 2, &[status(6, 1), column(9, 0)]));
        decoder.push_words(&words).unwrap();
        decoder.finish().unwrap();
        assert_eq!(decoder.counters().overflows, 1);
        // The rest of the aborted frame is noise until the next start marker
        assert_eq!(decoder.counters().total(), 1);
        assert_eq!(
            decoder.sink(),
            &vec![hit(3, 2, 9, 6, 0)]
        );
    }

    #[test]
    fn test_padding_slot_before_trailer() {
        let mut decoder = TelescopeDecoder::new(Vec::new(), 100);
        // Three data words padded to four; the filler would read as an overflowing status word
        let words = frame(1, 3, &[status(10, 2), column(1, 0), column(40, 3), 0xFFFF]);
        decoder.push_words(&words).unwrap();
        decoder.finish().unwrap();
        assert_eq!(decoder.counters().total(), 0);
        let xs: Vec<u16> = decoder.sink().iter().map(|hit| hit.x).collect();
        assert_eq!(xs, vec![1, 40, 41, 42, 43]);
    }

    #[test]
    fn test_trigger_words() {
        let mut decoder = TelescopeDecoder::new(Vec::new(), 100);
        decoder.push_words(&frame(1, 0x10, &[])).unwrap();
        // Plane 2 frame numbers do not move the reference
        decoder.push_words(&frame(2, 0x99, &[])).unwrap();
        decoder.push_word(TRIGGER_WORD_FLAG | 0x1_8005).unwrap();
        decoder
            .push_words(&frame(2, 0x9A, &[status(1, 1), column(2, 0)]))
            .unwrap();
        decoder.finish().unwrap();
        assert_eq!(
            decoder.sink(),
            &vec![
                hit(0, 0x10, 0, 0, 0x0005),
                hit(2, 0x9A, 2, 1, 0x0005),
            ]
        );
    }

    #[test]
    fn test_noise_and_unknown_words() {
        let mut decoder = TelescopeDecoder::new(Vec::new(), 100);
        // Idle plane words are dropped silently
        decoder.push_word(m26(4, 0x1234)).unwrap();
        decoder.push_word(0x1000_0000).unwrap();
        decoder.push_word(m26(7, 0)).unwrap();
        decoder.push_word(m26(0, 0)).unwrap();
        assert_eq!(decoder.counters().unknown_words, 3);
        assert!(decoder.sink().is_empty());
        assert!(decoder.plane_state(0).is_none());
        assert!(decoder.plane_state(7).is_none());
    }

    #[derive(Default)]
    struct BatchRecorder(Vec<Vec<TelescopeHit>>);

    impl HitSink for BatchRecorder {
        fn write_batch(&mut self, hits: &[TelescopeHit]) -> Result<(), SinkError> {
            self.0.push(hits.to_vec());
            Ok(())
        }
    }

    #[test]
    fn test_buffer_flushes_in_batches() {
        let mut decoder = TelescopeDecoder::new(BatchRecorder::default(), 3);
        decoder
            .push_words(&frame(5, 1, &[status(1, 2), column(10, 3), column(20, 0), 0]))
            .unwrap();
        assert_eq!(decoder.n_batches(), 1);
        assert_eq!(decoder.n_buffered(), 2);
        decoder.finish().unwrap();
        // Nothing buffered means nothing written
        decoder.finish().unwrap();
        assert_eq!(decoder.n_hits(), 5);
        assert_eq!(decoder.counters().total(), 0);
        let batches = decoder.into_sink().0;
        let sizes: Vec<usize> = batches.iter().map(|batch| batch.len()).collect();
        assert_eq!(sizes, vec![3, 2]);
        assert_eq!(batches[1][1].x, 20);
    }
}

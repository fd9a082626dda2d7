use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Sender;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use super::config::{Config, DecoderSettings};
use super::constants::{REPORT_INTERVAL_WORDS, WORD_SIZE};
use super::counters::CounterSummary;
use super::error::{ConfigError, ProcessorError};
use super::event::Event;
use super::event_builder::EventBuilder;
use super::fifo::FifoSource;
use super::hit_sink::BinaryHitSink;
use super::raw_file::{read_raw_words, RawDataWriter};
use super::readout::{RawChunk, ReadoutStats, ReadoutWorker};
use super::record::classify;
use super::telescope::{TelescopeCounters, TelescopeDecoder};
use super::worker_status::{Stage, WorkerStatus};

/// Classifies raw FE-I4 words and feeds them to an [`EventBuilder`]
#[derive(Debug)]
pub struct Fei4Decoder {
    builder: EventBuilder,
    n_words: u64,
    n_events: u64,
    n_truncated_events: u64,
}

impl Fei4Decoder {
    pub fn new(settings: DecoderSettings) -> Result<Self, ConfigError> {
        Ok(Self {
            builder: EventBuilder::new(settings)?,
            n_words: 0,
            n_events: 0,
            n_truncated_events: 0,
        })
    }

    pub fn push_word(&mut self, word: u32) -> Option<Event> {
        self.n_words += 1;
        let flavor = self.builder.settings().chip_flavor;
        let event = self.builder.push_record(classify(word, flavor))?;
        Some(self.count(event))
    }

    pub fn push_words<F: FnMut(Event)>(&mut self, words: &[u32], on_event: &mut F) {
        for word in words {
            if let Some(event) = self.push_word(*word) {
                on_event(event);
            }
        }
    }

    /// Flush the last event at end of stream
    pub fn finish(&mut self) -> Option<Event> {
        let event = self.builder.finish()?;
        Some(self.count(event))
    }

    pub fn builder(&self) -> &EventBuilder {
        &self.builder
    }

    pub fn n_words(&self) -> u64 {
        self.n_words
    }

    pub fn n_events(&self) -> u64 {
        self.n_events
    }

    fn count(&mut self, event: Event) -> Event {
        self.n_events += 1;
        if event.is_truncated() {
            self.n_truncated_events += 1;
        }
        event
    }

    fn summary(
        &self,
        stop_reason: StopReason,
        duration: Duration,
        readout: Option<ReadoutStats>,
        raw_data_file: Option<PathBuf>,
    ) -> RunSummary {
        RunSummary {
            stop_reason,
            duration_s: duration.as_secs_f64(),
            n_words: self.n_words,
            n_events: self.n_events,
            n_truncated_events: self.n_truncated_events,
            readout,
            counters: self.builder.counters().summary(),
            raw_data_file,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StopReason {
    Requested,
    NoDataTimeout,
    EndOfFile,
    Fault,
}

/// What happened during a run, in a form fit for logs and YAML
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    pub stop_reason: StopReason,
    pub duration_s: f64,
    pub n_words: u64,
    pub n_events: u64,
    pub n_truncated_events: u64,
    pub readout: Option<ReadoutStats>,
    pub counters: CounterSummary,
    pub raw_data_file: Option<PathBuf>,
}

impl RunSummary {
    pub fn write_yaml(&self, path: &Path) -> Result<(), ProcessorError> {
        let yaml_str = serde_yaml::to_string(self)?;
        std::fs::write(path, yaml_str)?;
        Ok(())
    }

    fn log(&self) {
        spdlog::info!(
            "Run stopped ({:?}) after {:.1} s: {} words, {} events ({} truncated)",
            self.stop_reason,
            self.duration_s,
            self.n_words,
            self.n_events,
            self.n_truncated_events
        );
        for (kind, count) in self.counters.errors.iter() {
            spdlog::warn!("{kind}: {count}");
        }
        for (kind, count) in self.counters.trigger_errors.iter() {
            spdlog::warn!("{kind}: {count}");
        }
        if self.counters.skipped_triggers > 0 {
            spdlog::warn!("Skipped triggers: {}", self.counters.skipped_triggers);
        }
    }
}

fn consume_chunk<F: FnMut(Event)>(
    chunk: &RawChunk,
    decoder: &mut Fei4Decoder,
    recorder: Option<&mut RawDataWriter>,
    on_event: &mut F,
) -> Result<(), ProcessorError> {
    if let Some(recorder) = recorder {
        recorder.write_chunk(chunk)?;
    }
    decoder.push_words(&chunk.words, on_event);
    Ok(())
}

/// The main acquisition loop.
///
/// Starts a [`ReadoutWorker`] on the device and decodes its chunks on the calling thread,
/// handing every completed event to `on_event`. The run ends when `stop` is raised, when no
/// data arrived for the configured timeout, or when the worker fails. Chunks still queued at
/// that point are decoded and the last event is flushed before returning, so a transport
/// fault only loses what never made it out of the FIFO.
pub fn run_acquisition<S, F>(
    device: Arc<Mutex<S>>,
    config: &Config,
    stop: &AtomicBool,
    tx: &Sender<WorkerStatus>,
    mut on_event: F,
) -> Result<RunSummary, ProcessorError>
where
    S: FifoSource,
    F: FnMut(Event),
{
    let started = Instant::now();
    config.validate()?;
    let mut recorder = if config.record_raw_data {
        let raw_path = config.get_output_file_name("raw")?;
        spdlog::info!("Recording raw data to {raw_path:?}");
        Some(RawDataWriter::create(&raw_path)?)
    } else {
        None
    };
    let mut decoder = Fei4Decoder::new(config.decoder)?;
    let mut worker = ReadoutWorker::new(device, &config.readout);
    let receiver = worker.receiver();
    let poll_interval = config.readout.poll_interval();
    let no_data_timeout = config.readout.no_data_timeout();

    worker.start()?;
    let mut last_data = Instant::now();
    let mut stop_reason = loop {
        if stop.load(Ordering::Acquire) {
            break StopReason::Requested;
        }
        if worker.is_stopped() {
            break StopReason::Fault;
        }
        match receiver.recv_timeout(poll_interval) {
            Some(chunk) => {
                last_data = Instant::now();
                consume_chunk(&chunk, &mut decoder, recorder.as_mut(), &mut on_event)?;
                tx.send(WorkerStatus::new(
                    Stage::Acquire,
                    decoder.n_words(),
                    decoder.n_events(),
                ))?;
            }
            None => {
                if no_data_timeout.is_some_and(|timeout| last_data.elapsed() >= timeout) {
                    spdlog::info!("No data for {:?}, stopping the run", last_data.elapsed());
                    break StopReason::NoDataTimeout;
                }
            }
        }
    };

    // A chunk the producer already took out of the FIFO may still be waiting for queue room
    worker.request_stop();
    while !worker.is_finished() {
        if let Some(chunk) = receiver.recv_timeout(poll_interval) {
            consume_chunk(&chunk, &mut decoder, recorder.as_mut(), &mut on_event)?;
        }
    }
    let readout = worker.join();
    for chunk in receiver.drain() {
        consume_chunk(&chunk, &mut decoder, recorder.as_mut(), &mut on_event)?;
    }
    if let Some(event) = decoder.finish() {
        on_event(event);
    }
    let raw_data_file = match recorder {
        Some(recorder) => Some(recorder.close()?),
        None => None,
    };

    let stats = match readout {
        Ok(stats) => stats,
        Err(e) => {
            stop_reason = StopReason::Fault;
            decoder
                .summary(stop_reason, started.elapsed(), None, raw_data_file)
                .log();
            spdlog::error!("Acquisition failed: {e}");
            return Err(e.into());
        }
    };
    let summary = decoder.summary(stop_reason, started.elapsed(), Some(stats), raw_data_file);
    summary.log();
    Ok(summary)
}

/// Decode a recorded FE-I4 raw data file (the config's `raw_data_path`) without going through
/// a ReadoutWorker.
pub fn decode_raw_file<F: FnMut(Event)>(
    config: &Config,
    tx: &Sender<WorkerStatus>,
    mut on_event: F,
) -> Result<RunSummary, ProcessorError> {
    let started = Instant::now();
    config.validate()?;
    let raw_path = config.get_raw_data_path()?;
    let raw = read_raw_words(raw_path)?;
    spdlog::info!(
        "Decoding {} of FE-I4 data from {raw_path:?}",
        human_bytes::human_bytes((raw.words.len() * WORD_SIZE) as f64)
    );
    if raw.is_truncated() {
        spdlog::warn!(
            "Raw data file ends with {} bytes of a partial word",
            raw.trailing_bytes
        );
    }

    let mut decoder = Fei4Decoder::new(config.decoder)?;
    for block in raw.words.chunks(REPORT_INTERVAL_WORDS) {
        decoder.push_words(block, &mut on_event);
        tx.send(WorkerStatus::new(
            Stage::Decode,
            decoder.n_words(),
            decoder.n_events(),
        ))?;
    }
    if let Some(event) = decoder.finish() {
        on_event(event);
    }

    let summary = decoder.summary(StopReason::EndOfFile, started.elapsed(), None, None);
    summary.log();
    Ok(summary)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelescopeSummary {
    pub n_words: u64,
    pub n_hits: u64,
    pub n_batches: u64,
    pub counters: TelescopeCounters,
    pub hit_file: PathBuf,
}

/// Decode a recorded Mimosa26 raw data file (the config's `raw_data_path`) into a binary hit
/// file in the output directory. Hits are appended if the hit file already exists.
pub fn decode_telescope_file(
    config: &Config,
    tx: &Sender<WorkerStatus>,
) -> Result<TelescopeSummary, ProcessorError> {
    config.validate()?;
    let raw_path = config.get_raw_data_path()?;
    let raw = read_raw_words(raw_path)?;
    let hit_path = config.get_output_file_name("hits")?;
    spdlog::info!(
        "Decoding {} of telescope data from {raw_path:?} into {hit_path:?}",
        human_bytes::human_bytes((raw.words.len() * WORD_SIZE) as f64)
    );

    let sink = BinaryHitSink::open(&hit_path)?;
    let mut decoder = TelescopeDecoder::new(sink, config.telescope.hit_buffer_capacity);
    let mut n_words = 0;
    for block in raw.words.chunks(REPORT_INTERVAL_WORDS) {
        decoder.push_words(block)?;
        n_words += block.len() as u64;
        tx.send(WorkerStatus::new(Stage::Telescope, n_words, decoder.n_hits()))?;
    }
    decoder.finish()?;

    let summary = TelescopeSummary {
        n_words,
        n_hits: decoder.n_hits(),
        n_batches: decoder.n_batches(),
        counters: *decoder.counters(),
        hit_file: hit_path,
    };
    spdlog::info!(
        "Telescope decoding done: {} hits in {} batches, {}",
        summary.n_hits,
        summary.n_batches,
        human_bytes::human_bytes(decoder.sink().n_bytes() as f64)
    );
    if summary.counters.total() > 0 {
        spdlog::warn!("Telescope frame errors: {:?}", summary.counters);
    }
    Ok(summary)
}

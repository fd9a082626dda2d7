use flume::{Receiver, RecvTimeoutError, SendTimeoutError, Sender, TrySendError};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use super::config::{OverflowPolicy, QueueSettings, ReadoutSettings};
use super::error::ReadoutError;
use super::fifo::{FifoSource, FifoWords};

/// How long a blocked producer waits before re-checking the abandon flag
const BLOCK_RETRY_INTERVAL: Duration = Duration::from_millis(10);

/// Seconds since the Unix epoch
pub fn now_timestamp() -> f64 {
    time::OffsetDateTime::now_utc().unix_timestamp_nanos() as f64 * 1.0e-9
}

/// The unit handed from the acquisition thread to the decoder. Never modified after
/// it is queued.
#[derive(Debug, Clone, PartialEq)]
pub struct RawChunk {
    pub timestamp: f64,
    pub words: Vec<u32>,
    pub error_flag: bool,
}

impl RawChunk {
    /// Stamp a set of words with the current time
    pub fn new(words: Vec<u32>) -> Self {
        Self {
            timestamp: now_timestamp(),
            words,
            error_flag: false,
        }
    }
}

/// What happened to a chunk pushed into the queue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    Queued,
    /// Queued after throwing away this many older chunks
    DroppedOldest(u64),
    /// The producer was told to give up while waiting for room; the chunk is lost
    Abandoned,
}

/// Create the chunk queue between the acquisition thread and the decoder.
pub fn chunk_queue(settings: QueueSettings) -> (ChunkSender, ChunkReceiver) {
    let (tx, rx) = match settings.capacity {
        Some(capacity) => flume::bounded(capacity),
        None => flume::unbounded(),
    };
    (
        ChunkSender {
            tx,
            rx: rx.clone(),
            settings,
        },
        ChunkReceiver { rx },
    )
}

/// Producer end of the chunk queue. Applies the configured overflow policy.
#[derive(Debug, Clone)]
pub struct ChunkSender {
    tx: Sender<RawChunk>,
    // Needed to evict the oldest chunk under DropOldest
    rx: Receiver<RawChunk>,
    settings: QueueSettings,
}

impl ChunkSender {
    /// Queue a chunk. Under [`OverflowPolicy::Block`] this waits for room until `abandon` is
    /// raised or the consumer end is gone.
    pub fn push(
        &self,
        chunk: RawChunk,
        abandon: &AtomicBool,
    ) -> Result<PushOutcome, ReadoutError> {
        let Some(capacity) = self.settings.capacity else {
            self.tx
                .send(chunk)
                .map_err(|_| ReadoutError::QueueDisconnected)?;
            return Ok(PushOutcome::Queued);
        };

        match self.settings.overflow_policy {
            OverflowPolicy::Block => {
                let mut pending = chunk;
                loop {
                    match self.tx.send_timeout(pending, BLOCK_RETRY_INTERVAL) {
                        Ok(()) => return Ok(PushOutcome::Queued),
                        Err(SendTimeoutError::Timeout(chunk)) => {
                            if abandon.load(Ordering::Acquire) {
                                return Ok(PushOutcome::Abandoned);
                            }
                            pending = chunk;
                        }
                        Err(SendTimeoutError::Disconnected(_)) => {
                            return Err(ReadoutError::QueueDisconnected)
                        }
                    }
                }
            }
            OverflowPolicy::DropOldest => {
                let mut pending = chunk;
                let mut dropped = 0;
                loop {
                    match self.tx.try_send(pending) {
                        Ok(()) if dropped == 0 => return Ok(PushOutcome::Queued),
                        Ok(()) => return Ok(PushOutcome::DroppedOldest(dropped)),
                        Err(TrySendError::Full(chunk)) => {
                            if self.rx.try_recv().is_ok() {
                                dropped += 1;
                            }
                            pending = chunk;
                        }
                        Err(TrySendError::Disconnected(_)) => {
                            return Err(ReadoutError::QueueDisconnected)
                        }
                    }
                }
            }
            OverflowPolicy::Error => match self.tx.try_send(chunk) {
                Ok(()) => Ok(PushOutcome::Queued),
                Err(TrySendError::Full(_)) => Err(ReadoutError::QueueOverflow(capacity)),
                Err(TrySendError::Disconnected(_)) => Err(ReadoutError::QueueDisconnected),
            },
        }
    }
}

/// Consumer end of the chunk queue. Chunks come out in acquisition order.
#[derive(Debug, Clone)]
pub struct ChunkReceiver {
    rx: Receiver<RawChunk>,
}

impl ChunkReceiver {
    /// Wait up to `timeout` for the next chunk
    pub fn recv_timeout(&self, timeout: Duration) -> Option<RawChunk> {
        self.rx.recv_timeout(timeout).ok()
    }

    pub fn try_recv(&self) -> Option<RawChunk> {
        self.rx.try_recv().ok()
    }

    /// Take everything currently queued
    pub fn drain(&self) -> Vec<RawChunk> {
        self.rx.drain().collect()
    }

    pub fn clear(&self) {
        self.rx.drain().for_each(drop);
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ReadoutStats {
    pub n_chunks: u64,
    pub n_words: u64,
    pub n_bytes: u64,
    pub dropped_chunks: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Idle,
    Running,
    Stopping,
}

/// The acquisition thread: polls a FIFO source and fills the chunk queue.
///
/// There is exactly one worker per device. The device sits behind a mutex shared with
/// any other code path issuing commands to the same hardware, so transfers never
/// interleave. Cancellation is cooperative: [`ReadoutWorker::request_stop`] raises a flag
/// and wakes the loop, [`ReadoutWorker::join`] waits for it. A chunk already read from the
/// FIFO is always queued before the loop exits, so a consumer that keeps draining until
/// [`ReadoutWorker::is_finished`] sees every word.
pub struct ReadoutWorker<S: FifoSource> {
    device: Arc<Mutex<S>>,
    poll_interval: Duration,
    sender: ChunkSender,
    receiver: ChunkReceiver,
    stop_flag: Arc<AtomicBool>,
    abandon_flag: Arc<AtomicBool>,
    wake: Option<Sender<()>>,
    handle: Option<JoinHandle<Result<ReadoutStats, ReadoutError>>>,
}

impl<S: FifoSource> ReadoutWorker<S> {
    pub fn new(device: Arc<Mutex<S>>, settings: &ReadoutSettings) -> Self {
        let (sender, receiver) = chunk_queue(settings.queue);
        Self {
            device,
            poll_interval: settings.poll_interval(),
            sender,
            receiver,
            stop_flag: Arc::new(AtomicBool::new(false)),
            abandon_flag: Arc::new(AtomicBool::new(false)),
            wake: None,
            handle: None,
        }
    }

    /// The shared device handle, for other code paths which talk to the same hardware
    pub fn device(&self) -> Arc<Mutex<S>> {
        self.device.clone()
    }

    /// The consumer end of this worker's queue
    pub fn receiver(&self) -> ChunkReceiver {
        self.receiver.clone()
    }

    pub fn state(&self) -> WorkerState {
        match &self.handle {
            None => WorkerState::Idle,
            Some(handle) if !handle.is_finished() && !self.is_stopped() => WorkerState::Running,
            Some(_) => WorkerState::Stopping,
        }
    }

    /// True once a stop was requested or the loop ended on a fault
    pub fn is_stopped(&self) -> bool {
        self.stop_flag.load(Ordering::Acquire)
    }

    /// True when no acquisition thread is alive
    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().map_or(true, |handle| handle.is_finished())
    }

    /// Start the acquisition loop. Any chunks left over from a previous run are discarded.
    pub fn start(&mut self) -> Result<(), ReadoutError> {
        if self.handle.is_some() {
            return Err(ReadoutError::AlreadyRunning);
        }
        self.receiver.clear();
        self.stop_flag.store(false, Ordering::Release);
        self.abandon_flag.store(false, Ordering::Release);

        let (wake_tx, wake_rx) = flume::bounded(1);
        self.wake = Some(wake_tx);

        let device = self.device.clone();
        let sender = self.sender.clone();
        let stop_flag = self.stop_flag.clone();
        let abandon_flag = self.abandon_flag.clone();
        let poll_interval = self.poll_interval;
        self.handle = Some(std::thread::spawn(move || {
            acquisition_loop(
                device,
                sender,
                stop_flag,
                abandon_flag,
                wake_rx,
                poll_interval,
            )
        }));
        spdlog::info!("Readout started, polling every {} ms", poll_interval.as_millis());
        Ok(())
    }

    /// Ask the acquisition loop to exit without waiting for it. A push blocked on a full
    /// queue still completes, so keep consuming until [`ReadoutWorker::is_finished`].
    pub fn request_stop(&mut self) {
        self.stop_flag.store(true, Ordering::Release);
        if let Some(wake) = self.wake.take() {
            // Full means a wake-up is already pending
            let _ = wake.try_send(());
        }
    }

    /// Wait for the acquisition loop to exit.
    ///
    /// Returns the fault which ended the loop, if there was one. Joining an idle worker
    /// does nothing and returns empty statistics.
    pub fn join(&mut self) -> Result<ReadoutStats, ReadoutError> {
        match self.handle.take() {
            None => Ok(ReadoutStats::default()),
            Some(handle) => match handle.join() {
                Ok(result) => result,
                Err(_) => Err(ReadoutError::ThreadPanicked),
            },
        }
    }

    /// Stop the acquisition loop and wait for it to exit. Idempotent.
    ///
    /// Nobody is assumed to be draining the queue, so a push blocked on a full queue gives
    /// up and its chunk is counted as dropped.
    pub fn stop(&mut self) -> Result<ReadoutStats, ReadoutError> {
        self.request_stop();
        self.abandon_flag.store(true, Ordering::Release);
        self.join()
    }
}

impl<S: FifoSource> Drop for ReadoutWorker<S> {
    fn drop(&mut self) {
        if self.handle.is_some() {
            if let Err(e) = self.stop() {
                spdlog::error!("Readout ended with error while being dropped: {e}");
            }
        }
    }
}

fn acquisition_loop<S: FifoSource>(
    device: Arc<Mutex<S>>,
    sender: ChunkSender,
    stop_flag: Arc<AtomicBool>,
    abandon_flag: Arc<AtomicBool>,
    wake: Receiver<()>,
    poll_interval: Duration,
) -> Result<ReadoutStats, ReadoutError> {
    let mut stats = ReadoutStats::default();
    let result = loop {
        if stop_flag.load(Ordering::Acquire) {
            break Ok(());
        }
        match wake.recv_timeout(poll_interval) {
            Err(RecvTimeoutError::Timeout) => (),
            // Woken up or the worker handle is gone
            _ => break Ok(()),
        }
        if stop_flag.load(Ordering::Acquire) {
            break Ok(());
        }

        let fifo_words = match read_device(&device) {
            Ok(words) => words,
            Err(e) => break Err(e),
        };
        stats.n_bytes += fifo_words.n_bytes() as u64;
        let words: Vec<u32> = fifo_words.collect();
        if words.is_empty() {
            continue;
        }

        stats.n_chunks += 1;
        stats.n_words += words.len() as u64;
        match sender.push(RawChunk::new(words), &abandon_flag) {
            Ok(PushOutcome::Queued) => (),
            Ok(PushOutcome::DroppedOldest(n)) => {
                spdlog::warn!("Chunk queue full, dropped {} oldest chunk(s)", n);
                stats.dropped_chunks += n;
            }
            Ok(PushOutcome::Abandoned) => {
                stats.dropped_chunks += 1;
                break Ok(());
            }
            Err(e) => break Err(e),
        }
    };

    spdlog::info!(
        "Readout loop finished: {} chunks, {} words, {} read, {} chunks dropped",
        stats.n_chunks,
        stats.n_words,
        human_bytes::human_bytes(stats.n_bytes as f64),
        stats.dropped_chunks
    );
    match result {
        Ok(()) => Ok(stats),
        Err(e) => {
            spdlog::error!("Readout stopped by fault: {e}");
            stop_flag.store(true, Ordering::Release);
            Err(e)
        }
    }
}

/// Hold the device lock only for the transfer itself
fn read_device<S: FifoSource>(device: &Mutex<S>) -> Result<FifoWords, ReadoutError> {
    let mut source = device.lock().map_err(|_| ReadoutError::DevicePoisoned)?;
    Ok(source.read_once()?)
}

use std::path::PathBuf;
use thiserror::Error;

use super::worker_status::WorkerStatus;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Transport failed due to IO error: {0}")]
    IOError(#[from] std::io::Error),
    #[error("Transport returned {got} bytes for a bulk read of {expected} bytes")]
    ShortRead { expected: usize, got: usize },
    #[error("Transport has been closed")]
    Closed,
}

#[derive(Debug, Error)]
pub enum ReadoutError {
    #[error("ReadoutWorker failed due to transport error: {0}")]
    TransportError(#[from] TransportError),
    #[error("ReadoutWorker chunk queue overflowed its capacity of {0} chunks")]
    QueueOverflow(usize),
    #[error("ReadoutWorker chunk queue was disconnected")]
    QueueDisconnected,
    #[error("ReadoutWorker could not lock the device because the lock was poisoned")]
    DevicePoisoned,
    #[error("ReadoutWorker is already running")]
    AlreadyRunning,
    #[error("ReadoutWorker acquisition thread panicked")]
    ThreadPanicked,
}

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("HitSink failed due to IO error: {0}")]
    IOError(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum RawFileError {
    #[error("Could not open raw data file because file {0:?} does not exist")]
    BadFilePath(PathBuf),
    #[error("Raw data file failed due to IO error: {0}")]
    IOError(#[from] std::io::Error),
    #[error("Raw data file failed to write its chunk table: {0}")]
    ParsingError(#[from] serde_yaml::Error),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to load configuration as file {0:?} does not exist")]
    BadFilePath(PathBuf),
    #[error("Config failed due to IO error: {0}")]
    IOError(#[from] std::io::Error),
    #[error("Config failed to parse YAML: {0}")]
    ParsingError(#[from] serde_yaml::Error),
    #[error("Config has an invalid value for {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },
}

#[derive(Debug, Error)]
pub enum ProcessorError {
    #[error("Processor failed due to ReadoutWorker error: {0}")]
    ReadoutError(#[from] ReadoutError),
    #[error("Processor failed due to HitSink error: {0}")]
    SinkError(#[from] SinkError),
    #[error("Processor failed due to raw data file error: {0}")]
    RawFileError(#[from] RawFileError),
    #[error("Processor failed due to Config error: {0}")]
    ConfigError(#[from] ConfigError),
    #[error("Processor failed due to Transport error: {0}")]
    TransportError(#[from] TransportError),
    #[error("Processor failed due to Send error: {0}")]
    SendError(#[from] std::sync::mpsc::SendError<WorkerStatus>),
    #[error("Processor failed to write run summary: {0}")]
    SummaryError(#[from] serde_yaml::Error),
    #[error("Processor failed due to IO error: {0}")]
    IoError(#[from] std::io::Error),
}

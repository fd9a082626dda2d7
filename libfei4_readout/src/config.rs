use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::constants::{
    DEFAULT_FIFO_BASE_ADDRESS, DEFAULT_HIT_BUFFER_CAPACITY, DEFAULT_MAX_TOT,
    DEFAULT_POLL_INTERVAL_MS, MAX_HEADERS_PER_EVENT, NO_HIT_TOT,
};
use super::error::ConfigError;
use super::fifo::WordFilter;
use super::record::ChipFlavor;

/// How the EventBuilder decides that a new trigger window starts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Alignment {
    /// Events are delimited only by the number of data headers
    #[default]
    DataHeader,
    /// A trigger word closes the open event and starts the next one
    TriggerNumber,
    /// A TDC word closes the open event and starts the next one
    TdcWord,
}

/// Settings of a single FE-I4 decode session. Fixed before the first word is decoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecoderSettings {
    pub chip_flavor: ChipFlavor,
    /// Number of consecutive triggers merged into one event
    pub trigger_multiplicity: u32,
    /// Number of data headers (bunch crossings) read out per trigger
    pub bcids_per_event: u32,
    /// Largest ToT code that still counts as a hit for the second pixel of a data record
    pub max_tot: u8,
    pub alignment: Alignment,
}

impl Default for DecoderSettings {
    fn default() -> Self {
        Self {
            chip_flavor: ChipFlavor::B,
            trigger_multiplicity: 1,
            bcids_per_event: 16,
            max_tot: DEFAULT_MAX_TOT,
            alignment: Alignment::DataHeader,
        }
    }
}

impl DecoderSettings {
    /// Total number of data headers in a complete event
    pub fn headers_per_event(&self) -> u32 {
        self.bcids_per_event.saturating_mul(self.trigger_multiplicity)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.trigger_multiplicity == 0 {
            return Err(ConfigError::InvalidValue {
                field: "trigger_multiplicity",
                reason: String::from("must be at least 1"),
            });
        }
        if self.bcids_per_event == 0
            || self.bcids_per_event > self.chip_flavor.bcid_range() as u32
        {
            return Err(ConfigError::InvalidValue {
                field: "bcids_per_event",
                reason: format!(
                    "must be between 1 and {}",
                    self.chip_flavor.bcid_range()
                ),
            });
        }
        let fits = self
            .bcids_per_event
            .checked_mul(self.trigger_multiplicity)
            .is_some_and(|n_headers| n_headers <= MAX_HEADERS_PER_EVENT);
        if !fits {
            return Err(ConfigError::InvalidValue {
                field: "trigger_multiplicity",
                reason: format!(
                    "bcids_per_event * trigger_multiplicity must not exceed {MAX_HEADERS_PER_EVENT}"
                ),
            });
        }
        if self.max_tot >= NO_HIT_TOT {
            return Err(ConfigError::InvalidValue {
                field: "max_tot",
                reason: format!("must be below the no-hit code {NO_HIT_TOT}"),
            });
        }
        Ok(())
    }
}

/// What the producer does when a bounded chunk queue is full
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum OverflowPolicy {
    /// Wait for the consumer to make room
    #[default]
    Block,
    /// Throw away the oldest queued chunk
    DropOldest,
    /// Stop the acquisition with an error
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct QueueSettings {
    /// Maximum number of queued chunks; None means unbounded
    pub capacity: Option<usize>,
    pub overflow_policy: OverflowPolicy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadoutSettings {
    pub fifo_base_address: u32,
    pub poll_interval_ms: u64,
    /// Stop the run when no data arrived for this long
    pub no_data_timeout_ms: Option<u64>,
    pub word_filter: WordFilter,
    pub queue: QueueSettings,
}

impl Default for ReadoutSettings {
    fn default() -> Self {
        Self {
            fifo_base_address: DEFAULT_FIFO_BASE_ADDRESS,
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            no_data_timeout_ms: None,
            word_filter: WordFilter::All,
            queue: QueueSettings::default(),
        }
    }
}

impl ReadoutSettings {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn no_data_timeout(&self) -> Option<Duration> {
        self.no_data_timeout_ms.map(Duration::from_millis)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.poll_interval_ms == 0 {
            return Err(ConfigError::InvalidValue {
                field: "poll_interval_ms",
                reason: String::from("must be at least 1 ms"),
            });
        }
        if self.queue.capacity == Some(0) {
            return Err(ConfigError::InvalidValue {
                field: "queue.capacity",
                reason: String::from("a bounded queue needs room for at least one chunk"),
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TelescopeSettings {
    /// Number of hits buffered before a batch is written to the sink
    pub hit_buffer_capacity: usize,
}

impl Default for TelescopeSettings {
    fn default() -> Self {
        Self {
            hit_buffer_capacity: DEFAULT_HIT_BUFFER_CAPACITY,
        }
    }
}

/// Structure representing the application configuration. Contains pathing, readout and decoding settings
/// Configs are seralizable and deserializable to YAML using serde and serde_yaml
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Raw data file to replay (or to record into)
    pub raw_data_path: PathBuf,
    /// Directory for recorded raw data, summaries, and telescope hit files
    pub output_path: PathBuf,
    pub record_raw_data: bool,
    pub decoder: DecoderSettings,
    pub readout: ReadoutSettings,
    pub telescope: TelescopeSettings,
}

impl Default for Config {
    /// Generate a new Config object. Paths will be empty/invalid
    fn default() -> Self {
        Self {
            raw_data_path: PathBuf::from("None"),
            output_path: PathBuf::from("None"),
            record_raw_data: false,
            decoder: DecoderSettings::default(),
            readout: ReadoutSettings::default(),
            telescope: TelescopeSettings::default(),
        }
    }
}

impl Config {
    /// Read the configuration in a YAML file
    /// Returns a Config if successful
    pub fn read_config_file(config_path: &Path) -> Result<Self, ConfigError> {
        if !config_path.exists() {
            return Err(ConfigError::BadFilePath(config_path.to_path_buf()));
        }

        let yaml_str = std::fs::read_to_string(config_path)?;

        let config = serde_yaml::from_str::<Self>(&yaml_str)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.decoder.validate()?;
        self.readout.validate()?;
        if self.telescope.hit_buffer_capacity == 0 {
            return Err(ConfigError::InvalidValue {
                field: "telescope.hit_buffer_capacity",
                reason: String::from("must be at least 1"),
            });
        }
        Ok(())
    }

    /// Check that the raw data file to replay exists
    pub fn get_raw_data_path(&self) -> Result<&Path, ConfigError> {
        if self.raw_data_path.exists() {
            Ok(&self.raw_data_path)
        } else {
            Err(ConfigError::BadFilePath(self.raw_data_path.clone()))
        }
    }

    /// Get the path of an output file named after the raw data file
    pub fn get_output_file_name(&self, extension: &str) -> Result<PathBuf, ConfigError> {
        if !self.output_path.exists() {
            return Err(ConfigError::BadFilePath(self.output_path.clone()));
        }
        let stem = self
            .raw_data_path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| String::from("run"));
        Ok(self.output_path.join(format!("{stem}.{extension}")))
    }
}

//! # fei4_readout
//!
//! fei4_readout is a readout and raw data decoder for FE-I4 pixel front-ends and Mimosa26
//! beam telescopes, written in Rust. It drains the SRAM FIFO of the readout board on a
//! dedicated acquisition thread, decodes the FE-I4 record protocol into events, and keeps
//! a tally of every protocol violation it sees along the way. Telescope data is decoded
//! by an independent per-plane state machine into a binary hit file.
//!
//! ## Installation
//!
//! The only method of install is from source. If you have not used Rust before, see the
//! [Rust docs](https://www.rust-lang.org/tools/install) for installation instructions.
//!
//! To build and install the CLI use `cargo install --path ./fei4_readout_cli` from the top
//! level fei4_readout repository. To use the CLI see the `fei4_readout_cli` README.
//!
//! ## Data flow
//!
//! ```text
//! Transport -> HardwareFifoSource -> ReadoutWorker -> chunk queue -> classify -> EventBuilder -> Event
//! raw telescope words -> TelescopeDecoder -> hit buffer -> HitSink
//! ```
//!
//! The [`readout::ReadoutWorker`] is the only thread touching the FIFO. Access to the device
//! goes through a mutex that any other code path talking to the same hardware shares, so
//! low level transactions never interleave. Decoding happens on the caller's thread, see
//! [`process::run_acquisition`].
//!
//! Protocol errors never stop decoding. They are counted in the
//! [`counters::Counters`] histograms and flagged in the status of the event they occurred in.
//! Only transport faults end a run, and they do so only after everything already read has
//! been decoded and flushed.
//!
//! ## Configuration
//!
//! Configurations are YAML files. A template can be made with `fei4_readout_cli -p config.yml new`.
//! The YAML format of a configuration file is as follows:
//!
//! ```yml
//! raw_data_path: None
//! output_path: None
//! record_raw_data: false
//! decoder:
//!   chip_flavor: B
//!   trigger_multiplicity: 1
//!   bcids_per_event: 16
//!   max_tot: 14
//!   alignment: DataHeader
//! readout:
//!   fifo_base_address: 98560
//!   poll_interval_ms: 50
//!   no_data_timeout_ms: null
//!   word_filter: All
//!   queue:
//!     capacity: null
//!     overflow_policy: Block
//! telescope:
//!   hit_buffer_capacity: 10000
//! ```
//!
//! - `chip_flavor`: `A` for FE-I4A, `B` for FE-I4B. Never mix flavors in one decode session.
//! - `alignment`: `DataHeader`, `TriggerNumber`, or `TdcWord`. Selects which marker starts a
//! new event.
//! - `queue.capacity`: `null` for an unbounded chunk queue. With a bound, `overflow_policy`
//! selects `Block`, `DropOldest`, or `Error`.
//!
//! ## Output
//!
//! ### Raw data files
//!
//! Raw data is stored as big-endian 32 bit words (`<name>.raw`) with a YAML chunk table next
//! to it (`<name>.chunks.yml`) listing `index_start`, `index_stop`, `timestamp`, and
//! `error_flag` of every recorded chunk.
//!
//! ### Telescope hit files
//!
//! Telescope hits are appended to `<name>.hits` as fixed 11 byte little-endian records:
//!
//! ```text
//! plane: u8 | frame: u32 | x: u16 | y: u16 | tlu: u16
//! ```
//!
//! Plane 0 records carry only a trigger number.
pub mod config;
pub mod constants;
pub mod counters;
pub mod error;
pub mod event;
pub mod event_builder;
pub mod fifo;
pub mod hit_sink;
pub mod process;
pub mod raw_file;
pub mod readout;
pub mod record;
pub mod telescope;
pub mod worker_status;

//! # fei4_readout_cli
//!
//! Part of the fei4_readout crate family.
//!
//! This is the command line application for FE-I4 and Mimosa26 raw data.
//!
//! ## Use
//!
//! ```bash
//! fei4_readout_cli -p config.yml new        # write a template configuration
//! fei4_readout_cli -p config.yml acquire    # replay raw_data_path through the readout worker
//! fei4_readout_cli -p config.yml decode     # decode raw_data_path as FE-I4 data
//! fei4_readout_cli -p config.yml telescope  # decode raw_data_path as Mimosa26 data
//! ```
//!
//! `acquire` and `decode` write a run summary (`<name>.summary.yml`) to the output path,
//! `telescope` writes the hit file (`<name>.hits`). Library messages go to `fei4_readout.log`.
use clap::{Arg, Command};
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use indicatif_log_bridge::LogWrapper;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use libfei4_readout::config::Config;
use libfei4_readout::constants::{REPLAY_MAX_TRANSFER_BYTES, WORD_SIZE};
use libfei4_readout::error::{ConfigError, ProcessorError};
use libfei4_readout::event::Event;
use libfei4_readout::fifo::HardwareFifoSource;
use libfei4_readout::process::{decode_raw_file, decode_telescope_file, run_acquisition, RunSummary};
use libfei4_readout::raw_file::FileTransport;
use libfei4_readout::worker_status::WorkerStatus;

fn make_template_config(path: &Path) -> Result<(), ConfigError> {
    let config = Config::default();
    let yaml_str = serde_yaml::to_string(&config)?;
    std::fs::write(path, yaml_str)?;
    Ok(())
}

/// Send library (spdlog) messages to a log file
fn init_file_logger() -> Result<(), spdlog::Error> {
    let file_sink = Arc::new(
        spdlog::sink::FileSink::builder()
            .path(PathBuf::from("./fei4_readout.log"))
            .formatter(spdlog::formatter::PatternFormatter::new(
                spdlog::formatter::pattern!(
                    "[{date_short} {time_short}] - [thread: {tid}] - [{^{level}}] - {payload}{eol}"
                ),
            ))
            .truncate(true)
            .build()?,
    );
    let logger = Arc::new(
        spdlog::Logger::builder()
            .flush_level_filter(spdlog::LevelFilter::All)
            .sink(file_sink)
            .build()?,
    );
    spdlog::set_default_logger(logger);
    Ok(())
}

/// Tally of event status flags, for the end of run report
#[derive(Debug, Default)]
struct FlagTally {
    counts: BTreeMap<&'static str, u64>,
}

impl FlagTally {
    fn add(&mut self, event: &Event) {
        for name in event.status.names() {
            *self.counts.entry(name).or_default() += 1;
        }
    }

    fn report(&self) {
        for (name, count) in self.counts.iter() {
            log::info!("Events flagged {name}: {count}");
        }
    }
}

/// Run a processing task on its own thread, updating the progress bar with its statuses.
/// `on_tick` is called on the main thread between statuses.
fn run_with_progress<T, F>(pb: &ProgressBar, task: F, mut on_tick: impl FnMut()) -> Option<T>
where
    T: Send + 'static,
    F: FnOnce(Sender<WorkerStatus>) -> Result<T, ProcessorError> + Send + 'static,
{
    let (tx, rx) = std::sync::mpsc::channel();
    let handle = std::thread::spawn(move || task(tx));

    loop {
        match rx.recv_timeout(Duration::from_millis(200)) {
            Ok(status) => {
                pb.set_position(status.n_words);
                pb.set_message(format!("{:?}: {}", status.stage, status.n_events));
            }
            Err(RecvTimeoutError::Timeout) => (),
            // The task dropped its sender, so it is done
            Err(RecvTimeoutError::Disconnected) => break,
        }
        on_tick();
    }

    match handle.join() {
        Ok(Ok(result)) => Some(result),
        Ok(Err(e)) => {
            log::error!("Processing failed with error: {e}");
            None
        }
        Err(_) => {
            log::error!("Failed to join processing task!");
            None
        }
    }
}

fn write_summary(config: &Config, summary: &RunSummary) {
    log::info!(
        "{} words, {} events ({} truncated), stopped by {:?}",
        summary.n_words,
        summary.n_events,
        summary.n_truncated_events,
        summary.stop_reason
    );
    for (kind, count) in summary.counters.errors.iter() {
        log::warn!("{kind}: {count}");
    }
    let path = match config.get_output_file_name("summary.yml") {
        Ok(path) => path,
        Err(e) => {
            log::error!("Could not write run summary: {e}");
            return;
        }
    };
    match summary.write_yaml(&path) {
        Ok(()) => log::info!("Run summary written to {}", path.to_string_lossy()),
        Err(e) => log::error!("Could not write run summary: {e}"),
    }
}

/// Replay the raw data file through the full readout pipeline
fn acquire(config: Config, pb: &ProgressBar) {
    let raw_path = match config.get_raw_data_path() {
        Ok(path) => path,
        Err(e) => {
            log::error!("{e}");
            return;
        }
    };
    let transport = match FileTransport::open(raw_path, config.readout.fifo_base_address) {
        Ok(t) => t.with_max_transfer(REPLAY_MAX_TRANSFER_BYTES),
        Err(e) => {
            log::error!("{e}");
            return;
        }
    };
    pb.set_length((transport.total_bytes() / WORD_SIZE) as u64);
    let device = Arc::new(Mutex::new(HardwareFifoSource::new(
        transport,
        config.readout.fifo_base_address,
        config.readout.word_filter,
    )));
    let stop = Arc::new(AtomicBool::new(false));

    let task_device = device.clone();
    let task_stop = stop.clone();
    let task_config = config.clone();
    let result = run_with_progress(
        pb,
        move |tx| {
            let mut tally = FlagTally::default();
            let summary = run_acquisition(task_device, &task_config, &task_stop, &tx, |event| {
                tally.add(&event)
            })?;
            Ok((summary, tally))
        },
        || {
            // Once the file is drained, whatever is queued is all there is
            let drained = match device.lock() {
                Ok(mut source) => source.transport_mut().is_drained(),
                Err(_) => true,
            };
            if drained {
                stop.store(true, Ordering::Release);
            }
        },
    );

    if let Some((summary, tally)) = result {
        tally.report();
        write_summary(&config, &summary);
    }
}

/// Decode the raw data file directly
fn decode(config: Config, pb: &ProgressBar) {
    if let Ok(metadata) = std::fs::metadata(&config.raw_data_path) {
        pb.set_length(metadata.len() / WORD_SIZE as u64);
    }
    let task_config = config.clone();
    let result = run_with_progress(
        pb,
        move |tx| {
            let mut tally = FlagTally::default();
            let summary = decode_raw_file(&task_config, &tx, |event| tally.add(&event))?;
            Ok((summary, tally))
        },
        || (),
    );

    if let Some((summary, tally)) = result {
        tally.report();
        write_summary(&config, &summary);
    }
}

fn telescope(config: Config, pb: &ProgressBar) {
    if let Ok(metadata) = std::fs::metadata(&config.raw_data_path) {
        pb.set_length(metadata.len() / WORD_SIZE as u64);
    }
    let result = run_with_progress(pb, move |tx| decode_telescope_file(&config, &tx), || ());

    if let Some(summary) = result {
        log::info!(
            "Decoded {} telescope hits from {} words into {}",
            summary.n_hits,
            summary.n_words,
            summary.hit_file.to_string_lossy()
        );
        let counters = summary.counters;
        if counters.total() > 0 {
            log::warn!(
                "Frame errors: header {}, length {}, trailer {}, frame end {}, overflow {}, unknown {}",
                counters.header_errors,
                counters.length_errors,
                counters.trailer_errors,
                counters.frame_end_errors,
                counters.overflows,
                counters.unknown_words
            );
        }
    }
}

fn main() {
    // Create a cli
    let matches = Command::new("fei4_readout_cli")
        .arg_required_else_help(true)
        .subcommand(Command::new("new").about("Make a template configuration yaml file"))
        .subcommand(
            Command::new("acquire")
                .about("Replay the raw data file through the readout worker and decode it"),
        )
        .subcommand(Command::new("decode").about("Decode an FE-I4 raw data file"))
        .subcommand(
            Command::new("telescope").about("Decode a Mimosa26 raw data file into a hit file"),
        )
        .arg(
            Arg::new("path")
                .short('p')
                .long("path")
                .help("Path to the configuration file"),
        )
        .get_matches();

    // Initialize feedback
    let logger = simplelog::TermLogger::new(
        simplelog::LevelFilter::Info,
        simplelog::Config::default(),
        simplelog::TerminalMode::Mixed,
        simplelog::ColorChoice::Auto,
    );

    let pb_manager = MultiProgress::new();

    LogWrapper::new(pb_manager.clone(), logger)
        .try_init()
        .expect("Could not create logging/progress!");

    if let Err(e) = init_file_logger() {
        log::warn!("Could not create log file, library messages will be lost: {e}");
    }

    // Parse the cli
    let Some(config_path) = matches.get_one::<String>("path").map(PathBuf::from) else {
        log::error!("A configuration path is required (-p/--path)");
        return;
    };

    if let Some(("new", _)) = matches.subcommand() {
        log::info!(
            "Making a template config at {}...",
            config_path.to_string_lossy()
        );
        match make_template_config(&config_path) {
            Ok(()) => log::info!("Done."),
            Err(e) => log::error!("{e}"),
        }
        return;
    }

    // Load our config
    log::info!("Loading config from {}...", config_path.to_string_lossy());
    let config = match Config::read_config_file(&config_path) {
        Ok(c) => c,
        Err(e) => {
            log::error!("{e}");
            return;
        }
    };
    log::info!("Config successfully loaded.");
    log::info!("Raw Data Path: {}", config.raw_data_path.to_string_lossy());
    log::info!("Output Path: {}", config.output_path.to_string_lossy());
    log::info!(
        "Chip Flavor: {:?} Alignment: {:?}",
        config.decoder.chip_flavor,
        config.decoder.alignment
    );
    log::info!(
        "BCIDs per Event: {} Trigger Multiplicity: {}",
        config.decoder.bcids_per_event,
        config.decoder.trigger_multiplicity
    );

    // Setup the progress bar
    let pb = pb_manager.add(ProgressBar::new(0));
    if let Ok(style) = ProgressStyle::with_template(
        "[{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} words {msg}",
    ) {
        pb.set_style(style);
    }

    match matches.subcommand() {
        Some(("acquire", _)) => acquire(config, &pb),
        Some(("decode", _)) => decode(config, &pb),
        Some(("telescope", _)) => telescope(config, &pb),
        _ => log::error!("No command given, see --help"),
    }

    pb.finish();

    log::info!("Done.");
}

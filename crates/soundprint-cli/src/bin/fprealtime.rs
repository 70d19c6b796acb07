//! fprealtime - Stream an audio file through a realtime query session
//!
//! Loads every fingerprint file in the database directory into an in-memory
//! index, then plays the input back in chunks and prints one JSON line per
//! session event.
//!
//! Usage: fprealtime <db_dir> <input_file>

use anyhow::Result;
use clap::Parser;
use soundprint_cli::output::{print_event, RealtimeEvent};
use soundprint_core::{
    error::StreamingError,
    fingerprint::{FingerprintGenerator, Hashes},
    matching::{InMemoryModelService, QueryResult, QueryService, ResultEntry},
    realtime::{ChunkedSamplesSource, PassAllRealtimeResultEntryFilter, RealtimeQuerySession},
    storage_config::SoundprintConfig,
};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(name = "fprealtime")]
#[command(about = "Match an audio file against a fingerprint directory as a live stream", long_about = None)]
struct Args {
    /// Database directory containing .json/.bson fingerprint files
    db_dir: PathBuf,

    /// Input audio file
    input_file: PathBuf,

    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Chunk length in seconds, overrides the configuration
    #[arg(long)]
    chunk_seconds: Option<f64>,

    /// Deliver chunks at playback speed instead of as fast as possible
    #[arg(long)]
    paced: bool,

    /// Also print entries that are still growing
    #[arg(long)]
    ongoing: bool,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Default: no logs (clean JSON output for parsing)
    // Verbose: show Info level logs for debugging
    if args.verbose {
        env_logger::Builder::from_default_env()
            .filter_level(log::LevelFilter::Info)
            .init();
    } else {
        env_logger::Builder::from_default_env()
            .filter_level(log::LevelFilter::Off)
            .init();
    }

    run_fprealtime(&args).await
}

async fn run_fprealtime(args: &Args) -> Result<()> {
    if !args.db_dir.is_dir() {
        anyhow::bail!("Database directory not found: {}", args.db_dir.display());
    }
    if !args.input_file.exists() {
        anyhow::bail!("Input file not found: {}", args.input_file.display());
    }

    let config = match &args.config {
        Some(path) => SoundprintConfig::load(path)?,
        None => SoundprintConfig::default(),
    };
    config.fingerprint.validate()?;

    log::info!("Loading database from: {}", args.db_dir.display());
    let load_start = std::time::Instant::now();
    let index = InMemoryModelService::from_directory(&args.db_dir, &config.fingerprint)?;
    log::info!(
        "Indexed {} tracks in {:.2}s",
        index.track_count(),
        load_start.elapsed().as_secs_f64()
    );

    let samples = soundprint_core::audio::decode_audio(&args.input_file, config.fingerprint.sample_rate)?;
    let chunk_seconds = args.chunk_seconds.unwrap_or(config.realtime.chunk_seconds);
    if !chunk_seconds.is_finite() || chunk_seconds <= 0.0 {
        anyhow::bail!("Chunk length must be positive, got {}", chunk_seconds);
    }
    let source = ChunkedSamplesSource::new(samples, chunk_seconds).paced(args.paced);

    let mut builder = config
        .realtime_builder()?
        .on_success(|result: QueryResult| print_event(&RealtimeEvent::Success { result: &result }))
        .on_did_not_pass_filter(|result: QueryResult| {
            print_event(&RealtimeEvent::DidNotPass { result: &result })
        })
        .on_error(|error: &StreamingError, hashes: Option<&Hashes>| {
            log::warn!("{}", error);
            print_event(&RealtimeEvent::Error {
                message: error.to_string(),
                window_starts_at: hashes.map(|h| h.relative_to),
            })
        })
        .on_restored(|| print_event(&RealtimeEvent::Restored));
    if args.ongoing {
        builder = builder
            .filter_ongoing_results(PassAllRealtimeResultEntryFilter)
            .on_ongoing_success(|entry: ResultEntry| print_event(&RealtimeEvent::Ongoing { entry: &entry }));
    }

    let generator = Arc::new(FingerprintGenerator::new(config.fingerprint.clone())?);
    let index: Arc<dyn QueryService> = Arc::new(index);
    let session = RealtimeQuerySession::new(builder.build()?, generator, index);

    let stop = session.stop_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::info!("Interrupted, stopping session");
            stop.cancel();
        }
    });

    let stats = session.run(source).await;
    print_event(&RealtimeEvent::Finished { stats: &stats });

    Ok(())
}

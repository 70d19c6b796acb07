//! fpgen - Fingerprint file generator
//!
//! Usage: fpgen <input_audio_path> <output_dir>

use anyhow::{Context, Result};
use clap::Parser;
use soundprint_cli::output::print_json;
use soundprint_core::{
    audio::{read_samples_from_source, AudioSamples, AudioSamplesProvider},
    config::FingerprintConfig,
    fingerprint::FingerprintGenerator,
    matching::TrackInfo,
    storage_config::SoundprintConfig,
    stride::IncrementalStaticStride,
};
use soundprint_fp::{FileFormat, FpJsonTrack};
use std::path::{Path, PathBuf};

#[derive(Parser, Debug)]
#[command(name = "fpgen")]
#[command(about = "Generate soundprint fingerprint files from audio files", long_about = None)]
struct Args {
    /// Input audio file path
    input_audio_path: PathBuf,

    /// Output directory for fingerprint files
    output_dir: PathBuf,

    /// Output format: json or bson
    #[arg(short, long, default_value = "json")]
    format: String,

    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Only fingerprint the first N seconds (0 = whole file)
    #[arg(short, long, default_value_t = 0)]
    seconds: u32,

    /// Reference track id; the file is written as a reference when set
    #[arg(long)]
    id: Option<String>,

    #[arg(long)]
    title: Option<String>,

    #[arg(long)]
    artist: Option<String>,

    /// Reference meta field as key=value, repeatable
    #[arg(long = "meta")]
    meta_fields: Vec<String>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> Result<()> {
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

    run_fpgen(&args)
}

fn run_fpgen(args: &Args) -> Result<()> {
    let input_path = args.input_audio_path.as_path();
    let output_dir = args.output_dir.as_path();

    if !input_path.exists() {
        anyhow::bail!("Input file not found: {}", input_path.display());
    }
    let format = parse_format(&args.format)?;

    std::fs::create_dir_all(output_dir)
        .with_context(|| format!("Failed to create output directory: {}", output_dir.display()))?;

    let config = match &args.config {
        Some(path) => SoundprintConfig::load(path)?.fingerprint,
        None => FingerprintConfig::default(),
    };
    config.validate()?;

    log::info!("Processing: {}", input_path.display());
    let start = std::time::Instant::now();

    let samples = load_samples(input_path, &config, args.seconds)?;
    log::info!(
        "Decoded audio: {:.1}s duration, {} samples @ {}Hz",
        samples.duration(),
        samples.len(),
        samples.sample_rate()
    );

    let generator = FingerprintGenerator::new(config.clone())?;
    let mut hashes = generator
        .generate(&samples, &IncrementalStaticStride::new(config.stride), 0)?
        .hashes;
    hashes.sort();

    let elapsed = start.elapsed();
    log::info!(
        "Generated {} fingerprints in {:.2}s",
        hashes.len(),
        elapsed.as_secs_f64()
    );

    let mut fp_file = hashes.to_fp_file(config.sample_rate);
    if let Some(track) = track_info(args, samples.duration())? {
        fp_file = fp_file.with_track(FpJsonTrack::from(&track));
    }

    let stem = input_path
        .file_stem()
        .and_then(|s| s.to_str())
        .with_context(|| format!("Input path has no file name: {}", input_path.display()))?;
    let output_path = output_dir.join(format!("{}.{}", stem, format.extension()));
    fp_file.save_as(&output_path, format)?;

    print_json(&serde_json::json!({
        "status": "success",
        "input_file": input_path.display().to_string(),
        "output_file": output_path.display().to_string(),
        "num_fingerprints": hashes.len(),
        "duration_s": hashes.duration_s,
        "processing_time_seconds": elapsed.as_secs_f64(),
    }));

    Ok(())
}

fn parse_format(format: &str) -> Result<FileFormat> {
    match format {
        "json" => Ok(FileFormat::Json),
        "bson" => Ok(FileFormat::Bson),
        other => anyhow::bail!("Unknown output format '{}', expected json or bson", other),
    }
}

/// Decode the input, keeping only the first `seconds` when non-zero
fn load_samples(path: &Path, config: &FingerprintConfig, seconds: u32) -> Result<AudioSamples> {
    let decoded = soundprint_core::audio::decode_audio(path, config.sample_rate)?;
    if seconds == 0 {
        return Ok(decoded);
    }

    let (origin, relative_to) = (decoded.origin().to_string(), decoded.relative_to());
    let mut provider = AudioSamplesProvider::new(decoded);
    let head = read_samples_from_source(&mut provider, seconds, config.sample_rate)?;
    Ok(AudioSamples::new(head, origin, config.sample_rate, relative_to)?)
}

fn track_info(args: &Args, duration_s: f64) -> Result<Option<TrackInfo>> {
    let Some(id) = &args.id else {
        if !args.meta_fields.is_empty() || args.title.is_some() || args.artist.is_some() {
            log::warn!("Track metadata ignored without --id");
        }
        return Ok(None);
    };

    let mut track = TrackInfo::new(
        id.clone(),
        args.title.clone().unwrap_or_else(|| id.clone()),
        args.artist.clone().unwrap_or_default(),
        duration_s,
    );
    for field in &args.meta_fields {
        let (key, value) = field
            .split_once('=')
            .with_context(|| format!("Meta field '{}' is not key=value", field))?;
        track = track.with_meta_field(key, value);
    }
    Ok(Some(track))
}

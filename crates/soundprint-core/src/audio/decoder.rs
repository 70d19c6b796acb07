//! File decoding into mono sample buffers
//!
//! WAV, MP3, FLAC and OGG Vorbis are decoded with pure Rust decoders, then
//! downmixed and resampled to the fingerprinting sample rate.

use super::resample::{downmix, resample_linear};
use super::AudioSamples;
use anyhow::{Context, Result};
use std::path::Path;

/// Supported audio formats
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioFormat {
    Wav,
    Mp3,
    Flac,
    Ogg,
    Unknown,
}

impl AudioFormat {
    /// Detect format from file extension
    pub fn from_path(path: &Path) -> Self {
        match path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .as_deref()
        {
            Some("wav") | Some("wave") => AudioFormat::Wav,
            Some("mp3") => AudioFormat::Mp3,
            Some("flac") => AudioFormat::Flac,
            Some("ogg") | Some("oga") => AudioFormat::Ogg,
            _ => AudioFormat::Unknown,
        }
    }
}

/// Interleaved decoder output
struct Decoded {
    interleaved: Vec<f32>,
    sample_rate: u32,
    channels: u16,
}

/// Decode `path` to mono samples at `target_sample_rate`
pub fn decode_audio(path: &Path, target_sample_rate: u32) -> Result<AudioSamples> {
    if !path.exists() {
        anyhow::bail!("Audio file not found: {}", path.display());
    }

    let decoded = match AudioFormat::from_path(path) {
        AudioFormat::Wav => decode_wav(path)?,
        AudioFormat::Mp3 => decode_mp3(path)?,
        AudioFormat::Flac => decode_flac(path)?,
        AudioFormat::Ogg => decode_ogg(path)?,
        AudioFormat::Unknown => anyhow::bail!("Unsupported audio format: {}", path.display()),
    };

    if decoded.sample_rate == 0 {
        anyhow::bail!("No audio frames decoded from {}", path.display());
    }

    let mono = downmix(&decoded.interleaved, decoded.channels);
    let samples = resample_linear(&mono, decoded.sample_rate, target_sample_rate);

    log::info!(
        "Decoded {}: {} channel(s) @ {}Hz -> {} mono samples @ {}Hz",
        path.display(),
        decoded.channels,
        decoded.sample_rate,
        samples.len(),
        target_sample_rate
    );

    Ok(AudioSamples::new(
        samples,
        path.display().to_string(),
        target_sample_rate,
        0.0,
    )?)
}

fn decode_wav(path: &Path) -> Result<Decoded> {
    let mut reader = hound::WavReader::open(path)
        .with_context(|| format!("Failed to open WAV file: {}", path.display()))?;

    let spec = reader.spec();
    let interleaved: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Float => reader.samples::<f32>().collect::<Result<Vec<_>, _>>()?,
        hound::SampleFormat::Int => {
            let max_val = (1i64 << (spec.bits_per_sample - 1)) as f32;
            reader
                .samples::<i32>()
                .map(|s| s.map(|v| v as f32 / max_val))
                .collect::<Result<Vec<_>, _>>()?
        }
    };

    Ok(Decoded {
        interleaved,
        sample_rate: spec.sample_rate,
        channels: spec.channels,
    })
}

fn decode_mp3(path: &Path) -> Result<Decoded> {
    let data = std::fs::read(path)
        .with_context(|| format!("Failed to read MP3 file: {}", path.display()))?;

    let mut decoder = minimp3::Decoder::new(&data[..]);
    let mut decoded = Decoded {
        interleaved: Vec::new(),
        sample_rate: 0,
        channels: 0,
    };

    loop {
        match decoder.next_frame() {
            Ok(frame) => {
                if decoded.sample_rate == 0 {
                    decoded.sample_rate = frame.sample_rate as u32;
                    decoded.channels = frame.channels as u16;
                }
                decoded
                    .interleaved
                    .extend(frame.data.iter().map(|&s| s as f32 / 32768.0));
            }
            Err(minimp3::Error::Eof) => break,
            Err(e) => anyhow::bail!("MP3 decode error in {}: {}", path.display(), e),
        }
    }

    Ok(decoded)
}

fn decode_flac(path: &Path) -> Result<Decoded> {
    let mut reader = claxon::FlacReader::open(path)
        .with_context(|| format!("Failed to open FLAC file: {}", path.display()))?;

    let info = reader.streaminfo();
    let max_val = (1i64 << (info.bits_per_sample - 1)) as f32;
    let interleaved = reader
        .samples()
        .map(|s| s.map(|v| v as f32 / max_val))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(Decoded {
        interleaved,
        sample_rate: info.sample_rate,
        channels: info.channels as u16,
    })
}

fn decode_ogg(path: &Path) -> Result<Decoded> {
    let file = std::fs::File::open(path)
        .with_context(|| format!("Failed to open OGG file: {}", path.display()))?;

    let mut reader = lewton::inside_ogg::OggStreamReader::new(file)?;
    let mut decoded = Decoded {
        interleaved: Vec::new(),
        sample_rate: reader.ident_hdr.audio_sample_rate,
        channels: reader.ident_hdr.audio_channels as u16,
    };

    while let Some(packet) = reader.read_dec_packet_itl()? {
        decoded
            .interleaved
            .extend(packet.iter().map(|&s| s as f32 / 32768.0));
    }

    Ok(decoded)
}

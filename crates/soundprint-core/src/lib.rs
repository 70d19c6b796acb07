//! Soundprint Core - content-based audio identification
//!
//! Audio is cut into overlapping spectrogram images, each image is reduced to
//! its strongest Haar wavelets and min-hashed into banded integer keys. Query
//! hashes are matched against an index of reference tracks, either in one go
//! or continuously through a realtime session.

pub mod audio;
pub mod config;
pub mod error;
pub mod fingerprint;
pub mod matching;
pub mod minhash;
pub mod realtime;
pub mod storage_config;
pub mod stride;
pub mod transform;
pub mod wavelet;

pub use audio::{AudioSamples, AudioTrack, RealtimeAudioSamplesAggregator};
pub use config::FingerprintConfig;
pub use error::{AudioError, StreamingError};
pub use fingerprint::{FingerprintGenerator, HashedFingerprint, Hashes};
pub use matching::{InMemoryModelService, QueryConfiguration, QueryResult, QueryService, ResultEntry, TrackInfo};
pub use realtime::{RealtimeQueryConfiguration, RealtimeQuerySession, StopHandle};
pub use storage_config::SoundprintConfig;
pub use stride::{IncrementalRandomStride, IncrementalStaticStride, Stride};

use std::path::Path;

/// Generate hashes from an audio file
pub fn generate_fingerprints(audio_path: &Path, config: &FingerprintConfig) -> anyhow::Result<Hashes> {
    // Decode to mono at the configured rate
    let samples = audio::decode_audio(audio_path, config.sample_rate)?;

    // Hash every image the buffer holds
    let generator = FingerprintGenerator::new(config.clone())?;
    let mut generated = generator.generate(&samples, &IncrementalStaticStride::new(config.stride), 0)?;
    generated.hashes.sort();

    Ok(generated.hashes)
}

//! Fingerprint generation and hashing
//!
//! A window of samples is cut into spectrogram images, one per stride step.
//! Images are wavelet-decomposed and min-hashed in parallel, so the order of
//! the resulting fingerprints is unspecified; callers sort by sequence number.

use crate::audio::AudioSamples;
use crate::config::FingerprintConfig;
use crate::error::AudioError;
use crate::minhash::MinHashService;
use crate::stride::Stride;
use crate::transform::SpectrogramService;
use crate::wavelet::{decompose_images, WaveletDecomposition};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use soundprint_fp::{FpJsonFile, FpJsonFingerprint};

/// Default tolerance when comparing fingerprint start offsets
pub const STARTS_AT_EPSILON: f32 = 1e-4;

/// One hashed image
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HashedFingerprint {
    /// Position in the session's fingerprint sequence
    pub sequence_number: u32,
    /// Start in seconds, relative to the stream origin
    pub starts_at: f32,
    /// One code per hash band
    pub hash_bins: Vec<i32>,
}

/// Fingerprints of one audio span. Entry order is not guaranteed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Hashes {
    pub fingerprints: Vec<HashedFingerprint>,
    pub duration_s: f64,
    pub origin: String,
    /// Stream-relative start of the span
    pub relative_to: f64,
}

impl Hashes {
    pub fn new(
        fingerprints: Vec<HashedFingerprint>,
        duration_s: f64,
        origin: impl Into<String>,
        relative_to: f64,
    ) -> Self {
        Self {
            fingerprints,
            duration_s,
            origin: origin.into(),
            relative_to,
        }
    }

    pub fn len(&self) -> usize {
        self.fingerprints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fingerprints.is_empty()
    }

    /// Stream-relative end of the span
    pub fn ends_at(&self) -> f64 {
        self.relative_to + self.duration_s
    }

    pub fn sort(&mut self) {
        self.fingerprints.sort_by_key(|fp| fp.sequence_number);
    }

    /// Equality after sorting both sides by sequence number; durations and
    /// start offsets may differ by `epsilon` seconds
    pub fn same_as(&self, other: &Hashes, epsilon: f32) -> bool {
        if self.fingerprints.len() != other.fingerprints.len()
            || (self.duration_s - other.duration_s).abs() > epsilon as f64
        {
            return false;
        }

        let mut left: Vec<&HashedFingerprint> = self.fingerprints.iter().collect();
        let mut right: Vec<&HashedFingerprint> = other.fingerprints.iter().collect();
        left.sort_by_key(|fp| fp.sequence_number);
        right.sort_by_key(|fp| fp.sequence_number);

        left.iter().zip(&right).all(|(a, b)| {
            a.sequence_number == b.sequence_number
                && (a.starts_at - b.starts_at).abs() <= epsilon
                && a.hash_bins == b.hash_bins
        })
    }

    /// Convert into the on-disk representation
    pub fn to_fp_file(&self, sample_rate: u32) -> FpJsonFile {
        let mut file = FpJsonFile::new(self.origin.clone(), sample_rate, self.duration_s, self.relative_to);
        for fp in &self.fingerprints {
            file.add_fingerprint(FpJsonFingerprint {
                sequence_number: fp.sequence_number,
                starts_at: fp.starts_at,
                hash_bins: fp.hash_bins.clone(),
            });
        }
        file
    }

    pub fn from_fp_file(file: &FpJsonFile) -> Self {
        let fingerprints = file
            .fingerprints
            .iter()
            .map(|fp| HashedFingerprint {
                sequence_number: fp.sequence_number,
                starts_at: fp.starts_at,
                hash_bins: fp.hash_bins.clone(),
            })
            .collect();
        Self::new(
            fingerprints,
            file.metadata.duration_s,
            file.metadata.origin.clone(),
            file.metadata.relative_to,
        )
    }
}

/// Hashes of one window plus the sequence number the next window starts from
#[derive(Debug, Clone)]
pub struct GeneratedHashes {
    pub hashes: Hashes,
    pub next_sequence: u32,
}

/// Fingerprint generator
pub struct FingerprintGenerator {
    config: FingerprintConfig,
    spectrogram: SpectrogramService,
    decomposition: Box<dyn WaveletDecomposition>,
    minhash: MinHashService,
}

impl FingerprintGenerator {
    pub fn new(config: FingerprintConfig) -> Result<Self, AudioError> {
        config.validate()?;
        Ok(Self {
            spectrogram: SpectrogramService::new(&config),
            decomposition: config.wavelet.decomposition(),
            minhash: MinHashService::new(&config),
            config,
        })
    }

    pub fn config(&self) -> &FingerprintConfig {
        &self.config
    }

    /// Hash every image that fits in `samples`
    ///
    /// Sequence numbers start at `first_sequence` and advance once per image,
    /// silent images included.
    pub fn generate(
        &self,
        samples: &AudioSamples,
        stride: &dyn Stride,
        first_sequence: u32,
    ) -> Result<GeneratedHashes, AudioError> {
        if samples.sample_rate() != self.config.sample_rate {
            return Err(AudioError::SampleRateMismatch {
                expected: self.config.sample_rate,
                actual: samples.sample_rate(),
            });
        }

        let offsets = self.spectrogram.image_offsets(samples.len(), stride);
        let mut images: Vec<Vec<Vec<f32>>> = self
            .spectrogram
            .create_images(samples.samples(), &offsets)
            .into_iter()
            .map(|image| image.frames)
            .collect();
        decompose_images(&mut images, self.decomposition.as_ref());

        let sample_rate = samples.sample_rate() as f64;
        let fingerprints: Vec<HashedFingerprint> = images
            .par_iter()
            .zip(offsets.par_iter())
            .enumerate()
            .filter_map(|(index, (image, &offset))| {
                let hash_bins = self.minhash.hash_image(image, self.config.top_wavelets)?;
                Some(HashedFingerprint {
                    sequence_number: first_sequence + index as u32,
                    starts_at: (samples.relative_to() + offset as f64 / sample_rate) as f32,
                    hash_bins,
                })
            })
            .collect();

        log::debug!(
            "Hashed {} of {} images from {:.3}s window at {:.3}s",
            fingerprints.len(),
            offsets.len(),
            samples.duration(),
            samples.relative_to()
        );

        Ok(GeneratedHashes {
            hashes: Hashes::new(
                fingerprints,
                samples.duration(),
                samples.origin(),
                samples.relative_to(),
            ),
            next_sequence: first_sequence + offsets.len() as u32,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::RealtimeAudioSamplesAggregator;
    use crate::stride::IncrementalStaticStride;
    use std::sync::Arc;

    fn small_config() -> FingerprintConfig {
        FingerprintConfig {
            fft_size: 256,
            frame_hop: 32,
            image_length: 32,
            log_bins: 16,
            top_wavelets: 50,
            permutation_length: 64,
            stride: 128,
            ..Default::default()
        }
    }

    fn signal(len: usize) -> Vec<f32> {
        let mut state = 0x2545_f491u32;
        (0..len)
            .map(|i| {
                state = state.wrapping_mul(1_664_525).wrapping_add(1_013_904_223);
                let noise = (state >> 8) as f32 / (1u32 << 24) as f32 - 0.5;
                let t = i as f32 / 5512.0;
                0.4 * (2.0 * std::f32::consts::PI * 440.0 * t).sin()
                    + 0.3 * (2.0 * std::f32::consts::PI * (700.0 + 300.0 * t) * t).sin()
                    + 0.2 * noise
            })
            .collect()
    }

    #[test]
    fn test_generate_assigns_sequence_and_offsets() {
        let config = small_config();
        let generator = FingerprintGenerator::new(config.clone()).unwrap();
        let stride = IncrementalStaticStride::new(config.stride);
        let samples = AudioSamples::new(signal(5512), "test", 5512, 2.0).unwrap();

        let generated = generator.generate(&samples, &stride, 10).unwrap();
        let expected = (5512 - config.samples_per_fingerprint()) / config.stride + 1;
        assert_eq!(generated.next_sequence, 10 + expected as u32);

        let mut hashes = generated.hashes;
        hashes.sort();
        assert_eq!(hashes.len(), expected);
        assert_eq!(hashes.fingerprints[0].sequence_number, 10);
        assert!((hashes.fingerprints[0].starts_at - 2.0).abs() < 1e-6);
        let step = config.stride as f32 / 5512.0;
        assert!((hashes.fingerprints[1].starts_at - 2.0 - step).abs() < 1e-5);
        assert!(hashes.fingerprints.iter().all(|fp| fp.hash_bins.len() == config.hash_tables));
    }

    #[test]
    fn test_silence_skipped_but_sequence_consumed() {
        let config = small_config();
        let generator = FingerprintGenerator::new(config.clone()).unwrap();
        let stride = IncrementalStaticStride::new(config.stride);
        let samples = AudioSamples::new(vec![0.0; 3000], "silence", 5512, 0.0).unwrap();

        let generated = generator.generate(&samples, &stride, 0).unwrap();
        assert!(generated.hashes.is_empty());
        assert!(generated.next_sequence > 0);
    }

    #[test]
    fn test_rejects_foreign_sample_rate() {
        let generator = FingerprintGenerator::new(small_config()).unwrap();
        let samples = AudioSamples::new(vec![0.0; 3000], "x", 44100, 0.0).unwrap();
        let stride = IncrementalStaticStride::new(128);
        assert!(matches!(
            generator.generate(&samples, &stride, 0),
            Err(AudioError::SampleRateMismatch { .. })
        ));
    }

    #[test]
    fn test_hashes_independent_of_chunking() {
        let config = small_config();
        let generator = FingerprintGenerator::new(config.clone()).unwrap();
        let stride: Arc<dyn Stride> = Arc::new(IncrementalStaticStride::new(config.stride));
        let stream = signal(5512 * 3);

        let whole = AudioSamples::new(stream.clone(), "stream", 5512, 0.0).unwrap();
        let reference = generator.generate(&whole, stride.as_ref(), 0).unwrap().hashes;
        assert!(!reference.is_empty());

        for chunk_size in [300usize, 1000, 1777, 4096] {
            let mut aggregator =
                RealtimeAudioSamplesAggregator::new(config.samples_per_fingerprint(), stride.clone());
            let mut fingerprints = Vec::new();
            let mut sequence = 0;
            for (i, chunk) in stream.chunks(chunk_size).enumerate() {
                let relative_to = (i * chunk_size) as f64 / 5512.0;
                let chunk = AudioSamples::new(chunk.to_vec(), "stream", 5512, relative_to).unwrap();
                if let Some(window) = aggregator.aggregate(&chunk).unwrap() {
                    let generated = generator.generate(&window, stride.as_ref(), sequence).unwrap();
                    sequence = generated.next_sequence;
                    fingerprints.extend(generated.hashes.fingerprints);
                }
            }

            let chunked = Hashes::new(fingerprints, whole.duration(), "stream", 0.0);
            assert!(
                chunked.same_as(&reference, STARTS_AT_EPSILON),
                "chunk size {} diverged",
                chunk_size
            );
        }
    }

    #[test]
    fn test_same_as_ignores_order() {
        let fp = |sequence_number, starts_at| HashedFingerprint {
            sequence_number,
            starts_at,
            hash_bins: vec![sequence_number as i32; 25],
        };
        let a = Hashes::new(vec![fp(0, 0.0), fp(1, 0.1)], 1.0, "a", 0.0);
        let b = Hashes::new(vec![fp(1, 0.10005), fp(0, 0.0)], 1.0, "a", 0.0);
        let c = Hashes::new(vec![fp(1, 0.2), fp(0, 0.0)], 1.0, "a", 0.0);
        assert!(a.same_as(&b, STARTS_AT_EPSILON));
        assert!(!a.same_as(&c, STARTS_AT_EPSILON));

        let longer = Hashes::new(vec![fp(0, 0.0), fp(1, 0.1)], 1.5, "a", 0.0);
        assert!(!a.same_as(&longer, STARTS_AT_EPSILON));
    }

    #[test]
    fn test_fp_file_conversion_keeps_fingerprints() {
        let hashes = Hashes::new(
            vec![HashedFingerprint {
                sequence_number: 3,
                starts_at: 1.5,
                hash_bins: vec![7; 25],
            }],
            12.0,
            "song.wav",
            0.5,
        );
        let file = hashes.to_fp_file(5512);
        assert_eq!(file.metadata.sample_rate, 5512);
        assert_eq!(Hashes::from_fp_file(&file), hashes);
    }
}

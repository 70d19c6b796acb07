//! Fingerprinting parameters
//!
//! Defaults describe 5512 Hz mono audio cut into 128-frame log spectrogram
//! images, hashed into 25 bands of 4 min-hash keys.

use crate::error::AudioError;
use crate::wavelet::WaveletKind;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FingerprintConfig {
    // Audio processing
    pub sample_rate: u32,

    // Spectrogram images
    pub fft_size: usize,
    pub frame_hop: usize,
    pub image_length: usize,
    pub log_bins: usize,
    pub min_freq: f32,
    pub max_freq: f32,

    // Hashing
    pub wavelet: WaveletKind,
    pub top_wavelets: usize,
    pub hash_tables: usize,
    pub keys_per_table: usize,
    pub permutation_length: usize,
    pub permutation_seed: u64,

    /// Samples between the starts of consecutive fingerprints
    pub stride: usize,
}

impl Default for FingerprintConfig {
    fn default() -> Self {
        Self {
            sample_rate: 5512,

            fft_size: 2048,
            frame_hop: 64,
            image_length: 128,
            log_bins: 32,
            min_freq: 318.0,
            max_freq: 2000.0,

            wavelet: WaveletKind::StandardHaar,
            top_wavelets: 200,
            hash_tables: 25,
            keys_per_table: 4,
            permutation_length: 255,
            permutation_seed: 0x5eed_f00d,

            stride: 512,
        }
    }
}

impl FingerprintConfig {
    /// Number of samples one fingerprint image spans
    pub fn samples_per_fingerprint(&self) -> usize {
        self.image_length * self.frame_hop + self.fft_size
    }

    /// Duration of one fingerprint in seconds
    pub fn fingerprint_length_s(&self) -> f64 {
        self.samples_per_fingerprint() as f64 / self.sample_rate as f64
    }

    /// Total number of min-hash permutations
    pub fn permutation_count(&self) -> usize {
        self.hash_tables * self.keys_per_table
    }

    /// Validate configuration parameters
    pub fn validate(&self) -> Result<(), AudioError> {
        let invalid = |msg: &str| Err(AudioError::InvalidConfiguration(msg.to_string()));

        if self.sample_rate == 0 {
            return Err(AudioError::InvalidSampleRate);
        }
        if !self.fft_size.is_power_of_two() {
            return invalid("fft_size must be a power of two");
        }
        if self.frame_hop == 0 || self.stride == 0 {
            return invalid("frame_hop and stride must be > 0");
        }
        if !self.log_bins.is_power_of_two() || !self.image_length.is_power_of_two() {
            return invalid("image_length and log_bins must be powers of two");
        }
        if self.min_freq <= 0.0 || self.min_freq >= self.max_freq {
            return invalid("min_freq must be > 0 and < max_freq");
        }
        if self.max_freq > self.sample_rate as f32 / 2.0 {
            return invalid("max_freq must not exceed the Nyquist frequency");
        }
        if self.top_wavelets == 0 || self.top_wavelets > self.image_length * self.log_bins {
            return invalid("top_wavelets must be within the image size");
        }
        if self.hash_tables == 0 || !(1..=4).contains(&self.keys_per_table) {
            return invalid("hash_tables must be > 0 and keys_per_table within [1, 4]");
        }
        if self.permutation_length == 0
            || self.permutation_length > u8::MAX as usize
            || self.permutation_length > 2 * self.image_length * self.log_bins
        {
            return invalid("permutation_length must be within [1, 255] and the fingerprint size");
        }
        Ok(())
    }
}

//! Log-frequency spectrogram images
//!
//! Each fingerprint is computed from one image: `image_length` consecutive FFT
//! frames, `frame_hop` samples apart, with magnitudes folded into `log_bins`
//! logarithmically spaced bands.

use crate::config::FingerprintConfig;
use crate::stride::Stride;
use rayon::prelude::*;
use rustfft::{num_complex::Complex, Fft, FftPlanner};
use std::collections::{BTreeSet, HashMap};
use std::f32::consts::PI;
use std::sync::Arc;

/// One image: `frames[time][band]`, starting `offset` samples into the window
#[derive(Debug, Clone)]
pub struct SpectrogramImage {
    pub frames: Vec<Vec<f32>>,
    pub offset: usize,
}

pub struct SpectrogramService {
    fft: Arc<dyn Fft<f32>>,
    window: Vec<f32>,
    band_edges: Vec<usize>,
    fft_size: usize,
    frame_hop: usize,
    image_length: usize,
}

impl SpectrogramService {
    pub fn new(config: &FingerprintConfig) -> Self {
        let mut planner = FftPlanner::new();
        Self {
            fft: planner.plan_fft_forward(config.fft_size),
            window: create_hann_window(config.fft_size),
            band_edges: log_band_edges(config),
            fft_size: config.fft_size,
            frame_hop: config.frame_hop,
            image_length: config.image_length,
        }
    }

    /// Samples one image spans
    pub fn samples_per_image(&self) -> usize {
        self.image_length * self.frame_hop + self.fft_size
    }

    /// Start offsets of all images that fit in `window_len` samples
    pub fn image_offsets(&self, window_len: usize, stride: &dyn Stride) -> Vec<usize> {
        let mut offsets = Vec::new();
        let mut offset = 0;
        while offset + self.samples_per_image() <= window_len {
            offsets.push(offset);
            offset += stride.next_stride().max(1);
        }
        offsets
    }

    /// Build one image per offset; frames shared between images are computed once
    pub fn create_images(&self, samples: &[f32], offsets: &[usize]) -> Vec<SpectrogramImage> {
        let positions: BTreeSet<usize> = offsets
            .iter()
            .flat_map(|&offset| (0..self.image_length).map(move |j| offset + j * self.frame_hop))
            .collect();

        let frames: HashMap<usize, Vec<f32>> = positions
            .into_par_iter()
            .map(|position| (position, self.frame_at(samples, position)))
            .collect();

        offsets
            .iter()
            .map(|&offset| SpectrogramImage {
                frames: (0..self.image_length)
                    .map(|j| frames[&(offset + j * self.frame_hop)].clone())
                    .collect(),
                offset,
            })
            .collect()
    }

    /// Band magnitudes of the frame starting at `position`
    fn frame_at(&self, samples: &[f32], position: usize) -> Vec<f32> {
        let end = (position + self.fft_size).min(samples.len());
        let mut buffer: Vec<Complex<f32>> = samples[position.min(end)..end]
            .iter()
            .zip(&self.window)
            .map(|(&s, &w)| Complex::new(s * w, 0.0))
            .collect();
        buffer.resize(self.fft_size, Complex::new(0.0, 0.0));

        self.fft.process(&mut buffer);

        self.band_edges
            .windows(2)
            .map(|edge| {
                let (lo, hi) = (edge[0], edge[1].max(edge[0] + 1));
                let sum: f32 = buffer[lo..hi].iter().map(|c| c.norm()).sum();
                sum / (hi - lo) as f32
            })
            .collect()
    }
}

/// Create Hann window
fn create_hann_window(size: usize) -> Vec<f32> {
    (0..size)
        .map(|i| {
            let x = i as f32 / (size - 1) as f32;
            0.5 * (1.0 - (2.0 * PI * x).cos())
        })
        .collect()
}

/// FFT bin boundaries of `log_bins` bands between `min_freq` and `max_freq`
fn log_band_edges(config: &FingerprintConfig) -> Vec<usize> {
    let ratio = config.max_freq / config.min_freq;
    let max_bin = config.fft_size / 2;
    (0..=config.log_bins)
        .map(|k| {
            let freq = config.min_freq * ratio.powf(k as f32 / config.log_bins as f32);
            ((freq * config.fft_size as f32 / config.sample_rate as f32).round() as usize).min(max_bin)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stride::IncrementalStaticStride;

    #[test]
    fn test_hann_window() {
        let window = create_hann_window(512);
        assert_eq!(window.len(), 512);
        assert!((window[0] - 0.0).abs() < 0.001);
        assert!((window[256] - 1.0).abs() < 0.001);
    }

    #[test]
    fn test_band_edges_are_monotonic() {
        let config = FingerprintConfig::default();
        let edges = log_band_edges(&config);
        assert_eq!(edges.len(), config.log_bins + 1);
        assert!(edges.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(edges[0], 118);
        assert_eq!(*edges.last().unwrap(), 743);
    }

    #[test]
    fn test_image_offsets_follow_stride() {
        let config = FingerprintConfig::default();
        let service = SpectrogramService::new(&config);
        let stride = IncrementalStaticStride::new(512);

        assert!(service.image_offsets(10239, &stride).is_empty());
        assert_eq!(service.image_offsets(10240, &stride), vec![0]);
        assert_eq!(service.image_offsets(10240 + 1100, &stride), vec![0, 512, 1024]);
    }

    #[test]
    fn test_image_offsets_advance_on_zero_stride() {
        struct ZeroStride;
        impl Stride for ZeroStride {
            fn next_stride(&self) -> usize {
                0
            }
        }

        let config = FingerprintConfig::default();
        let service = SpectrogramService::new(&config);
        assert_eq!(service.image_offsets(10242, &ZeroStride), vec![0, 1, 2]);
    }

    #[test]
    fn test_tone_energy_lands_in_matching_band() {
        let config = FingerprintConfig::default();
        let service = SpectrogramService::new(&config);
        let samples: Vec<f32> = (0..config.samples_per_fingerprint())
            .map(|i| (2.0 * PI * 1000.0 * i as f32 / config.sample_rate as f32).sin())
            .collect();

        let images = service.create_images(&samples, &[0]);
        assert_eq!(images.len(), 1);
        let frame = &images[0].frames[10];
        assert_eq!(frame.len(), config.log_bins);

        let loudest = frame
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.partial_cmp(b.1).unwrap())
            .map(|(i, _)| i)
            .unwrap();
        let edges = log_band_edges(&config);
        let tone_bin = (1000.0 * config.fft_size as f32 / config.sample_rate as f32).round() as usize;
        assert!(edges[loudest] <= tone_bin && tone_bin <= edges[loudest + 1]);
    }
}

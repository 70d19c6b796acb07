//! Realtime windowing of a continuous sample stream
//!
//! Chunks arrive in whatever sizes the source produces. The aggregator keeps
//! the samples that still belong to a future fingerprint and prepends them to
//! the next chunk, so fingerprint boundaries never depend on chunking.

use super::AudioSamples;
use crate::error::AudioError;
use crate::stride::Stride;
use std::sync::Arc;

pub struct RealtimeAudioSamplesAggregator {
    min_samples_per_fingerprint: usize,
    stride: Arc<dyn Stride>,
    tail: Vec<f32>,
    tail_sample_rate: Option<u32>,
}

impl RealtimeAudioSamplesAggregator {
    pub fn new(min_samples_per_fingerprint: usize, stride: Arc<dyn Stride>) -> Self {
        Self {
            min_samples_per_fingerprint,
            stride,
            tail: Vec::new(),
            tail_sample_rate: None,
        }
    }

    /// Samples retained for the next delivery
    pub fn tail(&self) -> &[f32] {
        &self.tail
    }

    /// Attach `chunk` to the retained tail and emit a window once it is long
    /// enough to hold at least one fingerprint.
    pub fn aggregate(&mut self, chunk: &AudioSamples) -> Result<Option<AudioSamples>, AudioError> {
        if let Some(expected) = self.tail_sample_rate {
            if !self.tail.is_empty() && expected != chunk.sample_rate() {
                return Err(AudioError::SampleRateMismatch {
                    expected,
                    actual: chunk.sample_rate(),
                });
            }
        }

        let combined = self.attach(chunk);
        if combined.len() < self.min_samples_per_fingerprint {
            self.tail = combined.samples().to_vec();
            self.tail_sample_rate = Some(combined.sample_rate());
            return Ok(None);
        }

        self.cache_tail(&combined);
        Ok(Some(combined))
    }

    fn attach(&self, chunk: &AudioSamples) -> AudioSamples {
        let mut prefixed = Vec::with_capacity(self.tail.len() + chunk.len());
        prefixed.extend_from_slice(&self.tail);
        prefixed.extend_from_slice(chunk.samples());

        let shift = self.tail.len() as f64 / chunk.sample_rate() as f64;
        chunk.derive(prefixed, chunk.relative_to() - shift)
    }

    fn cache_tail(&mut self, combined: &AudioSamples) {
        let next_stride = self.stride.next_stride().max(1);
        if next_stride < self.min_samples_per_fingerprint {
            // Fingerprints start every `next_stride` samples; the leftover that
            // does not divide evenly belongs to the next window.
            let ignored = (combined.len() - self.min_samples_per_fingerprint) % next_stride;
            let tail_size = self.min_samples_per_fingerprint - next_stride + ignored;
            self.tail = combined.samples()[combined.len() - tail_size..].to_vec();
        } else {
            self.tail.clear();
        }
        self.tail_sample_rate = Some(combined.sample_rate());
        log::trace!(
            "Emitting window of {} samples, retaining tail of {}",
            combined.len(),
            self.tail.len()
        );
    }
}

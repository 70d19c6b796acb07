//! Immutable mono sample buffers

use crate::error::AudioError;
use soundprint_fp::SamplesJson;
use std::sync::Arc;

/// Contiguous mono samples anchored in stream time
///
/// `relative_to` is the stream-relative instant (seconds) of the first
/// sample. It may be negative when the buffer starts with samples carried over
/// from a previous delivery.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioSamples {
    samples: Arc<[f32]>,
    origin: String,
    sample_rate: u32,
    relative_to: f64,
}

impl AudioSamples {
    pub fn new(
        samples: impl Into<Arc<[f32]>>,
        origin: impl Into<String>,
        sample_rate: u32,
        relative_to: f64,
    ) -> Result<Self, AudioError> {
        if sample_rate == 0 {
            return Err(AudioError::InvalidSampleRate);
        }
        Ok(Self {
            samples: samples.into(),
            origin: origin.into(),
            sample_rate,
            relative_to,
        })
    }

    /// New buffer sharing origin and sample rate with `self`
    pub(crate) fn derive(&self, samples: impl Into<Arc<[f32]>>, relative_to: f64) -> Self {
        Self {
            samples: samples.into(),
            origin: self.origin.clone(),
            sample_rate: self.sample_rate,
            relative_to,
        }
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    pub fn origin(&self) -> &str {
        &self.origin
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn relative_to(&self) -> f64 {
        self.relative_to
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Duration in seconds
    pub fn duration(&self) -> f64 {
        self.samples.len() as f64 / self.sample_rate as f64
    }
}

impl TryFrom<SamplesJson> for AudioSamples {
    type Error = AudioError;

    fn try_from(value: SamplesJson) -> Result<Self, Self::Error> {
        AudioSamples::new(value.samples, value.origin, value.sample_rate, value.relative_to)
    }
}

impl From<&AudioSamples> for SamplesJson {
    fn from(value: &AudioSamples) -> Self {
        SamplesJson {
            samples: value.samples.to_vec(),
            origin: value.origin.clone(),
            sample_rate: value.sample_rate,
            relative_to: value.relative_to,
        }
    }
}

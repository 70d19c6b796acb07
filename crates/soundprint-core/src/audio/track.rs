//! Time-addressed slicing and concatenation of sample buffers

use super::AudioSamples;
use crate::error::AudioError;

#[derive(Debug, Clone, PartialEq)]
pub struct AudioTrack {
    samples: AudioSamples,
}

impl AudioTrack {
    pub fn new(samples: AudioSamples) -> Self {
        Self { samples }
    }

    pub fn samples(&self) -> &AudioSamples {
        &self.samples
    }

    pub fn into_samples(self) -> AudioSamples {
        self.samples
    }

    /// Duration in seconds
    pub fn duration(&self) -> f64 {
        self.samples.duration()
    }

    /// Cut `length` seconds starting at `start`, both clamped to the track
    pub fn sub_track(&self, start: f64, length: f64) -> AudioTrack {
        let start = start.max(0.0);
        let length = length.min(self.duration() - start).max(0.0);

        let sample_rate = self.samples.sample_rate() as f64;
        let total = self.samples.len();
        let from = ((start * sample_rate) as usize).min(total);
        let count = ((length * sample_rate) as usize).min(total - from);

        let slice = &self.samples.samples()[from..from + count];
        AudioTrack::new(self.samples.derive(slice, self.samples.relative_to() + start))
    }

    /// First `length` seconds
    pub fn head(&self, length: f64) -> AudioTrack {
        self.sub_track(0.0, length)
    }

    /// Everything from `start` seconds on
    pub fn tail(&self, start: f64) -> AudioTrack {
        self.sub_track(start, self.duration() - start)
    }

    /// Join tracks in order; origin, sample rate and timestamp come from the first
    pub fn concat(tracks: &[AudioTrack]) -> Result<AudioTrack, AudioError> {
        let first = tracks.first().ok_or(AudioError::EmptyInput)?.samples();

        let mut samples = Vec::with_capacity(tracks.iter().map(|t| t.samples.len()).sum());
        for track in tracks {
            if track.samples.sample_rate() != first.sample_rate() {
                return Err(AudioError::SampleRateMismatch {
                    expected: first.sample_rate(),
                    actual: track.samples.sample_rate(),
                });
            }
            samples.extend_from_slice(track.samples.samples());
        }

        Ok(AudioTrack::new(first.derive(samples, first.relative_to())))
    }
}

//! Bulk reader assembling one contiguous buffer from a pull-based source

use super::AudioSamples;
use crate::error::AudioError;

/// Default chunk buffer length in seconds
pub const DEFAULT_BUFFER_LENGTH_S: u32 = 20;

const BYTES_PER_SAMPLE: usize = 4;

/// Pull capability over a sample source
pub trait SamplesProvider {
    /// Fill `buffer` from the front and return the number of bytes written.
    ///
    /// `0` marks the end of the source, a negative value is an error.
    fn get_next_samples(&mut self, buffer: &mut [f32]) -> isize;
}

/// Read `seconds_to_read` seconds (or everything when `0`) from `provider`
pub fn read_samples_from_source(
    provider: &mut dyn SamplesProvider,
    seconds_to_read: u32,
    sample_rate: u32,
) -> Result<Vec<f32>, AudioError> {
    if sample_rate == 0 {
        return Err(AudioError::InvalidSampleRate);
    }

    let mut buffer = vec![0.0f32; buffer_length(seconds_to_read, sample_rate)];
    let total_bytes_to_read = if seconds_to_read == 0 {
        usize::MAX
    } else {
        requested_bytes(seconds_to_read, sample_rate)
    };

    let mut samples = Vec::new();
    let mut total_bytes_read = 0usize;

    while total_bytes_read < total_bytes_to_read {
        let bytes_read = provider.get_next_samples(&mut buffer);
        if bytes_read < 0 {
            return Err(AudioError::SourceRead(bytes_read));
        }
        if bytes_read == 0 {
            break;
        }

        let bytes_read = (bytes_read as usize).min(buffer.len() * BYTES_PER_SAMPLE);
        let previously_read = total_bytes_read;
        total_bytes_read = total_bytes_read.saturating_add(bytes_read);

        let chunk_bytes = if total_bytes_read > total_bytes_to_read {
            total_bytes_to_read - previously_read
        } else {
            bytes_read
        };
        samples.extend_from_slice(&buffer[..chunk_bytes / BYTES_PER_SAMPLE]);
    }

    if seconds_to_read > 0 && total_bytes_read < requested_bytes(seconds_to_read, sample_rate) {
        return Err(AudioError::InsufficientDuration {
            requested: seconds_to_read,
            available: samples.len() as f64 / sample_rate as f64,
        });
    }

    log::debug!(
        "Read {} samples ({:.2}s) from source",
        samples.len(),
        samples.len() as f64 / sample_rate as f64
    );

    Ok(samples)
}

fn requested_bytes(seconds_to_read: u32, sample_rate: u32) -> usize {
    seconds_to_read as usize * sample_rate as usize * BYTES_PER_SAMPLE
}

fn buffer_length(seconds_to_read: u32, sample_rate: u32) -> usize {
    let seconds = if seconds_to_read > 0 && seconds_to_read < DEFAULT_BUFFER_LENGTH_S {
        seconds_to_read
    } else {
        DEFAULT_BUFFER_LENGTH_S
    };
    sample_rate as usize * seconds as usize
}

/// Provider handing out an in-memory buffer piece by piece
pub struct AudioSamplesProvider {
    samples: AudioSamples,
    position: usize,
}

impl AudioSamplesProvider {
    pub fn new(samples: AudioSamples) -> Self {
        Self { samples, position: 0 }
    }
}

impl SamplesProvider for AudioSamplesProvider {
    fn get_next_samples(&mut self, buffer: &mut [f32]) -> isize {
        let remaining = &self.samples.samples()[self.position..];
        let count = remaining.len().min(buffer.len());
        buffer[..count].copy_from_slice(&remaining[..count]);
        self.position += count;
        (count * BYTES_PER_SAMPLE) as isize
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Provider returning scripted chunk sizes, then end of stream
    struct ScriptedProvider {
        chunks: Vec<isize>,
        next_value: f32,
    }

    impl SamplesProvider for ScriptedProvider {
        fn get_next_samples(&mut self, buffer: &mut [f32]) -> isize {
            if self.chunks.is_empty() {
                return 0;
            }
            let bytes = self.chunks.remove(0);
            if bytes > 0 {
                for slot in buffer.iter_mut().take(bytes as usize / 4) {
                    *slot = self.next_value;
                    self.next_value += 1.0;
                }
            }
            bytes
        }
    }

    fn provider_of(len: usize) -> AudioSamplesProvider {
        let samples: Vec<f32> = (0..len).map(|i| i as f32).collect();
        AudioSamplesProvider::new(AudioSamples::new(samples, "test", 100, 0.0).unwrap())
    }

    #[test]
    fn test_reads_requested_duration_and_truncates() {
        // 3 seconds at 100Hz, source holds 5 seconds
        let mut provider = provider_of(500);
        let samples = read_samples_from_source(&mut provider, 3, 100).unwrap();
        assert_eq!(samples.len(), 300);
        assert_eq!(samples[299], 299.0);
    }

    #[test]
    fn test_read_until_exhaustion() {
        let mut provider = provider_of(4321);
        let samples = read_samples_from_source(&mut provider, 0, 100).unwrap();
        assert_eq!(samples.len(), 4321);
        assert!(samples.iter().enumerate().all(|(i, &s)| s == i as f32));
    }

    #[test]
    fn test_overshooting_final_chunk_is_truncated() {
        let mut provider = ScriptedProvider {
            chunks: vec![120 * 4, 120 * 4],
            next_value: 0.0,
        };
        let samples = read_samples_from_source(&mut provider, 2, 100).unwrap();
        assert_eq!(samples.len(), 200);
        assert_eq!(samples[199], 199.0);
    }

    #[test]
    fn test_insufficient_duration() {
        let mut provider = provider_of(150);
        let err = read_samples_from_source(&mut provider, 2, 100).unwrap_err();
        assert!(matches!(err, AudioError::InsufficientDuration { requested: 2, .. }));
    }

    #[test]
    fn test_negative_byte_count_fails() {
        let mut provider = ScriptedProvider {
            chunks: vec![40, -1],
            next_value: 0.0,
        };
        let err = read_samples_from_source(&mut provider, 0, 100).unwrap_err();
        assert!(matches!(err, AudioError::SourceRead(-1)));
    }

    #[test]
    fn test_buffer_length_is_capped() {
        assert_eq!(buffer_length(5, 100), 500);
        assert_eq!(buffer_length(0, 100), 2000);
        assert_eq!(buffer_length(60, 100), 2000);
    }
}

//! Audio buffers, windowing and decoding

mod decoder;
mod reader;
mod realtime;
mod resample;
mod samples;
mod track;

pub use decoder::{decode_audio, AudioFormat};
pub use reader::{read_samples_from_source, AudioSamplesProvider, SamplesProvider, DEFAULT_BUFFER_LENGTH_S};
pub use realtime::RealtimeAudioSamplesAggregator;
pub use resample::{downmix, resample_linear};
pub use samples::AudioSamples;
pub use track::AudioTrack;

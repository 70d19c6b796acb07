//! Error taxonomy
//!
//! `AudioError` covers construction and validation failures that propagate to
//! the immediate caller. `StreamingError` covers recoverable failures inside a
//! realtime session; those only surface through the session error callback.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AudioError {
    #[error("samples provider returned a negative byte count: {0}")]
    SourceRead(isize),

    #[error("could not read {requested}s of audio, source ended after {available:.3}s")]
    InsufficientDuration { requested: u32, available: f64 },

    #[error("cannot concatenate an empty set of tracks")]
    EmptyInput,

    #[error("sample rate must be > 0")]
    InvalidSampleRate,

    #[error("sample rate mismatch: expected {expected}Hz, got {actual}Hz")]
    SampleRateMismatch { expected: u32, actual: u32 },

    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),
}

#[derive(Debug, Error)]
pub enum StreamingError {
    #[error("audio source failure: {0:#}")]
    Source(anyhow::Error),

    #[error("fingerprinting failure: {0:#}")]
    Hashing(anyhow::Error),

    #[error("index query failure: {0:#}")]
    Index(anyhow::Error),

    #[error("offline storage failure: {0:#}")]
    OfflineStorage(anyhow::Error),
}

//! Soundprint fingerprint and sample file formats

pub mod format;
pub mod json_format;
pub mod samples;

pub use format::{FileFormat, FormatError};
pub use json_format::{FpJsonFile, FpJsonFingerprint, FpJsonMetadata, FpJsonTrack};
pub use samples::SamplesJson;

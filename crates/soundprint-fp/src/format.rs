//! On-disk encodings shared by fingerprint files

use serde::{Deserialize, Serialize};
use std::path::Path;

/// Current fingerprint file version
pub const VERSION: &str = "1.0";

/// Encoding of a fingerprint file
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum FileFormat {
    Json,
    Bson,
    /// Pick by file extension when loading, JSON when saving
    #[default]
    Auto,
}

impl FileFormat {
    /// Extension used when writing files of this format
    pub fn extension(&self) -> &'static str {
        match self {
            FileFormat::Bson => "bson",
            FileFormat::Json | FileFormat::Auto => "json",
        }
    }

    /// Detect format from a path extension
    pub fn from_path(path: &Path) -> Option<Self> {
        match path.extension().and_then(|e| e.to_str()) {
            Some("json") => Some(FileFormat::Json),
            Some("bson") => Some(FileFormat::Bson),
            _ => None,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum FormatError {
    #[error("unsupported fingerprint file extension: {0}")]
    UnsupportedExtension(String),
    #[error("fingerprint {sequence_number} has {actual} hash bins, expected {expected}")]
    HashArity {
        sequence_number: u32,
        expected: usize,
        actual: usize,
    },
}

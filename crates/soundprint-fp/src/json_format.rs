//! JSON/BSON fingerprint files
//!
//! One file holds the hashed fingerprints of one audio origin, optionally
//! tagged with the reference track they belong to.

use crate::format::{FileFormat, FormatError, VERSION};
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// Complete fingerprint file structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FpJsonFile {
    pub version: String,
    pub metadata: FpJsonMetadata,
    pub fingerprints: Vec<FpJsonFingerprint>,
}

/// Metadata about the fingerprinted audio
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FpJsonMetadata {
    pub origin: String,
    pub sample_rate: u32,
    pub duration_s: f64,
    /// Stream-relative start of the first fingerprinted sample
    #[serde(default)]
    pub relative_to: f64,
    pub created_at: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub track: Option<FpJsonTrack>,
}

/// Reference track description stored alongside its fingerprints
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FpJsonTrack {
    pub id: String,
    pub title: String,
    pub artist: String,
    pub duration_s: f64,
    #[serde(default)]
    pub meta_fields: BTreeMap<String, String>,
}

/// Individual hashed fingerprint
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FpJsonFingerprint {
    pub sequence_number: u32,
    pub starts_at: f32,
    pub hash_bins: Vec<i32>,
}

impl FpJsonFile {
    pub fn new(origin: String, sample_rate: u32, duration_s: f64, relative_to: f64) -> Self {
        Self {
            version: VERSION.to_string(),
            metadata: FpJsonMetadata {
                origin,
                sample_rate,
                duration_s,
                relative_to,
                created_at: chrono::Utc::now().to_rfc3339(),
                track: None,
            },
            fingerprints: Vec::new(),
        }
    }

    pub fn with_track(mut self, track: FpJsonTrack) -> Self {
        self.metadata.track = Some(track);
        self
    }

    pub fn add_fingerprint(&mut self, fingerprint: FpJsonFingerprint) {
        self.fingerprints.push(fingerprint);
    }

    /// Check that every fingerprint carries `arity` hash bins
    pub fn check_arity(&self, arity: usize) -> Result<(), FormatError> {
        for fp in &self.fingerprints {
            if fp.hash_bins.len() != arity {
                return Err(FormatError::HashArity {
                    sequence_number: fp.sequence_number,
                    expected: arity,
                    actual: fp.hash_bins.len(),
                });
            }
        }
        Ok(())
    }

    /// Save to JSON file
    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        let json_str = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json_str)
            .with_context(|| format!("Failed to write fingerprint file: {}", path.display()))?;
        Ok(())
    }

    /// Save to BSON file
    pub fn save_bson(&self, path: &Path) -> anyhow::Result<()> {
        let bytes = bson::to_vec(self)?;
        std::fs::write(path, bytes)
            .with_context(|| format!("Failed to write fingerprint file: {}", path.display()))?;
        Ok(())
    }

    /// Save using the given format
    pub fn save_as(&self, path: &Path, format: FileFormat) -> anyhow::Result<()> {
        match format {
            FileFormat::Bson => self.save_bson(path),
            FileFormat::Json | FileFormat::Auto => self.save(path),
        }
    }

    /// Load from JSON file
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let json_str = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read fingerprint file: {}", path.display()))?;
        let fp_file: FpJsonFile = serde_json::from_str(&json_str)?;
        Ok(fp_file)
    }

    /// Load from BSON file
    pub fn load_bson(path: &Path) -> anyhow::Result<Self> {
        let bytes = std::fs::read(path)
            .with_context(|| format!("Failed to read fingerprint file: {}", path.display()))?;
        let fp_file: FpJsonFile = bson::from_slice(&bytes)?;
        Ok(fp_file)
    }

    /// Load choosing the decoder from the file extension
    pub fn load_auto(path: &Path) -> anyhow::Result<Self> {
        match FileFormat::from_path(path) {
            Some(FileFormat::Bson) => Self::load_bson(path),
            Some(_) => Self::load(path),
            None => Err(FormatError::UnsupportedExtension(path.display().to_string()).into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_file() -> FpJsonFile {
        let mut file = FpJsonFile::new("chopin.wav".to_string(), 5512, 10.0, 0.0).with_track(
            FpJsonTrack {
                id: "chopin".to_string(),
                title: "Nocturne".to_string(),
                artist: "Chopin".to_string(),
                duration_s: 10.0,
                meta_fields: BTreeMap::from([("genre".to_string(), "classical".to_string())]),
            },
        );
        file.add_fingerprint(FpJsonFingerprint {
            sequence_number: 0,
            starts_at: 0.0,
            hash_bins: vec![1, -2, 3],
        });
        file.add_fingerprint(FpJsonFingerprint {
            sequence_number: 1,
            starts_at: 0.0929,
            hash_bins: vec![4, 5, i32::MIN],
        });
        file
    }

    #[test]
    fn test_json_and_bson_files_load_back() {
        let dir = std::env::temp_dir().join(format!("soundprint-fp-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let file = sample_file();

        let json_path = dir.join("chopin.json");
        let bson_path = dir.join("chopin.bson");
        file.save_as(&json_path, FileFormat::Auto).unwrap();
        file.save_as(&bson_path, FileFormat::Bson).unwrap();

        for path in [&json_path, &bson_path] {
            let loaded = FpJsonFile::load_auto(path).unwrap();
            assert_eq!(loaded.fingerprints, file.fingerprints);
            assert_eq!(loaded.metadata.track, file.metadata.track);
        }

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_check_arity() {
        let file = sample_file();
        assert!(file.check_arity(3).is_ok());
        assert!(matches!(
            file.check_arity(25),
            Err(FormatError::HashArity { sequence_number: 0, expected: 25, actual: 3 })
        ));
    }

    #[test]
    fn test_load_auto_rejects_unknown_extension() {
        assert!(FpJsonFile::load_auto(Path::new("track.fp")).is_err());
    }
}

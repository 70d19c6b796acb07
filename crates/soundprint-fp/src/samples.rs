//! Serialized audio samples used for fixtures and interchange

use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Plain record of an audio buffer; samples serialize as an ordered numeric array
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SamplesJson {
    pub samples: Vec<f32>,
    pub origin: String,
    pub sample_rate: u32,
    #[serde(default)]
    pub relative_to: f64,
}

impl SamplesJson {
    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        let json_str = serde_json::to_string(self)?;
        std::fs::write(path, json_str)
            .with_context(|| format!("Failed to write samples file: {}", path.display()))?;
        Ok(())
    }

    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let json_str = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read samples file: {}", path.display()))?;
        Ok(serde_json::from_str(&json_str)?)
    }
}

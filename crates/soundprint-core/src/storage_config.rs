//! TOML configuration for the soundprint tools
//!
//! One file carries the fingerprint parameters, the realtime session settings
//! and the offline storage used while the index is down.

use crate::config::FingerprintConfig;
use crate::realtime::{
    BackoffPolicy, FilesystemOfflineStorage, FixedDelayBackoffPolicy, InMemoryOfflineStorage,
    OfflineStorage, RandomExponentialBackoffPolicy, RealtimeQueryConfiguration,
    RealtimeQueryConfigurationBuilder, TrackCoverageFilter,
};
use crate::stride::{IncrementalRandomStride, IncrementalStaticStride};
use serde::{Deserialize, Serialize};
use soundprint_fp::FileFormat;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct SoundprintConfig {
    #[serde(default)]
    pub fingerprint: FingerprintConfig,
    #[serde(default)]
    pub realtime: RealtimeSettings,
    #[serde(default)]
    pub offline: OfflineSettings,
}

/// Realtime session configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RealtimeSettings {
    #[serde(default = "default_threshold_votes")]
    pub threshold_votes: usize,
    /// Samples between fingerprint starts
    #[serde(default = "default_stride")]
    pub stride: usize,
    /// When set, strides are drawn uniformly from `[stride, max_stride]`
    #[serde(default)]
    pub max_stride: Option<usize>,
    #[serde(default = "default_permitted_gap")]
    pub permitted_gap: f64,
    #[serde(default)]
    pub downtime_capture_period_s: f64,
    #[serde(default)]
    pub backoff: BackoffSettings,
    /// Length of the chunks pulled from a source
    #[serde(default = "default_chunk_seconds")]
    pub chunk_seconds: f64,
    /// Minimal track coverage for a completed entry to be reported as a success
    #[serde(default = "default_min_coverage")]
    pub min_coverage_s: f64,
}

impl Default for RealtimeSettings {
    fn default() -> Self {
        Self {
            threshold_votes: default_threshold_votes(),
            stride: default_stride(),
            max_stride: None,
            permitted_gap: default_permitted_gap(),
            downtime_capture_period_s: 0.0,
            backoff: BackoffSettings::default(),
            chunk_seconds: default_chunk_seconds(),
            min_coverage_s: default_min_coverage(),
        }
    }
}

fn default_threshold_votes() -> usize {
    4
}
fn default_stride() -> usize {
    512
}
fn default_permitted_gap() -> f64 {
    2.0
}
fn default_chunk_seconds() -> f64 {
    1.0
}
fn default_min_coverage() -> f64 {
    5.0
}

/// Delay between retries after a failure
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum BackoffSettings {
    Fixed {
        delay_ms: u64,
    },
    Exponential {
        #[serde(default = "default_initial_delay_ms")]
        initial_delay_ms: u64,
        #[serde(default = "default_max_delay_ms")]
        max_delay_ms: u64,
        #[serde(default = "default_jitter")]
        jitter: f64,
    },
}

impl Default for BackoffSettings {
    fn default() -> Self {
        BackoffSettings::Exponential {
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            jitter: default_jitter(),
        }
    }
}

fn default_initial_delay_ms() -> u64 {
    500
}
fn default_max_delay_ms() -> u64 {
    30_000
}
fn default_jitter() -> f64 {
    0.5
}

impl BackoffSettings {
    pub fn policy(&self) -> Arc<dyn BackoffPolicy> {
        match *self {
            BackoffSettings::Fixed { delay_ms } => {
                Arc::new(FixedDelayBackoffPolicy::new(Duration::from_millis(delay_ms)))
            }
            BackoffSettings::Exponential {
                initial_delay_ms,
                max_delay_ms,
                jitter,
            } => Arc::new(RandomExponentialBackoffPolicy::new(
                Duration::from_millis(initial_delay_ms),
                Duration::from_millis(max_delay_ms),
                jitter,
            )),
        }
    }
}

/// Where hashes go while the index is unavailable
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct OfflineSettings {
    #[serde(default)]
    pub storage: OfflineBackend,
    #[serde(default = "default_offline_directory")]
    pub directory: String,
    #[serde(default)]
    pub format: FileFormat,
}

impl Default for OfflineSettings {
    fn default() -> Self {
        Self {
            storage: OfflineBackend::default(),
            directory: default_offline_directory(),
            format: FileFormat::default(),
        }
    }
}

fn default_offline_directory() -> String {
    "./offline".to_string()
}

#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum OfflineBackend {
    /// No buffering; failed hashes are dropped
    #[default]
    None,
    Memory,
    Filesystem,
}

impl SoundprintConfig {
    /// Load configuration from TOML file
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Failed to read config file {}: {}", path.display(), e))?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> anyhow::Result<Self> {
        let config: SoundprintConfig =
            toml::from_str(content).map_err(|e| anyhow::anyhow!("Failed to parse TOML config: {}", e))?;
        config.fingerprint.validate()?;
        Ok(config)
    }

    /// Offline storage described by `[offline]`, if any
    pub fn offline_storage(&self) -> anyhow::Result<Option<Arc<dyn OfflineStorage>>> {
        let storage: Arc<dyn OfflineStorage> = match self.offline.storage {
            OfflineBackend::None => return Ok(None),
            OfflineBackend::Memory => Arc::new(InMemoryOfflineStorage::new()),
            OfflineBackend::Filesystem => Arc::new(FilesystemOfflineStorage::new(
                &self.offline.directory,
                self.offline.format,
                self.fingerprint.sample_rate,
            )?),
        };
        Ok(Some(storage))
    }

    /// Session builder preset from `[realtime]` and `[offline]`; callbacks are
    /// left for the caller
    pub fn realtime_builder(&self) -> anyhow::Result<RealtimeQueryConfigurationBuilder> {
        let settings = &self.realtime;
        if !settings.downtime_capture_period_s.is_finite() || settings.downtime_capture_period_s < 0.0 {
            anyhow::bail!(
                "downtime capture period must be a non-negative number of seconds, got {}",
                settings.downtime_capture_period_s
            );
        }

        let mut builder = RealtimeQueryConfiguration::builder()
            .with_threshold_votes(settings.threshold_votes)
            .with_permitted_gap(settings.permitted_gap)
            .with_downtime_capture_period(Duration::from_secs_f64(settings.downtime_capture_period_s))
            .with_backoff_policy(SharedBackoff(settings.backoff.policy()))
            .filter_results(TrackCoverageFilter::new(settings.min_coverage_s));

        builder = match settings.max_stride {
            Some(max) if max > settings.stride => builder.with_stride(IncrementalRandomStride::new(
                settings.stride,
                max,
                self.fingerprint.permutation_seed,
            )),
            _ => builder.with_stride(IncrementalStaticStride::new(settings.stride)),
        };

        if let Some(storage) = self.offline_storage()? {
            builder = builder.with_offline_storage(storage);
        }
        Ok(builder)
    }
}

struct SharedBackoff(Arc<dyn BackoffPolicy>);

impl BackoffPolicy for SharedBackoff {
    fn delay(&self, attempt: u32) -> Duration {
        self.0.delay(attempt)
    }
}

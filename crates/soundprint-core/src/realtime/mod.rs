//! Realtime querying of a continuous audio stream
//!
//! A session pulls chunks from a [`RealtimeSource`], windows and hashes them,
//! queries the index and reports candidates through callbacks. Everything a
//! session needs is fixed up front in a [`RealtimeQueryConfiguration`].

pub mod backoff;
pub mod continuity;
pub mod filter;
pub mod offline;
pub mod session;
pub mod source;

pub use backoff::{BackoffPolicy, FixedDelayBackoffPolicy, RandomExponentialBackoffPolicy};
pub use continuity::{AggregatedResults, ResultEntryAggregator};
pub use filter::{
    NoPassRealtimeResultEntryFilter, PassAllRealtimeResultEntryFilter, RealtimeResultEntryFilter,
    TrackCoverageFilter,
};
pub use offline::{FilesystemOfflineStorage, InMemoryOfflineStorage, OfflineStorage};
pub use session::{RealtimeQuerySession, SessionStats, StopHandle};
pub use source::{ChannelSource, ChunkedSamplesSource, RealtimeSource};

use crate::error::{AudioError, StreamingError};
use crate::fingerprint::Hashes;
use crate::matching::{QueryConfiguration, QueryResult, ResultEntry};
use crate::stride::{IncrementalStaticStride, Stride};
use std::sync::Arc;
use std::time::Duration;

pub type QueryResultCallback = Arc<dyn Fn(QueryResult) + Send + Sync>;
pub type ResultEntryCallback = Arc<dyn Fn(ResultEntry) + Send + Sync>;
pub type ErrorCallback = Arc<dyn Fn(&StreamingError, Option<&Hashes>) + Send + Sync>;
pub type RestoredCallback = Arc<dyn Fn() + Send + Sync>;

/// Highest accepted vote threshold
pub const MAX_THRESHOLD_VOTES: usize = 25;

pub struct RealtimeQueryConfiguration {
    query: QueryConfiguration,
    result_filter: Arc<dyn RealtimeResultEntryFilter>,
    ongoing_filter: Arc<dyn RealtimeResultEntryFilter>,
    success_callback: QueryResultCallback,
    did_not_pass_callback: QueryResultCallback,
    ongoing_success_callback: ResultEntryCallback,
    error_callback: ErrorCallback,
    restored_callback: RestoredCallback,
    offline_storage: Option<Arc<dyn OfflineStorage>>,
    backoff: Arc<dyn BackoffPolicy>,
    stride: Arc<dyn Stride>,
    downtime_capture_period: Duration,
}

impl RealtimeQueryConfiguration {
    pub fn builder() -> RealtimeQueryConfigurationBuilder {
        RealtimeQueryConfigurationBuilder::new()
    }

    /// Parameters forwarded to the index with each query
    pub fn query_configuration(&self) -> &QueryConfiguration {
        &self.query
    }

    pub fn threshold_votes(&self) -> usize {
        self.query.threshold_votes
    }

    pub fn permitted_gap(&self) -> f64 {
        self.query.permitted_gap
    }

    pub fn downtime_capture_period(&self) -> Duration {
        self.downtime_capture_period
    }

    pub fn stride(&self) -> Arc<dyn Stride> {
        self.stride.clone()
    }

    pub fn offline_storage(&self) -> Option<&Arc<dyn OfflineStorage>> {
        self.offline_storage.as_ref()
    }
}

pub struct RealtimeQueryConfigurationBuilder {
    query: QueryConfiguration,
    result_filter: Arc<dyn RealtimeResultEntryFilter>,
    ongoing_filter: Arc<dyn RealtimeResultEntryFilter>,
    success_callback: QueryResultCallback,
    did_not_pass_callback: QueryResultCallback,
    ongoing_success_callback: ResultEntryCallback,
    error_callback: ErrorCallback,
    restored_callback: RestoredCallback,
    offline_storage: Option<Arc<dyn OfflineStorage>>,
    backoff: Arc<dyn BackoffPolicy>,
    stride: Arc<dyn Stride>,
    downtime_capture_period: Duration,
}

impl Default for RealtimeQueryConfigurationBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl RealtimeQueryConfigurationBuilder {
    pub fn new() -> Self {
        Self {
            query: QueryConfiguration::default(),
            result_filter: Arc::new(TrackCoverageFilter::new(5.0)),
            ongoing_filter: Arc::new(NoPassRealtimeResultEntryFilter),
            success_callback: Arc::new(|_: QueryResult| {}),
            did_not_pass_callback: Arc::new(|_: QueryResult| {}),
            ongoing_success_callback: Arc::new(|_: ResultEntry| {}),
            error_callback: Arc::new(|e: &StreamingError, _: Option<&Hashes>| log::warn!("{}", e)),
            restored_callback: Arc::new(|| {}),
            offline_storage: None,
            backoff: Arc::new(RandomExponentialBackoffPolicy::default()),
            stride: Arc::new(IncrementalStaticStride::new(512)),
            downtime_capture_period: Duration::ZERO,
        }
    }

    /// Matching bands needed for a reference fingerprint to become a candidate
    pub fn with_threshold_votes(mut self, threshold_votes: usize) -> Self {
        self.query.threshold_votes = threshold_votes;
        self
    }

    pub fn filter_results(mut self, filter: impl RealtimeResultEntryFilter + 'static) -> Self {
        self.result_filter = Arc::new(filter);
        self
    }

    pub fn filter_ongoing_results(mut self, filter: impl RealtimeResultEntryFilter + 'static) -> Self {
        self.ongoing_filter = Arc::new(filter);
        self
    }

    pub fn on_success(mut self, callback: impl Fn(QueryResult) + Send + Sync + 'static) -> Self {
        self.success_callback = Arc::new(callback);
        self
    }

    /// Candidates that were found but rejected by the result filter
    pub fn on_did_not_pass_filter(mut self, callback: impl Fn(QueryResult) + Send + Sync + 'static) -> Self {
        self.did_not_pass_callback = Arc::new(callback);
        self
    }

    pub fn on_ongoing_success(mut self, callback: impl Fn(ResultEntry) + Send + Sync + 'static) -> Self {
        self.ongoing_success_callback = Arc::new(callback);
        self
    }

    /// Hashes are `None` when the failure happened before hashing
    pub fn on_error(
        mut self,
        callback: impl Fn(&StreamingError, Option<&Hashes>) + Send + Sync + 'static,
    ) -> Self {
        self.error_callback = Arc::new(callback);
        self
    }

    pub fn on_restored(mut self, callback: impl Fn() + Send + Sync + 'static) -> Self {
        self.restored_callback = Arc::new(callback);
        self
    }

    pub fn with_offline_storage(mut self, storage: Arc<dyn OfflineStorage>) -> Self {
        self.offline_storage = Some(storage);
        self
    }

    pub fn with_backoff_policy(mut self, backoff: impl BackoffPolicy + 'static) -> Self {
        self.backoff = Arc::new(backoff);
        self
    }

    pub fn with_stride(mut self, stride: impl Stride + 'static) -> Self {
        self.stride = Arc::new(stride);
        self
    }

    /// Largest gap in seconds across which candidates are stitched together
    pub fn with_permitted_gap(mut self, permitted_gap: f64) -> Self {
        self.query.permitted_gap = permitted_gap;
        self
    }

    /// Downtime after which failed hashes go to offline storage
    pub fn with_downtime_capture_period(mut self, period: Duration) -> Self {
        self.downtime_capture_period = period;
        self
    }

    pub fn with_yes_meta_field(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.yes_meta_fields.insert(key.into(), value.into());
        self
    }

    pub fn with_no_meta_field(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.no_meta_fields.insert(key.into(), value.into());
        self
    }

    pub fn build(self) -> Result<RealtimeQueryConfiguration, AudioError> {
        if !(1..=MAX_THRESHOLD_VOTES).contains(&self.query.threshold_votes) {
            return Err(AudioError::InvalidConfiguration(format!(
                "threshold votes must be within [1, {}], got {}",
                MAX_THRESHOLD_VOTES, self.query.threshold_votes
            )));
        }
        if !self.query.permitted_gap.is_finite() || self.query.permitted_gap < 0.0 {
            return Err(AudioError::InvalidConfiguration(format!(
                "permitted gap must be a non-negative number of seconds, got {}",
                self.query.permitted_gap
            )));
        }

        Ok(RealtimeQueryConfiguration {
            query: self.query,
            result_filter: self.result_filter,
            ongoing_filter: self.ongoing_filter,
            success_callback: self.success_callback,
            did_not_pass_callback: self.did_not_pass_callback,
            ongoing_success_callback: self.ongoing_success_callback,
            error_callback: self.error_callback,
            restored_callback: self.restored_callback,
            offline_storage: self.offline_storage,
            backoff: self.backoff,
            stride: self.stride,
            downtime_capture_period: self.downtime_capture_period,
        })
    }
}

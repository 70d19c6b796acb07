//! Result entry filters deciding which candidates are reported

use crate::matching::ResultEntry;

pub trait RealtimeResultEntryFilter: Send + Sync {
    fn pass(&self, entry: &ResultEntry, can_continue_in_next_query: bool) -> bool;
}

/// Rejects every entry
#[derive(Debug, Clone, Copy, Default)]
pub struct NoPassRealtimeResultEntryFilter;

impl RealtimeResultEntryFilter for NoPassRealtimeResultEntryFilter {
    fn pass(&self, _entry: &ResultEntry, _can_continue_in_next_query: bool) -> bool {
        false
    }
}

/// Accepts every entry
#[derive(Debug, Clone, Copy, Default)]
pub struct PassAllRealtimeResultEntryFilter;

impl RealtimeResultEntryFilter for PassAllRealtimeResultEntryFilter {
    fn pass(&self, _entry: &ResultEntry, _can_continue_in_next_query: bool) -> bool {
        true
    }
}

/// Accepts entries covering at least `min_coverage_s` seconds of the track
#[derive(Debug, Clone, Copy)]
pub struct TrackCoverageFilter {
    min_coverage_s: f64,
}

impl TrackCoverageFilter {
    pub fn new(min_coverage_s: f64) -> Self {
        Self { min_coverage_s }
    }
}

impl RealtimeResultEntryFilter for TrackCoverageFilter {
    fn pass(&self, entry: &ResultEntry, _can_continue_in_next_query: bool) -> bool {
        entry.track_coverage_s >= self.min_coverage_s
    }
}

impl<F> RealtimeResultEntryFilter for F
where
    F: Fn(&ResultEntry, bool) -> bool + Send + Sync,
{
    fn pass(&self, entry: &ResultEntry, can_continue_in_next_query: bool) -> bool {
        self(entry, can_continue_in_next_query)
    }
}

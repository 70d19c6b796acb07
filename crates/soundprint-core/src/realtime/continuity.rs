//! Stitching of candidates across consecutive query windows
//!
//! A track playing through the stream is matched piecewise by every window.
//! Entries of the same track whose spans touch (within the permitted gap) and
//! whose alignment agrees are merged into one growing entry. An entry is
//! completed once it can no longer be extended by the next window.

use crate::matching::{QueryResult, ResultEntry};

/// Outcome of folding one query result into the aggregator
#[derive(Debug, Default)]
pub struct AggregatedResults {
    /// Entries extended this round that may continue in the next window
    pub ongoing: Vec<ResultEntry>,
    /// Entries that cannot continue any more
    pub completed: Vec<ResultEntry>,
}

struct PendingEntry {
    entry: ResultEntry,
    updated: bool,
}

pub struct ResultEntryAggregator {
    permitted_gap: f64,
    pending: Vec<PendingEntry>,
}

impl ResultEntryAggregator {
    pub fn new(permitted_gap: f64) -> Self {
        Self {
            permitted_gap,
            pending: Vec::new(),
        }
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Fold in the result of a query whose window ends at `query_ends_at`
    pub fn consume(&mut self, result: &QueryResult, query_ends_at: f64) -> AggregatedResults {
        for pending in &mut self.pending {
            pending.updated = false;
        }

        let permitted_gap = self.permitted_gap;
        for entry in &result.entries {
            match self
                .pending
                .iter_mut()
                .find(|p| stitchable(&p.entry, entry, permitted_gap))
            {
                Some(pending) => {
                    pending.entry = merge(&pending.entry, entry);
                    pending.updated = true;
                }
                None => self.pending.push(PendingEntry {
                    entry: entry.clone(),
                    updated: true,
                }),
            }
        }

        let mut aggregated = AggregatedResults::default();
        let mut retained = Vec::with_capacity(self.pending.len());
        for pending in self.pending.drain(..) {
            if can_continue(&pending.entry, query_ends_at, self.permitted_gap) {
                if pending.updated {
                    aggregated.ongoing.push(pending.entry.clone());
                }
                retained.push(pending);
            } else {
                aggregated.completed.push(pending.entry);
            }
        }
        self.pending = retained;
        aggregated
    }

    /// Complete everything still pending
    pub fn flush(&mut self) -> Vec<ResultEntry> {
        self.pending.drain(..).map(|p| p.entry).collect()
    }
}

/// Same track, spans within the permitted gap and matching alignment
fn stitchable(pending: &ResultEntry, next: &ResultEntry, permitted_gap: f64) -> bool {
    pending.track.id == next.track.id
        && next.query_match_starts_at - pending.query_match_ends_at() <= permitted_gap
        && pending.query_match_starts_at - next.query_match_ends_at() <= permitted_gap
        && (next.offset() - pending.offset()).abs() <= permitted_gap
}

/// The query side reaches the end of the window and the track has not ended
pub fn can_continue(entry: &ResultEntry, query_ends_at: f64, permitted_gap: f64) -> bool {
    entry.query_match_ends_at() + permitted_gap >= query_ends_at
        && entry.track.duration_s - entry.track_match_ends_at() > permitted_gap
}

/// Union of two entries of the same track
fn merge(a: &ResultEntry, b: &ResultEntry) -> ResultEntry {
    let query_start = a.query_match_starts_at.min(b.query_match_starts_at);
    let query_end = a.query_match_ends_at().max(b.query_match_ends_at());
    let track_start = a.track_match_starts_at.min(b.track_match_starts_at);
    let track_end = a.track_match_ends_at().max(b.track_match_ends_at());

    // Overlapping windows match the same region of the track twice
    let overlap = (a.track_match_ends_at().min(b.track_match_ends_at())
        - a.track_match_starts_at.max(b.track_match_starts_at))
    .max(0.0);
    let coverage = (a.track_coverage_s + b.track_coverage_s - overlap.min(b.track_coverage_s))
        .min(track_end - track_start)
        .max(a.track_coverage_s.max(b.track_coverage_s));

    ResultEntry {
        track: a.track.clone(),
        query_match_starts_at: query_start,
        track_match_starts_at: track_start,
        match_length: query_end - query_start,
        track_coverage_s: coverage,
        score: a.score + b.score,
        hashes_matched: a.hashes_matched + b.hashes_matched,
        confidence: a.confidence.max(b.confidence),
    }
}

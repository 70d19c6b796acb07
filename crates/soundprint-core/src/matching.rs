//! Index boundary and the in-memory reference index
//!
//! A reference fingerprint is a candidate for a query fingerprint when at least
//! `threshold_votes` of their hash bands are equal. Candidates of one track are
//! aligned on their most common time offset and split into occurrences
//! wherever the alignment breaks for longer than the permitted gap.

use crate::config::FingerprintConfig;
use crate::fingerprint::{HashedFingerprint, Hashes};
use anyhow::{Context, Result};
use async_trait::async_trait;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use soundprint_fp::{FpJsonFile, FpJsonTrack};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};


/// Offset histogram resolution in seconds
const OFFSET_RESOLUTION_S: f64 = 0.1;
/// Candidates within this distance of a peak offset count as aligned
const OFFSET_TOLERANCE_S: f64 = 0.2;
/// Matches a secondary offset peak needs to be reported on its own
const MIN_ALIGNED_MATCHES: usize = 2;

/// Reference track description
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackInfo {
    pub id: String,
    pub title: String,
    pub artist: String,
    pub duration_s: f64,
    #[serde(default)]
    pub meta_fields: BTreeMap<String, String>,
}

impl TrackInfo {
    pub fn new(id: impl Into<String>, title: impl Into<String>, artist: impl Into<String>, duration_s: f64) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            artist: artist.into(),
            duration_s,
            meta_fields: BTreeMap::new(),
        }
    }

    pub fn with_meta_field(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.meta_fields.insert(key.into(), value.into());
        self
    }

    /// Every `yes` pair present, no `no` pair present
    pub fn satisfies(&self, yes: &BTreeMap<String, String>, no: &BTreeMap<String, String>) -> bool {
        yes.iter().all(|(k, v)| self.meta_fields.get(k) == Some(v))
            && !no.iter().any(|(k, v)| self.meta_fields.get(k) == Some(v))
    }
}

impl From<FpJsonTrack> for TrackInfo {
    fn from(track: FpJsonTrack) -> Self {
        Self {
            id: track.id,
            title: track.title,
            artist: track.artist,
            duration_s: track.duration_s,
            meta_fields: track.meta_fields,
        }
    }
}

impl From<&TrackInfo> for FpJsonTrack {
    fn from(track: &TrackInfo) -> Self {
        Self {
            id: track.id.clone(),
            title: track.title.clone(),
            artist: track.artist.clone(),
            duration_s: track.duration_s,
            meta_fields: track.meta_fields.clone(),
        }
    }
}

/// One occurrence of a reference track in the query
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultEntry {
    pub track: TrackInfo,
    /// Stream-relative start of the matched query span
    pub query_match_starts_at: f64,
    /// Start of the matched span within the track
    pub track_match_starts_at: f64,
    /// Length of the matched query span in seconds
    pub match_length: f64,
    /// Seconds of the track covered by matching fingerprints
    pub track_coverage_s: f64,
    /// Sum of matching band votes
    pub score: f64,
    pub hashes_matched: usize,
    /// Mean share of equal bands per matched fingerprint
    pub confidence: f64,
}

impl ResultEntry {
    pub fn query_match_ends_at(&self) -> f64 {
        self.query_match_starts_at + self.match_length
    }

    pub fn track_match_ends_at(&self) -> f64 {
        self.track_match_starts_at + self.match_length
    }

    /// Track start minus query start, constant along one occurrence
    pub fn offset(&self) -> f64 {
        self.track_match_starts_at - self.query_match_starts_at
    }
}

/// Entries reported for one query, best first
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryResult {
    pub origin: String,
    pub entries: Vec<ResultEntry>,
}

impl QueryResult {
    pub fn new(origin: impl Into<String>, entries: Vec<ResultEntry>) -> Self {
        Self {
            origin: origin.into(),
            entries,
        }
    }

    pub fn contains_matches(&self) -> bool {
        !self.entries.is_empty()
    }

    pub fn best_match(&self) -> Option<&ResultEntry> {
        self.entries.first()
    }
}

/// Parameters passed through to the index with every query
#[derive(Debug, Clone, PartialEq)]
pub struct QueryConfiguration {
    pub threshold_votes: usize,
    pub permitted_gap: f64,
    pub yes_meta_fields: BTreeMap<String, String>,
    pub no_meta_fields: BTreeMap<String, String>,
}

impl Default for QueryConfiguration {
    fn default() -> Self {
        Self {
            threshold_votes: 4,
            permitted_gap: 2.0,
            yes_meta_fields: BTreeMap::new(),
            no_meta_fields: BTreeMap::new(),
        }
    }
}

#[async_trait]
pub trait QueryService: Send + Sync {
    async fn query(&self, hashes: &Hashes, config: &QueryConfiguration) -> Result<QueryResult>;
}

/// Query fingerprint aligned with a reference fingerprint
#[derive(Debug, Clone, Copy)]
struct Match {
    query_sequence: u32,
    query_at: f64,
    track_at: f64,
    votes: usize,
}

impl Match {
    fn offset(&self) -> f64 {
        self.track_at - self.query_at
    }
}

/// Position of a reference fingerprint in the index
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct Posting {
    track: u32,
    fingerprint: u32,
}

struct IndexedTrack {
    info: TrackInfo,
    fingerprints: Vec<HashedFingerprint>,
}

/// Band-wise inverted index held in memory
pub struct InMemoryModelService {
    tracks: Vec<IndexedTrack>,
    bands: Vec<HashMap<i32, Vec<Posting>>>,
    hash_tables: usize,
    fingerprint_length_s: f64,
}

impl InMemoryModelService {
    pub fn new(config: &FingerprintConfig) -> Self {
        Self {
            tracks: Vec::new(),
            bands: vec![HashMap::new(); config.hash_tables],
            hash_tables: config.hash_tables,
            fingerprint_length_s: config.fingerprint_length_s(),
        }
    }

    /// Load every `.json`/`.bson` fingerprint file in `dir`
    pub fn from_directory(dir: &Path, config: &FingerprintConfig) -> Result<Self> {
        let entries = std::fs::read_dir(dir)
            .with_context(|| format!("Failed to read fingerprint directory: {}", dir.display()))?;
        let mut files: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| {
                path.extension()
                    .and_then(|s| s.to_str())
                    .map(|ext| ext == "json" || ext == "bson")
                    .unwrap_or(false)
            })
            .collect();
        files.sort();
        Self::from_fp_files(&files, config)
    }

    /// Load fingerprint files in parallel; files that fail to load are skipped
    pub fn from_fp_files(paths: &[PathBuf], config: &FingerprintConfig) -> Result<Self> {
        let loaded: Vec<(TrackInfo, Hashes)> = paths
            .par_iter()
            .filter_map(|path| match load_reference(path, config.hash_tables) {
                Ok(reference) => Some(reference),
                Err(e) => {
                    log::warn!("Failed to load {}: {:#}", path.display(), e);
                    None
                }
            })
            .collect();

        let mut service = Self::new(config);
        for (track, hashes) in loaded {
            service.insert(track, &hashes);
        }
        log::info!("Indexed {} reference track(s)", service.track_count());
        Ok(service)
    }

    pub fn track_count(&self) -> usize {
        self.tracks.len()
    }

    /// Add a reference track; fingerprints with the wrong band count are ignored
    pub fn insert(&mut self, track: TrackInfo, hashes: &Hashes) {
        let track_index = self.tracks.len() as u32;
        let mut fingerprints: Vec<HashedFingerprint> = hashes
            .fingerprints
            .iter()
            .filter(|fp| fp.hash_bins.len() == self.hash_tables)
            .cloned()
            .collect();
        fingerprints.sort_by_key(|fp| fp.sequence_number);

        for (fp_index, fp) in fingerprints.iter().enumerate() {
            let posting = Posting {
                track: track_index,
                fingerprint: fp_index as u32,
            };
            for (band, &code) in self.bands.iter_mut().zip(&fp.hash_bins) {
                band.entry(code).or_default().push(posting);
            }
        }

        log::debug!("Inserted {} with {} fingerprints", track.id, fingerprints.len());
        self.tracks.push(IndexedTrack {
            info: track,
            fingerprints,
        });
    }

    fn candidates(&self, hashes: &Hashes, config: &QueryConfiguration) -> HashMap<u32, Vec<Match>> {
        let mut by_track: HashMap<u32, Vec<Match>> = HashMap::new();

        for query in &hashes.fingerprints {
            let mut votes: HashMap<Posting, usize> = HashMap::new();
            for (band, code) in self.bands.iter().zip(&query.hash_bins) {
                if let Some(postings) = band.get(code) {
                    for posting in postings {
                        *votes.entry(*posting).or_insert(0) += 1;
                    }
                }
            }

            for (posting, votes) in votes {
                if votes < config.threshold_votes {
                    continue;
                }
                let track = &self.tracks[posting.track as usize];
                if !track.info.satisfies(&config.yes_meta_fields, &config.no_meta_fields) {
                    continue;
                }
                by_track.entry(posting.track).or_default().push(Match {
                    query_sequence: query.sequence_number,
                    query_at: query.starts_at as f64,
                    track_at: track.fingerprints[posting.fingerprint as usize].starts_at as f64,
                    votes,
                });
            }
        }
        by_track
    }

    /// Build result entries from the matches of one track
    ///
    /// Offset peaks are taken strongest first. Each match belongs to the first
    /// peak it lies within tolerance of, so a track heard at several alignments
    /// gives one set of entries per alignment.
    fn occurrences(&self, track: &TrackInfo, matches: &[Match], permitted_gap: f64) -> Vec<ResultEntry> {
        let mut histogram: HashMap<i64, usize> = HashMap::new();
        for m in matches {
            *histogram.entry((m.offset() / OFFSET_RESOLUTION_S).round() as i64).or_insert(0) += 1;
        }
        let mut peaks: Vec<(i64, usize)> = histogram.into_iter().collect();
        peaks.sort_by_key(|&(bin, count)| (std::cmp::Reverse(count), bin));

        let mut claimed = vec![false; matches.len()];
        let mut entries = Vec::new();
        for (rank, (bin, _)) in peaks.into_iter().enumerate() {
            let peak_offset = bin as f64 * OFFSET_RESOLUTION_S;
            let members: Vec<usize> = (0..matches.len())
                .filter(|&i| !claimed[i] && (matches[i].offset() - peak_offset).abs() <= OFFSET_TOLERANCE_S)
                .collect();
            if members.is_empty() || (rank > 0 && members.len() < MIN_ALIGNED_MATCHES) {
                continue;
            }

            let mut aligned: Vec<Match> = members.iter().map(|&i| matches[i]).collect();
            for i in members {
                claimed[i] = true;
            }
            aligned.sort_by(|a, b| a.query_at.total_cmp(&b.query_at));
            self.split_on_gaps(track, &aligned, permitted_gap, &mut entries);
        }
        entries
    }

    /// One entry per run of aligned matches without a gap above `permitted_gap`
    fn split_on_gaps(&self, track: &TrackInfo, aligned: &[Match], permitted_gap: f64, entries: &mut Vec<ResultEntry>) {
        let mut start = 0;
        for i in 1..=aligned.len() {
            let split = i == aligned.len() || aligned[i].query_at - aligned[i - 1].query_at > permitted_gap;
            if split {
                entries.push(self.entry(track, &aligned[start..i]));
                start = i;
            }
        }
    }

    fn entry(&self, track: &TrackInfo, aligned: &[Match]) -> ResultEntry {
        let fp_len = self.fingerprint_length_s;
        let query_start = aligned.iter().map(|m| m.query_at).fold(f64::INFINITY, f64::min);
        let query_end = aligned.iter().map(|m| m.query_at).fold(f64::NEG_INFINITY, f64::max) + fp_len;
        let track_start = aligned.iter().map(|m| m.track_at).fold(f64::INFINITY, f64::min);

        let mut intervals: Vec<f64> = aligned.iter().map(|m| m.track_at).collect();
        intervals.sort_by(f64::total_cmp);
        let mut coverage = 0.0;
        let mut covered_until = f64::NEG_INFINITY;
        for at in intervals {
            let from = at.max(covered_until);
            let to = at + fp_len;
            if to > from {
                coverage += to - from;
            }
            covered_until = covered_until.max(to);
        }

        let hashes_matched = aligned.iter().map(|m| m.query_sequence).collect::<HashSet<_>>().len();
        let score: usize = aligned.iter().map(|m| m.votes).sum();

        ResultEntry {
            track: track.clone(),
            query_match_starts_at: query_start,
            track_match_starts_at: track_start,
            match_length: query_end - query_start,
            track_coverage_s: coverage.min(track.duration_s.max(fp_len)),
            score: score as f64,
            hashes_matched,
            confidence: (score as f64 / (aligned.len() * self.hash_tables) as f64).min(1.0),
        }
    }
}

#[async_trait]
impl QueryService for InMemoryModelService {
    async fn query(&self, hashes: &Hashes, config: &QueryConfiguration) -> Result<QueryResult> {
        let mut entries: Vec<ResultEntry> = self
            .candidates(hashes, config)
            .into_iter()
            .flat_map(|(track, matches)| {
                let info = &self.tracks[track as usize].info;
                self.occurrences(info, &matches, config.permitted_gap)
            })
            .collect();

        entries.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then_with(|| a.query_match_starts_at.total_cmp(&b.query_match_starts_at))
        });

        log::debug!(
            "Query over {} fingerprints at {:.3}s produced {} candidate(s)",
            hashes.len(),
            hashes.relative_to,
            entries.len()
        );
        Ok(QueryResult::new(hashes.origin.clone(), entries))
    }
}

/// Track description and fingerprints of one reference file
fn load_reference(path: &Path, hash_tables: usize) -> Result<(TrackInfo, Hashes)> {
    let file = FpJsonFile::load_auto(path)?;
    file.check_arity(hash_tables)?;

    let track = match file.metadata.track.clone() {
        Some(track) => TrackInfo::from(track),
        None => {
            let id = path
                .file_stem()
                .and_then(|s| s.to_str())
                .unwrap_or(&file.metadata.origin)
                .to_string();
            TrackInfo::new(id.clone(), id, "", file.metadata.duration_s)
        }
    };
    Ok((track, Hashes::from_fp_file(&file)))
}

//! Session sequencing tests against a scripted index

use super::*;
use crate::audio::AudioSamples;
use crate::config::FingerprintConfig;
use crate::matching::{QueryConfiguration, TrackInfo};
use crate::fingerprint::HashedFingerprint;
use crate::realtime::{
    ChannelSource, ChunkedSamplesSource, FilesystemOfflineStorage, InMemoryOfflineStorage,
    OfflineStorage, PassAllRealtimeResultEntryFilter, RandomExponentialBackoffPolicy,
    TrackCoverageFilter,
};
use crate::stride::IncrementalStaticStride;
use async_trait::async_trait;
use soundprint_fp::FileFormat;
use std::sync::Mutex;

const SAMPLE_RATE: u32 = 5512;

fn small_config() -> FingerprintConfig {
    FingerprintConfig {
        fft_size: 256,
        frame_hop: 32,
        image_length: 32,
        log_bins: 16,
        top_wavelets: 50,
        permutation_length: 64,
        stride: 128,
        ..Default::default()
    }
}

fn generator() -> Arc<FingerprintGenerator> {
    Arc::new(FingerprintGenerator::new(small_config()).unwrap())
}

fn signal(seconds: usize) -> AudioSamples {
    let samples: Vec<f32> = (0..seconds * SAMPLE_RATE as usize)
        .map(|i| {
            let t = i as f32 / SAMPLE_RATE as f32;
            0.5 * (2.0 * std::f32::consts::PI * 500.0 * t).sin()
                + 0.3 * (2.0 * std::f32::consts::PI * (800.0 + 200.0 * t) * t).sin()
        })
        .collect();
    AudioSamples::new(samples, "stream", SAMPLE_RATE, 0.0).unwrap()
}

/// Index that fails its first `failures` queries, then reports one entry per
/// query spanning the whole window when `with_entry` is set
struct ScriptedIndex {
    failures: Mutex<usize>,
    with_entry: bool,
    succeeded: Mutex<Vec<f64>>,
    log: Arc<Mutex<Vec<String>>>,
}

impl ScriptedIndex {
    fn new(failures: usize, with_entry: bool, log: Arc<Mutex<Vec<String>>>) -> Arc<Self> {
        Arc::new(Self {
            failures: Mutex::new(failures),
            with_entry,
            succeeded: Mutex::new(Vec::new()),
            log,
        })
    }

    fn succeeded(&self) -> Vec<f64> {
        self.succeeded.lock().unwrap().clone()
    }
}

#[async_trait]
impl QueryService for ScriptedIndex {
    async fn query(&self, hashes: &Hashes, _config: &QueryConfiguration) -> anyhow::Result<QueryResult> {
        {
            let mut failures = self.failures.lock().unwrap();
            if *failures > 0 {
                *failures -= 1;
                anyhow::bail!("index unavailable");
            }
        }
        self.succeeded.lock().unwrap().push(hashes.relative_to);
        self.log.lock().unwrap().push(format!("ok {:.4}", hashes.relative_to));

        let entries = if self.with_entry {
            vec![ResultEntry {
                track: TrackInfo::new("track", "Track", "Artist", 1000.0),
                query_match_starts_at: hashes.relative_to,
                track_match_starts_at: hashes.relative_to + 100.0,
                match_length: hashes.duration_s,
                track_coverage_s: hashes.duration_s,
                score: hashes.len() as f64,
                hashes_matched: hashes.len(),
                confidence: 0.9,
            }]
        } else {
            Vec::new()
        };
        Ok(QueryResult::new(hashes.origin.clone(), entries))
    }
}

fn event_log() -> Arc<Mutex<Vec<String>>> {
    Arc::new(Mutex::new(Vec::new()))
}

fn position(log: &[String], prefix: &str) -> Vec<usize> {
    log.iter()
        .enumerate()
        .filter(|(_, line)| line.starts_with(prefix))
        .map(|(i, _)| i)
        .collect()
}

#[tokio::test]
async fn test_backoff_then_single_restore_and_fifo_resubmission() {
    let log = event_log();
    let index = ScriptedIndex::new(3, false, log.clone());
    let storage = Arc::new(InMemoryOfflineStorage::new());

    let delays = Arc::new(Mutex::new(Vec::new()));
    let policy = RandomExponentialBackoffPolicy::new(Duration::from_millis(1), Duration::from_millis(40), 1.0);
    let recorded = delays.clone();

    let (error_log, restore_log) = (log.clone(), log.clone());
    let config = RealtimeQueryConfiguration::builder()
        .with_stride(IncrementalStaticStride::new(128))
        .with_offline_storage(storage.clone())
        .with_backoff_policy(move |attempt: u32| {
            let delay = policy.delay(attempt);
            recorded.lock().unwrap().push((attempt, delay));
            delay
        })
        .on_error(move |error: &StreamingError, hashes: Option<&Hashes>| {
            assert!(matches!(error, StreamingError::Index(_)));
            let at = hashes.map(|h| h.relative_to).unwrap_or(f64::NAN);
            error_log.lock().unwrap().push(format!("error {:.4}", at));
        })
        .on_restored(move || restore_log.lock().unwrap().push("restore".to_string()))
        .build()
        .unwrap();

    let session = RealtimeQuerySession::new(config, generator(), index.clone());
    let stats = session
        .run(ChunkedSamplesSource::new(signal(4), 0.5))
        .await;

    let log = log.lock().unwrap().clone();
    let errors = position(&log, "error");
    let restores = position(&log, "restore");
    let successes = position(&log, "ok");

    // N failures give N error callbacks, then exactly one restore
    assert_eq!(errors.len(), 3);
    assert_eq!(restores.len(), 1);
    assert!(errors.iter().all(|&e| e < restores[0]));
    assert_eq!(successes.len(), stats.windows);

    // Every failed query was for the oldest buffered window
    assert!(log[errors[0]..=errors[2]].iter().all(|line| line == &log[errors[0]]));

    // Buffered windows are resubmitted oldest first, ahead of live ones
    let succeeded = index.succeeded();
    assert!(succeeded.windows(2).all(|w| w[0] < w[1]), "{:?}", succeeded);

    let delays = delays.lock().unwrap().clone();
    let attempts: Vec<u32> = delays.iter().map(|(attempt, _)| *attempt).collect();
    assert_eq!(attempts, vec![1, 2, 3]);
    assert!(delays.windows(2).all(|w| w[0].1 <= w[1].1));

    assert_eq!(stats.query_errors, 3);
    assert_eq!(stats.restores, 1);
    assert!(stats.offline_resubmitted >= 3);
    assert!(storage.is_empty());
}

#[tokio::test]
async fn test_failures_before_capture_period_are_dropped() {
    let log = event_log();
    let index = ScriptedIndex::new(2, false, log.clone());
    let storage = Arc::new(InMemoryOfflineStorage::new());
    let restores = Arc::new(Mutex::new(0));
    let counter = restores.clone();

    let config = RealtimeQueryConfiguration::builder()
        .with_stride(IncrementalStaticStride::new(128))
        .with_offline_storage(storage.clone())
        .with_downtime_capture_period(Duration::from_secs(3600))
        .with_backoff_policy(|_: u32| Duration::from_millis(1))
        .on_restored(move || *counter.lock().unwrap() += 1)
        .build()
        .unwrap();

    let session = RealtimeQuerySession::new(config, generator(), index.clone());
    let stats = session.run(ChunkedSamplesSource::new(signal(3), 0.5)).await;

    assert_eq!(*restores.lock().unwrap(), 1);
    assert_eq!(stats.query_errors, 2);
    assert_eq!(stats.offline_resubmitted, 0);
    assert_eq!(index.succeeded().len(), stats.windows - 2);
    assert!(storage.is_empty());
}

#[tokio::test]
async fn test_completed_entry_goes_to_success_or_did_not_pass() {
    for (min_coverage, expect_success) in [(1.0, true), (10_000.0, false)] {
        let index = ScriptedIndex::new(0, true, event_log());
        let successes = Arc::new(Mutex::new(Vec::new()));
        let rejected = Arc::new(Mutex::new(Vec::new()));
        let ongoing = Arc::new(Mutex::new(0usize));
        let (s, r, o) = (successes.clone(), rejected.clone(), ongoing.clone());

        let config = RealtimeQueryConfiguration::builder()
            .with_stride(IncrementalStaticStride::new(128))
            .filter_results(TrackCoverageFilter::new(min_coverage))
            .filter_ongoing_results(PassAllRealtimeResultEntryFilter)
            .on_success(move |result: QueryResult| s.lock().unwrap().push(result))
            .on_did_not_pass_filter(move |result: QueryResult| r.lock().unwrap().push(result))
            .on_ongoing_success(move |_: ResultEntry| *o.lock().unwrap() += 1)
            .build()
            .unwrap();

        let session = RealtimeQuerySession::new(config, generator(), index);
        let stats = session.run(ChunkedSamplesSource::new(signal(4), 0.5)).await;

        // One stitched entry per window while the stream plays
        assert_eq!(*ongoing.lock().unwrap(), stats.windows);

        let (successes, rejected) = (successes.lock().unwrap(), rejected.lock().unwrap());
        let reported = if expect_success { &*successes } else { &*rejected };
        let other = if expect_success { &*rejected } else { &*successes };
        assert!(other.is_empty());
        assert_eq!(reported.len(), 1);
        assert_eq!(reported[0].entries.len(), 1);
        assert_eq!(reported[0].origin, "stream");

        let entry = &reported[0].entries[0];
        assert!(entry.match_length > 3.0);
        assert!((entry.offset() - 100.0).abs() < 1e-6);
    }
}

#[tokio::test]
async fn test_cancellation_stops_callbacks() {
    let index = ScriptedIndex::new(0, true, event_log());
    let calls = Arc::new(Mutex::new(Vec::new()));
    let stop = Arc::new(Mutex::new(None::<StopHandle>));

    let (ongoing_calls, success_calls) = (calls.clone(), calls.clone());
    let stop_from_callback = stop.clone();
    let config = RealtimeQueryConfiguration::builder()
        .with_stride(IncrementalStaticStride::new(128))
        .filter_results(PassAllRealtimeResultEntryFilter)
        .filter_ongoing_results(PassAllRealtimeResultEntryFilter)
        .on_ongoing_success(move |_: ResultEntry| {
            ongoing_calls.lock().unwrap().push("ongoing");
            if let Some(handle) = stop_from_callback.lock().unwrap().as_ref() {
                handle.cancel();
            }
        })
        .on_success(move |_: QueryResult| success_calls.lock().unwrap().push("success"))
        .build()
        .unwrap();

    let session = RealtimeQuerySession::new(config, generator(), index);
    *stop.lock().unwrap() = Some(session.stop_handle());
    let stats = session.run(ChunkedSamplesSource::new(signal(4), 0.5)).await;

    assert!(stats.cancelled);
    assert_eq!(*calls.lock().unwrap(), vec!["ongoing"]);
}

#[tokio::test]
async fn test_source_errors_reported_without_hashes() {
    let log = event_log();
    let index = ScriptedIndex::new(0, false, event_log());
    let (error_log, restore_log) = (log.clone(), log.clone());

    let config = RealtimeQueryConfiguration::builder()
        .with_stride(IncrementalStaticStride::new(128))
        .with_backoff_policy(|_: u32| Duration::from_millis(1))
        .on_error(move |error: &StreamingError, hashes: Option<&Hashes>| {
            assert!(matches!(error, StreamingError::Source(_)));
            assert!(hashes.is_none());
            error_log.lock().unwrap().push("error".to_string());
        })
        .on_restored(move || restore_log.lock().unwrap().push("restore".to_string()))
        .build()
        .unwrap();

    let (sender, source) = ChannelSource::channel();
    sender.send(Err(anyhow::anyhow!("connection reset"))).unwrap();
    sender.send(Err(anyhow::anyhow!("connection reset"))).unwrap();
    let audio = signal(2);
    for (i, chunk) in audio.samples().chunks(SAMPLE_RATE as usize / 2).enumerate() {
        let at = i as f64 * 0.5;
        sender
            .send(Ok(AudioSamples::new(chunk.to_vec(), "stream", SAMPLE_RATE, at).unwrap()))
            .unwrap();
    }
    drop(sender);

    let session = RealtimeQuerySession::new(config, generator(), index);
    let stats = session.run(source).await;

    let log = log.lock().unwrap().clone();
    assert_eq!(stats.source_errors, 2);
    assert_eq!(log, vec!["error", "error", "restore"]);
}

/// Hashes parked by an earlier session, placed before the stream starts
fn parked(relative_to: f64) -> Hashes {
    let fp = HashedFingerprint {
        sequence_number: 0,
        starts_at: 0.0,
        hash_bins: vec![7; 8],
    };
    Hashes::new(vec![fp], 1.0, "earlier", relative_to)
}

#[tokio::test]
async fn test_startup_drains_storage_left_by_previous_run() {
    let dir = std::env::temp_dir().join(format!("soundprint-session-startup-{}", std::process::id()));
    let _ = std::fs::remove_dir_all(&dir);
    {
        let previous = FilesystemOfflineStorage::new(&dir, FileFormat::Json, SAMPLE_RATE).unwrap();
        previous.enqueue(parked(-20.0)).await.unwrap();
        previous.enqueue(parked(-10.0)).await.unwrap();
    }

    let storage = Arc::new(FilesystemOfflineStorage::new(&dir, FileFormat::Json, SAMPLE_RATE).unwrap());
    let index = ScriptedIndex::new(0, false, event_log());
    let config = RealtimeQueryConfiguration::builder()
        .with_stride(IncrementalStaticStride::new(128))
        .with_offline_storage(storage.clone())
        .build()
        .unwrap();

    let session = RealtimeQuerySession::new(config, generator(), index.clone());
    let stats = session.run(ChunkedSamplesSource::new(signal(3), 0.5)).await;

    let succeeded = index.succeeded();
    assert_eq!(&succeeded[..2], &[-20.0, -10.0]);
    assert_eq!(succeeded.len(), stats.windows + 2);
    assert_eq!(stats.offline_resubmitted, 2);
    assert_eq!(stats.query_errors, 0);
    assert!(storage.drain().await.unwrap().is_empty());
    let _ = std::fs::remove_dir_all(&dir);
}

#[tokio::test]
async fn test_resubmitted_counts_each_buffered_window_once() {
    let storage = Arc::new(InMemoryOfflineStorage::new());
    storage.enqueue(parked(-20.0)).await.unwrap();
    storage.enqueue(parked(-10.0)).await.unwrap();

    // The first retry of the oldest buffered window fails and parks both again
    let index = ScriptedIndex::new(1, false, event_log());
    let config = RealtimeQueryConfiguration::builder()
        .with_stride(IncrementalStaticStride::new(128))
        .with_offline_storage(storage.clone())
        .with_backoff_policy(|_: u32| Duration::from_millis(1))
        .build()
        .unwrap();

    let session = RealtimeQuerySession::new(config, generator(), index.clone());
    let stats = session.run(ChunkedSamplesSource::new(signal(3), 0.5)).await;

    let succeeded = index.succeeded();
    assert_eq!(&succeeded[..2], &[-20.0, -10.0]);
    assert_eq!(succeeded.len(), stats.windows + 2);
    assert_eq!(stats.query_errors, 1);
    assert_eq!(stats.restores, 1);
    assert_eq!(stats.offline_resubmitted, 2);
    assert!(storage.is_empty());
}

struct PanickingStride;

impl Stride for PanickingStride {
    fn next_stride(&self) -> usize {
        panic!("stride source exhausted");
    }
}

#[tokio::test]
async fn test_producer_panic_reported_as_hashing_error() {
    let errors = Arc::new(Mutex::new(Vec::new()));
    let recorded = errors.clone();
    let config = RealtimeQueryConfiguration::builder()
        .with_stride(PanickingStride)
        .on_error(move |error: &StreamingError, hashes: Option<&Hashes>| {
            assert!(hashes.is_none());
            recorded.lock().unwrap().push(matches!(error, StreamingError::Hashing(_)));
        })
        .build()
        .unwrap();

    let session = RealtimeQuerySession::new(config, generator(), ScriptedIndex::new(0, false, event_log()));
    let stats = session.run(ChunkedSamplesSource::new(signal(2), 0.5)).await;

    assert_eq!(*errors.lock().unwrap(), vec![true]);
    assert_eq!(stats.hashing_errors, 1);
    assert_eq!(stats.windows, 0);
    assert!(!stats.cancelled);
}

#[tokio::test]
async fn test_stop_handle() {
    let stop = StopHandle::new();
    assert!(!stop.is_cancelled());

    let waiter = stop.clone();
    let task = tokio::spawn(async move { waiter.cancelled().await });
    stop.cancel();
    task.await.unwrap();
    assert!(stop.is_cancelled());

    // Already cancelled resolves immediately
    stop.cancelled().await;
}

#[tokio::test]
async fn test_offline_storage_trait_object() {
    let storage: Arc<dyn OfflineStorage> = Arc::new(InMemoryOfflineStorage::new());
    storage
        .enqueue(Hashes::new(Vec::new(), 1.0, "stream", 0.0))
        .await
        .unwrap();
    assert_eq!(storage.drain().await.unwrap().len(), 1);
}

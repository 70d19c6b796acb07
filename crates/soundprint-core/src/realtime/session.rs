//! The realtime query session
//!
//! A producer task pulls chunks, windows them and hashes each window on the
//! blocking pool. The consumer loop receives the hashes over an unbounded
//! channel, queries the index, stitches candidates across windows and invokes
//! the callbacks. Failed queries back off; while the index has been down for
//! at least the downtime capture period, hashes are parked in offline storage
//! and replayed oldest first once a query succeeds again.

use super::backoff::BackoffPolicy;
use super::continuity::ResultEntryAggregator;
use super::source::RealtimeSource;
use super::RealtimeQueryConfiguration;
use crate::audio::RealtimeAudioSamplesAggregator;
use crate::error::StreamingError;
use crate::fingerprint::{FingerprintGenerator, Hashes};
use crate::matching::{QueryResult, QueryService, ResultEntry};
use crate::stride::Stride;
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, watch};

#[cfg(test)]
mod tests;

/// Cooperative cancellation shared by a session and its callbacks
#[derive(Debug, Clone)]
pub struct StopHandle {
    sender: Arc<watch::Sender<bool>>,
}

impl Default for StopHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl StopHandle {
    pub fn new() -> Self {
        let (sender, _) = watch::channel(false);
        Self {
            sender: Arc::new(sender),
        }
    }

    pub fn cancel(&self) {
        self.sender.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.sender.borrow()
    }

    /// Resolves once `cancel` has been called
    pub async fn cancelled(&self) {
        let mut receiver = self.sender.subscribe();
        let _ = receiver.wait_for(|stopped| *stopped).await;
    }
}

/// Counters reported when a session ends
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SessionStats {
    pub windows: usize,
    pub fingerprints: usize,
    pub queries: usize,
    pub query_errors: usize,
    pub source_errors: usize,
    pub hashing_errors: usize,
    pub offline_resubmitted: usize,
    pub restores: usize,
    pub successes: usize,
    pub did_not_pass: usize,
    pub ongoing: usize,
    pub cancelled: bool,
}

enum SessionEvent {
    Hashes(Hashes),
    Error(StreamingError),
}

pub struct RealtimeQuerySession {
    config: RealtimeQueryConfiguration,
    generator: Arc<FingerprintGenerator>,
    query_service: Arc<dyn QueryService>,
    stop: StopHandle,
    continuity: ResultEntryAggregator,
    failures: u32,
    downtime_since: Option<Instant>,
    origin: String,
    stats: SessionStats,
}

impl RealtimeQuerySession {
    pub fn new(
        config: RealtimeQueryConfiguration,
        generator: Arc<FingerprintGenerator>,
        query_service: Arc<dyn QueryService>,
    ) -> Self {
        let continuity = ResultEntryAggregator::new(config.permitted_gap());
        Self {
            config,
            generator,
            query_service,
            stop: StopHandle::new(),
            continuity,
            failures: 0,
            downtime_since: None,
            origin: String::new(),
            stats: SessionStats::default(),
        }
    }

    /// Handle that stops this session when cancelled
    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    /// Run until the source ends or the session is cancelled
    ///
    /// Streaming errors never end the session; they reach the error callback.
    pub async fn run<S: RealtimeSource + 'static>(mut self, source: S) -> SessionStats {
        let (sender, mut events) = mpsc::unbounded_channel();
        let producer = tokio::spawn(produce(
            source,
            self.generator.clone(),
            self.config.stride(),
            self.config.backoff.clone(),
            sender,
            self.stop.clone(),
        ));
        log::info!(
            "Realtime session started (threshold {}, permitted gap {:.1}s)",
            self.config.threshold_votes(),
            self.config.permitted_gap()
        );

        // Windows parked by an earlier run go out before the first live window
        let buffered = self.drain_offline().await;
        let count = buffered.len();
        self.submit_batch(buffered, count).await;

        loop {
            let event = tokio::select! {
                biased;
                _ = self.stop.cancelled() => break,
                event = events.recv() => event,
            };

            match event {
                Some(SessionEvent::Hashes(hashes)) => {
                    self.stats.windows += 1;
                    self.stats.fingerprints += hashes.len();
                    self.submit(hashes).await;
                }
                Some(SessionEvent::Error(error)) => self.stream_failed(error),
                None => {
                    let remaining = self.continuity.flush();
                    let origin = self.origin.clone();
                    self.complete(remaining, &origin);
                    break;
                }
            }
        }

        if self.stop.is_cancelled() {
            self.stats.cancelled = true;
            producer.abort();
        }
        if let Err(e) = producer.await {
            if !e.is_cancelled() {
                log::error!("Realtime producer died: {}", e);
                self.stats.hashing_errors += 1;
                self.report(&StreamingError::Hashing(e.into()), None);
            }
        }

        log::info!("Realtime session finished: {:?}", self.stats);
        self.stats
    }

    /// Offline storage is in use once the index has been down long enough
    fn capturing(&self) -> bool {
        self.config.offline_storage.is_some()
            && self
                .downtime_since
                .map_or(false, |since| since.elapsed() >= self.config.downtime_capture_period)
    }

    async fn submit(&mut self, hashes: Hashes) {
        if self.capturing() {
            let mut batch = self.drain_offline().await;
            let buffered = batch.len();
            batch.push(hashes);
            self.submit_batch(batch, buffered).await;
            return;
        }

        let result = self.query(&hashes).await;
        if self.stop.is_cancelled() {
            return;
        }
        match result {
            Ok(result) => {
                if self.recovered() {
                    let buffered = self.drain_offline().await;
                    let count = buffered.len();
                    self.submit_batch(buffered, count).await;
                }
                self.dispatch(&hashes, result);
            }
            Err(e) => self.query_failed(e, hashes, Vec::new(), false).await,
        }
    }

    /// Query `batch` in order; on failure the rest goes back to offline storage
    ///
    /// The first `buffered` entries came out of offline storage. They are
    /// counted as resubmitted once their query succeeds and are parked again
    /// if it fails.
    async fn submit_batch(&mut self, batch: Vec<Hashes>, buffered: usize) {
        let mut pending = batch.into_iter().enumerate();
        while let Some((i, hashes)) = pending.next() {
            let result = self.query(&hashes).await;
            if self.stop.is_cancelled() {
                return;
            }
            match result {
                Ok(result) => {
                    if i < buffered {
                        self.stats.offline_resubmitted += 1;
                    }
                    self.recovered();
                    self.dispatch(&hashes, result);
                }
                Err(e) => {
                    let rest = pending.map(|(_, hashes)| hashes).collect();
                    self.query_failed(e, hashes, rest, i < buffered).await;
                    return;
                }
            }
        }
    }

    async fn query(&mut self, hashes: &Hashes) -> anyhow::Result<QueryResult> {
        self.stats.queries += 1;
        tokio::select! {
            result = self.query_service.query(hashes, &self.config.query) => result,
            _ = self.stop.cancelled() => Err(anyhow::anyhow!("session cancelled")),
        }
    }

    async fn drain_offline(&mut self) -> Vec<Hashes> {
        let Some(storage) = self.config.offline_storage.clone() else {
            return Vec::new();
        };
        match storage.drain().await {
            Ok(buffered) => {
                if !buffered.is_empty() {
                    log::info!("Resubmitting {} buffered window(s)", buffered.len());
                }
                buffered
            }
            Err(e) => {
                self.report(&StreamingError::OfflineStorage(e), None);
                Vec::new()
            }
        }
    }

    /// `hashes` is parked when capturing or when it was already buffered;
    /// `rest` is always parked
    async fn query_failed(&mut self, error: anyhow::Error, hashes: Hashes, rest: Vec<Hashes>, buffered: bool) {
        self.failures += 1;
        self.downtime_since.get_or_insert_with(Instant::now);
        self.stats.query_errors += 1;
        self.report(&StreamingError::Index(error), Some(&hashes));

        if let Some(storage) = self.config.offline_storage.clone() {
            let parked = if buffered || self.capturing() {
                std::iter::once(hashes).chain(rest).collect::<Vec<_>>()
            } else {
                rest
            };
            for hashes in parked {
                if let Err(e) = storage.enqueue(hashes).await {
                    self.report(&StreamingError::OfflineStorage(e), None);
                }
            }
        }

        let delay = self.config.backoff.delay(self.failures);
        log::warn!("Query failed ({} in a row), backing off for {:?}", self.failures, delay);
        sleep_unless_cancelled(delay, &self.stop).await;
    }

    fn stream_failed(&mut self, error: StreamingError) {
        match error {
            StreamingError::Source(_) => {
                self.failures += 1;
                self.downtime_since.get_or_insert_with(Instant::now);
                self.stats.source_errors += 1;
            }
            _ => self.stats.hashing_errors += 1,
        }
        self.report(&error, None);
    }

    /// Reset the failure state, firing the restore callback if there was one
    fn recovered(&mut self) -> bool {
        if self.failures == 0 {
            return false;
        }
        log::info!("Recovered after {} failure(s)", self.failures);
        self.failures = 0;
        self.downtime_since = None;
        self.stats.restores += 1;
        if !self.stop.is_cancelled() {
            (self.config.restored_callback)();
        }
        true
    }

    fn report(&self, error: &StreamingError, hashes: Option<&Hashes>) {
        if !self.stop.is_cancelled() {
            (self.config.error_callback)(error, hashes);
        }
    }

    fn dispatch(&mut self, hashes: &Hashes, result: QueryResult) {
        self.origin.clone_from(&result.origin);
        let aggregated = self.continuity.consume(&result, hashes.ends_at());

        for entry in aggregated.ongoing {
            if self.stop.is_cancelled() {
                return;
            }
            if self.config.ongoing_filter.pass(&entry, true) {
                self.stats.ongoing += 1;
                (self.config.ongoing_success_callback)(entry);
            }
        }
        self.complete(aggregated.completed, &result.origin);
    }

    /// Offer completed entries to the result filter
    fn complete(&mut self, entries: Vec<ResultEntry>, origin: &str) {
        if entries.is_empty() || self.stop.is_cancelled() {
            return;
        }

        let (passed, rejected): (Vec<ResultEntry>, Vec<ResultEntry>) = entries
            .into_iter()
            .partition(|entry| self.config.result_filter.pass(entry, false));

        if !passed.is_empty() {
            self.stats.successes += passed.len();
            (self.config.success_callback)(QueryResult::new(origin, passed));
        }
        if !rejected.is_empty() && !self.stop.is_cancelled() {
            self.stats.did_not_pass += rejected.len();
            (self.config.did_not_pass_callback)(QueryResult::new(origin, rejected));
        }
    }
}

/// Pull, window and hash until the source ends, the consumer goes away or
/// the session is cancelled
async fn produce<S: RealtimeSource>(
    mut source: S,
    generator: Arc<FingerprintGenerator>,
    stride: Arc<dyn Stride>,
    backoff: Arc<dyn BackoffPolicy>,
    events: mpsc::UnboundedSender<SessionEvent>,
    stop: StopHandle,
) {
    let mut aggregator =
        RealtimeAudioSamplesAggregator::new(generator.config().samples_per_fingerprint(), stride.clone());
    let mut sequence = 0u32;
    let mut failures = 0u32;

    while !stop.is_cancelled() {
        let next = tokio::select! {
            _ = stop.cancelled() => break,
            next = source.next_chunk() => next,
        };

        let chunk = match next {
            Ok(Some(chunk)) => {
                failures = 0;
                chunk
            }
            Ok(None) => {
                log::info!("Realtime source ended");
                break;
            }
            Err(e) => {
                failures += 1;
                let delay = backoff.delay(failures);
                log::warn!("Realtime source failed ({} in a row), retrying in {:?}", failures, delay);
                if events.send(SessionEvent::Error(StreamingError::Source(e))).is_err()
                    || !sleep_unless_cancelled(delay, &stop).await
                {
                    break;
                }
                continue;
            }
        };

        let window = match aggregator.aggregate(&chunk) {
            Ok(Some(window)) => window,
            Ok(None) => continue,
            Err(e) => {
                if events.send(SessionEvent::Error(StreamingError::Hashing(e.into()))).is_err() {
                    break;
                }
                continue;
            }
        };

        let (generator, stride, first) = (generator.clone(), stride.clone(), sequence);
        let generated =
            tokio::task::spawn_blocking(move || generator.generate(&window, stride.as_ref(), first)).await;
        let event = match generated {
            Ok(Ok(generated)) => {
                sequence = generated.next_sequence;
                SessionEvent::Hashes(generated.hashes)
            }
            Ok(Err(e)) => SessionEvent::Error(StreamingError::Hashing(e.into())),
            Err(e) => SessionEvent::Error(StreamingError::Hashing(e.into())),
        };
        if events.send(event).is_err() {
            break;
        }
    }
}

/// `false` when cancelled before `delay` elapsed
async fn sleep_unless_cancelled(delay: Duration, stop: &StopHandle) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(delay) => true,
        _ = stop.cancelled() => false,
    }
}

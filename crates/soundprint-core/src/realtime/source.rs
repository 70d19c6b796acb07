//! Realtime audio sources
//!
//! `next_chunk` returns `Ok(None)` at end of stream. Errors are transient: the
//! session reports them and pulls again after a backoff delay.

use crate::audio::AudioSamples;
use anyhow::Result;
use async_trait::async_trait;
use std::time::Duration;
use tokio::sync::mpsc;

#[async_trait]
pub trait RealtimeSource: Send {
    async fn next_chunk(&mut self) -> Result<Option<AudioSamples>>;
}

/// Replays a buffer in fixed-size chunks, optionally at playback speed
pub struct ChunkedSamplesSource {
    samples: AudioSamples,
    chunk_len: usize,
    position: usize,
    paced: bool,
}

impl ChunkedSamplesSource {
    pub fn new(samples: AudioSamples, chunk_seconds: f64) -> Self {
        let chunk_len = ((chunk_seconds * samples.sample_rate() as f64) as usize).max(1);
        Self {
            samples,
            chunk_len,
            position: 0,
            paced: false,
        }
    }

    /// Sleep for each chunk's duration before delivering it
    pub fn paced(mut self, paced: bool) -> Self {
        self.paced = paced;
        self
    }
}

#[async_trait]
impl RealtimeSource for ChunkedSamplesSource {
    async fn next_chunk(&mut self) -> Result<Option<AudioSamples>> {
        if self.position >= self.samples.len() {
            return Ok(None);
        }

        let end = (self.position + self.chunk_len).min(self.samples.len());
        let sample_rate = self.samples.sample_rate() as f64;
        let chunk = self.samples.derive(
            &self.samples.samples()[self.position..end],
            self.samples.relative_to() + self.position as f64 / sample_rate,
        );
        self.position = end;

        if self.paced {
            tokio::time::sleep(Duration::from_secs_f64(chunk.duration())).await;
        }
        Ok(Some(chunk))
    }
}

/// Chunks pushed from elsewhere, e.g. a capture thread; ends when all senders drop
pub struct ChannelSource {
    receiver: mpsc::UnboundedReceiver<Result<AudioSamples>>,
}

impl ChannelSource {
    pub fn channel() -> (mpsc::UnboundedSender<Result<AudioSamples>>, Self) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (sender, Self { receiver })
    }
}

#[async_trait]
impl RealtimeSource for ChannelSource {
    async fn next_chunk(&mut self) -> Result<Option<AudioSamples>> {
        match self.receiver.recv().await {
            Some(Ok(chunk)) => Ok(Some(chunk)),
            Some(Err(e)) => Err(e),
            None => Ok(None),
        }
    }
}

//! Strides between consecutive fingerprints

use std::sync::atomic::{AtomicU64, Ordering};

/// Number of samples to advance between the starts of two fingerprints
pub trait Stride: Send + Sync {
    fn next_stride(&self) -> usize;
}

/// Constant stride
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IncrementalStaticStride {
    samples: usize,
}

impl IncrementalStaticStride {
    pub fn new(samples: usize) -> Self {
        Self {
            samples: samples.max(1),
        }
    }
}

impl Stride for IncrementalStaticStride {
    fn next_stride(&self) -> usize {
        self.samples
    }
}

/// Stride drawn uniformly from `[min, max]` with a deterministic generator
///
/// Window tails are sized from a single draw, so chunk-invariant windowing is
/// only exact for static strides.
#[derive(Debug)]
pub struct IncrementalRandomStride {
    min: usize,
    max: usize,
    state: AtomicU64,
}

impl IncrementalRandomStride {
    pub fn new(min: usize, max: usize, seed: u64) -> Self {
        let min = min.max(1);
        Self {
            min,
            max: max.max(min),
            // xorshift state must be non-zero
            state: AtomicU64::new(seed | 1),
        }
    }
}

impl Stride for IncrementalRandomStride {
    fn next_stride(&self) -> usize {
        let mut x = self.state.load(Ordering::Relaxed);
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.state.store(x, Ordering::Relaxed);
        self.min + (x % (self.max - self.min + 1) as u64) as usize
    }
}

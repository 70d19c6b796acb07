//! Delays applied between retries after a streaming error

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Delay before the next retry, `attempt` being the consecutive failure count (1-based)
pub trait BackoffPolicy: Send + Sync {
    fn delay(&self, attempt: u32) -> Duration;
}

/// Same delay for every attempt
#[derive(Debug, Clone, Copy)]
pub struct FixedDelayBackoffPolicy {
    delay: Duration,
}

impl FixedDelayBackoffPolicy {
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }
}

impl BackoffPolicy for FixedDelayBackoffPolicy {
    fn delay(&self, _attempt: u32) -> Duration {
        self.delay
    }
}

/// Exponential delay with additive random jitter
///
/// The base delay doubles per attempt up to `max`. A jitter of up to
/// `jitter × base` is added and the result is capped at `max`. With `jitter`
/// limited to `[0, 1]` the delays never decrease across consecutive attempts.
#[derive(Debug)]
pub struct RandomExponentialBackoffPolicy {
    initial: Duration,
    max: Duration,
    jitter: f64,
    state: AtomicU64,
}

impl RandomExponentialBackoffPolicy {
    pub fn new(initial: Duration, max: Duration, jitter: f64) -> Self {
        Self {
            initial,
            max: max.max(initial),
            jitter: jitter.clamp(0.0, 1.0),
            state: AtomicU64::new(0x9e37_79b9_7f4a_7c15),
        }
    }

    pub fn with_seed(self, seed: u64) -> Self {
        self.state.store(seed | 1, Ordering::Relaxed);
        self
    }

    /// Uniform value in `[0, 1)`
    fn next_unit(&self) -> f64 {
        let mut x = self.state.load(Ordering::Relaxed);
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.state.store(x, Ordering::Relaxed);
        (x >> 11) as f64 / (1u64 << 53) as f64
    }
}

impl Default for RandomExponentialBackoffPolicy {
    fn default() -> Self {
        Self::new(Duration::from_millis(500), Duration::from_secs(30), 0.5)
    }
}

impl BackoffPolicy for RandomExponentialBackoffPolicy {
    fn delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        let base = self
            .initial
            .saturating_mul(1u32 << exponent)
            .min(self.max);
        let jitter = base.mul_f64(self.jitter * self.next_unit());
        (base + jitter).min(self.max)
    }
}

impl<F> BackoffPolicy for F
where
    F: Fn(u32) -> Duration + Send + Sync,
{
    fn delay(&self, attempt: u32) -> Duration {
        self(attempt)
    }
}

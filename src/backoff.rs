//! Fibonacci backoff policy shared by every retry loop.
//!
//! Locks and queues never spin against the store: between attempts they
//! sleep for a duration derived from the attempt counter via the Fibonacci
//! sequence, optionally jittered to spread out competing processes.
//!
//! The policy is a pure function of the attempt number so it can be unit
//! tested without a clock; the actual suspension goes through the [`Sleeper`]
//! trait, which tests replace with a recording no-op implementation.

use std::time::Duration;

use async_trait::async_trait;
use rand::RngExt;

/// Computes the `n`-th Fibonacci number with saturating arithmetic.
///
/// `fibonacci(0) == 0`, `fibonacci(1) == 1`. Saturation matters: retry
/// loops are allowed to run indefinitely (see the lock soft-deadline
/// behavior) and the counter must never overflow into a panic.
pub fn fibonacci(n: u32) -> u64 {
    let (mut a, mut b) = (0u64, 1u64);
    for _ in 0..n {
        let next = a.saturating_add(b);
        a = b;
        b = next;
    }
    a
}

/// Maps an attempt counter to a wait duration.
///
/// The delay for attempt `i` is `base * fibonacci(i)`, capped at `max`.
/// With jitter enabled, a random amount up to half the computed delay is
/// added so that independent processes retrying against the same key do
/// not fall into lockstep.
#[derive(Debug, Clone)]
pub struct BackoffPolicy {
    /// Base unit multiplied by the Fibonacci number for the attempt.
    pub base: Duration,
    /// Upper bound on the computed delay (before jitter).
    pub max: Duration,
    /// Whether to add random jitter on top of the computed delay.
    pub jitter: bool,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_millis(50),
            max: Duration::from_secs(2),
            jitter: true,
        }
    }
}

impl BackoffPolicy {
    /// Creates a policy with the given base unit and cap, no jitter.
    pub fn new(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max,
            jitter: false,
        }
    }

    /// Enables random jitter.
    pub fn with_jitter(mut self) -> Self {
        self.jitter = true;
        self
    }

    /// Returns the wait duration for the given attempt counter.
    ///
    /// Attempt numbering starts at 1; `delay(0)` is zero.
    pub fn delay(&self, attempt: u32) -> Duration {
        let steps = fibonacci(attempt);
        let base_ms = self.base.as_millis() as u64;
        let delay_ms = base_ms
            .saturating_mul(steps)
            .min(self.max.as_millis() as u64);

        if self.jitter && delay_ms > 0 {
            // Created per call to avoid holding a non-Send rng across await
            // points in the callers.
            let jitter_ms = rand::rng().random_range(0..=delay_ms / 2);
            Duration::from_millis(delay_ms + jitter_ms)
        } else {
            Duration::from_millis(delay_ms)
        }
    }
}

/// Suspension source for retry loops.
///
/// Production code uses [`TokioSleeper`]; tests inject an implementation
/// that records requested durations and returns immediately, so a loop
/// that would take minutes of wall-clock time runs instantly.
#[async_trait]
pub trait Sleeper: Send + Sync {
    /// Suspends the calling task for the given duration.
    async fn sleep(&self, duration: Duration);
}

/// Default [`Sleeper`] backed by `tokio::time::sleep`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

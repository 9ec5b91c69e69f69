//! Distributed mutual-exclusion locks over shared store primitives.
//!
//! Independent processes serialize access to a named resource purely
//! through one store key (`"Lock:" + name`); they never talk to each
//! other. Three strategies trade consistency against throughput:
//!
//! - **SimpleLock**: optimistic conditional create plus a confirmation
//!   re-read. Fast, but two callers can briefly both believe they hold
//!   the lock. Documented, not fixed.
//! - **StrictLock**: one transaction combining get-and-replace with the
//!   expiry. The initial "is it free" read is a separate round trip, so
//!   this is still weaker than a full compare-and-swap.
//! - **RigorousLock**: watch-then-conditional-commit. The store aborts
//!   the whole write if the key changed since the read, giving at most
//!   one winner per commit round.
//!
//! Ownership is proven solely by an opaque random identifier stored as
//! the key's value; release resets the value to an `UNLOCKED` sentinel
//! and a store-side expiry reclaims locks whose owners died.
//!
//! # Example
//!
//! ```rust,ignore
//! use redcoord::lock::{LockRegistry, LockStrategy};
//!
//! let registry = LockRegistry::new(store);
//! let lock = registry.get(LockStrategy::Rigorous, "invoice-42")?;
//! if let Some(id) = lock.lock().await {
//!     // ... critical section ...
//!     lock.unlock(&id).await;
//! }
//! ```

pub mod registry;
pub mod rigorous;
pub mod simple;
pub mod strict;

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::backoff::{BackoffPolicy, Sleeper, TokioSleeper};
use crate::store::{StoreBackend, StoreError};

pub use registry::LockRegistry;
pub use rigorous::RigorousLock;
pub use simple::SimpleLock;
pub use strict::StrictLock;

/// Store key prefix for lock keys.
pub const LOCK_KEY_PREFIX: &str = "Lock:";

/// Sentinel value marking a released lock.
///
/// A released key keeps existing with this value (and no expiry), which
/// is what routes SimpleLock's re-acquisition through its persistent-key
/// claim path.
pub const UNLOCKED: &str = "UNLOCKED";

/// Default time to keep retrying acquisition before the soft deadline
/// fires.
pub const DEFAULT_ACQUIRE_TIMEOUT: Duration = Duration::from_secs(5);

/// Default store-side expiry applied to a held lock.
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(300);

/// Default number of concurrent local acquisition attempts allowed per
/// Strict/Rigorous lock instance.
pub const DEFAULT_ATTEMPT_PERMITS: usize = 5;

/// Errors raised synchronously by lock construction.
///
/// Store-level failures never surface here; public lock operations
/// degrade to `None`/`false` instead.
#[derive(Debug, Error)]
pub enum LockError {
    /// Lock names must be non-empty (they become store key suffixes).
    #[error("lock name must not be empty")]
    EmptyName,
}

/// Whether exceeding the acquire timeout stops the retry loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeadlineMode {
    /// Log a warning when the timeout elapses but keep retrying. This is
    /// the historical behavior and the default.
    #[default]
    Soft,
    /// Give up and return `None` once the timeout elapses.
    Hard,
}

/// Per-instance lock configuration.
#[derive(Debug, Clone)]
pub struct LockConfig {
    /// Default acquire timeout used by [`DistributedLock::lock`].
    pub acquire_timeout: Duration,
    /// Default store-side expiry for a held lock; `None` means the key
    /// never expires and a crashed owner holds the lock until someone
    /// reclaims it.
    pub lock_timeout: Option<Duration>,
    /// Soft (log-only) or hard deadline enforcement.
    pub deadline: DeadlineMode,
    /// Concurrent local attempt cap for Strict/Rigorous strategies. This
    /// bounds connection usage, not cross-process correctness.
    pub attempt_permits: usize,
    /// Backoff between acquisition attempts.
    pub backoff: BackoffPolicy,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            acquire_timeout: DEFAULT_ACQUIRE_TIMEOUT,
            lock_timeout: Some(DEFAULT_LOCK_TIMEOUT),
            deadline: DeadlineMode::Soft,
            attempt_permits: DEFAULT_ATTEMPT_PERMITS,
            backoff: BackoffPolicy::default(),
        }
    }
}

impl LockConfig {
    /// Sets the default acquire timeout.
    pub fn with_acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout = timeout;
        self
    }

    /// Sets the default lock expiry (`None` disables expiry).
    pub fn with_lock_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.lock_timeout = timeout;
        self
    }

    /// Sets the deadline enforcement mode.
    pub fn with_deadline(mut self, mode: DeadlineMode) -> Self {
        self.deadline = mode;
        self
    }

    /// Sets the concurrent local attempt cap.
    pub fn with_attempt_permits(mut self, permits: usize) -> Self {
        self.attempt_permits = permits;
        self
    }

    /// Sets the backoff policy.
    pub fn with_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = backoff;
        self
    }
}

/// Result of a successful acquisition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Acquisition {
    /// Opaque identifier proving ownership; required to unlock.
    pub id: String,
    /// Whether the acquire timeout elapsed before the lock was won (only
    /// possible in [`DeadlineMode::Soft`]).
    pub soft_deadline_exceeded: bool,
}

/// The lock strategies available through the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LockStrategy {
    /// Optimistic, non-transactional; weakest guarantee, cheapest.
    Simple,
    /// Single-transaction check-and-set; bounded local concurrency.
    Strict,
    /// Watch-based conditional commit; at most one winner per round.
    Rigorous,
}

impl fmt::Display for LockStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            LockStrategy::Simple => "simple",
            LockStrategy::Strict => "strict",
            LockStrategy::Rigorous => "rigorous",
        };
        f.write_str(label)
    }
}

/// Common contract shared by every lock strategy.
#[async_trait]
pub trait DistributedLock: Send + Sync {
    /// Acquires the lock with the instance's configured timeouts,
    /// returning the owner identifier.
    ///
    /// Blocks (with Fibonacci backoff between attempts) until the lock is
    /// won. Returns `None` if the store is unreachable, or — in hard
    /// deadline mode only — when the acquire timeout elapses.
    async fn lock(&self) -> Option<String>;

    /// Acquires the lock with explicit timeouts. `lock_timeout` of `None`
    /// stores the key without expiry.
    async fn lock_with(
        &self,
        acquire_timeout: Duration,
        lock_timeout: Option<Duration>,
    ) -> Option<Acquisition>;

    /// Releases the lock if `id` still owns it. A stale or foreign
    /// identifier is a no-op returning `false`.
    async fn unlock(&self, id: &str) -> bool;

    /// Whether `id` currently owns the lock.
    async fn is_locking(&self, id: &str) -> bool;

    /// The lock's name (without the store key prefix).
    fn name(&self) -> &str;
}

/// One store-level acquisition attempt, implemented per strategy.
#[async_trait]
pub(crate) trait LockAttempt: Send + Sync {
    async fn try_acquire(
        &self,
        id: &str,
        lock_timeout: Option<Duration>,
    ) -> Result<bool, StoreError>;
}

/// Whether a stored value means the lock is free.
///
/// A missing key and the sentinel both count; anything else is a live
/// owner identifier. The signature is a plain `fn` so it can ride through
/// [`StoreBackend::set_if_allowed`].
pub(crate) fn is_unlocked(value: Option<&str>) -> bool {
    match value {
        None => true,
        Some(v) => v == UNLOCKED,
    }
}

/// State and behavior shared by all strategies: the key, the retry loop,
/// release and inspection.
pub(crate) struct LockCore {
    name: String,
    key: String,
    store: Arc<dyn StoreBackend>,
    config: LockConfig,
    sleeper: Arc<dyn Sleeper>,
}

impl LockCore {
    pub(crate) fn new(
        store: Arc<dyn StoreBackend>,
        name: &str,
        config: LockConfig,
    ) -> Result<Self, LockError> {
        if name.is_empty() {
            return Err(LockError::EmptyName);
        }
        Ok(Self {
            name: name.to_string(),
            key: format!("{LOCK_KEY_PREFIX}{name}"),
            store,
            config,
            sleeper: Arc::new(TokioSleeper),
        })
    }

    /// Replaces the sleep source so callers (and tests) can control how
    /// backoff waits are served.
    pub(crate) fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn key(&self) -> &str {
        &self.key
    }

    pub(crate) fn store(&self) -> &Arc<dyn StoreBackend> {
        &self.store
    }

    pub(crate) fn config(&self) -> &LockConfig {
        &self.config
    }

    /// Retry loop shared by every strategy.
    ///
    /// Exceeding `acquire_timeout` in soft mode logs one warning and keeps
    /// going; the eventual acquisition carries the flag. Store failures
    /// end the loop immediately with `None`.
    pub(crate) async fn acquire(
        &self,
        protocol: &dyn LockAttempt,
        acquire_timeout: Duration,
        lock_timeout: Option<Duration>,
    ) -> Option<Acquisition> {
        let id = Uuid::new_v4().simple().to_string();
        let deadline = Instant::now() + acquire_timeout;
        let mut attempt: u32 = 0;
        let mut soft_deadline_exceeded = false;

        loop {
            match protocol.try_acquire(&id, lock_timeout).await {
                Ok(true) => {
                    debug!(name = %self.name, attempt, "lock acquired");
                    return Some(Acquisition {
                        id,
                        soft_deadline_exceeded,
                    });
                }
                Ok(false) => {}
                Err(error) => {
                    warn!(name = %self.name, %error, "store failure during lock acquisition");
                    return None;
                }
            }

            if Instant::now() >= deadline {
                match self.config.deadline {
                    DeadlineMode::Hard => {
                        debug!(name = %self.name, ?acquire_timeout, "acquire deadline reached");
                        return None;
                    }
                    DeadlineMode::Soft => {
                        if !soft_deadline_exceeded {
                            warn!(
                                name = %self.name,
                                ?acquire_timeout,
                                "lock acquisition exceeded its timeout, still retrying"
                            );
                            soft_deadline_exceeded = true;
                        }
                    }
                }
            }

            attempt = attempt.saturating_add(1);
            self.sleeper.sleep(self.config.backoff.delay(attempt)).await;
        }
    }

    /// Releases the lock if `id` still owns it.
    pub(crate) async fn unlock(&self, id: &str) -> bool {
        match self.store.get(&self.key).await {
            Ok(Some(current)) if current == id => {
                match self.store.set(&self.key, UNLOCKED).await {
                    Ok(()) => {
                        debug!(name = %self.name, "lock released");
                        true
                    }
                    Err(error) => {
                        warn!(name = %self.name, %error, "store failure during unlock");
                        false
                    }
                }
            }
            Ok(_) => false,
            Err(error) => {
                warn!(name = %self.name, %error, "store failure during unlock");
                false
            }
        }
    }

    /// Whether `id` currently owns the lock.
    pub(crate) async fn is_locking(&self, id: &str) -> bool {
        match self.store.get(&self.key).await {
            Ok(Some(current)) => current == id,
            Ok(None) => false,
            Err(error) => {
                warn!(name = %self.name, %error, "store failure during ownership check");
                false
            }
        }
    }
}

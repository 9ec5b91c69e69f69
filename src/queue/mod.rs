//! Distributed priority work queues over shared store primitives.
//!
//! Four encodings trade priority fidelity against structural simplicity:
//!
//! - **SimpleFifoQueue**: one list, strict FIFO, no priorities.
//! - **SimplePriorityQueue**: two lists ("high" and "low"); the high tier
//!   always drains first, FIFO within a tier.
//! - **RoughPriorityQueue**: adjacent priority pairs share one bucket
//!   list; higher buckets drain first, even priorities are LIFO inside
//!   their bucket, odd priorities FIFO. Buckets created by other
//!   processes become visible on the next key scan (eventual discovery).
//! - **PerfectPriorityQueue**: one sorted set scored by priority. The
//!   set de-duplicates by value, so the queue holds distinct values, not
//!   a multiset.
//!
//! Entries are serialized to JSON strings; the payload type is otherwise
//! opaque to the queue. `dequeue` blocks until an item arrives — forever
//! by default, or until the configured block timeout elapses.
//!
//! # Example
//!
//! ```rust,ignore
//! use redcoord::queue::{QueueRegistry, QueueStrategy};
//!
//! let registry: QueueRegistry<String> = QueueRegistry::new(store);
//! let queue = registry.get(QueueStrategy::SimplePriority, "jobs")?;
//! queue.enqueue_with_priority(1, &["urgent".to_string()]).await?;
//! queue.enqueue(&["routine".to_string()]).await;
//! assert_eq!(queue.dequeue().await.as_deref(), Some("urgent"));
//! ```

pub mod perfect_priority;
pub mod registry;
pub mod rough_priority;
pub mod simple_fifo;
pub mod simple_priority;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;
use tracing::warn;

use crate::backoff::{BackoffPolicy, Sleeper, TokioSleeper};
use crate::store::StoreBackend;

pub use perfect_priority::PerfectPriorityQueue;
pub use registry::QueueRegistry;
pub use rough_priority::RoughPriorityQueue;
pub use simple_fifo::SimpleFifoQueue;
pub use simple_priority::SimplePriorityQueue;

/// Store key prefix for queue keys.
pub const QUEUE_KEY_PREFIX: &str = "Queue:";

/// Errors raised synchronously by queue construction or misuse.
///
/// Store-level failures never surface here; public queue operations
/// degrade to `false`/`None`/`-1` instead.
#[derive(Debug, Error)]
pub enum QueueError {
    /// Queue names must be non-empty (they become store key suffixes).
    #[error("queue name must not be empty")]
    EmptyName,

    /// The strategy does not support priority enqueue.
    #[error("strategy '{strategy}' does not support priorities")]
    PriorityUnsupported {
        /// The strategy the call was made against.
        strategy: QueueStrategy,
    },
}

/// The queue strategies available through the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueueStrategy {
    /// Single list, strict FIFO, priorities rejected.
    SimpleFifo,
    /// Two tiers; high drains before low.
    SimplePriority,
    /// Bucketed priorities with eventual bucket discovery.
    RoughPriority,
    /// Sorted set scored by priority; values are distinct.
    PerfectPriority,
}

impl fmt::Display for QueueStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            QueueStrategy::SimpleFifo => "simple-fifo",
            QueueStrategy::SimplePriority => "simple-priority",
            QueueStrategy::RoughPriority => "rough-priority",
            QueueStrategy::PerfectPriority => "perfect-priority",
        };
        f.write_str(label)
    }
}

/// Per-instance queue configuration.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// How long `dequeue` waits for an item. `None` (the default) blocks
    /// forever, matching the historical behavior.
    pub block_timeout: Option<Duration>,
    /// Backoff between empty-poll attempts where the strategy polls
    /// rather than blocks (the sorted-set encoding).
    pub backoff: BackoffPolicy,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            block_timeout: None,
            backoff: BackoffPolicy::default(),
        }
    }
}

impl QueueConfig {
    /// Sets a finite wait for `dequeue` (`None` restores block-forever).
    pub fn with_block_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.block_timeout = timeout;
        self
    }

    /// Sets the backoff policy for polling strategies.
    pub fn with_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = backoff;
        self
    }
}

/// Common contract shared by every queue strategy.
///
/// Store failures are logged and converted to conservative return values
/// (`false`/`None`/`-1`); only strategy misuse surfaces as an error.
#[async_trait]
pub trait WorkQueue<T>: Send + Sync
where
    T: Serialize + DeserializeOwned + Send + Sync,
{
    /// Enqueues the members at the default (lowest) priority,
    /// all-or-nothing over the batch.
    async fn enqueue(&self, members: &[T]) -> bool;

    /// Enqueues the members at the given priority.
    ///
    /// # Errors
    ///
    /// Returns `QueueError::PriorityUnsupported` on strategies without a
    /// priority dimension.
    async fn enqueue_with_priority(
        &self,
        priority: i64,
        members: &[T],
    ) -> Result<bool, QueueError>;

    /// Removes and returns the next item, blocking until one is
    /// available or the configured block timeout elapses.
    async fn dequeue(&self) -> Option<T>;

    /// Returns the next item without removing it.
    async fn top(&self) -> Option<T>;

    /// Number of queued items; `-1` when the store is unreachable.
    async fn size(&self) -> i64;

    /// Whether the queue is empty (store failures count as non-empty to
    /// stay conservative).
    async fn is_empty(&self) -> bool {
        self.size().await == 0
    }

    /// Removes the backing keys. Idempotent; `true` on success even when
    /// the queue was already empty.
    async fn clear(&self) -> bool;

    /// The queue's name (without the store key prefix).
    fn name(&self) -> &str;
}

/// State shared by all strategies: name, store handle, config, sleep
/// source, and the serialization boundary.
pub(crate) struct QueueCore {
    name: String,
    store: Arc<dyn StoreBackend>,
    config: QueueConfig,
    sleeper: Arc<dyn Sleeper>,
}

impl QueueCore {
    pub(crate) fn new(
        store: Arc<dyn StoreBackend>,
        name: &str,
        config: QueueConfig,
    ) -> Result<Self, QueueError> {
        if name.is_empty() {
            return Err(QueueError::EmptyName);
        }
        Ok(Self {
            name: name.to_string(),
            store,
            config,
            sleeper: Arc::new(TokioSleeper),
        })
    }

    pub(crate) fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn store(&self) -> &Arc<dyn StoreBackend> {
        &self.store
    }

    pub(crate) fn config(&self) -> &QueueConfig {
        &self.config
    }

    pub(crate) fn sleeper(&self) -> &Arc<dyn Sleeper> {
        &self.sleeper
    }

    /// Serializes a batch; `None` (with a warning) if any member fails,
    /// keeping the batch all-or-nothing.
    pub(crate) fn encode<T: Serialize>(&self, members: &[T]) -> Option<Vec<String>> {
        let encoded: Result<Vec<String>, _> =
            members.iter().map(serde_json::to_string).collect();
        match encoded {
            Ok(encoded) => Some(encoded),
            Err(error) => {
                warn!(queue = %self.name, %error, "failed to serialize enqueue batch");
                None
            }
        }
    }

    /// Deserializes one payload; `None` (with a warning) on garbage.
    pub(crate) fn decode<T: DeserializeOwned>(&self, payload: &str) -> Option<T> {
        match serde_json::from_str(payload) {
            Ok(value) => Some(value),
            Err(error) => {
                warn!(queue = %self.name, %error, "failed to deserialize queue entry");
                None
            }
        }
    }
}

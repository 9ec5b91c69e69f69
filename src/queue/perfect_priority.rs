//! Sorted-set priority queue with exact ordering.
//!
//! One sorted structure holds every entry, scored by its priority;
//! members without an explicit priority get the minimum possible score.
//! Because the structure de-duplicates by member value, enqueueing an
//! already-present value moves its score instead of adding a second
//! entry — the queue is a set of distinct values, not a multiset.
//!
//! Dequeue emulates an atomic pop-max: a transaction reads the
//! highest-scored member and removes the highest rank in one round trip,
//! retrying with backoff while the queue is empty. The pair is atomic
//! against concurrent dequeues but not against ad-hoc removals issued by
//! third parties; this is best-effort, not a correctness guarantee.

use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::warn;

use crate::backoff::Sleeper;
use crate::store::StoreBackend;

use super::{QueueConfig, QueueCore, QueueError, WorkQueue, QUEUE_KEY_PREFIX};

/// Score assigned to members enqueued without an explicit priority.
const DEFAULT_SCORE: f64 = f64::MIN;

/// Exact priority queue over one sorted-set key.
pub struct PerfectPriorityQueue<T> {
    core: QueueCore,
    key: String,
    _payload: PhantomData<fn() -> T>,
}

impl<T> PerfectPriorityQueue<T> {
    /// Creates a queue handle for `name`.
    ///
    /// # Errors
    ///
    /// Returns `QueueError::EmptyName` for an empty name.
    pub fn new(
        store: Arc<dyn StoreBackend>,
        name: &str,
        config: QueueConfig,
    ) -> Result<Self, QueueError> {
        Ok(Self {
            core: QueueCore::new(store, name, config)?,
            key: format!("{QUEUE_KEY_PREFIX}{name}"),
            _payload: PhantomData,
        })
    }

    /// Replaces the backoff sleep source (useful in tests to avoid
    /// wall-clock delays while polling an empty queue).
    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.core = self.core.with_sleeper(sleeper);
        self
    }

    async fn insert(&self, score: f64, members: &[T]) -> bool
    where
        T: Serialize,
    {
        let Some(encoded) = self.core.encode(members) else {
            return false;
        };
        let entries: Vec<(String, f64)> =
            encoded.into_iter().map(|member| (member, score)).collect();
        match self.core.store().sorted_insert(&self.key, &entries).await {
            Ok(()) => true,
            Err(error) => {
                warn!(queue = %self.core.name(), %error, "enqueue failed");
                false
            }
        }
    }
}

#[async_trait]
impl<T> WorkQueue<T> for PerfectPriorityQueue<T>
where
    T: Serialize + DeserializeOwned + Send + Sync,
{
    async fn enqueue(&self, members: &[T]) -> bool {
        self.insert(DEFAULT_SCORE, members).await
    }

    async fn enqueue_with_priority(
        &self,
        priority: i64,
        members: &[T],
    ) -> Result<bool, QueueError> {
        Ok(self.insert(priority as f64, members).await)
    }

    async fn dequeue(&self) -> Option<T> {
        let deadline = self
            .core
            .config()
            .block_timeout
            .map(|timeout| Instant::now() + timeout);
        let mut attempt: u32 = 0;

        loop {
            match self.core.store().sorted_pop_max(&self.key).await {
                Ok(Some(payload)) => return self.core.decode(&payload),
                Ok(None) => {}
                Err(error) => {
                    warn!(queue = %self.core.name(), %error, "dequeue failed");
                    return None;
                }
            }

            if let Some(deadline) = deadline {
                if Instant::now() >= deadline {
                    return None;
                }
            }

            attempt = attempt.saturating_add(1);
            self.core
                .sleeper()
                .sleep(self.core.config().backoff.delay(attempt))
                .await;
        }
    }

    async fn top(&self) -> Option<T> {
        match self.core.store().sorted_peek_max(&self.key).await {
            Ok(Some((payload, _score))) => self.core.decode(&payload),
            Ok(None) => None,
            Err(error) => {
                warn!(queue = %self.core.name(), %error, "peek failed");
                None
            }
        }
    }

    async fn size(&self) -> i64 {
        match self.core.store().sorted_len(&self.key).await {
            Ok(len) => len,
            Err(error) => {
                warn!(queue = %self.core.name(), %error, "size failed");
                -1
            }
        }
    }

    async fn clear(&self) -> bool {
        match self.core.store().delete(&[self.key.clone()]).await {
            Ok(()) => true,
            Err(error) => {
                warn!(queue = %self.core.name(), %error, "clear failed");
                false
            }
        }
    }

    fn name(&self) -> &str {
        self.core.name()
    }
}

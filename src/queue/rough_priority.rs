//! Bucketed priority queue.
//!
//! The priority space is partitioned so two adjacent priorities share one
//! list key: `bucket = priority / 2` (truncating division). Even
//! priorities push to the list head and therefore drain LIFO within
//! their bucket; odd priorities push to the tail and drain FIFO. Higher
//! buckets always drain first.
//!
//! Bucket keys are discovered by pattern-scanning the store before each
//! dequeue/top/size/clear call and merged into a locally cached
//! descending set. A bucket created by another process after the last
//! scan stays invisible until the next one — eventual discovery is a
//! property of this encoding, not a bug.

use std::collections::BTreeSet;
use std::marker::PhantomData;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, warn};

use crate::store::StoreBackend;

use super::{QueueConfig, QueueCore, QueueError, WorkQueue, QUEUE_KEY_PREFIX};

/// Bucketed priority queue with eventual bucket discovery.
pub struct RoughPriorityQueue<T> {
    core: QueueCore,
    /// Scan pattern covering every bucket key of this queue.
    pattern: String,
    /// Locally known buckets, highest first when iterated in reverse.
    buckets: Mutex<BTreeSet<i64>>,
    _payload: PhantomData<fn() -> T>,
}

impl<T> RoughPriorityQueue<T> {
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
            pattern: format!("{QUEUE_KEY_PREFIX}{name}:*"),
            buckets: Mutex::new(BTreeSet::new()),
            _payload: PhantomData,
        })
    }

    fn key_for(&self, bucket: i64) -> String {
        format!("{QUEUE_KEY_PREFIX}{}:{bucket}", self.core.name())
    }

    fn remember(&self, bucket: i64) {
        self.buckets
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(bucket);
    }

    /// Merges freshly scanned bucket keys into the local cache and
    /// returns the known keys, highest bucket first.
    async fn refresh_buckets(&self) -> Vec<String> {
        match self.core.store().scan_keys(&self.pattern).await {
            Ok(keys) => {
                let prefix = format!("{QUEUE_KEY_PREFIX}{}:", self.core.name());
                let mut known = self.buckets.lock().unwrap_or_else(|e| e.into_inner());
                for key in keys {
                    match key.strip_prefix(&prefix).and_then(|s| s.parse::<i64>().ok()) {
                        Some(bucket) => {
                            known.insert(bucket);
                        }
                        None => {
                            debug!(queue = %self.core.name(), key, "ignoring non-bucket key");
                        }
                    }
                }
                known.iter().rev().map(|b| self.key_for(*b)).collect()
            }
            Err(error) => {
                // Stale knowledge beats none: fall back to the cached set.
                warn!(queue = %self.core.name(), %error, "bucket scan failed");
                let known = self.buckets.lock().unwrap_or_else(|e| e.into_inner());
                known.iter().rev().map(|b| self.key_for(*b)).collect()
            }
        }
    }
}

#[async_trait]
impl<T> WorkQueue<T> for RoughPriorityQueue<T>
where
    T: Serialize + DeserializeOwned + Send + Sync,
{
    async fn enqueue(&self, members: &[T]) -> bool {
        self.enqueue_with_priority(0, members).await.unwrap_or(false)
    }

    async fn enqueue_with_priority(
        &self,
        priority: i64,
        members: &[T],
    ) -> Result<bool, QueueError> {
        let Some(encoded) = self.core.encode(members) else {
            return Ok(false);
        };

        let bucket = priority / 2;
        let key = self.key_for(bucket);
        // Even priorities go to the head (LIFO within the bucket), odd to
        // the tail (FIFO).
        let pushed = if priority % 2 == 0 {
            self.core.store().push_head(&key, &encoded).await
        } else {
            self.core.store().push_tail(&key, &encoded).await
        };

        match pushed {
            Ok(()) => {
                self.remember(bucket);
                Ok(true)
            }
            Err(error) => {
                warn!(queue = %self.core.name(), %error, "enqueue failed");
                Ok(false)
            }
        }
    }

    async fn dequeue(&self) -> Option<T> {
        let mut keys = self.refresh_buckets().await;
        if keys.is_empty() {
            // Nothing discovered yet: wait on the default bucket, which is
            // where plain enqueues land.
            keys.push(self.key_for(0));
        }

        match self
            .core
            .store()
            .pop_head_blocking(&keys, self.core.config().block_timeout)
            .await
        {
            Ok(Some((_, payload))) => self.core.decode(&payload),
            Ok(None) => None,
            Err(error) => {
                warn!(queue = %self.core.name(), %error, "dequeue failed");
                None
            }
        }
    }

    async fn top(&self) -> Option<T> {
        for key in self.refresh_buckets().await {
            match self.core.store().peek(&key, 0).await {
                Ok(Some(payload)) => return self.core.decode(&payload),
                Ok(None) => {}
                Err(error) => {
                    warn!(queue = %self.core.name(), %error, "peek failed");
                    return None;
                }
            }
        }
        None
    }

    async fn size(&self) -> i64 {
        let mut total = 0;
        for key in self.refresh_buckets().await {
            match self.core.store().list_len(&key).await {
                Ok(len) => total += len,
                Err(error) => {
                    warn!(queue = %self.core.name(), %error, "size failed");
                    return -1;
                }
            }
        }
        total
    }

    async fn clear(&self) -> bool {
        let keys = self.refresh_buckets().await;
        match self.core.store().delete(&keys).await {
            Ok(()) => {
                self.buckets
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .clear();
                true
            }
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

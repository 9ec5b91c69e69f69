//! Two-tier priority queue.
//!
//! Positive priorities land in the "high" list, everything else in the
//! "low" list; the blocking multi-key pop always drains high before low,
//! and ordering within either tier is FIFO. The priority integer carries
//! no meaning beyond the high/low split.

use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::warn;

use crate::store::StoreBackend;

use super::{QueueConfig, QueueCore, QueueError, WorkQueue, QUEUE_KEY_PREFIX};

/// Two-list priority queue ("high" drains before "low").
pub struct SimplePriorityQueue<T> {
    core: QueueCore,
    high_key: String,
    low_key: String,
    _payload: PhantomData<fn() -> T>,
}

impl<T> SimplePriorityQueue<T> {
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
            high_key: format!("{QUEUE_KEY_PREFIX}high:{name}"),
            low_key: format!("{QUEUE_KEY_PREFIX}low:{name}"),
            _payload: PhantomData,
        })
    }

    async fn push_tier(&self, key: &str, members: &[T]) -> bool
    where
        T: Serialize,
    {
        let Some(encoded) = self.core.encode(members) else {
            return false;
        };
        match self.core.store().push_head(key, &encoded).await {
            Ok(()) => true,
            Err(error) => {
                warn!(queue = %self.core.name(), %error, "enqueue failed");
                false
            }
        }
    }

    async fn peek_tier(&self, key: &str) -> Option<String> {
        match self.core.store().peek(key, -1).await {
            Ok(value) => value,
            Err(error) => {
                warn!(queue = %self.core.name(), %error, "peek failed");
                None
            }
        }
    }
}

#[async_trait]
impl<T> WorkQueue<T> for SimplePriorityQueue<T>
where
    T: Serialize + DeserializeOwned + Send + Sync,
{
    async fn enqueue(&self, members: &[T]) -> bool {
        self.push_tier(&self.low_key, members).await
    }

    async fn enqueue_with_priority(
        &self,
        priority: i64,
        members: &[T],
    ) -> Result<bool, QueueError> {
        let key = if priority > 0 {
            &self.high_key
        } else {
            &self.low_key
        };
        Ok(self.push_tier(key, members).await)
    }

    async fn dequeue(&self) -> Option<T> {
        // Key order matters: the store checks them in sequence, which is
        // what gives the high tier absolute precedence.
        let keys = [self.high_key.clone(), self.low_key.clone()];
        match self
            .core
            .store()
            .pop_tail_blocking(&keys, self.core.config().block_timeout)
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
        let payload = match self.peek_tier(&self.high_key).await {
            Some(payload) => Some(payload),
            None => self.peek_tier(&self.low_key).await,
        };
        payload.and_then(|p| self.core.decode(&p))
    }

    async fn size(&self) -> i64 {
        let store = self.core.store();
        let high = store.list_len(&self.high_key).await;
        let low = store.list_len(&self.low_key).await;
        match (high, low) {
            (Ok(high), Ok(low)) => high + low,
            (Err(error), _) | (_, Err(error)) => {
                warn!(queue = %self.core.name(), %error, "size failed");
                -1
            }
        }
    }

    async fn clear(&self) -> bool {
        let keys = [self.high_key.clone(), self.low_key.clone()];
        match self.core.store().delete(&keys).await {
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn queue(store: &Arc<MemoryStore>) -> SimplePriorityQueue<String> {
        SimplePriorityQueue::new(
            store.clone() as Arc<dyn StoreBackend>,
            "jobs",
            QueueConfig::default(),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn high_tier_drains_before_low() {
        let store = Arc::new(MemoryStore::new());
        let queue = queue(&store);

        assert!(queue
            .enqueue_with_priority(1, &["hi".into()])
            .await
            .unwrap());
        assert!(queue.enqueue(&["lo".into()]).await);

        assert_eq!(queue.dequeue().await.as_deref(), Some("hi"));
        assert_eq!(queue.dequeue().await.as_deref(), Some("lo"));
    }

    #[tokio::test]
    async fn zero_and_negative_priorities_are_low() {
        let store = Arc::new(MemoryStore::new());
        let queue = queue(&store);

        assert!(queue
            .enqueue_with_priority(0, &["zero".into()])
            .await
            .unwrap());
        assert!(queue
            .enqueue_with_priority(-3, &["neg".into()])
            .await
            .unwrap());
        assert!(queue
            .enqueue_with_priority(7, &["urgent".into()])
            .await
            .unwrap());

        assert_eq!(queue.dequeue().await.as_deref(), Some("urgent"));
        assert_eq!(queue.dequeue().await.as_deref(), Some("zero"));
        assert_eq!(queue.dequeue().await.as_deref(), Some("neg"));
    }

    #[tokio::test]
    async fn fifo_within_a_tier() {
        let store = Arc::new(MemoryStore::new());
        let queue = queue(&store);

        assert!(queue
            .enqueue_with_priority(5, &["first".into(), "second".into()])
            .await
            .unwrap());

        assert_eq!(queue.dequeue().await.as_deref(), Some("first"));
        assert_eq!(queue.dequeue().await.as_deref(), Some("second"));
    }

    #[tokio::test]
    async fn top_prefers_the_high_tier() {
        let store = Arc::new(MemoryStore::new());
        let queue = queue(&store);

        assert!(queue.enqueue(&["lo".into()]).await);
        assert_eq!(queue.top().await.as_deref(), Some("lo"));

        assert!(queue
            .enqueue_with_priority(1, &["hi".into()])
            .await
            .unwrap());
        assert_eq!(queue.top().await.as_deref(), Some("hi"));
        assert_eq!(queue.size().await, 2);
    }

    #[tokio::test]
    async fn clear_removes_both_tiers() {
        let store = Arc::new(MemoryStore::new());
        let queue = queue(&store);

        assert!(queue
            .enqueue_with_priority(1, &["hi".into()])
            .await
            .unwrap());
        assert!(queue.enqueue(&["lo".into()]).await);
        assert!(queue.clear().await);
        assert_eq!(queue.size().await, 0);
    }
}

//! Single-list strict FIFO queue.
//!
//! Enqueue pushes to the head of one list, dequeue blocking-pops from the
//! tail, so items leave in exactly the order they arrived. This strategy
//! has no priority dimension; priority enqueue is rejected.

use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::warn;

use crate::store::StoreBackend;

use super::{QueueConfig, QueueCore, QueueError, QueueStrategy, WorkQueue, QUEUE_KEY_PREFIX};

/// Strict FIFO queue over one list key.
pub struct SimpleFifoQueue<T> {
    core: QueueCore,
    key: String,
    _payload: PhantomData<fn() -> T>,
}

impl<T> SimpleFifoQueue<T> {
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
}

#[async_trait]
impl<T> WorkQueue<T> for SimpleFifoQueue<T>
where
    T: Serialize + DeserializeOwned + Send + Sync,
{
    async fn enqueue(&self, members: &[T]) -> bool {
        let Some(encoded) = self.core.encode(members) else {
            return false;
        };
        match self.core.store().push_head(&self.key, &encoded).await {
            Ok(()) => true,
            Err(error) => {
                warn!(queue = %self.core.name(), %error, "enqueue failed");
                false
            }
        }
    }

    async fn enqueue_with_priority(
        &self,
        _priority: i64,
        _members: &[T],
    ) -> Result<bool, QueueError> {
        Err(QueueError::PriorityUnsupported {
            strategy: QueueStrategy::SimpleFifo,
        })
    }

    async fn dequeue(&self) -> Option<T> {
        let keys = [self.key.clone()];
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
        // The tail is the next element out.
        match self.core.store().peek(&self.key, -1).await {
            Ok(Some(payload)) => self.core.decode(&payload),
            Ok(None) => None,
            Err(error) => {
                warn!(queue = %self.core.name(), %error, "peek failed");
                None
            }
        }
    }

    async fn size(&self) -> i64 {
        match self.core.store().list_len(&self.key).await {
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use std::time::Duration;

    fn fifo(store: &Arc<MemoryStore>) -> SimpleFifoQueue<String> {
        SimpleFifoQueue::new(
            store.clone() as Arc<dyn StoreBackend>,
            "jobs",
            QueueConfig::default(),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn drains_in_arrival_order() {
        let store = Arc::new(MemoryStore::new());
        let queue = fifo(&store);

        assert!(queue.enqueue(&["a".into(), "b".into()]).await);
        assert!(queue.enqueue(&["c".into()]).await);

        assert_eq!(queue.dequeue().await.as_deref(), Some("a"));
        assert_eq!(queue.dequeue().await.as_deref(), Some("b"));
        assert_eq!(queue.dequeue().await.as_deref(), Some("c"));
    }

    #[tokio::test]
    async fn top_peeks_without_removing() {
        let store = Arc::new(MemoryStore::new());
        let queue = fifo(&store);

        assert!(queue.enqueue(&["a".into(), "b".into()]).await);
        assert_eq!(queue.top().await.as_deref(), Some("a"));
        assert_eq!(queue.size().await, 2);
    }

    #[tokio::test]
    async fn priority_enqueue_is_rejected() {
        let store = Arc::new(MemoryStore::new());
        let queue = fifo(&store);

        let err = queue
            .enqueue_with_priority(3, &["a".into()])
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            QueueError::PriorityUnsupported {
                strategy: QueueStrategy::SimpleFifo
            }
        ));
    }

    #[tokio::test]
    async fn clear_is_idempotent() {
        let store = Arc::new(MemoryStore::new());
        let queue = fifo(&store);

        assert!(queue.enqueue(&["a".into()]).await);
        assert!(queue.clear().await);
        assert_eq!(queue.size().await, 0);
        assert!(queue.clear().await, "clearing an empty queue succeeds");
        assert!(queue.is_empty().await);
    }

    #[tokio::test]
    async fn empty_dequeue_times_out_when_configured() {
        let store = Arc::new(MemoryStore::new());
        let queue: SimpleFifoQueue<String> = SimpleFifoQueue::new(
            store as Arc<dyn StoreBackend>,
            "jobs",
            QueueConfig::default().with_block_timeout(Some(Duration::from_millis(20))),
        )
        .unwrap();

        assert_eq!(queue.dequeue().await, None);
    }

    #[tokio::test]
    async fn blocked_dequeue_wakes_on_enqueue() {
        let store = Arc::new(MemoryStore::new());
        let queue = Arc::new(fifo(&store));

        let consumer = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.dequeue().await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(queue.enqueue(&["late".into()]).await);

        assert_eq!(consumer.await.unwrap().as_deref(), Some("late"));
    }
}

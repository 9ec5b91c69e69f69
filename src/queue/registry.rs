//! Flyweight registry handing out one queue instance per (strategy, name).
//!
//! Mirrors the lock registry: an explicit, injectable object with an
//! internal concurrent map rather than process-global state, so tests
//! construct isolated registries per case.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::store::StoreBackend;

use super::{
    PerfectPriorityQueue, QueueConfig, QueueError, QueueStrategy, RoughPriorityQueue,
    SimpleFifoQueue, SimplePriorityQueue, WorkQueue,
};

/// Process-lifetime cache of queue instances for payload type `T`.
pub struct QueueRegistry<T> {
    store: Arc<dyn StoreBackend>,
    config: QueueConfig,
    queues: Mutex<HashMap<(QueueStrategy, String), Arc<dyn WorkQueue<T>>>>,
}

impl<T> QueueRegistry<T>
where
    T: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    /// Creates a registry with default queue configuration.
    pub fn new(store: Arc<dyn StoreBackend>) -> Self {
        Self::with_config(store, QueueConfig::default())
    }

    /// Creates a registry whose queues share the given configuration.
    pub fn with_config(store: Arc<dyn StoreBackend>, config: QueueConfig) -> Self {
        Self {
            store,
            config,
            queues: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the queue for `(strategy, name)`, constructing it on first
    /// use and the cached flyweight afterwards.
    ///
    /// # Errors
    ///
    /// Returns `QueueError::EmptyName` for an empty name.
    pub fn get(
        &self,
        strategy: QueueStrategy,
        name: &str,
    ) -> Result<Arc<dyn WorkQueue<T>>, QueueError> {
        if name.is_empty() {
            return Err(QueueError::EmptyName);
        }

        let mut queues = self.queues.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(existing) = queues.get(&(strategy, name.to_string())) {
            return Ok(existing.clone());
        }

        let queue: Arc<dyn WorkQueue<T>> = match strategy {
            QueueStrategy::SimpleFifo => Arc::new(SimpleFifoQueue::new(
                self.store.clone(),
                name,
                self.config.clone(),
            )?),
            QueueStrategy::SimplePriority => Arc::new(SimplePriorityQueue::new(
                self.store.clone(),
                name,
                self.config.clone(),
            )?),
            QueueStrategy::RoughPriority => Arc::new(RoughPriorityQueue::new(
                self.store.clone(),
                name,
                self.config.clone(),
            )?),
            QueueStrategy::PerfectPriority => Arc::new(PerfectPriorityQueue::new(
                self.store.clone(),
                name,
                self.config.clone(),
            )?),
        };
        queues.insert((strategy, name.to_string()), queue.clone());
        Ok(queue)
    }

    /// Number of cached queue instances.
    pub fn len(&self) -> usize {
        self.queues.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Whether the registry has constructed any queues yet.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

//! Flyweight registry handing out one lock instance per (strategy, name).
//!
//! Lock handles are process-lifetime objects; constructing a fresh one
//! per call-site would multiply semaphores and configuration. The
//! registry caches instances in a concurrent map and returns shared
//! handles. It is an explicit, injectable object rather than process
//! globals, so tests construct isolated registries per case.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::store::StoreBackend;

use super::{
    DistributedLock, LockConfig, LockError, LockStrategy, RigorousLock, SimpleLock, StrictLock,
};

/// Process-lifetime cache of lock instances.
pub struct LockRegistry {
    store: Arc<dyn StoreBackend>,
    config: LockConfig,
    locks: Mutex<HashMap<(LockStrategy, String), Arc<dyn DistributedLock>>>,
}

impl LockRegistry {
    /// Creates a registry with default lock configuration.
    pub fn new(store: Arc<dyn StoreBackend>) -> Self {
        Self::with_config(store, LockConfig::default())
    }

    /// Creates a registry whose locks share the given configuration.
    pub fn with_config(store: Arc<dyn StoreBackend>, config: LockConfig) -> Self {
        Self {
            store,
            config,
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the lock for `(strategy, name)`, constructing it on first
    /// use and the cached flyweight afterwards.
    ///
    /// # Errors
    ///
    /// Returns `LockError::EmptyName` for an empty name.
    pub fn get(
        &self,
        strategy: LockStrategy,
        name: &str,
    ) -> Result<Arc<dyn DistributedLock>, LockError> {
        if name.is_empty() {
            return Err(LockError::EmptyName);
        }

        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(existing) = locks.get(&(strategy, name.to_string())) {
            return Ok(existing.clone());
        }

        let lock: Arc<dyn DistributedLock> = match strategy {
            LockStrategy::Simple => Arc::new(SimpleLock::new(
                self.store.clone(),
                name,
                self.config.clone(),
            )?),
            LockStrategy::Strict => Arc::new(StrictLock::new(
                self.store.clone(),
                name,
                self.config.clone(),
            )?),
            LockStrategy::Rigorous => Arc::new(RigorousLock::new(
                self.store.clone(),
                name,
                self.config.clone(),
            )?),
        };
        locks.insert((strategy, name.to_string()), lock.clone());
        Ok(lock)
    }

    /// Number of cached lock instances.
    pub fn len(&self) -> usize {
        self.locks.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Whether the registry has constructed any locks yet.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn registry() -> LockRegistry {
        LockRegistry::new(Arc::new(MemoryStore::new()))
    }

    #[test]
    fn same_strategy_and_name_share_one_instance() {
        let registry = registry();
        let a = registry.get(LockStrategy::Rigorous, "res").unwrap();
        let b = registry.get(LockStrategy::Rigorous, "res").unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn different_strategies_get_distinct_instances() {
        let registry = registry();
        let simple = registry.get(LockStrategy::Simple, "res").unwrap();
        let strict = registry.get(LockStrategy::Strict, "res").unwrap();
        assert!(!Arc::ptr_eq(&simple, &strict));
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn different_names_get_distinct_instances() {
        let registry = registry();
        let a = registry.get(LockStrategy::Simple, "a").unwrap();
        let b = registry.get(LockStrategy::Simple, "b").unwrap();
        assert!(!Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn empty_name_is_rejected() {
        let registry = registry();
        assert!(matches!(
            registry.get(LockStrategy::Simple, ""),
            Err(LockError::EmptyName)
        ));
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn registry_lock_round_trips() {
        let registry = registry();
        let lock = registry.get(LockStrategy::Strict, "res").unwrap();
        let id = lock.lock().await.expect("should acquire");
        assert!(lock.unlock(&id).await);
    }
}

//! Single-transaction check-and-set lock.
//!
//! One read decides whether the lock looks free; a single transaction
//! then swaps in the caller's identifier and applies the expiry, and the
//! attempt only counts as won if the atomically-read previous value was
//! the unlocked sentinel. The read and the transaction are two separate
//! round trips, which is what makes this weaker than a full
//! compare-and-swap; the gap is documented and intentionally kept.
//!
//! A counting semaphore caps how many local callers may be inside the
//! attempt loop at once, bounding store connection usage. It says nothing
//! about other processes.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Semaphore;

use crate::store::{StoreBackend, StoreError};

use super::{
    is_unlocked, Acquisition, DistributedLock, LockAttempt, LockConfig, LockCore, LockError,
};

/// Check-and-set lock built on a `GETSET` + `EXPIRE` transaction.
pub struct StrictLock {
    core: LockCore,
    attempts: Semaphore,
}

impl StrictLock {
    /// Creates a lock handle for `name`.
    ///
    /// # Errors
    ///
    /// Returns `LockError::EmptyName` for an empty name.
    pub fn new(
        store: Arc<dyn StoreBackend>,
        name: &str,
        config: LockConfig,
    ) -> Result<Self, LockError> {
        let permits = config.attempt_permits;
        Ok(Self {
            core: LockCore::new(store, name, config)?,
            attempts: Semaphore::new(permits),
        })
    }

    /// Replaces the backoff sleep source (useful in tests to avoid
    /// wall-clock delays).
    pub fn with_sleeper(mut self, sleeper: Arc<dyn crate::backoff::Sleeper>) -> Self {
        self.core = self.core.with_sleeper(sleeper);
        self
    }
}

#[async_trait]
impl LockAttempt for StrictLock {
    async fn try_acquire(
        &self,
        id: &str,
        lock_timeout: Option<Duration>,
    ) -> Result<bool, StoreError> {
        let store = self.core.store();
        let key = self.core.key();

        let current = store.get(key).await?;
        if !is_unlocked(current.as_deref()) {
            return Ok(false);
        }

        // Swap our identifier in and set the expiry in one transaction; the
        // atomically-returned old value is the real arbiter.
        let old = match lock_timeout {
            Some(timeout) => store.get_and_replace_with_expiry(key, id, timeout).await?,
            None => store.get_and_replace(key, id).await?,
        };
        Ok(is_unlocked(old.as_deref()))
    }
}

#[async_trait]
impl DistributedLock for StrictLock {
    async fn lock(&self) -> Option<String> {
        let config = self.core.config();
        self.lock_with(config.acquire_timeout, config.lock_timeout)
            .await
            .map(|acquisition| acquisition.id)
    }

    async fn lock_with(
        &self,
        acquire_timeout: Duration,
        lock_timeout: Option<Duration>,
    ) -> Option<Acquisition> {
        let _permit = self.attempts.acquire().await.ok()?;
        self.core.acquire(self, acquire_timeout, lock_timeout).await
    }

    async fn unlock(&self, id: &str) -> bool {
        self.core.unlock(id).await
    }

    async fn is_locking(&self, id: &str) -> bool {
        self.core.is_locking(id).await
    }

    fn name(&self) -> &str {
        self.core.name()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lock::DeadlineMode;
    use crate::store::MemoryStore;

    fn strict(store: &Arc<MemoryStore>, config: LockConfig) -> StrictLock {
        StrictLock::new(store.clone() as Arc<dyn StoreBackend>, "res", config).unwrap()
    }

    #[tokio::test]
    async fn acquires_when_free_and_rejects_when_held() {
        let store = Arc::new(MemoryStore::new());
        let lock = strict(&store, LockConfig::default());

        let id = lock.lock().await.expect("should acquire");
        assert!(lock.is_locking(&id).await);

        // A second handle on the same name cannot win while held.
        let contender = strict(
            &store,
            LockConfig::default()
                .with_deadline(DeadlineMode::Hard)
                .with_acquire_timeout(Duration::from_millis(10)),
        );
        assert!(contender
            .lock_with(Duration::from_millis(10), None)
            .await
            .is_none());

        assert!(lock.unlock(&id).await);
        assert!(contender.lock().await.is_some());
    }

    #[tokio::test]
    async fn overwritten_identifier_loses() {
        let store = Arc::new(MemoryStore::new());
        let lock = strict(&store, LockConfig::default());

        let id = lock.lock().await.expect("should acquire");
        // Another process stole the key out from under us.
        store.set("Lock:res", "thief").await.unwrap();

        assert!(!lock.is_locking(&id).await);
        assert!(!lock.unlock(&id).await);
    }

    #[tokio::test]
    async fn blocked_caller_wins_after_release() {
        let store = Arc::new(MemoryStore::new());
        let lock = Arc::new(strict(
            &store,
            LockConfig::default().with_attempt_permits(1),
        ));

        let id = lock.lock().await.expect("should acquire");

        let waiter = {
            let lock = lock.clone();
            tokio::spawn(async move { lock.lock().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(lock.unlock(&id).await);

        let second = waiter.await.unwrap();
        assert!(second.is_some());
    }
}

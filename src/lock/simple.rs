//! Optimistic, non-transactional lock.
//!
//! Acquisition is a conditional create followed by a confirmation re-read
//! and a separate expiry call. The window between the confirmation read
//! and the expiry write is not atomic, so two concurrent callers can both
//! briefly believe they hold the lock. This strategy deliberately trades
//! that correctness gap for throughput; callers who need a real
//! at-most-one-winner guarantee use [`RigorousLock`](super::RigorousLock).

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use crate::store::{KeyTtl, StoreBackend, StoreError};

use super::{Acquisition, DistributedLock, LockAttempt, LockConfig, LockCore, LockError};

/// Optimistic lock built on conditional create (`SETNX`).
pub struct SimpleLock {
    core: LockCore,
}

impl SimpleLock {
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
        Ok(Self {
            core: LockCore::new(store, name, config)?,
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
impl LockAttempt for SimpleLock {
    async fn try_acquire(
        &self,
        id: &str,
        lock_timeout: Option<Duration>,
    ) -> Result<bool, StoreError> {
        let store = self.core.store();
        let key = self.core.key();

        if store.set_if_absent(key, id).await? {
            // The create itself cannot observe a racing create, so confirm
            // the stored value is still ours before applying the expiry.
            if store.get(key).await?.as_deref() != Some(id) {
                return Ok(false);
            }
            if let Some(timeout) = lock_timeout {
                store.expire(key, timeout).await?;
            }
            return Ok(true);
        }

        // A key without expiry means either a released lock (release drops
        // the expiry) or an owner that died between SETNX and EXPIRE. Both
        // are claimable.
        if store.ttl(key).await? == KeyTtl::Persistent {
            debug!(name = %self.core.name(), "claiming persistent lock key");
            store.get_and_replace(key, id).await?;
            if let Some(timeout) = lock_timeout {
                store.expire(key, timeout).await?;
            }
            return Ok(true);
        }

        Ok(false)
    }
}

#[async_trait]
impl DistributedLock for SimpleLock {
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

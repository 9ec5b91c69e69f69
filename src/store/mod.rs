//! Store primitive facade for locks and queues.
//!
//! Coordination happens exclusively through a shared key-value store; the
//! processes holding locks or exchanging work items never talk to each
//! other. This module pins down the minimal primitive set the lock and
//! queue strategies need:
//!
//! - plain get/set/delete and conditional create (`SETNX`)
//! - atomic get-and-replace (`GETSET`), with a transactional variant that
//!   also sets an expiry in the same round trip
//! - a watch-then-conditional-commit write (`WATCH`/`MULTI`/`EXEC`) that
//!   aborts if the key changed between the read and the commit
//! - key expiry management (`EXPIRE`/`TTL`)
//! - list head/tail pushes (multi-member, all-or-nothing) and blocking
//!   multi-key pops (`BLPOP`/`BRPOP`)
//! - pattern key enumeration (`KEYS`)
//! - sorted-set insert, peek-max, transactional pop-max and count
//!
//! Two implementations are provided: [`RedisStore`] for production and
//! [`MemoryStore`], an in-process stand-in used by the test suite and for
//! local development. Everything else about the store client (pooling,
//! replica routing, value serialization) lives outside this crate.

pub mod memory;
pub mod redis;

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

pub use memory::MemoryStore;
pub use redis::RedisStore;

/// Errors raised by a store backend.
///
/// These never cross the public lock/queue API boundary: every public
/// operation catches them, logs a warning and degrades to a conservative
/// failure value (`None`/`false`/`-1`).
#[derive(Debug, Error)]
pub enum StoreError {
    /// Failed to establish a connection to the store.
    #[error("store connection failed: {0}")]
    ConnectionFailed(String),

    /// A command against the store failed.
    #[error("store operation failed: {0}")]
    Redis(#[from] ::redis::RedisError),

    /// The key holds a value of a different structure than the operation
    /// expects (string vs. list vs. sorted set).
    #[error("key '{key}' holds the wrong value type for {operation}")]
    WrongType {
        key: String,
        operation: &'static str,
    },
}

/// Remaining lifetime of a key, as reported by `TTL`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyTtl {
    /// The key does not exist.
    Missing,
    /// The key exists and has no configured expiry.
    ///
    /// For lock keys this is a meaningful signal: either the lock was
    /// released (release resets the value and drops the expiry), or a
    /// prior owner died between creating the key and setting its expiry.
    Persistent,
    /// The key exists and expires after roughly this long.
    Remaining(Duration),
}

/// Outcome of a blocking pop: the key that produced the value, and the
/// value itself.
pub type PoppedValue = (String, String);

/// Minimal key-value store operations required by the coordination
/// primitives.
///
/// All values are UTF-8 strings; serialization of richer payloads is the
/// caller's concern. Blocking pops take `None` as "wait forever".
#[async_trait]
pub trait StoreBackend: Send + Sync {
    /// Reads a string key. `None` if the key is missing.
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Unconditionally writes a string key, clearing any expiry.
    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError>;

    /// Creates the key only if it does not exist (`SETNX`). Returns whether
    /// the create happened.
    async fn set_if_absent(&self, key: &str, value: &str) -> Result<bool, StoreError>;

    /// Atomically replaces the value and returns the previous one
    /// (`GETSET`). Clears any expiry.
    async fn get_and_replace(&self, key: &str, value: &str) -> Result<Option<String>, StoreError>;

    /// Like [`get_and_replace`](Self::get_and_replace), but also applies an
    /// expiry in the same transaction (`MULTI { GETSET; EXPIRE }`).
    async fn get_and_replace_with_expiry(
        &self,
        key: &str,
        value: &str,
        expiry: Duration,
    ) -> Result<Option<String>, StoreError>;

    /// Watch-then-conditional-commit write.
    ///
    /// Reads the current value under a watch on `key`, consults `allow`
    /// with it, and commits `value` (with `expiry` when given) only if
    /// `allow` approves *and* the key did not change between the read and
    /// the commit. Returns whether the commit happened; a concurrent
    /// modification aborts the whole transaction and yields `false`.
    async fn set_if_allowed(
        &self,
        key: &str,
        value: &str,
        expiry: Option<Duration>,
        allow: for<'a> fn(Option<&'a str>) -> bool,
    ) -> Result<bool, StoreError>;

    /// Sets an expiry on an existing key. Returns `false` if the key is
    /// missing.
    async fn expire(&self, key: &str, expiry: Duration) -> Result<bool, StoreError>;

    /// Reports the remaining lifetime of a key.
    async fn ttl(&self, key: &str) -> Result<KeyTtl, StoreError>;

    /// Deletes the given keys. Missing keys are ignored.
    async fn delete(&self, keys: &[String]) -> Result<(), StoreError>;

    /// Pushes values onto the head of a list, all-or-nothing. The last
    /// value in `values` ends up at the head.
    async fn push_head(&self, key: &str, values: &[String]) -> Result<(), StoreError>;

    /// Pushes values onto the tail of a list, all-or-nothing.
    async fn push_tail(&self, key: &str, values: &[String]) -> Result<(), StoreError>;

    /// Blocking pop from the head of the first non-empty list among
    /// `keys`, scanned in order (`BLPOP`). `None` timeout blocks forever;
    /// an elapsed timeout yields `Ok(None)`. Finite timeouts have whole-
    /// second resolution: backends round a zero or sub-second timeout up
    /// rather than treating it as unbounded.
    async fn pop_head_blocking(
        &self,
        keys: &[String],
        timeout: Option<Duration>,
    ) -> Result<Option<PoppedValue>, StoreError>;

    /// Blocking pop from the tail, otherwise identical to
    /// [`pop_head_blocking`](Self::pop_head_blocking) (`BRPOP`).
    async fn pop_tail_blocking(
        &self,
        keys: &[String],
        timeout: Option<Duration>,
    ) -> Result<Option<PoppedValue>, StoreError>;

    /// Reads a list element without removing it (`LINDEX`; negative
    /// indices count from the tail).
    async fn peek(&self, key: &str, index: i64) -> Result<Option<String>, StoreError>;

    /// Length of a list; zero for a missing key.
    async fn list_len(&self, key: &str) -> Result<i64, StoreError>;

    /// Enumerates keys matching a glob pattern (`KEYS`).
    async fn scan_keys(&self, pattern: &str) -> Result<Vec<String>, StoreError>;

    /// Inserts or updates scored members in a sorted set (`ZADD`),
    /// all-or-nothing. An existing member has its score overwritten.
    async fn sorted_insert(&self, key: &str, entries: &[(String, f64)])
        -> Result<(), StoreError>;

    /// Reads the highest-scored member without removing it.
    async fn sorted_peek_max(&self, key: &str) -> Result<Option<(String, f64)>, StoreError>;

    /// Atomically reads and removes the highest-scored member
    /// (`MULTI { ZREVRANGE 0 0; ZREMRANGEBYRANK -1 -1 }`).
    async fn sorted_pop_max(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Number of members in a sorted set (`ZLEXCOUNT` over the full
    /// range); zero for a missing key.
    async fn sorted_len(&self, key: &str) -> Result<i64, StoreError>;
}

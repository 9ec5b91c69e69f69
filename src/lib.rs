//! redcoord: distributed coordination primitives over a shared key-value
//! store.
//!
//! Independent, unrelated processes serialize access to named resources
//! (locks) or hand off prioritized work items (queues) purely through a
//! shared Redis-compatible store; the processes never talk to each other.
//!
//! ```text
//!    ┌───────────┐       ┌───────────┐       ┌───────────┐
//!    │ Process A │       │ Process B │       │ Process N │
//!    └─────┬─────┘       └─────┬─────┘       └─────┬─────┘
//!          │                   │                   │
//!          └───────────────────┼───────────────────┘
//!                              │
//!                       ┌──────▼──────┐
//!                       │   Shared    │
//!                       │  key-value  │
//!                       │    store    │
//!                       └─────────────┘
//! ```
//!
//! # Components
//!
//! - **[`lock`]**: three mutual-exclusion strategies (Simple, Strict,
//!   Rigorous) with different consistency/throughput trade-offs.
//! - **[`queue`]**: four priority work-queue encodings (SimpleFifo,
//!   SimplePriority, RoughPriority, PerfectPriority).
//! - **[`backoff`]**: the Fibonacci backoff policy every retry loop uses.
//! - **[`store`]**: the minimal store-primitive facade, with a Redis
//!   implementation and an in-memory one for tests and local runs.
//!
//! Registries hand out process-lifetime flyweight instances per
//! (strategy, name) pair; the instances then operate directly against
//! the store facade.
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use redcoord::{LockRegistry, LockStrategy, RedisStore};
//!
//! let store = Arc::new(RedisStore::connect("redis://localhost:6379").await?);
//! let locks = LockRegistry::new(store);
//! let lock = locks.get(LockStrategy::Rigorous, "nightly-report")?;
//!
//! if let Some(id) = lock.lock().await {
//!     // exclusive across every process sharing the store
//!     lock.unlock(&id).await;
//! }
//! ```

pub mod backoff;
pub mod lock;
pub mod queue;
pub mod store;

// Re-export the main types for convenience
pub use backoff::{BackoffPolicy, Sleeper, TokioSleeper};
pub use lock::{
    Acquisition, DeadlineMode, DistributedLock, LockConfig, LockError, LockRegistry, LockStrategy,
};
pub use queue::{QueueConfig, QueueError, QueueRegistry, QueueStrategy, WorkQueue};
pub use store::{KeyTtl, MemoryStore, RedisStore, StoreBackend, StoreError};

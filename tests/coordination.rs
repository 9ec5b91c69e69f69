//! End-to-end coordination scenarios against the in-memory store.
//!
//! These exercise the public API the way independent processes would:
//! separate registry/lock/queue handles sharing nothing but the store.

use std::sync::{Arc, Once};
use std::time::Duration;

use redcoord::{
    DeadlineMode, LockConfig, LockRegistry, LockStrategy, MemoryStore, QueueRegistry,
    QueueStrategy, StoreBackend,
};

static TRACING: Once = Once::new();

/// Routes the crate's warn/debug output through the test writer; filter
/// with `RUST_LOG` when a scenario needs inspecting.
fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

fn shared_store() -> Arc<MemoryStore> {
    init_tracing();
    Arc::new(MemoryStore::new())
}

#[tokio::test]
async fn lock_protects_a_critical_section_across_handles() {
    let store = shared_store();
    // Two registries model two processes sharing only the store.
    let process_a = LockRegistry::new(store.clone() as Arc<dyn StoreBackend>);
    let process_b = LockRegistry::with_config(
        store.clone() as Arc<dyn StoreBackend>,
        LockConfig::default()
            .with_deadline(DeadlineMode::Hard)
            .with_acquire_timeout(Duration::from_millis(20)),
    );

    let lock_a = process_a.get(LockStrategy::Rigorous, "ledger").unwrap();
    let lock_b = process_b.get(LockStrategy::Rigorous, "ledger").unwrap();

    let id = lock_a.lock().await.expect("first process acquires");
    assert!(
        lock_b
            .lock_with(Duration::from_millis(20), None)
            .await
            .is_none(),
        "second process must not acquire while held"
    );

    assert!(lock_a.unlock(&id).await);
    let id_b = lock_b.lock().await.expect("acquires after release");
    assert!(lock_b.is_locking(&id_b).await);
}

#[tokio::test]
async fn all_lock_strategies_round_trip_through_the_registry() {
    let store = shared_store();
    let registry = LockRegistry::new(store as Arc<dyn StoreBackend>);

    for strategy in [
        LockStrategy::Simple,
        LockStrategy::Strict,
        LockStrategy::Rigorous,
    ] {
        let lock = registry.get(strategy, "shared-resource").unwrap();
        let id = lock
            .lock()
            .await
            .unwrap_or_else(|| panic!("{strategy} lock should acquire"));
        assert!(lock.is_locking(&id).await, "{strategy} ownership check");
        assert!(lock.unlock(&id).await, "{strategy} release");
    }
}

#[tokio::test]
async fn priority_round_trip_scenario() {
    let store = shared_store();
    let registry: QueueRegistry<String> = QueueRegistry::new(store as Arc<dyn StoreBackend>);
    let queue = registry.get(QueueStrategy::SimplePriority, "mail").unwrap();

    assert!(queue
        .enqueue_with_priority(1, &["hi".to_string()])
        .await
        .unwrap());
    assert!(queue.enqueue(&["lo".to_string()]).await);

    assert_eq!(queue.dequeue().await.as_deref(), Some("hi"));
    assert_eq!(queue.dequeue().await.as_deref(), Some("lo"));
    assert!(queue.is_empty().await);
}

#[tokio::test]
async fn producer_and_consumer_meet_through_the_store() {
    let store = shared_store();
    let producer_side: QueueRegistry<String> =
        QueueRegistry::new(store.clone() as Arc<dyn StoreBackend>);
    let consumer_side: QueueRegistry<String> =
        QueueRegistry::new(store.clone() as Arc<dyn StoreBackend>);

    let consumer = consumer_side.get(QueueStrategy::SimpleFifo, "work").unwrap();
    let handle = tokio::spawn(async move { consumer.dequeue().await });

    tokio::time::sleep(Duration::from_millis(10)).await;
    let producer = producer_side.get(QueueStrategy::SimpleFifo, "work").unwrap();
    assert!(producer.enqueue(&["task-1".to_string()]).await);

    assert_eq!(handle.await.unwrap().as_deref(), Some("task-1"));
}

#[tokio::test]
async fn structured_payloads_survive_the_queue() {
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Job {
        id: u64,
        kind: String,
    }

    let store = shared_store();
    let registry: QueueRegistry<Job> = QueueRegistry::new(store as Arc<dyn StoreBackend>);
    let queue = registry.get(QueueStrategy::PerfectPriority, "jobs").unwrap();

    let urgent = Job {
        id: 1,
        kind: "rebuild".to_string(),
    };
    let routine = Job {
        id: 2,
        kind: "sweep".to_string(),
    };

    assert!(queue.enqueue_with_priority(9, &[urgent.clone()]).await.unwrap());
    assert!(queue.enqueue_with_priority(1, &[routine.clone()]).await.unwrap());

    assert_eq!(queue.dequeue().await, Some(urgent));
    assert_eq!(queue.dequeue().await, Some(routine));
}

#[tokio::test]
async fn queue_strategies_do_not_share_backing_keys() {
    let store = shared_store();
    let registry: QueueRegistry<String> =
        QueueRegistry::new(store.clone() as Arc<dyn StoreBackend>);

    let fifo = registry.get(QueueStrategy::SimpleFifo, "a").unwrap();
    let rough = registry.get(QueueStrategy::RoughPriority, "b").unwrap();

    assert!(fifo.enqueue(&["f".to_string()]).await);
    assert!(rough
        .enqueue_with_priority(3, &["r".to_string()])
        .await
        .unwrap());

    assert_eq!(fifo.size().await, 1);
    assert_eq!(rough.size().await, 1);
    assert_eq!(fifo.dequeue().await.as_deref(), Some("f"));
    assert_eq!(rough.dequeue().await.as_deref(), Some("r"));
}

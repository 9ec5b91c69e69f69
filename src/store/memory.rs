//! In-process implementation of the store facade.
//!
//! Backs the test suite and local development runs with the same
//! semantics the Redis implementation provides: lazy key expiry, typed
//! values (string / list / sorted set), atomic conditional writes, and
//! blocking pops that wake when another task pushes.
//!
//! A single `std::sync::Mutex` around the key space makes every operation
//! atomic, which models the single-threaded command execution of the real
//! store. Blocking pops park on a [`Notify`] that push operations signal.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::Notify;

use super::{KeyTtl, PoppedValue, StoreBackend, StoreError};

/// A value held at a key, mirroring the store's type system.
#[derive(Debug, Clone)]
enum Stored {
    Text(String),
    List(VecDeque<String>),
    Sorted(Vec<(String, f64)>),
}

#[derive(Debug, Clone)]
struct Entry {
    value: Stored,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.map_or(true, |at| at > now)
    }
}

/// In-memory store backend.
///
/// Cloning is cheap and every clone shares the same key space, so a test
/// can hand "independent" lock and queue instances the same store and
/// exercise cross-instance races.
#[derive(Clone, Default)]
pub struct MemoryStore {
    keys: Arc<Mutex<HashMap<String, Entry>>>,
    /// Signalled on every list push so blocking pops can re-check.
    writes: Arc<Notify>,
}

impl MemoryStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_keys(&self) -> MutexGuard<'_, HashMap<String, Entry>> {
        self.keys.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Removes the entry if it expired; returns whether a live entry
    /// remains.
    fn purge_expired(map: &mut HashMap<String, Entry>, key: &str) -> bool {
        let now = Instant::now();
        match map.get(key) {
            Some(entry) if !entry.is_live(now) => {
                map.remove(key);
                false
            }
            Some(_) => true,
            None => false,
        }
    }

    fn read_text(
        map: &mut HashMap<String, Entry>,
        key: &str,
        operation: &'static str,
    ) -> Result<Option<String>, StoreError> {
        if !Self::purge_expired(map, key) {
            return Ok(None);
        }
        match &map[key].value {
            Stored::Text(v) => Ok(Some(v.clone())),
            _ => Err(StoreError::WrongType {
                key: key.to_string(),
                operation,
            }),
        }
    }

    fn try_pop(
        &self,
        keys: &[String],
        from_head: bool,
    ) -> Result<Option<PoppedValue>, StoreError> {
        let mut map = self.lock_keys();
        for key in keys {
            if !Self::purge_expired(&mut map, key) {
                continue;
            }
            let Some(entry) = map.get_mut(key) else {
                continue;
            };
            let list = match &mut entry.value {
                Stored::List(list) => list,
                _ => {
                    return Err(StoreError::WrongType {
                        key: key.clone(),
                        operation: "blocking pop",
                    })
                }
            };
            let popped = if from_head {
                list.pop_front()
            } else {
                list.pop_back()
            };
            if let Some(value) = popped {
                if list.is_empty() {
                    map.remove(key);
                }
                return Ok(Some((key.clone(), value)));
            }
        }
        Ok(None)
    }

    async fn pop_blocking(
        &self,
        keys: &[String],
        timeout: Option<Duration>,
        from_head: bool,
    ) -> Result<Option<PoppedValue>, StoreError> {
        if keys.is_empty() {
            return Ok(None);
        }
        let deadline = timeout.map(|t| Instant::now() + t);

        loop {
            // Register for wake-ups before checking, otherwise a push
            // between the check and the await would be missed.
            let notified = self.writes.notified();

            if let Some(popped) = self.try_pop(keys, from_head)? {
                return Ok(Some(popped));
            }

            match deadline {
                None => notified.await,
                Some(deadline) => {
                    let Some(remaining) = deadline.checked_duration_since(Instant::now()) else {
                        return Ok(None);
                    };
                    // A timeout here just means "re-check and see whether
                    // the deadline passed".
                    let _ = tokio::time::timeout(remaining, notified).await;
                }
            }
        }
    }

    fn push(&self, key: &str, values: &[String], to_head: bool) -> Result<(), StoreError> {
        if values.is_empty() {
            return Ok(());
        }
        let mut map = self.lock_keys();
        Self::purge_expired(&mut map, key);
        let entry = map.entry(key.to_string()).or_insert_with(|| Entry {
            value: Stored::List(VecDeque::new()),
            expires_at: None,
        });
        let list = match &mut entry.value {
            Stored::List(list) => list,
            _ => {
                return Err(StoreError::WrongType {
                    key: key.to_string(),
                    operation: "list push",
                })
            }
        };
        for value in values {
            if to_head {
                list.push_front(value.clone());
            } else {
                list.push_back(value.clone());
            }
        }
        drop(map);
        self.writes.notify_waiters();
        Ok(())
    }

    /// Index of the highest-ranked member: greatest score, ties broken by
    /// member ordering, matching the store's rank rules.
    fn max_rank(entries: &[(String, f64)]) -> Option<usize> {
        let mut best: Option<usize> = None;
        for (i, (member, score)) in entries.iter().enumerate() {
            let better = match best {
                None => true,
                Some(b) => {
                    let (best_member, best_score) = &entries[b];
                    *score > *best_score || (*score == *best_score && member > best_member)
                }
            };
            if better {
                best = Some(i);
            }
        }
        best
    }
}

#[async_trait]
impl StoreBackend for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let mut map = self.lock_keys();
        Self::read_text(&mut map, key, "get")
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let mut map = self.lock_keys();
        map.insert(
            key.to_string(),
            Entry {
                value: Stored::Text(value.to_string()),
                expires_at: None,
            },
        );
        Ok(())
    }

    async fn set_if_absent(&self, key: &str, value: &str) -> Result<bool, StoreError> {
        let mut map = self.lock_keys();
        if Self::purge_expired(&mut map, key) {
            return Ok(false);
        }
        map.insert(
            key.to_string(),
            Entry {
                value: Stored::Text(value.to_string()),
                expires_at: None,
            },
        );
        Ok(true)
    }

    async fn get_and_replace(&self, key: &str, value: &str) -> Result<Option<String>, StoreError> {
        let mut map = self.lock_keys();
        let old = Self::read_text(&mut map, key, "get-and-replace")?;
        map.insert(
            key.to_string(),
            Entry {
                value: Stored::Text(value.to_string()),
                expires_at: None,
            },
        );
        Ok(old)
    }

    async fn get_and_replace_with_expiry(
        &self,
        key: &str,
        value: &str,
        expiry: Duration,
    ) -> Result<Option<String>, StoreError> {
        let mut map = self.lock_keys();
        let old = Self::read_text(&mut map, key, "get-and-replace")?;
        map.insert(
            key.to_string(),
            Entry {
                value: Stored::Text(value.to_string()),
                expires_at: Some(Instant::now() + expiry),
            },
        );
        Ok(old)
    }

    async fn set_if_allowed(
        &self,
        key: &str,
        value: &str,
        expiry: Option<Duration>,
        allow: for<'a> fn(Option<&'a str>) -> bool,
    ) -> Result<bool, StoreError> {
        let mut map = self.lock_keys();
        let current = Self::read_text(&mut map, key, "conditional set")?;
        if !allow(current.as_deref()) {
            return Ok(false);
        }
        map.insert(
            key.to_string(),
            Entry {
                value: Stored::Text(value.to_string()),
                expires_at: expiry.map(|e| Instant::now() + e),
            },
        );
        Ok(true)
    }

    async fn expire(&self, key: &str, expiry: Duration) -> Result<bool, StoreError> {
        let mut map = self.lock_keys();
        if !Self::purge_expired(&mut map, key) {
            return Ok(false);
        }
        if let Some(entry) = map.get_mut(key) {
            entry.expires_at = Some(Instant::now() + expiry);
        }
        Ok(true)
    }

    async fn ttl(&self, key: &str) -> Result<KeyTtl, StoreError> {
        let mut map = self.lock_keys();
        if !Self::purge_expired(&mut map, key) {
            return Ok(KeyTtl::Missing);
        }
        Ok(match map[key].expires_at {
            None => KeyTtl::Persistent,
            Some(at) => KeyTtl::Remaining(at.saturating_duration_since(Instant::now())),
        })
    }

    async fn delete(&self, keys: &[String]) -> Result<(), StoreError> {
        let mut map = self.lock_keys();
        for key in keys {
            map.remove(key);
        }
        Ok(())
    }

    async fn push_head(&self, key: &str, values: &[String]) -> Result<(), StoreError> {
        self.push(key, values, true)
    }

    async fn push_tail(&self, key: &str, values: &[String]) -> Result<(), StoreError> {
        self.push(key, values, false)
    }

    async fn pop_head_blocking(
        &self,
        keys: &[String],
        timeout: Option<Duration>,
    ) -> Result<Option<PoppedValue>, StoreError> {
        self.pop_blocking(keys, timeout, true).await
    }

    async fn pop_tail_blocking(
        &self,
        keys: &[String],
        timeout: Option<Duration>,
    ) -> Result<Option<PoppedValue>, StoreError> {
        self.pop_blocking(keys, timeout, false).await
    }

    async fn peek(&self, key: &str, index: i64) -> Result<Option<String>, StoreError> {
        let mut map = self.lock_keys();
        if !Self::purge_expired(&mut map, key) {
            return Ok(None);
        }
        let list = match &map[key].value {
            Stored::List(list) => list,
            _ => {
                return Err(StoreError::WrongType {
                    key: key.to_string(),
                    operation: "peek",
                })
            }
        };
        let len = list.len() as i64;
        let resolved = if index < 0 { len + index } else { index };
        if resolved < 0 || resolved >= len {
            return Ok(None);
        }
        Ok(list.get(resolved as usize).cloned())
    }

    async fn list_len(&self, key: &str) -> Result<i64, StoreError> {
        let mut map = self.lock_keys();
        if !Self::purge_expired(&mut map, key) {
            return Ok(0);
        }
        match &map[key].value {
            Stored::List(list) => Ok(list.len() as i64),
            _ => Err(StoreError::WrongType {
                key: key.to_string(),
                operation: "list length",
            }),
        }
    }

    async fn scan_keys(&self, pattern: &str) -> Result<Vec<String>, StoreError> {
        let map = self.lock_keys();
        let now = Instant::now();
        // Only the trailing-wildcard form is needed by the coordination
        // primitives (bucket discovery scans "Queue:<name>:*").
        let matches: Vec<String> = match pattern.strip_suffix('*') {
            Some(prefix) => map
                .iter()
                .filter(|(k, e)| k.starts_with(prefix) && e.is_live(now))
                .map(|(k, _)| k.clone())
                .collect(),
            None => map
                .iter()
                .filter(|(k, e)| k.as_str() == pattern && e.is_live(now))
                .map(|(k, _)| k.clone())
                .collect(),
        };
        Ok(matches)
    }

    async fn sorted_insert(
        &self,
        key: &str,
        entries: &[(String, f64)],
    ) -> Result<(), StoreError> {
        if entries.is_empty() {
            return Ok(());
        }
        let mut map = self.lock_keys();
        Self::purge_expired(&mut map, key);
        let entry = map.entry(key.to_string()).or_insert_with(|| Entry {
            value: Stored::Sorted(Vec::new()),
            expires_at: None,
        });
        let members = match &mut entry.value {
            Stored::Sorted(members) => members,
            _ => {
                return Err(StoreError::WrongType {
                    key: key.to_string(),
                    operation: "sorted insert",
                })
            }
        };
        for (member, score) in entries {
            match members.iter_mut().find(|(m, _)| m == member) {
                // An existing member keeps its identity; only the score moves.
                Some(existing) => existing.1 = *score,
                None => members.push((member.clone(), *score)),
            }
        }
        Ok(())
    }

    async fn sorted_peek_max(&self, key: &str) -> Result<Option<(String, f64)>, StoreError> {
        let mut map = self.lock_keys();
        if !Self::purge_expired(&mut map, key) {
            return Ok(None);
        }
        match &map[key].value {
            Stored::Sorted(members) => {
                Ok(Self::max_rank(members).map(|i| members[i].clone()))
            }
            _ => Err(StoreError::WrongType {
                key: key.to_string(),
                operation: "sorted peek",
            }),
        }
    }

    async fn sorted_pop_max(&self, key: &str) -> Result<Option<String>, StoreError> {
        let mut map = self.lock_keys();
        if !Self::purge_expired(&mut map, key) {
            return Ok(None);
        }
        let Some(entry) = map.get_mut(key) else {
            return Ok(None);
        };
        let members = match &mut entry.value {
            Stored::Sorted(members) => members,
            _ => {
                return Err(StoreError::WrongType {
                    key: key.to_string(),
                    operation: "sorted pop",
                })
            }
        };
        let Some(index) = Self::max_rank(members) else {
            return Ok(None);
        };
        let (member, _) = members.remove(index);
        if members.is_empty() {
            map.remove(key);
        }
        Ok(Some(member))
    }

    async fn sorted_len(&self, key: &str) -> Result<i64, StoreError> {
        let mut map = self.lock_keys();
        if !Self::purge_expired(&mut map, key) {
            return Ok(0);
        }
        match &map[key].value {
            Stored::Sorted(members) => Ok(members.len() as i64),
            _ => Err(StoreError::WrongType {
                key: key.to_string(),
                operation: "sorted length",
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn conditional_create_only_fires_once() {
        let store = MemoryStore::new();
        assert!(store.set_if_absent("k", "a").await.unwrap());
        assert!(!store.set_if_absent("k", "b").await.unwrap());
        assert_eq!(store.get("k").await.unwrap(), Some("a".to_string()));
    }

    #[tokio::test]
    async fn get_and_replace_returns_previous_value() {
        let store = MemoryStore::new();
        assert_eq!(store.get_and_replace("k", "a").await.unwrap(), None);
        assert_eq!(
            store.get_and_replace("k", "b").await.unwrap(),
            Some("a".to_string())
        );
    }

    #[tokio::test]
    async fn ttl_reports_missing_persistent_and_remaining() {
        let store = MemoryStore::new();
        assert_eq!(store.ttl("k").await.unwrap(), KeyTtl::Missing);

        store.set("k", "v").await.unwrap();
        assert_eq!(store.ttl("k").await.unwrap(), KeyTtl::Persistent);

        assert!(store.expire("k", Duration::from_secs(60)).await.unwrap());
        assert!(matches!(
            store.ttl("k").await.unwrap(),
            KeyTtl::Remaining(_)
        ));
    }

    #[tokio::test]
    async fn expired_keys_vanish() {
        let store = MemoryStore::new();
        store.set("k", "v").await.unwrap();
        store.expire("k", Duration::from_millis(20)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(40)).await;

        assert_eq!(store.get("k").await.unwrap(), None);
        assert_eq!(store.ttl("k").await.unwrap(), KeyTtl::Missing);
        // And the slot is free for a conditional create again.
        assert!(store.set_if_absent("k", "w").await.unwrap());
    }

    #[tokio::test]
    async fn set_overwrite_drops_expiry() {
        let store = MemoryStore::new();
        store.set("k", "v").await.unwrap();
        store.expire("k", Duration::from_secs(60)).await.unwrap();
        store.set("k", "w").await.unwrap();
        assert_eq!(store.ttl("k").await.unwrap(), KeyTtl::Persistent);
    }

    #[tokio::test]
    async fn conditional_commit_consults_current_value() {
        let store = MemoryStore::new();
        store.set("k", "held").await.unwrap();

        fn only_if_free(current: Option<&str>) -> bool {
            current.is_none() || current == Some("free")
        }

        assert!(!store
            .set_if_allowed("k", "mine", None, only_if_free)
            .await
            .unwrap());

        store.set("k", "free").await.unwrap();
        assert!(store
            .set_if_allowed("k", "mine", Some(Duration::from_secs(30)), only_if_free)
            .await
            .unwrap());
        assert_eq!(store.get("k").await.unwrap(), Some("mine".to_string()));
    }

    #[tokio::test]
    async fn conditional_commit_works_through_a_shared_handle() {
        // The predicate borrows the current value; it must be callable
        // across the trait-object boundary the lock strategies use.
        fn only_if_absent(current: Option<&str>) -> bool {
            current.is_none()
        }

        let store: Arc<dyn StoreBackend> = Arc::new(MemoryStore::new());
        assert!(store
            .set_if_allowed("k", "a", None, only_if_absent)
            .await
            .unwrap());
        assert!(!store
            .set_if_allowed("k", "b", None, only_if_absent)
            .await
            .unwrap());
        assert_eq!(store.get("k").await.unwrap(), Some("a".to_string()));
    }

    #[tokio::test]
    async fn list_push_and_peek_orders() {
        let store = MemoryStore::new();
        store
            .push_head("l", &["a".into(), "b".into(), "c".into()])
            .await
            .unwrap();
        // LPUSH a b c leaves c at the head.
        assert_eq!(store.peek("l", 0).await.unwrap(), Some("c".to_string()));
        assert_eq!(store.peek("l", -1).await.unwrap(), Some("a".to_string()));
        assert_eq!(store.list_len("l").await.unwrap(), 3);
    }

    #[tokio::test]
    async fn blocking_pop_wakes_on_push() {
        let store = MemoryStore::new();
        let consumer = {
            let store = store.clone();
            tokio::spawn(async move {
                store
                    .pop_tail_blocking(&["l".to_string()], None)
                    .await
                    .unwrap()
            })
        };

        tokio::time::sleep(Duration::from_millis(10)).await;
        store.push_head("l", &["x".into()]).await.unwrap();

        let popped = consumer.await.unwrap();
        assert_eq!(popped, Some(("l".to_string(), "x".to_string())));
    }

    #[tokio::test]
    async fn blocking_pop_times_out_empty() {
        let store = MemoryStore::new();
        let popped = store
            .pop_head_blocking(&["l".to_string()], Some(Duration::from_millis(20)))
            .await
            .unwrap();
        assert_eq!(popped, None);
    }

    #[tokio::test]
    async fn multi_key_pop_scans_in_order() {
        let store = MemoryStore::new();
        store.push_tail("low", &["lo".into()]).await.unwrap();
        store.push_tail("high", &["hi".into()]).await.unwrap();

        let keys = vec!["high".to_string(), "low".to_string()];
        let first = store.pop_head_blocking(&keys, None).await.unwrap();
        assert_eq!(first, Some(("high".to_string(), "hi".to_string())));
        let second = store.pop_head_blocking(&keys, None).await.unwrap();
        assert_eq!(second, Some(("low".to_string(), "lo".to_string())));
    }

    #[tokio::test]
    async fn scan_matches_trailing_wildcard() {
        let store = MemoryStore::new();
        store.push_tail("Queue:jobs:1", &["a".into()]).await.unwrap();
        store.push_tail("Queue:jobs:2", &["b".into()]).await.unwrap();
        store.push_tail("Queue:other", &["c".into()]).await.unwrap();

        let mut keys = store.scan_keys("Queue:jobs:*").await.unwrap();
        keys.sort();
        assert_eq!(keys, vec!["Queue:jobs:1", "Queue:jobs:2"]);
    }

    #[tokio::test]
    async fn sorted_set_deduplicates_members() {
        let store = MemoryStore::new();
        store
            .sorted_insert("z", &[("a".to_string(), 5.0)])
            .await
            .unwrap();
        store
            .sorted_insert("z", &[("a".to_string(), 9.0)])
            .await
            .unwrap();

        assert_eq!(store.sorted_len("z").await.unwrap(), 1);
        assert_eq!(
            store.sorted_peek_max("z").await.unwrap(),
            Some(("a".to_string(), 9.0))
        );
    }

    #[tokio::test]
    async fn sorted_pop_max_drains_by_score() {
        let store = MemoryStore::new();
        store
            .sorted_insert(
                "z",
                &[
                    ("low".to_string(), 1.0),
                    ("high".to_string(), 9.0),
                    ("mid".to_string(), 5.0),
                ],
            )
            .await
            .unwrap();

        assert_eq!(store.sorted_pop_max("z").await.unwrap(), Some("high".into()));
        assert_eq!(store.sorted_pop_max("z").await.unwrap(), Some("mid".into()));
        assert_eq!(store.sorted_pop_max("z").await.unwrap(), Some("low".into()));
        assert_eq!(store.sorted_pop_max("z").await.unwrap(), None);
    }

    #[tokio::test]
    async fn wrong_type_is_reported() {
        let store = MemoryStore::new();
        store.set("k", "v").await.unwrap();
        let err = store.push_tail("k", &["x".into()]).await.unwrap_err();
        assert!(matches!(err, StoreError::WrongType { .. }));
    }
}

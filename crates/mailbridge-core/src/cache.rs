//! Bounded LRU caches with lazy TTL expiry.
//!
//! All three core caches (view, global store, payload) are instances of
//! [`TtlLru`]. Reads promote hits to MRU; expired entries are passed over
//! on `get` but kept until eviction so a failed refetch can still serve
//! the stale value via [`TtlLru::get_stale`].

use std::collections::{HashMap, VecDeque};
use std::hash::Hash;
use std::sync::Mutex;
use std::time::{Duration, Instant};

struct Entry<V> {
    value: V,
    inserted_at: Instant,
}

struct Inner<K, V> {
    map: HashMap<K, Entry<V>>,
    // Front = LRU, back = MRU.
    order: VecDeque<K>,
}

/// A bounded LRU cache with per-entry TTL.
///
/// The mutex covers every operation; nothing awaits while holding it.
pub struct TtlLru<K, V> {
    inner: Mutex<Inner<K, V>>,
    capacity: usize,
    ttl: Duration,
}

impl<K, V> TtlLru<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    /// Creates a cache with the given capacity and TTL.
    #[must_use]
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            inner: Mutex::new(Inner {
                map: HashMap::with_capacity(capacity),
                order: VecDeque::with_capacity(capacity),
            }),
            capacity,
            ttl,
        }
    }

    /// Returns a fresh value, promoting it to MRU.
    ///
    /// Expired entries return `None` but stay resident for
    /// [`TtlLru::get_stale`].
    pub fn get(&self, key: &K) -> Option<V> {
        let mut inner = self.lock();
        let entry = inner.map.get(key)?;
        if entry.inserted_at.elapsed() > self.ttl {
            return None;
        }
        let value = entry.value.clone();
        promote(&mut inner.order, key);
        Some(value)
    }

    /// Returns a value regardless of TTL, without promotion.
    pub fn get_stale(&self, key: &K) -> Option<V> {
        let inner = self.lock();
        inner.map.get(key).map(|entry| entry.value.clone())
    }

    /// Inserts a value at MRU, evicting LRU entries over capacity.
    pub fn insert(&self, key: K, value: V) {
        let mut inner = self.lock();

        if inner.map.contains_key(&key) {
            inner.order.retain(|k| k != &key);
        } else {
            while inner.map.len() >= self.capacity {
                let Some(oldest) = inner.order.pop_front() else {
                    break;
                };
                inner.map.remove(&oldest);
            }
        }

        inner.order.push_back(key.clone());
        inner.map.insert(
            key,
            Entry {
                value,
                inserted_at: Instant::now(),
            },
        );
    }

    /// Removes one entry.
    pub fn remove(&self, key: &K) -> Option<V> {
        let mut inner = self.lock();
        let entry = inner.map.remove(key)?;
        inner.order.retain(|k| k != key);
        Some(entry.value)
    }

    /// Drops every entry.
    pub fn clear(&self) {
        let mut inner = self.lock();
        inner.map.clear();
        inner.order.clear();
    }

    /// Removes entries whose key fails the predicate.
    pub fn retain(&self, mut keep: impl FnMut(&K, &V) -> bool) {
        let mut inner = self.lock();
        let map = &mut inner.map;
        map.retain(|k, entry| keep(k, &entry.value));
        let map = &inner.map;
        let retained: VecDeque<K> = inner
            .order
            .iter()
            .filter(|k| map.contains_key(*k))
            .cloned()
            .collect();
        inner.order = retained;
    }

    /// Number of resident entries, expired ones included.
    pub fn len(&self) -> usize {
        self.lock().map.len()
    }

    /// True when the cache holds nothing.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner<K, V>> {
        // A poisoned cache mutex means a panic mid-operation; the data is
        // still structurally sound, so recover the guard.
        self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

fn promote<K: Eq>(order: &mut VecDeque<K>, key: &K) {
    if let Some(position) = order.iter().position(|k| k == key) {
        let Some(k) = order.remove(position) else {
            return;
        };
        order.push_back(k);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn insert_and_get() {
        let cache = TtlLru::new(4, Duration::from_secs(60));
        cache.insert("a", 1);
        assert_eq!(cache.get(&"a"), Some(1));
        assert_eq!(cache.get(&"b"), None);
    }

    #[test]
    fn capacity_evicts_oldest_first() {
        let cache = TtlLru::new(3, Duration::from_secs(60));
        cache.insert("a", 1);
        cache.insert("b", 2);
        cache.insert("c", 3);
        cache.insert("d", 4);

        // First-inserted key is gone, the rest survive.
        assert_eq!(cache.get(&"a"), None);
        assert_eq!(cache.get(&"b"), Some(2));
        assert_eq!(cache.get(&"c"), Some(3));
        assert_eq!(cache.get(&"d"), Some(4));
        assert_eq!(cache.len(), 3);
    }

    #[test]
    fn get_promotes_to_mru() {
        let cache = TtlLru::new(2, Duration::from_secs(60));
        cache.insert("a", 1);
        cache.insert("b", 2);
        // Touch "a" so "b" becomes the eviction candidate.
        assert_eq!(cache.get(&"a"), Some(1));
        cache.insert("c", 3);

        assert_eq!(cache.get(&"a"), Some(1));
        assert_eq!(cache.get(&"b"), None);
        assert_eq!(cache.get(&"c"), Some(3));
    }

    #[test]
    fn reinsert_refreshes_position() {
        let cache = TtlLru::new(2, Duration::from_secs(60));
        cache.insert("a", 1);
        cache.insert("b", 2);
        cache.insert("a", 10);
        cache.insert("c", 3);

        assert_eq!(cache.get(&"a"), Some(10));
        assert_eq!(cache.get(&"b"), None);
    }

    #[test]
    fn ttl_expires_but_stale_read_survives() {
        let cache = TtlLru::new(4, Duration::from_millis(5));
        cache.insert("a", 1);
        std::thread::sleep(Duration::from_millis(15));

        assert_eq!(cache.get(&"a"), None);
        assert_eq!(cache.get_stale(&"a"), Some(1));
    }

    #[test]
    fn remove_and_clear() {
        let cache = TtlLru::new(4, Duration::from_secs(60));
        cache.insert("a", 1);
        cache.insert("b", 2);
        assert_eq!(cache.remove(&"a"), Some(1));
        assert_eq!(cache.get(&"a"), None);
        cache.clear();
        assert!(cache.is_empty());
    }

    #[test]
    fn retain_filters_by_key_and_value() {
        let cache = TtlLru::new(8, Duration::from_secs(60));
        cache.insert("keep", 1);
        cache.insert("drop", 2);
        cache.retain(|_, v| *v == 1);
        assert_eq!(cache.get(&"keep"), Some(1));
        assert_eq!(cache.get(&"drop"), None);
        assert_eq!(cache.len(), 1);
    }
}

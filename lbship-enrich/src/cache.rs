use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Bounded LRU map from client address to `V`, safe to share across workers.
///
/// Every access goes through one mutex; lookups are a hash probe plus a list
/// splice, so the critical section stays short.
pub struct SharedLru<V> {
    inner: Mutex<LruCache<String, V>>,
}

impl<V: Clone> SharedLru<V> {
    /// A capacity of 0 is clamped to 1.
    pub fn new(capacity: usize) -> Self {
        let cap = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            inner: Mutex::new(LruCache::new(cap)),
        }
    }

    /// Clone out the cached value and mark it most recently used.
    pub fn get(&self, key: &str) -> Option<V> {
        self.lock().get(key).cloned()
    }

    /// Insert or replace, evicting the least recently used entry when full.
    pub fn insert(&self, key: String, value: V) {
        self.lock().put(key, value);
    }

    pub fn remove(&self, key: &str) -> Option<V> {
        self.lock().pop(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.lock().contains(key)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.lock().cap().get()
    }

    // A panic while holding the lock cannot leave the LRU half-updated in a
    // way that matters for a cache, so poisoning is ignored.
    fn lock(&self) -> MutexGuard<'_, LruCache<String, V>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

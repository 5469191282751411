//! Memoization Cache
//!
//! Fingerprint-keyed result store backing every task. Each task owns one
//! [`MemoCache`] per artifact kind with its own capacity: a capacity of 1
//! means "keep only the last result", 10 means "keep up to ten
//! historically-requested results". Eviction is least-recently-used, but an
//! entry that is still referenced outside the cache (a pinned handle held
//! by the result graph) is never evicted.
//!
//! Identical fingerprints return the identical `Arc`, so repeated lookups
//! are bit-for-bit idempotent. When two callers race on the same missing
//! key, one builds and the other waits.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};
use rustc_hash::{FxHashMap, FxHashSet};

use crate::errors::Result;

struct Inner<T> {
    entries: FxHashMap<u64, Arc<T>>,
    /// Usage order, least recently used at the front.
    order: VecDeque<u64>,
    building: FxHashSet<u64>,
}

pub struct MemoCache<T> {
    capacity: usize,
    inner: Mutex<Inner<T>>,
    build_done: Condvar,
}

impl<T> MemoCache<T> {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "cache capacity must be at least 1");
        Self {
            capacity,
            inner: Mutex::new(Inner {
                entries: FxHashMap::default(),
                order: VecDeque::new(),
                building: FxHashSet::default(),
            }),
            build_done: Condvar::new(),
        }
    }

    /// Returns the cached artifact for `key`, building it with `build` on a
    /// miss. Concurrent callers with the same key wait for the first build
    /// instead of duplicating it; a failed build is not cached.
    pub fn get_or_try_insert_with<F>(&self, key: u64, build: F) -> Result<Arc<T>>
    where
        F: FnOnce() -> Result<T>,
    {
        let mut inner = self.inner.lock();
        loop {
            if let Some(value) = inner.entries.get(&key) {
                let value = Arc::clone(value);
                Self::touch(&mut inner, key);
                return Ok(value);
            }
            if inner.building.contains(&key) {
                self.build_done.wait(&mut inner);
                continue;
            }
            inner.building.insert(key);
            break;
        }
        drop(inner);

        let built = build();

        let mut inner = self.inner.lock();
        inner.building.remove(&key);
        let result = match built {
            Ok(value) => {
                let value = Arc::new(value);
                inner.entries.insert(key, Arc::clone(&value));
                inner.order.push_back(key);
                self.evict(&mut inner);
                Ok(value)
            }
            Err(e) => Err(e),
        };
        self.build_done.notify_all();
        result
    }

    /// Peeks without building; still counts as a use.
    pub fn get(&self, key: u64) -> Option<Arc<T>> {
        let mut inner = self.inner.lock();
        let value = inner.entries.get(&key).map(Arc::clone)?;
        Self::touch(&mut inner, key);
        Some(value)
    }

    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.entries.clear();
        inner.order.clear();
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn touch(inner: &mut Inner<T>, key: u64) {
        if let Some(pos) = inner.order.iter().position(|k| *k == key) {
            inner.order.remove(pos);
            inner.order.push_back(key);
        }
    }

    fn evict(&self, inner: &mut Inner<T>) {
        let mut index = 0;
        while inner.entries.len() > self.capacity && index < inner.order.len() {
            let key = inner.order[index];
            let pinned = inner
                .entries
                .get(&key)
                .is_some_and(|v| Arc::strong_count(v) > 1);
            if pinned {
                // still referenced by the result graph
                index += 1;
                continue;
            }
            inner.order.remove(index);
            inner.entries.remove(&key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_keys_share_one_artifact() {
        let cache: MemoCache<Vec<u8>> = MemoCache::new(4);
        let a = cache.get_or_try_insert_with(7, || Ok(vec![1, 2, 3])).unwrap();
        let b = cache
            .get_or_try_insert_with(7, || panic!("must not rebuild"))
            .unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn capacity_one_keeps_only_last() {
        let cache: MemoCache<u32> = MemoCache::new(1);
        cache.get_or_try_insert_with(1, || Ok(10)).unwrap();
        cache.get_or_try_insert_with(2, || Ok(20)).unwrap();
        assert_eq!(cache.len(), 1);
        assert!(cache.get(1).is_none());
        assert_eq!(*cache.get(2).unwrap(), 20);
    }

    #[test]
    fn lru_evicts_least_recently_used() {
        let cache: MemoCache<u32> = MemoCache::new(2);
        cache.get_or_try_insert_with(1, || Ok(1)).unwrap();
        cache.get_or_try_insert_with(2, || Ok(2)).unwrap();
        cache.get(1); // 2 becomes LRU
        cache.get_or_try_insert_with(3, || Ok(3)).unwrap();
        assert!(cache.get(2).is_none());
        assert!(cache.get(1).is_some());
    }

    #[test]
    fn pinned_entries_survive_eviction() {
        let cache: MemoCache<u32> = MemoCache::new(1);
        let pinned = cache.get_or_try_insert_with(1, || Ok(1)).unwrap();
        cache.get_or_try_insert_with(2, || Ok(2)).unwrap();
        // entry 1 is still referenced: both must be present
        assert!(cache.get(1).is_some());
        assert!(cache.get(2).is_some());
        drop(pinned);
        cache.get_or_try_insert_with(3, || Ok(3)).unwrap();
        assert!(cache.get(1).is_none());
    }

    #[test]
    fn failed_builds_are_not_cached() {
        let cache: MemoCache<u32> = MemoCache::new(2);
        let failed = cache.get_or_try_insert_with(5, || {
            Err(crate::errors::FlareError::BadProject("nope".into()))
        });
        assert!(failed.is_err());
        assert_eq!(*cache.get_or_try_insert_with(5, || Ok(9)).unwrap(), 9);
    }
}

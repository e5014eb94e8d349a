use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::{Arc, RwLock};

use crate::models::Order;

// ============================================================================
// Order Cache - in-memory index of full aggregates
// ============================================================================
//
// Lookup accelerator in front of the order store. Entries are whole
// aggregates keyed by order_uid; there are no partial updates.
//
// One RwLock guards the whole map:
// - get() takes the read lock and uses `peek`, so readers never block readers
// - upsert()/delete() take the write lock
// - nothing under the lock does I/O
//
// Because reads do not touch recency, eviction order is least-recently-written.
//
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("order cache lock poisoned")]
    Poisoned,
}

/// Thread-safe order cache injected into the service.
pub trait OrderCache: Send + Sync {
    /// `Ok(None)` is a miss, not a failure: the caller should consult storage.
    fn get(&self, order_uid: &str) -> Result<Option<Arc<Order>>, CacheError>;

    fn upsert(&self, order: Arc<Order>) -> Result<(), CacheError>;

    /// Administrative removal. Returns whether an entry was present.
    fn delete(&self, order_uid: &str) -> Result<bool, CacheError>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

pub struct LruOrderCache {
    entries: RwLock<LruCache<String, Arc<Order>>>,
    capacity: Option<NonZeroUsize>,
}

impl LruOrderCache {
    /// A capacity of 0 builds an unbounded cache.
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity);
        let entries = match capacity {
            Some(cap) => LruCache::new(cap),
            None => LruCache::unbounded(),
        };

        Self {
            entries: RwLock::new(entries),
            capacity,
        }
    }

    pub fn capacity(&self) -> Option<usize> {
        self.capacity.map(NonZeroUsize::get)
    }
}

impl OrderCache for LruOrderCache {
    fn get(&self, order_uid: &str) -> Result<Option<Arc<Order>>, CacheError> {
        let entries = self.entries.read().map_err(|_| CacheError::Poisoned)?;
        Ok(entries.peek(order_uid).cloned())
    }

    fn upsert(&self, order: Arc<Order>) -> Result<(), CacheError> {
        let order_uid = order.order_uid.clone();
        let evicted = {
            let mut entries = self.entries.write().map_err(|_| CacheError::Poisoned)?;
            entries.push(order_uid.clone(), order)
        };

        match evicted {
            Some((evicted_uid, _)) if evicted_uid != order_uid => {
                tracing::debug!(
                    order_uid = %order_uid,
                    evicted = %evicted_uid,
                    "Cached order, evicted least recently written entry"
                );
            }
            _ => tracing::debug!(order_uid = %order_uid, "Cached order"),
        }

        Ok(())
    }

    fn delete(&self, order_uid: &str) -> Result<bool, CacheError> {
        let removed = self
            .entries
            .write()
            .map_err(|_| CacheError::Poisoned)?
            .pop(order_uid)
            .is_some();

        if removed {
            tracing::debug!(order_uid = %order_uid, "Removed order from cache");
        } else {
            tracing::debug!(order_uid = %order_uid, "Order not in cache");
        }

        Ok(removed)
    }

    fn len(&self) -> usize {
        match self.entries.read() {
            Ok(entries) => entries.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }
}

// ============================================================================
// Unit Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn order(uid: &str, track_number: &str) -> Arc<Order> {
        Arc::new(Order {
            order_uid: uid.to_string(),
            track_number: track_number.to_string(),
            ..Default::default()
        })
    }

    #[test]
    fn test_get_missing_is_not_an_error() {
        let cache = LruOrderCache::new(10);
        assert!(cache.get("nope").unwrap().is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn test_upsert_then_get() {
        let cache = LruOrderCache::new(10);
        cache.upsert(order("o-1", "T1")).unwrap();

        let cached = cache.get("o-1").unwrap().unwrap();
        assert_eq!(cached.track_number, "T1");
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_upsert_replaces_whole_aggregate() {
        let cache = LruOrderCache::new(10);
        cache.upsert(order("o-1", "T1")).unwrap();
        cache.upsert(order("o-1", "T2")).unwrap();

        assert_eq!(cache.get("o-1").unwrap().unwrap().track_number, "T2");
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_delete() {
        let cache = LruOrderCache::new(10);
        cache.upsert(order("o-1", "T1")).unwrap();

        assert!(cache.delete("o-1").unwrap());
        assert!(!cache.delete("o-1").unwrap());
        assert!(cache.get("o-1").unwrap().is_none());
    }

    #[test]
    fn test_evicts_least_recently_written() {
        let cache = LruOrderCache::new(2);
        cache.upsert(order("o-1", "T1")).unwrap();
        cache.upsert(order("o-2", "T2")).unwrap();

        // Reads do not refresh recency.
        cache.get("o-1").unwrap();
        cache.upsert(order("o-3", "T3")).unwrap();

        assert!(cache.get("o-1").unwrap().is_none());
        assert!(cache.get("o-2").unwrap().is_some());
        assert!(cache.get("o-3").unwrap().is_some());
        assert_eq!(cache.capacity(), Some(2));
    }

    #[test]
    fn test_rewrite_refreshes_recency() {
        let cache = LruOrderCache::new(2);
        cache.upsert(order("o-1", "T1")).unwrap();
        cache.upsert(order("o-2", "T2")).unwrap();
        cache.upsert(order("o-1", "T1b")).unwrap();
        cache.upsert(order("o-3", "T3")).unwrap();

        assert!(cache.get("o-1").unwrap().is_some());
        assert!(cache.get("o-2").unwrap().is_none());
    }

    #[test]
    fn test_zero_capacity_is_unbounded() {
        let cache = LruOrderCache::new(0);
        for i in 0..1_000 {
            cache.upsert(order(&format!("o-{}", i), "T")).unwrap();
        }
        assert_eq!(cache.len(), 1_000);
        assert_eq!(cache.capacity(), None);
    }

    #[test]
    fn test_concurrent_readers_and_writers() {
        let cache = Arc::new(LruOrderCache::new(0));
        let mut handles = Vec::new();

        for writer in 0..4 {
            let cache = cache.clone();
            handles.push(thread::spawn(move || {
                for i in 0..250 {
                    cache.upsert(order(&format!("w{}-{}", writer, i), "T")).unwrap();
                }
            }));
        }
        for _ in 0..4 {
            let cache = cache.clone();
            handles.push(thread::spawn(move || {
                for i in 0..250 {
                    let _ = cache.get(&format!("w0-{}", i)).unwrap();
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(cache.len(), 1_000);
    }

    #[test]
    fn test_poisoned_lock_surfaces_as_error() {
        let cache = Arc::new(LruOrderCache::new(10));
        cache.upsert(order("o-1", "T1")).unwrap();

        let poisoner = cache.clone();
        let _ = thread::spawn(move || {
            let _guard = poisoner.entries.write().unwrap();
            panic!("poison the cache lock");
        })
        .join();

        assert!(matches!(cache.get("o-1"), Err(CacheError::Poisoned)));
        assert!(matches!(cache.upsert(order("o-2", "T2")), Err(CacheError::Poisoned)));
        assert_eq!(cache.len(), 1);
    }
}

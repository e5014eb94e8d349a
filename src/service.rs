use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::cache::{CacheError, OrderCache};
use crate::metrics::Metrics;
use crate::models::Order;
use crate::storage::{IsTransient, OrderStore, StoreError};

// ============================================================================
// Order Service
// ============================================================================
//
// Orchestrates: Store (source of truth) → Cache (read accelerator)
//
// - writes go to the store first; the cache only ever sees committed state
// - reads try the cache, fall back to the store, and populate on a miss
// - cache failures are logged and absorbed; store failures are returned
//
// Writes and miss fills for the same order_uid are serialized inside this
// process, so the cache is updated in the same order the store commits and a
// slow read can never put an older snapshot over a newer write.
//
// ============================================================================

const WRITE_STRIPES: usize = 64;

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("order not found: {0}")]
    NotFound(String),

    #[error("failed to persist order {order_uid}: {source}")]
    Persist {
        order_uid: String,
        #[source]
        source: StoreError,
    },

    #[error("failed to read order {order_uid}: {source}")]
    Read {
        order_uid: String,
        #[source]
        source: StoreError,
    },

    #[error("cache warm-up failed: {0}")]
    WarmUp(#[source] StoreError),

    #[error("cache unusable during warm-up: {0}")]
    Cache(#[from] CacheError),
}

impl ServiceError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, ServiceError::NotFound(_))
    }
}

impl IsTransient for ServiceError {
    fn is_transient(&self) -> bool {
        match self {
            ServiceError::Persist { source, .. }
            | ServiceError::Read { source, .. }
            | ServiceError::WarmUp(source) => source.is_transient(),
            ServiceError::NotFound(_) | ServiceError::Cache(_) => false,
        }
    }
}

pub struct OrderService {
    store: Arc<dyn OrderStore>,
    cache: Arc<dyn OrderCache>,
    metrics: Arc<Metrics>,
    write_locks: Vec<Mutex<()>>,
}

impl OrderService {
    pub fn new(store: Arc<dyn OrderStore>, cache: Arc<dyn OrderCache>, metrics: Arc<Metrics>) -> Self {
        Self {
            store,
            cache,
            metrics,
            write_locks: (0..WRITE_STRIPES).map(|_| Mutex::new(())).collect(),
        }
    }

    /// Load every stored order into the cache. Must finish before the service
    /// is handed to the consumer or the HTTP server. Any failure is fatal.
    pub async fn init(&self) -> Result<usize, ServiceError> {
        let orders = self.store.get_all().await.map_err(|e| {
            self.metrics.record_store_failure("get_all");
            ServiceError::WarmUp(e)
        })?;

        let loaded = orders.len();
        for order in orders {
            self.cache.upsert(Arc::new(order))?;
        }

        let cached = self.cache.len();
        self.metrics.set_cache_entries(cached);

        if cached < loaded {
            tracing::warn!(
                loaded,
                cached,
                "Cache capacity is smaller than the stored order count; older orders will be read through"
            );
        }

        tracing::info!(loaded, cached, "Order cache warmed up");
        Ok(loaded)
    }

    /// Persist the full aggregate, then replace the cached copy with what the
    /// store returned. The returned order is the one readers will observe.
    pub async fn upsert_order(&self, order: &Order) -> Result<Arc<Order>, ServiceError> {
        let _guard = self.write_lock(&order.order_uid).lock().await;

        let stored = self.store.upsert(order).await.map_err(|source| {
            self.metrics.record_store_failure("upsert");
            ServiceError::Persist {
                order_uid: order.order_uid.clone(),
                source,
            }
        })?;
        let stored = Arc::new(stored);

        self.cache_put(stored.clone());

        tracing::info!(
            order_uid = %stored.order_uid,
            item_count = stored.items.len(),
            "Order upserted"
        );

        Ok(stored)
    }

    pub async fn get_order(&self, order_uid: &str) -> Result<Arc<Order>, ServiceError> {
        if let Some(order) = self.cached(order_uid) {
            self.metrics.record_cache_lookup(true);
            return Ok(order);
        }
        self.metrics.record_cache_lookup(false);

        let _guard = self.write_lock(order_uid).lock().await;

        // A writer holding the stripe may have filled the entry meanwhile.
        if let Some(order) = self.cached(order_uid) {
            return Ok(order);
        }

        match self.store.get(order_uid).await {
            Ok(order) => {
                let order = Arc::new(order);
                self.cache_put(order.clone());
                tracing::debug!(order_uid = %order_uid, "Order loaded from store");
                Ok(order)
            }
            Err(e) if e.is_not_found() => {
                tracing::debug!(order_uid = %order_uid, error = %e, "Order not found");
                Err(ServiceError::NotFound(order_uid.to_string()))
            }
            Err(source) => {
                self.metrics.record_store_failure("get");
                Err(ServiceError::Read {
                    order_uid: order_uid.to_string(),
                    source,
                })
            }
        }
    }

    /// Drop a cached entry. The stored order is untouched and will be read
    /// through on the next lookup.
    pub fn delete_cached(&self, order_uid: &str) -> Result<bool, CacheError> {
        let removed = self.cache.delete(order_uid)?;
        self.metrics.set_cache_entries(self.cache.len());
        Ok(removed)
    }

    pub fn cached_orders(&self) -> usize {
        self.cache.len()
    }

    fn cached(&self, order_uid: &str) -> Option<Arc<Order>> {
        match self.cache.get(order_uid) {
            Ok(order) => order,
            Err(e) => {
                tracing::warn!(order_uid = %order_uid, error = %e, "Cache read failed, falling back to store");
                None
            }
        }
    }

    fn cache_put(&self, order: Arc<Order>) {
        let order_uid = order.order_uid.clone();
        if let Err(e) = self.cache.upsert(order) {
            tracing::warn!(order_uid = %order_uid, error = %e, "Failed to update cache");
        }
        self.metrics.set_cache_entries(self.cache.len());
    }

    fn write_lock(&self, order_uid: &str) -> &Mutex<()> {
        let mut hasher = DefaultHasher::new();
        order_uid.hash(&mut hasher);
        &self.write_locks[(hasher.finish() as usize) % self.write_locks.len()]
    }
}

// ============================================================================
// Unit Tests
// ============================================================================

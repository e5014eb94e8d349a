//! Test doubles shared by the unit tests: an in-memory `OrderStore` that
//! counts calls and can be told to fail, a cache that always fails, and order
//! fixtures.

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::cache::{CacheError, OrderCache};
use crate::models::{Delivery, Item, Order, Payment};
use crate::storage::{self, OrderStore, Step, StoreError};

/// Store with the same replacement semantics as the PostgreSQL one: items keep
/// their id when their rid survives a re-upsert, new rids get fresh ids, and a
/// set with any rid-less item is replaced wholesale.
#[derive(Default)]
pub struct MemoryOrderStore {
    orders: Mutex<HashMap<String, Order>>,
    next_item_id: AtomicI64,
    pub gets: AtomicUsize,
    pub get_alls: AtomicUsize,
    pub upserts: AtomicUsize,
    pub fail_reads: AtomicBool,
    pub fail_writes: AtomicBool,
    /// Artificial latency inside upsert, to widen race windows.
    pub write_delay: Mutex<Option<Duration>>,
}

impl MemoryOrderStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reads(&self) -> usize {
        self.gets.load(Ordering::SeqCst)
    }

    pub fn writes(&self) -> usize {
        self.upserts.load(Ordering::SeqCst)
    }

    pub fn stored(&self, order_uid: &str) -> Option<Order> {
        self.orders.lock().unwrap().get(order_uid).cloned()
    }

    /// Seed a row directly, bypassing counters.
    pub fn insert(&self, order: Order) {
        let stored = self.assign_item_ids(order, None);
        self.orders
            .lock()
            .unwrap()
            .insert(stored.order_uid.clone(), stored);
    }

    fn assign_item_ids(&self, mut order: Order, previous: Option<&Order>) -> Order {
        let previous = previous.filter(|_| order.items_keyed_by_rid());
        for item in &mut order.items {
            let existing = previous
                .and_then(|prev| prev.items.iter().find(|old| old.has_rid() && old.rid == item.rid))
                .map(|old| old.item_id);
            item.item_id = match existing {
                Some(id) => id,
                None => self.next_item_id.fetch_add(1, Ordering::SeqCst) + 1,
            };
        }
        order.items.sort_by_key(|item| item.item_id);
        order.with_storage_precision()
    }
}

fn unavailable(step: Step) -> StoreError {
    StoreError::at(step)(sqlx::Error::PoolTimedOut)
}

#[async_trait]
impl OrderStore for MemoryOrderStore {
    async fn get(&self, order_uid: &str) -> storage::Result<Order> {
        self.gets.fetch_add(1, Ordering::SeqCst);
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(unavailable(Step::ReadOrder));
        }
        self.stored(order_uid)
            .ok_or_else(|| StoreError::NotFound(order_uid.to_string()))
    }

    async fn get_all(&self) -> storage::Result<Vec<Order>> {
        self.get_alls.fetch_add(1, Ordering::SeqCst);
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(unavailable(Step::ReadOrder));
        }
        Ok(self.orders.lock().unwrap().values().cloned().collect())
    }

    async fn upsert(&self, order: &Order) -> storage::Result<Order> {
        self.upserts.fetch_add(1, Ordering::SeqCst);
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(unavailable(Step::UpsertOrder));
        }

        let delay = *self.write_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut orders = self.orders.lock().unwrap();
        let stored = self.assign_item_ids(order.clone(), orders.get(&order.order_uid));
        orders.insert(stored.order_uid.clone(), stored.clone());
        Ok(stored)
    }
}

/// Cache whose every operation fails, as if its lock were poisoned.
pub struct BrokenCache;

impl OrderCache for BrokenCache {
    fn get(&self, _order_uid: &str) -> Result<Option<Arc<Order>>, CacheError> {
        Err(CacheError::Poisoned)
    }

    fn upsert(&self, _order: Arc<Order>) -> Result<(), CacheError> {
        Err(CacheError::Poisoned)
    }

    fn delete(&self, _order_uid: &str) -> Result<bool, CacheError> {
        Err(CacheError::Poisoned)
    }

    fn len(&self) -> usize {
        0
    }
}

/// A complete order with one delivery, one payment and two items.
pub fn sample_order(order_uid: &str) -> Order {
    let created = Utc.with_ymd_and_hms(2024, 3, 1, 10, 30, 0).unwrap();

    Order {
        order_uid: order_uid.to_string(),
        track_number: "TN1234567890".into(),
        entry: "WBIL".into(),
        locale: "en".into(),
        customer_id: "Cust123".into(),
        delivery_service: "TestService".into(),
        shardkey: "9".into(),
        sm_id: 99,
        date_created: created,
        oof_shard: "1".into(),
        delivery: Delivery {
            name: "John Doe".into(),
            phone: "+1234567890".into(),
            zip: "2639809".into(),
            city: "TestCity".into(),
            address: "123 Test St".into(),
            region: "Kraiot".into(),
            email: "john@example.com".into(),
        },
        payment: Payment {
            transaction: "TX1234567890".into(),
            currency: "USD".into(),
            provider: "TestProvider".into(),
            amount: Decimal::new(15000, 2),
            payment_dt: created,
            bank: "alpha".into(),
            delivery_cost: Decimal::new(500, 2),
            goods_total: Decimal::new(14500, 2),
            custom_fee: Decimal::ZERO,
            ..Default::default()
        },
        items: vec![
            sample_item("rid-1", "Test Item 1", Decimal::new(10000, 2)),
            sample_item("rid-2", "Test Item 2", Decimal::new(5000, 2)),
        ],
        ..Default::default()
    }
}

pub fn sample_item(rid: &str, name: &str, price: Decimal) -> Item {
    Item {
        rid: rid.to_string(),
        track_number: "TN1234567890".into(),
        price,
        name: name.to_string(),
        total_price: price,
        nm_id: 1001,
        brand: "TestBrand".into(),
        status: 202,
        ..Default::default()
    }
}

/// Compare ignoring storage-assigned item ids.
pub fn without_item_ids(order: &Order) -> Order {
    let mut order = order.clone();
    for item in &mut order.items {
        item.item_id = 0;
    }
    order
}

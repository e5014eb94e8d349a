// ============================================================================
// Order Store - durable source of truth
// ============================================================================
//
// The normalized schema (orders, delivery, payment, items) behind an
// aggregate-level contract: an order is always read and written whole.
//
// ============================================================================

mod error;
mod postgres;
mod rows;
mod upsert;

use async_trait::async_trait;

use crate::models::Order;

pub use error::{Entity, IsTransient, Result, Step, StoreError};
pub use postgres::{PgOrderStore, StoreConfig};

#[async_trait]
pub trait OrderStore: Send + Sync {
    /// Read one complete aggregate from a single snapshot.
    async fn get(&self, order_uid: &str) -> Result<Order>;

    /// Read every complete aggregate. Used to warm the cache at startup.
    async fn get_all(&self) -> Result<Vec<Order>>;

    /// Atomically replace the stored aggregate with `order`, creating it if
    /// needed. Returns the stored form, including storage-assigned item ids.
    async fn upsert(&self, order: &Order) -> Result<Order>;
}

use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::{Postgres, Transaction};
use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;

use super::error::{Entity, Result, Step, StoreError};
use super::rows::{self, DELIVERY_COLUMNS, ITEM_COLUMNS, ORDER_COLUMNS, PAYMENT_COLUMNS};
use super::OrderStore;
use crate::models::{Delivery, Item, Order, Payment};

// ============================================================================
// PostgreSQL Order Store
// ============================================================================
//
// Reads run in a REPEATABLE READ, READ ONLY transaction so the header and its
// three child tables come from one snapshot: a concurrent writer replacing
// the items can never be observed half-way.
//
// Writes live in upsert.rs.
//
// Every public operation runs under a deadline. Dropping the future (deadline
// or caller cancellation) drops the open transaction, which rolls it back.
//
// ============================================================================

#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub database_url: String,
    pub max_connections: u32,
    /// Deadline for a single get/upsert, also used as the pool acquire timeout.
    pub operation_timeout: Duration,
    /// Deadline for the startup bulk read.
    pub warm_up_timeout: Duration,
}

pub struct PgOrderStore {
    pub(super) pool: PgPool,
    operation_timeout: Duration,
    warm_up_timeout: Duration,
}

impl PgOrderStore {
    pub async fn connect(config: &StoreConfig) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(config.operation_timeout)
            .connect(&config.database_url)
            .await
            .map_err(StoreError::at(Step::Connect))?;

        tracing::info!(
            max_connections = config.max_connections,
            operation_timeout_ms = config.operation_timeout.as_millis() as u64,
            "Connected to PostgreSQL"
        );

        Ok(Self::from_pool(pool, config.operation_timeout, config.warm_up_timeout))
    }

    fn from_pool(pool: PgPool, operation_timeout: Duration, warm_up_timeout: Duration) -> Self {
        Self {
            pool,
            operation_timeout,
            warm_up_timeout,
        }
    }

    /// Apply the embedded schema migrations.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        tracing::info!("Database migrations applied");
        Ok(())
    }

    async fn begin_snapshot(&self) -> Result<Transaction<'static, Postgres>> {
        let mut tx = self.pool.begin().await.map_err(StoreError::at(Step::Begin))?;

        sqlx::query("SET TRANSACTION ISOLATION LEVEL REPEATABLE READ, READ ONLY")
            .execute(&mut *tx)
            .await
            .map_err(StoreError::at(Step::SetIsolation))?;

        Ok(tx)
    }

    async fn read_order(&self, order_uid: &str) -> Result<Order> {
        let mut tx = self.begin_snapshot().await?;

        let sql = format!("SELECT {ORDER_COLUMNS} FROM orders WHERE order_uid = $1");
        let row = sqlx::query(&sql)
            .bind(order_uid)
            .fetch_optional(&mut *tx)
            .await
            .map_err(StoreError::at(Step::ReadOrder))?
            .ok_or_else(|| StoreError::NotFound(order_uid.to_string()))?;
        let mut order = rows::order_header(&row).map_err(StoreError::at(Step::ReadOrder))?;

        let sql = format!("SELECT {DELIVERY_COLUMNS} FROM delivery WHERE order_uid = $1");
        let row = sqlx::query(&sql)
            .bind(order_uid)
            .fetch_optional(&mut *tx)
            .await
            .map_err(StoreError::at(Step::ReadDelivery))?
            .ok_or_else(|| missing(order_uid, Entity::Delivery))?;
        order.delivery = rows::delivery(&row).map_err(StoreError::at(Step::ReadDelivery))?.1;

        let sql = format!("SELECT {PAYMENT_COLUMNS} FROM payment WHERE order_uid = $1");
        let row = sqlx::query(&sql)
            .bind(order_uid)
            .fetch_optional(&mut *tx)
            .await
            .map_err(StoreError::at(Step::ReadPayment))?
            .ok_or_else(|| missing(order_uid, Entity::Payment))?;
        order.payment = rows::payment(&row).map_err(StoreError::at(Step::ReadPayment))?.1;

        let sql = format!("SELECT {ITEM_COLUMNS} FROM items WHERE order_uid = $1 ORDER BY item_id");
        order.items = sqlx::query(&sql)
            .bind(order_uid)
            .fetch_all(&mut *tx)
            .await
            .map_err(StoreError::at(Step::ReadItems))?
            .iter()
            .map(|row| rows::item(row).map(|(_, item)| item))
            .collect::<std::result::Result<_, _>>()
            .map_err(StoreError::at(Step::ReadItems))?;

        tx.commit().await.map_err(StoreError::at(Step::Commit))?;

        Ok(order)
    }

    async fn read_all(&self) -> Result<Vec<Order>> {
        let mut tx = self.begin_snapshot().await?;

        let sql = format!("SELECT {ORDER_COLUMNS} FROM orders ORDER BY date_created, order_uid");
        let headers = sqlx::query(&sql)
            .fetch_all(&mut *tx)
            .await
            .map_err(StoreError::at(Step::ReadOrder))?
            .iter()
            .map(rows::order_header)
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(StoreError::at(Step::ReadOrder))?;

        let sql = format!("SELECT {DELIVERY_COLUMNS} FROM delivery");
        let mut deliveries: HashMap<String, Delivery> = sqlx::query(&sql)
            .fetch_all(&mut *tx)
            .await
            .map_err(StoreError::at(Step::ReadDelivery))?
            .iter()
            .map(rows::delivery)
            .collect::<std::result::Result<_, _>>()
            .map_err(StoreError::at(Step::ReadDelivery))?;

        let sql = format!("SELECT {PAYMENT_COLUMNS} FROM payment");
        let mut payments: HashMap<String, Payment> = sqlx::query(&sql)
            .fetch_all(&mut *tx)
            .await
            .map_err(StoreError::at(Step::ReadPayment))?
            .iter()
            .map(rows::payment)
            .collect::<std::result::Result<_, _>>()
            .map_err(StoreError::at(Step::ReadPayment))?;

        let sql = format!("SELECT {ITEM_COLUMNS} FROM items ORDER BY order_uid, item_id");
        let item_rows = sqlx::query(&sql)
            .fetch_all(&mut *tx)
            .await
            .map_err(StoreError::at(Step::ReadItems))?;
        let mut items: HashMap<String, Vec<Item>> = HashMap::new();
        for row in &item_rows {
            let (order_uid, item) = rows::item(row).map_err(StoreError::at(Step::ReadItems))?;
            items.entry(order_uid).or_default().push(item);
        }

        tx.commit().await.map_err(StoreError::at(Step::Commit))?;

        Ok(assemble(headers, &mut deliveries, &mut payments, &mut items))
    }
}

/// Bound `fut` by `deadline`. On expiry the future is dropped, which rolls back
/// any transaction it holds.
async fn with_deadline<T, F>(operation: &'static str, deadline: Duration, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(deadline, fut).await {
        Ok(result) => result,
        Err(_) => Err(StoreError::Timeout {
            operation,
            elapsed: deadline,
        }),
    }
}

fn missing(order_uid: &str, entity: Entity) -> StoreError {
    StoreError::MissingEntity {
        order_uid: order_uid.to_string(),
        entity,
    }
}

/// Hash-join child rows onto their headers. Headers without a delivery or
/// payment row are incomplete aggregates and are left out.
fn assemble(
    headers: Vec<Order>,
    deliveries: &mut HashMap<String, Delivery>,
    payments: &mut HashMap<String, Payment>,
    items: &mut HashMap<String, Vec<Item>>,
) -> Vec<Order> {
    let mut orders = Vec::with_capacity(headers.len());

    for mut order in headers {
        let (Some(delivery), Some(payment)) = (
            deliveries.remove(&order.order_uid),
            payments.remove(&order.order_uid),
        ) else {
            tracing::warn!(
                order_uid = %order.order_uid,
                "Skipping incomplete order: missing delivery or payment"
            );
            continue;
        };

        order.delivery = delivery;
        order.payment = payment;
        order.items = items.remove(&order.order_uid).unwrap_or_default();
        orders.push(order);
    }

    orders
}

#[async_trait]
impl OrderStore for PgOrderStore {
    async fn get(&self, order_uid: &str) -> Result<Order> {
        with_deadline("get", self.operation_timeout, self.read_order(order_uid))
            .await
    }

    async fn get_all(&self) -> Result<Vec<Order>> {
        with_deadline("get_all", self.warm_up_timeout, self.read_all())
            .await
    }

    async fn upsert(&self, order: &Order) -> Result<Order> {
        with_deadline("upsert", self.operation_timeout, self.write_order(order))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::IsTransient;

    fn header(uid: &str) -> Order {
        Order {
            order_uid: uid.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_assemble_joins_children_by_order_uid() {
        let mut deliveries = HashMap::from([
            ("a".to_string(), Delivery { city: "A-city".into(), ..Default::default() }),
            ("b".to_string(), Delivery { city: "B-city".into(), ..Default::default() }),
        ]);
        let mut payments = HashMap::from([
            ("a".to_string(), Payment { currency: "USD".into(), ..Default::default() }),
            ("b".to_string(), Payment { currency: "EUR".into(), ..Default::default() }),
        ]);
        let mut items = HashMap::from([(
            "a".to_string(),
            vec![
                Item { rid: "a1".into(), ..Default::default() },
                Item { rid: "a2".into(), ..Default::default() },
            ],
        )]);

        let orders = assemble(
            vec![header("a"), header("b")],
            &mut deliveries,
            &mut payments,
            &mut items,
        );

        assert_eq!(orders.len(), 2);
        assert_eq!(orders[0].delivery.city, "A-city");
        assert_eq!(orders[0].payment.currency, "USD");
        assert_eq!(orders[0].items.len(), 2);
        assert_eq!(orders[1].delivery.city, "B-city");
        assert!(orders[1].items.is_empty());
    }

    #[test]
    fn test_assemble_skips_incomplete_orders() {
        let mut deliveries = HashMap::from([("a".to_string(), Delivery::default())]);
        let mut payments = HashMap::from([("b".to_string(), Payment::default())]);
        let mut items = HashMap::new();

        let orders = assemble(
            vec![header("a"), header("b")],
            &mut deliveries,
            &mut payments,
            &mut items,
        );

        assert!(orders.is_empty());
    }

    #[tokio::test]
    async fn test_deadline_expiry_is_transient_timeout() {
        let result: Result<Order> = with_deadline(
            "get",
            Duration::from_millis(20),
            std::future::pending(),
        )
        .await;

        let err = result.unwrap_err();
        assert!(matches!(
            err,
            StoreError::Timeout { operation: "get", elapsed } if elapsed == Duration::from_millis(20)
        ));
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn test_deadline_passes_through_inner_result() {
        let ok = with_deadline("upsert", Duration::from_secs(1), async { Ok(7) }).await;
        assert_eq!(ok.unwrap(), 7);

        let err = with_deadline::<(), _>("get", Duration::from_secs(1), async {
            Err(StoreError::NotFound("o-1".into()))
        })
        .await
        .unwrap_err();
        assert!(err.is_not_found());
    }
}

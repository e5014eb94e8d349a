use sqlx::postgres::PgConnection;
use sqlx::{Postgres, QueryBuilder};

use super::error::{Result, Step, StoreError};
use super::postgres::PgOrderStore;
use super::rows::{self, ITEM_COLUMNS};
use crate::models::{Delivery, Item, Order, Payment};

// ============================================================================
// Aggregate Upsert - one transaction per order
// ============================================================================
//
// 1. BEGIN
// 2. header   INSERT .. ON CONFLICT (order_uid) DO UPDATE
// 3. delivery INSERT .. ON CONFLICT (order_uid) DO UPDATE
// 4. payment  INSERT .. ON CONFLICT (order_uid) DO UPDATE
// 5. items    every item has a rid:
//               INSERT .. ON CONFLICT (order_uid, rid) DO UPDATE,
//               then DELETE the rids not in the new set
//             otherwise:
//               DELETE all items of the order, then INSERT the new set
// 6. COMMIT
//
// The header conflict-upsert takes the row lock on orders(order_uid) first,
// so a second writer for the same order waits there until the first commits
// and then overwrites every table in full. No existence checks, no merges.
//
// Any `?` before step 6 drops the transaction, and sqlx rolls it back.
//
// ============================================================================

impl PgOrderStore {
    pub(super) async fn write_order(&self, order: &Order) -> Result<Order> {
        let order_uid = order.order_uid.as_str();

        let mut tx = self.pool.begin().await.map_err(StoreError::at(Step::Begin))?;

        upsert_header(&mut tx, order).await?;
        upsert_delivery(&mut tx, order_uid, &order.delivery).await?;
        upsert_payment(&mut tx, order_uid, &order.payment).await?;
        let items = if order.items_keyed_by_rid() {
            reconcile_items(&mut tx, order_uid, &order.items).await?
        } else {
            replace_items(&mut tx, order_uid, &order.items).await?
        };

        tx.commit().await.map_err(StoreError::at(Step::Commit))?;

        tracing::debug!(
            order_uid = %order_uid,
            item_count = items.len(),
            "Order aggregate committed"
        );

        let mut stored = order.clone().with_storage_precision();
        stored.items = items;

        Ok(stored)
    }
}

async fn upsert_header(conn: &mut PgConnection, order: &Order) -> Result<()> {
    sqlx::query(
        "INSERT INTO orders (order_uid, track_number, entry, locale, internal_signature,
                             customer_id, delivery_service, shardkey, sm_id, date_created, oof_shard)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
         ON CONFLICT (order_uid) DO UPDATE SET
             track_number = EXCLUDED.track_number,
             entry = EXCLUDED.entry,
             locale = EXCLUDED.locale,
             internal_signature = EXCLUDED.internal_signature,
             customer_id = EXCLUDED.customer_id,
             delivery_service = EXCLUDED.delivery_service,
             shardkey = EXCLUDED.shardkey,
             sm_id = EXCLUDED.sm_id,
             date_created = EXCLUDED.date_created,
             oof_shard = EXCLUDED.oof_shard,
             updated_at = now()",
    )
    .bind(&order.order_uid)
    .bind(&order.track_number)
    .bind(&order.entry)
    .bind(&order.locale)
    .bind(&order.internal_signature)
    .bind(&order.customer_id)
    .bind(&order.delivery_service)
    .bind(&order.shardkey)
    .bind(order.sm_id)
    .bind(order.date_created)
    .bind(&order.oof_shard)
    .execute(conn)
    .await
    .map_err(StoreError::at(Step::UpsertOrder))?;

    Ok(())
}

async fn upsert_delivery(conn: &mut PgConnection, order_uid: &str, delivery: &Delivery) -> Result<()> {
    sqlx::query(
        "INSERT INTO delivery (order_uid, name, phone, zip, city, address, region, email)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
         ON CONFLICT (order_uid) DO UPDATE SET
             name = EXCLUDED.name,
             phone = EXCLUDED.phone,
             zip = EXCLUDED.zip,
             city = EXCLUDED.city,
             address = EXCLUDED.address,
             region = EXCLUDED.region,
             email = EXCLUDED.email",
    )
    .bind(order_uid)
    .bind(&delivery.name)
    .bind(&delivery.phone)
    .bind(&delivery.zip)
    .bind(&delivery.city)
    .bind(&delivery.address)
    .bind(&delivery.region)
    .bind(&delivery.email)
    .execute(conn)
    .await
    .map_err(StoreError::at(Step::UpsertDelivery))?;

    Ok(())
}

async fn upsert_payment(conn: &mut PgConnection, order_uid: &str, payment: &Payment) -> Result<()> {
    sqlx::query(
        "INSERT INTO payment (order_uid, transaction, request_id, currency, provider, amount,
                              payment_dt, bank, delivery_cost, goods_total, custom_fee)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
         ON CONFLICT (order_uid) DO UPDATE SET
             transaction = EXCLUDED.transaction,
             request_id = EXCLUDED.request_id,
             currency = EXCLUDED.currency,
             provider = EXCLUDED.provider,
             amount = EXCLUDED.amount,
             payment_dt = EXCLUDED.payment_dt,
             bank = EXCLUDED.bank,
             delivery_cost = EXCLUDED.delivery_cost,
             goods_total = EXCLUDED.goods_total,
             custom_fee = EXCLUDED.custom_fee",
    )
    .bind(order_uid)
    .bind(&payment.transaction)
    .bind(&payment.request_id)
    .bind(&payment.currency)
    .bind(&payment.provider)
    .bind(payment.amount)
    .bind(payment.payment_dt)
    .bind(&payment.bank)
    .bind(payment.delivery_cost)
    .bind(payment.goods_total)
    .bind(payment.custom_fee)
    .execute(conn)
    .await
    .map_err(StoreError::at(Step::UpsertPayment))?;

    Ok(())
}

/// Make the stored item set for `order_uid` equal `items`, keyed by rid.
/// Surviving rids keep their item_id. Returns the stored rows ordered by
/// item_id, the order `get` reads them in.
async fn reconcile_items(conn: &mut PgConnection, order_uid: &str, items: &[Item]) -> Result<Vec<Item>> {
    let mut stored = Vec::new();

    if !items.is_empty() {
        let mut builder = insert_items(order_uid, items);
        builder.push(
            " ON CONFLICT (order_uid, rid) WHERE rid <> '' DO UPDATE SET
                 track_number = EXCLUDED.track_number,
                 price = EXCLUDED.price,
                 name = EXCLUDED.name,
                 sale = EXCLUDED.sale,
                 size = EXCLUDED.size,
                 total_price = EXCLUDED.total_price,
                 nm_id = EXCLUDED.nm_id,
                 brand = EXCLUDED.brand,
                 status = EXCLUDED.status",
        );
        stored = fetch_returned(conn, builder).await?;
    }

    let rids: Vec<String> = items.iter().map(|item| item.rid.clone()).collect();
    let removed = sqlx::query("DELETE FROM items WHERE order_uid = $1 AND NOT (rid = ANY($2))")
        .bind(order_uid)
        .bind(&rids)
        .execute(&mut *conn)
        .await
        .map_err(StoreError::at(Step::DeleteStaleItems))?
        .rows_affected();

    if removed > 0 {
        tracing::debug!(order_uid = %order_uid, removed, "Removed stale items");
    }

    stored.sort_by_key(|item| item.item_id);
    Ok(stored)
}

/// Items without a rid have no identity across re-ingests, so the whole set
/// is replaced and every item gets a fresh item_id.
async fn replace_items(conn: &mut PgConnection, order_uid: &str, items: &[Item]) -> Result<Vec<Item>> {
    let removed = sqlx::query("DELETE FROM items WHERE order_uid = $1")
        .bind(order_uid)
        .execute(&mut *conn)
        .await
        .map_err(StoreError::at(Step::DeleteStaleItems))?
        .rows_affected();

    tracing::debug!(order_uid = %order_uid, removed, "Replacing unkeyed item set");

    if items.is_empty() {
        return Ok(Vec::new());
    }

    let mut stored = fetch_returned(conn, insert_items(order_uid, items)).await?;
    stored.sort_by_key(|item| item.item_id);
    Ok(stored)
}

fn insert_items<'a>(order_uid: &'a str, items: &'a [Item]) -> QueryBuilder<'a, Postgres> {
    let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(
        "INSERT INTO items (order_uid, rid, track_number, price, name, sale, size,
                            total_price, nm_id, brand, status) ",
    );
    builder.push_values(items, |mut row, item| {
        row.push_bind(order_uid)
            .push_bind(&item.rid)
            .push_bind(&item.track_number)
            .push_bind(item.price)
            .push_bind(&item.name)
            .push_bind(item.sale)
            .push_bind(&item.size)
            .push_bind(item.total_price)
            .push_bind(item.nm_id)
            .push_bind(&item.brand)
            .push_bind(item.status);
    });
    builder
}

async fn fetch_returned(conn: &mut PgConnection, mut builder: QueryBuilder<'_, Postgres>) -> Result<Vec<Item>> {
    builder.push(" RETURNING ");
    builder.push(ITEM_COLUMNS);

    let returned = builder
        .build()
        .fetch_all(&mut *conn)
        .await
        .map_err(StoreError::at(Step::UpsertItems))?;

    returned
        .iter()
        .map(|row| rows::item(row).map(|(_, item)| item))
        .collect::<std::result::Result<_, _>>()
        .map_err(StoreError::at(Step::UpsertItems))
}

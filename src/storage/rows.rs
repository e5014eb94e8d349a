use sqlx::postgres::PgRow;
use sqlx::Row;

use crate::models::{Delivery, Item, Order, Payment};

// Column lists shared by the single-order and bulk reads. Every list starts
// with order_uid so bulk rows can be grouped by their parent.

pub(super) const ORDER_COLUMNS: &str = "order_uid, track_number, entry, locale, \
    internal_signature, customer_id, delivery_service, shardkey, sm_id, date_created, oof_shard";

pub(super) const DELIVERY_COLUMNS: &str =
    "order_uid, name, phone, zip, city, address, region, email";

pub(super) const PAYMENT_COLUMNS: &str = "order_uid, transaction, request_id, currency, \
    provider, amount, payment_dt, bank, delivery_cost, goods_total, custom_fee";

pub(super) const ITEM_COLUMNS: &str = "order_uid, item_id, rid, track_number, price, name, \
    sale, size, total_price, nm_id, brand, status";

/// Header fields only; delivery, payment and items are attached by the caller.
pub(super) fn order_header(row: &PgRow) -> Result<Order, sqlx::Error> {
    Ok(Order {
        order_uid: row.try_get("order_uid")?,
        track_number: row.try_get("track_number")?,
        entry: row.try_get("entry")?,
        locale: row.try_get("locale")?,
        internal_signature: row.try_get("internal_signature")?,
        customer_id: row.try_get("customer_id")?,
        delivery_service: row.try_get("delivery_service")?,
        shardkey: row.try_get("shardkey")?,
        sm_id: row.try_get("sm_id")?,
        date_created: row.try_get("date_created")?,
        oof_shard: row.try_get("oof_shard")?,
        ..Default::default()
    })
}

pub(super) fn delivery(row: &PgRow) -> Result<(String, Delivery), sqlx::Error> {
    let delivery = Delivery {
        name: row.try_get("name")?,
        phone: row.try_get("phone")?,
        zip: row.try_get("zip")?,
        city: row.try_get("city")?,
        address: row.try_get("address")?,
        region: row.try_get("region")?,
        email: row.try_get("email")?,
    };
    Ok((row.try_get("order_uid")?, delivery))
}

pub(super) fn payment(row: &PgRow) -> Result<(String, Payment), sqlx::Error> {
    let payment = Payment {
        transaction: row.try_get("transaction")?,
        request_id: row.try_get("request_id")?,
        currency: row.try_get("currency")?,
        provider: row.try_get("provider")?,
        amount: row.try_get("amount")?,
        payment_dt: row.try_get("payment_dt")?,
        bank: row.try_get("bank")?,
        delivery_cost: row.try_get("delivery_cost")?,
        goods_total: row.try_get("goods_total")?,
        custom_fee: row.try_get("custom_fee")?,
    };
    Ok((row.try_get("order_uid")?, payment))
}

pub(super) fn item(row: &PgRow) -> Result<(String, Item), sqlx::Error> {
    let item = Item {
        item_id: row.try_get("item_id")?,
        rid: row.try_get("rid")?,
        track_number: row.try_get("track_number")?,
        price: row.try_get("price")?,
        name: row.try_get("name")?,
        sale: row.try_get("sale")?,
        size: row.try_get("size")?,
        total_price: row.try_get("total_price")?,
        nm_id: row.try_get("nm_id")?,
        brand: row.try_get("brand")?,
        status: row.try_get("status")?,
    };
    Ok((row.try_get("order_uid")?, item))
}

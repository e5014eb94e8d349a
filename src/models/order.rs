use chrono::{DateTime, SubsecRound, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

// ============================================================================
// Order Aggregate
// ============================================================================
//
// Wire format is lowerCamelCase JSON. Every field defaults when missing, so a
// sparse message decodes to empty strings / zeroes rather than failing.
//
// Children never carry their own copy of order_uid: the store stamps the
// parent's identifier on every child row.
//
// ============================================================================

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct Order {
    pub order_uid: String,
    pub track_number: String,
    pub entry: String,
    pub locale: String,
    pub internal_signature: String,
    pub customer_id: String,
    pub delivery_service: String,
    pub shardkey: String,
    pub sm_id: i32,
    pub date_created: DateTime<Utc>,
    pub oof_shard: String,
    pub delivery: Delivery,
    pub payment: Payment,
    pub items: Vec<Item>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct Delivery {
    pub name: String,
    pub phone: String,
    pub zip: String,
    pub city: String,
    pub address: String,
    pub region: String,
    pub email: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct Payment {
    pub transaction: String,
    pub request_id: String,
    pub currency: String,
    pub provider: String,
    pub amount: Decimal,
    pub payment_dt: DateTime<Utc>,
    pub bank: String,
    pub delivery_cost: Decimal,
    pub goods_total: Decimal,
    pub custom_fee: Decimal,
}

/// A line item. `item_id` is assigned by storage on first insert. `rid` is the
/// optional business key that identifies the item within its order across
/// re-ingests.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct Item {
    pub item_id: i64,
    pub rid: String,
    pub track_number: String,
    pub price: Decimal,
    pub name: String,
    pub sale: i32,
    pub size: String,
    pub total_price: Decimal,
    pub nm_id: i64,
    pub brand: String,
    pub status: i32,
}

impl Order {
    /// Truncate timestamps to the microsecond precision PostgreSQL keeps, so an
    /// order compares equal before and after a storage round trip.
    pub fn with_storage_precision(mut self) -> Self {
        self.date_created = self.date_created.trunc_subsecs(6);
        self.payment.payment_dt = self.payment.payment_dt.trunc_subsecs(6);
        self
    }

    /// True when every item carries a rid, so the stored set can be
    /// reconciled per item instead of replaced wholesale.
    pub fn items_keyed_by_rid(&self) -> bool {
        self.items.iter().all(Item::has_rid)
    }
}

impl Item {
    pub fn has_rid(&self) -> bool {
        !self.rid.is_empty()
    }
}

// ============================================================================
// Unit Tests
// ============================================================================

//! Cart Aggregate (server side)

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::aggregates::product::ItemLabel;
use crate::domain::value_objects::ItemRef;

/// One cart per customer, created on first add and never deleted.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Cart {
    pub id: Uuid,
    pub customer_id: Uuid,
    pub created_at: DateTime<Utc>,
}

impl Cart {
    pub fn for_customer(customer_id: Uuid) -> Self {
        Self { id: Uuid::now_v7(), customer_id, created_at: Utc::now() }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CartItem {
    pub id: Uuid,
    pub cart_id: Uuid,
    #[serde(flatten)]
    pub item: ItemRef,
    pub quantity: i32,
    pub added_at: DateTime<Utc>,
}

impl CartItem {
    pub fn new(cart_id: Uuid, item: ItemRef, quantity: i32) -> Self {
        Self { id: Uuid::now_v7(), cart_id, item, quantity, added_at: Utc::now() }
    }

    /// Add-or-increment on duplicate adds.
    pub fn absorb(&mut self, quantity: i32) { self.quantity = self.quantity.saturating_add(quantity); }
}

/// Cart entry joined with current catalog data. The client renders the same shape for session carts.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CartLine {
    #[serde(flatten)]
    pub item: ItemRef,
    pub quantity: i32,
    pub name: String,
    pub price: Decimal,
    pub discount_price: Option<Decimal>,
    pub image: Option<String>,
    pub seller_id: Option<Uuid>,
}

impl CartLine {
    pub fn from_label(item: ItemRef, quantity: i32, label: ItemLabel) -> Self {
        Self { item, quantity, name: label.name, price: label.price, discount_price: label.discount_price, image: label.image, seller_id: Some(label.seller_id) }
    }
    pub fn line_total(&self) -> Decimal { self.discount_price.unwrap_or(self.price) * Decimal::from(self.quantity) }
}

pub fn subtotal(lines: &[CartLine]) -> Decimal { lines.iter().map(CartLine::line_total).sum() }

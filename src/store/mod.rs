//! Data store capability consumed by the order and cart services.
//!
//! A [`Store`] is constructed once at process start and handed to every
//! service as an `Arc`. Stock counters are only ever changed through a
//! [`StoreTx`]; dropping a transaction without calling [`StoreTx::commit`]
//! discards every write made through it.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use std::collections::HashMap;
use uuid::Uuid;

use crate::domain::aggregates::{
    CartItem, CartLine, Customer, ItemLabel, MysteryBox, Order, OrderCancellation, OrderItem, Product,
};
use crate::domain::value_objects::ItemRef;
use crate::Result;

/// Reported when an order already carries a cancellation record.
pub const ALREADY_CANCELLED: &str = "Order has already been cancelled";

pub use memory::MemoryStore;
pub use postgres::PgStore;

/// Offset pagination for seller order listings.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Page {
    pub page: u32,
    pub limit: u32,
}

impl Page {
    pub fn new(page: Option<u32>, limit: Option<u32>) -> Self {
        Self { page: page.unwrap_or(1).max(1), limit: limit.unwrap_or(20).clamp(1, 100) }
    }
    pub fn offset(&self) -> i64 { i64::from(self.page - 1) * i64::from(self.limit) }
}

#[async_trait]
pub trait Store: Send + Sync + 'static {
    type Tx: StoreTx;

    async fn begin(&self) -> Result<Self::Tx>;

    async fn product(&self, id: i64) -> Result<Option<Product>>;
    async fn mystery_box(&self, id: i64) -> Result<Option<MysteryBox>>;
    /// Display data for each reference that still resolves. Deleted items are included.
    async fn item_labels(&self, items: &[ItemRef]) -> Result<HashMap<ItemRef, ItemLabel>>;
    async fn customers(&self, ids: &[Uuid]) -> Result<HashMap<Uuid, Customer>>;

    async fn order_with_items(&self, id: Uuid) -> Result<Option<(Order, Vec<OrderItem>)>>;
    async fn order_by_number(&self, order_number: &str) -> Result<Option<(Order, Vec<OrderItem>)>>;
    async fn cancellation_for(&self, order_id: Uuid) -> Result<Option<OrderCancellation>>;
    /// Newest first.
    async fn orders_for_customer(&self, customer_id: Uuid) -> Result<Vec<(Order, Vec<OrderItem>)>>;
    /// Orders with at least one line sold by `seller_id`, newest first, with only that seller's lines.
    async fn orders_for_seller(&self, seller_id: Uuid, page: Page) -> Result<(Vec<(Order, Vec<OrderItem>)>, i64)>;

    /// Creates the customer's cart on first use, then adds or increments the line.
    async fn add_cart_item(&self, customer_id: Uuid, item: ItemRef, quantity: i32) -> Result<CartItem>;
    /// Returns false when the line does not exist.
    async fn set_cart_item_quantity(&self, customer_id: Uuid, item: ItemRef, quantity: i32) -> Result<bool>;
    async fn remove_cart_item(&self, customer_id: Uuid, item: ItemRef) -> Result<bool>;
    /// Lines in insertion order, joined with catalog data. Lines whose item no longer resolves are skipped.
    async fn cart_lines(&self, customer_id: Uuid) -> Result<Vec<CartLine>>;
}

/// One atomic unit of work.
#[async_trait]
pub trait StoreTx: Send + Sized {
    async fn product(&mut self, id: i64) -> Result<Option<Product>>;
    async fn mystery_box(&mut self, id: i64) -> Result<Option<MysteryBox>>;
    async fn order_by_idempotency_key(&mut self, key: &str) -> Result<Option<Order>>;

    /// `stock -= qty, sales += qty` only if `stock >= qty`. Returns false when nothing changed.
    async fn sell_product(&mut self, id: i64, qty: i32) -> Result<bool>;
    /// `stock -= qty` only if `stock >= qty`; sales untouched.
    async fn withdraw_product(&mut self, id: i64, qty: i32) -> Result<bool>;
    /// `stock += qty, sales -= qty` (sales floored at zero).
    async fn unsell_product(&mut self, id: i64, qty: i32) -> Result<()>;
    async fn restore_product(&mut self, id: i64, qty: i32) -> Result<()>;
    async fn sell_mystery_box(&mut self, id: i64, qty: i32) -> Result<bool>;
    async fn unsell_mystery_box(&mut self, id: i64, qty: i32) -> Result<()>;

    async fn insert_order(&mut self, order: &Order) -> Result<()>;
    async fn insert_order_item(&mut self, item: &OrderItem) -> Result<()>;
    /// Loads and locks the order row for the rest of the transaction.
    async fn order_for_update(&mut self, id: Uuid) -> Result<Option<Order>>;
    async fn order_items(&mut self, order_id: Uuid) -> Result<Vec<OrderItem>>;
    /// Persists status, payment and cancellation fields.
    async fn update_order(&mut self, order: &Order) -> Result<()>;
    async fn has_cancellation(&mut self, order_id: Uuid) -> Result<bool>;
    /// At most one record per order; a second insert is `InvalidState`.
    async fn insert_cancellation(&mut self, cancellation: &OrderCancellation) -> Result<()>;

    async fn commit(self) -> Result<()>;
}

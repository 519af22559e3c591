//! In-process store used by tests and local runs.
//!
//! Transactions take the state lock for their whole lifetime and work on a
//! copy, so they are serialized and a dropped transaction leaves no trace.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

use super::{Page, Store, StoreTx, ALREADY_CANCELLED};
use crate::domain::aggregates::{
    Cart, CartItem, CartLine, Customer, ItemLabel, MysteryBox, Order, OrderCancellation, OrderItem, Product,
};
use crate::domain::value_objects::ItemRef;
use crate::{CommerceError, Result};

#[derive(Clone, Debug, Default)]
struct MemoryState {
    products: HashMap<i64, Product>,
    boxes: HashMap<i64, MysteryBox>,
    customers: HashMap<Uuid, Customer>,
    orders: HashMap<Uuid, Order>,
    order_items: Vec<OrderItem>,
    cancellations: Vec<OrderCancellation>,
    carts: HashMap<Uuid, Cart>,
    cart_items: Vec<CartItem>,
}

impl MemoryState {
    fn items_of(&self, order_id: Uuid) -> Vec<OrderItem> {
        self.order_items.iter().filter(|i| i.order_id == order_id).cloned().collect()
    }

    fn label(&self, item: &ItemRef) -> Option<ItemLabel> {
        match item {
            ItemRef::Regular(id) => self.products.get(id).map(ItemLabel::from),
            ItemRef::MysteryBox(id) => self.boxes.get(id).map(ItemLabel::from),
        }
    }

    fn cart_item_mut(&mut self, customer_id: Uuid, item: ItemRef) -> Option<&mut CartItem> {
        let cart_id = self.carts.get(&customer_id)?.id;
        self.cart_items.iter_mut().find(|i| i.cart_id == cart_id && i.item == item)
    }

    /// Orders newest first; UUIDv7 ids sort by creation time.
    fn sorted(mut orders: Vec<Order>) -> Vec<Order> {
        orders.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        orders
    }
}

#[derive(Clone, Debug, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryStore {
    pub fn new() -> Self { Self::default() }

    pub async fn insert_product(&self, product: Product) {
        self.state.lock().await.products.insert(product.id, product);
    }

    pub async fn insert_mystery_box(&self, mystery_box: MysteryBox) {
        self.state.lock().await.boxes.insert(mystery_box.id, mystery_box);
    }

    pub async fn insert_customer(&self, customer: Customer) {
        self.state.lock().await.customers.insert(customer.id, customer);
    }

    pub async fn order_count(&self) -> usize { self.state.lock().await.orders.len() }

    pub async fn order_item_count(&self) -> usize { self.state.lock().await.order_items.len() }
}

#[async_trait]
impl Store for MemoryStore {
    type Tx = MemoryTx;

    async fn begin(&self) -> Result<MemoryTx> {
        let guard = self.state.clone().lock_owned().await;
        let work = guard.clone();
        Ok(MemoryTx { guard, work })
    }

    async fn product(&self, id: i64) -> Result<Option<Product>> {
        Ok(self.state.lock().await.products.get(&id).cloned())
    }

    async fn mystery_box(&self, id: i64) -> Result<Option<MysteryBox>> {
        Ok(self.state.lock().await.boxes.get(&id).cloned())
    }

    async fn item_labels(&self, items: &[ItemRef]) -> Result<HashMap<ItemRef, ItemLabel>> {
        let state = self.state.lock().await;
        Ok(items.iter().filter_map(|item| state.label(item).map(|label| (*item, label))).collect())
    }

    async fn customers(&self, ids: &[Uuid]) -> Result<HashMap<Uuid, Customer>> {
        let state = self.state.lock().await;
        Ok(ids.iter().filter_map(|id| state.customers.get(id).map(|c| (*id, c.clone()))).collect())
    }

    async fn order_with_items(&self, id: Uuid) -> Result<Option<(Order, Vec<OrderItem>)>> {
        let state = self.state.lock().await;
        Ok(state.orders.get(&id).map(|o| (o.clone(), state.items_of(id))))
    }

    async fn order_by_number(&self, order_number: &str) -> Result<Option<(Order, Vec<OrderItem>)>> {
        let state = self.state.lock().await;
        Ok(state.orders.values().find(|o| o.order_number == order_number).map(|o| (o.clone(), state.items_of(o.id))))
    }

    async fn cancellation_for(&self, order_id: Uuid) -> Result<Option<OrderCancellation>> {
        Ok(self.state.lock().await.cancellations.iter().find(|c| c.order_id == order_id).cloned())
    }

    async fn orders_for_customer(&self, customer_id: Uuid) -> Result<Vec<(Order, Vec<OrderItem>)>> {
        let state = self.state.lock().await;
        let mine = state.orders.values().filter(|o| o.customer_id() == Some(customer_id)).cloned().collect();
        Ok(MemoryState::sorted(mine).into_iter().map(|o| { let items = state.items_of(o.id); (o, items) }).collect())
    }

    async fn orders_for_seller(&self, seller_id: Uuid, page: Page) -> Result<(Vec<(Order, Vec<OrderItem>)>, i64)> {
        let state = self.state.lock().await;
        let matching: Vec<Order> = state.orders.values()
            .filter(|o| state.order_items.iter().any(|i| i.order_id == o.id && i.seller_id == seller_id))
            .cloned().collect();
        let total = matching.len() as i64;
        let offset = usize::try_from(page.offset()).unwrap_or(usize::MAX);
        let orders = MemoryState::sorted(matching).into_iter().skip(offset).take(page.limit as usize)
            .map(|o| {
                let items = state.items_of(o.id).into_iter().filter(|i| i.seller_id == seller_id).collect();
                (o, items)
            })
            .collect();
        Ok((orders, total))
    }

    async fn add_cart_item(&self, customer_id: Uuid, item: ItemRef, quantity: i32) -> Result<CartItem> {
        let mut state = self.state.lock().await;
        let cart_id = state.carts.entry(customer_id).or_insert_with(|| Cart::for_customer(customer_id)).id;
        if let Some(existing) = state.cart_items.iter_mut().find(|i| i.cart_id == cart_id && i.item == item) {
            existing.absorb(quantity);
            return Ok(existing.clone());
        }
        let line = CartItem::new(cart_id, item, quantity);
        state.cart_items.push(line.clone());
        Ok(line)
    }

    async fn set_cart_item_quantity(&self, customer_id: Uuid, item: ItemRef, quantity: i32) -> Result<bool> {
        let mut state = self.state.lock().await;
        Ok(match state.cart_item_mut(customer_id, item) {
            Some(line) => { line.quantity = quantity; true }
            None => false,
        })
    }

    async fn remove_cart_item(&self, customer_id: Uuid, item: ItemRef) -> Result<bool> {
        let mut state = self.state.lock().await;
        let Some(cart_id) = state.carts.get(&customer_id).map(|c| c.id) else { return Ok(false) };
        let before = state.cart_items.len();
        state.cart_items.retain(|i| !(i.cart_id == cart_id && i.item == item));
        Ok(state.cart_items.len() != before)
    }

    async fn cart_lines(&self, customer_id: Uuid) -> Result<Vec<CartLine>> {
        let state = self.state.lock().await;
        let Some(cart) = state.carts.get(&customer_id) else { return Ok(vec![]) };
        Ok(state.cart_items.iter()
            .filter(|i| i.cart_id == cart.id)
            .filter_map(|i| state.label(&i.item).map(|label| CartLine::from_label(i.item, i.quantity, label)))
            .collect())
    }
}

pub struct MemoryTx {
    guard: OwnedMutexGuard<MemoryState>,
    work: MemoryState,
}

impl MemoryTx {
    fn product_mut(&mut self, id: i64) -> Result<&mut Product> {
        self.work.products.get_mut(&id).ok_or(CommerceError::ProductNotFound(id))
    }
    fn box_mut(&mut self, id: i64) -> Result<&mut MysteryBox> {
        self.work.boxes.get_mut(&id).ok_or(CommerceError::MysteryBoxNotFound(id))
    }
}

#[async_trait]
impl StoreTx for MemoryTx {
    async fn product(&mut self, id: i64) -> Result<Option<Product>> { Ok(self.work.products.get(&id).cloned()) }

    async fn mystery_box(&mut self, id: i64) -> Result<Option<MysteryBox>> { Ok(self.work.boxes.get(&id).cloned()) }

    async fn order_by_idempotency_key(&mut self, key: &str) -> Result<Option<Order>> {
        Ok(self.work.orders.values().find(|o| o.idempotency_key.as_deref() == Some(key)).cloned())
    }

    async fn sell_product(&mut self, id: i64, qty: i32) -> Result<bool> {
        Ok(self.work.products.get_mut(&id).is_some_and(|p| p.inventory.sell(qty)))
    }

    async fn withdraw_product(&mut self, id: i64, qty: i32) -> Result<bool> {
        Ok(self.work.products.get_mut(&id).is_some_and(|p| p.inventory.withdraw(qty)))
    }

    async fn unsell_product(&mut self, id: i64, qty: i32) -> Result<()> {
        self.product_mut(id)?.inventory.unsell(qty);
        Ok(())
    }

    async fn restore_product(&mut self, id: i64, qty: i32) -> Result<()> {
        self.product_mut(id)?.inventory.restore(qty);
        Ok(())
    }

    async fn sell_mystery_box(&mut self, id: i64, qty: i32) -> Result<bool> {
        Ok(self.work.boxes.get_mut(&id).is_some_and(|b| b.inventory.sell(qty)))
    }

    async fn unsell_mystery_box(&mut self, id: i64, qty: i32) -> Result<()> {
        self.box_mut(id)?.inventory.unsell(qty);
        Ok(())
    }

    async fn insert_order(&mut self, order: &Order) -> Result<()> {
        if let Some(key) = &order.idempotency_key {
            if self.work.orders.values().any(|o| o.idempotency_key.as_ref() == Some(key)) {
                return Err(CommerceError::DuplicateRequest(key.clone()));
            }
        }
        self.work.orders.insert(order.id, order.clone());
        Ok(())
    }

    async fn insert_order_item(&mut self, item: &OrderItem) -> Result<()> {
        if !self.work.orders.contains_key(&item.order_id) {
            return Err(CommerceError::StorageError(format!("order {} does not exist", item.order_id)));
        }
        self.work.order_items.push(item.clone());
        Ok(())
    }

    async fn order_for_update(&mut self, id: Uuid) -> Result<Option<Order>> { Ok(self.work.orders.get(&id).cloned()) }

    async fn order_items(&mut self, order_id: Uuid) -> Result<Vec<OrderItem>> { Ok(self.work.items_of(order_id)) }

    async fn update_order(&mut self, order: &Order) -> Result<()> {
        let stored = self.work.orders.get_mut(&order.id).ok_or(CommerceError::OrderNotFound)?;
        *stored = order.clone();
        Ok(())
    }

    async fn has_cancellation(&mut self, order_id: Uuid) -> Result<bool> {
        Ok(self.work.cancellations.iter().any(|c| c.order_id == order_id))
    }

    async fn insert_cancellation(&mut self, cancellation: &OrderCancellation) -> Result<()> {
        if self.has_cancellation(cancellation.order_id).await? {
            return Err(CommerceError::InvalidState(ALREADY_CANCELLED.into()));
        }
        self.work.cancellations.push(cancellation.clone());
        Ok(())
    }

    async fn commit(self) -> Result<()> {
        let MemoryTx { mut guard, work } = self;
        *guard = work;
        Ok(())
    }
}

//! Order Lifecycle Manager
//!
//! Cancellation with restock, seller status updates and the read models used
//! by customers, sellers and guests.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::domain::aggregates::{ContactView, Customer, Order, OrderCancellation, OrderDetails, OrderItem, OrderOwner, OrderStatus};
use crate::domain::value_objects::{Identity, ItemRef};
use crate::store::{Page, Store, StoreTx, ALREADY_CANCELLED};
use crate::{CommerceError, Result};

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SellerOrdersPage {
    pub orders: Vec<OrderDetails>,
    pub page: u32,
    pub limit: u32,
    pub total: i64,
}

pub struct OrderLifecycleManager<S> {
    store: Arc<S>,
    cancellation_window: Duration,
}

impl<S> Clone for OrderLifecycleManager<S> {
    fn clone(&self) -> Self { Self { store: self.store.clone(), cancellation_window: self.cancellation_window } }
}

impl<S: Store> OrderLifecycleManager<S> {
    pub fn new(store: Arc<S>, cancellation_window: Duration) -> Self { Self { store, cancellation_window } }

    pub fn cancellation_window(&self) -> Duration { self.cancellation_window }

    pub async fn cancel_order(&self, order_id: Uuid, actor: &Identity, reason: Option<String>) -> Result<Order> {
        self.cancel_order_at(order_id, actor, reason, Utc::now()).await
    }

    #[instrument(skip(self, actor, reason))]
    pub async fn cancel_order_at(&self, order_id: Uuid, actor: &Identity, reason: Option<String>, now: DateTime<Utc>) -> Result<Order> {
        let mut tx = self.store.begin().await?;
        let mut order = tx.order_for_update(order_id).await?.ok_or(CommerceError::OrderNotFound)?;

        if let OrderOwner::Customer { customer_id } = order.owner {
            if actor.user_id() != Some(customer_id) {
                warn!(%order_id, "Cancellation attempted by someone other than the ordering customer");
                return Err(CommerceError::Unauthorized("You can only cancel your own orders".into()));
            }
        }

        order.cancel(reason.filter(|r| !r.trim().is_empty()), now, self.cancellation_window)?;
        // A seller can move a cancelled order back to an open status; its stock was already restored.
        if tx.has_cancellation(order_id).await? {
            warn!(%order_id, "Order reopened after cancellation; refusing to cancel again");
            return Err(CommerceError::InvalidState(ALREADY_CANCELLED.into()));
        }

        for line in tx.order_items(order_id).await? {
            match line.item {
                ItemRef::Regular(product_id) => tx.unsell_product(product_id, line.quantity).await?,
                ItemRef::MysteryBox(box_id) => {
                    tx.unsell_mystery_box(box_id, line.quantity).await?;
                    for content in &line.bundle_contents {
                        tx.restore_product(content.product_id, content.quantity).await?;
                    }
                }
            }
        }

        tx.update_order(&order).await?;
        tx.insert_cancellation(&OrderCancellation::for_order(&order, actor.user_id())).await?;
        tx.commit().await?;

        info!(order_number = %order.order_number, payment_status = order.payment_status.as_str(), "Order cancelled");
        Ok(order)
    }

    /// Any seller with at least one line in the order may move it to any status.
    #[instrument(skip(self))]
    pub async fn update_order_status(&self, order_id: Uuid, seller_id: Uuid, status: OrderStatus) -> Result<Order> {
        let mut tx = self.store.begin().await?;
        let mut order = tx.order_for_update(order_id).await?.ok_or(CommerceError::OrderNotFound)?;
        if !tx.order_items(order_id).await?.iter().any(|i| i.seller_id == seller_id) {
            return Err(CommerceError::Unauthorized("Seller has no items in this order".into()));
        }

        let previous = order.status;
        order.set_status(status, Utc::now());
        tx.update_order(&order).await?;
        tx.commit().await?;

        info!(order_number = %order.order_number, from = %previous, to = %status, "Order status updated");
        Ok(order)
    }

    /// Public lookup; the email must belong to the guest or to the ordering customer.
    #[instrument(skip(self, email))]
    pub async fn lookup_guest_order(&self, order_number: &str, email: &str) -> Result<OrderDetails> {
        let (order, items) = self.store.order_by_number(order_number.trim()).await?.ok_or(CommerceError::OrderNotFound)?;
        let email = email.trim();

        let contact = match &order.owner {
            OrderOwner::Guest(g) => g.email.eq_ignore_ascii_case(email).then(|| ContactView {
                name: g.name.clone(), email: g.email.clone(), phone: g.phone.clone(),
            }),
            OrderOwner::Customer { customer_id } => self.store.customers(&[*customer_id]).await?
                .remove(customer_id)
                .filter(|c| c.email.eq_ignore_ascii_case(email))
                .map(contact_of),
        };
        let Some(contact) = contact else {
            warn!(order_number, "Guest lookup email mismatch");
            return Err(CommerceError::OrderNotFound);
        };

        let labels = self.store.item_labels(&refs(&items)).await?;
        Ok(OrderDetails::new(order, items, &labels, Some(contact)))
    }

    pub async fn customer_orders(&self, customer_id: Uuid) -> Result<Vec<OrderDetails>> {
        let orders = self.store.orders_for_customer(customer_id).await?;
        let labels = self.store.item_labels(&refs(orders.iter().flat_map(|(_, items)| items))).await?;
        Ok(orders.into_iter().map(|(order, items)| OrderDetails::new(order, items, &labels, None)).collect())
    }

    /// Each order carries only this seller's lines and the buyer's contact.
    pub async fn seller_orders(&self, seller_id: Uuid, page: Page) -> Result<SellerOrdersPage> {
        let (orders, total) = self.store.orders_for_seller(seller_id, page).await?;
        let labels = self.store.item_labels(&refs(orders.iter().flat_map(|(_, items)| items))).await?;
        let customer_ids: Vec<Uuid> = orders.iter().filter_map(|(o, _)| o.customer_id()).collect::<HashSet<_>>().into_iter().collect();
        let customers: HashMap<Uuid, Customer> = self.store.customers(&customer_ids).await?;

        let orders = orders.into_iter().map(|(order, items)| {
            let contact = match &order.owner {
                OrderOwner::Guest(g) => Some(ContactView { name: g.name.clone(), email: g.email.clone(), phone: g.phone.clone() }),
                OrderOwner::Customer { customer_id } => customers.get(customer_id).cloned().map(contact_of),
            };
            OrderDetails::new(order, items, &labels, contact)
        }).collect();

        Ok(SellerOrdersPage { orders, page: page.page, limit: page.limit, total })
    }
}

fn contact_of(c: Customer) -> ContactView {
    ContactView { name: c.name, email: c.email, phone: None }
}

fn refs<'a>(items: impl IntoIterator<Item = &'a OrderItem>) -> Vec<ItemRef> {
    items.into_iter().map(|i| i.item).collect::<HashSet<_>>().into_iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::aggregates::{GuestContact, PaymentStatus, RefundStatus};
    use crate::services::placement::tests::{customer_input, line, seeded_store, SELLER_A, SELLER_B};
    use crate::services::placement::{Buyer, GuestDetails, OrderPlacementEngine};
    use crate::store::MemoryStore;

    const WINDOW: i64 = 5;

    async fn place(store: &Arc<MemoryStore>, input: crate::services::placement::PlaceOrderInput, at: DateTime<Utc>) -> Uuid {
        OrderPlacementEngine::new(store.clone()).place_order_at(input, at).await.unwrap().order_id
    }

    fn manager(store: &Arc<MemoryStore>) -> OrderLifecycleManager<MemoryStore> {
        OrderLifecycleManager::new(store.clone(), Duration::minutes(WINDOW))
    }

    async fn counters(store: &MemoryStore) -> Vec<(i32, i32)> {
        let mut out = Vec::new();
        for id in 1..=4 {
            let p = store.product(id).await.unwrap().unwrap();
            out.push((p.stock(), p.sales()));
        }
        let b = store.mystery_box(100).await.unwrap().unwrap();
        out.push((b.stock(), b.sales()));
        out
    }

    #[tokio::test]
    async fn test_cancel_restores_every_counter() {
        let store = seeded_store().await;
        let before = counters(&store).await;
        let customer = Uuid::new_v4();
        let placed = Utc::now();
        let order_id = place(&store, customer_input(customer, vec![line(ItemRef::Regular(1), 2), line(ItemRef::MysteryBox(100), 1)]), placed).await;
        assert_ne!(counters(&store).await, before);

        let order = manager(&store)
            .cancel_order_at(order_id, &Identity::Customer(customer), Some("changed my mind".into()), placed + Duration::minutes(2))
            .await.unwrap();

        assert_eq!(order.status, OrderStatus::Cancelled);
        assert_eq!(order.payment_status, PaymentStatus::Failed);
        assert_eq!(counters(&store).await, before);
        let record = store.cancellation_for(order_id).await.unwrap().unwrap();
        assert_eq!(record.cancelled_by, Some(customer));
        assert_eq!(record.refund_status, RefundStatus::NotRequired);
        assert_eq!(record.reason.as_deref(), Some("changed my mind"));
    }

    #[tokio::test]
    async fn test_cancel_only_restores_applied_manifest_decrements() {
        let store = seeded_store().await;
        let customer = Uuid::new_v4();
        let placed = Utc::now();
        // Three boxes need 3 keychains but only 2 are in stock.
        let order_id = place(&store, customer_input(customer, vec![line(ItemRef::MysteryBox(100), 3)]), placed).await;
        manager(&store).cancel_order_at(order_id, &Identity::Customer(customer), None, placed).await.unwrap();

        assert_eq!(store.product(3).await.unwrap().unwrap().stock(), 10);
        assert_eq!(store.product(4).await.unwrap().unwrap().stock(), 2);
        assert_eq!(store.mystery_box(100).await.unwrap().unwrap().stock(), 3);
    }

    #[tokio::test]
    async fn test_cancellation_window() {
        let store = seeded_store().await;
        let customer = Uuid::new_v4();
        let placed = Utc::now();
        let order_id = place(&store, customer_input(customer, vec![line(ItemRef::Regular(1), 1)]), placed).await;

        let late = placed + Duration::minutes(WINDOW) + Duration::seconds(1);
        let err = manager(&store).cancel_order_at(order_id, &Identity::Customer(customer), None, late).await.unwrap_err();
        assert!(matches!(err, CommerceError::CancellationWindowExpired(_)));
        let (order, _) = store.order_with_items(order_id).await.unwrap().unwrap();
        assert_eq!(order.status, OrderStatus::Placed);
        assert_eq!(store.product(1).await.unwrap().unwrap().stock(), 4);

        let edge = placed + Duration::minutes(WINDOW);
        manager(&store).cancel_order_at(order_id, &Identity::Customer(customer), None, edge).await.unwrap();
    }

    #[tokio::test]
    async fn test_second_cancel_reports_state() {
        let store = seeded_store().await;
        let customer = Uuid::new_v4();
        let placed = Utc::now();
        let order_id = place(&store, customer_input(customer, vec![line(ItemRef::Regular(1), 1)]), placed).await;
        let mgr = manager(&store);
        mgr.cancel_order_at(order_id, &Identity::Customer(customer), None, placed).await.unwrap();

        let err = mgr.cancel_order_at(order_id, &Identity::Customer(customer), None, placed + Duration::hours(1)).await.unwrap_err();
        assert!(matches!(err, CommerceError::InvalidState(ref m) if m.contains("CANCELLED")));
        assert_eq!(store.product(1).await.unwrap().unwrap().stock(), 5);
    }

    #[tokio::test]
    async fn test_reopened_order_cannot_be_cancelled_twice() {
        let store = seeded_store().await;
        let customer = Uuid::new_v4();
        let placed = Utc::now();
        let order_id = place(&store, customer_input(customer, vec![line(ItemRef::Regular(3), 2)]), placed).await;
        let mgr = manager(&store);
        mgr.cancel_order_at(order_id, &Identity::Customer(customer), None, placed).await.unwrap();
        mgr.update_order_status(order_id, SELLER_B, OrderStatus::Placed).await.unwrap();

        let err = mgr.cancel_order_at(order_id, &Identity::Customer(customer), None, placed + Duration::minutes(1)).await.unwrap_err();
        assert!(matches!(err, CommerceError::InvalidState(ref m) if m == ALREADY_CANCELLED));
        assert_eq!(store.product(3).await.unwrap().unwrap().stock(), 10);
        let (order, _) = store.order_with_items(order_id).await.unwrap().unwrap();
        assert_eq!(order.status, OrderStatus::Placed);
    }

    #[tokio::test]
    async fn test_cancel_authorization() {
        let store = seeded_store().await;
        let customer = Uuid::new_v4();
        let placed = Utc::now();
        let order_id = place(&store, customer_input(customer, vec![line(ItemRef::Regular(1), 1)]), placed).await;

        let err = manager(&store).cancel_order_at(order_id, &Identity::Customer(Uuid::new_v4()), None, placed).await.unwrap_err();
        assert!(matches!(err, CommerceError::Unauthorized(_)));
        let err = manager(&store).cancel_order_at(order_id, &Identity::Guest, None, placed).await.unwrap_err();
        assert!(matches!(err, CommerceError::Unauthorized(_)));
        let err = manager(&store).cancel_order_at(Uuid::new_v4(), &Identity::Guest, None, placed).await.unwrap_err();
        assert!(matches!(err, CommerceError::OrderNotFound));

        let mut guest = customer_input(customer, vec![line(ItemRef::Regular(3), 1)]);
        guest.buyer = Buyer::Guest(GuestDetails { email: Some("g@example.com".into()), name: Some("Gee".into()), ..Default::default() });
        let guest_order = place(&store, guest, placed).await;
        manager(&store).cancel_order_at(guest_order, &Identity::Guest, None, placed).await.unwrap();
        assert_eq!(store.cancellation_for(guest_order).await.unwrap().unwrap().cancelled_by, None);
    }

    #[tokio::test]
    async fn test_status_update_requires_seller_line() {
        let store = seeded_store().await;
        let order_id = place(&store, customer_input(Uuid::new_v4(), vec![line(ItemRef::Regular(3), 1)]), Utc::now()).await;
        let mgr = manager(&store);

        let err = mgr.update_order_status(order_id, SELLER_A, OrderStatus::Shipped).await.unwrap_err();
        assert!(matches!(err, CommerceError::Unauthorized(_)));
        let order = mgr.update_order_status(order_id, SELLER_B, OrderStatus::Shipped).await.unwrap();
        assert_eq!(order.status, OrderStatus::Shipped);
        // No transition guard.
        let order = mgr.update_order_status(order_id, SELLER_B, OrderStatus::Placed).await.unwrap();
        assert_eq!(order.status, OrderStatus::Placed);
    }

    #[tokio::test]
    async fn test_guest_lookup_matches_email_case_insensitively() {
        let store = seeded_store().await;
        let mut input = customer_input(Uuid::new_v4(), vec![line(ItemRef::Regular(1), 1)]);
        input.buyer = Buyer::Guest(GuestDetails { email: Some("Guest@Example.com".into()), name: Some("Gee".into()), ..Default::default() });
        let order_id = place(&store, input, Utc::now()).await;
        let (order, _) = store.order_with_items(order_id).await.unwrap().unwrap();
        let mgr = manager(&store);

        let details = mgr.lookup_guest_order(&order.order_number, "guest@example.com").await.unwrap();
        assert_eq!(details.order.id, order_id);
        assert_eq!(details.items[0].name.as_deref(), Some("Headphones"));
        assert_eq!(details.image.as_deref(), Some("p1.jpg"));
        assert!(matches!(mgr.lookup_guest_order(&order.order_number, "other@example.com").await, Err(CommerceError::OrderNotFound)));
        assert!(matches!(mgr.lookup_guest_order("ORD-nope", "guest@example.com").await, Err(CommerceError::OrderNotFound)));
    }

    #[tokio::test]
    async fn test_lookup_customer_order_by_account_email() {
        let store = seeded_store().await;
        let customer = Customer { id: Uuid::new_v4(), name: "Ada".into(), email: "ada@example.com".into() };
        store.insert_customer(customer.clone()).await;
        let order_id = place(&store, customer_input(customer.id, vec![line(ItemRef::Regular(1), 1)]), Utc::now()).await;
        let (order, _) = store.order_with_items(order_id).await.unwrap().unwrap();

        let details = manager(&store).lookup_guest_order(&order.order_number, "ADA@example.com").await.unwrap();
        assert_eq!(details.contact.map(|c| c.name), Some("Ada".to_string()));
    }

    #[tokio::test]
    async fn test_seller_orders_only_show_own_lines() {
        let store = seeded_store().await;
        let customer = Customer { id: Uuid::new_v4(), name: "Ada".into(), email: "ada@example.com".into() };
        store.insert_customer(customer.clone()).await;
        place(&store, customer_input(customer.id, vec![line(ItemRef::Regular(1), 1), line(ItemRef::Regular(3), 2)]), Utc::now()).await;
        let mut guest = customer_input(customer.id, vec![line(ItemRef::Regular(1), 1)]);
        guest.buyer = Buyer::Guest(GuestDetails { email: Some("g@example.com".into()), name: Some("Gee".into()), ..Default::default() });
        place(&store, guest, Utc::now()).await;

        let page = manager(&store).seller_orders(SELLER_B, Page::new(None, None)).await.unwrap();
        assert_eq!(page.total, 1);
        assert_eq!(page.orders[0].items.len(), 1);
        assert_eq!(page.orders[0].items[0].item.item, ItemRef::Regular(3));
        assert_eq!(page.orders[0].contact.as_ref().map(|c| c.email.as_str()), Some("ada@example.com"));

        let page = manager(&store).seller_orders(SELLER_A, Page::new(Some(1), Some(1))).await.unwrap();
        assert_eq!((page.total, page.orders.len()), (2, 1));
        assert!(matches!(page.orders[0].order.owner, OrderOwner::Guest(GuestContact { .. })));
    }

    #[tokio::test]
    async fn test_customer_orders_newest_first() {
        let store = seeded_store().await;
        let customer = Uuid::new_v4();
        let first = place(&store, customer_input(customer, vec![line(ItemRef::Regular(3), 1)]), Utc::now() - Duration::minutes(1)).await;
        let second = place(&store, customer_input(customer, vec![line(ItemRef::Regular(1), 1)]), Utc::now()).await;
        place(&store, customer_input(Uuid::new_v4(), vec![line(ItemRef::Regular(1), 1)]), Utc::now()).await;

        let orders = manager(&store).customer_orders(customer).await.unwrap();
        assert_eq!(orders.iter().map(|o| o.order.id).collect::<Vec<_>>(), vec![second, first]);
        assert_eq!(orders[0].image.as_deref(), Some("p1.jpg"));
    }
}

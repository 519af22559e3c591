//! Order Placement Engine
//!
//! Turns a checkout into an order header plus one line per item, decrementing
//! stock for regular products and mystery boxes (and the products inside each
//! box) in a single transaction. Any missing item or short stock on an ordered
//! line aborts the whole placement; a short manifest product only gets recorded.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::domain::aggregates::{GuestContact, ManifestLine, Order, OrderItem, OrderOwner, OrderStatus, PaymentStatus};
use crate::domain::value_objects::{generate_order_number, IdempotencyKey, ItemRef, Quantity};
use crate::store::{Store, StoreTx};
use crate::{CommerceError, Result};

#[derive(Clone, Debug, PartialEq)]
pub struct PlaceOrderLine {
    pub item: ItemRef,
    pub quantity: i32,
    pub unit_price: Decimal,
    /// Seller as sent by the client. The catalog owner is what gets recorded.
    pub seller_id: Option<Uuid>,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct GuestDetails {
    pub email: Option<String>,
    pub name: Option<String>,
    pub phone: Option<String>,
    pub session_id: Option<String>,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Buyer {
    Customer(Uuid),
    Guest(GuestDetails),
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Delivery {
    pub address: String,
    pub info: Option<String>,
    pub time: Option<String>,
    pub fee: Decimal,
}

#[derive(Clone, Debug, PartialEq)]
pub struct PlaceOrderInput {
    pub buyer: Buyer,
    pub delivery: Delivery,
    pub total_price: Decimal,
    pub payment_method: String,
    pub lines: Vec<PlaceOrderLine>,
    pub idempotency_key: Option<IdempotencyKey>,
}

/// A manifest product that could not be taken from stock while selling a mystery box.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ManifestShortfall {
    pub mystery_box_id: i64,
    pub product_id: i64,
    pub required: Option<i32>,
    /// None when the product no longer exists.
    pub available: Option<i32>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlacementReceipt {
    pub order_id: Uuid,
    pub order_number: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub guest_session_id: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub manifest_shortfalls: Vec<ManifestShortfall>,
    /// True when an earlier order with the same idempotency key was returned.
    pub replayed: bool,
}

impl PlacementReceipt {
    fn for_order(order: &Order, manifest_shortfalls: Vec<ManifestShortfall>, replayed: bool) -> Self {
        Self {
            order_id: order.id,
            order_number: order.order_number.clone(),
            guest_session_id: order.guest().map(|g| g.session_id.clone()),
            manifest_shortfalls,
            replayed,
        }
    }
}

pub struct OrderPlacementEngine<S> {
    store: Arc<S>,
}

impl<S> Clone for OrderPlacementEngine<S> {
    fn clone(&self) -> Self { Self { store: self.store.clone() } }
}

impl<S: Store> OrderPlacementEngine<S> {
    pub fn new(store: Arc<S>) -> Self { Self { store } }

    pub async fn place_order(&self, input: PlaceOrderInput) -> Result<PlacementReceipt> {
        self.place_order_at(input, Utc::now()).await
    }

    #[instrument(skip_all, fields(lines = input.lines.len(), guest = matches!(input.buyer, Buyer::Guest(_))))]
    pub async fn place_order_at(&self, input: PlaceOrderInput, now: DateTime<Utc>) -> Result<PlacementReceipt> {
        if input.lines.is_empty() { return Err(CommerceError::EmptyOrder); }
        let quantities = input.lines.iter().map(|l| Quantity::new(l.quantity)).collect::<std::result::Result<Vec<_>, _>>()?;
        let owner = resolve_owner(input.buyer)?;

        let mut tx = self.store.begin().await?;
        if let Some(key) = &input.idempotency_key {
            if let Some(existing) = tx.order_by_idempotency_key(key.as_str()).await? {
                if !existing.owner.same_buyer(&owner) {
                    warn!(idempotency_key = %key, "Idempotency key reused by a different buyer");
                    return Err(CommerceError::DuplicateRequest(key.as_str().to_string()));
                }
                info!(order_number = %existing.order_number, idempotency_key = %key, "Replaying previously placed order");
                return Ok(PlacementReceipt::for_order(&existing, vec![], true));
            }
        }

        let order = Order {
            id: Uuid::now_v7(),
            order_number: generate_order_number(now),
            owner,
            total_amount: input.total_price,
            delivery_fee: input.delivery.fee,
            delivery_address: input.delivery.address,
            delivery_info: input.delivery.info,
            delivery_time: input.delivery.time,
            payment_method: input.payment_method,
            payment_status: PaymentStatus::Pending,
            status: OrderStatus::Placed,
            idempotency_key: input.idempotency_key.map(|k| k.as_str().to_string()),
            cancelled_at: None,
            cancellation_reason: None,
            created_at: now,
            updated_at: now,
        };
        tx.insert_order(&order).await?;

        let mut shortfalls = Vec::new();
        for (line, qty) in input.lines.iter().zip(quantities) {
            match line.item {
                ItemRef::Regular(product_id) => place_regular(&mut tx, &order, line, product_id, qty).await?,
                ItemRef::MysteryBox(box_id) => shortfalls.extend(place_mystery_box(&mut tx, &order, line, box_id, qty).await?),
            }
        }

        tx.commit().await?;
        info!(order_id = %order.id, order_number = %order.order_number, total = %order.total_amount, "Order placed");
        Ok(PlacementReceipt::for_order(&order, shortfalls, false))
    }
}

/// Guests must give an email and a name; a session id is minted when the client has none.
fn resolve_owner(buyer: Buyer) -> Result<OrderOwner> {
    match buyer {
        Buyer::Customer(customer_id) => Ok(OrderOwner::Customer { customer_id }),
        Buyer::Guest(g) => {
            let email = non_blank(g.email).ok_or(CommerceError::MissingGuestInfo)?;
            let name = non_blank(g.name).ok_or(CommerceError::MissingGuestInfo)?;
            let session_id = non_blank(g.session_id).unwrap_or_else(|| Uuid::new_v4().to_string());
            Ok(OrderOwner::Guest(GuestContact { session_id, email, name, phone: non_blank(g.phone) }))
        }
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

async fn place_regular<T: StoreTx>(tx: &mut T, order: &Order, line: &PlaceOrderLine, product_id: i64, qty: Quantity) -> Result<()> {
    let product = tx.product(product_id).await?
        .filter(|p| p.is_available())
        .ok_or(CommerceError::ProductNotFound(product_id))?;
    if !tx.sell_product(product_id, qty.value()).await? {
        warn!(product_id, requested = qty.value(), "Insufficient stock");
        return Err(CommerceError::InsufficientStock { product: product.name });
    }
    warn_on_seller_mismatch(line, product.seller_id);
    tx.insert_order_item(&order_item(order, line, qty, product.seller_id, vec![])).await
}

async fn place_mystery_box<T: StoreTx>(tx: &mut T, order: &Order, line: &PlaceOrderLine, box_id: i64, qty: Quantity) -> Result<Vec<ManifestShortfall>> {
    let mystery_box = tx.mystery_box(box_id).await?
        .filter(|b| b.is_available())
        .ok_or(CommerceError::MysteryBoxNotFound(box_id))?;
    if !tx.sell_mystery_box(box_id, qty.value()).await? {
        warn!(mystery_box_id = box_id, requested = qty.value(), "Insufficient stock");
        return Err(CommerceError::InsufficientStock { product: mystery_box.name });
    }

    let mut applied = Vec::new();
    let mut shortfalls = Vec::new();
    for (product_id, required) in mystery_box.contents_for(qty.value()) {
        let shortfall = |available| ManifestShortfall { mystery_box_id: box_id, product_id, required, available };
        let Some(units) = required.filter(|u| *u > 0) else {
            shortfalls.push(shortfall(None));
            continue;
        };
        match tx.product(product_id).await? {
            None => shortfalls.push(shortfall(None)),
            Some(p) if !tx.withdraw_product(product_id, units).await? => shortfalls.push(shortfall(Some(p.stock()))),
            Some(_) => applied.push(ManifestLine { product_id, quantity: units }),
        }
    }
    for s in &shortfalls {
        warn!(order_number = %order.order_number, mystery_box_id = s.mystery_box_id, product_id = s.product_id,
            required = ?s.required, available = ?s.available, "Mystery box content short; sale proceeds");
    }

    warn_on_seller_mismatch(line, mystery_box.seller_id);
    tx.insert_order_item(&order_item(order, line, qty, mystery_box.seller_id, applied)).await?;
    Ok(shortfalls)
}

fn order_item(order: &Order, line: &PlaceOrderLine, qty: Quantity, seller_id: Uuid, bundle_contents: Vec<ManifestLine>) -> OrderItem {
    OrderItem {
        id: Uuid::now_v7(), order_id: order.id, item: line.item, seller_id, quantity: qty.value(),
        unit_price: line.unit_price, bundle_contents, created_at: order.created_at,
    }
}

fn warn_on_seller_mismatch(line: &PlaceOrderLine, owner: Uuid) {
    if let Some(claimed) = line.seller_id.filter(|s| *s != owner) {
        warn!(item = %line.item, %claimed, %owner, "Line seller does not own the item; using catalog owner");
    }
}

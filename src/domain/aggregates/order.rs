//! Order Aggregate

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::domain::aggregates::product::{ItemLabel, ManifestLine};
use crate::domain::value_objects::{ItemRef, UnknownVariant};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus { #[default] Placed, Pending, Processing, Shipped, Delivered, Completed, Cancelled }

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Placed => "PLACED",
            Self::Pending => "PENDING",
            Self::Processing => "PROCESSING",
            Self::Shipped => "SHIPPED",
            Self::Delivered => "DELIVERED",
            Self::Completed => "COMPLETED",
            Self::Cancelled => "CANCELLED",
        }
    }
    pub fn is_cancellable(&self) -> bool { matches!(self, Self::Placed | Self::Pending | Self::Processing) }
    pub fn is_terminal(&self) -> bool { matches!(self, Self::Cancelled | Self::Delivered | Self::Completed) }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

impl FromStr for OrderStatus {
    type Err = UnknownVariant;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "PLACED" => Ok(Self::Placed),
            "PENDING" => Ok(Self::Pending),
            "PROCESSING" => Ok(Self::Processing),
            "SHIPPED" => Ok(Self::Shipped),
            "DELIVERED" => Ok(Self::Delivered),
            "COMPLETED" => Ok(Self::Completed),
            "CANCELLED" => Ok(Self::Cancelled),
            _ => Err(UnknownVariant(s.to_string())),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentStatus { #[default] Pending, Paid, Failed, Refunded }

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self { Self::Pending => "PENDING", Self::Paid => "PAID", Self::Failed => "FAILED", Self::Refunded => "REFUNDED" }
    }
    /// Payment state after the order is cancelled.
    pub fn after_cancellation(&self) -> Self {
        if *self == Self::Paid { Self::Refunded } else { Self::Failed }
    }
}

impl FromStr for PaymentStatus {
    type Err = UnknownVariant;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(Self::Pending),
            "PAID" => Ok(Self::Paid),
            "FAILED" => Ok(Self::Failed),
            "REFUNDED" => Ok(Self::Refunded),
            _ => Err(UnknownVariant(s.to_string())),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GuestContact {
    pub session_id: String,
    pub email: String,
    pub name: String,
    pub phone: Option<String>,
}

/// Exactly one ownership mode per order.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "ownerType", rename_all = "camelCase")]
pub enum OrderOwner {
    Customer {
        #[serde(rename = "customerId")]
        customer_id: Uuid,
    },
    Guest(GuestContact),
}

impl OrderOwner {
    /// Same customer account, or guest orders under the same email.
    pub fn same_buyer(&self, other: &OrderOwner) -> bool {
        match (self, other) {
            (Self::Customer { customer_id: a }, Self::Customer { customer_id: b }) => a == b,
            (Self::Guest(a), Self::Guest(b)) => a.email.eq_ignore_ascii_case(&b.email),
            _ => false,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    pub id: Uuid,
    pub order_number: String,
    #[serde(flatten)]
    pub owner: OrderOwner,
    pub total_amount: Decimal,
    pub delivery_fee: Decimal,
    pub delivery_address: String,
    pub delivery_info: Option<String>,
    pub delivery_time: Option<String>,
    pub payment_method: String,
    pub payment_status: PaymentStatus,
    pub status: OrderStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub idempotency_key: Option<String>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub cancellation_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    pub fn customer_id(&self) -> Option<Uuid> {
        match &self.owner { OrderOwner::Customer { customer_id } => Some(*customer_id), OrderOwner::Guest(_) => None }
    }
    pub fn guest(&self) -> Option<&GuestContact> {
        match &self.owner { OrderOwner::Guest(g) => Some(g), OrderOwner::Customer { .. } => None }
    }

    /// Status is checked before the window, so cancelling twice always reports the state.
    pub fn ensure_cancellable(&self, now: DateTime<Utc>, window: Duration) -> Result<(), OrderError> {
        if !self.status.is_cancellable() { return Err(OrderError::NotCancellable(self.status)); }
        if now - self.created_at > window { return Err(OrderError::WindowExpired(window)); }
        Ok(())
    }

    pub fn cancel(&mut self, reason: Option<String>, now: DateTime<Utc>, window: Duration) -> Result<(), OrderError> {
        self.ensure_cancellable(now, window)?;
        self.status = OrderStatus::Cancelled;
        self.payment_status = self.payment_status.after_cancellation();
        self.cancelled_at = Some(now);
        self.cancellation_reason = reason;
        self.touch(now);
        Ok(())
    }

    /// Seller-driven status change. No transition guard beyond ownership, which the caller checks.
    pub fn set_status(&mut self, status: OrderStatus, now: DateTime<Utc>) {
        self.status = status;
        self.touch(now);
    }

    fn touch(&mut self, now: DateTime<Utc>) { self.updated_at = now; }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderItem {
    pub id: Uuid,
    pub order_id: Uuid,
    #[serde(flatten)]
    pub item: ItemRef,
    pub seller_id: Uuid,
    pub quantity: i32,
    pub unit_price: Decimal,
    /// Manifest decrements actually applied when this line is a mystery box.
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub bundle_contents: Vec<ManifestLine>,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RefundStatus { NotRequired, Pending }

impl RefundStatus {
    pub fn as_str(&self) -> &'static str {
        match self { Self::NotRequired => "NOT_REQUIRED", Self::Pending => "PENDING" }
    }
}

impl FromStr for RefundStatus {
    type Err = UnknownVariant;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "NOT_REQUIRED" => Ok(Self::NotRequired),
            "PENDING" => Ok(Self::Pending),
            _ => Err(UnknownVariant(s.to_string())),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderCancellation {
    pub id: Uuid,
    pub order_id: Uuid,
    pub reason: Option<String>,
    /// None when a guest cancelled.
    pub cancelled_by: Option<Uuid>,
    pub refund_status: RefundStatus,
    pub created_at: DateTime<Utc>,
}

impl OrderCancellation {
    /// Built from the already-cancelled order; a refund is pending only if it had been paid.
    pub fn for_order(order: &Order, cancelled_by: Option<Uuid>) -> Self {
        let refund_status = if order.payment_status == PaymentStatus::Refunded { RefundStatus::Pending } else { RefundStatus::NotRequired };
        Self {
            id: Uuid::now_v7(), order_id: order.id, reason: order.cancellation_reason.clone(), cancelled_by,
            refund_status, created_at: order.cancelled_at.unwrap_or(order.updated_at),
        }
    }
}

/// Registered customer reference data.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Customer {
    pub id: Uuid,
    pub name: String,
    pub email: String,
}

/// Order line as shown to customers and sellers.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderItemView {
    #[serde(flatten)]
    pub item: OrderItem,
    pub name: Option<String>,
    pub image: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ContactView {
    pub name: String,
    pub email: String,
    pub phone: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderDetails {
    #[serde(flatten)]
    pub order: Order,
    pub items: Vec<OrderItemView>,
    /// First image of the first line, for order list thumbnails.
    pub image: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub contact: Option<ContactView>,
}

impl OrderDetails {
    pub fn new(order: Order, items: Vec<OrderItem>, labels: &HashMap<ItemRef, ItemLabel>, contact: Option<ContactView>) -> Self {
        let items: Vec<OrderItemView> = items.into_iter().map(|item| {
            let label = labels.get(&item.item);
            OrderItemView { name: label.map(|l| l.name.clone()), image: label.and_then(|l| l.image.clone()), item }
        }).collect();
        let image = items.iter().find_map(|i| i.image.clone());
        Self { order, items, image, contact }
    }
}

#[derive(Debug, Clone, PartialEq)] pub enum OrderError { NotCancellable(OrderStatus), WindowExpired(Duration) }
impl std::error::Error for OrderError {}
impl fmt::Display for OrderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotCancellable(s) => write!(f, "Cannot cancel order in status {}", s),
            Self::WindowExpired(w) => write!(f, "Orders can only be cancelled within {} minutes of placement", w.num_minutes()),
        }
    }
}

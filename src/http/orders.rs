//! Order endpoints

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::Json;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use crate::domain::aggregates::{Order, OrderDetails, OrderStatus};
use crate::domain::value_objects::{IdempotencyKey, Identity, ItemRef};
use crate::http::auth::{require_customer, require_seller};
use crate::http::AppState;
use crate::services::{Buyer, Delivery, GuestDetails, PlaceOrderInput, PlaceOrderLine, PlacementReceipt, SellerOrdersPage};
use crate::store::{Page, Store};
use crate::{CommerceError, Result};

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct PlaceOrderRequest {
    #[validate(length(min = 1, message = "Delivery address is required"))]
    pub delivery_address: String,
    pub delivery_info: Option<String>,
    pub delivery_time: Option<String>,
    #[serde(default)]
    pub delivery_fee: Decimal,
    pub total_price: Decimal,
    #[validate(length(min = 1, message = "Payment method is required"))]
    pub payment_method: String,
    #[serde(default)]
    pub items: Vec<OrderLineRequest>,
    /// Forces guest checkout even with a customer token.
    #[serde(default)]
    pub is_guest: bool,
    #[validate(email)]
    pub guest_email: Option<String>,
    pub guest_name: Option<String>,
    pub guest_phone: Option<String>,
    pub guest_session_id: Option<String>,
    #[validate(length(min = 1, max = 128))]
    pub idempotency_key: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderLineRequest {
    pub product_id: i64,
    #[serde(default)]
    pub is_mystery_box: bool,
    pub seller_id: Option<Uuid>,
    pub quantity: i32,
    pub price: Decimal,
}

impl PlaceOrderRequest {
    fn into_input(self, identity: &Identity) -> Result<PlaceOrderInput> {
        let buyer = match identity {
            Identity::Customer(id) if !self.is_guest => Buyer::Customer(*id),
            _ => Buyer::Guest(GuestDetails {
                email: self.guest_email,
                name: self.guest_name,
                phone: self.guest_phone,
                session_id: self.guest_session_id,
            }),
        };
        Ok(PlaceOrderInput {
            buyer,
            delivery: Delivery { address: self.delivery_address, info: self.delivery_info, time: self.delivery_time, fee: self.delivery_fee },
            total_price: self.total_price,
            payment_method: self.payment_method,
            lines: self.items.into_iter().map(|l| PlaceOrderLine {
                item: ItemRef::from_flag(l.product_id, l.is_mystery_box),
                quantity: l.quantity,
                unit_price: l.price,
                seller_id: l.seller_id,
            }).collect(),
            idempotency_key: self.idempotency_key.map(IdempotencyKey::new).transpose()?,
        })
    }
}

pub async fn place_order<S: Store>(
    State(state): State<AppState<S>>,
    identity: Identity,
    Json(request): Json<PlaceOrderRequest>,
) -> Result<(StatusCode, Json<PlacementReceipt>)> {
    request.validate()?;
    let receipt = state.placement.place_order(request.into_input(&identity)?).await?;
    let status = if receipt.replayed { StatusCode::OK } else { StatusCode::CREATED };
    Ok((status, Json(receipt)))
}

pub async fn customer_orders<S: Store>(State(state): State<AppState<S>>, identity: Identity) -> Result<Json<Vec<OrderDetails>>> {
    let customer_id = require_customer(&identity)?;
    Ok(Json(state.lifecycle.customer_orders(customer_id).await?))
}

#[derive(Debug, Deserialize)]
pub struct PageQuery {
    pub page: Option<u32>,
    pub limit: Option<u32>,
}

pub async fn seller_orders<S: Store>(
    State(state): State<AppState<S>>,
    identity: Identity,
    Query(query): Query<PageQuery>,
) -> Result<Json<SellerOrdersPage>> {
    let seller_id = require_seller(&identity)?;
    Ok(Json(state.lifecycle.seller_orders(seller_id, Page::new(query.page, query.limit)).await?))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateStatusRequest {
    pub order_id: Uuid,
    pub status: String,
}

pub async fn update_status<S: Store>(
    State(state): State<AppState<S>>,
    identity: Identity,
    Json(request): Json<UpdateStatusRequest>,
) -> Result<Json<Order>> {
    let seller_id = require_seller(&identity)?;
    let status: OrderStatus = request.status.parse()
        .map_err(|_| CommerceError::Validation(format!("Unknown order status: {}", request.status)))?;
    Ok(Json(state.lifecycle.update_order_status(request.order_id, seller_id, status).await?))
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CancelOrderRequest {
    pub order_id: Uuid,
    #[validate(length(max = 500))]
    pub cancellation_reason: Option<String>,
}

pub async fn cancel_order<S: Store>(
    State(state): State<AppState<S>>,
    identity: Identity,
    Json(request): Json<CancelOrderRequest>,
) -> Result<Json<Order>> {
    request.validate()?;
    Ok(Json(state.lifecycle.cancel_order(request.order_id, &identity, request.cancellation_reason).await?))
}

#[derive(Debug, Deserialize, Serialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct GuestLookupRequest {
    #[validate(length(min = 1))]
    pub order_number: String,
    #[validate(email)]
    pub guest_email: String,
}

pub async fn guest_lookup<S: Store>(State(state): State<AppState<S>>, Json(request): Json<GuestLookupRequest>) -> Result<Json<OrderDetails>> {
    request.validate()?;
    Ok(Json(state.lifecycle.lookup_guest_order(&request.order_number, &request.guest_email).await?))
}

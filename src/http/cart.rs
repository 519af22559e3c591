//! Cart endpoints (customers only)

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::domain::aggregates::CartItem;
use crate::domain::value_objects::{Identity, ItemRef};
use crate::http::auth::require_customer;
use crate::http::AppState;
use crate::services::CartContents;
use crate::store::Store;
use crate::Result;

/// Cart line as sent over the wire. Also used by the client to call these endpoints.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CartItemRequest {
    pub product_id: i64,
    #[serde(default)]
    pub is_mystery_box: bool,
    #[serde(default = "one")]
    pub quantity: i32,
}

fn one() -> i32 { 1 }

impl CartItemRequest {
    pub fn new(item: ItemRef, quantity: i32) -> Self {
        Self { product_id: item.id(), is_mystery_box: item.is_mystery_box(), quantity }
    }
    pub fn item(&self) -> ItemRef { ItemRef::from_flag(self.product_id, self.is_mystery_box) }
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct BulkAddRequest {
    pub items: Vec<CartItemRequest>,
}

pub async fn add_to_cart<S: Store>(
    State(state): State<AppState<S>>,
    identity: Identity,
    Json(request): Json<CartItemRequest>,
) -> Result<Json<CartItem>> {
    let customer_id = require_customer(&identity)?;
    Ok(Json(state.carts.add_item(customer_id, request.item(), request.quantity).await?))
}

pub async fn fetch_cart<S: Store>(State(state): State<AppState<S>>, identity: Identity) -> Result<Json<CartContents>> {
    let customer_id = require_customer(&identity)?;
    Ok(Json(state.carts.fetch(customer_id).await?))
}

pub async fn delete_item<S: Store>(
    State(state): State<AppState<S>>,
    identity: Identity,
    Json(request): Json<CartItemRequest>,
) -> Result<StatusCode> {
    let customer_id = require_customer(&identity)?;
    state.carts.delete_item(customer_id, request.item()).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn bulk_add<S: Store>(
    State(state): State<AppState<S>>,
    identity: Identity,
    Json(request): Json<BulkAddRequest>,
) -> Result<Json<Vec<CartItem>>> {
    let customer_id = require_customer(&identity)?;
    let items = request.items.iter().map(|i| (i.item(), i.quantity)).collect();
    Ok(Json(state.carts.bulk_add(customer_id, items).await?))
}

pub async fn update_quantity<S: Store>(
    State(state): State<AppState<S>>,
    identity: Identity,
    Json(request): Json<CartItemRequest>,
) -> Result<StatusCode> {
    let customer_id = require_customer(&identity)?;
    state.carts.update_quantity(customer_id, request.item(), request.quantity).await?;
    Ok(StatusCode::NO_CONTENT)
}

//! HTTP API

pub mod auth;
pub mod cart;
pub mod error;
pub mod orders;

use axum::extract::FromRef;
use axum::routing::{delete, get, post, put};
use axum::{Json, Router};
use chrono::Duration;
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::services::{CartService, OrderLifecycleManager, OrderPlacementEngine};
use crate::store::Store;

pub use auth::JwtKeys;

pub struct AppState<S> {
    pub store: Arc<S>,
    pub placement: OrderPlacementEngine<S>,
    pub lifecycle: OrderLifecycleManager<S>,
    pub carts: CartService<S>,
    pub keys: JwtKeys,
}

impl<S> Clone for AppState<S> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            placement: self.placement.clone(),
            lifecycle: self.lifecycle.clone(),
            carts: self.carts.clone(),
            keys: self.keys.clone(),
        }
    }
}

impl<S: Store> AppState<S> {
    pub fn new(store: Arc<S>, keys: JwtKeys, cancellation_window: Duration) -> Self {
        Self {
            placement: OrderPlacementEngine::new(store.clone()),
            lifecycle: OrderLifecycleManager::new(store.clone(), cancellation_window),
            carts: CartService::new(store.clone()),
            store,
            keys,
        }
    }
}

impl<S> FromRef<AppState<S>> for JwtKeys {
    fn from_ref(state: &AppState<S>) -> Self { state.keys.clone() }
}

pub fn router<S: Store>(state: AppState<S>) -> Router {
    Router::new()
        .route("/health", get(|| async { Json(serde_json::json!({"status": "healthy", "service": "opensase-marketplace"})) }))
        .route("/order/placeorder", post(orders::place_order::<S>))
        .route("/order/getorders", get(orders::customer_orders::<S>))
        .route("/order/getsellerorders", get(orders::seller_orders::<S>))
        .route("/order/updatestatus", put(orders::update_status::<S>))
        .route("/order/cancel-order", put(orders::cancel_order::<S>))
        .route("/order/guest/lookup", post(orders::guest_lookup::<S>))
        .route("/cart/addtocart", post(cart::add_to_cart::<S>))
        .route("/cart/fetchcart", get(cart::fetch_cart::<S>))
        .route("/cart/deleteitem", delete(cart::delete_item::<S>))
        .route("/cart/bulkadd", post(cart::bulk_add::<S>))
        .route("/cart/updatequantity", put(cart::update_quantity::<S>))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

//! Shared harness: the full router over a seeded in-memory store.

#![allow(dead_code)]

use std::sync::Arc;

use axum::body::{self, Body};
use axum::http::{header, Method, Request};
use axum::response::Response;
use axum::Router;
use chrono::Duration;
use opensase_marketplace::domain::aggregates::{Customer, ManifestLine, MysteryBox, Product};
use opensase_marketplace::domain::value_objects::Role;
use opensase_marketplace::http::{router, AppState, JwtKeys};
use opensase_marketplace::store::MemoryStore;
use rust_decimal::Decimal;
use serde_json::Value;
use tower::ServiceExt;
use uuid::Uuid;

pub const SELLER_A: Uuid = Uuid::from_u128(0xA);
pub const SELLER_B: Uuid = Uuid::from_u128(0xB);

pub struct TestApp {
    pub router: Router,
    pub store: Arc<MemoryStore>,
    pub keys: JwtKeys,
}

impl TestApp {
    pub async fn new() -> Self {
        let store = MemoryStore::new();
        let mut headphones = Product::new(1, "Headphones", Decimal::new(4999, 2), 5, SELLER_A);
        headphones.inventory.sales = 10;
        headphones.images = vec!["headphones.jpg".into()];
        store.insert_product(headphones).await;
        store.insert_product(Product::new(2, "Last Lamp", Decimal::new(1500, 2), 1, SELLER_B)).await;
        store.insert_product(Product::new(3, "Sticker", Decimal::new(100, 2), 10, SELLER_B)).await;
        store.insert_product(Product::new(4, "Keychain", Decimal::new(300, 2), 2, SELLER_B)).await;
        store.insert_mystery_box(MysteryBox::new(100, "Surprise Box", Decimal::new(2000, 2), 3, SELLER_B, vec![
            ManifestLine { product_id: 3, quantity: 2 },
            ManifestLine { product_id: 4, quantity: 1 },
        ])).await;

        let store = Arc::new(store);
        let keys = JwtKeys::new(b"integration-secret");
        let state = AppState::new(store.clone(), keys.clone(), Duration::minutes(5));
        Self { router: router(state), store, keys }
    }

    pub fn token(&self, role: Role, id: Uuid) -> String {
        self.keys.issue(role, id, Duration::hours(1)).unwrap()
    }

    pub async fn customer(&self, name: &str, email: &str) -> (Uuid, String) {
        let id = Uuid::new_v4();
        self.store.insert_customer(Customer { id, name: name.into(), email: email.into() }).await;
        (id, self.token(Role::Customer, id))
    }

    pub async fn request(&self, method: Method, uri: &str, token: Option<&str>, body: Option<Value>) -> Response {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
        }
        let body = match body {
            Some(json) => {
                builder = builder.header(header::CONTENT_TYPE, "application/json");
                Body::from(json.to_string())
            }
            None => Body::empty(),
        };
        self.router.clone().oneshot(builder.body(body).unwrap()).await.unwrap()
    }
}

pub async fn response_json(response: Response) -> Value {
    let bytes = body::to_bytes(response.into_body(), usize::MAX).await.expect("response body bytes");
    serde_json::from_slice(&bytes).expect("json response")
}

//! PgStore against a real database.
//!
//! Ignored by default. Run with a disposable database:
//! DATABASE_URL=postgres://... cargo test --test postgres_store_test -- --ignored

use std::sync::Arc;

use chrono::Duration;
use opensase_marketplace::domain::aggregates::{ManifestLine, OrderStatus};
use opensase_marketplace::domain::value_objects::{Identity, ItemRef};
use opensase_marketplace::services::{
    Buyer, Delivery, GuestDetails, OrderLifecycleManager, OrderPlacementEngine, PlaceOrderInput, PlaceOrderLine,
};
use opensase_marketplace::store::{PgStore, Store, ALREADY_CANCELLED};
use opensase_marketplace::CommerceError;
use rust_decimal::Decimal;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::types::Json;
use uuid::Uuid;

async fn connect() -> (PgPool, Arc<PgStore>) {
    let url = std::env::var("DATABASE_URL").expect("DATABASE_URL must point at a test database");
    let pool = PgPoolOptions::new().max_connections(16).connect(&url).await.expect("db connect");
    let store = PgStore::new(pool.clone());
    store.migrate().await.expect("migrate");
    (pool, Arc::new(store))
}

async fn insert_product(pool: &PgPool, name: &str, stock: i32) -> i64 {
    let (id,): (i64,) = sqlx::query_as(
        "INSERT INTO products (name, price, stock, seller_id) VALUES ($1, 1.00, $2, $3) RETURNING id",
    )
    .bind(name).bind(stock).bind(Uuid::new_v4())
    .fetch_one(pool).await.unwrap();
    id
}

async fn insert_box(pool: &PgPool, stock: i32, manifest: Vec<ManifestLine>) -> i64 {
    let (id,): (i64,) = sqlx::query_as(
        "INSERT INTO mystery_boxes (name, price, stock, seller_id, manifest) VALUES ('Box', 20.00, $1, $2, $3) RETURNING id",
    )
    .bind(stock).bind(Uuid::new_v4()).bind(Json(manifest))
    .fetch_one(pool).await.unwrap();
    id
}

fn guest_order(lines: Vec<(ItemRef, i32)>) -> PlaceOrderInput {
    PlaceOrderInput {
        buyer: Buyer::Guest(GuestDetails { email: Some("pg@example.com".into()), name: Some("Pg".into()), ..Default::default() }),
        delivery: Delivery { address: "1 Test St".into(), ..Default::default() },
        total_price: Decimal::new(1000, 2),
        payment_method: "CASH_ON_DELIVERY".into(),
        lines: lines.into_iter()
            .map(|(item, quantity)| PlaceOrderLine { item, quantity, unit_price: Decimal::ONE, seller_id: None })
            .collect(),
        idempotency_key: None,
    }
}

#[tokio::test]
#[ignore = "requires a Postgres database in DATABASE_URL"]
async fn test_last_unit_goes_to_exactly_one_buyer() {
    let (pool, store) = connect().await;
    let product = insert_product(&pool, "Last Lamp", 1).await;
    let engine = OrderPlacementEngine::new(store.clone());

    let tasks: Vec<_> = (0..8).map(|_| {
        let engine = engine.clone();
        tokio::spawn(async move { engine.place_order(guest_order(vec![(ItemRef::Regular(product), 1)])).await })
    }).collect();

    let mut placed = 0;
    for task in tasks {
        match task.await.unwrap() {
            Ok(_) => placed += 1,
            Err(CommerceError::InsufficientStock { product }) => assert_eq!(product, "Last Lamp"),
            Err(e) => panic!("unexpected error: {e}"),
        }
    }
    assert_eq!(placed, 1);
    let p = store.product(product).await.unwrap().unwrap();
    assert_eq!((p.stock(), p.sales()), (0, 1));
}

#[tokio::test]
#[ignore = "requires a Postgres database in DATABASE_URL"]
async fn test_failed_line_rolls_back_earlier_decrements() {
    let (pool, store) = connect().await;
    let plenty = insert_product(&pool, "Sticker", 10).await;
    let scarce = insert_product(&pool, "Scarce", 1).await;

    let err = OrderPlacementEngine::new(store.clone())
        .place_order(guest_order(vec![(ItemRef::Regular(plenty), 3), (ItemRef::Regular(scarce), 2)]))
        .await.unwrap_err();
    assert!(matches!(err, CommerceError::InsufficientStock { .. }));
    assert_eq!(store.product(plenty).await.unwrap().unwrap().stock(), 10);
    assert_eq!(store.product(scarce).await.unwrap().unwrap().stock(), 1);
}

#[tokio::test]
#[ignore = "requires a Postgres database in DATABASE_URL"]
async fn test_cancel_restores_stock_and_rejects_a_reopened_order() {
    let (pool, store) = connect().await;
    let inside = insert_product(&pool, "Keychain", 5).await;
    let mystery_box = insert_box(&pool, 2, vec![ManifestLine { product_id: inside, quantity: 2 }]).await;

    let receipt = OrderPlacementEngine::new(store.clone())
        .place_order(guest_order(vec![(ItemRef::MysteryBox(mystery_box), 1)]))
        .await.unwrap();
    assert_eq!(store.product(inside).await.unwrap().unwrap().stock(), 3);

    let manager = OrderLifecycleManager::new(store.clone(), Duration::minutes(5));
    let order = manager.cancel_order(receipt.order_id, &Identity::Guest, Some("changed my mind".into())).await.unwrap();
    assert_eq!(order.status, OrderStatus::Cancelled);
    assert_eq!(store.product(inside).await.unwrap().unwrap().stock(), 5);
    let b = store.mystery_box(mystery_box).await.unwrap().unwrap();
    assert_eq!((b.stock(), b.sales()), (2, 0));
    assert!(store.cancellation_for(receipt.order_id).await.unwrap().is_some());

    let seller = store.order_with_items(receipt.order_id).await.unwrap().unwrap().1[0].seller_id;
    manager.update_order_status(receipt.order_id, seller, OrderStatus::Placed).await.unwrap();
    let err = manager.cancel_order(receipt.order_id, &Identity::Guest, None).await.unwrap_err();
    assert!(matches!(err, CommerceError::InvalidState(ref m) if m == ALREADY_CANCELLED));
    assert_eq!(store.product(inside).await.unwrap().unwrap().stock(), 5);
}

#[tokio::test]
#[ignore = "requires a Postgres database in DATABASE_URL"]
async fn test_cart_upsert_accumulates_per_item_kind() {
    let (pool, store) = connect().await;
    let product = insert_product(&pool, "Mug", 4).await;
    let mystery_box = insert_box(&pool, 1, vec![]).await;
    let customer = Uuid::new_v4();
    sqlx::query("INSERT INTO customers (id, name, email) VALUES ($1, 'Ada', $2)")
        .bind(customer).bind(format!("{customer}@example.com"))
        .execute(&pool).await.unwrap();

    store.add_cart_item(customer, ItemRef::Regular(product), 1).await.unwrap();
    let line = store.add_cart_item(customer, ItemRef::Regular(product), 2).await.unwrap();
    assert_eq!(line.quantity, 3);
    store.add_cart_item(customer, ItemRef::MysteryBox(mystery_box), 1).await.unwrap();

    let lines = store.cart_lines(customer).await.unwrap();
    assert_eq!(lines.len(), 2);
    assert_eq!((lines[0].item, lines[0].quantity), (ItemRef::Regular(product), 3));
    assert_eq!(lines[1].item, ItemRef::MysteryBox(mystery_box));

    assert!(store.remove_cart_item(customer, ItemRef::Regular(product)).await.unwrap());
    assert!(!store.remove_cart_item(customer, ItemRef::Regular(product)).await.unwrap());
}

//! Server cart endpoints, and the client reconciler talking to them over HTTP.

mod common;

use std::sync::Arc;

use axum::http::{Method, StatusCode};
use common::{response_json, TestApp};
use opensase_marketplace::client::{CartReconciler, CartSource, HttpCartApi, ItemSnapshot, MemorySessionStorage, SharedToken};
use opensase_marketplace::domain::value_objects::ItemRef;
use rust_decimal::Decimal;
use serde_json::json;

#[tokio::test]
async fn test_cart_requires_customer() {
    let app = TestApp::new().await;
    let response = app.request(Method::GET, "/cart/fetchcart", None, None).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_cart_crud() {
    let app = TestApp::new().await;
    let (_, token) = app.customer("Ada", "ada@example.com").await;
    let token = Some(token.as_str());

    let response = app.request(Method::POST, "/cart/addtocart", token, Some(json!({"productId": 1, "quantity": 2}))).await;
    assert_eq!(response.status(), StatusCode::OK);
    let response = app.request(Method::POST, "/cart/bulkadd", token, Some(json!({"items": [
        {"productId": 100, "isMysteryBox": true, "quantity": 1},
        {"productId": 1, "quantity": 1},
    ]}))).await;
    assert_eq!(response.status(), StatusCode::OK);

    let cart = response_json(app.request(Method::GET, "/cart/fetchcart", token, None).await).await;
    let items = cart["items"].as_array().unwrap();
    assert_eq!(items.len(), 2);
    assert_eq!(items[0]["quantity"], 3);
    assert_eq!(items[0]["name"], "Headphones");
    assert_eq!(items[1]["itemType"], "MYSTERY_BOX");
    let subtotal: Decimal = cart["subtotal"].as_str().unwrap().parse().unwrap();
    assert_eq!(subtotal, Decimal::new(4999 * 3 + 2000, 2));

    let response = app.request(Method::PUT, "/cart/updatequantity", token, Some(json!({"productId": 1, "quantity": 1}))).await;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    let response = app.request(Method::DELETE, "/cart/deleteitem", token, Some(json!({"productId": 100, "isMysteryBox": true}))).await;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    let response = app.request(Method::DELETE, "/cart/deleteitem", token, Some(json!({"productId": 100, "isMysteryBox": true}))).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let cart = response_json(app.request(Method::GET, "/cart/fetchcart", token, None).await).await;
    assert_eq!(cart["items"].as_array().unwrap().len(), 1);
    assert_eq!(cart["items"][0]["quantity"], 1);
}

#[tokio::test]
async fn test_cart_rejects_unknown_items_and_bad_quantities() {
    let app = TestApp::new().await;
    let (_, token) = app.customer("Ada", "ada@example.com").await;
    let token = Some(token.as_str());

    let response = app.request(Method::POST, "/cart/addtocart", token, Some(json!({"productId": 100, "quantity": 1}))).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let response = app.request(Method::POST, "/cart/addtocart", token, Some(json!({"productId": 1, "quantity": -2}))).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_reconciler_merges_session_cart_over_http() {
    let app = TestApp::new().await;
    let (_, token) = app.customer("Ada", "ada@example.com").await;

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base_url = format!("http://{}", listener.local_addr().unwrap());
    let router = app.router.clone();
    tokio::spawn(async move { axum::serve(listener, router).await.unwrap() });

    let tokens = SharedToken::default();
    let cart = CartReconciler::new(
        Arc::new(MemorySessionStorage::new()),
        Arc::new(tokens.clone()),
        Arc::new(HttpCartApi::new(&base_url).unwrap()),
    );
    let snapshot = ItemSnapshot { name: "Headphones".into(), price: Decimal::new(4999, 2), ..Default::default() };
    assert!(cart.add_item(ItemRef::Regular(1), 2, snapshot).unwrap().is_none());
    assert_eq!(cart.fetch_cart(false).await.source, CartSource::Session);

    tokens.set(token);
    let report = cart.merge_session_cart().await.unwrap();
    assert_eq!((report.merged, report.failed), (1, 0));

    let view = cart.view();
    assert_eq!(view.source, CartSource::Server);
    assert_eq!(view.items.len(), 1);
    assert_eq!((view.items[0].item, view.items[0].quantity), (ItemRef::Regular(1), 2));

    let view = cart.update_quantity(ItemRef::Regular(1), 5).await.unwrap();
    assert_eq!(view.items[0].quantity, 5);
    let view = cart.delete_item(ItemRef::Regular(1)).await.unwrap();
    assert!(view.items.is_empty());
    assert_eq!(view.source, CartSource::Server);
}

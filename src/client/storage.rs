//! Session-scoped cart storage

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::warn;
use uuid::Uuid;

use crate::client::ClientResult;
use crate::domain::aggregates::CartLine;
use crate::domain::value_objects::ItemRef;

pub const SESSION_CART_KEY: &str = "guestCart";

/// String key/value store scoped to one browser session.
pub trait SessionStorage: Send + Sync {
    fn get_item(&self, key: &str) -> Option<String>;
    fn set_item(&self, key: &str, value: String) -> ClientResult<()>;
    fn remove_item(&self, key: &str);
}

#[derive(Debug, Default)]
pub struct MemorySessionStorage {
    items: Mutex<HashMap<String, String>>,
}

impl MemorySessionStorage {
    pub fn new() -> Self { Self::default() }

    fn items(&self) -> std::sync::MutexGuard<'_, HashMap<String, String>> {
        self.items.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl SessionStorage for MemorySessionStorage {
    fn get_item(&self, key: &str) -> Option<String> { self.items().get(key).cloned() }

    fn set_item(&self, key: &str, value: String) -> ClientResult<()> {
        self.items().insert(key.to_string(), value);
        Ok(())
    }

    fn remove_item(&self, key: &str) { self.items().remove(key); }
}

/// Display fields captured when the shopper adds an item.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemSnapshot {
    pub name: String,
    pub price: Decimal,
    pub discount_price: Option<Decimal>,
    pub image: Option<String>,
    pub seller_id: Option<Uuid>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionCartItem {
    #[serde(flatten)]
    pub item: ItemRef,
    pub quantity: i32,
    #[serde(flatten)]
    pub snapshot: ItemSnapshot,
    pub added_at: DateTime<Utc>,
}

impl From<&SessionCartItem> for CartLine {
    fn from(i: &SessionCartItem) -> Self {
        Self {
            item: i.item, quantity: i.quantity, name: i.snapshot.name.clone(), price: i.snapshot.price,
            discount_price: i.snapshot.discount_price, image: i.snapshot.image.clone(), seller_id: i.snapshot.seller_id,
        }
    }
}

/// Merge-by-item: an existing line accumulates quantity and takes the newest snapshot.
pub fn merge_line(items: &mut Vec<SessionCartItem>, item: ItemRef, quantity: i32, snapshot: ItemSnapshot, now: DateTime<Utc>) {
    match items.iter_mut().find(|i| i.item == item) {
        Some(existing) => {
            existing.quantity = existing.quantity.saturating_add(quantity);
            existing.snapshot = snapshot;
        }
        None => items.push(SessionCartItem { item, quantity, snapshot, added_at: now }),
    }
}

/// The session cart, stored as one JSON array under a single key.
#[derive(Clone)]
pub struct SessionCart {
    storage: Arc<dyn SessionStorage>,
    key: String,
}

impl SessionCart {
    pub fn new(storage: Arc<dyn SessionStorage>) -> Self { Self::with_key(storage, SESSION_CART_KEY) }

    pub fn with_key(storage: Arc<dyn SessionStorage>, key: impl Into<String>) -> Self { Self { storage, key: key.into() } }

    /// Unreadable contents are treated as an empty cart.
    pub fn load(&self) -> Vec<SessionCartItem> {
        let Some(raw) = self.storage.get_item(&self.key) else { return vec![] };
        serde_json::from_str(&raw).unwrap_or_else(|e| {
            warn!(error = %e, "Discarding unreadable session cart");
            vec![]
        })
    }

    fn save(&self, items: &[SessionCartItem]) -> ClientResult<()> {
        let raw = serde_json::to_string(items)?;
        self.storage.set_item(&self.key, raw)
    }

    pub fn add(&self, item: ItemRef, quantity: i32, snapshot: ItemSnapshot) -> ClientResult<Vec<SessionCartItem>> {
        let mut items = self.load();
        merge_line(&mut items, item, quantity, snapshot, Utc::now());
        self.save(&items)?;
        Ok(items)
    }

    pub fn remove(&self, item: ItemRef) -> ClientResult<Vec<SessionCartItem>> {
        let mut items = self.load();
        items.retain(|i| i.item != item);
        self.save(&items)?;
        Ok(items)
    }

    /// Zero removes the line; unknown items are ignored.
    pub fn set_quantity(&self, item: ItemRef, quantity: i32) -> ClientResult<Vec<SessionCartItem>> {
        if quantity == 0 { return self.remove(item); }
        let mut items = self.load();
        if let Some(line) = items.iter_mut().find(|i| i.item == item) {
            line.quantity = quantity;
        }
        self.save(&items)?;
        Ok(items)
    }

    pub fn clear(&self) { self.storage.remove_item(&self.key); }
}

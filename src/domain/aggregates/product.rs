//! Catalog Aggregates: regular products and mystery boxes

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Stock and sales counters shared by both kinds of catalog entry.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Inventory {
    pub stock: i32,
    pub sales: i32,
}

impl Inventory {
    pub fn new(stock: i32, sales: i32) -> Self { Self { stock, sales } }

    /// Sells `qty` units if enough stock remains. Returns false and leaves the counters untouched otherwise.
    pub fn sell(&mut self, qty: i32) -> bool {
        if !self.withdraw(qty) { return false; }
        self.sales += qty;
        true
    }

    /// Removes `qty` units from stock without counting them as sales.
    pub fn withdraw(&mut self, qty: i32) -> bool {
        if qty < 0 || self.stock < qty { return false; }
        self.stock -= qty;
        true
    }

    /// Inverse of [`Inventory::sell`]. Sales never drop below zero.
    pub fn unsell(&mut self, qty: i32) {
        self.restore(qty);
        self.sales = (self.sales - qty).max(0);
    }

    pub fn restore(&mut self, qty: i32) { self.stock = self.stock.saturating_add(qty); }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Product {
    pub id: i64,
    pub name: String,
    pub description: String,
    pub category: Option<String>,
    pub price: Decimal,
    pub discount_price: Option<Decimal>,
    #[serde(flatten)]
    pub inventory: Inventory,
    pub seller_id: Uuid,
    pub images: Vec<String>,
    pub deleted: bool,
    pub created_at: DateTime<Utc>,
}

impl Product {
    pub fn new(id: i64, name: impl Into<String>, price: Decimal, stock: i32, seller_id: Uuid) -> Self {
        Self {
            id, name: name.into(), description: String::new(), category: None, price, discount_price: None,
            inventory: Inventory::new(stock, 0), seller_id, images: vec![], deleted: false, created_at: Utc::now(),
        }
    }

    pub fn stock(&self) -> i32 { self.inventory.stock }
    pub fn sales(&self) -> i32 { self.inventory.sales }
    pub fn is_available(&self) -> bool { !self.deleted }
    pub fn first_image(&self) -> Option<&str> { self.images.first().map(String::as_str) }
    pub fn effective_price(&self) -> Decimal { self.discount_price.unwrap_or(self.price) }
}

/// One entry of a mystery box's contents: `quantity` units of `product_id` per box.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManifestLine {
    pub product_id: i64,
    pub quantity: i32,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MysteryBox {
    pub id: i64,
    pub name: String,
    pub description: String,
    pub price: Decimal,
    pub discount_price: Option<Decimal>,
    #[serde(flatten)]
    pub inventory: Inventory,
    pub seller_id: Uuid,
    pub image: Option<String>,
    pub manifest: Vec<ManifestLine>,
    pub deleted: bool,
    pub created_at: DateTime<Utc>,
}

impl MysteryBox {
    pub fn new(id: i64, name: impl Into<String>, price: Decimal, stock: i32, seller_id: Uuid, manifest: Vec<ManifestLine>) -> Self {
        Self {
            id, name: name.into(), description: String::new(), price, discount_price: None,
            inventory: Inventory::new(stock, 0), seller_id, image: None, manifest, deleted: false, created_at: Utc::now(),
        }
    }

    pub fn stock(&self) -> i32 { self.inventory.stock }
    pub fn sales(&self) -> i32 { self.inventory.sales }
    pub fn is_available(&self) -> bool { !self.deleted }
    pub fn effective_price(&self) -> Decimal { self.discount_price.unwrap_or(self.price) }

    /// Units of each manifest product consumed by selling `boxes` boxes.
    /// Lines whose total would overflow `i32` are reported as `None`.
    pub fn contents_for(&self, boxes: i32) -> Vec<(i64, Option<i32>)> {
        self.manifest.iter().map(|line| (line.product_id, line.quantity.checked_mul(boxes))).collect()
    }
}

/// Display data for an order line or cart line.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemLabel {
    pub name: String,
    pub price: Decimal,
    pub discount_price: Option<Decimal>,
    pub image: Option<String>,
    pub seller_id: Uuid,
}

impl From<&Product> for ItemLabel {
    fn from(p: &Product) -> Self {
        Self { name: p.name.clone(), price: p.price, discount_price: p.discount_price, image: p.first_image().map(str::to_string), seller_id: p.seller_id }
    }
}

impl From<&MysteryBox> for ItemLabel {
    fn from(b: &MysteryBox) -> Self {
        Self { name: b.name.clone(), price: b.price, discount_price: b.discount_price, image: b.image.clone(), seller_id: b.seller_id }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inventory_sell_and_unsell() {
        let mut inv = Inventory::new(5, 10);
        assert!(inv.sell(3));
        assert_eq!(inv, Inventory::new(2, 13));
        assert!(!inv.sell(3));
        assert_eq!(inv, Inventory::new(2, 13));
        inv.unsell(3);
        assert_eq!(inv, Inventory::new(5, 10));
    }

    #[test]
    fn test_withdraw_does_not_touch_sales() {
        let mut inv = Inventory::new(4, 1);
        assert!(inv.withdraw(4));
        assert_eq!(inv, Inventory::new(0, 1));
        assert!(!inv.withdraw(1));
    }

    #[test]
    fn test_box_contents() {
        let seller = Uuid::new_v4();
        let b = MysteryBox::new(1, "Box", Decimal::new(2500, 2), 3, seller, vec![
            ManifestLine { product_id: 10, quantity: 2 },
            ManifestLine { product_id: 11, quantity: 1 },
        ]);
        assert_eq!(b.contents_for(3), vec![(10, Some(6)), (11, Some(3))]);
    }
}

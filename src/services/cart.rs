//! Server-side customer carts

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, instrument};
use uuid::Uuid;

use crate::domain::aggregates::cart::subtotal;
use crate::domain::aggregates::{CartItem, CartLine};
use crate::domain::value_objects::{ItemRef, Quantity};
use crate::store::Store;
use crate::{CommerceError, Result};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CartContents {
    pub items: Vec<CartLine>,
    pub subtotal: Decimal,
}

pub struct CartService<S> {
    store: Arc<S>,
}

impl<S> Clone for CartService<S> {
    fn clone(&self) -> Self { Self { store: self.store.clone() } }
}

impl<S: Store> CartService<S> {
    pub fn new(store: Arc<S>) -> Self { Self { store } }

    #[instrument(skip(self))]
    pub async fn add_item(&self, customer_id: Uuid, item: ItemRef, quantity: i32) -> Result<CartItem> {
        let quantity = Quantity::new(quantity)?;
        self.ensure_listed(item).await?;
        let line = self.store.add_cart_item(customer_id, item, quantity.value()).await?;
        debug!(%item, quantity = line.quantity, "Cart line updated");
        Ok(line)
    }

    /// Stops at the first invalid line; lines before it stay in the cart.
    pub async fn bulk_add(&self, customer_id: Uuid, items: Vec<(ItemRef, i32)>) -> Result<Vec<CartItem>> {
        let mut added = Vec::with_capacity(items.len());
        for (item, quantity) in items {
            added.push(self.add_item(customer_id, item, quantity).await?);
        }
        Ok(added)
    }

    pub async fn fetch(&self, customer_id: Uuid) -> Result<CartContents> {
        let items = self.store.cart_lines(customer_id).await?;
        Ok(CartContents { subtotal: subtotal(&items), items })
    }

    pub async fn delete_item(&self, customer_id: Uuid, item: ItemRef) -> Result<()> {
        if !self.store.remove_cart_item(customer_id, item).await? {
            return Err(CommerceError::CartItemNotFound);
        }
        Ok(())
    }

    /// Zero removes the line.
    pub async fn update_quantity(&self, customer_id: Uuid, item: ItemRef, quantity: i32) -> Result<()> {
        if quantity < 0 {
            return Err(CommerceError::Validation(format!("Quantity must be zero or positive, got {}", quantity)));
        }
        if quantity == 0 {
            return self.delete_item(customer_id, item).await;
        }
        if !self.store.set_cart_item_quantity(customer_id, item, quantity).await? {
            return Err(CommerceError::CartItemNotFound);
        }
        Ok(())
    }

    async fn ensure_listed(&self, item: ItemRef) -> Result<()> {
        let listed = match item {
            ItemRef::Regular(id) => self.store.product(id).await?.is_some_and(|p| p.is_available()),
            ItemRef::MysteryBox(id) => self.store.mystery_box(id).await?.is_some_and(|b| b.is_available()),
        };
        match (listed, item) {
            (true, _) => Ok(()),
            (false, ItemRef::Regular(id)) => Err(CommerceError::ProductNotFound(id)),
            (false, ItemRef::MysteryBox(id)) => Err(CommerceError::MysteryBoxNotFound(id)),
        }
    }
}

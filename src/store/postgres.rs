//! Postgres-backed store.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::postgres::PgPool;
use sqlx::types::Json;
use sqlx::{FromRow, PgExecutor, Postgres, Transaction};
use std::collections::HashMap;
use uuid::Uuid;

use super::{Page, Store, StoreTx, ALREADY_CANCELLED};
use crate::domain::aggregates::{
    CartItem, CartLine, Customer, GuestContact, Inventory, ItemLabel, ManifestLine, MysteryBox, Order,
    OrderCancellation, OrderItem, OrderOwner, Product,
};
use crate::domain::value_objects::ItemRef;
use crate::{CommerceError, Result};

#[derive(Debug, FromRow)]
struct ProductRow {
    id: i64, name: String, description: String, category: Option<String>, price: Decimal, discount_price: Option<Decimal>,
    stock: i32, sales: i32, seller_id: Uuid, images: Vec<String>, deleted: bool, created_at: DateTime<Utc>,
}

impl From<ProductRow> for Product {
    fn from(r: ProductRow) -> Self {
        Self {
            id: r.id, name: r.name, description: r.description, category: r.category, price: r.price,
            discount_price: r.discount_price, inventory: Inventory::new(r.stock, r.sales), seller_id: r.seller_id,
            images: r.images, deleted: r.deleted, created_at: r.created_at,
        }
    }
}

#[derive(Debug, FromRow)]
struct MysteryBoxRow {
    id: i64, name: String, description: String, price: Decimal, discount_price: Option<Decimal>, stock: i32, sales: i32,
    seller_id: Uuid, image: Option<String>, manifest: Json<Vec<ManifestLine>>, deleted: bool, created_at: DateTime<Utc>,
}

impl From<MysteryBoxRow> for MysteryBox {
    fn from(r: MysteryBoxRow) -> Self {
        Self {
            id: r.id, name: r.name, description: r.description, price: r.price, discount_price: r.discount_price,
            inventory: Inventory::new(r.stock, r.sales), seller_id: r.seller_id, image: r.image, manifest: r.manifest.0,
            deleted: r.deleted, created_at: r.created_at,
        }
    }
}

#[derive(Debug, FromRow)]
struct OrderRow {
    id: Uuid, order_number: String, customer_id: Option<Uuid>, guest_session_id: Option<String>, guest_email: Option<String>,
    guest_name: Option<String>, guest_phone: Option<String>, total_amount: Decimal, delivery_fee: Decimal,
    delivery_address: String, delivery_info: Option<String>, delivery_time: Option<String>, payment_method: String,
    payment_status: String, status: String, idempotency_key: Option<String>, cancelled_at: Option<DateTime<Utc>>,
    cancellation_reason: Option<String>, created_at: DateTime<Utc>, updated_at: DateTime<Utc>,
}

impl TryFrom<OrderRow> for Order {
    type Error = CommerceError;
    fn try_from(r: OrderRow) -> Result<Self> {
        let owner = match (r.customer_id, r.guest_session_id, r.guest_email, r.guest_name) {
            (Some(customer_id), None, None, None) => OrderOwner::Customer { customer_id },
            (None, Some(session_id), Some(email), Some(name)) => OrderOwner::Guest(GuestContact { session_id, email, name, phone: r.guest_phone }),
            _ => return Err(CommerceError::StorageError(format!("order {} has no single owner", r.id))),
        };
        Ok(Self {
            id: r.id, order_number: r.order_number, owner, total_amount: r.total_amount, delivery_fee: r.delivery_fee,
            delivery_address: r.delivery_address, delivery_info: r.delivery_info, delivery_time: r.delivery_time,
            payment_method: r.payment_method,
            payment_status: r.payment_status.parse().map_err(|e| CommerceError::StorageError(format!("order {}: {}", r.id, e)))?,
            status: r.status.parse().map_err(|e| CommerceError::StorageError(format!("order {}: {}", r.id, e)))?,
            idempotency_key: r.idempotency_key, cancelled_at: r.cancelled_at, cancellation_reason: r.cancellation_reason,
            created_at: r.created_at, updated_at: r.updated_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct OrderItemRow {
    id: Uuid, order_id: Uuid, product_id: Option<i64>, mystery_box_id: Option<i64>, seller_id: Uuid, quantity: i32,
    unit_price: Decimal, bundle_contents: Json<Vec<ManifestLine>>, created_at: DateTime<Utc>,
}

impl TryFrom<OrderItemRow> for OrderItem {
    type Error = CommerceError;
    fn try_from(r: OrderItemRow) -> Result<Self> {
        Ok(Self {
            id: r.id, order_id: r.order_id, item: item_ref(r.product_id, r.mystery_box_id)?, seller_id: r.seller_id,
            quantity: r.quantity, unit_price: r.unit_price, bundle_contents: r.bundle_contents.0, created_at: r.created_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct CartItemRow {
    id: Uuid, cart_id: Uuid, product_id: Option<i64>, mystery_box_id: Option<i64>, quantity: i32, added_at: DateTime<Utc>,
}

impl TryFrom<CartItemRow> for CartItem {
    type Error = CommerceError;
    fn try_from(r: CartItemRow) -> Result<Self> {
        Ok(Self { id: r.id, cart_id: r.cart_id, item: item_ref(r.product_id, r.mystery_box_id)?, quantity: r.quantity, added_at: r.added_at })
    }
}

fn item_ref(product_id: Option<i64>, mystery_box_id: Option<i64>) -> Result<ItemRef> {
    match (product_id, mystery_box_id) {
        (Some(id), None) => Ok(ItemRef::Regular(id)),
        (None, Some(id)) => Ok(ItemRef::MysteryBox(id)),
        _ => Err(CommerceError::StorageError("row references neither or both of product and mystery box".into())),
    }
}

/// Column holding the reference for each item kind.
fn item_column(item: &ItemRef) -> &'static str {
    match item { ItemRef::Regular(_) => "product_id", ItemRef::MysteryBox(_) => "mystery_box_id" }
}

fn orders_from_rows(rows: Vec<OrderRow>) -> Result<Vec<Order>> {
    rows.into_iter().map(Order::try_from).collect()
}

fn items_from_rows(rows: Vec<OrderItemRow>) -> Result<Vec<OrderItem>> {
    rows.into_iter().map(OrderItem::try_from).collect()
}

async fn fetch_product<'e>(ex: impl PgExecutor<'e>, id: i64) -> Result<Option<Product>> {
    let row = sqlx::query_as::<_, ProductRow>("SELECT * FROM products WHERE id = $1").bind(id).fetch_optional(ex).await?;
    Ok(row.map(Product::from))
}

async fn fetch_mystery_box<'e>(ex: impl PgExecutor<'e>, id: i64) -> Result<Option<MysteryBox>> {
    let row = sqlx::query_as::<_, MysteryBoxRow>("SELECT * FROM mystery_boxes WHERE id = $1").bind(id).fetch_optional(ex).await?;
    Ok(row.map(MysteryBox::from))
}

async fn fetch_order_items<'e>(ex: impl PgExecutor<'e>, order_id: Uuid) -> Result<Vec<OrderItem>> {
    let rows = sqlx::query_as::<_, OrderItemRow>("SELECT * FROM order_items WHERE order_id = $1 ORDER BY created_at, id")
        .bind(order_id).fetch_all(ex).await?;
    items_from_rows(rows)
}

#[derive(Clone, Debug)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self { Self { pool } }

    pub async fn migrate(&self) -> anyhow::Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    async fn with_items(&self, orders: Vec<Order>, seller_id: Option<Uuid>) -> Result<Vec<(Order, Vec<OrderItem>)>> {
        let ids: Vec<Uuid> = orders.iter().map(|o| o.id).collect();
        let rows = sqlx::query_as::<_, OrderItemRow>(
            "SELECT * FROM order_items WHERE order_id = ANY($1) AND ($2::uuid IS NULL OR seller_id = $2) ORDER BY created_at, id",
        )
        .bind(&ids).bind(seller_id).fetch_all(&self.pool).await?;
        let mut grouped: HashMap<Uuid, Vec<OrderItem>> = HashMap::new();
        for item in items_from_rows(rows)? {
            grouped.entry(item.order_id).or_default().push(item);
        }
        Ok(orders.into_iter().map(|o| { let items = grouped.remove(&o.id).unwrap_or_default(); (o, items) }).collect())
    }
}

#[async_trait]
impl Store for PgStore {
    type Tx = PgTx;

    async fn begin(&self) -> Result<PgTx> {
        Ok(PgTx { tx: self.pool.begin().await? })
    }

    async fn product(&self, id: i64) -> Result<Option<Product>> { fetch_product(&self.pool, id).await }

    async fn mystery_box(&self, id: i64) -> Result<Option<MysteryBox>> { fetch_mystery_box(&self.pool, id).await }

    async fn item_labels(&self, items: &[ItemRef]) -> Result<HashMap<ItemRef, ItemLabel>> {
        let product_ids: Vec<i64> = items.iter().filter(|i| !i.is_mystery_box()).map(ItemRef::id).collect();
        let box_ids: Vec<i64> = items.iter().filter(|i| i.is_mystery_box()).map(ItemRef::id).collect();
        let mut labels = HashMap::new();
        if !product_ids.is_empty() {
            let rows = sqlx::query_as::<_, ProductRow>("SELECT * FROM products WHERE id = ANY($1)")
                .bind(&product_ids).fetch_all(&self.pool).await?;
            for p in rows.into_iter().map(Product::from) {
                labels.insert(ItemRef::Regular(p.id), ItemLabel::from(&p));
            }
        }
        if !box_ids.is_empty() {
            let rows = sqlx::query_as::<_, MysteryBoxRow>("SELECT * FROM mystery_boxes WHERE id = ANY($1)")
                .bind(&box_ids).fetch_all(&self.pool).await?;
            for b in rows.into_iter().map(MysteryBox::from) {
                labels.insert(ItemRef::MysteryBox(b.id), ItemLabel::from(&b));
            }
        }
        Ok(labels)
    }

    async fn customers(&self, ids: &[Uuid]) -> Result<HashMap<Uuid, Customer>> {
        let rows: Vec<(Uuid, String, String)> = sqlx::query_as("SELECT id, name, email FROM customers WHERE id = ANY($1)")
            .bind(ids).fetch_all(&self.pool).await?;
        Ok(rows.into_iter().map(|(id, name, email)| (id, Customer { id, name, email })).collect())
    }

    async fn order_with_items(&self, id: Uuid) -> Result<Option<(Order, Vec<OrderItem>)>> {
        let Some(row) = sqlx::query_as::<_, OrderRow>("SELECT * FROM orders WHERE id = $1").bind(id).fetch_optional(&self.pool).await? else {
            return Ok(None);
        };
        Ok(Some((Order::try_from(row)?, fetch_order_items(&self.pool, id).await?)))
    }

    async fn order_by_number(&self, order_number: &str) -> Result<Option<(Order, Vec<OrderItem>)>> {
        let Some(row) = sqlx::query_as::<_, OrderRow>("SELECT * FROM orders WHERE order_number = $1")
            .bind(order_number).fetch_optional(&self.pool).await? else {
            return Ok(None);
        };
        let order = Order::try_from(row)?;
        let items = fetch_order_items(&self.pool, order.id).await?;
        Ok(Some((order, items)))
    }

    async fn cancellation_for(&self, order_id: Uuid) -> Result<Option<OrderCancellation>> {
        let row: Option<(Uuid, Option<String>, Option<Uuid>, String, DateTime<Utc>)> = sqlx::query_as(
            "SELECT id, reason, cancelled_by, refund_status, created_at FROM order_cancellations WHERE order_id = $1",
        )
        .bind(order_id).fetch_optional(&self.pool).await?;
        row.map(|(id, reason, cancelled_by, refund_status, created_at)| {
            Ok(OrderCancellation {
                id, order_id, reason, cancelled_by, created_at,
                refund_status: refund_status.parse().map_err(|e| CommerceError::StorageError(format!("cancellation {}: {}", id, e)))?,
            })
        })
        .transpose()
    }

    async fn orders_for_customer(&self, customer_id: Uuid) -> Result<Vec<(Order, Vec<OrderItem>)>> {
        let rows = sqlx::query_as::<_, OrderRow>("SELECT * FROM orders WHERE customer_id = $1 ORDER BY created_at DESC, id DESC")
            .bind(customer_id).fetch_all(&self.pool).await?;
        self.with_items(orders_from_rows(rows)?, None).await
    }

    async fn orders_for_seller(&self, seller_id: Uuid, page: Page) -> Result<(Vec<(Order, Vec<OrderItem>)>, i64)> {
        let rows = sqlx::query_as::<_, OrderRow>(
            "SELECT o.* FROM orders o \
             WHERE EXISTS (SELECT 1 FROM order_items oi WHERE oi.order_id = o.id AND oi.seller_id = $1) \
             ORDER BY o.created_at DESC, o.id DESC LIMIT $2 OFFSET $3",
        )
        .bind(seller_id).bind(i64::from(page.limit)).bind(page.offset()).fetch_all(&self.pool).await?;
        let total: (i64,) = sqlx::query_as("SELECT COUNT(DISTINCT order_id) FROM order_items WHERE seller_id = $1")
            .bind(seller_id).fetch_one(&self.pool).await?;
        Ok((self.with_items(orders_from_rows(rows)?, Some(seller_id)).await?, total.0))
    }

    async fn add_cart_item(&self, customer_id: Uuid, item: ItemRef, quantity: i32) -> Result<CartItem> {
        let (cart_id,): (Uuid,) = sqlx::query_as(
            "INSERT INTO carts (id, customer_id, created_at) VALUES ($1, $2, NOW()) \
             ON CONFLICT (customer_id) DO UPDATE SET customer_id = EXCLUDED.customer_id RETURNING id",
        )
        .bind(Uuid::now_v7()).bind(customer_id).fetch_one(&self.pool).await?;
        let column = item_column(&item);
        let sql = format!(
            "INSERT INTO cart_items (id, cart_id, {column}, quantity, added_at) VALUES ($1, $2, $3, $4, NOW()) \
             ON CONFLICT (cart_id, {column}) WHERE {column} IS NOT NULL \
             DO UPDATE SET quantity = cart_items.quantity + EXCLUDED.quantity RETURNING *"
        );
        let row = sqlx::query_as::<_, CartItemRow>(&sql)
            .bind(Uuid::now_v7()).bind(cart_id).bind(item.id()).bind(quantity).fetch_one(&self.pool).await?;
        CartItem::try_from(row)
    }

    async fn set_cart_item_quantity(&self, customer_id: Uuid, item: ItemRef, quantity: i32) -> Result<bool> {
        let sql = format!(
            "UPDATE cart_items SET quantity = $3 WHERE cart_id = (SELECT id FROM carts WHERE customer_id = $1) AND {} = $2",
            item_column(&item)
        );
        let res = sqlx::query(&sql).bind(customer_id).bind(item.id()).bind(quantity).execute(&self.pool).await?;
        Ok(res.rows_affected() > 0)
    }

    async fn remove_cart_item(&self, customer_id: Uuid, item: ItemRef) -> Result<bool> {
        let sql = format!(
            "DELETE FROM cart_items WHERE cart_id = (SELECT id FROM carts WHERE customer_id = $1) AND {} = $2",
            item_column(&item)
        );
        let res = sqlx::query(&sql).bind(customer_id).bind(item.id()).execute(&self.pool).await?;
        Ok(res.rows_affected() > 0)
    }

    async fn cart_lines(&self, customer_id: Uuid) -> Result<Vec<CartLine>> {
        let rows = sqlx::query_as::<_, CartItemRow>(
            "SELECT ci.* FROM cart_items ci JOIN carts c ON c.id = ci.cart_id WHERE c.customer_id = $1 ORDER BY ci.added_at, ci.id",
        )
        .bind(customer_id).fetch_all(&self.pool).await?;
        let items = rows.into_iter().map(CartItem::try_from).collect::<Result<Vec<_>>>()?;
        let refs: Vec<ItemRef> = items.iter().map(|i| i.item).collect();
        let labels = self.item_labels(&refs).await?;
        Ok(items.into_iter()
            .filter_map(|i| labels.get(&i.item).map(|label| CartLine::from_label(i.item, i.quantity, label.clone())))
            .collect())
    }
}

pub struct PgTx {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl StoreTx for PgTx {
    async fn product(&mut self, id: i64) -> Result<Option<Product>> { fetch_product(&mut *self.tx, id).await }

    async fn mystery_box(&mut self, id: i64) -> Result<Option<MysteryBox>> { fetch_mystery_box(&mut *self.tx, id).await }

    async fn order_by_idempotency_key(&mut self, key: &str) -> Result<Option<Order>> {
        let row = sqlx::query_as::<_, OrderRow>("SELECT * FROM orders WHERE idempotency_key = $1")
            .bind(key).fetch_optional(&mut *self.tx).await?;
        row.map(Order::try_from).transpose()
    }

    async fn sell_product(&mut self, id: i64, qty: i32) -> Result<bool> {
        let res = sqlx::query("UPDATE products SET stock = stock - $2, sales = sales + $2 WHERE id = $1 AND stock >= $2")
            .bind(id).bind(qty).execute(&mut *self.tx).await?;
        Ok(res.rows_affected() == 1)
    }

    async fn withdraw_product(&mut self, id: i64, qty: i32) -> Result<bool> {
        let res = sqlx::query("UPDATE products SET stock = stock - $2 WHERE id = $1 AND stock >= $2")
            .bind(id).bind(qty).execute(&mut *self.tx).await?;
        Ok(res.rows_affected() == 1)
    }

    async fn unsell_product(&mut self, id: i64, qty: i32) -> Result<()> {
        sqlx::query("UPDATE products SET stock = stock + $2, sales = GREATEST(sales - $2, 0) WHERE id = $1")
            .bind(id).bind(qty).execute(&mut *self.tx).await?;
        Ok(())
    }

    async fn restore_product(&mut self, id: i64, qty: i32) -> Result<()> {
        sqlx::query("UPDATE products SET stock = stock + $2 WHERE id = $1").bind(id).bind(qty).execute(&mut *self.tx).await?;
        Ok(())
    }

    async fn sell_mystery_box(&mut self, id: i64, qty: i32) -> Result<bool> {
        let res = sqlx::query("UPDATE mystery_boxes SET stock = stock - $2, sales = sales + $2 WHERE id = $1 AND stock >= $2")
            .bind(id).bind(qty).execute(&mut *self.tx).await?;
        Ok(res.rows_affected() == 1)
    }

    async fn unsell_mystery_box(&mut self, id: i64, qty: i32) -> Result<()> {
        sqlx::query("UPDATE mystery_boxes SET stock = stock + $2, sales = GREATEST(sales - $2, 0) WHERE id = $1")
            .bind(id).bind(qty).execute(&mut *self.tx).await?;
        Ok(())
    }

    async fn insert_order(&mut self, order: &Order) -> Result<()> {
        let guest = order.guest();
        sqlx::query(
            "INSERT INTO orders (id, order_number, customer_id, guest_session_id, guest_email, guest_name, guest_phone, \
             total_amount, delivery_fee, delivery_address, delivery_info, delivery_time, payment_method, payment_status, \
             status, idempotency_key, cancelled_at, cancellation_reason, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18, $19, $20)",
        )
        .bind(order.id).bind(&order.order_number).bind(order.customer_id())
        .bind(guest.map(|g| g.session_id.clone())).bind(guest.map(|g| g.email.clone()))
        .bind(guest.map(|g| g.name.clone())).bind(guest.and_then(|g| g.phone.clone()))
        .bind(order.total_amount).bind(order.delivery_fee).bind(&order.delivery_address)
        .bind(&order.delivery_info).bind(&order.delivery_time).bind(&order.payment_method)
        .bind(order.payment_status.as_str()).bind(order.status.as_str()).bind(&order.idempotency_key)
        .bind(order.cancelled_at).bind(&order.cancellation_reason).bind(order.created_at).bind(order.updated_at)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| match &e {
            sqlx::Error::Database(db) if db.constraint() == Some("orders_idempotency_key_key") => {
                CommerceError::DuplicateRequest(order.idempotency_key.clone().unwrap_or_default())
            }
            _ => CommerceError::from(e),
        })?;
        Ok(())
    }

    async fn insert_order_item(&mut self, item: &OrderItem) -> Result<()> {
        let (product_id, mystery_box_id) = match item.item {
            ItemRef::Regular(id) => (Some(id), None),
            ItemRef::MysteryBox(id) => (None, Some(id)),
        };
        sqlx::query(
            "INSERT INTO order_items (id, order_id, product_id, mystery_box_id, seller_id, quantity, unit_price, bundle_contents, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
        )
        .bind(item.id).bind(item.order_id).bind(product_id).bind(mystery_box_id).bind(item.seller_id)
        .bind(item.quantity).bind(item.unit_price).bind(Json(&item.bundle_contents)).bind(item.created_at)
        .execute(&mut *self.tx).await?;
        Ok(())
    }

    async fn order_for_update(&mut self, id: Uuid) -> Result<Option<Order>> {
        let row = sqlx::query_as::<_, OrderRow>("SELECT * FROM orders WHERE id = $1 FOR UPDATE")
            .bind(id).fetch_optional(&mut *self.tx).await?;
        row.map(Order::try_from).transpose()
    }

    async fn order_items(&mut self, order_id: Uuid) -> Result<Vec<OrderItem>> { fetch_order_items(&mut *self.tx, order_id).await }

    async fn update_order(&mut self, order: &Order) -> Result<()> {
        let res = sqlx::query(
            "UPDATE orders SET status = $2, payment_status = $3, cancelled_at = $4, cancellation_reason = $5, updated_at = $6 WHERE id = $1",
        )
        .bind(order.id).bind(order.status.as_str()).bind(order.payment_status.as_str()).bind(order.cancelled_at)
        .bind(&order.cancellation_reason).bind(order.updated_at)
        .execute(&mut *self.tx).await?;
        if res.rows_affected() == 0 { return Err(CommerceError::OrderNotFound); }
        Ok(())
    }

    async fn has_cancellation(&mut self, order_id: Uuid) -> Result<bool> {
        let (exists,): (bool,) = sqlx::query_as("SELECT EXISTS (SELECT 1 FROM order_cancellations WHERE order_id = $1)")
            .bind(order_id).fetch_one(&mut *self.tx).await?;
        Ok(exists)
    }

    async fn insert_cancellation(&mut self, c: &OrderCancellation) -> Result<()> {
        sqlx::query(
            "INSERT INTO order_cancellations (id, order_id, reason, cancelled_by, refund_status, created_at) VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(c.id).bind(c.order_id).bind(&c.reason).bind(c.cancelled_by).bind(c.refund_status.as_str()).bind(c.created_at)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| match &e {
            sqlx::Error::Database(db) if db.constraint() == Some("order_cancellations_order_id_key") => {
                CommerceError::InvalidState(ALREADY_CANCELLED.into())
            }
            _ => CommerceError::from(e),
        })?;
        Ok(())
    }

    async fn commit(self) -> Result<()> {
        self.tx.commit().await?;
        Ok(())
    }
}

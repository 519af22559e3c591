//! Cart Reconciler
//!
//! Keeps the shopper's cart view consistent across the session cart and the
//! server cart. Session writes happen first and synchronously; server calls
//! are best-effort and never undo a session change.

use chrono::Utc;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::client::api::CartApi;
use crate::client::storage::{ItemSnapshot, SessionCart, SessionCartItem, SessionStorage};
use crate::client::token::{customer_token_valid, TokenProvider};
use crate::client::{ClientError, ClientResult};
use crate::domain::aggregates::CartLine;
use crate::domain::value_objects::ItemRef;

pub const DEFAULT_SYNC_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CartSource { Session, Server }

#[derive(Clone, Debug, PartialEq)]
pub struct CartView {
    pub items: Vec<CartLine>,
    pub source: CartSource,
    pub loading: bool,
    pub error: Option<String>,
}

impl CartView {
    fn session(items: &[SessionCartItem]) -> Self {
        Self { items: items.iter().map(CartLine::from).collect(), source: CartSource::Session, loading: false, error: None }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MergeReport {
    pub merged: usize,
    pub failed: usize,
}

struct Inner {
    session: SessionCart,
    tokens: Arc<dyn TokenProvider>,
    api: Arc<dyn CartApi>,
    view: watch::Sender<CartView>,
    /// Items with a running add sync, and the quantity added since it started.
    in_flight: Mutex<HashMap<ItemRef, i32>>,
    sync_timeout: Duration,
}

impl Inner {
    fn customer_token(&self) -> Option<String> {
        self.tokens.token().filter(|t| customer_token_valid(Some(t.as_str()), Utc::now()))
    }

    fn in_flight(&self) -> std::sync::MutexGuard<'_, HashMap<ItemRef, i32>> {
        self.in_flight.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn publish(&self, view: CartView) { self.view.send_replace(view); }

    async fn bounded<T>(&self, call: impl std::future::Future<Output = ClientResult<T>>) -> ClientResult<T> {
        timeout(self.sync_timeout, call).await?
    }
}

/// Clears the in-flight mark for an item when its sync task ends.
struct SyncSlot {
    inner: Arc<Inner>,
    item: ItemRef,
}

impl Drop for SyncSlot {
    fn drop(&mut self) { self.inner.in_flight().remove(&self.item); }
}

#[derive(Clone)]
pub struct CartReconciler {
    inner: Arc<Inner>,
}

impl CartReconciler {
    pub fn new(storage: Arc<dyn SessionStorage>, tokens: Arc<dyn TokenProvider>, api: Arc<dyn CartApi>) -> Self {
        let session = SessionCart::new(storage);
        let (view, _) = watch::channel(CartView::session(&session.load()));
        Self {
            inner: Arc::new(Inner { session, tokens, api, view, in_flight: Mutex::new(HashMap::new()), sync_timeout: DEFAULT_SYNC_TIMEOUT }),
        }
    }

    /// Must be called before the reconciler is cloned.
    pub fn with_sync_timeout(mut self, sync_timeout: Duration) -> Self {
        if let Some(inner) = Arc::get_mut(&mut self.inner) {
            inner.sync_timeout = sync_timeout;
        }
        self
    }

    pub fn subscribe(&self) -> watch::Receiver<CartView> { self.inner.view.subscribe() }

    pub fn view(&self) -> CartView { self.inner.view.borrow().clone() }

    /// Returns the background sync task when one was started.
    pub fn add_item(&self, item: ItemRef, quantity: i32, snapshot: ItemSnapshot) -> ClientResult<Option<JoinHandle<()>>> {
        if quantity <= 0 {
            return Err(ClientError::Validation(format!("Quantity must be positive, got {}", quantity)));
        }
        let items = self.inner.session.add(item, quantity, snapshot)?;
        self.inner.publish(CartView::session(&items));

        let Some(token) = self.inner.customer_token() else { return Ok(None) };
        {
            let mut in_flight = self.inner.in_flight();
            if let Some(queued) = in_flight.get_mut(&item) {
                *queued += quantity;
                debug!(%item, queued = *queued, "Server sync in flight; queued quantity");
                return Ok(None);
            }
            in_flight.insert(item, 0);
        }
        let slot = SyncSlot { inner: self.inner.clone(), item };
        Ok(Some(tokio::spawn(async move {
            let inner = &slot.inner;
            let mut quantity = quantity;
            loop {
                match inner.bounded(inner.api.add_item(&token, item, quantity)).await {
                    Ok(()) => debug!(%item, quantity, "Synced cart add"),
                    Err(e) => warn!(%item, error = %e, "Cart add sync failed"),
                }
                let queued = {
                    let mut in_flight = inner.in_flight();
                    let queued = in_flight.get(&item).copied().unwrap_or(0);
                    if queued == 0 { in_flight.remove(&item); } else { in_flight.insert(item, 0); }
                    queued
                };
                if queued == 0 { break; }
                quantity = queued;
            }
        })))
    }

    /// Loads the server cart for a signed-in customer, otherwise the session cart.
    /// `silent` leaves the loading and error flags alone.
    pub async fn fetch_cart(&self, silent: bool) -> CartView {
        if !silent {
            self.inner.view.send_modify(|v| { v.loading = true; v.error = None; });
        }

        let view = match self.inner.customer_token() {
            None => CartView::session(&self.inner.session.load()),
            Some(token) => match self.inner.bounded(self.inner.api.fetch_cart(&token)).await {
                Ok(contents) => CartView { items: contents.items, source: CartSource::Server, loading: false, error: None },
                Err(e) => {
                    warn!(error = %e, "Server cart unavailable; showing session cart");
                    let mut view = CartView::session(&self.inner.session.load());
                    if !silent { view.error = Some(e.to_string()); }
                    view
                }
            },
        };
        self.inner.publish(view.clone());
        view
    }

    /// One-way migration of the session cart into the server cart after login.
    pub async fn merge_session_cart(&self) -> ClientResult<MergeReport> {
        let token = self.inner.customer_token().ok_or(ClientError::NotAuthenticated)?;
        let mut report = MergeReport::default();
        for line in self.inner.session.load() {
            match self.inner.bounded(self.inner.api.add_item(&token, line.item, line.quantity)).await {
                Ok(()) => report.merged += 1,
                Err(e) => {
                    warn!(item = %line.item, error = %e, "Could not merge session cart line");
                    report.failed += 1;
                }
            }
        }
        self.inner.session.clear();
        info!(merged = report.merged, failed = report.failed, "Session cart merged");
        self.fetch_cart(true).await;
        Ok(report)
    }

    pub async fn delete_item(&self, item: ItemRef) -> ClientResult<CartView> {
        let items = self.inner.session.remove(item)?;
        self.inner.publish(CartView::session(&items));
        let Some(token) = self.inner.customer_token() else { return Ok(self.view()) };

        if let Err(e) = self.inner.bounded(self.inner.api.delete_item(&token, item)).await {
            warn!(%item, error = %e, "Server cart delete failed");
        }
        Ok(self.fetch_cart(true).await)
    }

    /// Zero removes the line.
    pub async fn update_quantity(&self, item: ItemRef, quantity: i32) -> ClientResult<CartView> {
        if quantity < 0 {
            return Err(ClientError::Validation(format!("Quantity must be zero or positive, got {}", quantity)));
        }
        let items = self.inner.session.set_quantity(item, quantity)?;
        self.inner.publish(CartView::session(&items));
        let Some(token) = self.inner.customer_token() else { return Ok(self.view()) };

        if let Err(e) = self.inner.bounded(self.inner.api.update_quantity(&token, item, quantity)).await {
            warn!(%item, error = %e, "Server cart quantity update failed");
        }
        Ok(self.fetch_cart(true).await)
    }
}

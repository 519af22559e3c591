//! OpenSASE Marketplace
//!
//! Self-hosted multi-vendor marketplace: customers buy regular products and
//! mystery boxes from several sellers in a single checkout, as guests or with
//! an account.
//!
//! ## Features
//! - Transactional order placement with mixed inventory and bundle cascades
//! - Order lifecycle: time-boxed cancellation with restock, seller status updates, guest lookup
//! - Server-side customer carts
//! - Client-side cart reconciliation between session storage and the server cart

pub mod client;
pub mod config;
pub mod domain;
pub mod http;
pub mod services;
pub mod store;

use thiserror::Error;

use crate::domain::aggregates::OrderError;
use crate::domain::value_objects::{IdempotencyKeyError, QuantityError};

// =============================================================================
// Error Types
// =============================================================================

#[derive(Error, Debug)]
pub enum CommerceError {
    #[error("{0}")]
    Validation(String),

    #[error("Order must contain at least one item")]
    EmptyOrder,

    #[error("Guest orders require a guest email and name")]
    MissingGuestInfo,

    #[error("Order not found")]
    OrderNotFound,

    #[error("Product {0} not found")]
    ProductNotFound(i64),

    #[error("Mystery box {0} not found")]
    MysteryBoxNotFound(i64),

    #[error("Cart item not found")]
    CartItemNotFound,

    #[error("Authentication required")]
    Unauthenticated,

    #[error("{0}")]
    Unauthorized(String),

    #[error("Insufficient stock for {product}")]
    InsufficientStock { product: String },

    #[error("{0}")]
    InvalidState(String),

    #[error("{0}")]
    CancellationWindowExpired(String),

    #[error("Idempotency key {0} is already in use")]
    DuplicateRequest(String),

    #[error("Storage error: {0}")]
    StorageError(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl From<OrderError> for CommerceError {
    fn from(err: OrderError) -> Self {
        match err {
            OrderError::NotCancellable(_) => Self::InvalidState(err.to_string()),
            OrderError::WindowExpired(_) => Self::CancellationWindowExpired(err.to_string()),
        }
    }
}

impl From<QuantityError> for CommerceError {
    fn from(err: QuantityError) -> Self { Self::Validation(err.to_string()) }
}

impl From<IdempotencyKeyError> for CommerceError {
    fn from(err: IdempotencyKeyError) -> Self { Self::Validation(err.to_string()) }
}

impl From<validator::ValidationErrors> for CommerceError {
    fn from(err: validator::ValidationErrors) -> Self { Self::Validation(err.to_string()) }
}

pub type Result<T> = std::result::Result<T, CommerceError>;

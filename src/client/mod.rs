//! Client-side cart handling
//!
//! Anonymous shoppers keep their cart in session storage. Once a customer
//! token is present, adds are mirrored to the server cart in the background
//! and the server becomes the source for fetches. Logging in merges the
//! session cart into the server cart once, then clears it.

pub mod api;
pub mod reconciler;
pub mod storage;
pub mod token;

use thiserror::Error;

pub use api::{CartApi, HttpCartApi};
pub use reconciler::{CartReconciler, CartSource, CartView, MergeReport};
pub use storage::{ItemSnapshot, MemorySessionStorage, SessionCart, SessionCartItem, SessionStorage};
pub use token::{customer_token_valid, SharedToken, TokenProvider};

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Authentication required")]
    Unauthorized,

    #[error("Permission denied: {0}")]
    Forbidden(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Request timed out")]
    Timeout,

    #[error("Not signed in as a customer")]
    NotAuthenticated,

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<tokio::time::error::Elapsed> for ClientError {
    fn from(_: tokio::time::error::Elapsed) -> Self { Self::Timeout }
}

pub type ClientResult<T> = Result<T, ClientError>;

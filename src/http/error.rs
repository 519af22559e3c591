//! JSON error responses

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use tracing::{error, warn};

use crate::CommerceError;

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
    pub timestamp: String,
}

impl CommerceError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Validation(_) | Self::EmptyOrder | Self::MissingGuestInfo => StatusCode::BAD_REQUEST,
            Self::InvalidState(_) | Self::CancellationWindowExpired(_) => StatusCode::BAD_REQUEST,
            Self::OrderNotFound | Self::ProductNotFound(_) | Self::MysteryBoxNotFound(_) | Self::CartItemNotFound => StatusCode::NOT_FOUND,
            Self::Unauthenticated => StatusCode::UNAUTHORIZED,
            Self::Unauthorized(_) => StatusCode::FORBIDDEN,
            Self::InsufficientStock { .. } | Self::DuplicateRequest(_) => StatusCode::CONFLICT,
            Self::StorageError(_) | Self::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Storage details never leave the process.
    fn response_message(&self) -> String {
        if self.status_code().is_server_error() { "Internal server error".to_string() } else { self.to_string() }
    }
}

impl IntoResponse for CommerceError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            error!(error = %self, "Request failed");
        } else {
            warn!(status = status.as_u16(), error = %self, "Request rejected");
        }

        let body = ErrorResponse {
            error: status.canonical_reason().unwrap_or("Error").to_string(),
            message: self.response_message(),
            timestamp: chrono::Utc::now().to_rfc3339(),
        };
        (status, Json(body)).into_response()
    }
}

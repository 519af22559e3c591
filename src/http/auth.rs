//! Bearer token handling
//!
//! Tokens are HS256 JWTs carrying `{sub, role, exp}`. A request without an
//! `Authorization` header is a guest; a header that fails verification is
//! rejected outright.

use axum::async_trait;
use axum::extract::{FromRef, FromRequestParts};
use axum::http::{header, request::Parts};
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;

use crate::domain::value_objects::{Identity, Role};
use crate::CommerceError;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    pub role: Role,
    pub exp: i64,
}

impl Claims {
    pub fn identity(&self) -> Identity { Identity::from_role(self.role, self.sub) }
}

#[derive(Clone)]
pub struct JwtKeys {
    encoding: EncodingKey,
    decoding: DecodingKey,
}

impl JwtKeys {
    pub fn new(secret: &[u8]) -> Self {
        Self { encoding: EncodingKey::from_secret(secret), decoding: DecodingKey::from_secret(secret) }
    }

    pub fn issue(&self, role: Role, user_id: Uuid, ttl: Duration) -> Result<String, jsonwebtoken::errors::Error> {
        let claims = Claims { sub: user_id, role, exp: (Utc::now() + ttl).timestamp() };
        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
    }

    pub fn verify(&self, token: &str) -> Result<Claims, CommerceError> {
        decode::<Claims>(token, &self.decoding, &Validation::new(Algorithm::HS256))
            .map(|data| data.claims)
            .map_err(|e| {
                warn!(error = %e, "Rejected bearer token");
                CommerceError::Unauthenticated
            })
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for Identity
where
    JwtKeys: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = CommerceError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let Some(value) = parts.headers.get(header::AUTHORIZATION) else { return Ok(Identity::Guest) };
        let token = value.to_str().ok()
            .and_then(|v| v.strip_prefix("Bearer "))
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or(CommerceError::Unauthenticated)?;
        Ok(JwtKeys::from_ref(state).verify(token)?.identity())
    }
}

pub fn require_customer(identity: &Identity) -> Result<Uuid, CommerceError> {
    match identity {
        Identity::Customer(id) => Ok(*id),
        Identity::Guest => Err(CommerceError::Unauthenticated),
        _ => Err(CommerceError::Unauthorized("Customer account required".into())),
    }
}

pub fn require_seller(identity: &Identity) -> Result<Uuid, CommerceError> {
    match identity {
        Identity::Seller(id) => Ok(*id),
        Identity::Guest => Err(CommerceError::Unauthenticated),
        _ => Err(CommerceError::Unauthorized("Seller account required".into())),
    }
}

//! Value Objects for the marketplace

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Reference to a sellable catalog entry.
///
/// Regular products and mystery boxes live in separate tables, so the kind is
/// carried explicitly on every cart entry and order line rather than derived
/// from the numeric identifier.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "itemType", content = "itemId", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ItemRef {
    Regular(i64),
    MysteryBox(i64),
}

impl ItemRef {
    pub fn from_flag(id: i64, is_mystery_box: bool) -> Self {
        if is_mystery_box { Self::MysteryBox(id) } else { Self::Regular(id) }
    }
    pub fn id(&self) -> i64 {
        match self { Self::Regular(id) | Self::MysteryBox(id) => *id }
    }
    pub fn kind(&self) -> ItemKind {
        match self { Self::Regular(_) => ItemKind::Regular, Self::MysteryBox(_) => ItemKind::MysteryBox }
    }
    pub fn is_mystery_box(&self) -> bool { matches!(self, Self::MysteryBox(_)) }
}

impl fmt::Display for ItemRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "{}:{}", self.kind(), self.id()) }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ItemKind { Regular, MysteryBox }

impl ItemKind {
    pub fn as_str(&self) -> &'static str {
        match self { Self::Regular => "REGULAR", Self::MysteryBox => "MYSTERY_BOX" }
    }
    pub fn with_id(self, id: i64) -> ItemRef {
        match self { Self::Regular => ItemRef::Regular(id), Self::MysteryBox => ItemRef::MysteryBox(id) }
    }
}

impl fmt::Display for ItemKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

impl FromStr for ItemKind {
    type Err = UnknownVariant;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "REGULAR" => Ok(Self::Regular),
            "MYSTERY_BOX" => Ok(Self::MysteryBox),
            other => Err(UnknownVariant(other.to_string())),
        }
    }
}

/// Returned when a stored status or kind string has no matching variant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownVariant(pub String);
impl std::error::Error for UnknownVariant {}
impl fmt::Display for UnknownVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "unknown variant '{}'", self.0) }
}

/// Strictly positive line quantity.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "i32", into = "i32")]
pub struct Quantity(i32);

impl Quantity {
    pub fn new(value: i32) -> Result<Self, QuantityError> {
        if value <= 0 { return Err(QuantityError::NotPositive(value)); }
        Ok(Self(value))
    }
    pub fn value(&self) -> i32 { self.0 }
    /// Units consumed when `self` is the per-bundle quantity and `bundles` are sold.
    pub fn times(&self, bundles: Quantity) -> Result<Self, QuantityError> {
        self.0.checked_mul(bundles.0).map(Self).ok_or(QuantityError::Overflow)
    }
}

impl TryFrom<i32> for Quantity {
    type Error = QuantityError;
    fn try_from(value: i32) -> Result<Self, Self::Error> { Self::new(value) }
}

impl From<Quantity> for i32 {
    fn from(q: Quantity) -> Self { q.0 }
}

#[derive(Debug, Clone, PartialEq, Eq)] pub enum QuantityError { NotPositive(i32), Overflow }
impl std::error::Error for QuantityError {}
impl fmt::Display for QuantityError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotPositive(v) => write!(f, "quantity must be positive, got {}", v),
            Self::Overflow => write!(f, "quantity overflow"),
        }
    }
}

/// Human-facing order number: `ORD-<utc timestamp>-<6 digit random suffix>`.
pub fn generate_order_number(now: DateTime<Utc>) -> String {
    let suffix: u32 = rand::thread_rng().gen_range(0..1_000_000);
    format!("ORD-{}-{:06}", now.format("%Y%m%d%H%M%S"), suffix)
}

/// Client-generated key that makes order submission safe to retry.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IdempotencyKey(String);

impl IdempotencyKey {
    pub fn new(value: impl Into<String>) -> Result<Self, IdempotencyKeyError> {
        let value = value.into().trim().to_string();
        if value.is_empty() { return Err(IdempotencyKeyError::Empty); }
        if value.len() > 128 { return Err(IdempotencyKeyError::TooLong); }
        Ok(Self(value))
    }
    pub fn as_str(&self) -> &str { &self.0 }
}

impl fmt::Display for IdempotencyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "{}", self.0) }
}

#[derive(Debug, Clone)] pub enum IdempotencyKeyError { Empty, TooLong }
impl std::error::Error for IdempotencyKeyError {}
impl fmt::Display for IdempotencyKeyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self { Self::Empty => write!(f, "Idempotency key empty"), Self::TooLong => write!(f, "Idempotency key too long") }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role { Customer, Seller, Admin }

/// Who is making a request, as resolved from the bearer credential.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Identity {
    Guest,
    Customer(Uuid),
    Seller(Uuid),
    Admin(Uuid),
}

impl Identity {
    pub fn from_role(role: Role, id: Uuid) -> Self {
        match role { Role::Customer => Self::Customer(id), Role::Seller => Self::Seller(id), Role::Admin => Self::Admin(id) }
    }
    pub fn user_id(&self) -> Option<Uuid> {
        match self { Self::Guest => None, Self::Customer(id) | Self::Seller(id) | Self::Admin(id) => Some(*id) }
    }
    pub fn customer_id(&self) -> Option<Uuid> {
        match self { Self::Customer(id) => Some(*id), _ => None }
    }
    pub fn seller_id(&self) -> Option<Uuid> {
        match self { Self::Seller(id) => Some(*id), _ => None }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_item_ref_wire_format() {
        let json = serde_json::to_value(ItemRef::MysteryBox(12)).unwrap();
        assert_eq!(json, serde_json::json!({"itemType": "MYSTERY_BOX", "itemId": 12}));
        assert_eq!(ItemRef::from_flag(7, false), ItemRef::Regular(7));
    }

    #[test]
    fn test_quantity() {
        assert!(Quantity::new(0).is_err());
        let per_box = Quantity::new(3).unwrap();
        assert_eq!(per_box.times(Quantity::new(4).unwrap()).unwrap().value(), 12);
        assert_eq!(Quantity::new(i32::MAX).unwrap().times(per_box), Err(QuantityError::Overflow));
    }

    #[test]
    fn test_order_number_shape() {
        let now = Utc::now();
        let n = generate_order_number(now);
        assert!(n.starts_with(&format!("ORD-{}-", now.format("%Y%m%d%H%M%S"))));
        assert_eq!(n.len(), "ORD-".len() + 14 + 1 + 6);
    }

    #[test]
    fn test_idempotency_key() {
        assert_eq!(IdempotencyKey::new("  abc ").unwrap().as_str(), "abc");
        assert!(IdempotencyKey::new("   ").is_err());
    }
}

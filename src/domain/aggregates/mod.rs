//! Aggregates module
pub mod product;
pub mod order;
pub mod cart;

pub use product::{Inventory, ItemLabel, ManifestLine, MysteryBox, Product};
pub use order::{
    ContactView, Customer, GuestContact, Order, OrderCancellation, OrderDetails, OrderError, OrderItem,
    OrderItemView, OrderOwner, OrderStatus, PaymentStatus, RefundStatus,
};
pub use cart::{Cart, CartItem, CartLine};

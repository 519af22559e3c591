//! Application services over a [`Store`](crate::store::Store).

pub mod cart;
pub mod lifecycle;
pub mod placement;

pub use cart::{CartContents, CartService};
pub use lifecycle::{OrderLifecycleManager, SellerOrdersPage};
pub use placement::{
    Buyer, Delivery, GuestDetails, ManifestShortfall, OrderPlacementEngine, PlaceOrderInput, PlaceOrderLine,
    PlacementReceipt,
};

//! Aggregates module
pub mod product;
pub mod order;
pub mod cart;

pub use product::{PriceVariant, Product, ProductError};
pub use order::{OrderDraft, OrderError, OrderLine, OrderStatus, ShippingForm};
pub use cart::{line_item_key, Cart, CartItem, CartSummary, LineItemKey, LineSelection};

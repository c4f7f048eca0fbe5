//! Cashew Shop
//!
//! Bilingual (Japanese/Thai) storefront for a single line of cashew nuts.
//!
//! ## Features
//! - Catalog with per-size price variants and flavor sets
//! - Cart line identity, pricing and quantity-tiered discounts
//! - Cart persistence with migration of older stored shapes
//! - Checkout against an order store whose columns vary between deployments
//! - Outbox for orders the store refused, with operator notifications

pub mod checkout;
pub mod config;
pub mod domain;
pub mod infra;
pub mod storage;

use thiserror::Error;

pub use domain::aggregates::{Cart, CartItem, CartSummary, LineItemKey, LineSelection, OrderDraft, Product, ShippingForm};
pub use domain::discount::{discount_rate, next_discount_step, DiscountRate, ShippingPolicy};

// =============================================================================
// Error Types
// =============================================================================

#[derive(Error, Debug)]
pub enum ShopError {
    #[error("Product not found")]
    ProductNotFound,

    #[error("Order not found")]
    OrderNotFound,

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

pub type Result<T> = std::result::Result<T, ShopError>;

//! Order Aggregate

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;
use validator::{Validate, ValidationError};
use crate::domain::aggregates::cart::{Cart, CartItem, CartSummary};
use crate::domain::discount::ShippingPolicy;
use crate::domain::events::{DomainEvent, OrderEvent};
use crate::domain::value_objects::{SaltOption, SetFlavorSelection, UnknownVariant};

/// Shipping details typed in at checkout.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, Validate)]
pub struct ShippingForm {
    #[validate(length(min = 1, max = 100))]
    pub customer_name: String,
    #[validate(custom = "validate_phone")]
    pub phone: String,
    #[validate(email)]
    #[serde(default)]
    pub email: Option<String>,
    #[validate(custom = "validate_postal_code")]
    pub postal_code: String,
    #[validate(length(min = 1, max = 500))]
    pub address: String,
    #[validate(length(max = 500))]
    #[serde(default)]
    pub notes: Option<String>,
}

fn digits(s: &str, allowed: &[char]) -> Option<String> {
    let mut out = String::with_capacity(s.len());
    for c in s.trim().chars() {
        if c.is_ascii_digit() { out.push(c); } else if !allowed.contains(&c) { return None; }
    }
    Some(out)
}

fn validate_phone(phone: &str) -> Result<(), ValidationError> {
    match digits(phone, &['-', ' ', '+', '(', ')']) {
        Some(d) if (9..=11).contains(&d.len()) => Ok(()),
        _ => Err(ValidationError::new("phone")),
    }
}

/// Thai codes have five digits, Japanese ones seven.
fn validate_postal_code(code: &str) -> Result<(), ValidationError> {
    match digits(code, &['-']) {
        Some(d) if d.len() == 5 || d.len() == 7 => Ok(()),
        _ => Err(ValidationError::new("postal_code")),
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus { #[default] Pending, Confirmed, Shipped, Delivered }

impl OrderStatus {
    pub const ALL: [OrderStatus; 4] = [Self::Pending, Self::Confirmed, Self::Shipped, Self::Delivered];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Confirmed => "confirmed",
            Self::Shipped => "shipped",
            Self::Delivered => "delivered",
        }
    }

    /// Position on the tracking bar, 0 through 3.
    pub fn progress_step(&self) -> usize { *self as usize }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

impl FromStr for OrderStatus {
    type Err = UnknownVariant;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL.into_iter().find(|st| st.as_str() == s.trim()).ok_or_else(|| UnknownVariant(s.to_string()))
    }
}

/// A priced cart line frozen for submission.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OrderLine {
    pub product_id: String,
    pub product_name: String,
    pub quantity: u32,
    pub unit_price: i64,
    pub size_g: Option<u32>,
    pub flavors: Option<SetFlavorSelection>,
    pub salt_option: Option<SaltOption>,
}

impl From<&CartItem> for OrderLine {
    fn from(item: &CartItem) -> Self {
        Self {
            product_id: item.product.id.clone(),
            product_name: item.product.name_ja.clone(),
            quantity: item.quantity,
            unit_price: item.unit_price(),
            size_g: item.selected_size_g,
            flavors: item.selected_flavors,
            salt_option: item.salt_option,
        }
    }
}

/// An order built from a cart and shipping form, ready to hand to an order store.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OrderDraft {
    /// Client-generated id, tried first when inserting.
    pub reference: Uuid,
    pub shipping: ShippingForm,
    pub lines: Vec<OrderLine>,
    pub subtotal: i64,
    pub discount_amount: i64,
    pub shipping_fee: i64,
    /// Goods after discount plus shipping.
    pub total_amount: i64,
    pub status: OrderStatus,
    pub created_at: DateTime<Utc>,
}

impl OrderDraft {
    pub fn build(cart: &Cart, shipping: ShippingForm, policy: &ShippingPolicy) -> Result<Self, OrderError> {
        if cart.is_empty() { return Err(OrderError::NoItems); }
        shipping.validate().map_err(OrderError::InvalidShipping)?;
        let summary: CartSummary = cart.summary(policy);
        Ok(Self {
            reference: Uuid::new_v4(),
            shipping,
            lines: cart.items().iter().map(OrderLine::from).collect(),
            subtotal: summary.subtotal,
            discount_amount: summary.discount_amount,
            shipping_fee: summary.shipping_fee,
            total_amount: summary.grand_total,
            status: OrderStatus::Pending,
            created_at: Utc::now(),
        })
    }

    pub fn item_count(&self) -> u32 { self.lines.iter().fold(0u32, |acc, l| acc.saturating_add(l.quantity)) }

    pub fn placed_event(&self, order_id: &str) -> DomainEvent {
        DomainEvent::Order(OrderEvent::Placed {
            order_id: order_id.to_string(),
            customer_name: self.shipping.customer_name.clone(),
            total_amount: self.total_amount,
            item_count: self.item_count(),
        })
    }

    pub fn failed_event(&self, attempts: usize) -> DomainEvent {
        DomainEvent::Order(OrderEvent::SubmissionFailed {
            reference: self.reference.to_string(),
            customer_name: self.shipping.customer_name.clone(),
            total_amount: self.total_amount,
            attempts,
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum OrderError {
    #[error("No items")]
    NoItems,
    #[error("Invalid shipping details: {0}")]
    InvalidShipping(validator::ValidationErrors),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::aggregates::cart::LineSelection;
    use crate::domain::aggregates::product::Product;

    fn form() -> ShippingForm {
        ShippingForm {
            customer_name: "山田 花子".into(),
            phone: "090-1234-5678".into(),
            email: Some("hanako@example.jp".into()),
            postal_code: "150-0001".into(),
            address: "東京都渋谷区神宮前1-1-1".into(),
            notes: None,
        }
    }

    #[test]
    fn test_form_validation() {
        assert!(form().validate().is_ok());
        let mut f = form();
        f.phone = "12ab".into();
        assert!(f.validate().is_err());
        let mut f = form();
        f.postal_code = "10110".into();
        assert!(f.validate().is_ok());
        f.postal_code = "1011".into();
        assert!(f.validate().is_err());
        let mut f = form();
        f.email = Some("not-an-email".into());
        assert!(f.validate().is_err());
        let mut f = form();
        f.customer_name = String::new();
        assert!(f.validate().is_err());
    }

    #[test]
    fn test_status_progress() {
        assert_eq!(OrderStatus::Pending.progress_step(), 0);
        assert_eq!(OrderStatus::Delivered.progress_step(), 3);
        assert_eq!("shipped".parse::<OrderStatus>().unwrap(), OrderStatus::Shipped);
        assert!("lost".parse::<OrderStatus>().is_err());
    }

    #[test]
    fn test_draft_totals() {
        let mut p = Product::new("P1", "カシュー", 333);
        p.stock = 5;
        let mut cart = Cart::new();
        cart.add(p, 3, LineSelection::default());
        let draft = OrderDraft::build(&cart, form(), &ShippingPolicy { free_threshold: 1000, flat_fee: 50 }).unwrap();
        assert_eq!(draft.subtotal, 999);
        assert_eq!(draft.discount_amount, 49);
        assert_eq!(draft.shipping_fee, 50);
        assert_eq!(draft.total_amount, 1000);
        assert_eq!(draft.item_count(), 3);
        assert_eq!(draft.status, OrderStatus::Pending);
    }

    #[test]
    fn test_draft_rejects_empty_cart() {
        let err = OrderDraft::build(&Cart::new(), form(), &ShippingPolicy::default()).unwrap_err();
        assert!(matches!(err, OrderError::NoItems));
    }
}

//! Cart Aggregate
//!
//! Lines are identified by product, chosen size, flavor mix and salt option.
//! Adding a line whose identity already exists bumps its quantity instead of
//! appending. All operations are pure in-memory transitions; persistence is
//! layered on top by [`crate::storage::CartSession`].

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::fmt;
use crate::domain::aggregates::product::Product;
use crate::domain::discount::{next_discount_step, DiscountBreakdown, DiscountRate, NextDiscountStep, ShippingPolicy};
use crate::domain::value_objects::{SaltOption, SetFlavorSelection};

/// Options picked when adding a product.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LineSelection {
    #[serde(default)]
    pub size_g: Option<u32>,
    #[serde(default)]
    pub flavors: Option<SetFlavorSelection>,
    #[serde(default)]
    pub salt_option: Option<SaltOption>,
}

impl LineSelection {
    pub fn size(size_g: u32) -> Self { Self { size_g: Some(size_g), ..Self::default() } }

    /// Drops options that do not apply to `product`.
    pub fn applicable_to(self, product: &Product) -> Self {
        Self {
            size_g: if product.is_set { None } else { self.size_g },
            flavors: if product.is_set { self.flavors } else { None },
            salt_option: if product.takes_salt_option() { self.salt_option } else { None },
        }
    }
}

/// Stable identity of a cart line.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LineItemKey(String);

impl LineItemKey {
    pub fn new(product_id: &str, selection: &LineSelection) -> Self {
        line_item_key(product_id, selection.size_g, selection.flavors.as_ref(), selection.salt_option)
    }
}

impl fmt::Display for LineItemKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(&self.0) }
}

/// Absent and all-zero flavor mixes render the same.
pub fn line_item_key(product_id: &str, size_g: Option<u32>, flavors: Option<&SetFlavorSelection>, salt: Option<SaltOption>) -> LineItemKey {
    let size = size_g.map(|s| s.to_string()).unwrap_or_default();
    let flavors = flavors.map(SetFlavorSelection::canonical).unwrap_or_default();
    let salt = salt.map(|s| s.as_str()).unwrap_or_default();
    LineItemKey(format!("{product_id}|{size}|{flavors}|{salt}"))
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CartItem {
    pub product: Product,
    pub quantity: u32,
    #[serde(default)]
    pub selected_size_g: Option<u32>,
    #[serde(default)]
    pub selected_flavors: Option<SetFlavorSelection>,
    #[serde(default)]
    pub salt_option: Option<SaltOption>,
}

impl CartItem {
    pub fn new(product: Product, quantity: u32, selection: LineSelection) -> Self {
        Self {
            product, quantity,
            selected_size_g: selection.size_g,
            selected_flavors: selection.flavors,
            salt_option: selection.salt_option,
        }
    }

    pub fn selection(&self) -> LineSelection {
        LineSelection { size_g: self.selected_size_g, flavors: self.selected_flavors, salt_option: self.salt_option }
    }

    pub fn key(&self) -> LineItemKey { LineItemKey::new(&self.product.id, &self.selection()) }

    /// Sale price wins over list price; a matching size variant wins over the flat price.
    pub fn unit_price(&self) -> i64 {
        match self.selected_size_g.and_then(|s| self.product.variant(s)) {
            Some(v) => v.effective_price(),
            None => self.product.flat_price(),
        }
    }

    pub fn original_price(&self) -> i64 {
        match self.selected_size_g.and_then(|s| self.product.variant(s)) {
            Some(v) => v.price,
            None => self.product.price,
        }
    }

    /// Percentage off the list price, rounded half-up; zero when not on sale.
    pub fn discount_percent(&self) -> u32 {
        let (unit, original) = (self.unit_price(), self.original_price());
        if original <= 0 || unit >= original {
            return 0;
        }
        let off = (Decimal::ONE - Decimal::from(unit) / Decimal::from(original)) * Decimal::ONE_HUNDRED;
        off.round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero).to_u32().unwrap_or(0)
    }

    pub fn line_total(&self) -> i64 { self.unit_price().saturating_mul(i64::from(self.quantity)) }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Cart {
    items: Vec<CartItem>,
}

impl Cart {
    pub fn new() -> Self { Self::default() }

    /// Builds a cart from stored lines, folding duplicate identities together
    /// and dropping empty lines.
    pub fn from_items(items: impl IntoIterator<Item = CartItem>) -> Self {
        let mut cart = Self::new();
        for item in items.into_iter().filter(|i| i.quantity > 0) {
            let selection = item.selection();
            cart.add(item.product, item.quantity, selection);
        }
        cart
    }

    pub fn items(&self) -> &[CartItem] { &self.items }
    pub fn line_count(&self) -> usize { self.items.len() }
    pub fn is_empty(&self) -> bool { self.items.is_empty() }

    /// Merges into an existing line with the same identity or appends a new one.
    /// A zero quantity is ignored.
    pub fn add(&mut self, product: Product, quantity: u32, selection: LineSelection) -> bool {
        if quantity == 0 {
            return false;
        }
        let key = LineItemKey::new(&product.id, &selection);
        match self.items.iter_mut().find(|i| i.key() == key) {
            Some(existing) => existing.quantity = existing.quantity.saturating_add(quantity),
            None => self.items.push(CartItem::new(product, quantity, selection)),
        }
        true
    }

    /// Sets the exact quantity of a line; zero or below removes it.
    pub fn update_quantity(&mut self, product_id: &str, selection: &LineSelection, quantity: i64) -> bool {
        let key = LineItemKey::new(product_id, selection);
        if quantity <= 0 {
            return self.remove_key(&key);
        }
        let quantity = u32::try_from(quantity).unwrap_or(u32::MAX);
        match self.items.iter_mut().find(|i| i.key() == key) {
            Some(item) if item.quantity != quantity => { item.quantity = quantity; true }
            _ => false,
        }
    }

    pub fn remove(&mut self, product_id: &str, selection: &LineSelection) -> bool {
        self.remove_key(&LineItemKey::new(product_id, selection))
    }

    pub fn remove_key(&mut self, key: &LineItemKey) -> bool {
        let before = self.items.len();
        self.items.retain(|i| &i.key() != key);
        self.items.len() != before
    }

    pub fn clear(&mut self) -> bool {
        let changed = !self.items.is_empty();
        self.items.clear();
        changed
    }

    pub fn total_quantity(&self) -> u32 { self.items.iter().fold(0u32, |acc, i| acc.saturating_add(i.quantity)) }

    pub fn subtotal(&self) -> i64 { self.items.iter().fold(0i64, |acc, i| acc.saturating_add(i.line_total())) }

    pub fn summary(&self, shipping: &ShippingPolicy) -> CartSummary {
        let total_quantity = self.total_quantity();
        let breakdown = DiscountBreakdown::compute(self.subtotal(), total_quantity);
        let shipping_fee = shipping.fee_for(breakdown.total, total_quantity);
        CartSummary {
            total_quantity,
            subtotal: breakdown.subtotal,
            discount_rate: breakdown.rate,
            discount_amount: breakdown.discount_amount,
            total: breakdown.total,
            shipping_fee,
            grand_total: breakdown.total.saturating_add(shipping_fee),
            next_step: next_discount_step(total_quantity),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartSummary {
    pub total_quantity: u32,
    pub subtotal: i64,
    pub discount_rate: DiscountRate,
    pub discount_amount: i64,
    pub total: i64,
    pub shipping_fee: i64,
    pub grand_total: i64,
    pub next_step: Option<NextDiscountStep>,
}

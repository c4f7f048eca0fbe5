//! Quantity-tiered discount and shipping fee arithmetic.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Discount tier reached by the total bag count of a cart.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum DiscountRate {
    #[default]
    None,
    FivePercent,
    TenPercent,
}

impl DiscountRate {
    pub fn percent(&self) -> u32 {
        match self {
            Self::None => 0,
            Self::FivePercent => 5,
            Self::TenPercent => 10,
        }
    }

    pub fn as_decimal(&self) -> Decimal { Decimal::new(i64::from(self.percent()), 2) }
}

const FIVE_PERCENT_FROM: u32 = 3;
const TEN_PERCENT_FROM: u32 = 5;

pub fn discount_rate(total_quantity: u32) -> DiscountRate {
    if total_quantity >= TEN_PERCENT_FROM {
        DiscountRate::TenPercent
    } else if total_quantity >= FIVE_PERCENT_FROM {
        DiscountRate::FivePercent
    } else {
        DiscountRate::None
    }
}

/// How many more bags unlock the next tier.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NextDiscountStep {
    pub remaining: u32,
    pub next_rate: u32,
}

pub fn next_discount_step(total_quantity: u32) -> Option<NextDiscountStep> {
    if total_quantity < FIVE_PERCENT_FROM {
        Some(NextDiscountStep { remaining: FIVE_PERCENT_FROM - total_quantity, next_rate: 5 })
    } else if total_quantity < TEN_PERCENT_FROM {
        Some(NextDiscountStep { remaining: TEN_PERCENT_FROM - total_quantity, next_rate: 10 })
    } else {
        None
    }
}

/// Truncated discount on a subtotal: `floor(subtotal * rate)`.
pub fn discount_amount(subtotal: i64, rate: DiscountRate) -> i64 {
    if subtotal <= 0 {
        return 0;
    }
    (Decimal::from(subtotal) * rate.as_decimal()).floor().to_i64().unwrap_or(0)
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscountBreakdown {
    pub subtotal: i64,
    pub rate: DiscountRate,
    pub discount_amount: i64,
    pub total: i64,
}

impl DiscountBreakdown {
    pub fn compute(subtotal: i64, total_quantity: u32) -> Self {
        let rate = discount_rate(total_quantity);
        let discount_amount = discount_amount(subtotal, rate);
        Self { subtotal, rate, discount_amount, total: subtotal - discount_amount }
    }
}

/// Shipping is charged on the discounted goods total and is never discounted.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShippingPolicy {
    pub free_threshold: i64,
    pub flat_fee: i64,
}

impl Default for ShippingPolicy {
    fn default() -> Self { Self { free_threshold: 1000, flat_fee: 50 } }
}

impl ShippingPolicy {
    pub fn fee_for(&self, goods_total: i64, total_quantity: u32) -> i64 {
        if total_quantity == 0 || goods_total >= self.free_threshold { 0 } else { self.flat_fee }
    }
}

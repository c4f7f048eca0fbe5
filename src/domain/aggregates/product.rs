//! Product Aggregate

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use crate::domain::value_objects::{FlavorTag, Locale};

/// A sellable product as fetched from the catalog. Cart lines keep a snapshot
/// of this value taken at add time.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Product {
    pub id: String,
    pub name_ja: String,
    #[serde(default)]
    pub name_th: String,
    pub price: i64,
    #[serde(default)]
    pub sale_price: Option<i64>,
    #[serde(default)]
    pub stock: i32,
    #[serde(default = "default_true")]
    pub is_active: bool,
    #[serde(default)]
    pub is_featured: bool,
    #[serde(default)]
    pub sort_order: i32,
    #[serde(default)]
    pub flavor_color: Option<FlavorTag>,
    #[serde(default)]
    pub weight_g: Option<u32>,
    #[serde(default)]
    pub is_set: bool,
    #[serde(default)]
    pub price_variants: Vec<PriceVariant>,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

fn default_true() -> bool { true }

/// A selectable size of a non-set product.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceVariant {
    pub size_g: u32,
    pub price: i64,
    #[serde(default)]
    pub sale_price: Option<i64>,
}

impl PriceVariant {
    pub fn effective_price(&self) -> i64 { self.sale_price.unwrap_or(self.price) }
}

impl Product {
    pub fn new(id: impl Into<String>, name_ja: impl Into<String>, price: i64) -> Self {
        Self {
            id: id.into(), name_ja: name_ja.into(), name_th: String::new(), price, sale_price: None,
            stock: 0, is_active: true, is_featured: false, sort_order: 0, flavor_color: None,
            weight_g: None, is_set: false, price_variants: vec![], created_at: Utc::now(),
        }
    }

    pub fn display_name(&self, locale: Locale) -> &str {
        match locale {
            Locale::Th if !self.name_th.is_empty() => &self.name_th,
            _ => &self.name_ja,
        }
    }

    pub fn is_purchasable(&self) -> bool { self.is_active && self.stock > 0 }

    /// Variants that take part in pricing. Set products price as a whole.
    pub fn priced_variants(&self) -> &[PriceVariant] {
        if self.is_set { &[] } else { &self.price_variants }
    }

    pub fn variant(&self, size_g: u32) -> Option<&PriceVariant> {
        self.priced_variants().iter().find(|v| v.size_g == size_g)
    }

    pub fn flat_price(&self) -> i64 { self.sale_price.unwrap_or(self.price) }

    pub fn takes_salt_option(&self) -> bool {
        !self.is_set && self.flavor_color == Some(FlavorTag::Original)
    }

    /// Lowest and highest effective price a shopper can pick.
    pub fn display_price_range(&self) -> (i64, i64) {
        let variants = self.priced_variants();
        if variants.is_empty() {
            let p = self.flat_price();
            return (p, p);
        }
        variants.iter().map(PriceVariant::effective_price).fold((i64::MAX, i64::MIN), |(lo, hi), p| (lo.min(p), hi.max(p)))
    }

    /// Data-entry rules pricing relies on.
    pub fn validate(&self) -> Result<(), ProductError> {
        if self.name_ja.trim().is_empty() { return Err(ProductError::MissingName); }
        check_prices(self.price, self.sale_price)?;
        let mut sizes = HashSet::new();
        for v in &self.price_variants {
            if v.size_g == 0 { return Err(ProductError::InvalidSize); }
            if !sizes.insert(v.size_g) { return Err(ProductError::DuplicateSize(v.size_g)); }
            check_prices(v.price, v.sale_price)?;
        }
        Ok(())
    }
}

fn check_prices(price: i64, sale_price: Option<i64>) -> Result<(), ProductError> {
    if price <= 0 { return Err(ProductError::InvalidPrice); }
    match sale_price {
        Some(sale) if sale <= 0 || sale >= price => Err(ProductError::InvalidSalePrice { price, sale }),
        _ => Ok(()),
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProductError {
    #[error("Missing name")]
    MissingName,
    #[error("Price must be positive")]
    InvalidPrice,
    #[error("Sale price {sale} must be positive and below {price}")]
    InvalidSalePrice { price: i64, sale: i64 },
    #[error("Variant size must be positive")]
    InvalidSize,
    #[error("Duplicate variant size {0}g")]
    DuplicateSize(u32),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sized() -> Product {
        let mut p = Product::new("P1", "カシューナッツ", 100);
        p.price_variants = vec![
            PriceVariant { size_g: 100, price: 80, sale_price: None },
            PriceVariant { size_g: 200, price: 150, sale_price: Some(120) },
        ];
        p
    }

    #[test]
    fn test_variant_lookup_ignored_for_sets() {
        let mut p = sized();
        assert_eq!(p.variant(200).map(|v| v.effective_price()), Some(120));
        p.is_set = true;
        assert!(p.variant(200).is_none());
        assert_eq!(p.display_price_range(), (100, 100));
    }

    #[test]
    fn test_display_price_range() {
        assert_eq!(sized().display_price_range(), (80, 120));
    }

    #[test]
    fn test_display_name_falls_back_to_ja() {
        let mut p = Product::new("P1", "カシュー", 100);
        assert_eq!(p.display_name(Locale::Th), "カシュー");
        p.name_th = "เม็ดมะม่วงหิมพานต์".into();
        assert_eq!(p.display_name(Locale::Th), "เม็ดมะม่วงหิมพานต์");
    }

    #[test]
    fn test_validate() {
        assert!(sized().validate().is_ok());
        let mut p = sized();
        p.price_variants.push(PriceVariant { size_g: 100, price: 90, sale_price: None });
        assert_eq!(p.validate(), Err(ProductError::DuplicateSize(100)));
        let mut p = Product::new("P2", "x", 100);
        p.sale_price = Some(100);
        assert!(matches!(p.validate(), Err(ProductError::InvalidSalePrice { .. })));
    }

    #[test]
    fn test_snapshot_tolerates_missing_fields() {
        let p: Product = serde_json::from_str(r#"{"id":"a","name_ja":"n","price":50}"#).unwrap();
        assert!(p.is_active);
        assert!(p.price_variants.is_empty());
        assert!(!p.is_purchasable());
    }
}

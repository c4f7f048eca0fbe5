//! Cart persistence: one JSON blob per cart, migrated on load.

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use crate::domain::aggregates::{Cart, CartItem, LineSelection, Product};
use crate::domain::value_objects::{SaltOption, SetFlavorSelection};
use crate::storage::DurableStorage;

pub const CART_STORAGE_KEY: &str = "cashew-cart";

/// Flavor mix written before original was split by salt option.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LegacyFlavorSelection {
    pub original: u32,
    #[serde(default)]
    pub cheese: u32,
    #[serde(default)]
    pub bbq: u32,
    #[serde(default)]
    pub nori: u32,
    #[serde(default)]
    pub tomyum: u32,
}

impl From<LegacyFlavorSelection> for SetFlavorSelection {
    fn from(old: LegacyFlavorSelection) -> Self {
        Self {
            original_salt: old.original,
            original_nosalt: 0,
            cheese: old.cheese,
            bbq: old.bbq,
            nori: old.nori,
            tomyum: old.tomyum,
        }
    }
}

/// Flavor mix as found in storage. A numeric `original` field marks the legacy shape.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StoredFlavorSelection {
    Legacy(LegacyFlavorSelection),
    Current(SetFlavorSelection),
}

impl StoredFlavorSelection {
    pub fn normalize(self) -> Self { Self::Current(self.into_current()) }

    pub fn into_current(self) -> SetFlavorSelection {
        match self {
            Self::Legacy(old) => old.into(),
            Self::Current(current) => current,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredCartItem {
    pub product: Product,
    pub quantity: u32,
    #[serde(default)]
    pub selected_size_g: Option<u32>,
    #[serde(default)]
    pub selected_flavors: Option<StoredFlavorSelection>,
    #[serde(default)]
    pub salt_option: Option<SaltOption>,
}

/// Rewrites legacy flavor mixes into the current shape. Current items pass through.
pub fn normalize_cart_item(item: StoredCartItem) -> StoredCartItem {
    StoredCartItem { selected_flavors: item.selected_flavors.map(StoredFlavorSelection::normalize), ..item }
}

impl From<StoredCartItem> for CartItem {
    fn from(item: StoredCartItem) -> Self {
        let selection = LineSelection {
            size_g: item.selected_size_g,
            flavors: item.selected_flavors.map(StoredFlavorSelection::into_current),
            salt_option: item.salt_option,
        };
        CartItem::new(item.product, item.quantity, selection)
    }
}

/// Reads the stored cart. Missing, unreadable or non-array content yields an
/// empty list; individual lines that fail to decode are dropped.
pub fn load_cart_items<S: DurableStorage + ?Sized>(storage: &S, key: &str) -> Vec<CartItem> {
    let raw = match storage.get(key) {
        Ok(Some(raw)) => raw,
        Ok(None) => return Vec::new(),
        Err(e) => {
            warn!(key, error = %e, "cart storage unreadable, starting empty");
            return Vec::new();
        }
    };
    let values = match serde_json::from_str::<serde_json::Value>(&raw) {
        Ok(serde_json::Value::Array(values)) => values,
        Ok(_) => {
            warn!(key, "stored cart is not an array, discarding");
            return Vec::new();
        }
        Err(e) => {
            warn!(key, error = %e, "stored cart is not valid JSON, discarding");
            return Vec::new();
        }
    };
    values
        .into_iter()
        .filter_map(|value| match serde_json::from_value::<StoredCartItem>(value) {
            Ok(item) => Some(CartItem::from(normalize_cart_item(item))),
            Err(e) => {
                warn!(key, error = %e, "dropping undecodable cart line");
                None
            }
        })
        .collect()
}

/// Overwrites the stored cart. Failures are logged and reported as `false`.
pub fn save_cart_items<S: DurableStorage + ?Sized>(storage: &mut S, key: &str, items: &[CartItem]) -> bool {
    let raw = match serde_json::to_string(items) {
        Ok(raw) => raw,
        Err(e) => {
            warn!(key, error = %e, "failed to encode cart");
            return false;
        }
    };
    match storage.set(key, &raw) {
        Ok(()) => true,
        Err(e) => {
            warn!(key, error = %e, "failed to persist cart");
            false
        }
    }
}

/// A cart bound to the storage it persists into. Every mutating call writes
/// the whole cart back; hydration alone never writes.
#[derive(Debug)]
pub struct CartSession<S: DurableStorage> {
    storage: S,
    key: String,
    cart: Cart,
}

impl<S: DurableStorage> CartSession<S> {
    pub fn hydrate(storage: S, key: impl Into<String>) -> Self {
        let key = key.into();
        let cart = Cart::from_items(load_cart_items(&storage, &key));
        debug!(key = %key, lines = cart.line_count(), "cart hydrated");
        Self { storage, key, cart }
    }

    pub fn cart(&self) -> &Cart { &self.cart }
    pub fn storage(&self) -> &S { &self.storage }
    pub fn storage_mut(&mut self) -> &mut S { &mut self.storage }

    pub fn add(&mut self, product: Product, quantity: u32, selection: LineSelection) {
        self.cart.add(product, quantity, selection);
        self.persist();
    }

    pub fn update_quantity(&mut self, product_id: &str, selection: &LineSelection, quantity: i64) {
        self.cart.update_quantity(product_id, selection, quantity);
        self.persist();
    }

    pub fn remove(&mut self, product_id: &str, selection: &LineSelection) {
        self.cart.remove(product_id, selection);
        self.persist();
    }

    pub fn clear(&mut self) {
        self.cart.clear();
        self.persist();
    }

    fn persist(&mut self) { save_cart_items(&mut self.storage, &self.key, self.cart.items()); }
}

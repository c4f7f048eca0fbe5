//! Value Objects for the cashew storefront

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Display language of the storefront.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Locale {
    #[default]
    Ja,
    Th,
}

impl FromStr for Locale {
    type Err = UnknownVariant;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ja" => Ok(Self::Ja),
            "th" => Ok(Self::Th),
            other => Err(UnknownVariant(other.to_string())),
        }
    }
}

/// Flavor tag carried by a product. Drives the badge color on listings and
/// decides whether a salt option applies.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FlavorTag {
    Original,
    Cheese,
    Bbq,
    Nori,
    Tomyum,
}

impl FlavorTag {
    pub const ALL: [FlavorTag; 5] = [Self::Original, Self::Cheese, Self::Bbq, Self::Nori, Self::Tomyum];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Original => "original",
            Self::Cheese => "cheese",
            Self::Bbq => "bbq",
            Self::Nori => "nori",
            Self::Tomyum => "tomyum",
        }
    }

    pub fn badge_color(&self) -> &'static str {
        match self {
            Self::Original => "#d4a373",
            Self::Cheese => "#f4c430",
            Self::Bbq => "#b5442c",
            Self::Nori => "#3a5a40",
            Self::Tomyum => "#e76f51",
        }
    }

    pub fn label(&self, locale: Locale) -> &'static str {
        match (self, locale) {
            (Self::Original, Locale::Ja) => "オリジナル",
            (Self::Original, Locale::Th) => "รสดั้งเดิม",
            (Self::Cheese, Locale::Ja) => "チーズ",
            (Self::Cheese, Locale::Th) => "รสชีส",
            (Self::Bbq, Locale::Ja) => "バーベキュー",
            (Self::Bbq, Locale::Th) => "รสบาร์บีคิว",
            (Self::Nori, Locale::Ja) => "のり",
            (Self::Nori, Locale::Th) => "รสสาหร่าย",
            (Self::Tomyum, Locale::Ja) => "トムヤム",
            (Self::Tomyum, Locale::Th) => "รสต้มยำ",
        }
    }
}

impl FromStr for FlavorTag {
    type Err = UnknownVariant;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim().to_ascii_lowercase();
        Self::ALL.into_iter().find(|t| t.as_str() == s).ok_or(UnknownVariant(s))
    }
}

/// Salt choice for non-set original-flavor products.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SaltOption {
    WithSalt,
    NoSalt,
}

impl SaltOption {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::WithSalt => "with_salt",
            Self::NoSalt => "no_salt",
        }
    }
}

impl fmt::Display for SaltOption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

/// Keys of a set product's flavor mix, in canonical order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FlavorKey {
    OriginalSalt,
    OriginalNoSalt,
    Cheese,
    Bbq,
    Nori,
    Tomyum,
}

impl FlavorKey {
    pub const ALL: [FlavorKey; 6] = [
        Self::OriginalSalt,
        Self::OriginalNoSalt,
        Self::Cheese,
        Self::Bbq,
        Self::Nori,
        Self::Tomyum,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OriginalSalt => "original_salt",
            Self::OriginalNoSalt => "original_nosalt",
            Self::Cheese => "cheese",
            Self::Bbq => "bbq",
            Self::Nori => "nori",
            Self::Tomyum => "tomyum",
        }
    }
}

/// Bag counts per flavor inside a set product. Absent keys read as zero.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SetFlavorSelection {
    #[serde(default)]
    pub original_salt: u32,
    #[serde(default)]
    pub original_nosalt: u32,
    #[serde(default)]
    pub cheese: u32,
    #[serde(default)]
    pub bbq: u32,
    #[serde(default)]
    pub nori: u32,
    #[serde(default)]
    pub tomyum: u32,
}

impl SetFlavorSelection {
    pub fn count(&self, key: FlavorKey) -> u32 {
        match key {
            FlavorKey::OriginalSalt => self.original_salt,
            FlavorKey::OriginalNoSalt => self.original_nosalt,
            FlavorKey::Cheese => self.cheese,
            FlavorKey::Bbq => self.bbq,
            FlavorKey::Nori => self.nori,
            FlavorKey::Tomyum => self.tomyum,
        }
    }

    /// Fixed-order rendering of the non-zero counts, e.g. `original_salt:3,cheese:1`.
    pub fn canonical(&self) -> String {
        FlavorKey::ALL
            .iter()
            .filter(|k| self.count(**k) > 0)
            .map(|k| format!("{}:{}", k.as_str(), self.count(*k)))
            .collect::<Vec<_>>()
            .join(",")
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownVariant(pub String);
impl std::error::Error for UnknownVariant {}
impl fmt::Display for UnknownVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "unknown value: {}", self.0) }
}

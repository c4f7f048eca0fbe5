//! Runtime configuration, read from the process environment.

use std::path::PathBuf;
use std::str::FromStr;
use thiserror::Error;
use crate::domain::discount::ShippingPolicy;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),

    #[error("{name} has an invalid value: {value}")]
    Invalid { name: &'static str, value: String },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AppConfig {
    pub database_url: String,
    pub nats_url: Option<String>,
    pub notify_subject_prefix: String,
    pub port: u16,
    pub cart_storage_dir: PathBuf,
    pub cart_storage_capacity: usize,
    pub shipping: ShippingPolicy,
    pub pending_retry_secs: u64,
    pub pending_max_retries: u32,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let database_url = lookup("DATABASE_URL").filter(|v| !v.is_empty()).ok_or(ConfigError::Missing("DATABASE_URL"))?;
        Ok(Self {
            database_url,
            nats_url: lookup("NATS_URL").filter(|v| !v.is_empty()),
            notify_subject_prefix: lookup("NOTIFY_SUBJECT_PREFIX").unwrap_or_else(|| "cashew.events".to_string()),
            port: parse_or(&lookup, "PORT", 8083)?,
            cart_storage_dir: lookup("CART_STORAGE_DIR").map(PathBuf::from).unwrap_or_else(|| PathBuf::from("./data/carts")),
            cart_storage_capacity: parse_or(&lookup, "CART_STORAGE_CAPACITY", 5 * 1024 * 1024)?,
            shipping: ShippingPolicy {
                free_threshold: parse_or(&lookup, "FREE_SHIPPING_THRESHOLD", ShippingPolicy::default().free_threshold)?,
                flat_fee: parse_or(&lookup, "SHIPPING_FEE", ShippingPolicy::default().flat_fee)?,
            },
            pending_retry_secs: parse_or(&lookup, "PENDING_RETRY_SECS", 300)?,
            pending_max_retries: parse_or(&lookup, "PENDING_MAX_RETRIES", 288)?,
        })
    }
}

fn parse_or<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, name: &'static str, default: T) -> Result<T, ConfigError> {
    match lookup(name) {
        None => Ok(default),
        Some(value) => value.trim().parse().map_err(|_| ConfigError::Invalid { name, value }),
    }
}

//! Adapters to the hosted services the storefront leans on.
pub mod notify;
pub mod postgres;

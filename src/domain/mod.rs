//! Domain model: catalog, cart pricing, discounts and orders.
pub mod aggregates;
pub mod discount;
pub mod events;
pub mod value_objects;

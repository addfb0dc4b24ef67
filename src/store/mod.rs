//! Delivery event storage: dedup by identity key, merge with forward-only status.

pub mod deliveries;

pub use deliveries::{DeliveryStore, MergeWarning, UpsertResult};

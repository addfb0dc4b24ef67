//! Parcel Router: turns carrier notification emails into deduplicated
//! delivery events and routes them to notification targets.

pub mod api;
pub mod config;
pub mod error;
pub mod model;
pub mod parser;
pub mod pipeline;
pub mod registry;
pub mod routing;
pub mod store;

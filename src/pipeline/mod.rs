//! Delivery pipeline.
//!
//! Every inbound carrier notice flows through:
//! 1. Mail account check: the account must be configured and enabled
//! 2. `ParserEngine::parse()`: raw email to `DeliveryEvent`
//! 3. `DeliveryStore::upsert()`: dedup and merge by (carrier, tracking id)
//! 4. `RoutingEngine::route()`: dispatch the merged event to its targets
//!
//! Retryable dispatch failures are picked up again by the retry driver.

pub mod processor;
pub mod retry;

pub use processor::{DeliveryPipeline, IngestReport};
pub use retry::{run_due_retries, spawn_retry_driver};

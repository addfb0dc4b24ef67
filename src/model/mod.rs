//! Canonical data model: delivery events and routing outcomes.

pub mod event;
pub mod outcome;

pub use event::{
    DeliveryEvent, DeliveryStatus, EventFingerprint, EventId, StatusChange, TimeWindow,
    normalize_tracking_id,
};
pub use outcome::{OutcomeState, RoutingOutcome};

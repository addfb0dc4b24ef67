//! Per-(event, target) routing outcome state machine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::event::{EventFingerprint, EventId};

/// Delivery state of one event towards one target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeState {
    Pending,
    Delivered,
    FailedRetryable,
    FailedPermanent,
}

impl OutcomeState {
    /// Check if this state allows transitioning to another state.
    ///
    /// `Delivered -> Pending` is the reopen path for material changes.
    pub fn can_transition_to(&self, target: OutcomeState) -> bool {
        use OutcomeState::*;

        matches!(
            (self, target),
            (Pending, Delivered)
                | (Pending, FailedRetryable)
                | (Pending, FailedPermanent)
                | (FailedRetryable, Delivered)
                | (FailedRetryable, FailedRetryable)
                | (FailedRetryable, FailedPermanent)
                | (Delivered, Pending)
        )
    }

    /// Whether a route call should dispatch for this state.
    pub fn wants_dispatch(&self) -> bool {
        matches!(self, Self::Pending | Self::FailedRetryable)
    }
}

impl std::fmt::Display for OutcomeState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Delivered => "delivered",
            Self::FailedRetryable => "failed_retryable",
            Self::FailedPermanent => "failed_permanent",
        };
        write!(f, "{s}")
    }
}

/// Ledger record for one (event, target) pair. Never deleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutingOutcome {
    pub event_id: EventId,
    pub target_id: String,
    pub attempt_count: u32,
    pub last_attempt_at: Option<DateTime<Utc>>,
    pub state: OutcomeState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    /// Event fields as they were when the target last accepted a delivery.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delivered_fingerprint: Option<EventFingerprint>,
}

impl RoutingOutcome {
    pub fn new(event_id: EventId, target_id: impl Into<String>) -> Self {
        Self {
            event_id,
            target_id: target_id.into(),
            attempt_count: 0,
            last_attempt_at: None,
            state: OutcomeState::Pending,
            last_error: None,
            delivered_fingerprint: None,
        }
    }

    /// Transition to a new state.
    pub fn transition_to(&mut self, new_state: OutcomeState) -> Result<(), String> {
        if !self.state.can_transition_to(new_state) {
            return Err(format!(
                "Cannot transition outcome {}/{} from {} to {}",
                self.event_id, self.target_id, self.state, new_state
            ));
        }
        self.state = new_state;
        Ok(())
    }

    /// Whether `current` is an older copy than the one already delivered,
    /// i.e. the delivered status cannot move on to `current.status`.
    pub fn is_behind(&self, current: &EventFingerprint) -> bool {
        self.delivered_fingerprint
            .as_ref()
            .is_some_and(|delivered| !delivered.status.can_transition_to(current.status))
    }

    /// Whether this outcome already delivered `current` to its target.
    pub fn is_delivered_for(&self, current: &EventFingerprint) -> bool {
        self.state == OutcomeState::Delivered
            && self.delivered_fingerprint.as_ref() == Some(current)
    }
}

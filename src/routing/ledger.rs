//! Outcome ledger: one `RoutingOutcome` per (event, target), never deleted.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, RwLock};

use crate::config::RetryPolicy;
use crate::model::{EventId, OutcomeState, RoutingOutcome};

type Slot = Arc<Mutex<RoutingOutcome>>;

/// Ledger of routing outcomes, keyed by event then target.
///
/// Each outcome sits behind its own lock, which the routing engine holds
/// across a dispatch. Concurrent routes of the same (event, target) pair
/// therefore run one after the other.
pub struct OutcomeLedger {
    outcomes: RwLock<HashMap<EventId, HashMap<String, Slot>>>,
}

impl OutcomeLedger {
    pub fn new() -> Self {
        Self {
            outcomes: RwLock::new(HashMap::new()),
        }
    }

    /// Get or create the outcome slot for (event, target).
    pub(crate) async fn slot(&self, event_id: &EventId, target_id: &str) -> Slot {
        if let Some(slot) = self
            .outcomes
            .read()
            .await
            .get(event_id)
            .and_then(|targets| targets.get(target_id))
        {
            return Arc::clone(slot);
        }

        let mut outcomes = self.outcomes.write().await;
        let slot = outcomes
            .entry(event_id.clone())
            .or_default()
            .entry(target_id.to_string())
            .or_insert_with(|| {
                Arc::new(Mutex::new(RoutingOutcome::new(event_id.clone(), target_id)))
            });
        Arc::clone(slot)
    }

    /// Outcomes recorded for one event, ordered by target id.
    pub async fn outcomes_for(&self, event_id: &EventId) -> Vec<RoutingOutcome> {
        let slots: Vec<Slot> = self
            .outcomes
            .read()
            .await
            .get(event_id)
            .map(|targets| targets.values().cloned().collect())
            .unwrap_or_default();

        let mut outcomes = Vec::with_capacity(slots.len());
        for slot in slots {
            outcomes.push(slot.lock().await.clone());
        }
        outcomes.sort_by(|a, b| a.target_id.cmp(&b.target_id));
        outcomes
    }

    /// Events with at least one retryable outcome whose backoff has elapsed.
    ///
    /// Outcomes currently locked by an in-flight dispatch are skipped.
    pub async fn due_retries(&self, now: DateTime<Utc>, policy: &RetryPolicy) -> Vec<EventId> {
        let outcomes = self.outcomes.read().await;
        let mut due: Vec<EventId> = outcomes
            .iter()
            .filter(|(_, targets)| {
                targets.values().any(|slot| {
                    let Ok(outcome) = slot.try_lock() else {
                        return false;
                    };
                    if outcome.state != OutcomeState::FailedRetryable {
                        return false;
                    }
                    let Some(last) = outcome.last_attempt_at else {
                        return true;
                    };
                    chrono::Duration::from_std(policy.backoff(outcome.attempt_count))
                        .ok()
                        .and_then(|backoff| last.checked_add_signed(backoff))
                        .is_some_and(|due_at| now >= due_at)
                })
            })
            .map(|(event_id, _)| event_id.clone())
            .collect();
        due.sort();
        due
    }

    /// Number of (event, target) outcomes in the ledger.
    pub async fn len(&self) -> usize {
        self.outcomes.read().await.values().map(HashMap::len).sum()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

impl Default for OutcomeLedger {
    fn default() -> Self {
        Self::new()
    }
}

//! In-memory delivery store with per-key merge serialization.
//!
//! The map lock is held only long enough to find or insert an entry handle.
//! All merging happens under the entry's own mutex, so upserts for different
//! parcels never wait on each other.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{NaiveDate, Utc};
use serde::Serialize;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::model::{DeliveryEvent, DeliveryStatus, EventId, StatusChange, normalize_tracking_id};

/// Status history kept per event.
const MAX_HISTORY: usize = 100;

/// Non-fatal issue found while merging an update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "warning", rename_all = "snake_case")]
pub enum MergeWarning {
    /// The update tried to move the status backwards or out of a terminal
    /// state; the stored status was kept.
    StatusRegressionIgnored {
        current: DeliveryStatus,
        attempted: DeliveryStatus,
    },
}

/// Result of an upsert.
#[derive(Debug, Clone, Serialize)]
pub struct UpsertResult {
    /// The stored event after the merge.
    pub event: DeliveryEvent,
    pub was_new: bool,
    pub warnings: Vec<MergeWarning>,
}

struct Entry {
    event: DeliveryEvent,
    history: Vec<StatusChange>,
}

/// Keyed store of delivery events.
pub struct DeliveryStore {
    entries: RwLock<HashMap<EventId, Arc<Mutex<Entry>>>>,
}

impl DeliveryStore {
    /// Create an empty store.
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            entries: RwLock::new(HashMap::new()),
        })
    }

    /// Insert a new event or merge it into the stored one with the same
    /// identity.
    pub async fn upsert(&self, incoming: DeliveryEvent) -> UpsertResult {
        // Identity is recomputed rather than trusted from the caller.
        let id = EventId::derive(&incoming.carrier, &incoming.tracking_id);

        let existing = self.entries.read().await.get(&id).cloned();
        let slot = match existing {
            Some(slot) => slot,
            None => {
                let mut entries = self.entries.write().await;
                match entries.get(&id) {
                    // Another writer inserted the same key first.
                    Some(slot) => Arc::clone(slot),
                    None => {
                        let mut event = incoming;
                        event.id = id.clone();
                        event.tracking_id = normalize_tracking_id(&event.tracking_id);
                        let history = vec![StatusChange {
                            from: None,
                            to: event.status,
                            at: Utc::now(),
                            source: event.mail_account.clone(),
                        }];
                        entries.insert(
                            id.clone(),
                            Arc::new(Mutex::new(Entry {
                                event: event.clone(),
                                history,
                            })),
                        );
                        info!(
                            event_id = %id,
                            carrier = %event.carrier,
                            tracking_id = %event.tracking_id,
                            status = %event.status,
                            "New delivery stored"
                        );
                        return UpsertResult {
                            event,
                            was_new: true,
                            warnings: Vec::new(),
                        };
                    }
                }
            }
        };

        let mut entry = slot.lock().await;
        let warnings = merge(&mut entry, incoming);
        UpsertResult {
            event: entry.event.clone(),
            was_new: false,
            warnings,
        }
    }

    /// All events, ordered by expected date, carrier and tracking id.
    pub async fn list_all(&self) -> Vec<DeliveryEvent> {
        let mut events = self.snapshot().await;
        events.sort_by(|a, b| {
            (a.date_expected, &a.carrier, &a.tracking_id).cmp(&(
                b.date_expected,
                &b.carrier,
                &b.tracking_id,
            ))
        });
        events
    }

    /// Events expected on `date`. Events without a known date are excluded.
    pub async fn list_for_date(&self, date: NaiveDate) -> Vec<DeliveryEvent> {
        self.list_all()
            .await
            .into_iter()
            .filter(|e| e.date_expected == Some(date))
            .collect()
    }

    /// Look up one event.
    pub async fn get(&self, id: &EventId) -> Option<DeliveryEvent> {
        let slot = self.entries.read().await.get(id).cloned()?;
        let entry = slot.lock().await;
        Some(entry.event.clone())
    }

    /// Accepted status changes of one event, oldest first.
    pub async fn history(&self, id: &EventId) -> Option<Vec<StatusChange>> {
        let slot = self.entries.read().await.get(id).cloned()?;
        let entry = slot.lock().await;
        Some(entry.history.clone())
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    async fn snapshot(&self) -> Vec<DeliveryEvent> {
        let slots: Vec<_> = self.entries.read().await.values().cloned().collect();
        let mut events = Vec::with_capacity(slots.len());
        for slot in slots {
            events.push(slot.lock().await.event.clone());
        }
        events
    }
}

/// Merge `incoming` into a stored entry.
fn merge(entry: &mut Entry, incoming: DeliveryEvent) -> Vec<MergeWarning> {
    let mut warnings = Vec::new();
    let stored = &mut entry.event;

    if let Some(date) = incoming.date_expected {
        stored.date_expected = Some(date);
    }
    if let Some(window) = incoming.time_window {
        stored.time_window = Some(window);
    }
    let source = incoming.mail_account;
    if !source.is_empty() {
        stored.mail_account = source.clone();
    }
    stored.raw_metadata.extend(incoming.raw_metadata);

    let current = stored.status;
    if current.can_transition_to(incoming.status) {
        if current != incoming.status {
            stored.status = incoming.status;
            entry.history.push(StatusChange {
                from: Some(current),
                to: incoming.status,
                at: Utc::now(),
                source,
            });
            if entry.history.len() > MAX_HISTORY {
                let drain_count = entry.history.len() - MAX_HISTORY;
                entry.history.drain(..drain_count);
            }
            info!(
                event_id = %stored.id,
                from = %current,
                to = %incoming.status,
                "Delivery status advanced"
            );
        }
    } else {
        warn!(
            event_id = %stored.id,
            current = %current,
            attempted = %incoming.status,
            "Ignoring status regression"
        );
        warnings.push(MergeWarning::StatusRegressionIgnored {
            current,
            attempted: incoming.status,
        });
    }

    if incoming.last_update > stored.last_update {
        stored.last_update = incoming.last_update;
    }

    debug!(event_id = %stored.id, "Delivery merged");
    warnings
}

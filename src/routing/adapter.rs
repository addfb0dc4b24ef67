//! Target adapter contract and the journaling adapter.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::RwLock;
use tracing::info;

use crate::config::TargetConfig;
use crate::model::{DeliveryEvent, EventId};

/// What a target reports back for one delivery attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryResult {
    Delivered,
    /// Transient failure; the attempt may be repeated.
    Retryable(String),
    /// The target will never accept this delivery.
    Permanent(String),
}

/// A notification target (calendar, push service, todo list).
///
/// Implementations do the I/O and classify their own failures.
#[async_trait]
pub trait TargetAdapter: Send + Sync {
    async fn deliver(&self, event: &DeliveryEvent, target: &TargetConfig) -> DeliveryResult;
}

/// One-line human summary of an event, as targets would show it.
pub fn notification_text(event: &DeliveryEvent) -> String {
    let mut text = format!("{} {}: {}", event.carrier, event.tracking_id, event.status);
    if let Some(date) = event.date_expected {
        text.push_str(&format!(", expected {date}"));
    }
    if let Some(window) = &event.time_window {
        text.push_str(&format!(" {window}"));
    }
    text
}

/// A notification recorded by `JournalTarget`.
#[derive(Debug, Clone, Serialize)]
pub struct JournalEntry {
    pub target_id: String,
    pub event_id: EventId,
    pub text: String,
    pub at: DateTime<Utc>,
}

/// Adapter that logs every notification and keeps it in memory.
///
/// Stands in for the real integrations, which live outside this crate.
pub struct JournalTarget {
    entries: RwLock<Vec<JournalEntry>>,
}

impl JournalTarget {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(Vec::new()),
        }
    }

    /// Notifications delivered so far, oldest first.
    pub async fn entries(&self) -> Vec<JournalEntry> {
        self.entries.read().await.clone()
    }
}

impl Default for JournalTarget {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TargetAdapter for JournalTarget {
    async fn deliver(&self, event: &DeliveryEvent, target: &TargetConfig) -> DeliveryResult {
        let text = notification_text(event);
        info!(
            target_id = %target.id,
            target_key = %target.target_key,
            event_id = %event.id,
            notification = %text,
            "Delivery notification"
        );
        self.entries.write().await.push(JournalEntry {
            target_id: target.id.clone(),
            event_id: event.id.clone(),
            text,
            at: Utc::now(),
        });
        DeliveryResult::Delivered
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{DeliveryStatus, TimeWindow};
    use chrono::{NaiveDate, NaiveTime};

    fn target() -> TargetConfig {
        TargetConfig {
            id: "ntfy_daily".into(),
            target_key: "ntfy_push".into(),
            display_name: "ntfy daily push".into(),
            enabled: true,
        }
    }

    #[test]
    fn notification_text_includes_known_fields() {
        let event =
            DeliveryEvent::new("DE_DHL", "123456789", DeliveryStatus::Announced, "a", Utc::now())
                .with_date(NaiveDate::from_ymd_opt(2026, 10, 21).unwrap())
                .with_time_window(TimeWindow::Range {
                    start: NaiveTime::from_hms_opt(14, 0, 0).unwrap(),
                    end: NaiveTime::from_hms_opt(16, 0, 0).unwrap(),
                });
        assert_eq!(
            notification_text(&event),
            "DE_DHL 123456789: announced, expected 2026-10-21 14:00-16:00"
        );
    }

    #[tokio::test]
    async fn journal_records_deliveries() {
        let journal = JournalTarget::new();
        let event = DeliveryEvent::new(
            "DE_HERMES",
            "HERMES-987654",
            DeliveryStatus::Updated,
            "a",
            Utc::now(),
        );

        let result = journal.deliver(&event, &target()).await;
        assert_eq!(result, DeliveryResult::Delivered);

        let entries = journal.entries().await;
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].target_id, "ntfy_daily");
        assert_eq!(entries[0].event_id, event.id);
        assert_eq!(entries[0].text, "DE_HERMES HERMES-987654: updated");
    }
}

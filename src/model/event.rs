//! Delivery event model and status lifecycle.

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

// ── Identity ────────────────────────────────────────────────────────

/// Stable identity of a delivery event, derived from `(carrier, tracking_id)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventId(String);

impl EventId {
    /// Derive the id for a carrier/tracking pair.
    ///
    /// The tracking id is normalized first, so `"1234 5678"` and `"12345678"`
    /// name the same parcel.
    pub fn derive(carrier: &str, tracking_id: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(carrier.as_bytes());
        hasher.update([0x1f]);
        hasher.update(normalize_tracking_id(tracking_id).as_bytes());
        let digest = hasher.finalize();
        Self(hex::encode(&digest[..16]))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for EventId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl std::fmt::Display for EventId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Strip whitespace and upper-case a carrier tracking number.
pub fn normalize_tracking_id(raw: &str) -> String {
    raw.chars()
        .filter(|c| !c.is_whitespace())
        .flat_map(char::to_uppercase)
        .collect()
}

// ── Status ──────────────────────────────────────────────────────────

/// Lifecycle status of a delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    Announced,
    Updated,
    OutForDelivery,
    Delivered,
    Failed,
    Cancelled,
}

impl DeliveryStatus {
    /// Position on the happy path. Terminal failure states have no rank.
    fn rank(&self) -> Option<u8> {
        match self {
            Self::Announced => Some(0),
            Self::Updated => Some(1),
            Self::OutForDelivery => Some(2),
            Self::Delivered => Some(3),
            Self::Failed | Self::Cancelled => None,
        }
    }

    /// Check if this status may be replaced by `target`.
    ///
    /// Re-applying the current status is always accepted.
    pub fn can_transition_to(&self, target: DeliveryStatus) -> bool {
        if *self == target {
            return true;
        }
        if self.is_terminal() {
            return false;
        }
        match (self.rank(), target.rank()) {
            (_, None) => true,
            (Some(current), Some(next)) => next >= current,
            (None, Some(_)) => false,
        }
    }

    /// Check if this is a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Delivered | Self::Failed | Self::Cancelled)
    }
}

impl std::fmt::Display for DeliveryStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Announced => "announced",
            Self::Updated => "updated",
            Self::OutForDelivery => "out_for_delivery",
            Self::Delivered => "delivered",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        };
        write!(f, "{s}")
    }
}

/// A recorded status change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusChange {
    /// Previous status (`None` for the initial insert).
    pub from: Option<DeliveryStatus>,
    /// New status.
    pub to: DeliveryStatus,
    /// When the change was accepted.
    pub at: DateTime<Utc>,
    /// Mail account whose notice carried the change.
    pub source: String,
}

// ── Time window ─────────────────────────────────────────────────────

/// Expected delivery window: a parsed range or the carrier's free text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TimeWindow {
    Range { start: NaiveTime, end: NaiveTime },
    Text(String),
}

impl std::fmt::Display for TimeWindow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Range { start, end } => {
                write!(f, "{}-{}", start.format("%H:%M"), end.format("%H:%M"))
            }
            Self::Text(text) => f.write_str(text),
        }
    }
}

// ── Delivery event ──────────────────────────────────────────────────

/// Canonical delivery event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryEvent {
    pub id: EventId,
    /// Parser key of the carrier (e.g. `DE_DHL`).
    pub carrier: String,
    pub tracking_id: String,
    pub date_expected: Option<NaiveDate>,
    pub time_window: Option<TimeWindow>,
    pub status: DeliveryStatus,
    /// Mail account the notice arrived on.
    pub mail_account: String,
    /// Carrier-specific auxiliary fields, opaque to the engine.
    #[serde(default)]
    pub raw_metadata: BTreeMap<String, String>,
    pub last_update: DateTime<Utc>,
}

impl DeliveryEvent {
    /// Create an event with its identity derived from carrier and tracking id.
    pub fn new(
        carrier: impl Into<String>,
        tracking_id: impl AsRef<str>,
        status: DeliveryStatus,
        mail_account: impl Into<String>,
        last_update: DateTime<Utc>,
    ) -> Self {
        let carrier = carrier.into();
        let tracking_id = normalize_tracking_id(tracking_id.as_ref());
        Self {
            id: EventId::derive(&carrier, &tracking_id),
            carrier,
            tracking_id,
            date_expected: None,
            time_window: None,
            status,
            mail_account: mail_account.into(),
            raw_metadata: BTreeMap::new(),
            last_update,
        }
    }

    pub fn with_date(mut self, date: NaiveDate) -> Self {
        self.date_expected = Some(date);
        self
    }

    pub fn with_time_window(mut self, window: TimeWindow) -> Self {
        self.time_window = Some(window);
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.raw_metadata.insert(key.into(), value.into());
        self
    }

    /// The fields whose change justifies re-notifying a target.
    pub fn fingerprint(&self) -> EventFingerprint {
        EventFingerprint {
            status: self.status,
            date_expected: self.date_expected,
        }
    }
}

/// Snapshot of the materially relevant fields of an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventFingerprint {
    pub status: DeliveryStatus,
    pub date_expected: Option<NaiveDate>,
}

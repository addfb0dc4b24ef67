//! Built-in carrier parsers.
//!
//! Each carrier is a `PatternParser` profile: sender domains that identify the
//! carrier with confidence, content markers that only hint at it, and the
//! tracking number patterns it uses.

use std::sync::Arc;

use regex::Regex;

use super::email::DecodedEmail;
use super::extract::{detect_status, find_date, find_time_window, find_tracking_id};
use super::{CarrierParser, Extraction, SignatureMatch};

/// Labelled tracking numbers ("Sendungsnummer: ...", "Tracking ID ...").
const LABELLED_TRACKING: &str = r"(?i)(?:sendungsnummer|sendungs-?nr\.?|paketnummer|tracking[ -]?(?:number|nummer|id|no\.?|nr\.?)?)\s*[:#]?\s*([A-Z0-9][A-Z0-9-]{5,34})";

/// Regex-driven carrier parser.
#[derive(Debug, Clone)]
pub struct PatternParser {
    key: String,
    description: String,
    /// Matches the sender domain (confident claim).
    sender_domains: Regex,
    /// Matches subject/body text (weak claim).
    markers: Regex,
    /// Tracking number patterns, tried in order; capture group 1 is the id.
    tracking: Vec<Regex>,
}

impl PatternParser {
    /// Build a parser from pattern strings.
    pub fn new(
        key: &str,
        description: &str,
        sender_domains: &str,
        markers: &str,
        tracking: &[&str],
    ) -> Result<Self, regex::Error> {
        Ok(Self {
            key: key.into(),
            description: description.into(),
            sender_domains: Regex::new(sender_domains)?,
            markers: Regex::new(markers)?,
            tracking: tracking
                .iter()
                .map(|p| Regex::new(p))
                .collect::<Result<_, _>>()?,
        })
    }

    /// DHL Germany.
    pub fn dhl() -> Self {
        Self::new(
            "DE_DHL",
            "DHL parser",
            r"(?i)(^|\.)dhl\.(de|com)$",
            r"(?i)\bDHL\b",
            &[
                r"\b(JJD\d{10,30})\b",
                r"\b(00340\d{15})\b",
                LABELLED_TRACKING,
            ],
        )
        .unwrap()
    }

    /// Hermes Germany.
    pub fn hermes() -> Self {
        Self::new(
            "DE_HERMES",
            "Hermes parser",
            r"(?i)(^|\.)(myhermes\.de|hermesworld\.com|hermes-europe\.[a-z]+)$",
            r"(?i)\bHermes\b",
            &[r"\b(HERMES-\d{6,})\b", LABELLED_TRACKING, r"\b(H?\d{16,20})\b"],
        )
        .unwrap()
    }

    /// Amazon UK shipment notices.
    pub fn amazon_uk() -> Self {
        Self::new(
            "AMAZON_UK",
            "Amazon UK parser",
            r"(?i)(^|\.)amazon\.co\.uk$",
            r"(?i)amazon\.co\.uk",
            &[r"(?i)tracking id\s*[:#]?\s*([A-Z0-9]{8,24})", r"\b(TBA\d{9,15})\b"],
        )
        .unwrap()
    }
}

impl CarrierParser for PatternParser {
    fn key(&self) -> &str {
        &self.key
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn signature(&self, email: &DecodedEmail) -> SignatureMatch {
        if email
            .sender_domain()
            .is_some_and(|domain| self.sender_domains.is_match(domain))
        {
            SignatureMatch::Confident
        } else if self.markers.is_match(&email.text()) {
            SignatureMatch::Weak
        } else {
            SignatureMatch::None
        }
    }

    fn extract(&self, email: &DecodedEmail) -> Option<Extraction> {
        let text = email.text();
        let tracking_id = find_tracking_id(&text, &self.tracking)?;

        Some(Extraction {
            tracking_id,
            status: detect_status(&text),
            date_expected: find_date(&text),
            time_window: find_time_window(&text),
            metadata: Default::default(),
        })
    }
}

/// The carriers shipped with the service, in registration order.
pub fn builtin_parsers() -> Vec<Arc<dyn CarrierParser>> {
    vec![
        Arc::new(PatternParser::dhl()),
        Arc::new(PatternParser::hermes()),
        Arc::new(PatternParser::amazon_uk()),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{DeliveryStatus, TimeWindow};
    use chrono::{NaiveDate, NaiveTime};

    fn email(sender: Option<&str>, subject: &str, body: &str) -> DecodedEmail {
        DecodedEmail {
            sender: sender.map(String::from),
            subject: Some(subject.into()),
            body: body.into(),
        }
    }

    #[test]
    fn builtin_parsers_compile() {
        let keys: Vec<String> = builtin_parsers()
            .iter()
            .map(|p| p.key().to_string())
            .collect();
        assert_eq!(keys, vec!["DE_DHL", "DE_HERMES", "AMAZON_UK"]);
    }

    #[test]
    fn dhl_sender_is_confident() {
        let parser = PatternParser::dhl();
        let mail = email(Some("noreply@dhl.de"), "Paket", "Hallo");
        assert_eq!(parser.signature(&mail), SignatureMatch::Confident);

        let sub = email(Some("news@mail.dhl.com"), "x", "y");
        assert_eq!(parser.signature(&sub), SignatureMatch::Confident);
    }

    #[test]
    fn lookalike_domain_is_not_confident() {
        let parser = PatternParser::dhl();
        let mail = email(Some("promo@notdhl.de"), "Angebot", "Nichts");
        assert_eq!(parser.signature(&mail), SignatureMatch::None);
    }

    #[test]
    fn marker_only_is_weak() {
        let parser = PatternParser::hermes();
        let mail = email(Some("shop@example.com"), "Versand", "Wir versenden mit Hermes.");
        assert_eq!(parser.signature(&mail), SignatureMatch::Weak);
    }

    #[test]
    fn dhl_extracts_fields() {
        let parser = PatternParser::dhl();
        let mail = email(
            Some("noreply@dhl.de"),
            "Ihre DHL Sendung kommt",
            "Sendungsnummer: 123456789\nVoraussichtliche Zustellung am 21.10.2026 zwischen 14:00 - 16:00 Uhr.",
        );
        let extraction = parser.extract(&mail).unwrap();

        assert_eq!(extraction.tracking_id, "123456789");
        assert_eq!(extraction.status, DeliveryStatus::Announced);
        assert_eq!(extraction.date_expected, NaiveDate::from_ymd_opt(2026, 10, 21));
        assert_eq!(
            extraction.time_window,
            Some(TimeWindow::Range {
                start: NaiveTime::from_hms_opt(14, 0, 0).unwrap(),
                end: NaiveTime::from_hms_opt(16, 0, 0).unwrap(),
            })
        );
    }

    #[test]
    fn dhl_prefers_piece_number() {
        let parser = PatternParser::dhl();
        let mail = email(
            Some("noreply@dhl.de"),
            "Paket",
            "Tracking number: 999999999 Piece JJD0001234567890",
        );
        assert_eq!(parser.extract(&mail).unwrap().tracking_id, "JJD0001234567890");
    }

    #[test]
    fn hermes_extracts_prefixed_id() {
        let parser = PatternParser::hermes();
        let mail = email(
            Some("noreply@myhermes.de"),
            "Deine Sendung",
            "Deine Sendung HERMES-987654 ist in Zustellung.",
        );
        let extraction = parser.extract(&mail).unwrap();
        assert_eq!(extraction.tracking_id, "HERMES-987654");
        assert_eq!(extraction.status, DeliveryStatus::OutForDelivery);
    }

    #[test]
    fn amazon_extracts_tracking_id() {
        let parser = PatternParser::amazon_uk();
        let mail = email(
            Some("shipment-tracking@amazon.co.uk"),
            "Delivered: your Amazon.co.uk order",
            "Your package was delivered. Tracking ID: QA1234567890",
        );
        let extraction = parser.extract(&mail).unwrap();
        assert_eq!(extraction.tracking_id, "QA1234567890");
        assert_eq!(extraction.status, DeliveryStatus::Delivered);
    }

    #[test]
    fn missing_tracking_id_extracts_nothing() {
        let parser = PatternParser::dhl();
        let mail = email(Some("noreply@dhl.de"), "Umfrage", "Wie zufrieden waren Sie?");
        assert!(parser.extract(&mail).is_none());
    }
}

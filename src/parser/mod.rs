//! Parser engine: turns raw carrier notices into delivery events.
//!
//! 1. `DecodedEmail::decode()`: sender, subject, text body
//! 2. Parser selection: explicit hint, else carrier signatures
//! 3. `CarrierParser::extract()`: tracking id, status, date, window
//!
//! Parsing is pure: the result depends only on the email, the hints and the
//! parser registry.

pub mod carriers;
pub mod email;
pub mod extract;

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::NaiveDate;
use tracing::{debug, warn};

use crate::error::ParseFailure;
use crate::model::{DeliveryEvent, DeliveryStatus, TimeWindow};
use crate::registry::AdapterRegistries;

pub use email::{DecodedEmail, InboundEmail};

/// How strongly a parser claims an email.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SignatureMatch {
    None,
    /// Carrier named in the text, but the sender is someone else
    /// (shops, forwarded mails).
    Weak,
    /// Sent from the carrier's own domain.
    Confident,
}

/// Fields a parser pulled out of an email.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Extraction {
    pub tracking_id: String,
    pub status: DeliveryStatus,
    pub date_expected: Option<NaiveDate>,
    pub time_window: Option<TimeWindow>,
    /// Carrier-specific extras, copied into `raw_metadata`.
    pub metadata: BTreeMap<String, String>,
}

/// A carrier-specific parser.
pub trait CarrierParser: Send + Sync {
    /// Registry key, also used as the event's `carrier`.
    fn key(&self) -> &str;

    fn description(&self) -> &str;

    /// Whether this parser recognizes the email as its carrier's.
    fn signature(&self, email: &DecodedEmail) -> SignatureMatch;

    /// Extract delivery fields. `None` when no tracking id can be found.
    fn extract(&self, email: &DecodedEmail) -> Option<Extraction>;
}

/// Selects a parser for an email and builds the delivery event.
pub struct ParserEngine {
    registries: Arc<AdapterRegistries>,
}

impl ParserEngine {
    pub fn new(registries: Arc<AdapterRegistries>) -> Self {
        Self { registries }
    }

    /// Parse an inbound email into a delivery event.
    pub fn parse(
        &self,
        email: &InboundEmail,
        provider_hint: Option<&str>,
        parser_hint: Option<&str>,
    ) -> Result<DeliveryEvent, ParseFailure> {
        let decoded = DecodedEmail::decode(&email.raw);
        let parsers = &self.registries.parsers;

        if let Some(hint) = parser_hint {
            match parsers.resolve(hint) {
                Ok(parser) => {
                    debug!(parser = hint, "Using hinted parser");
                    return match parser.extract(&decoded) {
                        Some(extraction) => Ok(build_event(
                            parser.as_ref(),
                            extraction,
                            &decoded,
                            email,
                            provider_hint,
                            "hint",
                        )),
                        None => Err(ParseFailure::malformed(format!(
                            "{hint} found no tracking id"
                        ))),
                    };
                }
                Err(e) => {
                    warn!(parser = hint, error = %e, "Ignoring unknown parser hint");
                }
            }
        }

        let mut confident = Vec::new();
        let mut weak = Vec::new();
        for (_, parser) in parsers.iter() {
            match parser.signature(&decoded) {
                SignatureMatch::Confident => confident.push(parser),
                SignatureMatch::Weak => weak.push(parser),
                SignatureMatch::None => {}
            }
        }

        if confident.len() > 1 {
            let keys: Vec<&str> = confident.iter().map(|p| p.key()).collect();
            return Err(ParseFailure::ambiguous(format!(
                "claimed by {}",
                keys.join(", ")
            )));
        }

        if confident.is_empty() && weak.is_empty() {
            return Err(ParseFailure::no_matching_parser(match decoded.sender {
                Some(sender) => format!("no parser recognizes sender {sender}"),
                None => "no parser recognizes the content".to_string(),
            }));
        }

        let candidates = confident
            .into_iter()
            .map(|p| (p, "confident"))
            .chain(weak.into_iter().map(|p| (p, "weak")));

        let mut tried = Vec::new();
        for (parser, strength) in candidates {
            if let Some(extraction) = parser.extract(&decoded) {
                debug!(
                    parser = parser.key(),
                    tracking_id = %extraction.tracking_id,
                    strength,
                    "Parser extracted delivery"
                );
                return Ok(build_event(
                    parser.as_ref(),
                    extraction,
                    &decoded,
                    email,
                    provider_hint,
                    strength,
                ));
            }
            tried.push(parser.key());
        }

        Err(ParseFailure::malformed(format!(
            "no tracking id found by {}",
            tried.join(", ")
        )))
    }
}

fn build_event(
    parser: &dyn CarrierParser,
    extraction: Extraction,
    decoded: &DecodedEmail,
    email: &InboundEmail,
    provider_hint: Option<&str>,
    matched_by: &str,
) -> DeliveryEvent {
    let mut event = DeliveryEvent::new(
        parser.key(),
        &extraction.tracking_id,
        extraction.status,
        email.mail_account.clone(),
        email.received_at,
    );
    event.date_expected = extraction.date_expected;
    event.time_window = extraction.time_window;
    event.raw_metadata = extraction.metadata;
    event
        .raw_metadata
        .insert("matched_by".into(), matched_by.into());
    if let Some(sender) = &decoded.sender {
        event.raw_metadata.insert("sender".into(), sender.clone());
    }
    if let Some(subject) = &decoded.subject {
        event.raw_metadata.insert("subject".into(), subject.clone());
    }
    if let Some(provider) = provider_hint {
        event.raw_metadata.insert("provider".into(), provider.into());
    }
    event
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ParseFailureReason;
    use crate::registry::AdapterRegistries;
    use crate::routing::JournalTarget;
    use carriers::PatternParser;
    use chrono::Utc;

    const DHL_MAIL: &str = "From: DHL Paket <noreply@dhl.de>\r\n\
        Subject: Ihre DHL Sendung ist unterwegs\r\n\
        Content-Type: text/plain; charset=utf-8\r\n\
        \r\n\
        Sendungsnummer: 123456789\r\n\
        Voraussichtliche Zustellung: 21.10.2026\r\n";

    fn engine_with(extra: Option<PatternParser>) -> ParserEngine {
        let mut registries = AdapterRegistries::builtin(Arc::new(JournalTarget::new()));
        if let Some(parser) = extra {
            registries.register_parser(Arc::new(parser));
        }
        ParserEngine::new(Arc::new(registries))
    }

    fn inbound(raw: &str) -> InboundEmail {
        InboundEmail::new(raw, "gmail_marco", Utc::now())
    }

    #[test]
    fn parses_dhl_notice() {
        let engine = engine_with(None);
        let event = engine.parse(&inbound(DHL_MAIL), Some("gmail"), None).unwrap();

        assert_eq!(event.carrier, "DE_DHL");
        assert_eq!(event.tracking_id, "123456789");
        assert_eq!(event.status, DeliveryStatus::Announced);
        assert_eq!(event.mail_account, "gmail_marco");
        assert_eq!(event.date_expected, NaiveDate::from_ymd_opt(2026, 10, 21));
        assert_eq!(event.raw_metadata["provider"], "gmail");
        assert_eq!(event.raw_metadata["matched_by"], "confident");
        assert_eq!(event.raw_metadata["sender"], "noreply@dhl.de");
    }

    #[test]
    fn same_email_yields_same_identity() {
        let engine = engine_with(None);
        let a = engine.parse(&inbound(DHL_MAIL), None, None).unwrap();
        let b = engine.parse(&inbound(DHL_MAIL), None, None).unwrap();
        assert_eq!(a.id, b.id);
    }

    #[test]
    fn ambiguous_confident_claims_fail() {
        let express = PatternParser::new(
            "DE_DHL_EXPRESS",
            "DHL Express parser",
            r"(?i)(^|\.)dhl\.de$",
            r"(?i)\bDHL Express\b",
            &[r"(\d{9,})"],
        )
        .unwrap();
        let engine = engine_with(Some(express));

        let failure = engine.parse(&inbound(DHL_MAIL), None, None).unwrap_err();
        assert_eq!(failure.reason, ParseFailureReason::AmbiguousMatch);
        assert!(failure.detail.contains("DE_DHL"));
        assert!(failure.detail.contains("DE_DHL_EXPRESS"));
    }

    #[test]
    fn hint_resolves_ambiguity() {
        let express = PatternParser::new(
            "DE_DHL_EXPRESS",
            "DHL Express parser",
            r"(?i)(^|\.)dhl\.de$",
            r"(?i)\bDHL Express\b",
            &[r"(\d{9,})"],
        )
        .unwrap();
        let engine = engine_with(Some(express));

        let event = engine
            .parse(&inbound(DHL_MAIL), None, Some("DE_DHL_EXPRESS"))
            .unwrap();
        assert_eq!(event.carrier, "DE_DHL_EXPRESS");
        assert_eq!(event.raw_metadata["matched_by"], "hint");
    }

    #[test]
    fn unknown_sender_has_no_matching_parser() {
        let engine = engine_with(None);
        let raw = "From: alice@example.com\r\nSubject: Lunch?\r\n\r\nSee you at noon.\r\n";
        let failure = engine.parse(&inbound(raw), None, None).unwrap_err();
        assert_eq!(failure.reason, ParseFailureReason::NoMatchingParser);
    }

    #[test]
    fn carrier_mail_without_tracking_is_malformed() {
        let engine = engine_with(None);
        let raw = "From: noreply@dhl.de\r\nSubject: Wie war Ihre Zustellung?\r\n\r\nBitte bewerten Sie uns.\r\n";
        let failure = engine.parse(&inbound(raw), None, None).unwrap_err();
        assert_eq!(failure.reason, ParseFailureReason::MalformedContent);
    }

    #[test]
    fn hinted_parser_without_tracking_is_malformed() {
        let engine = engine_with(None);
        let raw = "From: alice@example.com\r\nSubject: hi\r\n\r\nnothing\r\n";
        let failure = engine.parse(&inbound(raw), None, Some("DE_HERMES")).unwrap_err();
        assert_eq!(failure.reason, ParseFailureReason::MalformedContent);
    }

    #[test]
    fn unknown_hint_falls_back_to_signatures() {
        let engine = engine_with(None);
        let event = engine
            .parse(&inbound(DHL_MAIL), None, Some("NOT_A_PARSER"))
            .unwrap();
        assert_eq!(event.carrier, "DE_DHL");
    }

    #[test]
    fn weak_match_from_shop_sender() {
        let engine = engine_with(None);
        let raw = "From: orders@shop.example\r\n\
                   Subject: Versandbestaetigung\r\n\
                   \r\n\
                   Ihre Bestellung wurde an Hermes uebergeben. Sendungsnummer: HERMES-987654\r\n";
        let event = engine.parse(&inbound(raw), None, None).unwrap();
        assert_eq!(event.carrier, "DE_HERMES");
        assert_eq!(event.tracking_id, "HERMES-987654");
        assert_eq!(event.raw_metadata["matched_by"], "weak");
    }

    #[test]
    fn confident_parser_tried_before_weak() {
        let engine = engine_with(None);
        let raw = "From: noreply@myhermes.de\r\n\
                   Subject: Sendung von DHL uebernommen\r\n\
                   \r\n\
                   Sendungsnummer: HERMES-123456\r\n";
        let event = engine.parse(&inbound(raw), None, None).unwrap();
        assert_eq!(event.carrier, "DE_HERMES");
    }

    #[test]
    fn weak_matches_follow_registration_order() {
        let engine = engine_with(None);
        let raw = "From: orders@shop.example\r\n\
                   Subject: Versand\r\n\
                   \r\n\
                   Versand mit DHL oder Hermes. Sendungsnummer: 555666777\r\n";
        let event = engine.parse(&inbound(raw), None, None).unwrap();
        assert_eq!(event.carrier, "DE_DHL");
    }
}

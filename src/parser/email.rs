//! Raw email decoding: sender, subject and plain-text body via mail-parser.

use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use mail_parser::MessageParser;
use regex::Regex;
use serde::{Deserialize, Serialize};

static HTML_TAG: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?s)<[^>]*>").unwrap());
static HTML_SKIP: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<(style|script)[^>]*>.*?</(style|script)>").unwrap());

/// An email as handed over by the mail retrieval collaborator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundEmail {
    /// Raw RFC 5322 message (or a bare text body).
    pub raw: Vec<u8>,
    /// Account the email was received on.
    pub mail_account: String,
    /// When the email was received.
    pub received_at: DateTime<Utc>,
}

impl InboundEmail {
    pub fn new(
        raw: impl Into<Vec<u8>>,
        mail_account: impl Into<String>,
        received_at: DateTime<Utc>,
    ) -> Self {
        Self {
            raw: raw.into(),
            mail_account: mail_account.into(),
            received_at,
        }
    }
}

/// The parts of an email carrier parsers look at.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DecodedEmail {
    /// Sender address (lower-cased).
    pub sender: Option<String>,
    pub subject: Option<String>,
    /// Plain-text body. HTML-only mails are reduced to their text.
    pub body: String,
}

impl DecodedEmail {
    /// Decode raw bytes. Input without recognizable headers is treated as a
    /// bare body.
    pub fn decode(raw: &[u8]) -> Self {
        let Some(message) = MessageParser::default().parse(raw) else {
            return Self::bare(raw);
        };

        let sender = first_address(message.from()).map(|s| s.to_lowercase());
        let subject = message.subject().map(str::to_string);

        if sender.is_none() && subject.is_none() {
            return Self::bare(raw);
        }

        let body = message
            .body_text(0)
            .map(|b| b.into_owned())
            .filter(|b| !b.trim().is_empty())
            .or_else(|| message.body_html(0).map(|html| html_to_text(&html)))
            .unwrap_or_default();

        Self {
            sender,
            subject,
            body,
        }
    }

    fn bare(raw: &[u8]) -> Self {
        Self {
            sender: None,
            subject: None,
            body: String::from_utf8_lossy(raw).into_owned(),
        }
    }

    /// Domain part of the sender address.
    pub fn sender_domain(&self) -> Option<&str> {
        self.sender
            .as_deref()
            .and_then(|s| s.rsplit_once('@'))
            .map(|(_, domain)| domain.trim_end_matches('>'))
    }

    /// Subject and body joined, for content searches.
    pub fn text(&self) -> String {
        match &self.subject {
            Some(subject) => format!("{subject}\n{}", self.body),
            None => self.body.clone(),
        }
    }
}

/// First email address of an optional mail_parser Address field.
fn first_address(addr: Option<&mail_parser::Address>) -> Option<String> {
    match addr? {
        mail_parser::Address::List(addrs) => addrs
            .iter()
            .find_map(|a| a.address.as_ref().map(|s| s.to_string())),
        mail_parser::Address::Group(groups) => groups.iter().find_map(|g| {
            g.addresses
                .iter()
                .find_map(|a| a.address.as_ref().map(|s| s.to_string()))
        }),
    }
}

/// Crude HTML → text: drop style/script blocks and tags, collapse blank lines.
fn html_to_text(html: &str) -> String {
    let without_blocks = HTML_SKIP.replace_all(html, " ");
    let text = HTML_TAG.replace_all(&without_blocks, "\n");
    text.replace("&nbsp;", " ")
        .replace("&amp;", "&")
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

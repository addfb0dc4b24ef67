//! Best-effort field extraction shared by the carrier parsers.
//!
//! Carrier notices arrive in German and English. Everything here is plain
//! pattern matching over the decoded text.

use std::sync::LazyLock;

use chrono::{NaiveDate, NaiveTime};
use regex::Regex;

use crate::model::{DeliveryStatus, TimeWindow};

/// Status keyword rules, checked in order. Earlier rules win, so negated
/// phrases ("could not be delivered") come before their positive form.
static STATUS_RULES: LazyLock<Vec<(Regex, DeliveryStatus)>> = LazyLock::new(|| {
    vec![
        (
            Regex::new(
                r"(?i)(storniert|annulliert|cancell?ed|zurück an (den )?absender|returned to (the )?sender)",
            )
            .unwrap(),
            DeliveryStatus::Cancelled,
        ),
        (
            Regex::new(
                r"(?i)(nicht zugestellt|zustellung (ist )?fehlgeschlagen|could not be delivered|delivery (attempt )?failed|unsuccessful delivery|we missed you)",
            )
            .unwrap(),
            DeliveryStatus::Failed,
        ),
        (
            Regex::new(
                r"(?i)(out for delivery|in zustellung|wird heute|kommt heute|arriving today|auf dem weg zu (ihnen|dir))",
            )
            .unwrap(),
            DeliveryStatus::OutForDelivery,
        ),
        (
            Regex::new(
                r"(?im)(wurde(\s+\S+){0,4}?\s+zugestellt|erfolgreich zugestellt|(has|have) been delivered|was delivered|ist angekommen|^\s*delivered\b)",
            )
            .unwrap(),
            DeliveryStatus::Delivered,
        ),
        (
            Regex::new(
                r"(?i)(neuer zustelltermin|geändert|verschoben|aktualisiert|verspät|updated|new delivery date|rescheduled|delayed)",
            )
            .unwrap(),
            DeliveryStatus::Updated,
        ),
    ]
});

static GERMAN_DATE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(\d{1,2})\.(\d{1,2})\.(\d{4})\b").unwrap());
static ISO_DATE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(\d{4})-(\d{2})-(\d{2})\b").unwrap());
static WORDED_DATE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(\d{1,2})(?:st|nd|rd|th|\.)?\s+([a-zä]{3,9})\.?\s+(\d{4})\b").unwrap()
});

/// Words that mark a date as the delivery date rather than an order date.
static DELIVERY_CONTEXT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)(zustell|zugestellt|liefer|ankunft|voraussichtlich|erwartet|deliver|arriv|expected|estimated)",
    )
    .unwrap()
});

/// How far before a date (within its line) a delivery keyword may sit.
const CONTEXT_WINDOW: usize = 60;

static TIME_RANGE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(\d{1,2}):(\d{2})\s*(?:uhr\s*)?(?:-|–|bis|to|and)\s*(\d{1,2}):(\d{2})")
        .unwrap()
});
static HOUR_RANGE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)zwischen\s+(\d{1,2})\s+und\s+(\d{1,2})\s+uhr").unwrap()
});
static DAYPART: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(vormittags|nachmittags|abends|in the morning|in the afternoon|in the evening)\b")
        .unwrap()
});

/// Classify the delivery status from notice text. Defaults to `Announced`.
pub fn detect_status(text: &str) -> DeliveryStatus {
    STATUS_RULES
        .iter()
        .find(|(regex, _)| regex.is_match(text))
        .map(|(_, status)| *status)
        .unwrap_or(DeliveryStatus::Announced)
}

/// First capture of any pattern that looks like a tracking number
/// (contains at least one digit).
pub fn find_tracking_id(text: &str, patterns: &[Regex]) -> Option<String> {
    patterns.iter().find_map(|pattern| {
        pattern
            .captures_iter(text)
            .filter_map(|caps| caps.get(1))
            .map(|m| m.as_str().trim_end_matches('-'))
            .find(|candidate| candidate.chars().any(|c| c.is_ascii_digit()))
            .map(str::to_string)
    })
}

/// Expected delivery date: `21.10.2026`, `2026-10-21` or `21 October 2026` /
/// `21. Oktober 2026`.
///
/// A date preceded by a delivery keyword on its line wins over dates
/// elsewhere (order dates, footers). Otherwise the first date in the text.
pub fn find_date(text: &str) -> Option<NaiveDate> {
    let mut dates = all_dates(text);
    dates.sort_by_key(|(pos, _)| *pos);

    dates
        .iter()
        .find(|(pos, _)| has_delivery_context(text, *pos))
        .or_else(|| dates.first())
        .map(|(_, date)| *date)
}

/// Every valid date in the text with its byte offset.
fn all_dates(text: &str) -> Vec<(usize, NaiveDate)> {
    let german = GERMAN_DATE
        .captures_iter(text)
        .filter_map(|caps| Some((caps.get(0)?.start(), ymd(&caps[3], &caps[2], &caps[1])?)));
    let iso = ISO_DATE
        .captures_iter(text)
        .filter_map(|caps| Some((caps.get(0)?.start(), ymd(&caps[1], &caps[2], &caps[3])?)));
    let worded = WORDED_DATE.captures_iter(text).filter_map(|caps| {
        let month = month_number(&caps[2])?;
        let date = NaiveDate::from_ymd_opt(caps[3].parse().ok()?, month, caps[1].parse().ok()?)?;
        Some((caps.get(0)?.start(), date))
    });

    german.chain(iso).chain(worded).collect()
}

fn ymd(year: &str, month: &str, day: &str) -> Option<NaiveDate> {
    NaiveDate::from_ymd_opt(year.parse().ok()?, month.parse().ok()?, day.parse().ok()?)
}

fn has_delivery_context(text: &str, pos: usize) -> bool {
    let line_start = text[..pos].rfind('\n').map_or(0, |i| i + 1);
    let mut start = pos.saturating_sub(CONTEXT_WINDOW).max(line_start);
    while !text.is_char_boundary(start) {
        start += 1;
    }
    DELIVERY_CONTEXT.is_match(&text[start..pos])
}

/// Expected delivery window, as a time range where possible.
pub fn find_time_window(text: &str) -> Option<TimeWindow> {
    if let Some(caps) = TIME_RANGE.captures(text) {
        let start = NaiveTime::from_hms_opt(caps[1].parse().ok()?, caps[2].parse().ok()?, 0);
        let end = NaiveTime::from_hms_opt(caps[3].parse().ok()?, caps[4].parse().ok()?, 0);
        if let (Some(start), Some(end)) = (start, end) {
            return Some(TimeWindow::Range { start, end });
        }
    }

    if let Some(caps) = HOUR_RANGE.captures(text) {
        let start = NaiveTime::from_hms_opt(caps[1].parse().ok()?, 0, 0);
        let end = NaiveTime::from_hms_opt(caps[2].parse().ok()?, 0, 0);
        if let (Some(start), Some(end)) = (start, end) {
            return Some(TimeWindow::Range { start, end });
        }
    }

    DAYPART
        .captures(text)
        .map(|caps| TimeWindow::Text(caps[1].to_lowercase()))
}

fn month_number(name: &str) -> Option<u32> {
    let prefix: String = name.to_lowercase().chars().take(3).collect();
    let month = match prefix.as_str() {
        "jan" => 1,
        "feb" => 2,
        "mar" | "mär" => 3,
        "apr" => 4,
        "may" | "mai" => 5,
        "jun" => 6,
        "jul" => 7,
        "aug" => 8,
        "sep" => 9,
        "oct" | "okt" => 10,
        "nov" => 11,
        "dec" | "dez" => 12,
        _ => return None,
    };
    Some(month)
}
